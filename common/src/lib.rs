//! Shared utilities for the autocast crates.

pub mod dirs;
