#[tokio::main]
async fn main() -> anyhow::Result<()> {
    autocast_cli::run().await
}
