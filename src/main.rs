use anyhow::Result;
use streamchat::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
