//! wavebed CLI entry point.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    wavebed::cli::run().await
}
