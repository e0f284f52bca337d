use std::sync::Arc;

use pixel_dalle::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pixel_dalle=info")),
        )
        .init();

    let cookie = std::env::var("PIXEL_COOKIE").unwrap_or_default();
    let engine = Engine::new(EngineConfig::from_env()?, Arc::new(MemoryJobStore::new()))?;

    if engine.check_credential(&cookie).await {
        println!("Credential is valid.");
    } else {
        println!("Credential was rejected. Capture a fresh cookie string and set PIXEL_COOKIE.");
    }

    Ok(())
}
