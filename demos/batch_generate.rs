use std::sync::Arc;
use std::time::Duration;

use pixel_dalle::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pixel_dalle=info")),
        )
        .init();

    let config = EngineConfig::from_env()?;
    let cookie = std::env::var("PIXEL_COOKIE").ok();

    // Jobs survive restarts when PIXEL_DB_PATH is set
    let engine = Arc::new(Engine::from_config(config)?);
    let executor = JobExecutor::new(Arc::clone(&engine));

    let resumed = executor.resume_unfinished().await?;
    if resumed > 0 {
        println!("Resumed {} jobs from a previous run.", resumed);
    }

    let prompts = [
        "a lighthouse at dusk",
        "a cat reading a newspaper",
        "a mountain village in winter",
    ];
    let styles: Vec<String> = ["pixel art", "ukiyo-e"].iter().map(|s| s.to_string()).collect();

    let batch = executor
        .submit_batch(prompts, &styles, 1, cookie.as_deref())
        .await?;
    println!("Batch {} submitted with {} jobs.", batch.batch_id, batch.total_jobs());

    while executor.in_flight() > 0 {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    for (job_id, prompt) in &batch.jobs {
        if let Some(job) = engine.job(job_id).await? {
            println!(
                "{:<32} {:<16} {}/{}",
                prompt, job.status, job.completed_images, job.total_images
            );
        }
    }

    Ok(())
}
