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

    // Reads PIXEL_* settings from the environment or a .env file
    let config = EngineConfig::from_env()?;
    let cookie = std::env::var("PIXEL_COOKIE").unwrap_or_default();
    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "a red fox in the snow".to_string());

    let engine = Arc::new(Engine::new(config, Arc::new(MemoryJobStore::new()))?);
    let executor = JobExecutor::new(Arc::clone(&engine));

    let job_id = engine
        .submit(
            GenerationRequest::new(prompt)
                .styles(["origami", "watercolor"])
                .images_per_style(2)
                .credential(cookie),
        )
        .await?;

    if let Some(handle) = executor.schedule(&job_id) {
        handle
            .await
            .map_err(|e| GenerationError::Other(e.to_string()))?;
    }

    let Some(job) = engine.job(&job_id).await? else {
        return Err(GenerationError::NotFound(job_id));
    };
    println!(
        "Job {} is {} ({}/{} images)",
        job.id, job.status, job.completed_images, job.total_images
    );
    for image in &job.images {
        match &image.local_path {
            Some(path) => println!("  [{}] {}", image.style.as_deref().unwrap_or("-"), path.display()),
            None => println!("  [{}] failed: {}", image.style.as_deref().unwrap_or("-"), image.image_url),
        }
    }
    for failure in &job.style_failures {
        println!(
            "  style {} failed: {}",
            failure.style.as_deref().unwrap_or("-"),
            failure.reason
        );
    }
    if let Some(error) = &job.error {
        println!("  error: {}", error);
    }

    Ok(())
}
