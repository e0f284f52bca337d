//! # pixel-dalle
//!
//! Async batch driver for a browser-session image creation service.
//!
//! The service has no API. Generation is driven the way a browser would:
//! a captured cookie string becomes a [`Session`], a prompt is POSTed to the
//! creation page, the redirect reveals a polling address, and the result
//! page is polled until image links show up. When no redirect comes back
//! the plain creation page is scraped instead. Found images are downloaded
//! and tracked on a [`GenerationJob`].
//!
//! ## Features
//!
//! - Content filter that blocks prompts before any request is made
//! - Submission with ordered request variants and upstream moderation detection
//! - Deadline-bounded polling and a page-scrape fallback
//! - Atomic image downloads, one failure never aborts its siblings
//! - Job state machine with per-image status and forward-only transitions
//! - Executor with one worker per job id and optional concurrency cap
//! - In-memory or SQLite job store
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pixel_dalle::{Engine, EngineConfig, GenerationRequest, JobExecutor, MemoryJobStore};
//!
//! # async fn example() -> pixel_dalle::Result<()> {
//! let engine = Arc::new(Engine::new(EngineConfig::from_env()?, Arc::new(MemoryJobStore::new()))?);
//! let executor = JobExecutor::new(Arc::clone(&engine));
//!
//! let job_id = executor
//!     .submit(
//!         GenerationRequest::new("a red fox")
//!             .styles(["origami", "watercolor"])
//!             .images_per_style(2)
//!             .credential("_U=..."),
//!     )
//!     .await?;
//!
//! if let Some(job) = engine.job(&job_id).await? {
//!     println!("{} is {}", job.id, job.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
#[cfg(feature = "sqlite")]
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod extract;
pub mod filter;
pub mod session;
pub mod store;
pub mod styles;
pub mod transport;
pub mod types;

pub use client::CreateClient;
pub use config::{EngineConfig, EngineConfigBuilder};
#[cfg(feature = "sqlite")]
pub use db::SqliteJobStore;
pub use engine::Engine;
pub use error::{GenerationError, Result};
pub use executor::JobExecutor;
pub use extract::extract_image_links;
pub use session::Session;
pub use store::{JobStore, MemoryJobStore};
pub use styles::ALL_STYLES;
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
pub use types::{
    BatchSubmission, GeneratedImage, GenerationJob, GenerationRequest, ImageCandidate,
    ImageStatus, JobStatus, StyleFailure, StyleOutcome,
};
