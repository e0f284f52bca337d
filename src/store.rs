use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::GenerationJob;

/// Durable home for job records, keyed by job id.
///
/// Each job has a single writer (the execution that owns it), so the
/// store only needs whole-record upserts.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the record with `job.id`.
    async fn upsert(&self, job: &GenerationJob) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<GenerationJob>>;

    /// The job whose image list contains `image_id`.
    async fn find_by_image_id(&self, image_id: &str) -> Result<Option<GenerationJob>>;

    /// Up to `limit` jobs, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<GenerationJob>>;

    /// Ids of jobs that never reached a terminal status, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<String>>;
}

/// Process-local [`JobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, GenerationJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, job: &GenerationJob) -> Result<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<GenerationJob>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn find_by_image_id(&self, image_id: &str) -> Result<Option<GenerationJob>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .find(|job| job.image(image_id).is_some())
            .cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<GenerationJob>> {
        let mut jobs: Vec<GenerationJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_unfinished(&self) -> Result<Vec<String>> {
        let jobs = self.jobs.read().await;
        let mut unfinished: Vec<&GenerationJob> =
            jobs.values().filter(|j| !j.status.is_terminal()).collect();
        unfinished.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(unfinished.into_iter().map(|j| j.id.clone()).collect())
    }
}
