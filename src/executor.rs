use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::error::Result;
use crate::types::{BatchSubmission, GenerationRequest};

/// Background executor for generation jobs.
///
/// Each job id gets at most one in-flight task, so a job record always has
/// exactly one writer. Independent jobs run concurrently, optionally capped
/// by `max_concurrent_jobs`.
pub struct JobExecutor {
    engine: Arc<Engine>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    slots: Option<Arc<Semaphore>>,
}

/// Releases a job's slot in the in-flight set when its task ends.
struct InFlightGuard {
    job_id: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

impl JobExecutor {
    pub fn new(engine: Arc<Engine>) -> Self {
        let max = engine.config().max_concurrent_jobs;
        Self {
            engine,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            slots: (max > 0).then(|| Arc::new(Semaphore::new(max))),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Spawn a task running `job_id`. Returns `None` if that job already
    /// has a task in flight.
    pub fn schedule(&self, job_id: &str) -> Option<JoinHandle<()>> {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(job_id.to_string()) {
                debug!(job_id, "job already in flight, not scheduling again");
                return None;
            }
        }

        let guard = InFlightGuard {
            job_id: job_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        };
        let engine = Arc::clone(&self.engine);
        let slots = self.slots.clone();

        Some(tokio::spawn(async move {
            let _permit = match slots {
                Some(slots) => match slots.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            match engine.run_job(&guard.job_id).await {
                Ok(status) => debug!(job_id = %guard.job_id, status = %status, "job task done"),
                Err(e) => error!(job_id = %guard.job_id, error = %e, "job task failed"),
            }
            drop(guard);
        }))
    }

    /// Submit a job and schedule it right away. Returns the job id.
    pub async fn submit(&self, request: GenerationRequest) -> Result<String> {
        let job_id = self.engine.submit(request).await?;
        self.schedule(&job_id);
        Ok(job_id)
    }

    /// Submit one job per prompt and schedule them all.
    pub async fn submit_batch<I, S>(
        &self,
        prompts: I,
        styles: &[String],
        images_per_style: u32,
        credential: Option<&str>,
    ) -> Result<BatchSubmission>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let batch = self
            .engine
            .submit_batch(prompts, styles, images_per_style, credential)
            .await?;
        for (job_id, _) in &batch.jobs {
            self.schedule(job_id);
        }
        info!(batch_id = %batch.batch_id, jobs = batch.total_jobs(), "batch scheduled");
        Ok(batch)
    }

    /// Schedule every job left pending or processing, e.g. after a restart.
    /// Returns the number of jobs scheduled.
    pub async fn resume_unfinished(&self) -> Result<usize> {
        let ids = self.engine.unfinished_jobs().await?;
        let scheduled = ids.iter().filter_map(|id| self.schedule(id)).count();
        if scheduled > 0 {
            info!(scheduled, "resumed unfinished jobs");
        }
        Ok(scheduled)
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }

    /// Number of jobs with a task in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
