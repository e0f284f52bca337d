use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::client::CreateClient;
use crate::config::EngineConfig;
#[cfg(feature = "sqlite")]
use crate::db::SqliteJobStore;
use crate::error::{GenerationError, Result};
use crate::filter;
use crate::session::{Session, DEFAULT_CREDENTIAL};
use crate::store::{JobStore, MemoryJobStore};
use crate::styles;
use crate::types::*;

/// `prompt, style` or just `prompt`.
pub fn styled_prompt(prompt: &str, style: Option<&str>) -> String {
    match style {
        Some(style) => format!("{}, {}", prompt, style),
        None => prompt.to_string(),
    }
}

/// Filename for a downloaded image.
pub fn image_filename(candidate: &ImageCandidate, image_id: &str) -> String {
    let style_part = candidate
        .style
        .as_deref()
        .map(|s| {
            let cleaned: String = s
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
                .collect();
            format!("_{}", cleaned)
        })
        .unwrap_or_default();
    let short_id: String = image_id.chars().take(8).collect();
    format!(
        "pixel_image{}_{}_{}_{}.png",
        style_part,
        Utc::now().format("%Y%m%d_%H%M%S"),
        candidate.index,
        short_id
    )
}

/// Drives generation jobs from submission to a terminal status.
///
/// One [`Engine`] is shared by all jobs; per-job state (the [`Session`])
/// is created inside [`run_job`](Self::run_job) and never outlives it.
/// Credentials are kept in memory only, keyed by job id, from submission
/// until the job's first run takes them.
pub struct Engine {
    client: CreateClient,
    store: Arc<dyn JobStore>,
    credentials: Mutex<HashMap<String, String>>,
}

impl Engine {
    /// Create an engine talking to the real service through `reqwest`.
    pub fn new(config: EngineConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        Ok(Self::with_client(CreateClient::new(config)?, store))
    }

    /// Create an engine whose store follows `config.db_path`: SQLite at
    /// that path when set, in memory otherwise.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let store = open_store(config.db_path.as_deref())?;
        Self::new(config, store)
    }

    pub fn with_client(client: CreateClient, store: Arc<dyn JobStore>) -> Self {
        Self {
            client,
            store,
            credentials: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.client.config()
    }

    pub fn client(&self) -> &CreateClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    // ── Entry points ────────────────────────────────────────────────

    /// Validate and record a new job. Returns the job id; the job stays
    /// `pending` until [`run_job`](Self::run_job) picks it up.
    pub async fn submit(&self, request: GenerationRequest) -> Result<String> {
        request.validate(self.config().max_images_per_style)?;
        for style in request.styles.iter().filter(|s| !styles::is_builtin(s)) {
            debug!(style = %style, "style is not in the built-in catalogue");
        }
        let job = GenerationJob::new(&request);
        self.store.upsert(&job).await?;
        if let Some(credential) = request.credential {
            self.remember_credential(&job.id, credential);
        }
        info!(job_id = %job.id, total_images = job.total_images, "job submitted");
        Ok(job.id)
    }

    /// Create one job per non-blank prompt, sharing styles and count.
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
        let prompts: Vec<String> = prompts.into_iter().map(Into::into).collect();
        if prompts.is_empty() {
            return Err(GenerationError::InvalidInput("No prompts provided".into()));
        }

        let requests: Vec<GenerationRequest> = prompts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .map(|prompt| {
                let mut request = GenerationRequest::new(prompt)
                    .styles(styles.iter().cloned())
                    .images_per_style(images_per_style);
                request.credential = credential.map(String::from);
                request
            })
            .collect();
        for request in &requests {
            request.validate(self.config().max_images_per_style)?;
        }

        let mut jobs = Vec::with_capacity(requests.len());
        for request in requests {
            let prompt = request.prompt.clone();
            jobs.push((self.submit(request).await?, prompt));
        }

        Ok(BatchSubmission {
            batch_id: uuid::Uuid::new_v4().to_string(),
            jobs,
        })
    }

    /// Process a job to a terminal status.
    ///
    /// Terminal jobs are left untouched. Everything that goes wrong inside
    /// the pipeline ends up on the job record; only store failures and an
    /// unknown id surface as `Err`. Must not run twice concurrently for one
    /// id; [`JobExecutor`](crate::JobExecutor) enforces that.
    ///
    /// The job's credential is taken out of memory on entry, so it never
    /// outlives the first run whichever way that run ends.
    pub async fn run_job(&self, job_id: &str) -> Result<JobStatus> {
        let credential = self.take_credential(job_id);
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| GenerationError::NotFound(format!("job {}", job_id)))?;

        if job.status.is_terminal() {
            debug!(job_id, status = %job.status, "job already finished");
            return Ok(job.status);
        }

        job.start()?;
        self.store.upsert(&job).await?;
        info!(job_id, prompt = %job.prompt, styles = job.styles.len(), "job started");

        let status = match self.process(&mut job, &credential).await {
            Ok(()) => job.finish()?,
            Err(e) => {
                warn!(job_id, error = %e, "job failed");
                job.fail(e.reason())?;
                JobStatus::Failed
            }
        };

        self.store.upsert(&job).await?;
        info!(
            job_id,
            status = %status,
            completed = job.completed_images,
            failed = job.failed_images,
            "job finished"
        );
        Ok(status)
    }

    /// Liveness probe for a credential. Never fails.
    pub async fn check_credential(&self, credential: &str) -> bool {
        let mut session = self.client.session(credential);
        self.client.check_credential(&mut session).await
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn job(&self, job_id: &str) -> Result<Option<GenerationJob>> {
        self.store.get(job_id).await
    }

    pub async fn recent_jobs(&self, limit: usize) -> Result<Vec<GenerationJob>> {
        self.store.list_recent(limit).await
    }

    pub async fn unfinished_jobs(&self) -> Result<Vec<String>> {
        self.store.list_unfinished().await
    }

    pub async fn image(&self, image_id: &str) -> Result<Option<GeneratedImage>> {
        Ok(self
            .store
            .find_by_image_id(image_id)
            .await?
            .and_then(|job| job.image(image_id).cloned()))
    }

    /// Path of a downloaded image that still exists on disk.
    pub async fn image_file(&self, image_id: &str) -> Result<PathBuf> {
        let image = self
            .image(image_id)
            .await?
            .ok_or_else(|| GenerationError::NotFound(format!("image {}", image_id)))?;
        match image.local_path {
            Some(path) if path.exists() => Ok(path),
            _ => Err(GenerationError::NotFound(format!(
                "image file for {}",
                image_id
            ))),
        }
    }

    // ── Pipeline ────────────────────────────────────────────────────

    async fn process(&self, job: &mut GenerationJob, credential: &str) -> Result<()> {
        filter::check_prompt(&job.prompt)?;

        let mut session = self.client.session(credential);
        if !self.client.check_credential(&mut session).await {
            return Err(GenerationError::CredentialInvalid);
        }

        let count = job.images_per_style as usize;
        for style in job.style_slots() {
            match self
                .run_style(&mut session, &job.prompt, style.as_deref(), count)
                .await
            {
                StyleOutcome::Candidates(candidates) => {
                    for candidate in &candidates {
                        self.download_candidate(job, &mut session, candidate).await;
                    }
                }
                StyleOutcome::Failed(failure) => job.record_style_failure(failure),
            }
            self.store.upsert(job).await?;
        }
        Ok(())
    }

    async fn run_style(
        &self,
        session: &mut Session,
        prompt: &str,
        style: Option<&str>,
        count: usize,
    ) -> StyleOutcome {
        let styled = styled_prompt(prompt, style);
        let result = match filter::check_prompt(&styled) {
            Ok(()) => self.client.generate_for_style(session, &styled, count).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(links) if !links.is_empty() => {
                debug!(style = ?style, found = links.len(), "style produced candidates");
                StyleOutcome::Candidates(
                    links
                        .into_iter()
                        .take(count)
                        .enumerate()
                        .map(|(index, url)| ImageCandidate {
                            url,
                            style: style.map(String::from),
                            index,
                        })
                        .collect(),
                )
            }
            Ok(_) => StyleOutcome::Failed(StyleFailure {
                style: style.map(String::from),
                reason: GenerationError::NoImagesFound.reason(),
            }),
            Err(e) => {
                error!(style = ?style, error = %e, "style generation failed");
                StyleOutcome::Failed(StyleFailure {
                    style: style.map(String::from),
                    reason: e.reason(),
                })
            }
        }
    }

    async fn download_candidate(
        &self,
        job: &mut GenerationJob,
        session: &mut Session,
        candidate: &ImageCandidate,
    ) {
        let image = GeneratedImage::pending(&job.prompt, candidate);
        let dest = self
            .config()
            .storage_dir
            .join(&job.id)
            .join(image_filename(candidate, &image.id));
        let idx = job.add_image(image);

        let saved = self.client.download(session, &candidate.url, &dest).await;
        job.settle_image(idx, saved.then_some(dest));
    }

    // ── Credentials ─────────────────────────────────────────────────

    fn remember_credential(&self, job_id: &str, credential: String) {
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.to_string(), credential);
    }

    fn take_credential(&self, job_id: &str) -> String {
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id)
            .unwrap_or_else(|| DEFAULT_CREDENTIAL.to_string())
    }
}

#[cfg(feature = "sqlite")]
fn open_store(db_path: Option<&Path>) -> Result<Arc<dyn JobStore>> {
    Ok(match db_path {
        Some(path) => Arc::new(SqliteJobStore::open(Some(path))?),
        None => Arc::new(MemoryJobStore::new()),
    })
}

#[cfg(not(feature = "sqlite"))]
fn open_store(db_path: Option<&Path>) -> Result<Arc<dyn JobStore>> {
    match db_path {
        Some(path) => Err(GenerationError::Config(format!(
            "db_path {} needs the sqlite feature",
            path.display()
        ))),
        None => Ok(Arc::new(MemoryJobStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_styled_prompt() {
        assert_eq!(styled_prompt("a red fox", Some("origami")), "a red fox, origami");
        assert_eq!(styled_prompt("a red fox", None), "a red fox");
    }

    #[test]
    fn test_image_filename() {
        let candidate = ImageCandidate {
            url: "https://x/1".into(),
            style: Some("oil painting".into()),
            index: 2,
        };
        let name = image_filename(&candidate, "abcdef12-3456");
        assert!(name.starts_with("pixel_image_oil_painting_"));
        assert!(name.ends_with("_2_abcdef12.png"));
    }

    #[test]
    fn test_image_filename_sanitizes_style() {
        let candidate = ImageCandidate {
            url: "https://x/1".into(),
            style: Some("../etc".into()),
            index: 0,
        };
        let name = image_filename(&candidate, "id");
        assert!(!name.contains('/'));
        assert!(name.starts_with("pixel_image____etc_"));
    }

    struct UnwritableStore {
        job: GenerationJob,
    }

    #[async_trait::async_trait]
    impl JobStore for UnwritableStore {
        async fn upsert(&self, _job: &GenerationJob) -> Result<()> {
            Err(GenerationError::Other("disk full".into()))
        }

        async fn get(&self, _job_id: &str) -> Result<Option<GenerationJob>> {
            Ok(Some(self.job.clone()))
        }

        async fn find_by_image_id(&self, _image_id: &str) -> Result<Option<GenerationJob>> {
            Ok(None)
        }

        async fn list_recent(&self, _limit: usize) -> Result<Vec<GenerationJob>> {
            Ok(Vec::new())
        }

        async fn list_unfinished(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn pending_credentials(engine: &Engine) -> usize {
        engine.credentials.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_credential_dropped_when_store_write_fails() {
        let job = GenerationJob::new(&GenerationRequest::new("a red fox"));
        let job_id = job.id.clone();
        let engine = Engine::new(EngineConfig::default(), Arc::new(UnwritableStore { job })).unwrap();
        engine.remember_credential(&job_id, "_U=secret".into());

        assert!(engine.run_job(&job_id).await.is_err());
        assert_eq!(pending_credentials(&engine), 0);
    }

    #[tokio::test]
    async fn test_credential_dropped_after_run() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(MemoryJobStore::new())).unwrap();
        let job_id = engine
            .submit(GenerationRequest::new("drug lab").credential("_U=secret"))
            .await
            .unwrap();
        assert_eq!(pending_credentials(&engine), 1);

        // blocked locally, so no request leaves the process
        assert_eq!(engine.run_job(&job_id).await.unwrap(), JobStatus::Failed);
        assert_eq!(pending_credentials(&engine), 0);
    }

    #[tokio::test]
    async fn test_submit_accepts_styles_outside_catalogue() {
        assert!(!styles::is_builtin("origami"));
        let engine = Engine::from_config(EngineConfig::default()).unwrap();
        let job_id = engine
            .submit(GenerationRequest::new("a red fox").styles(["origami", "Anime"]))
            .await
            .unwrap();
        let job = engine.job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.styles, vec!["origami", "Anime"]);
        assert_eq!(job.total_images, 8);
    }

    #[tokio::test]
    async fn test_from_config_in_memory() {
        let engine = Engine::from_config(EngineConfig::default()).unwrap();
        let job_id = engine.submit(GenerationRequest::new("a red fox")).await.unwrap();
        assert!(engine.job(&job_id).await.unwrap().is_some());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_from_config_opens_database() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("jobs.db");
        let config = EngineConfig::builder().with_db_path(db_path.clone()).build();

        let job_id = {
            let engine = Engine::from_config(config).unwrap();
            engine.submit(GenerationRequest::new("a red fox")).await.unwrap()
        };

        let reopened = SqliteJobStore::open(Some(&db_path)).unwrap();
        let job = reopened.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.prompt, "a red fox");
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_image_filename_without_style() {
        let candidate = ImageCandidate {
            url: "https://x/1".into(),
            style: None,
            index: 0,
        };
        assert!(image_filename(&candidate, "id").starts_with("pixel_image_2"));
    }
}
