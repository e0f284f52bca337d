use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, Result};

/// Job lifecycle: Pending -> Processing -> Completed/PartiallyFailed/Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    PartiallyFailed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::PartiallyFailed => "partially_failed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "partially_failed" => Some(JobStatus::PartiallyFailed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::PartiallyFailed | JobStatus::Failed
        )
    }

    /// Whether moving to `next` keeps the job moving forward.
    ///
    /// `Processing -> Processing` is allowed so an interrupted run can be
    /// restarted by the same single writer.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next == JobStatus::Processing,
            JobStatus::Processing => next != JobStatus::Pending,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-image download status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Completed,
    Failed,
}

/// A user-submitted generation request: one prompt, N styles, M images per style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub styles: Vec<String>,
    pub images_per_style: u32,
    /// Raw cookie string. Never persisted with the job.
    #[serde(skip_serializing)]
    pub credential: Option<String>,
}

impl GenerationRequest {
    /// Create a request with no styles and four images.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            styles: Vec::new(),
            images_per_style: 4,
            credential: None,
        }
    }

    pub fn styles<I, S>(mut self, styles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.styles = styles.into_iter().map(Into::into).collect();
        self
    }

    pub fn images_per_style(mut self, count: u32) -> Self {
        self.images_per_style = count;
        self
    }

    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Reject empty prompts and out-of-range image counts.
    pub fn validate(&self, max_images_per_style: u32) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(GenerationError::InvalidInput(
                "Prompt cannot be empty".into(),
            ));
        }
        if self.images_per_style == 0 {
            return Err(GenerationError::InvalidInput(
                "Images per style must be at least 1".into(),
            ));
        }
        if self.images_per_style > max_images_per_style {
            return Err(GenerationError::InvalidInput(format!(
                "Images per style cannot exceed {}",
                max_images_per_style
            )));
        }
        Ok(())
    }
}

/// A discovered image URL not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub style: Option<String>,
    /// Ordinal within the style's batch.
    pub index: usize,
}

/// An image selected for download and tracked on its job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub prompt: String,
    pub style: Option<String>,
    pub image_url: String,
    pub local_path: Option<PathBuf>,
    pub status: ImageStatus,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn pending(prompt: &str, candidate: &ImageCandidate) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            style: candidate.style.clone(),
            image_url: candidate.url.clone(),
            local_path: None,
            status: ImageStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Why a style produced no candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleFailure {
    pub style: Option<String>,
    pub reason: String,
}

/// Result of running the submit/poll/fallback chain for one style.
#[derive(Debug, Clone)]
pub enum StyleOutcome {
    Candidates(Vec<ImageCandidate>),
    Failed(StyleFailure),
}

/// One tracked generation request and its images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: String,
    pub prompt: String,
    pub styles: Vec<String>,
    pub images_per_style: u32,
    pub total_images: u32,
    pub completed_images: u32,
    pub failed_images: u32,
    pub status: JobStatus,
    pub images: Vec<GeneratedImage>,
    #[serde(default)]
    pub style_failures: Vec<StyleFailure>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(request: &GenerationRequest) -> Self {
        let now = Utc::now();
        let style_count = request.styles.len().max(1) as u32;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: request.prompt.clone(),
            styles: request.styles.clone(),
            images_per_style: request.images_per_style,
            total_images: style_count * request.images_per_style,
            completed_images: 0,
            failed_images: 0,
            status: JobStatus::Pending,
            images: Vec::new(),
            style_failures: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The styles to attempt, in request order. `None` means no suffix.
    pub fn style_slots(&self) -> Vec<Option<String>> {
        if self.styles.is_empty() {
            return vec![None];
        }
        self.styles
            .iter()
            .map(|s| {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            })
            .collect()
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(GenerationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Processing` and clear any partial results of an earlier run.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)?;
        self.images.clear();
        self.style_failures.clear();
        self.completed_images = 0;
        self.failed_images = 0;
        self.error = None;
        Ok(())
    }

    /// Track a new pending image. Returns its position in `images`.
    pub fn add_image(&mut self, image: GeneratedImage) -> usize {
        self.images.push(image);
        self.updated_at = Utc::now();
        self.images.len() - 1
    }

    /// Settle a pending image exactly once and update the counters.
    pub fn settle_image(&mut self, idx: usize, local_path: Option<PathBuf>) -> bool {
        let Some(image) = self.images.get_mut(idx) else {
            return false;
        };
        if image.status != ImageStatus::Pending {
            return false;
        }
        match local_path {
            Some(path) => {
                image.status = ImageStatus::Completed;
                image.local_path = Some(path);
                self.completed_images += 1;
            }
            None => {
                image.status = ImageStatus::Failed;
                self.failed_images += 1;
            }
        }
        self.updated_at = Utc::now();
        true
    }

    pub fn record_style_failure(&mut self, failure: StyleFailure) {
        self.style_failures.push(failure);
        self.updated_at = Utc::now();
    }

    /// Terminal transition after every style was attempted.
    ///
    /// Images that were never produced count as failed so that
    /// `completed_images + failed_images == total_images`.
    pub fn finish(&mut self) -> Result<JobStatus> {
        self.failed_images = self.total_images.saturating_sub(self.completed_images);
        let status = if self.failed_images == 0 {
            JobStatus::Completed
        } else if self.completed_images == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyFailed
        };
        self.transition(status)?;
        Ok(status)
    }

    /// Terminal failure of the whole job.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.failed_images = self.total_images.saturating_sub(self.completed_images);
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn image(&self, image_id: &str) -> Option<&GeneratedImage> {
        self.images.iter().find(|img| img.id == image_id)
    }
}

/// Jobs created by a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub batch_id: String,
    /// `(job_id, prompt)` pairs in prompt order.
    pub jobs: Vec<(String, String)>,
}

impl BatchSubmission {
    pub fn total_jobs(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str) -> ImageCandidate {
        ImageCandidate {
            url: url.into(),
            style: Some("origami".into()),
            index: 0,
        }
    }

    #[test]
    fn test_total_images_without_styles() {
        let job = GenerationJob::new(&GenerationRequest::new("fox").images_per_style(3));
        assert_eq!(job.total_images, 3);
        assert_eq!(job.style_slots(), vec![None]);
    }

    #[test]
    fn test_total_images_with_styles() {
        let job = GenerationJob::new(
            &GenerationRequest::new("fox")
                .styles(["anime", "noir", ""])
                .images_per_style(2),
        );
        assert_eq!(job.total_images, 6);
        assert_eq!(
            job.style_slots(),
            vec![Some("anime".to_string()), Some("noir".to_string()), None]
        );
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(GenerationRequest::new("  ").validate(4).is_err());
        assert!(GenerationRequest::new("fox").images_per_style(5).validate(4).is_err());
        assert!(GenerationRequest::new("fox").images_per_style(0).validate(4).is_err());
        assert!(GenerationRequest::new("fox").images_per_style(4).validate(4).is_ok());
    }

    #[test]
    fn test_status_never_reverts() {
        let mut job = GenerationJob::new(&GenerationRequest::new("fox"));
        assert!(job.transition(JobStatus::Completed).is_err());
        job.start().unwrap();
        job.fail("boom").unwrap();
        assert!(job.transition(JobStatus::Processing).is_err());
        assert!(job.transition(JobStatus::Pending).is_err());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_settle_image_only_once() {
        let mut job = GenerationJob::new(&GenerationRequest::new("fox").images_per_style(1));
        job.start().unwrap();
        let idx = job.add_image(GeneratedImage::pending("fox", &candidate("https://x/1")));
        assert!(job.settle_image(idx, Some(PathBuf::from("/tmp/a.png"))));
        assert!(!job.settle_image(idx, None));
        assert_eq!(job.completed_images, 1);
        assert_eq!(job.failed_images, 0);
    }

    #[test]
    fn test_finish_counts_shortfall_as_failed() {
        let mut job = GenerationJob::new(
            &GenerationRequest::new("fox")
                .styles(["a", "b"])
                .images_per_style(2),
        );
        job.start().unwrap();
        let idx = job.add_image(GeneratedImage::pending("fox", &candidate("https://x/1")));
        job.settle_image(idx, Some(PathBuf::from("/tmp/a.png")));

        let status = job.finish().unwrap();
        assert_eq!(status, JobStatus::PartiallyFailed);
        assert_eq!(job.completed_images + job.failed_images, job.total_images);
    }

    #[test]
    fn test_finish_without_images_fails() {
        let mut job = GenerationJob::new(&GenerationRequest::new("fox").images_per_style(2));
        job.start().unwrap();
        assert_eq!(job.finish().unwrap(), JobStatus::Failed);
        assert_eq!(job.failed_images, 2);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::PartiallyFailed).unwrap();
        assert_eq!(json, "\"partially_failed\"");
        assert_eq!(JobStatus::parse("partially_failed"), Some(JobStatus::PartiallyFailed));
        assert_eq!(JobStatus::parse("cancelled"), None);
    }

    #[test]
    fn test_credential_not_serialized() {
        let req = GenerationRequest::new("fox").credential("_U=secret");
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("secret"));
    }
}
