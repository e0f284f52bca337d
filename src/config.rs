use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GenerationError, Result};

/// Configuration for the generation engine.
///
/// Use [`EngineConfig::builder()`] for ergonomic construction, or
/// [`EngineConfig::default()`] for the upstream service's usual timings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root URL of the creation service.
    pub base_url: String,

    /// Directory that downloaded images are written under.
    pub storage_dir: PathBuf,

    /// Path to SQLite database file. `None` = in-memory store.
    pub db_path: Option<PathBuf>,

    /// Upper bound accepted for `images_per_style`.
    pub max_images_per_style: u32,

    /// Timeout for the credential probe and the preload request.
    pub probe_timeout: Duration,

    /// Timeout for each submission POST.
    pub submit_timeout: Duration,

    /// Timeout for a single poll request.
    pub poll_request_timeout: Duration,

    /// Wall-clock budget for the whole poll stage.
    pub poll_deadline: Duration,

    /// Pause after a poll that returned no links.
    pub poll_interval: Duration,

    /// Pause after a poll request that errored.
    pub poll_retry_delay: Duration,

    /// Timeout for the fallback page fetch.
    pub fallback_timeout: Duration,

    /// Timeout for each image download.
    pub download_timeout: Duration,

    /// Maximum jobs running at once (0 = unlimited).
    pub max_concurrent_jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.bing.com".to_string(),
            storage_dir: PathBuf::from("/tmp/pixel_images"),
            db_path: None,
            max_images_per_style: 4,
            probe_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(600),
            poll_request_timeout: Duration::from_secs(30),
            poll_deadline: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            poll_retry_delay: Duration::from_secs(2),
            fallback_timeout: Duration::from_secs(600),
            download_timeout: Duration::from_secs(30),
            max_concurrent_jobs: 0,
        }
    }
}

impl EngineConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Defaults overridden by `PIXEL_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("PIXEL_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = lookup("PIXEL_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("PIXEL_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("PIXEL_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = parse_var("PIXEL_MAX_CONCURRENT_JOBS", &raw)?;
        }
        if let Some(raw) = lookup("PIXEL_POLL_DEADLINE_SECS") {
            config.poll_deadline =
                Duration::from_secs(parse_var("PIXEL_POLL_DEADLINE_SECS", &raw)?);
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| GenerationError::Config(format!("{} has invalid value '{}'", key, raw)))
}

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_storage_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage_dir = dir;
        self
    }

    /// Set the SQLite database path for persistence. Omit for in-memory.
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    pub fn with_max_images_per_style(mut self, max: u32) -> Self {
        self.config.max_images_per_style = max;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.config.submit_timeout = timeout;
        self
    }

    pub fn with_poll_deadline(mut self, deadline: Duration) -> Self {
        self.config.poll_deadline = deadline;
        self
    }

    /// Set the pause after an empty poll and after a failed poll request.
    pub fn with_poll_delays(mut self, interval: Duration, retry_delay: Duration) -> Self {
        self.config.poll_interval = interval;
        self.config.poll_retry_delay = retry_delay;
        self
    }

    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.config.fallback_timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.max_concurrent_jobs = max;
        self
    }

    /// Build the final [`EngineConfig`].
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.base_url, "https://www.bing.com");
        assert_eq!(config.max_images_per_style, 4);
        assert_eq!(config.poll_deadline, Duration::from_secs(600));
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_builder_trims_base_url() {
        let config = EngineConfig::builder()
            .with_base_url("http://localhost:9000/")
            .with_poll_deadline(Duration::from_secs(5))
            .build();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.poll_deadline, Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PIXEL_STORAGE_DIR", "/data/images"),
            ("PIXEL_MAX_CONCURRENT_JOBS", "3"),
            ("PIXEL_POLL_DEADLINE_SECS", "120"),
        ]);
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/data/images"));
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.poll_deadline, Duration::from_secs(120));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = EngineConfig::from_lookup(|k| {
            (k == "PIXEL_MAX_CONCURRENT_JOBS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(GenerationError::Config(_))));
    }
}
