use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{GenerationError, Result};
use crate::extract::{extract_absolute_image_links, extract_image_links, take_links};
use crate::session::Session;
use crate::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

/// `rt` routing values tried for the submission POST, in order.
const SUBMIT_VARIANTS: [Option<&str>; 3] = [Some("4"), Some("3"), None];

/// Lowercased marker the service puts in the page for moderated prompts.
const BLOCKED_MARKER: &str = "this prompt has been blocked";

/// Marker present in poll responses that carry an error payload.
const POLL_ERROR_MARKER: &str = "errorMessage";

/// Redirect hops followed for one GET before giving up.
const MAX_REDIRECTS: usize = 10;

/// Url-encode a prompt for the `q` parameter and the form body.
pub fn encode_prompt(prompt: &str) -> String {
    url::form_urlencoded::byte_serialize(prompt.as_bytes()).collect()
}

/// Request id carried by a submission redirect, with the notify flag removed.
fn request_id_from_location(location: &str) -> Option<String> {
    let cleaned = location.replace("&nfy=1", "");
    let (_, id) = cleaned.rsplit_once("id=")?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Client for the image creation service.
///
/// Every stage takes the job's [`Session`] by `&mut` and updates its
/// cookies from each response, the way a browser tab would.
///
/// # Example
/// ```no_run
/// use pixel_dalle::{CreateClient, EngineConfig};
///
/// # async fn example() -> pixel_dalle::Result<()> {
/// let client = CreateClient::new(EngineConfig::default())?;
/// let mut session = client.session("_U=...");
/// if client.check_credential(&mut session).await {
///     let links = client.generate_for_style(&mut session, "a red fox, origami", 4).await?;
///     println!("{} images", links.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CreateClient {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl CreateClient {
    /// Create a client backed by `reqwest`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self::with_transport(Arc::new(ReqwestTransport::new()?), config))
    }

    /// Use a custom [`Transport`] (proxies, recording, tests).
    pub fn with_transport(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A fresh session for `credential`.
    pub fn session(&self, credential: &str) -> Session {
        Session::new(credential, &self.config.base_url)
    }

    fn create_url(&self) -> String {
        format!("{}/images/create", self.config.base_url)
    }

    /// Absolute URL for a link or `Location` relative to `base_url`.
    pub fn resolve(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            format!("{}{}", self.config.base_url, location)
        } else {
            format!("{}/{}", self.config.base_url, location)
        }
    }

    /// `Location` of a redirect, resolved against the URL that sent it.
    fn redirect_target(&self, current: &str, location: &str) -> String {
        url::Url::parse(current)
            .and_then(|base| base.join(location))
            .map(String::from)
            .unwrap_or_else(|_| self.resolve(location))
    }

    /// Send through the session. GET redirects are followed hop by hop so
    /// cookies set on intermediate responses reach the session; POST
    /// responses are returned as they arrive.
    async fn send(&self, session: &mut Session, request: HttpRequest) -> Result<HttpResponse> {
        let follow = request.method == Method::Get;
        let timeout = request.timeout;
        let mut request = request;
        let mut hops = 0;

        loop {
            let url = request.url.clone();
            let resp = self
                .transport
                .send(request.headers(session.request_headers()))
                .await?;
            session.absorb_set_cookies(&resp.set_cookies);

            let location = match resp.location.clone() {
                Some(location) if follow && resp.is_redirect() => location,
                _ => return Ok(resp),
            };
            if hops == MAX_REDIRECTS {
                return Err(GenerationError::Transport(format!(
                    "Too many redirects from {}",
                    url
                )));
            }
            hops += 1;

            let current = if resp.url.is_empty() { &url } else { &resp.url };
            let next = self.redirect_target(current, &location);
            debug!(from = %url, to = %next, "following redirect");
            request = HttpRequest::get(next, timeout);
        }
    }

    // ── Credential ──────────────────────────────────────────────────

    /// Liveness probe: the creation page must load without bouncing to a
    /// login or error page. Never fails; any error reads as `false`.
    pub async fn check_credential(&self, session: &mut Session) -> bool {
        let url = self.create_url();
        let request = HttpRequest::get(&url, self.config.probe_timeout);
        match self.send(session, request).await {
            Ok(resp) if resp.status == 200 && resp.url.contains("/images/create") => true,
            Ok(resp) => {
                debug!(status = resp.status, url = %resp.url, "credential probe rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "credential probe failed");
                false
            }
        }
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Submit a prompt and return the polling address, or `None` when no
    /// request variant was redirected.
    pub async fn submit(&self, session: &mut Session, prompt: &str) -> Result<Option<String>> {
        let encoded = encode_prompt(prompt);

        // Preload for fresh cookies; the outcome does not matter.
        let preload = HttpRequest::get(self.create_url(), self.config.probe_timeout);
        if let Err(e) = self.send(session, preload).await {
            debug!(error = %e, "preload request failed");
        }

        let payload = format!("q={}&qs=ds", encoded);
        for rt in SUBMIT_VARIANTS {
            let mut url = format!("{}?q={}&FORM=GENCRE", self.create_url(), encoded);
            if let Some(rt) = rt {
                url.push_str("&rt=");
                url.push_str(rt);
            }

            let request = HttpRequest::post_form(url, payload.as_str(), self.config.submit_timeout);
            let resp = self.send(session, request).await?;

            if resp.text().to_lowercase().contains(BLOCKED_MARKER) {
                return Err(GenerationError::BlockedContent(
                    "rejected by upstream moderation".into(),
                ));
            }

            let request_id = resp
                .location
                .as_deref()
                .filter(|_| resp.is_redirect())
                .and_then(|loc| request_id_from_location(loc).map(|id| (loc, id)));

            if let Some((location, request_id)) = request_id {
                let courtesy = HttpRequest::get(
                    self.resolve(&location.replace("&nfy=1", "")),
                    self.config.probe_timeout,
                );
                if let Err(e) = self.send(session, courtesy).await {
                    debug!(error = %e, "redirect follow-up failed");
                }

                let polling_url = format!(
                    "{}/images/create/async/results/{}?q={}",
                    self.config.base_url, request_id, encoded
                );
                debug!(rt = ?rt, request_id = %request_id, "submission accepted");
                return Ok(Some(polling_url));
            }

            debug!(rt = ?rt, status = resp.status, "submission variant not redirected");
        }

        Ok(None)
    }

    // ── Polling ─────────────────────────────────────────────────────

    /// Poll until image links appear or the configured deadline passes.
    ///
    /// Request timeouts and sleeps are clamped to the remaining budget, so
    /// this returns within the deadline even if the service never answers.
    pub async fn poll(
        &self,
        session: &mut Session,
        polling_url: &str,
        count: usize,
    ) -> Result<Vec<String>> {
        let deadline = Instant::now() + self.config.poll_deadline;
        let mut attempts: u32 = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            attempts += 1;

            let timeout = self.config.poll_request_timeout.min(deadline - now);
            let request = HttpRequest::get(polling_url, timeout);
            let delay = match tokio::time::timeout(timeout, self.send(session, request)).await {
                Ok(Ok(resp)) => {
                    if resp.status == 200 {
                        let body = resp.text();
                        if !body.contains(POLL_ERROR_MARKER) {
                            let links = extract_image_links(&body);
                            if !links.is_empty() {
                                info!(attempts, found = links.len(), "images ready");
                                return Ok(take_links(links, count));
                            }
                        }
                    }
                    self.config.poll_interval
                }
                Ok(Err(e)) => {
                    debug!(error = %e, attempts, "poll request failed");
                    self.config.poll_retry_delay
                }
                Err(_) => {
                    debug!(attempts, "poll request timed out");
                    self.config.poll_retry_delay
                }
            };

            tokio::time::sleep_until(deadline.min(Instant::now() + delay)).await;
        }

        warn!(attempts, url = %polling_url, "poll deadline exceeded");
        Err(GenerationError::PollTimeout(self.config.poll_deadline))
    }

    // ── Fallback ────────────────────────────────────────────────────

    /// Scrape the plain creation page for finished images.
    pub async fn fallback(
        &self,
        session: &mut Session,
        prompt: &str,
        count: usize,
    ) -> Result<Vec<String>> {
        let url = format!(
            "{}?q={}&FORM=GENCRE",
            self.create_url(),
            encode_prompt(prompt)
        );
        let resp = self
            .send(session, HttpRequest::get(url, self.config.fallback_timeout))
            .await?;

        let links = extract_absolute_image_links(&resp.text());
        if links.is_empty() {
            return Err(GenerationError::NoImagesFound);
        }
        Ok(take_links(links, count))
    }

    /// Submit, then poll or fall back. Returns up to `count` distinct links.
    pub async fn generate_for_style(
        &self,
        session: &mut Session,
        prompt: &str,
        count: usize,
    ) -> Result<Vec<String>> {
        match self.submit(session, prompt).await? {
            Some(polling_url) => self.poll(session, &polling_url, count).await,
            None => {
                info!("no submission variant redirected, using fallback");
                self.fallback(session, prompt, count).await
            }
        }
    }

    // ── Download ────────────────────────────────────────────────────

    /// Fetch raw image bytes. Relative links are resolved against `base_url`.
    pub async fn fetch_image(&self, session: &mut Session, url: &str) -> Result<Vec<u8>> {
        let url = self.resolve(url);
        let resp = self
            .send(session, HttpRequest::get(url.as_str(), self.config.download_timeout))
            .await?;
        if resp.status != 200 {
            return Err(GenerationError::Download(format!(
                "HTTP {} for {}",
                resp.status, url
            )));
        }
        Ok(resp.body)
    }

    /// Download `url` to `dest`. Returns `false` on any failure and leaves
    /// no file behind.
    pub async fn download(&self, session: &mut Session, url: &str, dest: &Path) -> bool {
        let bytes = match self.fetch_image(session, url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, url, "image download failed");
                return false;
            }
        };
        match write_atomically(dest.to_path_buf(), bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, path = %dest.display(), "failed to save image");
                false
            }
        }
    }
}

/// Write into a temp file next to `dest`, then rename over it.
async fn write_atomically(dest: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&dest).map_err(|e| GenerationError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| GenerationError::Other(format!("Write task failed: {}", e)))?
}
