#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pixel_dalle::*;

pub const BASE: &str = "https://www.bing.com";
pub const REQUEST_ID: &str = "4-abc123";

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

/// Transport that records every request and answers from a closure.
pub struct StubTransport {
    handler: Handler,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn posts(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::Post)
            .collect()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.contains(needle))
            .count()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(&request)
    }
}

/// Transport whose requests never complete. Counts what it was sent.
#[derive(Default)]
pub struct SilentTransport {
    sent: AtomicUsize,
}

#[async_trait]
impl Transport for SilentTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

impl SilentTransport {
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

pub fn ok(url: &str, body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        url: url.to_string(),
        body: body.as_bytes().to_vec(),
        ..Default::default()
    }
}

pub fn status(code: u16, url: &str) -> HttpResponse {
    HttpResponse {
        status: code,
        url: url.to_string(),
        ..Default::default()
    }
}

pub fn redirect(url: &str, location: &str) -> HttpResponse {
    HttpResponse {
        status: 302,
        url: url.to_string(),
        location: Some(location.to_string()),
        ..Default::default()
    }
}

/// Value of the `cookie` header a request was sent with.
pub fn sent_cookie(req: &HttpRequest) -> String {
    req.headers
        .iter()
        .find(|(k, _)| k == "cookie")
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

pub fn image_url(name: &str) -> String {
    format!("https://tse1.mm.bing.net/th/id/OIG.{}", name)
}

/// Result page with each link sized twice, plus UI assets without the marker.
pub fn result_page(links: &[String]) -> String {
    let mut html = String::from("<div class=\"gir_mmimg\"><img src=\"/rp/logo.svg\">");
    for link in links {
        html.push_str(&format!(
            "<img class=\"mimg\" src=\"{}?w=270&amp;h=270&amp;c=6\">",
            link
        ));
        html.push_str(&format!("<a><img src=\"{}?w=540&amp;h=540\"></a>", link));
    }
    html.push_str("</div>");
    html
}

/// Scripted behaviour of the upstream service.
#[derive(Clone, Default)]
pub struct Upstream {
    pub probe_rejects: bool,
    /// Every POST is answered with 200 and no redirect.
    pub no_redirect: bool,
    /// POST bodies carry the moderation marker.
    pub blocks_prompts: bool,
    pub poll_links: Vec<String>,
    pub fallback_links: Vec<String>,
    pub failing_downloads: Vec<String>,
    /// Set-Cookie values sent with the probe response.
    pub probe_cookies: Vec<String>,
}

impl Upstream {
    pub fn with_poll_links(links: Vec<String>) -> Self {
        Self {
            poll_links: links,
            ..Default::default()
        }
    }

    pub fn respond(&self, req: &HttpRequest) -> Result<HttpResponse> {
        let url = req.url.as_str();

        if url.starts_with("https://tse") {
            if self.failing_downloads.iter().any(|f| f == url) {
                return Ok(status(404, url));
            }
            let mut resp = ok(url, "");
            resp.body = format!("PNG:{}", url).into_bytes();
            return Ok(resp);
        }

        if req.method == Method::Post {
            if self.blocks_prompts {
                return Ok(ok(url, "<div>This prompt has been blocked. Learn more</div>"));
            }
            if self.no_redirect {
                return Ok(ok(url, "<html>try again later</html>"));
            }
            let location = format!(
                "/images/create?q=fox&rt=4&FORM=GENCRE&id={}&nfy=1",
                REQUEST_ID
            );
            return Ok(redirect(url, &location));
        }

        if url.contains("/images/create/async/results/") {
            if self.poll_links.is_empty() {
                return Ok(ok(url, "<div>still working</div>"));
            }
            return Ok(ok(url, &result_page(&self.poll_links)));
        }

        if url.contains("id=") {
            return Ok(ok(url, "<html>progress</html>"));
        }

        if url.contains("FORM=GENCRE") {
            return Ok(ok(url, &result_page(&self.fallback_links)));
        }

        if url.ends_with("/images/create") {
            if self.probe_rejects {
                return Ok(ok("https://login.live.com/login.srf", "<html>sign in</html>"));
            }
            let mut resp = ok(url, "<html>create</html>");
            resp.set_cookies = self.probe_cookies.clone();
            return Ok(resp);
        }

        Ok(status(404, url))
    }
}

pub fn test_config(storage: &Path) -> EngineConfig {
    EngineConfig::builder()
        .with_base_url(BASE)
        .with_storage_dir(storage.to_path_buf())
        .build()
}

pub fn stub_engine(upstream: Upstream, storage: &Path) -> (Arc<Engine>, Arc<StubTransport>) {
    stub_engine_with_store(upstream, storage, Arc::new(MemoryJobStore::new()))
}

pub fn stub_engine_with_store(
    upstream: Upstream,
    storage: &Path,
    store: Arc<dyn JobStore>,
) -> (Arc<Engine>, Arc<StubTransport>) {
    let transport = StubTransport::new(move |req| upstream.respond(req));
    let client = CreateClient::with_transport(transport.clone(), test_config(storage));
    (Arc::new(Engine::with_client(client, store)), transport)
}

/// Submit and run one job to completion on the current task.
pub async fn run(engine: &Engine, request: GenerationRequest) -> GenerationJob {
    let job_id = engine.submit(request).await.unwrap();
    engine.run_job(&job_id).await.unwrap();
    engine.job(&job_id).await.unwrap().unwrap()
}

pub fn assert_terminal_accounting(job: &GenerationJob) {
    assert!(job.status.is_terminal(), "job is {}", job.status);
    assert_eq!(job.completed_images + job.failed_images, job.total_images);
}
