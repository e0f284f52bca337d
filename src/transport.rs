use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use reqwest::{redirect, Client};

use crate::error::{GenerationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Url-encoded form body, POST only.
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn post_form(url: impl Into<String>, body: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
            timeout,
        }
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

}

/// The parts of a response the stages look at.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// URL that produced this response.
    pub url: String,
    pub location: Option<String>,
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// HTTP seam used by every upstream stage.
///
/// Implementations send exactly one request and never follow redirects;
/// [`CreateClient`](crate::CreateClient) walks redirect chains itself so
/// the session sees the `Set-Cookie` headers of every hop.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| GenerationError::Network {
                context: "Failed to build HTTP client".into(),
                source: e,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        let mut builder = builder
            .headers(to_header_map(&request.headers)?)
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(|e| GenerationError::Network {
            context: format!("Request to {} failed", request.url),
            source: e,
        })?;

        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let set_cookies = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(String::from)
            .collect();

        let body = resp.bytes().await.map_err(|e| GenerationError::Network {
            context: format!("Failed to read response body from {}", url),
            source: e,
        })?;

        Ok(HttpResponse {
            status,
            url,
            location,
            set_cookies,
            body: body.to_vec(),
        })
    }
}

fn to_header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (raw_name, raw_value) in headers {
        let name = HeaderName::from_bytes(raw_name.as_bytes()).map_err(|e| {
            GenerationError::Transport(format!("Bad header name {}: {}", raw_name, e))
        })?;
        let value = HeaderValue::from_str(raw_value).map_err(|e| {
            GenerationError::Transport(format!("Bad header value for {}: {}", raw_name, e))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let req = HttpRequest::post_form("https://x/create", "q=fox", Duration::from_secs(5));
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body.as_deref(), Some("q=fox"));

        let req = HttpRequest::get("https://x/create", Duration::from_secs(5));
        assert_eq!(req.method, Method::Get);
        assert!(req.body.is_none());
    }

    #[test]
    fn test_redirect_detection() {
        let resp = HttpResponse {
            status: 302,
            ..Default::default()
        };
        assert!(resp.is_redirect());
        assert!(!HttpResponse { status: 200, ..Default::default() }.is_redirect());
    }

    #[test]
    fn test_header_map_rejects_bad_names() {
        assert!(to_header_map(&[("bad name".into(), "v".into())]).is_err());
        let map = to_header_map(&[("cookie".into(), "_U=1".into())]).unwrap();
        assert_eq!(map.get("cookie").unwrap(), "_U=1");
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new().is_ok());
    }
}
