//! Browser-like session state threaded through every upstream call.
//!
//! A [`Session`] is a plain value: the cookie jar and header set live here
//! rather than inside an HTTP client, and each stage takes `&mut Session`.
//! Styles of one job therefore run one after another against the same
//! session, and separate jobs never share one.

use std::collections::BTreeMap;

use rand::Rng;

/// Credential used when the caller supplies none.
pub const DEFAULT_CREDENTIAL: &str = "_U=";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36 Edg/129.0.0.0";

/// Cookie jar and browser headers derived from a captured credential.
#[derive(Debug, Clone)]
pub struct Session {
    cookies: BTreeMap<String, String>,
    headers: Vec<(String, String)>,
}

impl Session {
    /// Build a session from a raw `k=v; k2=v2` cookie string.
    pub fn new(credential: &str, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let headers = vec![
            (
                "accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8"
                    .to_string(),
            ),
            ("accept-language".to_string(), "en-US,en;q=0.9".to_string()),
            ("cache-control".to_string(), "no-cache".to_string()),
            (
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ),
            ("referer".to_string(), format!("{}/images/create/", base)),
            ("origin".to_string(), base.to_string()),
            ("user-agent".to_string(), USER_AGENT.to_string()),
            ("x-forwarded-for".to_string(), random_forwarded_for()),
        ];

        Self {
            cookies: parse_cookie_string(credential),
            headers,
        }
    }

    /// Headers to send with every request, including the `cookie` header.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if !self.cookies.is_empty() {
            headers.push(("cookie".to_string(), self.cookie_header()));
        }
        headers
    }

    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Adopt cookies from raw `Set-Cookie` header values. Called for every
    /// redirect hop, not just the final response.
    pub fn absorb_set_cookies<S: AsRef<str>>(&mut self, set_cookies: &[S]) {
        for raw in set_cookies {
            let pair = raw.as_ref().split(';').next().unwrap_or_default();
            if let Some((name, value)) = split_pair(pair) {
                self.cookies.insert(name, value);
            }
        }
    }
}

/// Parse `k=v; k2="v2"` into a map. Fragments without a name are skipped.
pub fn parse_cookie_string(raw: &str) -> BTreeMap<String, String> {
    raw.split(';').filter_map(split_pair).collect()
}

fn split_pair(fragment: &str) -> Option<(String, String)> {
    let (name, value) = fragment.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');
    Some((name.to_string(), value.to_string()))
}

fn random_forwarded_for() -> String {
    let mut rng = rand::rng();
    format!(
        "13.{}.{}.{}",
        rng.random_range(104..=107),
        rng.random_range(0..=255),
        rng.random_range(0..=255)
    )
}
