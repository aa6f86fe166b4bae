//! HTTP fetching of a single page.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use derive_more::Display;
use exn::ResultExt;
use reqwest::{Client, StatusCode, redirect};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use url::{Host, Url};

pub const USER_AGENT: &str = concat!("stillpress/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 3;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}
impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth").field("username", &self.username).field("password", &"***").finish()
    }
}

/// Why a page was skipped. Never retried within the same run.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum FetchFailure {
    #[display("HTTP {_0}")]
    Status(u16),
    #[display("empty response body")]
    Empty,
    #[display("{_0}")]
    Transport(String),
}

/// Retrieves one page body.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<String, FetchFailure>;
}

/// True for `localhost`, `127.0.0.1` and `::1`.
pub fn is_loopback(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    match parsed.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip == Ipv4Addr::LOCALHOST,
        Some(Host::Ipv6(ip)) => ip == Ipv6Addr::LOCALHOST,
        None => false,
    }
}

/// [`Fetch`] over HTTP with a fixed per-request timeout.
///
/// Two clients are kept: certificate verification is switched off only for
/// requests to loopback hosts, which commonly serve self-signed certificates
/// in development.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    verified: Client,
    loopback: Client,
    auth: Option<BasicAuth>,
}
impl HttpFetcher {
    pub fn new(timeout: Duration, auth: Option<BasicAuth>) -> Result<Self> {
        Ok(Self { verified: Self::client(timeout, false)?, loopback: Self::client(timeout, true)?, auth })
    }

    fn client(timeout: Duration, accept_invalid_certs: bool) -> Result<Client> {
        Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .or_raise(|| ErrorKind::Client)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<String, FetchFailure> {
        let client = if is_loopback(url) { &self.loopback } else { &self.verified };
        let mut request = client.get(url);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        let response = request.send().await.map_err(|e| FetchFailure::Transport(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(FetchFailure::Status(response.status().as_u16()));
        }
        let body = response.text().await.map_err(|e| FetchFailure::Transport(e.to_string()))?;
        if body.is_empty() {
            return Err(FetchFailure::Empty);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://localhost/", true)]
    #[case("https://LOCALHOST:8443/a/", true)]
    #[case("https://127.0.0.1/", true)]
    #[case("http://[::1]:8080/", true)]
    #[case("https://127.0.0.2/", false)]
    #[case("https://localhost.example.com/", false)]
    #[case("https://example.com/?next=localhost", false)]
    #[case("not a url", false)]
    fn test_is_loopback(#[case] url: &str, #[case] expected: bool) {
        assert_eq!(is_loopback(url), expected);
    }

    #[test]
    fn test_user_agent() {
        assert!(USER_AGENT.starts_with("stillpress/"));
    }

    #[test]
    fn test_basic_auth_debug_hides_password() {
        let auth = BasicAuth { username: "editor".to_string(), password: "hunter2".to_string() };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(FetchFailure::Status(503).to_string(), "HTTP 503");
        assert_eq!(FetchFailure::Empty.to_string(), "empty response body");
    }
}
