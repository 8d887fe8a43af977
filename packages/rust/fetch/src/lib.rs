//! Content retrieval for the Fetch Stage.
//!
//! A thin HTTP layer whose one job is classification: every failure is
//! either [`PageWatchError::TransientFetch`] (worth a bounded retry) or
//! [`PageWatchError::ContentUnavailable`] (resolved into a Failed run
//! immediately). The stage logic lives in `pagewatch-pipeline`; this
//! crate never touches runs or queues.

use std::net::IpAddr;
use std::time::Duration;

use pagewatch_shared::{FetchConfig, PageWatchError, Result};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("PageWatch/", env!("CARGO_PKG_VERSION"));

/// HTTP fetcher for tracked URLs.
pub struct Fetcher {
    client: Client,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl Fetcher {
    /// Create a new fetcher from the `[fetch]` config section.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let user_agent = config.user_agent.clone().unwrap_or_else(|| USER_AGENT.to_string());
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(
                config.redirect_limit as usize,
            ))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                PageWatchError::TransientFetch(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Fetch raw content for `url`.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| {
            PageWatchError::ContentUnavailable(format!("invalid url {url}: {e}"))
        })?;

        if !self.allow_localhost && is_ssrf_target(&parsed) {
            warn!(%url, "SSRF protection: blocked");
            return Err(PageWatchError::ContentUnavailable(format!(
                "{url}: blocked target"
            )));
        }

        debug!(%url, "fetching content");

        let response = self
            .client
            .get(parsed.as_str())
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(PageWatchError::TransientFetch(format!(
                "{url}: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(PageWatchError::ContentUnavailable(format!(
                "{url}: HTTP {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| PageWatchError::TransientFetch(format!("{url}: body read failed: {e}")))
    }
}

/// Timeouts and connection failures are transient; everything else about
/// the request itself is not.
fn classify_reqwest_error(url: &str, e: &reqwest::Error) -> PageWatchError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        PageWatchError::TransientFetch(format!("{url}: {e}"))
    } else {
        PageWatchError::ContentUnavailable(format!("{url}: {e}"))
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost"
            || host == "127.0.0.1"
            || host == "[::1]"
            || host.ends_with(".local")
            || host.ends_with(".internal")
        {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
