//! Remote asset fetching with bounded retry.
//!
//! ## Retry Strategy
//!
//! Image hosts behind document stores answer with quota errors under load,
//! and they do not always use `429` for it: a `403` whose JSON body carries
//! `rateLimitExceeded` / `userRateLimitExceeded` is just as transient.
//!
//! | Response | Action |
//! |----------|--------|
//! | transport error (connect, TLS, timeout) | retry |
//! | `200` | return the body |
//! | rate-limit reason in body, `429`, or `5xx` | retry |
//! | any other status | fail now with status and body |
//!
//! The delay before attempt `n` (1-based retry count) is
//! `(2^n + jitter) × retry_backoff_ms`, `jitter` uniform in `[0, 1)`. With the
//! defaults (2 retries, 1000 ms) a dead-but-flaky host costs at most ~7 s.
//!
//! `data:` URIs are decoded locally and never retried.

use crate::config::PublishConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// A raw HTTP answer: status and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// One HTTP GET. Errors are transport-level only; any status is `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

/// Fetch the bytes behind an image reference.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

// ── reqwest transport ─────────────────────────────────────────────────────

/// [`HttpClient`] backed by a shared `reqwest::Client` with a per-request
/// timeout.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport {
                detail: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                detail: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport {
                detail: e.to_string(),
            })?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

// ── Retrying fetcher ──────────────────────────────────────────────────────

/// [`Fetcher`] that validates the URL, serves `data:` URIs locally and
/// retries transient HTTP failures.
#[derive(Debug, Clone)]
pub struct RetryingFetcher<C> {
    client: C,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl RetryingFetcher<ReqwestClient> {
    /// Build the production fetcher from the publish configuration.
    pub fn from_config(config: &PublishConfig) -> Result<Self, FetchError> {
        Ok(Self::new(
            ReqwestClient::new(config.fetch_timeout_secs)?,
            config.max_retries,
            config.retry_backoff_ms,
        ))
    }
}

impl<C: HttpClient> RetryingFetcher<C> {
    pub fn new(client: C, max_retries: u32, retry_backoff_ms: u64) -> Self {
        Self {
            client,
            max_retries,
            retry_backoff_ms,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(attempt, self.retry_backoff_ms);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    url,
                    attempt,
                    self.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            let response = match self.client.get(url).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", url, attempt + 1, e);
                    last_err = e.to_string();
                    continue;
                }
            };

            if response.status == 200 {
                debug!("{}: {} bytes", url, response.body.len());
                return Ok(response.body);
            }

            let body = String::from_utf8_lossy(&response.body).into_owned();
            if !is_retryable(response.status, &response.body) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: response.status,
                    body,
                });
            }
            warn!(
                "{}: attempt {} got retryable status {}",
                url,
                attempt + 1,
                response.status
            );
            last_err = format!("{}; {}", response.status, body);
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.max_retries + 1,
            last_error: last_err,
        })
    }
}

#[async_trait]
impl<C: HttpClient> Fetcher for RetryingFetcher<C> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        match classify(url)? {
            UrlKind::Data => decode_data_uri(url),
            UrlKind::Http => self.fetch_http(url).await,
        }
    }
}

enum UrlKind {
    Http,
    Data,
}

fn classify(url: &str) -> Result<UrlKind, FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        reason: format!("{url}: {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(UrlKind::Http),
        "data" => Ok(UrlKind::Data),
        other => Err(FetchError::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

/// Decode `data:[<mime>][;base64],<payload>`.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, FetchError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::MalformedDataUri {
            detail: "missing 'data:' prefix".into(),
        })?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::MalformedDataUri {
            detail: "missing ',' separator".into(),
        })?;
    if !header.ends_with(";base64") {
        return Err(FetchError::MalformedDataUri {
            detail: format!("only base64 payloads are supported, got '{header}'"),
        });
    }
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| FetchError::MalformedDataUri {
            detail: e.to_string(),
        })
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Deserialize)]
struct ApiErrorReason {
    #[serde(default)]
    reason: String,
}

fn is_rate_limited(body: &[u8]) -> bool {
    serde_json::from_slice::<ApiErrorBody>(body)
        .map(|b| {
            b.error
                .errors
                .iter()
                .any(|e| e.reason == "rateLimitExceeded" || e.reason == "userRateLimitExceeded")
        })
        .unwrap_or(false)
}

fn is_retryable(status: u16, body: &[u8]) -> bool {
    status == 429 || status >= 500 || is_rate_limited(body)
}

fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let jitter: f64 = rand::random();
    let factor = 2f64.powi(attempt as i32) + jitter;
    Duration::from_millis((factor * base_ms as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of answers and counts calls.
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<HttpResponse, FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<HttpResponse, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn get(&self, _url: &str) -> Result<HttpResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport {
                    detail: "script exhausted".into(),
                }))
        }
    }

    fn transport() -> Result<HttpResponse, FetchError> {
        Err(FetchError::Transport {
            detail: "connection reset".into(),
        })
    }

    fn status(code: u16, body: &str) -> Result<HttpResponse, FetchError> {
        Ok(HttpResponse {
            status: code,
            body: body.as_bytes().to_vec(),
        })
    }

    const URL: &str = "https://images.example/a.png";

    #[tokio::test]
    async fn two_transport_failures_then_success() {
        let client = ScriptedClient::new(vec![transport(), transport(), status(200, "PNGDATA")]);
        let fetcher = RetryingFetcher::new(client, 2, 0);
        let bytes = fetcher.fetch(URL).await.unwrap();
        assert_eq!(bytes, b"PNGDATA");
        assert_eq!(fetcher.client().calls(), 3);
    }

    #[tokio::test]
    async fn permanent_404_is_not_retried() {
        let client = ScriptedClient::new(vec![status(404, "missing"), status(200, "never")]);
        let fetcher = RetryingFetcher::new(client, 2, 0);
        let err = fetcher.fetch(URL).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Status {
                url: URL.into(),
                status: 404,
                body: "missing".into(),
            }
        );
        assert_eq!(fetcher.client().calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_reason_in_403_is_retried() {
        let limited = r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#;
        let client = ScriptedClient::new(vec![status(403, limited), status(200, "ok")]);
        let fetcher = RetryingFetcher::new(client, 2, 0);
        assert_eq!(fetcher.fetch(URL).await.unwrap(), b"ok");
        assert_eq!(fetcher.client().calls(), 2);
    }

    #[tokio::test]
    async fn plain_403_fails_immediately() {
        let client = ScriptedClient::new(vec![status(403, "forbidden")]);
        let fetcher = RetryingFetcher::new(client, 2, 0);
        assert!(matches!(
            fetcher.fetch(URL).await,
            Err(FetchError::Status { status: 403, .. })
        ));
        assert_eq!(fetcher.client().calls(), 1);
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries() {
        let client = ScriptedClient::new(vec![
            status(503, "busy"),
            status(502, "bad gateway"),
            status(500, "oops"),
        ]);
        let fetcher = RetryingFetcher::new(client, 2, 0);
        match fetcher.fetch(URL).await.unwrap_err() {
            FetchError::RetriesExhausted {
                url,
                attempts,
                last_error,
            } => {
                assert_eq!(url, URL);
                assert_eq!(attempts, 3);
                assert!(last_error.contains("500"), "got: {last_error}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fetcher.client().calls(), 3);
    }

    #[tokio::test]
    async fn too_many_requests_is_retried() {
        let client = ScriptedClient::new(vec![status(429, ""), status(200, "ok")]);
        let fetcher = RetryingFetcher::new(client, 1, 0);
        assert_eq!(fetcher.fetch(URL).await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn invalid_and_unsupported_urls_make_no_request() {
        let client = ScriptedClient::new(vec![]);
        let fetcher = RetryingFetcher::new(client, 2, 0);
        assert!(matches!(
            fetcher.fetch("not a url").await,
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            fetcher.fetch("ftp://host/a.png").await,
            Err(FetchError::UnsupportedScheme { .. })
        ));
        assert_eq!(fetcher.client().calls(), 0);
    }

    #[tokio::test]
    async fn data_uri_is_decoded_locally() {
        let client = ScriptedClient::new(vec![]);
        let fetcher = RetryingFetcher::new(client, 2, 0);
        let bytes = fetcher.fetch("data:image/png;base64,AQID").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(fetcher.client().calls(), 0);
    }

    #[test]
    fn data_uri_requires_base64() {
        assert!(matches!(
            decode_data_uri("data:text/plain,hello"),
            Err(FetchError::MalformedDataUri { .. })
        ));
        assert!(decode_data_uri("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter() {
        for attempt in 1..=3u32 {
            let d = backoff_delay(attempt, 1000).as_millis() as u64;
            let floor = 1000 * 2u64.pow(attempt);
            assert!(d >= floor && d < floor + 1000, "attempt {attempt}: {d}ms");
        }
        assert_eq!(backoff_delay(2, 0), Duration::ZERO);
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limited(br#"{"error":{"errors":[{"reason":"rateLimitExceeded"}]}}"#));
        assert!(!is_rate_limited(br#"{"error":{"errors":[{"reason":"notFound"}]}}"#));
        assert!(!is_rate_limited(b"<html>"));
    }
}
