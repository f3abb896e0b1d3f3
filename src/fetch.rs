//! Page fetching with bounded retries and exponential backoff

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::FailureCategory;

pub const USER_AGENT: &str = concat!("page_extract/", env!("CARGO_PKG_VERSION"));

/// Why a fetch did not produce content
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server error: HTTP {0}")]
    ServerStatus(u16),

    #[error("client error: HTTP {0}")]
    ClientStatus(u16),

    #[error("unexpected status: HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("response body could not be decoded: {0}")]
    Decode(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Error for a non-2xx status
    pub fn from_status(status: u16) -> Self {
        match status {
            500..=599 => FetchError::ServerStatus(status),
            400..=499 => FetchError::ClientStatus(status),
            _ => FetchError::UnexpectedStatus(status),
        }
    }

    /// Timeouts, connection failures and 5xx are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Connection(_) | FetchError::ServerStatus(_)
        )
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            FetchError::Timeout(_) => FailureCategory::NetworkTimeout,
            FetchError::Connection(_)
            | FetchError::ServerStatus(_)
            | FetchError::ClientStatus(_)
            | FetchError::UnexpectedStatus(_) => FailureCategory::NetworkError,
            FetchError::InvalidUrl { .. } => FailureCategory::ValidationError,
            FetchError::Decode(_) => FailureCategory::ParseError,
            FetchError::Cancelled | FetchError::Other(_) => FailureCategory::Unknown,
        }
    }
}

/// Per-call fetch settings
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Limit for a single attempt
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_factor: f64,
    /// Limit for the whole call, attempts and backoff included
    pub deadline: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_factor: 2.0,
            deadline: None,
        }
    }
}

impl FetchOptions {
    pub fn new(timeout: Duration, max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            timeout,
            max_retries,
            backoff_factor,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of a fetch, successful or not
///
/// Status code and content are those of the last attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Normalized URL, or the input when it could not be normalized
    pub url: String,
    pub content: Option<String>,
    pub status_code: Option<u16>,
    pub duration: Duration,
    pub attempts: u32,
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    /// Outcome for content that was obtained some other way
    pub fn from_content(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: Some(content.into()),
            status_code: None,
            duration: Duration::ZERO,
            attempts: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Blocks between retries
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Cooperative cancellation flag, cheap to clone and share between threads
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Delay after failed attempt `attempt` (0-based): `unit * factor^attempt`
pub fn backoff_delay(unit: Duration, factor: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = unit.as_secs_f64() * factor.powi(exponent);
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Prepend `https://` when the scheme is missing, require http(s) and a
/// host, and drop trailing slashes.
pub fn normalize_url(raw: &str) -> Result<String, FetchError> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("empty URL"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().unwrap_or_default().is_empty() {
        return Err(invalid("missing host"));
    }

    let mut normalized = url.to_string();
    if url.query().is_none() && url.fragment().is_none() {
        let kept = normalized.trim_end_matches('/').len();
        normalized.truncate(kept);
    }
    Ok(normalized)
}

/// Blocking fetcher (ureq)
///
/// One agent is kept per fetcher so connections are reused across calls.
pub struct Fetcher {
    agent: ureq::Agent,
    backoff_unit: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("backoff_unit", &self.backoff_unit)
            .finish_non_exhaustive()
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        Self::with_user_agent(USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .user_agent(user_agent)
                .http_status_as_error(false)
                .build(),
        );
        Self::with_agent(agent)
    }

    /// Use a preconfigured agent. It must not turn statuses into errors
    /// (`http_status_as_error(false)`), or 4xx/5xx are reported as `Other`.
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self {
            agent,
            backoff_unit: Duration::from_secs(1),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        max_retries: u32,
        backoff_factor: f64,
    ) -> FetchOutcome {
        self.fetch_with(
            url,
            &FetchOptions::new(timeout, max_retries, backoff_factor),
            &CancelToken::new(),
        )
    }

    /// Fetch `url`, making at most `max_retries + 1` attempts
    pub fn fetch_with(
        &self,
        url: &str,
        options: &FetchOptions,
        cancel: &CancelToken,
    ) -> FetchOutcome {
        let started = Instant::now();
        let mut outcome = FetchOutcome {
            url: url.to_string(),
            content: None,
            status_code: None,
            duration: Duration::ZERO,
            attempts: 0,
            error: None,
        };

        let url = match normalize_url(url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url, error = %e, "rejecting URL");
                outcome.error = Some(e);
                return outcome;
            }
        };
        outcome.url = url.clone();

        let deadline = options.deadline.map(|d| started + d);
        let remaining = || deadline.map(|d| d.saturating_duration_since(Instant::now()));

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                outcome.error = Some(FetchError::Cancelled);
                break;
            }

            let mut timeout = options.timeout;
            if let Some(left) = remaining() {
                if left.is_zero() {
                    outcome.error = Some(FetchError::Timeout(options.deadline.unwrap_or(timeout)));
                    break;
                }
                timeout = timeout.min(left);
            }

            outcome.attempts = attempt + 1;
            debug!(url = %url, attempt = outcome.attempts, ?timeout, "fetching");

            let response = self.attempt(&url, timeout);
            outcome.status_code = response.status;
            outcome.content = response.content;

            let Some(error) = response.error else {
                outcome.error = None;
                break;
            };

            let retryable = error.is_retryable() && attempt < options.max_retries;
            if !retryable {
                outcome.error = Some(error);
                break;
            }

            let delay = backoff_delay(self.backoff_unit, options.backoff_factor, attempt);
            if remaining().is_some_and(|left| delay >= left) {
                debug!(url = %url, ?delay, "backoff would overrun the deadline");
                outcome.error = Some(FetchError::Timeout(
                    options.deadline.unwrap_or(options.timeout),
                ));
                break;
            }
            if cancel.is_cancelled() {
                outcome.error = Some(FetchError::Cancelled);
                break;
            }

            warn!(
                url = %url,
                attempt = outcome.attempts,
                error = %error,
                ?delay,
                "attempt failed, retrying"
            );
            self.sleeper.sleep(delay);
            attempt += 1;
        }

        outcome.duration = started.elapsed();
        match &outcome.error {
            None => info!(
                url = %url,
                status = ?outcome.status_code,
                attempts = outcome.attempts,
                "fetched"
            ),
            Some(e) => warn!(
                url = %url,
                attempts = outcome.attempts,
                error = %e,
                "fetch failed"
            ),
        }
        outcome
    }

    /// One request. Error statuses still carry their body.
    fn attempt(&self, url: &str, timeout: Duration) -> Attempt {
        let response = match self
            .agent
            .get(url)
            .config()
            .timeout_global(Some(timeout))
            .build()
            .call()
        {
            Ok(response) => response,
            Err(e) => return Attempt::failed(None, classify(e, timeout)),
        };

        let status = response.status().as_u16();
        let success = response.status().is_success();

        // Decoded with the charset from Content-Type, invalid sequences replaced
        let body = response
            .into_body()
            .with_config()
            .lossy_utf8(true)
            .read_to_string();

        match (success, body) {
            (true, Ok(content)) => Attempt {
                status: Some(status),
                content: Some(content),
                error: None,
            },
            (true, Err(e)) => Attempt::failed(Some(status), classify(e, timeout)),
            (false, body) => Attempt {
                status: Some(status),
                content: body.ok(),
                error: Some(FetchError::from_status(status)),
            },
        }
    }
}

/// What a single request produced
struct Attempt {
    status: Option<u16>,
    content: Option<String>,
    error: Option<FetchError>,
}

impl Attempt {
    fn failed(status: Option<u16>, error: FetchError) -> Self {
        Self {
            status,
            content: None,
            error: Some(error),
        }
    }
}

fn classify(error: ureq::Error, timeout: Duration) -> FetchError {
    match error {
        ureq::Error::Timeout(_) => FetchError::Timeout(timeout),
        ureq::Error::StatusCode(status) => FetchError::from_status(status),
        ureq::Error::Io(e) => match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FetchError::Timeout(timeout),
            _ => FetchError::Connection(e.to_string()),
        },
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
            FetchError::Connection(error.to_string())
        }
        ureq::Error::BodyExceedsLimit(_) => {
            FetchError::Decode(error.to_string())
        }
        ureq::Error::BadUri(reason) => FetchError::InvalidUrl {
            url: String::new(),
            reason,
        },
        other => FetchError::Other(other.to_string()),
    }
}
