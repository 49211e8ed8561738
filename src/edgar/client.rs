//! Rate-limited HTTP client for EDGAR.
//!
//! All requests in the process share a single token bucket held behind a
//! `OnceCell`, so the aggregate request rate stays within the SEC's
//! 10 requests/second ceiling no matter how many workers are running.

use log::{debug, warn};
use once_cell::sync::OnceCell;
use rand::Rng;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::core::config::IngestConfig;
use crate::error::{IngestError, Result};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation flag shared by the supervisor, orchestrator,
/// and fetcher.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
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

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    // Burst capacity stays at one token: a larger reserve would let an idle
    // period be followed by more than the ceiling inside a single 1-second
    // window.
    fn new(per_second: f64) -> Self {
        TokenBucket {
            tokens: 1.0,
            capacity: 1.0,
            refill_per_sec: per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token-bucket limiter. Acquisition blocks the calling task until a token
/// is available; the bucket itself is the only cross-worker synchronization
/// point in the pipeline.
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

static EDGAR_RATE_LIMITER: OnceCell<Arc<RateLimiter>> = OnceCell::new();

impl RateLimiter {
    pub fn new(per_second: f64) -> Self {
        RateLimiter {
            bucket: Mutex::new(TokenBucket::new(per_second)),
        }
    }

    /// The process-wide limiter for EDGAR requests (10 req/s).
    pub fn global() -> Arc<RateLimiter> {
        EDGAR_RATE_LIMITER
            .get_or_init(|| Arc::new(RateLimiter::new(10.0)))
            .clone()
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.refill(Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - bucket.tokens;
                // Floor keeps float rounding from turning into a busy loop.
                Duration::from_secs_f64((deficit / bucket.refill_per_sec).max(0.001))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// HTTP client for EDGAR with a contact-bearing user agent, retries with
/// jittered exponential backoff on 429/5xx, and global rate limiting.
#[derive(Clone)]
pub struct EdgarClient {
    http: reqwest::Client,
    user_agent: String,
    limiter: Arc<RateLimiter>,
    cancel: CancelFlag,
}

impl EdgarClient {
    /// Build a client from the runtime configuration. Fails with a
    /// configuration error before any network I/O if the contact email is
    /// missing.
    pub fn new(config: &IngestConfig, cancel: CancelFlag) -> Result<Self> {
        let user_agent = config.user_agent()?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(EdgarClient {
            http,
            user_agent,
            limiter: RateLimiter::global(),
            cancel,
        })
    }

    /// Swap in a private limiter. Tests use this to keep throughput
    /// measurements isolated from the global bucket.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// GET a URL, honoring the rate limit and retry policy, and return the
    /// response body.
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(IngestError::Fetch("request cancelled".to_string()));
            }
            attempt += 1;
            self.limiter.acquire().await;

            debug!("GET {} (attempt {}/{})", url, attempt, MAX_ATTEMPTS);
            let response = self
                .http
                .get(url.as_str())
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .header(reqwest::header::ACCEPT_ENCODING, "gzip, deflate")
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let bytes = resp.bytes().await?;
                        return Ok(bytes.to_vec());
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(IngestError::NotFound(format!("404 for {}", url)));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if attempt >= MAX_ATTEMPTS {
                            return Err(IngestError::RateLimited(format!(
                                "{} still rate limited after {} attempts",
                                url, attempt
                            )));
                        }
                        let retry_after = resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(Duration::ZERO);
                        let wait = backoff_delay(attempt).max(retry_after);
                        warn!("429 from {}; backing off {:?}", url, wait);
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    if status.is_server_error() {
                        if attempt >= MAX_ATTEMPTS {
                            return Err(IngestError::Fetch(format!(
                                "{} failed with {} after {} attempts",
                                url, status, attempt
                            )));
                        }
                        let wait = backoff_delay(attempt);
                        warn!("{} from {}; backing off {:?}", status, url, wait);
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    // Remaining 4xx are not retryable.
                    return Err(IngestError::Fetch(format!(
                        "{} failed with status {}",
                        url, status
                    )));
                }
                Err(e) if e.is_timeout() => {
                    // A timeout consumes one retryable attempt.
                    if attempt >= MAX_ATTEMPTS {
                        return Err(IngestError::Fetch(format!(
                            "{} timed out after {} attempts",
                            url, attempt
                        )));
                    }
                    let wait = backoff_delay(attempt);
                    warn!("timeout fetching {}; backing off {:?}", url, wait);
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Convenience wrapper decoding the body as UTF-8 (lossy: EDGAR pages
    /// occasionally carry stray Latin-1 bytes).
    pub async fn fetch_text(&self, url: &Url) -> Result<String> {
        let bytes = self.fetch(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }
}

/// Exponential backoff: base 1s, factor 2, jitter of ±25%.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_secs_f64(base * jitter)
}
