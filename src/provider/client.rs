use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ProviderConfig, MAX_RETRY_BACKOFF_MS};
use crate::error::{ProviderError, Result};
use crate::provider::circuit_breaker::CircuitBreaker;
use crate::provider::latency::LatencyStats;
use crate::provider::payload::Envelope;
use crate::provider::rate_limiter::RateLimiter;

/// Authenticated GET access to the provider.
///
/// One instance is shared by every job so that the breaker and the limiter
/// present a single view of provider health and call budget.
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    secret: String,
    max_retries: u32,
    retry_backoff: Duration,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    latency: Arc<LatencyStats>,
}

impl ProviderClient {
    pub fn new(
        cfg: &ProviderConfig,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .connect_timeout(cfg.timeout.min(Duration::from_secs(5)))
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            user: cfg.user.clone(),
            secret: cfg.secret.clone(),
            max_retries: cfg.max_retries,
            retry_backoff: cfg.retry_backoff,
            breaker,
            limiter,
            latency: Arc::new(LatencyStats::new()),
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn latency(&self) -> &Arc<LatencyStats> {
        &self.latency
    }

    /// GET `endpoint` with `params` and return the envelope's `results`.
    ///
    /// Transient failures are retried up to `max_retries` times with doubling
    /// backoff (or the provider's `Retry-After`). Every attempt waits for the
    /// endpoint's rate-limit slot and runs under the circuit breaker, so an
    /// open breaker ends the retry loop immediately.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<Value, ProviderError> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire(endpoint).await;
            let result = self
                .breaker
                .execute(|| self.send_once(endpoint, params))
                .await;

            match result {
                Ok(results) => return Ok(results),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_delay(&e, attempt);
                    attempt += 1;
                    warn!(
                        endpoint,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "provider call failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The provider's `Retry-After` when it sent one, else our own backoff.
    /// Either way never longer than the backoff cap.
    fn retry_delay(&self, e: &ProviderError, attempt: u32) -> Duration {
        e.retry_after()
            .map(|d| d.min(Duration::from_millis(MAX_RETRY_BACKOFF_MS)))
            .unwrap_or_else(|| self.backoff(attempt))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.retry_backoff
            .saturating_mul(factor)
            .min(Duration::from_millis(MAX_RETRY_BACKOFF_MS))
    }

    async fn send_once(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let started = Instant::now();

        let response = self
            .http
            .get(&url)
            .query(&[("user", self.user.as_str()), ("secret", self.secret.as_str())])
            .query(params)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.latency.record(started.elapsed());
                return Err(ProviderError::from_transport(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.latency.record(started.elapsed());
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(classify_status(status.as_u16(), retry_after));
        }

        let body = response.bytes().await;
        self.latency.record(started.elapsed());
        let body = body.map_err(ProviderError::from_transport)?;

        let envelope: Envelope = serde_json::from_slice(&body)
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        debug!(endpoint, status = status.as_u16(), bytes = body.len(), "provider response");
        envelope.into_results()
    }
}

fn classify_status(status: u16, retry_after: Option<Duration>) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth(format!("HTTP {status}")),
        429 => ProviderError::RateLimited { retry_after },
        500..=599 => ProviderError::Server { status },
        _ => ProviderError::Client { status },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::circuit_breaker::BreakerState;
    use crate::testing::{envelope, provider_config, MockProvider, MockReply};
    use serde_json::json;

    fn client(cfg: &ProviderConfig) -> ProviderClient {
        ProviderClient::new(
            cfg,
            Arc::new(CircuitBreaker::new(&cfg.breaker)),
            Arc::new(RateLimiter::new(cfg.rate_limit.clone())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_results_and_sends_credentials() {
        let mock = MockProvider::start().await;
        mock.reply("/match/diary", None, MockReply::Json(envelope(json!([{"id": "m1"}]))));
        let c = client(&provider_config(&mock.base_url));

        let results = c.get("/match/diary", &[("date", "20261019")]).await.unwrap();
        assert_eq!(results, json!([{"id": "m1"}]));

        let query = mock.last_query("/match/diary").unwrap();
        assert_eq!(query.get("user").map(String::as_str), Some("test-user"));
        assert_eq!(query.get("secret").map(String::as_str), Some("test-secret"));
        assert_eq!(query.get("date").map(String::as_str), Some("20261019"));
        assert!(c.latency().summary().is_some());
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let mock = MockProvider::start().await;
        mock.enqueue("/match/diary", None, MockReply::Status(503));
        mock.enqueue("/match/diary", None, MockReply::Status(502));
        mock.reply("/match/diary", None, MockReply::Json(envelope(json!([]))));
        let mut cfg = provider_config(&mock.base_url);
        cfg.max_retries = 2;
        let c = client(&cfg);

        assert_eq!(c.get("/match/diary", &[]).await.unwrap(), json!([]));
        assert_eq!(mock.hits("/match/diary"), 3);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let mock = MockProvider::start().await;
        mock.reply("/match/diary", None, MockReply::Status(500));
        let mut cfg = provider_config(&mock.base_url);
        cfg.max_retries = 2;
        let c = client(&cfg);

        let err = c.get("/match/diary", &[]).await.unwrap_err();
        assert_eq!(err, ProviderError::Server { status: 500 });
        assert_eq!(mock.hits("/match/diary"), 3);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let mock = MockProvider::start().await;
        mock.reply("/match/diary", None, MockReply::Status(401));
        let mut cfg = provider_config(&mock.base_url);
        cfg.max_retries = 3;
        let c = client(&cfg);

        assert!(matches!(c.get("/match/diary", &[]).await, Err(ProviderError::Auth(_))));
        assert_eq!(mock.hits("/match/diary"), 1);
    }

    #[tokio::test]
    async fn envelope_error_code_is_not_retried() {
        let mock = MockProvider::start().await;
        mock.reply(
            "/match/diary",
            None,
            MockReply::Json(json!({"code": 9, "err": "invalid date"})),
        );
        let mut cfg = provider_config(&mock.base_url);
        cfg.max_retries = 3;
        let c = client(&cfg);

        let err = c.get("/match/diary", &[]).await.unwrap_err();
        assert_eq!(err, ProviderError::Api { code: 9, message: "invalid date".into() });
        assert_eq!(mock.hits("/match/diary"), 1);
    }

    #[tokio::test]
    async fn rate_limited_honors_retry_after() {
        let mock = MockProvider::start().await;
        mock.enqueue("/match/diary", None, MockReply::RateLimited { retry_after_secs: 0 });
        mock.reply("/match/diary", None, MockReply::Json(envelope(json!({"match": []}))));
        let mut cfg = provider_config(&mock.base_url);
        cfg.max_retries = 1;
        let c = client(&cfg);

        assert!(c.get("/match/diary", &[]).await.is_ok());
        assert_eq!(mock.hits("/match/diary"), 2);
        assert_eq!(c.breaker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn slow_response_is_a_timeout() {
        let mock = MockProvider::start().await;
        mock.reply(
            "/match/diary",
            None,
            MockReply::Delayed(Duration::from_millis(500), envelope(json!([]))),
        );
        let mut cfg = provider_config(&mock.base_url);
        cfg.timeout = Duration::from_millis(100);
        let c = client(&cfg);

        assert_eq!(c.get("/match/diary", &[]).await, Err(ProviderError::Timeout));
    }

    #[tokio::test]
    async fn garbage_body_is_decode_error() {
        let mock = MockProvider::start().await;
        mock.reply("/match/diary", None, MockReply::Text("<html>maintenance</html>".into()));
        let c = client(&provider_config(&mock.base_url));

        assert!(matches!(c.get("/match/diary", &[]).await, Err(ProviderError::Decode(_))));
    }

    #[tokio::test]
    async fn open_breaker_skips_network() {
        let mock = MockProvider::start().await;
        mock.reply("/match/diary", None, MockReply::Status(500));
        let mut cfg = provider_config(&mock.base_url);
        cfg.breaker.failure_threshold = 2;
        let c = client(&cfg);

        for _ in 0..2 {
            assert_eq!(c.get("/match/diary", &[]).await, Err(ProviderError::Server { status: 500 }));
        }
        assert_eq!(c.breaker().state(), BreakerState::Open);

        let err = c.get("/match/diary", &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::CircuitOpen { .. }));
        assert_eq!(mock.hits("/match/diary"), 2, "no request while open");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = provider_config("http://127.0.0.1:9");
        let mut c = client(&cfg);
        c.retry_backoff = Duration::from_millis(500);
        assert_eq!(c.backoff(0), Duration::from_millis(500));
        assert_eq!(c.backoff(1), Duration::from_millis(1000));
        assert_eq!(c.backoff(2), Duration::from_millis(2000));
        assert_eq!(c.backoff(40), Duration::from_millis(MAX_RETRY_BACKOFF_MS));
    }

    #[test]
    fn provider_retry_after_is_capped() {
        let c = client(&provider_config("http://127.0.0.1:9"));
        let day = ProviderError::RateLimited { retry_after: Some(Duration::from_secs(86_400)) };
        assert_eq!(c.retry_delay(&day, 0), Duration::from_millis(MAX_RETRY_BACKOFF_MS));

        let short = ProviderError::RateLimited { retry_after: Some(Duration::from_secs(2)) };
        assert_eq!(c.retry_delay(&short, 0), Duration::from_secs(2));

        let server = ProviderError::Server { status: 502 };
        assert_eq!(c.retry_delay(&server, 0), c.backoff(0));
    }

    #[tokio::test]
    async fn transport_errors_never_carry_credentials() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        let c = client(&provider_config(&format!("http://{addr}")));

        let err = c
            .get("/match/detail_live", &[("match_id", "m1")])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)), "{err:?}");
        let rendered = crate::error::AppError::from(err.clone()).to_string();
        assert!(!err.to_string().contains("test-secret"), "{err}");
        assert!(!rendered.contains("test-secret"), "{rendered}");
        assert!(!rendered.contains("test-user"), "{rendered}");
    }
}
