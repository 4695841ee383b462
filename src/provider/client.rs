use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{ProviderEnvelope, ProviderRequest};
use super::ProviderSpec;
use crate::config::{EndpointConfig, RetryConfig};
use crate::error::{ClientError, ClientResult};

/// Client for one remote analysis provider.
///
/// The HTTP plumbing, deadline, cancellation and retry policy are shared;
/// `P` supplies only the request field mapping and the response normalizer.
pub struct ProviderClient<P: ProviderSpec> {
    client: Client,
    api_key: String,
    endpoint: EndpointConfig,
    retry: RetryConfig,
    _provider: PhantomData<fn() -> P>,
}

impl<P: ProviderSpec> Clone for ProviderClient<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            endpoint: self.endpoint.clone(),
            retry: self.retry.clone(),
            _provider: PhantomData,
        }
    }
}

impl<P: ProviderSpec> ProviderClient<P> {
    /// Create a new provider client
    pub fn new(
        api_key: impl Into<String>,
        endpoint: EndpointConfig,
        retry: RetryConfig,
    ) -> ClientResult<Self> {
        // No client-level timeout: the per-call deadline is raced explicitly
        // so that expiry maps to `ClientError::Timeout`.
        let client = Client::builder()
            .build()
            .map_err(|e| ClientError::Transport {
                status: None,
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint,
            retry,
            _provider: PhantomData,
        })
    }

    /// The endpoint URL (for testing)
    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    /// Build the request body for `input` with a fresh session id.
    pub fn build_request(&self, input: &P::Input) -> ProviderRequest {
        P::inputs(input).into_iter().fold(
            ProviderRequest::new(Uuid::new_v4().to_string()),
            |request, (name, value)| request.with_input(name, value),
        )
    }

    /// Run a single analysis call.
    ///
    /// The call races the configured deadline and `cancel`; whichever
    /// finishes first decides the outcome.
    pub async fn analyze(&self, input: &P::Input, cancel: &CancellationToken) -> ClientResult<P::Output> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let request = self.build_request(input);
        let start = Instant::now();

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(provider = P::NAME, "Provider call cancelled");
                return Err(ClientError::Cancelled);
            }
            result = tokio::time::timeout(self.endpoint.timeout(), self.execute_request(&request)) => {
                match result {
                    Ok(body) => body?,
                    Err(_) => {
                        return Err(ClientError::Timeout {
                            timeout_ms: self.endpoint.timeout_ms,
                        });
                    }
                }
            }
        };

        let output = Self::process_response(body)?;
        info!(
            provider = P::NAME,
            session_id = %request.session_id,
            latency_ms = start.elapsed().as_millis(),
            "Provider call succeeded"
        );
        Ok(output)
    }

    /// Decode and normalize a raw provider body.
    pub fn process_response(body: Value) -> ClientResult<P::Output> {
        let envelope = ProviderEnvelope::from_value(body).map_err(|e| ClientError::Transport {
            status: None,
            message: format!("Malformed response envelope: {}", e),
        })?;
        P::normalize(&envelope).map_err(|e| {
            warn!(provider = P::NAME, field = %e.field, error = %e, "Provider response rejected");
            ClientError::Validation(e)
        })
    }

    /// Call [`analyze`](Self::analyze) until it succeeds, fails for good, or
    /// the attempt budget runs out.
    pub async fn retry_with_backoff(
        &self,
        input: &P::Input,
        cancel: &CancellationToken,
    ) -> ClientResult<P::Output> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let start = Instant::now();
            let err = match self.analyze(input, cancel).await {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };

            error!(
                provider = P::NAME,
                error = %err,
                attempt,
                latency_ms = start.elapsed().as_millis(),
                "Provider call failed"
            );

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(ClientError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = backoff_delay(attempt, self.retry.base_delay_ms, jitter_ms(self.retry.base_delay_ms));
            warn!(
                provider = P::NAME,
                next_attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                "Retrying provider request"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Execute a single request (internal)
    async fn execute_request(&self, request: &ProviderRequest) -> ClientResult<Value> {
        debug!(
            provider = P::NAME,
            session_id = %request.session_id,
            inputs = request.inputs.len(),
            "Calling analysis provider"
        );

        let response = self
            .client
            .post(&self.endpoint.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout {
                        timeout_ms: self.endpoint.timeout_ms,
                    }
                } else {
                    ClientError::Transport {
                        status: None,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ClientError::Transport {
                status: Some(status.as_u16()),
                message: format!("{} returned {}: {}", P::NAME, status.as_u16(), error_body),
            });
        }

        response.json::<Value>().await.map_err(|e| ClientError::Transport {
            status: None,
            message: format!("Failed to parse response: {}", e),
        })
    }
}

/// Delay before the attempt following `attempt`: `base * 2^(attempt-1) + jitter`.
pub fn backoff_delay(attempt: u32, base_delay_ms: u64, jitter_ms: u64) -> Duration {
    let exponential = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(exponential.saturating_add(jitter_ms))
}

/// Random jitter in `[0, base/2]`, small enough that successive delays
/// stay strictly increasing.
pub fn jitter_ms(base_delay_ms: u64) -> u64 {
    rand::thread_rng().gen_range(0..=base_delay_ms / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::competitive::CompetitiveProvider;

    #[test]
    fn test_client_creation() {
        let client = ProviderClient::<CompetitiveProvider>::new(
            "test_key",
            EndpointConfig::new("http://localhost:9/run", 1000),
            RetryConfig::default(),
        );
        assert!(client.is_ok());
        assert_eq!(client.unwrap().url(), "http://localhost:9/run");
    }

    #[test]
    fn test_backoff_is_exponential() {
        assert_eq!(backoff_delay(1, 1000, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2, 1000, 0), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3, 1000, 250), Duration::from_millis(4250));
        assert_eq!(backoff_delay(200, 1000, 0), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_jittered_delays_strictly_increase() {
        for _ in 0..200 {
            let before_second = backoff_delay(1, 1000, jitter_ms(1000));
            let before_third = backoff_delay(2, 1000, jitter_ms(1000));
            assert!(before_second < before_third);
        }
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..200 {
            assert!(jitter_ms(100) <= 50);
        }
        assert_eq!(jitter_ms(0), 0);
    }

    #[test]
    fn test_requests_get_fresh_session_ids() {
        let client = ProviderClient::<CompetitiveProvider>::new(
            "k",
            EndpointConfig::new("http://localhost:9/run", 1000),
            RetryConfig::default(),
        )
        .unwrap();
        let a = client.build_request(&"tech".to_string());
        let b = client.build_request(&"tech".to_string());
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.inputs.get("in-0").map(String::as_str), Some("tech"));
    }
}
