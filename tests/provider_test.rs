//! Integration tests for the provider clients
//!
//! Tests request building, deadlines, error classification and retry using
//! wiremock for request/response mocking.

mod common;

use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use common::*;
use venture_assessment::config::RetryConfig;
use venture_assessment::error::ClientError;
use venture_assessment::provider::{CompanyClient, CompetitiveClient, MarketClient, MarketInput};

fn competitive_client(server: &MockServer, timeout_ms: u64, max_attempts: u32) -> CompetitiveClient {
    CompetitiveClient::new(
        API_KEY,
        endpoint(server, COMPETITIVE_PATH, timeout_ms),
        fast_retry(max_attempts),
    )
    .expect("Failed to create client")
}

#[cfg(test)]
mod request_tests {
    use super::*;

    #[tokio::test]
    async fn test_company_request_and_encoded_profile() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPANY_PATH))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({ "in-0": "https://acme.example" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(company_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = CompanyClient::new(
            API_KEY,
            endpoint(&mock_server, COMPANY_PATH, 5_000),
            fast_retry(1),
        )
        .unwrap();
        let profile = client
            .analyze(&"https://acme.example".to_string(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(profile.name, "Acme Robotics");
        assert!(profile.tech_description().contains("Core Technology: Vision-guided manipulation"));

        let requests = mock_server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["sessionId"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn test_market_request_carries_inputs_verbatim() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(MARKET_PATH))
            .and(body_partial_json(json!({ "in-1": "X", "in-2": "Y" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(market_body(json!(7))))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = MarketClient::new(
            API_KEY,
            endpoint(&mock_server, MARKET_PATH, 5_000),
            fast_retry(1),
        )
        .unwrap();
        let input = MarketInput {
            tech_description: "X".to_string(),
            competitive_analysis: "Y".to_string(),
        };

        let request = client.build_request(&input);
        assert_eq!(request.inputs.get("in-1").map(String::as_str), Some("X"));
        assert_eq!(request.inputs.get("in-2").map(String::as_str), Some("Y"));

        let result = client.analyze(&input, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.score, 7);
        assert_eq!(result.primary_market.cagr_percent, 14.5);
        assert_eq!(result.justification.summary, "Large, fast-growing market");
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_yields_timeout_not_transport() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(competitive_body(json!(5)))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let client = competitive_client(&mock_server, 100, 1);
        let err = client
            .analyze(&"tech".to_string(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            matches!(err, ClientError::Timeout { timeout_ms: 100 }),
            "expected timeout, got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_invalid_score_is_validation_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(competitive_body(json!(11))))
            .expect(1)
            .mount(&mock_server)
            .await;

        // Never retried, even with attempts to spare.
        let client = competitive_client(&mock_server, 5_000, 3);
        let err = client
            .retry_with_backoff(&"tech".to_string(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ClientError::Validation(e) => {
                assert!(e.message.contains("Invalid competitive score: 11"));
                assert_eq!(e.field, "score");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_transport_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let client = competitive_client(&mock_server, 5_000, 1);
        let err = client
            .analyze(&"tech".to_string(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport { status: None, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancel_during_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(competitive_body(json!(5)))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let client = competitive_client(&mock_server, 10_000, 3);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = client
            .retry_with_backoff(&"tech".to_string(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_delay() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(1)
            .mount(&mock_server)
            .await;

        // First backoff wait is at least five seconds.
        let client = CompetitiveClient::new(
            API_KEY,
            endpoint(&mock_server, COMPETITIVE_PATH, 5_000),
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 5_000,
            },
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = client
            .retry_with_backoff(&"tech".to_string(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Cancelled), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }
}

#[cfg(test)]
mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = competitive_client(&mock_server, 5_000, 3);
        let err = client
            .retry_with_backoff(&"tech".to_string(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ClientError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ClientError::Transport { status: Some(503), .. }));
            }
            other => panic!("expected retry exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = competitive_client(&mock_server, 5_000, 3);
        let err = client
            .retry_with_backoff(&"tech".to_string(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport { status: Some(401), .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = competitive_client(&mock_server, 5_000, 3);
        let err = client
            .retry_with_backoff(&"tech".to_string(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport { status: Some(429), .. }));
    }

    #[tokio::test]
    async fn test_server_error_then_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path(COMPETITIVE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(competitive_body(json!(4))))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = competitive_client(&mock_server, 5_000, 3);
        let result = client
            .retry_with_backoff(&"tech".to_string(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.score, 4);
        assert_eq!(result.analysis_text, ARTIFACT_TEXT);
        assert_eq!(result.competitors.len(), 1);
        assert_eq!(result.confidence, None);
    }
}
