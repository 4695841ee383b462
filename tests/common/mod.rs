//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::MockServer;

use venture_assessment::config::{EndpointConfig, RetryConfig};
use venture_assessment::pipeline::Pipeline;
use venture_assessment::provider::{CompanyClient, CompetitiveClient, MarketClient};
use venture_assessment::StateStore;

pub const API_KEY: &str = "test-api-key";
pub const COMPANY_PATH: &str = "/company";
pub const COMPETITIVE_PATH: &str = "/competitive";
pub const MARKET_PATH: &str = "/market";
pub const ARTIFACT_TEXT: &str = "Competitive landscape: BigCo leads, three startups trail.";

/// Retry policy with short delays so tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_ms: 10,
    }
}

pub fn endpoint(server: &MockServer, path: &str, timeout_ms: u64) -> EndpointConfig {
    EndpointConfig::new(format!("{}{}", server.uri(), path), timeout_ms)
}

/// A pipeline whose three providers all live on `server`.
pub fn create_test_pipeline(server: &MockServer, store: StateStore) -> Pipeline {
    let retry = fast_retry(1);
    Pipeline::new(
        CompanyClient::new(API_KEY, endpoint(server, COMPANY_PATH, 5_000), retry.clone()).unwrap(),
        CompetitiveClient::new(API_KEY, endpoint(server, COMPETITIVE_PATH, 5_000), retry.clone())
            .unwrap(),
        MarketClient::new(API_KEY, endpoint(server, MARKET_PATH, 5_000), retry).unwrap(),
        store,
    )
}

pub fn company_body() -> Value {
    let profile = json!({
        "company_overview": {
            "name": "Acme Robotics",
            "website": "https://acme.example",
            "mission_statement": "Automate the warehouse",
            "company_description": "Acme builds autonomous picking arms."
        },
        "technology": {
            "core_technology": "Vision-guided manipulation",
            "key_innovations": ["Grasp model", "Tactile skin"]
        },
        "products_and_applications": {
            "primary_application": "Order picking",
            "target_industries": ["Logistics"]
        },
        "market_context": {
            "problem_addressed": "Labor shortages"
        }
    });
    // The profile arrives JSON-encoded.
    json!({ "outputs": { "out-6": profile.to_string() } })
}

pub fn competitive_body(score: Value) -> Value {
    json!({
        "outputs": {
            "out-6": ARTIFACT_TEXT,
            "out-7": {
                "score": score,
                "score_justification": "Fragmented field with one strong incumbent",
                "competitor_count": {
                    "total": 4,
                    "large_companies": 1,
                    "mid_size_companies": 0,
                    "startups": 3
                },
                "market_leaders": ["BigCo"]
            }
        }
    })
}

pub fn market_body(score: Value) -> Value {
    json!({
        "outputs": {
            "out-2": json!({
                "primary_market": {
                    "description": "Warehouse automation",
                    "tam_usd": 45_000_000_000u64,
                    "cagr_percent": 14.5
                }
            }).to_string(),
            "out-3": {
                "score": score,
                "confidence": 0.8,
                "justification": "Large, fast-growing market"
            }
        }
    })
}
