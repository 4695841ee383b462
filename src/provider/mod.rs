//! Remote analysis providers.
//!
//! A single [`ProviderClient`] implementation handles request building,
//! deadlines, cancellation, error classification and retry. Each provider
//! contributes only a [`ProviderSpec`]: how to lay out its inputs and how to
//! normalize its `outputs` envelope through the shared validation layer.

mod client;
pub mod company;
pub mod competitive;
pub mod market;
mod types;

pub use client::{backoff_delay, jitter_ms, ProviderClient};
pub use company::{CompanyProfile, CompanyProvider};
pub use competitive::{CompetitiveProvider, CompetitiveResult, Competitor, CompetitorCount};
pub use market::{MarketInput, MarketProvider, MarketResult};
pub use types::{OutputValue, ProviderEnvelope, ProviderRequest};

use crate::error::ValidationResult;

/// Field mapping for one provider.
pub trait ProviderSpec: Send + Sync + 'static {
    /// Name used in logs and error messages.
    const NAME: &'static str;
    /// What the caller hands to `analyze`.
    type Input: Send + Sync;
    /// The normalized result.
    type Output: Send;

    /// Named request inputs for `input`.
    fn inputs(input: &Self::Input) -> Vec<(&'static str, String)>;

    /// Validate and normalize a provider envelope.
    fn normalize(envelope: &ProviderEnvelope) -> ValidationResult<Self::Output>;
}

/// Client for the company profile provider
pub type CompanyClient = ProviderClient<CompanyProvider>;
/// Client for the competitive analysis provider
pub type CompetitiveClient = ProviderClient<CompetitiveProvider>;
/// Client for the market analysis provider
pub type MarketClient = ProviderClient<MarketProvider>;
