//! Pipeline orchestration.
//!
//! A run executes the company, competitive and market phases strictly in
//! order. Each phase feeds the next: the company profile yields the
//! technology description, the competitive phase yields the analysis
//! artifact, and the market phase consumes both.

mod orchestrator;
mod session;

pub use orchestrator::{AggregatedResults, Pipeline};
pub use session::{
    AnalysisInput, AnalysisSession, Phase, PhaseOutput, PhaseStatus, Progress, RunStatus,
};

use serde::{Deserialize, Serialize};

/// Identity of a pipeline phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKey {
    Company,
    Competitive,
    Market,
}

impl PhaseKey {
    /// Every phase, in execution order.
    pub const ALL: [PhaseKey; 3] = [PhaseKey::Company, PhaseKey::Competitive, PhaseKey::Market];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKey::Company => "company",
            PhaseKey::Competitive => "competitive",
            PhaseKey::Market => "market",
        }
    }

    /// Position in the execution order.
    pub fn index(&self) -> usize {
        match self {
            PhaseKey::Company => 0,
            PhaseKey::Competitive => 1,
            PhaseKey::Market => 2,
        }
    }

    /// Typical wall-clock duration, used for progress estimates.
    pub fn expected_duration_secs(&self) -> u64 {
        match self {
            PhaseKey::Company => 480,
            PhaseKey::Competitive => 240,
            PhaseKey::Market => 480,
        }
    }
}

impl std::fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notifications emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Start {
        input_descriptor: String,
    },
    PhaseStart {
        phase: PhaseKey,
        estimated_duration_secs: u64,
    },
    PhaseComplete {
        phase: PhaseKey,
        duration_secs: f64,
        /// `None` for a skipped phase.
        data: Option<PhaseOutput>,
    },
    PhaseError {
        phase: PhaseKey,
        error: String,
    },
    Complete {
        results: Box<AggregatedResults>,
    },
    Cancelled {
        phase: Option<PhaseKey>,
    },
    Error {
        phase: Option<PhaseKey>,
        message: String,
    },
}
