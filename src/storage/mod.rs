//! Session state and its durable snapshot.
//!
//! [`StateStore`] owns the mutable session state and validates every
//! mutation. [`Persistence`] turns that state into a versioned snapshot and
//! writes it to a [`SnapshotBackend`]; [`AutoSaver`] debounces those writes.

mod autosave;
mod memory;
mod persistence;
mod snapshot;
mod sqlite;
mod store;

pub use autosave::AutoSaver;
pub use memory::MemoryBackend;
pub use persistence::Persistence;
pub use snapshot::{PersistedAssessment, PersistedAssessments, PersistedSnapshot, SNAPSHOT_VERSION};
pub use sqlite::SqliteBackend;
pub use store::{AssessmentPatch, Listener, ScoreSource, StatePatch, StateStore, Subscription};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageResult;
use crate::pipeline::PhaseKey;

/// A scoring dimension with its own assessment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentKind {
    Competitive,
    Market,
}

impl AssessmentKind {
    /// Every dimension, in display order.
    pub const ALL: [AssessmentKind; 2] = [AssessmentKind::Competitive, AssessmentKind::Market];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentKind::Competitive => "competitive",
            AssessmentKind::Market => "market",
        }
    }
}

impl std::fmt::Display for AssessmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of one assessment record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Error,
}

impl AssessmentStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentStatus::Pending => "pending",
            AssessmentStatus::InProgress => "in-progress",
            AssessmentStatus::Complete => "complete",
            AssessmentStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for AssessmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssessmentStatus::Pending),
            "in-progress" => Ok(AssessmentStatus::InProgress),
            "complete" => Ok(AssessmentStatus::Complete),
            "error" => Ok(AssessmentStatus::Error),
            _ => Err(format!("Unknown assessment status: {}", s)),
        }
    }
}

/// AI and reviewer scoring for one dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub status: AssessmentStatus,
    /// Score from the provider, 1-9.
    pub ai_score: Option<u8>,
    /// Score from the human reviewer, 1-9.
    pub user_score: Option<u8>,
    /// Provider rationale for `ai_score`.
    pub ai_justification: String,
    /// Reviewer rationale, written on submission.
    pub justification: String,
    /// Provider confidence, 0-1.
    pub confidence: Option<f64>,
    pub submitted: bool,
    /// Opaque provider payload; the first thing dropped under storage pressure.
    pub raw_data: Option<Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Both assessment records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessments {
    pub competitive: Assessment,
    pub market: Assessment,
}

impl Assessments {
    /// The record for `kind`.
    pub fn get(&self, kind: AssessmentKind) -> &Assessment {
        match kind {
            AssessmentKind::Competitive => &self.competitive,
            AssessmentKind::Market => &self.market,
        }
    }

    /// Mutable access to the record for `kind`.
    pub fn get_mut(&mut self, kind: AssessmentKind) -> &mut Assessment {
        match kind {
            AssessmentKind::Competitive => &mut self.competitive,
            AssessmentKind::Market => &mut self.market,
        }
    }
}

/// The complete session state visible to readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Company URL or technology description that started the analysis.
    pub input_descriptor: String,
    pub is_analyzing: bool,
    pub analysis_phase: Option<PhaseKey>,
    pub assessments: Assessments,
    /// Competitive artifact fed to the market provider.
    pub competitive_artifact_text: Option<String>,
    pub last_error: Option<String>,
}

/// Durable key/value slot holding the serialized snapshot.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Read the stored snapshot, if any.
    async fn read(&self) -> StorageResult<Option<String>>;

    /// Replace the stored snapshot.
    async fn write(&self, payload: &str) -> StorageResult<()>;

    /// Remove the stored snapshot.
    async fn clear(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assessment_status_round_trip() {
        for status in [
            AssessmentStatus::Pending,
            AssessmentStatus::InProgress,
            AssessmentStatus::Complete,
            AssessmentStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<AssessmentStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.as_str().to_string())
            );
        }
        assert!("done".parse::<AssessmentStatus>().is_err());
    }

    #[test]
    fn test_assessments_accessors() {
        let mut assessments = Assessments::default();
        assessments.get_mut(AssessmentKind::Market).ai_score = Some(7);
        assert_eq!(assessments.market.ai_score, Some(7));
        assert_eq!(assessments.get(AssessmentKind::Competitive).ai_score, None);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(AssessmentKind::Competitive.to_string(), "competitive");
        assert_eq!(AssessmentKind::ALL.len(), 2);
    }
}
