//! Versioned, size-bounded snapshot format.
//!
//! Decoding is lenient per field: a value that fails its rule is replaced by
//! its default and the rest of the snapshot survives. Only unparseable JSON
//! or a foreign version is treated as corruption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::{AppState, Assessment, AssessmentKind, AssessmentStatus, Assessments};
use crate::error::{StorageError, StorageResult};
use crate::validation::{coerce_confidence, parse_score};

/// Format version written with every snapshot.
pub const SNAPSHOT_VERSION: &str = "1";

/// One assessment as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAssessment {
    pub status: AssessmentStatus,
    pub ai_score: Option<u8>,
    pub user_score: Option<u8>,
    pub ai_justification: String,
    pub justification: String,
    pub confidence: Option<f64>,
    pub submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Both persisted assessments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedAssessments {
    pub competitive: PersistedAssessment,
    pub market: PersistedAssessment,
}

/// The durable form of a session.
///
/// Transient fields (`is_analyzing`, `analysis_phase`, `last_error`) are
/// never written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub version: String,
    pub input_descriptor: String,
    pub assessments: PersistedAssessments,
    pub competitive_artifact_text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Assessment> for PersistedAssessment {
    fn from(a: &Assessment) -> Self {
        Self {
            status: a.status,
            ai_score: a.ai_score,
            user_score: a.user_score,
            ai_justification: a.ai_justification.clone(),
            justification: a.justification.clone(),
            confidence: a.confidence,
            submitted: a.submitted,
            raw_data: a.raw_data.clone(),
            timestamp: a.timestamp,
        }
    }
}

impl From<PersistedAssessment> for Assessment {
    fn from(p: PersistedAssessment) -> Self {
        Self {
            status: p.status,
            ai_score: p.ai_score,
            user_score: p.user_score,
            ai_justification: p.ai_justification,
            justification: p.justification,
            confidence: p.confidence,
            submitted: p.submitted,
            raw_data: p.raw_data,
            timestamp: p.timestamp,
        }
    }
}

impl PersistedSnapshot {
    /// Capture the durable part of `state`.
    pub fn from_state(state: &AppState) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            input_descriptor: state.input_descriptor.clone(),
            assessments: PersistedAssessments {
                competitive: (&state.assessments.competitive).into(),
                market: (&state.assessments.market).into(),
            },
            competitive_artifact_text: state.competitive_artifact_text.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Rebuild session state. Transient fields start from their defaults.
    pub fn into_state(self) -> AppState {
        AppState {
            input_descriptor: self.input_descriptor,
            assessments: Assessments {
                competitive: self.assessments.competitive.into(),
                market: self.assessments.market.into(),
            },
            competitive_artifact_text: self.competitive_artifact_text,
            ..AppState::default()
        }
    }

    /// Serialize within `max_bytes`.
    ///
    /// Raw provider payloads are dropped first, then the competitive
    /// artifact text. Scores and justifications are never dropped.
    pub fn encode(&self, max_bytes: usize) -> StorageResult<String> {
        let payload = serde_json::to_string(self)?;
        if payload.len() <= max_bytes {
            return Ok(payload);
        }

        let mut trimmed = self.clone();
        trimmed.assessments.competitive.raw_data = None;
        trimmed.assessments.market.raw_data = None;
        let payload = serde_json::to_string(&trimmed)?;
        if payload.len() <= max_bytes {
            warn!(limit = max_bytes, "Snapshot over limit, dropped raw provider data");
            return Ok(payload);
        }

        trimmed.competitive_artifact_text = None;
        let payload = serde_json::to_string(&trimmed)?;
        if payload.len() <= max_bytes {
            warn!(limit = max_bytes, "Snapshot over limit, dropped competitive artifact");
            return Ok(payload);
        }

        Err(StorageError::SnapshotTooLarge {
            size: payload.len(),
            limit: max_bytes,
        })
    }

    /// Parse a stored snapshot, nulling individual fields that fail validation.
    pub fn decode(payload: &str) -> StorageResult<Self> {
        let value: Value = serde_json::from_str(payload).map_err(|e| StorageError::CorruptSnapshot {
            message: e.to_string(),
        })?;
        let root = value.as_object().ok_or_else(|| StorageError::CorruptSnapshot {
            message: "snapshot is not an object".to_string(),
        })?;

        match root.get("version").and_then(Value::as_str) {
            Some(SNAPSHOT_VERSION) => {}
            other => {
                return Err(StorageError::CorruptSnapshot {
                    message: format!("unsupported snapshot version: {:?}", other),
                })
            }
        }

        let assessments = root.get("assessments").and_then(Value::as_object);
        let assessment = |kind: AssessmentKind| {
            assessments
                .and_then(|a| a.get(kind.as_str()))
                .and_then(Value::as_object)
                .map(|a| decode_assessment(kind, a))
                .unwrap_or_default()
        };

        Ok(Self {
            version: SNAPSHOT_VERSION.to_string(),
            input_descriptor: root
                .get("inputDescriptor")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            assessments: PersistedAssessments {
                competitive: assessment(AssessmentKind::Competitive),
                market: assessment(AssessmentKind::Market),
            },
            competitive_artifact_text: root
                .get("competitiveArtifactText")
                .and_then(Value::as_str)
                .map(str::to_string),
            timestamp: root
                .get("timestamp")
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
        })
    }
}

fn decode_assessment(kind: AssessmentKind, map: &Map<String, Value>) -> PersistedAssessment {
    let score = |field: &str| match map.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => {
            let parsed = parse_score(v);
            if parsed.is_none() {
                warn!(assessment = %kind, field, value = %v, "Discarding invalid persisted score");
            }
            parsed
        }
    };

    let status = match map.get("status").and_then(Value::as_str) {
        Some(s) => s.parse().unwrap_or_else(|e: String| {
            warn!(assessment = %kind, error = %e, "Resetting invalid persisted status");
            AssessmentStatus::Pending
        }),
        None => AssessmentStatus::Pending,
    };

    let text = |field: &str| {
        map.get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    PersistedAssessment {
        status,
        ai_score: score("aiScore"),
        user_score: score("userScore"),
        ai_justification: text("aiJustification"),
        justification: text("justification"),
        confidence: map
            .get("confidence")
            .and_then(Value::as_f64)
            .and_then(coerce_confidence),
        submitted: map.get("submitted").and_then(Value::as_bool).unwrap_or(false),
        raw_data: map.get("rawData").filter(|v| !v.is_null()).cloned(),
        timestamp: map.get("timestamp").and_then(parse_timestamp),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_state() -> AppState {
        let mut state = AppState {
            input_descriptor: "https://acme.example".to_string(),
            competitive_artifact_text: Some("Competitors: Foo, Bar".to_string()),
            ..AppState::default()
        };
        state.assessments.competitive = Assessment {
            status: AssessmentStatus::Complete,
            ai_score: Some(6),
            ai_justification: "Two funded rivals".to_string(),
            justification: "Crowded but fragmented".to_string(),
            confidence: Some(0.7),
            raw_data: Some(json!({"blob": "x".repeat(500)})),
            timestamp: Some(Utc::now()),
            ..Assessment::default()
        };
        state.assessments.market.ai_score = Some(8);
        state
    }

    #[test]
    fn test_transient_fields_not_persisted() {
        let mut state = sample_state();
        state.is_analyzing = true;
        state.last_error = Some("boom".to_string());

        let encoded = PersistedSnapshot::from_state(&state).encode(1 << 20).unwrap();
        let restored = PersistedSnapshot::decode(&encoded).unwrap().into_state();

        assert!(!restored.is_analyzing);
        assert_eq!(restored.last_error, None);
        assert_eq!(restored.assessments, state.assessments);
        assert_eq!(restored.competitive_artifact_text, state.competitive_artifact_text);
    }

    #[test]
    fn test_missing_artifact_written_as_null() {
        let mut state = sample_state();
        state.competitive_artifact_text = None;

        let encoded = PersistedSnapshot::from_state(&state).encode(1 << 20).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value.get("competitiveArtifactText"), Some(&Value::Null));
        assert_eq!(value["assessments"]["competitive"]["aiJustification"], "Two funded rivals");
    }

    #[test]
    fn test_invalid_score_is_nulled_individually() {
        let payload = json!({
            "version": "1",
            "inputDescriptor": "https://acme.example",
            "assessments": {
                "competitive": {
                    "status": "complete",
                    "aiScore": 15,
                    "justification": "Still here",
                    "confidence": 3.5,
                    "submitted": false
                },
                "market": { "status": "complete", "aiScore": 4, "justification": "Intact" }
            },
            "timestamp": "2024-05-01T12:00:00Z"
        });

        let snapshot = PersistedSnapshot::decode(&payload.to_string()).unwrap();
        let competitive = &snapshot.assessments.competitive;
        assert_eq!(competitive.ai_score, None);
        assert_eq!(competitive.confidence, None);
        assert_eq!(competitive.justification, "Still here");
        assert_eq!(competitive.status, AssessmentStatus::Complete);
        assert_eq!(snapshot.assessments.market.ai_score, Some(4));
        assert_eq!(snapshot.assessments.market.justification, "Intact");
    }

    #[test]
    fn test_unknown_status_becomes_pending() {
        let payload = json!({
            "version": "1",
            "assessments": { "market": { "status": "finished" } }
        });
        let snapshot = PersistedSnapshot::decode(&payload.to_string()).unwrap();
        assert_eq!(snapshot.assessments.market.status, AssessmentStatus::Pending);
    }

    #[test]
    fn test_corrupt_payloads() {
        assert!(matches!(
            PersistedSnapshot::decode("{not json"),
            Err(StorageError::CorruptSnapshot { .. })
        ));
        assert!(matches!(
            PersistedSnapshot::decode("[1,2]"),
            Err(StorageError::CorruptSnapshot { .. })
        ));
        assert!(matches!(
            PersistedSnapshot::decode(r#"{"version":"0"}"#),
            Err(StorageError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_encode_drops_raw_data_then_artifact() {
        let snapshot = PersistedSnapshot::from_state(&sample_state());
        let full = serde_json::to_string(&snapshot).unwrap().len();

        let encoded = snapshot.encode(full - 1).unwrap();
        let decoded = PersistedSnapshot::decode(&encoded).unwrap();
        assert_eq!(decoded.assessments.competitive.raw_data, None);
        assert!(decoded.competitive_artifact_text.is_some());
        assert_eq!(decoded.assessments.competitive.ai_score, Some(6));

        let mut no_raw = snapshot.clone();
        no_raw.assessments.competitive.raw_data = None;
        let without_raw = serde_json::to_string(&no_raw).unwrap().len();
        let encoded = snapshot.encode(without_raw - 1).unwrap();
        let decoded = PersistedSnapshot::decode(&encoded).unwrap();
        assert_eq!(decoded.competitive_artifact_text, None);
        assert_eq!(decoded.assessments.competitive.justification, "Crowded but fragmented");

        assert!(matches!(
            snapshot.encode(10),
            Err(StorageError::SnapshotTooLarge { limit: 10, .. })
        ));
    }
}
