use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PhaseKey;
use crate::error::{ValidationError, ValidationResult};
use crate::provider::{CompanyProfile, CompetitiveResult, MarketResult};
use crate::validation::validate_url;

/// Progress never reports more than this until the run completes.
const MAX_RUNNING_PERCENT: f64 = 95.0;

/// What a run starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisInput {
    /// Profile the company first, then derive the description from it.
    CompanyUrl(String),
    /// Skip the company phase and analyze this description directly.
    TechDescription(String),
}

impl AnalysisInput {
    /// A company URL, normalized (scheme defaulted to https).
    pub fn company_url(raw: &str) -> ValidationResult<Self> {
        validate_url(raw).map(AnalysisInput::CompanyUrl)
    }

    /// A free-text technology description.
    pub fn tech_description(raw: &str) -> ValidationResult<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(ValidationError::new(
                "description",
                "Technology description cannot be empty",
            ));
        }
        Ok(AnalysisInput::TechDescription(text.to_string()))
    }

    /// The raw descriptor recorded in session state.
    pub fn descriptor(&self) -> &str {
        match self {
            AnalysisInput::CompanyUrl(s) | AnalysisInput::TechDescription(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl RunStatus {
    /// Whether the run has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled)
    }
}

/// Normalized result owned by a completed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "data", rename_all = "lowercase")]
pub enum PhaseOutput {
    Company(CompanyProfile),
    Competitive(CompetitiveResult),
    Market(MarketResult),
}

impl From<CompanyProfile> for PhaseOutput {
    fn from(profile: CompanyProfile) -> Self {
        PhaseOutput::Company(profile)
    }
}

impl From<CompetitiveResult> for PhaseOutput {
    fn from(result: CompetitiveResult) -> Self {
        PhaseOutput::Competitive(result)
    }
}

impl From<MarketResult> for PhaseOutput {
    fn from(result: MarketResult) -> Self {
        PhaseOutput::Market(result)
    }
}

/// One provider invocation within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub key: PhaseKey,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub expected_duration_secs: u64,
    /// Completed without running; excluded from progress weights.
    pub skipped: bool,
    pub data: Option<PhaseOutput>,
    pub error: Option<String>,
}

impl Phase {
    fn new(key: PhaseKey) -> Self {
        Self {
            key,
            status: PhaseStatus::Pending,
            started_at: None,
            ended_at: None,
            expected_duration_secs: key.expected_duration_secs(),
            skipped: false,
            data: None,
            error: None,
        }
    }

    /// Seconds between start and end, if both are known.
    pub fn duration_secs(&self) -> Option<f64> {
        Some(seconds_between(self.started_at?, self.ended_at?))
    }
}

/// Time-weighted progress estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// 0-100; capped at 95 until the run completes.
    pub percentage: f64,
    pub elapsed_seconds: f64,
    pub current_phase: Option<PhaseKey>,
    pub total_estimated_seconds: u64,
    pub remaining_seconds: f64,
}

/// State of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub input_descriptor: String,
    pub phases: Vec<Phase>,
    pub overall_status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisSession {
    /// An idle session with every phase pending.
    pub fn new() -> Self {
        Self {
            input_descriptor: String::new(),
            phases: PhaseKey::ALL.iter().map(|k| Phase::new(*k)).collect(),
            overall_status: RunStatus::Idle,
            started_at: None,
            ended_at: None,
        }
    }

    /// Reset phases and mark the run as started.
    pub fn begin(&mut self, input_descriptor: &str, now: DateTime<Utc>) {
        *self = Self::new();
        self.input_descriptor = input_descriptor.to_string();
        self.overall_status = RunStatus::Running;
        self.started_at = Some(now);
    }

    pub fn phase(&self, key: PhaseKey) -> &Phase {
        &self.phases[key.index()]
    }

    fn phase_mut(&mut self, key: PhaseKey) -> &mut Phase {
        &mut self.phases[key.index()]
    }

    /// The phase currently running, if any.
    pub fn active_phase(&self) -> Option<PhaseKey> {
        self.phases
            .iter()
            .find(|p| p.status == PhaseStatus::Active)
            .map(|p| p.key)
    }

    /// Move `key` to active.
    ///
    /// Fails unless every earlier phase is completed, no phase is active,
    /// and `key` itself is pending.
    pub fn activate(&mut self, key: PhaseKey, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(blocking) = self.phases[..key.index()]
            .iter()
            .find(|p| p.status != PhaseStatus::Completed)
        {
            return Err(format!(
                "{} phase is {:?}, expected completed",
                blocking.key, blocking.status
            ));
        }
        if let Some(active) = self.active_phase() {
            return Err(format!("{} phase is still active", active));
        }
        let phase = self.phase_mut(key);
        if phase.status != PhaseStatus::Pending {
            return Err(format!("{} phase is {:?}, expected pending", key, phase.status));
        }

        phase.status = PhaseStatus::Active;
        phase.started_at = Some(now);
        Ok(())
    }

    /// Mark an active phase completed with its output.
    pub fn complete(&mut self, key: PhaseKey, data: PhaseOutput, now: DateTime<Utc>) {
        let phase = self.phase_mut(key);
        phase.status = PhaseStatus::Completed;
        phase.ended_at = Some(now);
        phase.data = Some(data);
    }

    /// Mark a pending phase completed without running it.
    pub fn skip(&mut self, key: PhaseKey, now: DateTime<Utc>) {
        let phase = self.phase_mut(key);
        phase.status = PhaseStatus::Completed;
        phase.skipped = true;
        phase.started_at = Some(now);
        phase.ended_at = Some(now);
    }

    /// Mark a phase failed.
    pub fn fail(&mut self, key: PhaseKey, error: impl Into<String>, now: DateTime<Utc>) {
        let phase = self.phase_mut(key);
        phase.status = PhaseStatus::Error;
        phase.ended_at = Some(now);
        phase.error = Some(error.into());
    }

    /// Record the terminal run status.
    pub fn finish(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.overall_status = status;
        self.ended_at = Some(now);
    }

    /// Progress as of `now`.
    ///
    /// Each non-skipped phase is weighted by its expected duration. A
    /// completed phase contributes its full share; the active one a share
    /// proportional to its elapsed time, saturating at its expected duration.
    pub fn progress_at(&self, now: DateTime<Utc>) -> Progress {
        let weighted: Vec<&Phase> = self.phases.iter().filter(|p| !p.skipped).collect();
        let total: u64 = weighted.iter().map(|p| p.expected_duration_secs).sum();

        let elapsed_seconds = match self.started_at {
            Some(start) => seconds_between(start, self.ended_at.unwrap_or(now)),
            None => 0.0,
        };

        let percentage = if self.overall_status == RunStatus::Completed {
            100.0
        } else if total == 0 {
            0.0
        } else {
            let done: f64 = weighted
                .iter()
                .map(|p| {
                    let share = p.expected_duration_secs as f64 / total as f64 * 100.0;
                    match (p.status, p.started_at) {
                        (PhaseStatus::Completed, _) => share,
                        (PhaseStatus::Active, Some(start)) => {
                            let fraction = seconds_between(start, now)
                                / p.expected_duration_secs.max(1) as f64;
                            share * fraction.min(1.0)
                        }
                        _ => 0.0,
                    }
                })
                .sum();
            done.min(MAX_RUNNING_PERCENT)
        };

        let remaining_seconds = if self.overall_status.is_terminal() {
            0.0
        } else {
            (total as f64 - elapsed_seconds).max(0.0)
        };

        Progress {
            percentage,
            elapsed_seconds,
            current_phase: self.active_phase(),
            total_estimated_seconds: total,
            remaining_seconds,
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}
