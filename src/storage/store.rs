use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{AppState, Assessment, AssessmentKind, AssessmentStatus};
use crate::error::{ValidationError, ValidationResult};
use crate::pipeline::PhaseKey;
use crate::validation::{
    check_score, coerce_confidence, validate_user_assessment, ScoreDeviation,
};

/// Longest accepted input descriptor, in characters.
const MAX_INPUT_CHARS: usize = 20_000;

/// Callback invoked with the full new state after every mutation.
pub type Listener = Arc<dyn Fn(&AppState) + Send + Sync>;

/// Partial update for the top-level session fields. `None` leaves a field
/// untouched; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub input_descriptor: Option<String>,
    pub is_analyzing: Option<bool>,
    pub analysis_phase: Option<Option<PhaseKey>>,
    pub competitive_artifact_text: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
}

impl StatePatch {
    pub fn input_descriptor(mut self, input: impl Into<String>) -> Self {
        self.input_descriptor = Some(input.into());
        self
    }

    pub fn analyzing(mut self, analyzing: bool) -> Self {
        self.is_analyzing = Some(analyzing);
        self
    }

    pub fn analysis_phase(mut self, phase: Option<PhaseKey>) -> Self {
        self.analysis_phase = Some(phase);
        self
    }

    pub fn competitive_artifact_text(mut self, text: Option<String>) -> Self {
        self.competitive_artifact_text = Some(text);
        self
    }

    pub fn last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }
}

/// Partial update for one assessment record. Scores are carried as `i64`
/// so out-of-range values reach the rule table instead of being truncated.
#[derive(Debug, Clone, Default)]
pub struct AssessmentPatch {
    pub status: Option<AssessmentStatus>,
    pub ai_score: Option<Option<i64>>,
    pub user_score: Option<Option<i64>>,
    pub ai_justification: Option<String>,
    pub justification: Option<String>,
    pub confidence: Option<Option<f64>>,
    pub submitted: Option<bool>,
    pub raw_data: Option<Option<Value>>,
}

impl AssessmentPatch {
    pub fn status(mut self, status: AssessmentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn ai_score(mut self, score: i64) -> Self {
        self.ai_score = Some(Some(score));
        self
    }

    pub fn user_score(mut self, score: i64) -> Self {
        self.user_score = Some(Some(score));
        self
    }

    pub fn ai_justification(mut self, justification: impl Into<String>) -> Self {
        self.ai_justification = Some(justification.into());
        self
    }

    pub fn justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    pub fn confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn submitted(mut self, submitted: bool) -> Self {
        self.submitted = Some(submitted);
        self
    }

    pub fn raw_data(mut self, raw: Value) -> Self {
        self.raw_data = Some(Some(raw));
        self
    }
}

type AssessmentRule = fn(AssessmentKind, &AssessmentPatch) -> ValidationResult<()>;

/// Every assessment mutation must pass all of these.
const ASSESSMENT_RULES: &[AssessmentRule] = &[rule_ai_score, rule_user_score, rule_confidence];

fn score_rule(kind: AssessmentKind, field: &str, score: Option<Option<i64>>) -> ValidationResult<()> {
    match score {
        Some(Some(s)) => check_score(s)
            .map(|_| ())
            .map_err(|s| ValidationError::invalid_score(kind.as_str(), field, s)),
        _ => Ok(()),
    }
}

fn rule_ai_score(kind: AssessmentKind, patch: &AssessmentPatch) -> ValidationResult<()> {
    score_rule(kind, "aiScore", patch.ai_score)
}

fn rule_user_score(kind: AssessmentKind, patch: &AssessmentPatch) -> ValidationResult<()> {
    score_rule(kind, "userScore", patch.user_score)
}

fn rule_confidence(kind: AssessmentKind, patch: &AssessmentPatch) -> ValidationResult<()> {
    match patch.confidence {
        Some(Some(c)) if coerce_confidence(c).is_none() => Err(ValidationError::new(
            "confidence",
            format!("Invalid {} confidence: {}", kind, c),
        )),
        _ => Ok(()),
    }
}

fn validate_state_patch(patch: &StatePatch) -> ValidationResult<()> {
    if let Some(input) = &patch.input_descriptor {
        if input.chars().count() > MAX_INPUT_CHARS {
            return Err(ValidationError::new(
                "inputDescriptor",
                format!("Input must be at most {} characters", MAX_INPUT_CHARS),
            ));
        }
    }
    Ok(())
}

/// Which score to aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    Ai,
    User,
}

struct StoreInner {
    state: RwLock<AppState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    revision: watch::Sender<u64>,
    disposed: AtomicBool,
}

/// Canonical, validated session state.
///
/// Cloning yields another handle to the same store. Readers always get
/// copies; mutation goes exclusively through the validated setters.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

/// Handle returned by [`StateStore::subscribe`].
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Stop receiving notifications.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.store.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(AppState::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                revision,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// A deep copy of the current state.
    pub fn get_state(&self) -> AppState {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A copy of one assessment record.
    pub fn assessment(&self, kind: AssessmentKind) -> Assessment {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .assessments
            .get(kind)
            .clone()
    }

    /// Register a listener for state changes.
    pub fn subscribe(&self, listener: impl Fn(&AppState) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Watch the mutation counter; it advances after every successful change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Number of mutations applied so far.
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Apply a partial update to the top-level fields.
    ///
    /// A rejected patch leaves the fields untouched and records the reason
    /// in `last_error`.
    pub fn set_state(&self, patch: StatePatch) -> ValidationResult<()> {
        self.ensure_live()?;
        if let Err(e) = validate_state_patch(&patch) {
            warn!(field = %e.field, error = %e, "Rejected state update");
            let message = e.message.clone();
            self.mutate(|state| state.last_error = Some(message));
            return Err(e);
        }

        self.mutate(|state| {
            if let Some(input) = patch.input_descriptor {
                state.input_descriptor = input;
            }
            if let Some(analyzing) = patch.is_analyzing {
                state.is_analyzing = analyzing;
            }
            if let Some(phase) = patch.analysis_phase {
                state.analysis_phase = phase;
            }
            if let Some(text) = patch.competitive_artifact_text {
                state.competitive_artifact_text = text;
            }
            if let Some(error) = patch.last_error {
                state.last_error = error;
            }
        });
        Ok(())
    }

    /// Apply a partial update to one assessment record.
    ///
    /// A patch that breaks any rule is not applied; the record is tagged
    /// with `Error` status instead and the reason returned.
    pub fn set_assessment_data(&self, kind: AssessmentKind, patch: AssessmentPatch) -> ValidationResult<()> {
        self.ensure_live()?;
        if let Some(e) = ASSESSMENT_RULES.iter().find_map(|rule| rule(kind, &patch).err()) {
            warn!(assessment = %kind, field = %e.field, error = %e, "Rejected assessment update");
            let message = e.message.clone();
            self.mutate(|state| {
                state.assessments.get_mut(kind).status = AssessmentStatus::Error;
                state.last_error = Some(message);
            });
            return Err(e);
        }

        self.mutate(|state| {
            let record = state.assessments.get_mut(kind);
            if let Some(status) = patch.status {
                record.status = status;
            }
            if let Some(score) = patch.ai_score {
                record.ai_score = score.map(|s| s as u8);
            }
            if let Some(score) = patch.user_score {
                record.user_score = score.map(|s| s as u8);
            }
            if let Some(justification) = patch.ai_justification {
                record.ai_justification = justification;
            }
            if let Some(justification) = patch.justification {
                record.justification = justification;
            }
            if let Some(confidence) = patch.confidence {
                record.confidence = confidence;
            }
            if let Some(submitted) = patch.submitted {
                record.submitted = submitted;
            }
            if let Some(raw) = patch.raw_data {
                record.raw_data = raw;
            }
            record.timestamp = Some(Utc::now());
        });
        Ok(())
    }

    /// Record the reviewer's own score and mark the assessment submitted.
    pub fn submit_user_score(
        &self,
        kind: AssessmentKind,
        score: i64,
        justification: &str,
    ) -> ValidationResult<()> {
        let score = validate_user_assessment(score, justification)?;
        self.set_assessment_data(
            kind,
            AssessmentPatch::default()
                .user_score(i64::from(score))
                .justification(justification.trim())
                .submitted(true),
        )
    }

    /// Whether the reviewer has submitted every dimension.
    pub fn all_submitted(&self) -> bool {
        self.submitted_count() == AssessmentKind::ALL.len()
    }

    /// Number of submitted dimensions.
    pub fn submitted_count(&self) -> usize {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        AssessmentKind::ALL
            .iter()
            .filter(|kind| state.assessments.get(**kind).submitted)
            .count()
    }

    /// Mean of the chosen score across dimensions that have one.
    pub fn average_score(&self, source: ScoreSource) -> Option<f64> {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        let scores: Vec<f64> = AssessmentKind::ALL
            .iter()
            .filter_map(|kind| {
                let record = state.assessments.get(*kind);
                match source {
                    ScoreSource::Ai => record.ai_score,
                    ScoreSource::User => record.user_score,
                }
            })
            .map(f64::from)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Gap between AI and reviewer score for one dimension.
    pub fn score_deviation(&self, kind: AssessmentKind) -> Option<ScoreDeviation> {
        let record = self.assessment(kind);
        ScoreDeviation::between(record.ai_score, record.user_score)
    }

    /// Return to the empty state.
    pub fn reset(&self) {
        self.mutate(|state| *state = AppState::default());
    }

    /// Drop all listeners and refuse further notifications.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("State store disposed");
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> ValidationResult<()> {
        if self.is_disposed() {
            return Err(ValidationError::new("store", "State store has been disposed"));
        }
        Ok(())
    }

    /// Replace the whole state, e.g. from a restored snapshot.
    pub(crate) fn replace(&self, state: AppState) {
        self.mutate(|current| *current = state);
    }

    fn mutate(&self, apply: impl FnOnce(&mut AppState)) {
        if self.is_disposed() {
            warn!("Ignoring mutation on disposed state store");
            return;
        }

        let snapshot = {
            let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
            apply(&mut state);
            state.clone()
        };
        self.inner.revision.send_modify(|r| *r += 1);

        // Listeners run outside every lock so they may read or subscribe.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }
}
