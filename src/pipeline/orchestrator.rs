use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::{AnalysisInput, AnalysisSession, PhaseOutput, Progress, RunStatus};
use super::{PhaseKey, PipelineEvent};
use crate::config::Config;
use crate::error::{ClientError, ClientResult, PipelineError, PipelineResult};
use crate::provider::{
    CompanyClient, CompanyProfile, CompetitiveClient, CompetitiveResult, MarketClient, MarketInput,
    MarketResult,
};
use crate::storage::{
    AssessmentKind, AssessmentPatch, AssessmentStatus, StatePatch, StateStore,
};

const EVENT_CAPACITY: usize = 64;

/// Everything a successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResults {
    pub input_descriptor: String,
    /// `None` when the run started from a technology description.
    pub company: Option<CompanyProfile>,
    pub tech_description: String,
    pub competitive: CompetitiveResult,
    pub market: MarketResult,
    pub duration_secs: f64,
}

/// Sequences the three providers and writes their results into the store.
///
/// Only one run may be in flight at a time; a second
/// [`start`](Self::start) is rejected before it does any work.
pub struct Pipeline {
    company: CompanyClient,
    competitive: CompetitiveClient,
    market: MarketClient,
    store: StateStore,
    session: Mutex<AnalysisSession>,
    /// Incremented per run so a superseded run cannot touch a reset session.
    generation: AtomicU64,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    events: broadcast::Sender<PipelineEvent>,
}

/// Clears the single-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Pipeline {
    /// Create a pipeline from prebuilt clients.
    pub fn new(
        company: CompanyClient,
        competitive: CompetitiveClient,
        market: MarketClient,
        store: StateStore,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            company,
            competitive,
            market,
            store,
            session: Mutex::new(AnalysisSession::new()),
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            events,
        }
    }

    /// Build the three clients from configuration.
    pub fn from_config(config: &Config, store: StateStore) -> ClientResult<Self> {
        let providers = &config.providers;
        Ok(Self::new(
            CompanyClient::new(&providers.api_key, providers.company.clone(), config.retry.clone())?,
            CompetitiveClient::new(
                &providers.api_key,
                providers.competitive.clone(),
                config.retry.clone(),
            )?,
            MarketClient::new(&providers.api_key, providers.market.clone(), config.retry.clone())?,
            store,
        ))
    }

    /// The state store results are written to.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Subscribe to run events.
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A copy of the current session.
    pub fn session(&self) -> AnalysisSession {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Progress of the current or last run.
    pub fn get_progress(&self) -> Progress {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .progress_at(Utc::now())
    }

    /// Request cooperative cancellation of the in-flight run.
    ///
    /// Observed at the next network wait or backoff delay.
    pub fn cancel(&self) {
        info!("Analysis cancellation requested");
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).cancel();
    }

    /// Cancel any in-flight run and return every phase to pending.
    pub fn reset(&self) {
        self.cancel();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = AnalysisSession::new();
        debug!("Pipeline reset");
    }

    /// Run every phase for `input`.
    pub async fn start(&self, input: AnalysisInput) -> PipelineResult<AggregatedResults> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejected start while an analysis is running");
            return Err(PipelineError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let started = Instant::now();
        let descriptor = input.descriptor().to_string();
        self.store
            .set_state(
                StatePatch::default()
                    .input_descriptor(descriptor.clone())
                    .analyzing(true)
                    .analysis_phase(None)
                    .competitive_artifact_text(None)
                    .last_error(None),
            )
            .map_err(PipelineError::InvalidInput)?;
        self.update_session(generation, |s| s.begin(&descriptor, Utc::now()));

        info!(input = %descriptor, "Starting analysis");
        self.emit(PipelineEvent::Start {
            input_descriptor: descriptor.clone(),
        });

        let outcome = self.run_phases(generation, &input, &token).await;

        let status = match &outcome {
            Ok(_) => RunStatus::Completed,
            Err(PipelineError::Cancelled { .. }) => RunStatus::Cancelled,
            Err(_) => RunStatus::Error,
        };
        self.update_session(generation, |s| s.finish(status, Utc::now()));

        let last_error = outcome.as_ref().err().map(PipelineError::user_message);
        let finished = self.store.set_state(
            StatePatch::default()
                .analyzing(false)
                .analysis_phase(None)
                .last_error(last_error),
        );
        if let Err(e) = finished {
            warn!(error = %e, "Failed to record analysis outcome");
        }

        match outcome {
            Ok(phases) => {
                let results = AggregatedResults {
                    input_descriptor: descriptor,
                    company: phases.company,
                    tech_description: phases.tech_description,
                    competitive: phases.competitive,
                    market: phases.market,
                    duration_secs: started.elapsed().as_secs_f64(),
                };
                info!(
                    duration_secs = results.duration_secs,
                    competitive_score = results.competitive.score,
                    market_score = results.market.score,
                    "Analysis completed"
                );
                self.emit(PipelineEvent::Complete {
                    results: Box::new(results.clone()),
                });
                Ok(results)
            }
            Err(e @ PipelineError::Cancelled { .. }) => {
                info!(phase = ?e.phase(), "Analysis cancelled");
                self.emit(PipelineEvent::Cancelled { phase: e.phase() });
                Err(e)
            }
            Err(e) => {
                error!(phase = ?e.phase(), error = %e, "Analysis failed");
                self.emit(PipelineEvent::Error {
                    phase: e.phase(),
                    message: e.user_message(),
                });
                Err(e)
            }
        }
    }

    async fn run_phases(
        &self,
        generation: u64,
        input: &AnalysisInput,
        cancel: &CancellationToken,
    ) -> PipelineResult<PhaseResults> {
        let (company, tech_description) = match input {
            AnalysisInput::CompanyUrl(url) => {
                let profile = self
                    .run_phase(
                        generation,
                        PhaseKey::Company,
                        cancel,
                        self.company.retry_with_backoff(url, cancel),
                    )
                    .await?;
                let description = profile.tech_description();
                (Some(profile), description)
            }
            AnalysisInput::TechDescription(text) => {
                info!("Technology description supplied, skipping company phase");
                self.update_session(generation, |s| s.skip(PhaseKey::Company, Utc::now()));
                self.emit(PipelineEvent::PhaseComplete {
                    phase: PhaseKey::Company,
                    duration_secs: 0.0,
                    data: None,
                });
                (None, text.clone())
            }
        };

        self.mark_in_progress(AssessmentKind::Competitive);
        let competitive = self
            .run_phase(
                generation,
                PhaseKey::Competitive,
                cancel,
                self.competitive.retry_with_backoff(&tech_description, cancel),
            )
            .await
            .inspect_err(|_| self.mark_failed(AssessmentKind::Competitive))?;
        self.record_competitive(&competitive)?;

        let market_input = MarketInput {
            tech_description: tech_description.clone(),
            competitive_analysis: competitive.analysis_text.clone(),
        };
        self.mark_in_progress(AssessmentKind::Market);
        let market = self
            .run_phase(
                generation,
                PhaseKey::Market,
                cancel,
                self.market.retry_with_backoff(&market_input, cancel),
            )
            .await
            .inspect_err(|_| self.mark_failed(AssessmentKind::Market))?;
        self.record_market(&market)?;

        Ok(PhaseResults {
            company,
            tech_description,
            competitive,
            market,
        })
    }

    /// Activate `key`, await `call`, and record the outcome on the session.
    async fn run_phase<T, F>(
        &self,
        generation: u64,
        key: PhaseKey,
        cancel: &CancellationToken,
        call: F,
    ) -> PipelineResult<T>
    where
        T: Clone + Into<PhaseOutput>,
        F: Future<Output = ClientResult<T>>,
    {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { phase: Some(key) });
        }

        let activated = self.try_update_session(generation, |s| s.activate(key, Utc::now()));
        if let Err(message) = activated {
            error!(phase = %key, error = %message, "Phase precondition failed");
            return Err(PipelineError::Sequencing { phase: key, message });
        }

        if let Err(e) = self
            .store
            .set_state(StatePatch::default().analysis_phase(Some(key)))
        {
            warn!(phase = %key, error = %e, "Failed to record active phase");
        }
        info!(phase = %key, "Phase started");
        self.emit(PipelineEvent::PhaseStart {
            phase: key,
            estimated_duration_secs: key.expected_duration_secs(),
        });

        let started = Instant::now();
        match call.await {
            Ok(output) => {
                let data: PhaseOutput = output.clone().into();
                self.update_session(generation, |s| s.complete(key, data.clone(), Utc::now()));
                let duration_secs = started.elapsed().as_secs_f64();
                info!(phase = %key, duration_secs, "Phase completed");
                self.emit(PipelineEvent::PhaseComplete {
                    phase: key,
                    duration_secs,
                    data: Some(data),
                });
                Ok(output)
            }
            Err(e) if e.is_cancelled() => {
                self.update_session(generation, |s| s.fail(key, "cancelled", Utc::now()));
                self.emit(PipelineEvent::PhaseError {
                    phase: key,
                    error: "cancelled".to_string(),
                });
                Err(PipelineError::Cancelled { phase: Some(key) })
            }
            Err(e) => {
                warn!(phase = %key, error = %e, "Phase failed");
                self.update_session(generation, |s| s.fail(key, e.to_string(), Utc::now()));
                self.emit(PipelineEvent::PhaseError {
                    phase: key,
                    error: e.to_string(),
                });
                Err(PipelineError::Phase { phase: key, source: e })
            }
        }
    }

    fn record_competitive(&self, result: &CompetitiveResult) -> PipelineResult<()> {
        self.store
            .set_state(
                StatePatch::default().competitive_artifact_text(Some(result.analysis_text.clone())),
            )
            .and_then(|_| {
                self.store.set_assessment_data(
                    AssessmentKind::Competitive,
                    AssessmentPatch::default()
                        .status(AssessmentStatus::Complete)
                        .ai_score(i64::from(result.score))
                        .ai_justification(result.justification.clone())
                        .confidence(result.confidence)
                        .raw_data(result.raw_response.clone()),
                )
            })
            .map_err(|e| PipelineError::Phase {
                phase: PhaseKey::Competitive,
                source: ClientError::Validation(e),
            })
    }

    fn record_market(&self, result: &MarketResult) -> PipelineResult<()> {
        self.store
            .set_assessment_data(
                AssessmentKind::Market,
                AssessmentPatch::default()
                    .status(AssessmentStatus::Complete)
                    .ai_score(i64::from(result.score))
                    .ai_justification(result.justification.summary.clone())
                    .confidence(result.confidence)
                    .raw_data(result.raw_response.clone()),
            )
            .map_err(|e| PipelineError::Phase {
                phase: PhaseKey::Market,
                source: ClientError::Validation(e),
            })
    }

    fn mark_in_progress(&self, kind: AssessmentKind) {
        self.set_assessment_status(kind, AssessmentStatus::InProgress);
    }

    fn mark_failed(&self, kind: AssessmentKind) {
        self.set_assessment_status(kind, AssessmentStatus::Error);
    }

    fn set_assessment_status(&self, kind: AssessmentKind, status: AssessmentStatus) {
        if let Err(e) = self
            .store
            .set_assessment_data(kind, AssessmentPatch::default().status(status))
        {
            warn!(assessment = %kind, error = %e, "Failed to update assessment status");
        }
    }

    fn update_session(&self, generation: u64, apply: impl FnOnce(&mut AnalysisSession)) {
        let _ = self.try_update_session(generation, |s| {
            apply(s);
            Ok(())
        });
    }

    /// Apply `apply` unless the run was superseded by a reset.
    fn try_update_session(
        &self,
        generation: u64,
        apply: impl FnOnce(&mut AnalysisSession) -> Result<(), String>,
    ) -> Result<(), String> {
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err("run was reset".to_string());
        }
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut session)
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

struct PhaseResults {
    company: Option<CompanyProfile>,
    tech_description: String,
    competitive: CompetitiveResult,
    market: MarketResult,
}
