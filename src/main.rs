use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use venture_assessment::{
    config::{Config, LogFormat},
    error::PipelineError,
    pipeline::{AnalysisInput, Pipeline, PipelineEvent},
    storage::{AssessmentKind, AutoSaver, Persistence, ScoreSource, SqliteBackend, StateStore},
};

#[derive(Parser)]
#[command(name = "assess", version, about = "Company, competitive and market assessment")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a company from its website
    Company { url: String },
    /// Analyze a technology description, skipping the company profile
    Describe { text: String },
    /// Record a reviewer score for one dimension
    Review {
        #[arg(value_enum)]
        dimension: Dimension,
        score: i64,
        justification: String,
    },
    /// Print the stored session
    Show,
    /// Clear the stored session
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum Dimension {
    Competitive,
    Market,
}

impl From<Dimension> for AssessmentKind {
    fn from(d: Dimension) -> Self {
        match d {
            Dimension::Competitive => AssessmentKind::Competitive,
            Dimension::Market => AssessmentKind::Market,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "assess starting");

    // Initialize storage
    let backend = match SqliteBackend::new(&config.store).await {
        Ok(b) => {
            info!(path = %config.store.path.display(), "Snapshot database initialized");
            b
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize snapshot database");
            return Err(e.into());
        }
    };
    let persistence = Arc::new(Persistence::new(
        Arc::new(backend),
        config.store.max_snapshot_bytes,
    ));

    let store = StateStore::new();
    persistence.load(&store).await?;

    let saver = AutoSaver::spawn(
        store.clone(),
        Arc::clone(&persistence),
        Duration::from_millis(config.store.autosave_debounce_ms),
    );

    let clearing = matches!(cli.command, Command::Reset);
    let outcome = match cli.command {
        Command::Company { url } => match AnalysisInput::company_url(&url) {
            Ok(input) => analyze(&config, &store, input).await,
            Err(e) => Err(e.into()),
        },
        Command::Describe { text } => match AnalysisInput::tech_description(&text) {
            Ok(input) => analyze(&config, &store, input).await,
            Err(e) => Err(e.into()),
        },
        Command::Review {
            dimension,
            score,
            justification,
        } => review(&store, dimension.into(), score, &justification),
        Command::Show => show(&store),
        Command::Reset => saver.clear().await.map_err(Into::into),
    };

    if !clearing {
        if let Err(e) = saver.flush().await {
            error!(error = %e, "Failed to save session");
        }
    }
    saver.shutdown().await;
    store.dispose();

    outcome
}

async fn analyze(config: &Config, store: &StateStore, input: AnalysisInput) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config, store.clone())?;

    let mut events = pipeline.events();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PipelineEvent::PhaseStart {
                    phase,
                    estimated_duration_secs,
                } => eprintln!("▶ {} (about {}s)", phase, estimated_duration_secs),
                PipelineEvent::PhaseComplete {
                    phase, duration_secs, ..
                } => eprintln!("✓ {} in {:.1}s", phase, duration_secs),
                PipelineEvent::PhaseError { phase, error } => eprintln!("✗ {}: {}", phase, error),
                PipelineEvent::Complete { .. }
                | PipelineEvent::Cancelled { .. }
                | PipelineEvent::Error { .. } => break,
                PipelineEvent::Start { .. } => {}
            }
        }
    });

    let outcome = {
        let run = pipeline.start(input);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling analysis");
                pipeline.cancel();
                run.await
            }
        }
    };
    // Closing the event channel ends the reporter even if no terminal event was sent.
    drop(pipeline);
    let _ = reporter.await;

    match outcome {
        Ok(results) => {
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Err(e) => Err(user_facing(&e)),
    }
}

/// Log the full failure and keep only the readable message for the terminal.
fn user_facing(e: &PipelineError) -> anyhow::Error {
    error!(error = %e, phase = ?e.phase(), "Analysis failed");
    anyhow::anyhow!(e.user_message())
}

fn review(store: &StateStore, kind: AssessmentKind, score: i64, justification: &str) -> anyhow::Result<()> {
    store.submit_user_score(kind, score, justification)?;

    if let Some(deviation) = store.score_deviation(kind) {
        if deviation.flagged {
            eprintln!(
                "Your {} score differs from the AI score by {} points",
                kind, deviation.deviation
            );
        }
    }
    eprintln!(
        "{}/{} assessments submitted",
        store.submitted_count(),
        AssessmentKind::ALL.len()
    );
    Ok(())
}

fn show(store: &StateStore) -> anyhow::Result<()> {
    let state = store.get_state();
    let summary = json!({
        "state": state,
        "averageAiScore": store.average_score(ScoreSource::Ai),
        "averageUserScore": store.average_score(ScoreSource::User),
        "allSubmitted": store.all_submitted(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
