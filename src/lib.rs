//! # Venture Assessment
//!
//! Drives a three-stage assessment of a company or technology through
//! remote analysis providers, validates their responses, and keeps a
//! recoverable session state.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline ──► company ──► competitive ──► market   (ProviderClient × 3, HTTP)
//!    │
//!    ▼
//! StateStore ──► AutoSaver ──► Persistence ──► SQLite snapshot
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use venture_assessment::{AnalysisInput, Config, Pipeline, StateStore};
//! use venture_assessment::storage::{Persistence, SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = StateStore::new();
//!     let backend = Arc::new(SqliteBackend::new(&config.store).await?);
//!     let persistence = Persistence::new(backend, config.store.max_snapshot_bytes);
//!     persistence.load(&store).await?;
//!
//!     let pipeline = Pipeline::from_config(&config, store.clone())?;
//!     let results = pipeline.start(AnalysisInput::company_url("acme.io")?).await?;
//!     println!("{}", results.market.score);
//!     persistence.save(&store).await?;
//!     Ok(())
//! }
//! ```

/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Phase sequencing, progress and run events.
pub mod pipeline;
/// Remote analysis provider clients and their response normalizers.
pub mod provider;
/// Session state store and snapshot persistence.
pub mod storage;
/// Shared schema-validation helpers.
pub mod validation;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::{AggregatedResults, AnalysisInput, Pipeline, PipelineEvent};
pub use storage::StateStore;
