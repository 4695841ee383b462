//! Integration tests for snapshot persistence
//!
//! Exercises the state store against an on-disk SQLite backend: round
//! trips, per-field recovery, corruption handling, size bounds and the
//! debounced autosave.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use venture_assessment::config::StoreConfig;
use venture_assessment::error::StorageError;
use venture_assessment::storage::{
    AssessmentKind, AssessmentPatch, AssessmentStatus, AutoSaver, Persistence, SnapshotBackend,
    SqliteBackend, StatePatch, StateStore,
};

/// Create a backend in a fresh temporary directory
async fn create_test_backend() -> (Arc<SqliteBackend>, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = StoreConfig {
        path: dir.path().join("nested").join("assessment.db"),
        ..StoreConfig::default()
    };
    let backend = SqliteBackend::new(&config)
        .await
        .expect("Failed to create backend");
    (Arc::new(backend), dir)
}

fn populated_store() -> StateStore {
    let store = StateStore::new();
    store
        .set_state(
            StatePatch::default()
                .input_descriptor("https://acme.example")
                .competitive_artifact_text(Some("BigCo leads".to_string())),
        )
        .unwrap();
    store
        .set_assessment_data(
            AssessmentKind::Competitive,
            AssessmentPatch::default()
                .status(AssessmentStatus::Complete)
                .ai_score(6)
                .ai_justification("Fragmented field")
                .raw_data(json!({ "outputs": { "out-7": "x".repeat(2_000) } })),
        )
        .unwrap();
    store
        .submit_user_score(
            AssessmentKind::Competitive,
            4,
            "Incumbent has a strong distribution moat",
        )
        .unwrap();
    store
        .set_assessment_data(
            AssessmentKind::Market,
            AssessmentPatch::default()
                .status(AssessmentStatus::Complete)
                .ai_score(8)
                .ai_justification("Large, fast-growing market")
                .confidence(Some(0.8)),
        )
        .unwrap();
    store
}

#[tokio::test]
async fn test_save_then_load_round_trips() {
    let (backend, _dir) = create_test_backend().await;
    let persistence = Persistence::new(backend, 1 << 20);
    let store = populated_store();
    persistence.save(&store).await.unwrap();

    let restored = StateStore::new();
    assert!(persistence.load(&restored).await.unwrap());

    let before = store.get_state();
    let after = restored.get_state();
    assert_eq!(after.input_descriptor, before.input_descriptor);
    assert_eq!(after.competitive_artifact_text, before.competitive_artifact_text);
    for kind in AssessmentKind::ALL {
        let (a, b) = (before.assessments.get(kind), after.assessments.get(kind));
        assert_eq!(b.ai_score, a.ai_score);
        assert_eq!(b.user_score, a.user_score);
        assert_eq!(b.ai_justification, a.ai_justification);
        assert_eq!(b.justification, a.justification);
        assert_eq!(b.submitted, a.submitted);
    }
    assert!(restored.score_deviation(AssessmentKind::Competitive).is_some());

    // The reviewer's text sits beside the provider rationale, not over it.
    let competitive = restored.assessment(AssessmentKind::Competitive);
    assert_eq!(competitive.ai_justification, "Fragmented field");
    assert_eq!(competitive.justification, "Incumbent has a strong distribution moat");
}

#[tokio::test]
async fn test_out_of_range_score_nulled_on_load() {
    let (backend, _dir) = create_test_backend().await;
    backend
        .write(
            &json!({
                "version": "1",
                "inputDescriptor": "https://acme.example",
                "assessments": {
                    "competitive": {
                        "status": "complete",
                        "aiScore": 15,
                        "userScore": 3,
                        "justification": "Keep me",
                        "confidence": null,
                        "submitted": true,
                        "timestamp": "2024-05-01T12:00:00Z"
                    },
                    "market": {
                        "status": "complete",
                        "aiScore": 7,
                        "userScore": null,
                        "justification": "Market intact",
                        "confidence": 0.6,
                        "submitted": false,
                        "timestamp": null
                    }
                },
                "competitiveArtifactText": null,
                "timestamp": "2024-05-01T12:00:00Z"
            })
            .to_string(),
        )
        .await
        .unwrap();

    let persistence = Persistence::new(backend, 1 << 20);
    let store = StateStore::new();
    assert!(persistence.load(&store).await.unwrap());

    let competitive = store.assessment(AssessmentKind::Competitive);
    assert_eq!(competitive.ai_score, None);
    assert_eq!(competitive.user_score, Some(3));
    assert_eq!(competitive.justification, "Keep me");
    assert!(competitive.submitted);

    let market = store.assessment(AssessmentKind::Market);
    assert_eq!(market.ai_score, Some(7));
    assert_eq!(market.justification, "Market intact");
    assert_eq!(market.confidence, Some(0.6));
}

#[tokio::test]
async fn test_corrupt_snapshot_cleared_and_store_starts_empty() {
    let (backend, _dir) = create_test_backend().await;
    backend.write("{\"version\": \"1\", \"assessments\": ").await.unwrap();

    let persistence = Persistence::new(backend.clone(), 1 << 20);
    let store = StateStore::new();
    assert!(!persistence.load(&store).await.unwrap());

    assert_eq!(backend.read().await.unwrap(), None);
    assert_eq!(store.get_state(), StateStore::new().get_state());
}

#[tokio::test]
async fn test_foreign_version_treated_as_corrupt() {
    let (backend, _dir) = create_test_backend().await;
    backend
        .write(&json!({ "version": "2", "inputDescriptor": "x" }).to_string())
        .await
        .unwrap();

    let persistence = Persistence::new(backend.clone(), 1 << 20);
    assert!(!persistence.load(&StateStore::new()).await.unwrap());
    assert_eq!(backend.read().await.unwrap(), None);
}

#[tokio::test]
async fn test_size_bound_drops_raw_payload_first() {
    let (backend, _dir) = create_test_backend().await;
    let store = populated_store();

    // Fits once the 2 KB raw payload is gone.
    let persistence = Persistence::new(backend.clone(), 1_500);
    persistence.save(&store).await.unwrap();

    let stored = backend.read().await.unwrap().unwrap();
    assert!(stored.len() <= 1_500);
    assert!(!stored.contains("rawData"));

    let restored = StateStore::new();
    assert!(persistence.load(&restored).await.unwrap());
    assert_eq!(restored.assessment(AssessmentKind::Competitive).ai_score, Some(6));
    assert_eq!(
        restored.get_state().competitive_artifact_text.as_deref(),
        Some("BigCo leads")
    );

    let tiny = Persistence::new(backend, 64);
    assert!(matches!(
        tiny.save(&store).await,
        Err(StorageError::SnapshotTooLarge { limit: 64, .. })
    ));
}

#[tokio::test]
async fn test_autosave_persists_after_quiet_period() {
    let (backend, _dir) = create_test_backend().await;
    let persistence = Arc::new(Persistence::new(backend.clone(), 1 << 20));
    let store = StateStore::new();
    let saver = AutoSaver::spawn(store.clone(), persistence, Duration::from_millis(50));

    for score in 1..=5 {
        store
            .set_assessment_data(AssessmentKind::Market, AssessmentPatch::default().ai_score(score))
            .unwrap();
    }
    assert_eq!(backend.read().await.unwrap(), None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stored = backend.read().await.unwrap().expect("autosave should have written");
    assert!(stored.contains("\"aiScore\":5"));

    saver.shutdown().await;
}

#[tokio::test]
async fn test_reset_clears_assessments() {
    let store = populated_store();
    store.reset();
    let state = store.get_state();
    assert_eq!(state.input_descriptor, "");
    assert_eq!(state.assessments.competitive.ai_score, None);
    assert!(!store.all_submitted());
    assert_eq!(store.submitted_count(), 0);
}
