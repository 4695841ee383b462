use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Persistence, StateStore};
use crate::error::{StorageError, StorageResult};

type Reply = oneshot::Sender<StorageResult<()>>;

enum Request {
    Flush(Reply),
    Clear(Reply),
}

/// Background task that saves the store a fixed quiet period after the
/// last change.
///
/// A burst of mutations produces one write. Dropping the saver stops the
/// task without a final save; call [`shutdown`](Self::shutdown) to flush.
pub struct AutoSaver {
    requests: mpsc::Sender<Request>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AutoSaver {
    /// Start watching `store`.
    pub fn spawn(store: StateStore, persistence: Arc<Persistence>, debounce: Duration) -> Self {
        let (requests, request_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        // Subscribe before spawning so changes made right after this call are seen.
        let changes = store.changes();
        let handle = tokio::spawn(run(
            store,
            persistence,
            debounce,
            changes,
            request_rx,
            shutdown.clone(),
        ));
        info!(debounce_ms = debounce.as_millis() as u64, "Autosave started");

        Self {
            requests,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Save immediately, cancelling any pending debounced write.
    pub async fn flush(&self) -> StorageResult<()> {
        self.request(Request::Flush).await
    }

    /// Reset the store and delete the stored snapshot.
    ///
    /// Runs on the saver task, so no pending or later debounced write can
    /// bring the cleared session back.
    pub async fn clear(&self) -> StorageResult<()> {
        self.request(Request::Clear).await
    }

    async fn request(&self, make: fn(Reply) -> Request) -> StorageResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests.send(make(reply_tx)).await.map_err(|_| stopped())?;
        reply_rx.await.map_err(|_| stopped())?
    }

    /// Stop the task, writing any pending change first.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Autosave task panicked");
            }
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn stopped() -> StorageError {
    StorageError::Connection {
        message: "autosave task is not running".to_string(),
    }
}

async fn run(
    store: StateStore,
    persistence: Arc<Persistence>,
    debounce: Duration,
    mut changes: watch::Receiver<u64>,
    mut request_rx: mpsc::Receiver<Request>,
    shutdown: CancellationToken,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let quiet = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                if deadline.is_some() || changes.has_changed().unwrap_or(false) {
                    save(&store, &persistence).await;
                }
                break;
            }
            Some(request) = request_rx.recv() => {
                deadline = None;
                match request {
                    Request::Flush(reply) => {
                        let _ = reply.send(persistence.save(&store).await);
                    }
                    Request::Clear(reply) => {
                        store.reset();
                        // The reset itself must not schedule a save.
                        changes.borrow_and_update();
                        let _ = reply.send(persistence.clear().await);
                    }
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                deadline = Some(Instant::now() + debounce);
            }
            _ = quiet => {
                deadline = None;
                save(&store, &persistence).await;
            }
        }
    }

    debug!("Autosave stopped");
}

async fn save(store: &StateStore, persistence: &Persistence) {
    if let Err(e) = persistence.save(store).await {
        error!(error = %e, "Autosave failed");
    }
}
