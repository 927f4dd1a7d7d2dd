//! Background preview generation.
//!
//! Items are queued without waiting and encoded by a bounded pool. Retryable
//! failures back off exponentially up to the configured attempt count;
//! permanent ones are logged and dropped. Nothing here reports back to the
//! upload path: an item without a preview is still a complete item.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactGenerator;
use crate::config::WorkerRules;
use crate::{ArtifactError, ItemId, MediaError, MediaResult};

/// How one queued preview ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    Generated,
    /// The item's kind has no preview
    Skipped,
    /// The item was deleted before its turn came
    Vanished,
    Failed { attempts: u32, reason: String },
    Cancelled,
}

struct Shared {
    generator: Arc<ArtifactGenerator>,
    rules: WorkerRules,
    pending: AtomicUsize,
    idle: Notify,
    cancel: CancellationToken,
}

/// Queue plus pool for preview jobs
pub struct PreviewWorker {
    tx: mpsc::UnboundedSender<ItemId>,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PreviewWorker {
    /// Start the dispatcher on the current runtime
    pub fn spawn(generator: Arc<ArtifactGenerator>, rules: WorkerRules) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            generator,
            rules,
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            cancel: CancellationToken::new(),
        });

        let dispatcher = tokio::spawn(dispatch(shared.clone(), rx));
        info!(
            concurrency = shared.rules.concurrency,
            max_attempts = shared.rules.max_attempts,
            "Preview worker started"
        );

        Self {
            tx,
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a preview for `item_id`; returns immediately
    pub fn submit(&self, item_id: ItemId) -> MediaResult<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(MediaError::invalid("preview worker is shut down"));
        }
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item_id).is_err() {
            finish(&self.shared);
            return Err(MediaError::invalid("preview worker is shut down"));
        }
        debug!(item_id = %item_id, "Preview queued");
        Ok(())
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until every submitted job has finished
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Finish queued work, then stop the dispatcher
    pub async fn shutdown(&self) {
        self.drain().await;
        self.abort().await;
    }

    /// Stop without draining; running jobs stop at their next backoff
    pub async fn abort(&self) {
        self.shared.cancel.cancel();
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Preview dispatcher join error: {}", e);
            }
        }
        info!("Preview worker stopped");
    }
}

async fn dispatch(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<ItemId>) {
    let permits = Arc::new(Semaphore::new(shared.rules.concurrency.max(1)));
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            Some(done) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = done {
                    error!("Preview job panicked: {}", e);
                }
            }
            next = rx.recv() => {
                let Some(item_id) = next else { break };
                let Ok(permit) = permits.clone().acquire_owned().await else { break };
                let shared = shared.clone();
                running.spawn(async move {
                    let outcome = run_job(&shared, item_id).await;
                    drop(permit);
                    debug!(item_id = %item_id, ?outcome, "Preview job finished");
                    finish(&shared);
                });
            }
        }
    }

    rx.close();
    while let Ok(item_id) = rx.try_recv() {
        debug!(item_id = %item_id, "Dropping queued preview on shutdown");
        finish(&shared);
    }
    while running.join_next().await.is_some() {}
}

fn finish(shared: &Shared) {
    if shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.idle.notify_waiters();
    }
}

async fn run_job(shared: &Shared, item_id: ItemId) -> PreviewOutcome {
    let max_attempts = shared.rules.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match shared.generator.metadata().get(item_id).await {
            Ok(Some(item)) => shared.generator.generate_preview(&item).await,
            Ok(None) => {
                debug!(item_id = %item_id, "Item removed before preview generation");
                return PreviewOutcome::Vanished;
            }
            Err(e) => Err(ArtifactError::retryable(e.to_string())),
        };

        let err = match result {
            Ok(Some(_)) => return PreviewOutcome::Generated,
            Ok(None) => return PreviewOutcome::Skipped,
            Err(e) => e,
        };

        if let Ok(None) = shared.generator.metadata().get(item_id).await {
            debug!(item_id = %item_id, error = %err, "Item removed during preview generation");
            return PreviewOutcome::Vanished;
        }

        if !err.is_retryable() || attempt >= max_attempts {
            error!(item_id = %item_id, attempt, error = %err, "Preview generation failed permanently");
            return PreviewOutcome::Failed {
                attempts: attempt,
                reason: err.message().to_string(),
            };
        }

        let backoff = shared.rules.backoff_for(attempt);
        warn!(item_id = %item_id, attempt, ?backoff, error = %err, "Preview generation failed, will retry");
        tokio::select! {
            _ = shared.cancel.cancelled() => return PreviewOutcome::Cancelled,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}
