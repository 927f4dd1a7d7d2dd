use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::ChunkAssembler;
use crate::MediaResult;

/// Periodically reclaims abandoned upload sessions and orphaned staging files
pub struct SessionReaper {
    assembler: Arc<ChunkAssembler>,
    interval: Duration,
}

/// Running reaper task
pub struct ReaperHandle {
    cancel: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for the current cycle to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join_handle.await {
            warn!("Session reaper join error: {}", e);
        }
    }
}

impl SessionReaper {
    pub fn new(assembler: Arc<ChunkAssembler>, interval: Duration) -> Self {
        Self { assembler, interval }
    }

    /// Run the reaper on the current runtime
    pub fn spawn(self) -> ReaperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join_handle = tokio::spawn(async move { self.run(token).await });
        ReaperHandle { cancel, join_handle }
    }

    async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting session reaper with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.reap_once().await {
                        Ok(0) => debug!("No idle upload sessions found"),
                        Ok(reclaimed) => info!("Reclaimed {} idle upload sessions", reclaimed),
                        Err(e) => warn!("Error during session reaping: {}", e),
                    }
                }
            }
        }

        info!("Session reaper stopped");
    }

    /// Run one reclamation cycle
    pub async fn reap_once(&self) -> MediaResult<usize> {
        self.assembler.reclaim_idle().await
    }
}
