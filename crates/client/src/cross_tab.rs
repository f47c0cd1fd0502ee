//! Background listener that feeds other tabs' storage writes into a
//! [`SessionSynchronizer`].

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use procura_events::{StorageChange, Subscription};

use crate::synchronizer::SessionSynchronizer;

pub struct CrossTabListener {
    synchronizer: Arc<SessionSynchronizer>,
    subscription: Subscription<StorageChange>,
    shutdown: Arc<Notify>,
}

/// Handle to a running listener.
pub struct ListenerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl CrossTabListener {
    /// Subscribe now so no change written after this call is missed.
    pub fn new(synchronizer: Arc<SessionSynchronizer>) -> Self {
        let subscription = synchronizer.storage().subscribe();
        Self {
            synchronizer,
            subscription,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn start(self) -> ListenerHandle {
        let Self {
            synchronizer,
            mut subscription,
            shutdown,
        } = self;
        let stop = shutdown.clone();
        let tab = synchronizer.storage().tab();

        let task = tokio::spawn(async move {
            tracing::info!(tab = %tab, "cross-tab listener started");

            loop {
                tokio::select! {
                    _ = stop.notified() => {
                        tracing::info!(tab = %tab, "cross-tab listener received shutdown signal");
                        break;
                    }
                    change = subscription.recv() => {
                        let Some(change) = change else {
                            tracing::warn!(tab = %tab, "storage bus closed");
                            break;
                        };
                        if change.is_from(tab) {
                            continue;
                        }
                        tracing::debug!(key = change.key(), origin = %change.origin(), "storage change");
                        synchronizer.handle_storage_change(change).await;
                    }
                }
            }
        });

        ListenerHandle { shutdown, task }
    }
}

impl ListenerHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.task.await {
            tracing::error!("cross-tab listener panicked: {err}");
        }
    }
}
