//! The garbage collector: a periodic background task performing deferred
//! physical deletion of cleared calls and endpoint-owned resources.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::endpoint::EndpointRegistry;
use crate::registry::CallRegistry;

/// One collection pass: purge the registry, let every endpoint reclaim its
/// own deferred resources, and release the all-cleared barrier when both
/// report fully drained while someone is waiting on it.
pub(crate) async fn collect(registry: &CallRegistry, endpoints: &EndpointRegistry) -> bool {
    let mut all_cleared = registry.purge();

    for endpoint in endpoints.snapshot().await {
        if !endpoint.garbage_collection().await {
            all_cleared = false;
        }
    }

    if all_cleared && registry.is_clearing_all() {
        trace!("all calls cleared, releasing barrier");
        registry.notify_all_cleared();
    }

    all_cleared
}

/// Handle to the spawned collector task.
pub struct GarbageCollector {
    registry: Arc<CallRegistry>,
    endpoints: Arc<EndpointRegistry>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GarbageCollector {
    /// Spawn the periodic collection task.
    pub fn spawn(
        registry: Arc<CallRegistry>,
        endpoints: Arc<EndpointRegistry>,
        period: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task_registry = registry.clone();
        let task_endpoints = endpoints.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        collect(&task_registry, &task_endpoints).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("garbage collector task exiting");
        });

        Self {
            registry,
            endpoints,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Ask the task to exit, wait for it within `grace`, then run one final
    /// pass to sweep anything it missed between its last tick and
    /// termination.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("garbage collector did not stop within {:?}", grace);
            }
        }

        collect(&self.registry, &self.endpoints).await;
    }
}
