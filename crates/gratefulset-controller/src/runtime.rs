//! Controller runtime — turns substrate events into reconcile passes.
//!
//! ```text
//!   substrate events ─┐
//!   periodic resync  ─┼─► WorkQueue ─► worker × N ─► Reconciler::reconcile
//!   requeue timers   ─┘        ▲                            │
//!                              └──── requeue / backoff ◄────┘
//! ```
//!
//! Each pass runs under a timeout. On shutdown, in-flight passes are
//! dropped; every pass re-derives its position from observed state, so
//! nothing is lost.

use std::sync::Arc;

use gratefulset_state::{ResourceKind, Substrate};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::ReconcileError;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;

pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Mutex<Backoff>>,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        let backoff = Backoff::new(reconciler.config().backoff.clone());
        Self {
            reconciler,
            queue: WorkQueue::new(),
            backoff: Arc::new(Mutex::new(backoff)),
        }
    }

    /// Queue feeding the workers; exposed so callers can enqueue directly.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let config = self.reconciler.config().clone();
        info!(workers = config.workers, "controller started");

        let substrate = Arc::clone(self.reconciler.substrate());
        enqueue_all(substrate.as_ref(), &self.queue).await;

        let pump = tokio::spawn(pump_events(
            Arc::clone(&substrate),
            Arc::clone(&self.queue),
            shutdown.clone(),
        ));
        let resync = tokio::spawn(resync(
            Arc::clone(&substrate),
            Arc::clone(&self.queue),
            config.resync_interval,
            shutdown.clone(),
        ));

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers.max(1) {
            workers.push(tokio::spawn(worker(
                id,
                Arc::clone(&self.reconciler),
                Arc::clone(&self.queue),
                Arc::clone(&self.backoff),
                shutdown.clone(),
            )));
        }

        let _ = shutdown.changed().await;
        info!("controller shutting down");
        self.queue.shutdown().await;
        for handle in workers {
            let _ = handle.await;
        }
        let _ = pump.await;
        let _ = resync.await;
    }
}

async fn enqueue_all(substrate: &dyn Substrate, queue: &WorkQueue) {
    match substrate.list_workloads() {
        Ok(workloads) => {
            for workload in workloads {
                queue.add(&workload.id).await;
            }
        }
        Err(e) => warn!(error = %e, "failed to list workloads"),
    }
}

/// Map substrate change events onto workload keys.
async fn pump_events(substrate: Arc<dyn Substrate>, queue: Arc<WorkQueue>, mut shutdown: watch::Receiver<bool>) {
    let mut events = substrate.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                // Status is written by the controller itself.
                Ok(event) if event.kind == ResourceKind::Status => {}
                Ok(event) => queue.add(&event.workload_id).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "change events lagged, resyncing all workloads");
                    enqueue_all(substrate.as_ref(), &queue).await;
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn resync(
    substrate: Arc<dyn Substrate>,
    queue: Arc<WorkQueue>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                debug!("periodic resync");
                enqueue_all(substrate.as_ref(), &queue).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn worker(
    id: usize,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Mutex<Backoff>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = reconciler.config().clone();
    while let Some(key) = queue.get().await {
        let pass = tokio::time::timeout(config.pass_timeout, reconciler.reconcile(&key));
        let result = tokio::select! {
            result = pass => result,
            _ = shutdown.changed() => {
                queue.done(&key).await;
                break;
            }
        };

        match result {
            Ok(Ok(outcome)) => {
                backoff.lock().await.reset(&key);
                if let Some(delay) = outcome.requeue_after {
                    queue.add_after(&key, delay);
                }
            }
            Ok(Err(ReconcileError::Conflict(msg))) => {
                debug!(worker = id, workload = %key, %msg, "conflict, re-reading");
                queue.add_after(&key, config.conflict_requeue);
            }
            Ok(Err(e)) if e.is_fatal() => {
                // Paused until the observed state changes.
                backoff.lock().await.reset(&key);
                error!(worker = id, workload = %key, error = %e, "workload paused");
            }
            Ok(Err(e)) => {
                let delay = backoff.lock().await.next_delay(&key);
                warn!(worker = id, workload = %key, error = %e, retry_in = ?delay, "reconcile failed");
                queue.add_after(&key, delay);
            }
            Err(_) => {
                let delay = backoff.lock().await.next_delay(&key);
                warn!(worker = id, workload = %key, retry_in = ?delay, "reconcile pass timed out");
                queue.add_after(&key, delay);
            }
        }
        queue.done(&key).await;
    }
    debug!(worker = id, "worker stopped");
}
