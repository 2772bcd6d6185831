//! Worker pool pulling deliveries from both queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::PipelineContext;
use crate::queue::{consume, QueueName};

use super::runner::Orchestrator;
use super::types::OrchestratorStatus;

/// Upper bound when counting parked messages for status.
const DEAD_LETTER_SCAN: usize = 10_000;

pub struct PipelineWorkers {
    orchestrator: Arc<Orchestrator>,
    ctx: Arc<PipelineContext>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineWorkers {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            orchestrator: Arc::new(Orchestrator::new(ctx.clone())),
            ctx,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Spawn the configured number of worker loops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Pipeline workers already running");
            return;
        }

        let count = self.orchestrator.config().worker_count.max(1);
        info!(workers = count, "Starting pipeline workers");

        let mut handles = self.handles.lock().await;
        for worker in 0..count {
            handles.push(self.spawn_worker(worker));
        }
    }

    /// Signal shutdown and wait for in-flight deliveries to settle.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Pipeline workers not running");
            return;
        }

        info!("Stopping pipeline workers");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Pipeline workers stopped");
    }

    pub fn status(&self) -> OrchestratorStatus {
        let queue = &self.ctx.queue;
        OrchestratorStatus {
            running: self.running.load(Ordering::Relaxed),
            worker_count: self.orchestrator.config().worker_count,
            analysis_depth: queue.depth(QueueName::Analysis).unwrap_or(0),
            assets_depth: queue.depth(QueueName::Assets).unwrap_or(0),
            dead_letters: queue
                .list_dead_letters(None, DEAD_LETTER_SCAN)
                .map(|d| d.len())
                .unwrap_or(0),
        }
    }

    fn spawn_worker(&self, worker: usize) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let queue = Arc::clone(&self.ctx.queue);
        let running = Arc::clone(&self.running);
        let poll = orchestrator.config().poll_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(worker, "Worker loop started");
            let mut deliveries = Box::pin(stream::select(
                consume(queue.clone(), QueueName::Analysis, poll),
                consume(queue.clone(), QueueName::Assets, poll),
            ));
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(worker, "Worker received shutdown signal");
                        break;
                    }
                    next = deliveries.next() => {
                        if !running.load(Ordering::Relaxed) {
                            if let Some(Ok(delivery)) = next {
                                if let Err(e) = queue.release(&delivery) {
                                    warn!(worker, error = %e, "Failed to release delivery on shutdown");
                                }
                            }
                            break;
                        }
                        match next {
                            Some(Ok(delivery)) => {
                                let outcome = orchestrator.handle(delivery).await;
                                debug!(worker, outcome = outcome.label(), "Delivery settled");
                            }
                            Some(Err(e)) => warn!(worker, error = %e, "Queue receive failed"),
                            None => break,
                        }
                    }
                }
            }
            debug!(worker, "Worker loop stopped");
        })
    }
}
