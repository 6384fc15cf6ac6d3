//! # Worker Runtime
//!
//! Assembles the broker consumer, the dispatch engine, and the result
//! publisher into one running worker with coordinated shutdown.
//!
//! Data flow:
//!
//! ```text
//! task queue ── TaskConsumer ── mpsc ── DispatchEngine ── mpsc ── result loop ── result queue
//! ```
//!
//! Shutdown cancels a shared token, lets in-flight handlers drain under a
//! bounded timeout, then flushes the result channel and closes the publisher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{ResultPublisher, TaskConsumer};
use crate::config::WorkerConfig;
use crate::dispatch::DispatchEngine;
use crate::error::Result;
use crate::models::TaskResult;
use crate::protocol::{ClientFactory, ProtocolClientFactory};

const CHANNEL_CAPACITY: usize = 64;
const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(1);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination for finished task results.
#[async_trait]
pub(crate) trait ResultSink: Send + Sync {
    async fn publish(&self, queue: &str, result: &TaskResult) -> Result<()>;
}

#[async_trait]
impl ResultSink for ResultPublisher {
    async fn publish(&self, queue: &str, result: &TaskResult) -> Result<()> {
        ResultPublisher::publish(self, queue, result).await
    }
}

pub struct Worker {
    config: WorkerConfig,
    publisher: Arc<ResultPublisher>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        let shutdown = CancellationToken::new();
        let publisher = Arc::new(ResultPublisher::new(config.broker.clone(), shutdown.clone()));
        Self {
            config,
            publisher,
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Spawn the consumer, dispatch engine, and result loop.
    pub fn start(&mut self) {
        info!(
            task_queue = %self.config.task_queue,
            result_queue = %self.config.result_queue,
            pool_size = self.config.worker_pool_size,
            "Starting worker"
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let consumer = TaskConsumer::new(
            self.config.broker.clone(),
            self.config.task_queue.clone(),
            inbound_tx,
            self.shutdown.clone(),
        );
        self.handles.push(tokio::spawn(consumer.run()));

        let factory: Arc<dyn ClientFactory> =
            Arc::new(ProtocolClientFactory::new(self.config.protocol.clone()));
        let engine = DispatchEngine::new(
            self.config.worker_pool_size,
            inbound_rx,
            result_tx,
            factory,
            self.shutdown.clone(),
        );
        self.handles.push(tokio::spawn(engine.run()));

        let publisher = Arc::clone(&self.publisher);
        let result_queue = self.config.result_queue.clone();
        self.handles.push(tokio::spawn(async move {
            publish_results(result_rx, publisher, result_queue).await;
        }));
    }

    /// Cancel all loops, wait (bounded) for in-flight tasks to finish, and
    /// close broker connections.
    pub async fn shutdown(mut self) {
        info!("Shutting down worker");
        self.shutdown.cancel();
        for handle in self.handles.drain(..) {
            if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("Worker component did not stop within the drain timeout");
            }
        }
        self.publisher.close().await;
        info!("Worker stopped");
    }
}

/// Forward results to the result queue until the channel closes, so every
/// result produced before shutdown still gets flushed.
async fn publish_results(
    mut results: mpsc::Receiver<TaskResult>,
    sink: Arc<dyn ResultSink>,
    queue: String,
) {
    while let Some(result) = results.recv().await {
        publish_with_retry(sink.as_ref(), &queue, &result).await;
    }
    info!("Result loop stopped");
}

/// Bounded publish retry; after the last attempt the result is logged and
/// dropped rather than wedging the result loop.
async fn publish_with_retry(sink: &dyn ResultSink, queue: &str, result: &TaskResult) {
    let mut delay = PUBLISH_RETRY_DELAY;
    for attempt in 1..=PUBLISH_ATTEMPTS {
        match sink.publish(queue, result).await {
            Ok(()) => return,
            Err(e) if attempt < PUBLISH_ATTEMPTS => {
                warn!(
                    task_id = result.task_id,
                    attempt = attempt,
                    error = %e,
                    "Result publish failed; retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                error!(
                    task_id = result.task_id,
                    uuid = %result.uuid,
                    error = %e,
                    "Result publish failed after all attempts; dropping result"
                );
            }
        }
    }
}
