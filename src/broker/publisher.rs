//! Result publisher with lazy, self-healing connection handling.
//!
//! The publisher owns its own AMQP connection, separate from the consumer's,
//! so a stalled publish never blocks task intake. Connection state is rebuilt
//! on demand: connecting retries with capped backoff until the stop signal
//! fires, and any publish or declare failure discards the cached state so the
//! next attempt starts from a fresh connection. A broker can close the
//! channel while the TCP connection stays up (a declare conflict does this),
//! so a failed publish never trusts the surviving state.

use std::collections::HashSet;

use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ReconnectBackoff;
use crate::config::BrokerConfig;
use crate::error::{Result, WorkerError};
use crate::models::TaskResult;

struct PublisherState {
    connection: Connection,
    channel: Channel,
    /// Queues declared on the current connection
    declared: HashSet<String>,
}

pub struct ResultPublisher {
    config: BrokerConfig,
    shutdown: CancellationToken,
    state: Mutex<Option<PublisherState>>,
}

impl ResultPublisher {
    pub fn new(config: BrokerConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            shutdown,
            state: Mutex::new(None),
        }
    }

    /// Publish one task result as persistent JSON. Connecting blocks with
    /// capped backoff until it succeeds or the stop signal fires; a failure
    /// of the publish itself is returned to the caller, whose bounded retry
    /// then runs against a freshly rebuilt connection.
    pub async fn publish(&self, queue: &str, result: &TaskResult) -> Result<()> {
        let payload = serde_json::to_vec(result)?;

        let mut guard = self.state.lock().await;
        if !guard
            .as_ref()
            .map(|s| s.connection.status().connected())
            .unwrap_or(false)
        {
            if guard.is_some() {
                warn!("Publisher connection lost; reconnecting");
            }
            *guard = Some(self.connect().await?);
        }
        let state = guard
            .as_mut()
            .ok_or_else(|| WorkerError::broker("publisher state missing"))?;

        match Self::send(state, queue, &payload).await {
            Ok(()) => {
                debug!(
                    queue = queue,
                    task_id = result.task_id,
                    status = ?result.status,
                    "Task result published"
                );
                Ok(())
            }
            Err(e) => {
                // The channel may be dead even though the connection still
                // reports connected; discard everything so the next attempt
                // reconnects from scratch
                warn!(queue = queue, error = %e, "Publish failed; discarding broker state");
                if let Some(dead) = guard.take() {
                    if let Err(e) = dead.connection.close(200, "publish failure").await {
                        debug!(error = %e, "Stale publisher connection close failed");
                    }
                }
                Err(e)
            }
        }
    }

    async fn send(state: &mut PublisherState, queue: &str, payload: &[u8]) -> Result<()> {
        if !state.declared.contains(queue) {
            state
                .channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            state.declared.insert(queue.to_string());
        }

        let confirm = state
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await?;
        confirm.await?;
        Ok(())
    }

    /// Connect with capped exponential backoff until the stop signal fires;
    /// the broker being down stalls publishing, it never loses results.
    async fn connect(&self) -> Result<PublisherState> {
        let mut backoff = ReconnectBackoff::new(&self.config);
        loop {
            match self.try_connect().await {
                Ok(state) => return Ok(state),
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Publisher connection failed"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<PublisherState> {
        let connection = Connection::connect(
            &self.config.amqp_uri(),
            ConnectionProperties::default().with_connection_name("galaxy-node-publisher".into()),
        )
        .await?;
        let channel = connection.create_channel().await?;
        info!(
            host = %self.config.host,
            port = self.config.port,
            "Publisher connected to broker"
        );
        Ok(PublisherState {
            connection,
            channel,
            declared: HashSet::new(),
        })
    }

    /// Close the underlying connection; later publishes reconnect.
    pub async fn close(&self) {
        if let Some(state) = self.state.lock().await.take() {
            if let Err(e) = state.connection.close(200, "shutdown").await {
                warn!(error = %e, "Publisher connection close failed");
            }
        }
    }
}
