//! Task queue consumer with a self-healing consume loop.
//!
//! Acknowledgement model: a delivery is acked the moment its payload has been
//! handed to the dispatch engine's inbound channel. Handler completion is
//! reported through the result queue, not through broker acks, so a worker
//! crash mid-task loses at most the tasks already in flight.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ReconnectBackoff;
use crate::config::BrokerConfig;
use crate::error::Result;

pub struct TaskConsumer {
    config: BrokerConfig,
    queue: String,
    inbound: mpsc::Sender<Value>,
    shutdown: CancellationToken,
}

impl TaskConsumer {
    pub fn new(
        config: BrokerConfig,
        queue: String,
        inbound: mpsc::Sender<Value>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            queue,
            inbound,
            shutdown,
        }
    }

    /// Consume until cancelled. Every connection failure is absorbed here:
    /// log, back off, rebuild the connection, resume.
    pub async fn run(self) {
        let mut backoff = ReconnectBackoff::new(&self.config);
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.connect().await {
                Ok((connection, consumer)) => {
                    backoff.reset();
                    self.consume(consumer).await;
                    if let Err(e) = connection.close(200, "shutdown").await {
                        debug!(error = %e, "Consumer connection close failed");
                    }
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    // A dropped stream with a healthy-looking broker must not
                    // turn into a hot reconnect loop; pause at least the
                    // backoff floor before the next consume cycle
                    let delay = backoff.next_delay();
                    warn!(
                        queue = %self.queue,
                        retry_in_ms = delay.as_millis() as u64,
                        "Consume stream ended; reconnecting"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Broker connection failed"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!("Task consumer stopped");
    }

    async fn connect(&self) -> Result<(Connection, Consumer)> {
        let connection = Connection::connect(
            &self.config.amqp_uri(),
            ConnectionProperties::default().with_connection_name("galaxy-node-consumer".into()),
        )
        .await?;
        let channel = connection.create_channel().await?;

        // One unacked delivery at a time; the dispatch pool provides the
        // real concurrency bound
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        self.declare_queue(&channel).await?;

        let consumer = channel
            .basic_consume(
                &self.queue,
                "galaxy-node",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            queue = %self.queue,
            "Consumer connected to broker"
        );
        Ok((connection, consumer))
    }

    async fn declare_queue(&self, channel: &Channel) -> Result<()> {
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// Drain the consume stream until it ends or shutdown is requested.
    async fn consume(&self, mut consumer: Consumer) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "Delivery error; rebuilding connection");
                        return;
                    }
                    None => return,
                },
            }
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let payload: Value = match serde_json::from_slice(&delivery.data) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Discarding payload that is not valid JSON");
                if let Err(e) = delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    warn!(error = %e, "Nack failed");
                }
                return;
            }
        };

        if self.inbound.send(payload).await.is_err() {
            // Dispatch engine is gone; leave the task for the next worker
            warn!("Inbound channel closed; requeueing delivery");
            if let Err(e) = delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
            {
                warn!(error = %e, "Nack failed");
            }
            return;
        }

        // Ack on enqueue; completion is reported via the result queue
        if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
            warn!(error = %e, "Ack failed; broker may redeliver this task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::options::BasicPublishOptions;
    use lapin::BasicProperties;
    use std::time::Duration;

    async fn publish_raw(config: &BrokerConfig, queue: &str, body: &[u8]) {
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
            .await
            .unwrap();
        let channel = connection.create_channel().await.unwrap();
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .unwrap();
        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default(),
            )
            .await
            .unwrap()
            .await
            .unwrap();
        connection.close(200, "done").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires RabbitMQ running"]
    async fn test_consumed_payload_reaches_inbound_channel() {
        let config = BrokerConfig::default();
        let queue = format!("test_tasks_{}", uuid::Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let consumer = TaskConsumer::new(config.clone(), queue.clone(), tx, shutdown.clone());
        let handle = tokio::spawn(consumer.run());

        publish_raw(&config, &queue, br#"{"task_id": 9}"#).await;

        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["task_id"], 9);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires RabbitMQ running"]
    async fn test_reconnects_after_consume_stream_drop() {
        let config = BrokerConfig {
            reconnect_delay_ms: 100,
            ..Default::default()
        };
        let queue = format!("test_tasks_{}", uuid::Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let consumer = TaskConsumer::new(config.clone(), queue.clone(), tx, shutdown.clone());
        let handle = tokio::spawn(consumer.run());

        publish_raw(&config, &queue, br#"{"task_id": 1}"#).await;
        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["task_id"], 1);

        // Deleting the queue cancels the server-side consumer and ends the
        // stream; the consume loop must rebuild and re-declare
        {
            let connection =
                Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
                    .await
                    .unwrap();
            let channel = connection.create_channel().await.unwrap();
            channel
                .queue_delete(&queue, lapin::options::QueueDeleteOptions::default())
                .await
                .unwrap();
            connection.close(200, "done").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        publish_raw(&config, &queue, br#"{"task_id": 2}"#).await;
        let payload = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["task_id"], 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires RabbitMQ running"]
    async fn test_invalid_json_is_dropped_not_enqueued() {
        let config = BrokerConfig::default();
        let queue = format!("test_tasks_{}", uuid::Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let consumer = TaskConsumer::new(config.clone(), queue.clone(), tx, shutdown.clone());
        let handle = tokio::spawn(consumer.run());

        publish_raw(&config, &queue, b"not json at all").await;
        publish_raw(&config, &queue, br#"{"task_id": 10}"#).await;

        // Only the valid payload comes through
        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["task_id"], 10);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
