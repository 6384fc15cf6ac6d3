//! # Task Dispatch Engine
//!
//! Bounded-concurrency executor between the broker consumer and the action
//! handlers. Pulls raw JSON payloads off the inbound channel, deserializes
//! them into tasks, and spawns one permit-bounded handler task per work item.
//!
//! Invariant: every payload taken from the inbound channel produces exactly
//! one [`TaskResult`] on the outbound channel, even when it cannot be parsed
//! or its kind has no handler. The submit loop never waits for handler
//! completion; broker acknowledgement happened upstream when the payload was
//! enqueued.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handlers::{self, ActionHandler};
use crate::models::{Task, TaskKind, TaskResult};
use crate::protocol::ClientFactory;

pub struct DispatchEngine {
    inbound: mpsc::Receiver<Value>,
    results: mpsc::Sender<TaskResult>,
    factory: Arc<dyn ClientFactory>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    shutdown: CancellationToken,
}

impl DispatchEngine {
    pub fn new(
        pool_size: usize,
        inbound: mpsc::Receiver<Value>,
        results: mpsc::Sender<TaskResult>,
        factory: Arc<dyn ClientFactory>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inbound,
            results,
            factory,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            shutdown,
        }
    }

    /// Run until cancellation or until the inbound channel closes, then drain
    /// in-flight handlers. The caller applies its own join timeout.
    pub async fn run(mut self) {
        info!(pool_size = self.pool_size, "Dispatch engine started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                payload = self.inbound.recv() => match payload {
                    Some(raw) => self.submit(raw).await,
                    None => break,
                },
            }
        }

        debug!("Draining in-flight handlers");
        // All permits free means every handler task has finished
        let _ = self.permits.acquire_many(self.pool_size as u32).await;
        info!("Dispatch engine stopped");
    }

    async fn submit(&self, raw: Value) {
        let task = match serde_json::from_value::<Task>(raw.clone()) {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, "Task payload failed to parse; emitting salvaged result");
                self.send_result(salvage_result(&raw, &e)).await;
                return;
            }
        };

        let Some(handler) = handlers::handler_for(task.task_type) else {
            error!(
                task_id = task.task_id,
                kind = %task.task_type,
                "No handler mapped for task kind"
            );
            self.send_result(TaskResult::failed(
                task.task_id,
                task.task_type,
                task.uuid.clone(),
                format!("no handler for task kind {}", task.task_type),
            ))
            .await;
            return;
        };

        info!(
            task_id = task.task_id,
            uuid = %task.uuid,
            kind = %task.task_type,
            "Dispatching task"
        );

        // Backpressure: block the submit loop once the pool is saturated
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let factory = Arc::clone(&self.factory);
        let results = self.results.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let result = execute_task(handler, factory, task).await;
            if results.send(result).await.is_err() {
                error!("Result channel closed; dropping task result");
            }
        });
    }

    async fn send_result(&self, result: TaskResult) {
        if self.results.send(result).await.is_err() {
            error!("Result channel closed; dropping task result");
        }
    }
}

/// Run one task to completion with its own protocol client; every failure
/// path ends in a result.
async fn execute_task(
    handler: &'static dyn ActionHandler,
    factory: Arc<dyn ClientFactory>,
    task: Task,
) -> TaskResult {
    let mut client = match factory.client_for(&task.account).await {
        Ok(client) => client,
        Err(e) => {
            warn!(task_id = task.task_id, error = %e, "Protocol client setup failed");
            return TaskResult::failed(
                task.task_id,
                task.task_type,
                task.uuid.clone(),
                format!("client setup failed: {e}"),
            );
        }
    };
    let result = handler.handle(&task, client.as_mut()).await;
    client.close().await;
    result
}

/// Best-effort Failed result for a payload that would not parse into a task:
/// salvage whatever identity fields are present, defaulting the kind to Login.
fn salvage_result(raw: &Value, error: &serde_json::Error) -> TaskResult {
    let task_id = raw.get("task_id").and_then(|v| v.as_i64()).unwrap_or(0);
    let uuid = raw
        .get("uuid")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let kind = raw
        .get("task_type")
        .and_then(TaskKind::from_value)
        .unwrap_or(TaskKind::Login);
    TaskResult::failed(task_id, kind, uuid, format!("task parse failed: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::{Account, Fleet, Target, TaskStatus};
    use crate::protocol::{GameOps, ProtocolResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Factory whose clients succeed at everything; counts constructions
    struct CountingFactory {
        built: AtomicU32,
    }

    struct OkClient;

    #[async_trait]
    impl GameOps for OkClient {
        async fn login(&mut self) -> ProtocolResponse {
            ProtocolResponse::ok(json!({}))
        }
        async fn change_planet(&mut self, _planet_id: i64) -> ProtocolResponse {
            ProtocolResponse::ok(json!({}))
        }
        async fn attack_once(&mut self, _task: &Task) -> ProtocolResponse {
            ProtocolResponse::ok(json!({ "back_ts": 10 }))
        }
        async fn explore_once(&mut self, _task: &Task) -> ProtocolResponse {
            ProtocolResponse::ok(json!({ "back_ts": 10 }))
        }
        async fn query_planets(&mut self, _task: &Task) -> ProtocolResponse {
            ProtocolResponse::ok(json!({}))
        }
        async fn close(&mut self) {}
    }

    #[async_trait]
    impl ClientFactory for CountingFactory {
        async fn client_for(&self, _account: &Account) -> Result<Box<dyn GameOps>> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(OkClient))
        }
    }

    fn task_payload(task_id: i64, kind_code: serde_json::Value) -> Value {
        json!({
            "task_id": task_id,
            "uuid": format!("u-{task_id}"),
            "task_type": kind_code,
            "account": {
                "username": "pilot",
                "password": "secret",
                "email": "",
                "server": "g26"
            },
            "fleet": { "lf": 1 },
            "repeat": 1,
            "target": { "galaxy": 1, "system": 2, "planet": 3 }
        })
    }

    struct Harness {
        inbound: mpsc::Sender<Value>,
        results: mpsc::Receiver<TaskResult>,
        shutdown: CancellationToken,
        factory: Arc<CountingFactory>,
    }

    fn start_engine() -> Harness {
        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        let (result_tx, result_rx) = mpsc::channel(32);
        let factory = Arc::new(CountingFactory {
            built: AtomicU32::new(0),
        });
        let shutdown = CancellationToken::new();
        let engine = DispatchEngine::new(
            5,
            inbound_rx,
            result_tx,
            factory.clone(),
            shutdown.clone(),
        );
        tokio::spawn(engine.run());
        Harness {
            inbound: inbound_tx,
            results: result_rx,
            shutdown,
            factory,
        }
    }

    async fn recv(results: &mut mpsc::Receiver<TaskResult>) -> TaskResult {
        tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("timed out waiting for result")
            .expect("result channel closed")
    }

    #[tokio::test]
    async fn test_every_submission_yields_one_result() {
        let mut harness = start_engine();
        for task_id in 1..=10 {
            harness
                .inbound
                .send(task_payload(task_id, json!(99)))
                .await
                .unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..10 {
            let result = recv(&mut harness.results).await;
            assert_eq!(result.status, TaskStatus::Success);
            assert!(seen.insert(result.task_id), "duplicate result");
        }
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unparseable_payload_salvages_identity() {
        let mut harness = start_engine();
        harness
            .inbound
            .send(json!({ "task_id": 52, "uuid": "u-52", "task_type": 1 }))
            .await
            .unwrap();

        let result = recv(&mut harness.results).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.task_id, 52);
        assert_eq!(result.uuid, "u-52");
        assert_eq!(result.task_type, TaskKind::Attack);
        assert!(result.err_msg.starts_with("task parse failed"));
        assert_eq!(harness.factory.built.load(Ordering::SeqCst), 0);
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_kind_defaults_to_login_in_salvage() {
        let mut harness = start_engine();
        harness.inbound.send(json!({ "task_id": 53 })).await.unwrap();

        let result = recv(&mut harness.results).await;
        assert_eq!(result.task_type, TaskKind::Login);
        assert_eq!(result.status, TaskStatus::Failed);
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_escape_fails_without_building_a_client() {
        let mut harness = start_engine();
        harness
            .inbound
            .send(task_payload(7, json!("escape")))
            .await
            .unwrap();

        let result = recv(&mut harness.results).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.task_type, TaskKind::Escape);
        assert_eq!(harness.factory.built.load(Ordering::SeqCst), 0);
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_handlers_get_their_own_client() {
        let mut harness = start_engine();
        for task_id in 1..=3 {
            harness
                .inbound
                .send(task_payload(task_id, json!(99)))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            recv(&mut harness.results).await;
        }
        assert_eq!(harness.factory.built.load(Ordering::SeqCst), 3);
        harness.shutdown.cancel();
    }
}
