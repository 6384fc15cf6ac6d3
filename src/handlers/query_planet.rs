//! Query-planet action: resolve the planet-id table for a target
//!
//! Unlike the fleet actions the payload of interest is the lookup result
//! itself, carried serialized in the result's `msg` field; there is no back
//! time.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{Task, TaskKind, TaskResult, TaskStatus};
use crate::protocol::GameOps;

use super::{kind_mismatch, ActionHandler};

pub struct QueryPlanetHandler;

#[async_trait]
impl ActionHandler for QueryPlanetHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::QueryPlanet
    }

    async fn handle(&self, task: &Task, client: &mut dyn GameOps) -> TaskResult {
        if let Some(result) = kind_mismatch(self.kind(), task) {
            return result;
        }

        info!(task_id = task.task_id, "Processing query-planet task");
        let mut result =
            TaskResult::new(task.task_id, TaskStatus::Success, task.task_type, task.uuid.clone());
        result.back_ts = -1;

        let login = client.login().await;
        if !login.is_ok() {
            warn!(task_id = task.task_id, error = %login.err_msg, "Login failed");
            result.status = TaskStatus::Failed;
            result.err_msg = login.err_msg;
            return result;
        }

        let query = client.query_planets(task).await;
        if !query.is_ok() {
            warn!(task_id = task.task_id, error = %query.err_msg, "Planet query failed");
            result.status = TaskStatus::Failed;
            result.err_msg = query.err_msg.clone();
        }
        result.msg = query.data.to_string();
        result
    }
}
