//! Login action: authenticate only, no remote effect

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{Task, TaskKind, TaskResult, TaskStatus};
use crate::protocol::GameOps;

use super::{kind_mismatch, ActionHandler};

pub struct LoginHandler;

#[async_trait]
impl ActionHandler for LoginHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Login
    }

    async fn handle(&self, task: &Task, client: &mut dyn GameOps) -> TaskResult {
        if let Some(result) = kind_mismatch(self.kind(), task) {
            return result;
        }

        info!(task_id = task.task_id, username = %task.account.username, "Processing login task");
        let response = client.login().await;
        if response.is_ok() {
            info!(task_id = task.task_id, "Login task succeeded");
            TaskResult::new(task.task_id, TaskStatus::Success, task.task_type, task.uuid.clone())
        } else {
            warn!(task_id = task.task_id, error = %response.err_msg, "Login task failed");
            TaskResult::failed(task.task_id, task.task_type, task.uuid.clone(), response.err_msg)
        }
    }
}
