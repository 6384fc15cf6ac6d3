//! Attack and explore actions
//!
//! Both follow the same shape: login, switch to the task's start planet,
//! then dispatch fleets up to `task.repeat` times with a fixed pause between
//! repeats, tracking the maximum back time seen. A failed repeat never aborts
//! the remaining ones; the task succeeds iff at least one repeat produced a
//! back time.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{Task, TaskKind, TaskResult, TaskStatus};
use crate::protocol::{GameOps, ProtocolResponse};

use super::{kind_mismatch, ActionHandler, REPEAT_PAUSE};

enum FleetOp {
    Attack,
    Explore,
}

/// Login + planet change preamble shared by the fleet handlers; `Err` carries
/// the ready-to-emit failure result.
async fn preamble(
    task: &Task,
    client: &mut dyn GameOps,
) -> std::result::Result<(), TaskResult> {
    let login = client.login().await;
    if !login.is_ok() {
        warn!(task_id = task.task_id, error = %login.err_msg, "Login failed");
        return Err(TaskResult::failed(
            task.task_id,
            task.task_type,
            task.uuid.clone(),
            login.err_msg,
        ));
    }

    let change = client.change_planet(task.start_planet_id).await;
    if !change.is_ok() {
        warn!(
            task_id = task.task_id,
            planet_id = task.start_planet_id,
            error = %change.err_msg,
            "Planet change failed"
        );
        return Err(TaskResult::failed(
            task.task_id,
            task.task_type,
            task.uuid.clone(),
            change.err_msg,
        ));
    }
    Ok(())
}

async fn run_fleet_task(op: FleetOp, task: &Task, client: &mut dyn GameOps) -> TaskResult {
    if let Err(result) = preamble(task, client).await {
        return result;
    }

    let mut back_ts: i64 = -1;
    let mut last_err = String::new();
    for attempt in 1..=task.repeat {
        info!(
            task_id = task.task_id,
            attempt,
            repeat = task.repeat,
            "Dispatching fleet"
        );
        let response: ProtocolResponse = match op {
            FleetOp::Attack => client.attack_once(task).await,
            FleetOp::Explore => client.explore_once(task).await,
        };
        if response.is_ok() {
            let ts = response
                .data
                .get("back_ts")
                .and_then(|v| v.as_i64())
                .unwrap_or(-1);
            back_ts = back_ts.max(ts);
        } else {
            warn!(
                task_id = task.task_id,
                attempt,
                error = %response.err_msg,
                "Fleet dispatch attempt failed"
            );
            last_err = response.err_msg;
        }
        if attempt < task.repeat {
            tokio::time::sleep(REPEAT_PAUSE).await;
        }
    }

    let mut result = if back_ts >= 0 {
        info!(task_id = task.task_id, back_ts, "Fleet task completed");
        TaskResult::new(task.task_id, TaskStatus::Success, task.task_type, task.uuid.clone())
    } else {
        warn!(task_id = task.task_id, "No fleet dispatch succeeded");
        TaskResult::failed(
            task.task_id,
            task.task_type,
            task.uuid.clone(),
            if last_err.is_empty() {
                "no successful fleet dispatch".to_string()
            } else {
                last_err
            },
        )
    };
    result.back_ts = back_ts;
    result
}

pub struct AttackHandler;

#[async_trait]
impl ActionHandler for AttackHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Attack
    }

    async fn handle(&self, task: &Task, client: &mut dyn GameOps) -> TaskResult {
        if let Some(result) = kind_mismatch(self.kind(), task) {
            return result;
        }
        info!(task_id = task.task_id, "Processing attack task");
        run_fleet_task(FleetOp::Attack, task, client).await
    }
}

pub struct ExploreHandler;

#[async_trait]
impl ActionHandler for ExploreHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Explore
    }

    async fn handle(&self, task: &Task, client: &mut dyn GameOps) -> TaskResult {
        if let Some(result) = kind_mismatch(self.kind(), task) {
            return result;
        }
        info!(task_id = task.task_id, "Processing explore task");
        run_fleet_task(FleetOp::Explore, task, client).await
    }
}
