//! # Action Handlers
//!
//! One handler per task kind, each a thin orchestration over [`GameOps`].
//! Every handler validates that the task carries its own kind and always
//! returns exactly one [`TaskResult`]; no failure path escapes as an error.
//!
//! The kind-to-handler mapping is a closed match: Escape has no handler and
//! dispatching it fails immediately without touching the protocol.

pub mod attack;
pub mod login;
pub mod query_planet;

use async_trait::async_trait;

use crate::models::{Task, TaskKind, TaskResult};
use crate::protocol::GameOps;

pub use attack::{AttackHandler, ExploreHandler};
pub use login::LoginHandler;
pub use query_planet::QueryPlanetHandler;

/// Fixed pause between fleet-dispatch repeats
pub(crate) const REPEAT_PAUSE: std::time::Duration = std::time::Duration::from_secs(1);

/// A kind-specific task orchestration
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The single task kind this handler accepts
    fn kind(&self) -> TaskKind;

    /// Execute the task against the protocol client and produce its result
    async fn handle(&self, task: &Task, client: &mut dyn GameOps) -> TaskResult;
}

/// Handler lookup for a task kind; `None` means the kind is unmapped and the
/// dispatch engine fails the task without invoking the protocol.
pub fn handler_for(kind: TaskKind) -> Option<&'static dyn ActionHandler> {
    static LOGIN: LoginHandler = LoginHandler;
    static ATTACK: AttackHandler = AttackHandler;
    static EXPLORE: ExploreHandler = ExploreHandler;
    static QUERY_PLANET: QueryPlanetHandler = QueryPlanetHandler;

    match kind {
        TaskKind::Login => Some(&LOGIN),
        TaskKind::Attack => Some(&ATTACK),
        TaskKind::Explore => Some(&EXPLORE),
        TaskKind::QueryPlanet => Some(&QUERY_PLANET),
        TaskKind::Escape => None,
    }
}

/// Shared kind guard: a mismatched task is failed without touching the client
pub(crate) fn kind_mismatch(handler_kind: TaskKind, task: &Task) -> Option<TaskResult> {
    if task.task_type == handler_kind {
        return None;
    }
    tracing::error!(
        expected = %handler_kind,
        actual = %task.task_type,
        task_id = task.task_id,
        "Task kind does not match handler"
    );
    Some(TaskResult::failed(
        task.task_id,
        task.task_type,
        task.uuid.clone(),
        format!("task kind {} does not match handler {handler_kind}", task.task_type),
    ))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_is_unmapped() {
        assert!(handler_for(TaskKind::Escape).is_none());
    }

    #[test]
    fn test_mapped_kinds_resolve_to_their_handlers() {
        for kind in [
            TaskKind::Login,
            TaskKind::Attack,
            TaskKind::Explore,
            TaskKind::QueryPlanet,
        ] {
            let handler = handler_for(kind).unwrap();
            assert_eq!(handler.kind(), kind);
        }
    }
}
