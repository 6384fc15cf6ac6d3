//! # Wire Data Model
//!
//! Task and result types exchanged with the broker, plus the account, fleet,
//! and target shapes embedded in tasks. Enum fields are emitted as their
//! underlying scalar wire values, matching what the master service produces
//! and consumes.

pub mod account;
pub mod fleet;
pub mod target;
pub mod task;

pub use account::Account;
pub use fleet::Fleet;
pub use target::Target;
pub use task::{MissionType, Task, TaskKind, TaskResult, TaskStatus};
