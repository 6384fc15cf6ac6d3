//! Task and result types
//!
//! `TaskKind` and `TaskStatus` use hand-written serde impls because the wire
//! format encodes them as their scalar values: numeric codes for the kinds
//! the game protocol numbers (1 attack, 4 explore, 99 login) and strings for
//! the rest.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Account, Fleet, Target};

/// Discriminator selecting which action handler processes a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Login,
    Attack,
    Explore,
    QueryPlanet,
    Escape,
}

impl TaskKind {
    /// Best-effort decode from a raw JSON value, used when salvaging fields
    /// from an unparseable payload.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_u64().and_then(Self::from_code),
            serde_json::Value::String(s) => match s.as_str() {
                "escape" => Some(Self::Escape),
                "query_planet" => Some(Self::QueryPlanet),
                _ => s.parse::<u64>().ok().and_then(Self::from_code),
            },
            _ => None,
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Attack),
            4 => Some(Self::Explore),
            99 => Some(Self::Login),
            _ => None,
        }
    }

    /// Numeric wire code, for the kinds the protocol numbers
    pub fn code(&self) -> Option<u64> {
        match self {
            Self::Attack => Some(1),
            Self::Explore => Some(4),
            Self::Login => Some(99),
            Self::QueryPlanet | Self::Escape => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Login => "login",
            Self::Attack => "attack",
            Self::Explore => "explore",
            Self::QueryPlanet => "query_planet",
            Self::Escape => "escape",
        };
        write!(f, "{name}")
    }
}

impl Serialize for TaskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Attack => serializer.serialize_u64(1),
            Self::Explore => serializer.serialize_u64(4),
            Self::Login => serializer.serialize_u64(99),
            Self::Escape => serializer.serialize_str("escape"),
            Self::QueryPlanet => serializer.serialize_str("query_planet"),
        }
    }
}

struct TaskKindVisitor;

impl Visitor<'_> for TaskKindVisitor {
    type Value = TaskKind;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a task kind code (1, 4, 99) or name (\"escape\", \"query_planet\")")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TaskKind, E> {
        TaskKind::from_code(v).ok_or_else(|| E::custom(format!("unknown task kind code: {v}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TaskKind, E> {
        u64::try_from(v)
            .ok()
            .and_then(TaskKind::from_code)
            .ok_or_else(|| E::custom(format!("unknown task kind code: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TaskKind, E> {
        match v {
            "escape" => Ok(TaskKind::Escape),
            "query_planet" => Ok(TaskKind::QueryPlanet),
            _ => Err(E::custom(format!("unknown task kind: {v}"))),
        }
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TaskKindVisitor)
    }
}

/// Protocol-side mission codes for fleet dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionType {
    Attack,
    Explore,
}

impl MissionType {
    pub fn code(&self) -> u64 {
        match self {
            Self::Attack => 1,
            Self::Explore => 15,
        }
    }

    /// Mission for a task kind; only attack and explore dispatch fleets
    pub fn for_kind(kind: TaskKind) -> Option<Self> {
        match kind {
            TaskKind::Attack => Some(Self::Attack),
            TaskKind::Explore => Some(Self::Explore),
            _ => None,
        }
    }
}

/// Task outcome status, emitted as its integer wire value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    fn code(&self) -> u64 {
        match self {
            Self::Running => 0,
            Self::Success => 1,
            Self::Failed => 2,
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.code())
    }
}

struct TaskStatusVisitor;

impl Visitor<'_> for TaskStatusVisitor {
    type Value = TaskStatus;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a task status code (0, 1, 2)")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TaskStatus, E> {
        match v {
            0 => Ok(TaskStatus::Running),
            1 => Ok(TaskStatus::Success),
            2 => Ok(TaskStatus::Failed),
            _ => Err(E::custom(format!("unknown task status code: {v}"))),
        }
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TaskStatus, E> {
        u64::try_from(v)
            .map_err(|_| E::custom(format!("unknown task status code: {v}")))
            .and_then(|v| self.visit_u64(v))
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TaskStatusVisitor)
    }
}

fn default_repeat() -> u32 {
    1
}

/// A unit of work pulled from the task queue. Immutable once dispatched;
/// owned exclusively by the handler executing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    /// Correlation id carried through to the result
    pub uuid: String,
    pub task_type: TaskKind,
    pub account: Account,
    pub fleet: Fleet,
    /// Repeat count; only meaningful for attack and explore tasks
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    pub target: Target,
    /// Planet to switch to before dispatching fleets; 0 keeps the current one
    #[serde(default)]
    pub start_planet_id: i64,
}

/// Outcome of one task, produced exactly once per dispatched task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: i64,
    pub status: TaskStatus,
    pub task_type: TaskKind,
    pub uuid: String,
    /// Server-reported completion timestamp of the remote effect; -1 when none
    #[serde(default)]
    pub back_ts: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub err_msg: String,
}

impl TaskResult {
    pub fn new(task_id: i64, status: TaskStatus, task_type: TaskKind, uuid: String) -> Self {
        Self {
            task_id,
            status,
            task_type,
            uuid,
            back_ts: 0,
            msg: String::new(),
            err_msg: String::new(),
        }
    }

    pub fn failed(
        task_id: i64,
        task_type: TaskKind,
        uuid: String,
        err_msg: impl Into<String>,
    ) -> Self {
        Self {
            err_msg: err_msg.into(),
            ..Self::new(task_id, TaskStatus::Failed, task_type, uuid)
        }
    }
}
