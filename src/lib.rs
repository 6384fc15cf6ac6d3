//! # galaxy-node
//!
//! Queue-driven task execution worker for a browser-game automation fleet.
//! The worker consumes task payloads from RabbitMQ, executes each one against
//! the game's session-authenticated HTTP protocol through a bounded pool of
//! concurrent handlers, and publishes exactly one result per task back to the
//! broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON    ┌─────────────────┐  permit   ┌─────────────────┐
//! │ TaskConsumer │ ────────► │ DispatchEngine  │ ────────► │ ActionHandler   │
//! │ (broker)     │           │ (bounded pool)  │           │ + ProtocolClient│
//! └──────────────┘           └─────────────────┘           └────────┬────────┘
//!                                                                   │ TaskResult
//!                            ┌─────────────────┐                    │
//!                            │ ResultPublisher │ ◄──────────────────┘
//!                            │ (broker)        │
//!                            └─────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`broker`]: self-healing RabbitMQ consumer and publisher
//! - [`dispatch`]: bounded-concurrency task dispatch with per-task isolation
//! - [`protocol`]: signed, session-authenticated HTTP game client
//! - [`handlers`]: per-kind task orchestration (login, attack, explore, query)
//! - [`models`]: task, account, fleet, and result wire types
//! - [`config`]: environment-driven worker configuration
//! - [`worker`]: runtime wiring and graceful shutdown

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod worker;

pub use error::{Result, WorkerError};
pub use worker::Worker;
