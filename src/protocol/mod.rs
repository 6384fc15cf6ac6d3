//! # Session Protocol Layer
//!
//! Authenticated HTTP client for the game servers plus the trait seams the
//! dispatch engine and handlers work against:
//!
//! - [`ProtocolClient`]: reqwest-based client with signed form POSTs,
//!   transparent re-login on session expiry, and planet-change retry
//! - [`GameOps`]: the operations handlers invoke, implementable by test
//!   doubles
//! - [`ClientFactory`]: produces one client per task so session state is
//!   never shared across tasks

pub mod client;
pub mod proxy;
pub mod response;
pub mod signing;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Account, Task};

pub use client::{ProtocolClient, ProtocolClientFactory};
pub use proxy::ProxyLease;
pub use response::{ProtocolResponse, SESSION_EXPIRED_CODE};

/// Remote operations available to action handlers.
///
/// One implementor instance serves exactly one task; implementations hold the
/// session state and are therefore `&mut self` throughout.
#[async_trait]
pub trait GameOps: Send {
    /// Authenticate and store session identifiers
    async fn login(&mut self) -> ProtocolResponse;

    /// Switch the active planet; retries with bounded exponential backoff.
    /// `planet_id` 0 keeps the current planet and only refreshes state.
    async fn change_planet(&mut self, planet_id: i64) -> ProtocolResponse;

    /// Dispatch one attack fleet; `data.back_ts` carries the return timestamp
    async fn attack_once(&mut self, task: &Task) -> ProtocolResponse;

    /// Dispatch one exploration fleet
    async fn explore_once(&mut self, task: &Task) -> ProtocolResponse;

    /// Look up the planet-id table for the task's target
    async fn query_planets(&mut self, task: &Task) -> ProtocolResponse;

    /// Release held resources (proxy lease); called once after the handler
    /// finishes
    async fn close(&mut self);
}

/// Produces a protocol client per task
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn client_for(&self, account: &Account) -> Result<Box<dyn GameOps>>;
}
