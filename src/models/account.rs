//! Game account credentials

use serde::{Deserialize, Serialize};

/// Credentials plus target server identifier; immutable and shared read-only
/// across a task's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: String,
    /// Key into the per-server base URL table
    pub server: String,
}
