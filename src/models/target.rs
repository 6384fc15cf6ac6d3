//! Universe coordinates for a task's source or destination

use serde::{Deserialize, Serialize};

/// A position in the universe. `is_moon` distinguishes a planet from its
/// moon at the same coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub galaxy: i64,
    pub system: i64,
    pub planet: i64,
    #[serde(default)]
    pub is_moon: bool,
}

impl Target {
    /// Structured key used by the bidirectional planet-id table,
    /// `"galaxy:system:planet:moonflag"`.
    pub fn position_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.galaxy,
            self.system,
            self.planet,
            u8::from(self.is_moon)
        )
    }
}
