//! Fleet composition embedded in attack and explore tasks

use serde::{Deserialize, Serialize};

/// Ship counts keyed by the master service's short names. All fields default
/// to zero so partial compositions deserialize cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fleet {
    /// death star
    #[serde(default)]
    pub ds: u64,
    /// destroyer
    #[serde(default)]
    pub de: u64,
    /// cargo ship
    #[serde(default)]
    pub cargo: u64,
    /// battleship
    #[serde(default)]
    pub bs: u64,
    #[serde(default)]
    pub satellite: u64,
    /// light fighter
    #[serde(default)]
    pub lf: u64,
    /// heavy fighter
    #[serde(default)]
    pub hf: u64,
    /// cruiser
    #[serde(default)]
    pub cr: u64,
    /// dreadnought
    #[serde(default)]
    pub dr: u64,
    /// bomber
    #[serde(default)]
    pub bomb: u64,
    /// guard ship
    #[serde(default)]
    pub guard: u64,
}

impl Fleet {
    /// Protocol request parameters: every ship count keyed by the server's
    /// ship id, zeros included (the server expects the full roster).
    pub fn ship_args(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ship214", self.ds.to_string()),
            ("ship213", self.de.to_string()),
            ("ship203", self.cargo.to_string()),
            ("ship207", self.bs.to_string()),
            ("ship210", self.satellite.to_string()),
            ("ship204", self.lf.to_string()),
            ("ship205", self.hf.to_string()),
            ("ship206", self.cr.to_string()),
            ("ship215", self.dr.to_string()),
            ("ship211", self.bomb.to_string()),
            ("ship216", self.guard.to_string()),
        ]
    }
}
