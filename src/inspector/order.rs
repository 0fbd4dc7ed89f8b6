//! Work orders queued onto cavities

use serde::{Deserialize, Serialize};

use crate::core::Pars;

/// Identification of one unit presented for inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    /// Part model resource key
    pub model: String,

    pub serial: String,

    #[serde(default)]
    pub pars: Pars,
}

impl PartInfo {
    pub fn new(model: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            serial: serial.into(),
            pars: Pars::new(),
        }
    }
}

/// One queued inspection request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub part: PartInfo,

    /// Key of the node responsible for the run
    pub responsible: String,
}
