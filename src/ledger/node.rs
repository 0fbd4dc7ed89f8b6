//! Node - a place that can hold token quantities
//!
//! A node may be a physical location, a person or a role. Nodes form an
//! optional hierarchy (parcels of a site) through the parent key.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::Pars;

/// A place (location, person, role) that can hold stock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable key, unique across the site
    pub key: String,

    /// Human-readable name
    pub name: String,

    /// Role key this node holds (for persons/workstations)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Parent node key, when this node is a parcel of a larger one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Free-form parameters
    #[serde(default, skip_serializing_if = "Pars::is_empty")]
    pub pars: Pars,
}

impl Node {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            role: None,
            parent: None,
            pars: Pars::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Whether this node holds the given role key
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }

    pub fn into_arc(self) -> Arc<Node> {
        Arc::new(self)
    }
}
