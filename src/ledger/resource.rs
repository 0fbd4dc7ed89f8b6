//! Resource - a type descriptor for items
//!
//! Resources describe part models, characteristics, failure modes and
//! device models. They carry immutable identity: items reference them,
//! nothing owns them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::Pars;

/// A type descriptor (part model, characteristic, failure mode, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Stable key, unique across the site
    pub key: String,

    /// Human-readable name
    pub name: String,

    /// Longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Group keys this resource belongs to (e.g. a part family)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Free-form parameters
    #[serde(default, skip_serializing_if = "Pars::is_empty")]
    pub pars: Pars,
}

impl Resource {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            description: None,
            groups: Vec::new(),
            pars: Pars::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Whether this resource is identified by `key` directly or through
    /// one of its groups
    pub fn is_a(&self, key: &str) -> bool {
        self.key == key || self.groups.iter().any(|g| g == key)
    }

    pub fn into_arc(self) -> Arc<Resource> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_a_matches_key_and_groups() {
        let model = Resource::new("partnumber", "Widget PN").with_group("widgets");
        assert!(model.is_a("partnumber"));
        assert!(model.is_a("widgets"));
        assert!(!model.is_a("gaskets"));
    }
}
