//! Path - a reusable plan for flows
//!
//! A path names where a flow takes stock from and where it leaves it,
//! which role may run it, which method it executes and which resources
//! it accepts. Paths form a tree with a stable sequence order among
//! siblings; each child is one step of the parent.

use std::sync::Arc;

use crate::core::Pars;
use crate::ledger::{Node, Resource};

/// A reusable plan: one execution of it is a [`Flow`](crate::flow::Flow)
#[derive(Debug, Clone)]
pub struct Path {
    /// Stable key
    pub key: String,

    /// Order among siblings
    pub sequence: u32,

    /// Node stock is consumed from, when the flow does not set its own
    pub from_node: Option<Arc<Node>>,

    /// Node stock is produced at, when the flow does not set its own
    pub to_node: Option<Arc<Node>>,

    /// Role the responsible node must hold
    pub role: Option<String>,

    /// Key of the method bound to this path, looked up in a registry
    pub method_name: Option<String>,

    /// Resource or group keys accepted as input
    pub inputs: Vec<String>,

    /// Resource or group keys declared as output
    pub outputs: Vec<String>,

    /// Free-form parameters
    pub pars: Pars,

    /// Child steps, run in sequence order
    pub children: Vec<Arc<Path>>,
}

impl Path {
    pub fn new(key: impl Into<String>, sequence: u32) -> Self {
        Self {
            key: key.into(),
            sequence,
            from_node: None,
            to_node: None,
            role: None,
            method_name: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            pars: Pars::new(),
            children: Vec::new(),
        }
    }

    pub fn with_nodes(mut self, from: Arc<Node>, to: Arc<Node>) -> Self {
        self.from_node = Some(from);
        self.to_node = Some(to);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method_name = Some(method.into());
        self
    }

    pub fn with_child(mut self, child: Path) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    /// Whether this path accepts the given resource as input
    pub fn accepts(&self, resource: &Resource) -> bool {
        self.inputs.iter().any(|key| resource.is_a(key))
    }

    /// Children sorted by sequence
    pub fn steps(&self) -> Vec<Arc<Path>> {
        let mut steps = self.children.clone();
        steps.sort_by_key(|p| p.sequence);
        steps
    }

    pub fn into_arc(self) -> Arc<Path> {
        Arc::new(self)
    }
}
