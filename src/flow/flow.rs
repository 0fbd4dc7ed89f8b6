//! Flow - one execution of a path
//!
//! A flow is a state machine over `open -> started -> {ongoing} ->
//! finished | cancelled`, with the terminal result states `ok`, `nok`
//! and `suspicious` layered on `finished`. Starting and finishing are
//! bookkeeping only; ledger state changes exactly once, inside
//! [`Flow::throw`], after allocation has resolved where stock moves.
//! That split lets a cancelled flow run through the same settlement
//! code path as a successful one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::core::{Uid, UidPrefix};
use crate::flow::Path;
use crate::ledger::item::QTY_EPSILON;
use crate::ledger::{ItemHandle, Node, StockError};

/// Lifecycle states of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    #[default]
    Open,
    Started,
    Ongoing,
    Finished,
    Ok,
    Nok,
    Suspicious,
    Cancelled,
}

impl FlowState {
    /// States from which allocation/settlement may run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Finished
                | FlowState::Ok
                | FlowState::Nok
                | FlowState::Suspicious
                | FlowState::Cancelled
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowState::Open => "open",
            FlowState::Started => "started",
            FlowState::Ongoing => "ongoing",
            FlowState::Finished => "finished",
            FlowState::Ok => "ok",
            FlowState::Nok => "nok",
            FlowState::Suspicious => "suspicious",
            FlowState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Errors raised by the flow lifecycle
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow already started")]
    AlreadyStarted,

    #[error("flow must be finished or cancelled before allocation (state: {state})")]
    AllocateBeforeFinish { state: FlowState },

    #[error("no flow method registered under '{0}'")]
    ComponentNotFound(String),

    #[error(transparent)]
    Stock(#[from] StockError),
}

/// A method bound to a path, invoked with the running flow
pub type FlowMethod = fn(&mut Flow) -> Result<(), FlowError>;

/// Registry mapping method keys to functions, populated at startup
#[derive(Default)]
pub struct FlowMethods {
    map: HashMap<String, FlowMethod>,
}

impl FlowMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, method: FlowMethod) {
        self.map.insert(name.into(), method);
    }

    pub fn get(&self, name: &str) -> Result<FlowMethod, FlowError> {
        self.map
            .get(name)
            .copied()
            .ok_or_else(|| FlowError::ComponentNotFound(name.to_string()))
    }
}

/// One quantity of one item moved by a flow
pub type FlowIo = (ItemHandle, f64);

/// One execution of a path
pub struct Flow {
    pub id: Uid,
    pub path: Option<Arc<Path>>,
    pub responsible: Option<Arc<Node>>,
    pub state: FlowState,
    pub started_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,

    /// Resolved at allocation time, not fixed at creation
    pub origin: Option<Arc<Node>>,
    pub destination: Option<Arc<Node>>,

    /// Declared inputs, consumed at the origin on settlement
    pub inputs: Vec<FlowIo>,

    /// Declared outputs, produced at the destination on settlement
    pub outputs: Vec<FlowIo>,

    /// Child flows mirroring the path tree
    pub children: Vec<Flow>,
}

impl Flow {
    pub fn new(path: Option<Arc<Path>>, responsible: Option<Arc<Node>>) -> Self {
        Self {
            id: Uid::new(UidPrefix::Flow),
            path,
            responsible,
            state: FlowState::Open,
            started_on: None,
            finished_on: None,
            origin: None,
            destination: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Begin execution: clear io buffers, stamp the start time.
    /// May be invoked only once per flow.
    pub fn start(&mut self) -> Result<(), FlowError> {
        if self.state != FlowState::Open {
            return Err(FlowError::AlreadyStarted);
        }
        self.origin = None;
        self.destination = None;
        self.inputs.clear();
        self.outputs.clear();
        self.started_on = Some(Utc::now());
        self.state = FlowState::Started;
        Ok(())
    }

    /// Invoke the path's bound method with this flow as argument.
    /// No-op when the path has no method.
    pub fn execute(&mut self, methods: &FlowMethods) -> Result<(), FlowError> {
        let name = match self.path.as_ref().and_then(|p| p.method_name.clone()) {
            Some(name) => name,
            None => return Ok(()),
        };
        let method = methods.get(&name)?;
        method(self)
    }

    /// Logical completion; does not settle tokens
    pub fn finish(&mut self) {
        if matches!(self.state, FlowState::Started | FlowState::Ongoing) {
            self.state = FlowState::Finished;
            self.finished_on = Some(Utc::now());
        }
    }

    /// Abort; tokens are returned to origin by `close()` later
    pub fn cancel(&mut self) {
        self.finished_on = Some(Utc::now());
        self.state = FlowState::Cancelled;
    }

    /// Create and run one child flow per child path, in sequence order.
    /// Remaining children are skipped once this flow is cancelled; a
    /// failing child cancels the parent.
    pub fn run(&mut self, methods: &FlowMethods) -> Result<(), FlowError> {
        let steps = match self.path.as_ref() {
            Some(path) => path.steps(),
            None => return Ok(()),
        };
        for step in steps {
            if self.state == FlowState::Cancelled {
                break;
            }
            let mut child = Flow::new(Some(step), self.responsible.clone());
            child.start()?;
            let result = child.execute(methods);
            match result {
                Ok(()) => {
                    child.finish();
                    self.children.push(child);
                }
                Err(err) => {
                    child.cancel();
                    self.children.push(child);
                    self.cancel();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Resolve origin and destination, falling back from this flow's
    /// own path to the parent path's nodes. Must be called after
    /// `finish()` or `cancel()`. A cancelled flow collapses its
    /// destination to its origin and force-cancels every child.
    pub fn allocate(
        &mut self,
        fallback_origin: Option<&Arc<Node>>,
        fallback_destination: Option<&Arc<Node>>,
    ) -> Result<(), FlowError> {
        if !self.state.is_terminal() {
            return Err(FlowError::AllocateBeforeFinish { state: self.state });
        }

        if self.origin.is_none() {
            self.origin = self
                .path
                .as_ref()
                .and_then(|p| p.from_node.clone())
                .or_else(|| fallback_origin.cloned());
        }
        if self.destination.is_none() {
            self.destination = self
                .path
                .as_ref()
                .and_then(|p| p.to_node.clone())
                .or_else(|| fallback_destination.cloned());
        }

        if self.state == FlowState::Cancelled {
            self.destination = self.origin.clone();
            for child in &mut self.children {
                child.cancel();
            }
        }

        let child_origin = self
            .path
            .as_ref()
            .and_then(|p| p.from_node.clone())
            .or_else(|| fallback_origin.cloned());
        let child_destination = if self.state == FlowState::Cancelled {
            child_origin.clone()
        } else {
            self.path
                .as_ref()
                .and_then(|p| p.to_node.clone())
                .or_else(|| fallback_destination.cloned())
        };
        for child in &mut self.children {
            child.allocate(child_origin.as_ref(), child_destination.as_ref())?;
        }
        Ok(())
    }

    /// Settle tokens: consume every declared input at the origin,
    /// produce every declared output at the destination, recursing into
    /// children. This is the only point where ledger state changes.
    ///
    /// Settlement is all-or-nothing for the whole flow tree: every
    /// consumption is verified against available stock before anything
    /// is applied, so a shortage anywhere leaves the ledger untouched.
    pub fn throw(&mut self) -> Result<(), FlowError> {
        let mut demands: Vec<(ItemHandle, Arc<Node>, f64)> = Vec::new();
        self.collect_demands(&mut demands);

        let mut totals: HashMap<(Uid, String), f64> = HashMap::new();
        for (item, node, qty) in &demands {
            let id = item.lock().id.clone();
            *totals.entry((id, node.key.clone())).or_insert(0.0) += qty;
        }
        for (item, node, _) in &demands {
            let guard = item.lock();
            let key = (guard.id.clone(), node.key.clone());
            if let Some(&needed) = totals.get(&key) {
                let available = guard.qty_at(&node.key);
                if available <= QTY_EPSILON {
                    return Err(StockError::NoStockAtNode {
                        item: guard.tracking.clone(),
                        node: node.key.clone(),
                    }
                    .into());
                }
                if needed > available + QTY_EPSILON {
                    return Err(StockError::InsufficientStock {
                        item: guard.tracking.clone(),
                        node: node.key.clone(),
                        requested: needed,
                        available,
                    }
                    .into());
                }
            }
        }

        self.apply_throw()?;
        Ok(())
    }

    /// `allocate()` followed by `throw()`
    pub fn close(
        &mut self,
        fallback_origin: Option<&Arc<Node>>,
        fallback_destination: Option<&Arc<Node>>,
    ) -> Result<(), FlowError> {
        self.allocate(fallback_origin, fallback_destination)?;
        self.throw()
    }

    fn collect_demands(&self, demands: &mut Vec<(ItemHandle, Arc<Node>, f64)>) {
        if let Some(origin) = &self.origin {
            for (item, qty) in &self.inputs {
                demands.push((item.clone(), origin.clone(), *qty));
            }
        }
        for child in &self.children {
            child.collect_demands(demands);
        }
    }

    fn apply_throw(&mut self) -> Result<(), FlowError> {
        if let Some(origin) = &self.origin {
            for (item, qty) in &self.inputs {
                item.lock().consume(origin, &self.id, Some(*qty))?;
            }
        }
        if let Some(destination) = &self.destination {
            for (item, qty) in &self.outputs {
                item.lock().produce(destination, &self.id, *qty);
            }
        }
        for child in &mut self.children {
            child.apply_throw()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Item, Resource};

    fn widget_at(node: &Node, qty: f64) -> ItemHandle {
        let resource = Resource::new("pn-1", "Widget").into_arc();
        let mut item = Item::new(resource, "SN1");
        item.produce(node, &Uid::new(UidPrefix::Flow), qty);
        item.into_handle()
    }

    #[test]
    fn test_start_only_once() {
        let mut flow = Flow::new(None, None);
        flow.start().unwrap();
        assert_eq!(flow.state, FlowState::Started);
        assert!(flow.started_on.is_some());
        assert!(matches!(flow.start(), Err(FlowError::AlreadyStarted)));
    }

    #[test]
    fn test_allocate_before_finish_fails() {
        let mut flow = Flow::new(None, None);
        flow.start().unwrap();
        let err = flow.allocate(None, None).unwrap_err();
        assert!(matches!(err, FlowError::AllocateBeforeFinish { .. }));
    }

    #[test]
    fn test_finish_only_from_started_or_ongoing() {
        let mut flow = Flow::new(None, None);
        flow.finish();
        assert_eq!(flow.state, FlowState::Open);

        flow.start().unwrap();
        flow.state = FlowState::Ongoing;
        flow.finish();
        assert_eq!(flow.state, FlowState::Finished);
        assert!(flow.finished_on.is_some());
    }

    #[test]
    fn test_close_moves_stock() {
        let origin = Node::new("in", "In").into_arc();
        let dest = Node::new("out", "Out").into_arc();
        let item = widget_at(&origin, 1.0);

        let mut flow = Flow::new(None, None);
        flow.start().unwrap();
        flow.inputs.push((item.clone(), 1.0));
        flow.outputs.push((item.clone(), 1.0));
        flow.finish();
        flow.close(Some(&origin), Some(&dest)).unwrap();

        let guard = item.lock();
        assert_eq!(guard.qty_at("in"), 0.0);
        assert_eq!(guard.qty_at("out"), 1.0);
        assert_eq!(guard.on_hand(), 1.0);
    }

    #[test]
    fn test_cancelled_flow_returns_stock_to_origin() {
        let origin = Node::new("in", "In").into_arc();
        let dest = Node::new("out", "Out").into_arc();
        let item = widget_at(&origin, 1.0);

        let mut flow = Flow::new(None, None);
        flow.start().unwrap();
        flow.inputs.push((item.clone(), 1.0));
        flow.outputs.push((item.clone(), 1.0));
        flow.cancel();
        flow.close(Some(&origin), Some(&dest)).unwrap();

        let guard = item.lock();
        assert_eq!(guard.qty_at("in"), 1.0);
        assert_eq!(guard.qty_at("out"), 0.0);
    }

    #[test]
    fn test_throw_is_all_or_nothing() {
        let origin = Node::new("in", "In").into_arc();
        let dest = Node::new("out", "Out").into_arc();
        let stocked = widget_at(&origin, 1.0);
        let empty = {
            let resource = Resource::new("pn-2", "Gasket").into_arc();
            Item::new(resource, "SN2").into_handle()
        };

        let mut flow = Flow::new(None, None);
        flow.start().unwrap();
        flow.inputs.push((stocked.clone(), 1.0));
        flow.inputs.push((empty, 1.0));
        flow.finish();

        let err = flow.close(Some(&origin), Some(&dest)).unwrap_err();
        assert!(matches!(err, FlowError::Stock(_)));
        // first input untouched even though it had stock
        assert_eq!(stocked.lock().qty_at("in"), 1.0);
    }

    #[test]
    fn test_run_creates_children_in_sequence_order() {
        fn noop(_: &mut Flow) -> Result<(), FlowError> {
            Ok(())
        }
        let mut methods = FlowMethods::new();
        methods.register("noop", noop);

        let path = Path::new("root", 0)
            .with_child(Path::new("b", 20).with_method("noop"))
            .with_child(Path::new("a", 10).with_method("noop"))
            .into_arc();

        let mut flow = Flow::new(Some(path), None);
        flow.start().unwrap();
        flow.run(&methods).unwrap();

        let keys: Vec<_> = flow
            .children
            .iter()
            .map(|c| c.path.as_ref().map(|p| p.key.clone()).unwrap_or_default())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(flow.children.iter().all(|c| c.state == FlowState::Finished));
    }

    #[test]
    fn test_failing_child_cancels_parent_and_skips_rest() {
        fn boom(_: &mut Flow) -> Result<(), FlowError> {
            Err(FlowError::ComponentNotFound("boom".into()))
        }
        fn noop(_: &mut Flow) -> Result<(), FlowError> {
            Ok(())
        }
        let mut methods = FlowMethods::new();
        methods.register("boom", boom);
        methods.register("noop", noop);

        let path = Path::new("root", 0)
            .with_child(Path::new("first", 10).with_method("boom"))
            .with_child(Path::new("second", 20).with_method("noop"))
            .into_arc();

        let mut flow = Flow::new(Some(path), None);
        flow.start().unwrap();
        assert!(flow.run(&methods).is_err());

        assert_eq!(flow.state, FlowState::Cancelled);
        assert_eq!(flow.children.len(), 1);
        assert_eq!(flow.children[0].state, FlowState::Cancelled);
    }

    #[test]
    fn test_execute_unknown_method_fails() {
        let path = Path::new("step", 0).with_method("missing").into_arc();
        let mut flow = Flow::new(Some(path), None);
        flow.start().unwrap();
        let err = flow.execute(&FlowMethods::new()).unwrap_err();
        assert!(matches!(err, FlowError::ComponentNotFound(_)));
    }

    #[test]
    fn test_execute_without_method_is_noop() {
        let mut flow = Flow::new(None, None);
        flow.start().unwrap();
        flow.execute(&FlowMethods::new()).unwrap();
        assert_eq!(flow.state, FlowState::Started);
    }
}
