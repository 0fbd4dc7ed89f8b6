//! Control plans - inspection recipes per part model and location
//!
//! A control plan is the quality specialization of a path: it says
//! which part models it applies to, which role may run it, where units
//! come from and go to, and which controls are checked, in which order.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

use crate::core::Pars;
use crate::device::DeviceMap;
use crate::ledger::{Node, Resource};
use crate::quality::test::Test;
use crate::quality::{Characteristic, PartHandle};
use crate::sampling::Sampling;

/// Errors raised validating a plan against a responsible and a part
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("responsible '{responsible}' does not hold role '{role}'")]
    NotAuthorizedResponsible { responsible: String, role: String },

    #[error("part model '{model}' is not accepted by plan '{plan}'")]
    NoCompatibleItem { model: String, plan: String },
}

/// One inspection step of a control plan
pub struct Control {
    /// Stable key, unique within the plan
    pub key: String,

    /// Order within the plan
    pub sequence: u32,

    pub characteristic: Arc<Characteristic>,

    /// Check method key, looked up in the check method registry
    pub method_name: String,

    /// Whether a defect on this control stops the remaining sequence
    pub stop_on_defect: bool,

    /// Sampling counters are scoped to this control and persist
    /// across tests
    pub sampling: Mutex<Sampling>,

    pub pars: Pars,
}

impl Control {
    pub fn new(
        key: impl Into<String>,
        sequence: u32,
        characteristic: Arc<Characteristic>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            sequence,
            characteristic,
            method_name: method_name.into(),
            stop_on_defect: false,
            sampling: Mutex::new(Sampling::default()),
            pars: Pars::new(),
        }
    }

    pub fn with_sampling(self, sampling: Sampling) -> Self {
        *self.sampling.lock() = sampling;
        self
    }

    pub fn with_stop_on_defect(mut self) -> Self {
        self.stop_on_defect = true;
        self
    }

    /// Consult the sampling policy for one arriving unit
    pub fn order_check(&self) -> bool {
        self.sampling.lock().count()
    }
}

/// The applicable inspection recipe for (part model, location)
pub struct ControlPlan {
    pub key: String,
    pub name: String,

    /// Node units are pulled from (the station)
    pub from_node: Option<Arc<Node>>,

    /// Node units progress to when they pass
    pub to_node: Option<Arc<Node>>,

    /// Role the responsible node must hold
    pub role: Option<String>,

    /// Resource or group keys this plan accepts
    pub resources: Vec<String>,

    /// Controls in plan order
    pub controls: Vec<Arc<Control>>,

    pub pars: Pars,
}

impl ControlPlan {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            from_node: None,
            to_node: None,
            role: None,
            resources: Vec::new(),
            controls: Vec::new(),
            pars: Pars::new(),
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

    pub fn with_resource(mut self, key: impl Into<String>) -> Self {
        self.resources.push(key.into());
        self
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(Arc::new(control));
        self
    }

    /// Whether this plan accepts the given part model, directly or
    /// through one of its groups
    pub fn accepts(&self, model: &Resource) -> bool {
        self.resources.iter().any(|key| model.is_a(key))
    }

    /// Whether the responsible node holds the plan's required role
    pub fn authorizes(&self, responsible: &Node) -> bool {
        match &self.role {
            Some(role) => responsible.has_role(role),
            None => true,
        }
    }

    /// Controls sorted by sequence
    pub fn steps(&self) -> Vec<Arc<Control>> {
        let mut steps = self.controls.clone();
        steps.sort_by_key(|c| c.sequence);
        steps
    }

    /// Validate responsible and part, then produce a test run of this
    /// plan against the station's shared device set
    pub fn create_test(
        self: &Arc<Self>,
        responsible: &Arc<Node>,
        part: &PartHandle,
        devices: DeviceMap,
    ) -> Result<Test, PlanError> {
        if !self.authorizes(responsible) {
            return Err(PlanError::NotAuthorizedResponsible {
                responsible: responsible.key.clone(),
                role: self.role.clone().unwrap_or_default(),
            });
        }
        let model = part.lock().model();
        if !self.accepts(&model) {
            return Err(PlanError::NoCompatibleItem {
                model: model.key.clone(),
                plan: self.key.clone(),
            });
        }
        Ok(Test::new(
            self.clone(),
            responsible.clone(),
            part.clone(),
            devices,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Uid, UidPrefix};
    use crate::quality::{Limits, Part};
    use std::collections::HashMap;

    fn fixture() -> (Arc<ControlPlan>, Arc<Node>, PartHandle) {
        let characteristic = Arc::new(Characteristic::new(
            Resource::new("char", "Diameter").into_arc(),
            Some(Limits::new(1.0, 2.0)),
        ));
        let plan = Arc::new(
            ControlPlan::new("cp-1", "Widget inspection")
                .with_role("inspector")
                .with_resource("partnumber")
                .with_control(Control::new("ctl-1", 10, characteristic, "measure")),
        );
        let responsible = Node::new("op-1", "Operator 1")
            .with_role("inspector")
            .into_arc();
        let model = Resource::new("partnumber", "Widget").into_arc();
        let location = Node::new("cavity-1", "Cavity 1");
        let part =
            Part::new(model, "SN001", &location, &Uid::new(UidPrefix::Flow)).into_handle();
        (plan, responsible, part)
    }

    fn no_devices() -> DeviceMap {
        Arc::new(HashMap::new())
    }

    #[test]
    fn test_create_test_validates_role() {
        let (plan, _, part) = fixture();
        let stranger = Node::new("op-2", "Operator 2").into_arc();
        let err = plan.create_test(&stranger, &part, no_devices()).unwrap_err();
        assert!(matches!(err, PlanError::NotAuthorizedResponsible { .. }));
    }

    #[test]
    fn test_create_test_validates_part_model() {
        let (plan, responsible, _) = fixture();
        let other = Resource::new("othernumber", "Other").into_arc();
        let location = Node::new("cavity-1", "Cavity 1");
        let part =
            Part::new(other, "SN002", &location, &Uid::new(UidPrefix::Flow)).into_handle();
        let err = plan
            .create_test(&responsible, &part, no_devices())
            .unwrap_err();
        assert!(matches!(err, PlanError::NoCompatibleItem { .. }));
    }

    #[test]
    fn test_create_test_accepts_group_membership() {
        let (_, responsible, _) = fixture();
        let plan = Arc::new(
            ControlPlan::new("cp-2", "Family inspection")
                .with_role("inspector")
                .with_resource("widgets"),
        );
        let model = Resource::new("pn-77", "Widget 77")
            .with_group("widgets")
            .into_arc();
        let location = Node::new("cavity-1", "Cavity 1");
        let part =
            Part::new(model, "SN003", &location, &Uid::new(UidPrefix::Flow)).into_handle();
        assert!(plan.create_test(&responsible, &part, no_devices()).is_ok());
    }

    #[test]
    fn test_steps_sorted_by_sequence() {
        let characteristic = Arc::new(Characteristic::new(
            Resource::new("char", "Diameter").into_arc(),
            None,
        ));
        let plan = ControlPlan::new("cp-3", "Ordered")
            .with_control(Control::new("late", 20, characteristic.clone(), "measure"))
            .with_control(Control::new("early", 10, characteristic, "measure"));
        let keys: Vec<_> = plan.steps().iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, vec!["early", "late"]);
    }
}
