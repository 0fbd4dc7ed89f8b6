//! Shared test helpers for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use partflow::core::{Context, Pars};
use partflow::device::{Device, DeviceError, DeviceRegistry, DeviceSpec};
use partflow::inspector::{InspectionService, Signal};
use partflow::ledger::{Node, Resource};
use partflow::quality::{Characteristic, CheckMethods, Control, ControlPlan, Limits};
use partflow::storage::MemoryRepository;

/// Gauge that replays a scripted list of readings, configured through
/// the device spec's `values` parameter
pub struct SimGauge {
    script: VecDeque<f64>,
}

impl Device for SimGauge {
    fn execute(&mut self, _command: &str, _pars: &Pars) -> Result<Value, DeviceError> {
        let value = self.script.pop_front().ok_or_else(|| DeviceError::Fault {
            device: "sim_gauge".into(),
            message: "script exhausted".into(),
        })?;
        Ok(json!(value))
    }
}

pub fn sim_gauge_driver(spec: &DeviceSpec) -> Result<Box<dyn Device>, DeviceError> {
    let script = spec
        .pars
        .get("values")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    Ok(Box::new(SimGauge { script }))
}

/// One-cavity station with direct access to its repository
pub struct Station {
    pub service: InspectionService,
    pub repo: Arc<MemoryRepository>,
    pub model: Arc<Resource>,
}

/// Build a running station: one cavity at `cavity-1`, a two-control
/// plan over the `char-a`/`char-b` diameters (limits 1.0..2.0), and a
/// scripted gauge replaying `values`
pub fn station(values: &[f64]) -> Station {
    station_with(values, |plan| plan)
}

/// Like [`station`], with a hook to adjust the plan before loading
pub fn station_with(
    values: &[f64],
    customize: impl FnOnce(ControlPlan) -> ControlPlan,
) -> Station {
    let repo = Arc::new(MemoryRepository::new());

    let cavity = Node::new("cavity-1", "Cavity 1").into_arc();
    let good_bin = Node::new("good-bin", "Good bin").into_arc();
    let operator = Node::new("op-1", "Operator 1")
        .with_role("inspector")
        .into_arc();
    repo.add_node(cavity.clone());
    repo.add_node(good_bin.clone());
    repo.add_node(operator);

    let model = Resource::new("partnumber", "Widget").into_arc();
    repo.add_resource(model.clone());

    let plan = ControlPlan::new("cp-1", "Widget inspection")
        .with_nodes(cavity, good_bin)
        .with_role("inspector")
        .with_resource("partnumber")
        .with_control(measured_control("ctl-1", 10, "char-a"))
        .with_control(measured_control("ctl-2", 20, "char-b"));
    repo.add_plan(Arc::new(customize(plan)));

    let mut registry = DeviceRegistry::new();
    registry.register_driver("sim_gauge", sim_gauge_driver);
    registry
        .load(&[gauge_spec(values)])
        .expect("gauge loads");

    let context = Context::new(
        repo.clone(),
        Arc::new(registry),
        Arc::new(CheckMethods::with_builtins()),
    );
    let mut service = InspectionService::new(context);
    service.start_cavity(1, "cavity-1").expect("cavity starts");

    Station {
        service,
        repo,
        model,
    }
}

pub fn measured_control(key: &str, sequence: u32, characteristic: &str) -> Control {
    let resource = Resource::new(characteristic, "Diameter").into_arc();
    let characteristic = Arc::new(Characteristic::new(resource, Some(Limits::new(1.0, 2.0))));
    let mut control = Control::new(key, sequence, characteristic, "measure_with_device");
    control.pars.set("device", "gauge_1");
    control
}

pub fn gauge_spec(values: &[f64]) -> DeviceSpec {
    DeviceSpec {
        name: "gauge_1".into(),
        model: "sim_gauge".into(),
        location: "cavity-1".into(),
        connected_to: vec![],
        pars: {
            let mut pars = Pars::new();
            pars.set("values", json!(values));
            pars
        },
    }
}

/// Poll a cavity's event log until `count` events of `signal` have
/// been emitted; panics after two seconds
pub fn wait_for_signal(service: &InspectionService, cavity: u32, signal: Signal, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let seen = service
            .events(cavity)
            .expect("cavity exists")
            .iter()
            .filter(|event| event.signal == signal)
            .count();
        if seen >= count {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {count} x {signal:?}"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}
