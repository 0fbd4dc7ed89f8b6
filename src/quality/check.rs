//! Check - one execution of a control against a part
//!
//! A check runs one control's bound method, records measurements and
//! defects onto the part, and settles into `ok`, `nok`, `suspicious` or
//! `cancelled`. Long-running methods hand back a background task; the
//! check then blocks the cavity worker until the task completes or the
//! check is cancelled.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use thiserror::Error;

use crate::core::{CancelToken, Pars, Uid, UidPrefix};
use crate::device::{DeviceError, DeviceMap, DeviceProxy};
use crate::flow::{Flow, FlowError, FlowState};
use crate::inspector::events::{EventSink, FeedbackSlot, Signal};
use crate::ledger::Node;
use crate::quality::{Control, PartHandle, QualityError};
use std::sync::Arc;

/// Errors raised during check execution
#[derive(Debug, Error)]
pub enum CheckError {
    /// Control-flow sentinel, not a failure: a defect was recorded on a
    /// stop-on-defect control, so the remaining sequence is skipped and
    /// the test closes normally
    #[error("defect found, stopping control sequence")]
    DefectFound,

    #[error("no check method registered under '{0}'")]
    ComponentNotFound(String),

    #[error("check method requires parameter '{0}'")]
    MissingParameter(String),

    #[error("no operator feedback channel available")]
    FeedbackUnavailable,

    #[error("background check worker panicked")]
    WorkerPanicked,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// One value read by a background measurement worker
#[derive(Debug, Clone)]
pub struct Reading {
    pub value: f64,
    pub element: Option<String>,
}

/// A cancellable background measurement
///
/// The worker owns its own thread and reports completion or
/// cancellation through the token; the check blocks on the token, not
/// on the thread handle.
pub struct CheckTask {
    pub token: CancelToken,
    handle: JoinHandle<Result<Vec<Reading>, CheckError>>,
}

impl CheckTask {
    /// Spawn a background worker. The worker should poll
    /// `token.is_cancelled()` between units of work and return the
    /// readings gathered so far when asked to stop.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<Vec<Reading>, CheckError> + Send + 'static,
    {
        let token = CancelToken::new();
        let worker_token = token.clone();
        let handle = thread::spawn(move || {
            let result = work(&worker_token);
            worker_token.complete();
            result
        });
        Self { token, handle }
    }
}

/// Result of one check method invocation
pub enum MethodOutcome {
    /// The method ran to completion synchronously
    Done,

    /// The method spawned a background worker; the check goes
    /// `ongoing` and blocks until the task settles
    Background(CheckTask),
}

/// A check method bound to a control
pub type CheckMethod = fn(&mut Check, &CheckEnv) -> Result<MethodOutcome, CheckError>;

/// Registry mapping check method keys to functions
pub struct CheckMethods {
    map: HashMap<String, CheckMethod>,
}

impl Default for CheckMethods {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CheckMethods {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in device methods
    pub fn with_builtins() -> Self {
        let mut methods = Self::new();
        methods.register("measure_with_device", measure_with_device);
        methods.register("observe_with_device", observe_with_device);
        methods.register("visual_check", visual_check);
        methods
    }

    pub fn register(&mut self, name: impl Into<String>, method: CheckMethod) {
        self.map.insert(name.into(), method);
    }

    pub fn get(&self, name: &str) -> Result<CheckMethod, CheckError> {
        self.map
            .get(name)
            .copied()
            .ok_or_else(|| CheckError::ComponentNotFound(name.to_string()))
    }
}

/// Everything a check needs from its surroundings while running
pub struct CheckEnv<'a> {
    pub methods: &'a CheckMethods,

    /// The station's shared device set
    pub devices: DeviceMap,

    pub observer: &'a dyn EventSink,

    /// Operator confirmation channel, when the cavity has one
    pub feedback: Option<&'a FeedbackSlot>,

    /// Slot where the in-flight background token is published so the
    /// controller can cancel it from outside
    pub active: Option<&'a Mutex<Option<CancelToken>>>,
}

impl CheckEnv<'_> {
    pub fn device(&self, name: &str) -> Result<DeviceProxy, CheckError> {
        self.devices
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::ComponentNotFound(name.to_string()).into())
    }
}

/// One execution of a control against one part
pub struct Check {
    pub flow: Flow,
    pub control: Arc<Control>,
    pub part: PartHandle,

    /// `{part.tracking}*{control.key}`, optionally `*{element}`; keys
    /// repeated executions onto the same record
    pub tracking: String,

    /// Tracking keys of the measurements this check recorded
    pub measurements: Vec<String>,

    /// Tracking keys of the defects this check recorded
    pub defects: Vec<String>,
}

impl Check {
    pub fn new(control: Arc<Control>, part: PartHandle) -> Self {
        let element = control.pars.get_str("element").map(str::to_owned);
        let tracking = crate::quality::part::compose_tracking(
            &part.lock().tracking(),
            &control.key,
            element.as_deref(),
        );
        let mut flow = Flow::new(None, None);
        flow.id = Uid::new(UidPrefix::Check);
        Self {
            flow,
            control,
            part,
            tracking,
            measurements: Vec::new(),
            defects: Vec::new(),
        }
    }

    pub fn state(&self) -> FlowState {
        self.flow.state
    }

    /// Drive the control's method to completion, notifying the
    /// observer on every state change
    pub fn run(&mut self, env: &CheckEnv) -> Result<(), CheckError> {
        self.flow.start()?;
        env.observer.emit(Signal::CheckStarted, &self.tracking);

        let method = env.methods.get(&self.control.method_name)?;
        match method(self, env) {
            Ok(MethodOutcome::Done) => {
                self.conclude();
                env.observer.emit(Signal::CheckFinished, &self.tracking);
                Ok(())
            }
            Ok(MethodOutcome::Background(task)) => self.await_task(task, env),
            Err(CheckError::DefectFound) => {
                // intended early termination, not a crash
                self.conclude();
                env.observer.emit(Signal::CheckFinished, &self.tracking);
                Err(CheckError::DefectFound)
            }
            Err(err) => {
                self.flow.cancel();
                env.observer.emit(Signal::CheckCancelled, &self.tracking);
                Err(err)
            }
        }
    }

    fn await_task(&mut self, task: CheckTask, env: &CheckEnv) -> Result<(), CheckError> {
        self.flow.state = FlowState::Ongoing;
        env.observer.emit(Signal::CheckOngoing, &self.tracking);

        if let Some(active) = env.active {
            *active.lock() = Some(task.token.clone());
        }
        task.token.wait();
        if let Some(active) = env.active {
            *active.lock() = None;
        }

        let cancelled = task.token.is_cancelled();
        let readings = match task.handle.join() {
            Ok(Ok(readings)) => readings,
            Ok(Err(err)) => {
                self.flow.cancel();
                env.observer.emit(Signal::CheckCancelled, &self.tracking);
                return Err(err);
            }
            Err(_) => {
                self.flow.cancel();
                env.observer.emit(Signal::CheckCancelled, &self.tracking);
                return Err(CheckError::WorkerPanicked);
            }
        };

        // readings gathered before a cancellation are kept
        let mut defect_found = false;
        for reading in readings {
            match self.add_measure(reading.value, reading.element.as_deref()) {
                Ok(()) => {}
                Err(CheckError::DefectFound) => defect_found = true,
                Err(err) => return Err(err),
            }
        }

        if cancelled {
            self.flow.cancel();
            env.observer.emit(Signal::CheckCancelled, &self.tracking);
            return Ok(());
        }

        self.conclude();
        env.observer.emit(Signal::CheckFinished, &self.tracking);
        if defect_found {
            Err(CheckError::DefectFound)
        } else {
            Ok(())
        }
    }

    /// Record a measured value for the control's characteristic.
    /// An out-of-limits value also records a defect (`hi`/`lo`), marks
    /// the check `nok` and, on a stop-on-defect control, raises the
    /// [`CheckError::DefectFound`] sentinel.
    pub fn add_measure(&mut self, value: f64, element: Option<&str>) -> Result<(), CheckError> {
        let characteristic = self.control.characteristic.clone();
        let mode = characteristic.classify(value);

        let mut part = self.part.lock();
        let measure_tracking = part.record_measure(&characteristic, value, element);
        if !self.measurements.contains(&measure_tracking) {
            self.measurements.push(measure_tracking.clone());
        }

        if let Some(mode) = mode {
            let failure = characteristic.failure_mode(mode);
            let defect_tracking = part.record_defect(&failure, 1.0, element);
            part.link_measure_defect(&measure_tracking, &defect_tracking);
            if !self.defects.contains(&defect_tracking) {
                self.defects.push(defect_tracking.clone());
            }
            self.flow.state = FlowState::Nok;
            if self.control.stop_on_defect {
                return Err(CheckError::DefectFound);
            }
        }
        Ok(())
    }

    /// Record a defect directly, without a measurement
    pub fn add_defect(
        &mut self,
        mode: &str,
        element: Option<&str>,
        qty: f64,
    ) -> Result<(), CheckError> {
        let failure = self.control.characteristic.failure_mode(mode);
        let defect_tracking = self.part.lock().record_defect(&failure, qty, element);
        if !self.defects.contains(&defect_tracking) {
            self.defects.push(defect_tracking);
        }
        self.flow.state = FlowState::Nok;
        if self.control.stop_on_defect {
            return Err(CheckError::DefectFound);
        }
        Ok(())
    }

    /// Flag the result as suspicious without recording a defect
    pub fn mark_suspicious(&mut self) {
        if !matches!(self.flow.state, FlowState::Nok | FlowState::Cancelled) {
            self.flow.state = FlowState::Suspicious;
        }
    }

    pub fn cancel(&mut self) {
        self.flow.cancel();
    }

    /// Settle this check's measurement/defect tokens at `node`;
    /// called by the owning test's settlement. Stock recorded by an
    /// earlier test is withdrawn first, so each record holds exactly
    /// one quantity, wherever its part currently sits.
    pub(crate) fn settle(&mut self, node: &Node) {
        let mut part = self.part.lock();
        for tracking in &self.measurements {
            if let Some(measure) = part
                .measurements
                .iter_mut()
                .find(|m| &m.item.tracking == tracking)
            {
                measure.item.withdraw(&self.flow.id);
                measure.item.produce(node, &self.flow.id, 1.0);
            }
        }
        for tracking in &self.defects {
            if let Some(defect) = part
                .defects
                .iter_mut()
                .find(|d| &d.item.tracking == tracking)
            {
                let qty = defect.qty;
                defect.item.withdraw(&self.flow.id);
                defect.item.produce(node, &self.flow.id, qty);
            }
        }
    }

    fn conclude(&mut self) {
        self.flow.finish();
        if self.flow.state == FlowState::Finished {
            // not marked nok/suspicious along the way
            self.flow.state = FlowState::Ok;
        }
        if self.flow.finished_on.is_none() {
            self.flow.finished_on = Some(Utc::now());
        }
    }
}

/// Built-in: one synchronous reading from a device named in the
/// control's pars (`device`, optional `command`, optional `element`)
fn measure_with_device(check: &mut Check, env: &CheckEnv) -> Result<MethodOutcome, CheckError> {
    let pars = check.control.pars.clone();
    let device_name = pars
        .get_str("device")
        .ok_or_else(|| CheckError::MissingParameter("device".into()))?;
    let command = pars.get_str("command").unwrap_or("measure");
    let element = pars.get_str("element").map(str::to_owned);

    let device = env.device(device_name)?;
    let value = device.read_value(command, &pars)?;
    check.add_measure(value, element.as_deref())?;
    Ok(MethodOutcome::Done)
}

/// Built-in: repeated readings from a background worker (`device`,
/// optional `command`, `samples`, `period_ms`)
fn observe_with_device(check: &mut Check, env: &CheckEnv) -> Result<MethodOutcome, CheckError> {
    let pars = check.control.pars.clone();
    let device_name = pars
        .get_str("device")
        .ok_or_else(|| CheckError::MissingParameter("device".into()))?;
    let command = pars.get_str("command").unwrap_or("measure").to_string();
    let samples = pars.get_u64("samples").unwrap_or(1);
    let period = std::time::Duration::from_millis(pars.get_u64("period_ms").unwrap_or(0));

    let device = env.device(device_name)?;
    let task = CheckTask::spawn(move |token| {
        let mut readings = Vec::new();
        for taken in 0..samples {
            if token.is_cancelled() {
                break;
            }
            let value = device.read_value(&command, &pars)?;
            readings.push(Reading {
                value,
                element: None,
            });
            if taken + 1 < samples && !period.is_zero() {
                thread::sleep(period);
            }
        }
        Ok(readings)
    });
    Ok(MethodOutcome::Background(task))
}

/// Built-in: operator-in-the-loop confirmation; the answer's `ok`
/// parameter decides, `mode` optionally names the defect
fn visual_check(check: &mut Check, env: &CheckEnv) -> Result<MethodOutcome, CheckError> {
    let slot = env.feedback.ok_or(CheckError::FeedbackUnavailable)?;
    let answer: Pars = slot.ask(env.observer, &check.tracking);
    if answer.get_bool("ok") != Some(true) {
        let mode = answer.get_str("mode").unwrap_or("visual").to_string();
        check.add_defect(&mode, None, 1.0)?;
    }
    Ok(MethodOutcome::Done)
}
