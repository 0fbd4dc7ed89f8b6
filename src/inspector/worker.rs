//! Cavity worker loop
//!
//! Each cavity runs one worker thread that pops orders off a blocking
//! queue and drives a full test per order. The loop survives every
//! order-level failure: an unexpected error cancels the test, returns
//! the unit to its origin, rolls the unit of work back and reports
//! through the event log, then the worker goes back to idle.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{CancelToken, Context};
use crate::inspector::events::{EventLog, EventSink, FeedbackSlot, Signal};
use crate::inspector::order::Order;
use crate::ledger::Node;
use crate::quality::{CheckError, ControlPlan, PlanError, Test, TestEnv};
use crate::storage::{StorageError, TestRecord};

/// Errors surfaced by the cavity runtime
#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("unknown responsible '{0}'")]
    UnknownResponsible(String),

    #[error("unknown part model '{0}'")]
    UnknownModel(String),

    #[error("no plan found for model '{model}' at '{location}'")]
    NoPlanFound { model: String, location: String },

    #[error("no cavity {0} running")]
    UnknownCavity(u32),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Check(#[from] CheckError),
}

/// Blocking order queue; a `None` entry tells the worker to exit
pub(crate) struct OrderQueue {
    inner: Mutex<VecDeque<Option<Order>>>,
    ready: Condvar,
}

impl OrderQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, order: Order) {
        self.inner.lock().push_back(Some(order));
        self.ready.notify_one();
    }

    pub(crate) fn push_sentinel(&self) {
        self.inner.lock().push_back(None);
        self.ready.notify_one();
    }

    /// Block until an entry arrives
    pub(crate) fn pop(&self) -> Option<Order> {
        let mut queue = self.inner.lock();
        loop {
            if let Some(entry) = queue.pop_front() {
                return entry;
            }
            self.ready.wait(&mut queue);
        }
    }

    /// Remove every queued order without waking the worker
    pub(crate) fn drain_pending(&self) -> Vec<Order> {
        self.inner.lock().drain(..).flatten().collect()
    }
}

/// State shared between one cavity's worker thread and the service
pub(crate) struct CavityShared {
    pub(crate) queue: OrderQueue,
    pub(crate) events: EventLog,
    pub(crate) interrupt: AtomicBool,
    pub(crate) active_check: Mutex<Option<CancelToken>>,
    pub(crate) feedback: FeedbackSlot,
}

impl CavityShared {
    pub(crate) fn new() -> Self {
        Self {
            queue: OrderQueue::new(),
            events: EventLog::new(),
            interrupt: AtomicBool::new(false),
            active_check: Mutex::new(None),
            feedback: FeedbackSlot::new(),
        }
    }

    /// Cancel whatever background check is in flight, if any
    pub(crate) fn cancel_active_check(&self) {
        if let Some(token) = self.active_check.lock().as_ref() {
            token.cancel();
        }
    }
}

pub(crate) fn cavity_loop(
    cavity: u32,
    location: Arc<Node>,
    context: Context,
    shared: Arc<CavityShared>,
) {
    let mut responsible_cache: Option<Arc<Node>> = None;
    let mut plan_cache: Option<Arc<ControlPlan>> = None;

    shared.events.emit(Signal::CavityIdle, &cavity.to_string());
    while let Some(order) = shared.queue.pop() {
        shared.interrupt.store(false, Ordering::SeqCst);
        shared.events.emit(Signal::CavityBusy, &order.part.serial);
        debug!(cavity, serial = %order.part.serial, "processing order");

        if let Err(err) = process_order(
            &order,
            &location,
            &context,
            &shared,
            &mut responsible_cache,
            &mut plan_cache,
        ) {
            warn!(cavity, serial = %order.part.serial, error = %err, "order failed");
            shared.events.emit(Signal::Error, &err.to_string());
        }
        shared.events.emit(Signal::CavityIdle, &cavity.to_string());
    }
    shared
        .events
        .emit(Signal::CavityStopped, &cavity.to_string());
}

fn process_order(
    order: &Order,
    location: &Arc<Node>,
    context: &Context,
    shared: &CavityShared,
    responsible_cache: &mut Option<Arc<Node>>,
    plan_cache: &mut Option<Arc<ControlPlan>>,
) -> Result<(), InspectorError> {
    let responsible = match responsible_cache {
        Some(node) if node.key == order.responsible => node.clone(),
        _ => {
            let node = context
                .repo
                .node(&order.responsible)
                .map_err(|_| InspectorError::UnknownResponsible(order.responsible.clone()))?;
            *responsible_cache = Some(node.clone());
            node
        }
    };

    let model = context
        .repo
        .resource(&order.part.model)
        .map_err(|_| InspectorError::UnknownModel(order.part.model.clone()))?;

    // the cached plan stays valid across orders of the same family
    let plan = match plan_cache {
        Some(plan) if plan.accepts(&model) => plan.clone(),
        _ => {
            let plan = context.repo.plan_for(&model, &location.key).ok_or_else(|| {
                InspectorError::NoPlanFound {
                    model: model.key.clone(),
                    location: location.key.clone(),
                }
            })?;
            *plan_cache = Some(plan.clone());
            plan
        }
    };

    let part = context
        .repo
        .get_or_create_part(&model, &order.part.serial, location)?;
    let devices = context.devices.at_location(&location.key);
    let mut test = plan.create_test(&responsible, &part, devices)?;
    let mut uow = context.repo.unit_of_work();

    let env = TestEnv {
        methods: &context.check_methods,
        observer: &shared.events,
        feedback: Some(&shared.feedback),
        interrupt: &shared.interrupt,
        active_check: Some(&shared.active_check),
    };

    match run_test(&mut test, &env, shared) {
        Ok(()) => {
            uow.add_test(TestRecord::from_test(&test));
            uow.commit()?;
            Ok(())
        }
        Err(err) => {
            // return the unit to where it came from, then report
            test.cancel();
            if let Err(close_err) = test.close(&shared.events) {
                warn!(error = %close_err, "failed to settle cancelled test");
            }
            uow.add_test(TestRecord::from_test(&test));
            uow.rollback();
            Err(err.into())
        }
    }
}

fn run_test(
    test: &mut Test,
    env: &TestEnv,
    shared: &CavityShared,
) -> Result<(), CheckError> {
    test.start(&shared.events)?;
    test.run(env)?;
    test.close(&shared.events)
}
