//! Inspection service - the station's public surface
//!
//! The service owns one worker thread per cavity. Orders are queued
//! with [`InspectionService::start_test`] and processed strictly in
//! arrival order per cavity; status comes back through each cavity's
//! event log.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::core::{Context, Pars};
use crate::inspector::events::Event;
use crate::inspector::order::{Order, PartInfo};
use crate::inspector::worker::{cavity_loop, CavityShared, InspectorError};

struct Cavity {
    shared: Arc<CavityShared>,
    handle: Option<JoinHandle<()>>,
}

/// Multi-cavity inspection runtime
pub struct InspectionService {
    context: Context,
    cavities: HashMap<u32, Cavity>,
}

impl InspectionService {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            cavities: HashMap::new(),
        }
    }

    /// Spin up the worker for one cavity rooted at `location_key`
    pub fn start_cavity(&mut self, cavity: u32, location_key: &str) -> Result<(), InspectorError> {
        let location = self.context.repo.node(location_key)?;
        let shared = Arc::new(CavityShared::new());

        let worker_shared = shared.clone();
        let worker_context = self.context.clone();
        let handle =
            thread::spawn(move || cavity_loop(cavity, location, worker_context, worker_shared));

        info!(cavity, location = location_key, "cavity started");
        self.cavities.insert(
            cavity,
            Cavity {
                shared,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    fn cavity(&self, cavity: u32) -> Result<&Cavity, InspectorError> {
        self.cavities
            .get(&cavity)
            .ok_or(InspectorError::UnknownCavity(cavity))
    }

    /// Queue one inspection; the cavity runs orders strictly in
    /// arrival order
    pub fn start_test(
        &self,
        part: PartInfo,
        responsible: impl Into<String>,
        cavity: u32,
    ) -> Result<(), InspectorError> {
        let slot = self.cavity(cavity)?;
        slot.shared.queue.push(Order {
            part,
            responsible: responsible.into(),
        });
        Ok(())
    }

    /// Stop one cavity, or every cavity when `None`. Pending orders
    /// are drained and returned, the running check is cancelled, and
    /// each worker is joined after finishing its current order.
    pub fn stop(&mut self, cavity: Option<u32>) -> Vec<Order> {
        let targets: Vec<u32> = match cavity {
            Some(id) => vec![id],
            None => self.cavities.keys().copied().collect(),
        };

        let mut pending = Vec::new();
        for id in targets {
            if let Some(mut slot) = self.cavities.remove(&id) {
                pending.extend(slot.shared.queue.drain_pending());
                slot.shared.interrupt.store(true, Ordering::SeqCst);
                slot.shared.cancel_active_check();
                // release a check blocked on operator feedback
                slot.shared.feedback.answer(Pars::new());
                slot.shared.queue.push_sentinel();
                if let Some(handle) = slot.handle.take() {
                    if handle.join().is_err() {
                        warn!(cavity = id, "cavity worker panicked");
                    }
                }
                info!(cavity = id, drained = pending.len(), "cavity stopped");
            }
        }
        pending
    }

    /// Every event the cavity has emitted, in order
    pub fn events(&self, cavity: u32) -> Result<Vec<Event>, InspectorError> {
        Ok(self.cavity(cavity)?.shared.events.all())
    }

    /// Events since the previous poll of this cavity
    pub fn last_events(&self, cavity: u32) -> Result<Vec<Event>, InspectorError> {
        Ok(self.cavity(cavity)?.shared.events.since_last_poll())
    }

    /// Deliver an operator answer to the check blocked on feedback
    pub fn answer_feedback(&self, cavity: u32, data: Pars) -> Result<(), InspectorError> {
        self.cavity(cavity)?.shared.feedback.answer(data);
        Ok(())
    }
}

impl std::fmt::Debug for InspectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<u32> = self.cavities.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("InspectionService")
            .field("cavities", &ids)
            .finish()
    }
}

impl Drop for InspectionService {
    fn drop(&mut self) {
        if !self.cavities.is_empty() {
            self.stop(None);
        }
    }
}
