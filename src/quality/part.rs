//! Parts, measurements and defects
//!
//! A part is the physical unit under test. Measurements and defects are
//! items in their own right, attached to the part; a measurement may
//! reference at most one defect and vice versa. Records are keyed by a
//! composed tracking so re-running the same check on the same unit
//! updates in place rather than duplicating.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::core::Uid;
use crate::ledger::{Item, ItemHandle, Node, Resource};
use crate::quality::{Characteristic, FailureMode};

/// Compose the tracking key for a record targeting one characteristic
/// (or element of it) of one part
pub fn compose_tracking(part_tracking: &str, key: &str, element: Option<&str>) -> String {
    match element {
        Some(element) => format!("{part_tracking}*{key}*{element}"),
        None => format!("{part_tracking}*{key}"),
    }
}

/// A measured value for one characteristic of one part
#[derive(Debug)]
pub struct Measurement {
    pub item: Item,
    pub characteristic: Arc<Characteristic>,
    pub value: Option<f64>,

    /// Tracking of the defect this measurement evidences, if any (1:1)
    pub defect: Option<String>,
}

/// A recorded failure on one part
#[derive(Debug)]
pub struct Defect {
    pub item: Item,
    pub failure: Arc<FailureMode>,
    pub qty: f64,

    /// Tracking of the measurement evidencing this defect, if any (1:1)
    pub measurement: Option<String>,
}

/// The physical unit under test, with its quality records
pub struct Part {
    pub item: ItemHandle,
    pub measurements: Vec<Measurement>,
    pub defects: Vec<Defect>,
}

/// Shared handle to one part; a part is mutated by at most one cavity
/// worker at a time
pub type PartHandle = Arc<Mutex<Part>>;

impl Part {
    /// Create a new part of `model` with the given serial, placing its
    /// initial stock token at `location`
    pub fn new(model: Arc<Resource>, serial: &str, location: &Node, receipt: &Uid) -> Self {
        let mut item = Item::new(model, serial);
        item.produce(location, receipt, 1.0);
        Self {
            item: item.into_handle(),
            measurements: Vec::new(),
            defects: Vec::new(),
        }
    }

    pub fn tracking(&self) -> String {
        self.item.lock().tracking.clone()
    }

    pub fn model(&self) -> Arc<Resource> {
        self.item.lock().resource.clone()
    }

    pub fn into_handle(self) -> PartHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn measurement(&self, tracking: &str) -> Option<&Measurement> {
        self.measurements
            .iter()
            .find(|m| m.item.tracking == tracking)
    }

    pub fn defect(&self, tracking: &str) -> Option<&Defect> {
        self.defects.iter().find(|d| d.item.tracking == tracking)
    }

    /// Record a value for a characteristic, updating the existing
    /// record when one with the same tracking already exists. Returns
    /// the record's tracking key.
    pub fn record_measure(
        &mut self,
        characteristic: &Arc<Characteristic>,
        value: f64,
        element: Option<&str>,
    ) -> String {
        let tracking = compose_tracking(
            &self.item.lock().tracking,
            characteristic.key(),
            element,
        );
        match self
            .measurements
            .iter_mut()
            .find(|m| m.item.tracking == tracking)
        {
            Some(existing) => existing.value = Some(value),
            None => self.measurements.push(Measurement {
                item: Item::new(characteristic.resource.clone(), tracking.clone()),
                characteristic: characteristic.clone(),
                value: Some(value),
                defect: None,
            }),
        }
        tracking
    }

    /// Record a defect, updating the existing record when one with the
    /// same tracking already exists. Returns the record's tracking key.
    pub fn record_defect(
        &mut self,
        failure: &Arc<FailureMode>,
        qty: f64,
        element: Option<&str>,
    ) -> String {
        let tracking =
            compose_tracking(&self.item.lock().tracking, failure.key(), element);
        match self
            .defects
            .iter_mut()
            .find(|d| d.item.tracking == tracking)
        {
            Some(existing) => existing.qty = qty,
            None => self.defects.push(Defect {
                item: Item::new(failure.resource.clone(), tracking.clone()),
                failure: failure.clone(),
                qty,
                measurement: None,
            }),
        }
        tracking
    }

    /// Cross-link a measurement and the defect it evidences (1:1,
    /// mutually exclusive slot)
    pub fn link_measure_defect(&mut self, measure_tracking: &str, defect_tracking: &str) {
        if let Some(measure) = self
            .measurements
            .iter_mut()
            .find(|m| m.item.tracking == measure_tracking)
        {
            measure.defect = Some(defect_tracking.to_string());
        }
        if let Some(defect) = self
            .defects
            .iter_mut()
            .find(|d| d.item.tracking == defect_tracking)
        {
            defect.measurement = Some(measure_tracking.to_string());
        }
    }
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("tracking", &self.tracking())
            .field("measurements", &self.measurements.len())
            .field("defects", &self.defects.len())
            .finish()
    }
}
