//! Persistence boundary
//!
//! The runtime talks to masterdata (nodes, resources, plans) and to
//! part history through [`Repository`], and records finished tests
//! through a [`UnitOfWork`] so a crashed run leaves nothing half
//! written. The in-memory backend in [`memory`] is the reference
//! implementation and the test double.

pub mod memory;

pub use memory::MemoryRepository;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::core::Uid;
use crate::flow::FlowState;
use crate::ledger::{Node, Resource};
use crate::quality::{Check, ControlPlan, PartHandle, Test};

#[derive(Debug, Error)]
pub enum StorageError {
    /// The unit exists but its stock sits somewhere other than where
    /// it was presented
    #[error("part '{serial}' expected at '{expected}' but stocked at '{found}'")]
    WrongLocation {
        serial: String,
        expected: String,
        found: String,
    },

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("unknown resource '{0}'")]
    UnknownResource(String),
}

/// Flattened record of one finished check, for persistence
#[derive(Debug, Clone, Serialize)]
pub struct CheckRecord {
    pub tracking: String,
    pub control_key: String,
    pub state: FlowState,
    pub measurements: Vec<String>,
    pub defects: Vec<String>,
}

impl CheckRecord {
    pub fn from_check(check: &Check) -> Self {
        Self {
            tracking: check.tracking.clone(),
            control_key: check.control.key.clone(),
            state: check.state(),
            measurements: check.measurements.clone(),
            defects: check.defects.clone(),
        }
    }
}

/// Flattened record of one finished test, for persistence
#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    pub id: Uid,
    pub part_tracking: String,
    pub plan_key: String,
    pub responsible_key: String,
    pub state: FlowState,
    pub started_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub checks: Vec<CheckRecord>,
}

impl TestRecord {
    pub fn from_test(test: &Test) -> Self {
        Self {
            id: test.flow.id.clone(),
            part_tracking: test.tracking(),
            plan_key: test.plan.key.clone(),
            responsible_key: test.responsible.key.clone(),
            state: test.state(),
            started_on: test.flow.started_on,
            finished_on: test.flow.finished_on,
            checks: test.checks.iter().map(CheckRecord::from_check).collect(),
        }
    }
}

/// Masterdata and part-history access
pub trait Repository: Send + Sync {
    fn node(&self, key: &str) -> Result<Arc<Node>, StorageError>;

    fn resource(&self, key: &str) -> Result<Arc<Resource>, StorageError>;

    /// The plan applying to `model` at the station rooted at `location`
    fn plan_for(&self, model: &Resource, location: &str) -> Option<Arc<ControlPlan>>;

    /// Fetch the part with this serial, or create it with one stock
    /// token at `location`. An existing part stocked elsewhere is a
    /// [`StorageError::WrongLocation`].
    fn get_or_create_part(
        &self,
        model: &Arc<Resource>,
        serial: &str,
        location: &Node,
    ) -> Result<PartHandle, StorageError>;

    fn unit_of_work(&self) -> Box<dyn UnitOfWork>;
}

/// Buffered writes for one test run; nothing is visible until commit
pub trait UnitOfWork: Send {
    fn add_test(&mut self, record: TestRecord);

    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    fn rollback(self: Box<Self>);
}
