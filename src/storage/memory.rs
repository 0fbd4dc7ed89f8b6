//! In-memory repository
//!
//! Masterdata is loaded once at setup; parts and test records
//! accumulate as the station runs. All maps sit behind one lock, held
//! only for the duration of each lookup.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::core::{Uid, UidPrefix};
use crate::ledger::{Node, Resource};
use crate::quality::{ControlPlan, Part, PartHandle};
use crate::storage::{Repository, StorageError, TestRecord, UnitOfWork};

#[derive(Default)]
struct Masterdata {
    nodes: HashMap<String, Arc<Node>>,
    resources: HashMap<String, Arc<Resource>>,
    plans: Vec<Arc<ControlPlan>>,
    parts: HashMap<String, PartHandle>,
}

/// Reference [`Repository`] backed by process memory
#[derive(Default)]
pub struct MemoryRepository {
    data: Mutex<Masterdata>,
    tests: Arc<Mutex<Vec<TestRecord>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Arc<Node>) {
        self.data.lock().nodes.insert(node.key.clone(), node);
    }

    pub fn add_resource(&self, resource: Arc<Resource>) {
        self.data
            .lock()
            .resources
            .insert(resource.key.clone(), resource);
    }

    pub fn add_plan(&self, plan: Arc<ControlPlan>) {
        self.data.lock().plans.push(plan);
    }

    /// Committed test records, in commit order
    pub fn committed(&self) -> Vec<TestRecord> {
        self.tests.lock().clone()
    }
}

impl Repository for MemoryRepository {
    fn node(&self, key: &str) -> Result<Arc<Node>, StorageError> {
        self.data
            .lock()
            .nodes
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::UnknownNode(key.to_string()))
    }

    fn resource(&self, key: &str) -> Result<Arc<Resource>, StorageError> {
        self.data
            .lock()
            .resources
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::UnknownResource(key.to_string()))
    }

    fn plan_for(&self, model: &Resource, location: &str) -> Option<Arc<ControlPlan>> {
        self.data
            .lock()
            .plans
            .iter()
            .find(|plan| {
                plan.accepts(model)
                    && plan
                        .from_node
                        .as_ref()
                        .is_some_and(|node| node.key == location)
            })
            .cloned()
    }

    fn get_or_create_part(
        &self,
        model: &Arc<Resource>,
        serial: &str,
        location: &Node,
    ) -> Result<PartHandle, StorageError> {
        let mut data = self.data.lock();
        if let Some(existing) = data.parts.get(serial) {
            let part = existing.lock();
            let item = part.item.lock();
            if item.qty_at(&location.key) <= 0.0 {
                let found = item
                    .stocks()
                    .into_iter()
                    .next()
                    .map(|(node, _)| node)
                    .unwrap_or_else(|| "nowhere".to_string());
                return Err(StorageError::WrongLocation {
                    serial: serial.to_string(),
                    expected: location.key.clone(),
                    found,
                });
            }
            drop(item);
            drop(part);
            return Ok(existing.clone());
        }

        debug!(serial, model = %model.key, location = %location.key, "creating part");
        let receipt = Uid::new(UidPrefix::Flow);
        let part = Part::new(model.clone(), serial, location, &receipt).into_handle();
        data.parts.insert(serial.to_string(), part.clone());
        Ok(part)
    }

    fn unit_of_work(&self) -> Box<dyn UnitOfWork> {
        Box::new(MemoryUnitOfWork {
            sink: self.tests.clone(),
            pending: Vec::new(),
        })
    }
}

struct MemoryUnitOfWork {
    sink: Arc<Mutex<Vec<TestRecord>>>,
    pending: Vec<TestRecord>,
}

impl UnitOfWork for MemoryUnitOfWork {
    fn add_test(&mut self, record: TestRecord) {
        self.pending.push(record);
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.sink.lock().extend(self.pending);
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        debug!(discarded = self.pending.len(), "unit of work rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowState;

    fn repo_with_part() -> (MemoryRepository, Arc<Resource>, Node) {
        let repo = MemoryRepository::new();
        let model = Resource::new("partnumber", "Widget").into_arc();
        repo.add_resource(model.clone());
        let cavity = Node::new("cavity-1", "Cavity 1");
        (repo, model, cavity)
    }

    #[test]
    fn test_get_or_create_is_keyed_by_serial() {
        let (repo, model, cavity) = repo_with_part();
        let first = repo.get_or_create_part(&model, "SN001", &cavity).unwrap();
        let second = repo.get_or_create_part(&model, "SN001", &cavity).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_part_stocked_elsewhere_is_wrong_location() {
        let (repo, model, cavity) = repo_with_part();
        let other = Node::new("cavity-2", "Cavity 2");
        repo.get_or_create_part(&model, "SN001", &cavity).unwrap();

        let err = repo
            .get_or_create_part(&model, "SN001", &other)
            .unwrap_err();
        match err {
            StorageError::WrongLocation {
                expected, found, ..
            } => {
                assert_eq!(expected, "cavity-2");
                assert_eq!(found, "cavity-1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_masterdata_lookups() {
        let repo = MemoryRepository::new();
        assert!(matches!(
            repo.node("nope"),
            Err(StorageError::UnknownNode(_))
        ));
        assert!(matches!(
            repo.resource("nope"),
            Err(StorageError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_unit_of_work_commit_and_rollback() {
        let repo = MemoryRepository::new();
        let record = TestRecord {
            id: Uid::new(UidPrefix::Test),
            part_tracking: "SN001".into(),
            plan_key: "cp-1".into(),
            responsible_key: "op-1".into(),
            state: FlowState::Ok,
            started_on: None,
            finished_on: None,
            checks: Vec::new(),
        };

        let mut uow = repo.unit_of_work();
        uow.add_test(record.clone());
        uow.commit().unwrap();
        assert_eq!(repo.committed().len(), 1);

        let mut uow = repo.unit_of_work();
        uow.add_test(record);
        uow.rollback();
        assert_eq!(repo.committed().len(), 1);
    }
}
