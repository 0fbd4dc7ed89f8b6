//! Shared service context
//!
//! One `Context` is assembled at startup and handed to every cavity
//! worker. It replaces ambient globals: everything a worker resolves
//! at runtime comes through here.

use std::sync::Arc;

use crate::device::DeviceRegistry;
use crate::quality::CheckMethods;
use crate::storage::Repository;

#[derive(Clone)]
pub struct Context {
    pub repo: Arc<dyn Repository>,
    pub devices: Arc<DeviceRegistry>,
    pub check_methods: Arc<CheckMethods>,
}

impl Context {
    pub fn new(
        repo: Arc<dyn Repository>,
        devices: Arc<DeviceRegistry>,
        check_methods: Arc<CheckMethods>,
    ) -> Self {
        Self {
            repo,
            devices,
            check_methods,
        }
    }
}
