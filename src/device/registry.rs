//! Device registry - named devices resolved to proxies
//!
//! Drivers are registered by model key at startup; devices are loaded
//! from configuration in two passes. The first pass constructs every
//! device; the second resolves `connected_to` references among
//! co-located devices, so composite devices may reference each other
//! freely regardless of declaration order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::core::Pars;
use crate::device::{Device, DeviceError, DeviceMap, DeviceProxy};

/// Configuration of one physical device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Name unique within its location
    pub name: String,

    /// Driver key
    pub model: String,

    /// Node key of the station the device sits at
    pub location: String,

    /// Names of co-located devices this one is wired to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connected_to: Vec<String>,

    #[serde(default, skip_serializing_if = "Pars::is_empty")]
    pub pars: Pars,
}

/// Constructor for one device model
pub type DriverFn = fn(&DeviceSpec) -> Result<Box<dyn Device>, DeviceError>;

/// Resolves named devices to proxies and wires composites
#[derive(Default)]
pub struct DeviceRegistry {
    drivers: HashMap<String, DriverFn>,
    by_location: HashMap<String, HashMap<String, DeviceProxy>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver constructor under a model key
    pub fn register_driver(&mut self, model: impl Into<String>, driver: DriverFn) {
        self.drivers.insert(model.into(), driver);
    }

    /// Construct every device, then wire `connected_to` references.
    /// References may be circular or forward; they are resolved only
    /// after all devices exist.
    pub fn load(&mut self, specs: &[DeviceSpec]) -> Result<(), DeviceError> {
        for spec in specs {
            let driver = self
                .drivers
                .get(spec.model.as_str())
                .ok_or_else(|| DeviceError::DriverNotFound(spec.model.clone()))?;
            let device = driver(spec)?;
            let proxy = DeviceProxy::new(&spec.name, &spec.model, device);
            debug!(device = %spec.name, model = %spec.model, location = %spec.location, "device loaded");
            self.by_location
                .entry(spec.location.clone())
                .or_default()
                .insert(spec.name.clone(), proxy);
        }

        for spec in specs {
            if spec.connected_to.is_empty() {
                continue;
            }
            let colocated = self
                .by_location
                .get(&spec.location)
                .ok_or_else(|| DeviceError::ComponentNotFound(spec.location.clone()))?;
            let mut peers = HashMap::new();
            for peer_name in &spec.connected_to {
                let peer = colocated
                    .get(peer_name)
                    .ok_or_else(|| DeviceError::ComponentNotFound(peer_name.clone()))?;
                peers.insert(peer_name.clone(), peer.clone());
            }
            let proxy = colocated
                .get(&spec.name)
                .ok_or_else(|| DeviceError::ComponentNotFound(spec.name.clone()))?;
            proxy.assembly(&peers)?;
            debug!(device = %spec.name, peers = spec.connected_to.len(), "device assembled");
        }
        Ok(())
    }

    /// Resolve one device by location and name
    pub fn device(&self, location: &str, name: &str) -> Result<DeviceProxy, DeviceError> {
        self.by_location
            .get(location)
            .and_then(|devices| devices.get(name))
            .cloned()
            .ok_or_else(|| DeviceError::ComponentNotFound(name.to_string()))
    }

    /// Every device co-located at one station
    pub fn at_location(&self, location: &str) -> DeviceMap {
        Arc::new(
            self.by_location
                .get(location)
                .cloned()
                .unwrap_or_default(),
        )
    }
}
