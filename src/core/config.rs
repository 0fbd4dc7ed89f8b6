//! Station configuration
//!
//! A station boots from one YAML document describing its masterdata:
//! nodes, part models, characteristics, control plans, devices and
//! cavities. `build()` turns the document into a running
//! [`InspectionService`], wiring everything through an in-memory
//! repository.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::core::{Context, Pars};
use crate::device::{DeviceError, DeviceRegistry, DeviceSpec};
use crate::inspector::{InspectionService, InspectorError};
use crate::ledger::{Node, Resource};
use crate::quality::{Characteristic, CheckMethods, Control, ControlPlan, Limits};
use crate::sampling::Sampling;
use crate::storage::MemoryRepository;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("plan '{plan}' references unknown node '{node}'")]
    UnknownNode { plan: String, node: String },

    #[error("plan '{plan}' references unknown resource '{resource}'")]
    UnknownResource { plan: String, resource: String },

    #[error("control '{control}' references unknown characteristic '{characteristic}'")]
    UnknownCharacteristic {
        control: String,
        characteristic: String,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Inspector(#[from] InspectorError),
}

#[derive(Debug, Deserialize)]
pub struct CharacteristicConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub limits: Option<Limits>,
}

#[derive(Debug, Deserialize)]
pub struct ControlConfig {
    pub key: String,
    pub sequence: u32,
    pub characteristic: String,
    pub method: String,
    #[serde(default)]
    pub stop_on_defect: bool,
    #[serde(default)]
    pub sampling: Sampling,
    #[serde(default)]
    pub pars: Pars,
}

#[derive(Debug, Deserialize)]
pub struct PlanConfig {
    pub key: String,
    pub name: String,
    pub from_node: String,
    pub to_node: String,
    #[serde(default)]
    pub role: Option<String>,
    pub resources: Vec<String>,
    pub controls: Vec<ControlConfig>,
    #[serde(default)]
    pub pars: Pars,
}

#[derive(Debug, Deserialize)]
pub struct CavityConfig {
    pub id: u32,
    pub location: String,
}

/// Root of the station's configuration document
#[derive(Debug, Default, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicConfig>,
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
    #[serde(default)]
    pub cavities: Vec<CavityConfig>,
}

impl StationConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&raw)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(raw)?)
    }

    /// Assemble the runtime: load masterdata into an in-memory
    /// repository, construct devices against the given driver
    /// registry, and start every configured cavity.
    pub fn build(
        self,
        mut registry: DeviceRegistry,
        check_methods: CheckMethods,
    ) -> Result<InspectionService, ConfigError> {
        let repo = MemoryRepository::new();

        let mut nodes: HashMap<String, Arc<Node>> = HashMap::new();
        for node in self.nodes {
            let node = node.into_arc();
            nodes.insert(node.key.clone(), node.clone());
            repo.add_node(node);
        }
        for resource in self.resources {
            repo.add_resource(resource.into_arc());
        }

        let mut characteristics: HashMap<String, Arc<Characteristic>> = HashMap::new();
        for config in self.characteristics {
            let resource = Resource::new(config.key.clone(), config.name).into_arc();
            repo.add_resource(resource.clone());
            characteristics.insert(
                config.key,
                Arc::new(Characteristic::new(resource, config.limits)),
            );
        }

        for config in self.plans {
            let from = nodes
                .get(&config.from_node)
                .ok_or_else(|| ConfigError::UnknownNode {
                    plan: config.key.clone(),
                    node: config.from_node.clone(),
                })?
                .clone();
            let to = nodes
                .get(&config.to_node)
                .ok_or_else(|| ConfigError::UnknownNode {
                    plan: config.key.clone(),
                    node: config.to_node.clone(),
                })?
                .clone();

            let mut plan = ControlPlan::new(config.key, config.name).with_nodes(from, to);
            if let Some(role) = config.role {
                plan = plan.with_role(role);
            }
            for resource in config.resources {
                plan = plan.with_resource(resource);
            }
            for control_config in config.controls {
                let characteristic = characteristics
                    .get(&control_config.characteristic)
                    .ok_or_else(|| ConfigError::UnknownCharacteristic {
                        control: control_config.key.clone(),
                        characteristic: control_config.characteristic.clone(),
                    })?
                    .clone();
                let mut control = Control::new(
                    control_config.key,
                    control_config.sequence,
                    characteristic,
                    control_config.method,
                )
                .with_sampling(control_config.sampling);
                if control_config.stop_on_defect {
                    control = control.with_stop_on_defect();
                }
                control.pars = control_config.pars;
                plan = plan.with_control(control);
            }
            plan.pars = config.pars;
            repo.add_plan(Arc::new(plan));
        }

        registry.load(&self.devices)?;

        let context = Context::new(
            Arc::new(repo),
            Arc::new(registry),
            Arc::new(check_methods),
        );
        let mut service = InspectionService::new(context);
        for cavity in &self.cavities {
            service.start_cavity(cavity.id, &cavity.location)?;
        }
        info!(cavities = self.cavities.len(), "station configured");
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATION_YAML: &str = r#"
nodes:
  - key: cavity-1
    name: Cavity 1
  - key: good-bin
    name: Good bin
  - key: op-1
    name: Operator 1
    role: inspector
resources:
  - key: partnumber
    name: Widget
characteristics:
  - key: char
    name: Diameter
    limits: { low: 1.0, high: 2.0 }
plans:
  - key: cp-1
    name: Widget inspection
    from_node: cavity-1
    to_node: good-bin
    role: inspector
    resources: [partnumber]
    controls:
      - key: ctl-1
        sequence: 10
        characteristic: char
        method: measure_with_device
        sampling: { kind: count_based, sample_size: 1, frequency: 5 }
        pars:
          device: gauge_1
cavities:
  - id: 1
    location: cavity-1
"#;

    #[test]
    fn test_parse_full_document() {
        let config = StationConfig::from_str(STATION_YAML).unwrap();
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.plans.len(), 1);
        assert_eq!(config.plans[0].controls[0].pars.get_str("device"), Some("gauge_1"));
        assert_eq!(config.cavities[0].id, 1);
    }

    #[test]
    fn test_unknown_characteristic_is_rejected() {
        let raw = STATION_YAML.replace("characteristic: char", "characteristic: nope");
        let config = StationConfig::from_str(&raw).unwrap();
        let err = config
            .build(DeviceRegistry::new(), CheckMethods::with_builtins())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCharacteristic { .. }));
    }

    #[test]
    fn test_unknown_node_is_rejected() {
        let raw = STATION_YAML.replace("from_node: cavity-1", "from_node: nowhere");
        let config = StationConfig::from_str(&raw).unwrap();
        let err = config
            .build(DeviceRegistry::new(), CheckMethods::with_builtins())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNode { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = StationConfig::from_file("/no/such/station.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
