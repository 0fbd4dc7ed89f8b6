//! Characteristics and failure modes
//!
//! A characteristic describes what a check measures; its failure modes
//! name the ways it can fail. Failure mode keys are derived as
//! `{mode}-{characteristic.key}` and created lazily, on first use, once
//! per characteristic.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::ledger::Resource;

/// Errors raised by the quality model
#[derive(Debug, Error)]
pub enum QualityError {
    #[error("failure mode '{mode}' already defined for characteristic '{characteristic}'")]
    DuplicatedFailure { mode: String, characteristic: String },
}

/// Acceptance window for a measured value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub low: f64,
    pub high: f64,
}

impl Limits {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// A named way a characteristic can fail
#[derive(Debug, Clone)]
pub struct FailureMode {
    /// Resource whose key is `{mode}-{characteristic.key}`
    pub resource: Arc<Resource>,

    pub mode: String,
}

impl FailureMode {
    pub fn key(&self) -> &str {
        &self.resource.key
    }
}

/// What a check measures, with its acceptance limits and the failure
/// modes seen on it so far
pub struct Characteristic {
    pub resource: Arc<Resource>,
    pub limits: Option<Limits>,
    failure_modes: Mutex<BTreeMap<String, Arc<FailureMode>>>,
}

impl Characteristic {
    pub fn new(resource: Arc<Resource>, limits: Option<Limits>) -> Self {
        Self {
            resource,
            limits,
            failure_modes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.resource.key
    }

    /// Classify a value against the limits: `hi`, `lo` or in-spec
    pub fn classify(&self, value: f64) -> Option<&'static str> {
        let limits = self.limits?;
        if value > limits.high {
            Some("hi")
        } else if value < limits.low {
            Some("lo")
        } else {
            None
        }
    }

    /// Explicitly define a failure mode; redefining an existing mode
    /// for the same characteristic is an error
    pub fn define_failure_mode(&self, mode: &str) -> Result<Arc<FailureMode>, QualityError> {
        let mut modes = self.failure_modes.lock();
        if modes.contains_key(mode) {
            return Err(QualityError::DuplicatedFailure {
                mode: mode.to_string(),
                characteristic: self.key().to_string(),
            });
        }
        let failure = Self::build_mode(&self.resource, mode);
        modes.insert(mode.to_string(), failure.clone());
        Ok(failure)
    }

    /// Get the failure mode for `mode`, creating it on first use
    pub fn failure_mode(&self, mode: &str) -> Arc<FailureMode> {
        let mut modes = self.failure_modes.lock();
        modes
            .entry(mode.to_string())
            .or_insert_with(|| Self::build_mode(&self.resource, mode))
            .clone()
    }

    fn build_mode(characteristic: &Arc<Resource>, mode: &str) -> Arc<FailureMode> {
        let resource = Resource::new(
            format!("{}-{}", mode, characteristic.key),
            format!("{} failure on {}", mode, characteristic.name),
        )
        .into_arc();
        Arc::new(FailureMode {
            resource,
            mode: mode.to_string(),
        })
    }
}

impl std::fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Characteristic")
            .field("key", &self.resource.key)
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_fixture() -> Characteristic {
        let resource = Resource::new("char", "Diameter").into_arc();
        Characteristic::new(resource, Some(Limits::new(1.0, 2.0)))
    }

    #[test]
    fn test_classify_against_limits() {
        let characteristic = char_fixture();
        assert_eq!(characteristic.classify(1.5), None);
        assert_eq!(characteristic.classify(3.0), Some("hi"));
        assert_eq!(characteristic.classify(0.5), Some("lo"));
    }

    #[test]
    fn test_classify_without_limits() {
        let resource = Resource::new("visual", "Surface finish").into_arc();
        let characteristic = Characteristic::new(resource, None);
        assert_eq!(characteristic.classify(99.0), None);
    }

    #[test]
    fn test_failure_mode_key_derivation() {
        let characteristic = char_fixture();
        let failure = characteristic.failure_mode("hi");
        assert_eq!(failure.key(), "hi-char");
        assert_eq!(failure.mode, "hi");
    }

    #[test]
    fn test_failure_mode_created_once() {
        let characteristic = char_fixture();
        let first = characteristic.failure_mode("hi");
        let second = characteristic.failure_mode("hi");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_duplicated_failure_definition() {
        let characteristic = char_fixture();
        characteristic.define_failure_mode("hi").unwrap();
        let err = characteristic.define_failure_mode("hi").unwrap_err();
        assert!(matches!(err, QualityError::DuplicatedFailure { .. }));
    }
}
