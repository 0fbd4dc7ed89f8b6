//! Device proxy - exclusive access to one hardware instance
//!
//! Cavities share physical instruments. Every command executed through a
//! proxy holds the device's lock for the duration of the call, which
//! serializes concurrent cavities on one instrument. `is_busy()` is a
//! non-blocking probe and never executes anything.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core::Pars;

/// Errors raised by the device layer
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no device driver registered under '{0}'")]
    DriverNotFound(String),

    #[error("device '{0}' not found")]
    ComponentNotFound(String),

    #[error("unknown command '{command}' on device '{device}'")]
    UnknownCommand { device: String, command: String },

    #[error("device '{device}' fault: {message}")]
    Fault { device: String, message: String },

    #[error("device '{device}' returned a non-numeric reading")]
    InvalidReading { device: String },
}

/// One concrete device implementation
///
/// `assembly` wires composite devices once every co-located device has
/// been loaded; it is the one place forward references between devices
/// are allowed.
pub trait Device: Send {
    fn execute(&mut self, command: &str, pars: &Pars) -> Result<Value, DeviceError>;

    fn assembly(&mut self, peers: &HashMap<String, DeviceProxy>) -> Result<(), DeviceError> {
        let _ = peers;
        Ok(())
    }
}

/// Mutual-exclusion wrapper around one device instance
#[derive(Clone)]
pub struct DeviceProxy {
    name: String,
    model: String,
    inner: Arc<Mutex<Box<dyn Device>>>,
}

impl DeviceProxy {
    pub fn new(name: impl Into<String>, model: impl Into<String>, device: Box<dyn Device>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            inner: Arc::new(Mutex::new(device)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one command, holding the device lock for the whole call
    pub fn execute(&self, command: &str, pars: &Pars) -> Result<Value, DeviceError> {
        self.inner.lock().execute(command, pars)
    }

    /// Run one command and interpret the result as a numeric reading
    pub fn read_value(&self, command: &str, pars: &Pars) -> Result<f64, DeviceError> {
        self.execute(command, pars)?
            .as_f64()
            .ok_or_else(|| DeviceError::InvalidReading {
                device: self.name.clone(),
            })
    }

    /// Non-blocking lock probe: acquire with zero timeout, release.
    /// Nothing is executed on the device.
    pub fn is_busy(&self) -> bool {
        match self.inner.try_lock() {
            Some(_guard) => false,
            None => true,
        }
    }

    /// Wire this device to its co-located peers; load-time only
    pub fn assembly(&self, peers: &HashMap<String, DeviceProxy>) -> Result<(), DeviceError> {
        self.inner.lock().assembly(peers)
    }
}

impl std::fmt::Debug for DeviceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProxy")
            .field("name", &self.name)
            .field("model", &self.model)
            .finish()
    }
}

/// Named device proxies co-located at one station
pub type DeviceMap = Arc<HashMap<String, DeviceProxy>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    struct SlowGauge;

    impl Device for SlowGauge {
        fn execute(&mut self, command: &str, _pars: &Pars) -> Result<Value, DeviceError> {
            match command {
                "read" => {
                    thread::sleep(Duration::from_millis(50));
                    Ok(json!(1.5))
                }
                other => Err(DeviceError::UnknownCommand {
                    device: "gauge".into(),
                    command: other.into(),
                }),
            }
        }
    }

    #[test]
    fn test_execute_serializes_callers() {
        let proxy = DeviceProxy::new("gauge", "gauge-model", Box::new(SlowGauge));
        let other = proxy.clone();
        let handle = thread::spawn(move || other.read_value("read", &Pars::new()).unwrap());
        thread::sleep(Duration::from_millis(10));

        // the other thread is mid-call, so the probe reports busy
        assert!(proxy.is_busy());
        assert_eq!(handle.join().unwrap(), 1.5);
        assert!(!proxy.is_busy());
    }

    #[test]
    fn test_unknown_command() {
        let proxy = DeviceProxy::new("gauge", "gauge-model", Box::new(SlowGauge));
        let err = proxy.execute("selftest", &Pars::new()).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownCommand { .. }));
    }
}
