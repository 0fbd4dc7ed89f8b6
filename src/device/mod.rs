//! Device locking layer - shared, lockable hardware instruments

pub mod proxy;
pub mod registry;

pub use proxy::{Device, DeviceError, DeviceMap, DeviceProxy};
pub use registry::{DeviceRegistry, DeviceSpec, DriverFn};
