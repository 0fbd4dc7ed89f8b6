//! Core module - identity, parameters, configuration, shared context

pub mod config;
pub mod context;
pub mod identity;
pub mod pars;
pub mod task;

pub use config::{ConfigError, StationConfig};
pub use context::Context;
pub use identity::{Uid, UidPrefix};
pub use pars::Pars;
pub use task::CancelToken;
