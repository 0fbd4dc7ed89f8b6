//! Path/Flow model - reusable plans and their executions

#[allow(clippy::module_inception)]
pub mod flow;
pub mod path;

pub use flow::{Flow, FlowError, FlowIo, FlowMethod, FlowMethods, FlowState};
pub use path::Path;
