//! Quality model: characteristics, parts, control plans, checks, tests

pub mod characteristic;
pub mod check;
pub mod part;
pub mod plan;

pub use characteristic::{Characteristic, FailureMode, Limits, QualityError};
pub use check::{
    Check, CheckEnv, CheckError, CheckMethod, CheckMethods, CheckTask, MethodOutcome, Reading,
};
pub use part::{compose_tracking, Defect, Measurement, Part, PartHandle};
pub use plan::{Control, ControlPlan, PlanError};
pub use test::{Test, TestEnv};
