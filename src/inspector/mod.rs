//! Inspection runtime: cavities, orders, events, feedback

pub mod events;
pub mod order;
pub mod service;
pub mod worker;

pub use events::{Event, EventLog, EventSink, FeedbackSlot, Signal};
pub use order::{Order, PartInfo};
pub use service::InspectionService;
pub use worker::InspectorError;
