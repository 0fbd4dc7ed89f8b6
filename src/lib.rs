//! partflow: in-process quality inspection runtime
//!
//! Tracks material as conserved stock tokens on a site graph, runs
//! control plans against parts on multi-cavity stations, and records
//! measurements and defects with idempotent tracking keys.

pub mod core;
pub mod device;
pub mod flow;
pub mod inspector;
pub mod ledger;
pub mod quality;
pub mod sampling;
pub mod storage;
