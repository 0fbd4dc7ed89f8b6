//! Ledger model - inventory/flow accounting primitives

pub mod item;
pub mod node;
pub mod resource;

pub use item::{Item, ItemHandle, ItemState, StockError, Token};
pub use node::Node;
pub use resource::Resource;
