//! Item and Token - the production/consumption accounting primitives
//!
//! An item is one instance of a resource with a tracking identifier.
//! Its on-hand quantity is the sum of its unconsumed tokens; flows move
//! stock by consuming tokens at one node and producing them at another.
//! A consumed token is immutable: partial consumption re-issues the
//! remainder as a fresh token rather than mutating the original.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core::{Pars, Uid, UidPrefix};
use crate::ledger::{Node, Resource};

/// Quantity comparisons tolerate float rounding up to this margin
pub(crate) const QTY_EPSILON: f64 = 1e-9;

/// Errors raised by stock movements
#[derive(Debug, Error)]
pub enum StockError {
    #[error("no stock of '{item}' at node '{node}'")]
    NoStockAtNode { item: String, node: String },

    #[error(
        "insufficient stock of '{item}' at node '{node}': requested {requested}, available {available}"
    )]
    InsufficientStock {
        item: String,
        node: String,
        requested: f64,
        available: f64,
    },
}

/// Lifecycle state of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    #[default]
    Active,
    Blocked,
    Archived,
}

/// The atomic accounting record: a quantity of one item at one node,
/// attributed to the flow that produced it and, once settled, the flow
/// that consumed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Node key where the quantity sits
    pub node: String,

    /// Quantity held by this token
    pub qty: f64,

    /// Flow that produced this token
    pub producer: Uid,

    /// Flow that consumed this token; a token with a consumer is
    /// settled and never returned by stock queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<Uid>,
}

impl Token {
    pub fn is_consumed(&self) -> bool {
        self.consumer.is_some()
    }
}

/// An instance of a resource with a tracking identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uid,

    /// The resource this item instantiates
    pub resource: Arc<Resource>,

    /// Serial or batch number
    pub tracking: String,

    #[serde(default)]
    pub state: ItemState,

    /// Free-form parameters
    #[serde(default, skip_serializing_if = "Pars::is_empty")]
    pub pars: Pars,

    tokens: Vec<Token>,
}

/// Shared handle to a mutable item; tokens are only mutated inside a
/// flow's settlement, so one lock per item is enough.
pub type ItemHandle = Arc<Mutex<Item>>;

impl Item {
    pub fn new(resource: Arc<Resource>, tracking: impl Into<String>) -> Self {
        Self {
            id: Uid::new(UidPrefix::Item),
            resource,
            tracking: tracking.into(),
            state: ItemState::default(),
            pars: Pars::new(),
            tokens: Vec::new(),
        }
    }

    pub fn into_handle(self) -> ItemHandle {
        Arc::new(Mutex::new(self))
    }

    /// Append a new unconsumed token at `node`, attributed to `flow`.
    /// Side effect only; never fails.
    pub fn produce(&mut self, node: &Node, flow: &Uid, qty: f64) {
        self.tokens.push(Token {
            node: node.key.clone(),
            qty,
            producer: flow.clone(),
            consumer: None,
        });
    }

    /// Consume stock at `node`, front-to-back, splitting the last token
    /// when it is only partially needed.
    ///
    /// With `qty = None` every token at the node is consumed in full.
    /// Fails without touching the ledger when the node has no stock or
    /// less than the requested quantity.
    pub fn consume(&mut self, node: &Node, flow: &Uid, qty: Option<f64>) -> Result<f64, StockError> {
        let available = self.qty_at(&node.key);
        if available <= QTY_EPSILON {
            return Err(StockError::NoStockAtNode {
                item: self.tracking.clone(),
                node: node.key.clone(),
            });
        }
        let requested = qty.unwrap_or(available);
        if requested > available + QTY_EPSILON {
            return Err(StockError::InsufficientStock {
                item: self.tracking.clone(),
                node: node.key.clone(),
                requested,
                available,
            });
        }

        let mut remaining = requested;
        let mut split: Option<Token> = None;
        for token in &mut self.tokens {
            if remaining <= QTY_EPSILON {
                break;
            }
            if token.is_consumed() || token.node != node.key {
                continue;
            }
            if token.qty > remaining + QTY_EPSILON {
                // Partial consumption: the remainder is re-issued as a
                // fresh token at the same node with the same producer.
                split = Some(Token {
                    node: token.node.clone(),
                    qty: token.qty - remaining,
                    producer: token.producer.clone(),
                    consumer: None,
                });
                token.qty = remaining;
            }
            remaining -= token.qty;
            token.consumer = Some(flow.clone());
        }
        if let Some(token) = split {
            self.tokens.push(token);
        }
        Ok(requested)
    }

    /// Consume every live token regardless of node, attributing the
    /// consumption to `flow`. Returns the quantity withdrawn. Used to
    /// relocate record items whose stock follows their part.
    pub fn withdraw(&mut self, flow: &Uid) -> f64 {
        let mut withdrawn = 0.0;
        for token in &mut self.tokens {
            if token.is_consumed() {
                continue;
            }
            withdrawn += token.qty;
            token.consumer = Some(flow.clone());
        }
        withdrawn
    }

    /// Unconsumed quantity sitting at one node
    pub fn qty_at(&self, node_key: &str) -> f64 {
        self.current_tokens()
            .filter(|t| t.node == node_key)
            .map(|t| t.qty)
            .sum()
    }

    /// Total unconsumed quantity across all nodes
    pub fn on_hand(&self) -> f64 {
        self.current_tokens().map(|t| t.qty).sum()
    }

    /// Unconsumed quantities grouped by node key
    pub fn stocks(&self) -> BTreeMap<String, f64> {
        let mut stocks = BTreeMap::new();
        for token in self.current_tokens() {
            *stocks.entry(token.node.clone()).or_insert(0.0) += token.qty;
        }
        stocks
    }

    /// Unconsumed tokens, in production order
    pub fn current_tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| !t.is_consumed())
    }

    /// Every token ever recorded, consumed ones included
    pub fn all_tokens(&self) -> &[Token] {
        &self.tokens
    }
}
