//! Unified content-addressed storage engine for the relay.
//!
//! Composed of a persistent multi-tree [`substrate`], a [`mbl`] bucket
//! directory the substrate itself cannot enumerate, an inverted-list
//! [`cache`] layer, a deduplicated [`content`] store, a chunked-tree
//! [`scionic`] store, an [`event`] store sharded by kind, a blossom-style
//! [`blob`] upload surface, a Bitcoin [`address`] pool, and a relational
//! [`stats`] sidecar. [`store::Store`] is the write pipeline that fans a
//! single high-level write out into the exact set of trees a commit must
//! touch — no other path in this crate calls `Substrate::commit`.

pub mod address;
pub mod blob;
pub mod cache;
pub mod content;
pub mod error;
pub mod event;
pub mod mbl;
pub mod scionic;
pub mod stats;
pub mod store;
pub mod substrate;

pub use error::{Result, StoreError};
pub use store::{IncomingTransaction, Store, SubscriptionUpdate, Tier};
