//! Client-side table cache.
//!
//! A snapshot-isolated store fed by decoded transaction updates. Wiring the
//! session's `transaction_update` messages into [`Store::apply_transaction`]
//! is left to the consumer of the SDK.

mod store;
mod transaction;

pub use store::Store;
pub use transaction::{Row, TableMutation, Transaction};
