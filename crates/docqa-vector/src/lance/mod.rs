//! Persistent store backed by an embedded LanceDB database.

mod pushdown;
pub mod schema;
mod store;
pub mod table;

pub use store::LanceStore;
