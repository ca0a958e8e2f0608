//! Shared mocks and fixtures for Weft crate tests.

pub mod fixtures;
pub mod store;

pub use fixtures::{empty_graph, fast_config, linear_graph, node};
pub use store::{MemoryStore, StoredDocument};
