//! timegate-state
//!
//! The controlling authority: an owned sled store of operations, units and
//! role/delay configuration, and the engine whose guarded transitions are
//! the only way that store changes.

pub mod db;
pub mod engine;

pub use db::{AuthorityDb, StagedMutations};
pub use engine::AuthorityEngine;
