//! Back-reference index for geographic import pipelines.
//!
//! Records, for every node id, the set of way ids referencing it, so
//! later import stages can answer "which ways use node N?" without
//! holding the whole relation graph in memory. Writes are aggregated in
//! an in-memory hot cache and merged asynchronously into an embedded
//! ordered key-value store; reads always come from the store, so a
//! recorded reference becomes visible once its flush completes.

#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod primitives;
pub mod store;
