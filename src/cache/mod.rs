//! The bunched reference cache.
//!
//! Aggregates "way contains node" relations in memory and merges them
//! asynchronously into partition records of an ordered key-value store.

/// Partition math, ref lists, and the sorted-unique insert.
pub mod bunch;

/// Delta-varint partition record codec.
pub mod codec;

mod options;
mod pool;
mod refcache;

pub use bunch::{bunch_id, insert_ref, Bunch, HotCache, IdRef, RefList, BUNCH_WIDTH};
pub use codec::{decode_bunch, encode_bunch};
pub use options::CacheOptions;
pub use pool::SlotPool;
pub use refcache::{partition_key, BunchRefCache};
