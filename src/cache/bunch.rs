//! Bunch data model: partition math and sorted-unique reference lists.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Number of consecutive node ids grouped into one persisted partition.
pub const BUNCH_WIDTH: i64 = 64;

/// Sorted, duplicate-free list of way ids referencing one node.
///
/// Invariant: strictly ascending. Mutated only through [`insert_ref`].
pub type RefList = SmallVec<[i64; 4]>;

/// All reference entries of one partition, keyed by node id.
pub type Bunch = FxHashMap<i64, RefList>;

/// In-memory accumulation of unflushed bunches, keyed by partition id.
pub type HotCache = FxHashMap<i64, Bunch>;

/// One `(node id, ref list)` entry of a partition record; the unit
/// produced by decoding and consumed by the merge step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRef {
    /// Node id the references belong to.
    pub id: i64,
    /// Way ids referencing the node.
    pub refs: RefList,
}

/// Partition id owning `id`. Truncating division, so 64 consecutive
/// non-negative ids share one partition.
#[inline]
pub fn bunch_id(id: i64) -> i64 {
    id / BUNCH_WIDTH
}

/// Inserts `way` into `refs`, keeping the list strictly ascending and
/// duplicate-free.
///
/// Ways are processed in id order, so most insertions land past the
/// current tail; that case appends without a search.
pub fn insert_ref(refs: &mut RefList, way: i64) {
    if let Some(&last) = refs.last() {
        if last < way {
            refs.push(way);
        } else if last > way {
            if let Err(pos) = refs.binary_search(&way) {
                refs.insert(pos, way);
            }
        }
    } else {
        refs.push(way);
    }
}
