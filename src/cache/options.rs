use std::sync::Arc;

use crate::store::Store;

/// Configuration supplied when opening a [`super::BunchRefCache`].
#[derive(Clone)]
pub struct CacheOptions {
    /// Ordered key-value backend partition records are merged into.
    pub store: Arc<dyn Store>,
    /// Partitions accumulated in memory before the hot cache is handed to
    /// the flush pipeline.
    pub flush_threshold: usize,
    /// Bounded capacity of the intake queue; a full queue blocks `record`,
    /// which is the backpressure onto upstream producers.
    pub intake_capacity: usize,
    /// Bounded depth of the flush-handoff queue; keeps the hot cache from
    /// racing arbitrarily far ahead of flush throughput.
    pub flush_queue_depth: usize,
    /// Merge worker threads per flush cycle; `None` uses available
    /// hardware parallelism.
    pub merge_workers: Option<usize>,
}

impl CacheOptions {
    /// Creates options with default tuning over the given store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            flush_threshold: 1024,
            intake_capacity: 1024,
            flush_queue_depth: 2,
            merge_workers: None,
        }
    }

    /// Sets the hot-cache partition count that triggers a flush handoff.
    pub fn flush_threshold(mut self, partitions: usize) -> Self {
        self.flush_threshold = partitions;
        self
    }

    /// Sets the intake queue capacity.
    pub fn intake_capacity(mut self, entries: usize) -> Self {
        self.intake_capacity = entries;
        self
    }

    /// Sets the flush-handoff queue depth.
    pub fn flush_queue_depth(mut self, snapshots: usize) -> Self {
        self.flush_queue_depth = snapshots;
        self
    }

    /// Sets the number of merge workers per flush cycle.
    pub fn merge_workers(mut self, workers: usize) -> Self {
        self.merge_workers = Some(workers);
        self
    }
}
