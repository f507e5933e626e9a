//! The bunched reference cache: intake, dispatch, and flush-writer loops.
//!
//! Writes are aggregated in a hot in-memory map owned exclusively by the
//! dispatch loop. When the map crosses the partition threshold it is moved
//! wholesale through a bounded channel to the writer loop, which merges it
//! into the store as one atomic batch. The hot map is never shared, so no
//! lock guards it; ownership transfer through the channel is the whole
//! synchronization story.

use std::collections::hash_map::Entry;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::cache::bunch::{bunch_id, insert_ref, Bunch, HotCache, IdRef, RefList};
use crate::cache::codec::{decode_bunch, encode_bunch};
use crate::cache::options::CacheOptions;
use crate::cache::pool::SlotPool;
use crate::error::{CacheError, Result};
use crate::primitives::bytes::ord;
use crate::store::{Store, WriteBatch};

/// Store key for a partition record. Order-preserving, so ordered
/// iteration of the store yields partitions in ascending id order.
pub fn partition_key(bunch_id: i64) -> [u8; 8] {
    ord::i64_key(bunch_id)
}

enum Intake {
    Add { node: i64, way: i64 },
    Flush(SyncSender<Result<()>>),
}

enum WriterMsg {
    Snapshot(HotCache),
    Barrier(SyncSender<Result<()>>),
}

/// Asynchronous back-reference index over an ordered key-value store.
///
/// [`record`](Self::record) aggregates `(node, way)` pairs in memory;
/// flushes merge them into persisted partition records. Reads via
/// [`lookup`](Self::lookup) go straight to the store, so a reference is
/// visible only after the flush that carries it completes — eventual
/// visibility by design, not strong consistency.
///
/// A failed flush write is logged and its cycle's data dropped; the cache
/// keeps accepting records. That availability-over-durability trade is
/// deliberate for bulk imports and surfaced to callers of
/// [`flush`](Self::flush).
pub struct BunchRefCache {
    store: Arc<dyn Store>,
    add_tx: Option<SyncSender<Intake>>,
    dispatch_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
}

impl BunchRefCache {
    /// Opens the cache over `options.store` and starts its worker loops.
    pub fn open(options: CacheOptions) -> Self {
        let CacheOptions {
            store,
            flush_threshold,
            intake_capacity,
            flush_queue_depth,
            merge_workers,
        } = options;
        let threshold = flush_threshold.max(1);
        let workers = merge_workers
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1);
        let pool = Arc::new(SlotPool::new());

        let (add_tx, add_rx) = mpsc::sync_channel(intake_capacity.max(1));
        let (write_tx, write_rx) = mpsc::sync_channel(flush_queue_depth.max(1));

        let writer_store = Arc::clone(&store);
        let writer_pool = Arc::clone(&pool);
        let writer_thread =
            thread::spawn(move || writer_loop(write_rx, writer_store, writer_pool, workers));
        let dispatch_thread =
            thread::spawn(move || dispatch_loop(add_rx, write_tx, pool, threshold));

        Self {
            store,
            add_tx: Some(add_tx),
            dispatch_thread: Some(dispatch_thread),
            writer_thread: Some(writer_thread),
        }
    }

    /// Queues one way reference for `node_id`.
    ///
    /// Blocks while the intake queue is full; that backpressure is what
    /// keeps upstream element readers from outrunning flush throughput.
    pub fn record(&self, node_id: i64, way_id: i64) {
        self.send(Intake::Add {
            node: node_id,
            way: way_id,
        });
    }

    /// Records one relation event: every node of `node_ids` gains a
    /// reference to `way_id`.
    pub fn record_way(&self, way_id: i64, node_ids: &[i64]) {
        for &node in node_ids {
            self.record(node, way_id);
        }
    }

    /// Returns the persisted references of `node_id`, or `None` if the id
    /// has none recorded.
    ///
    /// Bypasses the hot cache entirely: references recorded but not yet
    /// flushed are not visible here.
    pub fn lookup(&self, node_id: i64) -> Result<Option<RefList>> {
        let key = partition_key(bunch_id(node_id));
        let Some(data) = self.store.get(&key)? else {
            return Ok(None);
        };
        for pair in decode_bunch(&data)? {
            if pair.id == node_id {
                return Ok(Some(pair.refs));
            }
        }
        Ok(None)
    }

    /// Hands off the current hot cache and blocks until the writer loop
    /// has processed everything queued before this call.
    ///
    /// Returns the error of a flush cycle that failed since the last
    /// synchronization point, if any.
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        self.send(Intake::Flush(ack_tx));
        ack_rx
            .recv()
            .map_err(|_| CacheError::Internal("writer loop terminated"))?
    }

    /// Shuts the cache down: drains the intake queue, flushes any residual
    /// hot cache exactly once, waits for in-flight flushes, and releases
    /// the store handle.
    ///
    /// Taking `self` by value makes recording after close unrepresentable.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn send(&self, msg: Intake) {
        let sender = self
            .add_tx
            .as_ref()
            .expect("reference cache used during shutdown");
        sender
            .send(msg)
            .expect("reference cache dispatch loop terminated");
    }

    fn shutdown(&mut self) -> Result<()> {
        drop(self.add_tx.take());
        let mut result = Ok(());
        if let Some(handle) = self.dispatch_thread.take() {
            if handle.join().is_err() {
                result = Err(CacheError::Internal("dispatch loop panicked"));
            }
        }
        if let Some(handle) = self.writer_thread.take() {
            if handle.join().is_err() {
                result = Err(CacheError::Internal("writer loop panicked"));
            }
        }
        result
    }
}

impl Drop for BunchRefCache {
    fn drop(&mut self) {
        if self.add_tx.is_none() {
            return;
        }
        if let Err(err) = self.shutdown() {
            error!(error = %err, "refcache.close.failed");
        }
    }
}

fn fresh_map(pool: &SlotPool<HotCache>, threshold: usize) -> HotCache {
    pool.acquire()
        .unwrap_or_else(|| HotCache::with_capacity_and_hasher(threshold, Default::default()))
}

/// Single consumer of the intake queue; sole owner of the hot cache.
fn dispatch_loop(
    intake: Receiver<Intake>,
    write_tx: SyncSender<WriterMsg>,
    pool: Arc<SlotPool<HotCache>>,
    threshold: usize,
) {
    let mut hot = fresh_map(&pool, threshold);
    for msg in intake {
        match msg {
            Intake::Add { node, way } => {
                let refs = hot.entry(bunch_id(node)).or_default().entry(node).or_default();
                insert_ref(refs, way);
                if hot.len() >= threshold {
                    let full = std::mem::replace(&mut hot, fresh_map(&pool, threshold));
                    debug!(partitions = full.len(), "refcache.flush.handoff");
                    if write_tx.send(WriterMsg::Snapshot(full)).is_err() {
                        return;
                    }
                }
            }
            Intake::Flush(ack) => {
                if !hot.is_empty() {
                    let full = std::mem::replace(&mut hot, fresh_map(&pool, threshold));
                    debug!(partitions = full.len(), "refcache.flush.forced");
                    if write_tx.send(WriterMsg::Snapshot(full)).is_err() {
                        return;
                    }
                }
                if write_tx.send(WriterMsg::Barrier(ack)).is_err() {
                    return;
                }
            }
        }
    }
    // Intake closed: residual flush on shutdown, exactly once.
    if !hot.is_empty() {
        debug!(partitions = hot.len(), "refcache.flush.residual");
        let _ = write_tx.send(WriterMsg::Snapshot(hot));
    }
}

/// Single consumer of the flush-handoff queue; sole bulk writer against
/// the store, so at most one batch is in flight at a time.
fn writer_loop(
    snapshots: Receiver<WriterMsg>,
    store: Arc<dyn Store>,
    pool: Arc<SlotPool<HotCache>>,
    workers: usize,
) {
    let mut failed: Option<CacheError> = None;
    for msg in snapshots {
        match msg {
            WriterMsg::Snapshot(mut snapshot) => {
                if let Err(err) = flush_snapshot(store.as_ref(), &mut snapshot, workers) {
                    // Data handed off in this cycle is lost; the import
                    // keeps running. Accepted trade-off of the async
                    // design, so log loudly and carry on.
                    error!(error = %err, "refcache.flush.failed");
                    failed = Some(err);
                }
                snapshot.clear();
                pool.offer(snapshot);
            }
            WriterMsg::Barrier(ack) => {
                let outcome = failed.take().map_or(Ok(()), Err);
                let _ = ack.send(outcome);
            }
        }
    }
}

/// Merges one hot-cache snapshot into the store as a single atomic batch.
///
/// Partitions fan out to a scoped worker pool for load-merge-encode;
/// joining the scope is the barrier that guarantees the batch is complete
/// before it is written. A read or decode failure aborts the whole cycle
/// before any write.
fn flush_snapshot(store: &dyn Store, snapshot: &mut HotCache, workers: usize) -> Result<()> {
    let pending: Vec<(i64, Bunch)> = snapshot.drain().collect();
    if pending.is_empty() {
        return Ok(());
    }
    let worker_count = workers.min(pending.len());
    let queue = Mutex::new(pending);

    let results: Vec<Result<Vec<(Vec<u8>, Vec<u8>)>>> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            handles.push(scope.spawn(|| -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
                let mut encoded = Vec::new();
                loop {
                    let next = queue.lock().pop();
                    let Some((id, bunch)) = next else {
                        break;
                    };
                    encoded.push(load_merge_encode(store, id, bunch)?);
                }
                Ok(encoded)
            }));
        }
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or(Err(CacheError::Internal("merge worker panicked")))
            })
            .collect()
    });

    let mut batch = WriteBatch::new();
    for worker_output in results {
        for (key, value) in worker_output? {
            batch.put(key, value);
        }
    }
    store.write(batch)?;
    Ok(())
}

/// Loads a partition's persisted record, merges the fresh bunch into it,
/// and re-encodes. Absent records merge against an empty bunch.
fn load_merge_encode(store: &dyn Store, bunch: i64, fresh: Bunch) -> Result<(Vec<u8>, Vec<u8>)> {
    let key = partition_key(bunch);
    let mut merged: Bunch = match store.get(&key)? {
        Some(data) => decode_bunch(&data)?
            .into_iter()
            .map(|pair| (pair.id, pair.refs))
            .collect(),
        None => Bunch::default(),
    };

    for (id, refs) in fresh {
        match merged.entry(id) {
            Entry::Occupied(mut existing) => {
                for way in refs {
                    insert_ref(existing.get_mut(), way);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(refs);
            }
        }
    }

    let mut pairs: Vec<IdRef> = merged
        .into_iter()
        .map(|(id, refs)| IdRef { id, refs })
        .collect();
    // Ascending id order keeps the id delta pass single-byte and makes
    // records deterministic: re-merging identical content re-encodes to
    // identical bytes.
    pairs.sort_unstable_by_key(|pair| pair.id);
    Ok((key.to_vec(), encode_bunch(&pairs)))
}
