#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use tempfile::tempdir;
use wayref::cache::{bunch_id, decode_bunch, partition_key, BunchRefCache, CacheOptions};
use wayref::error::Result;
use wayref::store::{RedbStore, Store};

fn open_cache(store: Arc<dyn Store>) -> BunchRefCache {
    BunchRefCache::open(CacheOptions::new(store))
}

#[test]
fn force_flush_makes_sorted_refs_visible() -> Result<()> {
    let dir = tempdir()?;
    let store: Arc<RedbStore> = Arc::new(RedbStore::open(dir.path().join("refs.redb"))?);
    let cache = open_cache(store.clone());

    cache.record(10, 100);
    cache.record(10, 50);
    cache.record(74, 200);
    cache.flush()?;

    assert_eq!(cache.lookup(10)?.as_deref(), Some(&[50, 100][..]));
    assert_eq!(cache.lookup(74)?.as_deref(), Some(&[200][..]));

    // 10/64 == 0 and 74/64 == 1: the two ids occupy distinct records.
    assert_ne!(bunch_id(10), bunch_id(74));
    assert!(store.get(&partition_key(0))?.is_some());
    assert!(store.get(&partition_key(1))?.is_some());

    cache.close()
}

#[test]
fn same_partition_ids_share_one_record() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(RedbStore::open(dir.path().join("refs.redb"))?);
    let cache = open_cache(store.clone());

    cache.record(1, 100);
    cache.record(63, 200);
    cache.flush()?;

    let record = store.get(&partition_key(0))?.expect("partition 0 record");
    let ids: Vec<i64> = decode_bunch(&record)?.iter().map(|pair| pair.id).collect();
    assert_eq!(ids, vec![1, 63]);
    assert!(store.get(&partition_key(1))?.is_none());

    cache.close()
}

#[test]
fn record_way_fans_out_to_every_node() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(RedbStore::open(dir.path().join("refs.redb"))?);
    let cache = open_cache(store);

    cache.record_way(900, &[4, 5, 6]);
    cache.record_way(901, &[5]);
    cache.flush()?;

    assert_eq!(cache.lookup(4)?.as_deref(), Some(&[900][..]));
    assert_eq!(cache.lookup(5)?.as_deref(), Some(&[900, 901][..]));
    assert_eq!(cache.lookup(6)?.as_deref(), Some(&[900][..]));

    cache.close()
}

#[test]
fn merge_unions_with_earlier_flushes() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(RedbStore::open(dir.path().join("refs.redb"))?);
    let cache = open_cache(store);

    cache.record(20, 300);
    cache.flush()?;
    cache.record(20, 100);
    cache.record(20, 300); // duplicate across cycles
    cache.record(21, 400); // new id into an existing record
    cache.flush()?;

    assert_eq!(cache.lookup(20)?.as_deref(), Some(&[100, 300][..]));
    assert_eq!(cache.lookup(21)?.as_deref(), Some(&[400][..]));

    cache.close()
}

#[test]
fn lookup_misses_are_distinct_from_errors() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(RedbStore::open(dir.path().join("refs.redb"))?);
    let cache = open_cache(store);

    cache.record(1, 10);
    cache.flush()?;

    // Never-written partition.
    assert_eq!(cache.lookup(500)?, None);
    // Existing partition record, absent id.
    assert_eq!(cache.lookup(2)?, None);

    cache.close()
}

#[test]
fn close_persists_residual_without_threshold_flush() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("refs.redb");
    {
        let store = Arc::new(RedbStore::open(&path)?);
        let cache = open_cache(store);
        for id in 0..300 {
            cache.record(id, 7000 + id);
        }
        // Default threshold (1024 partitions) was never reached; close
        // must still flush everything.
        cache.close()?;
    }

    let cache = open_cache(Arc::new(RedbStore::open(&path)?));
    for id in 0..300 {
        assert_eq!(cache.lookup(id)?.as_deref(), Some(&[7000 + id][..]));
    }
    cache.close()
}

#[test]
fn concurrent_producers_with_tiny_queues_lose_nothing() -> Result<()> {
    const PRODUCERS: i64 = 4;
    const PER_PRODUCER: i64 = 250;

    let dir = tempdir()?;
    let store = Arc::new(RedbStore::open(dir.path().join("refs.redb"))?);
    let cache = BunchRefCache::open(
        CacheOptions::new(store)
            .intake_capacity(1)
            .flush_threshold(2)
            .flush_queue_depth(1),
    );

    thread::scope(|scope| {
        for producer in 0..PRODUCERS {
            let cache = &cache;
            scope.spawn(move || {
                for i in 0..PER_PRODUCER {
                    let node = producer * PER_PRODUCER + i;
                    cache.record(node, node * 2);
                }
            });
        }
    });
    cache.flush()?;

    for node in 0..PRODUCERS * PER_PRODUCER {
        assert_eq!(
            cache.lookup(node)?.as_deref(),
            Some(&[node * 2][..]),
            "node {node}"
        );
    }
    cache.close()
}
