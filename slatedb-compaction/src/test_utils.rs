use std::sync::Arc;

use bytes::Bytes;
use ulid::Ulid;

use crate::db_state::{SortedRun, SsTableHandle, SsTableId, SsTableInfo};
use crate::iter::KeyValueIterator;
use crate::sst::EncodedSsTable;
use crate::tablestore::TableStore;
use crate::types::{KeyValue, RowEntry};

pub(crate) async fn assert_iterator<T: KeyValueIterator>(iterator: &mut T, entries: Vec<RowEntry>) {
    for expected_entry in entries.iter() {
        assert_next_entry(iterator, expected_entry).await;
    }
    assert!(iterator
        .next_entry()
        .await
        .expect("iterator next_entry failed")
        .is_none());
}

pub(crate) async fn assert_next_entry<T: KeyValueIterator>(
    iterator: &mut T,
    expected_entry: &RowEntry,
) {
    let actual_entry = iterator
        .next_entry()
        .await
        .expect("iterator next_entry failed")
        .expect("expected iterator to return a value");
    assert_eq!(actual_entry, expected_entry.clone())
}

pub(crate) fn assert_kv(kv: &KeyValue, key: &[u8], val: &[u8]) {
    assert_eq!(kv.key, key);
    assert_eq!(kv.value, val);
}

/// Drains `iterator` with `next`, returning every live key-value pair.
pub(crate) async fn collect_kvs<T: KeyValueIterator>(iterator: &mut T) -> Vec<KeyValue> {
    let mut kvs = Vec::new();
    while let Some(kv) = iterator.next().await.expect("iterator next failed") {
        kvs.push(kv);
    }
    kvs
}

pub(crate) fn build_test_sst<K, V>(table_store: &TableStore, entries: &[(K, V)]) -> EncodedSsTable
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut builder = table_store.table_builder();
    for (key, value) in entries {
        builder
            .add_value(key.as_ref(), Some(value.as_ref()))
            .expect("failed to add entry");
    }
    builder.build().expect("failed to build sst")
}

/// Writes each group of entries as its own compacted SST and returns the
/// resulting sorted run.
pub(crate) async fn build_sorted_run<K, V>(
    table_store: &Arc<TableStore>,
    id: u32,
    ssts: &[Vec<(K, V)>],
) -> SortedRun
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut handles = Vec::with_capacity(ssts.len());
    for entries in ssts {
        let sst_id = SsTableId::Compacted(Ulid::new());
        let encoded = build_test_sst(table_store, entries);
        handles.push(
            table_store
                .write_sst(&sst_id, encoded)
                .await
                .expect("failed to write sst"),
        );
    }
    SortedRun::new(id, handles)
}

/// A handle for state-machine tests that never reads the underlying file.
pub(crate) fn compacted_handle(first_key: &[u8]) -> SsTableHandle {
    SsTableHandle::new(
        SsTableId::Compacted(Ulid::new()),
        SsTableInfo {
            first_key: Some(Bytes::copy_from_slice(first_key)),
            ..SsTableInfo::default()
        },
    )
}
