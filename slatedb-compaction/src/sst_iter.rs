use async_trait::async_trait;
use std::cmp::{max, min};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::SstIteratorOptions;
use crate::db_state::SsTableHandle;
use crate::error::SlateDBError;
use crate::sst::SsTableIndex;
use crate::{
    block::Block, block_iterator::BlockIterator, iter::KeyValueIterator, tablestore::TableStore,
    types::RowEntry,
};

enum FetchTask {
    InFlight(JoinHandle<Result<VecDeque<Arc<Block>>, SlateDBError>>),
    Finished(VecDeque<Arc<Block>>),
}

/// Scans a single SST in key order.
///
/// Blocks are read ahead by up to `max_fetch_tasks` spawned tasks, each
/// reading `blocks_to_fetch` consecutive blocks. Dropping the iterator aborts
/// any task still in flight.
pub struct SstIterator {
    table: SsTableHandle,
    index: Arc<SsTableIndex>,
    current_iter: Option<BlockIterator<Arc<Block>>>,
    next_block_idx_to_fetch: usize,
    fetch_tasks: VecDeque<FetchTask>,
    table_store: Arc<TableStore>,
    options: SstIteratorOptions,
    finished: bool,
}

impl SstIterator {
    pub async fn new(
        table: SsTableHandle,
        table_store: Arc<TableStore>,
        options: SstIteratorOptions,
    ) -> Result<Self, SlateDBError> {
        Self::new_from_key(table, table_store, None, options).await
    }

    /// Creates an iterator whose first entry is the first key at or after
    /// `from_key`, or the first key of the SST when `from_key` is `None`.
    pub async fn new_from_key(
        table: SsTableHandle,
        table_store: Arc<TableStore>,
        from_key: Option<&[u8]>,
        options: SstIteratorOptions,
    ) -> Result<Self, SlateDBError> {
        options.validate()?;
        let index = table_store.read_index(&table).await?;
        let mut iter = Self {
            table,
            index,
            current_iter: None,
            next_block_idx_to_fetch: 0,
            fetch_tasks: VecDeque::new(),
            table_store,
            options,
            finished: false,
        };
        match from_key {
            Some(key) => iter.seek(key).await?,
            None => iter.spawn_fetches(),
        }
        Ok(iter)
    }

    fn num_blocks(&self) -> usize {
        self.index.block_meta.len()
    }

    fn spawn_fetches(&mut self) {
        while self.fetch_tasks.len() < self.options.max_fetch_tasks
            && self.next_block_idx_to_fetch < self.num_blocks()
        {
            let blocks_to_fetch = min(
                self.options.blocks_to_fetch,
                self.num_blocks() - self.next_block_idx_to_fetch,
            );
            let table = self.table.clone();
            let table_store = self.table_store.clone();
            let index = self.index.clone();
            let blocks_start = self.next_block_idx_to_fetch;
            let blocks_end = blocks_start + blocks_to_fetch;
            self.fetch_tasks
                .push_back(FetchTask::InFlight(tokio::spawn(async move {
                    table_store
                        .read_blocks(&table, &index, blocks_start..blocks_end)
                        .await
                })));
            self.next_block_idx_to_fetch = blocks_end;
        }
    }

    async fn next_iter(
        &mut self,
        spawn_fetches: bool,
    ) -> Result<Option<BlockIterator<Arc<Block>>>, SlateDBError> {
        loop {
            if spawn_fetches {
                self.spawn_fetches();
            }
            let Some(fetch_task) = self.fetch_tasks.front_mut() else {
                return Ok(None);
            };
            match fetch_task {
                FetchTask::InFlight(jh) => {
                    let blocks = jh.await??;
                    *fetch_task = FetchTask::Finished(blocks);
                }
                FetchTask::Finished(blocks) => {
                    if let Some(block) = blocks.pop_front() {
                        return Ok(Some(BlockIterator::new(block)));
                    }
                    self.fetch_tasks.pop_front();
                }
            }
        }
    }

    fn abort_fetches(&mut self) {
        for task in self.fetch_tasks.drain(..) {
            if let FetchTask::InFlight(jh) = task {
                jh.abort();
            }
        }
    }

    fn stop(&mut self) {
        self.abort_fetches();
        self.current_iter = None;
        self.next_block_idx_to_fetch = self.num_blocks();
        self.finished = true;
    }

    async fn advance_block(&mut self) -> Result<(), SlateDBError> {
        match self.next_iter(true).await {
            Ok(Some(iter)) => self.current_iter = Some(iter),
            Ok(None) => self.stop(),
            Err(e) => {
                self.stop();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn seek_inner(&mut self, next_key: &[u8]) -> Result<(), SlateDBError> {
        if let Some(iter) = self.current_iter.as_mut() {
            iter.seek(next_key).await?;
            if !iter.is_empty() {
                return Ok(());
            }
        }

        // blocks that are already fetched or in flight are scanned before
        // anything is discarded
        let block_idx = self.index.block_covering_key(next_key);
        if block_idx < self.next_block_idx_to_fetch {
            while let Some(mut block_iter) = self.next_iter(false).await? {
                block_iter.seek(next_key).await?;
                if !block_iter.is_empty() {
                    self.current_iter = Some(block_iter);
                    return Ok(());
                }
            }
        }

        self.abort_fetches();
        self.next_block_idx_to_fetch = max(block_idx, self.next_block_idx_to_fetch);
        match self.next_iter(true).await? {
            Some(mut block_iter) => {
                block_iter.seek(next_key).await?;
                self.current_iter = Some(block_iter);
            }
            None => self.stop(),
        }
        Ok(())
    }

    #[cfg(test)]
    fn in_flight_fetches(&self) -> usize {
        self.fetch_tasks
            .iter()
            .filter(|task| matches!(task, FetchTask::InFlight(_)))
            .count()
    }
}

#[async_trait]
impl KeyValueIterator for SstIterator {
    async fn next_entry(&mut self) -> Result<Option<RowEntry>, SlateDBError> {
        while !self.finished {
            let next_entry = match self.current_iter.as_mut() {
                Some(iter) => iter.next_entry().await?,
                None => None,
            };
            match next_entry {
                Some(entry) => return Ok(Some(entry)),
                None => self.advance_block().await?,
            }
        }
        Ok(None)
    }

    async fn seek(&mut self, next_key: &[u8]) -> Result<(), SlateDBError> {
        if self.finished {
            return Ok(());
        }
        let result = self.seek_inner(next_key).await;
        if result.is_err() {
            self.stop();
        }
        result
    }
}

impl Drop for SstIterator {
    fn drop(&mut self) {
        self.abort_fetches();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes_generator::OrderedBytesGenerator;
    use crate::db_state::SsTableId;
    use crate::sst::SsTableFormat;
    use crate::test_utils::{assert_iterator, assert_kv};
    use object_store::{memory::InMemory, ObjectStore};
    use rstest::rstest;
    use ulid::Ulid;

    fn table_store(block_size: usize) -> Arc<TableStore> {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        Arc::new(TableStore::new_with_format(
            object_store,
            SsTableFormat { block_size },
            "",
        ))
    }

    async fn write_numbered_sst(table_store: &TableStore, n: usize) -> SsTableHandle {
        let mut builder = table_store.table_builder();
        for i in 0..n {
            builder
                .add_value(
                    format!("key{:05}", i).as_bytes(),
                    Some(format!("value{}", i).as_bytes()),
                )
                .unwrap();
        }
        let id = SsTableId::Compacted(Ulid::new());
        table_store
            .write_sst(&id, builder.build().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_one_block_sst_iter() {
        let table_store = table_store(4096);
        let mut builder = table_store.table_builder();
        builder.add_value(b"key1", Some(b"value1")).unwrap();
        builder.add_value(b"key2", Some(b"value2")).unwrap();
        builder.add_value(b"key3", Some(b"value3")).unwrap();
        builder.add_value(b"key4", Some(b"value4")).unwrap();
        let encoded = builder.build().unwrap();
        let id = SsTableId::Compacted(Ulid::new());
        table_store.write_sst(&id, encoded).await.unwrap();
        let sst_handle = table_store.open_sst(&id).await.unwrap();
        let index = table_store.read_index(&sst_handle).await.unwrap();
        assert_eq!(index.block_meta.len(), 1);

        let mut iter = SstIterator::new(sst_handle, table_store, SstIteratorOptions::default())
            .await
            .unwrap();
        assert_kv(&iter.next().await.unwrap().unwrap(), b"key1", b"value1");
        assert_kv(&iter.next().await.unwrap().unwrap(), b"key2", b"value2");
        assert_kv(&iter.next().await.unwrap().unwrap(), b"key3", b"value3");
        assert_kv(&iter.next().await.unwrap().unwrap(), b"key4", b"value4");
        assert!(iter.next().await.unwrap().is_none());
        assert!(iter.next().await.unwrap().is_none());
    }

    #[rstest]
    #[case(1, 1)]
    #[case(3, 3)]
    #[case(32, 256)]
    #[tokio::test]
    async fn test_many_block_sst_iter(
        #[case] max_fetch_tasks: usize,
        #[case] blocks_to_fetch: usize,
    ) {
        let table_store = table_store(256);
        let sst_handle = write_numbered_sst(&table_store, 1000).await;
        let index = table_store.read_index(&sst_handle).await.unwrap();
        assert!(index.block_meta.len() > 10);

        let options = SstIteratorOptions::new(max_fetch_tasks, blocks_to_fetch).unwrap();
        let mut iter = SstIterator::new(sst_handle, table_store, options)
            .await
            .unwrap();
        for i in 0..1000 {
            let kv = iter.next().await.unwrap().unwrap();
            assert_kv(
                &kv,
                format!("key{:05}", i).as_bytes(),
                format!("value{}", i).as_bytes(),
            );
        }
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_iter_from_key() {
        let table_store = table_store(128);
        let first_key = [b'a'; 16];
        let mut key_gen = OrderedBytesGenerator::new_with_byte_range(&first_key, b'a', b'z');
        let mut test_case_key_gen = key_gen.clone();
        let first_val = [1u8; 16];
        let mut val_gen = OrderedBytesGenerator::new_with_byte_range(&first_val, 1u8, 26u8);
        let mut test_case_val_gen = val_gen.clone();

        let mut builder = table_store.table_builder();
        for _ in 0..100 {
            builder
                .add_value(key_gen.next().as_ref(), Some(val_gen.next().as_ref()))
                .unwrap();
        }
        let id = SsTableId::Compacted(Ulid::new());
        let sst = table_store
            .write_sst(&id, builder.build().unwrap())
            .await
            .unwrap();

        for i in 0..100 {
            let mut expected_key_gen = test_case_key_gen.clone();
            let mut expected_val_gen = test_case_val_gen.clone();
            let from_key = test_case_key_gen.next();
            test_case_val_gen.next();
            let mut iter = SstIterator::new_from_key(
                sst.clone(),
                table_store.clone(),
                Some(from_key.as_ref()),
                SstIteratorOptions::new(1, 1).unwrap(),
            )
            .await
            .unwrap();
            for _ in 0..100 - i {
                assert_kv(
                    &iter.next().await.unwrap().unwrap(),
                    expected_key_gen.next().as_ref(),
                    expected_val_gen.next().as_ref(),
                );
            }
            assert!(iter.next().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_iter_from_key_between_keys_and_past_end() {
        let table_store = table_store(64);
        let sst_handle = write_numbered_sst(&table_store, 20).await;

        let mut iter = SstIterator::new_from_key(
            sst_handle.clone(),
            table_store.clone(),
            Some(b"key00007a"),
            SstIteratorOptions::default(),
        )
        .await
        .unwrap();
        assert_kv(&iter.next().await.unwrap().unwrap(), b"key00008", b"value8");

        let mut iter = SstIterator::new_from_key(
            sst_handle,
            table_store,
            Some(b"zzz"),
            SstIteratorOptions::default(),
        )
        .await
        .unwrap();
        assert!(iter.next().await.unwrap().is_none());
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_seek_forward_across_blocks() {
        let table_store = table_store(64);
        let sst_handle = write_numbered_sst(&table_store, 50).await;
        let mut iter = SstIterator::new(
            sst_handle,
            table_store,
            SstIteratorOptions::new(2, 2).unwrap(),
        )
        .await
        .unwrap();

        assert_kv(&iter.next().await.unwrap().unwrap(), b"key00000", b"value0");
        iter.seek(b"key00003").await.unwrap();
        assert_kv(&iter.next().await.unwrap().unwrap(), b"key00003", b"value3");
        iter.seek(b"key00040").await.unwrap();
        assert_kv(&iter.next().await.unwrap().unwrap(), b"key00040", b"value40");
        // seeking backwards never rewinds
        iter.seek(b"key00001").await.unwrap();
        assert_kv(&iter.next().await.unwrap().unwrap(), b"key00041", b"value41");
        iter.seek(b"zzz").await.unwrap();
        assert_iterator(&mut iter, Vec::new()).await;
    }

    #[tokio::test]
    async fn test_read_ahead_is_bounded_by_max_fetch_tasks() {
        let table_store = table_store(64);
        let sst_handle = write_numbered_sst(&table_store, 200).await;
        let iter = SstIterator::new(
            sst_handle,
            table_store,
            SstIteratorOptions::new(3, 2).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(iter.fetch_tasks.len(), 3);
        assert_eq!(iter.next_block_idx_to_fetch, 6);
        assert!(iter.in_flight_fetches() <= 3);
    }

    #[tokio::test]
    async fn test_stop_aborts_and_is_terminal() {
        let table_store = table_store(64);
        let sst_handle = write_numbered_sst(&table_store, 200).await;
        let mut iter = SstIterator::new(
            sst_handle,
            table_store,
            SstIteratorOptions::new(4, 1).unwrap(),
        )
        .await
        .unwrap();
        assert!(iter.next().await.unwrap().is_some());
        iter.stop();
        assert!(iter.fetch_tasks.is_empty());
        assert_eq!(iter.in_flight_fetches(), 0);
        assert!(iter.next().await.unwrap().is_none());
        iter.seek(b"key00000").await.unwrap();
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let table_store = table_store(4096);
        let sst_handle = write_numbered_sst(&table_store, 1).await;
        let result = SstIterator::new(
            sst_handle,
            table_store,
            SstIteratorOptions {
                max_fetch_tasks: 0,
                blocks_to_fetch: 1,
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(SlateDBError::InvalidIteratorOptions { .. })
        ));
    }
}
