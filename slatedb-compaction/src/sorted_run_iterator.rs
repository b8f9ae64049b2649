use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::SstIteratorOptions;
use crate::db_state::{SortedRun, SsTableHandle};
use crate::error::SlateDBError;
use crate::iter::KeyValueIterator;
use crate::sst_iter::SstIterator;
use crate::tablestore::TableStore;
use crate::types::RowEntry;

/// Scans a sorted run in key order.
///
/// The SSTs of a run cover disjoint ascending ranges, so the scan is the
/// concatenation of one [`SstIterator`] per SST. Only the SST currently being
/// read has an open iterator; the next one is opened once it is exhausted.
pub struct SortedRunIterator {
    current_iter: Option<SstIterator>,
    ssts: VecDeque<SsTableHandle>,
    table_store: Arc<TableStore>,
    options: SstIteratorOptions,
}

impl SortedRunIterator {
    pub async fn new(
        sorted_run: &SortedRun,
        table_store: Arc<TableStore>,
        options: SstIteratorOptions,
    ) -> Result<Self, SlateDBError> {
        Self::new_opts(&sorted_run.ssts, None, table_store, options).await
    }

    /// Creates an iterator whose first entry is the first key in the run at or
    /// after `from_key`. A key before the run scans the whole run; a key after
    /// it yields nothing.
    pub async fn new_from_key(
        sorted_run: &SortedRun,
        from_key: &[u8],
        table_store: Arc<TableStore>,
        options: SstIteratorOptions,
    ) -> Result<Self, SlateDBError> {
        Self::new_opts(
            sorted_run.tables_from_key(from_key),
            Some(from_key),
            table_store,
            options,
        )
        .await
    }

    async fn new_opts(
        ssts: &[SsTableHandle],
        from_key: Option<&[u8]>,
        table_store: Arc<TableStore>,
        options: SstIteratorOptions,
    ) -> Result<Self, SlateDBError> {
        options.validate()?;
        let mut ssts: VecDeque<SsTableHandle> = ssts.iter().cloned().collect();
        let current_iter = match ssts.pop_front() {
            None => None,
            Some(table) => Some(
                SstIterator::new_from_key(table, table_store.clone(), from_key, options).await?,
            ),
        };
        Ok(Self {
            current_iter,
            ssts,
            table_store,
            options,
        })
    }

    /// Ends the scan early. Pending block fetches are aborted and every later
    /// call to `next_entry` returns `None`.
    pub fn stop(&mut self) {
        self.current_iter = None;
        self.ssts.clear();
    }

    async fn open_next_sst(&mut self, from_key: Option<&[u8]>) -> Result<(), SlateDBError> {
        // replacing the iterator drops the old one, which aborts its fetches
        self.current_iter = match self.ssts.pop_front() {
            None => None,
            Some(table) => Some(
                SstIterator::new_from_key(
                    table,
                    self.table_store.clone(),
                    from_key,
                    self.options,
                )
                .await?,
            ),
        };
        Ok(())
    }
}

#[async_trait]
impl KeyValueIterator for SortedRunIterator {
    async fn next_entry(&mut self) -> Result<Option<RowEntry>, SlateDBError> {
        while let Some(iter) = self.current_iter.as_mut() {
            if let Some(entry) = iter.next_entry().await? {
                return Ok(Some(entry));
            }
            self.open_next_sst(None).await?;
        }
        Ok(None)
    }

    async fn seek(&mut self, next_key: &[u8]) -> Result<(), SlateDBError> {
        if self.current_iter.is_none() {
            return Ok(());
        }
        let mut skip = 0;
        while self
            .ssts
            .get(skip)
            .is_some_and(|sst| sst.first_key_at_or_before(next_key))
        {
            skip += 1;
        }
        if skip == 0 {
            if let Some(iter) = self.current_iter.as_mut() {
                iter.seek(next_key).await?;
            }
            return Ok(());
        }
        self.ssts.drain(..skip - 1);
        self.open_next_sst(Some(next_key)).await
    }
}
