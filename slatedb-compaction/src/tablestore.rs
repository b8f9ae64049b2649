use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use futures::StreamExt;
use log::{debug, warn};
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use tokio::io::AsyncWriteExt;

use crate::blob::ReadOnlyBlob;
use crate::block::Block;
use crate::config::SstBlockSize;
use crate::db_state::{SsTableHandle, SsTableId};
use crate::error::SlateDBError;
use crate::paths::PathResolver;
use crate::sst::{EncodedSsTable, EncodedSsTableBuilder, SsTableFormat, SsTableIndex};
use crate::types::RowEntry;

/// Reads and writes SSTs under a root path of an object store.
pub struct TableStore {
    object_store: Arc<dyn ObjectStore>,
    sst_format: SsTableFormat,
    path_resolver: PathResolver,
}

struct ReadOnlyObject {
    object_store: Arc<dyn ObjectStore>,
    path: Path,
}

impl ReadOnlyBlob for ReadOnlyObject {
    async fn len(&self) -> Result<u64, SlateDBError> {
        let object_metadata = self.object_store.head(&self.path).await?;
        Ok(object_metadata.size)
    }

    async fn read_range(&self, range: Range<u64>) -> Result<Bytes, SlateDBError> {
        let bytes = self.object_store.get_range(&self.path, range).await?;
        Ok(bytes)
    }
}

impl TableStore {
    pub fn new<P: Into<Path>>(
        object_store: Arc<dyn ObjectStore>,
        sst_block_size: SstBlockSize,
        root_path: P,
    ) -> Self {
        Self::new_with_format(
            object_store,
            SsTableFormat {
                block_size: sst_block_size.as_bytes(),
            },
            root_path,
        )
    }

    pub(crate) fn new_with_format<P: Into<Path>>(
        object_store: Arc<dyn ObjectStore>,
        sst_format: SsTableFormat,
        root_path: P,
    ) -> Self {
        Self {
            object_store,
            sst_format,
            path_resolver: PathResolver::new(root_path),
        }
    }

    /// Returns a writer that streams blocks to the object store as they fill up.
    pub fn table_writer(&self, id: SsTableId) -> EncodedSsTableWriter {
        let path = self.path(&id);
        EncodedSsTableWriter {
            id,
            builder: self.sst_format.table_builder(),
            writer: BufWriter::new(self.object_store.clone(), path),
            blocks_written: 0,
        }
    }

    pub fn table_builder(&self) -> EncodedSsTableBuilder {
        self.sst_format.table_builder()
    }

    /// Persists an SST encoded in memory. Fails if an object already exists at
    /// the id's path.
    pub async fn write_sst(
        &self,
        id: &SsTableId,
        encoded_sst: EncodedSsTable,
    ) -> Result<SsTableHandle, SlateDBError> {
        let data = encoded_sst.remaining_as_bytes();
        let path = self.path(id);
        self.object_store
            .put_opts(
                &path,
                PutPayload::from_bytes(data),
                PutOptions::from(PutMode::Create),
            )
            .await?;
        debug!("wrote sst [id={:?}, path={}]", id, path);
        Ok(SsTableHandle::new(*id, encoded_sst.info))
    }

    /// Delete an SSTable from the object store.
    pub async fn delete_sst(&self, id: &SsTableId) -> Result<(), SlateDBError> {
        let path = self.path(id);
        self.object_store
            .delete(&path)
            .await
            .map_err(SlateDBError::from)
    }

    pub async fn open_sst(&self, id: &SsTableId) -> Result<SsTableHandle, SlateDBError> {
        let obj = self.read_only_object(id);
        let info = self.sst_format.read_info(&obj).await?;
        Ok(SsTableHandle::new(*id, info))
    }

    /// Opens several SSTs concurrently, keeping the order of `ids`.
    pub async fn open_ssts(&self, ids: &[SsTableId]) -> Result<Vec<SsTableHandle>, SlateDBError> {
        try_join_all(ids.iter().map(|id| self.open_sst(id))).await
    }

    /// Lists the ids of every compacted SST under the root path. Objects in the
    /// compacted directory that are not SSTs are skipped.
    pub async fn list_compacted_ssts(&self) -> Result<Vec<SsTableId>, SlateDBError> {
        let mut ids = Vec::new();
        let mut files = self
            .object_store
            .list(Some(&self.path_resolver.compacted_path()));
        while let Some(file) = files.next().await.transpose()? {
            match self.path_resolver.parse_table_id(&file.location) {
                Ok(Some(id @ SsTableId::Compacted(_))) => ids.push(id),
                Err(e) => warn!("error while parsing file id: {}", e),
                _ => warn!(
                    "unexpected file found in compacted directory: {:?}",
                    file.location
                ),
            }
        }
        Ok(ids)
    }

    pub(crate) async fn read_index(
        &self,
        handle: &SsTableHandle,
    ) -> Result<Arc<SsTableIndex>, SlateDBError> {
        let obj = self.read_only_object(&handle.id);
        let index = self.sst_format.read_index(&handle.info, &obj).await?;
        Ok(Arc::new(index))
    }

    /// Reads the blocks in `blocks` from the SST, clamped to the blocks it holds.
    pub(crate) async fn read_blocks(
        &self,
        handle: &SsTableHandle,
        index: &SsTableIndex,
        blocks: Range<usize>,
    ) -> Result<VecDeque<Arc<Block>>, SlateDBError> {
        let obj = self.read_only_object(&handle.id);
        let blocks = self
            .sst_format
            .read_blocks(&handle.info, index, blocks, &obj)
            .await?;
        Ok(blocks.into_iter().map(Arc::new).collect())
    }

    fn read_only_object(&self, id: &SsTableId) -> ReadOnlyObject {
        ReadOnlyObject {
            object_store: self.object_store.clone(),
            path: self.path(id),
        }
    }

    fn path(&self, id: &SsTableId) -> Path {
        self.path_resolver.table_path(id)
    }
}

/// Streams an SST to the object store. Entries must be added in ascending
/// key order.
pub struct EncodedSsTableWriter {
    id: SsTableId,
    builder: EncodedSsTableBuilder,
    writer: BufWriter,
    blocks_written: usize,
}

impl EncodedSsTableWriter {
    pub async fn add(&mut self, entry: RowEntry) -> Result<(), SlateDBError> {
        self.builder.add(entry)?;
        self.drain_blocks().await
    }

    pub async fn add_value(
        &mut self,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(), SlateDBError> {
        self.add(RowEntry::from_optional(key, value)).await
    }

    pub async fn close(mut self) -> Result<SsTableHandle, SlateDBError> {
        let mut encoded_sst = self.builder.build()?;
        while let Some(block) = encoded_sst.unconsumed_blocks.pop_front() {
            self.writer.write_all(block.encoded_bytes.as_ref()).await?;
        }
        self.writer.write_all(encoded_sst.footer.as_ref()).await?;
        self.writer.shutdown().await?;
        debug!(
            "closed sst writer [id={:?}, blocks_written={}]",
            self.id, self.blocks_written
        );
        Ok(SsTableHandle::new(self.id, encoded_sst.info))
    }

    async fn drain_blocks(&mut self) -> Result<(), SlateDBError> {
        while let Some(block) = self.builder.next_block() {
            self.writer.write_all(block.encoded_bytes.as_ref()).await?;
            self.blocks_written += 1;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn blocks_written(&self) -> usize {
        self.blocks_written
    }
}
