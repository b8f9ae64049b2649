use std::collections::VecDeque;
use std::ops::Range;

use bytes::{Buf, BufMut, Bytes};

use crate::blob::ReadOnlyBlob;
use crate::block::{Block, BlockBuilder};
use crate::db_state::SsTableInfo;
use crate::error::SlateDBError;
use crate::types::RowEntry;

pub(crate) const SST_FORMAT_VERSION: u16 = 1;

// 8 bytes for the info offset + 2 bytes for the version
const NUM_FOOTER_BYTES: usize = 10;
const NUM_FOOTER_BYTES_LONG: u64 = NUM_FOOTER_BYTES as u64;

const SIZEOF_U32: usize = std::mem::size_of::<u32>();

/// Key lengths are stored as `u16` in rows, the index and the info block.
pub(crate) const MAX_KEY_SIZE: usize = u16::MAX as usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BlockMeta {
    pub(crate) offset: u64,
    pub(crate) first_key: Bytes,
}

/// Per-block offsets and first keys, stored after the data blocks.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub(crate) struct SsTableIndex {
    pub(crate) block_meta: Vec<BlockMeta>,
}

impl SsTableIndex {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32(self.block_meta.len() as u32);
        for meta in &self.block_meta {
            buf.put_u64(meta.offset);
            buf.put_u16(meta.first_key.len() as u16);
            buf.put_slice(&meta.first_key);
        }
    }

    fn decode(mut data: Bytes) -> Result<Self, SlateDBError> {
        if data.remaining() < SIZEOF_U32 {
            return Err(SlateDBError::EmptyBlockMeta);
        }
        let num_blocks = data.get_u32() as usize;
        let mut block_meta = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            if data.remaining() < 10 {
                return Err(SlateDBError::EmptyBlockMeta);
            }
            let offset = data.get_u64();
            let key_len = data.get_u16() as usize;
            if data.remaining() < key_len {
                return Err(SlateDBError::EmptyBlockMeta);
            }
            let first_key = data.split_to(key_len);
            block_meta.push(BlockMeta { offset, first_key });
        }
        Ok(Self { block_meta })
    }

    /// Index of the block a seek to `key` has to start in.
    pub(crate) fn block_covering_key(&self, key: &[u8]) -> usize {
        self.block_meta
            .partition_point(|meta| meta.first_key.as_ref() <= key)
            .saturating_sub(1)
    }
}

impl SsTableInfo {
    pub(crate) fn encode(info: &SsTableInfo, buf: &mut Vec<u8>) {
        let start = buf.len();
        match &info.first_key {
            Some(first_key) => {
                buf.put_u8(1);
                buf.put_u16(first_key.len() as u16);
                buf.put_slice(first_key);
            }
            None => buf.put_u8(0),
        }
        buf.put_u64(info.index_offset);
        buf.put_u64(info.index_len);
        let checksum = crc32fast::hash(&buf[start..]);
        buf.put_u32(checksum);
    }

    pub(crate) fn decode(raw_info: Bytes) -> Result<SsTableInfo, SlateDBError> {
        if raw_info.len() <= SIZEOF_U32 {
            return Err(SlateDBError::EmptyBlockMeta);
        }
        let mut data = validate_checksum(raw_info)?;
        let first_key = match data.get_u8() {
            0 => None,
            _ => {
                let len = data.get_u16() as usize;
                Some(data.split_to(len))
            }
        };
        if data.remaining() < 16 {
            return Err(SlateDBError::EmptyBlockMeta);
        }
        Ok(SsTableInfo {
            first_key,
            index_offset: data.get_u64(),
            index_len: data.get_u64(),
        })
    }
}

/// validate checksum and return the actual data bytes
pub(crate) fn validate_checksum(bytes: Bytes) -> Result<Bytes, SlateDBError> {
    if bytes.len() < SIZEOF_U32 {
        return Err(SlateDBError::ChecksumMismatch);
    }
    let data_bytes = bytes.slice(..bytes.len() - SIZEOF_U32);
    let mut checksum_bytes = bytes.slice(bytes.len() - SIZEOF_U32..);
    let stored_checksum = checksum_bytes.get_u32();
    if crc32fast::hash(&data_bytes) != stored_checksum {
        return Err(SlateDBError::ChecksumMismatch);
    }
    Ok(data_bytes)
}

#[derive(Clone, Debug)]
pub(crate) struct SsTableFormat {
    pub(crate) block_size: usize,
}

impl Default for SsTableFormat {
    fn default() -> Self {
        Self { block_size: 4096 }
    }
}

impl SsTableFormat {
    pub(crate) async fn read_info(
        &self,
        obj: &impl ReadOnlyBlob,
    ) -> Result<SsTableInfo, SlateDBError> {
        let obj_len = obj.len().await?;
        if obj_len <= NUM_FOOTER_BYTES_LONG {
            return Err(SlateDBError::EmptySSTable);
        }
        let footer = obj
            .read_range((obj_len - NUM_FOOTER_BYTES_LONG)..obj_len)
            .await?;
        if footer.len() != NUM_FOOTER_BYTES {
            return Err(SlateDBError::EmptySSTable);
        }

        // last 2 bytes of the footer hold the version
        let version = footer.slice(8..NUM_FOOTER_BYTES).get_u16();
        if version != SST_FORMAT_VERSION {
            return Err(SlateDBError::InvalidVersion {
                expected_version: SST_FORMAT_VERSION,
                actual_version: version,
            });
        }

        let info_offset = footer.slice(0..8).get_u64();
        if info_offset >= obj_len - NUM_FOOTER_BYTES_LONG {
            return Err(SlateDBError::EmptyBlockMeta);
        }
        let info_bytes = obj
            .read_range(info_offset..obj_len - NUM_FOOTER_BYTES_LONG)
            .await?;
        SsTableInfo::decode(info_bytes)
    }

    pub(crate) async fn read_index(
        &self,
        info: &SsTableInfo,
        obj: &impl ReadOnlyBlob,
    ) -> Result<SsTableIndex, SlateDBError> {
        let index_off = info.index_offset;
        let index_end = index_off + info.index_len;
        let index_bytes = obj.read_range(index_off..index_end).await?;
        SsTableIndex::decode(validate_checksum(index_bytes)?)
    }

    #[cfg(test)]
    pub(crate) fn read_index_raw(
        &self,
        info: &SsTableInfo,
        sst_bytes: &Bytes,
    ) -> Result<SsTableIndex, SlateDBError> {
        let index_off = info.index_offset as usize;
        let index_end = index_off + info.index_len as usize;
        SsTableIndex::decode(validate_checksum(sst_bytes.slice(index_off..index_end))?)
    }

    fn block_range(&self, blocks: Range<usize>, info: &SsTableInfo, index: &SsTableIndex) -> Range<u64> {
        let end_offset = match index.block_meta.get(blocks.end) {
            Some(next_block_meta) => next_block_meta.offset,
            None => info.index_offset,
        };
        index.block_meta[blocks.start].offset..end_offset
    }

    /// Reads the blocks in `blocks` with a single ranged read.
    pub(crate) async fn read_blocks(
        &self,
        info: &SsTableInfo,
        index: &SsTableIndex,
        blocks: Range<usize>,
        obj: &impl ReadOnlyBlob,
    ) -> Result<VecDeque<Block>, SlateDBError> {
        let blocks = blocks.start..blocks.end.min(index.block_meta.len());
        if blocks.start >= blocks.end {
            return Ok(VecDeque::new());
        }
        let range = self.block_range(blocks.clone(), info, index);
        let start_range = range.start;
        let end_range = range.end;
        let bytes: Bytes = obj.read_range(range).await?;
        let mut decoded_blocks = VecDeque::with_capacity(blocks.len());
        for block in blocks {
            let block_start = index.block_meta[block].offset;
            let block_end = index
                .block_meta
                .get(block + 1)
                .map_or(end_range, |meta| meta.offset);
            let block_bytes =
                bytes.slice((block_start - start_range) as usize..(block_end - start_range) as usize);
            decoded_blocks.push_back(Block::decode(validate_checksum(block_bytes)?)?);
        }
        Ok(decoded_blocks)
    }

    pub(crate) fn table_builder(&self) -> EncodedSsTableBuilder {
        EncodedSsTableBuilder::new(self.block_size)
    }
}

pub(crate) struct EncodedSsTableBlock {
    pub(crate) encoded_bytes: Bytes,
}

/// An SST encoded in memory. Blocks that were already handed to a writer are
/// no longer held here.
pub struct EncodedSsTable {
    pub(crate) info: SsTableInfo,
    pub(crate) index: SsTableIndex,
    pub(crate) unconsumed_blocks: VecDeque<EncodedSsTableBlock>,
    pub(crate) footer: Bytes,
}

impl EncodedSsTable {
    pub(crate) fn put_remaining<T: BufMut>(&self, buf: &mut T) {
        for chunk in self.unconsumed_blocks.iter() {
            buf.put_slice(chunk.encoded_bytes.as_ref())
        }
        buf.put_slice(self.footer.as_ref());
    }

    pub(crate) fn remaining_as_bytes(&self) -> Bytes {
        let total_size = self
            .unconsumed_blocks
            .iter()
            .map(|chunk| chunk.encoded_bytes.len())
            .sum::<usize>()
            + self.footer.len();
        let mut data = Vec::<u8>::with_capacity(total_size);
        self.put_remaining(&mut data);
        Bytes::from(data)
    }

    pub fn info(&self) -> &SsTableInfo {
        &self.info
    }
}

/// Builds an SST from key-value pairs added in ascending key order.
pub struct EncodedSsTableBuilder {
    builder: BlockBuilder,
    block_first_key: Option<Bytes>,
    sst_first_key: Option<Bytes>,
    block_meta: Vec<BlockMeta>,
    current_len: u64,
    blocks: VecDeque<EncodedSsTableBlock>,
    block_size: usize,
}

impl EncodedSsTableBuilder {
    fn new(block_size: usize) -> Self {
        Self {
            builder: BlockBuilder::new(block_size),
            block_first_key: None,
            sst_first_key: None,
            block_meta: Vec::new(),
            current_len: 0,
            blocks: VecDeque::new(),
            block_size,
        }
    }

    /// Appends `entry`, starting a new block when the current one is full.
    /// Keys longer than `u16::MAX` bytes are rejected.
    pub fn add(&mut self, entry: RowEntry) -> Result<(), SlateDBError> {
        if entry.key.len() > MAX_KEY_SIZE {
            return Err(SlateDBError::KeyTooLarge {
                key_size: entry.key.len(),
                max_key_size: MAX_KEY_SIZE,
            });
        }
        let key = entry.key.clone();
        if !self.builder.add(entry.clone()) {
            self.finish_block()?;
            let added = self.builder.add(entry);
            debug_assert!(added, "an empty block accepts any entry");
        }
        if self.block_first_key.is_none() {
            self.block_first_key = Some(key.clone());
        }
        if self.sst_first_key.is_none() {
            self.sst_first_key = Some(key);
        }
        Ok(())
    }

    pub fn add_value(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(), SlateDBError> {
        self.add(RowEntry::from_optional(key, value))
    }

    pub(crate) fn next_block(&mut self) -> Option<EncodedSsTableBlock> {
        self.blocks.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn num_blocks(&self) -> usize {
        self.block_meta.len()
    }

    fn finish_block(&mut self) -> Result<(), SlateDBError> {
        if self.builder.is_empty() {
            return Ok(());
        }
        let builder = std::mem::replace(&mut self.builder, BlockBuilder::new(self.block_size));
        let encoded_block = builder.build()?.encode();
        let mut encoded_bytes = Vec::with_capacity(encoded_block.len() + SIZEOF_U32);
        encoded_bytes.put_slice(&encoded_block);
        encoded_bytes.put_u32(crc32fast::hash(&encoded_block));

        self.block_meta.push(BlockMeta {
            offset: self.current_len,
            first_key: self.block_first_key.take().unwrap_or_default(),
        });
        self.current_len += encoded_bytes.len() as u64;
        self.blocks.push_back(EncodedSsTableBlock {
            encoded_bytes: Bytes::from(encoded_bytes),
        });
        Ok(())
    }

    /// Builds the SST from the current state.
    ///
    /// # Format
    ///
    /// +---------------------------------------------------+
    /// |                Data Blocks                        |
    /// |    (each followed by a CRC32 of its bytes)        |
    /// +---------------------------------------------------+
    /// |                Index Block                        |
    /// |    (offset + first key per block, CRC32)          |
    /// +---------------------------------------------------+
    /// |                Info Block                         |
    /// |    (first key, index offset/len, CRC32)           |
    /// +---------------------------------------------------+
    /// |             8-byte Info Offset                    |
    /// +---------------------------------------------------+
    /// |                 2-byte Version                    |
    /// +---------------------------------------------------+
    pub fn build(mut self) -> Result<EncodedSsTable, SlateDBError> {
        self.finish_block()?;
        if self.block_meta.is_empty() {
            return Err(SlateDBError::EmptySSTable);
        }
        let mut buf = Vec::new();

        let index = SsTableIndex {
            block_meta: self.block_meta,
        };
        let index_offset = self.current_len;
        index.encode(&mut buf);
        let checksum = crc32fast::hash(&buf);
        buf.put_u32(checksum);
        let index_len = buf.len() as u64;

        let info_offset = self.current_len + buf.len() as u64;
        let info = SsTableInfo {
            first_key: self.sst_first_key,
            index_offset,
            index_len,
        };
        SsTableInfo::encode(&info, &mut buf);

        buf.put_u64(info_offset);
        buf.put_u16(SST_FORMAT_VERSION);
        Ok(EncodedSsTable {
            info,
            index,
            unconsumed_blocks: self.blocks,
            footer: Bytes::from(buf),
        })
    }
}
