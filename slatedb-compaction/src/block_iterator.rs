use std::sync::Arc;

use crate::block::Block;
use crate::error::SlateDBError;
use crate::iter::KeyValueIterator;
use crate::row_codec::SstRowCodecV0;
use crate::types::RowEntry;
use async_trait::async_trait;
use bytes::{Buf, Bytes};

pub(crate) trait BlockLike: Send + Sync {
    fn data(&self) -> &Bytes;
    fn offsets(&self) -> &[u16];
}

impl BlockLike for Block {
    fn data(&self) -> &Bytes {
        &self.data
    }

    fn offsets(&self) -> &[u16] {
        &self.offsets
    }
}

impl BlockLike for &Block {
    fn data(&self) -> &Bytes {
        &self.data
    }

    fn offsets(&self) -> &[u16] {
        &self.offsets
    }
}

impl BlockLike for Arc<Block> {
    fn data(&self) -> &Bytes {
        &self.data
    }

    fn offsets(&self) -> &[u16] {
        &self.offsets
    }
}

pub(crate) struct BlockIterator<B: BlockLike> {
    block: B,
    off_off: usize,
    // keys in a block are stored as a shared prefix of the first key plus a suffix
    first_key: Bytes,
}

#[async_trait]
impl<B: BlockLike> KeyValueIterator for BlockIterator<B> {
    async fn next_entry(&mut self) -> Result<Option<RowEntry>, SlateDBError> {
        let entry = self.load_at_current_off()?;
        if entry.is_some() {
            self.advance();
        }
        Ok(entry)
    }

    async fn seek(&mut self, next_key: &[u8]) -> Result<(), SlateDBError> {
        // first row with key >= next_key, never moving backwards
        let mut low = self.off_off;
        let mut high = self.block.offsets().len();
        while low < high {
            let mid = low + (high - low) / 2;
            if self.decode_key_at_index(mid).as_ref() < next_key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        self.off_off = low;
        Ok(())
    }
}

impl<B: BlockLike> BlockIterator<B> {
    pub(crate) fn new(block: B) -> Self {
        BlockIterator {
            first_key: BlockIterator::decode_first_key(&block),
            block,
            off_off: 0,
        }
    }

    fn advance(&mut self) {
        self.off_off += 1;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.off_off >= self.block.offsets().len()
    }

    fn load_at_current_off(&self) -> Result<Option<RowEntry>, SlateDBError> {
        if self.is_empty() {
            return Ok(None);
        }
        let off = self.block.offsets()[self.off_off] as usize;
        let mut cursor = self.block.data().slice(off..);
        let sst_row = SstRowCodecV0::new().decode(&mut cursor)?;
        Ok(Some(RowEntry::new(
            sst_row.restore_full_key(&self.first_key),
            sst_row.value,
        )))
    }

    fn decode_first_key(block: &B) -> Bytes {
        let mut buf = block.data().slice(..);
        if buf.remaining() < 4 {
            return Bytes::new();
        }
        // the first row never shares a prefix
        let _ = buf.get_u16();
        let key_len = buf.get_u16() as usize;
        buf.slice(..key_len)
    }

    fn decode_key_at_index(&self, index: usize) -> Bytes {
        let off = self.block.offsets()[index] as usize;
        let mut cursor = self.block.data().slice(off..);
        SstRowCodecV0::new().decode_key(&mut cursor, &self.first_key)
    }
}
