use crate::error::SlateDBError;
use crate::row_codec::{SstRowCodecV0, SstRowEntry};
use crate::types::RowEntry;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub(crate) const SIZEOF_U16: usize = std::mem::size_of::<u16>();

#[derive(Debug, Eq, PartialEq)]
pub(crate) struct Block {
    pub(crate) data: Bytes,
    pub(crate) offsets: Vec<u16>,
}

impl Block {
    #[rustfmt::skip]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_slice(&self.data);
        for offset in &self.offsets {
            buf.put_u16(*offset);
        }
        buf.put_u16(self.offsets.len() as u16);
        buf.freeze()
    }

    #[rustfmt::skip]
    pub fn decode(bytes: Bytes) -> Result<Self, SlateDBError> {
        let data = bytes.as_ref();
        if data.len() < SIZEOF_U16 {
            return Err(SlateDBError::EmptyBlock);
        }
        let entry_offsets_len = (&data[data.len() - SIZEOF_U16..]).get_u16() as usize;
        let trailer_len = SIZEOF_U16 + entry_offsets_len * SIZEOF_U16;
        if entry_offsets_len == 0 || data.len() < trailer_len {
            return Err(SlateDBError::EmptyBlock);
        }
        let data_end = data.len() - trailer_len;
        let offsets = data[data_end..data.len() - SIZEOF_U16]
            .chunks(SIZEOF_U16)
            .map(|mut x| x.get_u16())
            .collect();
        Ok(Self {
            data: bytes.slice(0..data_end),
            offsets,
        })
    }

    /// Returns the size of the encoded block in bytes.
    #[rustfmt::skip]
    pub(crate) fn size(&self) -> usize {
        self.data.len()                   // data byte length
        + self.offsets.len() * SIZEOF_U16 // offsets as u16's
        + SIZEOF_U16                      // number of offsets in the block
    }
}

pub(crate) struct BlockBuilder {
    offsets: Vec<u16>,
    data: Vec<u8>,
    block_size: usize,
    first_key: Bytes,
}

fn compute_prefix(lhs: &[u8], rhs: &[u8]) -> usize {
    std::iter::zip(lhs, rhs).take_while(|(a, b)| a == b).count()
}

impl BlockBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            offsets: Vec::new(),
            data: Vec::new(),
            block_size,
            first_key: Bytes::new(),
        }
    }

    #[rustfmt::skip]
    #[inline]
    fn estimated_size(&self) -> usize {
        SIZEOF_U16                        // number of rows in the block
        + self.offsets.len() * SIZEOF_U16 // offsets
        + self.data.len()                 // encoded rows
    }

    /// Appends `entry` and returns true, or returns false if the block is full.
    /// An empty block always accepts its first entry, even an oversized one.
    #[must_use]
    pub fn add(&mut self, entry: RowEntry) -> bool {
        let key_prefix_len = compute_prefix(&self.first_key, &entry.key);
        let row = SstRowEntry::new(
            key_prefix_len,
            entry.key.slice(key_prefix_len..),
            entry.value,
        );

        if self.estimated_size() + row.size() + SIZEOF_U16 > self.block_size && !self.is_empty() {
            return false;
        }

        // the empty key is a valid first key, so emptiness of the offsets decides
        if self.is_empty() {
            self.first_key = entry.key;
        }
        self.offsets.push(self.data.len() as u16);
        SstRowCodecV0::new().encode(&mut self.data, &row);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn build(self) -> Result<Block, SlateDBError> {
        if self.is_empty() {
            return Err(SlateDBError::EmptyBlock);
        }
        Ok(Block {
            data: Bytes::from(self.data),
            offsets: self.offsets,
        })
    }
}
