use crate::error::SlateDBError;
use crate::types::ValueDeletable;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

bitflags! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub(crate) struct RowFlags: u8 {
        const TOMBSTONE = 0b00000001;
    }
}

/// Encodes a row inside a block. Keys are stored relative to the first key of
/// the block they live in.
///
/// For values:
///
/// ```txt
///  |-----------------------------------------------------------------------------|
///  |       u16      |      u16       |  var        | u8      | u32       |  var  |
///  |----------------|----------------|-------------|---------|-----------|-------|
///  | key_prefix_len | key_suffix_len |  key_suffix | flags   | value_len | value |
///  |-----------------------------------------------------------------------------|
/// ```
///
/// Tombstones (flags & TOMBSTONE == 1) end after the flags byte.
#[derive(Debug, Clone)]
pub(crate) struct SstRowEntry {
    pub key_prefix_len: usize,
    pub key_suffix: Bytes,
    pub value: ValueDeletable,
}

impl SstRowEntry {
    pub fn new(key_prefix_len: usize, key_suffix: Bytes, value: ValueDeletable) -> Self {
        Self {
            key_prefix_len,
            key_suffix,
            value,
        }
    }

    pub fn flags(&self) -> RowFlags {
        match &self.value {
            ValueDeletable::Value(_) => RowFlags::default(),
            ValueDeletable::Tombstone => RowFlags::TOMBSTONE,
        }
    }

    pub fn size(&self) -> usize {
        let mut size = 2 // u16 key_prefix_len
        + 2 // u16 key_suffix_len
        + self.key_suffix.len()
        + 1; // u8 flags
        if let ValueDeletable::Value(value) = &self.value {
            size += 4; // u32 value_len
            size += value.len();
        }
        size
    }

    /// Restores the full key by prepending the shared prefix of the block's first key.
    pub fn restore_full_key(&self, prefix: &Bytes) -> Bytes {
        let mut full_key = BytesMut::with_capacity(self.key_prefix_len + self.key_suffix.len());
        full_key.extend_from_slice(&prefix[..self.key_prefix_len]);
        full_key.extend_from_slice(&self.key_suffix);
        full_key.freeze()
    }
}

pub(crate) struct SstRowCodecV0 {}

impl SstRowCodecV0 {
    pub fn new() -> Self {
        Self {}
    }

    pub fn encode(&self, output: &mut Vec<u8>, row: &SstRowEntry) {
        output.put_u16(row.key_prefix_len as u16);
        output.put_u16(row.key_suffix.len() as u16);
        output.put(row.key_suffix.as_ref());
        output.put_u8(row.flags().bits());
        if let ValueDeletable::Value(value) = &row.value {
            output.put_u32(value.len() as u32);
            output.put(value.as_ref());
        }
    }

    pub fn decode(&self, data: &mut Bytes) -> Result<SstRowEntry, SlateDBError> {
        let key_prefix_len = data.get_u16() as usize;
        let key_suffix_len = data.get_u16() as usize;
        let key_suffix = data.slice(..key_suffix_len);
        data.advance(key_suffix_len);

        let encoded_bits = data.get_u8();
        let flags =
            RowFlags::from_bits(encoded_bits).ok_or_else(|| SlateDBError::InvalidRowFlags {
                encoded_bits,
                known_bits: RowFlags::all().bits(),
            })?;

        if flags.contains(RowFlags::TOMBSTONE) {
            return Ok(SstRowEntry::new(
                key_prefix_len,
                key_suffix,
                ValueDeletable::Tombstone,
            ));
        }

        let value_len = data.get_u32() as usize;
        let value = data.slice(..value_len);
        data.advance(value_len);
        Ok(SstRowEntry::new(
            key_prefix_len,
            key_suffix,
            ValueDeletable::Value(value),
        ))
    }

    /// Decodes only the full key of the row at the cursor, leaving the value untouched.
    pub fn decode_key(&self, data: &mut Bytes, first_key: &Bytes) -> Bytes {
        let key_prefix_len = data.get_u16() as usize;
        let key_suffix_len = data.get_u16() as usize;
        let mut key = BytesMut::with_capacity(key_prefix_len + key_suffix_len);
        key.extend_from_slice(&first_key[..key_prefix_len]);
        key.extend_from_slice(&data[..key_suffix_len]);
        key.freeze()
    }
}
