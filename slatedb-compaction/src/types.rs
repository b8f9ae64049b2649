use bytes::Bytes;

/// Represents a key-value pair known not to be a tombstone.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

impl<K, V> From<(&K, &V)> for KeyValue
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    fn from(record: (&K, &V)) -> Self {
        let key = Bytes::copy_from_slice(record.0.as_ref());
        let value = Bytes::copy_from_slice(record.1.as_ref());
        KeyValue { key, value }
    }
}

/// Represents a key-value pair that may be a tombstone.
///
/// This is the entry type written to and read back from SSTs.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEntry {
    /// The key bytes.
    pub key: Bytes,
    /// The value, which may be a regular value or a tombstone.
    pub value: ValueDeletable,
}

impl RowEntry {
    pub(crate) fn new(key: Bytes, value: ValueDeletable) -> Self {
        Self { key, value }
    }

    /// Builds an entry from a key and an optional value. `None` is a tombstone.
    pub(crate) fn from_optional(key: &[u8], value: Option<&[u8]>) -> Self {
        let value = match value {
            Some(v) => ValueDeletable::Value(Bytes::copy_from_slice(v)),
            None => ValueDeletable::Tombstone,
        };
        Self::new(Bytes::copy_from_slice(key), value)
    }

    #[cfg(test)]
    pub(crate) fn new_value(key: &[u8], value: &[u8]) -> Self {
        Self::new(
            Bytes::copy_from_slice(key),
            ValueDeletable::Value(Bytes::copy_from_slice(value)),
        )
    }

    #[cfg(test)]
    pub(crate) fn new_tombstone(key: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(key), ValueDeletable::Tombstone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDeletable {
    Value(Bytes),
    Tombstone,
}

impl ValueDeletable {
    pub fn len(&self) -> usize {
        match self {
            ValueDeletable::Value(v) => v.len(),
            ValueDeletable::Tombstone => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            ValueDeletable::Value(v) => Some(v.clone()),
            ValueDeletable::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, ValueDeletable::Tombstone)
    }
}
