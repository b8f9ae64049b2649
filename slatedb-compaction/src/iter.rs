use async_trait::async_trait;

use crate::error::SlateDBError;
use crate::types::{KeyValue, RowEntry, ValueDeletable};

/// An ordered scan over rows that may live in remote blocks, which is why
/// every step is async.
#[async_trait]
pub trait KeyValueIterator: Send + Sync {
    /// Returns the next live key-value pair, skipping tombstones.
    async fn next(&mut self) -> Result<Option<KeyValue>, SlateDBError> {
        while let Some(entry) = self.next_entry().await? {
            if let ValueDeletable::Value(value) = entry.value {
                return Ok(Some(KeyValue {
                    key: entry.key,
                    value,
                }));
            }
        }
        Ok(None)
    }

    /// Returns the next row, tombstones included.
    ///
    /// Once `None` has been returned, every further call returns `None`.
    async fn next_entry(&mut self) -> Result<Option<RowEntry>, SlateDBError>;

    /// Moves forward to the first key at or after `next_key`. Keys behind the
    /// current position are never revisited.
    async fn seek(&mut self, next_key: &[u8]) -> Result<(), SlateDBError>;
}
