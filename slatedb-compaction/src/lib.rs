#![cfg_attr(test, allow(clippy::unwrap_used))]
#![warn(clippy::panic)]
#![cfg_attr(test, allow(clippy::panic))]
#![allow(clippy::result_large_err)]

//! Compaction bookkeeping and sorted run scans for an LSM tree whose SSTs
//! live in an object store.
//!
//! * [`CompactorState`] tracks submitted compactions and owns the current
//!   [`CoreDbState`] snapshot. Refreshing from the writer and finishing a
//!   compaction each publish a new snapshot.
//! * [`SortedRunIterator`] scans one [`SortedRun`] in key order with bounded
//!   block read-ahead, optionally starting from a key.
//! * [`TableStore`] writes and reads the SSTs those two operate on.

/// Re-export the bytes crate.
///
/// This is useful for users of the crate who want to build keys and values
/// without having to depend on the bytes crate directly.
pub use bytes;

/// Re-export the object store crate.
///
/// This is useful for users of the crate who want to hand a store to
/// [`TableStore`] without having to depend on the object store crate directly.
pub use object_store;

pub use compactor_state::stats as compactor_state_stats;
pub use compactor_state::{Compaction, CompactionStatus, CompactorState, SourceId};
pub use config::{ScanSettings, Settings, SstBlockSize, SstIteratorOptions};
pub use db_state::{CoreDbState, SortedRun, SsTableHandle, SsTableId, SsTableInfo};
pub use error::{Error, ErrorKind, SlateDBError};
pub use iter::KeyValueIterator;
pub use sorted_run_iterator::SortedRunIterator;
pub use sst::{EncodedSsTable, EncodedSsTableBuilder};
pub use sst_iter::SstIterator;
pub use tablestore::{EncodedSsTableWriter, TableStore};
pub use types::{KeyValue, RowEntry, ValueDeletable};

pub mod config;
pub mod stats;

mod blob;
mod block;
mod block_iterator;
#[cfg(test)]
mod bytes_generator;
mod compactor_state;
mod db_state;
mod error;
mod iter;
mod paths;
mod row_codec;
mod sorted_run_iterator;
mod sst;
mod sst_iter;
mod tablestore;
#[cfg(test)]
mod test_utils;
mod types;
