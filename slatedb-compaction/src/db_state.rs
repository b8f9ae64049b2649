use crate::error::SlateDBError;
use bytes::Bytes;
use log::debug;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use ulid::Ulid;
use SsTableId::{Compacted, Wal};

/// Identifies a single SST file. WAL SSTs are numbered by the writer; every
/// other SST (flushed L0 files and compaction outputs) gets a ULID, which
/// sorts by creation time.
#[derive(Clone, PartialEq, Debug, Hash, Eq, Copy)]
pub enum SsTableId {
    Wal(u64),
    Compacted(Ulid),
}

impl SsTableId {
    pub fn wal_id(&self) -> Option<u64> {
        match self {
            Wal(wal_id) => Some(*wal_id),
            Compacted(_) => None,
        }
    }

    pub fn compacted_id(&self) -> Option<Ulid> {
        match self {
            Wal(_) => None,
            Compacted(ulid) => Some(*ulid),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SsTableInfo {
    pub first_key: Option<Bytes>,
    pub index_offset: u64,
    pub index_len: u64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SsTableHandle {
    pub id: SsTableId,
    pub info: SsTableInfo,
}

impl Debug for SsTableHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "SsTableHandle({:?}, {:?})",
            self.id, self.info.first_key
        ))
    }
}

impl SsTableHandle {
    pub fn new(id: SsTableId, info: SsTableInfo) -> Self {
        SsTableHandle { id, info }
    }

    pub(crate) fn first_key_at_or_before(&self, key: &[u8]) -> bool {
        self.info
            .first_key
            .as_ref()
            .map_or(true, |first_key| first_key.as_ref() <= key)
    }

    pub(crate) fn estimate_size(&self) -> u64 {
        // the index is the last thing written before the info footer
        self.info.index_offset + self.info.index_len
    }
}

impl AsRef<SsTableHandle> for SsTableHandle {
    fn as_ref(&self) -> &SsTableHandle {
        self
    }
}

/// A fully merged compaction level. The SSTs hold disjoint, ascending key
/// ranges: SST `i` covers `[first_key_i, first_key_{i+1})`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SortedRun {
    pub id: u32,
    pub ssts: Vec<SsTableHandle>,
}

impl SortedRun {
    pub fn new(id: u32, ssts: Vec<SsTableHandle>) -> Self {
        Self { id, ssts }
    }

    pub(crate) fn estimate_size(&self) -> u64 {
        self.ssts.iter().map(|sst| sst.estimate_size()).sum()
    }

    /// Returns the index of the last SST whose first key is at or before `key`,
    /// or `None` if every SST starts after it.
    pub fn find_sst_with_range_covering_key_idx(&self, key: &[u8]) -> Option<usize> {
        let first_sst = self
            .ssts
            .partition_point(|sst| sst.first_key_at_or_before(key));
        if first_sst > 0 {
            return Some(first_sst - 1);
        }
        None
    }

    pub fn find_sst_with_range_covering_key(&self, key: &[u8]) -> Option<&SsTableHandle> {
        self.find_sst_with_range_covering_key_idx(key)
            .map(|idx| &self.ssts[idx])
    }

    /// The SSTs a scan starting at `key` has to visit. A key that sorts before
    /// the whole run keeps every SST.
    pub fn tables_from_key(&self, key: &[u8]) -> &[SsTableHandle] {
        let start = self.find_sst_with_range_covering_key_idx(key).unwrap_or(0);
        &self.ssts[start..]
    }
}

/// The layout of the database at one point in time. Snapshots are never
/// changed in place; the compactor publishes a modified copy instead.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CoreDbState {
    /// Newest L0 SST already folded into a sorted run.
    pub l0_last_compacted: Option<Ulid>,
    /// Flushed SSTs, newest first.
    pub l0: VecDeque<SsTableHandle>,
    /// Sorted runs in strictly decreasing id order.
    pub compacted: Vec<SortedRun>,
    pub next_wal_sst_id: u64,
    pub last_compacted_wal_sst_id: u64,
}

impl Default for CoreDbState {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreDbState {
    pub fn new() -> Self {
        Self {
            l0_last_compacted: None,
            l0: VecDeque::new(),
            compacted: vec![],
            next_wal_sst_id: 1,
            last_compacted_wal_sst_id: 0,
        }
    }

    pub fn log_db_runs(&self) {
        let l0s: Vec<_> = self.l0.iter().map(|l0| l0.estimate_size()).collect();
        let compacted: Vec<_> = self
            .compacted
            .iter()
            .map(|sr| (sr.id, sr.estimate_size()))
            .collect();
        debug!("DB Levels:");
        debug!("-----------------");
        debug!("{:?}", l0s);
        debug!("{:?}", compacted);
        debug!("-----------------");
    }

    pub(crate) fn check_compacted_order(&self) -> Result<(), SlateDBError> {
        for pair in self.compacted.windows(2) {
            if pair[0].id <= pair[1].id {
                return Err(SlateDBError::CompactedRunsOutOfOrder {
                    previous: pair[0].id,
                    next: pair[1].id,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn check_l0_ids(&self) -> Result<(), SlateDBError> {
        match self.l0.iter().find_map(|sst| sst.id.wal_id()) {
            Some(wal_id) => Err(SlateDBError::UnexpectedWalSstInL0(wal_id)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn handle(first_key: &'static [u8]) -> SsTableHandle {
        SsTableHandle::new(
            SsTableId::Compacted(Ulid::new()),
            SsTableInfo {
                first_key: Some(Bytes::from_static(first_key)),
                ..SsTableInfo::default()
            },
        )
    }

    fn run() -> SortedRun {
        SortedRun::new(0, vec![handle(b"b"), handle(b"f"), handle(b"m")])
    }

    #[rstest]
    #[case::before_run(b"a".as_slice(), None)]
    #[case::first_key_of_first_sst(b"b".as_slice(), Some(0))]
    #[case::inside_first_sst(b"c".as_slice(), Some(0))]
    #[case::first_key_of_second_sst(b"f".as_slice(), Some(1))]
    #[case::just_before_second_sst(b"ezzz".as_slice(), Some(0))]
    #[case::after_run(b"z".as_slice(), Some(2))]
    fn test_find_sst_with_range_covering_key_idx(
        #[case] key: &[u8],
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(run().find_sst_with_range_covering_key_idx(key), expected);
    }

    #[test]
    fn test_tables_from_key_keeps_whole_run_for_key_before_run() {
        let run = run();
        assert_eq!(run.tables_from_key(b"a").len(), 3);
        assert_eq!(run.tables_from_key(b"g"), &run.ssts[1..]);
        assert!(run.find_sst_with_range_covering_key(b"a").is_none());
    }

    #[test]
    fn test_check_compacted_order() {
        let mut state = CoreDbState::new();
        state.compacted = vec![SortedRun::new(3, vec![]), SortedRun::new(1, vec![])];
        assert!(state.check_compacted_order().is_ok());

        state.compacted.push(SortedRun::new(1, vec![]));
        assert!(matches!(
            state.check_compacted_order(),
            Err(SlateDBError::CompactedRunsOutOfOrder {
                previous: 1,
                next: 1
            })
        ));
    }

    #[test]
    fn test_check_l0_ids_rejects_wal_ssts() {
        let mut state = CoreDbState::new();
        state.l0.push_back(handle(b"a"));
        assert!(state.check_l0_ids().is_ok());
        state
            .l0
            .push_back(SsTableHandle::new(SsTableId::Wal(9), SsTableInfo::default()));
        assert!(matches!(
            state.check_l0_ids(),
            Err(SlateDBError::UnexpectedWalSstInL0(9))
        ));
    }
}
