use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tracing::instrument;
use ulid::Ulid;

use crate::compactor_state::stats::CompactorStateStats;
use crate::compactor_state::CompactionStatus::Submitted;
use crate::db_state::{CoreDbState, SortedRun, SsTableHandle};
use crate::error::SlateDBError;
use crate::stats::StatRegistry;

/// An input to a compaction: a whole sorted run, or a single L0 SST.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum SourceId {
    SortedRun(u32),
    Sst(Ulid),
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceId::SortedRun(id) => write!(f, "{}", id),
            SourceId::Sst(_) => write!(f, "l0"),
        }
    }
}

impl SourceId {
    pub fn maybe_unwrap_sorted_run(&self) -> Option<u32> {
        match self {
            SourceId::SortedRun(id) => Some(*id),
            SourceId::Sst(_) => None,
        }
    }

    pub fn maybe_unwrap_sst(&self) -> Option<Ulid> {
        match self {
            SourceId::SortedRun(_) => None,
            SourceId::Sst(ulid) => Some(*ulid),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionStatus {
    Submitted,
    InProgress,
}

/// A request to merge `sources` into the sorted run `destination`. L0 sources
/// are listed newest first, the same order as [`CoreDbState::l0`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compaction {
    pub status: CompactionStatus,
    pub sources: Vec<SourceId>,
    pub destination: u32,
}

impl Display for Compaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let displayed_sources: Vec<_> = self.sources.iter().map(|s| format!("{}", s)).collect();
        write!(
            f,
            "{:?} -> {}: {:?}",
            displayed_sources, self.destination, self.status
        )
    }
}

impl Compaction {
    pub fn new(sources: Vec<SourceId>, destination: u32) -> Self {
        Self {
            status: Submitted,
            sources,
            destination,
        }
    }

    /// The sorted runs of `db_state` named by `sources`, in source order.
    /// Sources that no longer exist in the snapshot are skipped.
    pub fn get_sorted_runs(db_state: &CoreDbState, sources: &[SourceId]) -> Vec<SortedRun> {
        let srs_by_id: HashMap<u32, &SortedRun> =
            db_state.compacted.iter().map(|sr| (sr.id, sr)).collect();

        sources
            .iter()
            .filter_map(|s| s.maybe_unwrap_sorted_run())
            .filter_map(|id| srs_by_id.get(&id).map(|sr| (*sr).clone()))
            .collect()
    }

    pub fn get_ssts(db_state: &CoreDbState, sources: &[SourceId]) -> Vec<SsTableHandle> {
        let ssts_by_id: HashMap<Ulid, &SsTableHandle> = db_state
            .l0
            .iter()
            .filter_map(|sst| sst.id.compacted_id().map(|id| (id, sst)))
            .collect();

        sources
            .iter()
            .filter_map(|s| s.maybe_unwrap_sst())
            .filter_map(|ulid| ssts_by_id.get(&ulid).map(|sst| (*sst).clone()))
            .collect()
    }
}

/// The compactor's view of the database plus the compactions it is tracking.
///
/// The current [`CoreDbState`] is held behind an `Arc` and is never edited in
/// place: every successful `refresh_db_state` or `finish_compaction` builds a
/// new snapshot and swaps it in with one assignment. Readers that took a
/// [`CompactorState::snapshot`] keep the exact layout they observed.
///
/// The state is not synchronized. It is meant to be driven from a single
/// control loop.
pub struct CompactorState {
    db_state: Arc<CoreDbState>,
    compactions: HashMap<u32, Compaction>,
    stats: CompactorStateStats,
}

impl CompactorState {
    /// Starts tracking `db_state`, typically the snapshot recovered at startup.
    /// Fails if its sorted runs are not in strictly decreasing id order or if
    /// L0 holds a WAL SST.
    pub fn new(
        db_state: CoreDbState,
        stat_registry: Arc<StatRegistry>,
    ) -> Result<Self, SlateDBError> {
        db_state.check_l0_ids()?;
        db_state.check_compacted_order()?;
        let state = Self {
            db_state: Arc::new(db_state),
            compactions: HashMap::new(),
            stats: CompactorStateStats::new(stat_registry),
        };
        state.update_gauges();
        Ok(state)
    }

    pub fn db_state(&self) -> &CoreDbState {
        &self.db_state
    }

    pub fn snapshot(&self) -> Arc<CoreDbState> {
        self.db_state.clone()
    }

    pub fn num_compactions(&self) -> usize {
        self.compactions.len()
    }

    pub fn compactions(&self) -> Vec<Compaction> {
        self.compactions.values().cloned().collect()
    }

    /// Registers a compaction. Fails with [`SlateDBError::InvalidCompaction`]
    /// if another compaction already targets the destination, or if the
    /// destination is a live sorted run that the compaction does not consume.
    #[instrument(level = "debug", skip_all, fields(destination = compaction.destination))]
    pub fn submit_compaction(&mut self, compaction: Compaction) -> Result<(), SlateDBError> {
        if self.compactions.contains_key(&compaction.destination) {
            // we already have an ongoing compaction for this destination
            error!(
                "rejected compaction with busy destination [compaction={}]",
                compaction
            );
            self.stats.rejected_compactions.inc();
            return Err(SlateDBError::InvalidCompaction);
        }
        if self
            .db_state
            .compacted
            .iter()
            .any(|sr| sr.id == compaction.destination)
            && !compaction
                .sources
                .contains(&SourceId::SortedRun(compaction.destination))
        {
            // the compaction overwrites an existing sr but doesn't include the sr
            error!(
                "rejected compaction overwriting live sorted run [compaction={}]",
                compaction
            );
            self.stats.rejected_compactions.inc();
            return Err(SlateDBError::InvalidCompaction);
        }
        info!("accepted submitted compaction [compaction={}]", compaction);
        self.compactions.insert(compaction.destination, compaction);
        self.stats.submitted_compactions.inc();
        self.update_gauges();
        Ok(())
    }

    /// Absorbs the L0 SSTs the writer flushed since the last refresh. The
    /// writer's L0 list is copied newest first up to, but not including, the
    /// SST recorded as last compacted. The WAL counters are taken from the
    /// writer as they are.
    pub fn refresh_db_state(&mut self, writer_state: &CoreDbState) -> Result<(), SlateDBError> {
        writer_state.check_l0_ids()?;
        let last_compacted_l0 = self.db_state.l0_last_compacted;
        let merged_l0s: VecDeque<SsTableHandle> = writer_state
            .l0
            .iter()
            .take_while(|sst| match last_compacted_l0 {
                None => true,
                Some(last_compacted) => sst.id.compacted_id() != Some(last_compacted),
            })
            .cloned()
            .collect();
        debug!(
            "refreshed db state [l0_ssts={}, next_wal_sst_id={}]",
            merged_l0s.len(),
            writer_state.next_wal_sst_id
        );

        let refreshed = CoreDbState {
            l0_last_compacted: last_compacted_l0,
            l0: merged_l0s,
            compacted: self.db_state.compacted.clone(),
            next_wal_sst_id: writer_state.next_wal_sst_id,
            last_compacted_wal_sst_id: writer_state.last_compacted_wal_sst_id,
        };
        self.db_state = Arc::new(refreshed);
        self.update_gauges();
        Ok(())
    }

    /// Folds the output of a compaction into the db state. The consumed L0
    /// SSTs and sorted runs are dropped and `output_sr` takes its place among
    /// the sorted runs by id. Finishing a destination with no registered
    /// compaction is ignored.
    #[instrument(level = "debug", skip_all, fields(destination = output_sr.id))]
    pub fn finish_compaction(&mut self, output_sr: SortedRun) -> Result<(), SlateDBError> {
        let Some(compaction) = self.compactions.get(&output_sr.id) else {
            warn!(
                "ignoring finish for unknown compaction [destination={}]",
                output_sr.id
            );
            self.stats.ignored_finishes.inc();
            return Ok(());
        };

        let compaction_l0s: HashSet<Ulid> = compaction
            .sources
            .iter()
            .filter_map(|id| id.maybe_unwrap_sst())
            .collect();
        let compaction_srs: HashSet<u32> = compaction
            .sources
            .iter()
            .chain(std::iter::once(&SourceId::SortedRun(compaction.destination)))
            .filter_map(|id| id.maybe_unwrap_sorted_run())
            .collect();

        let new_l0: VecDeque<SsTableHandle> = self
            .db_state
            .l0
            .iter()
            .filter(|l0| {
                l0.id
                    .compacted_id()
                    .map_or(true, |id| !compaction_l0s.contains(&id))
            })
            .cloned()
            .collect();

        let mut new_compacted = Vec::with_capacity(self.db_state.compacted.len() + 1);
        let mut inserted = false;
        for compacted in self.db_state.compacted.iter() {
            if !inserted && output_sr.id >= compacted.id {
                new_compacted.push(output_sr.clone());
                inserted = true;
            }
            if !compaction_srs.contains(&compacted.id) {
                new_compacted.push(compacted.clone());
            }
        }
        if !inserted {
            new_compacted.push(output_sr.clone());
        }

        // if there are l0s, the newest is the first entry in sources
        let l0_last_compacted = match compaction.sources.first() {
            Some(SourceId::Sst(ulid)) => Some(*ulid),
            _ => self.db_state.l0_last_compacted,
        };

        let finished = CoreDbState {
            l0_last_compacted,
            l0: new_l0,
            compacted: new_compacted,
            next_wal_sst_id: self.db_state.next_wal_sst_id,
            last_compacted_wal_sst_id: self.db_state.last_compacted_wal_sst_id,
        };
        finished.check_compacted_order()?;

        info!("finished compaction [compaction={}]", compaction);
        self.db_state = Arc::new(finished);
        self.compactions.remove(&output_sr.id);
        self.stats.finished_compactions.inc();
        self.update_gauges();
        self.db_state.log_db_runs();
        Ok(())
    }

    fn update_gauges(&self) {
        self.stats
            .running_compactions
            .set(self.compactions.len() as i64);
        self.stats.l0_sst_count.set(self.db_state.l0.len() as u64);
        self.stats
            .sorted_run_count
            .set(self.db_state.compacted.len() as u64);
    }
}

pub mod stats {
    use crate::stats::{Counter, Gauge, StatRegistry};
    use std::sync::Arc;

    macro_rules! compactor_stat_name {
        ($suffix:expr) => {
            crate::stat_name!("compactor", $suffix)
        };
    }

    pub const SUBMITTED_COMPACTIONS: &str = compactor_stat_name!("submitted_compactions");
    pub const REJECTED_COMPACTIONS: &str = compactor_stat_name!("rejected_compactions");
    pub const FINISHED_COMPACTIONS: &str = compactor_stat_name!("finished_compactions");
    pub const IGNORED_FINISHES: &str = compactor_stat_name!("ignored_finishes");
    pub const RUNNING_COMPACTIONS: &str = compactor_stat_name!("running_compactions");
    pub const L0_SST_COUNT: &str = compactor_stat_name!("l0_sst_count");
    pub const SORTED_RUN_COUNT: &str = compactor_stat_name!("sorted_run_count");

    pub(crate) struct CompactorStateStats {
        pub(crate) submitted_compactions: Arc<Counter>,
        pub(crate) rejected_compactions: Arc<Counter>,
        pub(crate) finished_compactions: Arc<Counter>,
        pub(crate) ignored_finishes: Arc<Counter>,
        pub(crate) running_compactions: Arc<Gauge<i64>>,
        pub(crate) l0_sst_count: Arc<Gauge<u64>>,
        pub(crate) sorted_run_count: Arc<Gauge<u64>>,
    }

    impl CompactorStateStats {
        pub(crate) fn new(stat_registry: Arc<StatRegistry>) -> Self {
            let stats = Self {
                submitted_compactions: Arc::new(Counter::default()),
                rejected_compactions: Arc::new(Counter::default()),
                finished_compactions: Arc::new(Counter::default()),
                ignored_finishes: Arc::new(Counter::default()),
                running_compactions: Arc::new(Gauge::default()),
                l0_sst_count: Arc::new(Gauge::default()),
                sorted_run_count: Arc::new(Gauge::default()),
            };
            stat_registry.register(SUBMITTED_COMPACTIONS, stats.submitted_compactions.clone());
            stat_registry.register(REJECTED_COMPACTIONS, stats.rejected_compactions.clone());
            stat_registry.register(FINISHED_COMPACTIONS, stats.finished_compactions.clone());
            stat_registry.register(IGNORED_FINISHES, stats.ignored_finishes.clone());
            stat_registry.register(RUNNING_COMPACTIONS, stats.running_compactions.clone());
            stat_registry.register(L0_SST_COUNT, stats.l0_sst_count.clone());
            stat_registry.register(SORTED_RUN_COUNT, stats.sorted_run_count.clone());
            stats
        }
    }
}
