//! # Statistics
//!
//! The compaction core publishes its counters and gauges into a [`StatRegistry`]
//! supplied by the embedding process, which polls the registry and forwards the
//! values to whatever observability system it uses.
//!
//! * [`ReadableStat`]: implemented by every stat, reads the current value as an `i64`.
//! * [`StatRegistry`]: name to stat lookup, safe to share between threads.
//! * [`Counter`]: monotonically increasing atomic counter.
//! * [`Gauge<T>`]: atomic value holder for any `NoUninit + Debug` type.
//! * [`stat_name!`]: joins a component prefix and a stat suffix with `/`.
//!
//! See [`crate::compactor_state_stats`] for the stats the compactor registers.
//!
//! ```
//! use slatedb_compaction::stats::{ReadableStat, StatRegistry};
//! use slatedb_compaction::{CompactorState, CoreDbState};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(StatRegistry::new());
//! let _state = CompactorState::new(CoreDbState::new(), registry.clone()).unwrap();
//! let running = registry.lookup("compactor/running_compactions").unwrap();
//! assert_eq!(running.get(), 0);
//! ```
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use atomic::{Atomic, Ordering};
use bytemuck::NoUninit;
use log::warn;

pub trait ReadableStat: Send + Sync + std::fmt::Debug {
    fn get(&self) -> i64;
}

#[derive(Default)]
pub struct StatRegistry {
    stats: Mutex<BTreeMap<&'static str, Arc<dyn ReadableStat>>>,
}

impl StatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stat with a specific name, or `None` if nothing was registered
    /// under the name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ReadableStat>> {
        let guard = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let guard = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        guard.keys().copied().collect()
    }

    /// Registers a stat. A name that is already taken keeps its first stat.
    pub(crate) fn register(&self, name: &'static str, stat: Arc<dyn ReadableStat>) {
        let mut guard = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        if guard.contains_key(name) {
            warn!(
                "registry already contains stat with name: {}. will not register again",
                name
            );
            return;
        }
        guard.insert(name, stat);
    }
}

#[derive(Clone, Default)]
pub struct Counter {
    value: Arc<Atomic<u64>>,
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.value.load(Ordering::Relaxed))
    }
}

impl ReadableStat for Counter {
    fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed) as i64
    }
}

impl Counter {
    pub fn inc(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct Gauge<T: std::fmt::Debug + NoUninit> {
    value: Arc<Atomic<T>>,
}

impl<T: std::fmt::Debug + NoUninit> std::fmt::Debug for Gauge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.value.load(Ordering::Relaxed))
    }
}

impl<T: Default + NoUninit + std::fmt::Debug> Default for Gauge<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(Atomic::<T>::default()),
        }
    }
}

impl<T: NoUninit + std::fmt::Debug> Gauge<T> {
    pub fn set(&self, value: T) -> T {
        self.value.swap(value, Ordering::Relaxed)
    }

    pub fn value(&self) -> T {
        self.value.load(Ordering::Relaxed)
    }
}

impl ReadableStat for Gauge<i64> {
    fn get(&self) -> i64 {
        self.value()
    }
}

impl ReadableStat for Gauge<u64> {
    fn get(&self) -> i64 {
        self.value() as i64
    }
}

#[macro_export]
macro_rules! stat_name {
    ($prefix:expr, $suffix:expr) => {
        concat!($prefix, "/", $suffix)
    };
}
