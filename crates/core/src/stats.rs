//! Heap Statistics
//!
//! Per-runtime counters for block traffic. Every allocation, reallocation,
//! free, incref and decref bumps one counter in the current thread's runtime
//! context; hosts and tests read them back as a [`HeapStats`] snapshot.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │        HeapCounters (per thread)         │
//! ├──────────────────────────────────────────┤
//! │ next_alloc_id  allocations  frees        │
//! │ reallocs       increfs      decrefs      │
//! └──────────────────────────────────────────┘
//!                    │ snapshot()
//!                    ▼
//!              HeapStats (Copy)
//! ```
//!
//! # Performance
//!
//! Counters are plain `Cell`s: the runtime is thread-local, so an update is a
//! load and a store with no atomics.

use std::cell::Cell;
use std::fmt;

/// Live counters owned by a runtime context
#[derive(Debug, Default)]
pub struct HeapCounters {
    next_alloc_id: Cell<u32>,
    allocations: Cell<u64>,
    frees: Cell<u64>,
    reallocs: Cell<u64>,
    increfs: Cell<u64>,
    decrefs: Cell<u64>,
}

impl HeapCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an allocation and hand out its id
    #[inline]
    pub fn record_alloc(&self) -> u32 {
        let id = self.next_alloc_id.get().wrapping_add(1);
        self.next_alloc_id.set(id);
        bump(&self.allocations);
        id
    }

    #[inline]
    pub fn record_free(&self) {
        bump(&self.frees);
    }

    #[inline]
    pub fn record_realloc(&self) {
        bump(&self.reallocs);
    }

    #[inline]
    pub fn record_incref(&self) {
        bump(&self.increfs);
    }

    #[inline]
    pub fn record_decref(&self) {
        bump(&self.decrefs);
    }

    pub fn snapshot(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations.get(),
            frees: self.frees.get(),
            reallocs: self.reallocs.get(),
            increfs: self.increfs.get(),
            decrefs: self.decrefs.get(),
            last_alloc_id: self.next_alloc_id.get(),
        }
    }

    /// Zero the traffic counters
    ///
    /// Allocation ids keep increasing so blocks allocated before and after a
    /// reset remain distinguishable in dumps.
    pub fn reset(&self) {
        self.allocations.set(0);
        self.frees.set(0);
        self.reallocs.set(0);
        self.increfs.set(0);
        self.decrefs.set(0);
    }
}

/// Snapshot of the current thread's heap counters
pub fn snapshot() -> HeapStats {
    crate::runtime::stats()
}

/// Zero the current thread's traffic counters
pub fn reset() {
    crate::runtime::reset_stats()
}

#[inline(always)]
fn bump(counter: &Cell<u64>) {
    counter.set(counter.get().wrapping_add(1));
}

/// Point-in-time copy of a runtime's heap counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocations: u64,
    pub frees: u64,
    pub reallocs: u64,
    pub increfs: u64,
    pub decrefs: u64,
    /// Id given to the most recent allocation
    pub last_alloc_id: u32,
}

impl HeapStats {
    /// Blocks allocated and not yet freed since the last reset
    ///
    /// Negative when blocks allocated before a reset are freed after it.
    pub fn live_blocks(&self) -> i64 {
        self.allocations as i64 - self.frees as i64
    }

    /// Counter deltas from `earlier` to `self`
    pub fn since(&self, earlier: &HeapStats) -> HeapStats {
        HeapStats {
            allocations: self.allocations.wrapping_sub(earlier.allocations),
            frees: self.frees.wrapping_sub(earlier.frees),
            reallocs: self.reallocs.wrapping_sub(earlier.reallocs),
            increfs: self.increfs.wrapping_sub(earlier.increfs),
            decrefs: self.decrefs.wrapping_sub(earlier.decrefs),
            last_alloc_id: self.last_alloc_id,
        }
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocations = {}, frees = {}, live = {}, reallocs = {}, increfs = {}, decrefs = {}",
            self.allocations,
            self.frees,
            self.live_blocks(),
            self.reallocs,
            self.increfs,
            self.decrefs
        )
    }
}
