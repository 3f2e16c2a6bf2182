//! Runtime Context
//!
//! Thread-local state shared by every value operation on a thread: the active
//! [`RuntimeConfig`], the heap counters, and the gensym counter.
//!
//! Values are `!Send`, so every block a thread can reach was allocated by that
//! thread's runtime. There is no global mutable state; two threads each get an
//! independent context.
//!
//! # Example
//! ```ignore
//! ice_core::runtime::init(RuntimeConfig::from_toml("in_place_growth = false")?);
//! let before = ice_core::runtime::stats();
//! ```

use std::cell::{Cell, RefCell};

use crate::config::RuntimeConfig;
use crate::stats::{HeapCounters, HeapStats};

/// Per-thread runtime context
#[derive(Debug)]
pub struct Runtime {
    config: RefCell<RuntimeConfig>,
    heap: HeapCounters,
    next_gensym: Cell<u32>,
}

impl Runtime {
    fn new(config: RuntimeConfig) -> Self {
        Runtime {
            config: RefCell::new(config),
            heap: HeapCounters::new(),
            next_gensym: Cell::new(0),
        }
    }

    pub fn config(&self) -> RuntimeConfig {
        self.config.borrow().clone()
    }

    pub fn heap(&self) -> &HeapCounters {
        &self.heap
    }
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new(RuntimeConfig::default());
}

/// Execute a function with access to the thread-local runtime
///
/// # Example
/// ```ignore
/// let capacity = with_runtime(|rt| rt.config().default_table_capacity);
/// ```
pub fn with_runtime<F, R>(f: F) -> R
where
    F: FnOnce(&Runtime) -> R,
{
    RUNTIME.with(f)
}

/// Like [`with_runtime`], but tolerates thread teardown
///
/// Values dropped from other thread-local destructors may run after the
/// runtime itself is gone; counters are skipped in that case.
#[inline]
fn try_with_runtime<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&Runtime) -> R,
{
    RUNTIME.try_with(f).ok()
}

/// Install `config` for this thread and reset the heap counters
pub fn init(config: RuntimeConfig) {
    tracing::debug!(
        default_table_capacity = config.default_table_capacity,
        in_place_growth = config.in_place_growth,
        min_growth_bytes = config.min_growth_bytes,
        trace_allocations = config.trace_allocations,
        "runtime init"
    );
    with_runtime(|rt| {
        *rt.config.borrow_mut() = config;
        rt.heap.reset();
    });
}

/// Snapshot of this thread's active configuration
pub fn config() -> RuntimeConfig {
    with_runtime(|rt| rt.config())
}

/// Snapshot of this thread's heap counters
pub fn stats() -> HeapStats {
    with_runtime(|rt| rt.heap.snapshot())
}

/// Zero this thread's traffic counters
pub fn reset_stats() {
    with_runtime(|rt| rt.heap.reset());
}

/// Next value of the per-thread gensym counter
pub(crate) fn next_gensym_id() -> u32 {
    with_runtime(|rt| {
        let id = rt.next_gensym.get().wrapping_add(1);
        rt.next_gensym.set(id);
        id
    })
}

pub(crate) fn table_capacity() -> u32 {
    with_runtime(|rt| rt.config.borrow().default_table_capacity)
}

/// `(in_place_growth, min_growth_bytes)` for the append path
pub(crate) fn growth_policy() -> (bool, u32) {
    with_runtime(|rt| {
        let config = rt.config.borrow();
        (config.in_place_growth, config.min_growth_bytes)
    })
}

#[inline]
pub(crate) fn trace_allocations() -> bool {
    try_with_runtime(|rt| rt.config.borrow().trace_allocations).unwrap_or(false)
}

#[inline]
pub(crate) fn record_alloc() -> u32 {
    try_with_runtime(|rt| rt.heap.record_alloc()).unwrap_or(0)
}

#[inline]
pub(crate) fn record_free() {
    try_with_runtime(|rt| rt.heap.record_free());
}

#[inline]
pub(crate) fn record_realloc() {
    try_with_runtime(|rt| rt.heap.record_realloc());
}

#[inline]
pub(crate) fn record_incref() {
    try_with_runtime(|rt| rt.heap.record_incref());
}

#[inline]
pub(crate) fn record_decref() {
    try_with_runtime(|rt| rt.heap.record_decref());
}
