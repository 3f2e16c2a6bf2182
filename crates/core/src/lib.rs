//! Ice Core: dynamic values for an embedded interpreter
//!
//! This crate provides the value model a small dynamic language runs on:
//! 8-byte tagged values, persistent ropes for blobs and lists, and
//! insertion-ordered hash tables, all under manual reference counting.
//!
//! Key design principles:
//! - Value: one machine word; numbers and singletons never allocate
//! - Ropes: Flat / Slice / Node blocks, shared structurally and copied only
//!   when a shared block would be written
//! - Ownership: `Value` by move consumes, `&Value` borrows; an exclusively
//!   owned block may be mutated in place
//!
//! Values are single-threaded (`!Send`). Each thread gets its own runtime
//! context (config, heap statistics, gensym counter).
//!
//! # Modules
//!
//! - `value`: tagged 8-byte handle and its decoded view
//! - `refcount`: incref/decref, the ownership gate, permanent blocks
//! - `heap`: block layouts and the allocation choke point
//! - `block`: rope construction, slicing, flattening and growth
//! - `iter`: non-recursive rope traversal
//! - `cmp`: structural equality, hashing and ordering
//! - `blob`: blob and symbol operations
//! - `list`: list operations
//! - `table`: insertion-ordered hash table
//! - `primitive`: numeric helpers and generic get/set
//! - `stringify`: text rendering and structural dumps
//! - `runtime` / `stats` / `config`: per-thread context and its settings
//! - `error`: fatal invariant reporting

pub mod blob;
pub mod block;
pub mod cmp;
pub mod config;
pub mod error;
pub mod heap;
pub mod iter;
pub mod list;
pub mod primitive;
pub mod refcount;
pub mod runtime;
pub mod stats;
pub mod stringify;
pub mod table;
pub mod value;

// Re-export key types and functions
pub use value::{Decoded, Value, nil_ref};

pub use heap::{BlockType, ELEMENT_WIDTH, LogicalType, REFCOUNT_PERM};

pub use refcount::{Exclusive, Ownership, decref, incref, is_exclusive, refcount};

pub use cmp::{compare, equals, hashcode, shallow_equals};

pub use iter::BlockIter;

pub use stringify::{dump, dump_string, print, println, stringify, to_display};

// Runtime context
pub use config::{ConfigError, RuntimeConfig};
pub use stats::HeapStats;
