//! Heap Blocks and the Allocation Choke Point
//!
//! Every heap object is one raw allocation that starts with an
//! [`ObjectHeader`]. The header is followed by a per-kind body:
//!
//! ```text
//! Flat:       [header 16][capacity u32][pad u32][data: capacity bytes .......]
//! Slice:      [header 16][start_pos u32][pad u32][base: Value]
//! Node:       [header 16][left: Value][right: Value]
//! Hashtable:  [header 16][capacity u32][length u32][Bucket; capacity][Pair; capacity]
//! ```
//!
//! All allocation, reallocation and deallocation goes through this module so
//! that out-of-memory is always fatal (`handle_alloc_error`), every block is
//! stamped with a per-runtime allocation id, and the heap counters in
//! [`crate::stats`] stay exact.
//!
//! Blocks are 8-byte aligned, which keeps the low three bits of every block
//! address zero. `Value` relies on that to use those bits as its tag.

use std::alloc::{self, Layout};
use std::mem::size_of;
use std::ptr::{self, NonNull};

use crate::error::internal_error;
use crate::runtime;
use crate::value::Value;

// =============================================================================
// Constants
// =============================================================================

/// Alignment of every heap block
pub(crate) const BLOCK_ALIGN: usize = 8;

/// Refcount sentinel: the block is permanent and never freed
pub const REFCOUNT_PERM: u8 = u8::MAX;

/// Signature stamped into live headers and cleared on free
pub(crate) const BLOCK_SIGNATURE: u32 = 0x1ce0_ab80;

/// Width in bytes of one list element
pub const ELEMENT_WIDTH: u32 = size_of::<Value>() as u32;

// =============================================================================
// Header
// =============================================================================

/// Physical kind of a heap block
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    /// Contiguous bytes (or inline Values for lists)
    Flat = 1,
    /// Window into another block
    Slice = 2,
    /// Concatenation of two blocks
    Node = 3,
    /// Insertion-ordered hash table
    Hashtable = 4,
}

/// Semantic kind attached to the root of a tree or table
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    List = 1,
    Table = 2,
    Blob = 3,
    Symbol = 4,
}

impl LogicalType {
    /// Lower-case name used by debug dumps
    pub fn name(self) -> &'static str {
        match self {
            LogicalType::List => "list",
            LogicalType::Table => "table",
            LogicalType::Blob => "blob",
            LogicalType::Symbol => "symbol",
        }
    }

    /// Blobs and symbols share the byte-rope representation
    pub fn is_bytes(self) -> bool {
        matches!(self, LogicalType::Blob | LogicalType::Symbol)
    }
}

/// Common prefix of every heap block
#[repr(C)]
#[derive(Debug)]
pub(crate) struct ObjectHeader {
    pub(crate) block_type: BlockType,
    pub(crate) logical_type: LogicalType,
    /// Saturating count; [`REFCOUNT_PERM`] means permanent
    pub(crate) refcount: u8,
    _reserved: u8,
    /// Logical byte length covered by this block
    pub(crate) size: u32,
    pub(crate) alloc_id: u32,
    pub(crate) signature: u32,
}

// =============================================================================
// Block bodies
// =============================================================================

#[repr(C)]
pub(crate) struct Flat {
    pub(crate) header: ObjectHeader,
    /// Allocated data bytes; `header.size <= capacity`
    pub(crate) capacity: u32,
    _pad: u32,
}

#[repr(C)]
pub(crate) struct Slice {
    pub(crate) header: ObjectHeader,
    pub(crate) start_pos: u32,
    _pad: u32,
    /// Never itself a Slice
    pub(crate) base: Value,
}

#[repr(C)]
pub(crate) struct Node {
    pub(crate) header: ObjectHeader,
    pub(crate) left: Value,
    pub(crate) right: Value,
}

#[repr(C)]
pub(crate) struct Hashtable {
    pub(crate) header: ObjectHeader,
    pub(crate) capacity: u32,
    pub(crate) length: u32,
}

/// One slot of the bucket array
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bucket {
    /// Index into the pair array, or -1 when empty
    pub(crate) pair_index: i32,
    /// Next bucket in this probe chain, or -1
    pub(crate) next_bucket: i32,
    pub(crate) hashcode: u32,
    _pad: u32,
}

impl Bucket {
    pub(crate) const EMPTY: Bucket = Bucket {
        pair_index: -1,
        next_bucket: -1,
        hashcode: 0,
        _pad: 0,
    };

    pub(crate) fn occupied(pair_index: i32, hashcode: u32) -> Self {
        Bucket {
            pair_index,
            next_bucket: -1,
            hashcode,
            _pad: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pair_index == -1
    }
}

#[repr(C)]
pub(crate) struct Pair {
    pub(crate) key: Value,
    pub(crate) value: Value,
}

// =============================================================================
// Raw allocation
// =============================================================================

fn layout_for(bytes: usize) -> Layout {
    match Layout::from_size_align(bytes, BLOCK_ALIGN) {
        Ok(layout) => layout,
        Err(_) => internal_error(&format!("block layout overflow for {} bytes", bytes)),
    }
}

fn alloc_raw(bytes: usize) -> NonNull<u8> {
    let layout = layout_for(bytes);
    // Safety: every block layout has a nonzero size (at least the header)
    let ptr = unsafe { alloc::alloc(layout) };
    match NonNull::new(ptr) {
        Some(ptr) => ptr,
        None => alloc::handle_alloc_error(layout),
    }
}

fn flat_bytes_for(capacity: u32) -> usize {
    size_of::<Flat>() + capacity as usize
}

pub(crate) fn hashtable_bytes_for(capacity: u32) -> usize {
    size_of::<Hashtable>()
        + capacity as usize * size_of::<Bucket>()
        + capacity as usize * size_of::<Pair>()
}

/// Bytes occupied by a live block, as passed to the allocator
///
/// # Safety
/// `header` must point to a live block.
unsafe fn block_bytes(header: NonNull<ObjectHeader>) -> usize {
    unsafe {
        match (*header.as_ptr()).block_type {
            BlockType::Flat => flat_bytes_for((*header.cast::<Flat>().as_ptr()).capacity),
            BlockType::Slice => size_of::<Slice>(),
            BlockType::Node => size_of::<Node>(),
            BlockType::Hashtable => {
                hashtable_bytes_for((*header.cast::<Hashtable>().as_ptr()).capacity)
            }
        }
    }
}

fn make_header(block_type: BlockType, logical_type: LogicalType, size: u32) -> ObjectHeader {
    let alloc_id = runtime::record_alloc();
    if runtime::trace_allocations() {
        tracing::trace!(
            alloc_id,
            block = ?block_type,
            logical = logical_type.name(),
            size,
            "alloc block"
        );
    }
    ObjectHeader {
        block_type,
        logical_type,
        refcount: 1,
        _reserved: 0,
        size,
        alloc_id,
        signature: BLOCK_SIGNATURE,
    }
}

// =============================================================================
// Block constructors
// =============================================================================

/// Allocate a Flat with `capacity` bytes of storage, `size` of them in use
///
/// The data region is zeroed. Refcount starts at 1.
pub(crate) fn alloc_flat(logical_type: LogicalType, size: u32, capacity: u32) -> NonNull<Flat> {
    crate::ice_assert!(size <= capacity, "flat size {} exceeds capacity {}", size, capacity);
    let raw = alloc_raw(flat_bytes_for(capacity));
    let flat = raw.cast::<Flat>();
    // Safety: freshly allocated with room for the Flat prefix plus `capacity` bytes
    unsafe {
        ptr::write(
            flat.as_ptr(),
            Flat {
                header: make_header(BlockType::Flat, logical_type, size),
                capacity,
                _pad: 0,
            },
        );
        ptr::write_bytes(flat_data(flat), 0, capacity as usize);
    }
    flat
}

/// Grow a Flat's storage to `new_capacity` bytes, preserving its contents
///
/// The newly exposed bytes are zeroed. The block may move.
///
/// # Safety
/// `flat` must be live and exclusively owned by the caller.
pub(crate) unsafe fn realloc_flat(flat: NonNull<Flat>, new_capacity: u32) -> NonNull<Flat> {
    unsafe {
        let old_capacity = (*flat.as_ptr()).capacity;
        crate::ice_assert!(
            new_capacity >= old_capacity,
            "realloc_flat cannot shrink {} -> {}",
            old_capacity,
            new_capacity
        );
        let old_layout = layout_for(flat_bytes_for(old_capacity));
        let new_bytes = flat_bytes_for(new_capacity);
        let ptr = alloc::realloc(flat.as_ptr() as *mut u8, old_layout, new_bytes);
        let flat = match NonNull::new(ptr) {
            Some(ptr) => ptr.cast::<Flat>(),
            None => alloc::handle_alloc_error(layout_for(new_bytes)),
        };
        (*flat.as_ptr()).capacity = new_capacity;
        ptr::write_bytes(
            flat_data(flat).add(old_capacity as usize),
            0,
            (new_capacity - old_capacity) as usize,
        );
        runtime::record_realloc();
        flat
    }
}

pub(crate) fn alloc_slice(
    logical_type: LogicalType,
    start_pos: u32,
    size: u32,
    base: Value,
) -> NonNull<Slice> {
    let raw = alloc_raw(size_of::<Slice>());
    let slice = raw.cast::<Slice>();
    // Safety: freshly allocated with room for a Slice
    unsafe {
        ptr::write(
            slice.as_ptr(),
            Slice {
                header: make_header(BlockType::Slice, logical_type, size),
                start_pos,
                _pad: 0,
                base,
            },
        );
    }
    slice
}

pub(crate) fn alloc_node(logical_type: LogicalType, left: Value, right: Value) -> NonNull<Node> {
    let left_size = crate::block::block_size(&left);
    let Some(size) = left_size.checked_add(crate::block::block_size(&right)) else {
        internal_error("node size overflow");
    };
    let raw = alloc_raw(size_of::<Node>());
    let node = raw.cast::<Node>();
    // Safety: freshly allocated with room for a Node
    unsafe {
        ptr::write(
            node.as_ptr(),
            Node {
                header: make_header(BlockType::Node, logical_type, size),
                left,
                right,
            },
        );
    }
    node
}

/// Allocate an empty hashtable with every bucket marked free
pub(crate) fn alloc_hashtable(capacity: u32) -> NonNull<Hashtable> {
    crate::ice_assert!(capacity > 0, "hashtable capacity must be nonzero");
    let raw = alloc_raw(hashtable_bytes_for(capacity));
    let table = raw.cast::<Hashtable>();
    // Safety: freshly allocated with room for the prefix, buckets and pairs
    unsafe {
        ptr::write(
            table.as_ptr(),
            Hashtable {
                header: make_header(BlockType::Hashtable, LogicalType::Table, 0),
                capacity,
                length: 0,
            },
        );
        let buckets = hashtable_buckets(table);
        for i in 0..capacity as usize {
            ptr::write(buckets.add(i), Bucket::EMPTY);
        }
    }
    table
}

// =============================================================================
// Body accessors
// =============================================================================

/// Start of a Flat's data region
///
/// # Safety
/// `flat` must point to a live Flat.
#[inline(always)]
pub(crate) unsafe fn flat_data(flat: NonNull<Flat>) -> *mut u8 {
    unsafe { (flat.as_ptr() as *mut u8).add(size_of::<Flat>()) }
}

/// # Safety
/// `table` must point to a live Hashtable.
#[inline(always)]
pub(crate) unsafe fn hashtable_buckets(table: NonNull<Hashtable>) -> *mut Bucket {
    unsafe { (table.as_ptr() as *mut u8).add(size_of::<Hashtable>()) as *mut Bucket }
}

/// # Safety
/// `table` must point to a live Hashtable.
#[inline(always)]
pub(crate) unsafe fn hashtable_pairs(table: NonNull<Hashtable>) -> *mut Pair {
    unsafe {
        let capacity = (*table.as_ptr()).capacity as usize;
        hashtable_buckets(table).add(capacity) as *mut Pair
    }
}

// =============================================================================
// Deallocation
// =============================================================================

/// Free a block whose refcount has reached zero
///
/// Every Value the block owns is handed to `pending` as a raw object pointer
/// (immediates are skipped) so the caller can release children without
/// recursing.
///
/// # Safety
/// `header` must be live, have no remaining owners, and not be used again.
pub(crate) unsafe fn free_object(
    header: NonNull<ObjectHeader>,
    pending: &mut Vec<NonNull<ObjectHeader>>,
) {
    unsafe {
        let bytes = block_bytes(header);
        let h = &mut *header.as_ptr();
        crate::ice_assert!(
            h.signature == BLOCK_SIGNATURE,
            "free of block with bad signature 0x{:x}",
            h.signature
        );

        match h.block_type {
            BlockType::Flat => {
                if h.logical_type == LogicalType::List {
                    let flat = header.cast::<Flat>();
                    let data = flat_data(flat) as *const Value;
                    let count = (h.size / ELEMENT_WIDTH) as usize;
                    for i in 0..count {
                        push_owned(ptr::read(data.add(i)), pending);
                    }
                }
            }
            BlockType::Slice => {
                let slice = header.cast::<Slice>();
                push_owned(ptr::read(&(*slice.as_ptr()).base), pending);
            }
            BlockType::Node => {
                let node = header.cast::<Node>();
                push_owned(ptr::read(&(*node.as_ptr()).left), pending);
                push_owned(ptr::read(&(*node.as_ptr()).right), pending);
            }
            BlockType::Hashtable => {
                let table = header.cast::<Hashtable>();
                let pairs = hashtable_pairs(table);
                for i in 0..(*table.as_ptr()).length as usize {
                    let pair = pairs.add(i);
                    push_owned(ptr::read(&(*pair).key), pending);
                    push_owned(ptr::read(&(*pair).value), pending);
                }
            }
        }

        if runtime::trace_allocations() {
            tracing::trace!(
                alloc_id = h.alloc_id,
                block = ?h.block_type,
                logical = h.logical_type.name(),
                size = h.size,
                "free block"
            );
        }
        h.signature = 0;
        h.refcount = 0;
        runtime::record_free();
        alloc::dealloc(header.as_ptr() as *mut u8, layout_for(bytes));
    }
}

fn push_owned(value: Value, pending: &mut Vec<NonNull<ObjectHeader>>) {
    if let Some(ptr) = value.object_ptr() {
        pending.push(ptr);
    }
    // Ownership of the reference moved into `pending`
    std::mem::forget(value);
}
