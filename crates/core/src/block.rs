//! Block Tree (rope)
//!
//! Blobs, symbols and lists are all ropes built from three block kinds:
//!
//! - **Flat**: contiguous bytes (for lists, an array of inline Values)
//! - **Slice**: a window `(start_pos, size)` into a base block
//! - **Node**: the concatenation of two non-empty blocks
//!
//! Every block caches its total byte `size`, so sizes are never recomputed
//! by walking children. Lists use the same machinery at
//! [`ELEMENT_WIDTH`]-byte granularity.
//!
//! Ropes are persistent: operations build new blocks around shared children.
//! The one exception is [`append_writeable_section`], which grows an
//! exclusively-owned rightmost Flat in place when the runtime config enables
//! it; no other owner can observe that.
//!
//! Zero-size results are always normalised to the matching empty singleton,
//! so a Node never has an empty child.

use std::ptr::{self, NonNull};

use crate::error::internal_error;
use crate::heap::{self, BlockType, ELEMENT_WIDTH, Flat, LogicalType, Node, ObjectHeader, Slice};
use crate::iter;
use crate::refcount::Ownership;
use crate::runtime;
use crate::value::Value;

// =============================================================================
// Constructors
// =============================================================================

/// Allocate a Flat of `size` bytes with refcount 1
///
/// Blob bytes start zeroed; list elements start as nil.
pub fn new_flat(logical_type: LogicalType, size: u32) -> Value {
    new_flat_with_capacity(logical_type, size, size)
}

pub(crate) fn new_flat_with_capacity(logical_type: LogicalType, size: u32, capacity: u32) -> Value {
    if logical_type == LogicalType::List {
        crate::ice_assert!(
            size % ELEMENT_WIDTH == 0,
            "list flat size {} is not a whole number of elements",
            size
        );
    }
    let flat = heap::alloc_flat(logical_type, size, capacity);
    // Safety: fresh block, one reference
    let value = unsafe { Value::from_object(flat.cast()) };
    if logical_type == LogicalType::List {
        let nil = Value::nil().into_raw();
        // Safety: `size` bytes of Value-aligned storage follow the header
        unsafe {
            let data = heap::flat_data(flat) as *mut u64;
            for i in 0..(size / ELEMENT_WIDTH) as usize {
                ptr::write(data.add(i), nil);
            }
        }
    }
    value
}

/// Allocate a Slice viewing `size` bytes of `base` from `start_pos`
///
/// Takes over the caller's reference to `base`. The base is not simplified;
/// use [`byte_slice`] for that.
pub fn new_slice(logical_type: LogicalType, start_pos: u32, size: u32, base: Value) -> Value {
    crate::ice_assert!(base.is_object(), "new_slice base must be a block");
    crate::ice_assert!(
        start_pos as u64 + size as u64 <= base.size() as u64,
        "slice [{}, +{}) past base size {}",
        start_pos,
        size,
        base.size()
    );
    let slice = heap::alloc_slice(logical_type, start_pos, size, base);
    // Safety: fresh block, one reference
    unsafe { Value::from_object(slice.cast()) }
}

/// Allocate a Node concatenating `left` and `right`
///
/// Takes over one reference to each child.
pub fn new_node(logical_type: LogicalType, left: Value, right: Value) -> Value {
    crate::ice_assert!(left.is_object() && right.is_object(), "node children must be blocks");
    left.check_value();
    right.check_value();
    let node = heap::alloc_node(logical_type, left, right);
    // Safety: fresh block, one reference
    unsafe { Value::from_object(node.cast()) }
}

// =============================================================================
// Queries
// =============================================================================

/// Total byte size of a rope; 0 for singletons and scalars
#[inline]
pub fn block_size(value: &Value) -> u32 {
    value.size()
}

pub fn is_flat_block(value: &Value) -> bool {
    value.block_type() == Some(BlockType::Flat)
}

pub fn is_slice_block(value: &Value) -> bool {
    value.block_type() == Some(BlockType::Slice)
}

pub fn is_node_block(value: &Value) -> bool {
    value.block_type() == Some(BlockType::Node)
}

/// Allocated byte capacity of a Flat
pub fn flat_capacity(value: &Value) -> Option<u32> {
    match value.block_type() {
        Some(BlockType::Flat) => value
            .object_ptr()
            // Safety: `value` keeps the Flat alive
            .map(|ptr| unsafe { (*ptr.cast::<Flat>().as_ptr()).capacity }),
        _ => None,
    }
}

/// Logical type of a value that can be treated as a rope
fn rope_type(value: &Value, op: &str) -> LogicalType {
    match value.logical_type() {
        Some(LogicalType::Table) | None => {
            internal_error(&format!("{} on non-rope value 0x{:x}", op, value.raw_bits()))
        }
        Some(lt) => lt,
    }
}

/// Resolve a byte offset to the Flat that stores it
///
/// O(depth). Returns the Flat and the offset within its data.
pub(crate) fn locate(value: &Value, offset: u32) -> (NonNull<Flat>, u32) {
    crate::ice_assert!(
        offset < value.size(),
        "offset {} past block size {}",
        offset,
        value.size()
    );
    let Some(mut ptr) = value.object_ptr() else {
        internal_error("locate on non-object value");
    };
    let mut offset = offset;
    loop {
        // Safety: every block reachable from `value` is kept alive by it
        unsafe {
            match (*ptr.as_ptr()).block_type {
                BlockType::Flat => return (ptr.cast(), offset),
                BlockType::Slice => {
                    let slice = ptr.cast::<Slice>().as_ptr();
                    offset += (*slice).start_pos;
                    ptr = child_ptr(&(*slice).base);
                }
                BlockType::Node => {
                    let node = ptr.cast::<Node>().as_ptr();
                    let left_size = (*node).left.size();
                    if offset < left_size {
                        ptr = child_ptr(&(*node).left);
                    } else {
                        offset -= left_size;
                        ptr = child_ptr(&(*node).right);
                    }
                }
                BlockType::Hashtable => internal_error("locate on hashtable"),
            }
        }
    }
}

fn child_ptr(child: &Value) -> NonNull<ObjectHeader> {
    match child.object_ptr() {
        Some(ptr) => ptr,
        None => internal_error("rope child is not a block"),
    }
}

/// Address of the byte at `offset`
///
/// # Panics
/// Fatal if `offset` is past the end.
pub fn block_get(value: &Value, offset: u32) -> &u8 {
    let (flat, offset) = locate(value, offset);
    // Safety: `locate` checked the offset against the cached sizes
    unsafe { &*heap::flat_data(flat).add(offset as usize) }
}

/// The list element at `index`, borrowed from the tree
pub(crate) fn element_at(list: &Value, index: u32) -> &Value {
    let (flat, offset) = locate(list, index * ELEMENT_WIDTH);
    // Safety: list flats hold initialised, aligned Values
    unsafe { &*(heap::flat_data(flat).add(offset as usize) as *const Value) }
}

/// Data of a Flat, or None for any other value
pub fn flat_bytes(value: &Value) -> Option<&[u8]> {
    if !is_flat_block(value) {
        return None;
    }
    let ptr = value.object_ptr()?.cast::<Flat>();
    // Safety: `size` bytes of initialised data follow the header
    Some(unsafe { std::slice::from_raw_parts(heap::flat_data(ptr), value.size() as usize) })
}

/// Mutable data of an exclusively-owned blob or symbol Flat
///
/// List Flats hold Values, so they are never handed out as bytes.
pub fn flat_bytes_mut(value: &mut Value) -> Option<&mut [u8]> {
    if !value.logical_type().is_some_and(LogicalType::is_bytes) {
        return None;
    }
    flat_data_mut(value)
}

fn flat_data_mut(value: &mut Value) -> Option<&mut [u8]> {
    let size = value.size() as usize;
    match value.ownership() {
        Ownership::Exclusive(owner) if owner.block_type() == BlockType::Flat => {
            let data = unsafe { heap::flat_data(owner.ptr().cast()) };
            // Safety: sole owner, `size` bytes of initialised data
            Some(unsafe { std::slice::from_raw_parts_mut(data, size) })
        }
        _ => None,
    }
}

/// Elements of a list Flat
pub(crate) fn flat_values(value: &Value) -> Option<&[Value]> {
    let bytes = flat_bytes(value)?;
    if value.logical_type() != Some(LogicalType::List) {
        return None;
    }
    let count = bytes.len() / ELEMENT_WIDTH as usize;
    // Safety: list flats hold initialised, aligned Values
    Some(unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const Value, count) })
}

/// Mutable elements of an exclusively-owned list Flat
pub(crate) fn flat_values_mut(value: &mut Value) -> Option<&mut [Value]> {
    if value.logical_type() != Some(LogicalType::List) {
        return None;
    }
    let bytes = flat_data_mut(value)?;
    let count = bytes.len() / ELEMENT_WIDTH as usize;
    // Safety: list flats hold initialised, aligned Values
    Some(unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut Value, count) })
}

// =============================================================================
// Structural operations
// =============================================================================

/// Concatenate two ropes of the same family
///
/// Consumes both. An empty side is absorbed and the other side is returned
/// as is. No rebalancing is done.
pub fn concat(left: Value, right: Value) -> Value {
    let left_type = rope_type(&left, "concat");
    let right_type = rope_type(&right, "concat");
    crate::ice_assert!(
        (left_type == LogicalType::List) == (right_type == LogicalType::List),
        "concat of {} with {}",
        left_type.name(),
        right_type.name()
    );
    if right.size() == 0 {
        return left;
    }
    if left.size() == 0 {
        return right;
    }
    new_node(left_type, left, right)
}

/// Byte-offset view of `base`
///
/// Consumes `base`. `start` and `size` are clamped to the base. Slicing a
/// Slice composes onto the original base, so views never nest.
///
/// # Panics
/// Fatal if `base` is a list and `start` or `size` is not a whole number of
/// elements.
pub fn byte_slice(base: Value, start: u32, size: u32) -> Value {
    let logical_type = rope_type(&base, "byte_slice");
    if logical_type == LogicalType::List {
        crate::ice_assert!(
            start % ELEMENT_WIDTH == 0 && size % ELEMENT_WIDTH == 0,
            "list slice [{}, +{}) is not element aligned",
            start,
            size
        );
    }
    let base_size = base.size();
    let start = start.min(base_size);
    let size = size.min(base_size - start);
    if size == 0 {
        return Value::empty_of(logical_type);
    }
    if start == 0 && size == base_size {
        return base;
    }
    if is_slice_block(&base) {
        let Some(ptr) = base.object_ptr() else {
            internal_error("slice without block");
        };
        // Safety: `base` keeps the Slice alive while we copy out of it
        let (origin, origin_start) = unsafe {
            let slice = ptr.cast::<Slice>().as_ptr();
            ((*slice).base.clone(), (*slice).start_pos)
        };
        drop(base);
        return new_slice(logical_type, origin_start + start, size, origin);
    }
    new_slice(logical_type, start, size, base)
}

/// View of `base` in its own units: elements for lists, bytes otherwise
///
/// Consumes `base`.
pub fn slice(base: Value, start: u32, len: u32) -> Value {
    if rope_type(&base, "slice") == LogicalType::List {
        let count = base.size() / ELEMENT_WIDTH;
        let start = start.min(count);
        let len = len.min(count - start);
        byte_slice(base, start * ELEMENT_WIDTH, len * ELEMENT_WIDTH)
    } else {
        byte_slice(base, start, len)
    }
}

/// Collapse a rope into a single Flat
///
/// Consumes `value`. Flats, singletons and scalars are returned unchanged.
pub fn flatten(value: Value) -> Value {
    match value.block_type() {
        Some(BlockType::Slice | BlockType::Node) => {}
        _ => return value,
    }
    let logical_type = rope_type(&value, "flatten");
    let size = value.size();
    let flat = heap::alloc_flat(logical_type, size, size);
    // Safety: fresh block, one reference
    let result = unsafe { Value::from_object(flat.cast()) };

    let mut written = 0usize;
    iter::for_each_section(&value, |section| {
        // Safety: sections sum to exactly `size` bytes
        unsafe {
            ptr::copy_nonoverlapping(
                section.as_ptr(),
                heap::flat_data(flat).add(written),
                section.len(),
            );
        }
        written += section.len();
    });
    crate::ice_assert!(written == size as usize, "flatten copied {} of {} bytes", written, size);

    // The copied elements gain a second owner
    if let Some(elements) = flat_values(&result) {
        for element in elements {
            std::mem::forget(element.clone());
        }
    }
    tracing::debug!(size, logical = logical_type.name(), "flatten");
    result
}

/// Change the logical type of a rope
///
/// Consumes `value`. Flattens first; copies when the Flat is shared.
pub fn set_logical_type(value: Value, logical_type: LogicalType) -> Value {
    let current = rope_type(&value, "set_logical_type");
    if current == logical_type {
        return value;
    }
    crate::ice_assert!(
        current.is_bytes() && logical_type.is_bytes(),
        "cannot retype {} as {}",
        current.name(),
        logical_type.name()
    );
    if !value.is_object() {
        return if logical_type == LogicalType::Blob {
            value
        } else {
            new_flat(logical_type, 0)
        };
    }
    let mut value = flatten(value);
    if let Ownership::Exclusive(owner) = value.ownership() {
        // Safety: sole owner of a live Flat
        unsafe { (*owner.ptr().as_ptr()).logical_type = logical_type };
        return value;
    }
    let mut copy = new_flat(logical_type, value.size());
    if let (Some(dst), Some(src)) = (flat_bytes_mut(&mut copy), flat_bytes(&value)) {
        dst.copy_from_slice(src);
    }
    copy
}

// =============================================================================
// Growth
// =============================================================================

/// Append `extra` zeroed bytes to a blob or symbol and return them for
/// writing
///
/// `*value` is replaced by the tree that includes the new bytes. With
/// `in_place_growth` enabled, an exclusively-owned rightmost Flat is grown
/// in place (amortised O(1)); otherwise a new Flat is concatenated on.
///
/// # Panics
/// Fatal for lists; use `list::append`.
pub fn append_writeable_section(value: &mut Value, extra: u32) -> &mut [u8] {
    let logical_type = rope_type(value, "append_writeable_section");
    crate::ice_assert!(
        logical_type.is_bytes(),
        "append_writeable_section on {}",
        logical_type.name()
    );
    append_section(value, extra)
}

/// [`append_writeable_section`] for any rope, lists included
pub(crate) fn append_section(value: &mut Value, extra: u32) -> &mut [u8] {
    if extra == 0 {
        return &mut [];
    }
    let logical_type = rope_type(value, "append_writeable_section");
    let (in_place, min_growth) = runtime::growth_policy();

    let data = if value.size() == 0 {
        let (fresh, data) = growable_flat(logical_type, extra, in_place, min_growth);
        *value = fresh;
        data
    } else if let Some(data) = in_place.then(|| grow_in_place(value, extra, min_growth)).flatten()
    {
        data
    } else {
        let (fresh, data) = growable_flat(logical_type, extra, in_place, min_growth);
        let current = std::mem::take(value);
        *value = concat(current, fresh);
        data
    };
    // Safety: `extra` zeroed bytes at `data` now belong to the tree in `value`
    unsafe { std::slice::from_raw_parts_mut(data, extra as usize) }
}

fn growable_flat(
    logical_type: LogicalType,
    size: u32,
    in_place: bool,
    min_growth: u32,
) -> (Value, *mut u8) {
    let capacity = if in_place { size.max(min_growth) } else { size };
    let flat = heap::alloc_flat(logical_type, size, capacity);
    // Safety: fresh block, one reference
    let value = unsafe { Value::from_object(flat.cast()) };
    (value, unsafe { heap::flat_data(flat) })
}

fn grow_in_place(value: &mut Value, extra: u32, min_growth: u32) -> Option<*mut u8> {
    match value.ownership() {
        Ownership::Exclusive(owner) => match owner.block_type() {
            BlockType::Flat => {
                // Safety: sole owner of a live Flat
                let (flat, data) = unsafe { extend_flat(owner.ptr().cast(), extra, min_growth) };
                unsafe { owner.relocate(flat.cast()) };
                Some(data)
            }
            BlockType::Node => {
                let node = owner.ptr().cast::<Node>();
                // Safety: sole owner of the Node, so its right child is only
                // reachable through us
                let right = unsafe { &mut (*node.as_ptr()).right };
                let data = match right.ownership() {
                    Ownership::Exclusive(leaf) if leaf.block_type() == BlockType::Flat => {
                        let (flat, data) =
                            unsafe { extend_flat(leaf.ptr().cast(), extra, min_growth) };
                        unsafe { leaf.relocate(flat.cast()) };
                        data
                    }
                    _ => return None,
                };
                // Safety: sole owner of the Node
                unsafe {
                    let header = &mut (*node.as_ptr()).header;
                    header.size = match header.size.checked_add(extra) {
                        Some(size) => size,
                        None => internal_error("node size overflow"),
                    };
                }
                Some(data)
            }
            _ => None,
        },
        Ownership::Shared => None,
    }
}

/// Grow an exclusive Flat by `extra` bytes, reallocating when full
///
/// # Safety
/// `flat` must be live and exclusively owned.
unsafe fn extend_flat(flat: NonNull<Flat>, extra: u32, min_growth: u32) -> (NonNull<Flat>, *mut u8) {
    unsafe {
        let size = (*flat.as_ptr()).header.size;
        let capacity = (*flat.as_ptr()).capacity;
        let Some(needed) = size.checked_add(extra) else {
            internal_error("flat size overflow");
        };
        let flat = if needed > capacity {
            let new_capacity = needed.max(capacity.saturating_mul(2)).max(min_growth);
            heap::realloc_flat(flat, new_capacity)
        } else {
            flat
        };
        (*flat.as_ptr()).header.size = needed;
        let data = heap::flat_data(flat).add(size as usize);
        ptr::write_bytes(data, 0, extra as usize);
        (flat, data)
    }
}
