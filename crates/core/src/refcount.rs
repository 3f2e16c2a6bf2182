//! Reference Counting and Ownership
//!
//! `Clone` on a [`Value`] is incref and `Drop` is decref. Counts are 8-bit and
//! saturating: an incref that would reach [`REFCOUNT_PERM`] pins the block as
//! permanent instead of overflowing, and permanent blocks ignore both
//! operations from then on.
//!
//! In-place mutation is gated by [`Value::ownership`], which returns an
//! [`Ownership::Exclusive`] capability only when the block has exactly one
//! owner. Mutating paths branch on it once per call and never cache it.
//!
//! Freeing walks an explicit work list of child blocks rather than recursing,
//! so dropping the last reference to an arbitrarily deep rope cannot overflow
//! the call stack.

use std::ptr::NonNull;

use crate::error::internal_error;
use crate::heap::{self, BlockType, ObjectHeader, REFCOUNT_PERM};
use crate::runtime;
use crate::value::Value;

impl Clone for Value {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(ptr) = self.object_ptr() {
            // Safety: `self` keeps the block alive
            unsafe { acquire(ptr) };
        }
        // Safety: the reference acquired above belongs to the new handle
        unsafe { Value::from_raw(self.raw_bits()) }
    }
}

impl Drop for Value {
    #[inline]
    fn drop(&mut self) {
        if let Some(ptr) = self.object_ptr() {
            release(ptr);
        }
    }
}

/// # Safety
/// `ptr` must be a live block.
#[inline]
unsafe fn acquire(ptr: NonNull<ObjectHeader>) {
    runtime::record_incref();
    let header = unsafe { &mut *ptr.as_ptr() };
    match header.refcount {
        REFCOUNT_PERM => {}
        0 => internal_error("incref of freed block"),
        n => {
            header.refcount = n + 1;
            if header.refcount == REFCOUNT_PERM {
                tracing::debug!(alloc_id = header.alloc_id, "refcount saturated, block is now permanent");
            }
        }
    }
}

/// Drop one reference; true when the caller now holds the last one
///
/// # Safety
/// `ptr` must be a live block and the caller must own the reference.
#[inline]
unsafe fn drop_reference(ptr: NonNull<ObjectHeader>) -> bool {
    runtime::record_decref();
    let header = unsafe { &mut *ptr.as_ptr() };
    match header.refcount {
        REFCOUNT_PERM => false,
        0 => internal_error("refcount underflow"),
        1 => true,
        n => {
            header.refcount = n - 1;
            false
        }
    }
}

fn release(first: NonNull<ObjectHeader>) {
    let mut pending: Vec<NonNull<ObjectHeader>> = Vec::new();
    let mut next = Some(first);
    while let Some(ptr) = next {
        // Safety: every pointer here carries exactly one owned reference
        unsafe {
            if drop_reference(ptr) {
                heap::free_object(ptr, &mut pending);
            }
        }
        next = pending.pop();
    }
}

/// Take another reference to `value`
#[inline]
pub fn incref(value: &Value) -> Value {
    value.clone()
}

/// Give up a reference
#[inline]
pub fn decref(value: Value) {
    drop(value);
}

/// Current refcount; 1 for values without a block
pub fn refcount(value: &Value) -> u32 {
    value.header().map_or(1, |h| h.refcount as u32)
}

/// True for an object with exactly one owner
pub fn is_exclusive(value: &Value) -> bool {
    value.header().is_some_and(|h| h.refcount == 1)
}

pub fn is_perm(value: &Value) -> bool {
    value.header().is_some_and(|h| h.refcount == REFCOUNT_PERM)
}

/// Pin a block so it is never freed
///
/// Used for process-lifetime constants. No-op for values without a block.
pub fn make_perm(value: &Value) {
    if let Some(ptr) = value.object_ptr() {
        // Safety: `value` keeps the block alive
        unsafe { (*ptr.as_ptr()).refcount = REFCOUNT_PERM };
    }
}

/// Free a permanent block
///
/// # Safety
/// No other handle to the block (or to anything only it owns) may be used
/// afterwards.
pub unsafe fn free_perm(value: Value) {
    if let Some(ptr) = value.object_ptr() {
        unsafe { (*ptr.as_ptr()).refcount = 1 };
    }
    drop(value);
}

// =============================================================================
// Exclusive-ownership gate
// =============================================================================

/// Result of the exclusive-ownership check
pub enum Ownership<'a> {
    /// Sole owner: in-place mutation is allowed
    Exclusive(Exclusive<'a>),
    /// Shared, permanent, or not a block: copy instead of mutating
    Shared,
}

/// Capability to mutate a block in place
pub struct Exclusive<'a> {
    value: &'a mut Value,
    ptr: NonNull<ObjectHeader>,
}

impl<'a> Exclusive<'a> {
    pub fn block_type(&self) -> BlockType {
        // Safety: `value` keeps the block alive
        unsafe { (*self.ptr.as_ptr()).block_type }
    }

    pub(crate) fn ptr(&self) -> NonNull<ObjectHeader> {
        self.ptr
    }

    /// Replace the handle, e.g. after the block moved during realloc
    ///
    /// # Safety
    /// `ptr` must carry the one reference the old handle held.
    pub(crate) unsafe fn relocate(self, ptr: NonNull<ObjectHeader>) {
        let old = std::mem::replace(self.value, unsafe { Value::from_object(ptr) });
        // The old handle's reference moved to the new pointer
        std::mem::forget(old);
    }
}

impl Value {
    /// Check whether `self` may be mutated in place
    pub fn ownership(&mut self) -> Ownership<'_> {
        match self.object_ptr() {
            Some(ptr) if is_exclusive(self) => Ownership::Exclusive(Exclusive { value: self, ptr }),
            _ => Ownership::Shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{blob, list};

    #[test]
    fn test_incref_decref_roundtrip() {
        let v = blob::from_str("hello");
        assert_eq!(refcount(&v), 1);
        let extra = incref(&v);
        assert_eq!(refcount(&v), 2);
        decref(extra);
        assert_eq!(refcount(&v), 1);
        v.check_value();
    }

    #[test]
    fn test_scalars_report_refcount_one() {
        assert_eq!(refcount(&Value::int(1)), 1);
        assert_eq!(refcount(&Value::nil()), 1);
        assert!(!is_exclusive(&Value::int(1)));
    }

    #[test]
    fn test_drop_frees_block() {
        let before = runtime::stats();
        let v = blob::from_str("bytes");
        drop(v);
        let delta = runtime::stats().since(&before);
        assert_eq!(delta.allocations, 1);
        assert_eq!(delta.frees, 1);
    }

    #[test]
    fn test_drop_frees_children() {
        let before = runtime::stats();
        let inner = list::of([Value::int(1), blob::from_str("x")]);
        let outer = list::of([inner.clone(), inner]);
        drop(outer);
        let delta = runtime::stats().since(&before);
        assert_eq!(delta.allocations, delta.frees);
    }

    #[test]
    fn test_deep_rope_drop_does_not_recurse() {
        let mut rope = Value::empty_blob();
        for _ in 0..100_000 {
            rope = crate::block::concat(rope, blob::from_str("a"));
        }
        assert_eq!(blob::len(&rope), 100_000);
        drop(rope);
    }

    #[test]
    fn test_ownership_gate() {
        let mut v = blob::from_str("abc");
        assert!(matches!(v.ownership(), Ownership::Exclusive(_)));
        let shared = v.clone();
        assert!(matches!(v.ownership(), Ownership::Shared));
        drop(shared);
        assert!(matches!(v.ownership(), Ownership::Exclusive(_)));
        assert!(matches!(Value::int(3).ownership(), Ownership::Shared));
    }

    #[test]
    fn test_make_perm() {
        let before = runtime::stats();
        let v = blob::from_str("constant");
        make_perm(&v);
        assert!(is_perm(&v));
        let copy = v.clone();
        drop(copy);
        drop(v);
        let delta = runtime::stats().since(&before);
        assert_eq!(delta.frees, 0);
    }

    #[test]
    fn test_free_perm() {
        let before = runtime::stats();
        let v = blob::from_str("constant");
        make_perm(&v);
        unsafe { free_perm(v) };
        assert_eq!(runtime::stats().since(&before).frees, 1);
    }

    #[test]
    fn test_refcount_saturates_to_perm() {
        let v = blob::from_str("popular");
        let mut copies = Vec::new();
        for _ in 0..300 {
            copies.push(v.clone());
        }
        assert!(is_perm(&v));
        drop(copies);
        assert!(is_perm(&v));
    }
}
