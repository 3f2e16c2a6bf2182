//! Tagged Value
//!
//! Every value in the runtime is an 8-byte handle. The low three bits select
//! the kind; the rest is either an inline payload or a block address.
//!
//! ## Encoding Scheme
//!
//! ```text
//! Object:    [pointer bits 63:3                          ][000]
//! Int:       [i32 payload 63:32      ][unused 31:3       ][001]
//! Float:     [f32 bits 63:32         ][unused 31:3       ][010]
//! Extended:  [unused 63:16           ][subtag 15:8][..   ][011]
//! ```
//!
//! ## Extended Subtags
//!
//! - 0x0: nil
//! - 0x1: empty list
//! - 0x2: empty table
//! - 0x3: empty blob
//! - 0x4: true
//! - 0x5: false
//!
//! Heap blocks are 8-byte aligned (see [`crate::heap`]), so an object pointer
//! always has a zero tag. Singletons and numbers never touch the heap.
//!
//! ## Ownership
//!
//! A `Value` owns one reference to its block. `Clone` is incref and `Drop` is
//! decref (both implemented in [`crate::refcount`]). Operations that consume
//! a value take it by move; operations that borrow take `&Value`.

use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::internal_error;
use crate::heap::{BLOCK_SIGNATURE, BlockType, LogicalType, ObjectHeader};

// =============================================================================
// Constants
// =============================================================================

const TAG_MASK: u64 = 0b111;
const TAG_OBJECT: u64 = 0;
const TAG_INT: u64 = 1;
const TAG_FLOAT: u64 = 2;
const TAG_EXTENDED: u64 = 3;

const PAYLOAD_SHIFT: u32 = 32;
const SUBTAG_SHIFT: u32 = 8;
const SUBTAG_MASK: u64 = 0xff;

/// Extended subtags (bits 15:8 of an Extended value)
pub(crate) const EX_NIL: u64 = 0;
pub(crate) const EX_EMPTY_LIST: u64 = 1;
pub(crate) const EX_EMPTY_TABLE: u64 = 2;
pub(crate) const EX_EMPTY_BLOB: u64 = 3;
pub(crate) const EX_TRUE: u64 = 4;
pub(crate) const EX_FALSE: u64 = 5;

const fn extended_bits(subtag: u64) -> u64 {
    (subtag << SUBTAG_SHIFT) | TAG_EXTENDED
}

// =============================================================================
// Value
// =============================================================================

/// An 8-byte tagged value
///
/// Not `Send` or `Sync`: refcounts are plain bytes and the runtime context is
/// thread-local.
#[repr(transparent)]
pub struct Value {
    bits: u64,
    _not_send: PhantomData<*const ObjectHeader>,
}

/// Decoded view of a value's kind
///
/// Callers match on this instead of inspecting tag bits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    Nil,
    Bool(bool),
    Int(i32),
    Float(f32),
    EmptyList,
    EmptyTable,
    EmptyBlob,
    Object {
        block_type: BlockType,
        logical_type: LogicalType,
    },
}

impl Value {
    // =========================================================================
    // Encoding
    // =========================================================================

    #[inline(always)]
    const fn from_bits_unchecked(bits: u64) -> Self {
        Value {
            bits,
            _not_send: PhantomData,
        }
    }

    #[inline(always)]
    pub const fn nil() -> Self {
        Self::from_bits_unchecked(extended_bits(EX_NIL))
    }

    #[inline(always)]
    pub const fn empty_list() -> Self {
        Self::from_bits_unchecked(extended_bits(EX_EMPTY_LIST))
    }

    #[inline(always)]
    pub const fn empty_table() -> Self {
        Self::from_bits_unchecked(extended_bits(EX_EMPTY_TABLE))
    }

    #[inline(always)]
    pub const fn empty_blob() -> Self {
        Self::from_bits_unchecked(extended_bits(EX_EMPTY_BLOB))
    }

    #[inline(always)]
    pub const fn bool(b: bool) -> Self {
        if b {
            Self::from_bits_unchecked(extended_bits(EX_TRUE))
        } else {
            Self::from_bits_unchecked(extended_bits(EX_FALSE))
        }
    }

    #[inline(always)]
    pub const fn int(n: i32) -> Self {
        Self::from_bits_unchecked(((n as u32 as u64) << PAYLOAD_SHIFT) | TAG_INT)
    }

    #[inline(always)]
    pub const fn float(f: f32) -> Self {
        Self::from_bits_unchecked(((f.to_bits() as u64) << PAYLOAD_SHIFT) | TAG_FLOAT)
    }

    /// The empty singleton for a logical type
    pub fn empty_of(logical_type: LogicalType) -> Self {
        match logical_type {
            LogicalType::List => Value::empty_list(),
            LogicalType::Table => Value::empty_table(),
            LogicalType::Blob | LogicalType::Symbol => Value::empty_blob(),
        }
    }

    /// Wrap a block pointer, taking over one reference
    ///
    /// # Safety
    /// `ptr` must point to a live block and the caller must own the
    /// reference being transferred.
    #[inline]
    pub(crate) unsafe fn from_object(ptr: NonNull<ObjectHeader>) -> Self {
        let bits = ptr.as_ptr() as usize as u64;
        if bits & TAG_MASK != TAG_OBJECT {
            internal_error(&format!("misaligned block pointer 0x{:x}", bits));
        }
        Self::from_bits_unchecked(bits)
    }

    /// Raw 64-bit encoding
    #[inline(always)]
    pub fn raw_bits(&self) -> u64 {
        self.bits
    }

    /// Give up ownership and return the raw encoding
    #[inline(always)]
    pub(crate) fn into_raw(self) -> u64 {
        let bits = self.bits;
        std::mem::forget(self);
        bits
    }

    /// Rebuild a value from [`Value::into_raw`] output
    ///
    /// # Safety
    /// If `bits` encode an object, the caller must own that reference.
    #[inline(always)]
    pub(crate) unsafe fn from_raw(bits: u64) -> Self {
        Self::from_bits_unchecked(bits)
    }

    // =========================================================================
    // Type Checking
    // =========================================================================

    #[inline(always)]
    fn tag(&self) -> u64 {
        self.bits & TAG_MASK
    }

    #[inline(always)]
    fn subtag(&self) -> u64 {
        (self.bits >> SUBTAG_SHIFT) & SUBTAG_MASK
    }

    #[inline(always)]
    fn is_extended(&self, subtag: u64) -> bool {
        self.bits == extended_bits(subtag)
    }

    #[inline(always)]
    pub fn is_object(&self) -> bool {
        self.tag() == TAG_OBJECT && self.bits != 0
    }

    #[inline(always)]
    pub fn is_int(&self) -> bool {
        self.tag() == TAG_INT
    }

    #[inline(always)]
    pub fn is_float(&self) -> bool {
        self.tag() == TAG_FLOAT
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        self.is_extended(EX_NIL)
    }

    #[inline(always)]
    pub fn is_bool(&self) -> bool {
        self.is_extended(EX_TRUE) || self.is_extended(EX_FALSE)
    }

    #[inline(always)]
    pub fn is_empty_list(&self) -> bool {
        self.is_extended(EX_EMPTY_LIST)
    }

    #[inline(always)]
    pub fn is_empty_table(&self) -> bool {
        self.is_extended(EX_EMPTY_TABLE)
    }

    #[inline(always)]
    pub fn is_empty_blob(&self) -> bool {
        self.is_extended(EX_EMPTY_BLOB)
    }

    /// One of the three empty-collection singletons
    #[inline]
    pub fn is_empty_singleton(&self) -> bool {
        self.is_empty_list() || self.is_empty_table() || self.is_empty_blob()
    }

    pub fn is_list(&self) -> bool {
        self.logical_type() == Some(LogicalType::List)
    }

    pub fn is_table(&self) -> bool {
        self.logical_type() == Some(LogicalType::Table)
    }

    pub fn is_blob(&self) -> bool {
        self.logical_type() == Some(LogicalType::Blob)
    }

    pub fn is_symbol(&self) -> bool {
        self.logical_type() == Some(LogicalType::Symbol)
    }

    /// Semantic kind of a collection value (singletons included)
    pub fn logical_type(&self) -> Option<LogicalType> {
        if let Some(header) = self.header() {
            return Some(header.logical_type);
        }
        if self.tag() != TAG_EXTENDED {
            return None;
        }
        match self.subtag() {
            EX_EMPTY_LIST => Some(LogicalType::List),
            EX_EMPTY_TABLE => Some(LogicalType::Table),
            EX_EMPTY_BLOB => Some(LogicalType::Blob),
            _ => None,
        }
    }

    /// Physical kind of an object value
    pub fn block_type(&self) -> Option<BlockType> {
        self.header().map(|h| h.block_type)
    }

    pub fn decode(&self) -> Decoded {
        match self.tag() {
            TAG_INT => Decoded::Int(self.as_int()),
            TAG_FLOAT => Decoded::Float(self.as_float()),
            TAG_EXTENDED => match self.subtag() {
                EX_NIL => Decoded::Nil,
                EX_TRUE => Decoded::Bool(true),
                EX_FALSE => Decoded::Bool(false),
                EX_EMPTY_LIST => Decoded::EmptyList,
                EX_EMPTY_TABLE => Decoded::EmptyTable,
                EX_EMPTY_BLOB => Decoded::EmptyBlob,
                other => internal_error(&format!("unknown extended subtag {}", other)),
            },
            _ => match self.header() {
                Some(h) => Decoded::Object {
                    block_type: h.block_type,
                    logical_type: h.logical_type,
                },
                None => internal_error(&format!("undecodable value bits 0x{:x}", self.bits)),
            },
        }
    }

    // =========================================================================
    // Decoding (Extracting values)
    // =========================================================================

    /// Extract an integer
    ///
    /// # Panics
    /// Fatal if this is not an Int.
    #[inline]
    pub fn as_int(&self) -> i32 {
        crate::ice_assert!(self.is_int(), "as_int on non-int value 0x{:x}", self.bits);
        (self.bits >> PAYLOAD_SHIFT) as u32 as i32
    }

    /// Extract a float
    ///
    /// # Panics
    /// Fatal if this is not a Float.
    #[inline]
    pub fn as_float(&self) -> f32 {
        crate::ice_assert!(
            self.is_float(),
            "as_float on non-float value 0x{:x}",
            self.bits
        );
        f32::from_bits((self.bits >> PAYLOAD_SHIFT) as u32)
    }

    /// Extract a boolean
    ///
    /// # Panics
    /// Fatal if this is not a Bool.
    #[inline]
    pub fn as_bool(&self) -> bool {
        crate::ice_assert!(self.is_bool(), "as_bool on non-bool value 0x{:x}", self.bits);
        self.is_extended(EX_TRUE)
    }

    pub fn try_int(&self) -> Option<i32> {
        self.is_int().then(|| self.as_int())
    }

    pub fn try_float(&self) -> Option<f32> {
        self.is_float().then(|| self.as_float())
    }

    pub fn try_bool(&self) -> Option<bool> {
        self.is_bool().then(|| self.as_bool())
    }

    // =========================================================================
    // Block access
    // =========================================================================

    #[inline(always)]
    pub(crate) fn object_ptr(&self) -> Option<NonNull<ObjectHeader>> {
        if self.tag() == TAG_OBJECT {
            NonNull::new(self.bits as usize as *mut ObjectHeader)
        } else {
            None
        }
    }

    #[inline(always)]
    pub(crate) fn header(&self) -> Option<&ObjectHeader> {
        // Safety: an object value keeps its block alive for the borrow
        self.object_ptr().map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Byte length covered by this value's block tree
    ///
    /// Zero for singletons and scalars.
    #[inline]
    pub fn size(&self) -> u32 {
        self.header().map_or(0, |h| h.size)
    }

    /// Allocation id stamped into the block header
    pub fn alloc_id(&self) -> Option<u32> {
        self.header().map(|h| h.alloc_id)
    }

    /// Verify an object value's header is intact
    ///
    /// # Panics
    /// Fatal on a bad signature or zero refcount (freed or corrupted block).
    pub fn check_value(&self) {
        if let Some(h) = self.header() {
            crate::ice_assert!(
                h.signature == BLOCK_SIGNATURE,
                "bad block signature 0x{:x} (use after free?)",
                h.signature
            );
            crate::ice_assert!(h.refcount > 0, "live block with zero refcount");
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::nil()
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::int(n)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        crate::blob::from_str(s)
    }
}

// =============================================================================
// Borrowed nil
// =============================================================================

struct StaticValue(Value);

// Safety: only immediate values (no heap pointer) are ever stored here
unsafe impl Sync for StaticValue {}

static NIL: StaticValue = StaticValue(Value::nil());

/// A borrowed nil, returned by lookups that miss
#[inline(always)]
pub fn nil_ref() -> &'static Value {
    &NIL.0
}
