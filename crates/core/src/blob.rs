//! Blob and Symbol Operations
//!
//! Blobs are byte ropes; symbols are the same ropes with a different logical
//! type, so a symbol never equals a blob with the same bytes.
//!
//! Growth goes through [`append_writeable_section`], which picks between
//! in-place growth and allocate-and-concat. Reads that run past the end are
//! not errors: [`read_u32`] and [`read_u64`] return 0.

use std::ffi::CStr;

use crate::block::{self, append_writeable_section};
use crate::heap::LogicalType;
use crate::iter::{self, BlockIter};
use crate::runtime;
use crate::stringify;
use crate::value::Value;

// =============================================================================
// Construction
// =============================================================================

pub fn from_bytes(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::empty_blob();
    }
    let mut blob = block::new_flat(LogicalType::Blob, bytes.len() as u32);
    if let Some(data) = block::flat_bytes_mut(&mut blob) {
        data.copy_from_slice(bytes);
    }
    blob
}

pub fn from_str(s: &str) -> Value {
    from_bytes(s.as_bytes())
}

/// A symbol with the given name
pub fn symbol(name: &str) -> Value {
    let mut sym = block::new_flat(LogicalType::Symbol, name.len() as u32);
    if let Some(data) = block::flat_bytes_mut(&mut sym) {
        data.copy_from_slice(name.as_bytes());
    }
    sym
}

/// Reinterpret a blob as a symbol; consumes `blob`
pub fn to_symbol(blob: Value) -> Value {
    block::set_logical_type(blob, LogicalType::Symbol)
}

/// A fresh symbol `<base>#<id>`, distinct from every earlier gensym
///
/// Consumes `base`. Values other than blobs and symbols are stringified
/// first.
pub fn gensym(base: Value) -> Value {
    base.check_value();
    let base = if base.is_blob() || base.is_symbol() {
        base
    } else {
        stringify::stringify(&base)
    };
    let id = runtime::next_gensym_id();
    let name = append_str(append_byte(base, b'#'), &id.to_string());
    to_symbol(name)
}

/// Store a raw pointer as an 8-byte blob
pub fn from_pointer<T>(ptr: *const T) -> Value {
    from_bytes(&(ptr as usize as u64).to_le_bytes())
}

/// Read back a pointer stored with [`from_pointer`]
pub fn as_pointer<T>(blob: &Value) -> *const T {
    read_u64(blob, 0) as usize as *const T
}

// =============================================================================
// Queries
// =============================================================================

fn is_bytes(value: &Value) -> bool {
    value.logical_type().is_some_and(LogicalType::is_bytes)
}

fn expect_bytes(value: &Value, op: &str) {
    crate::ice_assert!(
        is_bytes(value),
        "{} on non-blob value 0x{:x}",
        op,
        value.raw_bits()
    );
}

/// Byte length; 0 for non-blobs
pub fn len(blob: &Value) -> u32 {
    if is_bytes(blob) { blob.size() } else { 0 }
}

pub fn is_empty(blob: &Value) -> bool {
    len(blob) == 0
}

/// Compare against a C-style string
///
/// `s` ends at its first NUL, if any, so a blob holding a NUL byte never
/// matches.
pub fn equals_str(blob: &Value, s: &str) -> bool {
    if !is_bytes(blob) {
        return false;
    }
    let host = s.as_bytes();
    let host = &host[..host.iter().position(|&b| b == 0).unwrap_or(host.len())];
    if blob.size() as usize != host.len() {
        return false;
    }
    let mut offset = 0usize;
    let mut it = BlockIter::start(blob);
    while !it.is_done() {
        let section = it.section();
        if section != &host[offset..offset + section.len()] {
            return false;
        }
        offset += section.len();
        it.advance_section();
    }
    offset == host.len()
}

fn read_le<const N: usize>(blob: &Value, offset: u32) -> Option<[u8; N]> {
    if !is_bytes(blob) || offset as u64 + N as u64 > blob.size() as u64 {
        return None;
    }
    let mut out = [0u8; N];
    let mut it = BlockIter::start(blob);
    it.advance(offset);
    for byte in out.iter_mut() {
        *byte = it.get_u8();
        it.advance(1);
    }
    Some(out)
}

/// Little-endian u32 at `offset`, or 0 if it would read past the end
pub fn read_u32(blob: &Value, offset: u32) -> u32 {
    read_le::<4>(blob, offset).map_or(0, u32::from_le_bytes)
}

/// Little-endian u64 at `offset`, or 0 if it would read past the end
pub fn read_u64(blob: &Value, offset: u32) -> u64 {
    read_le::<8>(blob, offset).map_or(0, u64::from_le_bytes)
}

/// Copy every byte out
pub fn to_vec(blob: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(len(blob) as usize);
    if is_bytes(blob) {
        iter::for_each_section(blob, |section| out.extend_from_slice(section));
    }
    out
}

/// Contents as text, replacing invalid UTF-8
pub fn to_string_lossy(blob: &Value) -> String {
    String::from_utf8_lossy(&to_vec(blob)).into_owned()
}

/// Bytes of a single-Flat blob
pub fn flat_bytes(blob: &Value) -> Option<&[u8]> {
    block::flat_bytes(blob)
}

// =============================================================================
// Appending
// =============================================================================

/// Consumes `blob`
///
/// # Panics
/// Fatal if `blob` is not a blob or symbol. The same holds for the other
/// appends.
pub fn append_byte(blob: Value, byte: u8) -> Value {
    expect_bytes(&blob, "append_byte");
    let mut blob = blob;
    append_writeable_section(&mut blob, 1)[0] = byte;
    blob
}

/// Consumes `blob`
pub fn append_bytes(blob: Value, bytes: &[u8]) -> Value {
    expect_bytes(&blob, "append_bytes");
    if bytes.is_empty() {
        return blob;
    }
    let mut blob = blob;
    append_writeable_section(&mut blob, bytes.len() as u32).copy_from_slice(bytes);
    blob
}

/// Consumes `blob`
pub fn append_str(blob: Value, s: &str) -> Value {
    append_bytes(blob, s.as_bytes())
}

/// Append the bytes of `suffix`; consumes both
///
/// An empty side is skipped without copying.
pub fn append(blob: Value, suffix: Value) -> Value {
    expect_bytes(&blob, "append");
    if suffix.size() == 0 {
        return blob;
    }
    expect_bytes(&suffix, "append");
    if blob.is_empty_blob() && suffix.is_blob() {
        return suffix;
    }
    let mut blob = blob;
    let section = append_writeable_section(&mut blob, suffix.size());
    let mut written = 0usize;
    iter::for_each_section(&suffix, |run| {
        section[written..written + run.len()].copy_from_slice(run);
        written += run.len();
    });
    blob
}

// =============================================================================
// C strings
// =============================================================================

/// NUL-terminate and flatten; consumes `blob`
///
/// Non-blob values become an empty C string.
pub fn to_cstr(blob: Value) -> Value {
    let blob = if is_bytes(&blob) { blob } else { Value::empty_blob() };
    block::flatten(append_byte(blob, 0))
}

/// View a [`to_cstr`] result as a C string
pub fn as_cstr(blob: &Value) -> Option<&CStr> {
    CStr::from_bytes_until_nul(block::flat_bytes(blob)?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::concat;
    use crate::refcount::refcount;

    #[test]
    fn test_is_blob() {
        assert!(!Value::nil().is_blob());
        assert!(Value::empty_blob().is_blob());
        assert!(!Value::empty_list().is_blob());
        assert!(from_bytes(&[0, 1, 2, 3]).is_blob());
    }

    #[test]
    fn test_equals_str() {
        let value = from_str("apple");
        assert!(equals_str(&value, "apple"));
        assert_eq!(refcount(&value), 1);
        assert!(!equals_str(&value, "apple "));
        assert!(!equals_str(&value, "appl"));
        assert!(!equals_str(&value, "banana"));
        assert!(!equals_str(&value, ""));

        let empty = from_str("");
        assert!(equals_str(&empty, ""));
        assert!(!equals_str(&empty, " "));
    }

    #[test]
    fn test_equals_str_stops_at_nul() {
        assert!(equals_str(&from_str("ab"), "ab\0cd"));
        assert!(!equals_str(&from_bytes(b"a\0b"), "a\0b"));
    }

    #[test]
    fn test_equals_str_on_rope() {
        let rope = concat(from_str("app"), from_str("le"));
        assert!(equals_str(&rope, "apple"));
        assert!(!equals_str(&rope, "apply"));
    }

    #[test]
    fn test_append_str() {
        let value = from_str("");
        let value = append_str(value, "1");
        assert!(equals_str(&value, "1"));
        let value = append_str(value, &"234"[..2]);
        assert!(equals_str(&value, "123"));
        let value = append_str(value, "");
        assert!(equals_str(&value, "123"));
    }

    #[test]
    fn test_append_byte() {
        let value = Value::empty_blob();
        let value = append_byte(value, b'c');
        assert!(equals_str(&value, "c"));
        let value = append_byte(value, b'a');
        let value = append_byte(value, b'r');
        assert!(equals_str(&value, "car"));
    }

    #[test]
    fn test_append_blob() {
        let ab = from_str("ab");
        let joined = append(ab.clone(), from_str("cd"));
        assert!(equals_str(&joined, "abcd"));
        assert!(equals_str(&ab, "ab"));
        let suffix = from_str("xy");
        let bits = suffix.raw_bits();
        assert_eq!(append(Value::empty_blob(), suffix).raw_bits(), bits);
    }

    #[test]
    fn test_append_rope_suffix() {
        let suffix = concat(from_str("c"), from_str("d"));
        let joined = append(from_str("ab"), suffix);
        assert_eq!(to_vec(&joined), b"abcd");
    }

    #[test]
    #[should_panic(expected = "append_bytes on non-blob value")]
    fn test_append_bytes_to_list_is_fatal() {
        let list = crate::list::of([Value::int(1)]);
        append_bytes(list, &[8, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "append_byte on non-blob value")]
    fn test_append_byte_to_int_is_fatal() {
        append_byte(Value::int(3), b'x');
    }

    #[test]
    #[should_panic(expected = "append on non-blob value")]
    fn test_append_list_suffix_is_fatal() {
        append(from_str("ab"), crate::list::of([Value::int(1)]));
    }

    #[test]
    fn test_append_to_symbol() {
        let sym = append_str(symbol("ab"), "cd");
        assert!(sym.is_symbol());
        assert!(equals_str(&sym, "abcd"));
    }

    #[test]
    fn test_storing_opaque_pointer() {
        let target = Box::new(17u8);
        let ptr: *const u8 = &*target;
        let blob = from_pointer(ptr);
        assert_eq!(read_u64(&blob, 0), ptr as usize as u64);
        assert_eq!(as_pointer::<u8>(&blob), ptr);
    }

    #[test]
    fn test_short_reads_return_zero() {
        let blob = from_bytes(&[1, 0, 0, 0, 2]);
        assert_eq!(read_u32(&blob, 0), 1);
        assert_eq!(read_u32(&blob, 1), 0x0200_0000);
        assert_eq!(read_u32(&blob, 2), 0);
        assert_eq!(read_u64(&blob, 0), 0);
        assert_eq!(read_u32(&Value::int(1), 0), 0);
    }

    #[test]
    fn test_read_across_sections() {
        let rope = concat(from_bytes(&[0x78, 0x56]), from_bytes(&[0x34, 0x12]));
        assert_eq!(read_u32(&rope, 0), 0x1234_5678);
    }

    #[test]
    fn test_blob_slice() {
        let source = from_str("apple");
        assert!(block::slice(source.clone(), 0, 0).is_empty_blob());
        assert!(block::slice(source.clone(), 3, 0).is_empty_blob());
        assert!(block::slice(source.clone(), 5, 0).is_empty_blob());
        assert!(block::slice(source.clone(), 6, 0).is_empty_blob());
        let slice1 = block::slice(source.clone(), 1, 3);
        assert!(equals_str(&slice1, "ppl"));
        let slice2 = block::slice(slice1, 1, 2);
        assert!(equals_str(&slice2, "pl"));
    }

    #[test]
    fn test_to_cstr() {
        let rope = concat(from_str("hel"), from_str("lo"));
        let c = to_cstr(rope);
        assert!(block::is_flat_block(&c));
        assert_eq!(as_cstr(&c).unwrap().to_str().unwrap(), "hello");
        assert_eq!(as_cstr(&to_cstr(Value::int(5))).unwrap().to_bytes(), b"");
    }

    #[test]
    fn test_symbol() {
        let sym = symbol("name");
        assert!(sym.is_symbol());
        assert!(!sym.is_blob());
        assert!(equals_str(&sym, "name"));
        assert_eq!(len(&sym), 4);
    }

    #[test]
    fn test_to_symbol() {
        let sym = to_symbol(from_str("abc"));
        assert!(sym.is_symbol());
        assert!(crate::cmp::equals(&sym, &symbol("abc")));
    }

    #[test]
    fn test_gensym_is_distinct() {
        let a = gensym(from_str("tmp"));
        let b = gensym(from_str("tmp"));
        assert!(a.is_symbol());
        assert!(to_string_lossy(&a).starts_with("tmp#"));
        assert!(!crate::cmp::equals(&a, &b));
    }

    #[test]
    fn test_gensym_of_non_blob() {
        let sym = gensym(Value::int(12));
        assert!(to_string_lossy(&sym).starts_with("12#"));
    }
}
