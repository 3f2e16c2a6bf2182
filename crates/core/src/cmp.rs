//! Equality, Hashing and Ordering
//!
//! `equals` is structural: two values with different block histories (say a
//! Node of two Flats and one Flat) compare equal when they hold the same
//! bytes or elements. `hashcode` hashes the same structure, so equal values
//! always hash equal.
//!
//! Raw bit equality is checked first and short-circuits everything else.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::heap::LogicalType;
use crate::iter::BlockIter;
use crate::table;
use crate::value::{Decoded, EX_EMPTY_LIST, EX_EMPTY_TABLE, Value};

/// Bitwise identity: same singleton, same number encoding, or same block
#[inline]
pub fn shallow_equals(left: &Value, right: &Value) -> bool {
    left.raw_bits() == right.raw_bits()
}

/// Structural equality
///
/// Values of different logical types are never equal. Ints and floats
/// compare by encoding, so `1` and `1.0` differ.
pub fn equals(left: &Value, right: &Value) -> bool {
    if shallow_equals(left, right) {
        return true;
    }
    match (left.logical_type(), right.logical_type()) {
        (Some(a), Some(b)) if a == b => match a {
            LogicalType::List => list_equals(left, right),
            LogicalType::Table => table::equals(left, right),
            LogicalType::Blob | LogicalType::Symbol => bytes_equal(left, right),
        },
        _ => false,
    }
}

/// Byte-for-byte comparison of two ropes, one contiguous run at a time
fn bytes_equal(left: &Value, right: &Value) -> bool {
    if left.size() != right.size() {
        return false;
    }
    let mut l = BlockIter::start(left);
    let mut r = BlockIter::start(right);
    loop {
        match (l.is_done(), r.is_done()) {
            (true, true) => return true,
            (false, false) => {}
            _ => return false,
        }
        let (same, n) = {
            let ls = l.section();
            let rs = r.section();
            let n = ls.len().min(rs.len());
            (ls[..n] == rs[..n], n as u32)
        };
        if !same {
            return false;
        }
        l.advance(n);
        r.advance(n);
    }
}

fn list_equals(left: &Value, right: &Value) -> bool {
    if left.size() != right.size() {
        return false;
    }
    let mut l = BlockIter::start(left);
    let mut r = BlockIter::start(right);
    while !l.is_done() && !r.is_done() {
        if !equals(l.get_val(), r.get_val()) {
            return false;
        }
        l.advance_val();
        r.advance_val();
    }
    l.is_done() && r.is_done()
}

/// Structural hash, consistent with [`equals`]; never 0
pub fn hashcode(value: &Value) -> u32 {
    let hash = match value.logical_type() {
        Some(LogicalType::List) => list_hash(value),
        Some(LogicalType::Table) => table::hashcode(value),
        Some(LogicalType::Blob | LogicalType::Symbol) => bytes_hash(value),
        None => {
            let raw = value.raw_bits();
            (raw as u32) ^ ((raw >> 32) as u32)
        }
    };
    if hash == 0 { 1 } else { hash }
}

fn list_hash(list: &Value) -> u32 {
    let mut hash = (EX_EMPTY_LIST << 8) as u32;
    let mut it = BlockIter::start(list);
    while !it.is_done() {
        hash ^= hashcode(it.get_val());
        it.advance_val();
    }
    hash
}

fn bytes_hash(blob: &Value) -> u32 {
    let mut hash = 0u32;
    let mut shift = 0u32;
    let mut it = BlockIter::start(blob);
    while !it.is_done() {
        for &byte in it.section() {
            hash ^= (byte as u32) << (shift * 3);
            shift = (shift + 1) % 4;
        }
        it.advance_section();
    }
    hash
}

/// Seed for table hashes
pub(crate) fn table_hash_seed() -> u32 {
    (EX_EMPTY_TABLE << 8) as u32
}

// =============================================================================
// Ordering
// =============================================================================

fn kind_rank(value: &Value) -> u8 {
    match value.decode() {
        Decoded::Nil => 0,
        Decoded::Bool(_) => 1,
        Decoded::Int(_) | Decoded::Float(_) => 2,
        Decoded::EmptyBlob => 3,
        Decoded::EmptyList => 5,
        Decoded::EmptyTable => 6,
        Decoded::Object { logical_type, .. } => match logical_type {
            LogicalType::Blob => 3,
            LogicalType::Symbol => 4,
            LogicalType::List => 5,
            LogicalType::Table => 6,
        },
    }
}

/// Total order over all values
///
/// Kinds rank `nil < bool < number < blob < symbol < list < table`. Numbers
/// compare numerically (an int sorts before an equal float); blobs and
/// symbols by bytes; lists element-wise then by length; tables by length,
/// then entry-wise in insertion order. Returns `Equal` exactly when
/// [`equals`] is true.
pub fn compare(left: &Value, right: &Value) -> Ordering {
    if shallow_equals(left, right) {
        return Ordering::Equal;
    }
    let rank = kind_rank(left).cmp(&kind_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }
    match (left.decode(), right.decode()) {
        (Decoded::Bool(a), Decoded::Bool(b)) => a.cmp(&b),
        (a @ (Decoded::Int(_) | Decoded::Float(_)), b) => compare_numbers(a, b),
        _ => match left.logical_type() {
            Some(LogicalType::List) => compare_lists(left, right),
            Some(LogicalType::Table) => compare_tables(left, right),
            _ => compare_bytes(left, right),
        },
    }
}

fn number_parts(d: Decoded) -> (f64, u8, u64) {
    match d {
        Decoded::Int(n) => (n as f64, 0, 0),
        Decoded::Float(f) => (f as f64, 1, f.to_bits() as u64),
        _ => (0.0, 2, 0),
    }
}

fn compare_numbers(a: Decoded, b: Decoded) -> Ordering {
    let (av, ak, abits) = number_parts(a);
    let (bv, bk, bbits) = number_parts(b);
    av.total_cmp(&bv)
        .then(ak.cmp(&bk))
        .then(abits.cmp(&bbits))
}

fn compare_bytes(left: &Value, right: &Value) -> Ordering {
    let mut l = crate::iter::bytes(left);
    let mut r = crate::iter::bytes(right);
    loop {
        match (l.next(), r.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => match a.cmp(&b) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

fn compare_lists(left: &Value, right: &Value) -> Ordering {
    let mut l = BlockIter::start(left);
    let mut r = BlockIter::start(right);
    loop {
        match (l.is_done(), r.is_done()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        match compare(l.get_val(), r.get_val()) {
            Ordering::Equal => {}
            other => return other,
        }
        l.advance_val();
        r.advance_val();
    }
}

fn compare_tables(left: &Value, right: &Value) -> Ordering {
    let len = table::len(left);
    match len.cmp(&table::len(right)) {
        Ordering::Equal => {}
        other => return other,
    }
    for i in 0..len {
        let ordering = compare(table::key_at(left, i), table::key_at(right, i))
            .then_with(|| compare(table::value_at(left, i), table::value_at(right, i)));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

// =============================================================================
// std trait impls
// =============================================================================

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equals(self, other)
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(hashcode(self));
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}
