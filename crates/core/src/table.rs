//! Hash Table
//!
//! An insertion-ordered table stored in one block: a power-of-two bucket
//! array followed by a pair array.
//!
//! ```text
//! buckets: [ {pair_index, next_bucket, hashcode} ; capacity ]
//! pairs:   [ {key, value} ; capacity ]   -- filled 0..length in insertion order
//! ```
//!
//! Collisions chain through `next_bucket`: a probe starts at
//! `hash % capacity` and follows the links. When a chain ends at an occupied
//! bucket, the next free bucket (scanning forward, wrapping) is claimed and
//! linked in.
//!
//! Because pairs are appended in order and never removed, walking
//! `pairs[0..length)` always yields insertion order, including after growth.
//!
//! Tables are persistent like every other value: [`insert`] mutates in place
//! only when it holds the sole reference, and copies otherwise.

use std::ptr::{self, NonNull};

use crate::cmp;
use crate::error::internal_error;
use crate::heap::{self, BlockType, Bucket, Hashtable, Pair};
use crate::list;
use crate::refcount::Ownership;
use crate::runtime;
use crate::value::{Value, nil_ref};

fn hashtable_ptr(table: &Value) -> Option<NonNull<Hashtable>> {
    match table.block_type() {
        Some(BlockType::Hashtable) => table.object_ptr().map(NonNull::cast),
        _ => None,
    }
}

// =============================================================================
// Raw block operations
// =============================================================================

/// Walk forward from `from`, wrapping, to the next free bucket
///
/// # Safety
/// `buckets` must point to `capacity` live buckets.
unsafe fn claim_next_bucket(buckets: *mut Bucket, capacity: u32, from: u32) -> u32 {
    let mut index = (from + 1) % capacity;
    while index != from {
        if unsafe { (*buckets.add(index as usize)).is_empty() } {
            return index;
        }
        index = (index + 1) % capacity;
    }
    internal_error("hashtable has no free bucket")
}

/// Insert into a block with spare capacity, or update an existing key
///
/// Consumes `key` and `value`. On update the stored key is kept and the new
/// one is dropped.
///
/// # Safety
/// `table` must be live, exclusively owned, and have `length < capacity`
/// unless `key` is already present.
unsafe fn raw_insert(table: NonNull<Hashtable>, key: Value, value: Value) {
    unsafe {
        let t = table.as_ptr();
        let capacity = (*t).capacity;
        let buckets = heap::hashtable_buckets(table);
        let pairs = heap::hashtable_pairs(table);
        let hash = cmp::hashcode(&key);
        let mut index = hash % capacity;

        loop {
            let bucket = *buckets.add(index as usize);

            if bucket.is_empty() {
                let pair_index = (*t).length;
                crate::ice_assert!(pair_index < capacity, "insert into full hashtable");
                ptr::write(pairs.add(pair_index as usize), Pair { key, value });
                (*t).length += 1;
                (*t).header.size = (*t).length;
                *buckets.add(index as usize) = Bucket::occupied(pair_index as i32, hash);
                return;
            }

            let pair = pairs.add(bucket.pair_index as usize);
            if bucket.hashcode == hash && cmp::equals(&(*pair).key, &key) {
                let old = std::mem::replace(&mut (*pair).value, value);
                drop(old);
                drop(key);
                return;
            }

            if bucket.next_bucket == -1 {
                let next = claim_next_bucket(buckets, capacity, index);
                (*buckets.add(index as usize)).next_bucket = next as i32;
                index = next;
            } else {
                index = bucket.next_bucket as u32;
            }
        }
    }
}

/// # Safety
/// `table` must be live for `'a`.
unsafe fn raw_find<'a>(table: NonNull<Hashtable>, key: &Value) -> Option<&'a Pair> {
    unsafe {
        let capacity = (*table.as_ptr()).capacity;
        let buckets = heap::hashtable_buckets(table);
        let pairs = heap::hashtable_pairs(table);
        let hash = cmp::hashcode(key);
        let mut index = hash % capacity;

        loop {
            let bucket = *buckets.add(index as usize);
            if bucket.is_empty() {
                return None;
            }
            let pair = &*pairs.add(bucket.pair_index as usize);
            if bucket.hashcode == hash && cmp::equals(&pair.key, key) {
                return Some(pair);
            }
            if bucket.next_bucket == -1 {
                return None;
            }
            index = bucket.next_bucket as u32;
        }
    }
}

/// Re-insert every pair of `src` into `dst`, in insertion order
///
/// With `steal`, references move out of `src` and it is left empty;
/// otherwise each key and value is incref'd.
///
/// # Safety
/// Both tables must be live; `dst` must be exclusive with enough room;
/// `steal` requires `src` to be exclusive.
unsafe fn copy_pairs(src: NonNull<Hashtable>, dst: NonNull<Hashtable>, steal: bool) {
    unsafe {
        let length = (*src.as_ptr()).length;
        let pairs = heap::hashtable_pairs(src);
        for i in 0..length as usize {
            let pair = pairs.add(i);
            let (key, value) = if steal {
                (ptr::read(&(*pair).key), ptr::read(&(*pair).value))
            } else {
                ((*pair).key.clone(), (*pair).value.clone())
            };
            raw_insert(dst, key, value);
        }
        if steal {
            (*src.as_ptr()).length = 0;
            (*src.as_ptr()).header.size = 0;
        }
    }
}

// =============================================================================
// Table operations
// =============================================================================

/// An empty table block with room for `capacity` entries
///
/// `capacity` is rounded up to a power of two.
pub fn with_capacity(capacity: u32) -> Value {
    let capacity = capacity.max(1).next_power_of_two();
    let table = heap::alloc_hashtable(capacity);
    // Safety: fresh block, one reference
    unsafe { Value::from_object(table.cast()) }
}

/// Build a table from `(key, value)` pairs; later duplicates win
pub fn from_pairs<I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (Value, Value)>,
{
    let pairs: Vec<(Value, Value)> = pairs.into_iter().collect();
    if pairs.is_empty() {
        return Value::empty_table();
    }
    let mut table = with_capacity(pairs.len() as u32);
    for (key, value) in pairs {
        table = insert(table, key, value);
    }
    table
}

/// Insert or update `key`
///
/// Consumes all three arguments. Updating keeps the original key and
/// replaces the value. A full table doubles its capacity; a shared table is
/// copied before the write.
pub fn insert(table: Value, key: Value, value: Value) -> Value {
    if table.is_empty_table() {
        let fresh = with_capacity(runtime::table_capacity());
        if let Some(ptr) = hashtable_ptr(&fresh) {
            // Safety: fresh exclusive block with spare capacity
            unsafe { raw_insert(ptr, key, value) };
        }
        return fresh;
    }

    let Some(ptr) = hashtable_ptr(&table) else {
        internal_error(&format!("insert into non-table value 0x{:x}", table.raw_bits()));
    };
    // Safety: `table` keeps the block alive
    let (length, capacity) = unsafe { ((*ptr.as_ptr()).length, (*ptr.as_ptr()).capacity) };
    let mut table = table;

    if length >= capacity {
        let steal = matches!(table.ownership(), Ownership::Exclusive(_));
        let bigger = with_capacity(capacity * 2);
        let Some(bigger_ptr) = hashtable_ptr(&bigger) else {
            internal_error("hashtable allocation failed");
        };
        tracing::debug!(
            old_capacity = capacity,
            new_capacity = capacity * 2,
            steal,
            "hashtable grow"
        );
        // Safety: `bigger` is fresh and twice the size; stealing only when
        // we are the sole owner of `table`
        unsafe {
            copy_pairs(ptr, bigger_ptr, steal);
            drop(table);
            raw_insert(bigger_ptr, key, value);
        }
        return bigger;
    }

    if let Ownership::Exclusive(owner) = table.ownership() {
        // Safety: sole owner with spare capacity
        unsafe { raw_insert(owner.ptr().cast(), key, value) };
        return table;
    }

    let copy = with_capacity(capacity);
    let Some(copy_ptr) = hashtable_ptr(&copy) else {
        internal_error("hashtable allocation failed");
    };
    // Safety: `copy` is fresh with the same capacity as `table`
    unsafe {
        copy_pairs(ptr, copy_ptr, false);
        drop(table);
        raw_insert(copy_ptr, key, value);
    }
    copy
}

/// Value stored under `key`, or a borrowed nil
///
/// Non-table values behave as empty tables.
pub fn find<'a>(table: &'a Value, key: &Value) -> &'a Value {
    match hashtable_ptr(table) {
        // Safety: `table` keeps the block alive for 'a
        Some(ptr) => unsafe { raw_find(ptr, key) }.map_or(nil_ref(), |pair| &pair.value),
        None => nil_ref(),
    }
}

pub fn contains_key(table: &Value, key: &Value) -> bool {
    match hashtable_ptr(table) {
        Some(ptr) => unsafe { raw_find(ptr, key) }.is_some(),
        None => false,
    }
}

/// Number of entries
pub fn len(table: &Value) -> u32 {
    // Safety: `table` keeps the block alive
    hashtable_ptr(table).map_or(0, |ptr| unsafe { (*ptr.as_ptr()).length })
}

pub fn is_empty(table: &Value) -> bool {
    len(table) == 0
}

/// Allocated entry slots; 0 for the empty singleton
pub fn capacity(table: &Value) -> u32 {
    hashtable_ptr(table).map_or(0, |ptr| unsafe { (*ptr.as_ptr()).capacity })
}

fn pair_at(table: &Value, index: u32) -> Option<&Pair> {
    let ptr = hashtable_ptr(table)?;
    // Safety: `table` keeps the block alive; index checked against length
    unsafe {
        if index >= (*ptr.as_ptr()).length {
            return None;
        }
        Some(&*heap::hashtable_pairs(ptr).add(index as usize))
    }
}

/// Key of the `index`-th inserted entry
pub fn key_at(table: &Value, index: u32) -> &Value {
    pair_at(table, index).map_or(nil_ref(), |pair| &pair.key)
}

/// Value of the `index`-th inserted entry
pub fn value_at(table: &Value, index: u32) -> &Value {
    pair_at(table, index).map_or(nil_ref(), |pair| &pair.value)
}

/// Borrowed entries in insertion order
pub fn entries(table: &Value) -> impl Iterator<Item = (&Value, &Value)> + '_ {
    (0..len(table)).filter_map(move |i| pair_at(table, i).map(|pair| (&pair.key, &pair.value)))
}

/// Keys as a list, in insertion order
pub fn keys(table: &Value) -> Value {
    list::from_values(entries(table).map(|(key, _)| key.clone()))
}

/// Values as a list, in insertion order
pub fn values(table: &Value) -> Value {
    list::from_values(entries(table).map(|(_, value)| value.clone()))
}

/// Entry count, then pairwise in insertion order
pub(crate) fn equals(left: &Value, right: &Value) -> bool {
    if len(left) != len(right) {
        return false;
    }
    entries(left)
        .zip(entries(right))
        .all(|((lk, lv), (rk, rv))| cmp::equals(lk, rk) && cmp::equals(lv, rv))
}

pub(crate) fn hashcode(table: &Value) -> u32 {
    entries(table).fold(cmp::table_hash_seed(), |hash, (key, value)| {
        hash ^ cmp::hashcode(key) ^ cmp::hashcode(value).rotate_left(16)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::refcount::refcount;
    use crate::stringify::to_display;

    fn int(n: i32) -> Value {
        Value::int(n)
    }

    #[test]
    fn test_simple() {
        let a = Value::empty_table();
        assert_eq!(to_display(&a), "{}");
        let a = insert(a, int(1), int(2));
        assert_eq!(to_display(&a), "{1 -> 2}");
        let a = insert(a, int(3), int(4));
        assert_eq!(to_display(&a), "{1 -> 2, 3 -> 4}");
    }

    #[test]
    fn test_simple_get() {
        let a = insert(insert(Value::empty_table(), int(1), int(2)), int(3), int(4));
        assert_eq!(find(&a, &int(1)).as_int(), 2);
        assert!(find(&a, &int(2)).is_nil());
        assert_eq!(find(&a, &int(3)).as_int(), 4);
        assert!(contains_key(&a, &int(3)));
        assert!(!contains_key(&a, &int(5)));
    }

    #[test]
    fn test_find_on_non_table() {
        assert!(find(&Value::empty_table(), &int(1)).is_nil());
        assert!(find(&int(7), &int(1)).is_nil());
    }

    #[test]
    fn test_update_keeps_original_key() {
        let key = crate::blob::from_str("k");
        let original_bits = key.raw_bits();
        let t = insert(Value::empty_table(), key, int(1));
        let t = insert(t, crate::blob::from_str("k"), int(2));
        assert_eq!(len(&t), 1);
        assert_eq!(key_at(&t, 0).raw_bits(), original_bits);
        assert_eq!(value_at(&t, 0).as_int(), 2);
    }

    #[test]
    fn test_keys_and_values() {
        assert_eq!(to_display(&keys(&Value::empty_table())), "[]");
        assert_eq!(to_display(&values(&Value::empty_table())), "[]");

        let t = insert(insert(Value::empty_table(), int(1), int(2)), int(2), int(3));
        assert_eq!(to_display(&keys(&t)), "[1, 2]");
        assert_eq!(to_display(&values(&t)), "[2, 3]");

        let t = insert(insert(Value::empty_table(), int(2), int(4)), int(1), int(3));
        assert_eq!(to_display(&keys(&t)), "[2, 1]");
        assert_eq!(to_display(&values(&t)), "[4, 3]");
    }

    #[test]
    fn test_safe_writes() {
        let l1 = |n| list::of([int(n)]);
        let t = insert(Value::empty_table(), l1(1), l1(2));
        let t = insert(t, l1(3), l1(4));
        let t2 = insert(t.clone(), l1(5), l1(6));
        assert_eq!(to_display(&t), "{[1] -> [2], [3] -> [4]}");
        assert_eq!(to_display(&t2), "{[1] -> [2], [3] -> [4], [5] -> [6]}");
    }

    #[test]
    fn test_exclusive_insert_is_in_place() {
        let t = insert(Value::empty_table(), int(1), int(1));
        let bits = t.raw_bits();
        let t = insert(t, int(2), int(2));
        assert_eq!(t.raw_bits(), bits);
    }

    #[test]
    fn test_grow() {
        runtime::init(RuntimeConfig::default());
        let mut t = Value::empty_table();
        for i in 0..100 {
            t = insert(t, int(i), int(100 - i));
        }
        assert_eq!(len(&t), 100);
        assert!(capacity(&t) >= 100);
        let keys = keys(&t);
        let values = values(&t);
        for i in 0..100 {
            assert_eq!(*list::get_index(&keys, i), int(i));
            assert_eq!(*list::get_index(&values, i), int(100 - i));
            assert_eq!(*find(&t, &int(i)), int(100 - i));
        }
    }

    #[test]
    fn test_grow_ownership() {
        let l1 = |n| list::of([int(n)]);
        let mut t = Value::empty_table();
        for i in 0..10 {
            t = insert(t, l1(i), l1(2));
        }
        let mut tcopy = t.clone();
        for i in 10..100 {
            t = insert(t, l1(i), l1(2));
            tcopy = insert(tcopy, l1(i), l1(2));
        }
        assert_eq!(t, tcopy);
        assert_eq!(refcount(&t), 1);
        assert_eq!(refcount(&tcopy), 1);
    }

    #[test]
    fn test_grow_steals_when_exclusive() {
        let value = crate::blob::from_str("payload");
        let mut t = with_capacity(1);
        t = insert(t, int(0), value.clone());
        assert_eq!(refcount(&value), 2);
        t = insert(t, int(1), int(1));
        assert_eq!(capacity(&t), 2);
        assert_eq!(refcount(&value), 2);
    }

    #[test]
    fn test_colliding_keys_chain() {
        let mut t = with_capacity(4);
        // Ints 0, 4, 8 and 12 all hash to home bucket 1
        for i in 0..4 {
            t = insert(t, int(i * 4), int(i));
        }
        assert_eq!(capacity(&t), 4);
        for i in 0..4 {
            assert_eq!(find(&t, &int(i * 4)).as_int(), i);
        }
    }

    #[test]
    fn test_default_capacity_from_config() {
        runtime::init(RuntimeConfig {
            default_table_capacity: 2,
            ..RuntimeConfig::default()
        });
        let t = insert(Value::empty_table(), int(1), int(1));
        assert_eq!(capacity(&t), 2);
        runtime::init(RuntimeConfig::default());
    }

    #[test]
    fn test_from_pairs() {
        let t = from_pairs([(int(1), int(10)), (int(2), int(20)), (int(1), int(11))]);
        assert_eq!(len(&t), 2);
        assert_eq!(find(&t, &int(1)).as_int(), 11);
        assert!(from_pairs(Vec::new()).is_empty_table());
    }

    #[test]
    fn test_table_equality_is_pairwise() {
        let a = from_pairs([(int(1), int(2)), (int(3), int(4))]);
        let b = from_pairs([(int(1), int(2)), (int(3), int(4))]);
        let c = from_pairs([(int(1), int(2)), (int(3), int(5))]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cmp::hashcode(&a), cmp::hashcode(&b));
    }

    #[test]
    fn test_key_at_out_of_range() {
        let t = from_pairs([(int(1), int(2))]);
        assert!(key_at(&t, 1).is_nil());
        assert!(value_at(&t, 5).is_nil());
    }

    #[test]
    fn test_no_leaks() {
        let before = runtime::stats();
        {
            let mut t = Value::empty_table();
            for i in 0..50 {
                t = insert(t, crate::blob::from_str(&i.to_string()), list::of([int(i)]));
            }
            let shared = t.clone();
            t = insert(t, int(-1), int(-1));
            drop(shared);
            drop(t);
        }
        let delta = runtime::stats().since(&before);
        assert_eq!(delta.allocations, delta.frees);
    }
}
