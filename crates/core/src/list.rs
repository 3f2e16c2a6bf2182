//! List Operations
//!
//! A list is a rope whose Flat leaves hold inline Values, [`ELEMENT_WIDTH`]
//! bytes each. Indexing resolves through the same Slice/Node walk as byte
//! access, and every structural operation (concat, slice, flatten) is the
//! block-tree one.
//!
//! Ownership follows the rest of the core: arguments taken by value are
//! consumed, arguments taken by reference are borrowed.

use crate::block::{self, element_at};
use crate::heap::{ELEMENT_WIDTH, LogicalType};
use crate::iter::{self, Elements};
use crate::refcount::Ownership;
use crate::value::{Value, nil_ref};

// =============================================================================
// Construction
// =============================================================================

/// Build a list from owned elements
pub fn from_values<I>(values: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    let values: Vec<Value> = values.into_iter().collect();
    if values.is_empty() {
        return Value::empty_list();
    }
    let mut list = block::new_flat(LogicalType::List, values.len() as u32 * ELEMENT_WIDTH);
    if let Some(slots) = block::flat_values_mut(&mut list) {
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = value;
        }
    }
    list
}

/// Build a list from a fixed set of elements
pub fn of<const N: usize>(values: [Value; N]) -> Value {
    from_values(values)
}

/// A list of `count` nils
pub fn new_list(count: u32) -> Value {
    if count == 0 {
        return Value::empty_list();
    }
    block::new_flat(LogicalType::List, count * ELEMENT_WIDTH)
}

/// Ints `start..fin`; empty when `fin <= start`
pub fn range(start: i32, fin: i32) -> Value {
    from_values((start..fin.max(start)).map(Value::int))
}

// =============================================================================
// Access
// =============================================================================

/// Number of elements; 0 for anything that is not a list
pub fn length(list: &Value) -> u32 {
    if list.is_list() {
        list.size() / ELEMENT_WIDTH
    } else {
        0
    }
}

/// Element at `index`, or a borrowed nil when out of range
pub fn get_index(list: &Value, index: i32) -> &Value {
    if index < 0 || index as u32 >= length(list) {
        return nil_ref();
    }
    element_at(list, index as u32)
}

/// Owned copy of the element at `index`
pub fn take_index(list: &Value, index: i32) -> Value {
    get_index(list, index).clone()
}

/// First element, or nil; consumes `list`
pub fn first(list: Value) -> Value {
    take_index(&list, 0)
}

/// Everything after the first element; consumes `list`
///
/// Lists of length 0 or 1 give the empty list.
pub fn rest(list: Value) -> Value {
    let len = length(&list);
    if len <= 1 {
        return Value::empty_list();
    }
    block::slice(list, 1, len - 1)
}

/// Owned elements in order
pub fn elements(list: &Value) -> Elements {
    iter::elements(list)
}

// =============================================================================
// Modification
// =============================================================================

/// Copy `list` into an exclusively-owned Flat unless it already is one
fn unshare(list: Value) -> Value {
    let mut list = list;
    if block::is_flat_block(&list) && matches!(list.ownership(), Ownership::Exclusive(_)) {
        return list;
    }
    let copy = from_values(elements(&list));
    drop(list);
    copy
}

/// Replace the element at `index`
///
/// Consumes `list` and `element`. Out-of-range indexes leave the list as it
/// was. Shared lists and multi-block trees are copied into a fresh Flat
/// first, so other owners never see the write.
pub fn set_index(list: Value, index: i32, element: Value) -> Value {
    if index < 0 || index as u32 >= length(&list) {
        return list;
    }
    let mut list = unshare(list);
    if let Some(slots) = block::flat_values_mut(&mut list) {
        slots[index as usize] = element;
    }
    list
}

/// Add `element` at the end; consumes both
pub fn append(list: Value, element: Value) -> Value {
    crate::ice_assert!(list.is_list(), "append to non-list 0x{:x}", list.raw_bits());
    let mut list = list;
    let section = block::append_section(&mut list, ELEMENT_WIDTH);
    section.copy_from_slice(&element.into_raw().to_ne_bytes());
    list
}

/// Add `element` at the front; consumes both
pub fn prepend(list: Value, element: Value) -> Value {
    block::concat(of([element]), list)
}

/// Concatenate two lists; consumes both
pub fn concat(left: Value, right: Value) -> Value {
    block::concat(left, right)
}

/// Concatenate every list in `lists`; consumes it
pub fn concat_n(lists: Value) -> Value {
    elements(&lists).fold(Value::empty_list(), block::concat)
}

/// `len` elements starting at `start`; consumes `list`
pub fn slice(list: Value, start: u32, len: u32) -> Value {
    block::slice(list, start, len)
}

/// Apply `f` to each element, collecting the results
///
/// Consumes `list`; each element is handed to `f` as an owned value.
pub fn map<F>(list: Value, f: F) -> Value
where
    F: FnMut(Value) -> Value,
{
    from_values(elements(&list).map(f).collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob;
    use crate::refcount::refcount;
    use crate::stringify::to_display;

    fn int(n: i32) -> Value {
        Value::int(n)
    }

    #[test]
    fn test_empty_list() {
        assert!(!Value::nil().is_list());
        let value = Value::empty_list();
        assert_eq!(to_display(&value), "[]");
        assert!(value.is_list());
        assert_eq!(length(&value), 0);
        assert!(from_values(Vec::new()).is_empty_list());
    }

    #[test]
    fn test_get_index() {
        assert!(get_index(&Value::empty_list(), 0).is_nil());
        let v = of([int(1), int(2), int(3)]);
        assert_eq!(*get_index(&v, 0), int(1));
        assert_eq!(*get_index(&v, 1), int(2));
        assert_eq!(*get_index(&v, 2), int(3));
        assert!(get_index(&v, 3).is_nil());
        assert!(get_index(&v, -1).is_nil());
    }

    #[test]
    fn test_length() {
        assert_eq!(length(&Value::nil()), 0);
        assert_eq!(length(&Value::empty_list()), 0);
        assert_eq!(length(&of([int(0)])), 1);
        let value = of([int(0), int(0)]);
        assert_eq!(length(&value), 2);
        let value = append(value, int(3));
        assert_eq!(length(&value), 3);
        let value = prepend(value, int(3));
        assert_eq!(length(&value), 4);
    }

    #[test]
    fn test_list_of_list() {
        let value = of([of([int(1)]), of([int(2)]), of([int(3)])]);
        for i in 0..3 {
            assert_eq!(*get_index(get_index(&value, i), 0), int(i + 1));
        }
    }

    #[test]
    fn test_append() {
        let value = append(Value::empty_list(), int(1));
        let value = append(value, int(2));
        assert_eq!(to_display(&value), "[1, 2]");
        let value = append(value, int(3));
        assert_eq!(to_display(&value), "[1, 2, 3]");
        assert_eq!(*get_index(&value, 2), int(3));
    }

    #[test]
    fn test_append_many() {
        let mut list = Value::empty_list();
        for i in 0..50 {
            list = append(list, int(i));
            assert_eq!(length(&list), i as u32 + 1);
        }
        for i in 0..50 {
            assert_eq!(*get_index(&list, i), int(i));
        }
    }

    #[test]
    fn test_append_object_keeps_one_reference() {
        let element = blob::from_str("x");
        let list = append(Value::empty_list(), element.clone());
        assert_eq!(refcount(&element), 2);
        drop(list);
        assert_eq!(refcount(&element), 1);
    }

    #[test]
    fn test_append_does_not_touch_shared() {
        let a = of([int(1)]);
        let b = append(a.clone(), int(2));
        assert_eq!(to_display(&a), "[1]");
        assert_eq!(to_display(&b), "[1, 2]");
    }

    #[test]
    fn test_list_with_nil() {
        let x = of([Value::nil()]);
        assert_eq!(to_display(&x), "[nil]");
        assert_eq!(length(&x), 1);
    }

    #[test]
    fn test_concat() {
        let a = of([int(1), int(2)]);
        let b = of([int(3), int(4)]);
        let x = concat(a.clone(), b.clone());
        let y = concat(b, a);
        assert_eq!(to_display(&x), "[1, 2, 3, 4]");
        assert_eq!(to_display(&y), "[3, 4, 1, 2]");
        for i in 0..4 {
            assert_eq!(*get_index(&x, i), int(i + 1));
        }
    }

    #[test]
    fn test_concat_empty_sides() {
        assert_eq!(to_display(&concat(Value::empty_list(), of([int(1), int(2)]))), "[1, 2]");
        assert_eq!(to_display(&concat(of([int(1), int(2)]), Value::empty_list())), "[1, 2]");
    }

    #[test]
    fn test_concat_nested() {
        let a = concat(of([int(0), int(1)]), of([int(2)]));
        let b = concat(of([int(3)]), of([int(4), int(5), int(6)]));
        let e = concat(concat(concat(a, b), Value::empty_list()), of([int(7)]));
        assert_eq!(to_display(&e), "[0, 1, 2, 3, 4, 5, 6, 7]");
        for i in 0..8 {
            assert_eq!(*get_index(&e, i), int(i));
        }
    }

    #[test]
    fn test_concat_repeat() {
        let a = of([int(1), int(2), int(3)]);
        let b = concat(a.clone(), a.clone());
        assert_eq!(to_display(&b), "[1, 2, 3, 1, 2, 3]");
        let b = concat(a, b);
        assert_eq!(to_display(&b), "[1, 2, 3, 1, 2, 3, 1, 2, 3]");
    }

    #[test]
    fn test_concat_n() {
        let lists = of([of([int(1)]), Value::empty_list(), of([int(2), int(3)])]);
        assert_eq!(to_display(&concat_n(lists)), "[1, 2, 3]");
        assert!(concat_n(Value::empty_list()).is_empty_list());
    }

    #[test]
    fn test_slice() {
        let base = of([int(1), int(2), int(3), int(4)]);
        assert_eq!(to_display(&slice(base.clone(), 1, 2)), "[2, 3]");
        assert_eq!(to_display(&slice(base.clone(), 0, 1)), "[1]");
        assert_eq!(to_display(&slice(base.clone(), 0, 4)), "[1, 2, 3, 4]");
        assert_eq!(to_display(&slice(base, 4, 0)), "[]");
        assert_eq!(to_display(&slice(Value::empty_list(), 0, 0)), "[]");
    }

    #[test]
    fn test_slice_of_slice() {
        let base = of([int(1), int(2), int(3)]);
        let a = slice(base.clone(), 1, 2);
        let b = slice(a.clone(), 1, 1);
        assert_eq!(to_display(&a), "[2, 3]");
        assert_eq!(to_display(&b), "[3]");
        assert!(block::is_slice_block(&b));
        assert_eq!(refcount(&base), 3);
    }

    #[test]
    fn test_range() {
        assert_eq!(to_display(&range(1, 3)), "[1, 2]");
        assert!(range(3, 1).is_empty_list());
    }

    #[test]
    fn test_first() {
        assert!(first(Value::empty_list()).is_nil());
        assert_eq!(first(range(1, 2)), int(1));
        assert_eq!(first(range(1, 4)), int(1));
    }

    #[test]
    fn test_rest() {
        assert_eq!(to_display(&rest(Value::empty_list())), "[]");
        assert!(rest(range(1, 2)).is_empty_list());
        assert_eq!(to_display(&rest(range(1, 4))), "[2, 3]");
    }

    #[test]
    fn test_set_index() {
        let hi = || blob::symbol("hi");
        assert_eq!(to_display(&set_index(range(0, 5), 2, hi())), "[0, 1, :hi, 3, 4]");
        assert_eq!(to_display(&set_index(range(0, 1), 0, hi())), "[:hi]");
        assert_eq!(to_display(&set_index(range(0, 3), 0, hi())), "[:hi, 1, 2]");
        assert_eq!(to_display(&set_index(range(0, 3), 2, hi())), "[0, 1, :hi]");
        assert_eq!(to_display(&set_index(range(0, 3), 3, hi())), "[0, 1, 2]");
    }

    #[test]
    fn test_set_index_on_empty() {
        assert!(set_index(Value::empty_list(), 0, blob::symbol("hi")).is_empty_list());
    }

    #[test]
    fn test_set_index_in_place_when_exclusive() {
        let list = range(0, 3);
        let bits = list.raw_bits();
        let list = set_index(list, 1, int(9));
        assert_eq!(list.raw_bits(), bits);
        assert_eq!(to_display(&list), "[0, 9, 2]");
    }

    #[test]
    fn test_set_index_copies_shared() {
        let a = range(0, 3);
        let b = set_index(a.clone(), 0, int(7));
        assert_eq!(to_display(&a), "[0, 1, 2]");
        assert_eq!(to_display(&b), "[7, 1, 2]");
    }

    #[test]
    fn test_set_index_on_rope() {
        let list = concat(range(0, 2), range(2, 4));
        let list = set_index(list, 3, int(-1));
        assert!(block::is_flat_block(&list));
        assert_eq!(to_display(&list), "[0, 1, 2, -1]");
    }

    #[test]
    fn test_new_list() {
        assert_eq!(to_display(&new_list(3)), "[nil, nil, nil]");
        assert!(new_list(0).is_empty_list());
    }

    #[test]
    fn test_map() {
        let doubled = map(range(1, 4), |v| Value::int(v.as_int() * 2));
        assert_eq!(to_display(&doubled), "[2, 4, 6]");
        assert!(map(Value::empty_list(), |v| v).is_empty_list());
    }
}
