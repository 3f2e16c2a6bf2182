//! Primitive Helpers
//!
//! Numeric conversions, truthiness, text-to-number parsing, and the generic
//! `get` / `set` dispatch that picks list indexing or table lookup from the
//! collection's type.
//!
//! Type mismatches here are not errors: `get` on a scalar is nil, `set` on a
//! scalar returns it unchanged. Only [`to_int`] treats a non-number as fatal.

use crate::blob;
use crate::cmp;
use crate::error::internal_error;
use crate::list;
use crate::table;
use crate::value::{Decoded, Value, nil_ref};

// =============================================================================
// Predicates
// =============================================================================

/// Everything except `false` and `nil`
pub fn is_truthy(value: &Value) -> bool {
    !(value.is_nil() || value.try_bool() == Some(false))
}

pub fn is_number(value: &Value) -> bool {
    value.is_int() || value.is_float()
}

/// Scalars that hold no heap reference and are not collections
pub fn is_leaf_value(value: &Value) -> bool {
    matches!(
        value.decode(),
        Decoded::Int(_) | Decoded::Float(_) | Decoded::Bool(_) | Decoded::Nil
    )
}

// =============================================================================
// Numbers
// =============================================================================

/// Ints as is, floats truncated toward zero
///
/// # Panics
/// Fatal for anything that is not a number.
pub fn to_int(value: &Value) -> i32 {
    match value.decode() {
        Decoded::Int(n) => n,
        Decoded::Float(f) => f as i32,
        _ => internal_error("to_int of a non-number"),
    }
}

/// Numbers as f32, anything else 0.0
pub fn to_float(value: &Value) -> f32 {
    match value.decode() {
        Decoded::Int(n) => n as f32,
        Decoded::Float(f) => f,
        _ => 0.0,
    }
}

/// `n + 1` for ints (wrapping), nil otherwise
pub fn increment(value: &Value) -> Value {
    match value.try_int() {
        Some(n) => Value::int(n.wrapping_add(1)),
        None => Value::nil(),
    }
}

/// Leading decimal integer of a blob, `atoi` style
///
/// An optional `-` then digits up to the first non-digit. No digits gives 0.
pub fn parse_int(text: &Value) -> i64 {
    let bytes = blob::to_vec(text);
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, &bytes[..]),
    };
    let magnitude = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |acc, &b| acc.wrapping_mul(10).wrapping_add((b - b'0') as i64));
    if negative { -magnitude } else { magnitude }
}

/// Leading decimal number of a blob, `atof` style
///
/// Accepts `[-]digits[.digits]`; anything after that is ignored.
pub fn parse_float(text: &Value) -> f64 {
    let bytes = blob::to_vec(text);
    let mut end = usize::from(bytes.first() == Some(&b'-'));
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    std::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|s| s.trim_end_matches('.').parse::<f64>().ok())
        .unwrap_or(0.0)
}

// =============================================================================
// Generic access
// =============================================================================

/// List element by int index or table value by key; nil for anything else
pub fn get<'a>(obj: &'a Value, key: &Value) -> &'a Value {
    if obj.is_list() {
        return match key.try_int() {
            Some(index) => list::get_index(obj, index),
            None => nil_ref(),
        };
    }
    if obj.is_table() {
        return table::find(obj, key);
    }
    nil_ref()
}

/// Follow `path` through nested collections
pub fn get_path<'a>(obj: &'a Value, path: &[Value]) -> &'a Value {
    path.iter().fold(obj, |current, key| get(current, key))
}

/// Store `el` under `key`; consumes `obj`, `key` and `el`
///
/// Tables insert, lists replace the element at an int index. Anything else
/// is returned unchanged.
pub fn set(obj: Value, key: Value, el: Value) -> Value {
    if obj.is_table() {
        return table::insert(obj, key, el);
    }
    if obj.is_list() {
        return match key.try_int() {
            Some(index) => list::set_index(obj, index, el),
            None => obj,
        };
    }
    obj
}

/// Store `el` at the end of `path`, rebuilding each collection on the way
///
/// Consumes `obj` and `el`. An empty path leaves `obj` as is.
pub fn set_path(obj: Value, path: &[Value], el: Value) -> Value {
    match path {
        [] => obj,
        [key] => set(obj, key.clone(), el),
        [key, rest @ ..] => {
            let child = get(&obj, key).clone();
            let child = set_path(child, rest, el);
            set(obj, key.clone(), child)
        }
    }
}

/// Replace the element at `index` with `f` of it; consumes `list`
pub fn apply_index<F>(list: Value, index: i32, f: F) -> Value
where
    F: FnOnce(Value) -> Value,
{
    let current = list::take_index(&list, index);
    list::set_index(list, index, f(current))
}

/// Replace occurrences of `target` with `replacement`; consumes `obj`
///
/// `obj` itself is replaced when it equals `target`. Otherwise list elements
/// and table values equal to `target` are replaced, one level down. Table
/// keys and their order are kept.
pub fn deep_replace(obj: Value, target: &Value, replacement: &Value) -> Value {
    if cmp::equals(&obj, target) {
        return replacement.clone();
    }
    if obj.is_list() {
        let matches: Vec<i32> = (0..list::length(&obj) as i32)
            .filter(|&i| cmp::equals(list::get_index(&obj, i), target))
            .collect();
        return matches.into_iter().fold(obj, |obj, i| {
            list::set_index(obj, i, replacement.clone())
        });
    }
    if obj.is_table() {
        let keys: Vec<Value> = table::entries(&obj)
            .filter(|(_, value)| cmp::equals(value, target))
            .map(|(key, _)| key.clone())
            .collect();
        return keys.into_iter().fold(obj, |obj, key| {
            table::insert(obj, key, replacement.clone())
        });
    }
    obj
}
