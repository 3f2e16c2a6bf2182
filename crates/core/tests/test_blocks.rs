//! Rope structure: concat, slice, flatten and in-place growth

mod common;

use common::{assert_no_leaks, init_tracing};
use ice_core::block::{self, append_writeable_section, byte_slice, concat, flatten};
use ice_core::iter::{self, BlockIter};
use ice_core::refcount::refcount;
use ice_core::{RuntimeConfig, Value, blob, runtime};

fn text(value: &Value) -> String {
    blob::to_string_lossy(value)
}

#[test]
fn test_concat_absorbs_empty() {
    init_tracing();
    let a = blob::from_str("abc");
    let bits = a.raw_bits();
    let joined = concat(a, Value::empty_blob());
    assert_eq!(joined.raw_bits(), bits);
    let joined = concat(Value::empty_blob(), joined);
    assert_eq!(joined.raw_bits(), bits);
}

#[test]
fn test_concat_shares_children() {
    let left = blob::from_str("left");
    let right = blob::from_str("right");
    let node = concat(left.clone(), right.clone());
    assert!(block::is_node_block(&node));
    assert_eq!(refcount(&left), 2);
    assert_eq!(refcount(&right), 2);
    assert_eq!(text(&node), "leftright");
    drop(node);
    assert_eq!(refcount(&left), 1);
}

#[test]
fn test_slice_of_slice_points_at_original_base() {
    let base = blob::from_str("0123456789");
    let outer = byte_slice(base.clone(), 2, 6);
    let inner = byte_slice(outer, 1, 3);
    assert_eq!(text(&inner), "345");
    assert!(block::is_slice_block(&inner));
    assert_eq!(refcount(&base), 2);
}

#[test]
fn test_slice_clamps_to_base() {
    let base = blob::from_str("abcdef");
    assert_eq!(text(&byte_slice(base.clone(), 4, 100)), "ef");
    assert!(byte_slice(base.clone(), 10, 2).is_empty_blob());
    let whole = byte_slice(base.clone(), 0, 6);
    assert_eq!(whole.raw_bits(), base.raw_bits());
}

#[test]
fn test_slice_across_node_boundary() {
    let rope = concat(blob::from_str("hello "), blob::from_str("world"));
    assert_eq!(text(&byte_slice(rope, 4, 4)), "o wo");
}

#[test]
fn test_flatten_matches_iteration() {
    let rope = concat(
        concat(blob::from_str("a"), byte_slice(blob::from_str("xbcx"), 1, 2)),
        blob::from_str("d"),
    );
    let collected: Vec<u8> = iter::bytes(&rope).collect();
    let flat = flatten(rope);
    assert!(block::is_flat_block(&flat));
    assert_eq!(block::flat_bytes(&flat).unwrap(), &collected[..]);
    assert_eq!(collected, b"abcd");
}

#[test]
fn test_flatten_list_keeps_elements_alive() {
    let element = blob::from_str("kept");
    let list = ice_core::list::concat(
        ice_core::list::of([element.clone()]),
        ice_core::list::of([Value::int(2)]),
    );
    let flat = flatten(list);
    assert_eq!(refcount(&element), 2);
    drop(flat);
    assert_eq!(refcount(&element), 1);
}

#[test]
fn test_block_get_on_every_shape() {
    let rope = concat(blob::from_str("ab"), byte_slice(blob::from_str("zcdz"), 1, 2));
    let expected = b"abcd";
    for (i, byte) in expected.iter().enumerate() {
        assert_eq!(block::block_get(&rope, i as u32), byte);
    }
}

#[test]
fn test_in_place_growth_reuses_leaf() {
    runtime::init(RuntimeConfig::default());
    let mut value = Value::empty_blob();
    append_writeable_section(&mut value, 1)[0] = b'a';
    let before = runtime::stats();
    for _ in 0..32 {
        append_writeable_section(&mut value, 1)[0] = b'b';
    }
    let delta = runtime::stats().since(&before);
    assert_eq!(delta.allocations, 0);
    assert!(block::is_flat_block(&value));
    assert_eq!(blob::len(&value), 33);
}

#[test]
fn test_growth_without_in_place_concats() {
    runtime::init(RuntimeConfig {
        in_place_growth: false,
        ..RuntimeConfig::default()
    });
    let mut value = blob::from_str("a");
    append_writeable_section(&mut value, 2).copy_from_slice(b"bc");
    assert!(block::is_node_block(&value));
    assert_eq!(text(&value), "abc");
    runtime::init(RuntimeConfig::default());
}

#[test]
fn test_shared_value_is_not_grown_in_place() {
    runtime::init(RuntimeConfig::default());
    let mut value = blob::from_str("ab");
    let snapshot = value.clone();
    append_writeable_section(&mut value, 1)[0] = b'c';
    assert_eq!(text(&snapshot), "ab");
    assert_eq!(text(&value), "abc");
}

#[test]
fn test_iterator_sections_cover_rope() {
    let rope = concat(
        blob::from_str("one"),
        concat(blob::from_str("two"), blob::from_str("three")),
    );
    let mut it = BlockIter::start(&rope);
    let mut sections = Vec::new();
    while !it.is_done() {
        sections.push(String::from_utf8(it.section().to_vec()).unwrap());
        it.advance_section();
    }
    assert_eq!(sections, ["one", "two", "three"]);
}

#[test]
fn test_deep_rope_drop_is_not_recursive() {
    assert_no_leaks(|| {
        let mut list = Value::empty_list();
        for i in 0..50_000 {
            list = ice_core::list::concat(list, ice_core::list::of([Value::int(i)]));
        }
        assert_eq!(ice_core::list::length(&list), 50_000);
    });
}

#[test]
fn test_structural_ops_do_not_leak() {
    assert_no_leaks(|| {
        let rope = concat(blob::from_str("abc"), blob::from_str("def"));
        let sliced = byte_slice(rope.clone(), 1, 4);
        let flat = flatten(sliced.clone());
        assert_eq!(text(&flat), "bcde");
        drop((rope, sliced, flat));
    });
}
