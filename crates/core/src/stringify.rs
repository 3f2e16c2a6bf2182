//! Text Rendering
//!
//! Two renderings are provided:
//!
//! - [`stringify`]: the value as a reader would write it. Lists `[1, 2]`,
//!   tables `{k -> v}` in insertion order, blobs in double quotes, symbols
//!   as `:name`, singletons as `nil`, `true`, `false`, `[]`, `{}`, `''`.
//!   Tests treat this output as golden.
//! - [`dump_string`]: the block structure, with allocation ids and
//!   refcounts, for debugging sharing and growth.
//!
//! `Display` for [`Value`] is [`stringify`]; `Debug` is [`dump_string`].

use std::fmt;
use std::io::{self, Write};

use crate::blob;
use crate::block;
use crate::heap::{BlockType, LogicalType, Node, Slice};
use crate::iter::{self, BlockIter};
use crate::refcount::refcount;
use crate::table;
use crate::value::{Decoded, Value};

/// Bytes of a Flat shown by [`dump_string`] before eliding
const DUMP_PREVIEW_BYTES: usize = 16;

// =============================================================================
// stringify
// =============================================================================

/// Append the rendering of `value` to the blob `buf`
///
/// Consumes `buf`; borrows `value`.
pub fn stringify_append(buf: Value, value: &Value) -> Value {
    crate::ice_assert!(buf.is_blob(), "stringify_append into a non-blob");
    match value.decode() {
        Decoded::Nil => blob::append_str(buf, "nil"),
        Decoded::Bool(true) => blob::append_str(buf, "true"),
        Decoded::Bool(false) => blob::append_str(buf, "false"),
        Decoded::Int(n) => blob::append_str(buf, &n.to_string()),
        Decoded::Float(f) => blob::append_str(buf, &format_float(f)),
        Decoded::EmptyList => blob::append_str(buf, "[]"),
        Decoded::EmptyTable => blob::append_str(buf, "{}"),
        Decoded::EmptyBlob => blob::append_str(buf, "''"),
        Decoded::Object { logical_type, .. } => match logical_type {
            LogicalType::List => {
                let mut buf = blob::append_byte(buf, b'[');
                let mut it = BlockIter::start(value);
                let mut first = true;
                while !it.is_done() {
                    if !first {
                        buf = blob::append_str(buf, ", ");
                    }
                    buf = stringify_append(buf, it.get_val());
                    first = false;
                    it.advance_val();
                }
                blob::append_byte(buf, b']')
            }
            LogicalType::Table => {
                let mut buf = blob::append_byte(buf, b'{');
                for (i, (key, val)) in table::entries(value).enumerate() {
                    if i > 0 {
                        buf = blob::append_str(buf, ", ");
                    }
                    buf = stringify_append(buf, key);
                    buf = blob::append_str(buf, " -> ");
                    buf = stringify_append(buf, val);
                }
                blob::append_byte(buf, b'}')
            }
            // The bytes are shared into the result, not copied
            LogicalType::Blob => {
                let buf = block::concat(blob::append_byte(buf, b'"'), value.clone());
                blob::append_byte(buf, b'"')
            }
            LogicalType::Symbol => block::concat(blob::append_byte(buf, b':'), value.clone()),
        },
    }
}

/// Render `value` into a new blob
pub fn stringify(value: &Value) -> Value {
    stringify_append(Value::empty_blob(), value)
}

/// `%f`-style: six decimals, lowercase `nan` / `inf`
fn format_float(f: f32) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{:.6}", f)
    }
}

/// [`stringify`] as a Rust string
pub fn to_display(value: &Value) -> String {
    blob::to_string_lossy(&stringify(value))
}

// =============================================================================
// Printing
// =============================================================================

/// Write `value` to `out`: blobs as their raw bytes, everything else
/// stringified
pub fn write_value<W: Write>(out: &mut W, value: &Value) -> io::Result<()> {
    if value.is_blob() {
        let mut result = Ok(());
        iter::for_each_section(value, |section| {
            if result.is_ok() {
                result = out.write_all(section);
            }
        });
        return result;
    }
    write_value(out, &stringify(value))
}

/// Write `value` to stdout; a failed write is logged, not returned
pub fn print(value: &Value) {
    let mut out = io::stdout().lock();
    if let Err(err) = write_value(&mut out, value) {
        tracing::warn!(error = %err, "print to stdout failed");
    }
}

pub fn println(value: &Value) {
    let mut out = io::stdout().lock();
    if let Err(err) = write_line(&mut out, value) {
        tracing::warn!(error = %err, "println to stdout failed");
    }
}

/// [`write_value`] followed by a newline
pub fn write_line<W: Write>(out: &mut W, value: &Value) -> io::Result<()> {
    write_value(out, value)?;
    out.write_all(b"\n")
}

// =============================================================================
// Structural dump
// =============================================================================

/// Block-level rendering: `node#12{list, rc = 1, size = 16, left = ..., right = ...}`
pub fn dump_string(value: &Value) -> String {
    let mut out = String::new();
    dump_into(&mut out, value);
    out
}

/// Print [`dump_string`] to stdout
pub fn dump(value: &Value) {
    println!("{}", dump_string(value));
}

fn dump_into(out: &mut String, value: &Value) {
    use std::fmt::Write as _;

    let (block_type, logical_type) = match value.decode() {
        Decoded::Object {
            block_type,
            logical_type,
        } => (block_type, logical_type),
        Decoded::Nil => return out.push_str("nil"),
        Decoded::Bool(b) => return out.push_str(if b { "true" } else { "false" }),
        Decoded::Int(n) => return out.push_str(&n.to_string()),
        Decoded::Float(f) => return out.push_str(&format_float(f)),
        Decoded::EmptyList => return out.push_str("empty_list"),
        Decoded::EmptyTable => return out.push_str("empty_table"),
        Decoded::EmptyBlob => return out.push_str("empty_blob"),
    };
    let id = value.alloc_id().unwrap_or(0);
    let rc = refcount(value);
    let size = value.size();
    let Some(ptr) = value.object_ptr() else {
        return;
    };
    let name = logical_type.name();
    match block_type {
        BlockType::Flat => {
            let _ = write!(out, "flat#{id}{{{name}, rc = {rc}, size = {size}");
            if logical_type.is_bytes() {
                if let Some(bytes) = block::flat_bytes(value) {
                    let shown = &bytes[..bytes.len().min(DUMP_PREVIEW_BYTES)];
                    let _ = write!(out, ", data = {}", hex::encode(shown));
                    if shown.len() < bytes.len() {
                        out.push_str("...");
                    }
                }
            }
            out.push('}');
        }
        BlockType::Slice => {
            // Safety: `value` keeps the Slice alive
            let slice = unsafe { &*ptr.cast::<Slice>().as_ptr() };
            let _ = write!(
                out,
                "slice#{id}{{{name}, rc = {rc}, size = {size}, start_pos = {}, base = ",
                slice.start_pos
            );
            dump_into(out, &slice.base);
            out.push('}');
        }
        BlockType::Node => {
            // Safety: `value` keeps the Node alive
            let node = unsafe { &*ptr.cast::<Node>().as_ptr() };
            let _ = write!(out, "node#{id}{{{name}, rc = {rc}, size = {size}, left = ");
            dump_into(out, &node.left);
            out.push_str(", right = ");
            dump_into(out, &node.right);
            out.push('}');
        }
        BlockType::Hashtable => {
            let _ = write!(
                out,
                "table#{id}{{rc = {rc}, len = {size}, capacity = {}}}",
                table::capacity(value)
            );
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_display(self))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&dump_string(self))
    }
}
