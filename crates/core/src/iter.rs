//! Rope Traversal
//!
//! [`BlockIter`] walks a rope left to right without recursion. It exposes the
//! data either as maximal contiguous sections (printing, flattening, fast
//! byte equality) or one byte / one element at a time.
//!
//! ## Settling
//!
//! After every move the iterator "settles": it simplifies the current block
//! until it sits on a Flat with `offset < end_pos`, or runs out.
//!
//! ```text
//! Flat,  offset >= end  -> pop a deferred frame, or finish
//! Slice                 -> fold start_pos into the window, descend into base
//! Node,  offset >= left -> skip into right
//! Node,  end <= left    -> descend into left
//! Node,  otherwise      -> push right, descend into left
//! ```
//!
//! The iterator owns a reference to its current block and to every deferred
//! frame. Dropping it (or calling [`BlockIter::stop`]) releases them all.

use crate::error::internal_error;
use crate::heap::{self, BlockType, ELEMENT_WIDTH, Flat, Node, Slice};
use crate::value::{Value, nil_ref};

/// A deferred right-hand sibling
struct Frame {
    block: Value,
    offset: u32,
    end_pos: u32,
}

/// Position within a rope
pub struct BlockIter {
    /// Flat being read, or nil when done
    current: Value,
    offset: u32,
    end_pos: u32,
    stack: Vec<Frame>,
}

impl BlockIter {
    /// Start at the first byte of `value`
    ///
    /// Singletons and scalars produce an iterator that is already done.
    pub fn start(value: &Value) -> Self {
        let mut it = BlockIter {
            current: Value::nil(),
            offset: 0,
            end_pos: 0,
            stack: Vec::new(),
        };
        if value.is_object() && value.size() > 0 {
            it.current = value.clone();
            it.end_pos = value.size();
            it.settle();
        }
        it
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        !self.current.is_object()
    }

    fn settle(&mut self) {
        loop {
            let Some(ptr) = self.current.object_ptr() else {
                return;
            };
            // Safety: `current` holds a reference to the block
            unsafe {
                match (*ptr.as_ptr()).block_type {
                    BlockType::Flat => {
                        if self.offset < self.end_pos {
                            return;
                        }
                        match self.stack.pop() {
                            Some(frame) => {
                                self.current = frame.block;
                                self.offset = frame.offset;
                                self.end_pos = frame.end_pos;
                            }
                            None => {
                                self.current = Value::nil();
                                return;
                            }
                        }
                    }
                    BlockType::Slice => {
                        let slice = ptr.cast::<Slice>().as_ptr();
                        let window = self.end_pos.saturating_sub(self.offset);
                        let start = (*slice).start_pos;
                        self.offset += start;
                        self.end_pos = self.offset + window.min((*slice).header.size);
                        let base = (*slice).base.clone();
                        self.current = base;
                    }
                    BlockType::Node => {
                        let node = ptr.cast::<Node>().as_ptr();
                        let left_size = (*node).left.size();
                        if self.offset >= left_size {
                            let right = (*node).right.clone();
                            self.offset -= left_size;
                            self.end_pos = self.end_pos.saturating_sub(left_size);
                            self.current = right;
                        } else if self.end_pos <= left_size {
                            let left = (*node).left.clone();
                            self.current = left;
                        } else {
                            self.stack.push(Frame {
                                block: (*node).right.clone(),
                                offset: 0,
                                end_pos: self.end_pos - left_size,
                            });
                            self.end_pos = left_size;
                            let left = (*node).left.clone();
                            self.current = left;
                        }
                    }
                    BlockType::Hashtable => internal_error("iterating a hashtable as a rope"),
                }
            }
        }
    }

    fn flat(&self) -> *mut u8 {
        match self.current.object_ptr() {
            // Safety: settled iterators always sit on a Flat
            Some(ptr) => unsafe { heap::flat_data(ptr.cast::<Flat>()) },
            None => internal_error("read from finished iterator"),
        }
    }

    /// Move forward `dist` bytes
    pub fn advance(&mut self, dist: u32) {
        if self.is_done() {
            return;
        }
        self.offset = self.offset.saturating_add(dist);
        self.settle();
    }

    /// Move forward one list element
    pub fn advance_val(&mut self) {
        self.advance(ELEMENT_WIDTH);
    }

    /// Skip the rest of the current section
    pub fn advance_section(&mut self) {
        if self.is_done() {
            return;
        }
        self.offset = self.end_pos;
        self.settle();
    }

    pub fn get_u8(&self) -> u8 {
        // Safety: settled on a Flat with offset < end_pos
        unsafe { *self.flat().add(self.offset as usize) }
    }

    /// The current list element, borrowed from the iterator's block
    pub fn get_val(&self) -> &Value {
        if self.is_done() {
            return nil_ref();
        }
        // Safety: list flats hold aligned Values; offset is element-aligned
        unsafe { &*(self.flat().add(self.offset as usize) as *const Value) }
    }

    /// Remaining bytes of the current contiguous run
    pub fn section(&self) -> &[u8] {
        if self.is_done() {
            return &[];
        }
        let len = (self.end_pos - self.offset) as usize;
        // Safety: [offset, end_pos) lies inside the current Flat
        unsafe { std::slice::from_raw_parts(self.flat().add(self.offset as usize), len) }
    }

    /// Finish early, releasing every held reference
    pub fn stop(&mut self) {
        self.stack.clear();
        self.current = Value::nil();
    }

    /// Number of deferred frames
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Call `f` with each contiguous section of `value`, in order
pub fn for_each_section<F>(value: &Value, mut f: F)
where
    F: FnMut(&[u8]),
{
    let mut it = BlockIter::start(value);
    while !it.is_done() {
        f(it.section());
        it.advance_section();
    }
}

/// Bytes of a blob or symbol
pub struct Bytes {
    it: BlockIter,
}

impl Iterator for Bytes {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.it.is_done() {
            return None;
        }
        let byte = self.it.get_u8();
        self.it.advance(1);
        Some(byte)
    }
}

pub fn bytes(value: &Value) -> Bytes {
    Bytes {
        it: BlockIter::start(value),
    }
}

/// Owned elements of a list
pub struct Elements {
    it: BlockIter,
}

impl Iterator for Elements {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.it.is_done() {
            return None;
        }
        let element = self.it.get_val().clone();
        self.it.advance_val();
        Some(element)
    }
}

pub fn elements(list: &Value) -> Elements {
    Elements {
        it: BlockIter::start(list),
    }
}
