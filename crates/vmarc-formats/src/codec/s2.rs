//! S2 string-doubling decoder
//!
//! Every table entry past the single symbols is the concatenation of two
//! earlier entries, stored as a binary node. Expanding a code walks its
//! tree left to right. The walk reverses child links on the way down and
//! restores them on the way back up, with a per-node visited flag telling
//! whether the right subtree is still to be explored, so no stack is
//! needed.
//!
//! Entries also keep offspring/sibling lists (all entries whose left part
//! is this entry). Decoding never reads them, but they are maintained so
//! the table evolves exactly as it does on the compressing side.

use std::io::{BufRead, Write};

use super::error::{CodecError, CodecResult};
use super::record::{Flow, MAX_SYMBOL, RecordSink};
use crate::stream::{CodeReader, PushbackReader};

/// Entries in the string table
pub const TABLE_SIZE: usize = 4096;

const FIRST_REUSABLE: usize = MAX_SYMBOL as usize + 1;
const LAST_SLOT: usize = TABLE_SIZE - 1;

/// Entries may not grow past this many half-lengths
const LENGTH_LIMIT: u16 = TABLE_SIZE as u16 - 2;

const NIL: u16 = u16::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    left: u16,
    right: u16,
    sibling: u16,
    offspring: u16,
    len: u16,
    count: u16,
    symbol: u16,
    visited: bool,
}

impl Node {
    const EMPTY: Self = Self {
        left: NIL,
        right: NIL,
        sibling: NIL,
        offspring: NIL,
        len: 0,
        count: 0,
        symbol: 0,
        visited: false,
    };
}

/// Where a node sits in a sibling list
#[derive(Debug, Clone, Copy)]
enum Link {
    Offspring(usize),
    Sibling(usize),
}

/// S2 string table
#[derive(Debug)]
pub struct S2Table {
    nodes: Vec<Node>,
    cursor: usize,
}

impl Default for S2Table {
    fn default() -> Self {
        Self::new()
    }
}

impl S2Table {
    /// Table holding only the single symbols
    pub fn new() -> Self {
        let mut table = Self {
            nodes: vec![Node::EMPTY; TABLE_SIZE],
            cursor: LAST_SLOT,
        };
        table.reset();
        table
    }

    /// Drop every learned string
    pub fn reset(&mut self) {
        self.nodes.fill(Node::EMPTY);
        for symbol in 0..=MAX_SYMBOL {
            let node = &mut self.nodes[usize::from(symbol)];
            node.symbol = symbol;
            node.count = 1;
        }
        self.cursor = LAST_SLOT;
    }

    /// Whether `code` names a string
    fn is_defined(&self, code: u16) -> bool {
        code <= MAX_SYMBOL || self.nodes[usize::from(code)].left != NIL
    }

    fn set_link(&mut self, link: Link, value: u16) {
        match link {
            Link::Offspring(at) => self.nodes[at].offspring = value,
            Link::Sibling(at) => self.nodes[at].sibling = value,
        }
    }

    fn unlink_offspring(&mut self, parent: usize, child: u16) {
        let mut link = Link::Offspring(parent);
        let mut at = self.nodes[parent].offspring;
        while at != NIL {
            if at == child {
                let next = self.nodes[usize::from(at)].sibling;
                self.set_link(link, next);
                return;
            }
            link = Link::Sibling(usize::from(at));
            at = self.nodes[usize::from(at)].sibling;
        }
    }

    fn probe(&self) -> Option<usize> {
        let mut slot = self.cursor;
        for _ in 0..TABLE_SIZE {
            slot += 1;
            if slot > LAST_SLOT {
                slot = FIRST_REUSABLE;
            }
            if self.nodes[slot].count == 0 {
                return Some(slot);
            }
        }
        None
    }

    /// Learn the concatenation of the strings for `left` and `right`
    pub fn insert(&mut self, left: u16, right: u16) {
        let (mut left, mut right) = (usize::from(left), usize::from(right));
        if self.nodes[left].len + self.nodes[right].len > LENGTH_LIMIT {
            return;
        }
        self.nodes[left].count += 1;
        self.nodes[right].count += 1;

        let Some(slot) = self.probe() else {
            self.nodes[left].count -= 1;
            self.nodes[right].count -= 1;
            return;
        };

        let old = self.nodes[slot];
        if old.left != NIL {
            let old_left = usize::from(old.left);
            self.nodes[old_left].count = self.nodes[old_left].count.saturating_sub(1);
            self.unlink_offspring(old_left, slot as u16);
            if old.right != NIL {
                let old_right = usize::from(old.right);
                self.nodes[old_right].count = self.nodes[old_right].count.saturating_sub(1);
            }
        }

        if right == self.cursor && usize::from(self.nodes[right].left) == left {
            std::mem::swap(&mut left, &mut right);
        }

        let len = 2 + self.nodes[left].len + self.nodes[right].len;
        let node = &mut self.nodes[slot];
        node.left = left as u16;
        node.right = right as u16;
        node.len = len;

        // insert ahead of the previous newest entry in the offspring list
        let mut link = Link::Offspring(left);
        let mut at = self.nodes[left].offspring;
        while at != NIL && usize::from(at) != self.cursor {
            link = Link::Sibling(usize::from(at));
            at = self.nodes[usize::from(at)].sibling;
        }
        self.nodes[slot].sibling = at;
        self.set_link(link, slot as u16);
        self.cursor = slot;
    }

    /// Emit the string for `code` into `sink`, leaf by leaf
    fn emit<W: Write>(&mut self, code: u16, sink: &mut RecordSink<'_, W>) -> CodecResult<Flow> {
        let mut curr = code;
        let mut prev = NIL;

        loop {
            // descend the leftmost path, pointing each left link back up
            let mut next;
            loop {
                let node = &mut self.nodes[usize::from(curr)];
                next = node.left;
                node.left = prev;
                prev = curr;
                curr = next;
                if curr == NIL {
                    break;
                }
            }

            curr = prev;
            let leaf = &mut self.nodes[usize::from(curr)];
            prev = leaf.left;
            leaf.left = next;
            if sink.put(leaf.symbol)? == Flow::Finished {
                return Ok(Flow::Finished);
            }

            // climb until an unexplored right subtree turns up
            loop {
                next = curr;
                curr = prev;
                if curr == NIL {
                    return Ok(Flow::Continue);
                }
                let node = &mut self.nodes[usize::from(curr)];
                if !node.visited {
                    prev = node.left;
                    node.left = next;
                    next = node.right;
                    node.right = prev;
                    node.visited = true;
                    prev = curr;
                    curr = next;
                    break;
                }
                node.visited = false;
                prev = node.right;
                node.right = next;
            }
        }
    }
}

/// Decode an S2 payload into `sink`
pub fn decode<R: BufRead, W: Write>(
    input: &mut PushbackReader<R>,
    sink: &mut RecordSink<'_, W>,
) -> CodecResult<()> {
    let mut table = S2Table::new();
    let mut codes = CodeReader::new(input);

    let mut last = codes.read_code()?.ok_or(CodecError::Truncated)?;
    if last > MAX_SYMBOL {
        return Err(CodecError::BadData("S2 stream starts with a compound code"));
    }
    if sink.put(last)? == Flow::Finished {
        return Ok(());
    }

    loop {
        if sink.scan_satisfied(codes.consumed()) {
            return Ok(());
        }
        let Some(code) = codes.read_code()? else {
            return if sink.at_record_boundary() {
                Ok(())
            } else {
                Err(CodecError::Truncated)
            };
        };
        if !table.is_defined(code) {
            return Err(CodecError::BadData("S2 code refers to an unused entry"));
        }
        if table.emit(code, sink)? == Flow::Finished {
            return Ok(());
        }
        table.insert(last, code);
        last = code;
    }
}
