//! Method layout.
//!
//! The order of blocks in a method and the order of instruction nodes in a
//! block is determined by the `Layout` structure. It does not contain the
//! definition of nodes or blocks, only their order: a doubly linked list of
//! blocks, and a doubly linked list of nodes per block, all terminated by
//! `PackedOption::none`.
//!
//! Emptied nodes stay linked so that cursors held by a stage remain valid;
//! traversals are expected to skip them.

use super::entities::{Block, Inst};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::SecondaryMap;

#[derive(Clone, Debug, Default)]
struct BlockNode {
    prev: PackedOption<Block>,
    next: PackedOption<Block>,
    first_inst: PackedOption<Inst>,
    last_inst: PackedOption<Inst>,
}

#[derive(Clone, Debug, Default)]
struct InstNode {
    block: PackedOption<Block>,
    prev: PackedOption<Inst>,
    next: PackedOption<Inst>,
}

/// Block and instruction order for one method.
#[derive(Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<Block, BlockNode>,
    insts: SecondaryMap<Inst, InstNode>,
    first_block: PackedOption<Block>,
    last_block: PackedOption<Block>,
}

impl Layout {
    /// Create an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the layout.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.insts.clear();
        self.first_block = None.into();
        self.last_block = None.into();
    }

    // ---------------- blocks ----------------

    /// Is `block` currently inserted in the layout?
    pub fn is_block_inserted(&self, block: Block) -> bool {
        self.first_block.expand() == Some(block) || self.blocks[block].prev.is_some()
    }

    /// Append `block` to the end of the layout.
    pub fn append_block(&mut self, block: Block) {
        debug_assert!(!self.is_block_inserted(block));
        let node = &mut self.blocks[block];
        node.prev = self.last_block;
        node.next = None.into();
        match self.last_block.expand() {
            Some(last) => self.blocks[last].next = block.into(),
            None => self.first_block = block.into(),
        }
        self.last_block = block.into();
    }

    /// Insert `block` in the layout immediately after `after`.
    pub fn insert_block_after(&mut self, block: Block, after: Block) {
        debug_assert!(!self.is_block_inserted(block));
        debug_assert!(self.is_block_inserted(after));
        let next = self.blocks[after].next;
        {
            let node = &mut self.blocks[block];
            node.prev = after.into();
            node.next = next;
        }
        self.blocks[after].next = block.into();
        match next.expand() {
            Some(next) => self.blocks[next].prev = block.into(),
            None => self.last_block = block.into(),
        }
    }

    /// First block in layout order.
    pub fn entry_block(&self) -> Option<Block> {
        self.first_block.expand()
    }

    /// Last block in layout order.
    pub fn last_block(&self) -> Option<Block> {
        self.last_block.expand()
    }

    /// Block following `block` in layout order.
    pub fn next_block(&self, block: Block) -> Option<Block> {
        self.blocks[block].next.expand()
    }

    /// Iterate over blocks in layout order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            layout: self,
            next: self.first_block.expand(),
        }
    }

    // ---------------- instructions ----------------

    /// The block containing `inst`, if inserted.
    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts[inst].block.expand()
    }

    /// First node of `block`.
    pub fn first_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].first_inst.expand()
    }

    /// Last node of `block`.
    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].last_inst.expand()
    }

    /// Node following `inst` within its block.
    pub fn next_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].next.expand()
    }

    /// Node preceding `inst` within its block.
    pub fn prev_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].prev.expand()
    }

    /// Append `inst` to the end of `block`.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        debug_assert!(self.insts[inst].block.is_none());
        let last = self.blocks[block].last_inst;
        {
            let node = &mut self.insts[inst];
            node.block = block.into();
            node.prev = last;
            node.next = None.into();
        }
        match last.expand() {
            Some(last) => self.insts[last].next = inst.into(),
            None => self.blocks[block].first_inst = inst.into(),
        }
        self.blocks[block].last_inst = inst.into();
    }

    /// Insert `inst` at the top of `block`.
    pub fn prepend_inst(&mut self, inst: Inst, block: Block) {
        debug_assert!(self.insts[inst].block.is_none());
        let first = self.blocks[block].first_inst;
        {
            let node = &mut self.insts[inst];
            node.block = block.into();
            node.prev = None.into();
            node.next = first;
        }
        match first.expand() {
            Some(first) => self.insts[first].prev = inst.into(),
            None => self.blocks[block].last_inst = inst.into(),
        }
        self.blocks[block].first_inst = inst.into();
    }

    /// Insert `inst` immediately before `before`, in the same block.
    pub fn insert_inst_before(&mut self, inst: Inst, before: Inst) {
        debug_assert!(self.insts[inst].block.is_none());
        let block = self.insts[before]
            .block
            .expand()
            .expect("before-node not inserted");
        let prev = self.insts[before].prev;
        {
            let node = &mut self.insts[inst];
            node.block = block.into();
            node.prev = prev;
            node.next = before.into();
        }
        self.insts[before].prev = inst.into();
        match prev.expand() {
            Some(prev) => self.insts[prev].next = inst.into(),
            None => self.blocks[block].first_inst = inst.into(),
        }
    }

    /// Insert `inst` immediately after `after`, in the same block.
    pub fn insert_inst_after(&mut self, inst: Inst, after: Inst) {
        debug_assert!(self.insts[inst].block.is_none());
        let block = self.insts[after]
            .block
            .expand()
            .expect("after-node not inserted");
        let next = self.insts[after].next;
        {
            let node = &mut self.insts[inst];
            node.block = block.into();
            node.prev = after.into();
            node.next = next;
        }
        self.insts[after].next = inst.into();
        match next.expand() {
            Some(next) => self.insts[next].prev = inst.into(),
            None => self.blocks[block].last_inst = inst.into(),
        }
    }

    /// Unlink `inst` from its block.
    pub fn remove_inst(&mut self, inst: Inst) {
        let (block, prev, next) = {
            let node = &mut self.insts[inst];
            let triple = (
                node.block.expand().expect("node not inserted"),
                node.prev,
                node.next,
            );
            node.block = None.into();
            node.prev = None.into();
            node.next = None.into();
            triple
        };
        match prev.expand() {
            Some(prev) => self.insts[prev].next = next,
            None => self.blocks[block].first_inst = next,
        }
        match next.expand() {
            Some(next) => self.insts[next].prev = prev,
            None => self.blocks[block].last_inst = prev,
        }
    }

    /// Split the block containing `before` in two, moving `before` and all
    /// following nodes into `new_block`, which is inserted in the layout
    /// right after the old block.
    pub fn split_block(&mut self, new_block: Block, before: Inst) {
        let old_block = self.insts[before]
            .block
            .expand()
            .expect("split point not inserted");
        debug_assert!(!self.is_block_inserted(new_block));

        self.insert_block_after(new_block, old_block);

        let prev = self.insts[before].prev;
        self.blocks[new_block].first_inst = before.into();
        self.blocks[new_block].last_inst = self.blocks[old_block].last_inst;
        self.blocks[old_block].last_inst = prev;
        match prev.expand() {
            Some(prev) => self.insts[prev].next = None.into(),
            None => self.blocks[old_block].first_inst = None.into(),
        }
        self.insts[before].prev = None.into();

        let mut cur = Some(before);
        while let Some(inst) = cur {
            self.insts[inst].block = new_block.into();
            cur = self.insts[inst].next.expand();
        }
    }

    /// Iterate over the nodes of `block` in order. Empty nodes are
    /// included; callers skip them.
    pub fn block_insts(&self, block: Block) -> Insts<'_> {
        Insts {
            layout: self,
            head: self.blocks[block].first_inst.expand(),
            tail: self.blocks[block].last_inst.expand(),
        }
    }
}

/// Iterator over blocks in layout order.
pub struct Blocks<'a> {
    layout: &'a Layout,
    next: Option<Block>,
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let cur = self.next?;
        self.next = self.layout.blocks[cur].next.expand();
        Some(cur)
    }
}

/// Double-ended iterator over the nodes of one block.
pub struct Insts<'a> {
    layout: &'a Layout,
    head: Option<Inst>,
    tail: Option<Inst>,
}

impl Iterator for Insts<'_> {
    type Item = Inst;

    fn next(&mut self) -> Option<Inst> {
        let cur = self.head?;
        if self.head == self.tail {
            self.head = None;
            self.tail = None;
        } else {
            self.head = self.layout.insts[cur].next.expand();
        }
        Some(cur)
    }
}

impl DoubleEndedIterator for Insts<'_> {
    fn next_back(&mut self) -> Option<Inst> {
        let cur = self.tail?;
        if self.head == self.tail {
            self.head = None;
            self.tail = None;
        } else {
            self.tail = self.layout.insts[cur].prev.expand();
        }
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn b(n: usize) -> Block {
        Block::new(n)
    }

    fn i(n: usize) -> Inst {
        Inst::new(n)
    }

    #[test]
    fn append_and_iterate() {
        let mut layout = Layout::new();
        layout.append_block(b(0));
        layout.append_block(b(1));
        layout.append_inst(i(0), b(0));
        layout.append_inst(i(1), b(0));
        layout.append_inst(i(2), b(1));

        assert_eq!(layout.blocks().collect::<Vec<_>>(), [b(0), b(1)]);
        assert_eq!(layout.block_insts(b(0)).collect::<Vec<_>>(), [i(0), i(1)]);
        assert_eq!(
            layout.block_insts(b(0)).rev().collect::<Vec<_>>(),
            [i(1), i(0)]
        );
        assert_eq!(layout.inst_block(i(2)), Some(b(1)));
        assert_eq!(layout.entry_block(), Some(b(0)));
    }

    #[test]
    fn insert_before_after() {
        let mut layout = Layout::new();
        layout.append_block(b(0));
        layout.append_inst(i(0), b(0));
        layout.append_inst(i(3), b(0));
        layout.insert_inst_before(i(1), i(3));
        layout.insert_inst_after(i(2), i(1));
        assert_eq!(
            layout.block_insts(b(0)).collect::<Vec<_>>(),
            [i(0), i(1), i(2), i(3)]
        );
        layout.remove_inst(i(1));
        assert_eq!(
            layout.block_insts(b(0)).collect::<Vec<_>>(),
            [i(0), i(2), i(3)]
        );
    }

    #[test]
    fn split() {
        let mut layout = Layout::new();
        layout.append_block(b(0));
        for n in 0..4 {
            layout.append_inst(i(n), b(0));
        }
        layout.split_block(b(1), i(2));
        assert_eq!(layout.blocks().collect::<Vec<_>>(), [b(0), b(1)]);
        assert_eq!(layout.block_insts(b(0)).collect::<Vec<_>>(), [i(0), i(1)]);
        assert_eq!(layout.block_insts(b(1)).collect::<Vec<_>>(), [i(2), i(3)]);
        assert_eq!(layout.inst_block(i(3)), Some(b(1)));
        assert_eq!(layout.last_inst(b(0)), Some(i(1)));
    }

    #[test]
    fn prepend() {
        let mut layout = Layout::new();
        layout.append_block(b(0));
        layout.append_inst(i(1), b(0));
        layout.prepend_inst(i(0), b(0));
        assert_eq!(layout.block_insts(b(0)).collect::<Vec<_>>(), [i(0), i(1)]);
    }
}
