//! Cursor library.
//!
//! A cursor is a position in the method layout where new nodes can be
//! inserted while iterating, without invalidating the walk. Stages that
//! rewrite node sequences in place (platform lowering, tweaks, spilling)
//! work through a cursor.

use crate::ir::{Block, Function, Inst, InstData};

/// A mutable position in a function's layout.
pub struct FuncCursor<'f> {
    /// The function being edited.
    pub func: &'f mut Function,
    block: Option<Block>,
    inst: Option<Inst>,
}

impl<'f> FuncCursor<'f> {
    /// Create a cursor with no position.
    pub fn new(func: &'f mut Function) -> Self {
        Self {
            func,
            block: None,
            inst: None,
        }
    }

    /// Current block, if any.
    pub fn block(&self) -> Option<Block> {
        self.block
    }

    /// Current node, if any.
    pub fn inst(&self) -> Option<Inst> {
        self.inst
    }

    /// Position at the top of `block`, before its first node.
    pub fn at_block_top(mut self, block: Block) -> Self {
        self.block = Some(block);
        self.inst = None;
        self
    }

    /// Position at `inst`.
    pub fn at_inst(mut self, inst: Inst) -> Self {
        self.block = self.func.layout.inst_block(inst);
        self.inst = Some(inst);
        self
    }

    /// Advance to the next non-empty node in the block and return it.
    pub fn next_inst(&mut self) -> Option<Inst> {
        let block = self.block?;
        loop {
            let next = match self.inst {
                None => self.func.layout.first_inst(block),
                Some(cur) => self.func.layout.next_inst(cur),
            };
            self.inst = next;
            match next {
                None => return None,
                Some(inst) => {
                    if !self.func.dfg.insts[inst].is_empty_node() {
                        return Some(inst);
                    }
                }
            }
        }
    }

    /// Insert a new node before the current one (or append to the block
    /// when the cursor is past the end). The cursor does not move.
    pub fn insert_before(&mut self, data: InstData) -> Inst {
        let inst = self.func.dfg.make_inst(data);
        match self.inst {
            Some(cur) => self.func.layout.insert_inst_before(inst, cur),
            None => {
                let block = self.block.expect("cursor has no block");
                self.func.layout.append_inst(inst, block)
            }
        }
        inst
    }

    /// Insert a new node after the current one and move the cursor onto
    /// it, so a subsequent `insert_after` keeps appending in order.
    pub fn insert_after(&mut self, data: InstData) -> Inst {
        let inst = self.func.dfg.make_inst(data);
        match self.inst {
            Some(cur) => self.func.layout.insert_inst_after(inst, cur),
            None => {
                let block = self.block.expect("cursor has no block");
                match self.func.layout.first_inst(block) {
                    Some(first) => self.func.layout.insert_inst_before(inst, first),
                    None => self.func.layout.append_inst(inst, block),
                }
            }
        }
        self.inst = Some(inst);
        inst
    }

    /// Empty the current node, leaving a placeholder in the layout.
    pub fn empty_current(&mut self) {
        if let Some(inst) = self.inst {
            self.func.dfg.empty_inst(inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Opcode, SymbolName, Ty};

    #[test]
    fn walk_and_insert() {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let v0 = func.dfg.make_virtual_reg(Ty::I32);
        let c0 = func.dfg.iconst32(4);
        let mv = Function::inst_unary(Opcode::Move32, v0, c0);
        func.append_inst(block, mv);
        func.append_inst(block, Function::inst_jmp(block));

        let mut cursor = FuncCursor::new(&mut func).at_block_top(block);
        let first = cursor.next_inst().unwrap();
        assert_eq!(cursor.func.dfg.insts[first].opcode, Opcode::Move32);
        // Empty it; the walk must skip the placeholder next time around.
        cursor.empty_current();
        let mut cursor = FuncCursor::new(&mut func).at_block_top(block);
        let next = cursor.next_inst().unwrap();
        assert_eq!(cursor.func.dfg.insts[next].opcode, Opcode::Jmp);
    }
}
