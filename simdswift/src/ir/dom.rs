//! # Dominator Tree
//!
//! Immediate dominators computed with the iterative intersection algorithm
//! of Cooper, Harvey and Kennedy ("A Simple, Fast Dominance Algorithm") over
//! the CFG post-order, in the manner of cranelift's dominator tree.
//!
//! The hardening passes traverse blocks in a depth-first pre-order of this
//! tree, so every definition is rewritten before any dominated use. Blocks
//! unreachable from the entry carry no tree node; callers visit them
//! separately in natural order.

use super::module::FuncBody;
use super::types::BlockId;

/// The dominator tree for a single function body.
pub struct DominatorTree {
    /// Immediate dominator per block; `None` for the entry and for
    /// unreachable blocks.
    idom: Vec<Option<BlockId>>,
    /// Reverse post-order number per block; 0 marks unreachable blocks.
    rpo_number: Vec<u32>,
    /// Dominator-tree children per block, in reverse post-order.
    children: Vec<Vec<BlockId>>,
}

impl DominatorTree {
    /// Compute the dominator tree of `body`.
    pub fn compute(body: &FuncBody) -> Self {
        let num_blocks = body.blocks.len();

        // Post-order DFS over successors from the entry.
        let mut postorder = Vec::with_capacity(num_blocks);
        let mut state = vec![0u8; num_blocks]; // 0 = unseen, 1 = seen, 2 = done
        let mut stack = vec![BlockId::ENTRY];
        state[BlockId::ENTRY.index()] = 1;
        while let Some(&bb) = stack.last() {
            let mut pushed = false;
            if let Some(term) = &body.block(bb).term {
                for succ in term.successors() {
                    if state[succ.index()] == 0 {
                        state[succ.index()] = 1;
                        stack.push(succ);
                        pushed = true;
                        break;
                    }
                }
            }
            if !pushed {
                stack.pop();
                if state[bb.index()] != 2 {
                    state[bb.index()] = 2;
                    postorder.push(bb);
                }
            }
        }

        let mut rpo_number = vec![0u32; num_blocks];
        for (i, &bb) in postorder.iter().rev().enumerate() {
            rpo_number[bb.index()] = (i + 1) as u32;
        }

        // Predecessors restricted to reachable blocks.
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); num_blocks];
        for bb in body.block_ids() {
            if rpo_number[bb.index()] == 0 {
                continue;
            }
            if let Some(term) = &body.block(bb).term {
                for succ in term.successors() {
                    if !preds[succ.index()].contains(&bb) {
                        preds[succ.index()].push(bb);
                    }
                }
            }
        }

        // Iterate to a fixed point, processing in reverse post-order.
        let mut idom: Vec<Option<BlockId>> = vec![None; num_blocks];
        let intersect = |idom: &[Option<BlockId>], mut a: BlockId, mut b: BlockId| {
            while a != b {
                while rpo_number[a.index()] > rpo_number[b.index()] {
                    a = idom[a.index()].expect("processed block has an idom");
                }
                while rpo_number[b.index()] > rpo_number[a.index()] {
                    b = idom[b.index()].expect("processed block has an idom");
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &bb in postorder.iter().rev() {
                if bb == BlockId::ENTRY {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                for &p in &preds[bb.index()] {
                    if p != BlockId::ENTRY && idom[p.index()].is_none() {
                        continue; // not processed yet this round
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, cur, p),
                    });
                }
                if new_idom != idom[bb.index()] {
                    idom[bb.index()] = new_idom;
                    changed = true;
                }
            }
        }

        // Children lists in reverse post-order, for a deterministic walk.
        let mut children: Vec<Vec<BlockId>> = vec![Vec::new(); num_blocks];
        let mut by_rpo: Vec<BlockId> = postorder.iter().rev().copied().collect();
        by_rpo.sort_by_key(|bb| rpo_number[bb.index()]);
        for &bb in &by_rpo {
            if let Some(parent) = idom[bb.index()] {
                children[parent.index()].push(bb);
            }
        }

        Self {
            idom,
            rpo_number,
            children,
        }
    }

    /// Is `block` reachable from the entry?
    pub fn is_reachable(&self, block: BlockId) -> bool {
        block == BlockId::ENTRY || self.rpo_number[block.index()] != 0
    }

    /// The immediate dominator of `block`, or `None` for the entry and for
    /// unreachable blocks.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.index()]
    }

    /// Does `a` dominate `b`? Reflexive; false if either is unreachable.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }

    /// Depth-first pre-order walk of the dominator tree from the entry.
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut stack = vec![BlockId::ENTRY];
        while let Some(bb) = stack.pop() {
            order.push(bb);
            // reversed so the first child is visited first
            for &child in self.children[bb.index()].iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::inst::Terminator;
    use crate::ir::value::{Const, Value};

    /// Build a diamond: entry -> (left | right) -> merge.
    fn diamond() -> (FuncBody, BlockId, BlockId, BlockId) {
        let mut body = FuncBody::new();
        let left = body.new_block();
        let right = body.new_block();
        let merge = body.new_block();
        body.set_term(
            BlockId::ENTRY,
            Terminator::CondBr {
                cond: Value::Const(Const::bool(true)),
                then_bb: left,
                else_bb: right,
                weights: None,
            },
        );
        body.set_term(left, Terminator::Br { target: merge });
        body.set_term(right, Terminator::Br { target: merge });
        body.set_term(merge, Terminator::Ret { value: None });
        (body, left, right, merge)
    }

    #[test]
    fn test_diamond_idoms() {
        let (body, left, right, merge) = diamond();
        let dt = DominatorTree::compute(&body);
        assert_eq!(dt.idom(BlockId::ENTRY), None);
        assert_eq!(dt.idom(left), Some(BlockId::ENTRY));
        assert_eq!(dt.idom(right), Some(BlockId::ENTRY));
        assert_eq!(dt.idom(merge), Some(BlockId::ENTRY));
    }

    #[test]
    fn test_dominates() {
        let (body, left, _right, merge) = diamond();
        let dt = DominatorTree::compute(&body);
        assert!(dt.dominates(BlockId::ENTRY, merge));
        assert!(dt.dominates(left, left));
        assert!(!dt.dominates(left, merge));
    }

    #[test]
    fn test_preorder_covers_reachable_blocks() {
        let (body, ..) = diamond();
        let dt = DominatorTree::compute(&body);
        let order = dt.preorder();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], BlockId::ENTRY);
    }

    #[test]
    fn test_preorder_visits_defs_before_uses() {
        // entry -> a -> b: b is dominated by a, so a precedes b.
        let mut body = FuncBody::new();
        let a = body.new_block();
        let b = body.new_block();
        body.set_term(BlockId::ENTRY, Terminator::Br { target: a });
        body.set_term(a, Terminator::Br { target: b });
        body.set_term(b, Terminator::Ret { value: None });
        let dt = DominatorTree::compute(&body);
        let order = dt.preorder();
        let pos = |bb: BlockId| order.iter().position(|&x| x == bb).unwrap();
        assert!(pos(a) < pos(b));
        assert_eq!(dt.idom(b), Some(a));
    }

    #[test]
    fn test_unreachable_block() {
        let mut body = FuncBody::new();
        let orphan = body.new_block();
        body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
        body.set_term(orphan, Terminator::Ret { value: None });
        let dt = DominatorTree::compute(&body);
        assert!(!dt.is_reachable(orphan));
        assert!(!dt.preorder().contains(&orphan));
    }

    #[test]
    fn test_loop_idoms() {
        // entry -> header; header -> body' | exit; body' -> header
        let mut body = FuncBody::new();
        let header = body.new_block();
        let latch = body.new_block();
        let exit = body.new_block();
        body.set_term(BlockId::ENTRY, Terminator::Br { target: header });
        body.set_term(
            header,
            Terminator::CondBr {
                cond: Value::Const(Const::bool(true)),
                then_bb: latch,
                else_bb: exit,
                weights: None,
            },
        );
        body.set_term(latch, Terminator::Br { target: header });
        body.set_term(exit, Terminator::Ret { value: None });
        let dt = DominatorTree::compute(&body);
        assert_eq!(dt.idom(header), Some(BlockId::ENTRY));
        assert_eq!(dt.idom(latch), Some(header));
        assert_eq!(dt.idom(exit), Some(header));
        assert!(dt.dominates(header, latch));
        assert!(!dt.dominates(latch, exit));
    }
}
