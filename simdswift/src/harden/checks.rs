//! The check injector: synthesizes majority-vote code at the queued sync
//! points, in reverse work-list order.
//!
//! Branch checks are the performance-sensitive case and use a split-block
//! fast path rather than feeding the correction into the branch condition:
//! the common no-fault path costs one zero-predicate test plus a strongly
//! predicted not-taken branch, and only a diverging shadow reaches the
//! corrective block. Scattering the corrective code inline would defeat
//! the backend's peephole window for the test/branch pair.
//!
//! All other sinks (stores, loads, atomics, call arguments, function
//! pointers, returns, switch selectors) get an inline call to the
//! type-specific correction helper, with lane 0 of the corrected shadow
//! substituted into the sink's operand.

use crate::ir::{
    BlockId, Builder, Callee, CastOp, Const, FuncRef, InstKind, IntPred, Terminator, Ty, Value,
};

use super::transform::{PendingCheck, Sink, Slot, Transformer};
use super::HardenError;

impl Transformer<'_> {
    /// Walk the pending-checks work list (in reverse) and inject the
    /// majority votes, honoring the per-category elision flags.
    pub(crate) fn insert_checks(&mut self) -> Result<(), HardenError> {
        if self.cfg.no_check_all {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.tocheck);
        for check in pending.iter().rev() {
            let is_branch = matches!(
                &check.sink,
                Sink::Term(bb) if matches!(
                    self.body.block(*bb).term,
                    Some(Terminator::CondBr { .. })
                )
            );
            if is_branch {
                let Sink::Term(bb) = &check.sink else {
                    unreachable!()
                };
                self.check_branch(*bb, &check.shadow)?;
            } else {
                self.check_inline(check)?;
            }
        }
        Ok(())
    }

    /// The split-block branch check.
    ///
    /// Before the branch, test whether the shadow lanes disagree with the
    /// all-ones mask in both directions; if so, jump to a new block that
    /// calls the predicate correction helper, re-tests the corrected
    /// shadow, and re-executes a clone of the original branch on the
    /// corrected condition. The fall-through keeps the original branch
    /// untouched, with a 1:10000 weight hint against the corrective path.
    fn check_branch(&mut self, bb: BlockId, shadow: &Value) -> Result<(), HardenError> {
        if self.cfg.no_check_branch {
            return Ok(());
        }
        if shadow.as_inst().is_none() {
            return Err(HardenError::BadBranchShadow(self.body.value_label(shadow)));
        }
        let all_ones = Value::Const(Const::all_ones_mask());

        // flag: 1 iff at least one lane differs
        let ptestnzc = self.intrinsics.ptestnzc;
        let mut b = Builder::at_end(self.body, bb);
        let raw = b.call_direct(ptestnzc, Ty::i32(), vec![shadow.clone(), all_ones.clone()]);
        let flag = b.icmp(IntPred::Eq, Ty::i1(), raw, Const::int(32, 1).into());
        drop(b);

        // split: the original branch moves to the tail block, the block now
        // branches on the divergence flag
        let tail = self.body.new_block();
        let check_bb = self.body.new_block();
        let orig_branch = self
            .body
            .block_mut(bb)
            .term
            .take()
            .expect("branch sink has a terminator");
        self.body.set_term(tail, orig_branch.clone());
        self.body.set_term(
            bb,
            Terminator::CondBr {
                cond: flag,
                then_bb: check_bb,
                else_bb: tail,
                weights: Some((1, 10000)),
            },
        );

        // successor phis now receive their value from the tail block
        let succs = orig_branch.successors();
        let mut unique: Vec<BlockId> = Vec::new();
        for s in &succs {
            if !unique.contains(s) {
                unique.push(*s);
            }
        }
        for &succ in &unique {
            for pid in self.body.block(succ).insts.clone() {
                if let InstKind::Phi { incoming } = &mut self.body.inst_mut(pid).kind {
                    for (_, pred) in incoming.iter_mut() {
                        if *pred == bb {
                            *pred = tail;
                        }
                    }
                }
            }
        }

        // corrective path: majority-correct, re-test, branch again
        let pred_ty = Ty::vector(Ty::i64(), 4);
        let mask_i64 = self.helpers.mask_i64;
        let ptestz = self.intrinsics.ptestz;
        let mut cb = Builder::at_end(self.body, check_bb);
        let corrected = cb.call_direct(mask_i64, pred_ty, vec![shadow.clone()]);
        let res = cb.call_direct(ptestz, Ty::i32(), vec![corrected, all_ones]);
        let new_cond = cb.icmp(IntPred::Eq, Ty::i1(), res, Const::int(32, 0).into());
        drop(cb);
        let mut branch_clone = orig_branch.clone();
        branch_clone.set_value_operand(new_cond);
        self.body.set_term(check_bb, branch_clone);

        // every phi fed from the split block gains a symmetric edge from
        // the corrective block, binding the identical value
        for &succ in &succs {
            for pid in self.body.block(succ).insts.clone() {
                let incoming_value = match &self.body.inst(pid).kind {
                    InstKind::Phi { incoming } => incoming
                        .iter()
                        .find(|(_, pred)| *pred == tail)
                        .map(|(v, _)| v.clone()),
                    _ => None,
                };
                if let Some(v) = incoming_value {
                    if let InstKind::Phi { incoming } = &mut self.body.inst_mut(pid).kind {
                        incoming.push((v, check_bb));
                    }
                }
            }
        }
        Ok(())
    }

    /// Inline check: call the type-specific correction helper on the
    /// shadow, extract lane 0 of the corrected result, narrow it if the
    /// consumer's scalar is narrower, and substitute it into the sink.
    fn check_inline(&mut self, check: &PendingCheck) -> Result<(), HardenError> {
        // constants need no vote; only instruction shadows are checked
        let Some(shadow_id) = check.shadow.as_inst() else {
            return Ok(());
        };

        let elide = match &check.sink {
            Sink::Inst(id) => match self.body.inst(*id).kind {
                InstKind::Load { .. } => self.cfg.no_check_load,
                InstKind::Store { .. } => self.cfg.no_check_store,
                InstKind::CmpXchg { .. } | InstKind::AtomicRmw { .. } => self.cfg.no_check_atomic,
                InstKind::Call { .. } => self.cfg.no_check_call,
                _ => false,
            },
            Sink::Term(_) => false,
        };
        if elide {
            return Ok(());
        }

        let shadow_ty = self.body.inst(shadow_id).ty.clone();
        let elem_ty = shadow_ty
            .elem()
            .cloned()
            .ok_or_else(|| HardenError::UnsupportedType(shadow_ty.to_string()))?;

        // the operand as it currently reads, for the narrowing decision
        let op_ty = match (&check.sink, &check.slot) {
            (Sink::Inst(id), Slot::Operand(idx)) => self
                .body
                .inst(*id)
                .kind
                .operand(*idx)
                .map(|v| self.body.value_ty(self.sig, v)),
            (Sink::Term(bb), Slot::Operand(_)) => self
                .body
                .block(*bb)
                .term
                .as_ref()
                .and_then(|t| t.value_operand())
                .map(|v| self.body.value_ty(self.sig, v)),
            (_, Slot::Callee) => Some(Ty::Ptr),
        };

        let (bb, pos) = self.sink_position(&check.sink);
        let mut b = Builder::before(self.body, bb, pos);
        let corrected = if elem_ty.is_ptr() {
            // pointers vote through the i64 path
            let as_ints = b.cast(
                CastOp::PtrToInt,
                Ty::vector(Ty::i64(), 4),
                check.shadow.clone(),
            );
            let helper = require(self.helpers.check_i64, &elem_ty)?;
            let voted = b.call_direct(helper, Ty::vector(Ty::i64(), 4), vec![as_ints]);
            b.cast(CastOp::IntToPtr, shadow_ty.clone(), voted)
        } else {
            let helper = match &elem_ty {
                Ty::Int(64) => require(self.helpers.check_i64, &elem_ty)?,
                Ty::Int(32) => require(self.helpers.check_i32, &elem_ty)?,
                Ty::Int(16) => require(self.helpers.check_i16, &elem_ty)?,
                Ty::Int(8) => require(self.helpers.check_i8, &elem_ty)?,
                Ty::Double => self.helpers.check_double,
                Ty::Float => self.helpers.check_float,
                other => return Err(HardenError::UnsupportedType(other.to_string())),
            };
            b.call_direct(helper, shadow_ty.clone(), vec![check.shadow.clone()])
        };

        let mut new_op = b.extract_lane(elem_ty.clone(), corrected, 0);

        match &check.slot {
            Slot::Callee => {
                drop(b);
                let Sink::Inst(id) = &check.sink else {
                    return Ok(());
                };
                if let InstKind::Call { callee, .. } = &mut self.body.inst_mut(*id).kind {
                    *callee = Callee::Indirect(new_op);
                }
            }
            Slot::Operand(idx) => {
                if let Some(op_ty) = &op_ty {
                    if let (Some(from), Some(to)) = (elem_ty.bit_width(), op_ty.bit_width()) {
                        if from > to {
                            new_op = b.cast(CastOp::Trunc, op_ty.clone(), new_op);
                        }
                    }
                }
                drop(b);
                match &check.sink {
                    Sink::Inst(id) => self.body.inst_mut(*id).kind.set_operand(*idx, new_op),
                    Sink::Term(bb) => self
                        .body
                        .block_mut(*bb)
                        .term
                        .as_mut()
                        .expect("sink terminator exists")
                        .set_value_operand(new_op),
                }
            }
        }
        Ok(())
    }
}

/// Integer helpers are only resolved in full mode; reaching for one in
/// FP-only mode means a non-FP shadow was queued, which the variant cannot
/// correct.
fn require(helper: Option<FuncRef>, elem: &Ty) -> Result<FuncRef, HardenError> {
    helper.ok_or_else(|| HardenError::UnsupportedType(elem.to_string()))
}
