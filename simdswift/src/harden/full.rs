//! Rewrite rules of the full variant: every scalar type is replicated.
//!
//! Data-flow instructions are rebuilt over shadow operands and the original
//! scheduled for deletion. Memory and call instructions stay scalar: their
//! operands are extracted from shadows (queueing a check) and their results
//! replicated into fresh shadows. Comparisons are coerced to a uniform
//! `<4 x i64>` predicate so one zero-predicate test handles every compared
//! type.

use crate::ir::{
    Builder, Callee, CastOp, Const, InstData, InstKind, IntPred, Terminator, Ty, Value,
};
use crate::ir::{BlockId, InstId};

use crate::ir::FloatPred;

use super::helpers::{is_bswap_name, is_ignored_name};
use super::shadow;
use super::transform::{PendingCheck, Sink, Slot, Transformer};
use super::HardenError;

/// Which comparison family a shadow compare is built from.
enum CmpPred {
    Int(IntPred),
    Float(FloatPred),
}

impl Transformer<'_> {
    pub(crate) fn rewrite_full(&mut self, id: InstId) -> Result<(), HardenError> {
        let kind = self.body.inst(id).kind.clone();
        let inst_ty = self.body.inst(id).ty.clone();
        let user = self.body.display_inst(id);

        match kind {
            InstKind::LandingPad => Err(HardenError::NonLocalControl(user)),

            InstKind::ExtractLane { .. }
            | InstKind::InsertLane { .. }
            | InstKind::Shuffle { .. } => Err(HardenError::VectorInput(user)),

            // --- data flow --- //
            InstKind::Binary { op, lhs, rhs } => {
                let sh0 = self.expect_shadow(&lhs, &user, false)?;
                let sh1 = self.expect_shadow(&rhs, &user, false)?;
                let shadow_ty = shadow::shadow_ty(&inst_ty)
                    .ok_or_else(|| HardenError::UnsupportedType(inst_ty.to_string()))?;
                self.emit_shadow_after(
                    id,
                    InstKind::Binary {
                        op,
                        lhs: sh0,
                        rhs: sh1,
                    },
                    shadow_ty,
                )
            }

            InstKind::Icmp { pred, lhs, rhs } => {
                let sh0 = self.expect_shadow(&lhs, &user, false)?;
                let sh1 = self.expect_shadow(&rhs, &user, false)?;
                self.rewrite_cmp_full(id, CmpPred::Int(pred), sh0, sh1)
            }

            InstKind::Fcmp { pred, lhs, rhs } => {
                let sh0 = self.expect_shadow(&lhs, &user, false)?;
                let sh1 = self.expect_shadow(&rhs, &user, false)?;
                self.rewrite_cmp_full(id, CmpPred::Float(pred), sh0, sh1)
            }

            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let sh_cond = self.expect_shadow(&cond, &user, false)?;
                let sh_true = self.expect_shadow(&on_true, &user, false)?;
                let sh_false = self.expect_shadow(&on_false, &user, false)?;

                let sel_ty = self.body.value_ty(self.sig, &sh_true);
                let numel = sel_ty.lanes().expect("shadow is a vector");

                // the condition shadow is <4 x i64>; narrow it back to a
                // <numel x i1> lane mask
                let (bb, pos) = self.position_of(id);
                let mut b = Builder::before(self.body, bb, pos);
                let half = b.cast(
                    CastOp::Bitcast,
                    Ty::vector(Ty::Int(256 / numel), numel),
                    sh_cond,
                );
                let i1_cond = b.cast(CastOp::Trunc, Ty::vector(Ty::i1(), numel), half);

                self.emit_shadow_after(
                    id,
                    InstKind::Select {
                        cond: i1_cond,
                        on_true: sh_true,
                        on_false: sh_false,
                    },
                    sel_ty,
                )
            }

            InstKind::Gep {
                elem_ty,
                base,
                indices,
                in_bounds,
            } => {
                let sh_base = self.expect_shadow(&base, &user, true)?;
                let mut sh_indices = Vec::with_capacity(indices.len());
                for idx in &indices {
                    sh_indices.push(self.expect_shadow(idx, &user, true)?);
                }
                self.emit_shadow_after(
                    id,
                    InstKind::Gep {
                        elem_ty,
                        base: sh_base,
                        indices: sh_indices,
                        in_bounds,
                    },
                    Ty::vector(Ty::Ptr, 4),
                )
            }

            InstKind::Cast { op, value } => {
                let src_ty = self.body.value_ty(self.sig, &value);
                let mut sh = self.expect_shadow(&value, &user, false)?;
                let dest_ty = shadow::shadow_ty(&inst_ty)
                    .ok_or_else(|| HardenError::UnsupportedType(inst_ty.to_string()))?;

                if src_ty.is_i1() {
                    // i1 was widened to <4 x i64>; truncate back to <4 x i1>
                    let (bb, pos) = self.position_of(id);
                    let mut b = Builder::before(self.body, bb, pos);
                    sh = b.cast(CastOp::Trunc, Ty::vector(Ty::i1(), 4), sh);
                }

                let sh_ty = self.body.value_ty(self.sig, &sh);
                let src_lanes = sh_ty.lanes().expect("shadow is a vector");
                let dst_lanes = dest_ty.lanes().expect("shadow is a vector");
                if src_lanes != dst_lanes {
                    // reshape to the destination lane count by taking lane
                    // i mod src_lanes
                    let elem = sh_ty.elem().expect("vector").clone();
                    let mask: Vec<u32> = (0..dst_lanes).map(|i| i % src_lanes).collect();
                    let undef = Value::Const(Const::undef(sh_ty.clone()));
                    let (bb, pos) = self.position_of(id);
                    let mut b = Builder::before(self.body, bb, pos);
                    sh = b.shuffle(Ty::vector(elem, dst_lanes), sh, undef, mask);
                }

                self.emit_shadow_after(id, InstKind::Cast { op, value: sh }, dest_ty)
            }

            // --- phis are special --- //
            InstKind::Phi { .. } => {
                if inst_ty.is_struct() {
                    // a phi can drag a call-returned struct to another
                    // block; the struct itself is never shadowed
                    return Ok(());
                }
                let shadow_ty = shadow::shadow_ty(&inst_ty)
                    .ok_or_else(|| HardenError::UnsupportedType(inst_ty.to_string()))?;
                self.phis.push(id);
                self.emit_shadow_after(id, InstKind::Phi { incoming: vec![] }, shadow_ty)
            }

            // --- memory related --- //
            InstKind::Alloca { .. } => {
                self.extract_op_and_substitute(Sink::Inst(id), 0)?;
                self.replicate_result(id)
            }

            InstKind::Load { .. } => {
                self.extract_op_and_substitute(Sink::Inst(id), 0)?;
                self.replicate_result(id)
            }

            InstKind::Store { .. } => {
                self.extract_op_and_substitute(Sink::Inst(id), 0)?;
                self.extract_op_and_substitute(Sink::Inst(id), 1)
            }

            InstKind::CmpXchg { .. } => {
                // a combined load/store: scalar operands in, replicated
                // result out
                for idx in 0..3 {
                    self.extract_op_and_substitute(Sink::Inst(id), idx)?;
                }
                self.replicate_result(id)
            }

            InstKind::AtomicRmw { .. } => {
                for idx in 0..2 {
                    self.extract_op_and_substitute(Sink::Inst(id), idx)?;
                }
                self.replicate_result(id)
            }

            // --- struct plumbing at call boundaries --- //
            InstKind::ExtractValue { .. } => self.replicate_result(id),

            InstKind::InsertValue { .. } => {
                // only the value-to-insert operand is scalarised
                self.extract_op_and_substitute(Sink::Inst(id), 1)
            }

            // --- function calls --- //
            InstKind::Call { callee, args } => self.rewrite_call_full(id, &inst_ty, callee, &args, &user),

            InstKind::VaArg { .. } => {
                self.extract_op_and_substitute(Sink::Inst(id), 0)?;
                self.replicate_result(id)
            }

            InstKind::Fence => Ok(()),

            InstKind::Nop => Ok(()),
        }
    }

    /// Comparisons are coerced to the uniform `<4 x i64>` predicate: the
    /// wide `<N x i1>` result is sign-extended to fill 256 bits and bitcast
    /// to four 64-bit lanes, so a single zero-predicate test works
    /// regardless of the compared type.
    fn rewrite_cmp_full(
        &mut self,
        id: InstId,
        pred: CmpPred,
        sh0: Value,
        sh1: Value,
    ) -> Result<(), HardenError> {
        let lanes = self
            .body
            .value_ty(self.sig, &sh0)
            .lanes()
            .expect("shadow is a vector");

        let (bb, pos) = self.position_of(id);
        let mut b = Builder::before(self.body, bb, pos);
        let wide_i1 = Ty::vector(Ty::i1(), lanes);
        let cmp = match pred {
            CmpPred::Int(p) => b.icmp(p, wide_i1, sh0, sh1),
            CmpPred::Float(p) => b.fcmp(p, wide_i1, sh0, sh1),
        };
        let sext = b.cast(CastOp::SExt, Ty::vector(Ty::Int(256 / lanes), lanes), cmp);
        let wide = b.cast(CastOp::Bitcast, Ty::vector(Ty::i64(), 4), sext);
        drop(b);

        self.add_shadow(id, wide)?;
        self.origs.push(id);
        Ok(())
    }

    fn rewrite_call_full(
        &mut self,
        id: InstId,
        inst_ty: &Ty,
        callee: Callee,
        args: &[Value],
        user: &str,
    ) -> Result<(), HardenError> {
        if let Callee::Direct(fref) = &callee {
            let name = &self.names[fref.index()];
            if is_bswap_name(name) {
                return self.rewrite_bswap_full(id, args, user);
            }
            if is_ignored_name(name) {
                return Ok(());
            }
        }

        if let Callee::Asm(asm) = &callee {
            if asm.is_empty() {
                // empty asm is an optimization barrier; harmless
                return Ok(());
            }
            return Err(HardenError::InlineAsm(user.to_string()));
        }

        if let Callee::Indirect(target) = &callee {
            // extract a scalar function pointer and schedule it for checking
            let sh = self.expect_shadow(target, user, false)?;
            self.tocheck.push(PendingCheck {
                sink: Sink::Inst(id),
                shadow: sh.clone(),
                slot: Slot::Callee,
            });
            let (bb, pos) = self.position_of(id);
            let mut b = Builder::before(self.body, bb, pos);
            let new_ptr = b.extract_lane(Ty::Ptr, sh, 0);
            if let InstKind::Call { callee, .. } = &mut self.body.inst_mut(id).kind {
                *callee = Callee::Indirect(new_ptr);
            }
        }

        for idx in 0..args.len() {
            self.extract_op_and_substitute(Sink::Inst(id), idx)?;
        }

        if !inst_ty.is_void() && !inst_ty.is_struct() {
            self.replicate_result(id)?;
        }
        Ok(())
    }

    /// The byte-swap intrinsic operates on up to 256-bit integers, so the
    /// whole shadow is bitcast to `i256`, swapped, and bitcast back. The
    /// original call is replaced outright.
    fn rewrite_bswap_full(
        &mut self,
        id: InstId,
        args: &[Value],
        user: &str,
    ) -> Result<(), HardenError> {
        let arg = args.first().ok_or_else(|| HardenError::MissingShadow {
            value: "<missing bswap argument>".to_string(),
            user: user.to_string(),
        })?;
        let sh = self.expect_shadow(arg, user, false)?;
        let sh_ty = self.body.value_ty(self.sig, &sh);

        let name = self.shadow_name(id);
        let bswap = self.intrinsics.bswap256;
        let (bb, pos) = self.position_of(id);
        let mut b = Builder::before(self.body, bb, pos);
        let as_int = b.cast(CastOp::Bitcast, Ty::Int(256), sh);
        let swapped = b.call_direct(bswap, Ty::Int(256), vec![as_int]);
        let back = b.cast(CastOp::Bitcast, sh_ty, swapped);
        drop(b);

        if let Value::Inst(back_id) = &back {
            self.body.inst_mut(*back_id).name = name;
        }
        self.add_shadow(id, back)?;
        self.origs.push(id);
        Ok(())
    }

    /// Build a shadow instruction right after the original, register it and
    /// schedule the original for deletion.
    fn emit_shadow_after(
        &mut self,
        id: InstId,
        kind: InstKind,
        ty: Ty,
    ) -> Result<(), HardenError> {
        let name = self.shadow_name(id);
        let (bb, pos) = self.position_of(id);
        let mut b = Builder::before(self.body, bb, pos + 1);
        let mut data = InstData::new(kind, ty);
        data.name = name;
        let is = b.insert_data(data);
        self.add_shadow(id, is)?;
        self.origs.push(id);
        Ok(())
    }

    pub(crate) fn rewrite_term_full(&mut self, bb: BlockId) -> Result<(), HardenError> {
        let Some(term) = self.body.block(bb).term.clone() else {
            return Ok(());
        };
        match &term {
            Terminator::Ret { value: Some(v) } => {
                // struct returns are handled at insertvalue/extractvalue
                if !self.body.value_ty(self.sig, v).is_struct() {
                    self.extract_op_and_substitute(Sink::Term(bb), 0)?;
                }
                Ok(())
            }
            Terminator::Ret { value: None }
            | Terminator::Br { .. }
            | Terminator::Unreachable => Ok(()),

            Terminator::Switch { .. } | Terminator::IndirectBr { .. } => {
                self.extract_op_and_substitute(Sink::Term(bb), 0)
            }

            Terminator::CondBr { cond, .. } => {
                if cond.is_const() {
                    return Ok(());
                }
                let user = self.body.display_term(&term);
                let sh = self.expect_shadow(cond, &user, false)?;
                self.rewire_branch_cond(bb, sh);
                Ok(())
            }

            Terminator::Invoke { .. } | Terminator::Resume { .. } => Err(
                HardenError::NonLocalControl(self.body.display_term(&term)),
            ),
        }
    }

    /// Replace a branch condition with a zero-predicate test of its shadow:
    /// branch taken iff `ptestz(shadow, all-ones) == 0`, i.e. some lane is
    /// non-zero. Queues the branch check on the shadow.
    pub(crate) fn rewire_branch_cond(&mut self, bb: BlockId, sh: Value) {
        self.tocheck.push(PendingCheck {
            sink: Sink::Term(bb),
            shadow: sh.clone(),
            slot: Slot::Operand(0),
        });
        let ptestz = self.intrinsics.ptestz;
        let mut b = Builder::at_end(self.body, bb);
        let all_ones = Value::Const(Const::all_ones_mask());
        let res = b.call_direct(ptestz, Ty::i32(), vec![sh, all_ones]);
        let new_cond = b.icmp(IntPred::Eq, Ty::i1(), res, Const::int(32, 0).into());
        self.body
            .block_mut(bb)
            .term
            .as_mut()
            .expect("branch exists")
            .set_value_operand(new_cond);
    }
}
