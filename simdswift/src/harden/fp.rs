//! Rewrite rules of the FP-only variant: only float and double computation
//! is replicated, following the vectorization scheme of Chen et al. for
//! FPU fault tolerance.
//!
//! Integer and pointer instructions pass through unchanged; the shadow map
//! hands back "no shadow" for them, and every rule here treats that as
//! "leave it alone". The seams between the two worlds are the casts: a
//! float-to-int cast feeds lane 0 of the shadow into the scalar consumer,
//! an int-to-float cast splats the scalar result into a fresh shadow.

use crate::ir::{
    BlockId, Builder, Callee, CastOp, Const, FloatPred, InstData, InstId, InstKind, Terminator, Ty,
    Value,
};

use super::helpers::is_ignored_name;
use super::shadow;
use super::transform::{Sink, Transformer};
use super::HardenError;

impl Transformer<'_> {
    pub(crate) fn rewrite_fp(&mut self, id: InstId) -> Result<(), HardenError> {
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
                let sh0 = self.get_shadow(&lhs, &user, false)?;
                let sh1 = self.get_shadow(&rhs, &user, false)?;

                // corner case: an fcmp-derived <4 x i64> predicate shadow
                // fed into an integer logical op; substitute lane 0 as a
                // scalar i1 and leave the op scalar
                let mut special = false;
                if let Some(sh) = &sh0 {
                    if self.shadow_elem_is_i64(sh) {
                        self.substitute_pred_lane(id, 0, sh.clone());
                        special = true;
                    }
                }
                if let Some(sh) = &sh1 {
                    if self.shadow_elem_is_i64(sh) {
                        self.substitute_pred_lane(id, 1, sh.clone());
                        special = true;
                    }
                }
                if special {
                    return Ok(());
                }

                let (Some(sh0), Some(sh1)) = (sh0, sh1) else {
                    // not floats/doubles
                    return Ok(());
                };
                let shadow_ty = shadow::fp_shadow_ty(&inst_ty)
                    .ok_or_else(|| HardenError::UnsupportedType(inst_ty.to_string()))?;
                self.emit_fp_shadow_after(
                    id,
                    InstKind::Binary {
                        op,
                        lhs: sh0,
                        rhs: sh1,
                    },
                    shadow_ty,
                )
            }

            InstKind::Icmp { .. } => Ok(()),

            InstKind::Fcmp { pred, lhs, rhs } => {
                let sh0 = self.expect_shadow(&lhs, &user, false)?;
                let sh1 = self.expect_shadow(&rhs, &user, false)?;
                self.rewrite_fcmp(id, pred, sh0, sh1)
            }

            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let sh_cond = self.get_shadow(&cond, &user, false)?;
                let sh_true = self.get_shadow(&on_true, &user, false)?;
                let sh_false = self.get_shadow(&on_false, &user, false)?;
                let (Some(sh_true), Some(sh_false)) = (sh_true, sh_false) else {
                    // selected value is not float/double
                    return Ok(());
                };
                let sel_ty = self.body.value_ty(self.sig, &sh_true);
                let numel = sel_ty.lanes().expect("shadow is a vector");

                let i1_cond = match sh_cond {
                    Some(sh_cond) => {
                        let (bb, pos) = self.position_of(id);
                        let mut b = Builder::before(self.body, bb, pos);
                        let half = b.cast(
                            CastOp::Bitcast,
                            Ty::vector(Ty::Int(256 / numel), numel),
                            sh_cond,
                        );
                        b.cast(CastOp::Trunc, Ty::vector(Ty::i1(), numel), half)
                    }
                    // an unshadowed (integer-derived) condition stays scalar
                    None => cond,
                };

                self.emit_fp_shadow_after(
                    id,
                    InstKind::Select {
                        cond: i1_cond,
                        on_true: sh_true,
                        on_false: sh_false,
                    },
                    sel_ty,
                )
            }

            // pointers only
            InstKind::Gep { .. } => Ok(()),

            InstKind::Cast { op, value } => self.rewrite_cast_fp(id, &inst_ty, op, value, &user),

            // --- phis --- //
            InstKind::Phi { .. } => {
                let Some(shadow_ty) = shadow::fp_shadow_ty(&inst_ty) else {
                    return Ok(());
                };
                self.phis.push(id);
                self.emit_fp_shadow_after(id, InstKind::Phi { incoming: vec![] }, shadow_ty)
            }

            // pointers and integers only
            InstKind::Alloca { .. } => Ok(()),

            InstKind::Load { .. } => {
                if inst_ty.is_float_like() {
                    self.replicate_result(id)
                } else {
                    Ok(())
                }
            }

            InstKind::Store { .. } => {
                // only the value operand; the address stays scalar
                self.extract_op_and_substitute(Sink::Inst(id), 0)
            }

            InstKind::CmpXchg { .. } => Err(HardenError::FpCmpXchg(user)),

            InstKind::AtomicRmw { .. } => {
                if !inst_ty.is_float_like() {
                    return Ok(());
                }
                self.extract_op_and_substitute(Sink::Inst(id), 1)?;
                self.replicate_result(id)
            }

            InstKind::ExtractValue { .. } | InstKind::InsertValue { .. } => Ok(()),

            // --- function calls --- //
            InstKind::Call { callee, args } => {
                if let Callee::Direct(fref) = &callee {
                    if is_ignored_name(&self.names[fref.index()]) {
                        return Ok(());
                    }
                }
                if let Callee::Asm(asm) = &callee {
                    if asm.is_empty() {
                        return Ok(());
                    }
                    return Err(HardenError::InlineAsm(user));
                }

                for idx in 0..args.len() {
                    self.extract_op_and_substitute(Sink::Inst(id), idx)?;
                }
                if inst_ty.is_float_like() {
                    self.replicate_result(id)?;
                }
                Ok(())
            }

            // pointers only
            InstKind::VaArg { .. } => Ok(()),

            InstKind::Fence => Ok(()),

            InstKind::Nop => Ok(()),
        }
    }

    /// Is this shadow a `<4 x i64>` predicate (the uniform fcmp result)?
    fn shadow_elem_is_i64(&self, sh: &Value) -> bool {
        self.body
            .value_ty(self.sig, sh)
            .elem()
            .is_some_and(|e| e.is_int_width(64))
    }

    /// Extract lane 0 of a predicate shadow, truncate to `i1`, and feed it
    /// into the scalar consumer's operand. No wide instruction is built.
    fn substitute_pred_lane(&mut self, id: InstId, idx: usize, sh: Value) {
        let (bb, pos) = self.position_of(id);
        let mut b = Builder::before(self.body, bb, pos);
        let lane = b.extract_lane(Ty::i64(), sh, 0);
        let bit = b.cast(CastOp::Trunc, Ty::i1(), lane);
        drop(b);
        self.body.inst_mut(id).kind.set_operand(idx, bit);
    }

    /// fcmp produces the uniform wide predicate, exactly as in the full
    /// variant.
    fn rewrite_fcmp(
        &mut self,
        id: InstId,
        pred: FloatPred,
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
        let cmp = b.fcmp(pred, Ty::vector(Ty::i1(), lanes), sh0, sh1);
        let sext = b.cast(CastOp::SExt, Ty::vector(Ty::Int(256 / lanes), lanes), cmp);
        let wide = b.cast(CastOp::Bitcast, Ty::vector(Ty::i64(), 4), sext);
        drop(b);

        self.add_shadow(id, wide)?;
        self.origs.push(id);
        Ok(())
    }

    /// Casts are the boundary between the shadowed FP world and the scalar
    /// integer world.
    fn rewrite_cast_fp(
        &mut self,
        id: InstId,
        inst_ty: &Ty,
        op: CastOp,
        value: Value,
        user: &str,
    ) -> Result<(), HardenError> {
        match op {
            // integer/pointer casts stay scalar
            CastOp::Trunc
            | CastOp::ZExt
            | CastOp::SExt
            | CastOp::PtrToInt
            | CastOp::IntToPtr => Ok(()),

            CastOp::Bitcast => {
                let src_ty = self.body.value_ty(self.sig, &value);
                if src_ty.is_float_like() {
                    self.extract_op_and_substitute(Sink::Inst(id), 0)
                } else if inst_ty.is_float_like() {
                    self.replicate_result(id)
                } else {
                    Ok(())
                }
            }

            CastOp::FpExt => {
                // only possible option: <8 x float> to <4 x double>
                let sh = self.expect_shadow(&value, user, false)?;
                let sh_ty = self.body.value_ty(self.sig, &sh);
                let dest_ty = shadow::fp_shadow_ty(inst_ty)
                    .ok_or_else(|| HardenError::UnsupportedType(inst_ty.to_string()))?;

                let undef = Value::Const(Const::undef(sh_ty.clone()));
                let (bb, pos) = self.position_of(id);
                let mut b = Builder::before(self.body, bb, pos);
                let narrowed = b.shuffle(
                    Ty::vector(Ty::Float, 4),
                    sh,
                    undef,
                    (0..4).collect(),
                );
                drop(b);
                self.emit_fp_shadow_after(id, InstKind::Cast { op, value: narrowed }, dest_ty)
            }

            CastOp::FpTrunc => {
                // only possible option: <4 x double> to <8 x float>
                let sh = self.expect_shadow(&value, user, false)?;
                let sh_ty = self.body.value_ty(self.sig, &sh);
                let dest_ty = shadow::fp_shadow_ty(inst_ty)
                    .ok_or_else(|| HardenError::UnsupportedType(inst_ty.to_string()))?;

                let undef = Value::Const(Const::undef(sh_ty.clone()));
                let (bb, pos) = self.position_of(id);
                let mut b = Builder::before(self.body, bb, pos);
                let widened = b.shuffle(
                    Ty::vector(Ty::Double, 8),
                    sh,
                    undef,
                    (0..8u32).map(|i| i % 4).collect(),
                );
                drop(b);
                self.emit_fp_shadow_after(id, InstKind::Cast { op, value: widened }, dest_ty)
            }

            // FP leaves the shadowed world: lane 0 feeds the scalar cast
            CastOp::FpToSi | CastOp::FpToUi => self.extract_op_and_substitute(Sink::Inst(id), 0),

            // FP enters the shadowed world: splat the scalar result
            CastOp::SiToFp | CastOp::UiToFp => self.replicate_result(id),
        }
    }

    /// Build a shadow instruction right after the original, register it and
    /// schedule the original for deletion.
    fn emit_fp_shadow_after(
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

    pub(crate) fn rewrite_term_fp(&mut self, bb: BlockId) -> Result<(), HardenError> {
        let Some(term) = self.body.block(bb).term.clone() else {
            return Ok(());
        };
        match &term {
            Terminator::Ret { value: Some(_) } => {
                self.extract_op_and_substitute(Sink::Term(bb), 0)
            }
            Terminator::Ret { value: None }
            | Terminator::Br { .. }
            | Terminator::Unreachable => Ok(()),

            // switches select on integers, indirect branches on pointers;
            // neither is shadowed here
            Terminator::Switch { .. } | Terminator::IndirectBr { .. } => Ok(()),

            Terminator::CondBr { cond, .. } => {
                if cond.is_const() {
                    return Ok(());
                }
                let user = self.body.display_term(&term);
                let Some(sh) = self.get_shadow(cond, &user, false)? else {
                    // condition derived from integer comparison; stays scalar
                    return Ok(());
                };
                self.rewire_branch_cond(bb, sh);
                Ok(())
            }

            Terminator::Invoke { .. } | Terminator::Resume { .. } => Err(
                HardenError::NonLocalControl(self.body.display_term(&term)),
            ),
        }
    }
}
