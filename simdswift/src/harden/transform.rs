//! The per-function transformer: traversal order, the deferred work lists,
//! operand extraction, shadow replication, phi rewiring and deletion of the
//! dead scalar originals.
//!
//! The whole apparatus is scoped to one function: created on entry,
//! discarded on exit. Ordering is strict: (1) dominator-order rewriting,
//! (2) natural-order rewriting of blocks the dominator tree does not reach,
//! (3) phi rewiring, (4) check injection, (5) deletion. By the time a check
//! is injected, every operand its sink consumes has been shadowed or
//! classified opaque.

use crate::ir::{
    BlockId, Builder, CastOp, DominatorTree, FuncBody, InstId, InstKind, Signature, Ty, Value,
};

use super::helpers::{Helpers, Intrinsics};
use super::shadow::{self, ShadowMap};
use super::{CheckConfig, HardenError, Mode};

/// Where a pending check attaches: a regular instruction, or the terminator
/// of a block.
#[derive(Debug, Clone)]
pub(crate) enum Sink {
    Inst(InstId),
    Term(BlockId),
}

/// Which operand of the sink the corrected scalar replaces. `Callee` is the
/// indirect-call function pointer, which is not a positional operand.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Operand(usize),
    Callee,
}

/// A queued majority-vote obligation.
#[derive(Debug, Clone)]
pub(crate) struct PendingCheck {
    pub sink: Sink,
    pub shadow: Value,
    pub slot: Slot,
}

pub(crate) struct Transformer<'a> {
    pub mode: Mode,
    pub body: &'a mut FuncBody,
    pub sig: &'a Signature,
    pub func_name: &'a str,
    /// Function names by `FuncRef` index, for callee classification.
    pub names: &'a [String],
    pub helpers: &'a Helpers,
    pub intrinsics: &'a Intrinsics,
    pub cfg: &'a CheckConfig,
    pub shadows: ShadowMap,
    /// Originals whose shadow replaced them; deleted at the end in reverse
    /// insertion order.
    pub origs: Vec<InstId>,
    /// Original phis whose shadow phi was built empty and must be wired up
    /// after all blocks are processed.
    pub phis: Vec<InstId>,
    /// Queued check obligations, processed in reverse.
    pub tocheck: Vec<PendingCheck>,
}

impl<'a> Transformer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: Mode,
        body: &'a mut FuncBody,
        sig: &'a Signature,
        func_name: &'a str,
        names: &'a [String],
        helpers: &'a Helpers,
        intrinsics: &'a Intrinsics,
        cfg: &'a CheckConfig,
    ) -> Self {
        Self {
            mode,
            body,
            sig,
            func_name,
            names,
            helpers,
            intrinsics,
            cfg,
            shadows: ShadowMap::new(mode),
            origs: Vec::new(),
            phis: Vec::new(),
            tocheck: Vec::new(),
        }
    }

    /// Run the full per-function pipeline.
    pub fn run(mut self) -> Result<(), HardenError> {
        let dt = DominatorTree::compute(self.body);
        let mut order = dt.preorder();
        for bb in self.body.block_ids() {
            if !dt.is_reachable(bb) {
                order.push(bb);
            }
        }
        // Snapshot every block's instruction list before any mutation so the
        // walk skips the instructions the rewriter itself inserts.
        let plan: Vec<(BlockId, Vec<InstId>)> = order
            .into_iter()
            .map(|bb| (bb, self.body.block(bb).insts.clone()))
            .collect();

        self.shadow_args()?;

        for (bb, insts) in plan {
            for id in insts {
                match self.mode {
                    Mode::Full => self.rewrite_full(id)?,
                    Mode::FpOnly => self.rewrite_fp(id)?,
                }
            }
            match self.mode {
                Mode::Full => self.rewrite_term_full(bb)?,
                Mode::FpOnly => self.rewrite_term_fp(bb)?,
            }
        }

        self.rewire_phis()?;
        self.insert_checks()?;
        self.remove_origs();
        Ok(())
    }

    /// Replicate each eligible function argument into a shadow at the top
    /// of the entry block.
    fn shadow_args(&mut self) -> Result<(), HardenError> {
        let params = self.sig.params.clone();
        let mut pos = 0usize;
        for (i, ty) in params.iter().enumerate() {
            if self.mode == Mode::FpOnly && !ty.is_float_like() {
                continue;
            }
            let (sh, end) = self.replicate_at(BlockId::ENTRY, pos, Value::Arg(i as u32), ty)?;
            pos = end;
            self.shadows.add(self.body, &Value::Arg(i as u32), sh)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared rewriting machinery
    // ------------------------------------------------------------------

    /// Look up (or synthesize) the shadow of `v` on behalf of `user`.
    pub(crate) fn get_shadow(
        &self,
        v: &Value,
        user: &str,
        for_gep: bool,
    ) -> Result<Option<Value>, HardenError> {
        self.shadows.get(self.body, self.sig, v, user, for_gep)
    }

    /// Look up the shadow of `v`, treating "no shadow" as an error. Used
    /// where the rewrite rule cannot proceed without one.
    pub(crate) fn expect_shadow(
        &self,
        v: &Value,
        user: &str,
        for_gep: bool,
    ) -> Result<Value, HardenError> {
        self.get_shadow(v, user, for_gep)?
            .ok_or_else(|| HardenError::MissingShadow {
                value: self.body.value_label(v),
                user: user.to_string(),
            })
    }

    /// Register `shadow` as the shadow of instruction `orig`.
    pub(crate) fn add_shadow(&mut self, orig: InstId, shadow: Value) -> Result<(), HardenError> {
        self.shadows.add(self.body, &Value::Inst(orig), shadow)
    }

    /// The position of an instruction, which moves as code is inserted
    /// around it.
    pub(crate) fn position_of(&self, id: InstId) -> (BlockId, usize) {
        self.body
            .locate(id)
            .unwrap_or_else(|| panic!("instruction {} is not in any block", id.index()))
    }

    pub(crate) fn sink_position(&self, sink: &Sink) -> (BlockId, usize) {
        match sink {
            Sink::Inst(id) => self.position_of(*id),
            Sink::Term(bb) => (*bb, self.body.block(*bb).insts.len()),
        }
    }

    pub(crate) fn sink_label(&self, sink: &Sink) -> String {
        match sink {
            Sink::Inst(id) => self.body.display_inst(*id),
            Sink::Term(bb) => match &self.body.block(*bb).term {
                Some(term) => self.body.display_term(term),
                None => "<unterminated block>".to_string(),
            },
        }
    }

    /// The name a shadow instruction inherits from its original.
    pub(crate) fn shadow_name(&self, orig: InstId) -> Option<String> {
        self.body
            .inst(orig)
            .name
            .as_ref()
            .map(|n| format!("{}.simd", n))
    }

    /// The core sink rewrite: fetch the shadow of the operand at `idx`,
    /// queue a check obligation on it, and substitute lane 0 of the shadow
    /// (narrowed if the consumer's scalar is narrower) into the sink.
    ///
    /// Operands without a shadow (opaque values; non-FP values in FP-only
    /// mode) are left alone.
    pub(crate) fn extract_op_and_substitute(
        &mut self,
        sink: Sink,
        idx: usize,
    ) -> Result<(), HardenError> {
        let operand = match &sink {
            Sink::Inst(id) => self.body.inst(*id).kind.operand(idx).cloned(),
            Sink::Term(bb) => self
                .body
                .block(*bb)
                .term
                .as_ref()
                .and_then(|t| t.value_operand())
                .cloned(),
        };
        let Some(operand) = operand else {
            return Ok(());
        };

        let user = self.sink_label(&sink);
        let is_gep = matches!(
            &sink,
            Sink::Inst(id) if matches!(self.body.inst(*id).kind, InstKind::Gep { .. })
        );
        let Some(shadow) = self.get_shadow(&operand, &user, is_gep)? else {
            return Ok(());
        };

        self.tocheck.push(PendingCheck {
            sink: sink.clone(),
            shadow: shadow.clone(),
            slot: Slot::Operand(idx),
        });

        let op_ty = self.body.value_ty(self.sig, &operand);
        let elem_ty = self
            .body
            .value_ty(self.sig, &shadow)
            .elem()
            .cloned()
            .expect("shadow is a vector");

        let (bb, pos) = self.sink_position(&sink);
        let mut b = Builder::before(self.body, bb, pos);
        let mut new_op = b.extract_lane(elem_ty.clone(), shadow, 0);
        if self.mode == Mode::Full {
            if let (Some(from), Some(to)) = (elem_ty.bit_width(), op_ty.bit_width()) {
                if from > to {
                    new_op = b.cast(CastOp::Trunc, op_ty.clone(), new_op);
                }
            }
        }

        match sink {
            Sink::Inst(id) => self.body.inst_mut(id).kind.set_operand(idx, new_op),
            Sink::Term(bb) => self
                .body
                .block_mut(bb)
                .term
                .as_mut()
                .expect("sink terminator exists")
                .set_value_operand(new_op),
        }
        Ok(())
    }

    /// Replicate a scalar value into a fresh shadow at `(bb, pos)`, widening
    /// `i1` to `i64` first. Returns the shadow and the position after the
    /// inserted code.
    pub(crate) fn replicate_at(
        &mut self,
        bb: BlockId,
        pos: usize,
        value: Value,
        scalar_ty: &Ty,
    ) -> Result<(Value, usize), HardenError> {
        let mut b = Builder::before(self.body, bb, pos);
        let (ty, value) = if scalar_ty.is_i1() {
            (Ty::i64(), b.cast(CastOp::ZExt, Ty::i64(), value))
        } else {
            (scalar_ty.clone(), value)
        };
        let vec_ty = match self.mode {
            Mode::Full => shadow::shadow_ty(&ty),
            Mode::FpOnly => shadow::fp_shadow_ty(&ty),
        }
        .ok_or_else(|| HardenError::UnsupportedType(ty.to_string()))?;
        let sh = b.splat_value(vec_ty, value);
        let (_, end) = b.position();
        Ok((sh, end))
    }

    /// Replicate the result of instruction `id` right after it and register
    /// the shadow.
    pub(crate) fn replicate_result(&mut self, id: InstId) -> Result<(), HardenError> {
        let ty = self.body.inst(id).ty.clone();
        let (bb, pos) = self.position_of(id);
        let (sh, _) = self.replicate_at(bb, pos + 1, Value::Inst(id), &ty)?;
        self.add_shadow(id, sh)
    }

    // ------------------------------------------------------------------
    // Phi rewiring and deletion
    // ------------------------------------------------------------------

    /// Bind the incoming values of every deferred shadow phi. Runs after
    /// all blocks are rewritten, because phi inputs may be defined in
    /// blocks that had not been visited when the phi was.
    pub(crate) fn rewire_phis(&mut self) -> Result<(), HardenError> {
        let phis = self.phis.clone();
        for orig in phis {
            let user = self.body.display_inst(orig);
            let shadow = self
                .get_shadow(&Value::Inst(orig), &user, false)?
                .ok_or_else(|| HardenError::MissingShadowPhi(user.clone()))?;
            let sh_id = shadow
                .as_inst()
                .filter(|&i| matches!(self.body.inst(i).kind, InstKind::Phi { .. }))
                .ok_or_else(|| HardenError::MissingShadowPhi(user.clone()))?;

            let incoming = match &self.body.inst(orig).kind {
                InstKind::Phi { incoming } => incoming.clone(),
                _ => Vec::new(),
            };
            let mut bound = Vec::with_capacity(incoming.len());
            for (v, pred) in incoming {
                if let Some(sv) = self.get_shadow(&v, &user, false)? {
                    bound.push((sv, pred));
                }
            }
            if let InstKind::Phi { incoming } = &mut self.body.inst_mut(sh_id).kind {
                *incoming = bound;
            }
        }
        Ok(())
    }

    /// Delete the replaced originals, in reverse insertion order. Original
    /// phis are drained of their incoming values first, breaking the mutual
    /// reference cycles between the original and shadow phi graphs.
    ///
    /// An original that still has uses is evidence the rewriter missed a
    /// consumer; it is logged and left in place.
    pub(crate) fn remove_origs(&mut self) {
        for &phi in &self.phis {
            if let InstKind::Phi { incoming } = &mut self.body.inst_mut(phi).kind {
                incoming.clear();
            }
        }

        let mut counts = self.body.use_counts();
        for &id in self.origs.clone().iter().rev() {
            if counts[id.index()] > 0 {
                tracing::warn!(
                    func = self.func_name,
                    inst = %self.body.display_inst(id),
                    "instruction is still used and cannot be removed"
                );
                continue;
            }
            self.body.inst(id).kind.for_each_operand(|v| {
                if let Value::Inst(op) = v {
                    counts[op.index()] = counts[op.index()].saturating_sub(1);
                }
            });
            self.body.remove_inst(id);
        }
    }
}
