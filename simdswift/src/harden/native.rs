//! The native-cost stub: a stripped-down pass that inserts opaque marker
//! calls at the same sync points the hardeners instrument, so a baseline
//! binary pays the encoding and scheduling cost without the fault-tolerance
//! benefit.
//!
//! No shadows, no map, no phi logic. Markers:
//!
//! - `dummy_extract` before every non-constant load/store/atomic operand;
//! - `dummy_broadcast` after every load/atomic;
//! - `dummy_ptest` before every conditional branch.
//!
//! No marker is inserted before calls; the asymmetry with the hardeners is
//! inherited from the reference implementation.

use crate::ir::{BlockId, Builder, DominatorTree, FuncBody, FuncRef, InstId, InstKind, Module, Signature, Terminator, Ty};

use super::helpers::is_ignored_name;
use super::HardenError;

/// Resolved references to the opaque volatile marker helpers.
pub struct NativeMarkers {
    pub extract: FuncRef,
    pub broadcast: FuncRef,
    pub ptest: FuncRef,
}

impl NativeMarkers {
    /// Look up the marker helpers. Fails if any is missing.
    pub fn resolve(module: &Module) -> Result<Self, HardenError> {
        let find = |name: &'static str| {
            module
                .get_func(name)
                .ok_or(HardenError::MissingHelper(name))
        };
        Ok(Self {
            extract: find("SIMDSWIFT_dummy_extract")?,
            broadcast: find("SIMDSWIFT_dummy_broadcast")?,
            ptest: find("SIMDSWIFT_dummy_ptest")?,
        })
    }
}

/// Run the native-cost stub over every eligible function.
pub fn run_native(module: &mut Module) -> Result<(), HardenError> {
    tracing::info!(pass = "slownative", module = %module.name, "running pass");
    let markers = NativeMarkers::resolve(module)?;

    for idx in 0..module.funcs.len() {
        if is_ignored_name(&module.funcs[idx].name) {
            continue;
        }
        let Some(mut body) = module.funcs[idx].body.take() else {
            continue;
        };
        mark_function(&mut body, &markers);
        module.funcs[idx].body = Some(body);
    }
    Ok(())
}

fn mark_function(body: &mut FuncBody, markers: &NativeMarkers) {
    let dt = DominatorTree::compute(body);
    let mut order = dt.preorder();
    for bb in body.block_ids() {
        if !dt.is_reachable(bb) {
            order.push(bb);
        }
    }
    let plan: Vec<(BlockId, Vec<InstId>)> = order
        .into_iter()
        .map(|bb| (bb, body.block(bb).insts.clone()))
        .collect();

    for (bb, insts) in plan {
        for id in insts {
            mark_inst(body, markers, id);
        }
        if let Some(Terminator::CondBr { cond, .. }) = &body.block(bb).term {
            if !cond.is_const() {
                let mut b = Builder::at_end(body, bb);
                emit_marker(&mut b, markers.ptest);
            }
        }
    }
}

fn mark_inst(body: &mut FuncBody, markers: &NativeMarkers, id: InstId) {
    // count the non-constant operands that the hardener would extract
    let (extracts, broadcast) = match &body.inst(id).kind {
        InstKind::Load { addr } => (usize::from(!addr.is_const()), true),
        InstKind::Store { value, addr } => {
            (usize::from(!addr.is_const()) + usize::from(!value.is_const()), false)
        }
        InstKind::CmpXchg {
            addr,
            expected,
            new,
        } => (
            [addr, expected, new].iter().filter(|v| !v.is_const()).count(),
            true,
        ),
        InstKind::AtomicRmw { addr, value, .. } => (
            [addr, value].iter().filter(|v| !v.is_const()).count(),
            true,
        ),
        _ => return,
    };

    let (bb, pos) = body.locate(id).expect("instruction is placed");
    let mut b = Builder::before(body, bb, pos);
    for _ in 0..extracts {
        emit_marker(&mut b, markers.extract);
    }
    drop(b);

    if broadcast {
        let (bb, pos) = body.locate(id).expect("instruction is placed");
        let mut b = Builder::before(body, bb, pos + 1);
        emit_marker(&mut b, markers.broadcast);
    }
}

fn emit_marker(b: &mut Builder, marker: FuncRef) {
    b.call_direct(marker, Ty::Void, vec![]);
}

/// The signature every marker helper carries: no arguments, no result.
pub fn marker_signature() -> Signature {
    Signature::new(vec![], Ty::Void)
}

// ============================================================================
// Tests
// ============================================================================
