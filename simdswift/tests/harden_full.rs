//! End-to-end tests for the full hardening variant: shadows for every
//! scalar type, split-block branch checks, and inline majority votes at
//! stores, calls, atomics and returns.

use simdswift::harden::{harden_module, CheckConfig, HardenError, Mode};
use simdswift::ir::{
    BinOp, BlockId, Callee, FuncBody, InlineAsm, InstData, InstId, InstKind, IntPred, Module,
    Signature, Terminator, Ty, Value,
};
use simdswift::runtime_decls::declare_check_helpers;

fn base_module() -> Module {
    let mut m = Module::new("t");
    declare_check_helpers(&mut m);
    m
}

fn all_insts(body: &FuncBody) -> Vec<InstId> {
    body.blocks.iter().flat_map(|b| b.insts.clone()).collect()
}

fn count_matching(body: &FuncBody, pred: impl Fn(&InstData) -> bool) -> usize {
    all_insts(body)
        .into_iter()
        .filter(|&id| pred(body.inst(id)))
        .count()
}

fn calls_to(module: &Module, body: &FuncBody, name: &str) -> Vec<InstId> {
    let Some(fref) = module.get_func(name) else {
        return Vec::new();
    };
    all_insts(body)
        .into_iter()
        .filter(|&id| {
            matches!(
                &body.inst(id).kind,
                InstKind::Call { callee: Callee::Direct(r), .. } if *r == fref
            )
        })
        .collect()
}

/// Resolve a value to the instruction that produced it.
fn producer<'a>(body: &'a FuncBody, v: &Value) -> Option<&'a InstData> {
    v.as_inst().map(|id| body.inst(id))
}

// ----------------------------------------------------------------------
// Scenario: scalar add
// ----------------------------------------------------------------------

#[test]
fn scalar_add_gets_wide_shadow_and_store_check() {
    let mut m = base_module();
    let mut body = FuncBody::new();
    let z = body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Value::Arg(0),
                rhs: Value::Arg(1),
            },
            Ty::i32(),
        ),
    );
    body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Store {
                value: Value::Inst(z),
                addr: Value::Arg(2),
            },
            Ty::Void,
        ),
    );
    body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
    let f = m.define(
        "f",
        Signature::new(vec![Ty::i32(), Ty::i32(), Ty::Ptr], Ty::Void),
        body,
    );

    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    // an <8 x i32> shadow add exists and the scalar add is gone
    assert_eq!(
        count_matching(body, |d| matches!(d.kind, InstKind::Binary { op: BinOp::Add, .. })
            && d.ty == Ty::vector(Ty::i32(), 8)),
        1
    );
    assert_eq!(
        count_matching(body, |d| matches!(d.kind, InstKind::Binary { op: BinOp::Add, .. })
            && d.ty == Ty::i32()),
        0
    );

    // the store's value operand is lane 0 of the corrected shadow
    let store = all_insts(body)
        .into_iter()
        .find(|&id| matches!(body.inst(id).kind, InstKind::Store { .. }))
        .expect("store survives");
    let InstKind::Store { value, .. } = &body.inst(store).kind else {
        unreachable!()
    };
    let extract = producer(body, value).expect("store value is an instruction");
    let InstKind::ExtractLane { vec, lane: 0 } = &extract.kind else {
        panic!("store value is not a lane-0 extract: {:?}", extract.kind);
    };
    let check = producer(body, vec).expect("extract source is an instruction");
    let check_i32 = m.get_func("SIMDSWIFT_check_i32").unwrap();
    assert!(
        matches!(&check.kind, InstKind::Call { callee: Callee::Direct(r), .. } if *r == check_i32),
        "store value does not come from the i32 correction helper"
    );

    // the store address is also voted, through the i64 cast path
    assert_eq!(calls_to(&m, body, "SIMDSWIFT_check_i64").len(), 1);
}

// ----------------------------------------------------------------------
// Scenario: conditional branch on icmp
// ----------------------------------------------------------------------

/// entry: %c = icmp slt %arg0, 10; br %c, merge, other
/// other: br merge
/// merge: %p = phi [0, entry], [1, other]; ret %p
fn branchy_module() -> (Module, simdswift::ir::FuncRef, BlockId, BlockId) {
    let mut m = base_module();
    let mut body = FuncBody::new();
    let other = body.new_block();
    let merge = body.new_block();

    let c = body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Icmp {
                pred: IntPred::Slt,
                lhs: Value::Arg(0),
                rhs: Value::Const(simdswift::ir::Const::int(32, 10)),
            },
            Ty::i1(),
        ),
    );
    body.set_term(
        BlockId::ENTRY,
        Terminator::CondBr {
            cond: Value::Inst(c),
            then_bb: merge,
            else_bb: other,
            weights: None,
        },
    );
    body.set_term(other, Terminator::Br { target: merge });

    let phi = body.push_inst(
        merge,
        InstData::new(
            InstKind::Phi {
                incoming: vec![
                    (Value::Const(simdswift::ir::Const::int(32, 0)), BlockId::ENTRY),
                    (Value::Const(simdswift::ir::Const::int(32, 1)), other),
                ],
            },
            Ty::i32(),
        ),
    );
    body.set_term(
        merge,
        Terminator::Ret {
            value: Some(Value::Inst(phi)),
        },
    );
    let f = m.define("f", Signature::new(vec![Ty::i32()], Ty::i32()), body);
    (m, f, other, merge)
}

#[test]
fn branch_check_uses_split_block_fast_path() {
    let (mut m, f, other, merge) = branchy_module();
    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    // the entry block now ends in the divergence test, strongly biased to
    // fall through
    let Some(Terminator::CondBr {
        then_bb: check_bb,
        else_bb: tail,
        weights,
        ..
    }) = body.block(BlockId::ENTRY).term.clone()
    else {
        panic!("entry does not end in a conditional branch");
    };
    assert_eq!(weights, Some((1, 10000)));

    // the fall-through tail carries the original branch, rewired to the
    // scalar ptest result
    let Some(Terminator::CondBr {
        then_bb: t_then,
        else_bb: t_else,
        weights: t_weights,
        ..
    }) = body.block(tail).term.clone()
    else {
        panic!("tail does not carry the original branch");
    };
    assert_eq!((t_then, t_else), (merge, other));
    assert_eq!(t_weights, None);

    // the corrective block calls the predicate helper, re-tests, and
    // branches to the same targets
    assert!(calls_to(&m, body, "SIMDSWIFT_mask_i64")
        .iter()
        .any(|id| body.block(check_bb).insts.contains(id)));
    let Some(Terminator::CondBr {
        then_bb: c_then,
        else_bb: c_else,
        ..
    }) = body.block(check_bb).term.clone()
    else {
        panic!("check block does not end in a branch clone");
    };
    assert_eq!((c_then, c_else), (merge, other));
}

#[test]
fn branch_check_extends_successor_phis() {
    let (mut m, f, other, merge) = branchy_module();
    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    let Some(Terminator::CondBr {
        then_bb: check_bb,
        else_bb: tail,
        ..
    }) = body.block(BlockId::ENTRY).term.clone()
    else {
        panic!("entry does not end in a conditional branch");
    };

    // the scalar phi is deleted; the shadow phi holds the rewired edges
    let phis: Vec<InstId> = body
        .block(merge)
        .insts
        .iter()
        .copied()
        .filter(|&id| matches!(body.inst(id).kind, InstKind::Phi { .. }))
        .collect();
    assert_eq!(phis.len(), 1);
    let shadow_phi = body.inst(phis[0]);
    assert_eq!(shadow_phi.ty, Ty::vector(Ty::i32(), 8));

    let InstKind::Phi { incoming } = &shadow_phi.kind else {
        unreachable!()
    };
    let preds: Vec<BlockId> = incoming.iter().map(|(_, bb)| *bb).collect();
    assert!(preds.contains(&tail));
    assert!(preds.contains(&other));
    assert!(preds.contains(&check_bb));
    assert_eq!(incoming.len(), 3);

    // the corrective edge binds the identical value as the tail edge
    let for_tail = incoming.iter().find(|(_, bb)| *bb == tail).unwrap();
    let for_check = incoming.iter().find(|(_, bb)| *bb == check_bb).unwrap();
    assert_eq!(for_tail.0, for_check.0);
}

#[test]
fn return_value_is_checked() {
    let (mut m, f, _, merge) = branchy_module();
    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    // ret reads lane 0 of a corrected shadow
    let Some(Terminator::Ret { value: Some(v) }) = body.block(merge).term.clone() else {
        panic!("merge does not return a value");
    };
    let extract = producer(body, &v).expect("ret value is an instruction");
    let InstKind::ExtractLane { vec, .. } = &extract.kind else {
        panic!("ret value is not a lane extract");
    };
    let check_i32 = m.get_func("SIMDSWIFT_check_i32").unwrap();
    let check = producer(body, vec).unwrap();
    assert!(
        matches!(&check.kind, InstKind::Call { callee: Callee::Direct(r), .. } if *r == check_i32)
    );
}

// ----------------------------------------------------------------------
// Scenario: load-use-store chain on double
// ----------------------------------------------------------------------

#[test]
fn double_chain_keeps_scalar_load_and_checks_store() {
    let mut m = base_module();
    let mut body = FuncBody::new();
    let loaded = body.push_inst(
        BlockId::ENTRY,
        InstData::new(InstKind::Load { addr: Value::Arg(0) }, Ty::Double),
    );
    let doubled = body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Binary {
                op: BinOp::FAdd,
                lhs: Value::Inst(loaded),
                rhs: Value::Inst(loaded),
            },
            Ty::Double,
        ),
    );
    body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Store {
                value: Value::Inst(doubled),
                addr: Value::Arg(1),
            },
            Ty::Void,
        ),
    );
    body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
    let f = m.define("f", Signature::new(vec![Ty::Ptr, Ty::Ptr], Ty::Void), body);

    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    // the load stays scalar, its result replicated into 4 double lanes
    assert_eq!(
        count_matching(body, |d| matches!(d.kind, InstKind::Load { .. })
            && d.ty == Ty::Double),
        1
    );
    assert_eq!(
        count_matching(body, |d| matches!(d.kind, InstKind::InsertLane { .. })
            && d.ty == Ty::vector(Ty::Double, 4)),
        4
    );

    // the compute happens on the shadow
    assert_eq!(
        count_matching(body, |d| matches!(d.kind, InstKind::Binary { op: BinOp::FAdd, .. })
            && d.ty == Ty::vector(Ty::Double, 4)),
        1
    );

    // the stored value is voted with the double helper
    assert_eq!(calls_to(&m, body, "SIMDSWIFT_check_double").len(), 1);
}

// ----------------------------------------------------------------------
// Scenario: phi-join of two integer definitions
// ----------------------------------------------------------------------

#[test]
fn phi_join_gets_shadow_phi_and_original_is_deleted() {
    let mut m = base_module();
    let mut body = FuncBody::new();
    let left = body.new_block();
    let right = body.new_block();
    let merge = body.new_block();

    body.set_term(
        BlockId::ENTRY,
        Terminator::CondBr {
            cond: Value::Arg(1),
            then_bb: left,
            else_bb: right,
            weights: None,
        },
    );
    let a = body.push_inst(
        left,
        InstData::new(
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Value::Arg(0),
                rhs: Value::Const(simdswift::ir::Const::int(32, 1)),
            },
            Ty::i32(),
        ),
    );
    body.set_term(left, Terminator::Br { target: merge });
    let b = body.push_inst(
        right,
        InstData::new(
            InstKind::Binary {
                op: BinOp::Mul,
                lhs: Value::Arg(0),
                rhs: Value::Const(simdswift::ir::Const::int(32, 3)),
            },
            Ty::i32(),
        ),
    );
    body.set_term(right, Terminator::Br { target: merge });
    let phi = body.push_inst(
        merge,
        InstData::new(
            InstKind::Phi {
                incoming: vec![(Value::Inst(a), left), (Value::Inst(b), right)],
            },
            Ty::i32(),
        ),
    );
    body.set_term(
        merge,
        Terminator::Ret {
            value: Some(Value::Inst(phi)),
        },
    );
    let f = m.define("f", Signature::new(vec![Ty::i32(), Ty::i1()], Ty::i32()), body);

    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    // exactly one phi remains in the merge block: the <8 x i32> shadow
    let phis: Vec<InstId> = body
        .block(merge)
        .insts
        .iter()
        .copied()
        .filter(|&id| matches!(body.inst(id).kind, InstKind::Phi { .. }))
        .collect();
    assert_eq!(phis.len(), 1);
    let shadow_phi = body.inst(phis[0]);
    assert_eq!(shadow_phi.ty, Ty::vector(Ty::i32(), 8));

    // its incoming values are the shadows of the two definitions
    let InstKind::Phi { incoming } = &shadow_phi.kind else {
        unreachable!()
    };
    assert_eq!(incoming.len(), 2);
    for (v, _) in incoming {
        let def = producer(body, v).expect("incoming is an instruction");
        assert_eq!(def.ty, Ty::vector(Ty::i32(), 8));
        assert!(matches!(def.kind, InstKind::Binary { .. }));
    }

    // no scalar i32 phi survives anywhere
    assert_eq!(
        count_matching(body, |d| matches!(d.kind, InstKind::Phi { .. })
            && d.ty == Ty::i32()),
        0
    );
}

// ----------------------------------------------------------------------
// Scenario: indirect call
// ----------------------------------------------------------------------

#[test]
fn indirect_call_extracts_and_checks_function_pointer() {
    let mut m = base_module();
    let mut body = FuncBody::new();
    let fp = body.push_inst(
        BlockId::ENTRY,
        InstData::new(InstKind::Load { addr: Value::Arg(0) }, Ty::Ptr),
    );
    body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Call {
                callee: Callee::Indirect(Value::Inst(fp)),
                args: vec![Value::Arg(1)],
            },
            Ty::i32(),
        ),
    );
    body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
    let f = m.define("f", Signature::new(vec![Ty::Ptr, Ty::i32()], Ty::Void), body);

    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    // the surviving call goes through a lane-0 extract of a corrected
    // pointer shadow (ptr -> i64 -> vote -> ptr)
    let call = all_insts(body)
        .into_iter()
        .find(|&id| {
            matches!(&body.inst(id).kind, InstKind::Call { callee: Callee::Indirect(_), .. })
        })
        .expect("indirect call survives");
    let InstKind::Call { callee: Callee::Indirect(target), args } = &body.inst(call).kind else {
        unreachable!()
    };
    let extract = producer(body, target).expect("callee is an instruction");
    let InstKind::ExtractLane { vec, lane: 0 } = &extract.kind else {
        panic!("callee is not a lane-0 extract");
    };
    let back_cast = producer(body, vec).unwrap();
    assert!(matches!(
        back_cast.kind,
        InstKind::Cast {
            op: simdswift::ir::CastOp::IntToPtr,
            ..
        }
    ));

    // the argument also carries its own extract
    let arg = producer(body, &args[0]).expect("argument is an instruction");
    assert!(matches!(arg.kind, InstKind::ExtractLane { .. }));

    // pointer votes route through the i64 helper: one for the load
    // address, one for the function pointer
    assert_eq!(calls_to(&m, body, "SIMDSWIFT_check_i64").len(), 2);
}

// ----------------------------------------------------------------------
// Switch selectors
// ----------------------------------------------------------------------

#[test]
fn switch_selector_is_extracted_and_checked() {
    let mut m = base_module();
    let mut body = FuncBody::new();
    let a = body.new_block();
    let b = body.new_block();
    body.set_term(
        BlockId::ENTRY,
        Terminator::Switch {
            selector: Value::Arg(0),
            default: a,
            cases: vec![(4, b)],
        },
    );
    body.set_term(a, Terminator::Ret { value: None });
    body.set_term(b, Terminator::Ret { value: None });
    let f = m.define("f", Signature::new(vec![Ty::i64()], Ty::Void), body);

    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    let Some(Terminator::Switch { selector, .. }) = body.block(BlockId::ENTRY).term.clone()
    else {
        panic!("switch survives");
    };
    let extract = producer(body, &selector).expect("selector is an instruction");
    assert!(matches!(extract.kind, InstKind::ExtractLane { .. }));
    assert_eq!(calls_to(&m, body, "SIMDSWIFT_check_i64").len(), 1);
}

// ----------------------------------------------------------------------
// Refusals and elisions
// ----------------------------------------------------------------------

#[test]
fn missing_runtime_helpers_refuse_to_run() {
    let mut m = Module::new("t");
    let mut body = FuncBody::new();
    body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
    m.define("f", Signature::new(vec![], Ty::Void), body);

    let err = harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap_err();
    assert!(matches!(err, HardenError::MissingHelper(_)));
}

#[test]
fn rerunning_on_hardened_output_is_refused() {
    let (mut m, ..) = branchy_module();
    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();

    // the hardened function now contains lane operations, which the
    // rewriter refuses as input
    let err = harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap_err();
    assert!(matches!(err, HardenError::VectorInput(_)));
}

#[test]
fn no_check_all_elides_every_vote() {
    let (mut m, f, ..) = branchy_module();
    let cfg = CheckConfig {
        no_check_all: true,
        ..CheckConfig::default()
    };
    harden_module(&mut m, Mode::Full, &cfg).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    assert!(calls_to(&m, body, "SIMDSWIFT_mask_i64").is_empty());
    assert!(calls_to(&m, body, "SIMDSWIFT_check_i32").is_empty());
    // the branch rewrite itself still happens
    assert!(!calls_to(&m, body, "intrin.ptestz.256").is_empty());
    // and no block split occurred: entry still branches straight to the
    // original successors
    assert_eq!(body.blocks.len(), 3);
}

#[test]
fn per_category_elision_is_selective() {
    let mut m = base_module();
    let mut body = FuncBody::new();
    let exit = body.new_block();
    let z = body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Value::Arg(0),
                rhs: Value::Arg(0),
            },
            Ty::i32(),
        ),
    );
    body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Store {
                value: Value::Inst(z),
                addr: Value::Arg(1),
            },
            Ty::Void,
        ),
    );
    let c = body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Icmp {
                pred: IntPred::Eq,
                lhs: Value::Inst(z),
                rhs: Value::Const(simdswift::ir::Const::int(32, 0)),
            },
            Ty::i1(),
        ),
    );
    body.set_term(
        BlockId::ENTRY,
        Terminator::CondBr {
            cond: Value::Inst(c),
            then_bb: exit,
            else_bb: exit,
            weights: None,
        },
    );
    body.set_term(exit, Terminator::Ret { value: None });
    let f = m.define("f", Signature::new(vec![Ty::i32(), Ty::Ptr], Ty::Void), body);

    let cfg = CheckConfig {
        no_check_store: true,
        ..CheckConfig::default()
    };
    harden_module(&mut m, Mode::Full, &cfg).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    // store checks gone, branch check still present
    assert!(calls_to(&m, body, "SIMDSWIFT_check_i32").is_empty());
    assert!(calls_to(&m, body, "SIMDSWIFT_check_i64").is_empty());
    assert!(!calls_to(&m, body, "SIMDSWIFT_mask_i64").is_empty());
}

#[test]
fn exception_control_flow_is_refused() {
    let mut m = base_module();
    let mut body = FuncBody::new();
    body.push_inst(BlockId::ENTRY, InstData::new(InstKind::LandingPad, Ty::Ptr));
    body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
    m.define("f", Signature::new(vec![], Ty::Void), body);

    let err = harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap_err();
    assert!(matches!(err, HardenError::NonLocalControl(_)));
}

#[test]
fn inline_asm_handling() {
    // empty asm passes through
    let mut m = base_module();
    let mut body = FuncBody::new();
    body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Call {
                callee: Callee::Asm(InlineAsm {
                    asm: String::new(),
                    constraints: "~{memory}".to_string(),
                }),
                args: vec![],
            },
            Ty::Void,
        ),
    );
    body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
    m.define("barrier", Signature::new(vec![], Ty::Void), body);
    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();

    // non-empty asm is fatal
    let mut m = base_module();
    let mut body = FuncBody::new();
    body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Call {
                callee: Callee::Asm(InlineAsm {
                    asm: "rdtsc".to_string(),
                    constraints: String::new(),
                }),
                args: vec![],
            },
            Ty::Void,
        ),
    );
    body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
    m.define("timed", Signature::new(vec![], Ty::Void), body);
    let err = harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap_err();
    assert!(matches!(err, HardenError::InlineAsm(_)));
}

#[test]
fn ignored_functions_pass_through_untouched() {
    let mut m = base_module();
    let tx = m.declare("tx_start", Signature::new(vec![], Ty::Void));

    let mut body = FuncBody::new();
    body.push_inst(
        BlockId::ENTRY,
        InstData::new(
            InstKind::Call {
                callee: Callee::Direct(tx),
                args: vec![],
            },
            Ty::Void,
        ),
    );
    body.set_term(BlockId::ENTRY, Terminator::Ret { value: None });
    let f = m.define("f", Signature::new(vec![], Ty::Void), body);

    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();
    let body = m.func(f).body.as_ref().unwrap();

    // the call is still there, with no checks around it
    assert_eq!(
        count_matching(body, |d| matches!(
            &d.kind,
            InstKind::Call { callee: Callee::Direct(r), .. } if *r == tx
        )),
        1
    );
    assert!(calls_to(&m, body, "SIMDSWIFT_check_i64").is_empty());
}

#[test]
fn hardened_module_roundtrips_through_json() {
    let (mut m, ..) = branchy_module();
    harden_module(&mut m, Mode::Full, &CheckConfig::default()).unwrap();

    let text = serde_json::to_string(&m).unwrap();
    let back: Module = serde_json::from_str(&text).unwrap();
    assert_eq!(back.funcs.len(), m.funcs.len());
    assert_eq!(back.display_text(), m.display_text());
}
