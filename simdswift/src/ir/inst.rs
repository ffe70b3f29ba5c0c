//! # Instructions and Terminators
//!
//! The instruction set, encoded as an exhaustive tagged enum so that any
//! pass dispatching on instruction kind is checked for completeness at
//! build time.
//!
//! ## Operand numbering
//!
//! Several passes address operands positionally (the check injector records
//! `(sink, shadow, operand index)` tuples). The numbering is fixed per kind
//! and documented on [`InstKind::operand`]:
//!
//! | kind | 0 | 1 | 2.. |
//! |------|---|---|-----|
//! | `Binary`, `Icmp`, `Fcmp` | lhs | rhs | |
//! | `Select` | cond | on_true | on_false |
//! | `Cast`, `Load`, `VaArg`, `ExtractValue`, `ExtractLane` | value | | |
//! | `Gep` | base | index 0 | index 1.. |
//! | `Alloca` | count (if any) | | |
//! | `Store` | value | addr | |
//! | `CmpXchg` | addr | expected | new |
//! | `AtomicRmw` | addr | value | |
//! | `Call` | arg 0 | arg 1 | arg 2.. (callee is *not* an operand) |
//! | `InsertValue` | agg | value | |
//! | `InsertLane` | vec | value | |
//! | `Shuffle` | a | b | |
//! | `Phi` | incoming 0 | incoming 1 | .. |

use serde::{Deserialize, Serialize};

use super::types::{BlockId, FuncRef, Ty};
use super::value::Value;

// ============================================================================
// Operation kinds
// ============================================================================

/// Binary operations, integer and floating-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinOp {
    /// Check if this is a floating-point operation.
    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem
        )
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
        }
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntPred {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

/// Floating-point comparison predicates (ordered and unordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloatPred {
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
}

/// Cast operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    PtrToInt,
    IntToPtr,
    Bitcast,
}

impl CastOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FpTrunc => "fptrunc",
            CastOp::FpExt => "fpext",
            CastOp::FpToUi => "fptoui",
            CastOp::FpToSi => "fptosi",
            CastOp::UiToFp => "uitofp",
            CastOp::SiToFp => "sitofp",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::Bitcast => "bitcast",
        }
    }
}

/// Atomic read-modify-write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
    FAdd,
    FSub,
}

// ============================================================================
// Callees
// ============================================================================

/// An inline-assembly literal. Empty asm strings are used as optimization
/// barriers and pass through the hardeners untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineAsm {
    /// The assembly template string.
    pub asm: String,
    /// The constraint string.
    pub constraints: String,
}

impl InlineAsm {
    pub fn is_empty(&self) -> bool {
        self.asm.is_empty()
    }
}

/// What a call targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Callee {
    /// A direct call to a known function.
    Direct(FuncRef),
    /// An indirect call through a function pointer.
    Indirect(Value),
    /// An inline-assembly "call".
    Asm(InlineAsm),
}

// ============================================================================
// Instructions
// ============================================================================

/// An instruction together with its result type and optional name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstData {
    /// The instruction kind and operands.
    pub kind: InstKind,
    /// The result type (`Void` for instructions without a result).
    pub ty: Ty,
    /// Optional result name, kept for readable output.
    pub name: Option<String>,
}

impl InstData {
    pub fn new(kind: InstKind, ty: Ty) -> Self {
        Self {
            kind,
            ty,
            name: None,
        }
    }

    pub fn named(kind: InstKind, ty: Ty, name: impl Into<String>) -> Self {
        Self {
            kind,
            ty,
            name: Some(name.into()),
        }
    }
}

/// The instruction kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstKind {
    /// Integer or floating-point binary operation.
    Binary { op: BinOp, lhs: Value, rhs: Value },

    /// Integer comparison; result is `i1` (or a vector of `i1`).
    Icmp {
        pred: IntPred,
        lhs: Value,
        rhs: Value,
    },

    /// Floating-point comparison; result is `i1` (or a vector of `i1`).
    Fcmp {
        pred: FloatPred,
        lhs: Value,
        rhs: Value,
    },

    /// Lane-wise or scalar select.
    Select {
        cond: Value,
        on_true: Value,
        on_false: Value,
    },

    /// Type conversion; the destination type is the instruction's `ty`.
    Cast { op: CastOp, value: Value },

    /// Address computation over an element type.
    Gep {
        elem_ty: Ty,
        base: Value,
        indices: Vec<Value>,
        in_bounds: bool,
    },

    /// Stack allocation; result is a pointer.
    Alloca {
        alloc_ty: Ty,
        /// Element count for array allocations, if not 1.
        count: Option<Value>,
    },

    /// Memory load; the loaded type is the instruction's `ty`.
    Load { addr: Value },

    /// Memory store (no result).
    Store { value: Value, addr: Value },

    /// Atomic compare-exchange; the result is the value read from memory.
    CmpXchg {
        addr: Value,
        expected: Value,
        new: Value,
    },

    /// Atomic read-modify-write; the result is the value read from memory.
    AtomicRmw { op: RmwOp, addr: Value, value: Value },

    /// SSA join point. Incoming values are paired with predecessor blocks.
    Phi { incoming: Vec<(Value, BlockId)> },

    /// Function call.
    Call { callee: Callee, args: Vec<Value> },

    /// Extract a field from an aggregate (call-boundary structs only).
    ExtractValue { agg: Value, index: u32 },

    /// Insert a field into an aggregate (call-boundary structs only).
    InsertValue { agg: Value, value: Value, index: u32 },

    /// Extract one lane from a vector.
    ExtractLane { vec: Value, lane: u32 },

    /// Insert a scalar into one lane of a vector.
    InsertLane { vec: Value, value: Value, lane: u32 },

    /// Lane shuffle of two vectors; `mask[i]` indexes the concatenation of
    /// `a`'s and `b`'s lanes.
    Shuffle { a: Value, b: Value, mask: Vec<u32> },

    /// Read the next variadic argument from a va_list pointer.
    VaArg { list: Value },

    /// Memory fence.
    Fence,

    /// Exception landing pad (refused by the hardeners).
    LandingPad,

    /// Placeholder for a removed instruction. Never appears in a block.
    Nop,
}

impl InstKind {
    /// Short mnemonic for diagnostics and display.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstKind::Binary { op, .. } => op.mnemonic(),
            InstKind::Icmp { .. } => "icmp",
            InstKind::Fcmp { .. } => "fcmp",
            InstKind::Select { .. } => "select",
            InstKind::Cast { op, .. } => op.mnemonic(),
            InstKind::Gep { .. } => "gep",
            InstKind::Alloca { .. } => "alloca",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::CmpXchg { .. } => "cmpxchg",
            InstKind::AtomicRmw { .. } => "atomicrmw",
            InstKind::Phi { .. } => "phi",
            InstKind::Call { .. } => "call",
            InstKind::ExtractValue { .. } => "extractvalue",
            InstKind::InsertValue { .. } => "insertvalue",
            InstKind::ExtractLane { .. } => "extractlane",
            InstKind::InsertLane { .. } => "insertlane",
            InstKind::Shuffle { .. } => "shuffle",
            InstKind::VaArg { .. } => "va_arg",
            InstKind::Fence => "fence",
            InstKind::LandingPad => "landingpad",
            InstKind::Nop => "nop",
        }
    }

    /// Get the operand at `idx` per the numbering in the module docs.
    pub fn operand(&self, idx: usize) -> Option<&Value> {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::Icmp { lhs, rhs, .. }
            | InstKind::Fcmp { lhs, rhs, .. } => match idx {
                0 => Some(lhs),
                1 => Some(rhs),
                _ => None,
            },
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => match idx {
                0 => Some(cond),
                1 => Some(on_true),
                2 => Some(on_false),
                _ => None,
            },
            InstKind::Cast { value, .. } if idx == 0 => Some(value),
            InstKind::Gep { base, indices, .. } => match idx {
                0 => Some(base),
                _ => indices.get(idx - 1),
            },
            InstKind::Alloca { count, .. } if idx == 0 => count.as_ref(),
            InstKind::Load { addr } if idx == 0 => Some(addr),
            InstKind::Store { value, addr } => match idx {
                0 => Some(value),
                1 => Some(addr),
                _ => None,
            },
            InstKind::CmpXchg {
                addr,
                expected,
                new,
            } => match idx {
                0 => Some(addr),
                1 => Some(expected),
                2 => Some(new),
                _ => None,
            },
            InstKind::AtomicRmw { addr, value, .. } => match idx {
                0 => Some(addr),
                1 => Some(value),
                _ => None,
            },
            InstKind::Phi { incoming } => incoming.get(idx).map(|(v, _)| v),
            InstKind::Call { args, .. } => args.get(idx),
            InstKind::ExtractValue { agg, .. } if idx == 0 => Some(agg),
            InstKind::InsertValue { agg, value, .. } => match idx {
                0 => Some(agg),
                1 => Some(value),
                _ => None,
            },
            InstKind::ExtractLane { vec, .. } if idx == 0 => Some(vec),
            InstKind::InsertLane { vec, value, .. } => match idx {
                0 => Some(vec),
                1 => Some(value),
                _ => None,
            },
            InstKind::Shuffle { a, b, .. } => match idx {
                0 => Some(a),
                1 => Some(b),
                _ => None,
            },
            InstKind::VaArg { list } if idx == 0 => Some(list),
            _ => None,
        }
    }

    /// Replace the operand at `idx`. Panics if the slot does not exist; the
    /// caller is addressing an operand it already read.
    pub fn set_operand(&mut self, idx: usize, new: Value) {
        let kind_name = self.mnemonic();
        let slot = match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::Icmp { lhs, rhs, .. }
            | InstKind::Fcmp { lhs, rhs, .. } => match idx {
                0 => lhs,
                1 => rhs,
                _ => panic!("{}: no operand {}", kind_name, idx),
            },
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => match idx {
                0 => cond,
                1 => on_true,
                2 => on_false,
                _ => panic!("select: no operand {}", idx),
            },
            InstKind::Cast { value, .. } if idx == 0 => value,
            InstKind::Gep { base, indices, .. } => {
                if idx == 0 {
                    base
                } else {
                    indices
                        .get_mut(idx - 1)
                        .unwrap_or_else(|| panic!("gep: no operand {}", idx))
                }
            }
            InstKind::Alloca {
                count: Some(count), ..
            } if idx == 0 => count,
            InstKind::Load { addr } if idx == 0 => addr,
            InstKind::Store { value, addr } => match idx {
                0 => value,
                1 => addr,
                _ => panic!("store: no operand {}", idx),
            },
            InstKind::CmpXchg {
                addr,
                expected,
                new,
            } => match idx {
                0 => addr,
                1 => expected,
                2 => new,
                _ => panic!("cmpxchg: no operand {}", idx),
            },
            InstKind::AtomicRmw { addr, value, .. } => match idx {
                0 => addr,
                1 => value,
                _ => panic!("atomicrmw: no operand {}", idx),
            },
            InstKind::Phi { incoming } => {
                &mut incoming
                    .get_mut(idx)
                    .unwrap_or_else(|| panic!("phi: no operand {}", idx))
                    .0
            }
            InstKind::Call { args, .. } => args
                .get_mut(idx)
                .unwrap_or_else(|| panic!("call: no operand {}", idx)),
            InstKind::ExtractValue { agg, .. } if idx == 0 => agg,
            InstKind::InsertValue { agg, value, .. } => match idx {
                0 => agg,
                1 => value,
                _ => panic!("insertvalue: no operand {}", idx),
            },
            InstKind::ExtractLane { vec, .. } if idx == 0 => vec,
            InstKind::InsertLane { vec, value, .. } => match idx {
                0 => vec,
                1 => value,
                _ => panic!("insertlane: no operand {}", idx),
            },
            InstKind::Shuffle { a, b, .. } => match idx {
                0 => a,
                1 => b,
                _ => panic!("shuffle: no operand {}", idx),
            },
            InstKind::VaArg { list } if idx == 0 => list,
            _ => panic!("{}: no operand {}", kind_name, idx),
        };
        *slot = new;
    }

    /// Visit every value operand, including a call's indirect callee and a
    /// phi's incoming values.
    pub fn for_each_operand(&self, mut f: impl FnMut(&Value)) {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::Icmp { lhs, rhs, .. }
            | InstKind::Fcmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                f(cond);
                f(on_true);
                f(on_false);
            }
            InstKind::Cast { value, .. } => f(value),
            InstKind::Gep { base, indices, .. } => {
                f(base);
                for idx in indices {
                    f(idx);
                }
            }
            InstKind::Alloca { count, .. } => {
                if let Some(count) = count {
                    f(count);
                }
            }
            InstKind::Load { addr } => f(addr),
            InstKind::Store { value, addr } => {
                f(value);
                f(addr);
            }
            InstKind::CmpXchg {
                addr,
                expected,
                new,
            } => {
                f(addr);
                f(expected);
                f(new);
            }
            InstKind::AtomicRmw { addr, value, .. } => {
                f(addr);
                f(value);
            }
            InstKind::Phi { incoming } => {
                for (v, _) in incoming {
                    f(v);
                }
            }
            InstKind::Call { callee, args } => {
                if let Callee::Indirect(target) = callee {
                    f(target);
                }
                for arg in args {
                    f(arg);
                }
            }
            InstKind::ExtractValue { agg, .. } => f(agg),
            InstKind::InsertValue { agg, value, .. } => {
                f(agg);
                f(value);
            }
            InstKind::ExtractLane { vec, .. } => f(vec),
            InstKind::InsertLane { vec, value, .. } => {
                f(vec);
                f(value);
            }
            InstKind::Shuffle { a, b, .. } => {
                f(a);
                f(b);
            }
            InstKind::VaArg { list } => f(list),
            InstKind::Fence | InstKind::LandingPad | InstKind::Nop => {}
        }
    }
}

// ============================================================================
// Terminators
// ============================================================================

/// A terminator ends a basic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional jump.
    Br { target: BlockId },

    /// Two-way conditional branch.
    CondBr {
        cond: Value,
        then_bb: BlockId,
        else_bb: BlockId,
        /// Branch-weight hint `(then, else)`, used by the split-block check
        /// to mark the corrective path as strongly not-taken.
        weights: Option<(u32, u32)>,
    },

    /// Multi-way switch on an integer selector.
    Switch {
        selector: Value,
        default: BlockId,
        cases: Vec<(i128, BlockId)>,
    },

    /// Computed jump through a label address.
    IndirectBr { addr: Value, targets: Vec<BlockId> },

    /// Return from the function.
    Ret { value: Option<Value> },

    /// Unreachable code.
    Unreachable,

    /// Call with exceptional continuation (refused by the hardeners).
    Invoke {
        callee: Callee,
        args: Vec<Value>,
        normal: BlockId,
        unwind: BlockId,
    },

    /// Resume exception propagation (refused by the hardeners).
    Resume { value: Value },
}

impl Terminator {
    /// Get all successor blocks, in branch order (duplicates preserved).
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br { target } => vec![*target],
            Terminator::CondBr {
                then_bb, else_bb, ..
            } => vec![*then_bb, *else_bb],
            Terminator::Switch { default, cases, .. } => {
                let mut succs: Vec<_> = cases.iter().map(|(_, bb)| *bb).collect();
                succs.push(*default);
                succs
            }
            Terminator::IndirectBr { targets, .. } => targets.clone(),
            Terminator::Ret { .. } | Terminator::Unreachable | Terminator::Resume { .. } => vec![],
            Terminator::Invoke { normal, unwind, .. } => vec![*normal, *unwind],
        }
    }

    /// The terminator's primary value operand: the branch condition, switch
    /// selector, indirect-branch address, or return value.
    pub fn value_operand(&self) -> Option<&Value> {
        match self {
            Terminator::CondBr { cond, .. } => Some(cond),
            Terminator::Switch { selector, .. } => Some(selector),
            Terminator::IndirectBr { addr, .. } => Some(addr),
            Terminator::Ret { value } => value.as_ref(),
            Terminator::Resume { value } => Some(value),
            _ => None,
        }
    }

    /// Replace the primary value operand. Panics if the terminator has none.
    pub fn set_value_operand(&mut self, new: Value) {
        match self {
            Terminator::CondBr { cond, .. } => *cond = new,
            Terminator::Switch { selector, .. } => *selector = new,
            Terminator::IndirectBr { addr, .. } => *addr = new,
            Terminator::Ret { value } => *value = Some(new),
            Terminator::Resume { value } => *value = new,
            other => panic!("{:?} has no value operand", other),
        }
    }

    /// Visit every value operand of the terminator.
    pub fn for_each_operand(&self, mut f: impl FnMut(&Value)) {
        match self {
            Terminator::CondBr { cond, .. } => f(cond),
            Terminator::Switch { selector, .. } => f(selector),
            Terminator::IndirectBr { addr, .. } => f(addr),
            Terminator::Ret { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            Terminator::Resume { value } => f(value),
            Terminator::Invoke { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    f(target);
                }
                for arg in args {
                    f(arg);
                }
            }
            Terminator::Br { .. } | Terminator::Unreachable => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
