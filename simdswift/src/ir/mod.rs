//! # IR Substrate
//!
//! A small typed SSA IR in the LLVM mould: functions of basic blocks,
//! arena-allocated instructions that *are* the SSA values, explicit
//! terminators, and a dominator tree for ordered traversal.
//!
//! The hardening passes rewrite this IR in place. Its design keeps the two
//! operations those passes lean on cheap and local:
//!
//! - positional insertion before/after any instruction ([`Builder`]);
//! - operand substitution by index ([`InstKind::set_operand`]).
//!
//! ## Module Structure
//!
//! - [`types`] - Types and entity IDs
//! - [`value`] - Operands and constants
//! - [`inst`] - The instruction and terminator enums
//! - [`module`] - Modules, functions, bodies, and the builder
//! - [`dom`] - Dominator tree
//! - [`display`] - Textual rendering

pub mod display;
pub mod dom;
pub mod inst;
pub mod module;
pub mod types;
pub mod value;

pub use display::FuncDisplay;
pub use dom::DominatorTree;
pub use inst::{
    BinOp, Callee, CastOp, FloatPred, InlineAsm, InstData, InstKind, IntPred, RmwOp, Terminator,
};
pub use module::{BlockData, Builder, FuncBody, Function, Module, Signature};
pub use types::{BlockId, FuncRef, InstId, Ty};
pub use value::{Const, ConstKind, Value};
