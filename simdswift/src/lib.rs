//! # SIMD-Swift Hardener
//!
//! Compiler passes that harden a program against single-event transient
//! faults in CPU datapath state by replicating every scalar value across
//! the lanes of a 256-bit SIMD register and inserting majority-voting
//! checks at the externally observable sync points (stores, branches,
//! calls, atomics, returns). The fault model assumes at most one corrupted
//! lane, so a majority vote always recovers the intended value.
//!
//! ## Pipeline
//!
//! ```text
//! IR module (JSON) -> harden (full | fp | native) -> IR module (JSON)
//!                  -> analyze ------------------> textual report
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use simdswift::ir::{BlockId, FuncBody, InstData, InstKind, Module, Signature, Terminator, Ty, Value};
//! use simdswift::harden::{harden_module, CheckConfig, Mode};
//! use simdswift::runtime_decls;
//!
//! let mut module = Module::new("example");
//! runtime_decls::declare_check_helpers(&mut module);
//!
//! let mut body = FuncBody::new();
//! let sum = body.push_inst(
//!     BlockId::ENTRY,
//!     InstData::new(
//!         InstKind::Binary {
//!             op: simdswift::ir::BinOp::Add,
//!             lhs: Value::Arg(0),
//!             rhs: Value::Arg(1),
//!         },
//!         Ty::i32(),
//!     ),
//! );
//! body.set_term(BlockId::ENTRY, Terminator::Ret { value: Some(Value::Inst(sum)) });
//! module.define("add", Signature::new(vec![Ty::i32(), Ty::i32()], Ty::i32()), body);
//!
//! harden_module(&mut module, Mode::Full, &CheckConfig::default()).unwrap();
//! ```
//!
//! ## Module Overview
//!
//! - [`ir`] - The typed SSA IR the passes operate on
//! - [`harden`] - The full, FP-only and native-cost pass variants
//! - [`analyze`] - The read-only instruction statistics pass
//! - [`runtime_decls`] - Declarations of the link-time runtime helpers

pub mod analyze;
pub mod harden;
pub mod ir;

pub use analyze::{analyze, AnalyzeOptions, ModuleStats};
pub use harden::{harden_module, run_native, CheckConfig, HardenError, Mode};

/// Declarations for the link-time runtime helpers, for callers assembling
/// modules programmatically (the helpers themselves live in the runtime
/// library and are only called by name).
pub mod runtime_decls {
    use crate::ir::{Module, Signature, Ty};

    /// Declare the majority-vote helpers used by the hardening variants.
    pub fn declare_check_helpers(module: &mut Module) {
        let pred = Ty::vector(Ty::i64(), 4);
        module.get_or_declare("SIMDSWIFT_exit", Signature::new(vec![], Ty::Void));
        module.get_or_declare(
            "SIMDSWIFT_mask_i64",
            Signature::new(vec![pred.clone()], pred),
        );
        for (name, elem, lanes) in [
            ("SIMDSWIFT_check_double", Ty::Double, 4),
            ("SIMDSWIFT_check_float", Ty::Float, 8),
            ("SIMDSWIFT_check_i64", Ty::i64(), 4),
            ("SIMDSWIFT_check_i32", Ty::i32(), 8),
            ("SIMDSWIFT_check_i16", Ty::i16(), 16),
            ("SIMDSWIFT_check_i8", Ty::i8(), 32),
        ] {
            let shadow = Ty::vector(elem, lanes);
            module.get_or_declare(name, Signature::new(vec![shadow.clone()], shadow));
        }
    }

    /// Declare the opaque markers used by the native-cost stub.
    pub fn declare_dummy_markers(module: &mut Module) {
        for name in [
            "SIMDSWIFT_dummy_extract",
            "SIMDSWIFT_dummy_broadcast",
            "SIMDSWIFT_dummy_ptest",
        ] {
            module.get_or_declare(name, Signature::new(vec![], Ty::Void));
        }
    }
}
