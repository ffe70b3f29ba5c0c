//! # SIMD Hardening Passes
//!
//! Rewrites every function so scalar computation is replicated across the
//! lanes of 256-bit SIMD shadow values, with majority-voting checks at the
//! externally observable sync points: stores, branches, calls, atomics and
//! returns. The fault model is a single corrupted lane; the inserted checks
//! restore the majority value before it can escape.
//!
//! Three coordinated variants share the core:
//!
//! - [`Mode::Full`] replicates every scalar type (integers, floats,
//!   doubles, pointers, predicates);
//! - [`Mode::FpOnly`] replicates only float/double computation and leaves
//!   integer and pointer code scalar, interoperating at the boundaries;
//! - the native-cost stub ([`native`]) inserts opaque marker calls at the
//!   same sync points so a baseline pays the encoding cost without the
//!   fault-tolerance benefit.
//!
//! ## Per-function pipeline
//!
//! 1. resolve the runtime check helpers and declare the predicate-test
//!    intrinsics ([`helpers`]);
//! 2. walk blocks in dominator-tree pre-order (unreachable blocks after, in
//!    natural order), rewriting each instruction and queueing deferred
//!    work ([`full`], [`fp`]);
//! 3. bind the incoming values of the deferred shadow phis ([`transform`]);
//! 4. inject the queued majority-vote checks ([`checks`]);
//! 5. delete the dead scalar originals in reverse insertion order.

pub mod checks;
pub mod fp;
pub mod full;
pub mod helpers;
pub mod native;
pub mod shadow;
pub mod transform;

use thiserror::Error;

use crate::ir::Module;
use helpers::{is_ignored_name, Helpers, Intrinsics};
use transform::Transformer;

pub use native::{run_native, NativeMarkers};
pub use shadow::ShadowMap;

/// Which hardening variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Replicate all scalar types.
    Full,
    /// Replicate only float/double computation.
    FpOnly,
}

/// Check-elision flags, one per sync-point category.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckConfig {
    /// Disable absolutely all checks.
    pub no_check_all: bool,
    /// Disable checks on branches.
    pub no_check_branch: bool,
    /// Disable checks on loads.
    pub no_check_load: bool,
    /// Disable checks on stores.
    pub no_check_store: bool,
    /// Disable checks on atomics (cmpxchg, atomicrmw).
    pub no_check_atomic: bool,
    /// Disable checks on function calls.
    pub no_check_call: bool,
}

/// A fatal hardening failure. Anything the rewriter cannot transform
/// faithfully refuses the whole function rather than approximating.
#[derive(Debug, Error)]
pub enum HardenError {
    #[error("runtime helper `{0}` is not found (requires linked runtime)")]
    MissingHelper(&'static str),

    #[error("value already has a shadow: {0}")]
    DuplicateShadow(String),

    #[error("value {value} has no shadow (required by `{user}`)")]
    MissingShadow { value: String, user: String },

    #[error("do not know how to work with exception control flow: {0}")]
    NonLocalControl(String),

    #[error("do not know how to transform vector instruction in input: {0}")]
    VectorInput(String),

    #[error("cannot handle non-empty inline assembly: {0}")]
    InlineAsm(String),

    #[error("do not know how to transform cmpxchg in the FP-only variant: {0}")]
    FpCmpXchg(String),

    #[error("cannot shadow values of type `{0}`")]
    UnsupportedType(String),

    #[error("branch condition shadow is not an instruction: {0}")]
    BadBranchShadow(String),

    #[error("could not find shadow phi to rewire for {0}")]
    MissingShadowPhi(String),
}

/// Run one of the hardening variants over every eligible function.
///
/// Functions whose names fall in the ignored set (intrinsics, the
/// hardener's own runtime, the denylist) are left untouched.
pub fn harden_module(
    module: &mut Module,
    mode: Mode,
    cfg: &CheckConfig,
) -> Result<(), HardenError> {
    let pass = match mode {
        Mode::Full => "avxswift",
        Mode::FpOnly => "avxfloatswift",
    };
    tracing::info!(pass, module = %module.name, "running pass");

    let helpers = Helpers::resolve(module, mode)?;
    let intrinsics = Intrinsics::ensure(module);
    let names: Vec<String> = module.funcs.iter().map(|f| f.name.clone()).collect();

    for idx in 0..module.funcs.len() {
        if is_ignored_name(&module.funcs[idx].name) {
            continue;
        }
        let Some(mut body) = module.funcs[idx].body.take() else {
            continue;
        };
        let func_name = names[idx].clone();
        let sig = module.funcs[idx].sig.clone();
        tracing::debug!(func = %func_name, "hardening function");

        let result = Transformer::new(
            mode, &mut body, &sig, &func_name, &names, &helpers, &intrinsics, cfg,
        )
        .run();

        // Put the body back before propagating so the module stays whole
        // even when the pass aborts.
        module.funcs[idx].body = Some(body);
        result?;
    }
    Ok(())
}
