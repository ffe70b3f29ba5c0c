//! Runtime helper resolution and the ignored-function set.
//!
//! The majority-vote helpers live in a link-time runtime library; the pass
//! only calls them by name. Resolution happens once per module and refuses
//! to run if anything is missing. The zero-predicate test intrinsics are
//! declared on demand instead, mirroring how a host compiler materializes
//! intrinsic declarations.

use crate::ir::{FuncRef, Module, Signature, Ty};

use super::{HardenError, Mode};

/// Prefix of every symbol belonging to the hardener's runtime.
pub const RUNTIME_PREFIX: &str = "SIMDSWIFT";

/// Prefix of host intrinsics.
pub const INTRINSIC_PREFIX: &str = "intrin.";

/// Transactional-memory entry points plus the `__dummy__` sentinel; never
/// shadowed, passed through untouched.
const IGNORED_FUNCS: &[&str] = &[
    "tx_cond_start",
    "tx_start",
    "tx_end",
    "tx_abort",
    "tx_increment",
    "tx_pthread_mutex_lock",
    "tx_pthread_mutex_unlock",
    "__dummy__",
];

/// Check whether calls to (and the definition of) a function are outside
/// the hardener's scope.
///
/// Lifetime intrinsics are the exception among intrinsics: they reference
/// program values, so their operands must still be re-scalarised.
pub fn is_ignored_name(name: &str) -> bool {
    if name.starts_with("intrin.lifetime.start") || name.starts_with("intrin.lifetime.end") {
        return false;
    }
    name.starts_with(INTRINSIC_PREFIX)
        || name.starts_with(RUNTIME_PREFIX)
        || IGNORED_FUNCS.contains(&name)
}

/// Check whether a direct callee is the byte-swap intrinsic, which gets the
/// widened 256-bit treatment.
pub fn is_bswap_name(name: &str) -> bool {
    name.starts_with("intrin.bswap")
}

/// Resolved references to the runtime's majority-vote helpers.
///
/// The integer helpers are only required (and only resolved) by the full
/// variant; the FP-only variant corrects just floats, doubles and the
/// `4 x i64` predicate shadows.
#[derive(Debug)]
pub struct Helpers {
    /// `SIMDSWIFT_exit`: terminates on uncorrectable divergence. Called by
    /// the runtime itself; the pass only verifies it is linked.
    #[allow(dead_code)]
    pub exit: FuncRef,
    /// `SIMDSWIFT_mask_i64`: majority-corrects a `4 x i64` predicate shadow.
    pub mask_i64: FuncRef,
    pub check_double: FuncRef,
    pub check_float: FuncRef,
    pub check_i64: Option<FuncRef>,
    pub check_i32: Option<FuncRef>,
    pub check_i16: Option<FuncRef>,
    pub check_i8: Option<FuncRef>,
}

impl Helpers {
    /// Look up the helpers required by `mode`. Fails if any is missing.
    pub fn resolve(module: &Module, mode: Mode) -> Result<Self, HardenError> {
        let find = |name: &'static str| {
            module
                .get_func(name)
                .ok_or(HardenError::MissingHelper(name))
        };

        let exit = find("SIMDSWIFT_exit")?;
        let mask_i64 = find("SIMDSWIFT_mask_i64")?;
        let check_double = find("SIMDSWIFT_check_double")?;
        let check_float = find("SIMDSWIFT_check_float")?;

        let (check_i64, check_i32, check_i16, check_i8) = match mode {
            Mode::Full => (
                Some(find("SIMDSWIFT_check_i64")?),
                Some(find("SIMDSWIFT_check_i32")?),
                Some(find("SIMDSWIFT_check_i16")?),
                Some(find("SIMDSWIFT_check_i8")?),
            ),
            Mode::FpOnly => (None, None, None, None),
        };

        Ok(Self {
            exit,
            mask_i64,
            check_double,
            check_float,
            check_i64,
            check_i32,
            check_i16,
            check_i8,
        })
    }
}

/// Intrinsic declarations the rewriter materializes: the 256-bit
/// zero-predicate tests and the widened byte swap.
pub struct Intrinsics {
    /// `(shadow, mask) -> i32`: 1 iff `shadow & mask` is all zero.
    pub ptestz: FuncRef,
    /// `(shadow, mask) -> i32`: 1 iff `shadow & mask` is neither all zero
    /// nor all of `mask` (i.e. the lanes disagree).
    pub ptestnzc: FuncRef,
    /// `i256 -> i256` byte swap over the whole shadow register.
    pub bswap256: FuncRef,
}

impl Intrinsics {
    /// Declare the intrinsics if they are not present yet.
    pub fn ensure(module: &mut Module) -> Self {
        let pred = Ty::vector(Ty::i64(), 4);
        let ptest_sig = Signature::new(vec![pred.clone(), pred], Ty::i32());
        let bswap_sig = Signature::new(vec![Ty::Int(256)], Ty::Int(256));
        Self {
            ptestz: module.get_or_declare("intrin.ptestz.256", ptest_sig.clone()),
            ptestnzc: module.get_or_declare("intrin.ptestnzc.256", ptest_sig),
            bswap256: module.get_or_declare("intrin.bswap.i256", bswap_sig),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
