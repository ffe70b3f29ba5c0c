//! Shadow typing and the value-to-shadow map.
//!
//! Every scalar type maps to the vector type that fills the 256-bit SIMD
//! register exactly, so a single zero-predicate test can inspect any shadow:
//!
//! | scalar | shadow |
//! |--------|--------|
//! | `i8`  | `<32 x i8>` |
//! | `i16` | `<16 x i16>` |
//! | `i32` | `<8 x i32>` |
//! | `i64`, `ptr` | 4 lanes |
//! | `float` | `<8 x float>` |
//! | `double` | `<4 x double>` |
//! | `i1` | `<4 x i64>` (widened) |
//!
//! The predicate type has no natural 256-bit vector; it is lifted to four
//! 64-bit lanes so every predicate shadow is testable by the same
//! instruction.

use std::collections::HashMap;

use crate::ir::{FuncBody, InstId, InstKind, Signature, Ty, Value};

use super::{HardenError, Mode};

// ============================================================================
// Shadow typing
// ============================================================================

/// The canonical lane count for a scalar type under the full variant, or
/// `None` for kinds that have no shadow (vectors, aggregates, void).
///
/// Integers of non-canonical width are handled conservatively as 4 lanes,
/// with a warning.
pub fn shadow_lanes(ty: &Ty) -> Option<u32> {
    match ty {
        Ty::Int(1) => Some(4),
        Ty::Int(bits @ (8 | 16 | 32 | 64)) => Some(256 / bits),
        Ty::Int(bits) => {
            tracing::warn!(width = *bits, "handling illegal integer type as 4 lanes");
            Some(4)
        }
        Ty::Ptr => Some(4),
        Ty::Double => Some(4),
        Ty::Float => Some(8),
        _ => None,
    }
}

/// The shadow vector type for a scalar under the full variant.
pub fn shadow_ty(ty: &Ty) -> Option<Ty> {
    if ty.is_i1() {
        return Some(Ty::vector(Ty::i64(), 4));
    }
    shadow_lanes(ty).map(|lanes| Ty::vector(ty.clone(), lanes))
}

/// Check whether a type already is a canonical-width shadow vector.
pub fn is_shadow_ty(ty: &Ty) -> bool {
    match ty {
        Ty::Vector { elem, lanes } => shadow_lanes(elem) == Some(*lanes),
        _ => false,
    }
}

/// Lane count under the FP-only variant: floats and doubles only.
pub fn fp_shadow_lanes(ty: &Ty) -> Option<u32> {
    match ty {
        Ty::Double => Some(4),
        Ty::Float => Some(8),
        _ => None,
    }
}

/// The shadow vector type under the FP-only variant.
pub fn fp_shadow_ty(ty: &Ty) -> Option<Ty> {
    fp_shadow_lanes(ty).map(|lanes| Ty::vector(ty.clone(), lanes))
}

/// Check whether a type is a canonical FP shadow vector.
pub fn is_fp_shadow_ty(ty: &Ty) -> bool {
    match ty {
        Ty::Vector { elem, lanes } => fp_shadow_lanes(elem) == Some(*lanes),
        _ => false,
    }
}

// ============================================================================
// Shadow map
// ============================================================================

/// Keys of the shadow map: only instruction results and function arguments
/// get entries. Constants are splatted on demand; opaque values never map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ShadowKey {
    Inst(InstId),
    Arg(u32),
}

impl ShadowKey {
    fn of(v: &Value) -> Option<ShadowKey> {
        match v {
            Value::Inst(id) => Some(ShadowKey::Inst(*id)),
            Value::Arg(i) => Some(ShadowKey::Arg(*i)),
            _ => None,
        }
    }
}

/// A one-to-one partial map from original SSA values to their shadows.
///
/// Insertion is single-assignment: registering a second shadow for the same
/// value is a programmer error and fails loudly.
pub struct ShadowMap {
    mode: Mode,
    map: HashMap<ShadowKey, Value>,
}

impl ShadowMap {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            map: HashMap::new(),
        }
    }

    /// Register `shadow` as the shadow of `v`.
    pub fn add(&mut self, body: &FuncBody, v: &Value, shadow: Value) -> Result<(), HardenError> {
        let key = ShadowKey::of(v)
            .unwrap_or_else(|| panic!("cannot shadow value kind {}", body.value_label(v)));
        if self.map.insert(key, shadow).is_some() {
            return Err(HardenError::DuplicateShadow(body.value_label(v)));
        }
        Ok(())
    }

    /// Presence test, without synthesis.
    pub fn has(&self, v: &Value) -> bool {
        ShadowKey::of(v).is_some_and(|k| self.map.contains_key(&k))
    }

    /// Produce a shadow for `v` suitable for use by the instruction
    /// described by `user`.
    ///
    /// Returns `Ok(None)` for opaque values (labels, function symbols,
    /// landing-pad results), and in FP-only mode also for any non-FP value
    /// without an existing shadow, which is how integer computation stays
    /// scalar. Constants synthesize a splat on demand; `for_gep` forces the
    /// splat to 4 lanes because pointer shadows have 4 lanes.
    pub fn get(
        &self,
        body: &FuncBody,
        sig: &Signature,
        v: &Value,
        user: &str,
        for_gep: bool,
    ) -> Result<Option<Value>, HardenError> {
        let ty = body.value_ty(sig, v);
        match self.mode {
            Mode::Full => self.get_full(body, v, &ty, user, for_gep),
            Mode::FpOnly => self.get_fp(body, v, &ty, user),
        }
    }

    fn get_full(
        &self,
        body: &FuncBody,
        v: &Value,
        ty: &Ty,
        user: &str,
        for_gep: bool,
    ) -> Result<Option<Value>, HardenError> {
        if is_shadow_ty(ty) {
            return Ok(Some(v.clone()));
        }

        if let Value::Const(c) = v {
            let c = if c.ty.is_i1() {
                c.sext_i1_to_i64()
            } else {
                c.clone()
            };
            let mut lanes = shadow_lanes(&c.ty)
                .ok_or_else(|| HardenError::UnsupportedType(c.ty.to_string()))?;
            if for_gep {
                // address computation mixes pointer and index lanes, and
                // pointer shadows have 4
                lanes = 4;
            }
            return Ok(Some(Value::Const(c.splat(lanes))));
        }

        if Self::is_opaque(body, v) {
            return Ok(None);
        }

        match ShadowKey::of(v).and_then(|k| self.map.get(&k)) {
            Some(shadow) => Ok(Some(shadow.clone())),
            None => Err(HardenError::MissingShadow {
                value: body.value_label(v),
                user: user.to_string(),
            }),
        }
    }

    fn get_fp(
        &self,
        body: &FuncBody,
        v: &Value,
        ty: &Ty,
        user: &str,
    ) -> Result<Option<Value>, HardenError> {
        if is_fp_shadow_ty(ty) {
            return Ok(Some(v.clone()));
        }

        if Self::is_opaque(body, v) {
            return Ok(None);
        }

        if ty.is_i1() {
            // predicates from fcmp have shadows; those from integer
            // comparisons do not, and the branch stays scalar
            return Ok(ShadowKey::of(v)
                .and_then(|k| self.map.get(&k))
                .cloned());
        }

        if !ty.is_float_like() {
            return Ok(None);
        }

        if let Value::Const(c) = v {
            let lanes = fp_shadow_lanes(&c.ty).expect("checked float-like above");
            return Ok(Some(Value::Const(c.clone().splat(lanes))));
        }

        match ShadowKey::of(v).and_then(|k| self.map.get(&k)) {
            Some(shadow) => Ok(Some(shadow.clone())),
            None => Err(HardenError::MissingShadow {
                value: body.value_label(v),
                user: user.to_string(),
            }),
        }
    }

    /// Values for which a shadow cannot and should not exist.
    fn is_opaque(body: &FuncBody, v: &Value) -> bool {
        match v {
            Value::Func(_) | Value::Block(_) => true,
            Value::Inst(id) => matches!(body.inst(*id).kind, InstKind::LandingPad),
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, Const, FuncRef, InstData};

    #[test]
    fn test_shadow_lanes_table() {
        assert_eq!(shadow_lanes(&Ty::i8()), Some(32));
        assert_eq!(shadow_lanes(&Ty::i16()), Some(16));
        assert_eq!(shadow_lanes(&Ty::i32()), Some(8));
        assert_eq!(shadow_lanes(&Ty::i64()), Some(4));
        assert_eq!(shadow_lanes(&Ty::Ptr), Some(4));
        assert_eq!(shadow_lanes(&Ty::Float), Some(8));
        assert_eq!(shadow_lanes(&Ty::Double), Some(4));
        assert_eq!(shadow_lanes(&Ty::i1()), Some(4));
        assert_eq!(shadow_lanes(&Ty::Void), None);
        assert_eq!(shadow_lanes(&Ty::vector(Ty::i32(), 8)), None);
    }

    #[test]
    fn test_illegal_width_is_conservative() {
        assert_eq!(shadow_lanes(&Ty::Int(24)), Some(4));
        assert_eq!(shadow_ty(&Ty::Int(24)), Some(Ty::vector(Ty::Int(24), 4)));
    }

    #[test]
    fn test_predicate_widening() {
        assert_eq!(shadow_ty(&Ty::i1()), Some(Ty::vector(Ty::i64(), 4)));
    }

    #[test]
    fn test_is_shadow_ty() {
        assert!(is_shadow_ty(&Ty::vector(Ty::i32(), 8)));
        assert!(is_shadow_ty(&Ty::vector(Ty::Double, 4)));
        assert!(!is_shadow_ty(&Ty::vector(Ty::i32(), 4)));
        assert!(!is_shadow_ty(&Ty::i32()));
    }

    #[test]
    fn test_fp_shadow_narrowing() {
        assert_eq!(fp_shadow_ty(&Ty::Float), Some(Ty::vector(Ty::Float, 8)));
        assert_eq!(fp_shadow_ty(&Ty::Double), Some(Ty::vector(Ty::Double, 4)));
        assert_eq!(fp_shadow_ty(&Ty::i32()), None);
        assert_eq!(fp_shadow_ty(&Ty::Ptr), None);
    }

    fn test_body() -> (FuncBody, Signature) {
        (FuncBody::new(), Signature::new(vec![Ty::i32(), Ty::Double], Ty::Void))
    }

    #[test]
    fn test_map_single_assignment() {
        let (body, _) = test_body();
        let mut map = ShadowMap::new(Mode::Full);
        let shadow = Value::Const(Const::int(32, 0).splat(8));
        map.add(&body, &Value::Arg(0), shadow.clone()).unwrap();
        assert!(map.has(&Value::Arg(0)));
        assert!(!map.has(&Value::Arg(1)));
        let err = map.add(&body, &Value::Arg(0), shadow).unwrap_err();
        assert!(matches!(err, HardenError::DuplicateShadow(_)));
    }

    #[test]
    fn test_get_constant_splats() {
        let (body, sig) = test_body();
        let map = ShadowMap::new(Mode::Full);
        let c = Value::Const(Const::int(32, 7));
        let shadow = map.get(&body, &sig, &c, "add", false).unwrap().unwrap();
        assert_eq!(
            shadow,
            Value::Const(Const::int(32, 7).splat(8))
        );
    }

    #[test]
    fn test_get_constant_for_gep_forces_four_lanes() {
        let (body, sig) = test_body();
        let map = ShadowMap::new(Mode::Full);
        let c = Value::Const(Const::int(32, 3));
        let shadow = map.get(&body, &sig, &c, "gep", true).unwrap().unwrap();
        assert_eq!(shadow, Value::Const(Const::int(32, 3).splat(4)));
    }

    #[test]
    fn test_get_i1_constant_sign_extends() {
        let (body, sig) = test_body();
        let map = ShadowMap::new(Mode::Full);
        let c = Value::Const(Const::bool(true));
        let shadow = map.get(&body, &sig, &c, "br", false).unwrap().unwrap();
        assert_eq!(shadow, Value::Const(Const::int(64, -1).splat(4)));
    }

    #[test]
    fn test_get_opaque_returns_none() {
        let (body, sig) = test_body();
        let map = ShadowMap::new(Mode::Full);
        assert!(map
            .get(&body, &sig, &Value::Func(FuncRef(0)), "call", false)
            .unwrap()
            .is_none());
        assert!(map
            .get(&body, &sig, &Value::Block(BlockId::new(1)), "br", false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_get_missing_is_an_error_in_full_mode() {
        let (body, sig) = test_body();
        let map = ShadowMap::new(Mode::Full);
        let err = map
            .get(&body, &sig, &Value::Arg(0), "store", false)
            .unwrap_err();
        assert!(matches!(err, HardenError::MissingShadow { .. }));
    }

    #[test]
    fn test_fp_mode_ignores_integers() {
        let (body, sig) = test_body();
        let map = ShadowMap::new(Mode::FpOnly);
        // integer argument without a shadow: None, not an error
        assert!(map
            .get(&body, &sig, &Value::Arg(0), "add", false)
            .unwrap()
            .is_none());
        // float-like argument without a shadow: that *is* an error
        assert!(map
            .get(&body, &sig, &Value::Arg(1), "fadd", false)
            .is_err());
    }

    #[test]
    fn test_fp_mode_already_shadow_passthrough() {
        let (mut body, sig) = test_body();
        let id = body.push_inst(
            BlockId::ENTRY,
            InstData::new(
                InstKind::Load {
                    addr: Value::Arg(0),
                },
                Ty::vector(Ty::Double, 4),
            ),
        );
        let map = ShadowMap::new(Mode::FpOnly);
        let v = Value::Inst(id);
        assert_eq!(
            map.get(&body, &sig, &v, "fadd", false).unwrap(),
            Some(v.clone())
        );
    }
}
