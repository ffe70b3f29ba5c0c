//! # Values and Constants
//!
//! SSA operands. Instructions *are* the values in this IR: a [`Value`]
//! either names an instruction's result, a function argument, an inline
//! constant, or one of the opaque kinds (function symbols, block labels)
//! for which no shadow can exist.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{BlockId, FuncRef, InstId, Ty};

// ============================================================================
// Constants
// ============================================================================

/// A typed constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Const {
    /// The type of the constant.
    pub ty: Ty,
    /// The constant value.
    pub kind: ConstKind,
}

/// The kind of a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstKind {
    /// Integer constant (also used for `i1`: 0 or 1).
    Int(i128),
    /// Floating-point constant (float or double).
    Float(f64),
    /// Null pointer.
    Null,
    /// Undefined value of any type.
    Undef,
    /// A vector with every lane equal to the given scalar constant.
    Splat(Box<Const>),
}

impl Const {
    /// An integer constant of the given width.
    pub fn int(bits: u32, value: i128) -> Const {
        Const {
            ty: Ty::Int(bits),
            kind: ConstKind::Int(value),
        }
    }

    /// A 1-bit predicate constant.
    pub fn bool(value: bool) -> Const {
        Const::int(1, value as i128)
    }

    pub fn float(value: f64) -> Const {
        Const {
            ty: Ty::Float,
            kind: ConstKind::Float(value),
        }
    }

    pub fn double(value: f64) -> Const {
        Const {
            ty: Ty::Double,
            kind: ConstKind::Float(value),
        }
    }

    /// The null pointer constant.
    pub fn null() -> Const {
        Const {
            ty: Ty::Ptr,
            kind: ConstKind::Null,
        }
    }

    /// An undefined value of the given type.
    pub fn undef(ty: Ty) -> Const {
        Const {
            ty,
            kind: ConstKind::Undef,
        }
    }

    /// A vector constant with all `lanes` lanes equal to `self`.
    pub fn splat(self, lanes: u32) -> Const {
        Const {
            ty: Ty::vector(self.ty.clone(), lanes),
            kind: ConstKind::Splat(Box::new(self)),
        }
    }

    /// The `<4 x i64>` all-ones mask the zero-predicate tests compare
    /// against.
    pub fn all_ones_mask() -> Const {
        Const::int(64, -1).splat(4)
    }

    /// Sign-extend a 1-bit constant to `i64` (true becomes all-ones).
    ///
    /// Panics if the constant is not an `i1` integer.
    pub fn sext_i1_to_i64(&self) -> Const {
        match (&self.ty, &self.kind) {
            (Ty::Int(1), ConstKind::Int(v)) => Const::int(64, if *v != 0 { -1 } else { 0 }),
            (Ty::Int(1), ConstKind::Undef) => Const::undef(Ty::i64()),
            _ => panic!("sext_i1_to_i64 on non-i1 constant {}", self),
        }
    }

    /// The scalar lane of a splat constant, if this is one.
    pub fn splat_elem(&self) -> Option<&Const> {
        match &self.kind {
            ConstKind::Splat(elem) => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConstKind::Int(v) => write!(f, "{} {}", self.ty, v),
            ConstKind::Float(v) => write!(f, "{} {}", self.ty, v),
            ConstKind::Null => write!(f, "{} null", self.ty),
            ConstKind::Undef => write!(f, "{} undef", self.ty),
            ConstKind::Splat(elem) => write!(f, "{} splat({})", self.ty, elem),
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// An SSA operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The result of an instruction.
    Inst(InstId),
    /// A function argument, by index.
    Arg(u32),
    /// An inline constant.
    Const(Const),
    /// A function symbol (opaque: never shadowed).
    Func(FuncRef),
    /// A basic-block label (opaque: never shadowed).
    Block(BlockId),
}

impl Value {
    /// Convenience constructor for constant operands.
    pub fn from_const(c: Const) -> Value {
        Value::Const(c)
    }

    /// Get the instruction ID if this value is an instruction result.
    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    /// Check if this value is a constant.
    pub fn is_const(&self) -> bool {
        matches!(self, Value::Const(_))
    }

    /// Get the constant if this value is one.
    pub fn as_const(&self) -> Option<&Const> {
        match self {
            Value::Const(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Const> for Value {
    fn from(c: Const) -> Value {
        Value::Const(c)
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Value {
        Value::Inst(id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_int() {
        let c = Const::int(32, 7);
        assert_eq!(c.ty, Ty::i32());
        assert!(matches!(c.kind, ConstKind::Int(7)));
    }

    #[test]
    fn test_const_splat() {
        let s = Const::int(32, 1).splat(8);
        assert_eq!(s.ty, Ty::vector(Ty::i32(), 8));
        assert_eq!(s.splat_elem(), Some(&Const::int(32, 1)));
    }

    #[test]
    fn test_all_ones_mask() {
        let m = Const::all_ones_mask();
        assert_eq!(m.ty, Ty::vector(Ty::i64(), 4));
        assert_eq!(m.splat_elem(), Some(&Const::int(64, -1)));
    }

    #[test]
    fn test_sext_i1() {
        assert_eq!(Const::bool(true).sext_i1_to_i64(), Const::int(64, -1));
        assert_eq!(Const::bool(false).sext_i1_to_i64(), Const::int(64, 0));
    }

    #[test]
    fn test_value_accessors() {
        let v = Value::Inst(InstId::new(3));
        assert_eq!(v.as_inst(), Some(InstId::new(3)));
        assert!(!v.is_const());

        let c: Value = Const::bool(true).into();
        assert!(c.is_const());
        assert!(c.as_inst().is_none());
    }

    #[test]
    fn test_const_display() {
        assert_eq!(format!("{}", Const::int(32, 5)), "i32 5");
        assert_eq!(
            format!("{}", Const::int(16, 2).splat(16)),
            "<16 x i16> splat(i16 2)"
        );
    }
}
