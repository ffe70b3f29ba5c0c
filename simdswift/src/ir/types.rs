//! # Core IR Types
//!
//! The type system of the IR the hardening passes operate on. It is a
//! deliberately small, LLVM-flavoured set: primitive scalars, opaque
//! pointers, fixed-width vectors, and anonymous structs (which only occur
//! at call boundaries).
//!
//! Pointers are opaque: they carry no pointee type. Instructions that need
//! an element type (`gep`, `alloca`, `load`) carry it themselves.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs
// ============================================================================

/// A unique identifier for a basic block within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    /// The entry block ID (always 0).
    pub const ENTRY: BlockId = BlockId(0);

    /// Create a new BlockId.
    pub const fn new(id: u32) -> Self {
        BlockId(id)
    }

    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// A unique identifier for an instruction within a function.
///
/// Instructions are arena-allocated in [`FuncBody::insts`]; the ID is the
/// arena index and stays valid for the lifetime of the body, even after the
/// instruction is unlinked from its block.
///
/// [`FuncBody::insts`]: super::module::FuncBody
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstId(pub u32);

impl InstId {
    /// Create a new InstId.
    pub const fn new(id: u32) -> Self {
        InstId(id)
    }

    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A reference to a function in a [`Module`], by index.
///
/// [`Module`]: super::module::Module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncRef(pub u32);

impl FuncRef {
    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Types
// ============================================================================

/// An IR type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// The empty type (function returns, stores).
    Void,
    /// An integer of the given bit width. `Int(1)` is the predicate type.
    Int(u32),
    /// 32-bit IEEE float.
    Float,
    /// 64-bit IEEE double.
    Double,
    /// An opaque pointer.
    Ptr,
    /// A fixed-width SIMD vector.
    Vector {
        /// Lane element type (always scalar).
        elem: Box<Ty>,
        /// Number of lanes.
        lanes: u32,
    },
    /// An anonymous struct. Only produced by calls returning aggregates.
    Struct(Vec<Ty>),
}

impl Ty {
    /// The 1-bit predicate type.
    pub fn i1() -> Ty {
        Ty::Int(1)
    }

    pub fn i8() -> Ty {
        Ty::Int(8)
    }

    pub fn i16() -> Ty {
        Ty::Int(16)
    }

    pub fn i32() -> Ty {
        Ty::Int(32)
    }

    pub fn i64() -> Ty {
        Ty::Int(64)
    }

    /// Build a vector type over a scalar element.
    pub fn vector(elem: Ty, lanes: u32) -> Ty {
        Ty::Vector {
            elem: Box::new(elem),
            lanes,
        }
    }

    /// Check if this is the void type.
    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }

    /// Check if this is any integer type.
    pub fn is_int(&self) -> bool {
        matches!(self, Ty::Int(_))
    }

    /// Check if this is an integer of the exact given width.
    pub fn is_int_width(&self, bits: u32) -> bool {
        matches!(self, Ty::Int(b) if *b == bits)
    }

    /// Check if this is the 1-bit predicate type.
    pub fn is_i1(&self) -> bool {
        self.is_int_width(1)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Ty::Float)
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Ty::Double)
    }

    /// Check if this is float or double.
    pub fn is_float_like(&self) -> bool {
        self.is_float() || self.is_double()
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Ty::Ptr)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Ty::Vector { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Ty::Struct(_))
    }

    /// Bit width of a primitive scalar. Pointers count as 64 bits; vectors,
    /// structs and void have no scalar width.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Ty::Int(bits) => Some(*bits),
            Ty::Float => Some(32),
            Ty::Double => Some(64),
            Ty::Ptr => Some(64),
            _ => None,
        }
    }

    /// Lane count, if this is a vector type.
    pub fn lanes(&self) -> Option<u32> {
        match self {
            Ty::Vector { lanes, .. } => Some(*lanes),
            _ => None,
        }
    }

    /// Lane element type, if this is a vector type.
    pub fn elem(&self) -> Option<&Ty> {
        match self {
            Ty::Vector { elem, .. } => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Int(bits) => write!(f, "i{}", bits),
            Ty::Float => write!(f, "float"),
            Ty::Double => write!(f, "double"),
            Ty::Ptr => write!(f, "ptr"),
            Ty::Vector { elem, lanes } => write!(f, "<{} x {}>", lanes, elem),
            Ty::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " }}")
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_display() {
        assert_eq!(format!("{}", BlockId::new(3)), "block3");
        assert_eq!(BlockId::ENTRY.index(), 0);
    }

    #[test]
    fn test_ty_predicates() {
        assert!(Ty::i1().is_i1());
        assert!(Ty::i1().is_int());
        assert!(!Ty::i8().is_i1());
        assert!(Ty::Float.is_float_like());
        assert!(Ty::Double.is_float_like());
        assert!(!Ty::i32().is_float_like());
        assert!(Ty::vector(Ty::i32(), 8).is_vector());
    }

    #[test]
    fn test_ty_bit_width() {
        assert_eq!(Ty::i8().bit_width(), Some(8));
        assert_eq!(Ty::Float.bit_width(), Some(32));
        assert_eq!(Ty::Double.bit_width(), Some(64));
        assert_eq!(Ty::Ptr.bit_width(), Some(64));
        assert_eq!(Ty::vector(Ty::i32(), 8).bit_width(), None);
        assert_eq!(Ty::Void.bit_width(), None);
    }

    #[test]
    fn test_ty_vector_accessors() {
        let v = Ty::vector(Ty::i64(), 4);
        assert_eq!(v.lanes(), Some(4));
        assert_eq!(v.elem(), Some(&Ty::i64()));
        assert_eq!(Ty::i64().lanes(), None);
    }

    #[test]
    fn test_ty_display() {
        assert_eq!(format!("{}", Ty::i32()), "i32");
        assert_eq!(format!("{}", Ty::vector(Ty::Float, 8)), "<8 x float>");
        assert_eq!(
            format!("{}", Ty::Struct(vec![Ty::i32(), Ty::Double])),
            "{ i32, double }"
        );
    }
}
