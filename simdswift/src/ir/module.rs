//! # Modules, Functions and the Instruction Builder
//!
//! A [`Module`] is a flat list of functions; a function without a body is an
//! external declaration (the runtime check helpers and intrinsics appear this
//! way). A [`FuncBody`] arena-allocates its instructions and threads them
//! through per-block instruction lists, so passes can unlink, insert and
//! reorder without invalidating IDs.
//!
//! The [`Builder`] is a positional insertion cursor. The rewriting passes use
//! one cursor *before* the instruction being rewritten for setup code
//! (extracts, splats, predicate widening) and one *after* it for post-hoc
//! replication.

use serde::{Deserialize, Serialize};

use super::inst::{Callee, CastOp, InstData, InstKind, Terminator};
use super::types::{BlockId, FuncRef, InstId, Ty};
use super::value::{Const, ConstKind, Value};

// ============================================================================
// Module level
// ============================================================================

/// A function signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Parameter types.
    pub params: Vec<Ty>,
    /// Return type (`Void` for none).
    pub ret: Ty,
    /// Whether the function takes variadic arguments.
    pub varargs: bool,
}

impl Signature {
    pub fn new(params: Vec<Ty>, ret: Ty) -> Self {
        Self {
            params,
            ret,
            varargs: false,
        }
    }
}

/// A function: a name, a signature, and (for definitions) a body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub sig: Signature,
    /// `None` for external declarations.
    pub body: Option<FuncBody>,
}

impl Function {
    /// Check if this is a declaration without a body.
    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }
}

/// A whole IR module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub funcs: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            funcs: Vec::new(),
        }
    }

    /// Look up a function by name.
    pub fn get_func(&self, name: &str) -> Option<FuncRef> {
        self.funcs
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncRef(i as u32))
    }

    /// Add an external declaration and return its reference.
    pub fn declare(&mut self, name: impl Into<String>, sig: Signature) -> FuncRef {
        let r = FuncRef(self.funcs.len() as u32);
        self.funcs.push(Function {
            name: name.into(),
            sig,
            body: None,
        });
        r
    }

    /// Add a function definition and return its reference.
    pub fn define(&mut self, name: impl Into<String>, sig: Signature, body: FuncBody) -> FuncRef {
        let r = FuncRef(self.funcs.len() as u32);
        self.funcs.push(Function {
            name: name.into(),
            sig,
            body: Some(body),
        });
        r
    }

    /// Look up a declaration by name, adding it if absent.
    pub fn get_or_declare(&mut self, name: &str, sig: Signature) -> FuncRef {
        match self.get_func(name) {
            Some(r) => r,
            None => self.declare(name, sig),
        }
    }

    pub fn func(&self, r: FuncRef) -> &Function {
        &self.funcs[r.index()]
    }

    /// The name of the referenced function.
    pub fn func_name(&self, r: FuncRef) -> &str {
        &self.funcs[r.index()].name
    }
}

// ============================================================================
// Function bodies
// ============================================================================

/// A basic block: an ordered list of instruction IDs and a terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    /// Instructions, in execution order.
    pub insts: Vec<InstId>,
    /// The terminator; `None` only while the block is under construction.
    pub term: Option<Terminator>,
}

impl BlockData {
    pub fn new() -> Self {
        Self {
            insts: Vec::new(),
            term: None,
        }
    }
}

impl Default for BlockData {
    fn default() -> Self {
        Self::new()
    }
}

/// A function body: basic blocks over an instruction arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncBody {
    /// The basic blocks; `blocks[0]` is the entry.
    pub blocks: Vec<BlockData>,
    /// Instruction arena, indexed by [`InstId`]. Removed instructions stay
    /// in the arena as [`InstKind::Nop`] tombstones.
    pub insts: Vec<InstData>,
}

impl FuncBody {
    /// Create a body with a single empty entry block.
    pub fn new() -> Self {
        Self {
            blocks: vec![BlockData::new()],
            insts: Vec::new(),
        }
    }

    /// Allocate a new empty basic block.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BlockData::new());
        id
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.index()]
    }

    /// All block IDs in natural (creation) order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId::new)
    }

    pub fn inst(&self, id: InstId) -> &InstData {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut InstData {
        &mut self.insts[id.index()]
    }

    /// Allocate an instruction in the arena without placing it in a block.
    pub fn add_inst(&mut self, data: InstData) -> InstId {
        let id = InstId::new(self.insts.len() as u32);
        self.insts.push(data);
        id
    }

    /// Append an instruction at the end of a block.
    pub fn push_inst(&mut self, block: BlockId, data: InstData) -> InstId {
        let id = self.add_inst(data);
        self.blocks[block.index()].insts.push(id);
        id
    }

    /// Set the terminator for a block.
    pub fn set_term(&mut self, block: BlockId, term: Terminator) {
        self.blocks[block.index()].term = Some(term);
    }

    /// Find the block and position of an instruction. O(instructions).
    pub fn locate(&self, id: InstId) -> Option<(BlockId, usize)> {
        for bb in self.block_ids() {
            if let Some(pos) = self.block(bb).insts.iter().position(|&i| i == id) {
                return Some((bb, pos));
            }
        }
        None
    }

    /// Unlink an instruction from its block and replace it with a tombstone.
    /// The arena slot stays allocated so stale [`InstId`]s remain inert.
    pub fn remove_inst(&mut self, id: InstId) {
        if let Some((bb, pos)) = self.locate(id) {
            self.blocks[bb.index()].insts.remove(pos);
        }
        let data = self.inst_mut(id);
        data.kind = InstKind::Nop;
        data.ty = Ty::Void;
    }

    /// The type of a value in the context of this body.
    pub fn value_ty(&self, sig: &Signature, v: &Value) -> Ty {
        match v {
            Value::Inst(id) => self.inst(*id).ty.clone(),
            Value::Arg(i) => sig.params[*i as usize].clone(),
            Value::Const(c) => c.ty.clone(),
            Value::Func(_) => Ty::Ptr,
            Value::Block(_) => Ty::Void,
        }
    }

    /// A readable label for a value (`%name`, `%inst-id`, `%argN`, or the
    /// constant itself).
    pub fn value_label(&self, v: &Value) -> String {
        match v {
            Value::Inst(id) => match &self.inst(*id).name {
                Some(name) => format!("%{}", name),
                None => format!("%{}", id.index()),
            },
            Value::Arg(i) => format!("%arg{}", i),
            Value::Const(c) => format!("{}", c),
            Value::Func(r) => format!("@fn{}", r.index()),
            Value::Block(bb) => format!("{}", bb),
        }
    }

    /// Count, for every instruction, how many operands of other live
    /// instructions and terminators reference it.
    pub fn use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.insts.len()];
        let mut bump = |v: &Value| {
            if let Value::Inst(id) = v {
                counts[id.index()] += 1;
            }
        };
        for block in &self.blocks {
            for &id in &block.insts {
                self.inst(id).kind.for_each_operand(&mut bump);
            }
            if let Some(term) = &block.term {
                term.for_each_operand(&mut bump);
            }
        }
        counts
    }
}

impl Default for FuncBody {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// A positional insertion cursor over a [`FuncBody`].
///
/// Each emitted instruction goes at the cursor position and the cursor
/// advances past it, so consecutive emissions appear in program order.
pub struct Builder<'f> {
    body: &'f mut FuncBody,
    block: BlockId,
    index: usize,
}

impl<'f> Builder<'f> {
    /// Position the cursor immediately before the instruction at `index`.
    pub fn before(body: &'f mut FuncBody, block: BlockId, index: usize) -> Self {
        Self { body, block, index }
    }

    /// Position the cursor at the end of a block (before the terminator).
    pub fn at_end(body: &'f mut FuncBody, block: BlockId) -> Self {
        let index = body.block(block).insts.len();
        Self { body, block, index }
    }

    /// The position the next instruction will be inserted at.
    pub fn position(&self) -> (BlockId, usize) {
        (self.block, self.index)
    }

    fn insert(&mut self, data: InstData) -> Value {
        let id = self.body.add_inst(data);
        self.body.blocks[self.block.index()].insts.insert(self.index, id);
        self.index += 1;
        Value::Inst(id)
    }

    pub fn binary(&mut self, op: super::inst::BinOp, ty: Ty, lhs: Value, rhs: Value) -> Value {
        self.insert(InstData::new(InstKind::Binary { op, lhs, rhs }, ty))
    }

    pub fn icmp(&mut self, pred: super::inst::IntPred, ty: Ty, lhs: Value, rhs: Value) -> Value {
        self.insert(InstData::new(InstKind::Icmp { pred, lhs, rhs }, ty))
    }

    pub fn fcmp(&mut self, pred: super::inst::FloatPred, ty: Ty, lhs: Value, rhs: Value) -> Value {
        self.insert(InstData::new(InstKind::Fcmp { pred, lhs, rhs }, ty))
    }

    pub fn select(&mut self, ty: Ty, cond: Value, on_true: Value, on_false: Value) -> Value {
        self.insert(InstData::new(
            InstKind::Select {
                cond,
                on_true,
                on_false,
            },
            ty,
        ))
    }

    pub fn cast(&mut self, op: CastOp, to: Ty, value: Value) -> Value {
        self.insert(InstData::new(InstKind::Cast { op, value }, to))
    }

    pub fn load(&mut self, ty: Ty, addr: Value) -> Value {
        self.insert(InstData::new(InstKind::Load { addr }, ty))
    }

    pub fn store(&mut self, value: Value, addr: Value) -> Value {
        self.insert(InstData::new(InstKind::Store { value, addr }, Ty::Void))
    }

    pub fn call(&mut self, callee: Callee, ret: Ty, args: Vec<Value>) -> Value {
        self.insert(InstData::new(InstKind::Call { callee, args }, ret))
    }

    /// Direct call to a known function.
    pub fn call_direct(&mut self, func: FuncRef, ret: Ty, args: Vec<Value>) -> Value {
        self.call(Callee::Direct(func), ret, args)
    }

    /// Extract lane `lane` from a vector value. Extraction from a splat
    /// constant folds to the lane constant.
    pub fn extract_lane(&mut self, elem_ty: Ty, vec: Value, lane: u32) -> Value {
        if let Value::Const(c) = &vec {
            if let ConstKind::Splat(elem) = &c.kind {
                return Value::Const((**elem).clone());
            }
        }
        self.insert(InstData::new(InstKind::ExtractLane { vec, lane }, elem_ty))
    }

    pub fn insert_lane(&mut self, vec_ty: Ty, vec: Value, value: Value, lane: u32) -> Value {
        self.insert(InstData::new(
            InstKind::InsertLane { vec, value, lane },
            vec_ty,
        ))
    }

    pub fn shuffle(&mut self, ty: Ty, a: Value, b: Value, mask: Vec<u32>) -> Value {
        self.insert(InstData::new(InstKind::Shuffle { a, b, mask }, ty))
    }

    /// Insert a pre-built instruction at the cursor.
    pub fn insert_data(&mut self, data: InstData) -> Value {
        self.insert(data)
    }

    /// Replicate a scalar value into every lane of `vec_ty` through a chain
    /// of lane inserts over `undef`.
    pub fn splat_value(&mut self, vec_ty: Ty, scalar: Value) -> Value {
        let lanes = vec_ty.lanes().expect("splat_value requires a vector type");
        let mut acc = Value::Const(Const::undef(vec_ty.clone()));
        for lane in 0..lanes {
            acc = self.insert_lane(vec_ty.clone(), acc, scalar.clone(), lane);
        }
        acc
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::inst::BinOp;

    #[test]
    fn test_module_declare_and_lookup() {
        let mut m = Module::new("m");
        let sig = Signature::new(vec![Ty::i32()], Ty::i32());
        let f = m.declare("callee", sig.clone());
        assert_eq!(m.get_func("callee"), Some(f));
        assert_eq!(m.get_func("missing"), None);
        assert!(m.func(f).is_declaration());

        // get_or_declare is idempotent
        assert_eq!(m.get_or_declare("callee", sig), f);
    }

    #[test]
    fn test_body_blocks_and_insts() {
        let mut body = FuncBody::new();
        assert_eq!(body.blocks.len(), 1);
        let bb1 = body.new_block();
        assert_eq!(bb1, BlockId::new(1));

        let id = body.push_inst(
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
        assert_eq!(body.locate(id), Some((BlockId::ENTRY, 0)));
        assert_eq!(body.inst(id).ty, Ty::i32());
    }

    #[test]
    fn test_remove_inst_leaves_tombstone() {
        let mut body = FuncBody::new();
        let id = body.push_inst(
            BlockId::ENTRY,
            InstData::new(InstKind::Load { addr: Value::Arg(0) }, Ty::i32()),
        );
        body.remove_inst(id);
        assert!(body.block(BlockId::ENTRY).insts.is_empty());
        assert!(matches!(body.inst(id).kind, InstKind::Nop));
    }

    #[test]
    fn test_value_ty() {
        let mut body = FuncBody::new();
        let sig = Signature::new(vec![Ty::Double], Ty::Void);
        let id = body.push_inst(
            BlockId::ENTRY,
            InstData::new(InstKind::Load { addr: Value::Arg(0) }, Ty::i64()),
        );
        assert_eq!(body.value_ty(&sig, &Value::Arg(0)), Ty::Double);
        assert_eq!(body.value_ty(&sig, &Value::Inst(id)), Ty::i64());
        assert_eq!(
            body.value_ty(&sig, &Value::Const(Const::bool(true))),
            Ty::i1()
        );
        assert_eq!(body.value_ty(&sig, &Value::Func(FuncRef(0))), Ty::Ptr);
    }

    #[test]
    fn test_builder_insert_before() {
        let mut body = FuncBody::new();
        let first = body.push_inst(
            BlockId::ENTRY,
            InstData::new(InstKind::Fence, Ty::Void),
        );

        let mut b = Builder::before(&mut body, BlockId::ENTRY, 0);
        let v = b.binary(BinOp::Add, Ty::i32(), Value::Arg(0), Value::Arg(1));
        let added = v.as_inst().unwrap();

        let insts = &body.block(BlockId::ENTRY).insts;
        assert_eq!(insts.as_slice(), &[added, first]);
    }

    #[test]
    fn test_builder_splat_chain() {
        let mut body = FuncBody::new();
        let mut b = Builder::at_end(&mut body, BlockId::ENTRY);
        let v = b.splat_value(Ty::vector(Ty::i64(), 4), Value::Arg(0));
        assert!(v.as_inst().is_some());
        // one insertlane per lane
        assert_eq!(body.block(BlockId::ENTRY).insts.len(), 4);
    }

    #[test]
    fn test_extract_lane_folds_splats() {
        let mut body = FuncBody::new();
        let mut b = Builder::at_end(&mut body, BlockId::ENTRY);
        let splat = Value::Const(Const::int(32, 7).splat(8));
        let v = b.extract_lane(Ty::i32(), splat, 0);
        assert_eq!(v, Value::Const(Const::int(32, 7)));
        assert!(body.block(BlockId::ENTRY).insts.is_empty());
    }

    #[test]
    fn test_use_counts() {
        let mut body = FuncBody::new();
        let a = body.push_inst(
            BlockId::ENTRY,
            InstData::new(InstKind::Load { addr: Value::Arg(0) }, Ty::i32()),
        );
        let b = body.push_inst(
            BlockId::ENTRY,
            InstData::new(
                InstKind::Binary {
                    op: BinOp::Add,
                    lhs: Value::Inst(a),
                    rhs: Value::Inst(a),
                },
                Ty::i32(),
            ),
        );
        body.set_term(
            BlockId::ENTRY,
            Terminator::Ret {
                value: Some(Value::Inst(b)),
            },
        );
        let counts = body.use_counts();
        assert_eq!(counts[a.index()], 2);
        assert_eq!(counts[b.index()], 1);
    }
}
