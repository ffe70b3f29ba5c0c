//! Textual rendering of the IR, used by diagnostics and the analyzer's
//! per-instruction listings.

use std::fmt;

use super::inst::{Callee, InstKind, Terminator};
use super::module::{FuncBody, Module, Signature};
use super::types::InstId;
use super::value::Value;

impl FuncBody {
    /// Render one instruction as a line of textual IR.
    pub fn display_inst(&self, id: InstId) -> String {
        let data = self.inst(id);
        let lab = |v: &Value| self.value_label(v);
        let result = if data.ty.is_void() {
            String::new()
        } else {
            format!("{} = ", self.value_label(&Value::Inst(id)))
        };
        let body = match &data.kind {
            InstKind::Binary { op, lhs, rhs } => {
                format!("{} {} {}, {}", op.mnemonic(), data.ty, lab(lhs), lab(rhs))
            }
            InstKind::Icmp { pred, lhs, rhs } => {
                let pred = format!("{:?}", pred).to_lowercase();
                format!("icmp {} {}, {}", pred, lab(lhs), lab(rhs))
            }
            InstKind::Fcmp { pred, lhs, rhs } => {
                let pred = format!("{:?}", pred).to_lowercase();
                format!("fcmp {} {}, {}", pred, lab(lhs), lab(rhs))
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => format!(
                "select {}, {}, {}",
                lab(cond),
                lab(on_true),
                lab(on_false)
            ),
            InstKind::Cast { op, value } => {
                format!("{} {} to {}", op.mnemonic(), lab(value), data.ty)
            }
            InstKind::Gep {
                elem_ty,
                base,
                indices,
                in_bounds,
            } => {
                let mut s = format!(
                    "gep{} {}, {}",
                    if *in_bounds { " inbounds" } else { "" },
                    elem_ty,
                    lab(base)
                );
                for idx in indices {
                    s.push_str(&format!(", {}", lab(idx)));
                }
                s
            }
            InstKind::Alloca { alloc_ty, count } => match count {
                Some(count) => format!("alloca {}, {}", alloc_ty, lab(count)),
                None => format!("alloca {}", alloc_ty),
            },
            InstKind::Load { addr } => format!("load {}, {}", data.ty, lab(addr)),
            InstKind::Store { value, addr } => {
                format!("store {}, {}", lab(value), lab(addr))
            }
            InstKind::CmpXchg {
                addr,
                expected,
                new,
            } => format!("cmpxchg {}, {}, {}", lab(addr), lab(expected), lab(new)),
            InstKind::AtomicRmw { op, addr, value } => {
                let op = format!("{:?}", op).to_lowercase();
                format!("atomicrmw {} {}, {}", op, lab(addr), lab(value))
            }
            InstKind::Phi { incoming } => {
                let arms: Vec<String> = incoming
                    .iter()
                    .map(|(v, bb)| format!("[ {}, {} ]", lab(v), bb))
                    .collect();
                format!("phi {} {}", data.ty, arms.join(", "))
            }
            InstKind::Call { callee, args } => {
                let target = match callee {
                    Callee::Direct(r) => format!("@fn{}", r.index()),
                    Callee::Indirect(v) => lab(v),
                    Callee::Asm(asm) => format!("asm \"{}\"", asm.asm),
                };
                let args: Vec<String> = args.iter().map(|a| lab(a)).collect();
                format!("call {} {}({})", data.ty, target, args.join(", "))
            }
            InstKind::ExtractValue { agg, index } => {
                format!("extractvalue {}, {}", lab(agg), index)
            }
            InstKind::InsertValue { agg, value, index } => {
                format!("insertvalue {}, {}, {}", lab(agg), lab(value), index)
            }
            InstKind::ExtractLane { vec, lane } => {
                format!("extractlane {}, {}", lab(vec), lane)
            }
            InstKind::InsertLane { vec, value, lane } => {
                format!("insertlane {}, {}, {}", lab(vec), lab(value), lane)
            }
            InstKind::Shuffle { a, b, mask } => {
                format!("shuffle {}, {}, {:?}", lab(a), lab(b), mask)
            }
            InstKind::VaArg { list } => format!("va_arg {}, {}", lab(list), data.ty),
            InstKind::Fence => "fence".to_string(),
            InstKind::LandingPad => "landingpad".to_string(),
            InstKind::Nop => "nop".to_string(),
        };
        format!("{}{}", result, body)
    }

    /// Render a terminator as a line of textual IR.
    pub fn display_term(&self, term: &Terminator) -> String {
        let lab = |v: &Value| self.value_label(v);
        match term {
            Terminator::Br { target } => format!("br {}", target),
            Terminator::CondBr {
                cond,
                then_bb,
                else_bb,
                weights,
            } => {
                let mut s = format!("br {}, {}, {}", lab(cond), then_bb, else_bb);
                if let Some((t, e)) = weights {
                    s.push_str(&format!(" !weights({}, {})", t, e));
                }
                s
            }
            Terminator::Switch {
                selector,
                default,
                cases,
            } => {
                let arms: Vec<String> = cases
                    .iter()
                    .map(|(v, bb)| format!("{} -> {}", v, bb))
                    .collect();
                format!(
                    "switch {}, default {} [{}]",
                    lab(selector),
                    default,
                    arms.join(", ")
                )
            }
            Terminator::IndirectBr { addr, targets } => {
                let ts: Vec<String> = targets.iter().map(|bb| format!("{}", bb)).collect();
                format!("indirectbr {}, [{}]", lab(addr), ts.join(", "))
            }
            Terminator::Ret { value } => match value {
                Some(v) => format!("ret {}", lab(v)),
                None => "ret void".to_string(),
            },
            Terminator::Unreachable => "unreachable".to_string(),
            Terminator::Invoke { normal, unwind, .. } => {
                format!("invoke ... to {} unwind {}", normal, unwind)
            }
            Terminator::Resume { value } => format!("resume {}", lab(value)),
        }
    }
}

/// Displays a whole function as textual IR.
pub struct FuncDisplay<'a> {
    pub name: &'a str,
    pub sig: &'a Signature,
    pub body: &'a FuncBody,
}

impl fmt::Display for FuncDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .sig
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} %arg{}", ty, i))
            .collect();
        writeln!(
            f,
            "func @{}({}) -> {} {{",
            self.name,
            params.join(", "),
            self.sig.ret
        )?;
        for bb in self.body.block_ids() {
            writeln!(f, "{}:", bb)?;
            for &id in &self.body.block(bb).insts {
                writeln!(f, "  {}", self.body.display_inst(id))?;
            }
            match &self.body.block(bb).term {
                Some(term) => writeln!(f, "  {}", self.body.display_term(term))?,
                None => writeln!(f, "  <no terminator>")?,
            }
        }
        write!(f, "}}")
    }
}

impl Module {
    /// Render every defined function as textual IR.
    pub fn display_text(&self) -> String {
        let mut out = String::new();
        for func in &self.funcs {
            if let Some(body) = &func.body {
                out.push_str(&format!(
                    "{}\n\n",
                    FuncDisplay {
                        name: &func.name,
                        sig: &func.sig,
                        body,
                    }
                ));
            }
        }
        out
    }
}
