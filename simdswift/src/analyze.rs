//! # Instruction Analyzer
//!
//! A read-only pass that counts, per function and per module, the total
//! instructions, the inline-assembly calls, and the instructions touching
//! vector-typed operands, then emits a stable textual report. Used to
//! confirm how much of a hardened binary actually runs on shadow vectors.

use crate::ir::{Callee, InstKind, Module, Value};

/// Report options.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Also list every vector-touching instruction per function.
    pub print_vec: bool,
    /// Also list every inline-assembly call per function.
    pub print_asm: bool,
}

/// Per-function counters.
#[derive(Debug, Clone)]
pub struct FuncStats {
    pub name: String,
    /// Total instructions, terminators included.
    pub insts: usize,
    pub asm_calls: usize,
    pub vector_insts: usize,
    /// Rendered vector-touching instructions, in program order.
    pub vec_lines: Vec<String>,
    /// Rendered inline-assembly calls, in program order.
    pub asm_lines: Vec<String>,
}

/// Module-wide analysis results, in module function order (stable).
#[derive(Debug, Clone)]
pub struct ModuleStats {
    pub funcs: Vec<FuncStats>,
}

impl ModuleStats {
    /// Module totals: (instructions, asm calls, vector instructions).
    pub fn totals(&self) -> (usize, usize, usize) {
        self.funcs.iter().fold((0, 0, 0), |(i, a, v), f| {
            (i + f.insts, a + f.asm_calls, v + f.vector_insts)
        })
    }

    /// Render the textual report.
    pub fn report(&self, opts: AnalyzeOptions) -> String {
        let mut out = String::new();
        let (insts, asm, vec) = self.totals();

        out.push_str("----- MODULE STATISTICS -----\n");
        out.push_str(&format!("  Total number of instructions:        {}\n", insts));
        out.push_str(&format!("  Total number of assembly calls:      {}\n", asm));
        out.push_str(&format!("  Total number of vector instructions: {}\n\n", vec));

        out.push_str("\n----- FUNCTION STATISTICS -----\n\n");
        for f in &self.funcs {
            out.push_str(&format!("{}\n", f.name));
            out.push_str(&format!("  Number of instructions:        {}\n", f.insts));
            out.push_str(&format!("  Number of assembly calls:      {}\n", f.asm_calls));
            out.push_str(&format!(
                "  Number of vector instructions: {}\n\n",
                f.vector_insts
            ));
        }

        if opts.print_vec {
            out.push_str("\n----- VECTOR INSTRUCTIONS STATISTICS -----\n\n");
            for f in self.funcs.iter().filter(|f| !f.vec_lines.is_empty()) {
                out.push_str(&format!("{}\n", f.name));
                for (i, line) in f.vec_lines.iter().enumerate() {
                    out.push_str(&format!("[{}] {}\n", i, line));
                }
                out.push('\n');
            }
        }

        if opts.print_asm {
            out.push_str("\n----- ASSEMBLY CALLS STATISTICS -----\n\n");
            for f in self.funcs.iter().filter(|f| !f.asm_lines.is_empty()) {
                out.push_str(&format!("{}\n", f.name));
                for (i, line) in f.asm_lines.iter().enumerate() {
                    out.push_str(&format!("[{}] {}\n", i, line));
                }
                out.push('\n');
            }
        }

        out
    }
}

/// Count instructions, inline-assembly calls and vector-touching
/// instructions in every defined function.
pub fn analyze(module: &Module) -> ModuleStats {
    let mut funcs = Vec::new();
    for func in &module.funcs {
        let Some(body) = &func.body else { continue };

        let mut stats = FuncStats {
            name: func.name.clone(),
            insts: 0,
            asm_calls: 0,
            vector_insts: 0,
            vec_lines: Vec::new(),
            asm_lines: Vec::new(),
        };

        for bb in body.block_ids() {
            for &id in &body.block(bb).insts {
                stats.insts += 1;
                let data = body.inst(id);

                if let InstKind::Call {
                    callee: Callee::Asm(_),
                    ..
                } = &data.kind
                {
                    stats.asm_calls += 1;
                    stats.asm_lines.push(body.display_inst(id));
                }

                let mut touches_vector = false;
                data.kind.for_each_operand(|v: &Value| {
                    if body.value_ty(&func.sig, v).is_vector() {
                        touches_vector = true;
                    }
                });
                if touches_vector {
                    stats.vector_insts += 1;
                    stats.vec_lines.push(body.display_inst(id));
                }
            }

            if let Some(term) = &body.block(bb).term {
                stats.insts += 1;
                let mut touches_vector = false;
                term.for_each_operand(|v: &Value| {
                    if body.value_ty(&func.sig, v).is_vector() {
                        touches_vector = true;
                    }
                });
                if touches_vector {
                    stats.vector_insts += 1;
                    stats.vec_lines.push(body.display_term(term));
                }
            }
        }

        funcs.push(stats);
    }
    ModuleStats { funcs }
}

// ============================================================================
// Tests
// ============================================================================
