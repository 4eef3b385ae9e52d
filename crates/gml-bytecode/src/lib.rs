//! The instruction set of the abstract graph-reduction machine (the
//! "G-machine"), plus a small disassembler used for observability.
//!
//! [`Cond`](Instr::Cond) and [`CaseJump`](Instr::CaseJump) carry their
//! branches as nested instruction sequences rather than as offsets into a
//! flat byte stream. Tree-shaped branches are simpler to compile (the
//! compiler never has to patch a jump target) and simpler to reason about;
//! a flat encoding with 16-bit relative offsets is an equally valid choice
//! but the two must not be mixed.

use gml_ast::{Name, Tag};

/// An instruction sequence, as emitted by the compiler for one
/// supercombinator body or one `Cond`/`CaseJump` branch.
pub type Code = Vec<Instr>;

/// The arithmetic and relational primitives that can be open-coded directly
/// as machine instructions when an application is saturated and in strict
/// position. Every member here also exists as a pre-compiled
/// supercombinator (see `gml-primitives`) for the unsaturated case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prim {
    Add,
    Sub,
    Mul,
    Div,
    Negate,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Prim {
    /// Number of `NInt` operands this primitive consumes.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Prim::Negate => 1,
            _ => 2,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Prim::Add => "+",
            Prim::Sub => "-",
            Prim::Mul => "*",
            Prim::Div => "/",
            Prim::Negate => "negate",
            Prim::Eq => "==",
            Prim::Ne => "/=",
            Prim::Lt => "<",
            Prim::Le => "<=",
            Prim::Gt => ">",
            Prim::Ge => ">=",
        }
    }

    /// The full list of primitives, used to build the prelude and the
    /// compiler's open-coding table.
    #[must_use]
    pub fn all() -> &'static [Prim] {
        &[
            Prim::Add,
            Prim::Sub,
            Prim::Mul,
            Prim::Div,
            Prim::Negate,
            Prim::Eq,
            Prim::Ne,
            Prim::Lt,
            Prim::Le,
            Prim::Gt,
            Prim::Ge,
        ]
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Prim> {
        Prim::all().iter().copied().find(|p| p.name() == name)
    }
}

/// One instruction of the G-machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Push the address of a global (supercombinator or primitive) by name.
    Pushglobal(Name),
    /// Allocate a fresh `NInt` and push its address.
    Pushint(i64),
    /// Push the address `n` slots below the current top (0 = the top
    /// itself, counted *before* this instruction runs).
    Push(usize),
    /// Pop `f` then `x`; allocate `NAp(f, x)`; push its address.
    Mkap,
    /// Pop the top address `a`; overwrite the cell `n` slots below the new
    /// top with `NIndirect(a)`.
    Update(usize),
    /// Discard the top `n` addresses.
    Pop(usize),
    /// Pop the top address `t`, discard the next `n`, then push `t` back.
    Slide(usize),
    /// Push `n` freshly allocated placeholder cells, for `letrec`
    /// back-patching.
    Alloc(usize),
    /// Walk the spine at the top of the stack towards a reducible head and
    /// perform one reduction step; see the `gml-vm` crate for the state
    /// machine this drives.
    Unwind,
    /// Suspend the current frame on the dump and force the top of the
    /// stack to weak head normal form.
    Eval,
    /// Pop the top address; it must be `NInt(0)` or `NInt(1)`. Continue
    /// executing the first branch on `1`, the second on `0`.
    Cond(Code, Code),
    /// Pop `arity` addresses and allocate an `NConstr` from them,
    /// preserving argument order.
    Pack(Tag, usize),
    /// Inspect the `NConstr` at the top of the stack and continue executing
    /// the branch whose tag matches. No matching tag is a fatal error.
    CaseJump(Vec<(Tag, Code)>),
    /// Pop an `NConstr`, require it has exactly `arity` components, and
    /// push them so the leftmost component ends up on top.
    Split(usize),
    /// An open-coded arithmetic or relational primitive.
    Prim(Prim),
}

/// Pretty-prints one supercombinator's code in the disassembly format used
/// for observability: `<Sc NAME arity=N>` followed by one indented line per
/// instruction. Nested `Cond`/`CaseJump` branches are printed as indented
/// sub-blocks rather than patched offsets, matching the tree encoding.
#[must_use]
pub fn disassemble_sc(name: &str, arity: usize, code: &Code) -> String {
    let mut out = format!("<Sc {name} arity={arity}>\n");
    write_code(&mut out, code, 1);
    out
}

fn write_code(out: &mut String, code: &Code, indent: usize) {
    for (pc, instr) in code.iter().enumerate() {
        write_indent(out, indent);
        out.push_str(&format!("{pc:4} "));
        write_instr(out, instr, indent);
        out.push('\n');
    }
}

fn write_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

fn write_instr(out: &mut String, instr: &Instr, indent: usize) {
    match instr {
        Instr::Pushglobal(name) => out.push_str(&format!("PUSHGLOBAL {name}")),
        Instr::Pushint(k) => out.push_str(&format!("PUSHINT {k}")),
        Instr::Push(n) => out.push_str(&format!("PUSH {n}")),
        Instr::Mkap => out.push_str("MKAP"),
        Instr::Update(n) => out.push_str(&format!("UPDATE {n}")),
        Instr::Pop(n) => out.push_str(&format!("POP {n}")),
        Instr::Slide(n) => out.push_str(&format!("SLIDE {n}")),
        Instr::Alloc(n) => out.push_str(&format!("ALLOC {n}")),
        Instr::Unwind => out.push_str("UNWIND"),
        Instr::Eval => out.push_str("EVAL"),
        Instr::Pack(tag, arity) => out.push_str(&format!("PACK {{{tag}, {arity}}}")),
        Instr::Split(arity) => out.push_str(&format!("SPLIT {arity}")),
        Instr::Prim(p) => out.push_str(&format!("{}", p.name().to_uppercase())),
        Instr::Cond(then_code, else_code) => {
            out.push_str("COND\n");
            write_indent(out, indent + 1);
            out.push_str("then:\n");
            write_code(out, then_code, indent + 2);
            write_indent(out, indent + 1);
            out.push_str("else:\n");
            write_code(out, else_code, indent + 2);
        }
        Instr::CaseJump(arms) => {
            out.push_str("CASEJUMP\n");
            for (tag, arm_code) in arms {
                write_indent(out, indent + 1);
                out.push_str(&format!("<{tag}>:\n"));
                write_code(out, arm_code, indent + 2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_a_flat_body() {
        let code = vec![Instr::Pushint(42), Instr::Update(0), Instr::Pop(0), Instr::Unwind];
        let text = disassemble_sc("main", 0, &code);
        assert!(text.starts_with("<Sc main arity=0>\n"));
        assert!(text.contains("PUSHINT 42"));
        assert!(text.contains("UNWIND"));
    }

    #[test]
    fn disassembles_nested_cond_branches() {
        let code = vec![Instr::Cond(vec![Instr::Pushint(1)], vec![Instr::Pushint(0)])];
        let text = disassemble_sc("f", 1, &code);
        assert!(text.contains("then:"));
        assert!(text.contains("else:"));
    }
}
