//! The fixed set of primitive operators and prelude combinators that every
//! program gets for free.
//!
//! Every arithmetic and relational primitive, plus `id`, `compose`, `cons`,
//! `nil`, `true` and `false`, is expressed as an ordinary supercombinator
//! over the same `Expr` the compiler already knows how to turn into
//! bytecode: the ordinary E/C-scheme compilation of `add a b = a + b`
//! already produces the canonical "push each arg, force it, apply the
//! instruction, update, pop, unwind" shape a primitive needs for its
//! unsaturated/first-class use. `if` is the one exception — there is no
//! `Expr` node for branching, so its supercombinator body is written out
//! directly as bytecode (see [`if_global_code`]).

use gml_ast::{apply, binop, Expr, ScDefn};
use gml_bytecode::{Code, Instr, Prim};

/// The reserved name bound to the conditional combinator.
pub const IF_NAME: &str = "if";

/// Tag used for `nil`/the empty list.
pub const NIL_TAG: u16 = 1;
/// Tag used for `cons`/list cells.
pub const CONS_TAG: u16 = 2;

fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

fn prim_defn(prim: Prim) -> ScDefn {
    match prim.arity() {
        1 => ScDefn {
            name: prim.name().to_string(),
            params: vec!["x".to_string()],
            body: Expr::App(
                Box::new(Expr::PrimOp(prim.name().to_string())),
                Box::new(var("x")),
            ),
        },
        2 => ScDefn {
            name: prim.name().to_string(),
            params: vec!["x".to_string(), "y".to_string()],
            body: binop(prim.name(), var("x"), var("y")),
        },
        n => unreachable!("primitive {} has unsupported arity {n}", prim.name()),
    }
}

/// The supercombinator definitions that make up the prelude: every
/// primitive operator under its own name, plus `id`, `compose`, `true`,
/// `false`, `cons` and `nil`. `if` is deliberately absent; see
/// [`if_global_code`].
#[must_use]
pub fn prelude_supercombinators() -> Vec<ScDefn> {
    let mut defns: Vec<ScDefn> = Prim::all().iter().copied().map(prim_defn).collect();

    defns.push(ScDefn {
        name: "id".to_string(),
        params: vec!["x".to_string()],
        body: var("x"),
    });
    defns.push(ScDefn {
        name: "compose".to_string(),
        params: vec!["f".to_string(), "g".to_string(), "x".to_string()],
        body: Expr::App(
            Box::new(var("f")),
            Box::new(Expr::App(Box::new(var("g")), Box::new(var("x")))),
        ),
    });
    defns.push(ScDefn {
        name: "true".to_string(),
        params: vec![],
        body: Expr::Int(1),
    });
    defns.push(ScDefn {
        name: "false".to_string(),
        params: vec![],
        body: Expr::Int(0),
    });
    defns.push(ScDefn {
        name: "cons".to_string(),
        params: vec!["h".to_string(), "t".to_string()],
        body: apply(
            Expr::Constr { tag: CONS_TAG, arity: 2 },
            [var("h"), var("t")],
        ),
    });
    defns.push(ScDefn {
        name: "nil".to_string(),
        params: vec![],
        body: Expr::Constr { tag: NIL_TAG, arity: 0 },
    });

    defns
}

/// The hand-written bytecode body for the `if` supercombinator (arity 3):
/// evaluate the condition, then lazily select the `then` or `else` operand
/// without forcing it, exactly as the compiler's own inline open-coding of
/// a saturated, strict `if` would -- except here the result is produced
/// for a *value* use of `if` (first-class reference, partial application),
/// so the trailing `Update`/`Pop`/`Unwind` is the ordinary supercombinator
/// trailer rather than inlined into a caller's strict context.
///
/// Parameters are bound the same way `compile_sc` binds them: the first
/// declared parameter sits deepest. For arity 3 that puts the condition at
/// offset 2, the then-branch at offset 1, and the else-branch at offset 0.
#[must_use]
pub fn if_global_code() -> Code {
    vec![
        Instr::Push(2),
        Instr::Eval,
        Instr::Cond(vec![Instr::Push(1)], vec![Instr::Push(0)]),
        Instr::Update(3),
        Instr::Pop(3),
        Instr::Unwind,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_defines_every_primitive_under_its_own_name() {
        let names: Vec<_> = prelude_supercombinators().into_iter().map(|d| d.name).collect();
        for prim in Prim::all() {
            assert!(names.contains(&prim.name().to_string()), "missing {}", prim.name());
        }
        for extra in ["id", "compose", "true", "false", "cons", "nil"] {
            assert!(names.contains(&extra.to_string()), "missing {extra}");
        }
        assert!(!names.contains(&IF_NAME.to_string()));
    }

    #[test]
    fn if_body_does_not_force_the_chosen_branch() {
        let code = if_global_code();
        assert_eq!(code.len(), 6);
        assert!(matches!(code[2], Instr::Cond(ref t, ref e) if t == &vec![Instr::Push(1)] && e == &vec![Instr::Push(0)]));
    }
}
