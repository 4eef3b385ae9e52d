//! Turns a program of supercombinator definitions into per-combinator
//! bytecode, following the three compilation schemes: R (a whole body, in
//! tail position), E (strict, evaluate now) and C (lazy, build a graph).
//!
//! Name environments (`Env`) map a local identifier to its offset from the
//! stack top at the point it is referenced. Every helper that emits
//! instructions growing the stack is responsible for shifting the
//! environment it hands to the remainder of the expression.

use std::collections::{HashMap, HashSet};

use gml_ast::{unwind_spine, CoreProgram, Expr, Name, ScDefn, Tag};
use gml_bytecode::{Code, Instr, Prim};
use gml_errors::CompileError;

type Env = HashMap<Name, usize>;

fn shift(env: &Env, n: usize) -> Env {
    env.iter().map(|(k, v)| (k.clone(), v + n)).collect()
}

/// The name under which a synthesized constructor global is registered,
/// used whenever a `Pack{tag,arity}` literal appears somewhere other than
/// a directly-saturated application (first-class reference, partial
/// application, or a bare CAF). `#` can't appear in a source identifier,
/// so this never collides with a user or prelude name.
#[must_use]
pub fn constructor_global_name(tag: Tag, arity: usize) -> Name {
    format!("Pack#{tag}#{arity}")
}

fn prim_from_head(head: &Expr) -> Option<Prim> {
    match head {
        Expr::Var(name) | Expr::PrimOp(name) => Prim::from_name(name),
        _ => None,
    }
}

fn is_if_head(head: &Expr) -> bool {
    matches!(head, Expr::Var(name) | Expr::PrimOp(name) if name == gml_primitives::IF_NAME)
}

/// Walks an expression, checking the invariants that the parser doesn't
/// already enforce (unique binders per scope, constructor tags `>= 1`) and
/// collecting every distinct `(tag, arity)` pair a `Pack` literal names, so
/// the caller can synthesize a callable global for each.
fn validate_and_collect_ctors(
    expr: &Expr,
    ctors: &mut HashSet<(Tag, usize)>,
) -> Result<(), CompileError> {
    match expr {
        Expr::Var(_) | Expr::Int(_) | Expr::PrimOp(_) => Ok(()),
        Expr::Constr { tag, arity } => {
            if *tag == 0 {
                return Err(CompileError::ReservedConstructorTag(0));
            }
            ctors.insert((*tag, *arity));
            Ok(())
        }
        Expr::App(f, a) => {
            validate_and_collect_ctors(f, ctors)?;
            validate_and_collect_ctors(a, ctors)
        }
        Expr::Let { defns, body, .. } => {
            let mut seen = HashSet::new();
            for (name, rhs) in defns {
                if !seen.insert(name.clone()) {
                    return Err(CompileError::DuplicateBinder(name.clone()));
                }
                validate_and_collect_ctors(rhs, ctors)?;
            }
            validate_and_collect_ctors(body, ctors)
        }
        Expr::Case { scrutinee, alts } => {
            validate_and_collect_ctors(scrutinee, ctors)?;
            for alt in alts {
                if alt.tag == 0 {
                    return Err(CompileError::ReservedConstructorTag(0));
                }
                let mut seen = HashSet::new();
                for binder in &alt.binders {
                    if !seen.insert(binder.clone()) {
                        return Err(CompileError::DuplicateBinder(binder.clone()));
                    }
                }
                validate_and_collect_ctors(&alt.body, ctors)?;
            }
            Ok(())
        }
    }
}

/// Builds the (code, extended environment) prologue shared by the E- and
/// C-scheme treatments of `let`/`letrec`: allocate and fill in the
/// bindings, lazily. The two schemes differ only in how they compile the
/// body that follows.
fn compile_let_bindings(
    is_rec: bool,
    defns: &[(Name, Expr)],
    env: &Env,
) -> Result<(Code, Env), CompileError> {
    let n = defns.len();
    if is_rec {
        let mut code = vec![Instr::Alloc(n)];
        let mut let_env = shift(env, n);
        for (i, (name, _)) in defns.iter().enumerate() {
            let_env.insert(name.clone(), n - i - 1);
        }
        for (i, (_, rhs)) in defns.iter().enumerate() {
            code.extend(compile_c(rhs, &let_env)?);
            code.push(Instr::Update(n - i - 1));
        }
        Ok((code, let_env))
    } else {
        let mut code = Vec::new();
        let mut cur_env = env.clone();
        for (_, rhs) in defns {
            code.extend(compile_c(rhs, &cur_env)?);
            cur_env = shift(&cur_env, 1);
        }
        let mut let_env = shift(env, n);
        for (i, (name, _)) in defns.iter().enumerate() {
            let_env.insert(name.clone(), n - i - 1);
        }
        Ok((code, let_env))
    }
}

/// The lazy/build-a-graph scheme: never forces anything, just arranges for
/// the value to be computable later.
fn compile_c(expr: &Expr, env: &Env) -> Result<Code, CompileError> {
    match expr {
        Expr::Var(name) | Expr::PrimOp(name) => Ok(vec![match env.get(name) {
            Some(&offset) => Instr::Push(offset),
            None => Instr::Pushglobal(name.clone()),
        }]),
        Expr::Int(k) => Ok(vec![Instr::Pushint(*k)]),
        Expr::App(f, a) => {
            let mut code = compile_c(a, env)?;
            code.extend(compile_c(f, &shift(env, 1))?);
            code.push(Instr::Mkap);
            Ok(code)
        }
        Expr::Let { is_rec, defns, body } => {
            let (mut code, let_env) = compile_let_bindings(*is_rec, defns, env)?;
            code.extend(compile_c(body, &let_env)?);
            code.push(Instr::Slide(defns.len()));
            Ok(code)
        }
        Expr::Constr { tag, arity } => {
            Ok(vec![Instr::Pushglobal(constructor_global_name(*tag, *arity))])
        }
        Expr::Case { .. } => Err(CompileError::UnsupportedInLazyPosition("case")),
    }
}

/// The strict/evaluate-in-place scheme: used wherever the value is needed
/// immediately (a supercombinator's whole body, a primitive's operand, a
/// `case` scrutinee, an `if`'s branches).
fn compile_e(expr: &Expr, env: &Env) -> Result<Code, CompileError> {
    match expr {
        Expr::Int(k) => Ok(vec![Instr::Pushint(*k)]),
        Expr::Let { is_rec, defns, body } => {
            let (mut code, let_env) = compile_let_bindings(*is_rec, defns, env)?;
            code.extend(compile_e(body, &let_env)?);
            code.push(Instr::Slide(defns.len()));
            Ok(code)
        }
        Expr::Case { scrutinee, alts } => {
            let mut code = compile_e(scrutinee, env)?;
            let mut table = Vec::with_capacity(alts.len());
            for alt in alts {
                let a = alt.arity();
                let mut alt_env = shift(env, a);
                for (i, binder) in alt.binders.iter().enumerate() {
                    alt_env.insert(binder.clone(), i);
                }
                let mut arm = vec![Instr::Split(a)];
                arm.extend(compile_e(&alt.body, &alt_env)?);
                arm.push(Instr::Slide(a));
                table.push((alt.tag, arm));
            }
            code.push(Instr::CaseJump(table));
            Ok(code)
        }
        Expr::App(..) => {
            let (head, args) = unwind_spine(expr);

            if let Some(prim) = prim_from_head(head) {
                if args.len() == prim.arity() {
                    return compile_e_prim(prim, &args, env);
                }
            }

            if is_if_head(head) {
                if args.len() == 3 {
                    return compile_e_if(&args, env);
                }
                if args.len() > 3 {
                    return Err(CompileError::ArityMismatch {
                        construct: "if",
                        expected: 3,
                        found: args.len(),
                    });
                }
            }

            if let Expr::Constr { tag, arity } = head {
                if args.len() == *arity {
                    return compile_e_constr(*tag, *arity, &args, env);
                }
                if args.len() > *arity {
                    return Err(CompileError::ArityMismatch {
                        construct: "Pack",
                        expected: *arity,
                        found: args.len(),
                    });
                }
            }

            let mut code = compile_c(expr, env)?;
            code.push(Instr::Eval);
            Ok(code)
        }
        Expr::Var(_) | Expr::PrimOp(_) | Expr::Constr { .. } => {
            let mut code = compile_c(expr, env)?;
            code.push(Instr::Eval);
            Ok(code)
        }
    }
}

fn compile_e_prim(prim: Prim, args: &[&Expr], env: &Env) -> Result<Code, CompileError> {
    if prim.arity() == 1 {
        let mut code = compile_e(args[0], env)?;
        code.push(Instr::Prim(prim));
        return Ok(code);
    }
    // Binary: evaluate the right operand first, then the left with the
    // environment shifted to account for the right operand's slot. The
    // left operand ends up on top, so `Prim` sees (left, right) on pop.
    let mut code = compile_e(args[1], env)?;
    code.extend(compile_e(args[0], &shift(env, 1))?);
    code.push(Instr::Prim(prim));
    Ok(code)
}

fn compile_e_if(args: &[&Expr], env: &Env) -> Result<Code, CompileError> {
    let mut code = compile_e(args[0], env)?;
    let then_code = compile_e(args[1], env)?;
    let else_code = compile_e(args[2], env)?;
    code.push(Instr::Cond(then_code, else_code));
    Ok(code)
}

fn compile_e_constr(
    tag: Tag,
    arity: usize,
    args: &[&Expr],
    env: &Env,
) -> Result<Code, CompileError> {
    let mut code = Vec::new();
    let mut cur_env = env.clone();
    for arg in args.iter().rev() {
        code.extend(compile_c(arg, &cur_env)?);
        cur_env = shift(&cur_env, 1);
    }
    code.push(Instr::Pack(tag, arity));
    Ok(code)
}

/// Compiles one supercombinator's whole body in tail position: `R`.
///
/// Parameters are bound by the layout `Unwind`'s spine rearrangement
/// actually produces: the stack holds `[.., root, arg_1, .., arg_n]` with
/// `arg_n` (the last-declared parameter) on top, so the first-declared
/// parameter sits deepest. `params[j]` (0-indexed) is therefore bound to
/// offset `arity - 1 - j`, not `j`.
fn compile_sc(defn: &ScDefn) -> Result<(Name, usize, Code), CompileError> {
    let arity = defn.arity();
    let mut env = Env::new();
    for (j, name) in defn.params.iter().enumerate() {
        if env.insert(name.clone(), arity - 1 - j).is_some() {
            return Err(CompileError::DuplicateBinder(name.clone()));
        }
    }
    let mut code = compile_e(&defn.body, &env)?;
    code.push(Instr::Update(arity));
    code.push(Instr::Pop(arity));
    code.push(Instr::Unwind);
    Ok((defn.name.clone(), arity, code))
}

/// Every reserved global name: the prelude's supercombinators plus the
/// hand-written `if`. A user supercombinator may not reuse one of these.
#[must_use]
pub fn reserved_global_names() -> HashSet<Name> {
    let mut names: HashSet<Name> = gml_primitives::prelude_supercombinators()
        .into_iter()
        .map(|sc| sc.name)
        .collect();
    names.insert(gml_primitives::IF_NAME.to_string());
    names
}

/// Compiles a whole user program (plus the prelude) into the flat table of
/// `(name, arity, code)` the interpreter's initial heap is built from.
/// Does not include `if`, which has no `Expr` representation and is
/// registered directly by the caller from `gml_primitives::if_global_code`.
pub fn compile_program(program: &CoreProgram) -> Result<Vec<(Name, usize, Code)>, CompileError> {
    let reserved = reserved_global_names();

    let main = program
        .iter()
        .find(|sc| sc.name == "main")
        .ok_or(CompileError::MissingMain)?;
    if main.arity() != 0 {
        return Err(CompileError::MainHasArguments { found: main.arity() });
    }

    let mut seen = HashSet::new();
    let mut ctors = HashSet::new();
    for sc in program {
        if reserved.contains(&sc.name) {
            return Err(CompileError::DuplicateSupercombinator(sc.name.clone()));
        }
        if !seen.insert(sc.name.clone()) {
            return Err(CompileError::DuplicateSupercombinator(sc.name.clone()));
        }
        let mut params = HashSet::new();
        for p in &sc.params {
            if !params.insert(p.clone()) {
                return Err(CompileError::DuplicateBinder(p.clone()));
            }
        }
        validate_and_collect_ctors(&sc.body, &mut ctors)?;
    }

    let synthesized_ctors: Vec<ScDefn> = ctors
        .into_iter()
        .map(|(tag, arity)| {
            let params: Vec<Name> = (0..arity).map(|i| format!("_p{i}")).collect();
            let body = gml_ast::apply(
                Expr::Constr { tag, arity },
                params.iter().cloned().map(Expr::Var),
            );
            ScDefn { name: constructor_global_name(tag, arity), params, body }
        })
        .collect();

    let mut all_defns = program.clone();
    all_defns.extend(gml_primitives::prelude_supercombinators());
    all_defns.extend(synthesized_ctors);

    tracing::debug!(supercombinators = all_defns.len(), "compiling program");
    let compiled: Vec<_> = all_defns.iter().map(compile_sc).collect::<Result<_, _>>()?;
    tracing::debug!(compiled = compiled.len(), "compilation finished");
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gml_ast::{apply, binop};

    fn sc(name: &str, params: &[&str], body: Expr) -> ScDefn {
        ScDefn {
            name: name.to_string(),
            params: params.iter().map(|s| s.to_string()).collect(),
            body,
        }
    }

    fn find<'a>(compiled: &'a [(Name, usize, Code)], name: &str) -> &'a (Name, usize, Code) {
        compiled.iter().find(|(n, ..)| n == name).expect("missing supercombinator")
    }

    #[test]
    fn compiles_the_simplest_program() {
        let program = vec![sc("main", &[], Expr::Int(42))];
        let compiled = compile_program(&program).unwrap();
        let (_, arity, code) = find(&compiled, "main");
        assert_eq!(*arity, 0);
        assert_eq!(
            code,
            &vec![Instr::Pushint(42), Instr::Update(0), Instr::Pop(0), Instr::Unwind]
        );
    }

    #[test]
    fn open_codes_a_saturated_binary_primop() {
        let program = vec![sc(
            "main",
            &[],
            binop("+", Expr::Int(3), Expr::Int(4)),
        )];
        let compiled = compile_program(&program).unwrap();
        let (_, _, code) = find(&compiled, "main");
        assert!(code.contains(&Instr::Prim(Prim::Add)));
        assert!(!code.iter().any(|i| matches!(i, Instr::Pushglobal(n) if n == "+")));
    }

    #[test]
    fn missing_main_is_a_compile_error() {
        let program = vec![sc("f", &[], Expr::Int(1))];
        assert!(matches!(compile_program(&program), Err(CompileError::MissingMain)));
    }

    #[test]
    fn main_with_arguments_is_a_compile_error() {
        let program = vec![sc("main", &["x"], Expr::Var("x".to_string()))];
        assert!(matches!(
            compile_program(&program),
            Err(CompileError::MainHasArguments { found: 1 })
        ));
    }

    #[test]
    fn redefining_a_reserved_name_is_rejected() {
        let program = vec![
            sc("main", &[], Expr::Int(0)),
            sc("id", &["x"], Expr::Var("x".to_string())),
        ];
        assert!(matches!(
            compile_program(&program),
            Err(CompileError::DuplicateSupercombinator(_))
        ));
    }

    #[test]
    fn tag_zero_is_rejected() {
        let program = vec![sc("main", &[], Expr::Constr { tag: 0, arity: 0 })];
        assert!(matches!(
            compile_program(&program),
            Err(CompileError::ReservedConstructorTag(0))
        ));
    }

    #[test]
    fn overapplied_if_is_a_compile_error() {
        let over_if = apply(
            Expr::Var("if".to_string()),
            [Expr::Int(1), Expr::Int(2), Expr::Int(3), Expr::Int(4)],
        );
        let program = vec![sc("main", &[], over_if)];
        assert!(matches!(
            compile_program(&program),
            Err(CompileError::ArityMismatch { construct: "if", .. })
        ));
    }

    #[test]
    fn synthesizes_a_callable_global_for_a_bare_constructor() {
        let program = vec![sc("main", &[], Expr::Constr { tag: 7, arity: 2 })];
        let compiled = compile_program(&program).unwrap();
        assert!(compiled.iter().any(|(n, ..)| n == &constructor_global_name(7, 2)));
    }

    #[test]
    fn case_compiles_split_and_slide_around_each_alternative() {
        let alt = gml_ast::Alt {
            tag: 2,
            binders: vec!["h".to_string(), "t".to_string()],
            body: Expr::Var("h".to_string()),
        };
        let case = Expr::Case {
            scrutinee: Box::new(Expr::Var("xs".to_string())),
            alts: vec![alt],
        };
        let program = vec![sc("main", &["xs"], case)];
        let compiled = compile_program(&program).unwrap();
        let (_, _, code) = find(&compiled, "main");
        let jump = code.iter().find_map(|i| match i {
            Instr::CaseJump(table) => Some(table),
            _ => None,
        });
        let table = jump.expect("expected a CaseJump");
        assert_eq!(table.len(), 1);
        let (tag, arm) = &table[0];
        assert_eq!(*tag, 2);
        assert_eq!(arm.first(), Some(&Instr::Split(2)));
        assert_eq!(arm.last(), Some(&Instr::Slide(2)));
    }
}
