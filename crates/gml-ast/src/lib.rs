//! The abstract syntax tree produced by a front end and consumed by the
//! compiler. Nothing in this crate touches source text or bytecode; it is
//! the flat, immutable tree shape shared by both.

/// Identifiers are plain names; both local binders and supercombinator
/// names live in the same namespace at the AST level.
pub type Name = String;

/// A constructor tag. Zero is reserved to mean "no constructor" and never
/// appears in a well-formed [`Expr::Constr`] or [`Alt`].
pub type Tag = u16;

/// One alternative of a `case` expression: `<tag> binder* -> body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alt {
    pub tag: Tag,
    pub binders: Vec<Name>,
    pub body: Expr,
}

impl Alt {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.binders.len()
    }
}

/// A core-language expression.
///
/// Every bound name is unique within the scope it is introduced in; callers
/// that build `Expr` values by hand (rather than through a parser) are
/// responsible for keeping that invariant. `let` binders are not visible in
/// their own right-hand sides; `letrec` binders are visible in every
/// right-hand side, enabling mutual recursion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A reference to a local binder or a top-level supercombinator.
    Var(Name),
    /// An integer literal.
    Int(i64),
    /// A primitive operator used as a first-class value, e.g. `(+)`.
    /// Distinct from [`Expr::Var`] only so that a front end can record that
    /// the name came from parenthesized-operator syntax; the compiler
    /// resolves both the same way (through the primitive/global registry).
    PrimOp(Name),
    /// Curried single-argument application, `f a`.
    App(Box<Expr>, Box<Expr>),
    /// `let`/`letrec` with one or more simultaneous bindings.
    Let {
        is_rec: bool,
        defns: Vec<(Name, Expr)>,
        body: Box<Expr>,
    },
    /// A saturated or partially applied constructor reference, written
    /// `Pack{tag, arity}` in source.
    Constr { tag: Tag, arity: usize },
    /// Discrimination on a constructor's tag.
    Case { scrutinee: Box<Expr>, alts: Vec<Alt> },
}

/// A top-level supercombinator definition: a name, its curried parameter
/// list, and a body expression. `main` must have arity 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScDefn {
    pub name: Name,
    pub params: Vec<Name>,
    pub body: Expr,
}

impl ScDefn {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A whole program: a flat bag of supercombinators. Order does not matter
/// to the compiler, since every global is resolved by name.
pub type CoreProgram = Vec<ScDefn>;

/// Builds `App(App(PrimOp(op), lhs), rhs)`, the desugaring every binary
/// operator in source syntax goes through.
#[must_use]
pub fn binop(op: impl Into<Name>, lhs: Expr, rhs: Expr) -> Expr {
    Expr::App(
        Box::new(Expr::App(Box::new(Expr::PrimOp(op.into())), Box::new(lhs))),
        Box::new(rhs),
    )
}

/// Builds a left-associated application spine from a function and its
/// arguments in source order, `f a1 a2 .. an`.
#[must_use]
pub fn apply(func: Expr, args: impl IntoIterator<Item = Expr>) -> Expr {
    args.into_iter()
        .fold(func, |f, a| Expr::App(Box::new(f), Box::new(a)))
}

/// Walks an application spine from the outside in, returning the head
/// expression and the arguments in left-to-right (call) order.
///
/// `f a1 a2 a3` unwinds to `(f, [a1, a2, a3])`.
#[must_use]
pub fn unwind_spine(mut expr: &Expr) -> (&Expr, Vec<&Expr>) {
    let mut rev_args = Vec::new();
    while let Expr::App(f, a) = expr {
        rev_args.push(a.as_ref());
        expr = f;
    }
    rev_args.reverse();
    (expr, rev_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_spine_recovers_head_and_args_in_order() {
        let expr = apply(Expr::Var("f".into()), [Expr::Int(1), Expr::Int(2), Expr::Int(3)]);
        let (head, args) = unwind_spine(&expr);
        assert_eq!(head, &Expr::Var("f".into()));
        assert_eq!(args, vec![&Expr::Int(1), &Expr::Int(2), &Expr::Int(3)]);
    }

    #[test]
    fn binop_desugars_to_nested_application() {
        let expr = binop("+", Expr::Int(1), Expr::Int(2));
        assert_eq!(
            expr,
            Expr::App(
                Box::new(Expr::App(
                    Box::new(Expr::PrimOp("+".into())),
                    Box::new(Expr::Int(1))
                )),
                Box::new(Expr::Int(2))
            )
        );
    }
}
