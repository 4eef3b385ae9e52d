//! A small recursive-descent parser, built from `nom` combinators, that
//! turns source text into a [`gml_ast::CoreProgram`].
//!
//! Operator precedence (loosest to tightest): `||`, `&&`, the relational
//! operators (non-associative), `+`/`-`, `*`/`/`, `.` (function
//! composition), then application. `&&`/`||` desugar through the `if`
//! combinator so they inherit its laziness (short-circuiting comes for
//! free); `.` desugars to the `compose` prelude function.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace1};
use nom::combinator::{map, map_res, not, peek, recognize, value};
use nom::multi::{many0, many1};
use nom::sequence::pair;
use nom::IResult;

use gml_ast::{apply, binop, Alt, CoreProgram, Expr, Name, ScDefn, Tag};

/// Failure to parse source text into a program.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),
}

type Input<'a> = &'a str;
type PResult<'a, O> = IResult<Input<'a>, O>;

const KEYWORDS: &[&str] = &["let", "letrec", "in", "case", "of", "Pack"];

fn comment(i: Input) -> PResult<()> {
    value((), pair(tag("--"), take_while(|c: char| c != '\n')))(i)
}

fn ws0(i: Input) -> PResult<()> {
    value((), many0(alt((value((), multispace1), comment))))(i)
}

fn tok<'a, O>(mut p: impl FnMut(Input<'a>) -> PResult<'a, O>) -> impl FnMut(Input<'a>) -> PResult<'a, O> {
    move |i| {
        let (i, _) = ws0(i)?;
        p(i)
    }
}

fn identifier(i: Input) -> PResult<Name> {
    let (rest, s) = recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(i)?;
    if KEYWORDS.contains(&s) {
        return Err(nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Tag)));
    }
    Ok((rest, s.to_string()))
}

fn int_literal(i: Input) -> PResult<i64> {
    map_res(digit1, str::parse)(i)
}

/// A reserved word, rejecting a match that is really just the prefix of a
/// longer identifier (`let` must not swallow `letters`).
fn keyword<'a>(s: &'static str) -> impl FnMut(Input<'a>) -> PResult<'a, Input<'a>> {
    move |i: Input<'a>| {
        let (i, _) = ws0(i)?;
        let (rest, matched) = tag(s)(i)?;
        if rest.chars().next().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Tag)));
        }
        Ok((rest, matched))
    }
}

fn pack_literal(i: Input) -> PResult<Expr> {
    let (i, _) = keyword("Pack")(i)?;
    let (i, _) = tok(char('{'))(i)?;
    let (i, tag_val) = tok(int_literal)(i)?;
    let (i, _) = tok(char(','))(i)?;
    let (i, arity_val) = tok(int_literal)(i)?;
    let (i, _) = tok(char('}'))(i)?;
    Ok((i, Expr::Constr { tag: tag_val as Tag, arity: arity_val as usize }))
}

fn binop_symbol(i: Input) -> PResult<&'static str> {
    tok(alt((
        value("<=", tag("<=")),
        value(">=", tag(">=")),
        value("==", tag("==")),
        value("/=", tag("/=")),
        value("&&", tag("&&")),
        value("||", tag("||")),
        value("+", tag("+")),
        value("-", tag("-")),
        value("*", tag("*")),
        value("/", terminated_slash),
        value("<", tag("<")),
        value(">", tag(">")),
        value(".", tag(".")),
    )))(i)
}

/// `/` not immediately followed by `=`, so a lone division never eats half
/// of a `/=` meant for the comparison level above it.
fn terminated_slash(i: Input) -> PResult<Input> {
    let (rest, slash) = tag("/")(i)?;
    let (_, _) = not(peek(char('=')))(rest)?;
    Ok((rest, slash))
}

fn parenthesized(i: Input) -> PResult<Expr> {
    let (i, _) = tok(char('('))(i)?;
    let (i, e) = alt((map(binop_symbol, |op| Expr::PrimOp(op.to_string())), expr))(i)?;
    let (i, _) = tok(char(')'))(i)?;
    Ok((i, e))
}

fn aexpr(i: Input) -> PResult<Expr> {
    alt((
        pack_literal,
        map(tok(int_literal), Expr::Int),
        parenthesized,
        map(tok(identifier), Expr::Var),
    ))(i)
}

fn app_expr(i: Input) -> PResult<Expr> {
    let (i, first) = aexpr(i)?;
    let (i, rest) = many0(aexpr)(i)?;
    Ok((i, apply(first, rest)))
}

fn compose_expr(i: Input) -> PResult<Expr> {
    let (mut i, mut lhs) = app_expr(i)?;
    loop {
        match tok(char('.'))(i) {
            Ok((rest, _)) => {
                let (rest, rhs) = app_expr(rest)?;
                lhs = apply(Expr::Var("compose".to_string()), [lhs, rhs]);
                i = rest;
            }
            Err(_) => return Ok((i, lhs)),
        }
    }
}

fn mul_expr(i: Input) -> PResult<Expr> {
    let (mut i, mut lhs) = compose_expr(i)?;
    loop {
        let attempt = tok(alt((value("*", tag("*")), value("/", terminated_slash))))(i);
        match attempt {
            Ok((rest, op)) => {
                let (rest, rhs) = compose_expr(rest)?;
                lhs = binop(op, lhs, rhs);
                i = rest;
            }
            Err(_) => return Ok((i, lhs)),
        }
    }
}

fn add_expr(i: Input) -> PResult<Expr> {
    let (mut i, mut lhs) = mul_expr(i)?;
    loop {
        let attempt = tok(alt((value("+", tag("+")), value("-", tag("-")))))(i);
        match attempt {
            Ok((rest, op)) => {
                let (rest, rhs) = mul_expr(rest)?;
                lhs = binop(op, lhs, rhs);
                i = rest;
            }
            Err(_) => return Ok((i, lhs)),
        }
    }
}

fn cmp_expr(i: Input) -> PResult<Expr> {
    let (i, lhs) = add_expr(i)?;
    let attempt = tok(alt((
        value("<=", tag("<=")),
        value(">=", tag(">=")),
        value("==", tag("==")),
        value("/=", tag("/=")),
        value("<", tag("<")),
        value(">", tag(">")),
    )))(i);
    match attempt {
        Ok((rest, op)) => {
            let (rest, rhs) = add_expr(rest)?;
            Ok((rest, binop(op, lhs, rhs)))
        }
        Err(_) => Ok((i, lhs)),
    }
}

fn and_expr(i: Input) -> PResult<Expr> {
    let (mut i, mut lhs) = cmp_expr(i)?;
    loop {
        match tok(tag("&&"))(i) {
            Ok((rest, _)) => {
                let (rest, rhs) = cmp_expr(rest)?;
                lhs = apply(
                    Expr::Var("if".to_string()),
                    [lhs, rhs, Expr::Var("false".to_string())],
                );
                i = rest;
            }
            Err(_) => return Ok((i, lhs)),
        }
    }
}

fn or_expr(i: Input) -> PResult<Expr> {
    let (mut i, mut lhs) = and_expr(i)?;
    loop {
        match tok(tag("||"))(i) {
            Ok((rest, _)) => {
                let (rest, rhs) = and_expr(rest)?;
                lhs = apply(
                    Expr::Var("if".to_string()),
                    [lhs, Expr::Var("true".to_string()), rhs],
                );
                i = rest;
            }
            Err(_) => return Ok((i, lhs)),
        }
    }
}

fn let_expr(i: Input) -> PResult<Expr> {
    let (i, is_rec) = alt((
        value(true, tok(tag("letrec"))),
        value(false, tok(tag("let"))),
    ))(i)?;
    let (i, defns) = many1(defn)(i)?;
    let (i, _) = tok(tag("in"))(i)?;
    let (i, body) = expr(i)?;
    Ok((i, Expr::Let { is_rec, defns, body: Box::new(body) }))
}

fn defn(i: Input) -> PResult<(Name, Expr)> {
    let (i, name) = tok(identifier)(i)?;
    let (i, _) = tok(char('='))(i)?;
    let (i, e) = expr(i)?;
    let (i, _) = tok(char(';'))(i)?;
    Ok((i, (name, e)))
}

fn case_expr(i: Input) -> PResult<Expr> {
    let (i, _) = tok(tag("case"))(i)?;
    let (i, scrutinee) = expr(i)?;
    let (i, _) = tok(tag("of"))(i)?;
    let (i, alts) = many1(alt_arm)(i)?;
    Ok((i, Expr::Case { scrutinee: Box::new(scrutinee), alts }))
}

fn alt_arm(i: Input) -> PResult<Alt> {
    let (i, _) = tok(char('<'))(i)?;
    let (i, tag_val) = tok(int_literal)(i)?;
    let (i, _) = tok(char('>'))(i)?;
    let (i, binders) = many0(tok(identifier))(i)?;
    let (i, _) = tok(tag("->"))(i)?;
    let (i, body) = expr(i)?;
    let (i, _) = tok(char(';'))(i)?;
    Ok((i, Alt { tag: tag_val as Tag, binders, body }))
}

fn expr(i: Input) -> PResult<Expr> {
    alt((let_expr, case_expr, or_expr))(i)
}

fn scdefn(i: Input) -> PResult<ScDefn> {
    let (i, name) = tok(identifier)(i)?;
    let (i, params) = many0(tok(identifier))(i)?;
    let (i, _) = tok(char('='))(i)?;
    let (i, body) = expr(i)?;
    let (i, _) = tok(char(';'))(i)?;
    Ok((i, ScDefn { name, params, body }))
}

/// Parses a whole program: one or more supercombinator definitions,
/// consuming the entire input (leading/trailing whitespace and comments
/// are ignored).
pub fn parse_program(source: &str) -> Result<CoreProgram, ParseError> {
    let (rest, defns) = many1(scdefn)(source).map_err(|e| ParseError::Syntax(format!("{e:?}")))?;
    let (rest, _) = ws0(rest)
        .map_err(|e: nom::Err<nom::error::Error<&str>>| ParseError::Syntax(format!("{e:?}")))?;
    if !rest.is_empty() {
        return Err(ParseError::Syntax(format!(
            "unconsumed input starting at: {:?}",
            &rest[..rest.len().min(40)]
        )));
    }
    Ok(defns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_simplest_program() {
        let program = parse_program("main = 42;").unwrap();
        assert_eq!(program.len(), 1);
        assert_eq!(program[0].name, "main");
        assert_eq!(program[0].body, Expr::Int(42));
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let program = parse_program("main = 3 + 4 * 2;").unwrap();
        let expected = binop("+", Expr::Int(3), binop("*", Expr::Int(4), Expr::Int(2)));
        assert_eq!(program[0].body, expected);
    }

    #[test]
    fn parses_a_multi_argument_supercombinator() {
        let program = parse_program("s f g x = f x (g x);").unwrap();
        assert_eq!(program[0].params, vec!["f", "g", "x"]);
    }

    #[test]
    fn parses_letrec_and_application() {
        let src = "main = letrec ones = cons 1 ones in 0;";
        let program = parse_program(src).unwrap();
        assert!(matches!(program[0].body, Expr::Let { is_rec: true, .. }));
    }

    #[test]
    fn parses_case_with_pack_alternatives() {
        let src = "len xs = case xs of <1> -> 0; <2> h t -> 1 + len t;;";
        let program = parse_program(src).unwrap();
        assert!(matches!(program[0].body, Expr::Case { .. }));
    }

    #[test]
    fn skips_comments() {
        let src = "-- a comment\nmain = 1; -- trailing\n";
        let program = parse_program(src).unwrap();
        assert_eq!(program[0].body, Expr::Int(1));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_program("main = 1; @@@").is_err());
    }

    #[test]
    fn desugars_and_through_if() {
        let program = parse_program("main = true && false;").unwrap();
        match &program[0].body {
            Expr::App(..) => {
                let (head, args) = gml_ast::unwind_spine(&program[0].body);
                assert_eq!(head, &Expr::Var("if".to_string()));
                assert_eq!(args.len(), 3);
            }
            other => panic!("expected desugared if, got {other:?}"),
        }
    }
}
