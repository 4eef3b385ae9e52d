//! Error types shared across the compiler and the interpreter.
//!
//! The policy is the one described for the engine as a whole: every error
//! here is fatal. There is no variant that a caller is expected to retry or
//! recover from; catching one just gives a human-readable place to stop.

use gml_ast::{Name, Tag};

/// Errors raised while turning an AST into bytecode, before any
/// instruction ever runs.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("no supercombinator named `main`")]
    MissingMain,

    #[error("`main` must have arity 0, found arity {found}")]
    MainHasArguments { found: usize },

    #[error("{construct} requires exactly {expected} argument(s), found {found}")]
    ArityMismatch {
        construct: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("name `{0}` is bound more than once in the same scope")]
    DuplicateBinder(Name),

    #[error("supercombinator `{0}` is defined more than once")]
    DuplicateSupercombinator(Name),

    #[error("constructor tag {0} is reserved and may not be used")]
    ReservedConstructorTag(Tag),

    #[error("{0} cannot appear where only a graph can be built, not evaluated in place")]
    UnsupportedInLazyPosition(&'static str),
}

/// Errors raised by the instruction dispatcher while a program is running.
/// Every one of these is an engine bug or a malformed program; none is
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("undefined global `{0}`")]
    UndefinedGlobal(Name),

    #[error("not enough arguments applying `{global}`: needs {needed}, has {available}")]
    NotEnoughArguments {
        global: Name,
        needed: usize,
        available: usize,
    },

    #[error("type error: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("no alternative in case matches tag {0}")]
    NoMatchingAlternative(Tag),

    #[error("split arity mismatch: constructor has {found} components, pattern expects {expected}")]
    SplitArityMismatch { expected: usize, found: usize },

    #[error("dereferenced unallocated heap address {0}")]
    UnallocatedAddress(usize),

    #[error("entered a letrec placeholder before it was initialised")]
    UninitialisedCellEntered,

    #[error("conditional value {0} is outside {{0, 1}}")]
    ConditionalOutOfRange(i64),

    #[error("division by zero")]
    DivisionByZero,

    #[error("stack depth exceeded the configured maximum of {0}")]
    StackOverflow(usize),

    #[error("internal invariant violated: {0}")]
    Invariant(&'static str),
}
