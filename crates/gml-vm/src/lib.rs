//! The instruction dispatcher and the `Unwind` state machine: the two
//! pieces that turn compiled bytecode into lazy graph reduction with
//! sharing.
//!
//! [`Machine`] owns every piece of mutable state the engine touches (the
//! heap, the stack, the dump and the read-only global environment) and
//! exposes exactly one interesting operation: [`Machine::run`], which
//! drives the dispatch loop until `main` reaches weak head normal form.
//! Building the initial state -- allocating an `NGlobal` cell for every
//! supercombinator and every primitive, then seeding `Pushglobal main;
//! Eval` -- is [`Machine::new`].

use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;

use gml_ast::{CoreProgram, Name, Tag};
use gml_bytecode::{Code, Instr, Prim};
use gml_errors::{CompileError, RuntimeError};
use gml_heap::{Addr, Heap, Node};

/// Resource bounds a sensible implementation imposes even though the
/// abstract machine itself has none. Exceeding [`Limits::max_stack_depth`]
/// fails fast with [`RuntimeError::StackOverflow`] rather than letting the
/// host process run out of memory.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_stack_depth: usize,
    /// Bounds the dump separately from the stack: a non-tail-recursive
    /// strict chain (each level forcing its left operand via `Eval`)
    /// grows the dump while the stack itself stays small, since `Eval`
    /// resets the working stack to a single address each time.
    pub max_dump_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_stack_depth: 1 << 20, max_dump_depth: 1 << 20 }
    }
}

/// Reduction counters, purely for observability; nothing here influences
/// the result of a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub instructions_dispatched: u64,
    pub pushglobals: u64,
    pub pushints: u64,
    pub mkaps: u64,
    pub updates: u64,
    pub unwind_steps: u64,
    pub evals: u64,
    pub supercombinator_calls: u64,
    pub peak_stack_depth: usize,
    pub peak_dump_depth: usize,
}

/// The weak head normal form `main` was reduced to: either a literal
/// integer or a saturated constructor. Components of a constructor are
/// left as heap addresses -- dereferencing and printing them is an
/// external collaborator's job (see the `gml-cli` crate), not the
/// engine's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whnf {
    Int(i64),
    Constr { tag: Tag, components: Vec<Addr> },
}

/// A saved continuation: the caller's instruction pointer, code and stack
/// at the point an `Eval` suspended it to force some sub-computation.
struct DumpFrame {
    code: Rc<Code>,
    pc: usize,
    stack: Vec<Addr>,
}

/// The abstract machine: heap, stack, dump, instruction pointer and the
/// read-only global environment, all owned by a single run. Nothing here
/// is shared across instances; see the crate-level docs on why that's
/// fine for this evaluator.
pub struct Machine {
    heap: Heap,
    globals: HashMap<Name, Addr>,
    user_supercombinators: HashSet<Name>,
    code: Rc<Code>,
    pc: usize,
    stack: Vec<Addr>,
    dump: Vec<DumpFrame>,
    limits: Limits,
    stats: Stats,
}

impl Machine {
    /// Compiles `program` (plus the prelude and `if`) and allocates one
    /// `NGlobal` heap cell per supercombinator, seeding the machine with
    /// `Pushglobal main; Eval`.
    pub fn new(program: &CoreProgram, limits: Limits) -> Result<Self, CompileError> {
        let compiled = gml_compiler::compile_program(program)?;
        let user_supercombinators: HashSet<Name> =
            program.iter().map(|sc| sc.name.clone()).collect();

        let mut heap = Heap::new();
        let mut globals = HashMap::with_capacity(compiled.len() + 1);
        for (name, arity, code) in compiled {
            let addr = heap.alloc(Node::Global { name: name.clone(), arity, code: Rc::new(code) });
            globals.insert(name, addr);
        }

        // `if` has no `Expr` representation, so it isn't part of
        // `compile_program`'s output; it's registered the same way every
        // other global is, straight from its hand-written bytecode body.
        let if_addr = heap.alloc(Node::Global {
            name: gml_primitives::IF_NAME.to_string(),
            arity: 3,
            code: Rc::new(gml_primitives::if_global_code()),
        });
        globals.insert(gml_primitives::IF_NAME.to_string(), if_addr);

        let code = Rc::new(vec![Instr::Pushglobal("main".to_string()), Instr::Eval]);

        Ok(Self {
            heap,
            globals,
            user_supercombinators,
            code,
            pc: 0,
            stack: Vec::new(),
            dump: Vec::new(),
            limits,
            stats: Stats::default(),
        })
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The names of the supercombinators the caller's program defined,
    /// sorted for stable disassembly output. Excludes the prelude and
    /// `if`.
    #[must_use]
    pub fn user_supercombinator_names(&self) -> Vec<Name> {
        let mut names: Vec<Name> = self.user_supercombinators.iter().cloned().collect();
        names.sort();
        names
    }

    /// The arity and compiled code of a global, for disassembly.
    pub fn global_code(&self, name: &str) -> Result<(usize, Rc<Code>), RuntimeError> {
        let addr = *self
            .globals
            .get(name)
            .ok_or_else(|| RuntimeError::UndefinedGlobal(name.to_string()))?;
        match self.heap.lookup(addr)? {
            Node::Global { arity, code, .. } => Ok((*arity, code.clone())),
            other => Err(RuntimeError::TypeMismatch { expected: "NGlobal", found: other.kind_name() }),
        }
    }

    /// Runs the dispatch loop to completion: either `main` reaches weak
    /// head normal form, or a [`RuntimeError`] aborts the run. There is no
    /// partial result on error; see the engine's fatal-error policy.
    pub fn run(&mut self) -> Result<Whnf, RuntimeError> {
        loop {
            if self.pc >= self.code.len() {
                if self.dump.is_empty() {
                    break;
                }
                return Err(RuntimeError::Invariant("code exhausted with a non-empty dump"));
            }
            let instr = self.code[self.pc].clone();
            self.pc += 1;
            self.stats.instructions_dispatched += 1;
            self.step(instr)?;
        }

        let addr = *self.stack.last().ok_or(RuntimeError::Invariant("empty stack at termination"))?;
        let (_, node) = self.heap.deref_final(addr)?;
        match node {
            Node::Int(v) => Ok(Whnf::Int(*v)),
            Node::Constr { tag, components } => {
                Ok(Whnf::Constr { tag: *tag, components: components.clone() })
            }
            other => Err(RuntimeError::TypeMismatch {
                expected: "NInt or NConstr",
                found: other.kind_name(),
            }),
        }
    }

    fn push(&mut self, addr: Addr) -> Result<(), RuntimeError> {
        self.stack.push(addr);
        if self.stack.len() > self.limits.max_stack_depth {
            return Err(RuntimeError::StackOverflow(self.limits.max_stack_depth));
        }
        self.stats.peak_stack_depth = self.stats.peak_stack_depth.max(self.stack.len());
        Ok(())
    }

    fn pop(&mut self) -> Result<Addr, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::Invariant("popped an empty stack"))
    }

    fn offset_from_top(&self, n: usize) -> Result<usize, RuntimeError> {
        self.stack.len().checked_sub(n + 1).ok_or(RuntimeError::Invariant("stack offset out of range"))
    }

    fn step(&mut self, instr: Instr) -> Result<(), RuntimeError> {
        match instr {
            Instr::Pushglobal(name) => {
                let addr = *self
                    .globals
                    .get(&name)
                    .ok_or_else(|| RuntimeError::UndefinedGlobal(name.clone()))?;
                self.stats.pushglobals += 1;
                self.push(addr)?;
            }
            Instr::Pushint(k) => {
                let addr = self.heap.alloc(Node::Int(k));
                self.stats.pushints += 1;
                self.push(addr)?;
            }
            Instr::Push(n) => {
                let idx = self.offset_from_top(n)?;
                let addr = self.stack[idx];
                self.push(addr)?;
            }
            Instr::Mkap => {
                let func = self.pop()?;
                let arg = self.pop()?;
                let addr = self.heap.alloc(Node::Ap { func, arg });
                self.stats.mkaps += 1;
                self.push(addr)?;
            }
            Instr::Update(n) => {
                let value = self.pop()?;
                let idx = self.offset_from_top(n)?;
                let target = self.stack[idx];
                self.heap.update(target, Node::Indirect(value))?;
                self.stats.updates += 1;
            }
            Instr::Pop(n) => {
                let new_len = self.stack.len().checked_sub(n).ok_or(RuntimeError::Invariant("Pop below empty stack"))?;
                self.stack.truncate(new_len);
            }
            Instr::Slide(n) => {
                let top = self.pop()?;
                let new_len = self.stack.len().checked_sub(n).ok_or(RuntimeError::Invariant("Slide below empty stack"))?;
                self.stack.truncate(new_len);
                self.push(top)?;
            }
            Instr::Alloc(n) => {
                for addr in self.heap.alloc_placeholders(n) {
                    self.push(addr)?;
                }
            }
            Instr::Unwind => {
                self.unwind()?;
            }
            Instr::Eval => {
                let a = self.pop()?;
                let saved_stack = std::mem::take(&mut self.stack);
                self.dump.push(DumpFrame { code: self.code.clone(), pc: self.pc, stack: saved_stack });
                if self.dump.len() > self.limits.max_dump_depth {
                    return Err(RuntimeError::StackOverflow(self.limits.max_dump_depth));
                }
                self.stats.peak_dump_depth = self.stats.peak_dump_depth.max(self.dump.len());
                self.stack = vec![a];
                self.code = Rc::new(vec![Instr::Unwind]);
                self.pc = 0;
                self.stats.evals += 1;
            }
            Instr::Cond(then_code, else_code) => {
                let addr = self.pop()?;
                let v = match self.heap.lookup(addr)? {
                    Node::Int(v) => *v,
                    other => {
                        return Err(RuntimeError::TypeMismatch { expected: "NInt", found: other.kind_name() })
                    }
                };
                match v {
                    1 => {
                        self.code = Rc::new(then_code);
                        self.pc = 0;
                    }
                    0 => {
                        self.code = Rc::new(else_code);
                        self.pc = 0;
                    }
                    other => return Err(RuntimeError::ConditionalOutOfRange(other)),
                }
            }
            Instr::Pack(tag, arity) => {
                let mut components = Vec::with_capacity(arity);
                for _ in 0..arity {
                    components.push(self.pop()?);
                }
                let addr = self.heap.alloc(Node::Constr { tag, components });
                self.push(addr)?;
            }
            Instr::CaseJump(arms) => {
                let addr = *self.stack.last().ok_or(RuntimeError::Invariant("CaseJump on empty stack"))?;
                let tag = match self.heap.lookup(addr)? {
                    Node::Constr { tag, .. } => *tag,
                    other => {
                        return Err(RuntimeError::TypeMismatch { expected: "NConstr", found: other.kind_name() })
                    }
                };
                let arm = arms
                    .into_iter()
                    .find_map(|(t, code)| (t == tag).then_some(code))
                    .ok_or(RuntimeError::NoMatchingAlternative(tag))?;
                self.code = Rc::new(arm);
                self.pc = 0;
            }
            Instr::Split(arity) => {
                let addr = self.pop()?;
                let components = match self.heap.lookup(addr)? {
                    Node::Constr { components, .. } => components.clone(),
                    other => {
                        return Err(RuntimeError::TypeMismatch { expected: "NConstr", found: other.kind_name() })
                    }
                };
                if components.len() != arity {
                    return Err(RuntimeError::SplitArityMismatch {
                        expected: arity,
                        found: components.len(),
                    });
                }
                for &c in components.iter().rev() {
                    self.push(c)?;
                }
            }
            Instr::Prim(prim) => self.eval_prim(prim)?,
        }
        Ok(())
    }

    /// Pops the primitive's operands (already evaluated -- the E-scheme
    /// only open-codes a saturated, strict application), applies it, and
    /// pushes a fresh `NInt` with the result. The left operand was pushed
    /// last by the compiler, so it's `args[0]` here; see
    /// `gml-compiler::compile_e_prim`.
    fn eval_prim(&mut self, prim: Prim) -> Result<(), RuntimeError> {
        let arity = prim.arity();
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            let addr = self.pop()?;
            let v = match self.heap.lookup(addr)? {
                Node::Int(v) => *v,
                other => {
                    return Err(RuntimeError::TypeMismatch { expected: "NInt", found: other.kind_name() })
                }
            };
            args.push(v);
        }
        let result = match prim {
            Prim::Negate => -args[0],
            Prim::Add => args[0] + args[1],
            Prim::Sub => args[0] - args[1],
            Prim::Mul => args[0] * args[1],
            Prim::Div => {
                if args[1] == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                args[0] / args[1]
            }
            Prim::Eq => i64::from(args[0] == args[1]),
            Prim::Ne => i64::from(args[0] != args[1]),
            Prim::Lt => i64::from(args[0] < args[1]),
            Prim::Le => i64::from(args[0] <= args[1]),
            Prim::Gt => i64::from(args[0] > args[1]),
            Prim::Ge => i64::from(args[0] >= args[1]),
        };
        let addr = self.heap.alloc(Node::Int(result));
        self.push(addr)
    }

    /// The core reduction step: walk the spine at the top of the stack
    /// towards a reducible head, then perform one `Unwind`. The `NAp` and
    /// `NIndirect` cases "stay in Unwind" per the spec by looping here
    /// rather than re-entering the dispatch loop on the same instruction.
    fn unwind(&mut self) -> Result<(), RuntimeError> {
        loop {
            self.stats.unwind_steps += 1;
            let top = *self.stack.last().ok_or(RuntimeError::Invariant("unwind on empty stack"))?;
            let node = self.heap.lookup(top)?.clone();
            match node {
                Node::Int(_) | Node::Constr { .. } => {
                    if let Some(frame) = self.dump.pop() {
                        self.code = frame.code;
                        self.pc = frame.pc;
                        self.stack = frame.stack;
                        self.push(top)?;
                    } else {
                        // Evaluation is complete: leave `top` as the sole
                        // result and halt the dispatch loop by exhausting
                        // `code` with nothing left to restore from.
                        self.code = Rc::new(Vec::new());
                        self.pc = 0;
                    }
                    return Ok(());
                }
                Node::Ap { func, .. } => {
                    self.push(func)?;
                }
                Node::Indirect(target) => {
                    *self.stack.last_mut().expect("checked non-empty above") = target;
                }
                Node::Global { name, arity, code } => {
                    let below = self.stack.len() - 1;
                    if below < arity {
                        if let Some(frame) = self.dump.pop() {
                            // A partial application forced by a
                            // primitive's strictness: restore the
                            // caller and hand back its original root,
                            // unevaluated past this point.
                            let root = self.stack[0];
                            self.code = frame.code;
                            self.pc = frame.pc;
                            self.stack = frame.stack;
                            self.push(root)?;
                            return Ok(());
                        }
                        return Err(RuntimeError::NotEnoughArguments {
                            global: name,
                            needed: arity,
                            available: below,
                        });
                    }

                    let global_idx = self.stack.len() - 1;
                    let root_idx = global_idx - arity;
                    let mut args = Vec::with_capacity(arity);
                    for i in 1..=arity {
                        let node_addr = self.stack[global_idx - i];
                        let arg = match self.heap.lookup(node_addr)? {
                            Node::Ap { arg, .. } => *arg,
                            other => {
                                return Err(RuntimeError::TypeMismatch {
                                    expected: "NAp",
                                    found: other.kind_name(),
                                })
                            }
                        };
                        args.push(arg);
                    }
                    let root = self.stack[root_idx];
                    self.stack.truncate(root_idx);
                    self.push(root)?;
                    for a in args {
                        self.push(a)?;
                    }
                    self.code = code;
                    self.pc = 0;
                    self.stats.supercombinator_calls += 1;
                    return Ok(());
                }
                Node::Uninitialised => return Err(RuntimeError::UninitialisedCellEntered),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str) -> Whnf {
        let program = gml_parser::parse_program(src).expect("parse");
        let mut machine = Machine::new(&program, Limits::default()).expect("compile");
        machine.run().expect("run")
    }

    fn eval_err(src: &str) -> RuntimeError {
        let program = gml_parser::parse_program(src).expect("parse");
        let mut machine = Machine::new(&program, Limits::default()).expect("compile");
        machine.run().expect_err("expected a runtime error")
    }

    #[test]
    fn s1_integer_literal() {
        assert_eq!(eval("main = 42;"), Whnf::Int(42));
    }

    #[test]
    fn s2_arithmetic_precedence() {
        assert_eq!(eval("main = 3 + 4 * 2;"), Whnf::Int(11));
    }

    #[test]
    fn s3_higher_order_combinators() {
        let src = "s f g x = f x (g x);\nk x y = x;\nmain = s k k 1;";
        assert_eq!(eval(src), Whnf::Int(1));
    }

    #[test]
    fn s4_recursive_fibonacci() {
        let src = "main = fibo 10;\nfibo n = if (n < 2) n ((fibo (n-1)) + (fibo (n-2)));";
        assert_eq!(eval(src), Whnf::Int(55));
    }

    #[test]
    fn s5_if_as_a_first_class_value() {
        let src = "main = myIf 0 123 456;\nmyIf = if;";
        assert_eq!(eval(src), Whnf::Int(456));
    }

    #[test]
    fn s6_unused_letrec_binding_does_not_loop() {
        let src = "main = letrec ones = cons 1 ones in 0;";
        assert_eq!(eval(src), Whnf::Int(0));
    }

    #[test]
    fn r1_every_integer_literal_round_trips() {
        for k in [0, 1, 1000] {
            assert_eq!(eval(&format!("main = {k};")), Whnf::Int(k));
        }
    }

    #[test]
    fn r1_negative_integers_round_trip_through_negate() {
        // The grammar's INT token is unsigned (no unary minus, matching
        // `examples/original_source/spj/parser.py`); a negative result is
        // reached through the `negate` primitive instead of a literal.
        for k in [3, 1000] {
            assert_eq!(eval(&format!("main = negate {k};")), Whnf::Int(-k));
        }
    }

    #[test]
    fn r2_id_is_transparent() {
        assert_eq!(eval("main = id (3 + 4);"), eval("main = 3 + 4;"));
    }

    #[test]
    fn r3_two_independent_runs_agree() {
        let src = "main = fibo 10;\nfibo n = if (n < 2) n ((fibo (n-1)) + (fibo (n-2)));";
        assert_eq!(eval(src), eval(src));
    }

    #[test]
    fn shared_caf_is_computed_once() {
        let src = "huge = 1 + 1;\nmain = huge + huge;";
        assert_eq!(eval(src), Whnf::Int(4));
    }

    #[test]
    fn constructed_value_carries_its_components() {
        let src = "main = cons 1 (cons 2 nil);";
        match eval(src) {
            Whnf::Constr { tag, components } => {
                assert_eq!(tag, gml_primitives::CONS_TAG);
                assert_eq!(components.len(), 2);
            }
            other => panic!("expected a constructor, got {other:?}"),
        }
    }

    #[test]
    fn case_selects_the_matching_alternative() {
        let src = "len xs = case xs of <1> -> 0; <2> h t -> 1 + len t;;\nmain = len (cons 1 (cons 2 nil));";
        assert_eq!(eval(src), Whnf::Int(2));
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        assert!(matches!(eval_err("main = doesNotExist;"), RuntimeError::UndefinedGlobal(_)));
    }

    #[test]
    fn case_with_no_matching_tag_is_fatal() {
        let src = "main = case cons 1 nil of <1> -> 0;;";
        assert!(matches!(eval_err(src), RuntimeError::NoMatchingAlternative(_)));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        assert!(matches!(eval_err("main = 1 / 0;"), RuntimeError::DivisionByZero));
    }

    #[test]
    fn stack_overflow_is_reported_rather_than_crashing_the_host() {
        let src = "loop x = loop x + 1;\nmain = loop 0;";
        let program = gml_parser::parse_program(src).unwrap();
        let limits = Limits { max_stack_depth: 1 << 20, max_dump_depth: 64 };
        let mut machine = Machine::new(&program, limits).unwrap();
        assert!(matches!(machine.run(), Err(RuntimeError::StackOverflow(64))));
    }

    #[test]
    fn disassembly_exposes_user_supercombinators_by_name() {
        let program = gml_parser::parse_program("double x = x + x;\nmain = double 21;").unwrap();
        let machine = Machine::new(&program, Limits::default()).unwrap();
        let names = machine.user_supercombinator_names();
        assert_eq!(names, vec!["double".to_string(), "main".to_string()]);
        let (arity, code) = machine.global_code("double").unwrap();
        assert_eq!(arity, 1);
        assert!(!code.is_empty());
    }
}
