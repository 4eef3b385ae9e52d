//! Command-line entry point for the engine.
//!
//! This binary is one of the external collaborators the core spec names
//! explicitly: reading stdin, printing the final value and disassembling
//! bytecode all live here, never in `gml-vm` or `gml-compiler`. It reads a
//! program from standard input, reduces the supercombinator `main` to weak
//! head normal form, and writes the result to standard output.

use std::io::Read;

use anyhow::{Context, Result};
use clap::Parser;
use gml_heap::Node;
use gml_vm::{Limits, Machine, Whnf};

/// A filter: reads a program from standard input, prints the value bound
/// to `main`.
#[derive(Parser, Debug)]
#[command(name = "gml", version, about = "A lazy graph-reduction evaluator")]
struct Args {
    /// Print each supercombinator's compiled bytecode instead of running
    /// the program.
    #[arg(long)]
    disassemble: bool,

    /// Print reduction statistics to standard error after running.
    #[arg(long)]
    stats: bool,

    /// Maximum stack depth before the interpreter reports a stack
    /// overflow rather than exhausting host memory.
    #[arg(long, default_value_t = Limits::default().max_stack_depth)]
    max_stack_depth: usize,

    /// Maximum dump depth before the interpreter reports a stack
    /// overflow. A non-tail-recursive strict chain grows the dump while
    /// the working stack itself stays small, so this is tracked
    /// separately from `--max-stack-depth`.
    #[arg(long, default_value_t = Limits::default().max_dump_depth)]
    max_dump_depth: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let args = Args::parse();

    let mut source = String::new();
    std::io::stdin()
        .read_to_string(&mut source)
        .context("reading program from standard input")?;

    let program = gml_parser::parse_program(&source).context("parsing program")?;
    tracing::debug!(supercombinators = program.len(), "parsed program");

    let limits = Limits { max_stack_depth: args.max_stack_depth, max_dump_depth: args.max_dump_depth };
    let mut machine = Machine::new(&program, limits).context("compiling program")?;

    if args.disassemble {
        for name in machine.user_supercombinator_names() {
            let (arity, code) = machine.global_code(&name)?;
            print!("{}", gml_bytecode::disassemble_sc(&name, arity, &code));
        }
        return Ok(());
    }

    let result = machine.run();

    if args.stats {
        eprintln!("{:#?}", machine.stats());
    }

    let value = result?;
    println!("{}", format_whnf(&machine, &value)?);
    Ok(())
}

/// Renders a weak head normal form as text. This is deliberately shallow:
/// an integer prints as itself, a constructor prints as its tag and the
/// *kind* of each component (not a recursively unfolded list or tree) --
/// a full pretty-printer is an external collaborator's concern, not the
/// engine's.
fn format_whnf(machine: &Machine, value: &Whnf) -> Result<String> {
    match value {
        Whnf::Int(k) => Ok(k.to_string()),
        Whnf::Constr { tag, components } => {
            let mut parts = Vec::with_capacity(components.len());
            for &addr in components {
                let (_, node) = machine.heap().deref_final(addr)?;
                parts.push(match node {
                    Node::Int(k) => k.to_string(),
                    Node::Constr { tag, .. } => format!("<{tag}>"),
                    other => other.kind_name().to_string(),
                });
            }
            if parts.is_empty() {
                Ok(format!("<{tag}>"))
            } else {
                Ok(format!("<{tag}> {}", parts.join(" ")))
            }
        }
    }
}
