//! The heap of shared graph nodes the interpreter reduces, and the stable
//! addresses that refer to them.
//!
//! Cells are never freed by this crate: a supercombinator's `NGlobal` cell
//! lives for the life of the process, and every other cell is reachable
//! only as long as something on the stack, the dump, or another cell still
//! points to it. Reclaiming unreachable cells is left to the host
//! allocator (or, if one is ever added, a tracing collector rooted at
//! stack ∪ dump ∪ env).

use std::rc::Rc;

use gml_ast::{Name, Tag};
use gml_bytecode::Code;
use gml_errors::RuntimeError;

/// A stable handle to a heap cell. Addresses are never reused while the
/// cell they named is reachable; `Heap` never reclaims a slot, so every
/// `Addr` it has ever handed out stays valid for the life of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr(usize);

impl Addr {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A heap cell. These are the only values the machine can share between
/// computations.
#[derive(Debug, Clone)]
pub enum Node {
    /// An evaluated integer; weak head normal form.
    Int(i64),
    /// A saturated constructor; weak head normal form. Components are kept
    /// in source order.
    Constr { tag: Tag, components: Vec<Addr> },
    /// A spine application node.
    Ap { func: Addr, arg: Addr },
    /// A compiled top-level function. `arity == 0` marks a CAF: a
    /// zero-argument global whose computed value must be shared across
    /// every reference to it (via `Update`), not recomputed.
    Global {
        name: Name,
        arity: usize,
        code: Rc<Code>,
    },
    /// A forwarding pointer written by `Update`. Lazy sharing works because
    /// every place that held the old application node now transitively
    /// reaches the memoized result through this indirection.
    Indirect(Addr),
    /// A transient placeholder reserved by `Alloc` before a `letrec`
    /// right-hand side has run. Entering this node (via `Unwind`) is
    /// always a bug in the compiled code: it means a binding was forced
    /// before it was written.
    Uninitialised,
}

impl Node {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Int(_) => "NInt",
            Node::Constr { .. } => "NConstr",
            Node::Ap { .. } => "NAp",
            Node::Global { .. } => "NGlobal",
            Node::Indirect(_) => "NIndirect",
            Node::Uninitialised => "<uninitialised>",
        }
    }
}

/// An arena of [`Node`] cells indexed by stable [`Addr`]s.
#[derive(Debug, Default)]
pub struct Heap {
    cells: slab::Slab<Node>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self { cells: slab::Slab::new() }
    }

    /// Number of live cells. Exposed for statistics reporting only.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn alloc(&mut self, node: Node) -> Addr {
        Addr(self.cells.insert(node))
    }

    /// Reserves `n` placeholder cells for a `letrec`'s right-hand sides,
    /// returning their addresses in binding order.
    pub fn alloc_placeholders(&mut self, n: usize) -> Vec<Addr> {
        (0..n).map(|_| self.alloc(Node::Uninitialised)).collect()
    }

    pub fn lookup(&self, addr: Addr) -> Result<&Node, RuntimeError> {
        self.cells
            .get(addr.0)
            .ok_or(RuntimeError::UnallocatedAddress(addr.0))
    }

    /// Overwrites the node at an existing address without changing its
    /// address. This is the whole mechanism behind call-by-need sharing:
    /// everyone who already holds `addr` observes the new node.
    pub fn update(&mut self, addr: Addr, node: Node) -> Result<(), RuntimeError> {
        let slot = self
            .cells
            .get_mut(addr.0)
            .ok_or(RuntimeError::UnallocatedAddress(addr.0))?;
        *slot = node;
        Ok(())
    }

    /// Follows a chain of `NIndirect` cells to the node they ultimately
    /// point to. Used when reporting or comparing final results.
    pub fn deref_final(&self, mut addr: Addr) -> Result<(Addr, &Node), RuntimeError> {
        loop {
            match self.lookup(addr)? {
                Node::Indirect(target) => addr = *target,
                _ => return Ok((addr, self.lookup(addr)?)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_preserves_the_address() {
        let mut heap = Heap::new();
        let a = heap.alloc(Node::Int(1));
        heap.update(a, Node::Int(2)).unwrap();
        assert!(matches!(heap.lookup(a).unwrap(), Node::Int(2)));
    }

    #[test]
    fn deref_final_chases_indirections() {
        let mut heap = Heap::new();
        let target = heap.alloc(Node::Int(7));
        let indirect = heap.alloc(Node::Indirect(target));
        let (addr, node) = heap.deref_final(indirect).unwrap();
        assert_eq!(addr, target);
        assert!(matches!(node, Node::Int(7)));
    }

    #[test]
    fn lookup_of_unallocated_address_is_an_error() {
        let mut other = Heap::new();
        let addr = other.alloc(Node::Int(1));
        let heap = Heap::new();
        assert!(heap.lookup(addr).is_err());
    }
}
