//! The CPS graph model
//!
//! A graph is an arena of shared blocks plus a root value. Blocks are the
//! only aliased, mutable-until-resolved cells in the model: a block may be
//! referenced from many call sites, and may be referenced before its closure
//! is assigned (forward reference for loops and recursive control flow).
//! Everything else is an owned tree of values hanging off the root or off a
//! block closure.
//!
//! # Modules
//!
//! - [`value`]: constants, object references, the `Value` sum
//! - [`variable`]: variable kinds and serial allocation
//! - [`call`]: calls, closures, continuations, frame descriptors
//! - [`equality`]: cycle-aware structural equality over whole graphs

pub mod call;
pub mod equality;
pub mod value;
pub mod variable;

use std::collections::HashSet;
use std::fmt;

pub use call::{BytecodeLocation, Call, Closure, Continuation, FrameDescriptor, StopReasons};
pub use value::{
    ClassId, Constant, FieldDescriptor, FieldMutability, MethodDescriptor, MethodId, ObjectRef,
    Value,
};
pub use variable::{Variable, VariableFactory, VariableKind};

/// Result of graph construction and validation
pub type GraphResult<T> = Result<T, GraphError>;

/// Fatal graph well-formedness violations
///
/// These indicate a construction-time bug upstream; the enclosing compilation
/// must be aborted, never continued with a corrupt graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// A call supplies the wrong number of arguments for its procedure
    ArityMismatch {
        procedure: String,
        expected: usize,
        actual: usize,
    },
    /// A continuation was built with more than one parameter
    MalformedContinuation { parameters: usize },
    /// A block id does not belong to this graph
    InvalidBlock(u32),
    /// A block closure was assigned twice
    BlockAlreadySet(u32),
    /// A reachable block never had its closure assigned
    UnsetBlock(u32),
    /// An operator that names a pool entry was built without one
    MissingPoolReference { operator: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArityMismatch {
                procedure,
                expected,
                actual,
            } => write!(
                f,
                "arity mismatch calling {}: expected {} arguments, got {}",
                procedure, expected, actual
            ),
            Self::MalformedContinuation { parameters } => write!(
                f,
                "continuation with {} parameters (at most 1 allowed)",
                parameters
            ),
            Self::InvalidBlock(id) => write!(f, "block #{} does not exist", id),
            Self::BlockAlreadySet(id) => write!(f, "block #{} closure assigned twice", id),
            Self::UnsetBlock(id) => write!(f, "block #{} reachable but never assigned", id),
            Self::MissingPoolReference { operator } => {
                write!(f, "operator {} has no constant-pool reference", operator)
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Handle of a block within one graph's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    pub(crate) fn from_index(index: u32) -> Self {
        BlockId(index)
    }
}

/// Role of a block in control flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    /// Ordinary control-flow join or loop header
    Normal,
    /// Dispatcher selecting an exception handler
    ExceptionDispatcher,
}

/// A named, shareable reference cell holding a closure
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    role: BlockRole,
    closure: Option<Closure>,
}

impl Block {
    #[inline]
    pub fn role(&self) -> BlockRole {
        self.role
    }

    #[inline]
    pub fn closure(&self) -> Option<&Closure> {
        self.closure.as_ref()
    }
}

/// One method-compilation's CPS graph
///
/// Owns the block arena and the root value. Discarded wholesale once
/// lowering to target code completes.
#[derive(Debug, Clone)]
pub struct Graph {
    blocks: Vec<Block>,
    root: Value,
}

impl Graph {
    /// Create a graph with the given root and no blocks
    pub fn new(root: Value) -> Self {
        Graph {
            blocks: Vec::new(),
            root,
        }
    }

    /// Create an empty graph whose root is filled in later
    pub fn empty() -> Self {
        Graph::new(Value::Undefined)
    }

    #[inline]
    pub fn root(&self) -> &Value {
        &self.root
    }

    #[inline]
    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    pub fn set_root(&mut self, root: Value) {
        self.root = root;
    }

    /// Number of blocks in the arena (including unreferenced ones)
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Reserve a block handle; the closure is assigned later
    ///
    /// This is how forward references work: calls may target the handle
    /// before the closure exists.
    pub fn add_block(&mut self, role: BlockRole) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            role,
            closure: None,
        });
        id
    }

    pub fn block(&self, id: BlockId) -> GraphResult<&Block> {
        self.blocks
            .get(id.0 as usize)
            .ok_or(GraphError::InvalidBlock(id.0))
    }

    /// Assign a block's closure, exactly once
    pub fn set_block_closure(&mut self, id: BlockId, closure: Closure) -> GraphResult<()> {
        let block = self
            .blocks
            .get_mut(id.0 as usize)
            .ok_or(GraphError::InvalidBlock(id.0))?;
        if block.closure.is_some() {
            return Err(GraphError::BlockAlreadySet(id.0));
        }
        block.closure = Some(closure);
        Ok(())
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> GraphResult<&mut Block> {
        self.blocks
            .get_mut(id.0 as usize)
            .ok_or(GraphError::InvalidBlock(id.0))
    }

    pub(crate) fn block_closure_mut(&mut self, id: BlockId) -> GraphResult<Option<&mut Closure>> {
        Ok(self.block_mut(id)?.closure.as_mut())
    }

    /// Iterate over all block handles
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// Verify the graph is well-formed
    ///
    /// Every block reachable from the root must have its closure assigned.
    /// Continuation and arity invariants are enforced at construction; this
    /// check covers the one property only a whole-graph traversal can see.
    pub fn check_well_formed(&self) -> GraphResult<()> {
        let mut visited = HashSet::new();
        self.check_value(&self.root, &mut visited)
    }

    fn check_value(&self, value: &Value, visited: &mut HashSet<u32>) -> GraphResult<()> {
        match value {
            Value::Block(id) => {
                if !visited.insert(id.0) {
                    return Ok(());
                }
                match self.block(*id)?.closure() {
                    Some(closure) => self.check_closure(closure, visited),
                    None => Err(GraphError::UnsetBlock(id.0)),
                }
            }
            Value::Closure(closure) => self.check_closure(closure, visited),
            Value::Continuation(continuation) => {
                self.check_closure(continuation.closure(), visited)
            }
            Value::Constant(_) | Value::Variable(_) | Value::Proc(_) | Value::Undefined => Ok(()),
        }
    }

    fn check_closure(&self, closure: &Closure, visited: &mut HashSet<u32>) -> GraphResult<()> {
        self.check_call(closure.body(), visited)
    }

    fn check_call(&self, call: &Call, visited: &mut HashSet<u32>) -> GraphResult<()> {
        self.check_value(call.procedure(), visited)?;
        for argument in call.arguments() {
            self.check_value(argument, visited)?;
        }
        let mut frame = call.frames();
        while let Some(descriptor) = frame {
            for value in descriptor.locals.iter().chain(descriptor.stack.iter()) {
                self.check_value(value, visited)?;
            }
            frame = descriptor.parent.as_deref();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_reference_then_assign() {
        let mut graph = Graph::empty();
        let block = graph.add_block(BlockRole::Normal);
        // Reference the block before its closure exists.
        let body = Call::new(Value::Block(block), vec![]);
        graph.set_root(Value::Closure(Box::new(Closure::new([], body))));
        assert!(matches!(
            graph.check_well_formed(),
            Err(GraphError::UnsetBlock(0))
        ));

        // Self-referential closure: the block's body jumps back to itself.
        let looping = Closure::new([], Call::new(Value::Block(block), vec![]));
        graph.set_block_closure(block, looping).unwrap();
        graph.check_well_formed().unwrap();
    }

    #[test]
    fn test_double_assignment_rejected() {
        let mut graph = Graph::empty();
        let block = graph.add_block(BlockRole::Normal);
        let closure = Closure::new([], Call::new(Value::Undefined, vec![]));
        graph.set_block_closure(block, closure.clone()).unwrap();
        assert!(matches!(
            graph.set_block_closure(block, closure),
            Err(GraphError::BlockAlreadySet(0))
        ));
    }

    #[test]
    fn test_invalid_block_handle() {
        let graph = Graph::empty();
        assert!(matches!(
            graph.block(BlockId(3)),
            Err(GraphError::InvalidBlock(3))
        ));
    }
}
