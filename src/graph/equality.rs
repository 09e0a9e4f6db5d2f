//! Cycle-aware structural equality over whole graphs
//!
//! Two graphs are structurally equal when their roots are equal under a
//! bijection of variable serials and block handles. Matching by bijection
//! rather than raw identity makes the comparison insensitive to transient
//! ids while still distinguishing shared bindings from independent copies:
//! a variable occurring twice on one side must correspond to a single
//! variable occurring twice on the other.
//!
//! Block pairs are recorded in the bijection before their closures are
//! compared, so cyclic control flow terminates.

use std::collections::HashMap;

use crate::graph::call::{Call, Closure, Continuation, FrameDescriptor};
use crate::graph::value::Value;
use crate::graph::variable::Variable;
use crate::graph::Graph;

/// Compare two graphs for structural equality
pub fn structurally_equal(a: &Graph, b: &Graph) -> bool {
    let mut matcher = Matcher {
        left: a,
        right: b,
        variables: HashMap::new(),
        variables_rev: HashMap::new(),
        blocks: HashMap::new(),
        blocks_rev: HashMap::new(),
    };
    matcher.values(a.root(), b.root())
}

struct Matcher<'a> {
    left: &'a Graph,
    right: &'a Graph,
    variables: HashMap<u32, u32>,
    variables_rev: HashMap<u32, u32>,
    blocks: HashMap<u32, u32>,
    blocks_rev: HashMap<u32, u32>,
}

impl Matcher<'_> {
    fn values(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Constant(x), Value::Constant(y)) => x == y,
            (Value::Variable(x), Value::Variable(y)) => self.variables(x, y),
            (Value::Block(x), Value::Block(y)) => self.block_pair(x.index(), y.index()),
            (Value::Proc(x), Value::Proc(y)) => x == y,
            (Value::Closure(x), Value::Closure(y)) => self.closures(x, y),
            (Value::Continuation(x), Value::Continuation(y)) => self.continuations(x, y),
            (Value::Undefined, Value::Undefined) => true,
            _ => false,
        }
    }

    fn variables(&mut self, a: &Variable, b: &Variable) -> bool {
        if a.kind() != b.kind() || a.variant() != b.variant() {
            return false;
        }
        match (
            self.variables.get(&a.serial()).copied(),
            self.variables_rev.get(&b.serial()).copied(),
        ) {
            (Some(mapped), Some(mapped_rev)) => mapped == b.serial() && mapped_rev == a.serial(),
            (None, None) => {
                self.variables.insert(a.serial(), b.serial());
                self.variables_rev.insert(b.serial(), a.serial());
                true
            }
            _ => false,
        }
    }

    fn block_pair(&mut self, a: u32, b: u32) -> bool {
        match (
            self.blocks.get(&a).copied(),
            self.blocks_rev.get(&b).copied(),
        ) {
            (Some(mapped), Some(mapped_rev)) => mapped == b && mapped_rev == a,
            (None, None) => {
                // Record the correspondence before descending so that
                // back-edges terminate.
                self.blocks.insert(a, b);
                self.blocks_rev.insert(b, a);
                let (Ok(block_a), Ok(block_b)) = (
                    self.left.block(crate::graph::BlockId::from_index(a)),
                    self.right.block(crate::graph::BlockId::from_index(b)),
                ) else {
                    return false;
                };
                if block_a.role() != block_b.role() {
                    return false;
                }
                match (block_a.closure(), block_b.closure()) {
                    (Some(x), Some(y)) => {
                        let (x, y) = (x.clone(), y.clone());
                        self.closures(&x, &y)
                    }
                    (None, None) => true,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn closures(&mut self, a: &Closure, b: &Closure) -> bool {
        if a.parameters().len() != b.parameters().len() || a.location() != b.location() {
            return false;
        }
        for (x, y) in a.parameters().iter().zip(b.parameters()) {
            if !self.variables(x, y) {
                return false;
            }
        }
        self.calls(a.body(), b.body())
    }

    fn continuations(&mut self, a: &Continuation, b: &Continuation) -> bool {
        self.closures(a.closure(), b.closure())
    }

    fn calls(&mut self, a: &Call, b: &Call) -> bool {
        if a.arguments().len() != b.arguments().len()
            || a.location() != b.location()
            || a.reasons() != b.reasons()
        {
            return false;
        }
        if !self.values(a.procedure(), b.procedure()) {
            return false;
        }
        for (x, y) in a.arguments().iter().zip(b.arguments()) {
            if !self.values(x, y) {
                return false;
            }
        }
        self.frames(a.frames(), b.frames())
    }

    fn frames(&mut self, a: Option<&FrameDescriptor>, b: Option<&FrameDescriptor>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(x), Some(y)) => {
                if x.location != y.location
                    || x.locals.len() != y.locals.len()
                    || x.stack.len() != y.stack.len()
                {
                    return false;
                }
                for (v, w) in x.locals.iter().zip(&y.locals) {
                    if !self.values(v, w) {
                        return false;
                    }
                }
                for (v, w) in x.stack.iter().zip(&y.stack) {
                    if !self.values(v, w) {
                        return false;
                    }
                }
                self.frames(x.parent.as_deref(), y.parent.as_deref())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::value::Constant;
    use crate::graph::variable::VariableFactory;
    use crate::graph::{BlockRole, Call, Closure};
    use crate::kind::Kind;

    fn leaf_call() -> Call {
        Call::new(Value::Undefined, vec![Value::Constant(Constant::Int(1))])
    }

    #[test]
    fn test_alpha_equivalent_graphs_are_equal() {
        let factory = VariableFactory::new();
        let a = factory.create_temporary(Kind::Int);
        let b = factory.create_temporary(Kind::Int);
        let graph_a = Graph::new(Value::Closure(Box::new(Closure::new(
            [a.clone()],
            Call::new(Value::Undefined, vec![Value::Variable(a)]),
        ))));
        let graph_b = Graph::new(Value::Closure(Box::new(Closure::new(
            [b.clone()],
            Call::new(Value::Undefined, vec![Value::Variable(b)]),
        ))));
        assert!(structurally_equal(&graph_a, &graph_b));
    }

    #[test]
    fn test_sharing_distinguished_from_copies() {
        let factory = VariableFactory::new();
        let shared = factory.create_temporary(Kind::Int);
        let x = factory.create_temporary(Kind::Int);
        let y = factory.create_temporary(Kind::Int);
        // Left: same variable at both positions. Right: two distinct ones.
        let left = Graph::new(Value::Closure(Box::new(Closure::new(
            [shared.clone()],
            Call::new(
                Value::Undefined,
                vec![Value::Variable(shared.clone()), Value::Variable(shared)],
            ),
        ))));
        let right = Graph::new(Value::Closure(Box::new(Closure::new(
            [x.clone()],
            Call::new(
                Value::Undefined,
                vec![Value::Variable(x), Value::Variable(y)],
            ),
        ))));
        assert!(!structurally_equal(&left, &right));
    }

    #[test]
    fn test_cyclic_blocks_terminate() {
        let mut make = || {
            let mut graph = Graph::empty();
            let block = graph.add_block(BlockRole::Normal);
            let body = Call::new(Value::Block(block), vec![]);
            graph
                .set_block_closure(block, Closure::new([], body))
                .unwrap();
            graph.set_root(Value::Block(block));
            graph
        };
        let a = make();
        let b = make();
        assert!(structurally_equal(&a, &b));
    }

    #[test]
    fn test_different_constants_unequal() {
        let a = Graph::new(Value::Closure(Box::new(Closure::new([], leaf_call()))));
        let b = Graph::new(Value::Closure(Box::new(Closure::new(
            [],
            Call::new(Value::Undefined, vec![Value::Constant(Constant::Int(2))]),
        ))));
        assert!(!structurally_equal(&a, &b));
    }
}
