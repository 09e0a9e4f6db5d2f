//! Calls, closures and frame descriptors
//!
//! The call is the only node that performs an action: it applies a procedure
//! value to an ordered argument list. Closures abstract a body call over
//! parameters; continuations are closures restricted to at most one
//! parameter, standing for the normal-return and exception-return paths of
//! a call.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::graph::value::{MethodId, Value};
use crate::graph::variable::Variable;
use crate::graph::{GraphError, GraphResult};

/// A bytecode position within a method, used for debug info and deopt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BytecodeLocation {
    pub method: MethodId,
    pub bci: u32,
}

impl fmt::Display for BytecodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}@{}", self.method.0, self.bci)
    }
}

/// Why evaluating a call may stop normal control flow
///
/// Set when a surface operator is lowered and consumed by later passes that
/// maintain precise exception and call-site bookkeeping. Lowering must never
/// drop these bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopReasons(u32);

impl StopReasons {
    pub const NONE: StopReasons = StopReasons(0);
    /// May call another method
    pub const CALL: StopReasons = StopReasons(1 << 0);
    /// Requires a class-initialization check
    pub const CLASS_INIT_CHECK: StopReasons = StopReasons(1 << 1);
    /// Requires a null-pointer check
    pub const NULL_POINTER_CHECK: StopReasons = StopReasons(1 << 2);
    /// Requires an array-bounds check
    pub const ARRAY_BOUNDS_CHECK: StopReasons = StopReasons(1 << 3);
    /// Requires a negative-array-size check
    pub const NEGATIVE_ARRAY_SIZE_CHECK: StopReasons = StopReasons(1 << 4);

    #[inline]
    pub fn contains(self, other: StopReasons) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn bits(self) -> u32 {
        self.0
    }

    pub(crate) fn from_bits(bits: u32) -> Self {
        StopReasons(bits)
    }
}

impl std::ops::BitOr for StopReasons {
    type Output = StopReasons;

    fn bitor(self, rhs: StopReasons) -> StopReasons {
        StopReasons(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for StopReasons {
    fn bitor_assign(&mut self, rhs: StopReasons) {
        self.0 |= rhs.0;
    }
}

/// Snapshot of live locals and stack slots at a call site
///
/// Descriptors form a singly linked parent chain of increasing inlining
/// depth; the outermost frame has no parent.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescriptor {
    pub parent: Option<Box<FrameDescriptor>>,
    pub location: BytecodeLocation,
    pub locals: Vec<Value>,
    pub stack: Vec<Value>,
}

impl FrameDescriptor {
    pub fn new(location: BytecodeLocation, locals: Vec<Value>, stack: Vec<Value>) -> Self {
        FrameDescriptor {
            parent: None,
            location,
            locals,
            stack,
        }
    }

    /// Depth of the parent chain, counting this descriptor
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut frame = self;
        while let Some(parent) = &frame.parent {
            depth += 1;
            frame = parent;
        }
        depth
    }
}

/// A call node: procedure applied to arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    procedure: Value,
    arguments: Vec<Value>,
    frames: Option<Box<FrameDescriptor>>,
    location: Option<BytecodeLocation>,
    reasons: StopReasons,
}

impl Call {
    pub fn new(procedure: Value, arguments: Vec<Value>) -> Self {
        Call {
            procedure,
            arguments,
            frames: None,
            location: None,
            reasons: StopReasons::NONE,
        }
    }

    pub fn with_location(mut self, location: BytecodeLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_frames(mut self, frames: Option<Box<FrameDescriptor>>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_reasons(mut self, reasons: StopReasons) -> Self {
        self.reasons = reasons;
        self
    }

    #[inline]
    pub fn procedure(&self) -> &Value {
        &self.procedure
    }

    #[inline]
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    #[inline]
    pub fn arguments_mut(&mut self) -> &mut Vec<Value> {
        &mut self.arguments
    }

    #[inline]
    pub fn procedure_mut(&mut self) -> &mut Value {
        &mut self.procedure
    }

    #[inline]
    pub fn frames(&self) -> Option<&FrameDescriptor> {
        self.frames.as_deref()
    }

    #[inline]
    pub fn location(&self) -> Option<BytecodeLocation> {
        self.location
    }

    #[inline]
    pub fn reasons(&self) -> StopReasons {
        self.reasons
    }

    pub fn set_frames(&mut self, frames: Option<Box<FrameDescriptor>>) {
        self.frames = frames;
    }

    pub fn set_reasons(&mut self, reasons: StopReasons) {
        self.reasons = reasons;
    }

    /// Replace this call in place with another, preserving nothing
    ///
    /// This is how the folding engine rewrites a call: the node identity
    /// stays (parents keep pointing at it), the content is swapped.
    pub fn assign(&mut self, replacement: Call) {
        *self = replacement;
    }

    /// Check that this call supplies exactly `expected` arguments
    pub fn check_arity(&self, expected: usize) -> GraphResult<()> {
        if self.arguments.len() != expected {
            return Err(GraphError::ArityMismatch {
                procedure: self.procedure.to_string(),
                expected,
                actual: self.arguments.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.procedure)?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", argument)?;
        }
        write!(f, ")")
    }
}

/// A lambda abstraction: distinct parameters over a body call
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    parameters: SmallVec<[Arc<Variable>; 4]>,
    body: Call,
    location: Option<BytecodeLocation>,
}

impl Closure {
    pub fn new(parameters: impl IntoIterator<Item = Arc<Variable>>, body: Call) -> Self {
        Closure {
            parameters: parameters.into_iter().collect(),
            body,
            location: None,
        }
    }

    pub fn with_location(mut self, location: BytecodeLocation) -> Self {
        self.location = Some(location);
        self
    }

    #[inline]
    pub fn parameters(&self) -> &[Arc<Variable>] {
        &self.parameters
    }

    #[inline]
    pub fn body(&self) -> &Call {
        &self.body
    }

    #[inline]
    pub fn body_mut(&mut self) -> &mut Call {
        &mut self.body
    }

    #[inline]
    pub fn location(&self) -> Option<BytecodeLocation> {
        self.location
    }

    pub fn into_body(self) -> Call {
        self.body
    }
}

/// A continuation: a closure with zero or one parameter
///
/// Zero parameters is a "void continuation" (the caller delivers no value).
#[derive(Debug, Clone, PartialEq)]
pub struct Continuation(Closure);

impl Continuation {
    /// Continuation receiving no value
    pub fn void(body: Call) -> Self {
        Continuation(Closure::new([], body))
    }

    /// Continuation receiving one value
    pub fn with_parameter(parameter: Arc<Variable>, body: Call) -> Self {
        Continuation(Closure::new([parameter], body))
    }

    /// Build from an arbitrary closure, rejecting more than one parameter
    pub fn from_closure(closure: Closure) -> GraphResult<Self> {
        if closure.parameters().len() > 1 {
            return Err(GraphError::MalformedContinuation {
                parameters: closure.parameters().len(),
            });
        }
        Ok(Continuation(closure))
    }

    #[inline]
    pub fn closure(&self) -> &Closure {
        &self.0
    }

    #[inline]
    pub fn closure_mut(&mut self) -> &mut Closure {
        &mut self.0
    }

    /// The single parameter, if this is not a void continuation
    #[inline]
    pub fn parameter(&self) -> Option<&Arc<Variable>> {
        self.0.parameters().first()
    }

    #[inline]
    pub fn body(&self) -> &Call {
        self.0.body()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::variable::VariableFactory;
    use crate::kind::Kind;

    fn location() -> BytecodeLocation {
        BytecodeLocation {
            method: MethodId(7),
            bci: 42,
        }
    }

    #[test]
    fn test_stop_reasons() {
        let reasons = StopReasons::CALL | StopReasons::NULL_POINTER_CHECK;
        assert!(reasons.contains(StopReasons::CALL));
        assert!(reasons.contains(StopReasons::NULL_POINTER_CHECK));
        assert!(!reasons.contains(StopReasons::ARRAY_BOUNDS_CHECK));
        assert!(StopReasons::NONE.is_empty());
        assert!(!reasons.is_empty());
    }

    #[test]
    fn test_frame_descriptor_depth() {
        let outer = FrameDescriptor::new(location(), vec![], vec![]);
        let mut inner = FrameDescriptor::new(location(), vec![Value::Undefined], vec![]);
        inner.parent = Some(Box::new(outer));
        assert_eq!(inner.depth(), 2);
    }

    #[test]
    fn test_continuation_rejects_two_parameters() {
        let factory = VariableFactory::new();
        let p1 = factory.create_temporary(Kind::Int);
        let p2 = factory.create_temporary(Kind::Int);
        let body = Call::new(Value::Undefined, vec![]);
        let closure = Closure::new([p1, p2], body);
        let err = Continuation::from_closure(closure).unwrap_err();
        assert!(matches!(
            err,
            GraphError::MalformedContinuation { parameters: 2 }
        ));
    }

    #[test]
    fn test_call_arity_check() {
        let call = Call::new(Value::Undefined, vec![Value::Undefined; 3]);
        assert!(call.check_arity(3).is_ok());
        let err = call.check_arity(4).unwrap_err();
        assert!(matches!(
            err,
            GraphError::ArityMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }
}
