//! Cirrus - continuation-passing-style intermediate representation
//!
//! The middle stage of a bytecode-to-native compiler: bytecode is
//! translated into a CPS graph, normalized and specialized here, and
//! handed on to code generation. Every control transfer in the graph is a
//! call; returns and exception paths are continuation arguments, so one
//! value form covers straight-line code, branching, loops, and unwinding.
//!
//! # Pipeline
//!
//! 1. **Graph construction** ([`graph`]): calls, closures, continuations,
//!    shared blocks for loops and join points, and alpha-converted
//!    variables with process-unique serials.
//! 2. **Operator lowering** ([`lower`]): each bytecode-level operator call
//!    is expanded into the snippet spine that spells out its null checks,
//!    bounds checks, initialization barriers, and resolution steps.
//! 3. **Constant folding** ([`fold`]): builtin evaluation, strength
//!    reduction, snippet folding against the resolution environment, and
//!    beta reduction of directly-applied closures, run to a fixed point.
//! 4. **Serialization** ([`codec`]): a compact postfix byte stream that
//!    preserves cycles and sharing exactly.
//!
//! The [`procedure`] module defines what can sit in a call's procedure
//! position; [`context`] carries the compilation mode and the resolution
//! and backend services the passes consult.
//!
//! # Example
//!
//! ```rust
//! use cirrus::graph::variable::VariableFactory;
//! use cirrus::graph::value::{Constant, Value};
//! use cirrus::graph::{Call, Closure, Continuation, Graph};
//! use cirrus::kind::Kind;
//! use cirrus::procedure::{BuiltinOp, BuiltinProc, Procedure};
//!
//! // (IntPlus 1 2 k) with k a one-parameter continuation.
//! let factory = VariableFactory::new();
//! let result = factory.create_temporary(Kind::Int);
//! let body = Call::new(Value::Undefined, vec![Value::Variable(result.clone())]);
//! let k = Continuation::with_parameter(result, body);
//! let call = Call::new(
//!     Value::Proc(Procedure::Builtin(BuiltinProc::plain(BuiltinOp::IntPlus))),
//!     vec![
//!         Value::Constant(Constant::Int(1)),
//!         Value::Constant(Constant::Int(2)),
//!         Value::Continuation(Box::new(k)),
//!     ],
//! );
//! let graph = Graph::new(Value::Closure(Box::new(Closure::new([], call))));
//! let bytes = cirrus::codec::encode_graph(&graph).unwrap();
//! let decoded = cirrus::codec::decode_graph(&bytes).unwrap();
//! assert!(cirrus::graph::equality::structurally_equal(&graph, &decoded));
//! ```

pub mod codec;
pub mod context;
pub mod fold;
pub mod graph;
pub mod kind;
pub mod lower;
pub mod procedure;

pub use codec::{decode_graph, encode_graph, CodecError, CodecResult};
pub use context::{CompilationContext, CompilationMode};
pub use fold::{reduce_call, reduce_graph, FoldError};
pub use graph::{Graph, GraphError, GraphResult};
pub use kind::Kind;
pub use lower::lower_graph;
pub use procedure::Procedure;
