//! Binary graph codec
//!
//! Serializes a CPS graph to a compact byte stream and back, preserving
//! cycles and sharing exactly: shared blocks keep their identity through
//! dense block ids, shared variable bindings through their serials, and
//! repeated constants through a deduplicating pool.
//!
//! The stream is a postfix program for a small stack machine: a node's
//! operands are emitted before the opcode that consumes them, so decoding
//! is a single forward pass with an explicit stack and no recursion. The
//! layout is:
//!
//! ```text
//! [block count][max serial + 1][pool count][pool entries...][postfix body]
//! ```
//!
//! Pool index 0 is always the null constant. Encoding requires the graph
//! to be alpha-converted (one binding per serial); the writer verifies
//! this and fails rather than emit an ambiguous stream.
//!
//! # Modules
//!
//! - [`varint`]: bounded variable-length integers
//! - [`opcode`]: the stack-machine instruction set
//! - [`writer`]: graph to bytes
//! - [`reader`]: bytes to graph

pub mod opcode;
pub mod reader;
pub mod varint;
pub mod writer;

use std::fmt;

use crate::graph::call::BytecodeLocation;
use crate::graph::value::Constant;
use crate::graph::GraphError;

pub use reader::decode_graph;
pub use writer::encode_graph;

/// Result of codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Codec failures
///
/// Writer-side errors mean the graph violates an encoding precondition;
/// reader-side errors mean the stream is corrupt or truncated. Either way
/// the operation is aborted, never patched over.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecError {
    /// A number does not fit the bounded varint range
    ValueOutOfRange(u32),
    /// The stream ended inside an encoded item
    Truncated,
    /// An opcode byte outside the instruction set
    UnknownOpcode(u8),
    /// An enum tag byte outside its repertoire
    UnknownTag(u8),
    /// A pool index past the end of the decoded pool
    InvalidPoolIndex(u32),
    /// The stack held too few items for an opcode
    StackUnderflow,
    /// The stack held an item of the wrong sort for an opcode
    WrongStackItem(&'static str),
    /// A block was referenced but never defined
    DanglingBlock(u32),
    /// A block id was defined twice in one stream
    DuplicateBlock(u32),
    /// A variable was referenced but never defined
    DanglingVariable(u32),
    /// Two distinct bindings share one serial; the graph is not
    /// alpha-converted
    AlphaConversion(u32),
    /// Bytes remained after the root value was decoded
    TrailingInput,
    /// The decoded structure violates graph invariants
    Graph(GraphError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueOutOfRange(value) => {
                write!(f, "value {} exceeds the varint range", value)
            }
            Self::Truncated => write!(f, "stream truncated"),
            Self::UnknownOpcode(byte) => write!(f, "unknown opcode 0x{:02x}", byte),
            Self::UnknownTag(byte) => write!(f, "unknown tag 0x{:02x}", byte),
            Self::InvalidPoolIndex(index) => write!(f, "invalid pool index {}", index),
            Self::StackUnderflow => write!(f, "decode stack underflow"),
            Self::WrongStackItem(expected) => {
                write!(f, "wrong item on decode stack, expected {}", expected)
            }
            Self::DanglingBlock(id) => write!(f, "block #{} referenced but never defined", id),
            Self::DuplicateBlock(id) => write!(f, "block #{} defined more than once", id),
            Self::DanglingVariable(serial) => {
                write!(f, "variable #{} referenced but never defined", serial)
            }
            Self::AlphaConversion(serial) => {
                write!(f, "serial {} is bound more than once", serial)
            }
            Self::TrailingInput => write!(f, "trailing bytes after the graph root"),
            Self::Graph(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<GraphError> for CodecError {
    fn from(error: GraphError) -> Self {
        CodecError::Graph(error)
    }
}

/// One entry of the deduplicating pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PoolEntry {
    Constant(Constant),
    Location(BytecodeLocation),
}
