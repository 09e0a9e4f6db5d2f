//! Graph encoding
//!
//! A depth-first postfix walk: every node's operands are emitted before the
//! opcode that consumes them. Blocks are defined at their first visit and
//! referenced by id afterwards, which is what lets cyclic control flow
//! serialize in one pass; variables likewise are defined at their first
//! occurrence in the stream and referenced by serial after that.
//!
//! The writer enforces alpha-conversion: encountering two distinct bindings
//! that share a serial aborts the encoding.

use std::collections::{HashMap, HashSet};

use crate::codec::opcode::Opcode;
use crate::codec::varint::encode_varint;
use crate::codec::{CodecError, CodecResult, PoolEntry};
use crate::graph::call::{BytecodeLocation, Call, Closure, Continuation, FrameDescriptor};
use crate::graph::value::{Constant, ObjectRef, Value};
use crate::graph::variable::{Variable, VariableKind};
use crate::graph::{Graph, GraphError};
use crate::procedure::Procedure;

/// Encode a graph into its binary stream
pub fn encode_graph(graph: &Graph) -> CodecResult<Vec<u8>> {
    let mut writer = GraphWriter::new(graph);
    writer.write_value(graph.root())?;

    let mut out = Vec::new();
    encode_varint(&mut out, graph.block_count() as u32)?;
    encode_varint(&mut out, writer.max_serial_plus_one)?;
    encode_varint(&mut out, writer.pool.len() as u32)?;
    for entry in &writer.pool {
        encode_pool_entry(&mut out, entry)?;
    }
    out.extend_from_slice(&writer.body);
    Ok(out)
}

struct GraphWriter<'g> {
    graph: &'g Graph,
    body: Vec<u8>,
    pool: Vec<PoolEntry>,
    pool_index: HashMap<PoolEntry, u32>,
    /// Serial to the address of the binding that owns it
    defined_variables: HashMap<u32, *const Variable>,
    defined_blocks: HashSet<u32>,
    max_serial_plus_one: u32,
}

impl<'g> GraphWriter<'g> {
    fn new(graph: &'g Graph) -> Self {
        let mut writer = GraphWriter {
            graph,
            body: Vec::new(),
            pool: Vec::new(),
            pool_index: HashMap::new(),
            defined_variables: HashMap::new(),
            defined_blocks: HashSet::new(),
            max_serial_plus_one: 0,
        };
        // Index 0 is always the null constant.
        writer.intern(PoolEntry::Constant(Constant::Null));
        writer
    }

    fn intern(&mut self, entry: PoolEntry) -> u32 {
        if let Some(&index) = self.pool_index.get(&entry) {
            return index;
        }
        let index = self.pool.len() as u32;
        self.pool.push(entry.clone());
        self.pool_index.insert(entry, index);
        index
    }

    fn intern_location(&mut self, location: BytecodeLocation) -> u32 {
        self.intern(PoolEntry::Location(location))
    }

    fn emit(&mut self, opcode: Opcode) {
        self.body.push(opcode as u8);
    }

    fn emit_varint(&mut self, value: u32) -> CodecResult<()> {
        encode_varint(&mut self.body, value)
    }

    fn emit_optional_location(&mut self, location: Option<BytecodeLocation>) -> CodecResult<()> {
        // Index 0 is the null constant, so 0 is free to mean "none" here.
        let index = match location {
            Some(location) => self.intern_location(location),
            None => 0,
        };
        self.emit_varint(index)
    }

    fn write_value(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Constant(constant) => {
                let index = self.intern(PoolEntry::Constant(constant.clone()));
                self.emit(Opcode::Constant);
                self.emit_varint(index)
            }
            Value::Variable(variable) => self.write_variable(variable),
            Value::Block(id) => self.write_block(id.index()),
            Value::Proc(procedure) => self.write_procedure(procedure),
            Value::Closure(closure) => {
                self.write_closure_parts(closure)?;
                match Opcode::compact_closure(closure.parameters().len()) {
                    Some(opcode) => self.emit(opcode),
                    None => {
                        self.emit(Opcode::Closure);
                        self.emit_varint(closure.parameters().len() as u32)?;
                    }
                }
                self.emit_optional_location(closure.location())
            }
            Value::Continuation(continuation) => self.write_continuation(continuation),
            Value::Undefined => {
                self.emit(Opcode::Undefined);
                Ok(())
            }
        }
    }

    /// Body first, then the parameters, mirroring the decoder's pops
    fn write_closure_parts(&mut self, closure: &Closure) -> CodecResult<()> {
        self.write_call(closure.body())?;
        for parameter in closure.parameters() {
            self.write_variable(parameter)?;
        }
        Ok(())
    }

    fn write_continuation(&mut self, continuation: &Continuation) -> CodecResult<()> {
        let closure = continuation.closure();
        self.write_call(closure.body())?;
        match closure.parameters().first() {
            Some(parameter) => {
                self.write_variable(parameter)?;
                self.emit(Opcode::Continuation);
            }
            None => self.emit(Opcode::VoidContinuation),
        }
        self.emit_optional_location(closure.location())
    }

    fn write_call(&mut self, call: &Call) -> CodecResult<()> {
        for argument in call.arguments() {
            self.write_value(argument)?;
        }
        self.write_frames(call.frames())?;
        self.write_value(call.procedure())?;
        match Opcode::compact_call(call.arguments().len()) {
            Some(opcode) => self.emit(opcode),
            None => {
                self.emit(Opcode::Call);
                self.emit_varint(call.arguments().len() as u32)?;
            }
        }
        self.emit_optional_location(call.location())?;
        self.emit_varint(call.reasons().bits())
    }

    /// Ancestor frames first, so the decoder can chain parents as it goes
    fn write_frames(&mut self, frames: Option<&FrameDescriptor>) -> CodecResult<()> {
        self.emit(Opcode::NoFrames);
        let mut chain = Vec::new();
        let mut cursor = frames;
        while let Some(frame) = cursor {
            chain.push(frame);
            cursor = frame.parent.as_deref();
        }
        for frame in chain.into_iter().rev() {
            for local in &frame.locals {
                self.write_value(local)?;
            }
            for slot in &frame.stack {
                self.write_value(slot)?;
            }
            let location = self.intern_location(frame.location);
            self.emit(Opcode::FrameDescriptor);
            self.emit_varint(frame.locals.len() as u32)?;
            self.emit_varint(frame.stack.len() as u32)?;
            self.emit_varint(location)?;
        }
        Ok(())
    }

    fn write_block(&mut self, id: u32) -> CodecResult<()> {
        if self.defined_blocks.contains(&id) {
            self.emit(Opcode::BlockReference);
            return self.emit_varint(id);
        }
        // Mark before descending so back-edges become references.
        self.defined_blocks.insert(id);
        let block = self.graph.block(crate::graph::BlockId::from_index(id))?;
        let role = block.role();
        let closure = block
            .closure()
            .ok_or(CodecError::Graph(GraphError::UnsetBlock(id)))?
            .clone();

        self.write_closure_parts(&closure)?;
        match Opcode::compact_closure(closure.parameters().len()) {
            Some(opcode) => self.emit(opcode),
            None => {
                self.emit(Opcode::Closure);
                self.emit_varint(closure.parameters().len() as u32)?;
            }
        }
        self.emit_optional_location(closure.location())?;

        self.emit(match role {
            crate::graph::BlockRole::Normal => Opcode::BlockNormal,
            crate::graph::BlockRole::ExceptionDispatcher => Opcode::BlockExceptionDispatcher,
        });
        self.emit_varint(id)
    }

    fn write_variable(&mut self, variable: &Variable) -> CodecResult<()> {
        let serial = variable.serial();
        if let Some(&known) = self.defined_variables.get(&serial) {
            if !std::ptr::eq(known, variable as *const Variable) {
                return Err(CodecError::AlphaConversion(serial));
            }
            self.emit(Opcode::VariableReference);
            return self.emit_varint(serial);
        }
        self.defined_variables
            .insert(serial, variable as *const Variable);
        self.max_serial_plus_one = self.max_serial_plus_one.max(serial.saturating_add(1));

        let kind_tag = variable.kind().tag();
        match variable.variant() {
            VariableKind::NormalContinuationParameter { ordinal } => {
                let ordinal = *ordinal;
                self.emit(Opcode::VarNormalContinuationParameter);
                self.emit_varint(serial)?;
                self.body.push(kind_tag);
                self.emit_varint(ordinal)
            }
            VariableKind::ExceptionContinuationParameter { ordinal } => {
                let ordinal = *ordinal;
                self.emit(Opcode::VarExceptionContinuationParameter);
                self.emit_varint(serial)?;
                self.body.push(kind_tag);
                self.emit_varint(ordinal)
            }
            VariableKind::Local { slot, location } => {
                let (slot, location) = (*slot, *location);
                self.emit(Opcode::VarLocal);
                self.emit_varint(serial)?;
                self.body.push(kind_tag);
                self.emit_varint(slot)?;
                self.emit_optional_location(location)
            }
            VariableKind::MethodParameter { slot } => {
                let slot = *slot;
                self.emit(Opcode::VarMethodParameter);
                self.emit_varint(serial)?;
                self.body.push(kind_tag);
                self.emit_varint(slot)
            }
            VariableKind::Stack { slot } => {
                let slot = *slot;
                self.emit(Opcode::VarStack);
                self.emit_varint(serial)?;
                self.body.push(kind_tag);
                self.emit_varint(slot)
            }
            VariableKind::Temporary => {
                self.emit(Opcode::VarTemporary);
                self.emit_varint(serial)?;
                self.body.push(kind_tag);
                Ok(())
            }
        }
    }

    fn write_procedure(&mut self, procedure: &Procedure) -> CodecResult<()> {
        match procedure {
            Procedure::Method(id) => {
                self.emit(Opcode::Method);
                self.emit_varint(id.0)
            }
            Procedure::Builtin(builtin) => {
                self.emit(Opcode::Builtin);
                self.emit_varint(builtin.op.serial())?;
                self.body.push(builtin.variant.tag());
                Ok(())
            }
            Procedure::Snippet(snippet) => {
                let (tag, payload) = snippet.encoding();
                self.emit(Opcode::Snippet);
                self.body.push(tag);
                self.body.push(payload);
                Ok(())
            }
            Procedure::Switch(switch) => {
                self.emit(Opcode::Switch);
                self.body.push(switch.value_kind().tag());
                self.body.push(switch.comparator().tag());
                self.emit_varint(switch.number_of_matches())
            }
            Procedure::Operator(operator) => {
                let (tag, payload) = operator.kind().encoding();
                self.emit(Opcode::Operator);
                self.body.push(tag);
                self.body.push(payload);
                // 0 means no pool reference; indices are shifted by one.
                // Resolution state is not persisted: a decoded operator
                // re-resolves against the reading environment's pool.
                match operator.resolution().pool_index() {
                    Some(index) => self.emit_varint(index + 1),
                    None => self.emit_varint(0),
                }
            }
        }
    }
}

fn encode_pool_entry(out: &mut Vec<u8>, entry: &PoolEntry) -> CodecResult<()> {
    match entry {
        PoolEntry::Constant(constant) => encode_constant(out, constant),
        PoolEntry::Location(location) => {
            out.push(16);
            encode_varint(out, location.method.0)?;
            encode_varint(out, location.bci)
        }
    }
}

fn encode_constant(out: &mut Vec<u8>, constant: &Constant) -> CodecResult<()> {
    match constant {
        Constant::Null => out.push(0),
        Constant::Byte(v) => {
            out.push(1);
            out.push(*v as u8);
        }
        Constant::Boolean(v) => {
            out.push(2);
            out.push(*v as u8);
        }
        Constant::Short(v) => {
            out.push(3);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Constant::Char(v) => {
            out.push(4);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Constant::Int(v) => {
            out.push(5);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Constant::Float(v) => {
            out.push(6);
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Constant::Long(v) => {
            out.push(7);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Constant::Double(v) => {
            out.push(8);
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Constant::Word(v) => {
            out.push(9);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Constant::Object(ObjectRef::Field(field)) => {
            out.push(10);
            encode_varint(out, field.holder.0)?;
            encode_varint(out, field.offset)?;
            out.push(field.kind.tag());
            out.push(field.mutability.tag());
            out.push(field.requires_holder_initialization as u8);
        }
        Constant::Object(ObjectRef::Method(method)) => {
            out.push(11);
            encode_varint(out, method.id.0)?;
            encode_varint(out, method.holder.0)?;
        }
        Constant::Object(ObjectRef::Class(class)) => {
            out.push(12);
            encode_varint(out, class.0)?;
        }
        Constant::Object(ObjectRef::StaticTuple(class)) => {
            out.push(13);
            encode_varint(out, class.0)?;
        }
        Constant::Object(ObjectRef::ResolutionGuard { pool_index }) => {
            out.push(14);
            encode_varint(out, *pool_index)?;
        }
        Constant::Object(ObjectRef::Data(handle)) => {
            out.push(15);
            out.extend_from_slice(&handle.to_le_bytes());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::variable::VariableFactory;
    use crate::kind::Kind;

    #[test]
    fn test_alpha_conversion_violation_detected() {
        let factory = VariableFactory::new();
        let original = factory.create_temporary(Kind::Int);
        // A distinct binding forged with the same serial.
        let forged = std::sync::Arc::new(Variable::clone(&original));
        let graph = Graph::new(Value::Closure(Box::new(Closure::new(
            [original],
            Call::new(Value::Undefined, vec![Value::Variable(forged)]),
        ))));
        let err = encode_graph(&graph).unwrap_err();
        assert!(matches!(err, CodecError::AlphaConversion(_)));
    }

    #[test]
    fn test_unset_block_rejected() {
        let mut graph = Graph::empty();
        let block = graph.add_block(crate::graph::BlockRole::Normal);
        graph.set_root(Value::Block(block));
        let err = encode_graph(&graph).unwrap_err();
        assert_eq!(err, CodecError::Graph(GraphError::UnsetBlock(0)));
    }

    #[test]
    fn test_pool_deduplicates_repeated_constants() {
        let shared = Value::Constant(Constant::Int(7));
        let graph = Graph::new(Value::Closure(Box::new(Closure::new(
            [],
            Call::new(Value::Undefined, vec![shared.clone(), shared]),
        ))));
        let mut writer = GraphWriter::new(&graph);
        writer.write_value(graph.root()).unwrap();
        // Null at index 0 plus one deduplicated entry for the 7.
        assert_eq!(writer.pool.len(), 2);
    }
}
