//! Graph decoding
//!
//! A single forward pass over the postfix stream with an explicit stack of
//! partially assembled items; no recursion, so stream depth cannot overflow
//! the call stack. Sharing is restored through the block and variable
//! tables, and the process-wide serial allocator is bumped past every
//! decoded serial so fresh variables cannot collide with decoded ones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::codec::opcode::Opcode;
use crate::codec::varint::decode_varint;
use crate::codec::{CodecError, CodecResult, PoolEntry};
use crate::graph::call::{BytecodeLocation, Call, Closure, Continuation, FrameDescriptor};
use crate::graph::value::{
    ClassId, Constant, FieldDescriptor, MethodDescriptor, MethodId, ObjectRef, Value,
};
use crate::graph::variable::{bump_serial_floor, Variable, VariableKind};
use crate::graph::{BlockRole, Graph, StopReasons};
use crate::kind::Kind;
use crate::procedure::builtin::{BuiltinOp, BuiltinProc, FoldVariant};
use crate::procedure::operator::{Operator, OperatorKind};
use crate::procedure::switch::{Switch, SwitchComparator};
use crate::procedure::{Procedure, Snippet};

/// Decode a graph from its binary stream
pub fn decode_graph(bytes: &[u8]) -> CodecResult<Graph> {
    let mut cursor = Cursor { bytes, at: 0 };

    let block_count = cursor.read_varint()?;
    let max_serial_plus_one = cursor.read_varint()?;
    let pool_count = cursor.read_varint()?;
    let mut pool = Vec::with_capacity(pool_count as usize);
    for _ in 0..pool_count {
        pool.push(decode_pool_entry(&mut cursor)?);
    }

    let mut reader = GraphReader {
        cursor,
        pool,
        stack: Vec::new(),
        variables: HashMap::new(),
        blocks: vec![(BlockRole::Normal, None); block_count as usize],
        defined_blocks: HashSet::new(),
        referenced_blocks: HashSet::new(),
    };
    let root = reader.run()?;

    for &id in &reader.referenced_blocks {
        if !reader.defined_blocks.contains(&id) {
            return Err(CodecError::DanglingBlock(id));
        }
    }

    let mut graph = Graph::empty();
    for (role, _) in &reader.blocks {
        graph.add_block(*role);
    }
    for (index, (_, closure)) in reader.blocks.into_iter().enumerate() {
        if let Some(closure) = closure {
            graph.set_block_closure(crate::graph::BlockId::from_index(index as u32), closure)?;
        }
    }
    graph.set_root(root);

    if max_serial_plus_one > 0 {
        bump_serial_floor(max_serial_plus_one - 1);
    }
    Ok(graph)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl Cursor<'_> {
    fn at_end(&self) -> bool {
        self.at == self.bytes.len()
    }

    fn read_u8(&mut self) -> CodecResult<u8> {
        let byte = *self.bytes.get(self.at).ok_or(CodecError::Truncated)?;
        self.at += 1;
        Ok(byte)
    }

    fn read_varint(&mut self) -> CodecResult<u32> {
        let (value, consumed) = decode_varint(&self.bytes[self.at..])?;
        self.at += consumed;
        Ok(value)
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let end = self.at.checked_add(N).ok_or(CodecError::Truncated)?;
        let slice = self.bytes.get(self.at..end).ok_or(CodecError::Truncated)?;
        self.at = end;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    fn read_kind(&mut self) -> CodecResult<Kind> {
        let tag = self.read_u8()?;
        Kind::from_tag(tag).ok_or(CodecError::UnknownTag(tag))
    }
}

/// One partially assembled item on the decode stack
enum Item {
    Value(Value),
    Call(Call),
    Frames(Option<Box<FrameDescriptor>>),
}

struct GraphReader<'a> {
    cursor: Cursor<'a>,
    pool: Vec<PoolEntry>,
    stack: Vec<Item>,
    variables: HashMap<u32, Arc<Variable>>,
    blocks: Vec<(BlockRole, Option<Closure>)>,
    defined_blocks: HashSet<u32>,
    referenced_blocks: HashSet<u32>,
}

impl GraphReader<'_> {
    fn run(&mut self) -> CodecResult<Value> {
        while !self.cursor.at_end() {
            let byte = self.cursor.read_u8()?;
            let opcode = Opcode::from_byte(byte).ok_or(CodecError::UnknownOpcode(byte))?;
            self.step(opcode)?;
        }
        let root = match self.stack.pop() {
            Some(Item::Value(value)) => value,
            Some(_) => return Err(CodecError::WrongStackItem("root value")),
            None => return Err(CodecError::StackUnderflow),
        };
        if !self.stack.is_empty() {
            return Err(CodecError::TrailingInput);
        }
        Ok(root)
    }

    fn step(&mut self, opcode: Opcode) -> CodecResult<()> {
        match opcode {
            Opcode::Call => {
                let count = self.cursor.read_varint()? as usize;
                self.finish_call(count)
            }
            Opcode::Call0
            | Opcode::Call1
            | Opcode::Call2
            | Opcode::Call3
            | Opcode::Call4
            | Opcode::Call5
            | Opcode::Call6 => {
                let count = (opcode as u8 - Opcode::Call0 as u8) as usize;
                self.finish_call(count)
            }
            Opcode::Closure => {
                let count = self.cursor.read_varint()? as usize;
                self.finish_closure(count)
            }
            Opcode::Closure0
            | Opcode::Closure1
            | Opcode::Closure2
            | Opcode::Closure3
            | Opcode::Closure4
            | Opcode::Closure5
            | Opcode::Closure6 => {
                let count = (opcode as u8 - Opcode::Closure0 as u8) as usize;
                self.finish_closure(count)
            }
            Opcode::Continuation => {
                let parameter = match self.pop_value()? {
                    Value::Variable(variable) => variable,
                    _ => return Err(CodecError::WrongStackItem("continuation parameter")),
                };
                let body = self.pop_call()?;
                let location = self.read_optional_location()?;
                let mut closure = Closure::new([parameter], body);
                if let Some(location) = location {
                    closure = closure.with_location(location);
                }
                let continuation = Continuation::from_closure(closure)?;
                self.stack
                    .push(Item::Value(Value::Continuation(Box::new(continuation))));
                Ok(())
            }
            Opcode::VoidContinuation => {
                let body = self.pop_call()?;
                let location = self.read_optional_location()?;
                let mut closure = Closure::new([], body);
                if let Some(location) = location {
                    closure = closure.with_location(location);
                }
                let continuation = Continuation::from_closure(closure)?;
                self.stack
                    .push(Item::Value(Value::Continuation(Box::new(continuation))));
                Ok(())
            }
            Opcode::BlockNormal => self.finish_block(BlockRole::Normal),
            Opcode::BlockExceptionDispatcher => {
                self.finish_block(BlockRole::ExceptionDispatcher)
            }
            Opcode::BlockReference => {
                let id = self.cursor.read_varint()?;
                if id as usize >= self.blocks.len() {
                    return Err(CodecError::DanglingBlock(id));
                }
                self.referenced_blocks.insert(id);
                self.stack.push(Item::Value(Value::Block(
                    crate::graph::BlockId::from_index(id),
                )));
                Ok(())
            }
            Opcode::VariableReference => {
                let serial = self.cursor.read_varint()?;
                let variable = self
                    .variables
                    .get(&serial)
                    .ok_or(CodecError::DanglingVariable(serial))?
                    .clone();
                self.stack.push(Item::Value(Value::Variable(variable)));
                Ok(())
            }
            Opcode::Constant => {
                let index = self.cursor.read_varint()?;
                let constant = match self.pool.get(index as usize) {
                    Some(PoolEntry::Constant(constant)) => constant.clone(),
                    _ => return Err(CodecError::InvalidPoolIndex(index)),
                };
                self.stack.push(Item::Value(Value::Constant(constant)));
                Ok(())
            }
            Opcode::Undefined => {
                self.stack.push(Item::Value(Value::Undefined));
                Ok(())
            }
            Opcode::Method => {
                let id = self.cursor.read_varint()?;
                self.stack.push(Item::Value(Value::Proc(Procedure::Method(
                    MethodId(id),
                ))));
                Ok(())
            }
            Opcode::Builtin => {
                let serial = self.cursor.read_varint()?;
                let op = BuiltinOp::from_serial(serial)
                    .ok_or(CodecError::UnknownTag(serial as u8))?;
                let variant_tag = self.cursor.read_u8()?;
                let variant = FoldVariant::from_tag(variant_tag)
                    .ok_or(CodecError::UnknownTag(variant_tag))?;
                self.stack.push(Item::Value(Value::Proc(Procedure::Builtin(
                    BuiltinProc { op, variant },
                ))));
                Ok(())
            }
            Opcode::Snippet => {
                let tag = self.cursor.read_u8()?;
                let payload = self.cursor.read_u8()?;
                let snippet =
                    Snippet::from_encoding(tag, payload).ok_or(CodecError::UnknownTag(tag))?;
                self.stack
                    .push(Item::Value(Value::Proc(Procedure::Snippet(snippet))));
                Ok(())
            }
            Opcode::Switch => {
                let kind = self.cursor.read_kind()?;
                let comparator_tag = self.cursor.read_u8()?;
                let comparator = SwitchComparator::from_tag(comparator_tag)
                    .ok_or(CodecError::UnknownTag(comparator_tag))?;
                let matches = self.cursor.read_varint()?;
                self.stack.push(Item::Value(Value::Proc(Procedure::Switch(
                    Switch::new(kind, comparator, matches),
                ))));
                Ok(())
            }
            Opcode::Operator => {
                let tag = self.cursor.read_u8()?;
                let payload = self.cursor.read_u8()?;
                let kind = OperatorKind::from_encoding(tag, payload)
                    .ok_or(CodecError::UnknownTag(tag))?;
                let shifted = self.cursor.read_varint()?;
                let pool_index = shifted.checked_sub(1);
                self.stack.push(Item::Value(Value::Proc(
                    Procedure::Operator(Operator::unresolved(kind, pool_index)),
                )));
                Ok(())
            }
            Opcode::NoFrames => {
                self.stack.push(Item::Frames(None));
                Ok(())
            }
            Opcode::FrameDescriptor => {
                let locals_count = self.cursor.read_varint()? as usize;
                let stack_count = self.cursor.read_varint()? as usize;
                let location = self.read_location()?;
                let stack_values = self.pop_values(stack_count)?;
                let locals = self.pop_values(locals_count)?;
                let parent = self.pop_frames()?;
                let mut frame = FrameDescriptor::new(location, locals, stack_values);
                frame.parent = parent;
                self.stack.push(Item::Frames(Some(Box::new(frame))));
                Ok(())
            }
            Opcode::VarNormalContinuationParameter => {
                self.define_variable(|cursor| {
                    let ordinal = cursor.read_varint()?;
                    Ok(VariableKind::NormalContinuationParameter { ordinal })
                })
            }
            Opcode::VarExceptionContinuationParameter => {
                self.define_variable(|cursor| {
                    let ordinal = cursor.read_varint()?;
                    Ok(VariableKind::ExceptionContinuationParameter { ordinal })
                })
            }
            Opcode::VarLocal => self.define_variable_with_location(),
            Opcode::VarMethodParameter => self.define_variable(|cursor| {
                let slot = cursor.read_varint()?;
                Ok(VariableKind::MethodParameter { slot })
            }),
            Opcode::VarStack => self.define_variable(|cursor| {
                let slot = cursor.read_varint()?;
                Ok(VariableKind::Stack { slot })
            }),
            Opcode::VarTemporary => self.define_variable(|_| Ok(VariableKind::Temporary)),
        }
    }

    fn finish_call(&mut self, count: usize) -> CodecResult<()> {
        let procedure = self.pop_value()?;
        let frames = self.pop_frames()?;
        let arguments = self.pop_values(count)?;
        let location = self.read_optional_location()?;
        let reasons = StopReasons::from_bits(self.cursor.read_varint()?);

        let mut call = Call::new(procedure, arguments).with_reasons(reasons);
        if let Some(location) = location {
            call = call.with_location(location);
        }
        call.set_frames(frames);
        self.stack.push(Item::Call(call));
        Ok(())
    }

    fn finish_closure(&mut self, count: usize) -> CodecResult<()> {
        let mut parameters = Vec::with_capacity(count);
        for _ in 0..count {
            match self.pop_value()? {
                Value::Variable(variable) => parameters.push(variable),
                _ => return Err(CodecError::WrongStackItem("closure parameter")),
            }
        }
        parameters.reverse();
        let body = self.pop_call()?;
        let location = self.read_optional_location()?;
        let mut closure = Closure::new(parameters, body);
        if let Some(location) = location {
            closure = closure.with_location(location);
        }
        self.stack
            .push(Item::Value(Value::Closure(Box::new(closure))));
        Ok(())
    }

    fn finish_block(&mut self, role: BlockRole) -> CodecResult<()> {
        let id = self.cursor.read_varint()?;
        let closure = match self.pop_value()? {
            Value::Closure(closure) => *closure,
            _ => return Err(CodecError::WrongStackItem("block closure")),
        };
        let slot = self
            .blocks
            .get_mut(id as usize)
            .ok_or(CodecError::DanglingBlock(id))?;
        if !self.defined_blocks.insert(id) {
            return Err(CodecError::DuplicateBlock(id));
        }
        *slot = (role, Some(closure));
        self.stack.push(Item::Value(Value::Block(
            crate::graph::BlockId::from_index(id),
        )));
        Ok(())
    }

    fn define_variable(
        &mut self,
        read_variant: impl FnOnce(&mut Cursor<'_>) -> CodecResult<VariableKind>,
    ) -> CodecResult<()> {
        let serial = self.cursor.read_varint()?;
        let kind = self.cursor.read_kind()?;
        let variant = read_variant(&mut self.cursor)?;
        self.install_variable(serial, kind, variant)
    }

    fn define_variable_with_location(&mut self) -> CodecResult<()> {
        let serial = self.cursor.read_varint()?;
        let kind = self.cursor.read_kind()?;
        let slot = self.cursor.read_varint()?;
        let location = self.read_optional_location()?;
        self.install_variable(serial, kind, VariableKind::Local { slot, location })
    }

    fn install_variable(
        &mut self,
        serial: u32,
        kind: Kind,
        variant: VariableKind,
    ) -> CodecResult<()> {
        if self.variables.contains_key(&serial) {
            return Err(CodecError::AlphaConversion(serial));
        }
        let variable = Variable::with_serial(serial, kind, variant);
        self.variables.insert(serial, variable.clone());
        self.stack.push(Item::Value(Value::Variable(variable)));
        Ok(())
    }

    fn read_location(&mut self) -> CodecResult<BytecodeLocation> {
        let index = self.cursor.read_varint()?;
        match self.pool.get(index as usize) {
            Some(PoolEntry::Location(location)) => Ok(*location),
            _ => Err(CodecError::InvalidPoolIndex(index)),
        }
    }

    fn read_optional_location(&mut self) -> CodecResult<Option<BytecodeLocation>> {
        let index = self.cursor.read_varint()?;
        if index == 0 {
            return Ok(None);
        }
        match self.pool.get(index as usize) {
            Some(PoolEntry::Location(location)) => Ok(Some(*location)),
            _ => Err(CodecError::InvalidPoolIndex(index)),
        }
    }

    fn pop_value(&mut self) -> CodecResult<Value> {
        match self.stack.pop() {
            Some(Item::Value(value)) => Ok(value),
            Some(_) => Err(CodecError::WrongStackItem("value")),
            None => Err(CodecError::StackUnderflow),
        }
    }

    fn pop_values(&mut self, count: usize) -> CodecResult<Vec<Value>> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.pop_value()?);
        }
        values.reverse();
        Ok(values)
    }

    fn pop_call(&mut self) -> CodecResult<Call> {
        match self.stack.pop() {
            Some(Item::Call(call)) => Ok(call),
            Some(_) => Err(CodecError::WrongStackItem("call")),
            None => Err(CodecError::StackUnderflow),
        }
    }

    fn pop_frames(&mut self) -> CodecResult<Option<Box<FrameDescriptor>>> {
        match self.stack.pop() {
            Some(Item::Frames(frames)) => Ok(frames),
            Some(_) => Err(CodecError::WrongStackItem("frame chain")),
            None => Err(CodecError::StackUnderflow),
        }
    }
}

fn decode_pool_entry(cursor: &mut Cursor<'_>) -> CodecResult<PoolEntry> {
    let tag = cursor.read_u8()?;
    let constant = match tag {
        0 => Constant::Null,
        1 => Constant::Byte(cursor.read_u8()? as i8),
        2 => Constant::Boolean(cursor.read_u8()? != 0),
        3 => Constant::Short(i16::from_le_bytes(cursor.read_array()?)),
        4 => Constant::Char(u16::from_le_bytes(cursor.read_array()?)),
        5 => Constant::Int(i32::from_le_bytes(cursor.read_array()?)),
        6 => Constant::Float(f32::from_bits(u32::from_le_bytes(cursor.read_array()?))),
        7 => Constant::Long(i64::from_le_bytes(cursor.read_array()?)),
        8 => Constant::Double(f64::from_bits(u64::from_le_bytes(cursor.read_array()?))),
        9 => Constant::Word(u64::from_le_bytes(cursor.read_array()?)),
        10 => {
            let holder = ClassId(cursor.read_varint()?);
            let offset = cursor.read_varint()?;
            let kind = cursor.read_kind()?;
            let mutability_tag = cursor.read_u8()?;
            let mutability = crate::graph::value::FieldMutability::from_tag(mutability_tag)
                .ok_or(CodecError::UnknownTag(mutability_tag))?;
            let requires_holder_initialization = cursor.read_u8()? != 0;
            Constant::Object(ObjectRef::Field(Arc::new(FieldDescriptor {
                holder,
                offset,
                kind,
                mutability,
                requires_holder_initialization,
            })))
        }
        11 => {
            let id = MethodId(cursor.read_varint()?);
            let holder = ClassId(cursor.read_varint()?);
            Constant::Object(ObjectRef::Method(MethodDescriptor { id, holder }))
        }
        12 => Constant::Object(ObjectRef::Class(ClassId(cursor.read_varint()?))),
        13 => Constant::Object(ObjectRef::StaticTuple(ClassId(cursor.read_varint()?))),
        14 => Constant::Object(ObjectRef::ResolutionGuard {
            pool_index: cursor.read_varint()?,
        }),
        15 => Constant::Object(ObjectRef::Data(u64::from_le_bytes(cursor.read_array()?))),
        16 => {
            let method = MethodId(cursor.read_varint()?);
            let bci = cursor.read_varint()?;
            return Ok(PoolEntry::Location(BytecodeLocation { method, bci }));
        }
        other => return Err(CodecError::UnknownTag(other)),
    };
    Ok(PoolEntry::Constant(constant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_graph;
    use crate::graph::equality::structurally_equal;
    use crate::graph::variable::VariableFactory;

    #[test]
    fn test_empty_stream_rejected() {
        assert!(matches!(decode_graph(&[]), Err(CodecError::Truncated)));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        // Header: 0 blocks, 0 serials, 0 pool entries, then a junk opcode.
        let err = decode_graph(&[0, 0, 0, 0xEE]).unwrap_err();
        assert_eq!(err, CodecError::UnknownOpcode(0xEE));
    }

    #[test]
    fn test_simple_roundtrip() {
        let factory = VariableFactory::new();
        let x = factory.create_temporary(Kind::Int);
        let graph = Graph::new(Value::Closure(Box::new(Closure::new(
            [x.clone()],
            Call::new(
                Value::Undefined,
                vec![Value::Variable(x), Value::Constant(Constant::Int(3))],
            ),
        ))));
        let bytes = encode_graph(&graph).unwrap();
        let decoded = decode_graph(&bytes).unwrap();
        assert!(structurally_equal(&graph, &decoded));
    }

    #[test]
    fn test_duplicate_block_definition_rejected() {
        use crate::codec::opcode::Opcode;

        // Header: one block, no serials, no pool entries.
        let mut bytes = vec![1, 0, 0];
        // An empty closure, then a normal-block definition of id 0.
        let define_block_zero = [
            Opcode::NoFrames as u8,
            Opcode::Undefined as u8,
            Opcode::Call0 as u8,
            0, // no call location
            0, // no stop reasons
            Opcode::Closure0 as u8,
            0, // no closure location
            Opcode::BlockNormal as u8,
            0, // block id
        ];
        bytes.extend_from_slice(&define_block_zero);
        bytes.extend_from_slice(&define_block_zero);

        assert_eq!(
            decode_graph(&bytes).unwrap_err(),
            CodecError::DuplicateBlock(0)
        );
    }

    #[test]
    fn test_decoded_serials_do_not_collide_with_fresh_ones() {
        let factory = VariableFactory::new();
        let x = factory.create_temporary(Kind::Int);
        let highest = x.serial();
        let graph = Graph::new(Value::Closure(Box::new(Closure::new(
            [x.clone()],
            Call::new(Value::Undefined, vec![Value::Variable(x)]),
        ))));
        let bytes = encode_graph(&graph).unwrap();
        let _ = decode_graph(&bytes).unwrap();
        let fresh = factory.create_temporary(Kind::Int);
        assert!(fresh.serial() > highest);
    }
}
