//! End-to-end codec tests: whole graphs through encode and decode

use std::sync::Arc;

use cirrus::codec::opcode::Opcode;
use cirrus::codec::{decode_graph, encode_graph, CodecError};
use cirrus::graph::equality::structurally_equal;
use cirrus::graph::value::{
    ClassId, Constant, FieldDescriptor, FieldMutability, MethodId, Value,
};
use cirrus::graph::variable::VariableFactory;
use cirrus::graph::{
    BlockRole, BytecodeLocation, Call, Closure, Continuation, FrameDescriptor, Graph, StopReasons,
};
use cirrus::kind::Kind;
use cirrus::procedure::{
    BuiltinOp, BuiltinProc, Operator, OperatorKind, Procedure, Resolution, Snippet, Switch,
    SwitchComparator,
};

fn roundtrip(graph: &Graph) -> Graph {
    let bytes = encode_graph(graph).expect("encoding failed");
    decode_graph(&bytes).expect("decoding failed")
}

fn location(bci: u32) -> BytecodeLocation {
    BytecodeLocation {
        method: MethodId(7),
        bci,
    }
}

#[test]
fn test_loop_block_roundtrips() {
    // A block whose body jumps back to itself: the simplest loop.
    let factory = VariableFactory::new();
    let counter = factory.create_temporary(Kind::Int);
    let mut graph = Graph::empty();
    let block = graph.add_block(BlockRole::Normal);
    let body = Call::new(
        Value::Block(block),
        vec![Value::Variable(counter.clone())],
    );
    graph
        .set_block_closure(block, Closure::new([counter], body))
        .unwrap();
    graph.set_root(Value::Block(block));

    let decoded = roundtrip(&graph);
    assert!(
        structurally_equal(&graph, &decoded),
        "cyclic control flow must survive the stream"
    );
}

#[test]
fn test_exception_dispatcher_role_preserved() {
    let mut graph = Graph::empty();
    let dispatcher = graph.add_block(BlockRole::ExceptionDispatcher);
    graph
        .set_block_closure(dispatcher, Closure::new([], Call::new(Value::Undefined, vec![])))
        .unwrap();
    graph.set_root(Value::Block(dispatcher));

    let decoded = roundtrip(&graph);
    let block = decoded.block(dispatcher).unwrap();
    assert_eq!(block.role(), BlockRole::ExceptionDispatcher);
}

#[test]
fn test_shared_binding_distinguished_from_copies() {
    let factory = VariableFactory::new();
    let shared = factory.create_temporary(Kind::Int);
    let graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [shared.clone()],
        Call::new(
            Value::Undefined,
            vec![Value::Variable(shared.clone()), Value::Variable(shared)],
        ),
    ))));
    let decoded = roundtrip(&graph);
    assert!(structurally_equal(&graph, &decoded));

    // A graph with two independent variables must not compare equal to the
    // decoded shared one.
    let x = factory.create_temporary(Kind::Int);
    let y = factory.create_temporary(Kind::Int);
    let copies = Graph::new(Value::Closure(Box::new(Closure::new(
        [x.clone()],
        Call::new(
            Value::Undefined,
            vec![Value::Variable(x), Value::Variable(y)],
        ),
    ))));
    assert!(
        !structurally_equal(&copies, &decoded),
        "decoding must not split one binding into two"
    );
}

#[test]
fn test_procedure_repertoire_and_bookkeeping_roundtrip() {
    let factory = VariableFactory::new();
    let receiver = factory.create_method_parameter(Kind::Reference, 0);
    let local = factory.create_local_variable(Kind::Int, 2, Some(location(4)));
    let cc = factory.fresh_normal_continuation_parameter(Kind::Int);
    let ce = factory.fresh_exception_continuation_parameter();

    let field = Arc::new(FieldDescriptor {
        holder: ClassId(3),
        offset: 24,
        kind: Kind::Int,
        mutability: FieldMutability::Constant,
        requires_holder_initialization: true,
    });

    let read = Call::new(
        Value::Proc(Procedure::Snippet(Snippet::FieldRead { kind: Kind::Int })),
        vec![
            Value::Variable(receiver.clone()),
            Value::Constant(Constant::from_field(field)),
            Value::Variable(cc.clone()),
            Value::Variable(ce.clone()),
        ],
    )
    .with_location(location(9))
    .with_reasons(StopReasons::NULL_POINTER_CHECK);

    let branch = Call::new(
        Value::Proc(Procedure::Switch(Switch::if_then_else(
            Kind::Int,
            SwitchComparator::IntEqual,
        ))),
        vec![
            Value::Variable(local.clone()),
            Value::Constant(Constant::Int(0)),
            Value::Continuation(Box::new(Continuation::void(read))),
            Value::Variable(cc.clone()),
        ],
    );

    let mut add = Call::new(
        Value::Proc(Procedure::Builtin(BuiltinProc::plain(BuiltinOp::LongPlus))),
        vec![
            Value::Constant(Constant::Long(1 << 40)),
            Value::Constant(Constant::Long(3)),
            Value::Continuation(Box::new(Continuation::void(branch))),
            Value::Variable(ce.clone()),
        ],
    )
    .with_location(location(2))
    .with_reasons(StopReasons::CALL);
    let mut frame = FrameDescriptor::new(
        location(2),
        vec![Value::Variable(local.clone()), Value::Constant(Constant::Null)],
        vec![Value::Variable(receiver.clone())],
    );
    frame.parent = Some(Box::new(FrameDescriptor::new(location(0), vec![], vec![])));
    add.set_frames(Some(Box::new(frame)));

    let graph = Graph::new(Value::Closure(Box::new(
        Closure::new([receiver, local, cc, ce], add).with_location(location(0)),
    )));

    let decoded = roundtrip(&graph);
    assert!(
        structurally_equal(&graph, &decoded),
        "locations, reasons and frame chains are part of the graph"
    );
}

#[test]
fn test_wide_call_uses_general_form() {
    // Seven arguments exceed the compact opcodes.
    let arguments: Vec<Value> = (0..7)
        .map(|i| Value::Constant(Constant::Int(i)))
        .collect();
    let graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [],
        Call::new(
            Value::Proc(Procedure::Method(MethodId(11))),
            arguments,
        ),
    ))));
    let decoded = roundtrip(&graph);
    assert!(structurally_equal(&graph, &decoded));
}

#[test]
fn test_general_call_form_decodes_like_compact() {
    // The writer always prefers the compact opcode below seven arguments;
    // rewriting it to the general form with an explicit count must decode
    // to the same graph.
    let graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [],
        Call::new(
            Value::Undefined,
            vec![
                Value::Constant(Constant::Int(1)),
                Value::Constant(Constant::Int(2)),
                Value::Constant(Constant::Int(3)),
            ],
        ),
    ))));
    let compact = encode_graph(&graph).unwrap();

    // Stream trailer: call opcode, call location, call reasons, closure
    // opcode, closure location.
    let at = compact.len() - 5;
    assert_eq!(compact[at], Opcode::Call3 as u8);
    let mut general = compact.clone();
    general[at] = Opcode::Call as u8;
    general.insert(at + 1, 3); // explicit argument count

    let from_compact = decode_graph(&compact).unwrap();
    let from_general = decode_graph(&general).unwrap();
    assert!(
        structurally_equal(&from_compact, &from_general),
        "compact and general call forms must decode identically"
    );
    assert!(structurally_equal(&graph, &from_general));
}

#[test]
fn test_operator_resolution_state_is_not_persisted() {
    let operator = Operator::unresolved(OperatorKind::GetField { kind: Kind::Int }, Some(5));
    let graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [],
        Call::new(
            Value::Proc(Procedure::Operator(operator)),
            vec![Value::Undefined, Value::Undefined, Value::Undefined],
        ),
    ))));
    let decoded = roundtrip(&graph);

    let Value::Closure(closure) = decoded.root() else {
        panic!("closure root expected");
    };
    let Value::Proc(Procedure::Operator(decoded_operator)) = closure.body().procedure() else {
        panic!("operator procedure expected");
    };
    assert_eq!(
        decoded_operator.kind(),
        OperatorKind::GetField { kind: Kind::Int }
    );
    assert_eq!(
        decoded_operator.resolution(),
        &Resolution::Unresolved { pool_index: 5 },
        "a decoded operator re-resolves against the reading environment"
    );
}

#[test]
fn test_truncated_stream_rejected() {
    let graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [],
        Call::new(Value::Undefined, vec![Value::Constant(Constant::Int(1))]),
    ))));
    let bytes = encode_graph(&graph).unwrap();
    assert!(
        decode_graph(&bytes[..bytes.len() - 1]).is_err(),
        "dropping the final byte must not decode"
    );
}

#[test]
fn test_trailing_value_rejected() {
    let graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [],
        Call::new(Value::Undefined, vec![]),
    ))));
    let mut bytes = encode_graph(&graph).unwrap();
    // A stray `undefined` leaves a second item on the decode stack.
    bytes.push(0x17);
    assert_eq!(decode_graph(&bytes).unwrap_err(), CodecError::TrailingInput);
}

#[test]
fn test_decode_then_reencode_is_stable() {
    let factory = VariableFactory::new();
    let x = factory.create_stack_variable(Kind::Long, 1);
    let graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [x.clone()],
        Call::new(
            Value::Proc(Procedure::Builtin(BuiltinProc::plain(BuiltinOp::LongTimes))),
            vec![
                Value::Variable(x.clone()),
                Value::Variable(x),
                Value::Undefined,
                Value::Undefined,
            ],
        ),
    ))));
    let once = encode_graph(&graph).unwrap();
    let again = encode_graph(&decode_graph(&once).unwrap()).unwrap();
    assert_eq!(once, again, "the encoding of a decoded graph is identical");
}
