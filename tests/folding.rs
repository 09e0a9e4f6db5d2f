//! Pipeline tests: operator lowering followed by constant folding

use std::sync::Arc;

use cirrus::context::{
    Backend, CompilationContext, CompilationMode, DeferredCause, FullBackend, ResolvedRef,
    TableResolver,
};
use cirrus::fold::reduce_graph;
use cirrus::graph::equality::structurally_equal;
use cirrus::graph::value::{
    ClassId, Constant, FieldDescriptor, FieldMutability, MethodDescriptor, MethodId, ObjectRef,
    Value,
};
use cirrus::graph::variable::VariableFactory;
use cirrus::graph::{Call, Closure, Continuation, Graph};
use cirrus::kind::Kind;
use cirrus::lower::lower_graph;
use cirrus::procedure::snippet::{ResolutionKind, SnippetRegistry};
use cirrus::procedure::{
    BuiltinOp, Operator, OperatorKind, Procedure, Snippet, Switch, SwitchComparator,
};

struct Fixture {
    resolver: TableResolver,
    backend: FullBackend,
    snippets: SnippetRegistry,
}

impl Fixture {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Fixture {
            resolver: TableResolver::new(),
            backend: FullBackend,
            snippets: SnippetRegistry::new(),
        }
    }

    fn cx(&self, mode: CompilationMode) -> CompilationContext<'_> {
        CompilationContext::new(
            mode,
            &self.resolver,
            &self.backend as &dyn Backend,
            &self.snippets,
        )
    }
}

fn field(offset: u32, mutability: FieldMutability) -> Arc<FieldDescriptor> {
    Arc::new(FieldDescriptor {
        holder: ClassId(1),
        offset,
        kind: Kind::Int,
        mutability,
        requires_holder_initialization: false,
    })
}

fn root_body(graph: &Graph) -> &Call {
    let Value::Closure(closure) = graph.root() else {
        panic!("closure root expected");
    };
    closure.body()
}

#[test]
fn test_getfield_on_constant_tuple_folds_to_literal() {
    let mut fixture = Fixture::new();
    let tuple = Constant::Object(ObjectRef::Data(42));
    fixture
        .resolver
        .define_pool_entry(1, ResolvedRef::Field(field(24, FieldMutability::Constant)));
    fixture
        .resolver
        .define_field_value(tuple.clone(), 24, Constant::Int(123));
    let cx = fixture.cx(CompilationMode::Target);

    let factory = VariableFactory::new();
    let cc = factory.fresh_normal_continuation_parameter(Kind::Int);
    let ce = factory.fresh_exception_continuation_parameter();
    let operator =
        Operator::new(OperatorKind::GetField { kind: Kind::Int }, Some(1), &cx).unwrap();
    let body = Call::new(
        Value::Proc(Procedure::Operator(operator)),
        vec![
            Value::Constant(tuple),
            Value::Variable(cc.clone()),
            Value::Variable(ce.clone()),
        ],
    );
    let mut graph = Graph::new(Value::Closure(Box::new(Closure::new([cc.clone(), ce], body))));

    lower_graph(&cx, &mut graph).unwrap();
    reduce_graph(&cx, &mut graph).unwrap();

    // The null check, the field read and the intermediate continuations all
    // disappear; what remains is a jump delivering the literal.
    let body = root_body(&graph);
    assert_eq!(body.procedure(), &Value::Variable(cc));
    assert_eq!(body.arguments(), &[Value::Constant(Constant::Int(123))]);
}

#[test]
fn test_mutable_field_keeps_null_check_and_becomes_offset_read() {
    let mut fixture = Fixture::new();
    fixture
        .resolver
        .define_pool_entry(2, ResolvedRef::Field(field(8, FieldMutability::Mutable)));
    let cx = fixture.cx(CompilationMode::Target);

    let factory = VariableFactory::new();
    let receiver = factory.create_method_parameter(Kind::Reference, 0);
    let cc = factory.fresh_normal_continuation_parameter(Kind::Int);
    let ce = factory.fresh_exception_continuation_parameter();
    let operator =
        Operator::new(OperatorKind::GetField { kind: Kind::Int }, Some(2), &cx).unwrap();
    let body = Call::new(
        Value::Proc(Procedure::Operator(operator)),
        vec![
            Value::Variable(receiver.clone()),
            Value::Variable(cc),
            Value::Variable(ce.clone()),
        ],
    );
    let mut graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [receiver, ce],
        body,
    ))));

    lower_graph(&cx, &mut graph).unwrap();
    reduce_graph(&cx, &mut graph).unwrap();

    // The receiver is unknown, so the null check stays; behind it the
    // symbolic field read has been strength-reduced to a raw offset read.
    let body = root_body(&graph);
    assert_eq!(
        body.procedure(),
        &Value::Proc(Procedure::Snippet(Snippet::CheckNullPointer))
    );
    let Value::Continuation(next) = &body.arguments()[1] else {
        panic!("continuation expected after the null check");
    };
    let Value::Proc(Procedure::Builtin(builtin)) = next.body().procedure() else {
        panic!("builtin offset read expected, got {}", next.body());
    };
    assert_eq!(builtin.op, BuiltinOp::ReadIntAtOffset);
    assert_eq!(
        next.body().arguments()[1],
        Value::Constant(Constant::Int(8))
    );
}

#[test]
fn test_deferred_resolution_left_for_the_runtime() {
    let mut fixture = Fixture::new();
    fixture
        .resolver
        .defer_pool_entry(4, DeferredCause::OmittedClass);
    let cx = fixture.cx(CompilationMode::Host);

    let factory = VariableFactory::new();
    let cc = factory.fresh_normal_continuation_parameter(Kind::Int);
    let ce = factory.fresh_exception_continuation_parameter();
    let operator =
        Operator::new(OperatorKind::GetStatic { kind: Kind::Int }, Some(4), &cx).unwrap();
    let body = Call::new(
        Value::Proc(Procedure::Operator(operator)),
        vec![Value::Variable(cc), Value::Variable(ce.clone())],
    );
    let mut graph = Graph::new(Value::Closure(Box::new(Closure::new([ce], body))));

    lower_graph(&cx, &mut graph).unwrap();
    reduce_graph(&cx, &mut graph).unwrap();

    // The resolution snippet stays in the graph so the target can perform
    // and observe the resolution itself.
    assert_eq!(
        root_body(&graph).procedure(),
        &Value::Proc(Procedure::Snippet(Snippet::Resolve(
            ResolutionKind::StaticFieldRead
        )))
    );
}

#[test]
fn test_switch_decided_at_compile_time() {
    let fixture = Fixture::new();
    let cx = fixture.cx(CompilationMode::Target);

    let factory = VariableFactory::new();
    let cc = factory.fresh_normal_continuation_parameter(Kind::Int);
    let then_branch = Continuation::void(Call::new(
        Value::Variable(cc.clone()),
        vec![Value::Constant(Constant::Int(1))],
    ));
    let else_branch = Continuation::void(Call::new(
        Value::Variable(cc.clone()),
        vec![Value::Constant(Constant::Int(2))],
    ));
    let body = Call::new(
        Value::Proc(Procedure::Switch(Switch::if_then_else(
            Kind::Int,
            SwitchComparator::IntEqual,
        ))),
        vec![
            Value::Constant(Constant::Int(0)),
            Value::Constant(Constant::Int(0)),
            Value::Continuation(Box::new(then_branch)),
            Value::Continuation(Box::new(else_branch)),
        ],
    );
    let mut graph = Graph::new(Value::Closure(Box::new(Closure::new([cc.clone()], body))));

    reduce_graph(&cx, &mut graph).unwrap();

    let body = root_body(&graph);
    assert_eq!(body.procedure(), &Value::Variable(cc));
    assert_eq!(body.arguments(), &[Value::Constant(Constant::Int(1))]);
}

#[test]
fn test_entrypoint_folding_gated_by_mode() {
    let mut fixture = Fixture::new();
    fixture.resolver.define_native_entry(MethodId(9), 0xC0DE);
    let method = Constant::Object(ObjectRef::Method(MethodDescriptor {
        id: MethodId(9),
        holder: ClassId(1),
    }));

    let factory = VariableFactory::new();
    let cc = factory.fresh_normal_continuation_parameter(Kind::Word);
    let ce = factory.fresh_exception_continuation_parameter();
    let make = || {
        Graph::new(Value::Closure(Box::new(Closure::new(
            [cc.clone(), ce.clone()],
            Call::new(
                Value::Proc(Procedure::Snippet(Snippet::MakeEntrypoint)),
                vec![
                    Value::Constant(method.clone()),
                    Value::Variable(cc.clone()),
                    Value::Variable(ce.clone()),
                ],
            ),
        ))))
    };

    // Host mode: entry points of the target do not exist yet.
    let mut host_graph = make();
    reduce_graph(&fixture.cx(CompilationMode::Host), &mut host_graph).unwrap();
    assert_eq!(
        root_body(&host_graph).procedure(),
        &Value::Proc(Procedure::Snippet(Snippet::MakeEntrypoint))
    );

    let mut target_graph = make();
    reduce_graph(&fixture.cx(CompilationMode::Target), &mut target_graph).unwrap();
    let body = root_body(&target_graph);
    assert_eq!(body.procedure(), &Value::Variable(cc));
    assert_eq!(
        body.arguments(),
        &[Value::Constant(Constant::Word(0xC0DE))]
    );
}

#[test]
fn test_lower_then_fold_reaches_a_fixpoint() {
    let mut fixture = Fixture::new();
    fixture
        .resolver
        .define_pool_entry(2, ResolvedRef::Field(field(8, FieldMutability::Mutable)));
    let cx = fixture.cx(CompilationMode::Target);

    let factory = VariableFactory::new();
    let receiver = factory.create_method_parameter(Kind::Reference, 0);
    let cc = factory.fresh_normal_continuation_parameter(Kind::Int);
    let ce = factory.fresh_exception_continuation_parameter();
    let operator =
        Operator::new(OperatorKind::GetField { kind: Kind::Int }, Some(2), &cx).unwrap();
    let body = Call::new(
        Value::Proc(Procedure::Operator(operator)),
        vec![
            Value::Variable(receiver.clone()),
            Value::Variable(cc.clone()),
            Value::Variable(ce.clone()),
        ],
    );
    let mut graph = Graph::new(Value::Closure(Box::new(Closure::new(
        [receiver, cc, ce],
        body,
    ))));

    lower_graph(&cx, &mut graph).unwrap();
    reduce_graph(&cx, &mut graph).unwrap();
    let settled = graph.clone();
    reduce_graph(&cx, &mut graph).unwrap();
    assert!(
        structurally_equal(&settled, &graph),
        "a second folding pass over a fixpoint must change nothing"
    );
}
