//! Operator lowering
//!
//! Expands each surface-operator call into the combination of builtins,
//! snippets and explicit checks that implements it: null checks before
//! dereferences of reference values, bounds checks before array access,
//! class-initialization barriers around static access and allocation, and
//! resolution snippets around operators whose pool reference is still
//! symbolic.
//!
//! Every call the expansion emits carries the operator's stop reasons and
//! the original call's location and frame chain; lowering never drops the
//! deoptimization bookkeeping it was handed.
//!
//! When the exception continuation of the operator call is not already a
//! variable, the expansion binds it once and shares the binding, instead of
//! duplicating an arbitrary continuation value at every emitted call.

use std::sync::Arc;

use tracing::trace;

use crate::context::CompilationContext;
use crate::graph::call::{Call, Closure, Continuation, FrameDescriptor};
use crate::graph::value::{Constant, ObjectRef, Value};
use crate::graph::variable::{Variable, VariableKind};
use crate::graph::{Graph, GraphError, GraphResult};
use crate::kind::Kind;
use crate::procedure::operator::{Operator, OperatorKind, Resolution};
use crate::procedure::snippet::{ResolutionKind, Snippet};
use crate::procedure::Procedure;

/// Lower every operator call in the graph
pub fn lower_graph(cx: &CompilationContext<'_>, graph: &mut Graph) -> GraphResult<()> {
    let lowering = Lowering { cx };
    lowering.lower_value(graph.root_mut())?;
    let ids: Vec<_> = graph.block_ids().collect();
    for id in ids {
        if let Some(closure) = graph.block_closure_mut(id)? {
            lowering.lower_call(closure.body_mut())?;
        }
    }
    Ok(())
}

struct Lowering<'a, 'b> {
    cx: &'a CompilationContext<'b>,
}

impl Lowering<'_, '_> {
    fn lower_value(&self, value: &mut Value) -> GraphResult<()> {
        match value {
            Value::Closure(closure) => self.lower_call(closure.body_mut()),
            Value::Continuation(continuation) => {
                self.lower_call(continuation.closure_mut().body_mut())
            }
            Value::Constant(_)
            | Value::Variable(_)
            | Value::Block(_)
            | Value::Proc(_)
            | Value::Undefined => Ok(()),
        }
    }

    fn lower_call(&self, call: &mut Call) -> GraphResult<()> {
        if let Value::Proc(Procedure::Operator(operator)) = call.procedure().clone() {
            trace!(operator = %operator, "lowering");
            let replacement = Expansion::of(self.cx, &operator, call)?.finish();
            call.assign(replacement);
        }
        self.lower_value(call.procedure_mut())?;
        for argument in call.arguments_mut() {
            self.lower_value(argument)?;
        }
        Ok(())
    }
}

/// One operator call being expanded
struct Expansion<'a, 'b> {
    cx: &'a CompilationContext<'b>,
    operator: Operator,
    /// Exception continuation as a variable, shareable across emitted calls
    ce: Value,
    /// When the original exception continuation was not a variable, the
    /// binder and the original value to apply the result to
    ce_binding: Option<(Arc<Variable>, Value)>,
    location: Option<crate::graph::call::BytecodeLocation>,
    frames: Option<Box<FrameDescriptor>>,
    body: Call,
}

impl<'a, 'b> Expansion<'a, 'b> {
    fn of(
        cx: &'a CompilationContext<'b>,
        operator: &Operator,
        call: &Call,
    ) -> GraphResult<Self> {
        let arguments = call.arguments();
        if arguments.len() < 2 {
            return Err(GraphError::ArityMismatch {
                procedure: operator.to_string(),
                expected: 2,
                actual: arguments.len(),
            });
        }
        let raw_ce = arguments[arguments.len() - 1].clone();
        let (ce, ce_binding) = match raw_ce {
            Value::Variable(_) => (raw_ce, None),
            other => {
                let binder = Variable::fresh(
                    Kind::Reference,
                    VariableKind::ExceptionContinuationParameter { ordinal: 0 },
                );
                (Value::Variable(binder.clone()), Some((binder, other)))
            }
        };
        let mut expansion = Expansion {
            cx,
            operator: operator.clone(),
            ce,
            ce_binding,
            location: call.location(),
            frames: call.frames().map(|f| Box::new(f.clone())),
            body: Call::new(Value::Undefined, vec![]),
        };
        expansion.body = expansion.expand(call)?;
        Ok(expansion)
    }

    /// Wrap the expansion in the exception-continuation binding if one was
    /// introduced
    fn finish(self) -> Call {
        match self.ce_binding {
            None => self.body,
            Some((binder, original)) => Call::new(
                Value::Closure(Box::new(Closure::new([binder], self.body))),
                vec![original],
            ),
        }
    }

    /// Stamp reasons, location and frames onto an emitted procedure call
    fn stamped(&self, mut call: Call) -> Call {
        call.set_reasons(self.operator.reasons());
        call.set_frames(self.frames.clone());
        match self.location {
            Some(location) => call.with_location(location),
            None => call,
        }
    }

    fn snippet(&self, snippet: Snippet, arguments: Vec<Value>) -> Call {
        self.stamped(Call::new(
            Value::Proc(Procedure::Snippet(snippet)),
            arguments,
        ))
    }

    fn cont0(&self, body: Call) -> Value {
        Value::Continuation(Box::new(Continuation::void(body)))
    }

    fn cont1(&self, parameter: Arc<Variable>, body: Call) -> Value {
        Value::Continuation(Box::new(Continuation::with_parameter(parameter, body)))
    }

    fn null_checked(&self, object: Value, then: Call) -> Call {
        self.snippet(
            Snippet::CheckNullPointer,
            vec![object, self.cont0(then), self.ce.clone()],
        )
    }

    /// Run `build` with the operator's resolved descriptor
    ///
    /// Resolved operators embed the descriptor as a constant. Unresolved and
    /// deferred ones get a resolution snippet whose continuation binds the
    /// descriptor variable the body uses.
    fn with_descriptor(
        &self,
        kind: ResolutionKind,
        build: impl FnOnce(&Self, Value) -> GraphResult<Call>,
    ) -> GraphResult<Call> {
        match self.operator.resolution() {
            Resolution::Resolved { entry, .. } => {
                let descriptor = match entry {
                    crate::context::ResolvedRef::Field(field) => {
                        Constant::from_field(field.clone())
                    }
                    crate::context::ResolvedRef::Method(method) => {
                        Constant::Object(ObjectRef::Method(*method))
                    }
                    crate::context::ResolvedRef::Class(class) => {
                        Constant::Object(ObjectRef::Class(*class))
                    }
                };
                build(self, Value::Constant(descriptor))
            }
            Resolution::Unresolved { pool_index } | Resolution::Deferred { pool_index, .. } => {
                let guard = Value::Constant(Constant::Object(ObjectRef::ResolutionGuard {
                    pool_index: *pool_index,
                }));
                let descriptor = Variable::fresh(Kind::Reference, VariableKind::Temporary);
                let body = build(self, Value::Variable(descriptor.clone()))?;
                Ok(self.snippet(
                    Snippet::Resolve(kind),
                    vec![guard, self.cont1(descriptor, body), self.ce.clone()],
                ))
            }
            Resolution::None => Err(GraphError::MissingPoolReference {
                operator: self.operator.to_string(),
            }),
        }
    }

    /// The static tuple of the holder, when the descriptor is constant
    fn static_tuple_of(&self, descriptor: &Value) -> Option<Value> {
        let field = descriptor.as_constant()?.as_field()?;
        Some(Value::Constant(Constant::Object(ObjectRef::StaticTuple(
            field.holder,
        ))))
    }

    /// Whether static access through this descriptor needs an init barrier
    ///
    /// Unresolved descriptors always get the barrier; a resolved field
    /// drops it when its holder declares none is needed or has already
    /// finished initializing.
    fn needs_init_barrier(&self, descriptor: &Value) -> bool {
        match descriptor.as_constant().and_then(Constant::as_field) {
            Some(field) => {
                field.requires_holder_initialization
                    && !self.cx.resolver.is_class_initialized(field.holder)
            }
            None => true,
        }
    }

    fn init_barrier(&self, descriptor: Value, then: Call) -> Call {
        if self.needs_init_barrier(&descriptor) {
            self.snippet(
                Snippet::MakeHolderInitialized,
                vec![descriptor, self.cont0(then), self.ce.clone()],
            )
        } else {
            then
        }
    }

    /// Deliver the holder's static tuple to `build`
    fn with_static_tuple(
        &self,
        descriptor: Value,
        build: impl FnOnce(&Self, Value) -> Call,
    ) -> Call {
        match self.static_tuple_of(&descriptor) {
            Some(statics) => build(self, statics),
            None => {
                let statics = Variable::fresh(Kind::Reference, VariableKind::Temporary);
                let body = build(self, Value::Variable(statics.clone()));
                self.snippet(
                    Snippet::GetStaticTuple,
                    vec![descriptor, self.cont1(statics, body), self.ce.clone()],
                )
            }
        }
    }

    /// Call the target named by a method descriptor
    ///
    /// A constant descriptor becomes a direct call to the method identity;
    /// otherwise the entry point is materialized first and called as a value.
    fn call_descriptor_target(&self, descriptor: Value, arguments: Vec<Value>) -> Call {
        if let Some(method) = descriptor.as_constant().and_then(Constant::as_method) {
            return self.stamped(Call::new(
                Value::Proc(Procedure::Method(method.id)),
                arguments,
            ));
        }
        let entry = Variable::fresh(Kind::Word, VariableKind::Temporary);
        let target_call = self.stamped(Call::new(Value::Variable(entry.clone()), arguments));
        self.snippet(
            Snippet::MakeEntrypoint,
            vec![descriptor, self.cont1(entry, target_call), self.ce.clone()],
        )
    }

    fn check_arity(&self, call: &Call, expected: usize) -> GraphResult<()> {
        if call.arguments().len() != expected {
            return Err(GraphError::ArityMismatch {
                procedure: self.operator.to_string(),
                expected,
                actual: call.arguments().len(),
            });
        }
        Ok(())
    }

    fn expand(&self, call: &Call) -> GraphResult<Call> {
        let args = call.arguments();
        let ce = self.ce.clone();
        match self.operator.kind() {
            OperatorKind::GetField { kind } => {
                self.check_arity(call, 3)?;
                let (receiver, cc) = (args[0].clone(), args[1].clone());
                self.with_descriptor(ResolutionKind::InstanceFieldRead, |this, field| {
                    Ok(this.null_checked(
                        receiver.clone(),
                        this.snippet(
                            Snippet::FieldRead { kind },
                            vec![receiver, field, cc, ce.clone()],
                        ),
                    ))
                })
            }
            OperatorKind::PutField { kind } => {
                self.check_arity(call, 4)?;
                let (receiver, value, cc) = (args[0].clone(), args[1].clone(), args[2].clone());
                self.with_descriptor(ResolutionKind::InstanceFieldWrite, |this, field| {
                    Ok(this.null_checked(
                        receiver.clone(),
                        this.snippet(
                            Snippet::FieldWrite { kind },
                            vec![receiver, field, value, cc, ce.clone()],
                        ),
                    ))
                })
            }
            OperatorKind::GetStatic { kind } => {
                self.check_arity(call, 2)?;
                let cc = args[0].clone();
                self.with_descriptor(ResolutionKind::StaticFieldRead, |this, field| {
                    let read = this.with_static_tuple(field.clone(), |this, statics| {
                        this.snippet(
                            Snippet::FieldRead { kind },
                            vec![statics, field.clone(), cc.clone(), ce.clone()],
                        )
                    });
                    Ok(this.init_barrier(field, read))
                })
            }
            OperatorKind::PutStatic { kind } => {
                self.check_arity(call, 3)?;
                let (value, cc) = (args[0].clone(), args[1].clone());
                self.with_descriptor(ResolutionKind::StaticFieldWrite, |this, field| {
                    let write = this.with_static_tuple(field.clone(), |this, statics| {
                        this.snippet(
                            Snippet::FieldWrite { kind },
                            vec![statics, field.clone(), value.clone(), cc.clone(), ce.clone()],
                        )
                    });
                    Ok(this.init_barrier(field, write))
                })
            }
            OperatorKind::InvokeStatic => {
                let mut full = args.to_vec();
                let last = full.len() - 1;
                full[last] = ce.clone();
                self.with_descriptor(ResolutionKind::StaticMethod, |this, method| {
                    let invoke = this.call_descriptor_target(method.clone(), full);
                    Ok(this.snippet(
                        Snippet::MakeHolderInitialized,
                        vec![method, this.cont0(invoke), ce.clone()],
                    ))
                })
            }
            OperatorKind::InvokeVirtual => {
                if args.len() < 3 {
                    return Err(GraphError::ArityMismatch {
                        procedure: self.operator.to_string(),
                        expected: 3,
                        actual: args.len(),
                    });
                }
                let receiver = args[0].clone();
                let mut full = args.to_vec();
                let last = full.len() - 1;
                full[last] = ce.clone();
                self.with_descriptor(ResolutionKind::VirtualMethod, |this, method| {
                    let entry = Variable::fresh(Kind::Word, VariableKind::Temporary);
                    let invoke =
                        this.stamped(Call::new(Value::Variable(entry.clone()), full));
                    let select = this.snippet(
                        Snippet::SelectVirtualMethod,
                        vec![receiver.clone(), method, this.cont1(entry, invoke), ce.clone()],
                    );
                    Ok(this.null_checked(receiver, select))
                })
            }
            OperatorKind::InvokeSpecial => {
                if args.len() < 3 {
                    return Err(GraphError::ArityMismatch {
                        procedure: self.operator.to_string(),
                        expected: 3,
                        actual: args.len(),
                    });
                }
                let receiver = args[0].clone();
                let mut full = args.to_vec();
                let last = full.len() - 1;
                full[last] = ce.clone();
                self.with_descriptor(ResolutionKind::SpecialMethod, |this, method| {
                    let invoke = this.call_descriptor_target(method, full);
                    Ok(this.null_checked(receiver, invoke))
                })
            }
            OperatorKind::New => {
                self.check_arity(call, 2)?;
                let cc = args[0].clone();
                self.with_descriptor(ResolutionKind::ClassConstant, |this, class| {
                    let create = this.snippet(
                        Snippet::CreateTuple,
                        vec![class.clone(), cc, ce.clone()],
                    );
                    Ok(this.snippet(
                        Snippet::MakeClassInitialized,
                        vec![class, this.cont0(create), ce.clone()],
                    ))
                })
            }
            OperatorKind::NewArray => {
                self.check_arity(call, 3)?;
                let (size, cc) = (args[0].clone(), args[1].clone());
                self.with_descriptor(ResolutionKind::ClassConstant, |this, class| {
                    Ok(this.snippet(
                        Snippet::CreateArray,
                        vec![class, size, cc, ce.clone()],
                    ))
                })
            }
            OperatorKind::ArrayLoad { kind } => {
                self.check_arity(call, 4)?;
                let (array, index, cc) = (args[0].clone(), args[1].clone(), args[2].clone());
                let load = self.snippet(
                    Snippet::ArrayLoad { kind },
                    vec![array.clone(), index.clone(), cc, ce.clone()],
                );
                let bounds = self.snippet(
                    Snippet::CheckArrayIndex,
                    vec![array.clone(), index, self.cont0(load), ce],
                );
                Ok(self.null_checked(array, bounds))
            }
            OperatorKind::ArrayStore { kind } => {
                self.check_arity(call, 5)?;
                let (array, index, value, cc) = (
                    args[0].clone(),
                    args[1].clone(),
                    args[2].clone(),
                    args[3].clone(),
                );
                let store = self.snippet(
                    Snippet::ArrayStore { kind },
                    vec![array.clone(), index.clone(), value, cc, ce.clone()],
                );
                let bounds = self.snippet(
                    Snippet::CheckArrayIndex,
                    vec![array.clone(), index, self.cont0(store), ce],
                );
                Ok(self.null_checked(array, bounds))
            }
            OperatorKind::ArrayLength => {
                self.check_arity(call, 3)?;
                let (array, cc) = (args[0].clone(), args[1].clone());
                let length =
                    self.snippet(Snippet::ArrayLength, vec![array.clone(), cc, ce]);
                Ok(self.null_checked(array, length))
            }
            OperatorKind::CheckCast => {
                self.check_arity(call, 3)?;
                let (object, cc) = (args[0].clone(), args[1].clone());
                self.with_descriptor(ResolutionKind::ClassConstant, |this, class| {
                    Ok(this.snippet(Snippet::CheckCast, vec![object, class, cc, ce.clone()]))
                })
            }
            OperatorKind::InstanceOf => {
                self.check_arity(call, 3)?;
                let (object, cc) = (args[0].clone(), args[1].clone());
                self.with_descriptor(ResolutionKind::ClassConstant, |this, class| {
                    Ok(this.snippet(Snippet::InstanceOf, vec![object, class, cc, ce.clone()]))
                })
            }
            OperatorKind::Throw => {
                self.check_arity(call, 3)?;
                let object = args[0].clone();
                // Throwing null raises the null-pointer error instead.
                let deliver = Call::new(ce, vec![object.clone()]);
                Ok(self.null_checked(object, deliver))
            }
            OperatorKind::MonitorEnter => {
                self.check_arity(call, 3)?;
                let (object, cc) = (args[0].clone(), args[1].clone());
                let enter =
                    self.snippet(Snippet::MonitorEnter, vec![object.clone(), cc, ce]);
                Ok(self.null_checked(object, enter))
            }
            OperatorKind::MonitorExit => {
                self.check_arity(call, 3)?;
                let (object, cc) = (args[0].clone(), args[1].clone());
                let exit =
                    self.snippet(Snippet::MonitorExit, vec![object.clone(), cc, ce]);
                Ok(self.null_checked(object, exit))
            }
        }
    }
}
