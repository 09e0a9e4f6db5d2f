//! Beta reduction and fresh-renaming copies
//!
//! Inlining splices a closure body into a call site. To keep the graph
//! alpha-converted (every binder's serial globally unique), the spliced
//! copy renames every binder it contains to a fresh variable; free
//! variables and block references are shared untouched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::call::{Call, Closure, Continuation, FrameDescriptor};
use crate::graph::value::Value;
use crate::graph::variable::Variable;
use crate::graph::{GraphError, GraphResult};

/// Apply a closure to arguments, producing the reduced body call
///
/// The body is copied with parameters substituted by the arguments and all
/// inner binders freshly renamed, so the same closure (a snippet template,
/// say) can be applied at many sites of one graph.
pub fn apply(closure: &Closure, arguments: &[Value]) -> GraphResult<Call> {
    if closure.parameters().len() != arguments.len() {
        return Err(GraphError::ArityMismatch {
            procedure: "<closure>".to_string(),
            expected: closure.parameters().len(),
            actual: arguments.len(),
        });
    }
    let mut renamer = Renamer::default();
    for (parameter, argument) in closure.parameters().iter().zip(arguments) {
        renamer
            .substitution
            .insert(parameter.serial(), argument.clone());
    }
    Ok(renamer.copy_call(closure.body()))
}

/// Copy a closure, renaming every binder (parameters included) freshly
pub fn copy_with_fresh_variables(closure: &Closure) -> Closure {
    let mut renamer = Renamer::default();
    renamer.copy_closure(closure)
}

#[derive(Default)]
struct Renamer {
    /// Parameter serial to replacement value
    substitution: HashMap<u32, Value>,
    /// Old binder serial to its fresh copy
    renamed: HashMap<u32, Arc<Variable>>,
}

impl Renamer {
    fn bind(&mut self, variable: &Arc<Variable>) -> Arc<Variable> {
        let fresh = Variable::fresh(variable.kind(), variable.variant().clone());
        self.renamed.insert(variable.serial(), fresh.clone());
        fresh
    }

    fn copy_value(&mut self, value: &Value) -> Value {
        match value {
            Value::Variable(variable) => {
                if let Some(replacement) = self.substitution.get(&variable.serial()) {
                    return replacement.clone();
                }
                match self.renamed.get(&variable.serial()) {
                    Some(fresh) => Value::Variable(fresh.clone()),
                    // Free variable of the closure: shared, not copied.
                    None => value.clone(),
                }
            }
            Value::Closure(closure) => Value::Closure(Box::new(self.copy_closure(closure))),
            Value::Continuation(continuation) => {
                let closure = self.copy_closure(continuation.closure());
                // The copy has the same parameter count, so this cannot fail.
                match Continuation::from_closure(closure) {
                    Ok(copy) => Value::Continuation(Box::new(copy)),
                    Err(_) => value.clone(),
                }
            }
            Value::Constant(_) | Value::Block(_) | Value::Proc(_) | Value::Undefined => {
                value.clone()
            }
        }
    }

    fn copy_closure(&mut self, closure: &Closure) -> Closure {
        let parameters: Vec<Arc<Variable>> =
            closure.parameters().iter().map(|p| self.bind(p)).collect();
        let body = self.copy_call(closure.body());
        let copy = Closure::new(parameters, body);
        match closure.location() {
            Some(location) => copy.with_location(location),
            None => copy,
        }
    }

    fn copy_call(&mut self, call: &Call) -> Call {
        let procedure = self.copy_value(call.procedure());
        let arguments = call.arguments().iter().map(|a| self.copy_value(a)).collect();
        let mut copy = Call::new(procedure, arguments).with_reasons(call.reasons());
        if let Some(location) = call.location() {
            copy = copy.with_location(location);
        }
        copy.set_frames(call.frames().map(|f| Box::new(self.copy_frames(f))));
        copy
    }

    fn copy_frames(&mut self, frames: &FrameDescriptor) -> FrameDescriptor {
        let mut copy = FrameDescriptor::new(
            frames.location,
            frames.locals.iter().map(|v| self.copy_value(v)).collect(),
            frames.stack.iter().map(|v| self.copy_value(v)).collect(),
        );
        copy.parent = frames
            .parent
            .as_deref()
            .map(|parent| Box::new(self.copy_frames(parent)));
        copy
    }
}
