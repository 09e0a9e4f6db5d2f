//! Constant folding and inlining
//!
//! The folding engine walks a graph to a fixpoint, rewriting each call in
//! place when its procedure can be decided at compile time: pure builtins
//! over constant operands, proven-foldable offset reads, snippets whose
//! legality rules pass, decided switches, and direct applications of
//! closures and continuations (beta reduction). Snippet calls that cannot
//! be folded are inlined from their registered templates instead, unless
//! the snippet forbids it.
//!
//! Folding errors are recoverable by construction: a division by a constant
//! zero, a constant null dereference or a deferred resolution leaves the
//! call in the graph for the runtime to reproduce, and only well-formedness
//! violations abort the compilation.

pub mod inline;

use std::fmt;

use tracing::{debug, trace};

use crate::context::{CompilationContext, DeferredCause};
use crate::graph::call::Call;
use crate::graph::value::{Constant, Value};
use crate::graph::{Graph, GraphResult};
use crate::procedure::builtin::{BuiltinOp, BuiltinProc, FoldVariant};
use crate::procedure::switch::Switch;
use crate::procedure::{Procedure, Snippet};

/// Recoverable folding failures
///
/// Each of these means "the runtime will observe this condition"; the call
/// is left in the graph unchanged so it can.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldError {
    /// Division or remainder by a constant zero
    DivisionByZero,
    /// Dereference of a constant null
    NullDereference,
    /// Array allocation with a constant negative size
    NegativeArraySize(i64),
    /// Linkage failed; the runtime raises the corresponding error
    Linkage(String),
    /// Resolution legitimately deferred across environments
    Deferred(DeferredCause),
    /// The arguments do not admit folding
    Unsupported(&'static str),
}

impl fmt::Display for FoldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DivisionByZero => write!(f, "division by constant zero"),
            Self::NullDereference => write!(f, "constant null dereference"),
            Self::NegativeArraySize(size) => {
                write!(f, "constant negative array size {}", size)
            }
            Self::Linkage(message) => write!(f, "linkage failure: {}", message),
            Self::Deferred(cause) => write!(f, "resolution deferred: {}", cause),
            Self::Unsupported(reason) => write!(f, "not foldable: {}", reason),
        }
    }
}

impl std::error::Error for FoldError {}

/// Reduce a whole graph to a folding fixpoint
pub fn reduce_graph(cx: &CompilationContext<'_>, graph: &mut Graph) -> GraphResult<()> {
    let folder = Folder { cx };
    folder.reduce_value(graph.root_mut())?;
    let ids: Vec<_> = graph.block_ids().collect();
    for id in ids {
        if let Some(closure) = graph.block_closure_mut(id)? {
            folder.reduce_call(closure.body_mut())?;
        }
    }
    Ok(())
}

/// Reduce a single call (and everything under it) to a fixpoint
pub fn reduce_call(cx: &CompilationContext<'_>, call: &mut Call) -> GraphResult<()> {
    Folder { cx }.reduce_call(call)
}

struct Folder<'a, 'b> {
    cx: &'a CompilationContext<'b>,
}

impl Folder<'_, '_> {
    fn reduce_value(&self, value: &mut Value) -> GraphResult<()> {
        match value {
            Value::Closure(closure) => self.reduce_call(closure.body_mut()),
            Value::Continuation(continuation) => {
                self.reduce_call(continuation.closure_mut().body_mut())
            }
            Value::Constant(_)
            | Value::Variable(_)
            | Value::Block(_)
            | Value::Proc(_)
            | Value::Undefined => Ok(()),
        }
    }

    fn reduce_call(&self, call: &mut Call) -> GraphResult<()> {
        while self.fold_step(call)? {
            trace!(call = %call, "rewrote call");
        }
        self.reduce_value(call.procedure_mut())?;
        for argument in call.arguments_mut() {
            self.reduce_value(argument)?;
        }
        Ok(())
    }

    /// Attempt one rewrite of this call; true when something changed
    fn fold_step(&self, call: &mut Call) -> GraphResult<bool> {
        match call.procedure().clone() {
            Value::Proc(Procedure::Builtin(builtin)) => self.fold_builtin(builtin, call),
            Value::Proc(Procedure::Snippet(snippet)) => self.fold_snippet(snippet, call),
            Value::Proc(Procedure::Switch(switch)) => self.fold_switch(switch, call),
            // Methods and operators are not folded here: methods belong to
            // the backend, operators to the lowering pass.
            Value::Proc(Procedure::Method(_) | Procedure::Operator(_)) => Ok(false),
            Value::Closure(closure) => {
                let body = inline::apply(&closure, call.arguments())?;
                call.assign(body);
                Ok(true)
            }
            Value::Continuation(continuation) => {
                let body = inline::apply(continuation.closure(), call.arguments())?;
                call.assign(body);
                Ok(true)
            }
            // Block jumps are never inlined (they may be loops); variables,
            // constants and undefined slots are not applicable procedures.
            Value::Block(_) | Value::Variable(_) | Value::Constant(_) | Value::Undefined => {
                Ok(false)
            }
        }
    }

    fn fold_builtin(&self, builtin: BuiltinProc, call: &mut Call) -> GraphResult<bool> {
        call.check_arity(builtin.call_arity())?;
        let operand_count = builtin.op.parameter_kinds().len();
        let cc = call.arguments()[operand_count].clone();
        let ce = call.arguments()[operand_count + 1].clone();

        if builtin.op.is_pure() {
            let operands: Option<Vec<Constant>> = call.arguments()[..operand_count]
                .iter()
                .map(|a| a.as_constant().cloned())
                .collect();
            if let Some(operands) = operands {
                return match builtin.op.apply(&operands) {
                    Ok(result) => {
                        call.assign(Call::new(cc, vec![Value::Constant(result)]));
                        Ok(true)
                    }
                    Err(error) => {
                        debug!(builtin = %builtin, %error, "left unfolded");
                        Ok(false)
                    }
                };
            }
            return Ok(self.strength_reduce(builtin.op, call, cc, ce));
        }

        // Offset reads marked foldable by an earlier field-read fold.
        if builtin.op.offset_read_kind().is_some() && builtin.variant != FoldVariant::Plain {
            let (Some(tuple), Some(offset)) = (
                call.arguments()[0].as_constant().cloned(),
                call.arguments()[1]
                    .as_constant()
                    .and_then(Constant::as_scalar_i64),
            ) else {
                return Ok(false);
            };
            let kind = builtin.op.result_kind();
            return match self.cx.resolver.read_at_offset(&tuple, kind, offset as u32) {
                Ok(value) => {
                    if builtin.variant == FoldVariant::FoldableWhenNotZero && value.is_zero() {
                        // Not yet initialized; a later fold may succeed.
                        return Ok(false);
                    }
                    call.assign(Call::new(cc, vec![Value::Constant(value)]));
                    Ok(true)
                }
                Err(error) => {
                    debug!(builtin = %builtin, %error, "offset read left unfolded");
                    Ok(false)
                }
            };
        }

        Ok(false)
    }

    /// Algebraic identities over partially constant operands
    fn strength_reduce(&self, op: BuiltinOp, call: &mut Call, cc: Value, ce: Value) -> bool {
        let lhs = call.arguments()[0].clone();
        let rhs = if op.parameter_kinds().len() > 1 {
            Some(call.arguments()[1].clone())
        } else {
            None
        };
        let scalar = |v: &Value| v.as_constant().and_then(Constant::as_scalar_i64);

        let replacement = match op {
            BuiltinOp::IntPlus | BuiltinOp::LongPlus => {
                let rhs = rhs.unwrap_or(Value::Undefined);
                if scalar(&lhs) == Some(0) {
                    Some(Call::new(cc, vec![rhs]))
                } else if scalar(&rhs) == Some(0) {
                    Some(Call::new(cc, vec![lhs]))
                } else {
                    None
                }
            }
            BuiltinOp::IntMinus => {
                let rhs = rhs.unwrap_or(Value::Undefined);
                if scalar(&rhs) == Some(0) {
                    Some(Call::new(cc, vec![lhs]))
                } else if scalar(&lhs) == Some(0) {
                    // 0 - x is a negation
                    Some(
                        Call::new(
                            Value::Proc(Procedure::Builtin(BuiltinProc::plain(
                                BuiltinOp::IntNegated,
                            ))),
                            vec![rhs, cc, ce],
                        )
                        .with_reasons(call.reasons()),
                    )
                } else {
                    None
                }
            }
            BuiltinOp::LongMinus => {
                let rhs = rhs.unwrap_or(Value::Undefined);
                if scalar(&rhs) == Some(0) {
                    Some(Call::new(cc, vec![lhs]))
                } else {
                    None
                }
            }
            BuiltinOp::IntTimes | BuiltinOp::LongTimes => {
                let rhs = rhs.unwrap_or(Value::Undefined);
                let zero = if op == BuiltinOp::IntTimes {
                    Constant::Int(0)
                } else {
                    Constant::Long(0)
                };
                if scalar(&lhs) == Some(1) {
                    Some(Call::new(cc, vec![rhs]))
                } else if scalar(&rhs) == Some(1) {
                    Some(Call::new(cc, vec![lhs]))
                } else if scalar(&lhs) == Some(0) || scalar(&rhs) == Some(0) {
                    Some(Call::new(cc, vec![Value::Constant(zero)]))
                } else {
                    None
                }
            }
            _ => None,
        };

        match replacement {
            Some(replacement) => {
                call.assign(replacement);
                true
            }
            None => false,
        }
    }

    fn fold_snippet(&self, snippet: Snippet, call: &mut Call) -> GraphResult<bool> {
        call.check_arity(snippet.call_arity())?;
        if snippet.is_foldable(self.cx, call.arguments()) {
            return match snippet.fold(self.cx, call.arguments()) {
                Ok(replacement) => {
                    self.rewrite(call, replacement);
                    Ok(true)
                }
                Err(error) => {
                    debug!(snippet = %snippet, %error, "left unfolded");
                    Ok(false)
                }
            };
        }
        if !snippet.must_not_inline(self.cx, call.arguments()) {
            if let Some(template) = self.cx.snippets.template(&snippet) {
                let body = inline::apply(template, call.arguments())?;
                call.assign(body);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn fold_switch(&self, switch: Switch, call: &mut Call) -> GraphResult<bool> {
        switch.check_call(call)?;
        if !switch.is_foldable(call.arguments()) {
            return Ok(false);
        }
        match switch.fold(call.arguments()) {
            Ok(replacement) => {
                call.assign(replacement);
                Ok(true)
            }
            Err(error) => {
                debug!(switch = %switch, %error, "left unfolded");
                Ok(false)
            }
        }
    }

    /// Install a replacement, carrying frames and bookkeeping over to
    /// rewrites that remain real procedure calls
    fn rewrite(&self, call: &mut Call, replacement: Call) {
        let mut replacement = replacement;
        if matches!(replacement.procedure(), Value::Proc(_)) {
            replacement.set_frames(call.frames().map(|f| Box::new(f.clone())));
            replacement.set_reasons(call.reasons());
            if replacement.location().is_none() {
                if let Some(location) = call.location() {
                    replacement = replacement.with_location(location);
                }
            }
        }
        call.assign(replacement);
    }
}
