//! Callable procedures
//!
//! A `Procedure` is anything a call may apply besides a closure value:
//! another compiled method, a builtin the backend implements natively, a
//! precompiled snippet, a multi-way switch, or a not-yet-lowered surface
//! operator. The variants form a closed repertoire; passes dispatch on it
//! exhaustively so adding a variant is a compile-visible event.
//!
//! # Modules
//!
//! - [`builtin`]: the fixed builtin table and its folding identities
//! - [`snippet`]: precompiled subroutine templates and their legality rules
//! - [`switch`]: multi-way branches
//! - [`operator`]: surface operators and the resolution sub-protocol

pub mod builtin;
pub mod operator;
pub mod snippet;
pub mod switch;

use std::fmt;

pub use builtin::{BuiltinOp, BuiltinProc, FoldVariant};
pub use operator::{Operator, OperatorKind, Resolution};
pub use snippet::{ParameterRole, ResolutionKind, Snippet, SnippetRegistry};
pub use switch::{Switch, SwitchComparator};

use crate::graph::value::MethodId;

/// The closed repertoire of callable procedures
#[derive(Debug, Clone, PartialEq)]
pub enum Procedure {
    /// Another compiled method, by external identity
    Method(MethodId),
    /// A primitive the backend implements natively
    Builtin(BuiltinProc),
    /// A precompiled subroutine template
    Snippet(Snippet),
    /// A multi-way branch
    Switch(Switch),
    /// A surface operator awaiting lowering
    Operator(Operator),
}

impl Procedure {
    /// Call arity, where the procedure fixes one
    ///
    /// Methods take their own signature's arity, which this core does not
    /// know; everything else is checked at construction and fold time.
    pub fn call_arity(&self) -> Option<usize> {
        match self {
            Procedure::Method(_) => None,
            Procedure::Builtin(builtin) => Some(builtin.call_arity()),
            Procedure::Snippet(snippet) => Some(snippet.call_arity()),
            Procedure::Switch(switch) => Some(switch.call_arity()),
            Procedure::Operator(_) => None,
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Method(id) => write!(f, "method#{}", id.0),
            Procedure::Builtin(builtin) => write!(f, "{}", builtin),
            Procedure::Snippet(snippet) => write!(f, "{}", snippet),
            Procedure::Switch(switch) => write!(f, "{}", switch),
            Procedure::Operator(operator) => write!(f, "{}", operator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Kind;

    #[test]
    fn test_fixed_arities() {
        let builtin = Procedure::Builtin(BuiltinProc::plain(BuiltinOp::IntPlus));
        assert_eq!(builtin.call_arity(), Some(4)); // two operands, two continuations

        let snippet = Procedure::Snippet(Snippet::CheckNullPointer);
        assert_eq!(snippet.call_arity(), Some(3));

        let switch = Procedure::Switch(Switch::if_then_else(
            Kind::Int,
            SwitchComparator::IntEqual,
        ));
        assert_eq!(switch.call_arity(), Some(4));

        assert_eq!(Procedure::Method(MethodId(1)).call_arity(), None);
    }
}
