//! IR variables
//!
//! Variables are the binders of the CPS graph: closure parameters,
//! continuation parameters, bytecode locals and synthetic temporaries.
//! Every variable carries a process-unique serial number; alpha-conversion
//! (globally unique serials across a whole graph) is the precondition the
//! binary codec checks before encoding.
//!
//! Variables are shared by `Arc`: two argument positions holding the same
//! `Arc<Variable>` denote the same binding, and the codec preserves that
//! sharing through the serial table.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::graph::call::BytecodeLocation;
use crate::kind::Kind;

/// Process-wide serial allocator
///
/// Serials are never reused within a process. The decoder bumps this floor
/// past the maximum serial it reads so freshly created variables cannot
/// collide with decoded ones.
static NEXT_SERIAL: AtomicU32 = AtomicU32::new(0);

/// Allocate the next process-unique variable serial
pub fn next_serial() -> u32 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// Ensure future serials are strictly greater than `max_seen`
///
/// Called after decoding a graph whose variables carry serials allocated in
/// some earlier process.
pub fn bump_serial_floor(max_seen: u32) {
    NEXT_SERIAL.fetch_max(max_seen.saturating_add(1), Ordering::Relaxed);
}

/// What a variable is bound by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableKind {
    /// Parameter of a normal-return continuation, identified by ordinal
    NormalContinuationParameter { ordinal: u32 },
    /// Parameter of an exception-return continuation, identified by ordinal
    ExceptionContinuationParameter { ordinal: u32 },
    /// Bytecode local-variable slot, with the originating source location
    Local {
        slot: u32,
        location: Option<BytecodeLocation>,
    },
    /// Formal parameter slot of a method
    MethodParameter { slot: u32 },
    /// Operand-stack slot materialized by the front-end
    Stack { slot: u32 },
    /// Synthetic temporary introduced by a transformation pass
    Temporary,
}

/// A variable of the CPS graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    serial: u32,
    kind: Kind,
    variant: VariableKind,
}

impl Variable {
    /// Create a variable with a freshly allocated serial
    pub fn fresh(kind: Kind, variant: VariableKind) -> Arc<Self> {
        Arc::new(Variable {
            serial: next_serial(),
            kind,
            variant,
        })
    }

    /// Reconstruct a variable with a known serial (decoder only)
    pub(crate) fn with_serial(serial: u32, kind: Kind, variant: VariableKind) -> Arc<Self> {
        Arc::new(Variable {
            serial,
            kind,
            variant,
        })
    }

    /// The process-unique serial number
    #[inline]
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// The value kind this variable ranges over
    #[inline]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The binder variant
    #[inline]
    pub fn variant(&self) -> &VariableKind {
        &self.variant
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match &self.variant {
            VariableKind::NormalContinuationParameter { .. } => "cc",
            VariableKind::ExceptionContinuationParameter { .. } => "ce",
            VariableKind::Local { .. } => "local",
            VariableKind::MethodParameter { .. } => "param",
            VariableKind::Stack { .. } => "stack",
            VariableKind::Temporary => "tmp",
        };
        write!(f, "{}#{}:{}", prefix, self.serial, self.kind)
    }
}

/// Factory for the variables a single method translation introduces
///
/// Thin wrapper over the process-wide serial allocator, mirroring the way
/// the front-end hands one factory to each translation.
#[derive(Debug, Default)]
pub struct VariableFactory;

impl VariableFactory {
    pub fn new() -> Self {
        VariableFactory
    }

    /// Fresh parameter for a normal-return continuation
    pub fn fresh_normal_continuation_parameter(&self, kind: Kind) -> Arc<Variable> {
        Variable::fresh(kind, VariableKind::NormalContinuationParameter { ordinal: 0 })
    }

    /// Fresh parameter for an exception-return continuation
    pub fn fresh_exception_continuation_parameter(&self) -> Arc<Variable> {
        Variable::fresh(
            Kind::Reference,
            VariableKind::ExceptionContinuationParameter { ordinal: 0 },
        )
    }

    /// Fresh synthetic temporary
    pub fn create_temporary(&self, kind: Kind) -> Arc<Variable> {
        Variable::fresh(kind, VariableKind::Temporary)
    }

    /// Fresh stack slot variable
    pub fn create_stack_variable(&self, kind: Kind, slot: u32) -> Arc<Variable> {
        Variable::fresh(kind, VariableKind::Stack { slot })
    }

    /// Fresh local-variable binding
    pub fn create_local_variable(
        &self,
        kind: Kind,
        slot: u32,
        location: Option<BytecodeLocation>,
    ) -> Arc<Variable> {
        Variable::fresh(kind, VariableKind::Local { slot, location })
    }

    /// Fresh method parameter binding
    pub fn create_method_parameter(&self, kind: Kind, slot: u32) -> Arc<Variable> {
        Variable::fresh(kind, VariableKind::MethodParameter { slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serials_are_unique() {
        let factory = VariableFactory::new();
        let a = factory.create_temporary(Kind::Int);
        let b = factory.create_temporary(Kind::Int);
        assert_ne!(a.serial(), b.serial(), "serials must never repeat");
    }

    #[test]
    fn test_bump_serial_floor() {
        let factory = VariableFactory::new();
        let before = factory.create_temporary(Kind::Int).serial();
        bump_serial_floor(before + 1000);
        let after = factory.create_temporary(Kind::Int).serial();
        assert!(after > before + 1000);
    }

    #[test]
    fn test_variant_accessors() {
        let v = Variable::fresh(Kind::Long, VariableKind::MethodParameter { slot: 3 });
        assert_eq!(v.kind(), Kind::Long);
        assert_eq!(v.variant(), &VariableKind::MethodParameter { slot: 3 });
    }
}
