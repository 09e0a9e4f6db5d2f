//! Surface operators
//!
//! An operator is the direct image of one source bytecode instruction,
//! carried through the graph until the lowering pass expands it into
//! builtins, snippets and explicit checks. Operators own the resolution
//! sub-protocol: a symbolic constant-pool reference is resolved eagerly at
//! construction when possible, and deferral (a legitimate cross-environment
//! gap, not an error) is recorded so later retries reproduce it instead of
//! re-querying.

use std::fmt;

use crate::context::{
    CompilationContext, DeferredCause, ResolveError, ResolveFailure, ResolvedRef,
};
use crate::graph::call::StopReasons;
use crate::kind::Kind;

/// The surface operator repertoire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    GetField { kind: Kind },
    PutField { kind: Kind },
    GetStatic { kind: Kind },
    PutStatic { kind: Kind },
    InvokeVirtual,
    InvokeSpecial,
    InvokeStatic,
    New,
    NewArray,
    ArrayLoad { kind: Kind },
    ArrayStore { kind: Kind },
    ArrayLength,
    CheckCast,
    InstanceOf,
    Throw,
    MonitorEnter,
    MonitorExit,
}

impl OperatorKind {
    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::GetField { .. } => "getfield",
            OperatorKind::PutField { .. } => "putfield",
            OperatorKind::GetStatic { .. } => "getstatic",
            OperatorKind::PutStatic { .. } => "putstatic",
            OperatorKind::InvokeVirtual => "invokevirtual",
            OperatorKind::InvokeSpecial => "invokespecial",
            OperatorKind::InvokeStatic => "invokestatic",
            OperatorKind::New => "new",
            OperatorKind::NewArray => "newarray",
            OperatorKind::ArrayLoad { .. } => "arrayload",
            OperatorKind::ArrayStore { .. } => "arraystore",
            OperatorKind::ArrayLength => "arraylength",
            OperatorKind::CheckCast => "checkcast",
            OperatorKind::InstanceOf => "instanceof",
            OperatorKind::Throw => "throw",
            OperatorKind::MonitorEnter => "monitorenter",
            OperatorKind::MonitorExit => "monitorexit",
        }
    }

    /// Why a call to this operator may stop normal control flow
    ///
    /// Computed once here and stamped onto the call at construction; the
    /// lowering pass copies the same bits onto every expansion it emits.
    pub fn reasons(self) -> StopReasons {
        match self {
            OperatorKind::GetField { .. } | OperatorKind::PutField { .. } => {
                StopReasons::CALL | StopReasons::NULL_POINTER_CHECK
            }
            // Static access may trigger the holder's initializer.
            OperatorKind::GetStatic { .. } | OperatorKind::PutStatic { .. } => {
                StopReasons::CALL | StopReasons::CLASS_INIT_CHECK
            }
            OperatorKind::InvokeVirtual | OperatorKind::InvokeSpecial => {
                StopReasons::CALL | StopReasons::NULL_POINTER_CHECK
            }
            OperatorKind::InvokeStatic => StopReasons::CALL | StopReasons::CLASS_INIT_CHECK,
            OperatorKind::New => StopReasons::CALL | StopReasons::CLASS_INIT_CHECK,
            OperatorKind::NewArray => {
                StopReasons::CALL | StopReasons::NEGATIVE_ARRAY_SIZE_CHECK
            }
            OperatorKind::ArrayLoad { .. } => {
                StopReasons::NULL_POINTER_CHECK | StopReasons::ARRAY_BOUNDS_CHECK
            }
            OperatorKind::ArrayStore { .. } => {
                StopReasons::CALL | StopReasons::NULL_POINTER_CHECK | StopReasons::ARRAY_BOUNDS_CHECK
            }
            OperatorKind::ArrayLength => StopReasons::NULL_POINTER_CHECK,
            OperatorKind::CheckCast => StopReasons::CALL | StopReasons::NULL_POINTER_CHECK,
            OperatorKind::InstanceOf => StopReasons::CALL,
            OperatorKind::Throw => StopReasons::CALL | StopReasons::NULL_POINTER_CHECK,
            OperatorKind::MonitorEnter | OperatorKind::MonitorExit => {
                StopReasons::CALL | StopReasons::NULL_POINTER_CHECK
            }
        }
    }

    /// Whether this operator names a constant-pool entry at all
    pub fn uses_pool(self) -> bool {
        !matches!(
            self,
            OperatorKind::ArrayLoad { .. }
                | OperatorKind::ArrayStore { .. }
                | OperatorKind::ArrayLength
                | OperatorKind::Throw
                | OperatorKind::MonitorEnter
                | OperatorKind::MonitorExit
        )
    }

    pub(crate) fn encoding(self) -> (u8, u8) {
        match self {
            OperatorKind::GetField { kind } => (0, kind.tag()),
            OperatorKind::PutField { kind } => (1, kind.tag()),
            OperatorKind::GetStatic { kind } => (2, kind.tag()),
            OperatorKind::PutStatic { kind } => (3, kind.tag()),
            OperatorKind::InvokeVirtual => (4, 0),
            OperatorKind::InvokeSpecial => (5, 0),
            OperatorKind::InvokeStatic => (6, 0),
            OperatorKind::New => (7, 0),
            OperatorKind::NewArray => (8, 0),
            OperatorKind::ArrayLoad { kind } => (9, kind.tag()),
            OperatorKind::ArrayStore { kind } => (10, kind.tag()),
            OperatorKind::ArrayLength => (11, 0),
            OperatorKind::CheckCast => (12, 0),
            OperatorKind::InstanceOf => (13, 0),
            OperatorKind::Throw => (14, 0),
            OperatorKind::MonitorEnter => (15, 0),
            OperatorKind::MonitorExit => (16, 0),
        }
    }

    pub(crate) fn from_encoding(tag: u8, payload: u8) -> Option<Self> {
        match tag {
            0 => Kind::from_tag(payload).map(|kind| OperatorKind::GetField { kind }),
            1 => Kind::from_tag(payload).map(|kind| OperatorKind::PutField { kind }),
            2 => Kind::from_tag(payload).map(|kind| OperatorKind::GetStatic { kind }),
            3 => Kind::from_tag(payload).map(|kind| OperatorKind::PutStatic { kind }),
            4 => Some(OperatorKind::InvokeVirtual),
            5 => Some(OperatorKind::InvokeSpecial),
            6 => Some(OperatorKind::InvokeStatic),
            7 => Some(OperatorKind::New),
            8 => Some(OperatorKind::NewArray),
            9 => Kind::from_tag(payload).map(|kind| OperatorKind::ArrayLoad { kind }),
            10 => Kind::from_tag(payload).map(|kind| OperatorKind::ArrayStore { kind }),
            11 => Some(OperatorKind::ArrayLength),
            12 => Some(OperatorKind::CheckCast),
            13 => Some(OperatorKind::InstanceOf),
            14 => Some(OperatorKind::Throw),
            15 => Some(OperatorKind::MonitorEnter),
            16 => Some(OperatorKind::MonitorExit),
            _ => None,
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::ArrayLoad { kind } | OperatorKind::ArrayStore { kind } => {
                write!(f, "{}<{}>", self.name(), kind)
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Resolution state of an operator's pool reference
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The operator names no pool entry
    None,
    /// Not yet attempted against a resolution service
    Unresolved { pool_index: u32 },
    /// Attempted; legitimately deferred for a cross-environment reason
    Deferred { pool_index: u32, cause: DeferredCause },
    /// Attempted and succeeded
    Resolved { pool_index: u32, entry: ResolvedRef },
}

impl Resolution {
    /// The pool index behind this state, if the operator names one
    pub fn pool_index(&self) -> Option<u32> {
        match self {
            Resolution::None => None,
            Resolution::Unresolved { pool_index }
            | Resolution::Deferred { pool_index, .. }
            | Resolution::Resolved { pool_index, .. } => Some(*pool_index),
        }
    }
}

/// A surface operator with its resolution state
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    kind: OperatorKind,
    resolution: Resolution,
}

impl Operator {
    /// Build an operator without touching a resolution service
    ///
    /// Used by the decoder and by tests; resolution happens on first use.
    pub fn unresolved(kind: OperatorKind, pool_index: Option<u32>) -> Self {
        let resolution = match pool_index {
            Some(pool_index) if kind.uses_pool() => Resolution::Unresolved { pool_index },
            _ => Resolution::None,
        };
        Operator { kind, resolution }
    }

    /// Build an operator, resolving its pool reference eagerly
    ///
    /// Deferral is swallowed and recorded; a hard resolution failure aborts
    /// construction.
    pub fn new(
        kind: OperatorKind,
        pool_index: Option<u32>,
        cx: &CompilationContext<'_>,
    ) -> Result<Self, ResolveError> {
        let mut operator = Operator::unresolved(kind, pool_index);
        match operator.resolve(cx) {
            Ok(()) | Err(ResolveError::Deferred(_)) => Ok(operator),
            Err(error) => Err(error),
        }
    }

    #[inline]
    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    #[inline]
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved { .. })
    }

    /// The resolved descriptor, if resolution has succeeded
    pub fn resolved(&self) -> Option<&ResolvedRef> {
        match &self.resolution {
            Resolution::Resolved { entry, .. } => Some(entry),
            _ => None,
        }
    }

    /// Attempt (or re-attempt) resolution; idempotent
    ///
    /// A resolved operator returns Ok without querying. A deferred operator
    /// reproduces its deferral without querying: the cause is a property of
    /// the reference, not of when it is asked. Only the unresolved state
    /// queries the service.
    pub fn resolve(&mut self, cx: &CompilationContext<'_>) -> Result<(), ResolveError> {
        match &self.resolution {
            Resolution::None | Resolution::Resolved { .. } => Ok(()),
            Resolution::Deferred { cause, .. } => Err(ResolveError::Deferred(*cause)),
            Resolution::Unresolved { pool_index } => {
                let pool_index = *pool_index;
                match cx.resolver.try_resolve(pool_index) {
                    Ok(entry) => {
                        self.resolution = Resolution::Resolved { pool_index, entry };
                        Ok(())
                    }
                    Err(ResolveFailure::Deferred(cause)) => {
                        self.resolution = Resolution::Deferred { pool_index, cause };
                        Err(ResolveError::Deferred(cause))
                    }
                    Err(ResolveFailure::Failed(error)) => Err(error),
                }
            }
        }
    }

    /// Why a call to this operator may stop normal control flow
    pub fn reasons(&self) -> StopReasons {
        self.kind.reasons()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolution.pool_index() {
            Some(index) => write!(f, "{}@{}", self.kind, index),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Backend, CompilationMode, FullBackend, TableResolver};
    use crate::graph::value::ClassId;
    use crate::procedure::snippet::SnippetRegistry;

    fn cx<'a>(
        resolver: &'a TableResolver,
        backend: &'a FullBackend,
        snippets: &'a SnippetRegistry,
    ) -> CompilationContext<'a> {
        CompilationContext::new(
            CompilationMode::Target,
            resolver,
            backend as &dyn Backend,
            snippets,
        )
    }

    #[test]
    fn test_eager_resolution_at_construction() {
        let mut resolver = TableResolver::new();
        resolver.define_pool_entry(7, ResolvedRef::Class(ClassId(3)));
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();
        let cx = cx(&resolver, &backend, &snippets);

        let operator = Operator::new(OperatorKind::New, Some(7), &cx).unwrap();
        assert!(operator.is_resolved());
        assert_eq!(operator.resolved(), Some(&ResolvedRef::Class(ClassId(3))));
    }

    #[test]
    fn test_deferral_swallowed_then_reproduced() {
        let mut resolver = TableResolver::new();
        resolver.defer_pool_entry(2, DeferredCause::OmittedClass);
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();
        let cx = cx(&resolver, &backend, &snippets);

        // Construction succeeds even though the entry is deferred.
        let mut operator =
            Operator::new(OperatorKind::GetStatic { kind: Kind::Int }, Some(2), &cx).unwrap();
        assert!(!operator.is_resolved());

        // Retrying reproduces the deferral without changing state.
        let err = operator.resolve(&cx).unwrap_err();
        assert_eq!(err, ResolveError::Deferred(DeferredCause::OmittedClass));
        assert!(matches!(
            operator.resolution(),
            Resolution::Deferred {
                pool_index: 2,
                cause: DeferredCause::OmittedClass
            }
        ));
    }

    #[test]
    fn test_hard_failure_aborts_construction() {
        let resolver = TableResolver::new();
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();
        let cx = cx(&resolver, &backend, &snippets);

        let err =
            Operator::new(OperatorKind::GetField { kind: Kind::Int }, Some(9), &cx).unwrap_err();
        assert_eq!(err, ResolveError::NoSuchEntry(9));
    }

    #[test]
    fn test_resolve_is_idempotent_once_resolved() {
        let mut resolver = TableResolver::new();
        resolver.define_pool_entry(1, ResolvedRef::Class(ClassId(8)));
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();
        let cx = cx(&resolver, &backend, &snippets);

        let mut operator = Operator::new(OperatorKind::CheckCast, Some(1), &cx).unwrap();
        operator.resolve(&cx).unwrap();
        operator.resolve(&cx).unwrap();
        assert!(operator.is_resolved());
    }

    #[test]
    fn test_pool_free_operators_carry_no_resolution() {
        let operator = Operator::unresolved(OperatorKind::ArrayLength, Some(4));
        assert_eq!(operator.resolution(), &Resolution::None);
    }

    #[test]
    fn test_stop_reasons_per_kind() {
        assert!(OperatorKind::GetField { kind: Kind::Int }
            .reasons()
            .contains(StopReasons::NULL_POINTER_CHECK));
        assert!(OperatorKind::New
            .reasons()
            .contains(StopReasons::CLASS_INIT_CHECK));
        assert!(OperatorKind::NewArray
            .reasons()
            .contains(StopReasons::NEGATIVE_ARRAY_SIZE_CHECK));
        let load = OperatorKind::ArrayLoad { kind: Kind::Int }.reasons();
        assert!(load.contains(StopReasons::ARRAY_BOUNDS_CHECK));
        assert!(!load.contains(StopReasons::CLASS_INIT_CHECK));
    }

    #[test]
    fn test_kind_encoding_roundtrip() {
        let kinds = [
            OperatorKind::GetField { kind: Kind::Long },
            OperatorKind::InvokeVirtual,
            OperatorKind::ArrayStore {
                kind: Kind::Reference,
            },
            OperatorKind::MonitorExit,
        ];
        for kind in kinds {
            let (tag, payload) = kind.encoding();
            assert_eq!(OperatorKind::from_encoding(tag, payload), Some(kind));
        }
        assert!(OperatorKind::from_encoding(42, 0).is_none());
    }
}
