//! Compilation context and external collaborators
//!
//! The front-end, the class-metadata runtime and the target backend are
//! external to this core; they are consumed through the two traits here.
//! The host/target mode is an explicit field of the context threaded into
//! every folding and lowering call, never ambient global state, so it is a
//! plain testable input.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::fold::FoldError;
use crate::graph::value::{ClassId, Constant, FieldDescriptor, MethodDescriptor, MethodId};
use crate::kind::Kind;
use crate::procedure::builtin::BuiltinOp;
use crate::procedure::snippet::SnippetRegistry;

/// Whose code is being compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationMode {
    /// Bootstrapping the compiler's own infrastructure; some snippets must
    /// not fold because the running system is not the target system
    Host,
    /// Compiling for the running target system itself
    Target,
}

/// Why a symbolic reference legitimately cannot be resolved yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredCause {
    /// The entry refers to a host-only field or method
    HostOnlyAccess,
    /// The entry refers to a class omitted from the target image
    OmittedClass,
}

impl fmt::Display for DeferredCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostOnlyAccess => write!(f, "host-only field or method"),
            Self::OmittedClass => write!(f, "class omitted from target image"),
        }
    }
}

/// Hard resolution errors
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// Resolution is deferred for a cross-environment reason; raised when
    /// resolution is retried after being swallowed at construction
    Deferred(DeferredCause),
    /// The pool has no entry at this index
    NoSuchEntry(u32),
    /// The entry exists but linking it failed
    Linkage(String),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deferred(cause) => write!(f, "resolution deferred: {}", cause),
            Self::NoSuchEntry(index) => write!(f, "no constant-pool entry at index {}", index),
            Self::Linkage(message) => write!(f, "linkage error: {}", message),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Outcome of attempting to resolve a pool entry without side effects
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveFailure {
    /// Legitimately not resolvable yet; swallowed once at construction
    Deferred(DeferredCause),
    /// Hard failure; always surfaced
    Failed(ResolveError),
}

/// A resolved constant-pool descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedRef {
    Field(Arc<FieldDescriptor>),
    Method(MethodDescriptor),
    Class(ClassId),
}

/// Resolution and constant-access services of the class-metadata runtime
///
/// Implementations must be safe for unsynchronized concurrent reads; all
/// methods are logically read-only queries.
pub trait ResolutionService {
    /// Resolve the symbolic reference at `pool_index`
    fn try_resolve(&self, pool_index: u32) -> Result<ResolvedRef, ResolveFailure>;

    /// Read the compile-time value of a field from a constant tuple
    fn read_constant_field(
        &self,
        tuple: &Constant,
        field: &FieldDescriptor,
    ) -> Result<Constant, FoldError>;

    /// Read a value of `kind` at a byte offset within a constant tuple
    fn read_at_offset(
        &self,
        tuple: &Constant,
        kind: Kind,
        offset: u32,
    ) -> Result<Constant, FoldError>;

    /// Materialize the entry address of a linked native method
    fn link_native_method(&self, method: MethodId) -> Result<Constant, FoldError>;

    /// Select the concrete entry point of a virtual call on a constant receiver
    fn select_virtual_method(
        &self,
        receiver: &Constant,
        method: &MethodDescriptor,
    ) -> Result<Constant, FoldError>;

    /// Whether the class has finished initialization
    fn is_class_initialized(&self, class: ClassId) -> bool;
}

/// Target backend queries
pub trait Backend {
    /// Whether the target implements this builtin natively
    ///
    /// Operators lower to the builtin when true and to the corresponding
    /// snippet otherwise.
    fn implements_builtin(&self, op: BuiltinOp) -> bool;
}

/// Backend that implements every builtin; the common case for real targets
#[derive(Debug, Default)]
pub struct FullBackend;

impl Backend for FullBackend {
    fn implements_builtin(&self, _op: BuiltinOp) -> bool {
        true
    }
}

/// Everything a folding, lowering or codec pass needs from outside the graph
pub struct CompilationContext<'a> {
    pub mode: CompilationMode,
    pub resolver: &'a dyn ResolutionService,
    pub backend: &'a dyn Backend,
    pub snippets: &'a SnippetRegistry,
}

impl<'a> CompilationContext<'a> {
    pub fn new(
        mode: CompilationMode,
        resolver: &'a dyn ResolutionService,
        backend: &'a dyn Backend,
        snippets: &'a SnippetRegistry,
    ) -> Self {
        CompilationContext {
            mode,
            resolver,
            backend,
            snippets,
        }
    }

    /// Whether compilation targets the running system itself
    #[inline]
    pub fn is_target_mode(&self) -> bool {
        self.mode == CompilationMode::Target
    }
}

/// Table-backed resolution service
///
/// The host-side implementation used by bootstrap tooling and tests: pool
/// entries, constant field values and native entry points are plain tables.
#[derive(Debug, Default)]
pub struct TableResolver {
    pool: HashMap<u32, Result<ResolvedRef, ResolveFailure>>,
    field_values: HashMap<(Constant, u32), Constant>,
    offset_values: HashMap<(Constant, u32), Constant>,
    native_entries: HashMap<u32, u64>,
    initialized_classes: HashMap<u32, bool>,
}

impl TableResolver {
    pub fn new() -> Self {
        TableResolver::default()
    }

    pub fn define_pool_entry(&mut self, index: u32, entry: ResolvedRef) {
        self.pool.insert(index, Ok(entry));
    }

    pub fn defer_pool_entry(&mut self, index: u32, cause: DeferredCause) {
        self.pool.insert(index, Err(ResolveFailure::Deferred(cause)));
    }

    pub fn fail_pool_entry(&mut self, index: u32, error: ResolveError) {
        self.pool.insert(index, Err(ResolveFailure::Failed(error)));
    }

    pub fn define_field_value(&mut self, tuple: Constant, offset: u32, value: Constant) {
        self.field_values.insert((tuple.clone(), offset), value.clone());
        self.offset_values.insert((tuple, offset), value);
    }

    pub fn define_native_entry(&mut self, method: MethodId, address: u64) {
        self.native_entries.insert(method.0, address);
    }

    pub fn set_class_initialized(&mut self, class: ClassId, initialized: bool) {
        self.initialized_classes.insert(class.0, initialized);
    }
}

impl ResolutionService for TableResolver {
    fn try_resolve(&self, pool_index: u32) -> Result<ResolvedRef, ResolveFailure> {
        match self.pool.get(&pool_index) {
            Some(entry) => entry.clone(),
            None => Err(ResolveFailure::Failed(ResolveError::NoSuchEntry(
                pool_index,
            ))),
        }
    }

    fn read_constant_field(
        &self,
        tuple: &Constant,
        field: &FieldDescriptor,
    ) -> Result<Constant, FoldError> {
        if matches!(tuple, Constant::Null) {
            return Err(FoldError::NullDereference);
        }
        self.field_values
            .get(&(tuple.clone(), field.offset))
            .cloned()
            .ok_or_else(|| FoldError::Linkage(format!("no value for field at {}", field.offset)))
    }

    fn read_at_offset(
        &self,
        tuple: &Constant,
        _kind: Kind,
        offset: u32,
    ) -> Result<Constant, FoldError> {
        if matches!(tuple, Constant::Null) {
            return Err(FoldError::NullDereference);
        }
        self.offset_values
            .get(&(tuple.clone(), offset))
            .cloned()
            .ok_or_else(|| FoldError::Linkage(format!("no value at offset {}", offset)))
    }

    fn link_native_method(&self, method: MethodId) -> Result<Constant, FoldError> {
        self.native_entries
            .get(&method.0)
            .map(|&address| Constant::Word(address))
            .ok_or_else(|| FoldError::Linkage(format!("native method #{} not linked", method.0)))
    }

    fn select_virtual_method(
        &self,
        receiver: &Constant,
        method: &MethodDescriptor,
    ) -> Result<Constant, FoldError> {
        if matches!(receiver, Constant::Null) {
            return Err(FoldError::NullDereference);
        }
        self.native_entries
            .get(&method.id.0)
            .map(|&address| Constant::Word(address))
            .ok_or_else(|| {
                FoldError::Linkage(format!("method #{} has no entry point", method.id.0))
            })
    }

    fn is_class_initialized(&self, class: ClassId) -> bool {
        self.initialized_classes.get(&class.0).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_resolver_pool() {
        let mut resolver = TableResolver::new();
        resolver.define_pool_entry(3, ResolvedRef::Class(ClassId(9)));
        resolver.defer_pool_entry(4, DeferredCause::OmittedClass);
        assert_eq!(
            resolver.try_resolve(3),
            Ok(ResolvedRef::Class(ClassId(9)))
        );
        assert_eq!(
            resolver.try_resolve(4),
            Err(ResolveFailure::Deferred(DeferredCause::OmittedClass))
        );
        assert!(matches!(
            resolver.try_resolve(5),
            Err(ResolveFailure::Failed(ResolveError::NoSuchEntry(5)))
        ));
    }

    #[test]
    fn test_null_tuple_reads_are_folding_errors() {
        let resolver = TableResolver::new();
        let err = resolver
            .read_at_offset(&Constant::Null, Kind::Int, 8)
            .unwrap_err();
        assert_eq!(err, FoldError::NullDereference);
    }
}
