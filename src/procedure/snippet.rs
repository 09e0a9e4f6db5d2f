//! Precompiled subroutine templates
//!
//! A snippet stands in for a primitive the backend does not implement
//! natively: class initialization, slow-path field access, native-method
//! linkage, resolution of symbolic references. Each snippet declares its
//! parameter roles and overrides the folding legality rules where the
//! default "all operands constant" rule is too loose or too tight.
//!
//! Snippet templates (their body graphs) live in a [`SnippetRegistry`]
//! built once at process start and treated as read-only shared values;
//! the inliner takes a fresh copy per call site.

use std::collections::HashMap;
use std::fmt;

use crate::context::{CompilationContext, ResolveFailure, ResolvedRef};
use crate::fold::FoldError;
use crate::graph::call::{Call, Closure};
use crate::graph::value::{ClassId, Constant, ObjectRef, Value};
use crate::kind::Kind;
use crate::procedure::builtin::{BuiltinOp, BuiltinProc};
use crate::procedure::Procedure;

/// What a resolution snippet resolves
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionKind {
    InstanceFieldRead = 0,
    InstanceFieldWrite = 1,
    StaticFieldRead = 2,
    StaticFieldWrite = 3,
    ClassConstant = 4,
    StaticMethod = 5,
    VirtualMethod = 6,
    SpecialMethod = 7,
}

impl ResolutionKind {
    pub(crate) fn tag(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ResolutionKind::InstanceFieldRead),
            1 => Some(ResolutionKind::InstanceFieldWrite),
            2 => Some(ResolutionKind::StaticFieldRead),
            3 => Some(ResolutionKind::StaticFieldWrite),
            4 => Some(ResolutionKind::ClassConstant),
            5 => Some(ResolutionKind::StaticMethod),
            6 => Some(ResolutionKind::VirtualMethod),
            7 => Some(ResolutionKind::SpecialMethod),
            _ => None,
        }
    }
}

/// Role of one snippet parameter, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterRole {
    Tuple,
    Array,
    Index,
    Value,
    Size,
    Receiver,
    FieldDescriptor,
    MethodDescriptor,
    ClassDescriptor,
    Guard,
    NormalContinuation,
    ExceptionContinuation,
}

impl ParameterRole {
    /// Whether this role is one of the two continuation slots
    pub fn is_continuation(self) -> bool {
        matches!(
            self,
            ParameterRole::NormalContinuation | ParameterRole::ExceptionContinuation
        )
    }
}

/// The precompiled subroutine templates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Snippet {
    /// Symbolic field read; strength-reduces to an offset read (see `fold`)
    FieldRead { kind: Kind },
    /// Symbolic field write
    FieldWrite { kind: Kind },
    /// Null check before a dereference
    CheckNullPointer,
    /// Array bounds check
    CheckArrayIndex,
    /// Ensure the holder class of a field or method is initialized
    MakeHolderInitialized,
    /// Ensure a class is initialized
    MakeClassInitialized,
    /// Resolve a symbolic constant-pool reference through its guard
    Resolve(ResolutionKind),
    /// Fetch the static tuple of a field's holder
    GetStaticTuple,
    /// Virtual method selection; the designated accessor abstraction,
    /// folded but never inlined
    SelectVirtualMethod,
    /// Link a native method and deliver its entry address
    LinkNativeMethod,
    /// Native call prologue; never folded, never inlined
    NativeCallPrologue,
    /// Native call epilogue; never folded, never inlined
    NativeCallEpilogue,
    /// Materialize a method's entry point
    MakeEntrypoint,
    /// Allocate a tuple
    CreateTuple,
    /// Allocate an array
    CreateArray,
    /// Array element read
    ArrayLoad { kind: Kind },
    /// Array element write
    ArrayStore { kind: Kind },
    /// Array length read
    ArrayLength,
    /// Dynamic cast check; folds for a constant null (always passes)
    CheckCast,
    /// Dynamic type test; folds for a constant null (always false)
    InstanceOf,
    /// Monitor acquisition
    MonitorEnter,
    /// Monitor release
    MonitorExit,
}

impl Snippet {
    /// Ordered parameter roles, continuations last
    pub fn roles(&self) -> &'static [ParameterRole] {
        use ParameterRole::*;
        match self {
            Snippet::FieldRead { .. } => {
                &[Tuple, FieldDescriptor, NormalContinuation, ExceptionContinuation]
            }
            Snippet::FieldWrite { .. } => &[
                Tuple,
                FieldDescriptor,
                Value,
                NormalContinuation,
                ExceptionContinuation,
            ],
            Snippet::CheckNullPointer => &[Tuple, NormalContinuation, ExceptionContinuation],
            Snippet::CheckArrayIndex => {
                &[Array, Index, NormalContinuation, ExceptionContinuation]
            }
            Snippet::MakeHolderInitialized => {
                &[FieldDescriptor, NormalContinuation, ExceptionContinuation]
            }
            Snippet::MakeClassInitialized => {
                &[ClassDescriptor, NormalContinuation, ExceptionContinuation]
            }
            Snippet::Resolve(_) => &[Guard, NormalContinuation, ExceptionContinuation],
            Snippet::GetStaticTuple => {
                &[FieldDescriptor, NormalContinuation, ExceptionContinuation]
            }
            Snippet::SelectVirtualMethod => &[
                Receiver,
                MethodDescriptor,
                NormalContinuation,
                ExceptionContinuation,
            ],
            Snippet::LinkNativeMethod | Snippet::MakeEntrypoint => {
                &[MethodDescriptor, NormalContinuation, ExceptionContinuation]
            }
            Snippet::NativeCallPrologue | Snippet::NativeCallEpilogue => {
                &[NormalContinuation, ExceptionContinuation]
            }
            Snippet::CreateTuple => {
                &[ClassDescriptor, NormalContinuation, ExceptionContinuation]
            }
            Snippet::CreateArray => &[
                ClassDescriptor,
                Size,
                NormalContinuation,
                ExceptionContinuation,
            ],
            Snippet::ArrayLoad { .. } => {
                &[Array, Index, NormalContinuation, ExceptionContinuation]
            }
            Snippet::ArrayStore { .. } => &[
                Array,
                Index,
                Value,
                NormalContinuation,
                ExceptionContinuation,
            ],
            Snippet::ArrayLength => &[Array, NormalContinuation, ExceptionContinuation],
            Snippet::CheckCast | Snippet::InstanceOf => &[
                Tuple,
                ClassDescriptor,
                NormalContinuation,
                ExceptionContinuation,
            ],
            Snippet::MonitorEnter | Snippet::MonitorExit => {
                &[Tuple, NormalContinuation, ExceptionContinuation]
            }
        }
    }

    /// Total call arity (operands plus continuations)
    pub fn call_arity(&self) -> usize {
        self.roles().len()
    }

    /// Number of operand arguments (excluding continuations)
    fn operand_count(&self) -> usize {
        self.roles().iter().filter(|r| !r.is_continuation()).count()
    }

    fn operands_constant(&self, arguments: &[Value]) -> bool {
        arguments
            .iter()
            .take(self.operand_count())
            .all(Value::is_constant)
    }

    /// Whether this call site may be folded
    ///
    /// Default rule: every operand is a constant. Overrides below encode
    /// the operator-specific legality rules; the host/target mode gates
    /// snippets that depend on the running system being the target.
    pub fn is_foldable(&self, cx: &CompilationContext<'_>, arguments: &[Value]) -> bool {
        match self {
            // Foldable whenever the field descriptor is constant, regardless
            // of the receiver tuple: a mutable field still strength-reduces
            // to an offset read.
            Snippet::FieldRead { .. } => arguments
                .get(1)
                .and_then(Value::as_constant)
                .and_then(Constant::as_field)
                .is_some(),

            // Initialization checks fold away once the class is initialized.
            Snippet::MakeHolderInitialized | Snippet::MakeClassInitialized => {
                match holder_of(arguments.first()) {
                    Some(class) => cx.resolver.is_class_initialized(class),
                    None => false,
                }
            }

            // Linkage and entry points exist only on the target system.
            Snippet::LinkNativeMethod | Snippet::MakeEntrypoint => {
                cx.is_target_mode() && self.operands_constant(arguments)
            }

            // Never foldable: side effects or backend-private state.
            Snippet::FieldWrite { .. }
            | Snippet::CheckArrayIndex
            | Snippet::NativeCallPrologue
            | Snippet::NativeCallEpilogue
            | Snippet::CreateTuple
            | Snippet::ArrayLoad { .. }
            | Snippet::ArrayStore { .. }
            | Snippet::ArrayLength
            | Snippet::MonitorEnter
            | Snippet::MonitorExit => false,

            // Type checks on a constant null are decided without the class.
            Snippet::CheckCast | Snippet::InstanceOf => arguments
                .first()
                .and_then(Value::as_constant)
                .is_some_and(|object| matches!(object, Constant::Null)),

            // Allocation itself happens at run time; the only thing folding
            // can establish is that a constant negative size must raise.
            Snippet::CreateArray => {
                self.operands_constant(arguments)
                    && arguments
                        .get(1)
                        .and_then(Value::as_constant)
                        .and_then(Constant::as_scalar_i64)
                        .is_some_and(|size| size < 0)
            }

            _ => self.operands_constant(arguments),
        }
    }

    /// Fold this call site given its arguments
    ///
    /// Returns either a jump to the normal continuation carrying the
    /// computed result, or a rewritten call to a cheaper procedure
    /// (variant folding), or a folding error the runtime will reproduce.
    pub fn fold(
        &self,
        cx: &CompilationContext<'_>,
        arguments: &[Value],
    ) -> Result<Call, FoldError> {
        match self {
            Snippet::FieldRead { kind } => self.fold_field_read(cx, *kind, arguments),

            Snippet::CheckNullPointer => {
                let object = constant_at(arguments, 0)?;
                if matches!(object, Constant::Null) {
                    return Err(FoldError::NullDereference);
                }
                Ok(Call::new(arguments[1].clone(), vec![]))
            }

            Snippet::MakeHolderInitialized | Snippet::MakeClassInitialized => {
                let cc = self.normal_continuation(arguments);
                Ok(Call::new(cc, vec![]))
            }

            Snippet::Resolve(_) => {
                let guard = constant_at(arguments, 0)?;
                let Constant::Object(ObjectRef::ResolutionGuard { pool_index }) = guard else {
                    return Err(FoldError::Unsupported("guard argument is not a guard"));
                };
                let resolved = match cx.resolver.try_resolve(*pool_index) {
                    Ok(resolved) => resolved,
                    Err(ResolveFailure::Deferred(cause)) => return Err(FoldError::Deferred(cause)),
                    Err(ResolveFailure::Failed(error)) => {
                        return Err(FoldError::Linkage(error.to_string()))
                    }
                };
                let descriptor = match resolved {
                    ResolvedRef::Field(field) => Constant::from_field(field),
                    ResolvedRef::Method(method) => Constant::Object(ObjectRef::Method(method)),
                    ResolvedRef::Class(class) => Constant::Object(ObjectRef::Class(class)),
                };
                Ok(Call::new(
                    self.normal_continuation(arguments),
                    vec![Value::Constant(descriptor)],
                ))
            }

            Snippet::GetStaticTuple => {
                let field = constant_at(arguments, 0)?
                    .as_field()
                    .ok_or(FoldError::Unsupported("argument is not a field descriptor"))?;
                let statics = Constant::Object(ObjectRef::StaticTuple(field.holder));
                Ok(Call::new(
                    self.normal_continuation(arguments),
                    vec![Value::Constant(statics)],
                ))
            }

            Snippet::SelectVirtualMethod => {
                let receiver = constant_at(arguments, 0)?;
                let method = constant_at(arguments, 1)?
                    .as_method()
                    .copied()
                    .ok_or(FoldError::Unsupported("argument is not a method descriptor"))?;
                let entry = cx.resolver.select_virtual_method(receiver, &method)?;
                Ok(Call::new(
                    self.normal_continuation(arguments),
                    vec![Value::Constant(entry)],
                ))
            }

            Snippet::LinkNativeMethod | Snippet::MakeEntrypoint => {
                let method = constant_at(arguments, 0)?
                    .as_method()
                    .copied()
                    .ok_or(FoldError::Unsupported("argument is not a method descriptor"))?;
                let entry = cx.resolver.link_native_method(method.id)?;
                Ok(Call::new(
                    self.normal_continuation(arguments),
                    vec![Value::Constant(entry)],
                ))
            }

            // A null passes any cast and is an instance of nothing.
            Snippet::CheckCast => {
                let object = constant_at(arguments, 0)?;
                if !matches!(object, Constant::Null) {
                    return Err(FoldError::Unsupported("object is not a constant null"));
                }
                Ok(Call::new(self.normal_continuation(arguments), vec![]))
            }
            Snippet::InstanceOf => {
                let object = constant_at(arguments, 0)?;
                if !matches!(object, Constant::Null) {
                    return Err(FoldError::Unsupported("object is not a constant null"));
                }
                Ok(Call::new(
                    self.normal_continuation(arguments),
                    vec![Value::Constant(Constant::Boolean(false))],
                ))
            }

            Snippet::CreateArray => {
                let size = constant_at(arguments, 1)?
                    .as_scalar_i64()
                    .ok_or(FoldError::Unsupported("size is not a scalar constant"))?;
                if size < 0 {
                    return Err(FoldError::NegativeArraySize(size));
                }
                Err(FoldError::Unsupported("allocation happens at run time"))
            }

            _ => Err(FoldError::Unsupported("snippet is not foldable")),
        }
    }

    /// Whether generic inlining must never splice this snippet's template
    ///
    /// Method selection is the designated accessor abstraction: it may be
    /// folded away entirely, but inlining its template would expose backend
    /// accessor internals. Native-call bracketing and linkage snippets keep
    /// their call structure for the same reason.
    pub fn must_not_inline(&self, _cx: &CompilationContext<'_>, _arguments: &[Value]) -> bool {
        matches!(
            self,
            Snippet::SelectVirtualMethod
                | Snippet::NativeCallPrologue
                | Snippet::NativeCallEpilogue
                | Snippet::LinkNativeMethod
                | Snippet::MakeEntrypoint
        )
    }

    /// Variant folding of a field read (see module docs)
    ///
    /// - field and tuple constant, field immutable: fold to the literal value
    /// - field constant but mutable: rewrite to a plain offset read
    /// - field immutable, tuple unknown: rewrite to an offset read marked
    ///   foldable (or foldable-when-non-zero) so a later pass can finish
    ///   the job after inlining makes the tuple known
    fn fold_field_read(
        &self,
        cx: &CompilationContext<'_>,
        kind: Kind,
        arguments: &[Value],
    ) -> Result<Call, FoldError> {
        use crate::graph::value::FieldMutability;

        let field = arguments
            .get(1)
            .and_then(Value::as_constant)
            .and_then(Constant::as_field)
            .cloned()
            .ok_or(FoldError::Unsupported("field descriptor is not constant"))?;
        let tuple = &arguments[0];
        let cc = arguments[2].clone();
        let ce = arguments[3].clone();

        let offset_read = |variant: BuiltinProc| {
            Call::new(
                Value::Proc(Procedure::Builtin(variant)),
                vec![
                    tuple.clone(),
                    Value::Constant(Constant::Int(field.offset as i32)),
                    cc.clone(),
                    ce.clone(),
                ],
            )
        };
        let read_op = BuiltinOp::read_at_offset_for(kind);

        match field.mutability {
            FieldMutability::Mutable => Ok(offset_read(BuiltinProc::plain(read_op))),
            FieldMutability::Constant => match tuple.as_constant() {
                Some(tuple) => {
                    let value = cx.resolver.read_constant_field(tuple, &field)?;
                    Ok(Call::new(cc, vec![Value::Constant(value)]))
                }
                None => Ok(offset_read(BuiltinProc::foldable(read_op))),
            },
            FieldMutability::ConstantWhenNotZero => match tuple.as_constant() {
                Some(tuple) => {
                    let value = cx.resolver.read_constant_field(tuple, &field)?;
                    if value.is_zero() {
                        Ok(offset_read(BuiltinProc::foldable_when_not_zero(read_op)))
                    } else {
                        Ok(Call::new(cc, vec![Value::Constant(value)]))
                    }
                }
                None => Ok(offset_read(BuiltinProc::foldable_when_not_zero(read_op))),
            },
        }
    }

    fn normal_continuation(&self, arguments: &[Value]) -> Value {
        let index = self
            .roles()
            .iter()
            .position(|r| *r == ParameterRole::NormalContinuation)
            .unwrap_or(arguments.len().saturating_sub(2));
        arguments[index].clone()
    }

    /// Mnemonic, used in traces and the codec's disassembly
    pub fn name(&self) -> &'static str {
        match self {
            Snippet::FieldRead { .. } => "field_read",
            Snippet::FieldWrite { .. } => "field_write",
            Snippet::CheckNullPointer => "check_null_pointer",
            Snippet::CheckArrayIndex => "check_array_index",
            Snippet::MakeHolderInitialized => "make_holder_initialized",
            Snippet::MakeClassInitialized => "make_class_initialized",
            Snippet::Resolve(_) => "resolve",
            Snippet::GetStaticTuple => "get_static_tuple",
            Snippet::SelectVirtualMethod => "select_virtual_method",
            Snippet::LinkNativeMethod => "link_native_method",
            Snippet::NativeCallPrologue => "native_call_prologue",
            Snippet::NativeCallEpilogue => "native_call_epilogue",
            Snippet::MakeEntrypoint => "make_entrypoint",
            Snippet::CreateTuple => "create_tuple",
            Snippet::CreateArray => "create_array",
            Snippet::ArrayLoad { .. } => "array_load",
            Snippet::ArrayStore { .. } => "array_store",
            Snippet::ArrayLength => "array_length",
            Snippet::CheckCast => "check_cast",
            Snippet::InstanceOf => "instance_of",
            Snippet::MonitorEnter => "monitor_enter",
            Snippet::MonitorExit => "monitor_exit",
        }
    }

    /// Codec tag plus payload byte
    pub(crate) fn encoding(&self) -> (u8, u8) {
        match self {
            Snippet::FieldRead { kind } => (0, kind.tag()),
            Snippet::FieldWrite { kind } => (1, kind.tag()),
            Snippet::CheckNullPointer => (2, 0),
            Snippet::CheckArrayIndex => (3, 0),
            Snippet::MakeHolderInitialized => (4, 0),
            Snippet::MakeClassInitialized => (5, 0),
            Snippet::Resolve(kind) => (6, kind.tag()),
            Snippet::GetStaticTuple => (7, 0),
            Snippet::SelectVirtualMethod => (8, 0),
            Snippet::LinkNativeMethod => (9, 0),
            Snippet::NativeCallPrologue => (10, 0),
            Snippet::NativeCallEpilogue => (11, 0),
            Snippet::MakeEntrypoint => (12, 0),
            Snippet::CreateTuple => (13, 0),
            Snippet::CreateArray => (14, 0),
            Snippet::ArrayLoad { kind } => (15, kind.tag()),
            Snippet::ArrayStore { kind } => (16, kind.tag()),
            Snippet::ArrayLength => (17, 0),
            Snippet::CheckCast => (18, 0),
            Snippet::InstanceOf => (19, 0),
            Snippet::MonitorEnter => (20, 0),
            Snippet::MonitorExit => (21, 0),
        }
    }

    pub(crate) fn from_encoding(tag: u8, payload: u8) -> Option<Snippet> {
        match tag {
            0 => Kind::from_tag(payload).map(|kind| Snippet::FieldRead { kind }),
            1 => Kind::from_tag(payload).map(|kind| Snippet::FieldWrite { kind }),
            2 => Some(Snippet::CheckNullPointer),
            3 => Some(Snippet::CheckArrayIndex),
            4 => Some(Snippet::MakeHolderInitialized),
            5 => Some(Snippet::MakeClassInitialized),
            6 => ResolutionKind::from_tag(payload).map(Snippet::Resolve),
            7 => Some(Snippet::GetStaticTuple),
            8 => Some(Snippet::SelectVirtualMethod),
            9 => Some(Snippet::LinkNativeMethod),
            10 => Some(Snippet::NativeCallPrologue),
            11 => Some(Snippet::NativeCallEpilogue),
            12 => Some(Snippet::MakeEntrypoint),
            13 => Some(Snippet::CreateTuple),
            14 => Some(Snippet::CreateArray),
            15 => Kind::from_tag(payload).map(|kind| Snippet::ArrayLoad { kind }),
            16 => Kind::from_tag(payload).map(|kind| Snippet::ArrayStore { kind }),
            17 => Some(Snippet::ArrayLength),
            18 => Some(Snippet::CheckCast),
            19 => Some(Snippet::InstanceOf),
            20 => Some(Snippet::MonitorEnter),
            21 => Some(Snippet::MonitorExit),
            _ => None,
        }
    }
}

impl fmt::Display for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snippet::FieldRead { kind }
            | Snippet::FieldWrite { kind }
            | Snippet::ArrayLoad { kind }
            | Snippet::ArrayStore { kind } => write!(f, "{}<{}>", self.name(), kind),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// The holder class named by a descriptor constant, if any
fn holder_of(value: Option<&Value>) -> Option<ClassId> {
    match value?.as_constant()? {
        Constant::Object(ObjectRef::Field(field)) => Some(field.holder),
        Constant::Object(ObjectRef::Method(method)) => Some(method.holder),
        Constant::Object(ObjectRef::Class(class)) => Some(*class),
        _ => None,
    }
}

fn constant_at<'a>(arguments: &'a [Value], index: usize) -> Result<&'a Constant, FoldError> {
    arguments
        .get(index)
        .and_then(Value::as_constant)
        .ok_or(FoldError::Unsupported("argument is not a constant"))
}

/// Process-wide table of snippet templates
///
/// Built once at startup; read-only and safe for unsynchronized concurrent
/// access afterwards. Templates are straight-line closures (no blocks), so
/// a fresh copy can be spliced into any graph.
#[derive(Debug, Default)]
pub struct SnippetRegistry {
    templates: HashMap<Snippet, Closure>,
}

impl SnippetRegistry {
    pub fn new() -> Self {
        SnippetRegistry::default()
    }

    /// Register a snippet's template body
    pub fn register(&mut self, snippet: Snippet, template: Closure) {
        self.templates.insert(snippet, template);
    }

    /// The template for a snippet, if one was registered
    pub fn template(&self, snippet: &Snippet) -> Option<&Closure> {
        self.templates.get(snippet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Backend, CompilationMode, FullBackend, TableResolver};
    use crate::graph::value::{FieldDescriptor, FieldMutability, MethodId};
    use std::sync::Arc;

    fn field(mutability: FieldMutability) -> Arc<FieldDescriptor> {
        Arc::new(FieldDescriptor {
            holder: ClassId(1),
            offset: 16,
            kind: Kind::Int,
            mutability,
            requires_holder_initialization: false,
        })
    }

    fn cx<'a>(
        mode: CompilationMode,
        resolver: &'a TableResolver,
        backend: &'a FullBackend,
        snippets: &'a SnippetRegistry,
    ) -> CompilationContext<'a> {
        CompilationContext::new(mode, resolver, backend as &dyn Backend, snippets)
    }

    #[test]
    fn test_field_read_foldable_with_unknown_tuple() {
        let resolver = TableResolver::new();
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();
        let cx = cx(CompilationMode::Target, &resolver, &backend, &snippets);

        let snippet = Snippet::FieldRead { kind: Kind::Int };
        let arguments = vec![
            Value::Undefined, // tuple unknown
            Value::Constant(Constant::from_field(field(FieldMutability::Mutable))),
            Value::Undefined,
            Value::Undefined,
        ];
        assert!(
            snippet.is_foldable(&cx, &arguments),
            "field read is foldable whenever the descriptor is constant"
        );
    }

    #[test]
    fn test_mutable_field_strength_reduces_to_offset_read() {
        let resolver = TableResolver::new();
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();
        let cx = cx(CompilationMode::Target, &resolver, &backend, &snippets);

        let snippet = Snippet::FieldRead { kind: Kind::Int };
        let arguments = vec![
            Value::Undefined,
            Value::Constant(Constant::from_field(field(FieldMutability::Mutable))),
            Value::Undefined,
            Value::Undefined,
        ];
        let replacement = snippet.fold(&cx, &arguments).unwrap();
        let Value::Proc(Procedure::Builtin(builtin)) = replacement.procedure() else {
            panic!("expected a builtin offset read, got {}", replacement);
        };
        assert_eq!(builtin.op, BuiltinOp::ReadIntAtOffset);
        assert_eq!(
            replacement.arguments()[1],
            Value::Constant(Constant::Int(16)),
            "offset argument must equal the field's declared offset"
        );
    }

    #[test]
    fn test_native_call_prologue_never_foldable() {
        let resolver = TableResolver::new();
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();
        let cx = cx(CompilationMode::Target, &resolver, &backend, &snippets);

        let snippet = Snippet::NativeCallPrologue;
        let arguments = vec![Value::Undefined, Value::Undefined];
        assert!(!snippet.is_foldable(&cx, &arguments));
        assert!(snippet.must_not_inline(&cx, &arguments));
    }

    #[test]
    fn test_link_native_method_host_mode_gating() {
        let mut resolver = TableResolver::new();
        resolver.define_native_entry(MethodId(5), 0xBEEF);
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();

        let snippet = Snippet::LinkNativeMethod;
        let method = Constant::Object(ObjectRef::Method(crate::graph::value::MethodDescriptor {
            id: MethodId(5),
            holder: ClassId(1),
        }));
        let arguments = vec![
            Value::Constant(method),
            Value::Undefined,
            Value::Undefined,
        ];

        let host = cx(CompilationMode::Host, &resolver, &backend, &snippets);
        assert!(
            !snippet.is_foldable(&host, &arguments),
            "never foldable while bootstrapping the compiler itself"
        );

        let target = cx(CompilationMode::Target, &resolver, &backend, &snippets);
        assert!(snippet.is_foldable(&target, &arguments));
    }

    #[test]
    fn test_create_array_negative_size() {
        let resolver = TableResolver::new();
        let backend = FullBackend;
        let snippets = SnippetRegistry::new();
        let cx = cx(CompilationMode::Target, &resolver, &backend, &snippets);

        let snippet = Snippet::CreateArray;
        let arguments = vec![
            Value::Constant(Constant::Object(ObjectRef::Class(ClassId(2)))),
            Value::Constant(Constant::Int(-3)),
            Value::Undefined,
            Value::Undefined,
        ];
        assert!(snippet.is_foldable(&cx, &arguments));
        assert_eq!(
            snippet.fold(&cx, &arguments),
            Err(FoldError::NegativeArraySize(-3))
        );
    }

    #[test]
    fn test_snippet_encoding_roundtrip() {
        let snippets = [
            Snippet::FieldRead { kind: Kind::Long },
            Snippet::Resolve(ResolutionKind::VirtualMethod),
            Snippet::NativeCallPrologue,
            Snippet::ArrayStore {
                kind: Kind::Reference,
            },
        ];
        for snippet in snippets {
            let (tag, payload) = snippet.encoding();
            assert_eq!(Snippet::from_encoding(tag, payload), Some(snippet));
        }
        assert!(Snippet::from_encoding(99, 0).is_none());
    }
}
