//! Values of the CPS graph
//!
//! A `Value` is anything usable as a call argument or as the procedure of a
//! call: compile-time constants, variables, shared blocks, procedures,
//! closures/continuations written inline, and the `Undefined` sentinel for
//! continuation slots not yet filled in during construction.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::graph::call::{Closure, Continuation};
use crate::graph::variable::Variable;
use crate::graph::BlockId;
use crate::kind::Kind;
use crate::procedure::Procedure;

/// Opaque identity of a class known to the external metadata runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Opaque identity of a method known to the external metadata runtime
///
/// Resolving a `Procedure::Method` against the backend triggers translation
/// of that method's own graph; this core only carries the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// Mutability contract of a field, as declared by its holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldMutability {
    /// May change at any time; reads can only be strength-reduced, not folded
    Mutable,
    /// Immutable once the holder is initialized; reads of constant tuples fold
    Constant,
    /// Immutable once observed non-zero; folds only when the read value is non-zero
    ConstantWhenNotZero,
}

impl FieldMutability {
    pub(crate) fn tag(self) -> u8 {
        match self {
            FieldMutability::Mutable => 0,
            FieldMutability::Constant => 1,
            FieldMutability::ConstantWhenNotZero => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(FieldMutability::Mutable),
            1 => Some(FieldMutability::Constant),
            2 => Some(FieldMutability::ConstantWhenNotZero),
            _ => None,
        }
    }
}

/// Resolved descriptor of a field
///
/// Produced by the external resolution service; once embedded in a constant
/// it is immutable and shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    /// Declaring class
    pub holder: ClassId,
    /// Byte offset of the field within its tuple
    pub offset: u32,
    /// Value kind of the field
    pub kind: Kind,
    /// Declared mutability
    pub mutability: FieldMutability,
    /// Whether reading requires the holder to be initialized first
    pub requires_holder_initialization: bool,
}

/// Resolved descriptor of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub id: MethodId,
    pub holder: ClassId,
}

/// Reference payload of a `Constant` with kind `Reference`
///
/// The graph does not interpret references beyond identity; descriptors are
/// embedded so folding can consult them without a round trip through the
/// resolution service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    /// A resolved field descriptor
    Field(Arc<FieldDescriptor>),
    /// A resolved method descriptor
    Method(MethodDescriptor),
    /// A resolved class
    Class(ClassId),
    /// The static tuple of a class
    StaticTuple(ClassId),
    /// A resolution guard cell for a still-unresolved pool entry
    ResolutionGuard { pool_index: u32 },
    /// Any other object, identified by an external handle
    Data(u64),
}

/// A compile-time constant
///
/// Floats are compared and hashed by bit pattern so constants can live in
/// the codec's deduplicating pool.
#[derive(Debug, Clone)]
pub enum Constant {
    Byte(i8),
    Boolean(bool),
    Short(i16),
    Char(u16),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Word(u64),
    Object(ObjectRef),
    Null,
}

impl Constant {
    /// The kind of this constant
    pub fn kind(&self) -> Kind {
        match self {
            Constant::Byte(_) => Kind::Byte,
            Constant::Boolean(_) => Kind::Boolean,
            Constant::Short(_) => Kind::Short,
            Constant::Char(_) => Kind::Char,
            Constant::Int(_) => Kind::Int,
            Constant::Float(_) => Kind::Float,
            Constant::Long(_) => Kind::Long,
            Constant::Double(_) => Kind::Double,
            Constant::Word(_) => Kind::Word,
            Constant::Object(_) | Constant::Null => Kind::Reference,
        }
    }

    /// Wrap a field descriptor as a reference constant
    pub fn from_field(field: Arc<FieldDescriptor>) -> Self {
        Constant::Object(ObjectRef::Field(field))
    }

    /// The field descriptor held by this constant, if any
    pub fn as_field(&self) -> Option<&Arc<FieldDescriptor>> {
        match self {
            Constant::Object(ObjectRef::Field(field)) => Some(field),
            _ => None,
        }
    }

    /// The method descriptor held by this constant, if any
    pub fn as_method(&self) -> Option<&MethodDescriptor> {
        match self {
            Constant::Object(ObjectRef::Method(method)) => Some(method),
            _ => None,
        }
    }

    /// Scalar value widened to i64, for the scalar kinds only
    pub fn as_scalar_i64(&self) -> Option<i64> {
        match self {
            Constant::Byte(v) => Some(*v as i64),
            Constant::Boolean(v) => Some(*v as i64),
            Constant::Short(v) => Some(*v as i64),
            Constant::Char(v) => Some(*v as i64),
            Constant::Int(v) => Some(*v as i64),
            Constant::Long(v) => Some(*v),
            Constant::Word(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Whether this constant is the zero/null of its kind
    pub fn is_zero(&self) -> bool {
        match self {
            Constant::Float(v) => v.to_bits() == 0,
            Constant::Double(v) => v.to_bits() == 0,
            Constant::Null => true,
            Constant::Object(_) => false,
            other => other.as_scalar_i64() == Some(0),
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Byte(a), Constant::Byte(b)) => a == b,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Short(a), Constant::Short(b)) => a == b,
            (Constant::Char(a), Constant::Char(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Long(a), Constant::Long(b)) => a == b,
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::Word(a), Constant::Word(b)) => a == b,
            (Constant::Object(a), Constant::Object(b)) => a == b,
            (Constant::Null, Constant::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Constant::Byte(v) => v.hash(state),
            Constant::Boolean(v) => v.hash(state),
            Constant::Short(v) => v.hash(state),
            Constant::Char(v) => v.hash(state),
            Constant::Int(v) => v.hash(state),
            Constant::Float(v) => v.to_bits().hash(state),
            Constant::Long(v) => v.hash(state),
            Constant::Double(v) => v.to_bits().hash(state),
            Constant::Word(v) => v.hash(state),
            Constant::Object(v) => v.hash(state),
            Constant::Null => {}
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Byte(v) => write!(f, "{}b", v),
            Constant::Boolean(v) => write!(f, "{}", v),
            Constant::Short(v) => write!(f, "{}s", v),
            Constant::Char(v) => write!(f, "'\\u{:04x}'", v),
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Float(v) => write!(f, "{}f", v),
            Constant::Long(v) => write!(f, "{}L", v),
            Constant::Double(v) => write!(f, "{}d", v),
            Constant::Word(v) => write!(f, "0x{:x}", v),
            Constant::Object(ObjectRef::Field(field)) => {
                write!(f, "field@{}", field.offset)
            }
            Constant::Object(ObjectRef::Method(method)) => {
                write!(f, "method#{}", method.id.0)
            }
            Constant::Object(ObjectRef::Class(c)) => write!(f, "class#{}", c.0),
            Constant::Object(ObjectRef::StaticTuple(c)) => write!(f, "statics#{}", c.0),
            Constant::Object(ObjectRef::ResolutionGuard { pool_index }) => {
                write!(f, "guard@{}", pool_index)
            }
            Constant::Object(ObjectRef::Data(h)) => write!(f, "object#{}", h),
            Constant::Null => write!(f, "null"),
        }
    }
}

/// Anything usable as a call argument or procedure
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An immutable literal
    Constant(Constant),
    /// A variable binding, shared by reference
    Variable(Arc<Variable>),
    /// A shared block of the enclosing graph
    Block(BlockId),
    /// A callable procedure
    Proc(Procedure),
    /// An inline lambda abstraction
    Closure(Box<Closure>),
    /// An inline continuation (restricted closure, 0 or 1 parameter)
    Continuation(Box<Continuation>),
    /// Argument slot not yet supplied
    Undefined,
}

impl Value {
    /// Whether this value is a compile-time constant
    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self, Value::Constant(_))
    }

    /// The constant held by this value, if any
    #[inline]
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Value::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Whether this value is a scalar constant equal to zero
    pub fn is_zero_constant(&self) -> bool {
        self.as_constant().is_some_and(Constant::is_zero)
    }

    /// The kind of this value, where one is statically known
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Value::Constant(c) => Some(c.kind()),
            Value::Variable(v) => Some(v.kind()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(c) => write!(f, "{}", c),
            Value::Variable(v) => write!(f, "{}", v),
            Value::Block(id) => write!(f, "block#{}", id.index()),
            Value::Proc(p) => write!(f, "{}", p),
            Value::Closure(_) => write!(f, "<closure>"),
            Value::Continuation(_) => write!(f, "<cont>"),
            Value::Undefined => write!(f, "undefined"),
        }
    }
}
