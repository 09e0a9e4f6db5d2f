//! Value kind tags
//!
//! Every value flowing through the IR carries a kind: one of the primitive
//! machine kinds, the opaque reference kind, or void (for continuations that
//! deliver no value). Kinds are what procedures declare for their parameters
//! and results; the graph itself never interprets them beyond equality.

use std::fmt;

/// Kind of a value in the IR
///
/// Each kind is assigned a stable tag byte used by the binary codec.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// 8-bit signed integer
    Byte = 0,
    /// Boolean
    Boolean = 1,
    /// 16-bit signed integer
    Short = 2,
    /// 16-bit unsigned code unit
    Char = 3,
    /// 32-bit signed integer
    Int = 4,
    /// 32-bit IEEE float
    Float = 5,
    /// 64-bit signed integer
    Long = 6,
    /// 64-bit IEEE float
    Double = 7,
    /// Machine word (pointer-sized, unsigned)
    Word = 8,
    /// Opaque object reference
    Reference = 9,
    /// No value
    Void = 10,
}

impl Kind {
    /// Decode a kind from its codec tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Kind::Byte),
            1 => Some(Kind::Boolean),
            2 => Some(Kind::Short),
            3 => Some(Kind::Char),
            4 => Some(Kind::Int),
            5 => Some(Kind::Float),
            6 => Some(Kind::Long),
            7 => Some(Kind::Double),
            8 => Some(Kind::Word),
            9 => Some(Kind::Reference),
            10 => Some(Kind::Void),
            _ => None,
        }
    }

    /// The codec tag byte for this kind
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this kind denotes an object reference
    #[inline]
    pub fn is_reference(self) -> bool {
        self == Kind::Reference
    }

    /// Whether this kind denotes a raw machine word
    #[inline]
    pub fn is_word(self) -> bool {
        self == Kind::Word
    }

    /// Short lowercase name, used in traces and error messages
    pub fn name(self) -> &'static str {
        match self {
            Kind::Byte => "byte",
            Kind::Boolean => "boolean",
            Kind::Short => "short",
            Kind::Char => "char",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Long => "long",
            Kind::Double => "double",
            Kind::Word => "word",
            Kind::Reference => "reference",
            Kind::Void => "void",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
