//! Primitive builtin operations
//!
//! Builtins are the machine-level operations a backend can execute directly.
//! Each is identified by a stable serial number and declares its parameter
//! and result kinds. A builtin has three observably distinct identities
//! sharing one serial family: the plain form, a foldable form, and a
//! foldable-when-result-nonzero form; the latter two mark use sites the
//! folding engine has already proven safe to constant-fold.
//!
//! The table is built once at process start and is read-only thereafter.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::fold::FoldError;
use crate::graph::value::Constant;
use crate::kind::Kind;

/// Machine-level builtin operation, identified by a stable serial
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinOp {
    // === Int arithmetic (0-8) ===
    IntNegated = 0,
    IntPlus = 1,
    IntMinus = 2,
    IntTimes = 3,
    IntDivided = 4,
    IntRemainder = 5,
    /// Signed less-than, producing a boolean
    IntLessThan = 6,
    /// Unsigned less-than, producing a boolean
    IntBelowThan = 7,
    IntEqual = 8,

    // === Long arithmetic (9-13) ===
    LongPlus = 9,
    LongMinus = 10,
    LongTimes = 11,
    LongDivided = 12,
    LongLessThan = 13,

    // === Offset reads (14-23) ===
    ReadByteAtOffset = 14,
    ReadBooleanAtOffset = 15,
    ReadShortAtOffset = 16,
    ReadCharAtOffset = 17,
    ReadIntAtOffset = 18,
    ReadFloatAtOffset = 19,
    ReadLongAtOffset = 20,
    ReadDoubleAtOffset = 21,
    ReadWordAtOffset = 22,
    ReadReferenceAtOffset = 23,

    // === Offset writes (24-33) ===
    WriteByteAtOffset = 24,
    WriteBooleanAtOffset = 25,
    WriteShortAtOffset = 26,
    WriteCharAtOffset = 27,
    WriteIntAtOffset = 28,
    WriteFloatAtOffset = 29,
    WriteLongAtOffset = 30,
    WriteDoubleAtOffset = 31,
    WriteWordAtOffset = 32,
    WriteReferenceAtOffset = 33,
}

/// All builtins, in serial order
pub const ALL_BUILTINS: &[BuiltinOp] = &[
    BuiltinOp::IntNegated,
    BuiltinOp::IntPlus,
    BuiltinOp::IntMinus,
    BuiltinOp::IntTimes,
    BuiltinOp::IntDivided,
    BuiltinOp::IntRemainder,
    BuiltinOp::IntLessThan,
    BuiltinOp::IntBelowThan,
    BuiltinOp::IntEqual,
    BuiltinOp::LongPlus,
    BuiltinOp::LongMinus,
    BuiltinOp::LongTimes,
    BuiltinOp::LongDivided,
    BuiltinOp::LongLessThan,
    BuiltinOp::ReadByteAtOffset,
    BuiltinOp::ReadBooleanAtOffset,
    BuiltinOp::ReadShortAtOffset,
    BuiltinOp::ReadCharAtOffset,
    BuiltinOp::ReadIntAtOffset,
    BuiltinOp::ReadFloatAtOffset,
    BuiltinOp::ReadLongAtOffset,
    BuiltinOp::ReadDoubleAtOffset,
    BuiltinOp::ReadWordAtOffset,
    BuiltinOp::ReadReferenceAtOffset,
    BuiltinOp::WriteByteAtOffset,
    BuiltinOp::WriteBooleanAtOffset,
    BuiltinOp::WriteShortAtOffset,
    BuiltinOp::WriteCharAtOffset,
    BuiltinOp::WriteIntAtOffset,
    BuiltinOp::WriteFloatAtOffset,
    BuiltinOp::WriteLongAtOffset,
    BuiltinOp::WriteDoubleAtOffset,
    BuiltinOp::WriteWordAtOffset,
    BuiltinOp::WriteReferenceAtOffset,
];

/// Serial-to-builtin lookup, built once at process start
static REGISTRY: LazyLock<HashMap<u32, BuiltinOp>> =
    LazyLock::new(|| ALL_BUILTINS.iter().map(|&op| (op.serial(), op)).collect());

impl BuiltinOp {
    /// The stable serial number of this builtin
    #[inline]
    pub fn serial(self) -> u32 {
        self as u32
    }

    /// Look up a builtin by serial
    pub fn from_serial(serial: u32) -> Option<Self> {
        REGISTRY.get(&serial).copied()
    }

    /// Mnemonic, used in traces and the codec's disassembly
    pub fn name(self) -> &'static str {
        match self {
            BuiltinOp::IntNegated => "int_negated",
            BuiltinOp::IntPlus => "int_plus",
            BuiltinOp::IntMinus => "int_minus",
            BuiltinOp::IntTimes => "int_times",
            BuiltinOp::IntDivided => "int_divided",
            BuiltinOp::IntRemainder => "int_remainder",
            BuiltinOp::IntLessThan => "int_less_than",
            BuiltinOp::IntBelowThan => "int_below_than",
            BuiltinOp::IntEqual => "int_equal",
            BuiltinOp::LongPlus => "long_plus",
            BuiltinOp::LongMinus => "long_minus",
            BuiltinOp::LongTimes => "long_times",
            BuiltinOp::LongDivided => "long_divided",
            BuiltinOp::LongLessThan => "long_less_than",
            BuiltinOp::ReadByteAtOffset => "read_byte_at_offset",
            BuiltinOp::ReadBooleanAtOffset => "read_boolean_at_offset",
            BuiltinOp::ReadShortAtOffset => "read_short_at_offset",
            BuiltinOp::ReadCharAtOffset => "read_char_at_offset",
            BuiltinOp::ReadIntAtOffset => "read_int_at_offset",
            BuiltinOp::ReadFloatAtOffset => "read_float_at_offset",
            BuiltinOp::ReadLongAtOffset => "read_long_at_offset",
            BuiltinOp::ReadDoubleAtOffset => "read_double_at_offset",
            BuiltinOp::ReadWordAtOffset => "read_word_at_offset",
            BuiltinOp::ReadReferenceAtOffset => "read_reference_at_offset",
            BuiltinOp::WriteByteAtOffset => "write_byte_at_offset",
            BuiltinOp::WriteBooleanAtOffset => "write_boolean_at_offset",
            BuiltinOp::WriteShortAtOffset => "write_short_at_offset",
            BuiltinOp::WriteCharAtOffset => "write_char_at_offset",
            BuiltinOp::WriteIntAtOffset => "write_int_at_offset",
            BuiltinOp::WriteFloatAtOffset => "write_float_at_offset",
            BuiltinOp::WriteLongAtOffset => "write_long_at_offset",
            BuiltinOp::WriteDoubleAtOffset => "write_double_at_offset",
            BuiltinOp::WriteWordAtOffset => "write_word_at_offset",
            BuiltinOp::WriteReferenceAtOffset => "write_reference_at_offset",
        }
    }

    /// Declared operand kinds (excluding the two continuation arguments)
    pub fn parameter_kinds(self) -> &'static [Kind] {
        use Kind::*;
        match self {
            BuiltinOp::IntNegated => &[Int],
            BuiltinOp::IntPlus
            | BuiltinOp::IntMinus
            | BuiltinOp::IntTimes
            | BuiltinOp::IntDivided
            | BuiltinOp::IntRemainder
            | BuiltinOp::IntLessThan
            | BuiltinOp::IntBelowThan
            | BuiltinOp::IntEqual => &[Int, Int],
            BuiltinOp::LongPlus
            | BuiltinOp::LongMinus
            | BuiltinOp::LongTimes
            | BuiltinOp::LongDivided
            | BuiltinOp::LongLessThan => &[Long, Long],
            BuiltinOp::ReadByteAtOffset
            | BuiltinOp::ReadBooleanAtOffset
            | BuiltinOp::ReadShortAtOffset
            | BuiltinOp::ReadCharAtOffset
            | BuiltinOp::ReadIntAtOffset
            | BuiltinOp::ReadFloatAtOffset
            | BuiltinOp::ReadLongAtOffset
            | BuiltinOp::ReadDoubleAtOffset
            | BuiltinOp::ReadWordAtOffset
            | BuiltinOp::ReadReferenceAtOffset => &[Reference, Int],
            BuiltinOp::WriteByteAtOffset => &[Reference, Int, Byte],
            BuiltinOp::WriteBooleanAtOffset => &[Reference, Int, Boolean],
            BuiltinOp::WriteShortAtOffset => &[Reference, Int, Short],
            BuiltinOp::WriteCharAtOffset => &[Reference, Int, Char],
            BuiltinOp::WriteIntAtOffset => &[Reference, Int, Int],
            BuiltinOp::WriteFloatAtOffset => &[Reference, Int, Float],
            BuiltinOp::WriteLongAtOffset => &[Reference, Int, Long],
            BuiltinOp::WriteDoubleAtOffset => &[Reference, Int, Double],
            BuiltinOp::WriteWordAtOffset => &[Reference, Int, Word],
            BuiltinOp::WriteReferenceAtOffset => &[Reference, Int, Reference],
        }
    }

    /// Declared result kind
    pub fn result_kind(self) -> Kind {
        match self {
            BuiltinOp::IntNegated
            | BuiltinOp::IntPlus
            | BuiltinOp::IntMinus
            | BuiltinOp::IntTimes
            | BuiltinOp::IntDivided
            | BuiltinOp::IntRemainder => Kind::Int,
            BuiltinOp::IntLessThan
            | BuiltinOp::IntBelowThan
            | BuiltinOp::IntEqual
            | BuiltinOp::LongLessThan => Kind::Boolean,
            BuiltinOp::LongPlus
            | BuiltinOp::LongMinus
            | BuiltinOp::LongTimes
            | BuiltinOp::LongDivided => Kind::Long,
            op => op
                .offset_read_kind()
                .unwrap_or(Kind::Void), // writes deliver no value
        }
    }

    /// The value kind read, if this is an offset-read builtin
    pub fn offset_read_kind(self) -> Option<Kind> {
        match self {
            BuiltinOp::ReadByteAtOffset => Some(Kind::Byte),
            BuiltinOp::ReadBooleanAtOffset => Some(Kind::Boolean),
            BuiltinOp::ReadShortAtOffset => Some(Kind::Short),
            BuiltinOp::ReadCharAtOffset => Some(Kind::Char),
            BuiltinOp::ReadIntAtOffset => Some(Kind::Int),
            BuiltinOp::ReadFloatAtOffset => Some(Kind::Float),
            BuiltinOp::ReadLongAtOffset => Some(Kind::Long),
            BuiltinOp::ReadDoubleAtOffset => Some(Kind::Double),
            BuiltinOp::ReadWordAtOffset => Some(Kind::Word),
            BuiltinOp::ReadReferenceAtOffset => Some(Kind::Reference),
            _ => None,
        }
    }

    /// The value kind written, if this is an offset-write builtin
    pub fn offset_write_kind(self) -> Option<Kind> {
        match self {
            BuiltinOp::WriteByteAtOffset => Some(Kind::Byte),
            BuiltinOp::WriteBooleanAtOffset => Some(Kind::Boolean),
            BuiltinOp::WriteShortAtOffset => Some(Kind::Short),
            BuiltinOp::WriteCharAtOffset => Some(Kind::Char),
            BuiltinOp::WriteIntAtOffset => Some(Kind::Int),
            BuiltinOp::WriteFloatAtOffset => Some(Kind::Float),
            BuiltinOp::WriteLongAtOffset => Some(Kind::Long),
            BuiltinOp::WriteDoubleAtOffset => Some(Kind::Double),
            BuiltinOp::WriteWordAtOffset => Some(Kind::Word),
            BuiltinOp::WriteReferenceAtOffset => Some(Kind::Reference),
            _ => None,
        }
    }

    /// The offset-read builtin for a value kind
    pub fn read_at_offset_for(kind: Kind) -> BuiltinOp {
        match kind {
            Kind::Byte => BuiltinOp::ReadByteAtOffset,
            Kind::Boolean => BuiltinOp::ReadBooleanAtOffset,
            Kind::Short => BuiltinOp::ReadShortAtOffset,
            Kind::Char => BuiltinOp::ReadCharAtOffset,
            Kind::Int | Kind::Void => BuiltinOp::ReadIntAtOffset,
            Kind::Float => BuiltinOp::ReadFloatAtOffset,
            Kind::Long => BuiltinOp::ReadLongAtOffset,
            Kind::Double => BuiltinOp::ReadDoubleAtOffset,
            Kind::Word => BuiltinOp::ReadWordAtOffset,
            Kind::Reference => BuiltinOp::ReadReferenceAtOffset,
        }
    }

    /// The offset-write builtin for a value kind
    pub fn write_at_offset_for(kind: Kind) -> BuiltinOp {
        match kind {
            Kind::Byte => BuiltinOp::WriteByteAtOffset,
            Kind::Boolean => BuiltinOp::WriteBooleanAtOffset,
            Kind::Short => BuiltinOp::WriteShortAtOffset,
            Kind::Char => BuiltinOp::WriteCharAtOffset,
            Kind::Int | Kind::Void => BuiltinOp::WriteIntAtOffset,
            Kind::Float => BuiltinOp::WriteFloatAtOffset,
            Kind::Long => BuiltinOp::WriteLongAtOffset,
            Kind::Double => BuiltinOp::WriteDoubleAtOffset,
            Kind::Word => BuiltinOp::WriteWordAtOffset,
            Kind::Reference => BuiltinOp::WriteReferenceAtOffset,
        }
    }

    /// Whether this builtin is a pure computation evaluable at compile time
    pub fn is_pure(self) -> bool {
        self.serial() <= BuiltinOp::LongLessThan.serial()
    }

    /// Evaluate a pure builtin over constant operands
    ///
    /// Semantics match the target machine: wrapping two's-complement
    /// arithmetic, and division by a constant zero is a folding error the
    /// runtime reproduces.
    pub fn apply(self, operands: &[Constant]) -> Result<Constant, FoldError> {
        fn int(c: &Constant) -> Result<i32, FoldError> {
            match c {
                Constant::Int(v) => Ok(*v),
                _ => Err(FoldError::Unsupported("operand is not an int constant")),
            }
        }
        fn long(c: &Constant) -> Result<i64, FoldError> {
            match c {
                Constant::Long(v) => Ok(*v),
                _ => Err(FoldError::Unsupported("operand is not a long constant")),
            }
        }

        match self {
            BuiltinOp::IntNegated => Ok(Constant::Int(int(&operands[0])?.wrapping_neg())),
            BuiltinOp::IntPlus => Ok(Constant::Int(
                int(&operands[0])?.wrapping_add(int(&operands[1])?),
            )),
            BuiltinOp::IntMinus => Ok(Constant::Int(
                int(&operands[0])?.wrapping_sub(int(&operands[1])?),
            )),
            BuiltinOp::IntTimes => Ok(Constant::Int(
                int(&operands[0])?.wrapping_mul(int(&operands[1])?),
            )),
            BuiltinOp::IntDivided => {
                let divisor = int(&operands[1])?;
                if divisor == 0 {
                    return Err(FoldError::DivisionByZero);
                }
                Ok(Constant::Int(int(&operands[0])?.wrapping_div(divisor)))
            }
            BuiltinOp::IntRemainder => {
                let divisor = int(&operands[1])?;
                if divisor == 0 {
                    return Err(FoldError::DivisionByZero);
                }
                Ok(Constant::Int(int(&operands[0])?.wrapping_rem(divisor)))
            }
            BuiltinOp::IntLessThan => Ok(Constant::Boolean(int(&operands[0])? < int(&operands[1])?)),
            BuiltinOp::IntBelowThan => Ok(Constant::Boolean(
                (int(&operands[0])? as u32) < (int(&operands[1])? as u32),
            )),
            BuiltinOp::IntEqual => Ok(Constant::Boolean(int(&operands[0])? == int(&operands[1])?)),
            BuiltinOp::LongPlus => Ok(Constant::Long(
                long(&operands[0])?.wrapping_add(long(&operands[1])?),
            )),
            BuiltinOp::LongMinus => Ok(Constant::Long(
                long(&operands[0])?.wrapping_sub(long(&operands[1])?),
            )),
            BuiltinOp::LongTimes => Ok(Constant::Long(
                long(&operands[0])?.wrapping_mul(long(&operands[1])?),
            )),
            BuiltinOp::LongDivided => {
                let divisor = long(&operands[1])?;
                if divisor == 0 {
                    return Err(FoldError::DivisionByZero);
                }
                Ok(Constant::Long(long(&operands[0])?.wrapping_div(divisor)))
            }
            BuiltinOp::LongLessThan => Ok(Constant::Boolean(
                long(&operands[0])? < long(&operands[1])?,
            )),
            _ => Err(FoldError::Unsupported("builtin is not a pure computation")),
        }
    }
}

impl fmt::Display for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which identity of a builtin's serial family a use site carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FoldVariant {
    /// Ordinary use site; foldability derived from the default rules
    #[default]
    Plain,
    /// Use site proven safe to constant-fold
    Foldable,
    /// Use site foldable once the computed result is known non-zero
    FoldableWhenNotZero,
}

impl FoldVariant {
    pub(crate) fn tag(self) -> u8 {
        match self {
            FoldVariant::Plain => 0,
            FoldVariant::Foldable => 1,
            FoldVariant::FoldableWhenNotZero => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(FoldVariant::Plain),
            1 => Some(FoldVariant::Foldable),
            2 => Some(FoldVariant::FoldableWhenNotZero),
            _ => None,
        }
    }
}

/// A builtin use: the operation plus the fold identity of this use site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinProc {
    pub op: BuiltinOp,
    pub variant: FoldVariant,
}

impl BuiltinProc {
    pub fn plain(op: BuiltinOp) -> Self {
        BuiltinProc {
            op,
            variant: FoldVariant::Plain,
        }
    }

    pub fn foldable(op: BuiltinOp) -> Self {
        BuiltinProc {
            op,
            variant: FoldVariant::Foldable,
        }
    }

    pub fn foldable_when_not_zero(op: BuiltinOp) -> Self {
        BuiltinProc {
            op,
            variant: FoldVariant::FoldableWhenNotZero,
        }
    }

    /// Total call arity: operands plus the two continuations
    pub fn call_arity(&self) -> usize {
        self.op.parameter_kinds().len() + 2
    }
}

impl fmt::Display for BuiltinProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            FoldVariant::Plain => write!(f, "{}", self.op),
            FoldVariant::Foldable => write!(f, "{}[foldable]", self.op),
            FoldVariant::FoldableWhenNotZero => write!(f, "{}[foldable!=0]", self.op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_roundtrip() {
        for &op in ALL_BUILTINS {
            assert_eq!(BuiltinOp::from_serial(op.serial()), Some(op));
        }
        assert!(BuiltinOp::from_serial(9999).is_none());
    }

    #[test]
    fn test_int_arithmetic_folds() {
        let result = BuiltinOp::IntPlus
            .apply(&[Constant::Int(40), Constant::Int(2)])
            .unwrap();
        assert_eq!(result, Constant::Int(42));

        let result = BuiltinOp::IntTimes
            .apply(&[Constant::Int(i32::MAX), Constant::Int(2)])
            .unwrap();
        assert_eq!(result, Constant::Int(i32::MAX.wrapping_mul(2)));
    }

    #[test]
    fn test_division_by_zero_is_folding_error() {
        let err = BuiltinOp::IntDivided
            .apply(&[Constant::Int(1), Constant::Int(0)])
            .unwrap_err();
        assert_eq!(err, FoldError::DivisionByZero);
    }

    #[test]
    fn test_unsigned_comparison() {
        let result = BuiltinOp::IntBelowThan
            .apply(&[Constant::Int(-1), Constant::Int(1)])
            .unwrap();
        // -1 as unsigned is the largest u32
        assert_eq!(result, Constant::Boolean(false));
    }

    #[test]
    fn test_offset_read_selection() {
        assert_eq!(
            BuiltinOp::read_at_offset_for(Kind::Reference),
            BuiltinOp::ReadReferenceAtOffset
        );
        assert_eq!(
            BuiltinOp::ReadIntAtOffset.offset_read_kind(),
            Some(Kind::Int)
        );
        assert_eq!(
            BuiltinOp::ReadIntAtOffset.parameter_kinds(),
            &[Kind::Reference, Kind::Int]
        );
    }

    #[test]
    fn test_fold_variants_share_serial() {
        let plain = BuiltinProc::plain(BuiltinOp::ReadIntAtOffset);
        let foldable = BuiltinProc::foldable(BuiltinOp::ReadIntAtOffset);
        assert_eq!(plain.op.serial(), foldable.op.serial());
        assert_ne!(plain, foldable);
    }
}
