//! Stack-machine instruction set of the graph codec
//!
//! Calls and closures with up to six arguments use compact opcodes that
//! carry the count in the opcode byte; the general forms append a varint
//! count. Reference opcodes re-materialize already-decoded blocks and
//! variables by id, which is how sharing and cycles survive the stream.

/// Highest argument count carried by a compact opcode
pub const COMPACT_ARITY_LIMIT: u32 = 6;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // === Calls (0x00-0x07) ===
    /// General call; varint argument count follows
    Call = 0x00,
    Call0 = 0x01,
    Call1 = 0x02,
    Call2 = 0x03,
    Call3 = 0x04,
    Call4 = 0x05,
    Call5 = 0x06,
    Call6 = 0x07,

    // === Closures (0x08-0x0F) ===
    /// General closure; varint parameter count follows
    Closure = 0x08,
    Closure0 = 0x09,
    Closure1 = 0x0A,
    Closure2 = 0x0B,
    Closure3 = 0x0C,
    Closure4 = 0x0D,
    Closure5 = 0x0E,
    Closure6 = 0x0F,

    // === Continuations (0x10-0x11) ===
    /// Continuation with one parameter
    Continuation = 0x10,
    /// Continuation with no parameter
    VoidContinuation = 0x11,

    // === Blocks (0x12-0x14) ===
    /// First visit of a normal block; defines id and closure
    BlockNormal = 0x12,
    /// First visit of an exception-dispatcher block
    BlockExceptionDispatcher = 0x13,
    /// Re-reference of an already-identified block
    BlockReference = 0x14,

    // === Leaf values (0x15-0x18) ===
    /// Re-reference of an already-defined variable, by serial
    VariableReference = 0x15,
    /// Constant by pool index (index 0 is null)
    Constant = 0x16,
    Undefined = 0x17,
    /// Method procedure by external id
    Method = 0x18,

    // === Procedures (0x19-0x1C) ===
    Builtin = 0x19,
    Snippet = 0x1A,
    Switch = 0x1B,
    Operator = 0x1C,

    // === Frame descriptors (0x1D-0x1E) ===
    FrameDescriptor = 0x1D,
    NoFrames = 0x1E,

    // === Variable definitions (0x1F-0x24) ===
    VarNormalContinuationParameter = 0x1F,
    VarExceptionContinuationParameter = 0x20,
    VarLocal = 0x21,
    VarMethodParameter = 0x22,
    VarStack = 0x23,
    VarTemporary = 0x24,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        if byte <= Opcode::VarTemporary as u8 {
            // Discriminants are dense from 0; the bound check makes the
            // transmute total.
            Some(unsafe { std::mem::transmute::<u8, Opcode>(byte) })
        } else {
            None
        }
    }

    /// Compact call opcode for an argument count, if one exists
    pub fn compact_call(count: usize) -> Option<Opcode> {
        match count {
            0 => Some(Opcode::Call0),
            1 => Some(Opcode::Call1),
            2 => Some(Opcode::Call2),
            3 => Some(Opcode::Call3),
            4 => Some(Opcode::Call4),
            5 => Some(Opcode::Call5),
            6 => Some(Opcode::Call6),
            _ => None,
        }
    }

    /// Compact closure opcode for a parameter count, if one exists
    pub fn compact_closure(count: usize) -> Option<Opcode> {
        match count {
            0 => Some(Opcode::Closure0),
            1 => Some(Opcode::Closure1),
            2 => Some(Opcode::Closure2),
            3 => Some(Opcode::Closure3),
            4 => Some(Opcode::Closure4),
            5 => Some(Opcode::Closure5),
            6 => Some(Opcode::Closure6),
            _ => None,
        }
    }

    /// The count implied by a compact call opcode
    pub fn implied_call_arity(self) -> Option<usize> {
        let byte = self as u8;
        if (Opcode::Call0 as u8..=Opcode::Call6 as u8).contains(&byte) {
            Some((byte - Opcode::Call0 as u8) as usize)
        } else {
            None
        }
    }

    /// The count implied by a compact closure opcode
    pub fn implied_closure_arity(self) -> Option<usize> {
        let byte = self as u8;
        if (Opcode::Closure0 as u8..=Opcode::Closure6 as u8).contains(&byte) {
            Some((byte - Opcode::Closure0 as u8) as usize)
        } else {
            None
        }
    }

    /// Mnemonic for traces and stream dumps
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Call => "call",
            Opcode::Call0 => "call_0",
            Opcode::Call1 => "call_1",
            Opcode::Call2 => "call_2",
            Opcode::Call3 => "call_3",
            Opcode::Call4 => "call_4",
            Opcode::Call5 => "call_5",
            Opcode::Call6 => "call_6",
            Opcode::Closure => "closure",
            Opcode::Closure0 => "closure_0",
            Opcode::Closure1 => "closure_1",
            Opcode::Closure2 => "closure_2",
            Opcode::Closure3 => "closure_3",
            Opcode::Closure4 => "closure_4",
            Opcode::Closure5 => "closure_5",
            Opcode::Closure6 => "closure_6",
            Opcode::Continuation => "continuation",
            Opcode::VoidContinuation => "void_continuation",
            Opcode::BlockNormal => "block_normal",
            Opcode::BlockExceptionDispatcher => "block_exception_dispatcher",
            Opcode::BlockReference => "block_ref",
            Opcode::VariableReference => "var_ref",
            Opcode::Constant => "constant",
            Opcode::Undefined => "undefined",
            Opcode::Method => "method",
            Opcode::Builtin => "builtin",
            Opcode::Snippet => "snippet",
            Opcode::Switch => "switch",
            Opcode::Operator => "operator",
            Opcode::FrameDescriptor => "frame_descriptor",
            Opcode::NoFrames => "no_frames",
            Opcode::VarNormalContinuationParameter => "var_cc_param",
            Opcode::VarExceptionContinuationParameter => "var_ce_param",
            Opcode::VarLocal => "var_local",
            Opcode::VarMethodParameter => "var_method_param",
            Opcode::VarStack => "var_stack",
            Opcode::VarTemporary => "var_temp",
        }
    }
}
