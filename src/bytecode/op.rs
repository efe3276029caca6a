use serde::{Deserialize, Serialize};

use crate::lang::data_type::{DataType, DataTypeValue};

// =============================================================================
// OPCODE - Bytecode operations
// =============================================================================

macro_rules! opcodes {
    ($($name:ident => $mnemonic:literal,)*) => {
        /// Every bytecode operation understood by the VM.
        ///
        /// The discriminant (declaration order) is the on-disk opcode number.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u16)]
        pub enum OpCode {
            $($name,)*
        }

        impl OpCode {
            pub const ALL: &'static [OpCode] = &[$(OpCode::$name,)*];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$name => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    Nop => "NOP",

    // literals / stack
    PushNull => "PUSH_NULL",
    MovNull => "MOV_NULL",
    PopDestroy => "POP_DESTROY",

    PushBool => "PUSH_BOOL",
    PushByte => "PUSH_BYTE",
    PushShort => "PUSH_SHORT",
    PushInt => "PUSH_INT",
    PushLong => "PUSH_LONG",
    PushFloat => "PUSH_FLOAT",
    PushDouble => "PUSH_DOUBLE",
    PushString => "PUSH_STRING",
    PushObject => "PUSH_OBJECT",

    PopBool => "POP_BOOL",
    PopByte => "POP_BYTE",
    PopShort => "POP_SHORT",
    PopInt => "POP_INT",
    PopLong => "POP_LONG",
    PopFloat => "POP_FLOAT",
    PopDouble => "POP_DOUBLE",
    PopString => "POP_STRING",
    PopObject => "POP_OBJECT",

    MovBool => "MOV_BOOL",
    MovByte => "MOV_BYTE",
    MovShort => "MOV_SHORT",
    MovInt => "MOV_INT",
    MovLong => "MOV_LONG",
    MovFloat => "MOV_FLOAT",
    MovDouble => "MOV_DOUBLE",
    MovString => "MOV_STRING",
    MovObject => "MOV_OBJECT",

    CastBool => "CAST_BOOL",
    CastByte => "CAST_BYTE",
    CastShort => "CAST_SHORT",
    CastInt => "CAST_INT",
    CastLong => "CAST_LONG",
    CastFloat => "CAST_FLOAT",
    CastDouble => "CAST_DOUBLE",
    CastString => "CAST_STRING",
    CastObject => "CAST_OBJECT",

    // arithmetic
    AddByte => "ADD_BYTE",
    AddShort => "ADD_SHORT",
    AddInt => "ADD_INT",
    AddLong => "ADD_LONG",
    AddFloat => "ADD_FLOAT",
    AddDouble => "ADD_DOUBLE",
    AddString => "ADD_STRING",

    SubByte => "SUB_BYTE",
    SubShort => "SUB_SHORT",
    SubInt => "SUB_INT",
    SubLong => "SUB_LONG",
    SubFloat => "SUB_FLOAT",
    SubDouble => "SUB_DOUBLE",

    MulByte => "MUL_BYTE",
    MulShort => "MUL_SHORT",
    MulInt => "MUL_INT",
    MulLong => "MUL_LONG",
    MulFloat => "MUL_FLOAT",
    MulDouble => "MUL_DOUBLE",

    DivByte => "DIV_BYTE",
    DivShort => "DIV_SHORT",
    DivInt => "DIV_INT",
    DivLong => "DIV_LONG",
    DivFloat => "DIV_FLOAT",
    DivDouble => "DIV_DOUBLE",

    ModByte => "MOD_BYTE",
    ModShort => "MOD_SHORT",
    ModInt => "MOD_INT",
    ModLong => "MOD_LONG",
    ModFloat => "MOD_FLOAT",
    ModDouble => "MOD_DOUBLE",

    NegByte => "NEG_BYTE",
    NegShort => "NEG_SHORT",
    NegInt => "NEG_INT",
    NegLong => "NEG_LONG",
    NegFloat => "NEG_FLOAT",
    NegDouble => "NEG_DOUBLE",

    IncByte => "INC_BYTE",
    IncShort => "INC_SHORT",
    IncInt => "INC_INT",
    IncLong => "INC_LONG",
    IncFloat => "INC_FLOAT",
    IncDouble => "INC_DOUBLE",

    DecByte => "DEC_BYTE",
    DecShort => "DEC_SHORT",
    DecInt => "DEC_INT",
    DecLong => "DEC_LONG",
    DecFloat => "DEC_FLOAT",
    DecDouble => "DEC_DOUBLE",

    // bitwise (int only)
    BitAnd => "BIT_AND",
    BitOr => "BIT_OR",
    BitXor => "BIT_XOR",
    BitShl => "BIT_SHL",
    BitShr => "BIT_SHR",
    BitNot => "BIT_NOT",

    // logic (bool only)
    LogicalAnd => "LOGICAL_AND",
    LogicalOr => "LOGICAL_OR",
    LogicalNot => "LOGICAL_NOT",

    // comparison: CMP_* sets the flag, IS_* reads it into a slot
    CmpBool => "CMP_BOOL",
    CmpByte => "CMP_BYTE",
    CmpShort => "CMP_SHORT",
    CmpInt => "CMP_INT",
    CmpLong => "CMP_LONG",
    CmpFloat => "CMP_FLOAT",
    CmpDouble => "CMP_DOUBLE",
    CmpString => "CMP_STRING",
    CmpObject => "CMP_OBJECT",
    CmpNull => "CMP_NULL",

    IsEq => "IS_EQ",
    IsNe => "IS_NE",
    IsLt => "IS_LT",
    IsGt => "IS_GT",
    IsLe => "IS_LE",
    IsGe => "IS_GE",

    // control flow
    Jmp => "JMP",
    JmpEq => "JMP_EQ",
    JmpNe => "JMP_NE",
    JmpL => "JMP_L",
    JmpG => "JMP_G",
    JmpLe => "JMP_LE",
    JmpGe => "JMP_GE",
    Call => "CALL",
    Return => "RETURN",
    GotoState => "GOTO_STATE",

    // heap
    AllocateHeapBool => "ALLOCATE_HEAP_BOOL",
    AllocateHeapByte => "ALLOCATE_HEAP_BYTE",
    AllocateHeapShort => "ALLOCATE_HEAP_SHORT",
    AllocateHeapInt => "ALLOCATE_HEAP_INT",
    AllocateHeapLong => "ALLOCATE_HEAP_LONG",
    AllocateHeapFloat => "ALLOCATE_HEAP_FLOAT",
    AllocateHeapDouble => "ALLOCATE_HEAP_DOUBLE",
    AllocateHeapString => "ALLOCATE_HEAP_STRING",
    AllocateHeapObject => "ALLOCATE_HEAP_OBJECT",

    // dynamic member access
    GetMember => "GET_MEMBER",
    GetMemberIndexed => "GET_MEMBER_INDEXED",
    SetMember => "SET_MEMBER",
    SetMemberIndexed => "SET_MEMBER_INDEXED",
    CallMethod => "CALL_METHOD",

    // concurrency / debugging
    EnterLock => "ENTER_LOCK",
    ExitLock => "EXIT_LOCK",
    EnterAtom => "ENTER_ATOM",
    ExitAtom => "EXIT_ATOM",
    Breakpoint => "BREAKPOINT",
}

impl OpCode {
    pub fn from_u16(value: u16) -> Option<OpCode> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// True for instructions whose first operand is an instruction index.
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            OpCode::Jmp
                | OpCode::JmpEq
                | OpCode::JmpNe
                | OpCode::JmpL
                | OpCode::JmpG
                | OpCode::JmpLe
                | OpCode::JmpGe
        )
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

// =============================================================================
// Type-specific opcode selection
// =============================================================================

/// Operations that have one opcode per value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Push,
    Pop,
    Mov,
    Cast,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Inc,
    Dec,
    Cmp,
    AllocateHeap,
}

/// Picks the opcode implementing `operation` for values of type `ty`.
///
/// Arrays are references and use the object family. Returns `None` when the
/// type has no such opcode (e.g. `ADD` on `bool`).
pub fn typed(operation: Operation, ty: DataTypeValue) -> Option<OpCode> {
    use Operation::*;

    if ty.is_array {
        return object_op(operation);
    }

    match ty.data_type {
        DataType::Null => match operation {
            Push => Some(OpCode::PushNull),
            Cmp => Some(OpCode::CmpNull),
            Pop | Mov => object_op(operation),
            _ => None,
        },
        DataType::Object => object_op(operation),
        DataType::Bool => Some(match operation {
            Push => OpCode::PushBool,
            Pop => OpCode::PopBool,
            Mov => OpCode::MovBool,
            Cast => OpCode::CastBool,
            Cmp => OpCode::CmpBool,
            AllocateHeap => OpCode::AllocateHeapBool,
            _ => return None,
        }),
        DataType::String => Some(match operation {
            Push => OpCode::PushString,
            Pop => OpCode::PopString,
            Mov => OpCode::MovString,
            Cast => OpCode::CastString,
            Add => OpCode::AddString,
            Cmp => OpCode::CmpString,
            AllocateHeap => OpCode::AllocateHeapString,
            _ => return None,
        }),
        DataType::Byte => Some(match operation {
            Push => OpCode::PushByte,
            Pop => OpCode::PopByte,
            Mov => OpCode::MovByte,
            Cast => OpCode::CastByte,
            Add => OpCode::AddByte,
            Sub => OpCode::SubByte,
            Mul => OpCode::MulByte,
            Div => OpCode::DivByte,
            Mod => OpCode::ModByte,
            Neg => OpCode::NegByte,
            Inc => OpCode::IncByte,
            Dec => OpCode::DecByte,
            Cmp => OpCode::CmpByte,
            AllocateHeap => OpCode::AllocateHeapByte,
        }),
        DataType::Short => Some(match operation {
            Push => OpCode::PushShort,
            Pop => OpCode::PopShort,
            Mov => OpCode::MovShort,
            Cast => OpCode::CastShort,
            Add => OpCode::AddShort,
            Sub => OpCode::SubShort,
            Mul => OpCode::MulShort,
            Div => OpCode::DivShort,
            Mod => OpCode::ModShort,
            Neg => OpCode::NegShort,
            Inc => OpCode::IncShort,
            Dec => OpCode::DecShort,
            Cmp => OpCode::CmpShort,
            AllocateHeap => OpCode::AllocateHeapShort,
        }),
        DataType::Int => Some(match operation {
            Push => OpCode::PushInt,
            Pop => OpCode::PopInt,
            Mov => OpCode::MovInt,
            Cast => OpCode::CastInt,
            Add => OpCode::AddInt,
            Sub => OpCode::SubInt,
            Mul => OpCode::MulInt,
            Div => OpCode::DivInt,
            Mod => OpCode::ModInt,
            Neg => OpCode::NegInt,
            Inc => OpCode::IncInt,
            Dec => OpCode::DecInt,
            Cmp => OpCode::CmpInt,
            AllocateHeap => OpCode::AllocateHeapInt,
        }),
        DataType::Long => Some(match operation {
            Push => OpCode::PushLong,
            Pop => OpCode::PopLong,
            Mov => OpCode::MovLong,
            Cast => OpCode::CastLong,
            Add => OpCode::AddLong,
            Sub => OpCode::SubLong,
            Mul => OpCode::MulLong,
            Div => OpCode::DivLong,
            Mod => OpCode::ModLong,
            Neg => OpCode::NegLong,
            Inc => OpCode::IncLong,
            Dec => OpCode::DecLong,
            Cmp => OpCode::CmpLong,
            AllocateHeap => OpCode::AllocateHeapLong,
        }),
        DataType::Float => Some(match operation {
            Push => OpCode::PushFloat,
            Pop => OpCode::PopFloat,
            Mov => OpCode::MovFloat,
            Cast => OpCode::CastFloat,
            Add => OpCode::AddFloat,
            Sub => OpCode::SubFloat,
            Mul => OpCode::MulFloat,
            Div => OpCode::DivFloat,
            Mod => OpCode::ModFloat,
            Neg => OpCode::NegFloat,
            Inc => OpCode::IncFloat,
            Dec => OpCode::DecFloat,
            Cmp => OpCode::CmpFloat,
            AllocateHeap => OpCode::AllocateHeapFloat,
        }),
        DataType::Double => Some(match operation {
            Push => OpCode::PushDouble,
            Pop => OpCode::PopDouble,
            Mov => OpCode::MovDouble,
            Cast => OpCode::CastDouble,
            Add => OpCode::AddDouble,
            Sub => OpCode::SubDouble,
            Mul => OpCode::MulDouble,
            Div => OpCode::DivDouble,
            Mod => OpCode::ModDouble,
            Neg => OpCode::NegDouble,
            Inc => OpCode::IncDouble,
            Dec => OpCode::DecDouble,
            Cmp => OpCode::CmpDouble,
            AllocateHeap => OpCode::AllocateHeapDouble,
        }),
        DataType::Void | DataType::Invalid => None,
    }
}

fn object_op(operation: Operation) -> Option<OpCode> {
    Some(match operation {
        Operation::Push => OpCode::PushObject,
        Operation::Pop => OpCode::PopObject,
        Operation::Mov => OpCode::MovObject,
        Operation::Cast => OpCode::CastObject,
        Operation::Cmp => OpCode::CmpObject,
        Operation::AllocateHeap => OpCode::AllocateHeapObject,
        _ => return None,
    })
}

/// For a `PUSH_*` opcode, the `MOV_*` with the same value type.
///
/// Used by the optimizer to fuse `push X; pop Y` into `mov Y, X`.
pub fn push_to_mov(push: OpCode) -> Option<(OpCode, OpCode)> {
    Some(match push {
        OpCode::PushBool => (OpCode::PopBool, OpCode::MovBool),
        OpCode::PushByte => (OpCode::PopByte, OpCode::MovByte),
        OpCode::PushShort => (OpCode::PopShort, OpCode::MovShort),
        OpCode::PushInt => (OpCode::PopInt, OpCode::MovInt),
        OpCode::PushLong => (OpCode::PopLong, OpCode::MovLong),
        OpCode::PushFloat => (OpCode::PopFloat, OpCode::MovFloat),
        OpCode::PushDouble => (OpCode::PopDouble, OpCode::MovDouble),
        OpCode::PushString => (OpCode::PopString, OpCode::MovString),
        OpCode::PushObject => (OpCode::PopObject, OpCode::MovObject),
        _ => return None,
    })
}

pub fn is_push(op: OpCode) -> bool {
    op == OpCode::PushNull || push_to_mov(op).is_some()
}

pub fn is_pop(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::PopBool
            | OpCode::PopByte
            | OpCode::PopShort
            | OpCode::PopInt
            | OpCode::PopLong
            | OpCode::PopFloat
            | OpCode::PopDouble
            | OpCode::PopString
            | OpCode::PopObject
    )
}
