use serde::{Deserialize, Serialize};

use crate::bytecode::OpCode;
use crate::lang::symbol::SymbolId;

/// Fixed VM registers addressable by operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Register {
    /// Left-hand arithmetic register.
    Op1 = 0,
    /// Right-hand arithmetic register.
    Op2 = 1,
    /// Function return value.
    Return = 2,
    Reserved1 = 3,
    Reserved2 = 4,
    Reserved3 = 5,
    /// Base of the current stack frame.
    StackFrame = 6,
}

impl Register {
    pub fn from_u8(value: u8) -> Option<Register> {
        Some(match value {
            0 => Register::Op1,
            1 => Register::Op2,
            2 => Register::Return,
            3 => Register::Reserved1,
            4 => Register::Reserved2,
            5 => Register::Reserved3,
            6 => Register::StackFrame,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Op1 => "op1",
            Register::Op2 => "op2",
            Register::Return => "return",
            Register::Reserved1 => "reserved1",
            Register::Reserved2 => "reserved2",
            Register::Reserved3 => "reserved3",
            Register::StackFrame => "frame",
        }
    }
}

/// Serialized tag of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperandType {
    BoolLiteral = 0,
    ByteLiteral = 1,
    ShortLiteral = 2,
    IntLiteral = 3,
    LongLiteral = 4,
    FloatLiteral = 5,
    DoubleLiteral = 6,
    StringLiteral = 7,
    Register = 8,
    RegisterPair = 9,
    Stack = 10,
    StackIndexed = 11,
    Memory = 12,
    MemoryIndexed = 13,
    InstructionIndex = 14,
    SymbolIndex = 15,
}

impl OperandType {
    pub fn from_u8(value: u8) -> Option<OperandType> {
        use OperandType::*;
        Some(match value {
            0 => BoolLiteral,
            1 => ByteLiteral,
            2 => ShortLiteral,
            3 => IntLiteral,
            4 => LongLiteral,
            5 => FloatLiteral,
            6 => DoubleLiteral,
            7 => StringLiteral,
            8 => Register,
            9 => RegisterPair,
            10 => Stack,
            11 => StackIndexed,
            12 => Memory,
            13 => MemoryIndexed,
            14 => InstructionIndex,
            15 => SymbolIndex,
            _ => return None,
        })
    }
}

/// A typed instruction argument.
///
/// `Symbol` and `JumpTarget` are placeholders that only exist until the
/// symbol table is flattened; afterwards they are `SymbolIndex` and
/// `InstructionIndex` respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    BoolLiteral(bool),
    ByteLiteral(u8),
    ShortLiteral(i16),
    IntLiteral(i32),
    LongLiteral(i64),
    FloatLiteral(f32),
    DoubleLiteral(f64),
    StringLiteral(String),
    Register(Register),
    /// Address held in `base` plus the offset held in `offset`.
    RegisterPair(Register, Register),
    Stack(i32),
    StackIndexed(i32, Register),
    Memory(i32),
    MemoryIndexed(i32, Register),
    InstructionIndex(i32),
    SymbolIndex(i32),
    Symbol(SymbolId),
    JumpTarget(SymbolId),
}

impl Operand {
    /// Serialized tag, or `None` for unresolved placeholders.
    pub fn operand_type(&self) -> Option<OperandType> {
        Some(match self {
            Operand::BoolLiteral(_) => OperandType::BoolLiteral,
            Operand::ByteLiteral(_) => OperandType::ByteLiteral,
            Operand::ShortLiteral(_) => OperandType::ShortLiteral,
            Operand::IntLiteral(_) => OperandType::IntLiteral,
            Operand::LongLiteral(_) => OperandType::LongLiteral,
            Operand::FloatLiteral(_) => OperandType::FloatLiteral,
            Operand::DoubleLiteral(_) => OperandType::DoubleLiteral,
            Operand::StringLiteral(_) => OperandType::StringLiteral,
            Operand::Register(_) => OperandType::Register,
            Operand::RegisterPair(..) => OperandType::RegisterPair,
            Operand::Stack(_) => OperandType::Stack,
            Operand::StackIndexed(..) => OperandType::StackIndexed,
            Operand::Memory(_) => OperandType::Memory,
            Operand::MemoryIndexed(..) => OperandType::MemoryIndexed,
            Operand::InstructionIndex(_) => OperandType::InstructionIndex,
            Operand::SymbolIndex(_) => OperandType::SymbolIndex,
            Operand::Symbol(_) | Operand::JumpTarget(_) => return None,
        })
    }

    /// True for operands that name a readable and writable slot.
    pub fn is_slot(&self) -> bool {
        matches!(
            self,
            Operand::Register(_)
                | Operand::RegisterPair(..)
                | Operand::Stack(_)
                | Operand::StackIndexed(..)
                | Operand::Memory(_)
                | Operand::MemoryIndexed(..)
        )
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::BoolLiteral(b) => write!(f, "{}", b),
            Operand::ByteLiteral(n) => write!(f, "{}", n),
            Operand::ShortLiteral(n) => write!(f, "{}", n),
            Operand::IntLiteral(n) => write!(f, "{}", n),
            Operand::LongLiteral(n) => write!(f, "{}", n),
            Operand::FloatLiteral(n) => write!(f, "{}", n),
            Operand::DoubleLiteral(n) => write!(f, "{}", n),
            Operand::StringLiteral(s) => write!(f, "\"{}\"", s.escape_default()),
            Operand::Register(r) => write!(f, "{}", r.name()),
            Operand::RegisterPair(base, offset) => {
                write!(f, "[{}+{}]", base.name(), offset.name())
            }
            Operand::Stack(i) => write!(f, "stack[{}]", i),
            Operand::StackIndexed(i, r) => write!(f, "stack[{}+{}]", i, r.name()),
            Operand::Memory(i) => write!(f, "memory[{}]", i),
            Operand::MemoryIndexed(i, r) => write!(f, "memory[{}+{}]", i, r.name()),
            Operand::InstructionIndex(i) => write!(f, "#{}", i),
            Operand::SymbolIndex(i) => write!(f, "symbol[{}]", i),
            Operand::Symbol(id) => write!(f, "<symbol {}>", id.0),
            Operand::JumpTarget(id) => write!(f, "<target {}>", id.0),
        }
    }
}

/// One bytecode instruction with its debug position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operands: Vec<Operand>,
    pub line: usize,
    pub offset: usize,
    /// Index into the compilation's source-file table.
    pub file: usize,
}

impl Instruction {
    pub fn new(opcode: OpCode) -> Self {
        Self {
            opcode,
            operands: Vec::new(),
            line: 0,
            offset: 0,
            file: 0,
        }
    }

    pub fn with(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn at(mut self, line: usize, offset: usize, file: usize) -> Self {
        self.line = line;
        self.offset = offset;
        self.file = file;
        self
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    /// Writes operand `index`; writing one past the end appends.
    ///
    /// Returns false when `index` would leave a gap.
    pub fn set_operand(&mut self, index: usize, operand: Operand) -> bool {
        if index < self.operands.len() {
            self.operands[index] = operand;
            true
        } else if index == self.operands.len() {
            self.operands.push(operand);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_operand_grows_by_one() {
        let mut i = Instruction::new(OpCode::MovInt);
        assert!(i.set_operand(0, Operand::Register(Register::Op1)));
        assert!(i.set_operand(1, Operand::IntLiteral(4)));
        assert!(!i.set_operand(3, Operand::IntLiteral(9)));
        assert!(i.set_operand(0, Operand::Memory(2)));
        assert_eq!(i.operands.len(), 2);
        assert_eq!(i.operand(0), Some(&Operand::Memory(2)));
    }

    #[test]
    fn test_operand_display() {
        assert_eq!(Operand::Memory(3).to_string(), "memory[3]");
        assert_eq!(Operand::Stack(-2).to_string(), "stack[-2]");
        assert_eq!(
            Operand::StackIndexed(-4, Register::Op1).to_string(),
            "stack[-4+op1]"
        );
        assert_eq!(Operand::StringLiteral("hi".into()).to_string(), "\"hi\"");
        assert_eq!(Operand::Register(Register::Return).to_string(), "return");
    }

    #[test]
    fn test_placeholders_have_no_wire_type() {
        assert!(Operand::Symbol(SymbolId(0)).operand_type().is_none());
        assert!(Operand::JumpTarget(SymbolId(0)).operand_type().is_none());
        assert_eq!(
            Operand::SymbolIndex(1).operand_type(),
            Some(OperandType::SymbolIndex)
        );
    }
}
