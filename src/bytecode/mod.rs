pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod object_file;
pub mod op;
pub mod optimize;

pub use compile::{Compilation, CompileOptions, Compiler};
pub use ir::{Instruction, Operand, OperandType, Register};
pub use object_file::ObjectFile;
pub use op::OpCode;
