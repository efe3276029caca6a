//! Binary object file: the linked symbol table and instruction list.
//!
//! All multi-byte values are little-endian. Layout:
//!
//! ```text
//! magic "KOF"
//! flags u32, internal variables i32, memory slots i32
//! global scope i32, member scope i32, engine state i32, editor state i32
//! defines:      u32 count, (name str, value str)*
//! symbols:      u32 count, symbol*
//! files:        u32 count, str*               (debug builds only)
//! instructions: u32 count, instruction*
//! ```
//!
//! Absent indices are written as -1; strings are a u32 byte length followed
//! by UTF-8.

use std::io::{Read, Write};

use thiserror::Error;

use crate::bytecode::ir::{Instruction, Operand, OperandType, Register};
use crate::bytecode::OpCode;
use crate::frontend::preprocess::Define;
use crate::frontend::token::{Token, TokenKind};
use crate::lang::data_type::{DataType, DataTypeValue};
use crate::lang::flags::CompileFlags;
use crate::lang::symbol::{
    AccessModifier, FunctionFlags, FunctionSymbol, StateSymbol, Storage, Symbol, SymbolId,
    SymbolKind, SymbolType, VariableKind, VariableSymbol,
};
use crate::stream::{Stream, StreamMode, StreamProvider};

pub const MAGIC: &[u8; 3] = b"KOF";

#[derive(Debug, Error)]
pub enum ObjectFileError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an object file")]
    BadMagic,

    #[error("object file is truncated")]
    Truncated,

    #[error("unknown {what} tag {tag}")]
    UnknownTag { what: &'static str, tag: u32 },

    #[error("string is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("instruction {0} still holds an unresolved operand")]
    Unresolved(usize),
}

/// A linked compilation unit.
#[derive(Debug, Clone)]
pub struct ObjectFile {
    pub flags: CompileFlags,
    /// Compiler-synthesized locals such as loop counters.
    pub internal_variable_count: i32,
    pub memory_size: i32,
    pub global_scope: usize,
    pub member_scope: usize,
    pub default_engine_state: Option<usize>,
    pub default_editor_state: Option<usize>,
    pub defines: Vec<Define>,
    /// Flat symbol list; `symbols[i].index == i`.
    pub symbols: Vec<Symbol>,
    /// Source files referenced by instruction debug positions.
    pub files: Vec<String>,
    pub instructions: Vec<Instruction>,
}

impl ObjectFile {
    /// Instructions of the function at flat index `index`, up to the next
    /// function's entry point.
    pub fn function_body(&self, index: usize) -> &[Instruction] {
        let entry = self
            .symbols
            .get(index)
            .and_then(|s| s.as_function())
            .and_then(|f| f.entry_point);
        let Some(entry) = entry else {
            return &[];
        };
        let end = self
            .symbols
            .iter()
            .filter_map(|s| s.as_function()?.entry_point)
            .filter(|&e| e > entry)
            .min()
            .unwrap_or(self.instructions.len());
        let len = self.instructions.len();
        &self.instructions[entry.min(len)..end.min(len)]
    }

    /// Dotted name of the symbol at flat index `index`, without the root scope.
    pub fn qualified_name(&self, index: usize) -> String {
        let mut parts = Vec::new();
        let mut current = self.symbols.get(index);
        while let Some(symbol) = current {
            let Some(scope) = symbol.scope else {
                break;
            };
            parts.push(symbol.identifier.as_str());
            current = self.symbols.get(scope.0);
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn is_debug(&self) -> bool {
        self.flags.contains(CompileFlags::DEBUG)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ObjectFileError> {
        let mut out = Encoder::default();
        out.bytes(MAGIC);
        out.u32(self.flags.bits());
        out.i32(self.internal_variable_count);
        out.i32(self.memory_size);
        out.index(Some(self.global_scope));
        out.index(Some(self.member_scope));
        out.index(self.default_engine_state);
        out.index(self.default_editor_state);

        out.u32(self.defines.len() as u32);
        for define in &self.defines {
            out.str(&define.identifier);
            out.str(&define.value);
        }

        out.u32(self.symbols.len() as u32);
        for symbol in &self.symbols {
            write_symbol(&mut out, symbol);
        }

        if self.is_debug() {
            out.u32(self.files.len() as u32);
            for file in &self.files {
                out.str(file);
            }
        }

        out.u32(self.instructions.len() as u32);
        for (i, instruction) in self.instructions.iter().enumerate() {
            out.u16(instruction.opcode.as_u16());
            out.u8(instruction.operands.len() as u8);
            if self.is_debug() {
                out.u32(instruction.file as u32);
                out.u32(instruction.line as u32);
                out.u32(instruction.offset as u32);
            }
            for operand in &instruction.operands {
                if !write_operand(&mut out, operand) {
                    return Err(ObjectFileError::Unresolved(i));
                }
            }
        }
        Ok(out.buf)
    }

    pub fn dump<W: Write>(&self, writer: &mut W) -> Result<(), ObjectFileError> {
        writer.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<ObjectFile, ObjectFileError> {
        let mut r = Decoder { data, pos: 0 };
        if r.take(MAGIC.len())? != MAGIC {
            return Err(ObjectFileError::BadMagic);
        }
        let flags = CompileFlags::from_bits_truncate(r.u32()?);
        let internal_variable_count = r.i32()?;
        let memory_size = r.i32()?;
        let global_scope = r.index()?.unwrap_or(0);
        let member_scope = r.index()?.unwrap_or(0);
        let default_engine_state = r.index()?;
        let default_editor_state = r.index()?;

        let count = r.u32()?;
        let mut defines = Vec::new();
        for _ in 0..count {
            let identifier = r.string()?;
            let value = r.string()?;
            defines.push(Define { identifier, value });
        }

        let count = r.u32()?;
        let mut symbols = Vec::new();
        for _ in 0..count {
            symbols.push(read_symbol(&mut r)?);
        }

        let debug = flags.contains(CompileFlags::DEBUG);
        let mut files = Vec::new();
        if debug {
            let count = r.u32()?;
            for _ in 0..count {
                files.push(r.string()?);
            }
        }

        let count = r.u32()?;
        let mut instructions = Vec::new();
        for _ in 0..count {
            let raw = r.u16()?;
            let opcode = OpCode::from_u16(raw).ok_or(ObjectFileError::UnknownTag {
                what: "opcode",
                tag: u32::from(raw),
            })?;
            let operand_count = r.u8()?;
            let mut instruction = Instruction::new(opcode);
            if debug {
                let file = r.u32()? as usize;
                let line = r.u32()? as usize;
                let offset = r.u32()? as usize;
                instruction = instruction.at(line, offset, file);
            }
            for _ in 0..operand_count {
                instruction.operands.push(read_operand(&mut r)?);
            }
            instructions.push(instruction);
        }

        Ok(ObjectFile {
            flags,
            internal_variable_count,
            memory_size,
            global_scope,
            member_scope,
            default_engine_state,
            default_editor_state,
            defines,
            symbols,
            files,
            instructions,
        })
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<ObjectFile, ObjectFileError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }
}

/// Writes `object` to the stream `streams` hands out for `url`.
///
/// Returns `Ok(false)` without writing when no stream is available.
pub fn write_object(
    streams: &mut dyn StreamProvider,
    url: &str,
    object: &ObjectFile,
) -> Result<bool, ObjectFileError> {
    let Some(Stream::Write(mut writer)) = streams.request_stream(url, StreamMode::Write) else {
        return Ok(false);
    };
    object.dump(&mut writer)?;
    writer.flush()?;
    Ok(true)
}

// =============================================================================
// Encoding
// =============================================================================

#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    fn u16(&mut self, v: u16) {
        self.bytes(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.bytes(&v.to_le_bytes());
    }

    fn index(&mut self, v: Option<usize>) {
        self.i32(v.map_or(-1, |i| i as i32));
    }

    fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.bytes(s.as_bytes());
    }

    fn data_type(&mut self, ty: DataTypeValue) {
        self.u8(ty.data_type as u8);
        self.bool(ty.is_array);
        self.bool(ty.is_reference);
    }
}

fn write_symbol(out: &mut Encoder, symbol: &Symbol) {
    out.u8(symbol.symbol_type() as u8);
    out.i32(symbol.index as i32);
    out.str(&symbol.identifier);
    out.index(symbol.scope.map(|s| s.0));
    out.u32(symbol.children.len() as u32);
    for child in &symbol.children {
        out.i32(child.0 as i32);
    }

    match &symbol.kind {
        SymbolKind::Function(f) => {
            out.u32(f.parameter_count as u32);
            out.u32(f.parameter_types.len() as u32);
            for &ty in &f.parameter_types {
                out.data_type(ty);
            }
            out.data_type(f.return_type);
            out.index(f.entry_point);
            out.u32(f.local_frame_size as u32);
            out.u8(f.flags.bits());
            out.u8(f.access as u8);
            out.bool(f.used);
        }
        SymbolKind::Variable(v) => {
            out.u8(v.kind as u8);
            out.data_type(v.data_type);
            out.bool(v.is_constant);
            out.bool(v.is_property);
            match v.storage {
                Storage::Stack(offset) => {
                    out.u8(0);
                    out.i32(offset);
                }
                Storage::Memory(slot) => {
                    out.u8(1);
                    out.i32(slot);
                }
            }
            match &v.literal {
                Some(token) => {
                    out.bool(true);
                    let ty = token.kind.literal_type().unwrap_or(DataType::Invalid);
                    out.u8(ty as u8);
                    out.str(&token.text);
                    out.u32(token.line as u32);
                    out.u32(token.offset as u32);
                    out.str(&token.file);
                }
                None => out.bool(false),
            }
            out.bool(v.used);
            out.u8(v.access as u8);
        }
        SymbolKind::State(s) => {
            out.bool(s.is_engine_default);
            out.bool(s.is_editor_default);
        }
        SymbolKind::MetaData { value } => out.str(value),
        SymbolKind::JumpTarget { bound } => out.index(*bound),
        SymbolKind::Enumeration | SymbolKind::Namespace | SymbolKind::String => {}
    }
}

/// False for placeholders, which have no wire form.
fn write_operand(out: &mut Encoder, operand: &Operand) -> bool {
    let Some(tag) = operand.operand_type() else {
        return false;
    };
    out.u8(tag as u8);
    match operand {
        Operand::BoolLiteral(b) => out.bool(*b),
        Operand::ByteLiteral(v) => out.u8(*v),
        Operand::ShortLiteral(v) => out.bytes(&v.to_le_bytes()),
        Operand::IntLiteral(v) => out.i32(*v),
        Operand::LongLiteral(v) => out.bytes(&v.to_le_bytes()),
        Operand::FloatLiteral(v) => out.bytes(&v.to_le_bytes()),
        Operand::DoubleLiteral(v) => out.bytes(&v.to_le_bytes()),
        Operand::StringLiteral(s) => out.str(s),
        Operand::Register(r) => out.u8(*r as u8),
        Operand::RegisterPair(base, offset) => {
            out.u8(*base as u8);
            out.u8(*offset as u8);
        }
        Operand::Stack(i) | Operand::Memory(i) => out.i32(*i),
        Operand::StackIndexed(i, r) | Operand::MemoryIndexed(i, r) => {
            out.i32(*i);
            out.u8(*r as u8);
        }
        Operand::InstructionIndex(i) | Operand::SymbolIndex(i) => out.i32(*i),
        Operand::Symbol(_) | Operand::JumpTarget(_) => return false,
    }
    true
}

// =============================================================================
// Decoding
// =============================================================================

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ObjectFileError> {
        let end = self.pos.checked_add(n).ok_or(ObjectFileError::Truncated)?;
        let bytes = self.data.get(self.pos..end).ok_or(ObjectFileError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ObjectFileError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ObjectFileError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, ObjectFileError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, ObjectFileError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ObjectFileError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, ObjectFileError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn index(&mut self) -> Result<Option<usize>, ObjectFileError> {
        let v = self.i32()?;
        Ok(usize::try_from(v).ok())
    }

    fn string(&mut self) -> Result<String, ObjectFileError> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }

    fn register(&mut self) -> Result<Register, ObjectFileError> {
        let raw = self.u8()?;
        Register::from_u8(raw).ok_or(ObjectFileError::UnknownTag {
            what: "register",
            tag: u32::from(raw),
        })
    }

    fn primitive(&mut self) -> Result<DataType, ObjectFileError> {
        let raw = self.u8()?;
        DataType::from_u8(raw).ok_or(ObjectFileError::UnknownTag {
            what: "data type",
            tag: u32::from(raw),
        })
    }

    fn data_type(&mut self) -> Result<DataTypeValue, ObjectFileError> {
        let data_type = self.primitive()?;
        let is_array = self.bool()?;
        let is_reference = self.bool()?;
        Ok(DataTypeValue::new(data_type, is_array, is_reference))
    }

    fn access(&mut self) -> Result<AccessModifier, ObjectFileError> {
        let raw = self.u8()?;
        AccessModifier::from_u8(raw).ok_or(ObjectFileError::UnknownTag {
            what: "access modifier",
            tag: u32::from(raw),
        })
    }
}

fn literal_kind(ty: DataType) -> TokenKind {
    match ty {
        DataType::String => TokenKind::StringLiteral,
        DataType::Bool => TokenKind::BooleanLiteral,
        DataType::Byte => TokenKind::ByteLiteral,
        DataType::Short => TokenKind::ShortLiteral,
        DataType::Long => TokenKind::LongLiteral,
        DataType::Float => TokenKind::FloatLiteral,
        DataType::Double => TokenKind::DoubleLiteral,
        _ => TokenKind::IntegerLiteral,
    }
}

fn read_symbol(r: &mut Decoder) -> Result<Symbol, ObjectFileError> {
    let raw = r.u8()?;
    let symbol_type = SymbolType::from_u8(raw).ok_or(ObjectFileError::UnknownTag {
        what: "symbol",
        tag: u32::from(raw),
    })?;
    let index = r.i32()? as usize;
    let identifier = r.string()?;
    let scope = r.index()?.map(SymbolId);
    let count = r.u32()?;
    let mut children = Vec::new();
    for _ in 0..count {
        children.push(SymbolId(r.i32()? as usize));
    }

    let kind = match symbol_type {
        SymbolType::Function => {
            let parameter_count = r.u32()? as usize;
            let count = r.u32()?;
            let mut parameter_types = Vec::new();
            for _ in 0..count {
                parameter_types.push(r.data_type()?);
            }
            let return_type = r.data_type()?;
            let entry_point = r.index()?;
            let local_frame_size = r.u32()? as usize;
            let flags = FunctionFlags::from_bits_truncate(r.u8()?);
            let access = r.access()?;
            let used = r.bool()?;
            SymbolKind::Function(FunctionSymbol {
                parameter_count,
                parameter_types,
                return_type,
                entry_point,
                local_frame_size,
                flags,
                access,
                used,
                instructions: Vec::new(),
            })
        }
        SymbolType::Variable => {
            let raw = r.u8()?;
            let kind = VariableKind::from_u8(raw).ok_or(ObjectFileError::UnknownTag {
                what: "variable kind",
                tag: u32::from(raw),
            })?;
            let data_type = r.data_type()?;
            let is_constant = r.bool()?;
            let is_property = r.bool()?;
            let storage = match r.u8()? {
                0 => Storage::Stack(r.i32()?),
                1 => Storage::Memory(r.i32()?),
                tag => {
                    return Err(ObjectFileError::UnknownTag {
                        what: "storage",
                        tag: u32::from(tag),
                    })
                }
            };
            let literal = if r.bool()? {
                let kind = literal_kind(r.primitive()?);
                let text = r.string()?;
                let line = r.u32()? as usize;
                let offset = r.u32()? as usize;
                let file = r.string()?;
                Some(Token::new(kind, text, line, offset, &file))
            } else {
                None
            };
            let used = r.bool()?;
            let access = r.access()?;
            SymbolKind::Variable(VariableSymbol {
                kind,
                data_type,
                is_constant,
                is_property,
                storage,
                literal,
                used,
                access,
            })
        }
        SymbolType::State => SymbolKind::State(StateSymbol {
            is_engine_default: r.bool()?,
            is_editor_default: r.bool()?,
        }),
        SymbolType::Enumeration => SymbolKind::Enumeration,
        SymbolType::Namespace => SymbolKind::Namespace,
        SymbolType::String => SymbolKind::String,
        SymbolType::MetaData => SymbolKind::MetaData { value: r.string()? },
        SymbolType::JumpTarget => SymbolKind::JumpTarget { bound: r.index()? },
    };

    Ok(Symbol {
        index,
        identifier,
        scope,
        children,
        kind,
    })
}

fn read_operand(r: &mut Decoder) -> Result<Operand, ObjectFileError> {
    let raw = r.u8()?;
    let tag = OperandType::from_u8(raw).ok_or(ObjectFileError::UnknownTag {
        what: "operand",
        tag: u32::from(raw),
    })?;
    Ok(match tag {
        OperandType::BoolLiteral => Operand::BoolLiteral(r.bool()?),
        OperandType::ByteLiteral => Operand::ByteLiteral(r.u8()?),
        OperandType::ShortLiteral => Operand::ShortLiteral(i16::from_le_bytes(r.array()?)),
        OperandType::IntLiteral => Operand::IntLiteral(r.i32()?),
        OperandType::LongLiteral => Operand::LongLiteral(i64::from_le_bytes(r.array()?)),
        OperandType::FloatLiteral => Operand::FloatLiteral(f32::from_le_bytes(r.array()?)),
        OperandType::DoubleLiteral => Operand::DoubleLiteral(f64::from_le_bytes(r.array()?)),
        OperandType::StringLiteral => Operand::StringLiteral(r.string()?),
        OperandType::Register => Operand::Register(r.register()?),
        OperandType::RegisterPair => Operand::RegisterPair(r.register()?, r.register()?),
        OperandType::Stack => Operand::Stack(r.i32()?),
        OperandType::StackIndexed => Operand::StackIndexed(r.i32()?, r.register()?),
        OperandType::Memory => Operand::Memory(r.i32()?),
        OperandType::MemoryIndexed => Operand::MemoryIndexed(r.i32()?, r.register()?),
        OperandType::InstructionIndex => Operand::InstructionIndex(r.i32()?),
        OperandType::SymbolIndex => Operand::SymbolIndex(r.i32()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::tests::{compile_with, find, object};

    const SOURCE: &str = r#"
        const float SCALE = -1.5;
        string[] names;
        [author=me]
        state engine Main {
            event void Tick(object self) {
                self->(int)hp = 3;
                while (true) { break; }
                names = new string[] { "a", "b" };
            }
        }
        enum Flags { A, B }
    "#;

    fn debug_object() -> ObjectFile {
        let c = compile_with(SOURCE, CompileFlags::DEBUG);
        object(&c).clone()
    }

    #[test]
    fn test_roundtrip() {
        let original = debug_object();
        let bytes = original.to_bytes().unwrap();
        let read = ObjectFile::from_bytes(&bytes).unwrap();

        assert_eq!(read.flags, original.flags);
        assert_eq!(read.memory_size, original.memory_size);
        assert_eq!(read.default_engine_state, original.default_engine_state);
        assert_eq!(read.default_editor_state, None);
        assert_eq!(read.files, original.files);
        assert_eq!(read.instructions, original.instructions);
        assert_eq!(
            format!("{:?}", read.symbols),
            format!("{:?}", original.symbols)
        );
    }

    #[test]
    fn test_debug_table_only_in_debug_builds() {
        let debug = debug_object();
        let c = compile_with(SOURCE, CompileFlags::empty());
        let release = object(&c);
        let release_bytes = release.to_bytes().unwrap();
        assert!(release_bytes.len() < debug.to_bytes().unwrap().len());

        let read = ObjectFile::from_bytes(&release_bytes).unwrap();
        assert!(read.files.is_empty());
        assert!(read.instructions.iter().all(|i| i.line == 0));
    }

    #[test]
    fn test_header_layout() {
        let o = debug_object();
        let bytes = o.to_bytes().unwrap();
        assert_eq!(&bytes[..3], MAGIC);
        assert_eq!(u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]), 0x01);
        // editor state is absent
        assert_eq!(&bytes[27..31], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            ObjectFile::from_bytes(b"XYZ\0\0"),
            Err(ObjectFileError::BadMagic)
        ));
        let bytes = debug_object().to_bytes().unwrap();
        assert!(matches!(
            ObjectFile::from_bytes(&bytes[..bytes.len() - 1]),
            Err(ObjectFileError::Truncated)
        ));
    }

    #[test]
    fn test_unresolved_operand_is_refused() {
        let mut o = debug_object();
        o.instructions[0].operands.push(Operand::JumpTarget(SymbolId(0)));
        assert!(matches!(o.to_bytes(), Err(ObjectFileError::Unresolved(0))));
    }

    #[test]
    fn test_function_body_and_names() {
        let o = debug_object();
        let tick = find(&o, "Tick");
        let body = o.function_body(tick.index);
        assert_eq!(body.last().map(|i| i.opcode), Some(OpCode::Return));
        assert_eq!(o.qualified_name(tick.index), "Main.Tick");
        assert!(o.function_body(find(&o, "names").index).is_empty());
    }
}
