use std::collections::HashSet;
use std::fmt::Write;

use crate::bytecode::ir::{Instruction, Operand};
use crate::bytecode::object_file::ObjectFile;
use crate::lang::symbol::{FunctionFlags, SymbolKind};

/// Width the mnemonic column is padded to.
pub const MNEMONIC_WIDTH: usize = 20;

const RULE: &str = "════════════════════════════════════════";

/// Text listing of a whole object file: header, then each function body in
/// program order.
pub fn decompile(object: &ObjectFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; flags {:#x}", object.flags.bits());
    let _ = writeln!(
        out,
        "; {} symbols, {} instructions, {} memory slots",
        object.symbols.len(),
        object.instructions.len(),
        object.memory_size
    );
    if let Some(state) = object.default_engine_state {
        let _ = writeln!(out, "; engine state {}", object.qualified_name(state));
    }
    if let Some(state) = object.default_editor_state {
        let _ = writeln!(out, "; editor state {}", object.qualified_name(state));
    }
    for define in &object.defines {
        let _ = writeln!(out, "; define {} {}", define.identifier, define.value);
    }

    let landing = landing_sites(&object.instructions);

    let mut functions: Vec<(usize, usize)> = object
        .symbols
        .iter()
        .filter_map(|s| Some((s.as_function()?.entry_point?, s.index)))
        .collect();
    functions.sort();

    for (entry, index) in functions {
        let symbol = &object.symbols[index];
        let Some(f) = symbol.as_function() else {
            continue;
        };
        let name = match object.qualified_name(index) {
            n if n.is_empty() => symbol.identifier.clone(),
            n => n,
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(
            out,
            " {} {}  entry {}  frame {}  params {}",
            if f.flags.contains(FunctionFlags::EVENT) {
                "event"
            } else {
                "function"
            },
            name,
            entry,
            f.local_frame_size,
            f.parameter_count
        );
        let _ = writeln!(out, "{}", RULE);

        for (offset, instruction) in object.function_body(index).iter().enumerate() {
            let ip = entry + offset;
            let marker = if landing.contains(&ip) { "►" } else { " " };
            let _ = writeln!(
                out,
                "{:04} {} {}",
                ip,
                marker,
                format_instruction(object, instruction)
            );
        }
    }
    out
}

/// One instruction: padded mnemonic, then comma-separated operands.
pub fn format_instruction(object: &ObjectFile, instruction: &Instruction) -> String {
    if instruction.operands.is_empty() {
        return instruction.opcode.mnemonic().to_string();
    }
    let operands: Vec<String> = instruction
        .operands
        .iter()
        .map(|op| format_operand(object, op))
        .collect();
    format!(
        "{:<width$}{}",
        instruction.opcode.mnemonic(),
        operands.join(", "),
        width = MNEMONIC_WIDTH
    )
}

/// Symbol references print as the string they intern or the name they
/// declare; everything else uses the operand's own rendering.
pub fn format_operand(object: &ObjectFile, operand: &Operand) -> String {
    let Operand::SymbolIndex(index) = *operand else {
        return operand.to_string();
    };
    let symbol = usize::try_from(index).ok().and_then(|i| object.symbols.get(i));
    match symbol {
        Some(s) if matches!(s.kind, SymbolKind::String) => {
            format!("\"{}\"", s.identifier.escape_default())
        }
        Some(s) => object.qualified_name(s.index),
        None => operand.to_string(),
    }
}

fn landing_sites(instructions: &[Instruction]) -> HashSet<usize> {
    instructions
        .iter()
        .filter(|i| i.opcode.is_jump())
        .filter_map(|i| match i.operands.first() {
            Some(Operand::InstructionIndex(at)) => usize::try_from(*at).ok(),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::tests::{compile_library, compile_unoptimized, find, object};
    use crate::bytecode::ir::Register;
    use crate::bytecode::OpCode;

    #[test]
    fn test_mnemonic_is_padded() {
        let c = compile_library("void f() { }");
        let o = object(&c);
        let mut i = Instruction::new(OpCode::MovInt);
        i.operands = vec![Operand::Memory(0), Operand::IntLiteral(5)];
        let line = format_instruction(o, &i);
        assert!(line.starts_with("MOV_INT"));
        assert_eq!(&line[MNEMONIC_WIDTH..], "memory[0], 5");
        assert_eq!(format_instruction(o, &Instruction::new(OpCode::Return)), "RETURN");
    }

    #[test]
    fn test_symbol_operands_are_named() {
        let c = compile_library("string s = \"hey\"; void g() { } void f() { g(); }");
        let o = object(&c);
        let g = find(o, "g").index as i32;
        assert_eq!(format_operand(o, &Operand::SymbolIndex(g)), "g");
        let hey = find(o, "hey").index as i32;
        assert_eq!(format_operand(o, &Operand::SymbolIndex(hey)), "\"hey\"");
        assert_eq!(
            format_operand(o, &Operand::Register(Register::Op2)),
            "op2"
        );
    }

    #[test]
    fn test_listing_marks_jump_destinations() {
        let c = compile_unoptimized("void f(bool c) { while (c) { } }");
        let o = object(&c);
        let text = decompile(o);
        assert!(text.contains(" f  entry"));
        assert!(text.contains("►"));
        assert!(text.contains("JMP_EQ"));
        assert!(text.lines().any(|l| l.ends_with("RETURN")));
    }
}
