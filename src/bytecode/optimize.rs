//! Peephole optimizer over the linked instruction list.
//!
//! Rewrites adjacent pairs until a full pass changes nothing:
//!
//! - `PUSH_T x; POP_T y` becomes `MOV_T y, x`
//! - `PUSH_NULL; POP_T y` becomes `MOV_NULL y`
//! - `PUSH_T x; POP_DESTROY` disappears
//!
//! A pair whose second instruction is reached by a jump or is a function
//! entry point is left alone. Emptied slots become `NOP`s, which are then
//! removed while every instruction index in operands and symbols is shifted.

use std::collections::HashSet;

use crate::bytecode::ir::{Instruction, Operand};
use crate::bytecode::op::{is_pop, is_push, push_to_mov};
use crate::bytecode::OpCode;
use crate::lang::symbol::{Symbol, SymbolKind};

/// Optimizes `instructions` in place and returns the number of rewrites.
pub fn optimize(instructions: &mut Vec<Instruction>, symbols: &mut [Symbol]) -> usize {
    let mut total = 0;
    loop {
        let rewrites = fuse_pairs(instructions, symbols);
        if rewrites == 0 {
            break;
        }
        remove_nops(instructions, symbols);
        total += rewrites;
    }
    total
}

/// Instruction indices control can arrive at from somewhere other than the
/// previous instruction.
fn landing_sites(instructions: &[Instruction], symbols: &[Symbol]) -> HashSet<usize> {
    let mut sites = HashSet::new();
    for instruction in instructions {
        for operand in &instruction.operands {
            if let Operand::InstructionIndex(at) = *operand {
                if let Ok(at) = usize::try_from(at) {
                    sites.insert(at);
                }
            }
        }
    }
    for symbol in symbols {
        match &symbol.kind {
            SymbolKind::Function(f) => sites.extend(f.entry_point),
            SymbolKind::JumpTarget { bound } => sites.extend(*bound),
            _ => {}
        }
    }
    sites
}

fn nop(at: &Instruction) -> Instruction {
    Instruction::new(OpCode::Nop).at(at.line, at.offset, at.file)
}

fn fuse_pairs(instructions: &mut [Instruction], symbols: &[Symbol]) -> usize {
    let sites = landing_sites(instructions, symbols);
    let mut rewrites = 0;
    let mut i = 0;
    while i + 1 < instructions.len() {
        if sites.contains(&(i + 1)) {
            i += 1;
            continue;
        }
        let (first, second) = (instructions[i].opcode, instructions[i + 1].opcode);

        let replacement = if is_push(first) && second == OpCode::PopDestroy {
            Some(nop(&instructions[i]))
        } else if first == OpCode::PushNull && is_pop(second) && second != OpCode::PopDestroy {
            let destination = instructions[i + 1].operands.first().cloned();
            destination.map(|d| {
                let mut mov = instructions[i].clone();
                mov.opcode = OpCode::MovNull;
                mov.operands = vec![d];
                mov
            })
        } else {
            match push_to_mov(first) {
                Some((pop, mov)) if pop == second => {
                    let source = instructions[i].operands.first().cloned();
                    let destination = instructions[i + 1].operands.first().cloned();
                    source.zip(destination).map(|(s, d)| {
                        let mut fused = instructions[i].clone();
                        fused.opcode = mov;
                        fused.operands = vec![d, s];
                        fused
                    })
                }
                _ => None,
            }
        };

        match replacement {
            Some(instruction) => {
                instructions[i + 1] = nop(&instructions[i + 1]);
                instructions[i] = instruction;
                rewrites += 1;
                i += 2;
            }
            None => i += 1,
        }
    }
    rewrites
}

/// Drops `NOP`s and renumbers everything that points into the list.
///
/// A reference to a removed instruction moves to the next surviving one.
fn remove_nops(instructions: &mut Vec<Instruction>, symbols: &mut [Symbol]) {
    let mut remap = Vec::with_capacity(instructions.len() + 1);
    let mut kept = 0usize;
    for instruction in instructions.iter() {
        remap.push(kept);
        if instruction.opcode != OpCode::Nop {
            kept += 1;
        }
    }
    remap.push(kept);
    if kept == instructions.len() {
        return;
    }

    let shift = |at: usize| remap.get(at).copied().unwrap_or(kept);
    instructions.retain(|i| i.opcode != OpCode::Nop);
    for instruction in instructions.iter_mut() {
        for operand in &mut instruction.operands {
            if let Operand::InstructionIndex(at) = operand {
                if let Ok(old) = usize::try_from(*at) {
                    *at = shift(old) as i32;
                }
            }
        }
    }
    for symbol in symbols.iter_mut() {
        match &mut symbol.kind {
            SymbolKind::Function(f) => f.entry_point = f.entry_point.map(shift),
            SymbolKind::JumpTarget { bound } => *bound = bound.map(shift),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::Register;
    use crate::lang::symbol::{FunctionSymbol, SymbolId};
    use proptest::prelude::*;

    fn ins(opcode: OpCode, operands: Vec<Operand>) -> Instruction {
        let mut i = Instruction::new(opcode);
        i.operands = operands;
        i
    }

    fn function(entry: usize) -> Symbol {
        Symbol {
            index: 0,
            identifier: "f".to_string(),
            scope: Some(SymbolId(0)),
            children: Vec::new(),
            kind: SymbolKind::Function(FunctionSymbol {
                entry_point: Some(entry),
                ..FunctionSymbol::default()
            }),
        }
    }

    fn opcodes(instructions: &[Instruction]) -> Vec<OpCode> {
        instructions.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_push_pop_becomes_mov() {
        let mut code = vec![
            ins(OpCode::PushInt, vec![Operand::IntLiteral(5)]),
            ins(OpCode::PopInt, vec![Operand::Memory(0)]),
            ins(OpCode::Return, vec![]),
        ];
        assert_eq!(optimize(&mut code, &mut []), 1);
        assert_eq!(opcodes(&code), vec![OpCode::MovInt, OpCode::Return]);
        assert_eq!(
            code[0].operands,
            vec![Operand::Memory(0), Operand::IntLiteral(5)]
        );
    }

    #[test]
    fn test_mismatched_types_are_kept() {
        let mut code = vec![
            ins(OpCode::PushInt, vec![Operand::IntLiteral(5)]),
            ins(OpCode::PopFloat, vec![Operand::Memory(0)]),
        ];
        assert_eq!(optimize(&mut code, &mut []), 0);
        assert_eq!(code.len(), 2);
    }

    #[test]
    fn test_push_null_becomes_mov_null() {
        let mut code = vec![
            ins(OpCode::PushNull, vec![]),
            ins(OpCode::PopObject, vec![Operand::Stack(-1)]),
        ];
        assert_eq!(optimize(&mut code, &mut []), 1);
        assert_eq!(opcodes(&code), vec![OpCode::MovNull]);
        assert_eq!(code[0].operands, vec![Operand::Stack(-1)]);
    }

    #[test]
    fn test_discarded_push_is_removed() {
        let mut code = vec![
            ins(OpCode::Call, vec![Operand::SymbolIndex(3)]),
            ins(OpCode::PushInt, vec![Operand::Register(Register::Return)]),
            ins(OpCode::PopDestroy, vec![]),
            ins(OpCode::Return, vec![]),
        ];
        assert_eq!(optimize(&mut code, &mut []), 1);
        assert_eq!(opcodes(&code), vec![OpCode::Call, OpCode::Return]);
    }

    #[test]
    fn test_jump_destination_is_protected() {
        let mut code = vec![
            ins(OpCode::Jmp, vec![Operand::InstructionIndex(2)]),
            ins(OpCode::PushInt, vec![Operand::IntLiteral(1)]),
            ins(OpCode::PopInt, vec![Operand::Memory(0)]),
            ins(OpCode::Return, vec![]),
        ];
        assert_eq!(optimize(&mut code, &mut []), 0);
        assert_eq!(code.len(), 4);
    }

    #[test]
    fn test_indices_are_renumbered() {
        let mut code = vec![
            ins(OpCode::PushInt, vec![Operand::IntLiteral(1)]),
            ins(OpCode::PopInt, vec![Operand::Memory(0)]),
            ins(OpCode::Jmp, vec![Operand::InstructionIndex(4)]),
            ins(OpCode::Return, vec![]),
            ins(OpCode::PushInt, vec![Operand::IntLiteral(2)]),
            ins(OpCode::PopFloat, vec![Operand::Memory(1)]),
            ins(OpCode::Return, vec![]),
        ];
        let mut symbols = vec![
            function(0),
            function(4),
            Symbol {
                index: 2,
                identifier: "$target".to_string(),
                scope: Some(SymbolId(1)),
                children: Vec::new(),
                kind: SymbolKind::JumpTarget { bound: Some(6) },
            },
        ];
        assert_eq!(optimize(&mut code, &mut symbols), 1);
        assert_eq!(
            opcodes(&code),
            vec![
                OpCode::MovInt,
                OpCode::Jmp,
                OpCode::Return,
                OpCode::PushInt,
                OpCode::PopFloat,
                OpCode::Return
            ]
        );
        assert_eq!(code[1].operands, vec![Operand::InstructionIndex(3)]);
        let entry = symbols[1].as_function().and_then(|f| f.entry_point);
        assert_eq!(entry, Some(3));
        assert!(matches!(symbols[2].kind, SymbolKind::JumpTarget { bound: Some(5) }));
    }

    fn arb_instruction(len: usize) -> impl Strategy<Value = Instruction> {
        prop_oneof![
            (0i32..4).prop_map(|v| ins(OpCode::PushInt, vec![Operand::IntLiteral(v)])),
            (0i32..4).prop_map(|m| ins(OpCode::PopInt, vec![Operand::Memory(m)])),
            (0i32..4).prop_map(|m| ins(OpCode::PushFloat, vec![Operand::Memory(m)])),
            (0i32..4).prop_map(|m| ins(OpCode::PopFloat, vec![Operand::Memory(m)])),
            Just(ins(OpCode::PushNull, vec![])),
            (0i32..4).prop_map(|s| ins(OpCode::PopObject, vec![Operand::Stack(-1 - s)])),
            Just(ins(OpCode::PopDestroy, vec![])),
            Just(ins(OpCode::Return, vec![])),
            (0..len).prop_map(|t| ins(OpCode::Jmp, vec![Operand::InstructionIndex(t as i32)])),
        ]
    }

    fn arb_program() -> impl Strategy<Value = Vec<Instruction>> {
        (1usize..40).prop_flat_map(|len| prop::collection::vec(arb_instruction(len), len))
    }

    proptest! {
        #[test]
        fn test_optimize_is_idempotent(mut code in arb_program()) {
            optimize(&mut code, &mut []);
            let once = code.clone();
            prop_assert_eq!(optimize(&mut code, &mut []), 0);
            prop_assert_eq!(code, once);
        }

        #[test]
        fn test_jumps_stay_in_range(mut code in arb_program()) {
            let before = code.len();
            optimize(&mut code, &mut []);
            prop_assert!(code.len() <= before);
            for instruction in &code {
                if let Some(Operand::InstructionIndex(at)) = instruction.operands.first() {
                    prop_assert!((*at as usize) <= code.len());
                }
            }
        }
    }
}
