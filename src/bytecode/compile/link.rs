//! Flattening of the symbol tree into one linear program.

use std::collections::HashMap;

use super::Compiler;
use crate::bytecode::compile_error::Abort;
use crate::bytecode::ir::Operand;
use crate::bytecode::object_file::ObjectFile;
use crate::lang::diagnostic::ErrorCode;
use crate::lang::symbol::{FunctionFlags, Symbol, SymbolId, SymbolKind};

impl Compiler {
    /// Lays out every function body back to back and replaces symbol and
    /// jump placeholders with flat indices.
    ///
    /// Symbols are numbered in pre-order, the global scope first and the
    /// member scope after it.
    pub(super) fn link(&mut self) -> Result<ObjectFile, Abort> {
        let order = self.symbols.preorder(&[self.global_scope, self.member_scope]);
        let mut flat = vec![0usize; self.symbols.len()];
        for (i, id) in order.iter().enumerate() {
            flat[id.0] = i;
        }

        let mut entries: HashMap<SymbolId, usize> = HashMap::new();
        let mut instructions = Vec::new();
        for &id in &order {
            let Some(f) = self.symbols.get_mut(id).as_function_mut() else {
                continue;
            };
            if f.flags
                .intersects(FunctionFlags::IMPORT | FunctionFlags::MEMBER_CALL)
            {
                continue;
            }
            entries.insert(id, instructions.len());
            instructions.append(&mut f.instructions);
        }

        for instruction in &mut instructions {
            for operand in &mut instruction.operands {
                match *operand {
                    Operand::Symbol(id) => *operand = Operand::SymbolIndex(flat[id.0] as i32),
                    Operand::JumpTarget(id) => match self.destination(id, &entries) {
                        Some(at) => *operand = Operand::InstructionIndex(at as i32),
                        None => {
                            return Err(self.fatal(
                                ErrorCode::InternalError,
                                format!("jump target {} was never bound", id.0),
                            ))
                        }
                    },
                    _ => {}
                }
            }
        }

        let symbols: Vec<Symbol> = order
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let mut symbol = self.symbols.get(id).clone();
                symbol.index = i;
                symbol.scope = symbol.scope.map(|s| SymbolId(flat[s.0]));
                symbol.children = symbol.children.iter().map(|c| SymbolId(flat[c.0])).collect();
                match &mut symbol.kind {
                    SymbolKind::Function(f) => f.entry_point = entries.get(&id).copied(),
                    SymbolKind::JumpTarget { bound } => *bound = self.destination(id, &entries),
                    _ => {}
                }
                symbol
            })
            .collect();

        Ok(ObjectFile {
            flags: self.options.flags,
            internal_variable_count: self.internal_variable_count,
            memory_size: self.memory_size,
            global_scope: flat[self.global_scope.0],
            member_scope: flat[self.member_scope.0],
            default_engine_state: self.default_engine_state.map(|s| flat[s.0]),
            default_editor_state: self.default_editor_state.map(|s| flat[s.0]),
            defines: self.options.defines.clone(),
            symbols,
            files: self.files.clone(),
            instructions,
        })
    }

    /// Program-wide index a jump target was bound to.
    fn destination(&self, target: SymbolId, entries: &HashMap<SymbolId, usize>) -> Option<usize> {
        let symbol = self.symbols.get(target);
        let SymbolKind::JumpTarget { bound: Some(bound) } = symbol.kind else {
            return None;
        };
        let entry = entries.get(&symbol.scope?)?;
        Some(entry + bound)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{compile_unoptimized, find, object};
    use crate::bytecode::ir::Operand;
    use crate::bytecode::OpCode;
    use crate::lang::symbol::{SymbolId, SymbolKind};

    #[test]
    fn test_bodies_are_laid_out_in_order() {
        let c = compile_unoptimized("void a() { } void b() { }");
        let o = object(&c);
        let entry = |name: &str| find(o, name).as_function().and_then(|f| f.entry_point);
        assert_eq!(entry("$global"), Some(0));
        assert_eq!(entry("a"), Some(1));
        assert_eq!(entry("b"), Some(2));
        assert_eq!(o.instructions.len(), 3);
    }

    #[test]
    fn test_jumps_are_program_wide() {
        let c = compile_unoptimized("void a() { } void b(bool c) { while (c) { } }");
        let o = object(&c);
        let entry = find(o, "b").as_function().and_then(|f| f.entry_point);
        let entry = entry.unwrap_or_default() as i32;
        for i in o.function_body(find(o, "b").index) {
            if i.opcode.is_jump() {
                match i.operands[0] {
                    Operand::InstructionIndex(at) => assert!(at >= entry),
                    ref other => panic!("unresolved jump operand {:?}", other),
                }
            }
        }
        let targets = o
            .symbols
            .iter()
            .filter(|s| matches!(s.kind, SymbolKind::JumpTarget { bound: Some(_) }))
            .count();
        assert_eq!(targets, 2);
    }

    #[test]
    fn test_imports_have_no_entry_point() {
        let c = compile_unoptimized("import int now(); void f() { int t = now(); t = t + 1; }");
        let o = object(&c);
        assert_eq!(find(o, "now").as_function().and_then(|f| f.entry_point), None);
    }

    #[test]
    fn test_scopes_are_remapped() {
        let c = compile_unoptimized("namespace N { int x; }");
        let o = object(&c);
        let n = find(o, "N");
        let x = find(o, "x");
        assert_eq!(x.scope, Some(SymbolId(n.index)));
        assert_eq!(n.children, vec![SymbolId(x.index)]);
        assert_eq!(o.symbols[o.global_scope].identifier, "$global");
        assert_eq!(o.symbols[o.member_scope].identifier, "$member");
    }

    #[test]
    fn test_calls_reference_flat_index() {
        let c = compile_unoptimized("void g() { } void f() { g(); }");
        let o = object(&c);
        let g = find(o, "g").index as i32;
        let call = o
            .function_body(find(o, "f").index)
            .iter()
            .find(|i| i.opcode == OpCode::Call)
            .map(|i| i.operands[0].clone());
        assert_eq!(call, Some(Operand::SymbolIndex(g)));
    }
}
