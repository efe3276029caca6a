//! Declarations and the scope tree they form.
//!
//! Symbols live in a single arena (`SymbolTable`) and refer to each other by
//! `SymbolId`. Each symbol knows its owning scope and the ordered list of
//! declarations nested inside it; `index` is the position inside the owner's
//! list until the program is linked, after which it is the flat index.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::bytecode::Instruction;
use crate::frontend::token::Token;
use crate::lang::data_type::DataTypeValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub usize);

/// Serialized tag of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SymbolType {
    Function = 0,
    Variable = 1,
    State = 2,
    Enumeration = 3,
    Namespace = 4,
    String = 5,
    MetaData = 6,
    JumpTarget = 7,
}

impl SymbolType {
    pub fn from_u8(value: u8) -> Option<SymbolType> {
        use SymbolType::*;
        Some(match value {
            0 => Function,
            1 => Variable,
            2 => State,
            3 => Enumeration,
            4 => Namespace,
            5 => String,
            6 => MetaData,
            7 => JumpTarget,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AccessModifier {
    #[default]
    Public = 0,
    Private = 1,
    Protected = 2,
}

impl AccessModifier {
    pub fn from_u8(value: u8) -> Option<AccessModifier> {
        Some(match value {
            0 => AccessModifier::Public,
            1 => AccessModifier::Private,
            2 => AccessModifier::Protected,
            _ => return None,
        })
    }
}

bitflags! {
    #[derive(Default)]
    pub struct FunctionFlags: u8 {
        /// Calling the function spawns a new VM execution context.
        const THREAD = 0x01;
        /// Handler inside a `state` block.
        const EVENT = 0x02;
        /// Callable from the host console.
        const CONSOLE = 0x04;
        /// Signature only; implemented natively by the host.
        const IMPORT = 0x08;
        /// Visible to other compilation units.
        const EXPORT = 0x10;
        /// Lazily declared method reached through `->`.
        const MEMBER_CALL = 0x20;
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionSymbol {
    pub parameter_count: usize,
    /// Declared parameter types in order; the overload key.
    pub parameter_types: Vec<DataTypeValue>,
    pub return_type: DataTypeValue,
    /// First instruction in the linked program, `None` for bodiless functions.
    pub entry_point: Option<usize>,
    pub local_frame_size: usize,
    pub flags: FunctionFlags,
    pub access: AccessModifier,
    pub used: bool,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariableKind {
    Parameter = 0,
    Constant = 1,
    Local = 2,
    Global = 3,
    Member = 4,
}

impl VariableKind {
    pub fn from_u8(value: u8) -> Option<VariableKind> {
        Some(match value {
            0 => VariableKind::Parameter,
            1 => VariableKind::Constant,
            2 => VariableKind::Local,
            3 => VariableKind::Global,
            4 => VariableKind::Member,
            _ => return None,
        })
    }

    /// Globals and constants live in memory slots, everything else on the stack.
    pub fn uses_memory(self) -> bool {
        matches!(self, VariableKind::Global | VariableKind::Constant)
    }
}

/// Where a variable's value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Offset relative to the frame register; always negative.
    Stack(i32),
    /// Global memory slot.
    Memory(i32),
}

#[derive(Debug, Clone)]
pub struct VariableSymbol {
    pub kind: VariableKind,
    pub data_type: DataTypeValue,
    pub is_constant: bool,
    pub is_property: bool,
    pub storage: Storage,
    /// Literal initializer of a constant, folded into each use.
    pub literal: Option<Token>,
    pub used: bool,
    pub access: AccessModifier,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StateSymbol {
    pub is_engine_default: bool,
    pub is_editor_default: bool,
}

#[derive(Debug, Clone)]
pub enum SymbolKind {
    Function(FunctionSymbol),
    Variable(VariableSymbol),
    State(StateSymbol),
    Enumeration,
    Namespace,
    /// Interned string literal; the text is the identifier.
    String,
    MetaData { value: String },
    JumpTarget { bound: Option<usize> },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub index: usize,
    pub identifier: String,
    pub scope: Option<SymbolId>,
    pub children: Vec<SymbolId>,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn symbol_type(&self) -> SymbolType {
        match self.kind {
            SymbolKind::Function(_) => SymbolType::Function,
            SymbolKind::Variable(_) => SymbolType::Variable,
            SymbolKind::State(_) => SymbolType::State,
            SymbolKind::Enumeration => SymbolType::Enumeration,
            SymbolKind::Namespace => SymbolType::Namespace,
            SymbolKind::String => SymbolType::String,
            SymbolKind::MetaData { .. } => SymbolType::MetaData,
            SymbolKind::JumpTarget { .. } => SymbolType::JumpTarget,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionSymbol> {
        match &self.kind {
            SymbolKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionSymbol> {
        match &mut self.kind {
            SymbolKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&VariableSymbol> {
        match &self.kind {
            SymbolKind::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_variable_mut(&mut self) -> Option<&mut VariableSymbol> {
        match &mut self.kind {
            SymbolKind::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Symbols that may contain further named declarations.
    pub fn is_container(&self) -> bool {
        matches!(
            self.kind,
            SymbolKind::Function(_)
                | SymbolKind::State(_)
                | SymbolKind::Enumeration
                | SymbolKind::Namespace
        )
    }
}

/// Arena of every symbol in one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Inserts a symbol as the last child of `scope`.
    pub fn add(
        &mut self,
        scope: Option<SymbolId>,
        identifier: impl Into<String>,
        kind: SymbolKind,
    ) -> SymbolId {
        let id = SymbolId(self.symbols.len());
        let index = match scope {
            Some(owner) => {
                let children = &mut self.symbols[owner.0].children;
                children.push(id);
                children.len() - 1
            }
            None => 0,
        };
        self.symbols.push(Symbol {
            index,
            identifier: identifier.into(),
            scope,
            children: Vec::new(),
            kind,
        });
        id
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i), s))
    }

    /// First direct child of `scope` named `identifier` accepted by `filter`.
    pub fn find_child(
        &self,
        scope: SymbolId,
        identifier: &str,
        filter: impl Fn(&Symbol) -> bool,
    ) -> Option<SymbolId> {
        self.get(scope)
            .children
            .iter()
            .copied()
            .find(|&c| {
                let s = self.get(c);
                s.identifier == identifier && filter(s)
            })
    }

    /// Every direct child of `scope` named `identifier` accepted by `filter`.
    pub fn find_children(
        &self,
        scope: SymbolId,
        identifier: &str,
        filter: impl Fn(&Symbol) -> bool,
    ) -> Vec<SymbolId> {
        self.get(scope)
            .children
            .iter()
            .copied()
            .filter(|&c| {
                let s = self.get(c);
                s.identifier == identifier && filter(s)
            })
            .collect()
    }

    /// Pre-order walk of the trees rooted at `roots`.
    pub fn preorder(&self, roots: &[SymbolId]) -> Vec<SymbolId> {
        let mut order = Vec::with_capacity(self.symbols.len());
        let mut stack: Vec<SymbolId> = roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        order
    }

    /// Dotted path of a symbol from its outermost named scope.
    pub fn qualified_name(&self, id: SymbolId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let s = self.get(c);
            if s.scope.is_some() {
                parts.push(s.identifier.as_str());
            }
            cur = s.scope;
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn into_symbols(self) -> Vec<Symbol> {
        self.symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(t: &mut SymbolTable, scope: Option<SymbolId>, name: &str) -> SymbolId {
        t.add(scope, name, SymbolKind::Namespace)
    }

    #[test]
    fn test_index_is_position_in_scope() {
        let mut t = SymbolTable::new();
        let root = namespace(&mut t, None, "$global");
        let a = namespace(&mut t, Some(root), "a");
        let b = namespace(&mut t, Some(root), "b");
        let c = namespace(&mut t, Some(a), "c");
        assert_eq!(t.get(a).index, 0);
        assert_eq!(t.get(b).index, 1);
        assert_eq!(t.get(c).index, 0);
        assert_eq!(t.get(c).scope, Some(a));
        assert_eq!(t.get(root).children, vec![a, b]);
    }

    #[test]
    fn test_preorder() {
        let mut t = SymbolTable::new();
        let root = namespace(&mut t, None, "$global");
        let a = namespace(&mut t, Some(root), "a");
        let b = namespace(&mut t, Some(root), "b");
        let c = namespace(&mut t, Some(a), "c");
        let member = namespace(&mut t, None, "$member");
        assert_eq!(t.preorder(&[root, member]), vec![root, a, c, b, member]);
    }

    #[test]
    fn test_find_child_with_filter() {
        let mut t = SymbolTable::new();
        let root = namespace(&mut t, None, "$global");
        t.add(Some(root), "x", SymbolKind::Enumeration);
        let ns = namespace(&mut t, Some(root), "x");
        let found = t.find_child(root, "x", |s| matches!(s.kind, SymbolKind::Namespace));
        assert_eq!(found, Some(ns));
        assert_eq!(t.find_children(root, "x", |_| true).len(), 2);
        assert!(t.find_child(root, "y", |_| true).is_none());
    }

    #[test]
    fn test_qualified_name() {
        let mut t = SymbolTable::new();
        let root = namespace(&mut t, None, "$global");
        let a = namespace(&mut t, Some(root), "Game");
        let b = namespace(&mut t, Some(a), "Math");
        assert_eq!(t.qualified_name(b), "Game.Math");
    }
}
