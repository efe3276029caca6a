use std::mem::replace;

use super::cast::{can_implicitly_cast, is_console_parameter};
use super::{Compiler, Role};
use crate::bytecode::compile_error::Abort;
use crate::bytecode::op::OpCode;
use crate::frontend::token::{Token, TokenKind};
use crate::lang::data_type::{DataType, DataTypeValue};
use crate::lang::diagnostic::ErrorCode;
use crate::lang::symbol::{
    AccessModifier, FunctionFlags, FunctionSymbol, StateSymbol, Storage, SymbolId, SymbolKind,
    VariableKind, VariableSymbol,
};

/// Modifiers written in front of a declaration.
#[derive(Debug, Default)]
struct Modifiers {
    is_static: bool,
    is_const: bool,
    is_property: bool,
    access: Option<AccessModifier>,
    flags: FunctionFlags,
}

fn is_modifier(kind: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        kind,
        Static | Const | Property | Public | Private | Protected | Thread | Event | Console
            | Import | Export
    )
}

fn function_flag(kind: TokenKind) -> FunctionFlags {
    match kind {
        TokenKind::Thread => FunctionFlags::THREAD,
        TokenKind::Event => FunctionFlags::EVENT,
        TokenKind::Console => FunctionFlags::CONSOLE,
        TokenKind::Import => FunctionFlags::IMPORT,
        _ => FunctionFlags::EXPORT,
    }
}

fn access_modifier(kind: TokenKind) -> AccessModifier {
    match kind {
        TokenKind::Private => AccessModifier::Private,
        TokenKind::Protected => AccessModifier::Protected,
        _ => AccessModifier::Public,
    }
}

/// A parameter as written: type, name and the name's token index.
type Parameter = (DataTypeValue, Token, usize);

impl Compiler {
    pub(super) fn starts_declaration(&self) -> bool {
        match self.peek_kind() {
            Some(kind) => is_modifier(kind) || kind.data_type().is_some(),
            None => false,
        }
    }

    /// Variable or function declaration, told apart by the `(` after the name.
    pub(super) fn declaration(&mut self) -> Result<(), Abort> {
        let modifiers = self.modifiers()?;
        let data_type = self.type_specifier()?;
        let name = self.expect_identifier()?;
        let name_index = self.pos - 1;

        if self.check(TokenKind::LParen) {
            self.function_declaration(modifiers, data_type, name, name_index)
        } else {
            self.variable_declarations(modifiers, data_type, name, name_index)
        }
    }

    fn modifiers(&mut self) -> Result<Modifiers, Abort> {
        use TokenKind::*;

        let mut modifiers = Modifiers::default();
        while let Some(kind) = self.peek_kind() {
            if !is_modifier(kind) {
                break;
            }
            let index = self.pos;
            self.pos += 1;
            let repeated = match kind {
                Static => replace(&mut modifiers.is_static, true),
                Const => replace(&mut modifiers.is_const, true),
                Property => replace(&mut modifiers.is_property, true),
                Public | Private | Protected => {
                    modifiers.access.replace(access_modifier(kind)).is_some()
                }
                _ => {
                    let flag = function_flag(kind);
                    let had = modifiers.flags.contains(flag);
                    modifiers.flags.insert(flag);
                    had
                }
            };
            if repeated {
                return Err(self.reject(
                    index,
                    ErrorCode::InvalidFlags,
                    format!("modifier {} conflicts with an earlier one", kind.describe()),
                ));
            }
        }
        Ok(modifiers)
    }

    /// `Type` or `Type[]`.
    pub(super) fn type_specifier(&mut self) -> Result<DataTypeValue, Abort> {
        let Some(data_type) = self.peek_kind().and_then(|k| k.data_type()) else {
            return Err(self.unexpected("where a type was expected"));
        };
        self.pos += 1;
        let is_array =
            self.check(TokenKind::LBracket) && self.peek_kind_at(1) == Some(TokenKind::RBracket);
        if is_array {
            self.pos += 2;
        }
        Ok(DataTypeValue::new(data_type, is_array, false))
    }

    /// A single literal, optionally negated, followed by one of `terminators`.
    ///
    /// Consumes the literal (not the terminator) and returns it with the sign
    /// folded into its text.
    pub(super) fn folded_literal(&mut self, terminators: &[TokenKind]) -> Option<Token> {
        let negative = self.check(TokenKind::Minus);
        let at = self.pos + usize::from(negative);
        let token = self.tokens.get(at)?;
        if !token.kind.is_literal() {
            return None;
        }
        let numeric = token
            .kind
            .literal_type()
            .is_some_and(|t| t.is_numeric());
        if negative && !numeric {
            return None;
        }
        let next = self.tokens.get(at + 1).map(|t| t.kind)?;
        if !terminators.contains(&next) {
            return None;
        }

        let mut literal = token.clone();
        if negative {
            literal.text = format!("-{}", literal.text);
        }
        self.pos = at + 1;
        Some(literal)
    }

    // =========================================================================
    // Variables
    // =========================================================================

    fn variable_declarations(
        &mut self,
        modifiers: Modifiers,
        data_type: DataTypeValue,
        mut name: Token,
        mut name_index: usize,
    ) -> Result<(), Abort> {
        if !modifiers.flags.is_empty() {
            return Err(self.reject(
                name_index,
                ErrorCode::InvalidFlags,
                "function modifiers cannot be applied to variables",
            ));
        }
        loop {
            self.variable(&modifiers, data_type, &name, name_index)?;
            if !self.eat(TokenKind::Comma) {
                break;
            }
            name = self.expect_identifier()?;
            name_index = self.pos - 1;
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(())
    }

    fn variable(
        &mut self,
        modifiers: &Modifiers,
        data_type: DataTypeValue,
        name: &Token,
        name_index: usize,
    ) -> Result<(), Abort> {
        let in_function = self.in_function();
        let kind = if modifiers.is_const {
            VariableKind::Constant
        } else if in_function && !modifiers.is_static {
            VariableKind::Local
        } else {
            VariableKind::Global
        };

        if !self.emitting() {
            self.check_variable(modifiers, data_type, name, name_index)?;
        }

        let owner = if in_function { self.function } else { self.scope };
        let id = self.keyed(name_index, Role::Declaration, |c| {
            let storage = if kind.uses_memory() {
                Storage::Memory(c.allocate_memory())
            } else {
                let ordinal = c.local_count as i32;
                c.local_count += 1;
                Storage::Stack(ordinal)
            };
            let id = c.symbols.add(
                Some(owner),
                name.text.clone(),
                SymbolKind::Variable(VariableSymbol {
                    kind,
                    data_type,
                    is_constant: modifiers.is_const,
                    is_property: modifiers.is_property,
                    storage,
                    literal: None,
                    used: false,
                    access: modifiers.access.unwrap_or_default(),
                }),
            );
            c.attach_metadata(id);
            id
        })?;
        if in_function {
            self.make_visible(id);
        }

        if !self.eat(TokenKind::Assign) {
            if modifiers.is_const {
                return Err(self.error_at(
                    name_index,
                    ErrorCode::IllegalAssignment,
                    format!("constant '{}' needs an initial value", name.text),
                ));
            }
            return Ok(());
        }

        if modifiers.is_const {
            let at = self.pos;
            if let Some(literal) = self.folded_literal(&[TokenKind::Semicolon, TokenKind::Comma]) {
                return self.fold_constant(id, literal, data_type, at);
            }
        }

        // memory-backed variables declared inside a function still initialise once
        let redirect = kind.uses_memory() && in_function;
        let saved = self.function;
        if redirect {
            self.function = self.global_scope;
        }
        let result = self.initializer(id);
        self.function = saved;
        result
    }

    fn check_variable(
        &mut self,
        modifiers: &Modifiers,
        data_type: DataTypeValue,
        name: &Token,
        name_index: usize,
    ) -> Result<(), Abort> {
        if data_type.data_type == DataType::Void {
            return Err(self.reject(
                name_index,
                ErrorCode::InvalidCast,
                format!("variable '{}' cannot be void", name.text),
            ));
        }
        if self.in_function() && (modifiers.is_property || modifiers.access.is_some()) {
            return Err(self.reject(
                name_index,
                ErrorCode::InvalidFlags,
                "access and property modifiers are not allowed inside functions",
            ));
        }
        let duplicate = if self.in_function() {
            let in_block = self
                .blocks
                .last()
                .is_some_and(|b| b.iter().any(|&id| self.symbols.get(id).identifier == name.text));
            let shadows_parameter = self.blocks.len() == 1
                && self
                    .symbols
                    .find_child(self.function, &name.text, |s| {
                        s.as_variable()
                            .is_some_and(|v| v.kind == VariableKind::Parameter)
                    })
                    .is_some();
            in_block || shadows_parameter
        } else {
            self.symbols
                .find_child(self.scope, &name.text, |s| {
                    s.as_variable().is_some() || s.is_container() && s.as_function().is_none()
                })
                .is_some()
        };
        if duplicate {
            return Err(self.reject(
                name_index,
                ErrorCode::DuplicateSymbol,
                format!("'{}' is already declared in this scope", name.text),
            ));
        }
        Ok(())
    }

    /// Stores a literal on a constant so every use pushes it directly.
    fn fold_constant(
        &mut self,
        id: SymbolId,
        literal: Token,
        data_type: DataTypeValue,
        at: usize,
    ) -> Result<(), Abort> {
        if self.emitting() {
            let literal_type = literal
                .kind
                .literal_type()
                .map_or(DataTypeValue::INVALID, DataTypeValue::scalar);
            if !can_implicitly_cast(data_type, literal_type) {
                return Err(self.error_at(
                    at,
                    ErrorCode::InvalidCast,
                    format!("cannot initialise {} with a {} literal", data_type, literal_type),
                ));
            }
            // rejects out of range values once, here
            self.literal_operand(&literal, data_type)?;
        } else if let Some(v) = self.symbols.get_mut(id).as_variable_mut() {
            v.literal = Some(literal);
        }
        Ok(())
    }

    fn initializer(&mut self, id: SymbolId) -> Result<(), Abort> {
        let value = self.expression()?;
        self.store_variable(id, value)
    }

    // =========================================================================
    // Functions
    // =========================================================================

    fn function_declaration(
        &mut self,
        modifiers: Modifiers,
        return_type: DataTypeValue,
        name: Token,
        name_index: usize,
    ) -> Result<(), Abort> {
        self.expect(TokenKind::LParen)?;
        let mut params: Vec<Parameter> = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let data_type = self.type_specifier()?;
                let param = self.expect_identifier()?;
                params.push((data_type, param, self.pos - 1));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        if !self.emitting() {
            self.check_function(&modifiers, return_type, &name, name_index, &params)?;
        }

        let scope = self.scope;
        let parameter_types: Vec<DataTypeValue> = params.iter().map(|p| p.0).collect();
        let id = self.keyed(name_index, Role::Declaration, |c| {
            let id = c.symbols.add(
                Some(scope),
                name.text.clone(),
                SymbolKind::Function(FunctionSymbol {
                    parameter_count: parameter_types.len(),
                    parameter_types,
                    return_type,
                    flags: modifiers.flags,
                    access: modifiers.access.unwrap_or_default(),
                    ..FunctionSymbol::default()
                }),
            );
            c.attach_metadata(id);
            id
        })?;

        for (k, (data_type, param, index)) in params.into_iter().enumerate() {
            self.keyed(index, Role::Declaration, |c| {
                c.symbols.add(
                    Some(id),
                    param.text,
                    SymbolKind::Variable(VariableSymbol {
                        kind: VariableKind::Parameter,
                        data_type,
                        is_constant: false,
                        is_property: false,
                        storage: Storage::Stack(k as i32),
                        literal: None,
                        used: false,
                        access: AccessModifier::Public,
                    }),
                )
            })?;
        }

        if modifiers.flags.contains(FunctionFlags::IMPORT) {
            if self.check(TokenKind::LBrace) {
                return Err(self.error(
                    ErrorCode::UnexpectedToken,
                    format!("imported function '{}' cannot have a body", name.text),
                ));
            }
            self.expect(TokenKind::Semicolon)?;
            return Ok(());
        }
        self.function_body(id)
    }

    fn check_function(
        &mut self,
        modifiers: &Modifiers,
        return_type: DataTypeValue,
        name: &Token,
        name_index: usize,
        params: &[Parameter],
    ) -> Result<(), Abort> {
        let flags = modifiers.flags;
        let in_state = matches!(self.symbols.get(self.scope).kind, SymbolKind::State(_));
        let fail = |c: &mut Self, code: ErrorCode, message: String| {
            Err(c.reject(name_index, code, message))
        };

        if self.in_function() {
            return fail(self, ErrorCode::InvalidScope, format!("function '{}' cannot be nested", name.text));
        }
        if in_state && !flags.contains(FunctionFlags::EVENT) {
            return fail(
                self,
                ErrorCode::InvalidScope,
                format!("only event handlers can be declared inside a state, '{}' is not one", name.text),
            );
        }
        if !in_state && flags.contains(FunctionFlags::EVENT) {
            return fail(
                self,
                ErrorCode::InvalidFlags,
                format!("event handler '{}' must be declared inside a state", name.text),
            );
        }
        if modifiers.is_static || modifiers.is_const || modifiers.is_property {
            return fail(
                self,
                ErrorCode::InvalidFlags,
                "static, const and property do not apply to functions".to_string(),
            );
        }
        if flags.contains(FunctionFlags::IMPORT | FunctionFlags::EXPORT) {
            return fail(
                self,
                ErrorCode::InvalidFlags,
                format!("function '{}' cannot be both imported and exported", name.text),
            );
        }
        if flags.contains(FunctionFlags::THREAD) && !return_type.is_void() {
            return fail(
                self,
                ErrorCode::InvalidReturn,
                format!("thread function '{}' cannot return a value", name.text),
            );
        }
        if flags.contains(FunctionFlags::CONSOLE) {
            if !return_type.is_void() {
                return fail(
                    self,
                    ErrorCode::InvalidReturn,
                    format!("console command '{}' cannot return a value", name.text),
                );
            }
            if let Some((ty, param, _)) = params.iter().find(|p| !is_console_parameter(p.0)) {
                return fail(
                    self,
                    ErrorCode::InvalidParameter,
                    format!(
                        "console command parameter '{}' must be bool, int, float or string, not {}",
                        param.text, ty
                    ),
                );
            }
        }
        for (i, (ty, param, _)) in params.iter().enumerate() {
            if ty.data_type == DataType::Void {
                return fail(
                    self,
                    ErrorCode::InvalidParameter,
                    format!("parameter '{}' cannot be void", param.text),
                );
            }
            if params[..i].iter().any(|p| p.1.text == param.text) {
                return fail(
                    self,
                    ErrorCode::DuplicateSymbol,
                    format!("parameter '{}' is declared twice", param.text),
                );
            }
        }

        let types: Vec<DataTypeValue> = params.iter().map(|p| p.0).collect();
        let duplicate = self
            .symbols
            .find_child(self.scope, &name.text, |s| {
                s.as_function().is_some_and(|f| f.parameter_types == types)
            })
            .is_some();
        if duplicate {
            return fail(
                self,
                ErrorCode::DuplicateSymbol,
                format!("function '{}' with these parameters is already declared", name.text),
            );
        }
        Ok(())
    }

    fn function_body(&mut self, id: SymbolId) -> Result<(), Abort> {
        self.expect(TokenKind::LBrace)?;

        let saved_scope = self.scope;
        let saved_function = self.function;
        self.scope = id;
        self.function = id;
        self.local_count = 0;
        self.blocks.push(Vec::new());

        let mut result = self.block_contents();
        if result.is_ok() {
            self.emit(OpCode::Return, vec![]);
            if self.emitting() {
                result = self.check_unused(id);
            } else {
                self.finish_frame(id);
            }
        }

        self.blocks.pop();
        self.scope = saved_scope;
        self.function = saved_function;
        result
    }

    // =========================================================================
    // States, enumerations, namespaces and metadata
    // =========================================================================

    fn at_namespace_level(&self) -> bool {
        !self.in_function()
            && (self.scope == self.global_scope
                || matches!(self.symbols.get(self.scope).kind, SymbolKind::Namespace))
    }

    pub(super) fn state_declaration(&mut self) -> Result<(), Abort> {
        self.pos += 1;
        let mut engine = false;
        let mut editor = false;
        loop {
            if self.eat(TokenKind::Engine) {
                engine = true;
            } else if self.eat(TokenKind::Editor) {
                editor = true;
            } else {
                break;
            }
        }
        let name = self.expect_identifier()?;
        let name_index = self.pos - 1;

        if !self.emitting() {
            if !self.at_namespace_level() {
                return Err(self.reject(
                    name_index,
                    ErrorCode::InvalidScope,
                    "states can only be declared at global or namespace scope",
                ));
            }
            let exists = self
                .symbols
                .find_child(self.scope, &name.text, |s| matches!(s.kind, SymbolKind::State(_)))
                .is_some();
            if exists {
                return Err(self.reject(
                    name_index,
                    ErrorCode::DuplicateSymbol,
                    format!("state '{}' is already declared", name.text),
                ));
            }
            for (claimed, current, what) in [
                (engine, self.default_engine_state, "engine"),
                (editor, self.default_editor_state, "editor"),
            ] {
                if let (true, Some(previous)) = (claimed, current) {
                    let previous = self.symbols.get(previous).identifier.clone();
                    return Err(self.reject(
                        name_index,
                        ErrorCode::DuplicateDefaultState,
                        format!("'{}' is already the default {} state", previous, what),
                    ));
                }
            }
        }

        let scope = self.scope;
        let id = self.keyed(name_index, Role::Declaration, |c| {
            let id = c.symbols.add(
                Some(scope),
                name.text.clone(),
                SymbolKind::State(StateSymbol {
                    is_engine_default: engine,
                    is_editor_default: editor,
                }),
            );
            c.attach_metadata(id);
            if engine {
                c.default_engine_state = Some(id);
            }
            if editor {
                c.default_editor_state = Some(id);
            }
            id
        })?;

        self.expect(TokenKind::LBrace)?;
        let saved = self.scope;
        self.scope = id;
        let result = self.block_contents();
        self.scope = saved;
        result
    }

    pub(super) fn enum_declaration(&mut self) -> Result<(), Abort> {
        self.pos += 1;
        let name = self.expect_identifier()?;
        let name_index = self.pos - 1;

        if !self.emitting() {
            let in_state = matches!(self.symbols.get(self.scope).kind, SymbolKind::State(_));
            if !self.at_namespace_level() && !in_state {
                return Err(self.reject(
                    name_index,
                    ErrorCode::InvalidScope,
                    "enumerations cannot be declared inside functions",
                ));
            }
            let exists = self
                .symbols
                .find_child(self.scope, &name.text, |s| {
                    s.as_variable().is_some() || s.is_container() && s.as_function().is_none()
                })
                .is_some();
            if exists {
                return Err(self.reject(
                    name_index,
                    ErrorCode::DuplicateSymbol,
                    format!("'{}' is already declared in this scope", name.text),
                ));
            }
        }

        let scope = self.scope;
        let id = self.keyed(name_index, Role::Declaration, |c| {
            let id = c
                .symbols
                .add(Some(scope), name.text.clone(), SymbolKind::Enumeration);
            c.attach_metadata(id);
            id
        })?;

        self.expect(TokenKind::LBrace)?;
        let saved = self.scope;
        self.scope = id;
        let result = self.enum_members(id);
        self.scope = saved;
        result
    }

    /// Members default to `1 << ordinal` so they combine as bit flags.
    fn enum_members(&mut self, enumeration: SymbolId) -> Result<(), Abort> {
        let mut ordinal = 0u32;
        while !self.check(TokenKind::RBrace) {
            let member = self.expect_identifier()?;
            let index = self.pos - 1;

            if !self.emitting() {
                let exists = self
                    .symbols
                    .find_child(enumeration, &member.text, |s| s.as_variable().is_some())
                    .is_some();
                if exists {
                    return Err(self.reject(
                        index,
                        ErrorCode::DuplicateSymbol,
                        format!("enumeration member '{}' is declared twice", member.text),
                    ));
                }
            }

            let id = self.keyed(index, Role::Declaration, |c| {
                let slot = c.allocate_memory();
                c.symbols.add(
                    Some(enumeration),
                    member.text.clone(),
                    SymbolKind::Variable(VariableSymbol {
                        kind: VariableKind::Constant,
                        data_type: DataTypeValue::INT,
                        is_constant: true,
                        is_property: false,
                        storage: Storage::Memory(slot),
                        literal: None,
                        used: false,
                        access: AccessModifier::Public,
                    }),
                )
            })?;

            if self.eat(TokenKind::Assign) {
                let at = self.pos;
                match self.folded_literal(&[TokenKind::Comma, TokenKind::RBrace]) {
                    Some(literal) => self.fold_constant(id, literal, DataTypeValue::INT, at)?,
                    None => {
                        // arbitrary expression, evaluated once by the global scope
                        let value = self.expression()?;
                        self.store_variable(id, value)?;
                    }
                }
            } else if ordinal >= 31 {
                return Err(self.error_at(
                    index,
                    ErrorCode::InvalidLiteral,
                    format!("'{}' needs an explicit value, automatic values stop at bit 30", member.text),
                ));
            } else if !self.emitting() {
                let value = Token::new(
                    TokenKind::IntegerLiteral,
                    (1i64 << ordinal).to_string(),
                    member.line,
                    member.offset,
                    &member.file,
                );
                if let Some(v) = self.symbols.get_mut(id).as_variable_mut() {
                    v.literal = Some(value);
                }
            }

            ordinal += 1;
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(())
    }

    pub(super) fn namespace_declaration(&mut self) -> Result<(), Abort> {
        let at = self.pos;
        self.pos += 1;
        if !self.at_namespace_level() {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidScope,
                "namespaces can only be declared at global or namespace scope",
            ));
        }
        let mut path = vec![self.expect_identifier()?];
        while self.eat(TokenKind::Period) {
            path.push(self.expect_identifier()?);
        }

        let mut current = self.scope;
        for segment in &path {
            let existing = self.symbols.find_child(current, &segment.text, |s| {
                s.as_variable().is_some() || s.is_container()
            });
            current = match existing {
                Some(id) if matches!(self.symbols.get(id).kind, SymbolKind::Namespace) => id,
                Some(_) => {
                    return Err(self.reject(
                        at,
                        ErrorCode::DuplicateSymbol,
                        format!("'{}' is already declared and is not a namespace", segment.text),
                    ));
                }
                None => {
                    let id = self
                        .symbols
                        .add(Some(current), segment.text.clone(), SymbolKind::Namespace);
                    self.attach_metadata(id);
                    id
                }
            };
        }

        self.expect(TokenKind::LBrace)?;
        let saved = self.scope;
        self.scope = current;
        let result = self.block_contents();
        self.scope = saved;
        result
    }

    /// `[key = value, ...]` annotating the next declaration.
    pub(super) fn metadata_block(&mut self) -> Result<(), Abort> {
        let at = self.pos;
        if self.in_function() {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidScope,
                "metadata can only annotate declarations outside functions",
            ));
        }
        self.pos += 1;

        let mut entries = Vec::new();
        if !self.check(TokenKind::RBracket) {
            loop {
                let key = self.expect_identifier()?;
                self.expect(TokenKind::Assign)?;
                let value = match self.peek() {
                    Some(t) if t.kind.is_literal() || t.kind == TokenKind::Identifier => t.clone(),
                    _ => return Err(self.unexpected("as a metadata value")),
                };
                self.pos += 1;
                entries.push((key.text, value.text));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket)?;

        if !self.emitting() {
            self.metadata.extend(entries);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{compile_library, find, object};
    use crate::lang::diagnostic::ErrorCode;
    use crate::lang::flags::CompileFlags;
    use crate::lang::symbol::{FunctionFlags, Storage, SymbolKind, VariableKind};

    #[test]
    fn test_duplicate_global_reported_once() {
        let c = compile_library("int a; int a;");
        assert_eq!(c.diagnostics.count_code(ErrorCode::DuplicateSymbol), 1);
        assert_eq!(c.diagnostics.error_count(), 1);
    }

    #[test]
    fn test_overloads_by_parameter_types() {
        let c = compile_library("void f(int a) { } void f(float a) { } void f(int b) { }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::DuplicateSymbol), 1);
    }

    #[test]
    fn test_default_state_uniqueness() {
        let c = super::super::tests::compile_with(
            "state engine A { } state engine B { } state editor C { }",
            CompileFlags::empty(),
        );
        assert_eq!(c.diagnostics.count_code(ErrorCode::DuplicateDefaultState), 1);
        assert_eq!(c.diagnostics.count_code(ErrorCode::MissingDefaultState), 0);
    }

    #[test]
    fn test_event_placement() {
        let c = compile_library("state S { event void OnTick() { } void helper() { } }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidScope), 1);

        let c = compile_library("event void Loose() { }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidFlags), 1);
    }

    #[test]
    fn test_console_restrictions() {
        let c = compile_library("console void ok(int a, string b, bool c, float d) { }");
        assert_eq!(c.diagnostics.error_count(), 0);

        let c = compile_library("console void bad(double a) { }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidParameter), 1);

        let c = compile_library("console int bad() { return 1; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidReturn), 1);
    }

    #[test]
    fn test_import_has_no_body() {
        let c = compile_library("import int native(int a); export void f() { }");
        let o = object(&c);
        let native = find(o, "native").as_function().cloned();
        let native = native.unwrap_or_default();
        assert!(native.flags.contains(FunctionFlags::IMPORT));
        assert_eq!(native.entry_point, None);
        assert!(find(o, "f").as_function().is_some_and(|f| f.entry_point.is_some()));

        let c = compile_library("import void g() { }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::UnexpectedToken), 1);
    }

    #[test]
    fn test_conflicting_flags() {
        let c = compile_library("import export void f();");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidFlags), 1);
        let c = compile_library("thread int t() { return 1; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidReturn), 1);
        let c = compile_library("static static int x;");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidFlags), 1);
    }

    #[test]
    fn test_nested_function_rejected() {
        let c = compile_library("void f() { void g() { } int x = 1; x = x + 1; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidScope), 1);
        assert_eq!(c.diagnostics.error_count(), 1);
    }

    #[test]
    fn test_constant_folding() {
        let c = compile_library("const float F = -2; float g = F;");
        let o = object(&c);
        let f = find(o, "F").as_variable().cloned();
        let f = match f {
            Some(f) => f,
            None => panic!("F is not a variable"),
        };
        assert_eq!(f.kind, VariableKind::Constant);
        assert!(matches!(f.storage, Storage::Memory(_)));
        assert_eq!(f.literal.map(|t| t.text).as_deref(), Some("-2"));
    }

    #[test]
    fn test_constant_needs_value() {
        let c = compile_library("const int X;");
        assert_eq!(c.diagnostics.count_code(ErrorCode::IllegalAssignment), 1);
    }

    #[test]
    fn test_enum_explicit_and_expression_values() {
        let c = compile_library("int base = 3; enum E { A, B = 16, C, D = base + 1 }");
        let o = object(&c);
        let literal = |name: &str| {
            find(o, name)
                .as_variable()
                .and_then(|v| v.literal.clone())
                .map(|t| t.text)
        };
        assert_eq!(literal("A").as_deref(), Some("1"));
        assert_eq!(literal("B").as_deref(), Some("16"));
        assert_eq!(literal("C").as_deref(), Some("4"));
        assert_eq!(literal("D"), None);
    }

    #[test]
    fn test_namespaces_reopen() {
        let c = compile_library("namespace Game.Math { int a; } namespace Game { int b; }");
        let o = object(&c);
        let namespaces = o
            .symbols
            .iter()
            .filter(|s| matches!(s.kind, SymbolKind::Namespace) && s.identifier == "Game")
            .count();
        assert_eq!(namespaces, 1);
        assert_eq!(o.qualified_name(find(o, "a").index), "Game.Math.a");
        assert_eq!(o.qualified_name(find(o, "b").index), "Game.b");
    }

    #[test]
    fn test_metadata_attaches_to_next_declaration() {
        let c = compile_library("[author = \"me\", level = 3] int x;");
        let o = object(&c);
        let x = find(o, "x");
        let meta: Vec<(String, String)> = x
            .children
            .iter()
            .filter_map(|&c| match &o.symbols[c.0].kind {
                SymbolKind::MetaData { value } => {
                    Some((o.symbols[c.0].identifier.clone(), value.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            meta,
            vec![
                ("author".to_string(), "me".to_string()),
                ("level".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn test_static_local_initialised_by_global_scope() {
        let c = super::super::tests::compile_unoptimized("void f() { static int hits = 7; hits = hits + 1; }");
        let o = object(&c);
        let hits = find(o, "hits").as_variable().map(|v| (v.kind, v.storage));
        assert_eq!(hits, Some((VariableKind::Global, Storage::Memory(0))));
        let global = super::super::tests::body(o, "$global");
        assert_eq!(
            global,
            vec![
                crate::bytecode::OpCode::PushInt,
                crate::bytecode::OpCode::PopInt,
                crate::bytecode::OpCode::Return
            ]
        );
    }
}
