use super::cast::{can_explicitly_cast, can_implicitly_cast, is_relational, operator_valid};
use super::statement::dotted;
use super::Compiler;
use crate::bytecode::compile_error::Abort;
use crate::bytecode::ir::{Operand, Register};
use crate::bytecode::op::{typed, OpCode, Operation};
use crate::frontend::token::{Token, TokenKind};
use crate::lang::data_type::{DataType, DataTypeValue};
use crate::lang::diagnostic::{AlertLevel, ErrorCode};
use crate::lang::symbol::{
    AccessModifier, FunctionFlags, FunctionSymbol, Storage, SymbolId, SymbolKind, VariableKind,
    VariableSymbol,
};

/// Where an assignment writes.
#[derive(Debug, Clone, Copy)]
pub(super) enum Target {
    Variable { id: SymbolId, data_type: DataTypeValue },
    /// Array element; the index is on the stack.
    Element { id: SymbolId, data_type: DataTypeValue },
    /// Member of an object; the object (and index) are on the stack.
    Member { id: SymbolId, data_type: DataTypeValue, indexed: bool },
    /// Not resolvable while declaring.
    Unknown,
}

impl Target {
    pub(super) fn data_type(&self) -> DataTypeValue {
        match *self {
            Target::Variable { data_type, .. }
            | Target::Element { data_type, .. }
            | Target::Member { data_type, .. } => data_type,
            Target::Unknown => DataTypeValue::INVALID,
        }
    }
}

/// A parsed `->(Type)name[index]` waiting to be read or written.
struct Access {
    symbol: SymbolId,
    data_type: DataTypeValue,
    indexed: bool,
}

enum Accessed {
    Pending(Access),
    /// A method call, already emitted, that produced a value of this type.
    Called(DataTypeValue),
}

/// Argument type and the instruction index just past its code.
type Argument = (DataTypeValue, usize);

type Level = fn(&mut Compiler) -> Result<DataTypeValue, Abort>;

impl Compiler {
    // =========================================================================
    // Precedence ladder
    // =========================================================================

    pub(super) fn expression(&mut self) -> Result<DataTypeValue, Abort> {
        self.binary_level(&[TokenKind::LogicalAnd, TokenKind::LogicalOr], Self::relational)
    }

    fn relational(&mut self) -> Result<DataTypeValue, Abort> {
        use TokenKind::*;
        self.binary_level(
            &[Equal, NotEqual, Less, Greater, LessEqual, GreaterEqual],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<DataTypeValue, Abort> {
        self.binary_level(&[TokenKind::Plus, TokenKind::Minus], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<DataTypeValue, Abort> {
        use TokenKind::*;
        self.binary_level(
            &[Star, Slash, Percent, Caret, ShiftLeft, ShiftRight, Pipe, Ampersand],
            Self::member,
        )
    }

    fn binary_level(&mut self, operators: &[TokenKind], next: Level) -> Result<DataTypeValue, Abort> {
        let mut left = next(self)?;
        while let Some(op) = self.peek_kind().filter(|k| operators.contains(k)) {
            let at = self.pos;
            self.pos += 1;
            let right = next(self)?;
            left = self.binary(op, left, right, at)?;
        }
        Ok(left)
    }

    /// Pops both operands, applies `op` and pushes the result.
    ///
    /// The right operand is converted to the left operand's type, unless the
    /// left side is `null`.
    pub(super) fn binary(
        &mut self,
        op: TokenKind,
        left: DataTypeValue,
        right: DataTypeValue,
        at: usize,
    ) -> Result<DataTypeValue, Abort> {
        let left_null = left.data_type == DataType::Null && !left.is_array;
        let ty = if left_null { right } else { left };
        let result = if is_relational(op) { DataTypeValue::BOOL } else { ty };
        if !self.emitting() {
            return Ok(result);
        }

        if !can_implicitly_cast(ty, right) || !can_implicitly_cast(ty, left) {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidCast,
                format!("cannot combine {} and {} with {}", left, right, op.describe()),
            ));
        }
        if !operator_valid(op, ty) {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidOperator,
                format!("operator {} cannot be applied to {}", op.describe(), ty),
            ));
        }

        let op1 = Operand::Register(Register::Op1);
        let op2 = Operand::Register(Register::Op2);
        let pop_right = self.typed_op(Operation::Pop, right)?;
        let pop_left = self.typed_op(Operation::Pop, left)?;
        self.emit(pop_right, vec![op2.clone()]);
        self.emit(pop_left, vec![op1.clone()]);
        if right != ty && right.data_type != DataType::Null {
            let cast = self.typed_op(Operation::Cast, ty)?;
            self.emit(cast, vec![op2.clone()]);
        }

        if is_relational(op) {
            let cmp = self.typed_op(Operation::Cmp, ty)?;
            self.emit(cmp, vec![op1.clone(), op2]);
            let is = match op {
                TokenKind::Equal => OpCode::IsEq,
                TokenKind::NotEqual => OpCode::IsNe,
                TokenKind::Less => OpCode::IsLt,
                TokenKind::Greater => OpCode::IsGt,
                TokenKind::LessEqual => OpCode::IsLe,
                _ => OpCode::IsGe,
            };
            self.emit(is, vec![op1.clone()]);
            self.emit(OpCode::PushBool, vec![op1]);
            return Ok(result);
        }

        let opcode = match op {
            TokenKind::Plus => self.typed_op(Operation::Add, ty)?,
            TokenKind::Minus => self.typed_op(Operation::Sub, ty)?,
            TokenKind::Star => self.typed_op(Operation::Mul, ty)?,
            TokenKind::Slash => self.typed_op(Operation::Div, ty)?,
            TokenKind::Percent => self.typed_op(Operation::Mod, ty)?,
            TokenKind::Caret => OpCode::BitXor,
            TokenKind::Pipe => OpCode::BitOr,
            TokenKind::Ampersand => OpCode::BitAnd,
            TokenKind::ShiftLeft => OpCode::BitShl,
            TokenKind::ShiftRight => OpCode::BitShr,
            TokenKind::LogicalAnd => OpCode::LogicalAnd,
            _ => OpCode::LogicalOr,
        };
        self.emit(opcode, vec![op1.clone(), op2]);
        let push = self.typed_op(Operation::Push, ty)?;
        self.emit(push, vec![op1]);
        Ok(result)
    }

    fn member(&mut self) -> Result<DataTypeValue, Abort> {
        let mut ty = self.unary()?;
        while self.check(TokenKind::Arrow) {
            ty = match self.member_accessor(ty)? {
                Accessed::Called(ty) => ty,
                Accessed::Pending(access) => self.read_member(&access)?,
            };
        }
        Ok(ty)
    }

    fn unary(&mut self) -> Result<DataTypeValue, Abort> {
        use TokenKind::*;

        let at = self.pos;
        match self.peek_kind() {
            Some(Minus) if self.peek_kind_at(1).is_some_and(is_numeric_literal) => {
                self.literal_expression()
            }
            Some(op @ (Minus | Plus | Not | Tilde)) => {
                self.pos += 1;
                let ty = self.unary()?;
                self.unary_operator(op, ty, at)
            }
            Some(op @ (Increment | Decrement)) => {
                self.pos += 1;
                self.prefix_step(op)
            }
            Some(LParen) if self.is_cast() => self.cast_expression(),
            _ => self.primary(),
        }
    }

    fn unary_operator(&mut self, op: TokenKind, ty: DataTypeValue, at: usize) -> Result<DataTypeValue, Abort> {
        let result = if op == TokenKind::Not { DataTypeValue::BOOL } else { ty };
        if !self.emitting() {
            return Ok(result);
        }
        let valid = match op {
            TokenKind::Plus => !ty.is_array && ty.data_type.is_numeric(),
            _ => operator_valid(op, ty),
        };
        if !valid {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidOperator,
                format!("operator {} cannot be applied to {}", op.describe(), ty),
            ));
        }

        let op1 = Operand::Register(Register::Op1);
        let opcode = match op {
            TokenKind::Plus => return Ok(result),
            TokenKind::Minus => self.typed_op(Operation::Neg, ty)?,
            TokenKind::Not => OpCode::LogicalNot,
            _ => OpCode::BitNot,
        };
        let pop = self.typed_op(Operation::Pop, ty)?;
        let push = self.typed_op(Operation::Push, ty)?;
        self.emit(pop, vec![op1.clone()]);
        self.emit(opcode, vec![op1.clone()]);
        self.emit(push, vec![op1]);
        Ok(result)
    }

    /// `(Type)` or `(Type[])` ahead.
    fn is_cast(&self) -> bool {
        use TokenKind::*;
        if !self.peek_kind_at(1).is_some_and(|k| k.data_type().is_some()) {
            return false;
        }
        match self.peek_kind_at(2) {
            Some(RParen) => true,
            Some(LBracket) => {
                self.peek_kind_at(3) == Some(RBracket) && self.peek_kind_at(4) == Some(RParen)
            }
            _ => false,
        }
    }

    fn cast_expression(&mut self) -> Result<DataTypeValue, Abort> {
        let at = self.pos;
        self.pos += 1;
        let to = self.type_specifier()?;
        self.expect(TokenKind::RParen)?;
        let from = self.unary()?;
        if !self.emitting() {
            return Ok(to);
        }
        if !can_explicitly_cast(to, from) {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidCast,
                format!("cannot cast {} to {}", from, to),
            ));
        }
        if to != from {
            let op1 = Operand::Register(Register::Op1);
            let pop = self.typed_op(Operation::Pop, from)?;
            let cast = self.typed_op(Operation::Cast, to)?;
            let push = self.typed_op(Operation::Push, to)?;
            self.emit(pop, vec![op1.clone()]);
            self.emit(cast, vec![op1.clone()]);
            self.emit(push, vec![op1]);
        }
        Ok(to)
    }

    fn primary(&mut self) -> Result<DataTypeValue, Abort> {
        let Some(kind) = self.peek_kind() else {
            return Err(self.unexpected_end());
        };
        match kind {
            k if k.is_literal() => self.literal_expression(),
            TokenKind::Null => {
                self.pos += 1;
                self.emit(OpCode::PushNull, vec![]);
                Ok(DataTypeValue::NULL)
            }
            TokenKind::New => self.new_array(),
            TokenKind::Indexer => self.indexer(),
            TokenKind::LParen => {
                self.pos += 1;
                let ty = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(ty)
            }
            TokenKind::Identifier => self.identifier_expression(),
            other => Err(self.error(
                ErrorCode::ExpectingExpression,
                format!("expected an expression but found {}", other.describe()),
            )),
        }
    }

    // =========================================================================
    // Literals
    // =========================================================================

    /// Literal, optionally negated, pushed with its own type.
    fn literal_expression(&mut self) -> Result<DataTypeValue, Abort> {
        let negative = self.eat(TokenKind::Minus);
        let mut literal = self.advance()?;
        if negative {
            literal.text = format!("-{}", literal.text);
        }
        let ty = literal
            .kind
            .literal_type()
            .map_or(DataTypeValue::INVALID, DataTypeValue::scalar);
        let operand = self.literal_operand(&literal, ty)?;
        let push = self.typed_op(Operation::Push, ty)?;
        self.emit(push, vec![operand]);
        Ok(ty)
    }

    /// Operand holding `literal` converted to `ty`.
    pub(super) fn literal_operand(&mut self, literal: &Token, ty: DataTypeValue) -> Result<Operand, Abort> {
        if !ty.is_array && ty.data_type == DataType::String {
            return Ok(Operand::Symbol(self.intern(&literal.text)));
        }

        let value = match literal.kind {
            TokenKind::BooleanLiteral => {
                let b = literal.text.eq_ignore_ascii_case("true");
                Some((i64::from(b), if b { 1.0 } else { 0.0 }))
            }
            TokenKind::StringLiteral => None,
            _ => parse_number(&literal.text),
        };
        let operand = value.and_then(|(int, float)| {
            if ty.is_array {
                return None;
            }
            match ty.data_type {
                DataType::Bool => Some(Operand::BoolLiteral(int != 0 || float != 0.0)),
                DataType::Byte => u8::try_from(int)
                    .ok()
                    .or_else(|| i8::try_from(int).ok().map(|v| v as u8))
                    .map(Operand::ByteLiteral),
                DataType::Short => i16::try_from(int)
                    .ok()
                    .or_else(|| u16::try_from(int).ok().map(|v| v as i16))
                    .map(Operand::ShortLiteral),
                DataType::Int => i32::try_from(int)
                    .ok()
                    .or_else(|| u32::try_from(int).ok().map(|v| v as i32))
                    .map(Operand::IntLiteral),
                DataType::Long => Some(Operand::LongLiteral(int)),
                DataType::Float => Some(Operand::FloatLiteral(float as f32)),
                DataType::Double => Some(Operand::DoubleLiteral(float)),
                _ => None,
            }
        });
        match operand {
            Some(operand) => Ok(operand),
            None => Err(self.error(
                ErrorCode::InvalidLiteral,
                format!("'{}' is not a valid {} literal", literal.render(), ty),
            )),
        }
    }

    // =========================================================================
    // Names, calls and variables
    // =========================================================================

    /// `name ('.' name)*`
    pub(super) fn qualified_path(&mut self) -> Result<Vec<Token>, Abort> {
        let mut path = vec![self.expect_identifier()?];
        while self.check(TokenKind::Period) && self.peek_kind_at(1) == Some(TokenKind::Identifier) {
            self.pos += 1;
            path.push(self.advance()?);
        }
        Ok(path)
    }

    pub(super) fn mark_used(&mut self, id: SymbolId) {
        match &mut self.symbols.get_mut(id).kind {
            SymbolKind::Variable(v) => v.used = true,
            SymbolKind::Function(f) => f.used = true,
            _ => {}
        }
    }

    fn identifier_expression(&mut self) -> Result<DataTypeValue, Abort> {
        let at = self.pos;
        let path = self.qualified_path()?;
        if self.check(TokenKind::LParen) {
            return self.call(&path, at);
        }

        let Some(id) = self.resolve_path(&path, |s| s.as_variable().is_some()) else {
            if self.emitting() {
                return Err(self.error_at(
                    at,
                    ErrorCode::UndeclaredSymbol,
                    format!("'{}' is not declared", dotted(&path)),
                ));
            }
            // keep the declare pass on the same tokens as the emit pass
            if self.eat(TokenKind::LBracket) {
                self.index_expression()?;
                self.expect(TokenKind::RBracket)?;
            }
            if matches!(self.peek_kind(), Some(TokenKind::Increment | TokenKind::Decrement)) {
                self.pos += 1;
            }
            return Ok(DataTypeValue::INVALID);
        };
        self.mark_used(id);
        let (ty, literal) = match self.symbols.get(id).as_variable() {
            Some(v) => (v.data_type, v.literal.clone()),
            None => (DataTypeValue::INVALID, None),
        };

        if self.eat(TokenKind::LBracket) {
            self.index_expression()?;
            self.expect(TokenKind::RBracket)?;
            if self.emitting() && !ty.is_array {
                return Err(self.error_at(
                    at,
                    ErrorCode::InvalidIndex,
                    format!("'{}' is not an array", dotted(&path)),
                ));
            }
            let element = ty.element();
            let push = self.typed_op(Operation::Push, element)?;
            self.emit(OpCode::PopInt, vec![Operand::Register(Register::Op1)]);
            let slot = self.indexed_slot(id, Register::Op1);
            self.emit(push, vec![slot]);
            return Ok(element);
        }

        if let Some(op @ (TokenKind::Increment | TokenKind::Decrement)) = self.peek_kind() {
            self.pos += 1;
            let push = self.typed_op(Operation::Push, ty)?;
            let slot = self.slot(id);
            self.emit(push, vec![slot]);
            self.step_variable(id, op, at)?;
            return Ok(ty);
        }

        let push = self.typed_op(Operation::Push, ty)?;
        let operand = match literal {
            Some(literal) => self.literal_operand(&literal, ty)?,
            None => self.slot(id),
        };
        self.emit(push, vec![operand]);
        Ok(ty)
    }

    /// `++x` / `--x` inside an expression: steps the variable, then pushes it.
    fn prefix_step(&mut self, op: TokenKind) -> Result<DataTypeValue, Abort> {
        let at = self.pos;
        let path = self.qualified_path()?;
        let Some(id) = self.resolve_path(&path, |s| s.as_variable().is_some()) else {
            if self.emitting() {
                return Err(self.error_at(
                    at,
                    ErrorCode::UndeclaredSymbol,
                    format!("'{}' is not declared", dotted(&path)),
                ));
            }
            return Ok(DataTypeValue::INVALID);
        };
        self.mark_used(id);
        self.step_variable(id, op, at)?;
        let ty = self.variable_type(id);
        let push = self.typed_op(Operation::Push, ty)?;
        let slot = self.slot(id);
        self.emit(push, vec![slot]);
        Ok(ty)
    }

    fn step_variable(&mut self, id: SymbolId, op: TokenKind, at: usize) -> Result<(), Abort> {
        let (ty, constant) = match self.symbols.get(id).as_variable() {
            Some(v) => (v.data_type, v.is_constant),
            None => (DataTypeValue::INVALID, false),
        };
        if self.emitting() {
            if constant {
                let name = self.symbols.get(id).identifier.clone();
                return Err(self.error_at(
                    at,
                    ErrorCode::IllegalAssignment,
                    format!("cannot modify constant '{}'", name),
                ));
            }
            if !operator_valid(op, ty) {
                return Err(self.error_at(
                    at,
                    ErrorCode::InvalidOperator,
                    format!("operator {} cannot be applied to {}", op.describe(), ty),
                ));
            }
        }
        let operation = if op == TokenKind::Increment {
            Operation::Inc
        } else {
            Operation::Dec
        };
        let opcode = self.typed_op(operation, ty)?;
        let slot = self.slot(id);
        self.emit(opcode, vec![slot]);
        Ok(())
    }

    /// `( expr, ... )`
    fn arguments(&mut self) -> Result<Vec<Argument>, Abort> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let ty = self.expression()?;
                args.push((ty, self.here()));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    /// Converts each argument that differs from its parameter right where
    /// its code ends. Works from the last argument so earlier insertion
    /// points stay valid.
    fn cast_arguments(&mut self, args: &[Argument], params: &[DataTypeValue]) -> Result<(), Abort> {
        let op1 = Operand::Register(Register::Op1);
        for (&(ty, end), &param) in args.iter().zip(params).rev() {
            if ty == param || ty.data_type == DataType::Null {
                continue;
            }
            let pop = self.typed_op(Operation::Pop, ty)?;
            let cast = self.typed_op(Operation::Cast, param)?;
            let push = self.typed_op(Operation::Push, param)?;
            self.emit_at(end, pop, vec![op1.clone()]);
            self.emit_at(end + 1, cast, vec![op1.clone()]);
            self.emit_at(end + 2, push, vec![op1.clone()]);
        }
        Ok(())
    }

    fn call(&mut self, path: &[Token], at: usize) -> Result<DataTypeValue, Abort> {
        let args = self.arguments()?;
        let signatures: Vec<(SymbolId, Vec<DataTypeValue>, DataTypeValue)> = self
            .candidate_functions(path)
            .into_iter()
            .filter_map(|id| {
                let f = self.symbols.get(id).as_function()?;
                Some((id, f.parameter_types.clone(), f.return_type))
            })
            .collect();

        if !self.emitting() {
            return Ok(signatures
                .first()
                .map_or(DataTypeValue::INVALID, |s| s.2));
        }

        let name = dotted(path);
        if signatures.is_empty() {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidFunction,
                format!("no function named '{}'", name),
            ));
        }

        let types: Vec<DataTypeValue> = args.iter().map(|a| a.0).collect();
        let exact = signatures.iter().find(|s| s.1 == types);
        let chosen = exact.or_else(|| {
            signatures.iter().find(|s| {
                s.1.len() == types.len()
                    && s.1.iter().zip(&types).all(|(&p, &a)| can_implicitly_cast(p, a))
            })
        });
        let Some((function, params, return_type)) = chosen.cloned() else {
            let rendered: Vec<String> = types.iter().map(|t| t.to_string()).collect();
            return Err(self.error_at(
                at,
                ErrorCode::InvalidCast,
                format!("no overload of '{}' accepts ({})", name, rendered.join(", ")),
            ));
        };

        self.cast_arguments(&args, &params)?;
        self.mark_used(function);
        self.emit(OpCode::Call, vec![Operand::Symbol(function)]);
        if !return_type.is_void() {
            let push = self.typed_op(Operation::Push, return_type)?;
            self.emit(push, vec![Operand::Register(Register::Return)]);
        }
        Ok(return_type)
    }

    // =========================================================================
    // Member access
    // =========================================================================

    /// `->(Type)name`, then an optional `[index]` or argument list.
    fn member_accessor(&mut self, object: DataTypeValue) -> Result<Accessed, Abort> {
        let at = self.pos;
        self.expect(TokenKind::Arrow)?;
        self.expect(TokenKind::LParen)?;
        let data_type = self.type_specifier()?;
        self.expect(TokenKind::RParen)?;
        let name = self.expect_identifier()?;

        if self.emitting() && !(object.is_array || object.data_type == DataType::Object) {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidOperator,
                format!("'->' needs an object, found {}", object),
            ));
        }

        if self.check(TokenKind::LParen) {
            return self.method_call(&name.text, data_type, at).map(Accessed::Called);
        }

        let indexed = self.eat(TokenKind::LBracket);
        if indexed {
            self.index_expression()?;
            self.expect(TokenKind::RBracket)?;
        }
        let symbol = self.member_variable(&name.text, data_type);
        Ok(Accessed::Pending(Access {
            symbol,
            data_type,
            indexed,
        }))
    }

    /// Member variable keyed by name and type, created on first use.
    fn member_variable(&mut self, name: &str, data_type: DataTypeValue) -> SymbolId {
        let scope = self.member_scope;
        let existing = self.symbols.find_child(scope, name, |s| {
            s.as_variable().is_some_and(|v| v.data_type == data_type)
        });
        existing.unwrap_or_else(|| {
            self.symbols.add(
                Some(scope),
                name,
                SymbolKind::Variable(VariableSymbol {
                    kind: VariableKind::Member,
                    data_type,
                    is_constant: false,
                    is_property: false,
                    storage: Storage::Stack(0),
                    literal: None,
                    used: false,
                    access: AccessModifier::Public,
                }),
            )
        })
    }

    fn member_function(&mut self, name: &str, return_type: DataTypeValue) -> SymbolId {
        let scope = self.member_scope;
        let existing = self.symbols.find_child(scope, name, |s| {
            s.as_function().is_some_and(|f| f.return_type == return_type)
        });
        existing.unwrap_or_else(|| {
            self.symbols.add(
                Some(scope),
                name,
                SymbolKind::Function(FunctionSymbol {
                    return_type,
                    flags: FunctionFlags::MEMBER_CALL,
                    ..FunctionSymbol::default()
                }),
            )
        })
    }

    /// The first call of a method fixes its parameter types; later calls
    /// are checked and converted against them.
    fn method_call(&mut self, name: &str, return_type: DataTypeValue, at: usize) -> Result<DataTypeValue, Abort> {
        let method = self.member_function(name, return_type);
        let args = self.arguments()?;

        if self.emitting() {
            let types: Vec<DataTypeValue> = args.iter().map(|a| a.0).collect();
            let known = self
                .symbols
                .get(method)
                .as_function()
                .map(|f| (f.used, f.parameter_types.clone()));
            match known {
                Some((false, _)) => {
                    if let Some(f) = self.symbols.get_mut(method).as_function_mut() {
                        f.parameter_count = types.len();
                        f.parameter_types = types;
                        f.used = true;
                    }
                }
                Some((true, params)) => {
                    let matches = params.len() == types.len()
                        && params
                            .iter()
                            .zip(&types)
                            .all(|(&p, &a)| can_implicitly_cast(p, a));
                    if !matches {
                        return Err(self.error_at(
                            at,
                            ErrorCode::InvalidCast,
                            format!("arguments do not match earlier calls of method '{}'", name),
                        ));
                    }
                    self.cast_arguments(&args, &params)?;
                }
                None => {}
            }
        }

        self.emit(OpCode::CallMethod, vec![Operand::Symbol(method)]);
        if !return_type.is_void() {
            let push = self.typed_op(Operation::Push, return_type)?;
            self.emit(push, vec![Operand::Register(Register::Return)]);
        }
        Ok(return_type)
    }

    fn read_member(&mut self, access: &Access) -> Result<DataTypeValue, Abort> {
        let op1 = Operand::Register(Register::Op1);
        let op2 = Operand::Register(Register::Op2);
        let member = Operand::Symbol(access.symbol);
        if access.indexed {
            self.emit(OpCode::PopInt, vec![op2.clone()]);
            self.emit(OpCode::PopObject, vec![op1.clone()]);
            self.emit(OpCode::GetMemberIndexed, vec![op1.clone(), member, op2]);
        } else {
            self.emit(OpCode::PopObject, vec![op1.clone()]);
            self.emit(OpCode::GetMember, vec![op1.clone(), member]);
        }
        let push = self.typed_op(Operation::Push, access.data_type)?;
        self.emit(push, vec![op1]);
        self.mark_used(access.symbol);
        Ok(access.data_type)
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    /// `new T[n] { e, ... }`. Elements are pushed first, then the size; an
    /// omitted size is the number of elements.
    fn new_array(&mut self) -> Result<DataTypeValue, Abort> {
        self.pos += 1;
        let element_kind = match self.peek_kind().and_then(|k| k.data_type()) {
            Some(dt) if dt != DataType::Void => dt,
            _ => return Err(self.unexpected("where an element type was expected")),
        };
        self.pos += 1;
        let element = DataTypeValue::scalar(element_kind);

        self.expect(TokenKind::LBracket)?;
        let size_at = self.pos;
        self.skip_balanced(TokenKind::LBracket, TokenKind::RBracket)?;

        let mut count = 0i32;
        if self.eat(TokenKind::LBrace) {
            if !self.check(TokenKind::RBrace) {
                loop {
                    let value_at = self.pos;
                    let ty = self.expression()?;
                    if self.emitting() && !can_implicitly_cast(element, ty) {
                        return Err(self.error_at(
                            value_at,
                            ErrorCode::InvalidCast,
                            format!("cannot store {} in an array of {}", ty, element),
                        ));
                    }
                    self.coerce(ty, element)?;
                    count += 1;
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RBrace)?;
        }

        if self.tokens.get(size_at).map(|t| t.kind) == Some(TokenKind::RBracket) {
            self.emit(OpCode::PushInt, vec![Operand::IntLiteral(count)]);
        } else {
            let after = self.pos;
            self.pos = size_at;
            self.index_expression()?;
            self.expect(TokenKind::RBracket)?;
            self.pos = after;
        }

        let op1 = Operand::Register(Register::Op1);
        let allocate = self.typed_op(Operation::AllocateHeap, element)?;
        self.emit(OpCode::PopInt, vec![op1.clone()]);
        self.emit(allocate, vec![op1.clone(), Operand::IntLiteral(count)]);
        self.emit(OpCode::PushObject, vec![op1]);
        Ok(DataTypeValue::array(element_kind))
    }

    /// Iteration count of the innermost `do (n)` loop.
    fn indexer(&mut self) -> Result<DataTypeValue, Abort> {
        let at = self.pos;
        self.pos += 1;
        let counter = self.loops.iter().rev().find_map(|f| f.counter);
        let Some(counter) = counter else {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidIndexer,
                "'indexer' is only available inside 'do (n)' loops",
            ));
        };
        let slot = self.slot(counter);
        self.emit(OpCode::PushInt, vec![slot]);
        Ok(DataTypeValue::INT)
    }

    /// Numeric index, left on the stack as an int.
    fn index_expression(&mut self) -> Result<(), Abort> {
        let at = self.pos;
        let ty = self.expression()?;
        if self.emitting() && (ty.is_array || !ty.data_type.is_numeric()) {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidIndex,
                format!("index must be numeric, found {}", ty),
            ));
        }
        self.coerce(ty, DataTypeValue::INT)
    }

    // =========================================================================
    // Conversions and stores
    // =========================================================================

    /// Opcode for `operation` on `ty`; while declaring, any placeholder will do.
    pub(super) fn typed_op(&mut self, operation: Operation, ty: DataTypeValue) -> Result<OpCode, Abort> {
        match typed(operation, ty) {
            Some(opcode) => Ok(opcode),
            None if !self.emitting() => Ok(OpCode::Nop),
            None => Err(self.error(
                ErrorCode::InvalidOperator,
                format!(
                    "no {} instruction exists for {}",
                    format!("{:?}", operation).to_lowercase(),
                    ty
                ),
            )),
        }
    }

    /// Pops a `value` into `register`, converting it to `target`.
    pub(super) fn pop_into(
        &mut self,
        value: DataTypeValue,
        target: DataTypeValue,
        register: Register,
    ) -> Result<(), Abort> {
        let pop = self.typed_op(Operation::Pop, value)?;
        self.emit(pop, vec![Operand::Register(register)]);
        if value != target && value.data_type != DataType::Null {
            let cast = self.typed_op(Operation::Cast, target)?;
            self.emit(cast, vec![Operand::Register(register)]);
        }
        Ok(())
    }

    /// Converts the value on top of the stack from `value` to `target`.
    pub(super) fn coerce(&mut self, value: DataTypeValue, target: DataTypeValue) -> Result<(), Abort> {
        if !self.emitting() || value == target || value.data_type == DataType::Null {
            return Ok(());
        }
        self.pop_into(value, target, Register::Op1)?;
        let push = self.typed_op(Operation::Push, target)?;
        self.emit(push, vec![Operand::Register(Register::Op1)]);
        Ok(())
    }

    fn check_assignable(&mut self, value: DataTypeValue, target: DataTypeValue, at: usize) -> Result<(), Abort> {
        if self.emitting() && !can_implicitly_cast(target, value) {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidCast,
                format!("cannot assign {} to {}", value, target),
            ));
        }
        Ok(())
    }

    fn implicit_cast_message(&mut self, value: DataTypeValue, target: DataTypeValue) -> Result<(), Abort> {
        if value.data_type != target.data_type && value.data_type != DataType::Null {
            self.notify(
                ErrorCode::ImplicitCast,
                AlertLevel::Message,
                format!("implicit cast from {} to {}", value, target),
            )?;
        }
        Ok(())
    }

    /// Pops a `value` and writes it to `slot` as `target`.
    pub(super) fn store(
        &mut self,
        value: DataTypeValue,
        target: DataTypeValue,
        slot: Operand,
        at: usize,
    ) -> Result<(), Abort> {
        if !self.emitting() {
            return Ok(());
        }
        self.check_assignable(value, target, at)?;
        if value == target || value.data_type == DataType::Null {
            let pop = self.typed_op(Operation::Pop, target)?;
            self.emit(pop, vec![slot]);
            return Ok(());
        }
        self.pop_into(value, target, Register::Op1)?;
        let mov = self.typed_op(Operation::Mov, target)?;
        self.emit(mov, vec![slot, Operand::Register(Register::Op1)]);
        self.implicit_cast_message(value, target)
    }

    pub(super) fn store_variable(&mut self, id: SymbolId, value: DataTypeValue) -> Result<(), Abort> {
        let target = self.variable_type(id);
        let slot = self.slot(id);
        self.store(value, target, slot, self.pos.saturating_sub(1))
    }

    pub(super) fn store_target(&mut self, target: &Target, value: DataTypeValue, at: usize) -> Result<(), Abort> {
        if !self.emitting() {
            return Ok(());
        }
        let op1 = Operand::Register(Register::Op1);
        match *target {
            Target::Variable { id, data_type } => {
                let slot = self.slot(id);
                self.store(value, data_type, slot, at)
            }
            Target::Element { id, data_type } => {
                self.check_assignable(value, data_type, at)?;
                self.pop_into(value, data_type, Register::Op1)?;
                self.emit(OpCode::PopInt, vec![Operand::Register(Register::Op2)]);
                let mov = self.typed_op(Operation::Mov, data_type)?;
                let slot = self.indexed_slot(id, Register::Op2);
                self.emit(mov, vec![slot, op1]);
                self.implicit_cast_message(value, data_type)
            }
            Target::Member {
                id,
                data_type,
                indexed,
            } => {
                self.check_assignable(value, data_type, at)?;
                self.pop_into(value, data_type, Register::Op1)?;
                let object = Operand::Register(Register::Reserved1);
                if indexed {
                    let index = Operand::Register(Register::Op2);
                    self.emit(OpCode::PopInt, vec![index.clone()]);
                    self.emit(OpCode::PopObject, vec![object.clone()]);
                    self.emit(
                        OpCode::SetMemberIndexed,
                        vec![object, Operand::Symbol(id), index, op1],
                    );
                } else {
                    self.emit(OpCode::PopObject, vec![object.clone()]);
                    self.emit(OpCode::SetMember, vec![object, Operand::Symbol(id), op1]);
                }
                self.implicit_cast_message(value, data_type)
            }
            Target::Unknown => Ok(()),
        }
    }

    /// Pushes the current value of a compound assignment target, keeping
    /// the index or object it needs underneath for the store.
    pub(super) fn load_target(&mut self, target: &Target) -> Result<DataTypeValue, Abort> {
        let reserved1 = Operand::Register(Register::Reserved1);
        let reserved2 = Operand::Register(Register::Reserved2);
        match *target {
            Target::Variable { id, data_type } => {
                self.mark_used(id);
                let push = self.typed_op(Operation::Push, data_type)?;
                let slot = self.slot(id);
                self.emit(push, vec![slot]);
                Ok(data_type)
            }
            Target::Element { id, data_type } => {
                self.mark_used(id);
                self.emit(OpCode::PopInt, vec![reserved1.clone()]);
                self.emit(OpCode::PushInt, vec![reserved1]);
                let push = self.typed_op(Operation::Push, data_type)?;
                let slot = self.indexed_slot(id, Register::Reserved1);
                self.emit(push, vec![slot]);
                Ok(data_type)
            }
            Target::Member {
                id,
                data_type,
                indexed,
            } => {
                self.mark_used(id);
                if indexed {
                    self.emit(OpCode::PopInt, vec![reserved2.clone()]);
                }
                self.emit(OpCode::PopObject, vec![reserved1.clone()]);
                self.emit(OpCode::PushObject, vec![reserved1.clone()]);
                if indexed {
                    self.emit(OpCode::PushInt, vec![reserved2.clone()]);
                    self.emit(
                        OpCode::GetMemberIndexed,
                        vec![reserved1.clone(), Operand::Symbol(id), reserved2],
                    );
                } else {
                    self.emit(OpCode::GetMember, vec![reserved1.clone(), Operand::Symbol(id)]);
                }
                let push = self.typed_op(Operation::Push, data_type)?;
                self.emit(push, vec![reserved1]);
                Ok(data_type)
            }
            Target::Unknown => Ok(DataTypeValue::INVALID),
        }
    }

    /// Parses the left side of an assignment, pushing whatever index or
    /// object the store will need.
    pub(super) fn assignment_target(&mut self) -> Result<Target, Abort> {
        if self.target_has_member_access() {
            return self.member_target();
        }

        let at = self.pos;
        let path = self.qualified_path()?;
        let found = self.resolve_path(&path, |s| s.as_variable().is_some());
        let indexed = self.eat(TokenKind::LBracket);
        if indexed {
            self.index_expression()?;
            self.expect(TokenKind::RBracket)?;
        }

        let Some(id) = found else {
            if self.emitting() {
                return Err(self.error_at(
                    at,
                    ErrorCode::UndeclaredSymbol,
                    format!("'{}' is not declared", dotted(&path)),
                ));
            }
            return Ok(Target::Unknown);
        };
        let (data_type, constant) = match self.symbols.get(id).as_variable() {
            Some(v) => (v.data_type, v.is_constant),
            None => (DataTypeValue::INVALID, false),
        };
        if self.emitting() {
            if constant {
                return Err(self.error_at(
                    at,
                    ErrorCode::IllegalAssignment,
                    format!("cannot assign to constant '{}'", dotted(&path)),
                ));
            }
            if indexed && !data_type.is_array {
                return Err(self.error_at(
                    at,
                    ErrorCode::InvalidIndex,
                    format!("'{}' is not an array", dotted(&path)),
                ));
            }
        }
        Ok(if indexed {
            Target::Element {
                id,
                data_type: data_type.element(),
            }
        } else {
            Target::Variable { id, data_type }
        })
    }

    /// Whether the target ahead goes through `->`.
    fn target_has_member_access(&self) -> bool {
        use TokenKind::*;

        let mut depth = 0usize;
        for token in &self.tokens[self.pos..] {
            match token.kind {
                LParen | LBracket => depth += 1,
                RParen | RBracket if depth > 0 => depth -= 1,
                Arrow if depth == 0 => return true,
                Semicolon | RParen | LBrace | RBrace | Increment | Decrement => return false,
                kind if depth == 0 && kind.is_assignment() => return false,
                _ => {}
            }
        }
        false
    }

    fn member_target(&mut self) -> Result<Target, Abort> {
        let mut ty = self.unary()?;
        loop {
            let at = self.pos;
            match self.member_accessor(ty)? {
                Accessed::Called(result) => {
                    if !self.check(TokenKind::Arrow) {
                        return Err(self.error_at(
                            at,
                            ErrorCode::IllegalAssignment,
                            "cannot assign to the result of a method call",
                        ));
                    }
                    ty = result;
                }
                Accessed::Pending(access) => {
                    if self.check(TokenKind::Arrow) {
                        ty = self.read_member(&access)?;
                        continue;
                    }
                    return Ok(Target::Member {
                        id: access.symbol,
                        data_type: access.data_type,
                        indexed: access.indexed,
                    });
                }
            }
        }
    }
}

fn is_numeric_literal(kind: TokenKind) -> bool {
    kind.literal_type().is_some_and(|t| t.is_numeric())
}

/// Integer and floating value of a numeric literal's text, which may carry
/// a leading `-` and a `0x` prefix.
fn parse_number(text: &str) -> Option<(i64, f64)> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let hex = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"));
    let (int, float) = if let Some(hex) = hex {
        let v = u64::from_str_radix(hex, 16).ok()? as i64;
        (v, v as f64)
    } else if digits.contains('.') {
        let v: f64 = digits.parse().ok()?;
        (v as i64, v)
    } else {
        let v: u64 = digits.parse().ok()?;
        (v as i64, v as f64)
    };
    Some(if negative {
        (int.wrapping_neg(), -float)
    } else {
        (int, float)
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{body, compile_library, compile_unoptimized, find, object};
    use super::parse_number;
    use crate::bytecode::ir::{Operand, Register};
    use crate::bytecode::OpCode;
    use crate::lang::data_type::DataTypeValue;
    use crate::lang::diagnostic::ErrorCode;
    use crate::lang::symbol::{FunctionFlags, SymbolId};

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Some((42, 42.0)));
        assert_eq!(parse_number("-0x10"), Some((-16, -16.0)));
        assert_eq!(parse_number("2.5"), Some((2, 2.5)));
        assert_eq!(parse_number("0xFFFFFFFF"), Some((4294967295, 4294967295.0)));
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_binary_casts_right_operand() {
        let c = compile_unoptimized("float r; void f(float a, int b) { r = a + b; }");
        let o = object(&c);
        assert_eq!(
            body(o, "f"),
            vec![
                OpCode::PushFloat,
                OpCode::PushInt,
                OpCode::PopInt,
                OpCode::PopFloat,
                OpCode::CastFloat,
                OpCode::AddFloat,
                OpCode::PushFloat,
                OpCode::PopFloat,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn test_relational_pushes_bool() {
        let c = compile_unoptimized("bool r; void f(int a) { r = a < 3; }");
        let o = object(&c);
        let code = body(o, "f");
        assert_eq!(
            &code[..6],
            &[
                OpCode::PushInt,
                OpCode::PushInt,
                OpCode::PopInt,
                OpCode::PopInt,
                OpCode::CmpInt,
                OpCode::IsLt
            ]
        );
        assert_eq!(code[6], OpCode::PushBool);
    }

    #[test]
    fn test_operator_type_errors() {
        let c = compile_library("int r; void f(long a) { r = a | 1; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidOperator), 1);

        let c = compile_library("bool r; void f(string a) { r = a < \"b\"; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidOperator), 1);

        let c = compile_library("int r; void f(object a) { r = a + 1; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidCast), 1);
    }

    #[test]
    fn test_overload_prefers_exact_match() {
        let src = "void g(float x) { } void g(int x) { } void f() { g(1); g(1.5); }";
        let c = compile_unoptimized(src);
        let o = object(&c);
        let calls: Vec<Operand> = o
            .function_body(find(o, "f").index)
            .iter()
            .filter(|i| i.opcode == OpCode::Call)
            .map(|i| i.operands[0].clone())
            .collect();
        let int_g = o
            .symbols
            .iter()
            .find(|s| {
                s.identifier == "g"
                    && s.as_function()
                        .is_some_and(|f| f.parameter_types == vec![DataTypeValue::INT])
            })
            .map(|s| s.index);
        assert_eq!(calls.first(), int_g.map(|i| Operand::SymbolIndex(i as i32)).as_ref());
        assert_ne!(calls.first(), calls.get(1));
    }

    #[test]
    fn test_argument_cast_inserted_after_argument() {
        let c = compile_unoptimized("void g(float x, float y) { } void f() { g(1, 2.0); }");
        let o = object(&c);
        assert_eq!(
            body(o, "f"),
            vec![
                OpCode::PushInt,
                OpCode::PopInt,
                OpCode::CastFloat,
                OpCode::PushFloat,
                OpCode::PushFloat,
                OpCode::Call,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn test_call_errors() {
        let c = compile_library("void g(object o) { } void f() { g(1); }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidCast), 1);
        let c = compile_library("void f() { missing(1); }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidFunction), 1);
    }

    #[test]
    fn test_new_array() {
        let c = compile_unoptimized("int[] a; void f() { a = new int[] { 1, 2, 3 }; }");
        let o = object(&c);
        let code = o.function_body(find(o, "f").index);
        let allocate = code.iter().find(|i| i.opcode == OpCode::AllocateHeapInt);
        let allocate = match allocate {
            Some(i) => i,
            None => panic!("no allocation in {:?}", code),
        };
        assert_eq!(
            allocate.operands,
            vec![Operand::Register(Register::Op1), Operand::IntLiteral(3)]
        );
        let pushed: Vec<&Operand> = code
            .iter()
            .filter(|i| i.opcode == OpCode::PushInt)
            .map(|i| &i.operands[0])
            .collect();
        assert_eq!(pushed.last(), Some(&&Operand::IntLiteral(3)));
    }

    #[test]
    fn test_new_array_with_size() {
        let c = compile_unoptimized("float[] a; void f(int n) { a = new float[n * 2]; }");
        let o = object(&c);
        let code = body(o, "f");
        let mul = code.iter().position(|&op| op == OpCode::MulInt);
        let alloc = code.iter().position(|&op| op == OpCode::AllocateHeapFloat);
        assert!(mul.is_some() && mul < alloc);
    }

    #[test]
    fn test_array_element_read() {
        let c = compile_unoptimized("int[] a; int r; void f() { r = a[2]; }");
        let o = object(&c);
        let code = o.function_body(find(o, "f").index);
        let read = code.iter().find(|i| {
            i.opcode == OpCode::PushInt
                && matches!(i.operands[0], Operand::MemoryIndexed(0, Register::Op1))
        });
        assert!(read.is_some(), "{:?}", code);

        let c = compile_library("int a; int r; void f() { r = a[2]; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidIndex), 1);
    }

    #[test]
    fn test_member_read_and_method_call() {
        let src = "int r; void f(object o) { r = o->(int)hp; o->(void)heal(5); o->(void)heal(2.5); }";
        let c = compile_unoptimized(src);
        let o = object(&c);
        let code = body(o, "f");
        assert!(code.contains(&OpCode::GetMember));
        assert_eq!(code.iter().filter(|&&op| op == OpCode::CallMethod).count(), 2);
        let heal = find(o, "heal").as_function().cloned().unwrap_or_default();
        assert!(heal.flags.contains(FunctionFlags::MEMBER_CALL));
        assert_eq!(heal.parameter_types, vec![DataTypeValue::INT]);
        // second call converts its float argument
        assert!(code.contains(&OpCode::CastInt));
    }

    #[test]
    fn test_member_variables_deduplicated_by_type() {
        let src = "void f(object o) { o->(int)x = 1; o->(int)x = 2; o->(float)x = 3.0f; }";
        let c = compile_library(src);
        let o = object(&c);
        let members = o
            .symbols
            .iter()
            .filter(|s| s.scope == Some(SymbolId(o.member_scope)))
            .count();
        assert_eq!(members, 2);
    }

    #[test]
    fn test_member_on_non_object() {
        let c = compile_library("void f(int i) { i->(int)x = 1; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidOperator), 1);
    }

    #[test]
    fn test_constant_reads_are_folded() {
        let c = compile_unoptimized("const int K = 7; int r; void f() { r = K; }");
        let o = object(&c);
        let first = &o.function_body(find(o, "f").index)[0];
        assert_eq!(first.opcode, OpCode::PushInt);
        assert_eq!(first.operands, vec![Operand::IntLiteral(7)]);
    }

    #[test]
    fn test_assign_to_constant() {
        let c = compile_library("const int K = 7; void f() { K = 2; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::IllegalAssignment), 1);
    }

    #[test]
    fn test_explicit_casts() {
        let c = compile_unoptimized("int r; void f(object o) { r = (int)o; }");
        let o = object(&c);
        assert!(body(o, "f").contains(&OpCode::CastInt));

        let c = compile_library("int[] r; void f(int i) { r = (int[])i; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidCast), 1);
    }

    #[test]
    fn test_literal_range() {
        let c = compile_library("byte b = 300b;");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidLiteral), 1);
        let c = compile_library("int i = 0xFFFFFFFF;");
        assert_eq!(c.diagnostics.error_count(), 0);
    }

    #[test]
    fn test_null_assignment_has_no_cast() {
        let c = compile_unoptimized("object g; void f() { g = null; }");
        let o = object(&c);
        assert_eq!(
            body(o, "f"),
            vec![OpCode::PushNull, OpCode::PopObject, OpCode::Return]
        );
    }

    #[test]
    fn test_unary_operators() {
        let c = compile_unoptimized("int r; bool b; void f(int a) { r = -a; r = ~a; b = !b; }");
        let o = object(&c);
        let code = body(o, "f");
        assert!(code.contains(&OpCode::NegInt));
        assert!(code.contains(&OpCode::BitNot));
        assert!(code.contains(&OpCode::LogicalNot));

        let c = compile_library("bool b; void f() { b = -b; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidOperator), 1);
    }

    #[test]
    fn test_postfix_in_expression() {
        let c = compile_unoptimized("int r; void f(int a) { r = a++; }");
        let o = object(&c);
        assert_eq!(
            &body(o, "f")[..2],
            &[OpCode::PushInt, OpCode::IncInt]
        );
    }
}
