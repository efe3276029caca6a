use super::cast::{can_implicitly_cast, operator_valid};
use super::expression::Target;
use super::{Compiler, LoopFrame, Regions, Role};
use crate::bytecode::compile_error::Abort;
use crate::bytecode::ir::{Operand, Register};
use crate::bytecode::op::{typed, OpCode, Operation};
use crate::frontend::token::TokenKind;
use crate::lang::data_type::{DataType, DataTypeValue};
use crate::lang::diagnostic::ErrorCode;
use crate::lang::flags::CompileFlags;
use crate::lang::symbol::{SymbolId, SymbolKind};

/// Shape of a statement that does not start with a keyword.
enum Form {
    Assignment,
    /// `target++` / `target--`
    Step,
    Expression,
}

impl Compiler {
    pub(super) fn statement(&mut self) -> Result<(), Abort> {
        use TokenKind::*;

        let Some(kind) = self.peek_kind() else {
            return Ok(());
        };
        match kind {
            Semicolon => {
                self.pos += 1;
                Ok(())
            }
            LBrace => self.block(),
            LBracket => self.metadata_block(),
            State => self.state_declaration(),
            Enum => self.enum_declaration(),
            Namespace => self.namespace_declaration(),
            If => self.if_statement(),
            While => self.while_statement(),
            Do => self.do_statement(),
            For => self.for_statement(),
            Switch => self.switch_statement(),
            Return => self.return_statement(),
            Break => self.break_statement(),
            Continue => self.continue_statement(),
            Goto => self.goto_statement(),
            GotoState => self.gotostate_statement(),
            Lock | Atom => self.exclusive_statement(kind),
            Breakpoint => self.breakpoint_statement(),
            Case | Default | Else => Err(self.unexpected("outside its statement")),
            Identifier if self.peek_kind_at(1) == Some(Colon) => self.label_statement(),
            _ if self.starts_declaration() => self.declaration(),
            _ => {
                self.require_function("statements")?;
                self.simple_statement()?;
                self.expect(Semicolon)?;
                Ok(())
            }
        }
    }

    fn require_function(&mut self, what: &str) -> Result<(), Abort> {
        if self.in_function() {
            Ok(())
        } else {
            Err(self.error(
                ErrorCode::InvalidScope,
                format!("{} are only allowed inside functions", what),
            ))
        }
    }

    /// Statements up to and including the closing `}`.
    pub(super) fn block_contents(&mut self) -> Result<(), Abort> {
        while !self.check(TokenKind::RBrace) {
            if self.at_end() {
                return Err(self.unexpected_end());
            }
            self.guarded_statement()?;
        }
        self.pos += 1;
        Ok(())
    }

    fn block(&mut self) -> Result<(), Abort> {
        self.require_function("blocks")?;
        self.pos += 1;
        self.blocks.push(Vec::new());
        let result = self.block_contents();
        self.blocks.pop();
        result
    }

    /// Body of a control statement.
    fn body(&mut self) -> Result<(), Abort> {
        if self.at_end() {
            return Err(self.unexpected_end());
        }
        self.guarded_statement()
    }

    /// `( expr )` as a branch condition.
    fn condition(&mut self) -> Result<(), Abort> {
        self.expect(TokenKind::LParen)?;
        self.condition_expression()?;
        self.expect(TokenKind::RParen)?;
        Ok(())
    }

    /// Evaluates a bool and compares it with `false`, so `JMP_EQ` is taken
    /// when the condition does not hold.
    fn condition_expression(&mut self) -> Result<(), Abort> {
        let at = self.pos;
        let ty = self.expression()?;
        if self.emitting() && !can_implicitly_cast(DataTypeValue::BOOL, ty) {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidCast,
                format!("condition must be bool, found {}", ty),
            ));
        }
        self.pop_into(ty, DataTypeValue::BOOL, Register::Op1)?;
        self.emit(
            OpCode::CmpBool,
            vec![Operand::Register(Register::Op1), Operand::BoolLiteral(false)],
        );
        Ok(())
    }

    // =========================================================================
    // Branches and loops
    // =========================================================================

    fn if_statement(&mut self) -> Result<(), Abort> {
        self.require_function("if statements")?;
        let at = self.pos;
        self.pos += 1;
        let otherwise = self.target(at, Role::Else)?;
        let end = self.target(at, Role::End)?;

        self.condition()?;
        self.jump(OpCode::JmpEq, otherwise);
        self.body()?;
        if self.eat(TokenKind::Else) {
            self.jump(OpCode::Jmp, end);
            self.bind(otherwise);
            self.body()?;
        } else {
            self.bind(otherwise);
        }
        self.bind(end);
        Ok(())
    }

    fn looped(&mut self, frame: LoopFrame) -> Result<(), Abort> {
        self.loops.push(frame);
        let result = self.body();
        self.loops.pop();
        result
    }

    fn while_statement(&mut self) -> Result<(), Abort> {
        self.require_function("while loops")?;
        let at = self.pos;
        self.pos += 1;
        let start = self.target(at, Role::Start)?;
        let end = self.target(at, Role::End)?;

        self.bind(start);
        self.condition()?;
        self.jump(OpCode::JmpEq, end);
        self.looped(LoopFrame {
            break_target: end,
            continue_target: Some(start),
            counter: None,
            regions: self.regions,
        })?;
        self.jump(OpCode::Jmp, start);
        self.bind(end);
        Ok(())
    }

    /// `do body while (cond);`, `do (n) body` or a bare `do body`.
    fn do_statement(&mut self) -> Result<(), Abort> {
        self.require_function("do loops")?;
        let at = self.pos;
        self.pos += 1;
        if self.check(TokenKind::LParen) {
            return self.repeat_statement(at);
        }
        let start = self.target(at, Role::Start)?;
        let resume = self.target(at, Role::Continue)?;
        let end = self.target(at, Role::End)?;

        self.bind(start);
        self.looped(LoopFrame {
            break_target: end,
            continue_target: Some(resume),
            counter: None,
            regions: self.regions,
        })?;
        self.bind(resume);
        if self.eat(TokenKind::While) {
            self.condition()?;
            self.jump(OpCode::JmpNe, start);
            self.expect(TokenKind::Semicolon)?;
        }
        self.bind(end);
        Ok(())
    }

    /// `do (n) body` runs the body `n` times; `indexer` reads the count so far.
    fn repeat_statement(&mut self, at: usize) -> Result<(), Abort> {
        let counter = self.local(at, Role::Counter, "$counter", DataTypeValue::INT)?;
        let limit = self.local(at, Role::Limit, "$limit", DataTypeValue::INT)?;
        let start = self.target(at, Role::Start)?;
        let resume = self.target(at, Role::Continue)?;
        let end = self.target(at, Role::End)?;

        self.expect(TokenKind::LParen)?;
        let count_at = self.pos;
        let ty = self.expression()?;
        if self.emitting()
            && !(ty.data_type.is_numeric() && !ty.is_array && can_implicitly_cast(DataTypeValue::INT, ty))
        {
            return Err(self.error_at(
                count_at,
                ErrorCode::InvalidCast,
                format!("repeat count must be numeric, found {}", ty),
            ));
        }
        self.expect(TokenKind::RParen)?;

        let counter_slot = self.slot(counter);
        let limit_slot = self.slot(limit);
        if ty == DataTypeValue::INT {
            self.emit(OpCode::PopInt, vec![limit_slot.clone()]);
        } else {
            self.pop_into(ty, DataTypeValue::INT, Register::Op1)?;
            self.emit(
                OpCode::MovInt,
                vec![limit_slot.clone(), Operand::Register(Register::Op1)],
            );
        }
        self.emit(OpCode::MovInt, vec![counter_slot.clone(), Operand::IntLiteral(0)]);

        self.bind(start);
        self.emit(OpCode::CmpInt, vec![counter_slot.clone(), limit_slot]);
        self.jump(OpCode::JmpGe, end);
        self.looped(LoopFrame {
            break_target: end,
            continue_target: Some(resume),
            counter: Some(counter),
            regions: self.regions,
        })?;
        self.bind(resume);
        self.emit(OpCode::IncInt, vec![counter_slot]);
        self.jump(OpCode::Jmp, start);
        self.bind(end);
        Ok(())
    }

    fn for_statement(&mut self) -> Result<(), Abort> {
        self.require_function("for loops")?;
        let at = self.pos;
        self.pos += 1;
        let start = self.target(at, Role::Start)?;
        let resume = self.target(at, Role::Continue)?;
        let end = self.target(at, Role::End)?;

        self.expect(TokenKind::LParen)?;
        self.blocks.push(Vec::new());
        let result = self.for_clauses(start, resume, end);
        self.blocks.pop();
        result
    }

    /// The increment is compiled after the body by rewinding to it.
    fn for_clauses(&mut self, start: SymbolId, resume: SymbolId, end: SymbolId) -> Result<(), Abort> {
        if self.starts_declaration() {
            self.declaration()?;
        } else {
            if !self.check(TokenKind::Semicolon) {
                self.simple_statement()?;
            }
            self.expect(TokenKind::Semicolon)?;
        }

        self.bind(start);
        if !self.check(TokenKind::Semicolon) {
            self.condition_expression()?;
            self.jump(OpCode::JmpEq, end);
        }
        self.expect(TokenKind::Semicolon)?;

        let increment = self.pos;
        self.skip_balanced(TokenKind::LParen, TokenKind::RParen)?;
        self.looped(LoopFrame {
            break_target: end,
            continue_target: Some(resume),
            counter: None,
            regions: self.regions,
        })?;

        self.bind(resume);
        let after = self.pos;
        self.pos = increment;
        if !self.check(TokenKind::RParen) {
            self.simple_statement()?;
        }
        self.expect(TokenKind::RParen)?;
        self.pos = after;

        self.jump(OpCode::Jmp, start);
        self.bind(end);
        Ok(())
    }

    // =========================================================================
    // Switch
    // =========================================================================

    /// Compares the value against each `case` in order. A failed comparison
    /// jumps to the next test; falling off a clause jumps over the following
    /// test into the next body. `default` is tried after every case failed.
    fn switch_statement(&mut self) -> Result<(), Abort> {
        self.require_function("switch statements")?;
        let at = self.pos;
        self.pos += 1;
        let end = self.target(at, Role::End)?;

        self.expect(TokenKind::LParen)?;
        let value_at = self.pos;
        let ty = self.expression()?;
        self.expect(TokenKind::RParen)?;
        if self.emitting() && typed(Operation::Cmp, ty).is_none() {
            return Err(self.error_at(
                value_at,
                ErrorCode::InvalidOperator,
                format!("cannot switch on a value of type {}", ty),
            ));
        }

        let value = self.local(at, Role::Value, "$switch", ty)?;
        if self.emitting() {
            self.set_variable_type(value, ty);
            let pop = self.typed_op(Operation::Pop, ty)?;
            let slot = self.slot(value);
            self.emit(pop, vec![slot]);
        }

        self.expect(TokenKind::LBrace)?;
        self.loops.push(LoopFrame {
            break_target: end,
            continue_target: None,
            counter: None,
            regions: self.regions,
        });
        let result = self.switch_clauses(value, ty, end);
        self.loops.pop();
        result
    }

    fn switch_clauses(&mut self, value: SymbolId, ty: DataTypeValue, end: SymbolId) -> Result<(), Abort> {
        let mut pending_test: Option<SymbolId> = None;
        let mut default_body: Option<SymbolId> = None;

        while !self.check(TokenKind::RBrace) {
            let at = self.pos;
            let kind = self.advance()?.kind;
            if !matches!(kind, TokenKind::Case | TokenKind::Default) {
                self.pos = at;
                return Err(self.unexpected("in switch, expected 'case' or 'default'"));
            }
            let body = self.target(at, Role::Body)?;
            let next_test = self.target(at, Role::Test)?;

            if let Some(test) = pending_test {
                // previous clause falls through into this body
                self.jump(OpCode::Jmp, body);
                self.bind(test);
            }
            if kind == TokenKind::Case {
                let label = self.case_label(ty)?;
                self.expect(TokenKind::Colon)?;
                let cmp = self.typed_op(Operation::Cmp, ty)?;
                let slot = self.slot(value);
                self.emit(cmp, vec![slot, label]);
                self.jump(OpCode::JmpNe, next_test);
            } else {
                if default_body.is_some() {
                    return Err(self.error_at(
                        at,
                        ErrorCode::DuplicateSymbol,
                        "switch already has a default clause",
                    ));
                }
                self.expect(TokenKind::Colon)?;
                default_body = Some(body);
                self.jump(OpCode::Jmp, next_test);
            }
            self.bind(body);
            pending_test = Some(next_test);

            while !matches!(
                self.peek_kind(),
                Some(TokenKind::Case | TokenKind::Default | TokenKind::RBrace)
            ) {
                if self.at_end() {
                    return Err(self.unexpected_end());
                }
                self.guarded_statement()?;
            }
        }
        self.pos += 1;

        if let Some(test) = pending_test {
            self.jump(OpCode::Jmp, end);
            self.bind(test);
        }
        if let Some(body) = default_body {
            self.jump(OpCode::Jmp, body);
        }
        self.bind(end);
        Ok(())
    }

    /// A literal or a folded constant, converted to the switch type.
    fn case_label(&mut self, ty: DataTypeValue) -> Result<Operand, Abort> {
        if let Some(literal) = self.folded_literal(&[TokenKind::Colon]) {
            return self.literal_operand(&literal, ty);
        }
        let at = self.pos;
        let path = self.qualified_path()?;
        let constant = self.resolve_path(&path, |s| {
            s.as_variable().is_some_and(|v| v.literal.is_some())
        });
        match constant {
            Some(id) => {
                self.mark_used(id);
                let literal = self
                    .symbols
                    .get(id)
                    .as_variable()
                    .and_then(|v| v.literal.clone());
                match literal {
                    Some(literal) => self.literal_operand(&literal, ty),
                    None => Ok(Operand::IntLiteral(0)),
                }
            }
            None if !self.emitting() => Ok(Operand::IntLiteral(0)),
            None => Err(self.error_at(
                at,
                ErrorCode::InvalidLiteral,
                "case labels must be literals or constants with a literal value",
            )),
        }
    }

    // =========================================================================
    // Jumps
    // =========================================================================

    fn return_statement(&mut self) -> Result<(), Abort> {
        self.require_function("return statements")?;
        let at = self.pos;
        self.pos += 1;
        let return_type = self
            .symbols
            .get(self.function)
            .as_function()
            .map_or(DataTypeValue::VOID, |f| f.return_type);

        if self.check(TokenKind::Semicolon) {
            if self.emitting() && !return_type.is_void() {
                return Err(self.error_at(
                    at,
                    ErrorCode::InvalidReturn,
                    format!("function must return a value of type {}", return_type),
                ));
            }
        } else {
            let value = self.expression()?;
            if self.emitting() && return_type.is_void() {
                return Err(self.error_at(
                    at,
                    ErrorCode::InvalidReturn,
                    "void function cannot return a value",
                ));
            }
            self.store(value, return_type, Operand::Register(Register::Return), at)?;
        }
        self.expect(TokenKind::Semicolon)?;

        self.leave_regions(Regions::default());
        self.emit(OpCode::Return, vec![]);
        Ok(())
    }

    /// Optional `n` or `(n)` after `break`/`continue`; defaults to 1.
    fn jump_depth(&mut self) -> Result<usize, Abort> {
        let parenthesised = self.eat(TokenKind::LParen);
        let depth = match self.peek() {
            Some(t) if t.kind == TokenKind::IntegerLiteral => {
                let parsed = t.text.parse::<usize>().ok().filter(|&d| d > 0);
                match parsed {
                    Some(depth) => {
                        self.pos += 1;
                        depth
                    }
                    None => {
                        return Err(self.error(
                            ErrorCode::InvalidLiteral,
                            "loop depth must be a positive integer",
                        ))
                    }
                }
            }
            _ if parenthesised => return Err(self.unexpected("where a loop depth was expected")),
            _ => 1,
        };
        if parenthesised {
            self.expect(TokenKind::RParen)?;
        }
        Ok(depth)
    }

    fn break_statement(&mut self) -> Result<(), Abort> {
        self.require_function("break statements")?;
        let at = self.pos;
        self.pos += 1;
        let depth = self.jump_depth()?;
        let frame = match self.loops.len().checked_sub(depth) {
            Some(i) => self.loops[i],
            None => {
                return Err(self.error_at(
                    at,
                    ErrorCode::InvalidBreak,
                    format!("break {} is not inside {} loop or switch", depth, depth),
                ))
            }
        };
        self.expect(TokenKind::Semicolon)?;
        self.leave_regions(frame.regions);
        self.jump(OpCode::Jmp, frame.break_target);
        Ok(())
    }

    /// Closes the regions opened inside `outer` before control jumps out to it.
    fn leave_regions(&mut self, outer: Regions) {
        if self.regions.atom.is_some() && self.regions.atom != outer.atom {
            self.emit(OpCode::ExitAtom, vec![]);
        }
        if self.regions.lock.is_some() && self.regions.lock != outer.lock {
            self.emit(OpCode::ExitLock, vec![]);
        }
    }

    fn continue_statement(&mut self) -> Result<(), Abort> {
        self.require_function("continue statements")?;
        let at = self.pos;
        self.pos += 1;
        let depth = self.jump_depth()?;
        let target = self
            .loops
            .iter()
            .rev()
            .filter_map(|f| Some((f.continue_target?, f.regions)))
            .nth(depth - 1);
        let Some((target, regions)) = target else {
            return Err(self.error_at(
                at,
                ErrorCode::InvalidContinue,
                format!("continue {} is not inside {} loop", depth, depth),
            ));
        };
        self.expect(TokenKind::Semicolon)?;
        self.leave_regions(regions);
        self.jump(OpCode::Jmp, target);
        Ok(())
    }

    fn label_statement(&mut self) -> Result<(), Abort> {
        self.require_function("labels")?;
        let at = self.pos;
        let name = self.advance()?;
        self.pos += 1;

        let function = self.function;
        if self.emitting() {
            if self.rejected.contains(&(at, Role::Declaration)) {
                return Ok(());
            }
        } else {
            let exists = self
                .symbols
                .find_child(function, &name.text, |s| {
                    matches!(s.kind, SymbolKind::JumpTarget { .. })
                })
                .is_some();
            if exists {
                // the statement after the label still compiles
                let _ = self.reject(
                    at,
                    ErrorCode::DuplicateSymbol,
                    format!("label '{}' is already defined in this function", name.text),
                );
                return Ok(());
            }
        }

        let label = self.keyed(at, Role::Declaration, |c| {
            c.symbols.add(
                Some(function),
                name.text.clone(),
                SymbolKind::JumpTarget { bound: None },
            )
        })?;
        if !self.emitting() {
            self.label_regions.insert(label, self.regions);
        }
        self.bind(label);
        Ok(())
    }

    fn goto_statement(&mut self) -> Result<(), Abort> {
        self.require_function("goto statements")?;
        self.pos += 1;
        let label_at = self.pos;
        let label = self.expect_identifier()?;
        let target = self.symbols.find_child(self.function, &label.text, |s| {
            matches!(s.kind, SymbolKind::JumpTarget { .. })
        });
        let target = match target {
            Some(target) => target,
            None if self.emitting() => {
                return Err(self.error_at(
                    label_at,
                    ErrorCode::InvalidLabel,
                    format!("no label named '{}' in this function", label.text),
                ))
            }
            None => return self.expect(TokenKind::Semicolon).map(|_| ()),
        };
        let regions = self.label_regions.get(&target).copied().unwrap_or_default();
        let enters = |open: Option<usize>, current: Option<usize>| open.is_some() && open != current;
        if self.emitting()
            && (enters(regions.lock, self.regions.lock) || enters(regions.atom, self.regions.atom))
        {
            return Err(self.error_at(
                label_at,
                ErrorCode::InvalidLabel,
                format!("goto cannot jump into the lock or atom region holding '{}'", label.text),
            ));
        }
        self.expect(TokenKind::Semicolon)?;
        self.leave_regions(regions);
        self.jump(OpCode::Jmp, target);
        Ok(())
    }

    fn gotostate_statement(&mut self) -> Result<(), Abort> {
        self.require_function("gotostate statements")?;
        self.pos += 1;
        let at = self.pos;
        let path = self.qualified_path()?;
        let state = self.resolve_path(&path, |s| {
            matches!(s.kind, SymbolKind::State(_))
        });
        match state {
            Some(state) => self.emit(OpCode::GotoState, vec![Operand::Symbol(state)]),
            None if self.emitting() => {
                return Err(self.error_at(
                    at,
                    ErrorCode::InvalidState,
                    format!("no state named '{}'", dotted(&path)),
                ))
            }
            None => {}
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(())
    }

    // =========================================================================
    // Exclusive regions and debugging
    // =========================================================================

    fn exclusive_statement(&mut self, kind: TokenKind) -> Result<(), Abort> {
        let is_lock = kind == TokenKind::Lock;
        self.require_function(if is_lock { "lock regions" } else { "atom regions" })?;
        let at = self.pos;
        self.pos += 1;

        let open = if is_lock { self.regions.lock } else { self.regions.atom };
        let nested = open.is_some();
        if nested {
            let (code, what) = if is_lock {
                (ErrorCode::NestedLock, "lock")
            } else {
                (ErrorCode::NestedAtom, "atom")
            };
            return Err(self.error_at(at, code, format!("'{}' regions cannot be nested", what)));
        }

        let (enter, exit) = if is_lock {
            (OpCode::EnterLock, OpCode::ExitLock)
        } else {
            (OpCode::EnterAtom, OpCode::ExitAtom)
        };
        self.emit(enter, vec![]);
        self.set_exclusive(is_lock, Some(at));
        let result = self.body();
        self.set_exclusive(is_lock, None);
        result?;
        self.emit(exit, vec![]);
        Ok(())
    }

    fn set_exclusive(&mut self, is_lock: bool, opened: Option<usize>) {
        if is_lock {
            self.regions.lock = opened;
        } else {
            self.regions.atom = opened;
        }
    }

    fn breakpoint_statement(&mut self) -> Result<(), Abort> {
        self.require_function("breakpoints")?;
        self.pos += 1;
        self.expect(TokenKind::Semicolon)?;
        if self.options.flags.contains(CompileFlags::DEBUG) {
            self.emit(OpCode::Breakpoint, vec![]);
        }
        Ok(())
    }

    // =========================================================================
    // Assignments and expression statements
    // =========================================================================

    /// Assignment, increment or expression evaluated for its effect. Does not
    /// consume the terminator.
    pub(super) fn simple_statement(&mut self) -> Result<(), Abort> {
        if let Some(op @ (TokenKind::Increment | TokenKind::Decrement)) = self.peek_kind() {
            self.pos += 1;
            let target = self.assignment_target()?;
            return self.step_target(&target, op);
        }

        match self.statement_form() {
            Form::Assignment => self.assignment(),
            Form::Step => {
                let target = self.assignment_target()?;
                let op = self.advance()?.kind;
                self.step_target(&target, op)
            }
            Form::Expression => {
                let ty = self.expression()?;
                if !ty.is_void() {
                    self.emit(OpCode::PopDestroy, vec![]);
                }
                Ok(())
            }
        }
    }

    /// Looks ahead to the end of the statement without consuming anything.
    fn statement_form(&self) -> Form {
        let mut depth = 0usize;
        let mut last = None;
        for token in &self.tokens[self.pos..] {
            match token.kind {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket if depth > 0 => depth -= 1,
                TokenKind::RParen | TokenKind::Semicolon | TokenKind::LBrace | TokenKind::RBrace => {
                    break
                }
                kind if depth == 0 && kind.is_assignment() => return Form::Assignment,
                _ => {}
            }
            last = Some(token.kind);
        }
        match last {
            Some(TokenKind::Increment | TokenKind::Decrement) => Form::Step,
            _ => Form::Expression,
        }
    }

    fn assignment(&mut self) -> Result<(), Abort> {
        let target = self.assignment_target()?;
        let at = self.pos;
        let op = match self.peek_kind() {
            Some(kind) if kind.is_assignment() => kind,
            _ => return Err(self.unexpected("where an assignment operator was expected")),
        };
        self.pos += 1;

        let value = match op.compound_operator() {
            Some(binary) => {
                let current = self.load_target(&target)?;
                let rhs = self.expression()?;
                self.binary(binary, current, rhs, at)?
            }
            None => self.expression()?,
        };
        self.store_target(&target, value, at)
    }

    /// `++`/`--` applied for effect.
    fn step_target(&mut self, target: &Target, op: TokenKind) -> Result<(), Abort> {
        let ty = target.data_type();
        if self.emitting() && !operator_valid(op, ty) {
            return Err(self.error(
                ErrorCode::InvalidOperator,
                format!("operator {} cannot be applied to {}", op.describe(), ty),
            ));
        }
        match *target {
            Target::Variable { id, data_type } => {
                let operation = if op == TokenKind::Increment {
                    Operation::Inc
                } else {
                    Operation::Dec
                };
                let opcode = self.typed_op(operation, data_type)?;
                let slot = self.slot(id);
                self.emit(opcode, vec![slot]);
                Ok(())
            }
            Target::Element { .. } | Target::Member { .. } => {
                let at = self.pos.saturating_sub(1);
                let current = self.load_target(target)?;
                self.push_one(current)?;
                let binary = if op == TokenKind::Increment {
                    TokenKind::Plus
                } else {
                    TokenKind::Minus
                };
                let value = self.binary(binary, current, current, at)?;
                self.store_target(target, value, at)
            }
            Target::Unknown => Ok(()),
        }
    }

    fn push_one(&mut self, ty: DataTypeValue) -> Result<(), Abort> {
        let operand = match ty.data_type {
            DataType::Byte => Operand::ByteLiteral(1),
            DataType::Short => Operand::ShortLiteral(1),
            DataType::Long => Operand::LongLiteral(1),
            DataType::Float => Operand::FloatLiteral(1.0),
            DataType::Double => Operand::DoubleLiteral(1.0),
            _ => Operand::IntLiteral(1),
        };
        let push = self.typed_op(Operation::Push, ty)?;
        self.emit(push, vec![operand]);
        Ok(())
    }
}

/// `A.B.c` for diagnostics.
pub(super) fn dotted(path: &[crate::frontend::token::Token]) -> String {
    path.iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::super::tests::{body, compile_library, compile_unoptimized, compile_with, object};
    use crate::bytecode::ir::Operand;
    use crate::bytecode::OpCode;
    use crate::lang::diagnostic::ErrorCode;
    use crate::lang::flags::CompileFlags;
    use crate::lang::symbol::SymbolKind;

    fn jump_targets_in_range(o: &crate::bytecode::ObjectFile) {
        for i in &o.instructions {
            for op in &i.operands {
                if let Operand::InstructionIndex(n) = op {
                    assert!((*n as usize) < o.instructions.len(), "jump out of range: {}", n);
                }
            }
        }
    }

    #[test]
    fn test_if_else_shape() {
        let c = compile_unoptimized("int r; void f(bool c) { if (c) r = 1; else r = 2; }");
        let o = object(&c);
        let code = body(o, "f");
        assert_eq!(
            &code[..4],
            &[OpCode::PushBool, OpCode::PopBool, OpCode::CmpBool, OpCode::JmpEq]
        );
        assert!(code.contains(&OpCode::Jmp));
        jump_targets_in_range(o);
    }

    #[test]
    fn test_while_jumps_back() {
        let c = compile_unoptimized("void f() { int i = 0; while (i < 10) i++; }");
        let o = object(&c);
        let f = super::super::tests::find(o, "f");
        let entry = f.as_function().and_then(|f| f.entry_point).unwrap_or(usize::MAX);
        let code = o.function_body(f.index);
        let back = code
            .iter()
            .rev()
            .find(|i| i.opcode == OpCode::Jmp)
            .map(|i| i.operands[0].clone());
        // the loop head is the first instruction after `int i = 0`
        assert_eq!(back, Some(Operand::InstructionIndex(entry as i32 + 2)));
    }

    #[test]
    fn test_repeat_loop_and_indexer() {
        let c = compile_unoptimized("int total; void f() { do (3) { total = total + indexer; } }");
        let o = object(&c);
        let code = body(o, "f");
        assert!(code.contains(&OpCode::CmpInt));
        assert!(code.contains(&OpCode::JmpGe));
        assert!(code.contains(&OpCode::IncInt));
        assert_eq!(o.internal_variable_count, 2);

        let c = compile_library("int x; void f() { x = indexer; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidIndexer), 1);
    }

    #[test]
    fn test_do_while_and_bare_do() {
        let c = compile_unoptimized("void f() { int i = 0; do { i++; } while (i < 3); do { i--; } }");
        let o = object(&c);
        let code = body(o, "f");
        assert_eq!(code.iter().filter(|&&op| op == OpCode::JmpNe).count(), 1);
        jump_targets_in_range(o);
    }

    #[test]
    fn test_for_increment_after_body() {
        let c = compile_unoptimized("int s; void f() { for (int i = 0; i < 4; i++) { s = s + i; } }");
        let o = object(&c);
        let code = body(o, "f");
        let add = code.iter().position(|&op| op == OpCode::AddInt);
        let inc = code.iter().position(|&op| op == OpCode::IncInt);
        assert!(add < inc, "increment must follow the body: {:?}", code);
        jump_targets_in_range(o);
    }

    #[test]
    fn test_switch_with_default() {
        let src = "int r; void f(int v) { switch (v) { case 1: r = 10; break; case 2: case 3: r = 20; break; default: r = 0; } }";
        let c = compile_unoptimized(src);
        let o = object(&c);
        let code = body(o, "f");
        assert_eq!(code.iter().filter(|&&op| op == OpCode::CmpInt).count(), 3);
        assert_eq!(code.iter().filter(|&&op| op == OpCode::JmpNe).count(), 3);
        jump_targets_in_range(o);
    }

    #[test]
    fn test_switch_duplicate_default() {
        let c = compile_library("void f(int v) { switch (v) { default: break; default: break; } }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::DuplicateSymbol), 1);
    }

    #[test]
    fn test_break_and_continue_depth() {
        let c = compile_library(
            "void f() { while (true) { while (true) { break 2; } continue; } }",
        );
        assert_eq!(c.diagnostics.error_count(), 0);

        let c = compile_library("void f() { while (true) { break (3); } }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidBreak), 1);

        let c = compile_library("void f(int v) { switch (v) { case 1: continue; } }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidContinue), 1);

        let c = compile_library("void f() { break; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidBreak), 1);
    }

    #[test]
    fn test_labels_and_goto() {
        let c = compile_unoptimized("void f() { goto done; done: return; }");
        let o = object(&c);
        let label = o
            .symbols
            .iter()
            .find(|s| s.identifier == "done")
            .map(|s| s.kind.clone());
        assert!(matches!(label, Some(SymbolKind::JumpTarget { bound: Some(_) })));

        let c = compile_library("void f() { goto nowhere; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidLabel), 1);
    }

    #[test]
    fn test_gotostate() {
        let c = compile_library("state Idle { } state Run { event void Go() { gotostate Idle; } }");
        let o = object(&c);
        assert!(body(o, "Go").contains(&OpCode::GotoState));

        let c = compile_library("void f() { gotostate Missing; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidState), 1);
    }

    #[test]
    fn test_lock_and_atom() {
        let c = compile_unoptimized("int r; int f() { lock { r = 1; return r; } }");
        let o = object(&c);
        let code = body(o, "f");
        let exit = code.iter().position(|&op| op == OpCode::ExitLock);
        let ret = code.iter().position(|&op| op == OpCode::Return);
        assert!(exit.is_some() && exit < ret);

        let c = compile_library("void f() { lock { lock { } } }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::NestedLock), 1);
        let c = compile_library("void f() { atom { atom { } } }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::NestedAtom), 1);
    }

    /// Region exits emitted between entering the region and the first jump.
    fn exits_before_jump(code: &[OpCode], enter: OpCode, exit: OpCode) -> usize {
        let start = code.iter().position(|&op| op == enter).unwrap();
        let jump = start + code[start..].iter().position(|&op| op == OpCode::Jmp).unwrap();
        code[start..jump].iter().filter(|&&op| op == exit).count()
    }

    #[test]
    fn test_break_and_continue_leave_regions() {
        let c = compile_unoptimized("void f(bool c) { while (c) { lock { break; } } }");
        let code = body(object(&c), "f");
        assert_eq!(exits_before_jump(&code, OpCode::EnterLock, OpCode::ExitLock), 1);

        let c = compile_unoptimized("void f(bool c) { while (c) { atom { continue; } } }");
        let code = body(object(&c), "f");
        assert_eq!(exits_before_jump(&code, OpCode::EnterAtom, OpCode::ExitAtom), 1);

        let c = compile_unoptimized("void f(bool c) { while (c) { atom { break; } } }");
        let code = body(object(&c), "f");
        assert_eq!(exits_before_jump(&code, OpCode::EnterAtom, OpCode::ExitAtom), 1);

        let c = compile_unoptimized("void f(bool c) { while (c) { lock { continue; } } }");
        let code = body(object(&c), "f");
        assert_eq!(exits_before_jump(&code, OpCode::EnterLock, OpCode::ExitLock), 1);
    }

    #[test]
    fn test_loop_inside_region_keeps_it_open() {
        let c = compile_unoptimized("void f(bool c) { lock { while (c) { break; } } }");
        let code = body(object(&c), "f");
        assert_eq!(code.iter().filter(|&&op| op == OpCode::ExitLock).count(), 1);
        assert_eq!(exits_before_jump(&code, OpCode::EnterLock, OpCode::ExitLock), 0);
    }

    #[test]
    fn test_goto_leaves_regions() {
        let c = compile_unoptimized("void f() { lock { goto out; } out: ; }");
        let code = body(object(&c), "f");
        assert_eq!(exits_before_jump(&code, OpCode::EnterLock, OpCode::ExitLock), 1);

        let c = compile_unoptimized("void f() { atom { goto out; } out: ; }");
        let code = body(object(&c), "f");
        assert_eq!(exits_before_jump(&code, OpCode::EnterAtom, OpCode::ExitAtom), 1);

        let c = compile_unoptimized("void f() { lock { goto again; again: ; } }");
        let code = body(object(&c), "f");
        assert_eq!(exits_before_jump(&code, OpCode::EnterLock, OpCode::ExitLock), 0);
    }

    #[test]
    fn test_goto_into_region_rejected() {
        let c = compile_library("void f() { goto inside; lock { inside: ; } }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidLabel), 1);
        assert!(c.object.is_none());
    }

    #[test]
    fn test_breakpoint_only_in_debug() {
        let src = "void f() { breakpoint; }";
        let o = compile_library(src);
        assert!(!body(object(&o), "f").contains(&OpCode::Breakpoint));
        let o = compile_with(src, CompileFlags::LIBRARY | CompileFlags::DEBUG);
        assert!(body(object(&o), "f").contains(&OpCode::Breakpoint));
    }

    #[test]
    fn test_return_checks() {
        let c = compile_library("int f() { return; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidReturn), 1);
        let c = compile_library("void f() { return 1; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidReturn), 1);
        let c = compile_library("object f() { return 1; }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidCast), 1);
    }

    #[test]
    fn test_statements_outside_functions() {
        let c = compile_library("if (true) { }");
        assert_eq!(c.diagnostics.count_code(ErrorCode::InvalidScope), 1);
    }

    #[test]
    fn test_expression_statement_discards_value() {
        let c = compile_unoptimized("int g() { return 1; } void f() { g(); }");
        let o = object(&c);
        let code = body(o, "f");
        assert_eq!(
            code,
            vec![OpCode::Call, OpCode::PushInt, OpCode::PopDestroy, OpCode::Return]
        );
    }

    #[test]
    fn test_element_increment() {
        let c = compile_unoptimized("int[] a; void f() { a[1]++; a[0] += 2; }");
        let o = object(&c);
        let code = body(o, "f");
        assert_eq!(code.iter().filter(|&&op| op == OpCode::AddInt).count(), 2);
        assert_eq!(code.iter().filter(|&&op| op == OpCode::MovInt).count(), 2);
    }
}
