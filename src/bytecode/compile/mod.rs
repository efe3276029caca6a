//! Two-pass recursive-descent compiler.
//!
//! The grammar is walked twice over the same token list with identical
//! control flow. The declare pass builds every symbol and validates
//! declarations; the emit pass finds those symbols again by the position of
//! the token that declared them, type checks expressions and appends
//! instructions to the function that owns them. Forward references need no
//! fix-up lists because the emit pass starts with a complete table.

pub mod cast;
mod declare;
mod expression;
mod link;
mod statement;

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::bytecode::compile_error::Abort;
use crate::bytecode::ir::{Instruction, Operand, Register};
use crate::bytecode::object_file::ObjectFile;
use crate::bytecode::op::OpCode;
use crate::bytecode::optimize::optimize;
use crate::frontend::lexer::analyse;
use crate::frontend::preprocess::{Define, Preprocessor};
use crate::frontend::token::{Token, TokenKind};
use crate::lang::data_type::DataTypeValue;
use crate::lang::diagnostic::{AlertLevel, Diagnostics, ErrorCode};
use crate::lang::flags::CompileFlags;
use crate::lang::symbol::{
    AccessModifier, FunctionFlags, FunctionSymbol, Storage, Symbol, SymbolId, SymbolKind,
    SymbolTable, VariableKind, VariableSymbol,
};
use crate::stream::{Stream, StreamMode, StreamProvider};

// =============================================================================
// Options and results
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub flags: CompileFlags,
    pub defines: Vec<Define>,
    pub include_paths: Vec<PathBuf>,
}

impl CompileOptions {
    pub fn new(flags: CompileFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }
}

/// Everything one compilation produced.
#[derive(Debug)]
pub struct Compilation {
    pub diagnostics: Diagnostics,
    /// Present only when no error was reported.
    pub object: Option<ObjectFile>,
    /// Rewrites applied by the peephole optimizer.
    pub optimizations: usize,
}

impl Compilation {
    pub fn succeeded(&self) -> bool {
        self.object.is_some()
    }
}

/// Lexes, preprocesses and compiles one source text.
///
/// The directory of `file` is appended to the include paths handed to the
/// preprocessor.
pub fn compile_source(
    source: &str,
    file: &str,
    options: &CompileOptions,
    preprocessor: &mut dyn Preprocessor,
) -> Compilation {
    let (tokens, lexed) = analyse(source, options.flags, file);

    let mut include_paths = options.include_paths.clone();
    include_paths.push(source_directory(file));

    let processed = preprocessor.process(tokens, options.flags, &options.defines, &include_paths);

    let mut unit_options = options.clone();
    unit_options.defines = processed.defines;
    unit_options.include_paths = include_paths;

    let compiled = Compiler::new(unit_options).compile(processed.tokens);

    let mut diagnostics = Diagnostics::new(options.flags);
    diagnostics.extend(lexed);
    diagnostics.extend(processed.diagnostics);
    diagnostics.extend(compiled.diagnostics);

    let object = if diagnostics.has_errors() {
        None
    } else {
        compiled.object
    };
    Compilation {
        diagnostics,
        object,
        optimizations: compiled.optimizations,
    }
}

/// Reads `url` through `streams` and compiles it.
///
/// Returns `Ok(None)` when the provider has no stream for `url`.
pub fn compile_stream(
    streams: &mut dyn StreamProvider,
    url: &str,
    options: &CompileOptions,
    preprocessor: &mut dyn Preprocessor,
) -> std::io::Result<Option<Compilation>> {
    let Some(Stream::Read(mut reader)) = streams.request_stream(url, StreamMode::Read) else {
        return Ok(None);
    };
    let mut source = String::new();
    reader.read_to_string(&mut source)?;
    Ok(Some(compile_source(&source, url, options, preprocessor)))
}

fn source_directory(file: &str) -> PathBuf {
    match Path::new(file).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

// =============================================================================
// Compiler state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Declare,
    Emit,
}

/// Distinguishes several symbols created by the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Role {
    Declaration,
    Else,
    End,
    Start,
    Continue,
    Counter,
    Limit,
    Value,
    Test,
    Body,
}

#[derive(Debug, Clone, Copy)]
struct LoopFrame {
    break_target: SymbolId,
    /// `None` for switches and other constructs `continue` skips over.
    continue_target: Option<SymbolId>,
    /// Counter read by `indexer` inside `do (n)` loops.
    counter: Option<SymbolId>,
    /// Regions open where the construct starts.
    regions: Regions,
}

/// Open `lock`/`atom` regions, keyed by the token that opened them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Regions {
    lock: Option<usize>,
    atom: Option<usize>,
}

/// Context restored when a statement is abandoned.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    pos: usize,
    scope: SymbolId,
    function: SymbolId,
    loops: usize,
    blocks: usize,
    regions: Regions,
}

pub struct Compiler {
    options: CompileOptions,
    tokens: Vec<Token>,
    pos: usize,
    pass: Pass,
    diagnostics: Diagnostics,

    symbols: SymbolTable,
    global_scope: SymbolId,
    member_scope: SymbolId,
    /// Innermost declaration scope.
    scope: SymbolId,
    /// Function receiving emitted instructions.
    function: SymbolId,

    declared: HashMap<(usize, Role), SymbolId>,
    rejected: HashSet<(usize, Role)>,
    /// Token index each symbol was declared at.
    positions: HashMap<SymbolId, usize>,
    strings: HashMap<String, SymbolId>,

    loops: Vec<LoopFrame>,
    /// Locals visible in each open block, innermost last.
    blocks: Vec<Vec<SymbolId>>,
    regions: Regions,
    /// Regions open at each label.
    label_regions: HashMap<SymbolId, Regions>,
    /// `[key=value]` entries waiting for the next declaration.
    metadata: Vec<(String, String)>,

    memory_size: i32,
    internal_variable_count: i32,
    local_count: usize,
    default_engine_state: Option<SymbolId>,
    default_editor_state: Option<SymbolId>,
    files: Vec<String>,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        let mut symbols = SymbolTable::new();
        let global_scope = symbols.add(
            None,
            "$global",
            SymbolKind::Function(FunctionSymbol::default()),
        );
        let member_scope = symbols.add(None, "$member", SymbolKind::Namespace);
        let diagnostics = Diagnostics::new(options.flags);

        Self {
            options,
            tokens: Vec::new(),
            pos: 0,
            pass: Pass::Declare,
            diagnostics,
            symbols,
            global_scope,
            member_scope,
            scope: global_scope,
            function: global_scope,
            declared: HashMap::new(),
            rejected: HashSet::new(),
            positions: HashMap::new(),
            strings: HashMap::new(),
            loops: Vec::new(),
            blocks: Vec::new(),
            regions: Regions::default(),
            label_regions: HashMap::new(),
            metadata: Vec::new(),
            memory_size: 0,
            internal_variable_count: 0,
            local_count: 0,
            default_engine_state: None,
            default_editor_state: None,
            files: Vec::new(),
        }
    }

    /// Compiles an already preprocessed token list.
    ///
    /// A Rust panic inside the compiler is reported as a single
    /// `InternalError` instead of unwinding into the caller.
    pub fn compile(mut self, tokens: Vec<Token>) -> Compilation {
        self.tokens = tokens;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run()));
        let (object, optimizations) = match outcome {
            Ok(Ok(Some((object, count)))) => (Some(object), count),
            Ok(Ok(None)) | Ok(Err(_)) => (None, 0),
            Err(_) => {
                let _ = self.report_at(
                    self.pos,
                    ErrorCode::InternalError,
                    AlertLevel::FatalError,
                    "unexpected failure inside the compiler",
                );
                (None, 0)
            }
        };

        Compilation {
            diagnostics: self.diagnostics,
            object,
            optimizations,
        }
    }

    fn run(&mut self) -> Result<Option<(ObjectFile, usize)>, Abort> {
        for pass in [Pass::Declare, Pass::Emit] {
            self.begin_pass(pass);
            while !self.at_end() {
                self.guarded_statement()?;
            }
        }
        self.emit(OpCode::Return, vec![]);
        self.check_default_state()?;

        if self.diagnostics.has_errors() {
            return Ok(None);
        }

        let mut object = self.link()?;
        let optimizations = if self.options.flags.contains(CompileFlags::NO_OPTIMIZE) {
            0
        } else {
            optimize(&mut object.instructions, &mut object.symbols)
        };
        Ok(Some((object, optimizations)))
    }

    fn begin_pass(&mut self, pass: Pass) {
        self.pass = pass;
        self.pos = 0;
        self.scope = self.global_scope;
        self.function = self.global_scope;
        self.loops.clear();
        self.blocks.clear();
        self.regions = Regions::default();
        self.metadata.clear();
        self.local_count = 0;
    }

    fn emitting(&self) -> bool {
        self.pass == Pass::Emit
    }

    fn in_function(&self) -> bool {
        self.function != self.global_scope
    }

    // =========================================================================
    // Statement-level recovery
    // =========================================================================

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            pos: self.pos,
            scope: self.scope,
            function: self.function,
            loops: self.loops.len(),
            blocks: self.blocks.len(),
            regions: self.regions,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.scope = snapshot.scope;
        self.function = snapshot.function;
        self.loops.truncate(snapshot.loops);
        self.blocks.truncate(snapshot.blocks);
        self.regions = snapshot.regions;
    }

    /// Parses one statement, resynchronising after a non-fatal error.
    fn guarded_statement(&mut self) -> Result<(), Abort> {
        let snapshot = self.snapshot();
        match self.statement() {
            Err(Abort::Panic) => {
                self.restore(snapshot);
                self.recover(snapshot.pos);
                Ok(())
            }
            other => other,
        }
    }

    /// Skips to the end of the abandoned statement.
    ///
    /// Stops after a `;` or after the `}` closing a block the statement
    /// opened, and before a `}` that closes an enclosing block.
    fn recover(&mut self, start: usize) {
        let opened: isize = self.tokens[start..self.pos.min(self.tokens.len())]
            .iter()
            .map(|t| match t.kind {
                TokenKind::LBrace => 1,
                TokenKind::RBrace => -1,
                _ => 0,
            })
            .sum();
        let mut depth = opened.max(0) as usize;
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Semicolon if depth == 0 => {
                    self.pos += 1;
                    break;
                }
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace if depth == 0 => break,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        break;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        if self.pos == start && !self.at_end() {
            self.pos += 1;
        }
    }

    // =========================================================================
    // Token cursor
    // =========================================================================

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek_kind_at(0)
    }

    fn peek_kind_at(&self, ahead: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| t.kind)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Result<Token, Abort> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                let token = token.clone();
                self.pos += 1;
                Ok(token)
            }
            None => Err(self.unexpected_end()),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Abort> {
        match self.peek() {
            None => Err(self.unexpected_end()),
            Some(t) if t.kind == kind => self.advance(),
            Some(t) => {
                let message = format!("expected {} but found {}", kind.describe(), t.kind.describe());
                Err(self.error(ErrorCode::ExpectingToken, message))
            }
        }
    }

    fn expect_identifier(&mut self) -> Result<Token, Abort> {
        self.expect(TokenKind::Identifier)
    }

    /// Reports the current token as out of place.
    fn unexpected(&mut self, context: &str) -> Abort {
        match self.peek() {
            None => self.unexpected_end(),
            Some(t) => {
                let message = format!("unexpected {} {}", t.kind.describe(), context);
                self.error(ErrorCode::UnexpectedToken, message)
            }
        }
    }

    fn unexpected_end(&mut self) -> Abort {
        self.fatal(ErrorCode::UnexpectedEndOfFile, "unexpected end of file")
    }

    /// Moves past the `close` matching an already consumed `open`.
    fn skip_balanced(&mut self, open: TokenKind, close: TokenKind) -> Result<(), Abort> {
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.advance()?;
            if token.kind == open {
                depth += 1;
            } else if token.kind == close {
                depth -= 1;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    fn location(&self, index: usize) -> (usize, usize, String) {
        match self.tokens.get(index).or_else(|| self.tokens.last()) {
            Some(t) => (t.line, t.offset, t.file.clone()),
            None => (0, 0, String::new()),
        }
    }

    fn report_at(
        &mut self,
        index: usize,
        code: ErrorCode,
        level: AlertLevel,
        message: impl Into<String>,
    ) -> Result<(), Abort> {
        let (line, offset, file) = self.location(index);
        match self.diagnostics.report(code, level, message, line, offset, &file) {
            AlertLevel::FatalError => Err(Abort::Fatal),
            _ => Ok(()),
        }
    }

    /// Reports an error at the current token during the emit pass and
    /// abandons the statement in either pass.
    fn error(&mut self, code: ErrorCode, message: impl Into<String>) -> Abort {
        self.error_at(self.pos, code, message)
    }

    fn error_at(&mut self, index: usize, code: ErrorCode, message: impl Into<String>) -> Abort {
        if self.emitting() {
            if let Err(fatal) = self.report_at(index, code, AlertLevel::Error, message) {
                return fatal;
            }
        }
        Abort::Panic
    }

    /// Emit-pass warning or message at the last consumed token.
    fn notify(
        &mut self,
        code: ErrorCode,
        level: AlertLevel,
        message: impl Into<String>,
    ) -> Result<(), Abort> {
        if !self.emitting() {
            return Ok(());
        }
        self.report_at(self.pos.saturating_sub(1), code, level, message)
    }

    /// Declaration check failure. Reported once, in the declare pass; the
    /// declaration is then skipped in both passes.
    fn reject(&mut self, index: usize, code: ErrorCode, message: impl Into<String>) -> Abort {
        if !self.emitting() {
            self.rejected.insert((index, Role::Declaration));
            if let Err(fatal) = self.report_at(index, code, AlertLevel::Error, message) {
                return fatal;
            }
        }
        Abort::Panic
    }

    fn fatal(&mut self, code: ErrorCode, message: impl Into<String>) -> Abort {
        let _ = self.report_at(self.pos, code, AlertLevel::FatalError, message);
        Abort::Fatal
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn file_index(&mut self, file: &str) -> usize {
        match self.files.iter().position(|f| f == file) {
            Some(i) => i,
            None => {
                self.files.push(file.to_string());
                self.files.len() - 1
            }
        }
    }

    fn instruction(&mut self, opcode: OpCode, operands: Vec<Operand>) -> Instruction {
        let (line, offset, file) = self.location(self.pos.saturating_sub(1));
        let file = self.file_index(&file);
        Instruction {
            opcode,
            operands,
            line,
            offset,
            file,
        }
    }

    /// Appends an instruction to the current function. No-op while declaring.
    fn emit(&mut self, opcode: OpCode, operands: Vec<Operand>) {
        if !self.emitting() {
            return;
        }
        let instruction = self.instruction(opcode, operands);
        if let Some(f) = self.symbols.get_mut(self.function).as_function_mut() {
            f.instructions.push(instruction);
        }
    }

    /// Inserts an instruction at `at` in the current function's list.
    fn emit_at(&mut self, at: usize, opcode: OpCode, operands: Vec<Operand>) {
        if !self.emitting() {
            return;
        }
        let instruction = self.instruction(opcode, operands);
        if let Some(f) = self.symbols.get_mut(self.function).as_function_mut() {
            let at = at.min(f.instructions.len());
            f.instructions.insert(at, instruction);
        }
    }

    /// Index the next emitted instruction will get in the current function.
    fn here(&self) -> usize {
        self.symbols
            .get(self.function)
            .as_function()
            .map_or(0, |f| f.instructions.len())
    }

    fn jump(&mut self, opcode: OpCode, target: SymbolId) {
        self.emit(opcode, vec![Operand::JumpTarget(target)]);
    }

    fn bind(&mut self, target: SymbolId) {
        if !self.emitting() {
            return;
        }
        let here = self.here();
        if let SymbolKind::JumpTarget { bound } = &mut self.symbols.get_mut(target).kind {
            *bound = Some(here);
        }
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    /// Creates a symbol in the declare pass, or finds the one created for the
    /// same token in the emit pass.
    fn keyed(
        &mut self,
        index: usize,
        role: Role,
        create: impl FnOnce(&mut Self) -> SymbolId,
    ) -> Result<SymbolId, Abort> {
        match self.pass {
            Pass::Declare => {
                let id = create(self);
                self.declared.insert((index, role), id);
                self.positions.entry(id).or_insert(index);
                Ok(id)
            }
            Pass::Emit => match self.declared.get(&(index, role)) {
                Some(&id) => Ok(id),
                None if self.rejected.contains(&(index, Role::Declaration)) => Err(Abort::Panic),
                None => Err(self.fatal(
                    ErrorCode::InternalError,
                    format!("no symbol was declared for token {} ({:?})", index, role),
                )),
            },
        }
    }

    fn target(&mut self, index: usize, role: Role) -> Result<SymbolId, Abort> {
        let function = self.function;
        self.keyed(index, role, |c| {
            c.symbols
                .add(Some(function), "$target", SymbolKind::JumpTarget { bound: None })
        })
    }

    fn allocate_memory(&mut self) -> i32 {
        let index = self.memory_size;
        self.memory_size += 1;
        index
    }

    /// Declares a local of the current function and makes it visible in the
    /// innermost block.
    fn local(
        &mut self,
        index: usize,
        role: Role,
        name: &str,
        data_type: DataTypeValue,
    ) -> Result<SymbolId, Abort> {
        let function = self.function;
        let internal = name.starts_with('$');
        let id = self.keyed(index, role, |c| {
            let ordinal = c.local_count as i32;
            c.local_count += 1;
            if internal {
                c.internal_variable_count += 1;
            }
            c.symbols.add(
                Some(function),
                name,
                SymbolKind::Variable(VariableSymbol {
                    kind: VariableKind::Local,
                    data_type,
                    is_constant: false,
                    is_property: false,
                    storage: Storage::Stack(ordinal),
                    literal: None,
                    used: internal,
                    access: AccessModifier::Public,
                }),
            )
        })?;
        self.make_visible(id);
        Ok(id)
    }

    fn make_visible(&mut self, id: SymbolId) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(id);
        }
    }

    /// Interned string literal symbol.
    fn intern(&mut self, text: &str) -> SymbolId {
        if let Some(&id) = self.strings.get(text) {
            return id;
        }
        let id = self
            .symbols
            .add(Some(self.global_scope), text, SymbolKind::String);
        self.strings.insert(text.to_string(), id);
        id
    }

    /// Attaches pending `[key=value]` entries to a new declaration.
    fn attach_metadata(&mut self, owner: SymbolId) {
        for (key, value) in std::mem::take(&mut self.metadata) {
            self.symbols
                .add(Some(owner), key, SymbolKind::MetaData { value });
        }
    }

    fn set_variable_type(&mut self, id: SymbolId, data_type: DataTypeValue) {
        if let Some(v) = self.symbols.get_mut(id).as_variable_mut() {
            v.data_type = data_type;
        }
    }

    fn variable_type(&self, id: SymbolId) -> DataTypeValue {
        self.symbols
            .get(id)
            .as_variable()
            .map_or(DataTypeValue::INVALID, |v| v.data_type)
    }

    fn slot(&self, id: SymbolId) -> Operand {
        match self.symbols.get(id).as_variable().map(|v| v.storage) {
            Some(Storage::Memory(i)) => Operand::Memory(i),
            Some(Storage::Stack(o)) => Operand::Stack(o),
            None => Operand::Symbol(id),
        }
    }

    fn indexed_slot(&self, id: SymbolId, register: Register) -> Operand {
        match self.symbols.get(id).as_variable().map(|v| v.storage) {
            Some(Storage::Memory(i)) => Operand::MemoryIndexed(i, register),
            Some(Storage::Stack(o)) => Operand::StackIndexed(o, register),
            None => Operand::Symbol(id),
        }
    }

    /// Locals of the open blocks, innermost first.
    fn lookup_local(&self, name: &str) -> Option<SymbolId> {
        self.blocks
            .iter()
            .rev()
            .flat_map(|block| block.iter().rev())
            .copied()
            .find(|&id| self.symbols.get(id).identifier == name)
    }

    /// Finds a visible variable by simple name.
    ///
    /// Block locals shadow everything; inside functions only parameters are
    /// found through the scope walk.
    fn lookup_variable(&self, name: &str) -> Option<SymbolId> {
        self.lookup_local(name)
            .or_else(|| self.resolve(name, |s| s.as_variable().is_some()))
    }

    /// Walks the scope chain outward looking for `name`.
    fn resolve(
        &self,
        name: &str,
        filter: impl Fn(&Symbol) -> bool,
    ) -> Option<SymbolId> {
        let mut scope = Some(self.scope);
        while let Some(s) = scope {
            let in_function =
                s != self.global_scope && matches!(self.symbols.get(s).kind, SymbolKind::Function(_));
            let found = self.symbols.find_child(s, name, |sym| {
                if in_function {
                    if let Some(v) = sym.as_variable() {
                        if v.kind != VariableKind::Parameter {
                            return false;
                        }
                    }
                }
                filter(sym)
            });
            if found.is_some() {
                return found;
            }
            scope = self.symbols.get(s).scope;
        }
        None
    }

    /// Resolves a dotted path. Intermediate segments must be containers.
    fn resolve_path(
        &self,
        path: &[Token],
        filter: impl Fn(&Symbol) -> bool,
    ) -> Option<SymbolId> {
        let (last, prefix) = path.split_last()?;
        if prefix.is_empty() {
            if let Some(id) = self.lookup_local(&last.text) {
                if filter(self.symbols.get(id)) {
                    return Some(id);
                }
            }
            return self.resolve(&last.text, filter);
        }
        let container = self.resolve_container(prefix)?;
        self.symbols.find_child(container, &last.text, filter)
    }

    fn resolve_container(&self, path: &[Token]) -> Option<SymbolId> {
        let (first, rest) = path.split_first()?;
        let mut current = self.resolve(&first.text, |s| s.is_container())?;
        for segment in rest {
            current = self
                .symbols
                .find_child(current, &segment.text, |s| s.is_container())?;
        }
        Some(current)
    }

    /// Every function a call through `path` could reach, nearest scope first.
    fn candidate_functions(&self, path: &[Token]) -> Vec<SymbolId> {
        let Some((last, prefix)) = path.split_last() else {
            return Vec::new();
        };
        let is_function = |s: &Symbol| {
            s.as_function()
                .is_some_and(|f| !f.flags.contains(FunctionFlags::MEMBER_CALL))
        };
        if !prefix.is_empty() {
            return match self.resolve_container(prefix) {
                Some(c) => self.symbols.find_children(c, &last.text, is_function),
                None => Vec::new(),
            };
        }
        let mut found = Vec::new();
        let mut scope = Some(self.scope);
        while let Some(s) = scope {
            found.extend(self.symbols.find_children(s, &last.text, is_function));
            scope = self.symbols.get(s).scope;
        }
        found
    }

    // =========================================================================
    // Function frames and end-of-unit checks
    // =========================================================================

    /// Turns provisional local ordinals and parameter positions into frame
    /// offsets once the number of locals is known.
    fn finish_frame(&mut self, function: SymbolId) {
        let locals = self.local_count as i32;
        let children = self.symbols.get(function).children.clone();
        let params: Vec<SymbolId> = children
            .iter()
            .copied()
            .filter(|&c| {
                self.symbols
                    .get(c)
                    .as_variable()
                    .is_some_and(|v| v.kind == VariableKind::Parameter)
            })
            .collect();
        let n = params.len() as i32;

        for child in children {
            let param_position = params.iter().position(|&p| p == child);
            if let Some(v) = self.symbols.get_mut(child).as_variable_mut() {
                match (v.kind, v.storage) {
                    (VariableKind::Local, Storage::Stack(j)) => {
                        v.storage = Storage::Stack(-(locals - j));
                    }
                    (VariableKind::Parameter, Storage::Stack(_)) => {
                        let k = param_position.unwrap_or(0) as i32;
                        v.storage = Storage::Stack(-(locals + 2 + (n - 1 - k)));
                    }
                    _ => {}
                }
            }
        }
        if let Some(f) = self.symbols.get_mut(function).as_function_mut() {
            f.local_frame_size = locals as usize;
        }
    }

    /// Warns about locals and parameters of `function` that are never read.
    fn check_unused(&mut self, function: SymbolId) -> Result<(), Abort> {
        if !self.emitting() {
            return Ok(());
        }
        let unused: Vec<(usize, String)> = self
            .symbols
            .get(function)
            .children
            .iter()
            .filter_map(|&c| {
                let s = self.symbols.get(c);
                let v = s.as_variable()?;
                let tracked = matches!(v.kind, VariableKind::Local | VariableKind::Parameter);
                if tracked && !v.used && !s.identifier.starts_with('$') {
                    Some((self.positions.get(&c).copied()?, s.identifier.clone()))
                } else {
                    None
                }
            })
            .collect();
        for (index, name) in unused {
            self.report_at(
                index,
                ErrorCode::UnusedSymbol,
                AlertLevel::Warning,
                format!("'{}' is never read", name),
            )?;
        }
        Ok(())
    }

    fn check_default_state(&mut self) -> Result<(), Abort> {
        if self.default_engine_state.is_none()
            && !self.options.flags.contains(CompileFlags::LIBRARY)
        {
            let at = self.tokens.len().saturating_sub(1);
            self.report_at(
                at,
                ErrorCode::MissingDefaultState,
                AlertLevel::Error,
                "no default engine state declared (use 'state engine Name { ... }')",
            )?;
        }
        Ok(())
    }
}
