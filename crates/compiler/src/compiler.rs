//! Single-pass parser/compiler: source text in, [`CompiledModule`] out.
//!
//! The grammar is driven by a Pratt expression parser (precedence table
//! in [`Precedence`]) layered under a conventional recursive-descent
//! statement parser. Bytecode is emitted directly as each construct is
//! recognized; there is no separate AST pass.

use std::collections::HashMap;

use djuru_core::error::{CompileError, FatalCause, VmError};
use djuru_core::limits::{
    MAX_CONSTANTS, MAX_FIELDS, MAX_LOCALS, MAX_MODULE_VARS, MAX_PARAMETERS, MAX_UPVALUES,
};
use djuru_core::symbol::SymbolTable;
use djuru_core::Opcode;

use crate::lexer::Lexer;
use crate::signature::{self, SignatureKind};
use crate::token::{Token, TokenType};
use crate::types::{
    CompiledClass, CompiledFunction, CompiledMethod, CompiledModule, ConstantValue, FieldDecl,
    MethodKind, UpvalueSpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Conditional,
    Or,
    And,
    Equality,
    Is,
    Comparison,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Range,
    Term,
    Factor,
    Unary,
    Call,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Conditional,
            Conditional => Or,
            Or => And,
            And => Equality,
            Equality => Is,
            Is => Comparison,
            Comparison => BitOr,
            BitOr => BitXor,
            BitXor => BitAnd,
            BitAnd => Shift,
            Shift => Range,
            Range => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Call,
        }
    }
}

fn infix_precedence(kind: TokenType) -> Precedence {
    use TokenType::*;
    match kind {
        Eq | PlusEq | MinusEq | StarEq | SlashEq => Precedence::Assignment,
        Question => Precedence::Conditional,
        PipePipe => Precedence::Or,
        AmpAmp => Precedence::And,
        EqEq | BangEq => Precedence::Equality,
        Is => Precedence::Is,
        LessThan | GreaterThan | LessEq | GreaterEq => Precedence::Comparison,
        Pipe => Precedence::BitOr,
        Caret => Precedence::BitXor,
        Amp => Precedence::BitAnd,
        LeftShift | RightShift => Precedence::Shift,
        DotDot | DotDotDot => Precedence::Range,
        Plus | Minus => Precedence::Term,
        Star | Slash | Percent => Precedence::Factor,
        LeftParen | Dot | LeftBracket => Precedence::Call,
        _ => Precedence::None,
    }
}

struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

struct LoopCtx {
    start: usize,
    /// Byte offsets of `END` placeholders emitted for `break`, patched to
    /// `JUMP` once the loop's end is known.
    break_patches: Vec<usize>,
    scope_depth: i32,
}

enum Kind {
    Module,
    Function,
    Method,
}

struct ClassInfo {
    name: String,
    fields: Vec<FieldDecl>,
    field_names: HashMap<String, u16>,
}

struct FuncState {
    function: CompiledFunction,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueSpec>,
    scope_depth: i32,
    kind: Kind,
    loops: Vec<LoopCtx>,
    stack_depth: i32,
    max_stack_depth: i32,
}

impl FuncState {
    fn new(name: String, kind: Kind, module_name: &str) -> FuncState {
        let mut locals = Vec::new();
        // Slot 0 is always the receiver (`this`) for methods, or the
        // closure itself at module scope; name is irrelevant since it is
        // never referenced by an explicit identifier lookup.
        locals.push(Local {
            name: String::new(),
            depth: 0,
            is_captured: false,
        });
        FuncState {
            function: CompiledFunction {
                name,
                arity: 0,
                code: Vec::new(),
                lines: Vec::new(),
                constants: Vec::new(),
                upvalues: Vec::new(),
                max_slots: 1,
                module_name: module_name.to_string(),
            },
            locals,
            upvalues: Vec::new(),
            scope_depth: match kind {
                Kind::Module => -1,
                _ => 0,
            },
            kind,
            loops: Vec::new(),
            stack_depth: 1,
            max_stack_depth: 1,
        }
    }
}

pub struct Compiler<'src> {
    lexer: Lexer<'src>,
    prev: Token,
    current: Token,
    next: Token,
    had_error: bool,
    module_name: String,
    symbols: &'src mut SymbolTable,
    stack: Vec<FuncState>,
    class_stack: Vec<ClassInfo>,
    classes: Vec<CompiledClass>,
    pending_class_methods: Vec<Vec<CompiledMethod>>,
    module_vars: Vec<String>,
    errors: Vec<CompileError>,
}

type ParseResult = Result<(), ()>;

impl<'src> Compiler<'src> {
    pub fn new(source: &'src str, module_name: &str, symbols: &'src mut SymbolTable) -> Self {
        let mut lexer = Lexer::new(source);
        let first = lexer.next_token();
        let second = lexer.next_token();
        let mut c = Compiler {
            lexer,
            prev: first.clone(),
            current: first,
            next: second,
            had_error: false,
            module_name: module_name.to_string(),
            symbols,
            stack: vec![FuncState::new("(script)".to_string(), Kind::Module, module_name)],
            class_stack: Vec::new(),
            classes: Vec::new(),
            pending_class_methods: Vec::new(),
            module_vars: Vec::new(),
            errors: Vec::new(),
        };
        c.skip_newlines();
        c
    }

    pub fn compile(mut self) -> Result<CompiledModule, Vec<CompileError>> {
        while self.current.kind != TokenType::Eof {
            if self.declaration().is_err() {
                self.synchronize();
            }
            self.skip_newlines();
        }
        self.emit(Opcode::Null);
        self.emit(Opcode::Return);
        if self.had_error || !self.errors.is_empty() {
            return Err(self.errors);
        }
        let body = self.stack.pop().expect("module frame present").function;
        Ok(CompiledModule {
            name: self.module_name,
            body,
            classes: self.classes,
            module_vars: self.module_vars,
        })
    }

    // ---- token stream -------------------------------------------------

    fn advance_raw(&mut self) -> Token {
        let t = self.lexer.next_token();
        std::mem::replace(&mut self.next, t)
    }

    fn advance(&mut self) {
        self.prev = std::mem::replace(&mut self.current, self.next.clone());
        self.next = self.advance_raw();
    }

    fn skip_newlines(&mut self) {
        while self.current.kind == TokenType::Newline {
            self.advance();
        }
    }

    fn check(&self, kind: TokenType) -> bool {
        self.current.kind == kind
    }

    fn match_tok(&mut self, kind: TokenType) -> bool {
        if self.check(kind) {
            self.advance();
            self.skip_newlines();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenType, message: &str) -> ParseResult {
        if self.check(kind) {
            self.advance();
            self.skip_newlines();
            Ok(())
        } else {
            self.error_at_current(message);
            Err(())
        }
    }

    fn error_at_current(&mut self, message: &str) {
        self.had_error = true;
        self.errors.push(CompileError {
            module: self.module_name.clone(),
            line: self.current.line,
            message: message.to_string(),
        });
    }

    fn error(&mut self, message: &str) {
        self.had_error = true;
        self.errors.push(CompileError {
            module: self.module_name.clone(),
            line: self.prev.line,
            message: message.to_string(),
        });
    }

    fn synchronize(&mut self) {
        while self.current.kind != TokenType::Eof {
            if self.prev.kind == TokenType::Newline {
                return;
            }
            match self.current.kind {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::If
                | TokenType::While
                | TokenType::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- emission -------------------------------------------------------

    fn func(&mut self) -> &mut FuncState {
        self.stack.last_mut().expect("non-empty compiler stack")
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.prev.line;
        let f = self.func();
        f.function.code.push(byte);
        f.function.lines.push(line);
    }

    fn emit(&mut self, op: Opcode) {
        self.emit_byte(op as u8);
        let effect = op.stack_effect();
        let f = self.func();
        f.stack_depth += effect;
        if f.stack_depth > f.max_stack_depth {
            f.max_stack_depth = f.stack_depth;
        }
        f.function.max_slots = f.max_stack_depth.max(0) as u16;
    }

    fn emit_u16(&mut self, value: u16) {
        self.emit_byte((value >> 8) as u8);
        self.emit_byte((value & 0xff) as u8);
    }

    fn emit_op_u16(&mut self, op: Opcode, value: u16) {
        self.emit(op);
        self.emit_u16(value);
    }

    fn emit_op_u8(&mut self, op: Opcode, value: u8) {
        self.emit(op);
        self.emit_byte(value);
    }

    fn current_offset(&self) -> usize {
        self.stack.last().unwrap().function.code.len()
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit(op);
        self.emit_u16(0xffff);
        self.current_offset() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_offset() - offset - 2;
        if jump > djuru_core::limits::MAX_JUMP {
            self.error("jump offset too large");
        }
        let f = self.func();
        f.function.code[offset] = (jump >> 8) as u8;
        f.function.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, start: usize) {
        self.emit(Opcode::Loop);
        let back = self.current_offset() - start + 2;
        self.emit_u16(back as u16);
    }

    fn intern_constant(&mut self, value: ConstantValue) -> u16 {
        let f = self.func();
        let existing = f.function.constants.iter().position(|c| match (c, &value) {
            (ConstantValue::Number(a), ConstantValue::Number(b)) => a.to_bits() == b.to_bits(),
            (ConstantValue::String(a), ConstantValue::String(b)) => a == b,
            // Every reserved superclass slot resolves the same way within
            // one method, so sharing a slot across repeated `super` calls
            // in the same body is correct, not just harmless.
            (ConstantValue::Null, ConstantValue::Null) => true,
            _ => false,
        });
        if let Some(idx) = existing {
            return idx as u16;
        }
        if f.function.constants.len() >= MAX_CONSTANTS {
            self.error("too many constants in one function");
            return 0;
        }
        f.function.constants.push(value);
        (f.function.constants.len() - 1) as u16
    }

    fn emit_constant(&mut self, value: ConstantValue) {
        let idx = self.intern_constant(value);
        self.emit_op_u16(Opcode::Constant, idx);
    }

    fn emit_signature_call(&mut self, signature: &str, arity: u8) {
        let symbol = self.symbols.intern(signature);
        match Opcode::call_for_arity(arity) {
            Some(op) => self.emit_op_u16(op, symbol.0),
            None => {
                self.emit(Opcode::Call);
                self.emit_u16(symbol.0);
                self.emit_u16(arity as u16);
            }
        }
    }

    // ---- scopes ---------------------------------------------------------

    fn begin_scope(&mut self) {
        self.func().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let depth = {
            let f = self.func();
            f.scope_depth -= 1;
            f.scope_depth
        };
        loop {
            let top_depth = self.func().locals.last().map(|l| l.depth);
            match top_depth {
                Some(d) if d > depth => {
                    let captured = self.func().locals.last().unwrap().is_captured;
                    if captured {
                        self.emit_op_u8(Opcode::CloseUpvalue, 1);
                    } else {
                        self.emit(Opcode::Pop);
                    }
                    self.func().locals.pop();
                }
                _ => break,
            }
        }
    }

    /// Emits the pops/upvalue-closes for every local declared deeper than
    /// `target_depth`, without removing them from the active scope -- used
    /// by `break` to unwind the runtime stack along a jump that bypasses
    /// the enclosing blocks' own `end_scope` calls.
    fn pop_locals_above(&mut self, target_depth: i32) {
        let count = self
            .func()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth > target_depth)
            .count();
        for i in 0..count {
            let idx = self.func().locals.len() - 1 - i;
            if self.func().locals[idx].is_captured {
                self.emit_op_u8(Opcode::CloseUpvalue, 1);
            } else {
                self.emit(Opcode::Pop);
            }
        }
    }

    fn declare_local(&mut self, name: &str) -> Result<u8, ()> {
        let f = self.func();
        if f.locals.len() >= MAX_LOCALS {
            self.error("too many local variables in scope");
            return Err(());
        }
        let depth = f.scope_depth;
        for local in f.locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                self.error("variable already declared in this scope");
                return Err(());
            }
        }
        let f = self.func();
        f.locals.push(Local {
            name: name.to_string(),
            depth,
            is_captured: false,
        });
        Ok((f.locals.len() - 1) as u8)
    }

    fn resolve_local(&self, frame: usize, name: &str) -> Option<u8> {
        let f = &self.stack[frame];
        f.locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == name)
            .map(|(i, _)| i as u8)
    }

    fn resolve_upvalue(&mut self, frame: usize, name: &str) -> Option<u8> {
        if frame == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(frame - 1, name) {
            self.stack[frame - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(frame, UpvalueSpec {
                is_local: true,
                index: local,
            }));
        }
        if let Some(up) = self.resolve_upvalue(frame - 1, name) {
            return Some(self.add_upvalue(frame, UpvalueSpec {
                is_local: false,
                index: up,
            }));
        }
        None
    }

    fn add_upvalue(&mut self, frame: usize, spec: UpvalueSpec) -> u8 {
        let f = &mut self.stack[frame];
        if let Some(i) = f.upvalues.iter().position(|u| *u == spec) {
            return i as u8;
        }
        if f.upvalues.len() >= MAX_UPVALUES {
            self.error("too many upvalues captured by one function");
            return 0;
        }
        let f = &mut self.stack[frame];
        f.upvalues.push(spec);
        f.function.upvalues.push(spec);
        (f.upvalues.len() - 1) as u8
    }

    /// Module variables are resolved by the vm loader at link time via
    /// name; the compiler only needs a stable per-module symbol, which
    /// here is the order of first reference (spec's "append-only
    /// ordered structure" from §9).
    fn declare_module_var(&mut self, name: &str) -> u16 {
        if let Some(i) = self.module_vars.iter().position(|s| s == name) {
            return i as u16;
        }
        if self.module_vars.len() >= MAX_MODULE_VARS {
            self.error("too many module-level variables");
            return 0;
        }
        self.module_vars.push(name.to_string());
        (self.module_vars.len() - 1) as u16
    }

    // ---- declarations -----------------------------------------------------

    fn declaration(&mut self) -> ParseResult {
        if self.match_tok(TokenType::Var) {
            self.var_declaration()
        } else if self.match_tok(TokenType::Fun) {
            self.fun_declaration()
        } else if self.match_tok(TokenType::Class) {
            self.class_declaration(false)
        } else if self.match_tok(TokenType::Extern) {
            self.consume(TokenType::Class, "expected 'kulu' after 'dunan'")?;
            self.class_declaration(true)
        } else if self.match_tok(TokenType::Import) {
            self.import_statement()
        } else {
            self.statement()
        }
    }

    fn var_declaration(&mut self) -> ParseResult {
        loop {
            self.consume(TokenType::Identifier, "expected variable name")?;
            let name = self.prev.lexeme.clone();
            if self.match_tok(TokenType::Eq) {
                self.expression()?;
            } else {
                self.emit(Opcode::Null);
            }
            self.define_variable(&name)?;
            if !self.match_tok(TokenType::Comma) {
                break;
            }
        }
        self.end_statement()
    }

    fn define_variable(&mut self, name: &str) -> ParseResult {
        let f = self.func();
        if f.scope_depth == -1 {
            let sym = self.declare_module_var(name);
            self.emit_op_u16(Opcode::StoreModuleVar, sym);
            self.emit(Opcode::Pop);
        } else {
            self.declare_local(name)?;
        }
        Ok(())
    }

    fn fun_declaration(&mut self) -> ParseResult {
        self.consume(TokenType::Identifier, "expected function name")?;
        let name = self.prev.lexeme.clone();
        self.function_body(name.clone(), Kind::Function)?;
        self.define_variable(&name)
    }

    fn function_body(&mut self, name: String, kind: Kind) -> ParseResult {
        let module_name = self.module_name.clone();
        self.stack.push(FuncState::new(name, kind, &module_name));
        self.begin_scope();
        self.consume(TokenType::LeftParen, "expected '(' before parameters")?;
        let mut arity = 0u8;
        if !self.check(TokenType::RightParen) {
            loop {
                self.consume(TokenType::Identifier, "expected parameter name")?;
                let pname = self.prev.lexeme.clone();
                self.declare_local(&pname)?;
                arity += 1;
                if arity as usize > MAX_PARAMETERS {
                    self.error("too many parameters");
                }
                if !self.match_tok(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "expected ')' after parameters")?;
        self.func().function.arity = arity;
        self.consume(TokenType::LeftBrace, "expected '{' before function body")?;
        self.block()?;
        self.emit(Opcode::Null);
        self.emit(Opcode::Return);
        let done = self.stack.pop().unwrap();
        self.emit_closure(done.function, done.upvalues);
        Ok(())
    }

    fn emit_closure(&mut self, function: CompiledFunction, upvalues: Vec<UpvalueSpec>) {
        let idx = self.intern_constant(ConstantValue::Function(function));
        self.emit_op_u16(Opcode::Closure, idx);
        for up in upvalues {
            self.emit_byte(u8::from(up.is_local));
            self.emit_byte(up.index);
        }
    }

    fn import_statement(&mut self) -> ParseResult {
        self.consume(TokenType::String, "expected module path string")?;
        let path = self.prev.lexeme.clone();
        let idx = self.intern_constant(ConstantValue::String(path));
        self.emit_op_u16(Opcode::ImportModule, idx);
        if self.match_tok(TokenType::From) {
            loop {
                self.consume(TokenType::Identifier, "expected imported variable name")?;
                let mut var_name = self.prev.lexeme.clone();
                if self.match_tok(TokenType::As) {
                    self.consume(TokenType::Identifier, "expected alias name")?;
                    var_name = self.prev.lexeme.clone();
                }
                let name_idx = self.intern_constant(ConstantValue::String(var_name.clone()));
                self.emit_op_u16(Opcode::ImportVariable, name_idx);
                self.define_variable(&var_name)?;
                if !self.match_tok(TokenType::Comma) {
                    break;
                }
            }
        } else {
            self.emit(Opcode::Pop);
        }
        self.end_statement()
    }

    // ---- classes ----------------------------------------------------------

    fn class_declaration(&mut self, is_extern: bool) -> ParseResult {
        self.consume(TokenType::Identifier, "expected class name")?;
        let name = self.prev.lexeme.clone();
        self.emit_constant(ConstantValue::String(name.clone()));

        let superclass_name = if self.match_tok(TokenType::Is) {
            self.consume(TokenType::Identifier, "expected superclass name")?;
            Some(self.prev.lexeme.clone())
        } else {
            None
        };

        if is_extern {
            self.emit(Opcode::ExternClass);
        } else {
            self.emit(Opcode::Class);
        }

        self.class_stack.push(ClassInfo {
            name: name.clone(),
            fields: Vec::new(),
            field_names: HashMap::new(),
        });
        self.pending_class_methods.push(Vec::new());

        self.consume(TokenType::LeftBrace, "expected '{' to start class body")?;
        self.skip_newlines();
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.class_member(is_extern)?;
            self.skip_newlines();
        }
        self.consume(TokenType::RightBrace, "expected '}' to close class body")?;

        if !is_extern {
            self.emit(Opcode::EndClass);
        }

        let info = self.class_stack.pop().unwrap();
        let methods = self.pending_class_methods.pop().unwrap();
        self.classes.push(CompiledClass {
            name: info.name,
            superclass_name,
            is_extern,
            field_count: info.fields.len() as u16,
            fields: info.fields,
            methods,
        });
        self.define_variable(&name)
    }

    fn class_member(&mut self, class_is_extern: bool) -> ParseResult {
        let is_static = self.match_tok(TokenType::Static);

        if self.match_tok(TokenType::Construct) {
            self.method_declaration(MethodKind::Construct, class_is_extern)?;
        } else if self.check(TokenType::Identifier)
            || self.check(TokenType::LeftBracket)
            || is_operator_token(self.current.kind)
        {
            let kind = if is_static {
                MethodKind::Static
            } else {
                MethodKind::Instance
            };
            self.method_declaration(kind, class_is_extern)?;
        } else {
            self.error_at_current("expected method or field declaration");
            return Err(());
        }
        Ok(())
    }

    fn method_declaration(&mut self, kind: MethodKind, class_is_extern: bool) -> ParseResult {
        let module_name = self.module_name.clone();

        if class_is_extern {
            // Foreign methods have no body; declare their parameters in a
            // throwaway frame purely to compute arity/signature, then
            // discard it -- the host binds the real implementation.
            self.stack.push(FuncState::new(String::new(), Kind::Method, &module_name));
            self.begin_scope();
            let (signature, name) = self.parse_method_signature(kind)?;
            self.stack.pop();
            self.end_statement()?;
            let symbol = self.symbols.intern(&signature);
            let placeholder = CompiledFunction {
                name,
                arity: signature::arity_of(&signature),
                code: Vec::new(),
                lines: Vec::new(),
                constants: Vec::new(),
                upvalues: Vec::new(),
                max_slots: 0,
                module_name,
            };
            self.pending_class_methods.last_mut().unwrap().push(CompiledMethod {
                symbol,
                signature,
                kind,
                function: placeholder,
            });
            return Ok(());
        }

        self.stack.push(FuncState::new(String::new(), Kind::Method, &module_name));
        self.begin_scope();
        let (signature, name) = self.parse_method_signature(kind)?;
        self.func().function.name = name;
        self.func().function.arity = signature::arity_of(&signature);
        self.consume(TokenType::LeftBrace, "expected '{' before method body")?;
        self.block()?;
        if matches!(kind, MethodKind::Construct) {
            self.emit_op_u8(Opcode::LoadLocal, 0);
        } else {
            self.emit(Opcode::Null);
        }
        self.emit(Opcode::Return);
        let done = self.stack.pop().unwrap();
        let symbol = self.symbols.intern(&signature);
        self.pending_class_methods.last_mut().unwrap().push(CompiledMethod {
            symbol,
            signature,
            kind,
            function: done.function,
        });
        Ok(())
    }

    /// Parses a method's name/operator/bracket head plus its full
    /// parameter list, declaring each parameter as a local in the
    /// already-pushed method frame, and returns the built signature
    /// string together with a human-readable name for diagnostics.
    fn parse_method_signature(&mut self, kind: MethodKind) -> Result<(String, String), ()> {
        if self.check(TokenType::LeftBracket) {
            self.advance();
            let mut arity = 0u8;
            loop {
                self.consume(TokenType::Identifier, "expected subscript parameter name")?;
                let pname = self.prev.lexeme.clone();
                self.declare_local(&pname)?;
                arity += 1;
                if !self.match_tok(TokenType::Comma) {
                    break;
                }
            }
            self.consume(TokenType::RightBracket, "expected ']' after subscript parameters")?;
            if self.match_tok(TokenType::Eq) {
                self.consume(TokenType::LeftParen, "expected '(' after '='")?;
                self.consume(TokenType::Identifier, "expected value parameter name")?;
                let pname = self.prev.lexeme.clone();
                self.declare_local(&pname)?;
                self.consume(TokenType::RightParen, "expected ')' after value parameter")?;
                let sig = signature::build("", SignatureKind::SubscriptSet, arity);
                return Ok((sig, "[_]=(_)".to_string()));
            }
            let sig = signature::build("", SignatureKind::SubscriptGet, arity);
            return Ok((sig, "[_]".to_string()));
        }

        let name = if is_operator_token(self.current.kind) {
            self.advance();
            operator_lexeme(self.prev.kind).to_string()
        } else {
            self.consume(TokenType::Identifier, "expected method name")?;
            self.prev.lexeme.clone()
        };

        if self.match_tok(TokenType::Eq) {
            self.consume(TokenType::LeftParen, "expected '(' after '='")?;
            self.consume(TokenType::Identifier, "expected value parameter name")?;
            let pname = self.prev.lexeme.clone();
            self.declare_local(&pname)?;
            self.consume(TokenType::RightParen, "expected ')' after value parameter")?;
            let sig = signature::build(&name, SignatureKind::Setter, 1);
            return Ok((sig, name));
        }

        let mut arity = 0u8;
        if self.match_tok(TokenType::LeftParen) {
            if !self.check(TokenType::RightParen) {
                loop {
                    self.consume(TokenType::Identifier, "expected parameter name")?;
                    let pname = self.prev.lexeme.clone();
                    self.declare_local(&pname)?;
                    arity += 1;
                    if arity as usize > MAX_PARAMETERS {
                        self.error("too many parameters");
                    }
                    if !self.match_tok(TokenType::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenType::RightParen, "expected ')' in method signature")?;
        }
        let sig_kind = if matches!(kind, MethodKind::Construct) {
            SignatureKind::Construct
        } else {
            SignatureKind::Call
        };
        let sig = signature::build(&name, sig_kind, arity);
        Ok((sig, name))
    }

    // ---- statements -------------------------------------------------------

    fn statement(&mut self) -> ParseResult {
        if self.match_tok(TokenType::LeftBrace) {
            self.begin_scope();
            self.block()?;
            self.end_scope();
            Ok(())
        } else if self.match_tok(TokenType::If) {
            self.if_statement()
        } else if self.match_tok(TokenType::While) {
            self.while_statement()
        } else if self.match_tok(TokenType::For) {
            self.for_statement()
        } else if self.match_tok(TokenType::When) {
            self.when_statement()
        } else if self.match_tok(TokenType::Return) {
            self.return_statement()
        } else if self.match_tok(TokenType::Break) {
            self.break_statement()
        } else if self.match_tok(TokenType::Continue) {
            self.continue_statement()
        } else if self.match_tok(TokenType::Throw) {
            self.throw_statement()
        } else if self.match_tok(TokenType::Catch) {
            self.try_catch_statement()
        } else {
            self.expression_statement()
        }
    }

    fn block(&mut self) -> ParseResult {
        self.skip_newlines();
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            if self.declaration().is_err() {
                self.synchronize();
            }
            self.skip_newlines();
        }
        self.consume(TokenType::RightBrace, "expected '}' to close block")
    }

    fn expression_statement(&mut self) -> ParseResult {
        self.expression()?;
        self.emit(Opcode::Pop);
        self.end_statement()
    }

    fn end_statement(&mut self) -> ParseResult {
        if self.check(TokenType::Eof) || self.check(TokenType::RightBrace) {
            return Ok(());
        }
        self.consume(TokenType::Newline, "expected newline after statement")
    }

    fn if_statement(&mut self) -> ParseResult {
        self.consume(TokenType::LeftParen, "expected '(' after 'nii'")?;
        self.expression()?;
        self.consume(TokenType::RightParen, "expected ')' after condition")?;
        let then_jump = self.emit_jump(Opcode::JumpIf);
        self.statement()?;
        if self.match_tok(TokenType::Else) {
            let else_jump = self.emit_jump(Opcode::Jump);
            self.patch_jump(then_jump);
            self.statement()?;
            self.patch_jump(else_jump);
        } else {
            self.patch_jump(then_jump);
        }
        Ok(())
    }

    fn while_statement(&mut self) -> ParseResult {
        let loop_start = self.current_offset();
        let scope_depth = self.func().scope_depth;
        self.func().loops.push(LoopCtx {
            start: loop_start,
            break_patches: Vec::new(),
            scope_depth,
        });
        self.consume(TokenType::LeftParen, "expected '(' after 'foo'")?;
        self.expression()?;
        self.consume(TokenType::RightParen, "expected ')' after condition")?;
        let exit_jump = self.emit_jump(Opcode::JumpIf);
        self.statement()?;
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        let ctx = self.func().loops.pop().unwrap();
        for patch in ctx.break_patches {
            self.retarget_break(patch);
        }
        Ok(())
    }

    /// `break` is emitted as a placeholder `END` opcode (spec §4.2) with
    /// the jump offset filled in once the loop's end is known; here we
    /// rewrite it in place to a real forward `JUMP`.
    fn retarget_break(&mut self, offset: usize) {
        let f = self.func();
        f.function.code[offset] = Opcode::Jump as u8;
        let jump = f.function.code.len() - offset - 3;
        f.function.code[offset + 1] = (jump >> 8) as u8;
        f.function.code[offset + 2] = (jump & 0xff) as u8;
    }

    fn for_statement(&mut self) -> ParseResult {
        self.consume(TokenType::LeftParen, "expected '(' after 'seginka'")?;
        self.begin_scope();
        self.consume(TokenType::Identifier, "expected loop variable name")?;
        let var_name = self.prev.lexeme.clone();
        self.consume(TokenType::In, "expected 'kono' in for-loop header")?;
        self.expression()?;
        let direction_down = if self.match_tok(TokenType::Down) {
            true
        } else {
            self.match_tok(TokenType::Up);
            false
        };
        self.consume(TokenType::RightParen, "expected ')' after for-loop header")?;

        // Hidden local holding the sequence being iterated.
        self.declare_local(" seq")?;
        self.emit(Opcode::Null);
        self.declare_local(" iter")?;

        let loop_start = self.current_offset();
        let scope_depth = self.func().scope_depth;
        self.func().loops.push(LoopCtx {
            start: loop_start,
            break_patches: Vec::new(),
            scope_depth,
        });

        let seq_slot = self.resolve_local(self.stack.len() - 1, " seq").unwrap();
        let iter_slot = self.resolve_local(self.stack.len() - 1, " iter").unwrap();
        self.emit_op_u8(Opcode::LoadLocal, seq_slot);
        self.emit_op_u8(Opcode::LoadLocal, iter_slot);
        let iterate_sig = signature::build("iterate", SignatureKind::Call, 1);
        self.emit_signature_call(&iterate_sig, 1);
        self.emit_op_u8(Opcode::StoreLocal, iter_slot);
        let exit_jump = self.emit_jump(Opcode::JumpIf);

        self.emit_op_u8(Opcode::LoadLocal, seq_slot);
        self.emit_op_u8(Opcode::LoadLocal, iter_slot);
        let value_sig = signature::build("iteratorValue", SignatureKind::Call, 1);
        self.emit_signature_call(&value_sig, 1);
        self.begin_scope();
        self.declare_local(&var_name)?;
        let _ = direction_down;
        self.statement()?;
        self.end_scope();

        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        let ctx = self.func().loops.pop().unwrap();
        for patch in ctx.break_patches {
            self.retarget_break(patch);
        }
        self.end_scope();
        Ok(())
    }

    fn when_statement(&mut self) -> ParseResult {
        self.consume(TokenType::LeftParen, "expected '(' after 'tumamin'")?;
        self.expression()?;
        self.consume(TokenType::RightParen, "expected ')' after 'tumamin' subject")?;
        self.declare_local(" when")?;
        let subject = self.resolve_local(self.stack.len() - 1, " when").unwrap();
        self.consume(TokenType::LeftBrace, "expected '{' to start 'tumamin' body")?;
        self.skip_newlines();
        let mut end_jumps = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            if self.match_tok(TokenType::Else) {
                self.consume(TokenType::Colon, "expected ':' after 'note'")?;
                self.statement()?;
                self.skip_newlines();
                break;
            }
            self.emit_op_u8(Opcode::LoadLocal, subject);
            self.expression()?;
            let eq_sig = signature::build("==", SignatureKind::Call, 1);
            self.emit_signature_call(&eq_sig, 1);
            let skip = self.emit_jump(Opcode::JumpIf);
            self.consume(TokenType::Colon, "expected ':' after 'tumamin' case")?;
            self.statement()?;
            end_jumps.push(self.emit_jump(Opcode::Jump));
            self.patch_jump(skip);
            self.skip_newlines();
        }
        for jump in end_jumps {
            self.patch_jump(jump);
        }
        self.consume(TokenType::RightBrace, "expected '}' to close 'tumamin' body")?;
        self.end_scope();
        Ok(())
    }

    fn return_statement(&mut self) -> ParseResult {
        if self.check(TokenType::Newline) || self.check(TokenType::RightBrace) {
            self.emit(Opcode::Null);
        } else {
            self.expression()?;
        }
        self.emit(Opcode::Return);
        self.end_statement()
    }

    fn break_statement(&mut self) -> ParseResult {
        if self.func().loops.is_empty() {
            self.error("'atike' outside a loop");
            return Err(());
        }
        let target_depth = self.func().loops.last().unwrap().scope_depth;
        self.pop_locals_above(target_depth);
        let offset = self.current_offset();
        self.emit(Opcode::End);
        self.emit_u16(0xffff);
        self.func().loops.last_mut().unwrap().break_patches.push(offset);
        self.end_statement()
    }

    fn continue_statement(&mut self) -> ParseResult {
        if self.func().loops.is_empty() {
            self.error("'ipan' outside a loop");
            return Err(());
        }
        let start = self.func().loops.last().unwrap().start;
        self.emit_loop(start);
        self.end_statement()
    }

    /// `afili expr` aborts the current fiber with `expr` as the error
    /// value by calling the static `tike(_)` method on `Djuru`.
    fn throw_statement(&mut self) -> ParseResult {
        self.load_named_variable("Djuru");
        self.expression()?;
        let sig = signature::build("tike", SignatureKind::Call, 1);
        self.emit_signature_call(&sig, 1);
        self.emit(Opcode::Pop);
        self.end_statement()
    }

    /// `namason { body } bawo err { handler }` runs `body` on a nested
    /// fiber created via `Djuru.aladie`; the caught error (or `null`) is
    /// bound to `err` for the handler block.
    fn try_catch_statement(&mut self) -> ParseResult {
        self.load_named_variable("Djuru");
        self.function_body("(catch block)".to_string(), Kind::Function)?;
        let construct_sig = signature::build("kura", SignatureKind::Call, 1);
        self.emit_signature_call(&construct_sig, 1);
        let try_sig = signature::build("aladie", SignatureKind::Call, 0);
        self.emit_signature_call(&try_sig, 0);
        self.begin_scope();
        if self.match_tok(TokenType::Because) {
            self.consume(TokenType::Identifier, "expected error binding name")?;
            let name = self.prev.lexeme.clone();
            self.declare_local(&name)?;
            self.consume(TokenType::LeftBrace, "expected '{' after error binding")?;
            self.block()?;
        } else {
            self.emit(Opcode::Pop);
        }
        self.end_scope();
        Ok(())
    }

    fn load_named_variable(&mut self, name: &str) {
        let sym = self.declare_module_var(name);
        self.emit_op_u16(Opcode::LoadModuleVar, sym);
    }

    // ---- expressions --------------------------------------------------------

    fn expression(&mut self) -> ParseResult {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, min_prec: Precedence) -> ParseResult {
        self.advance();
        self.skip_newlines();
        self.prefix()?;
        while min_prec <= infix_precedence(self.current.kind) {
            self.advance();
            self.skip_newlines();
            self.infix()?;
        }
        Ok(())
    }

    fn prefix(&mut self) -> ParseResult {
        match self.prev.kind {
            TokenType::Number => self.number(),
            TokenType::String => self.string_literal(),
            TokenType::InterpolationStart => self.interpolated_string(),
            TokenType::True => {
                self.emit(Opcode::True);
                Ok(())
            }
            TokenType::False => {
                self.emit(Opcode::False);
                Ok(())
            }
            TokenType::Null => {
                self.emit(Opcode::Null);
                Ok(())
            }
            TokenType::Void => {
                self.emit(Opcode::Void);
                Ok(())
            }
            TokenType::This => self.this_expr(),
            TokenType::Super => self.super_expr(),
            TokenType::Identifier => self.identifier_expr(),
            TokenType::Field => self.field_expr(false),
            TokenType::StaticField => self.field_expr(true),
            TokenType::LeftParen => self.grouping(),
            TokenType::LeftBracket => self.list_literal(),
            TokenType::LeftBrace => self.map_literal(),
            TokenType::Minus => self.unary("-(_)"),
            TokenType::Bang => self.unary("!"),
            TokenType::Tilde => self.unary("~"),
            TokenType::Plus => {
                // Open Question (a): unary '+' is a documented no-op,
                // matching the source this behavior was carried over from.
                self.parse_precedence(Precedence::Unary)
            }
            TokenType::Fun => self.function_body("(anonymous)".to_string(), Kind::Function),
            _ => {
                self.error("expected expression");
                Err(())
            }
        }
    }

    fn infix(&mut self) -> ParseResult {
        match self.prev.kind {
            TokenType::Plus => self.binary_op("+(_)"),
            TokenType::Minus => self.binary_op("-(_)"),
            TokenType::Star => self.binary_op("*(_)"),
            TokenType::Slash => self.binary_op("/(_)"),
            TokenType::Percent => self.binary_op("%(_)"),
            TokenType::LessThan => self.binary_op("<(_)"),
            TokenType::GreaterThan => self.binary_op(">(_)"),
            TokenType::LessEq => self.binary_op("<=(_)"),
            TokenType::GreaterEq => self.binary_op(">=(_)"),
            TokenType::EqEq => self.binary_op("==(_)"),
            TokenType::BangEq => self.binary_op("!=(_)"),
            TokenType::Pipe => self.binary_op("|(_)"),
            TokenType::Caret => self.binary_op("^(_)"),
            TokenType::Amp => self.binary_op("&(_)"),
            TokenType::LeftShift => self.binary_op("<<(_)"),
            TokenType::RightShift => self.binary_op(">>(_)"),
            TokenType::DotDot => self.binary_op("..(_)"),
            TokenType::DotDotDot => self.binary_op("...(_)"),
            TokenType::AmpAmp => self.logical(Opcode::And),
            TokenType::PipePipe => self.logical(Opcode::Or),
            TokenType::Is => self.is_expr(),
            TokenType::Dot => self.dot_expr(),
            TokenType::LeftBracket => self.subscript_expr(),
            TokenType::LeftParen => self.call_expr_bare(),
            TokenType::Question => self.conditional_expr(),
            TokenType::Eq => self.error_not_assignable(),
            TokenType::PlusEq | TokenType::MinusEq | TokenType::StarEq | TokenType::SlashEq => {
                self.error_not_assignable()
            }
            _ => {
                self.error("invalid infix operator");
                Err(())
            }
        }
    }

    fn error_not_assignable(&mut self) -> ParseResult {
        self.error("invalid assignment target");
        Err(())
    }

    fn number(&mut self) -> ParseResult {
        let value = parse_number_literal(&self.prev.lexeme);
        self.emit_constant(ConstantValue::Number(value));
        Ok(())
    }

    fn string_literal(&mut self) -> ParseResult {
        let text = self.prev.lexeme.clone();
        self.emit_constant(ConstantValue::String(text));
        Ok(())
    }

    /// `InterpolationStart` carries either a plain leading literal
    /// segment, or (for the `$name` shorthand) a `\0`-joined
    /// `literal\0name\0tail` triple produced by the lexer.
    fn interpolated_string(&mut self) -> ParseResult {
        let lexeme = self.prev.lexeme.clone();
        if let Some((literal, name, tail)) = split_shorthand(&lexeme) {
            self.emit_constant(ConstantValue::String(literal));
            self.load_variable_by_name(&name);
            self.to_string_call();
            let concat_sig = signature::build("+", SignatureKind::Call, 1);
            self.emit_signature_call(&concat_sig, 1);
            self.emit_constant(ConstantValue::String(tail));
            self.emit_signature_call(&concat_sig, 1);
            return Ok(());
        }
        self.emit_constant(ConstantValue::String(lexeme));
        loop {
            self.expression()?;
            self.to_string_call();
            let concat_sig = signature::build("+", SignatureKind::Call, 1);
            self.emit_signature_call(&concat_sig, 1);
            self.advance();
            match self.prev.kind {
                TokenType::InterpolationMid => {
                    self.emit_constant(ConstantValue::String(self.prev.lexeme.clone()));
                    self.emit_signature_call(&concat_sig, 1);
                }
                TokenType::InterpolationEnd => {
                    self.emit_constant(ConstantValue::String(self.prev.lexeme.clone()));
                    self.emit_signature_call(&concat_sig, 1);
                    break;
                }
                _ => {
                    self.error("malformed string interpolation");
                    return Err(());
                }
            }
        }
        Ok(())
    }

    fn to_string_call(&mut self) {
        let sig = signature::build("toString", SignatureKind::Call, 0);
        self.emit_signature_call(&sig, 0);
    }

    fn load_variable_by_name(&mut self, name: &str) {
        let frame = self.stack.len() - 1;
        if let Some(slot) = self.resolve_local(frame, name) {
            self.emit_op_u8(Opcode::LoadLocal, slot);
        } else if let Some(up) = self.resolve_upvalue(frame, name) {
            self.emit_op_u8(Opcode::LoadUpvalue, up);
        } else {
            self.load_named_variable(name);
        }
    }

    fn grouping(&mut self) -> ParseResult {
        self.expression()?;
        self.consume(TokenType::RightParen, "expected ')' after expression")
    }

    fn list_literal(&mut self) -> ParseResult {
        self.load_named_variable("List");
        let ctor_sig = signature::build("new", SignatureKind::Call, 0);
        self.emit_signature_call(&ctor_sig, 0);
        self.skip_newlines();
        if !self.check(TokenType::RightBracket) {
            loop {
                self.skip_newlines();
                let add_sig = signature::build("add", SignatureKind::Call, 1);
                self.expression()?;
                self.emit_signature_call(&add_sig, 1);
                self.emit(Opcode::Pop);
                self.skip_newlines();
                if !self.match_tok(TokenType::Comma) {
                    break;
                }
            }
        }
        self.skip_newlines();
        self.consume(TokenType::RightBracket, "expected ']' to close list literal")
    }

    fn map_literal(&mut self) -> ParseResult {
        self.load_named_variable("Map");
        let ctor_sig = signature::build("new", SignatureKind::Call, 0);
        self.emit_signature_call(&ctor_sig, 0);
        self.skip_newlines();
        if !self.check(TokenType::RightBrace) {
            loop {
                self.skip_newlines();
                self.expression()?;
                self.consume(TokenType::Colon, "expected ':' between map key and value")?;
                self.expression()?;
                let set_sig = signature::build("", SignatureKind::SubscriptSet, 1);
                self.emit_signature_call(&set_sig, 2);
                self.emit(Opcode::Pop);
                self.skip_newlines();
                if !self.match_tok(TokenType::Comma) {
                    break;
                }
            }
        }
        self.skip_newlines();
        self.consume(TokenType::RightBrace, "expected '}' to close map literal")
    }

    fn unary(&mut self, signature: &str) -> ParseResult {
        self.parse_precedence(Precedence::Unary)?;
        self.emit_signature_call(signature, 0);
        Ok(())
    }

    fn binary_op(&mut self, signature: &str) -> ParseResult {
        let prec = infix_precedence(self.prev.kind);
        self.parse_precedence(prec.next())?;
        self.emit_signature_call(signature, 1);
        Ok(())
    }

    fn logical(&mut self, op: Opcode) -> ParseResult {
        let jump = self.emit_jump(op);
        let prec = infix_precedence(self.prev.kind);
        self.parse_precedence(prec.next())?;
        self.patch_jump(jump);
        Ok(())
    }

    fn conditional_expr(&mut self) -> ParseResult {
        let then_jump = self.emit_jump(Opcode::JumpIf);
        self.parse_precedence(Precedence::Assignment)?;
        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump);
        self.consume(TokenType::Colon, "expected ':' in conditional expression")?;
        self.parse_precedence(Precedence::Conditional)?;
        self.patch_jump(else_jump);
        Ok(())
    }

    fn is_expr(&mut self) -> ParseResult {
        self.parse_precedence(Precedence::Comparison)?;
        let sig = signature::build("is", SignatureKind::Call, 1);
        self.emit_signature_call(&sig, 1);
        Ok(())
    }

    fn call_argument_list(&mut self, closing: TokenType) -> Result<u8, ()> {
        let mut arity = 0u8;
        if !self.check(closing) {
            loop {
                self.skip_newlines();
                self.expression()?;
                arity += 1;
                self.skip_newlines();
                if !self.match_tok(TokenType::Comma) {
                    break;
                }
            }
        }
        self.skip_newlines();
        Ok(arity)
    }

    fn call_expr_bare(&mut self) -> ParseResult {
        // A bare `(` infix is only reachable after `call` signature
        // handling elsewhere (anonymous-function invocation sugar); kept
        // minimal since ordinary `name(args)` goes through
        // `identifier_expr`.
        let arity = self.call_argument_list(TokenType::RightParen)?;
        self.consume(TokenType::RightParen, "expected ')' after arguments")?;
        let sig = signature::build("call", SignatureKind::Call, arity);
        self.emit_signature_call(&sig, arity);
        Ok(())
    }

    fn dot_expr(&mut self) -> ParseResult {
        self.advance();
        let name = match self.prev.kind {
            TokenType::Identifier => self.prev.lexeme.clone(),
            kind if is_operator_token(kind) => operator_lexeme(kind).to_string(),
            _ => {
                self.error_at_current("expected method name after '.'");
                return Err(());
            }
        };
        if self.match_tok(TokenType::Eq) {
            self.expression()?;
            let sig = signature::build(&name, SignatureKind::Setter, 1);
            self.emit_signature_call(&sig, 1);
            return Ok(());
        }
        if self.match_tok(TokenType::LeftParen) {
            let arity = self.call_argument_list(TokenType::RightParen)?;
            self.consume(TokenType::RightParen, "expected ')' after arguments")?;
            let sig = signature::build(&name, SignatureKind::Call, arity);
            self.emit_signature_call(&sig, arity);
            return Ok(());
        }
        let sig = signature::build(&name, SignatureKind::Call, 0);
        self.emit_signature_call(&sig, 0);
        Ok(())
    }

    fn subscript_expr(&mut self) -> ParseResult {
        let arity = self.call_argument_list(TokenType::RightBracket)?;
        self.consume(TokenType::RightBracket, "expected ']' after subscript")?;
        if self.match_tok(TokenType::Eq) {
            self.expression()?;
            let sig = signature::build("", SignatureKind::SubscriptSet, arity);
            self.emit_signature_call(&sig, arity + 1);
        } else {
            let sig = signature::build("", SignatureKind::SubscriptGet, arity);
            self.emit_signature_call(&sig, arity);
        }
        Ok(())
    }

    fn this_expr(&mut self) -> ParseResult {
        self.emit_op_u8(Opcode::LoadLocal, 0);
        Ok(())
    }

    fn super_expr(&mut self) -> ParseResult {
        // `faa.method(args)` or `faa(args)` (calls the overridden method
        // of the same signature). We always resolve via `.name` form
        // here; the bare-call form is handled by falling through to the
        // identifier lookup of an implicit same-name super dispatch.
        self.emit_op_u8(Opcode::LoadLocal, 0);
        if self.match_tok(TokenType::Dot) {
            self.advance();
            let name = self.prev.lexeme.clone();
            let arity = if self.match_tok(TokenType::LeftParen) {
                let arity = self.call_argument_list(TokenType::RightParen)?;
                self.consume(TokenType::RightParen, "expected ')' after arguments")?;
                arity
            } else {
                0
            };
            let sig = signature::build(&name, SignatureKind::Call, arity);
            self.emit_super_call(&sig, arity);
        }
        Ok(())
    }

    fn emit_super_call(&mut self, signature: &str, arity: u8) {
        let symbol = self.symbols.intern(signature);
        match Opcode::super_for_arity(arity) {
            Some(op) => {
                self.emit_op_u16(op, symbol.0);
                // Super calls bind to the superclass statically, so a
                // method inherited unchanged still calls the right
                // version of an overridden method. Reserve a constant
                // slot holding null; the class-binding pass overwrites it
                // with the real superclass once the method is bound.
                let slot = self.intern_constant(ConstantValue::Null);
                self.emit_u16(slot);
            }
            None => {
                self.emit(Opcode::Call);
                self.emit_u16(symbol.0);
                self.emit_u16(arity as u16);
            }
        }
    }

    fn identifier_expr(&mut self) -> ParseResult {
        let name = self.prev.lexeme.clone();
        if self.match_tok(TokenType::Eq) {
            self.expression()?;
            self.store_variable(&name);
            return Ok(());
        }
        let arity = if self.match_tok(TokenType::LeftParen) {
            let arity = self.call_argument_list(TokenType::RightParen)?;
            self.consume(TokenType::RightParen, "expected ')' after arguments")?;
            Some(arity)
        } else {
            None
        };

        match arity {
            Some(arity) => {
                // A call on a bare name targets an implicit receiver
                // (the enclosing `this`) if the name isn't a known
                // local/upvalue/module var; otherwise it's `name.call(...)`
                // on the looked-up value.
                if self.is_known_variable(&name) {
                    self.load_variable_by_name(&name);
                    let sig = signature::build("call", SignatureKind::Call, arity);
                    self.emit_signature_call(&sig, arity);
                } else {
                    self.emit_op_u8(Opcode::LoadLocal, 0);
                    let sig = signature::build(&name, SignatureKind::Call, arity);
                    self.emit_signature_call(&sig, arity);
                }
            }
            None => self.load_variable_by_name(&name),
        }
        Ok(())
    }

    /// Whether `name` resolves to a local in the current frame or any
    /// enclosing one (i.e. would become an upvalue capture), without
    /// actually performing the capture -- used only to decide between
    /// "call this value" and "implicit-`this` method call" desugaring.
    fn is_known_variable(&self, name: &str) -> bool {
        (0..self.stack.len()).rev().any(|frame| self.resolve_local(frame, name).is_some())
    }

    fn store_variable(&mut self, name: &str) {
        let frame = self.stack.len() - 1;
        if let Some(slot) = self.resolve_local(frame, name) {
            self.emit_op_u8(Opcode::StoreLocal, slot);
        } else if let Some(up) = self.resolve_upvalue(frame, name) {
            self.emit_op_u8(Opcode::StoreUpvalue, up);
        } else {
            let sym = self.declare_module_var(name);
            self.emit_op_u16(Opcode::StoreModuleVar, sym);
        }
    }

    fn field_expr(&mut self, is_static: bool) -> ParseResult {
        let name = self.prev.lexeme.clone();
        let class_depth = self.class_stack.len();
        if class_depth == 0 {
            self.error("field reference outside a class body");
            return Err(());
        }
        let index = {
            let info = self.class_stack.last_mut().unwrap();
            if let Some(&i) = info.field_names.get(&name) {
                i
            } else {
                let i = info.fields.len() as u16;
                if i as usize >= MAX_FIELDS {
                    self.error("too many fields declared on this class");
                }
                info.fields.push(FieldDecl {
                    name: name.clone(),
                    local_index: i,
                });
                info.field_names.insert(name.clone(), i);
                i
            }
        };
        if is_static {
            // Static fields behave like hidden module variables scoped by
            // class name; modeled as ordinary module vars with a
            // mangled name so distinct classes don't collide.
            let class_name = self.class_stack.last().unwrap().name.clone();
            let mangled = format!("{class_name} static {name}");
            if self.match_tok(TokenType::Eq) {
                self.expression()?;
                self.store_variable(&mangled);
            } else {
                self.load_variable_by_name(&mangled);
            }
            return Ok(());
        }
        if index as usize > u8::MAX as usize {
            self.error("field index exceeds single-byte operand width");
            return Err(());
        }
        if self.match_tok(TokenType::Eq) {
            self.expression()?;
            self.emit_op_u8(Opcode::StoreFieldThis, index as u8);
        } else {
            self.emit_op_u8(Opcode::LoadFieldThis, index as u8);
        }
        Ok(())
    }
}

fn is_operator_token(kind: TokenType) -> bool {
    use TokenType::*;
    matches!(
        kind,
        Plus | Minus
            | Star
            | Slash
            | Percent
            | Pipe
            | Caret
            | Amp
            | LeftShift
            | RightShift
            | LessThan
            | GreaterThan
            | LessEq
            | GreaterEq
            | EqEq
            | BangEq
            | Bang
            | Tilde
            | DotDot
            | DotDotDot
    )
}

fn operator_lexeme(kind: TokenType) -> &'static str {
    use TokenType::*;
    match kind {
        Plus => "+",
        Minus => "-",
        Star => "*",
        Slash => "/",
        Percent => "%",
        Pipe => "|",
        Caret => "^",
        Amp => "&",
        LeftShift => "<<",
        RightShift => ">>",
        LessThan => "<",
        GreaterThan => ">",
        LessEq => "<=",
        GreaterEq => ">=",
        EqEq => "==",
        BangEq => "!=",
        Bang => "!",
        Tilde => "~",
        DotDot => "..",
        DotDotDot => "...",
        _ => "?",
    }
}

fn parse_number_literal(text: &str) -> f64 {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).unwrap_or(0) as f64;
    }
    if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        return u64::from_str_radix(bin, 2).unwrap_or(0) as f64;
    }
    if let Some(oct) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        return u64::from_str_radix(oct, 8).unwrap_or(0) as f64;
    }
    text.parse::<f64>().unwrap_or(f64::NAN)
}

fn split_shorthand(lexeme: &str) -> Option<(String, String, String)> {
    let mut parts = lexeme.splitn(3, '\0');
    let literal = parts.next()?;
    let name = parts.next()?;
    let tail = parts.next()?;
    if lexeme.contains('\0') {
        Some((literal.to_string(), name.to_string(), tail.to_string()))
    } else {
        None
    }
}

/// Turns a fatal compile-time resource limit into a [`VmError`], used by
/// callers that need to distinguish "too many X" conditions from
/// ordinary syntax errors (spec §7).
#[must_use]
pub fn fatal_for_limit(message: &str) -> Option<VmError> {
    let cause = if message.contains("local variable") {
        FatalCause::MaxLocalsExceeded
    } else if message.contains("upvalue") {
        FatalCause::MaxUpvaluesExceeded
    } else if message.contains("constant") {
        FatalCause::MaxConstantsExceeded
    } else if message.contains("field") {
        FatalCause::MaxFieldsExceeded
    } else if message.contains("module-level variable") {
        FatalCause::MaxModuleVarsExceeded
    } else if message.contains("parameter") {
        FatalCause::MaxParametersExceeded
    } else if message.contains("jump offset") {
        FatalCause::JumpTooLarge
    } else {
        return None;
    };
    Some(VmError::Fatal(cause))
}
