//! Single-pass compiler: a recursive-descent parser that drives the code
//! generator's operand stack and emits one [`Proto`] per function body.
pub mod code;
pub mod expr;
pub mod scope;

use std::rc::Rc;

use moonlet_core::opcode::{OpCode, LFIELDS_PER_FLUSH};
use moonlet_core::proto::{chunk_id, Proto, UpvalDesc};
use moonlet_core::string::LuaString;
use thiserror::Error;
use tracing::{debug, trace};

use crate::lexer::{LexError, Lexer};
use crate::token::Token;
use code::FuncState;
use expr::{BinOp, Operand, OperandKind, UnOp, UNARY_PRIORITY};
use scope::{GotoDesc, LabelDesc, MAX_VARS};

/// Most upvalues one function may capture.
const MAX_UPVALUES: usize = 255;
/// Nesting limit for statements and expressions.
const MAX_LEVELS: u32 = 200;

/// Compiler error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{chunk}:{line}: {message}")]
pub struct CompileError {
    pub chunk: String,
    pub line: u32,
    pub message: String,
}

/// Table constructor bookkeeping.
struct ConsControl {
    /// Register holding the table.
    reg: u32,
    /// Array items so far.
    na: u32,
    /// Record items so far.
    nh: u32,
    /// Array items not yet flushed by `SETLIST`.
    tostore: u32,
    /// The last array item is still on the operand stack.
    pending: bool,
}

struct Compiler<'a> {
    lexer: Lexer<'a>,
    /// Chunk name as shown in messages.
    chunk: String,
    source: LuaString,
    token: Token,
    token_line: u32,
    /// Functions being compiled, innermost last.
    func_stack: Vec<FuncState>,
    /// Visible labels of all open functions.
    labels: Vec<LabelDesc>,
    /// Pending gotos of all open functions.
    gotos: Vec<GotoDesc>,
    levels: u32,
}

fn token_str(t: &Token) -> String {
    match t {
        Token::Eof => "<eof>".to_string(),
        _ => format!("'{t}'"),
    }
}

fn unary_op(t: &Token) -> Option<UnOp> {
    Some(match t {
        Token::Not => UnOp::Not,
        Token::Minus => UnOp::Minus,
        Token::Tilde => UnOp::BNot,
        Token::Hash => UnOp::Len,
        _ => return None,
    })
}

fn binary_op(t: &Token) -> Option<BinOp> {
    Some(match t {
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Percent => BinOp::Mod,
        Token::Caret => BinOp::Pow,
        Token::Slash => BinOp::Div,
        Token::FloorDiv => BinOp::IDiv,
        Token::Ampersand => BinOp::BAnd,
        Token::Pipe => BinOp::BOr,
        Token::Tilde => BinOp::BXor,
        Token::ShiftLeft => BinOp::Shl,
        Token::ShiftRight => BinOp::Shr,
        Token::DotDot => BinOp::Concat,
        Token::NotEqual => BinOp::Ne,
        Token::Equal => BinOp::Eq,
        Token::Less => BinOp::Lt,
        Token::LessEq => BinOp::Le,
        Token::Greater => BinOp::Gt,
        Token::GreaterEq => BinOp::Ge,
        Token::And => BinOp::And,
        Token::Or => BinOp::Or,
        _ => return None,
    })
}

impl<'a> Compiler<'a> {
    fn new(source: &'a [u8], chunkname: &str) -> Self {
        Compiler {
            lexer: Lexer::new(source),
            chunk: chunk_id(chunkname.as_bytes()),
            source: LuaString::from(chunkname),
            token: Token::Eof,
            token_line: 1,
            func_stack: Vec::new(),
            labels: Vec::new(),
            gotos: Vec::new(),
            levels: 0,
        }
    }

    fn fs(&self) -> &FuncState {
        self.func_stack.last().expect("no open function")
    }

    fn fs_mut(&mut self) -> &mut FuncState {
        self.func_stack.last_mut().expect("no open function")
    }

    // ---- Errors ----

    fn error_at(&self, line: u32, message: impl Into<String>) -> CompileError {
        CompileError {
            chunk: self.chunk.clone(),
            line,
            message: message.into(),
        }
    }

    /// Error quoting the current token.
    fn syntax_error(&self, msg: impl AsRef<str>) -> CompileError {
        let near = match self.token {
            Token::Eof => "<eof>".to_string(),
            _ => format!("'{}'", self.lexer.token_text),
        };
        self.error_at(self.token_line, format!("{} near {}", msg.as_ref(), near))
    }

    /// Error without token context.
    fn sem_error(&self, msg: impl Into<String>) -> CompileError {
        self.error_at(self.token_line, msg)
    }

    fn lex_error(&self, e: &LexError) -> CompileError {
        self.error_at(e.line, e.message.clone())
    }

    fn error_limit(&self, level: usize, limit: usize, what: &str) -> CompileError {
        let line = self.func_stack[level].proto.line_defined;
        let place = if line == 0 {
            "main function".to_string()
        } else {
            format!("function at line {line}")
        };
        self.syntax_error(format!("too many {what} (limit is {limit}) in {place}"))
    }

    /// Surface an error recorded by the code generator.
    fn check_generator(&mut self) -> Result<(), CompileError> {
        match self.fs_mut().error.take() {
            Some(msg) => Err(self.syntax_error(msg)),
            None => Ok(()),
        }
    }

    fn enter_level(&mut self) -> Result<(), CompileError> {
        self.levels += 1;
        if self.levels > MAX_LEVELS {
            return Err(self.error_limit(self.func_stack.len() - 1, MAX_LEVELS as usize, "C levels"));
        }
        Ok(())
    }

    fn leave_level(&mut self) {
        self.levels -= 1;
    }

    // ---- Token helpers ----

    fn load_token(&mut self) -> Result<(), CompileError> {
        match self.lexer.current() {
            Ok(st) => {
                self.token = st.token.clone();
                self.token_line = st.pos.line;
            }
            Err(e) => return Err(self.lex_error(e)),
        }
        let line = self.lexer.lastline;
        if let Some(fs) = self.func_stack.last_mut() {
            fs.line = line;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<(), CompileError> {
        if let Err(e) = self.lexer.advance() {
            return Err(self.lex_error(&e));
        }
        self.load_token()
    }

    fn test_next(&mut self, t: &Token) -> Result<bool, CompileError> {
        if &self.token == t {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn error_expected(&self, t: &Token) -> CompileError {
        self.syntax_error(format!("{} expected", token_str(t)))
    }

    fn check(&self, t: &Token) -> Result<(), CompileError> {
        if &self.token != t {
            return Err(self.error_expected(t));
        }
        Ok(())
    }

    fn check_next(&mut self, t: &Token) -> Result<(), CompileError> {
        self.check(t)?;
        self.next()
    }

    fn check_match(&mut self, what: &Token, who: &Token, line: u32) -> Result<(), CompileError> {
        if !self.test_next(what)? {
            if line == self.token_line {
                return Err(self.error_expected(what));
            }
            return Err(self.syntax_error(format!(
                "{} expected (to close {} at line {})",
                token_str(what),
                token_str(who),
                line
            )));
        }
        Ok(())
    }

    fn str_check_name(&mut self) -> Result<LuaString, CompileError> {
        match &self.token {
            Token::Name(s) => {
                let s = s.clone();
                self.next()?;
                Ok(s)
            }
            _ => Err(self.syntax_error("<name> expected")),
        }
    }

    fn block_follow(&self, with_until: bool) -> bool {
        match self.token {
            Token::Else | Token::ElseIf | Token::End | Token::Eof => true,
            Token::Until => with_until,
            _ => false,
        }
    }

    // ---- Functions ----

    fn open_func(&mut self, line: u32) {
        let mut fs = FuncState::new(Some(self.source.clone()), line);
        fs.line = self.lexer.lastline;
        fs.enter_block(false, self.labels.len(), self.gotos.len());
        self.func_stack.push(fs);
    }

    fn close_func(&mut self) -> Result<Proto, CompileError> {
        self.fs_mut().ret(0, 0);
        self.leave_block()?;
        self.check_generator()?;
        let fs = self.func_stack.pop().expect("no open function");
        let proto = fs.finish();
        trace!(
            line = proto.line_defined,
            instructions = proto.code.len(),
            constants = proto.constants.len(),
            "closed function"
        );
        if let Some(parent) = self.func_stack.last_mut() {
            parent.line = self.lexer.lastline;
        }
        Ok(proto)
    }

    fn main_func(&mut self) -> Result<Rc<Proto>, CompileError> {
        self.open_func(0);
        let fs = self.fs_mut();
        fs.proto.is_vararg = true;
        fs.proto.upvalues.push(UpvalDesc {
            name: Some(LuaString::from("_ENV")),
            in_stack: true,
            index: 0,
            kind: 0,
        });
        self.statlist()?;
        self.check(&Token::Eof)?;
        let proto = self.close_func()?;
        debug!(chunk = %self.chunk, instructions = proto.code.len(), "compiled chunk");
        Ok(Rc::new(proto))
    }

    /// `body -> '(' parlist ')' block END`; pushes the closure.
    fn body(&mut self, is_method: bool, line: u32) -> Result<(), CompileError> {
        self.open_func(line);
        self.check_next(&Token::LParen)?;
        if is_method {
            self.new_local("self")?;
            self.fs_mut().adjust_locals(1);
        }
        self.par_list()?;
        self.check_next(&Token::RParen)?;
        self.statlist()?;
        let last = self.token_line;
        self.fs_mut().proto.last_line_defined = last;
        self.check_match(&Token::End, &Token::Function, line)?;
        let proto = self.close_func()?;
        let fs = self.fs_mut();
        fs.proto.protos.push(Rc::new(proto));
        let idx = fs.proto.protos.len() as u32 - 1;
        let pc = fs.code_abx(OpCode::Closure, 0, idx);
        let mut e = Operand::new(OperandKind::Relocatable(pc));
        fs.exp2nextreg(&mut e);
        fs.push(e);
        Ok(())
    }

    fn par_list(&mut self) -> Result<(), CompileError> {
        let mut nparams = 0;
        let mut is_vararg = false;
        if self.token != Token::RParen {
            loop {
                match self.token.clone() {
                    Token::Name(name) => {
                        self.next()?;
                        self.new_local(name)?;
                        nparams += 1;
                    }
                    Token::DotDotDot => {
                        self.next()?;
                        is_vararg = true;
                    }
                    _ => return Err(self.syntax_error("<name> or '...' expected")),
                }
                if is_vararg || !self.test_next(&Token::Comma)? {
                    break;
                }
            }
        }
        let fs = self.fs_mut();
        fs.proto.is_vararg = is_vararg;
        fs.adjust_locals(nparams);
        fs.proto.num_params = fs.nactvar as u8;
        let n = fs.nactvar;
        fs.reserve_regs(n);
        Ok(())
    }

    // ---- Variables ----

    fn new_local(&mut self, name: impl Into<LuaString>) -> Result<(), CompileError> {
        if !self.fs_mut().new_local(name.into()) {
            return Err(self.error_limit(self.func_stack.len() - 1, MAX_VARS, "local variables"));
        }
        Ok(())
    }

    fn new_upvalue(&mut self, level: usize, name: &LuaString, v: &OperandKind) -> Result<u32, CompileError> {
        if self.func_stack[level].proto.upvalues.len() + 1 > MAX_UPVALUES {
            return Err(self.error_limit(level, MAX_UPVALUES, "upvalues"));
        }
        let (in_stack, index) = match *v {
            OperandKind::Local(r) => (true, r),
            OperandKind::Upvalue(i) => (false, i),
            ref other => panic!("cannot capture {other:?}"),
        };
        let fs = &mut self.func_stack[level];
        fs.proto.upvalues.push(UpvalDesc {
            name: Some(name.clone()),
            in_stack,
            index: index as u8,
            kind: 0,
        });
        Ok(fs.proto.upvalues.len() as u32 - 1)
    }

    /// Resolve `name` in function `level`: local, known upvalue, or a new
    /// upvalue captured from an enclosing function. `None` means global.
    fn single_var_aux(
        &mut self,
        level: usize,
        name: &LuaString,
        base: bool,
    ) -> Result<Option<OperandKind>, CompileError> {
        let fs = &mut self.func_stack[level];
        if let Some(reg) = fs.search_local(name) {
            if !base {
                fs.mark_upval(reg);
            }
            return Ok(Some(OperandKind::Local(reg)));
        }
        if let Some(idx) = fs.search_upvalue(name) {
            return Ok(Some(OperandKind::Upvalue(idx)));
        }
        if level == 0 {
            return Ok(None);
        }
        match self.single_var_aux(level - 1, name, false)? {
            Some(v) => {
                let idx = self.new_upvalue(level, name, &v)?;
                Ok(Some(OperandKind::Upvalue(idx)))
            }
            None => Ok(None),
        }
    }

    fn single_var(&mut self) -> Result<(), CompileError> {
        let name = self.str_check_name()?;
        let level = self.func_stack.len() - 1;
        match self.single_var_aux(level, &name, true)? {
            Some(kind) => self.fs_mut().push(kind),
            None => {
                // Globals are fields of _ENV, which the main function always has.
                let env = self
                    .single_var_aux(level, &LuaString::from("_ENV"), true)?
                    .unwrap_or(OperandKind::Upvalue(0));
                let fs = self.fs_mut();
                let mut var = Operand::new(env);
                let mut key = Operand::new(OperandKind::Constant(fs.string_k(name)));
                fs.indexed(&mut var, &mut key);
                fs.push(var);
            }
        }
        Ok(())
    }

    // ---- Blocks, labels and gotos ----

    fn enter_block(&mut self, is_loop: bool) {
        let (labels, gotos) = (self.labels.len(), self.gotos.len());
        self.fs_mut().enter_block(is_loop, labels, gotos);
    }

    fn leave_block(&mut self) -> Result<(), CompileError> {
        let fs = self.fs_mut();
        let bl = fs.blocks.last().cloned().expect("block underflow");
        let has_previous = fs.blocks.len() > 1;
        if has_previous && bl.upval {
            // Jump to the next instruction, closing the block's upvalues.
            let j = fs.jump();
            fs.patch_close(&j, bl.nactvar);
            fs.patch_to_here(j);
        }
        if bl.is_loop {
            self.break_label()?;
        }
        let fs = self.fs_mut();
        fs.blocks.pop();
        fs.remove_locals(bl.nactvar);
        debug_assert_eq!(bl.nactvar, fs.nactvar);
        fs.free_reg = fs.nactvar;
        self.labels.truncate(bl.first_label);
        if has_previous {
            self.move_gotos_out(bl.first_goto, bl.nactvar, bl.upval)?;
        } else if bl.first_goto < self.gotos.len() {
            return Err(self.undef_goto(bl.first_goto));
        }
        Ok(())
    }

    fn undef_goto(&self, g: usize) -> CompileError {
        let gt = &self.gotos[g];
        let msg = if gt.name.as_bytes() == b"break" {
            format!("<break> at line {} not inside a loop", gt.line)
        } else {
            format!("no visible label '{}' for <goto> at line {}", gt.name, gt.line)
        };
        self.sem_error(msg)
    }

    fn close_goto(&mut self, g: usize, lb: usize) -> Result<(), CompileError> {
        let (label_pc, label_nactvar) = (self.labels[lb].pc, self.labels[lb].nactvar);
        if self.gotos[g].nactvar < label_nactvar {
            let gt = self.gotos[g].clone();
            let vname = self.fs_mut().local_var(gt.nactvar).name.clone();
            return Err(self.sem_error(format!(
                "<goto {}> at line {} jumps into the scope of local '{}'",
                gt.name, gt.line, vname
            )));
        }
        let gt = self.gotos.remove(g);
        self.fs_mut().patch_list(gt.jumps, label_pc);
        Ok(())
    }

    /// Resolve pending goto `g` against the labels of the current block.
    fn find_label(&mut self, g: usize) -> Result<bool, CompileError> {
        let bl = self.fs().blocks.last().cloned().expect("block underflow");
        for i in bl.first_label..self.labels.len() {
            if self.labels[i].name == self.gotos[g].name {
                let lb_nactvar = self.labels[i].nactvar;
                if self.gotos[g].nactvar > lb_nactvar && (bl.upval || self.labels.len() > bl.first_label) {
                    let jumps = self.gotos[g].jumps.clone();
                    self.fs_mut().patch_close(&jumps, lb_nactvar);
                }
                self.close_goto(g, i)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Resolve the current block's pending gotos that target label `lb`.
    fn find_gotos(&mut self, lb: usize) -> Result<(), CompileError> {
        let mut i = self.fs().blocks.last().map_or(0, |b| b.first_goto);
        while i < self.gotos.len() {
            if self.gotos[i].name == self.labels[lb].name {
                self.close_goto(i, lb)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Hand a closed block's pending gotos to the enclosing block.
    fn move_gotos_out(&mut self, first_goto: usize, nactvar: u32, upval: bool) -> Result<(), CompileError> {
        let mut i = first_goto;
        while i < self.gotos.len() {
            if self.gotos[i].nactvar > nactvar {
                if upval {
                    let jumps = self.gotos[i].jumps.clone();
                    self.fs_mut().patch_close(&jumps, nactvar);
                }
                self.gotos[i].nactvar = nactvar;
            }
            if !self.find_label(i)? {
                i += 1;
            }
        }
        Ok(())
    }

    fn break_label(&mut self) -> Result<(), CompileError> {
        let fs = self.fs();
        let label = LabelDesc {
            name: LuaString::from("break"),
            pc: fs.pc(),
            line: 0,
            nactvar: fs.nactvar,
        };
        self.labels.push(label);
        self.find_gotos(self.labels.len() - 1)
    }

    // ---- Statements ----

    fn statlist(&mut self) -> Result<(), CompileError> {
        while !self.block_follow(true) {
            if self.token == Token::Return {
                return self.statement();
            }
            self.statement()?;
        }
        Ok(())
    }

    fn block(&mut self) -> Result<(), CompileError> {
        self.enter_block(false);
        self.statlist()?;
        self.leave_block()
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        let line = self.token_line;
        self.enter_level()?;
        match self.token {
            Token::Semi => self.next()?,
            Token::If => self.if_stat(line)?,
            Token::While => self.while_stat(line)?,
            Token::Do => {
                self.next()?;
                self.block()?;
                self.check_match(&Token::End, &Token::Do, line)?;
            }
            Token::For => self.for_stat(line)?,
            Token::Repeat => self.repeat_stat(line)?,
            Token::Function => self.func_stat(line)?,
            Token::Local => {
                self.next()?;
                if self.test_next(&Token::Function)? {
                    self.local_func()?;
                } else {
                    self.local_stat()?;
                }
            }
            Token::DoubleColon => {
                self.next()?;
                let name = self.str_check_name()?;
                self.label_stat(name, line)?;
            }
            Token::Return => {
                self.next()?;
                self.ret_stat()?;
            }
            Token::Break | Token::Goto => {
                let j = self.fs_mut().jump();
                self.goto_stat(j)?;
            }
            _ => self.expr_stat()?,
        }
        self.check_generator()?;
        let fs = self.fs_mut();
        debug_assert_eq!(fs.depth(), 0, "operands left after statement");
        debug_assert!(fs.free_reg >= fs.nactvar);
        fs.free_reg = fs.nactvar;
        self.leave_level();
        Ok(())
    }

    fn test_then_block(&mut self, escapes: &mut Vec<usize>) -> Result<(), CompileError> {
        self.next()?;
        self.expr()?;
        self.check_next(&Token::Then)?;
        let jf;
        if matches!(self.token, Token::Goto | Token::Break) {
            let fs = self.fs_mut();
            let mut v = fs.pop();
            fs.go_if_false(&mut v);
            self.enter_block(false);
            self.goto_stat(std::mem::take(&mut v.t))?;
            while self.test_next(&Token::Semi)? {}
            if self.block_follow(false) {
                // The goto is the whole block.
                return self.leave_block();
            }
            jf = self.fs_mut().jump();
        } else {
            let fs = self.fs_mut();
            let mut v = fs.pop();
            fs.go_if_true(&mut v);
            self.enter_block(false);
            jf = std::mem::take(&mut v.f);
        }
        self.statlist()?;
        self.leave_block()?;
        if matches!(self.token, Token::Else | Token::ElseIf) {
            let j = self.fs_mut().jump();
            escapes.extend(j);
        }
        self.fs_mut().patch_to_here(jf);
        Ok(())
    }

    fn if_stat(&mut self, line: u32) -> Result<(), CompileError> {
        let mut escapes = Vec::new();
        self.test_then_block(&mut escapes)?;
        while self.token == Token::ElseIf {
            self.test_then_block(&mut escapes)?;
        }
        if self.test_next(&Token::Else)? {
            self.block()?;
        }
        self.check_match(&Token::End, &Token::If, line)?;
        self.fs_mut().patch_to_here(escapes);
        Ok(())
    }

    /// Condition of a loop; returns the jumps taken when it is false.
    fn cond(&mut self) -> Result<Vec<usize>, CompileError> {
        self.expr()?;
        let fs = self.fs_mut();
        let mut v = fs.pop();
        if v.kind == OperandKind::Nil {
            v.kind = OperandKind::False;
        }
        fs.go_if_true(&mut v);
        Ok(v.f)
    }

    fn while_stat(&mut self, line: u32) -> Result<(), CompileError> {
        self.next()?;
        let init = self.fs_mut().get_label();
        let exit = self.cond()?;
        self.enter_block(true);
        self.check_next(&Token::Do)?;
        self.block()?;
        let fs = self.fs_mut();
        let back = fs.jump();
        fs.patch_list(back, init);
        self.check_match(&Token::End, &Token::While, line)?;
        self.leave_block()?;
        self.fs_mut().patch_to_here(exit);
        Ok(())
    }

    fn repeat_stat(&mut self, line: u32) -> Result<(), CompileError> {
        let init = self.fs_mut().get_label();
        self.enter_block(true);
        self.enter_block(false);
        self.next()?;
        self.statlist()?;
        self.check_match(&Token::Until, &Token::Repeat, line)?;
        // The condition sees the body's locals.
        let exit = self.cond()?;
        let (upval, nactvar) = self
            .fs()
            .blocks
            .last()
            .map(|b| (b.upval, b.nactvar))
            .expect("block underflow");
        if upval {
            self.fs_mut().patch_close(&exit, nactvar);
        }
        self.leave_block()?;
        self.fs_mut().patch_list(exit, init);
        self.leave_block()
    }

    fn exp1(&mut self) -> Result<(), CompileError> {
        self.expr()?;
        self.fs_mut().consume(FuncState::exp2nextreg);
        Ok(())
    }

    fn for_stat(&mut self, line: u32) -> Result<(), CompileError> {
        self.enter_block(true);
        self.next()?;
        let name = self.str_check_name()?;
        match self.token {
            Token::Assign => self.for_num(name, line)?,
            Token::Comma | Token::In => self.for_list(name)?,
            _ => return Err(self.syntax_error("'=' or 'in' expected")),
        }
        self.check_match(&Token::End, &Token::For, line)?;
        self.leave_block()
    }

    fn for_num(&mut self, name: LuaString, line: u32) -> Result<(), CompileError> {
        let base = self.fs().free_reg;
        self.new_local("(for index)")?;
        self.new_local("(for limit)")?;
        self.new_local("(for step)")?;
        self.new_local(name)?;
        self.check_next(&Token::Assign)?;
        self.exp1()?;
        self.check_next(&Token::Comma)?;
        self.exp1()?;
        if self.test_next(&Token::Comma)? {
            self.exp1()?;
        } else {
            let fs = self.fs_mut();
            let k = fs.number_k(1.0);
            let reg = fs.free_reg;
            fs.code_k(reg, k);
            fs.reserve_regs(1);
        }
        self.for_body(base, line, 1, true)
    }

    fn for_list(&mut self, index_name: LuaString) -> Result<(), CompileError> {
        let base = self.fs().free_reg;
        self.new_local("(for generator)")?;
        self.new_local("(for state)")?;
        self.new_local("(for control)")?;
        self.new_local(index_name)?;
        let mut nvars = 4;
        while self.test_next(&Token::Comma)? {
            let name = self.str_check_name()?;
            self.new_local(name)?;
            nvars += 1;
        }
        self.check_next(&Token::In)?;
        let line = self.token_line;
        let nexps = self.explist()?;
        self.adjust_assign(3, nexps);
        // room to call the generator
        self.fs_mut().check_stack(3);
        self.for_body(base, line, nvars - 3, false)
    }

    fn for_body(&mut self, base: u32, line: u32, nvars: u32, is_num: bool) -> Result<(), CompileError> {
        self.fs_mut().adjust_locals(3);
        self.check_next(&Token::Do)?;
        let fs = self.fs_mut();
        let prep = if is_num {
            vec![fs.code_asbx(OpCode::ForPrep, base, -1)]
        } else {
            fs.jump()
        };
        let prep_pc = prep[0];
        self.enter_block(false);
        let fs = self.fs_mut();
        fs.adjust_locals(nvars);
        fs.reserve_regs(nvars);
        self.block()?;
        self.leave_block()?;
        let fs = self.fs_mut();
        fs.patch_to_here(prep);
        let end_for = if is_num {
            fs.code_asbx(OpCode::ForLoop, base, -1)
        } else {
            fs.code_abc(OpCode::TForCall, base, 0, nvars);
            fs.fix_line(line);
            fs.code_asbx(OpCode::TForLoop, base + 2, -1)
        };
        fs.patch_list(vec![end_for], prep_pc + 1);
        fs.fix_line(line);
        Ok(())
    }

    fn func_name(&mut self) -> Result<bool, CompileError> {
        self.single_var()?;
        while self.token == Token::Dot {
            self.field_sel()?;
        }
        if self.token == Token::Colon {
            self.field_sel()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn func_stat(&mut self, line: u32) -> Result<(), CompileError> {
        self.next()?;
        let is_method = self.func_name()?;
        self.body(is_method, line)?;
        let fs = self.fs_mut();
        let mut b = fs.pop();
        let v = fs.pop();
        fs.store_var(&v, &mut b);
        // the definition happens on the first line
        fs.fix_line(line);
        Ok(())
    }

    fn local_func(&mut self) -> Result<(), CompileError> {
        let name = self.str_check_name()?;
        self.new_local(name)?;
        self.fs_mut().adjust_locals(1);
        let line = self.token_line;
        self.body(false, line)?;
        let fs = self.fs_mut();
        let b = fs.pop();
        let reg = b.reg().expect("closure lands in a register");
        // debug info only sees the variable after the closure exists
        let pc = fs.pc() as u32;
        fs.local_var(reg).start_pc = pc;
        Ok(())
    }

    fn local_stat(&mut self) -> Result<(), CompileError> {
        let mut nvars = 0;
        loop {
            let name = self.str_check_name()?;
            self.new_local(name)?;
            nvars += 1;
            if !self.test_next(&Token::Comma)? {
                break;
            }
        }
        let nexps = if self.test_next(&Token::Assign)? {
            self.explist()?
        } else {
            self.fs_mut().push(OperandKind::Void);
            0
        };
        self.adjust_assign(nvars, nexps);
        self.fs_mut().adjust_locals(nvars);
        Ok(())
    }

    fn label_stat(&mut self, name: LuaString, line: u32) -> Result<(), CompileError> {
        let first = self.fs().blocks.last().map_or(0, |b| b.first_label);
        if let Some(prev) = self.labels[first..].iter().find(|l| l.name == name) {
            return Err(self.sem_error(format!(
                "label '{}' already defined on line {}",
                name, prev.line
            )));
        }
        self.check_next(&Token::DoubleColon)?;
        let pc = self.fs_mut().get_label();
        let nactvar = self.fs().nactvar;
        self.labels.push(LabelDesc {
            name,
            pc,
            line,
            nactvar,
        });
        let l = self.labels.len() - 1;
        while matches!(self.token, Token::Semi | Token::DoubleColon) {
            self.statement()?;
        }
        if self.block_follow(false) {
            // Last statement of the block: locals are already out of scope.
            self.labels[l].nactvar = self.fs().blocks.last().map_or(0, |b| b.nactvar);
        }
        self.find_gotos(l)
    }

    fn goto_stat(&mut self, jumps: Vec<usize>) -> Result<(), CompileError> {
        let line = self.token_line;
        let name = if self.test_next(&Token::Goto)? {
            self.str_check_name()?
        } else {
            self.next()?;
            LuaString::from("break")
        };
        let nactvar = self.fs().nactvar;
        self.gotos.push(GotoDesc {
            name,
            jumps,
            line,
            nactvar,
        });
        self.find_label(self.gotos.len() - 1)?;
        Ok(())
    }

    fn ret_stat(&mut self) -> Result<(), CompileError> {
        let (first, nret);
        if self.block_follow(true) || self.token == Token::Semi {
            first = 0;
            nret = 0;
        } else {
            let n = self.explist()?;
            let fs = self.fs_mut();
            let mut e = fs.pop();
            if e.has_multret() {
                fs.set_multret(&mut e);
                if let OperandKind::Call(pc) = e.kind {
                    if n == 1 {
                        fs.make_tail_call(pc);
                    }
                }
                first = fs.nactvar;
                nret = -1;
            } else if n == 1 {
                first = fs.exp2anyreg(&mut e);
                nret = 1;
            } else {
                fs.exp2nextreg(&mut e);
                first = fs.nactvar;
                nret = n as i32;
            }
        }
        self.fs_mut().ret(first, nret);
        self.test_next(&Token::Semi)?;
        Ok(())
    }

    fn expr_stat(&mut self) -> Result<(), CompileError> {
        self.suffixed_exp()?;
        if matches!(self.token, Token::Assign | Token::Comma) {
            return self.rest_assign();
        }
        let fs = self.fs_mut();
        let v = fs.pop();
        match v.kind {
            OperandKind::Call(pc) => {
                // call statements keep no results
                fs.set_call_results(pc, 1);
                Ok(())
            }
            _ => Err(self.syntax_error("syntax error")),
        }
    }

    /// `var {',' var} '=' explist`; the first target is on the stack.
    fn rest_assign(&mut self) -> Result<(), CompileError> {
        let first = self.fs().depth() - 1;
        let mut nvars: u32 = 1;
        loop {
            if !self.fs().top().is_var() {
                return Err(self.syntax_error("syntax error"));
            }
            if !self.test_next(&Token::Comma)? {
                break;
            }
            self.suffixed_exp()?;
            if !matches!(self.fs().top().kind, OperandKind::Indexed { .. }) {
                self.fs_mut().check_conflict(first);
            }
            nvars += 1;
            if nvars + self.levels > MAX_LEVELS {
                return Err(self.error_limit(self.func_stack.len() - 1, MAX_LEVELS as usize, "C levels"));
            }
        }
        self.check_next(&Token::Assign)?;
        let nexps = self.explist()?;
        let mut remaining = nvars;
        if nexps != nvars {
            self.adjust_assign(nvars, nexps);
        } else {
            let fs = self.fs_mut();
            let mut e = fs.pop();
            fs.set_one_ret(&mut e);
            let v = fs.pop();
            fs.store_var(&v, &mut e);
            remaining -= 1;
        }
        // The remaining values sit in consecutive registers; store from the top.
        let fs = self.fs_mut();
        for _ in 0..remaining {
            let v = fs.pop();
            let mut e = Operand::new(OperandKind::Register(fs.free_reg - 1));
            fs.store_var(&v, &mut e);
        }
        Ok(())
    }

    /// Adjust the values of an expression list (last one on the stack) to
    /// `nvars` registers.
    fn adjust_assign(&mut self, nvars: u32, nexps: u32) {
        let fs = self.fs_mut();
        let mut e = fs.pop();
        let mut extra = nvars as i32 - nexps as i32;
        if e.has_multret() {
            // the call itself provides the difference
            extra = (extra + 1).max(0);
            fs.set_returns(&mut e, extra);
            if extra > 1 {
                fs.reserve_regs(extra as u32 - 1);
            }
        } else {
            if e.kind != OperandKind::Void {
                fs.exp2nextreg(&mut e);
            }
            if extra > 0 {
                let reg = fs.free_reg;
                fs.reserve_regs(extra as u32);
                fs.nil(reg, extra as u32);
            }
        }
        if nexps > nvars {
            fs.free_reg -= nexps - nvars;
        }
    }

    // ---- Expressions ----

    /// Parse a comma-separated list; earlier values go to consecutive
    /// registers and the last one stays on the stack.
    fn explist(&mut self) -> Result<u32, CompileError> {
        self.expr()?;
        let mut n = 1;
        while self.test_next(&Token::Comma)? {
            self.fs_mut().consume(FuncState::exp2nextreg);
            self.expr()?;
            n += 1;
        }
        Ok(n)
    }

    fn expr(&mut self) -> Result<(), CompileError> {
        self.subexpr(0).map(|_| ())
    }

    /// `subexpr -> (simpleexp | unop subexpr) { binop subexpr }` where each
    /// binop binds tighter than `limit`. Returns the first unconsumed operator.
    fn subexpr(&mut self, limit: u8) -> Result<Option<BinOp>, CompileError> {
        self.enter_level()?;
        if let Some(uop) = unary_op(&self.token) {
            let line = self.token_line;
            self.next()?;
            self.subexpr(UNARY_PRIORITY)?;
            self.fs_mut().prefix(uop, line);
        } else {
            self.simple_exp()?;
        }
        let mut op = binary_op(&self.token);
        while let Some(o) = op {
            let (left, right) = o.priority();
            if left <= limit {
                break;
            }
            let line = self.token_line;
            self.next()?;
            self.fs_mut().infix(o);
            let next_op = self.subexpr(right)?;
            self.fs_mut().posfix(o, line);
            op = next_op;
        }
        self.leave_level();
        Ok(op)
    }

    fn simple_exp(&mut self) -> Result<(), CompileError> {
        match self.token.clone() {
            Token::Number(n) => self.fs_mut().push(OperandKind::Number(n)),
            Token::String(s) => {
                let fs = self.fs_mut();
                let k = fs.string_k(s);
                fs.push(OperandKind::Constant(k));
            }
            Token::Nil => self.fs_mut().push(OperandKind::Nil),
            Token::True => self.fs_mut().push(OperandKind::True),
            Token::False => self.fs_mut().push(OperandKind::False),
            Token::DotDotDot => {
                if !self.fs().proto.is_vararg {
                    return Err(self.syntax_error("cannot use '...' outside a vararg function"));
                }
                let fs = self.fs_mut();
                let pc = fs.code_abc(OpCode::VarArg, 0, 1, 0);
                fs.push(OperandKind::Vararg(pc));
            }
            Token::LBrace => return self.constructor(),
            Token::Function => {
                self.next()?;
                let line = self.token_line;
                return self.body(false, line);
            }
            _ => return self.suffixed_exp(),
        }
        self.next()
    }

    fn primary_exp(&mut self) -> Result<(), CompileError> {
        match self.token {
            Token::LParen => {
                let line = self.token_line;
                self.next()?;
                self.expr()?;
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                // parentheses truncate to one value
                self.fs_mut().apply(FuncState::discharge_vars);
                Ok(())
            }
            Token::Name(_) => self.single_var(),
            _ => Err(self.syntax_error("unexpected symbol")),
        }
    }

    fn suffixed_exp(&mut self) -> Result<(), CompileError> {
        let line = self.token_line;
        self.primary_exp()?;
        loop {
            match self.token {
                Token::Dot => self.field_sel()?,
                Token::LBracket => {
                    self.fs_mut().apply(FuncState::exp2anyregup);
                    self.yindex()?;
                    let fs = self.fs_mut();
                    let mut key = fs.pop();
                    let mut v = fs.pop();
                    fs.indexed(&mut v, &mut key);
                    fs.push(v);
                }
                Token::Colon => {
                    self.next()?;
                    let name = self.str_check_name()?;
                    let fs = self.fs_mut();
                    let mut key = Operand::new(OperandKind::Constant(fs.string_k(name)));
                    let mut v = fs.pop();
                    fs.self_op(&mut v, &mut key);
                    fs.push(v);
                    self.func_args(line)?;
                }
                Token::LParen | Token::String(_) | Token::LBrace => {
                    self.fs_mut().apply(FuncState::exp2nextreg);
                    self.func_args(line)?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn field_sel(&mut self) -> Result<(), CompileError> {
        self.fs_mut().apply(FuncState::exp2anyregup);
        self.next()?;
        let name = self.str_check_name()?;
        let fs = self.fs_mut();
        let mut key = Operand::new(OperandKind::Constant(fs.string_k(name)));
        let mut v = fs.pop();
        fs.indexed(&mut v, &mut key);
        fs.push(v);
        Ok(())
    }

    /// `'[' expr ']'`; pushes the key.
    fn yindex(&mut self) -> Result<(), CompileError> {
        self.next()?;
        self.expr()?;
        self.fs_mut().apply(FuncState::exp2val);
        self.check_next(&Token::RBracket)
    }

    /// Arguments of a call; the function is on top of the stack.
    fn func_args(&mut self, line: u32) -> Result<(), CompileError> {
        match self.token.clone() {
            Token::LParen => {
                self.next()?;
                if self.token == Token::RParen {
                    self.fs_mut().push(OperandKind::Void);
                } else {
                    self.explist()?;
                    self.fs_mut().apply(FuncState::set_multret);
                }
                self.check_match(&Token::RParen, &Token::LParen, line)?;
            }
            Token::LBrace => self.constructor()?,
            Token::String(s) => {
                let fs = self.fs_mut();
                let k = fs.string_k(s);
                fs.push(OperandKind::Constant(k));
                self.next()?;
            }
            _ => return Err(self.syntax_error("function arguments expected")),
        }
        let fs = self.fs_mut();
        let mut args = fs.pop();
        let f = fs.pop();
        let base = f.reg().expect("called function must be in a register");
        let nparams = if args.has_multret() {
            -1
        } else {
            if args.kind != OperandKind::Void {
                fs.exp2nextreg(&mut args);
            }
            (fs.free_reg - (base + 1)) as i32
        };
        let pc = fs.code_abc(OpCode::Call, base, (nparams + 1) as u32, 2);
        fs.fix_line(line);
        // the call removes the function and arguments, leaving one result
        fs.free_reg = base + 1;
        fs.push(OperandKind::Call(pc));
        Ok(())
    }

    // ---- Table constructors ----

    fn constructor(&mut self) -> Result<(), CompileError> {
        let line = self.token_line;
        let fs = self.fs_mut();
        let pc = fs.code_abc(OpCode::NewTable, 0, 0, 0);
        let mut t = Operand::new(OperandKind::Relocatable(pc));
        fs.exp2nextreg(&mut t);
        let reg = t.reg().expect("table lands in a register");
        fs.push(OperandKind::NewTable { pc, reg });
        let mut cc = ConsControl {
            reg,
            na: 0,
            nh: 0,
            tostore: 0,
            pending: false,
        };
        self.check_next(&Token::LBrace)?;
        loop {
            if self.token == Token::RBrace {
                break;
            }
            self.close_list_field(&mut cc);
            self.field(&mut cc)?;
            if !(self.test_next(&Token::Comma)? || self.test_next(&Token::Semi)?) {
                break;
            }
        }
        self.check_match(&Token::RBrace, &Token::LBrace, line)?;
        self.last_list_field(&mut cc);
        let fs = self.fs_mut();
        let marker = fs.pop();
        debug_assert!(matches!(marker.kind, OperandKind::NewTable { .. }));
        fs.set_table_size(pc, cc.na, cc.nh);
        fs.push(OperandKind::Register(reg));
        Ok(())
    }

    fn field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        match self.token {
            Token::Name(_) => {
                let is_record = matches!(self.lexer.peek_token(), Ok(t) if t.token == Token::Assign);
                if is_record {
                    self.rec_field(cc)
                } else {
                    self.list_field(cc)
                }
            }
            Token::LBracket => self.rec_field(cc),
            _ => self.list_field(cc),
        }
    }

    fn rec_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        let reg = self.fs().free_reg;
        if let Token::Name(_) = self.token {
            let name = self.str_check_name()?;
            let fs = self.fs_mut();
            let k = fs.string_k(name);
            fs.push(OperandKind::Constant(k));
        } else {
            self.yindex()?;
        }
        cc.nh += 1;
        self.check_next(&Token::Assign)?;
        let rk_key = self.fs_mut().apply(FuncState::exp2rk);
        self.expr()?;
        let fs = self.fs_mut();
        let mut val = fs.pop();
        let _key = fs.pop();
        let rk_val = fs.exp2rk(&mut val);
        fs.code_abc(OpCode::SetTable, cc.reg, rk_key, rk_val);
        fs.free_reg = reg;
        Ok(())
    }

    fn list_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        self.expr()?;
        cc.na += 1;
        cc.tostore += 1;
        cc.pending = true;
        Ok(())
    }

    /// Move the pending list item to its register; flush a full batch.
    fn close_list_field(&mut self, cc: &mut ConsControl) {
        if !cc.pending {
            return;
        }
        let fs = self.fs_mut();
        fs.consume(FuncState::exp2nextreg);
        cc.pending = false;
        if cc.tostore == LFIELDS_PER_FLUSH {
            fs.set_list(cc.reg, cc.na, cc.tostore as i32);
            cc.tostore = 0;
        }
    }

    fn last_list_field(&mut self, cc: &mut ConsControl) {
        if cc.tostore == 0 {
            return;
        }
        let fs = self.fs_mut();
        if cc.pending {
            let mut v = fs.pop();
            cc.pending = false;
            if v.has_multret() {
                fs.set_multret(&mut v);
                fs.set_list(cc.reg, cc.na, -1);
                // the open item's count is unknown
                cc.na -= 1;
                return;
            }
            fs.exp2nextreg(&mut v);
        }
        fs.set_list(cc.reg, cc.na, cc.tostore as i32);
    }
}

/// Compile source text into the prototype of its main function.
///
/// `chunkname` follows the usual conventions: `=name` is shown verbatim,
/// `@file` names a file, anything else is treated as the source itself.
pub fn compile(source: &[u8], chunkname: &str) -> Result<Rc<Proto>, CompileError> {
    let mut compiler = Compiler::new(source, chunkname);
    compiler.load_token()?;
    compiler.main_func()
}
