//! Parsing and semantic analysis of a KSL token stream.
//!
//! The parser is a recursive descent over ordered alternatives. Each alternative runs inside a
//! transaction: on failure the cursor and the variable, function, expression and user type
//! tables go back to where they were, so an abandoned attempt leaves no trace in the program.
//!
//! Diagnostics raised by alternatives are kept in nested error blocks. When an alternative
//! succeeds its block is merged into the parent; when all of them fail only the block of the
//! alternative that read furthest into the token stream is kept.

use log::{debug, trace};

use crate::ast::{ProgramAst, VarId, UNRESOLVED};
use crate::common::{KslType, ShaderReflection, ShaderStage, TypeId};
use crate::error::{has_errors, Diagnostic, Severity};
use crate::tokenizer::{Keyword, Symbol, Token, TokenKind};

mod diagnostics;
mod parser;
mod reflection;
pub mod tables;
mod validation;

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Suffix local variable names with a per scope postfix.
    pub mangle_local_names: bool,
    /// Severity of precision mismatches in initializers, returns and calls.
    pub precision_mismatch_severity: Severity,
    pub uniform_budget_bytes: u64,
}
impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            mangle_local_names: true,
            precision_mismatch_severity: Severity::Warning,
            uniform_budget_bytes: 4096,
        }
    }
}

#[derive(Debug)]
struct ErrorBlock {
    serial: u64,
    /// Token position the last transaction on this block reached.
    run: usize,
    errors: Vec<Diagnostic>,
}

/// Everything a failed transaction has to restore.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    pos: usize,
    variables: usize,
    functions: usize,
    expressions: usize,
    user_types: usize,
    block: usize,
    block_serial: u64,
}

static END_OF_TOKENS: Token = Token {
    kind: TokenKind::EndOfTokens,
    line: 0,
    column: 0,
    str_value: String::new(),
    int_value: 0,
    float_value: 0.0,
};

pub struct Analyzer<'a> {
    tokens: &'a [Token],
    pos: usize,
    stage: ShaderStage,
    config: AnalyzerConfig,
    ast: ProgramAst,

    /// Variables visible from the current scope. [UNRESOLVED] marks a scope boundary.
    active_ids: Vec<VarId>,
    postfixes: Vec<String>,
    block_counter: u32,

    error_blocks: Vec<ErrorBlock>,
    block_markers: Vec<usize>,
    current_block: usize,
    next_serial: u64,

    current_function: Option<u32>,
    reflection: ShaderReflection,
}

impl<'a> Analyzer<'a> {
    pub fn new(tokens: &'a [Token], stage: ShaderStage, config: AnalyzerConfig) -> Self {
        Self {
            tokens,
            pos: 0,
            stage,
            config,
            ast: ProgramAst::new(stage),
            active_ids: vec![],
            postfixes: vec![],
            block_counter: 0,
            error_blocks: vec![ErrorBlock {
                serial: 0,
                run: 0,
                errors: vec![],
            }],
            block_markers: vec![],
            current_block: 0,
            next_serial: 1,
            current_function: None,
            reflection: ShaderReflection::default(),
        }
    }

    /// Parses, validates and reflects the program. Returns false if any error was reported.
    pub fn analyze(&mut self) -> bool {
        self.declare_builtins();

        let mut success = self.match_program() && !has_errors(self.diagnostics());
        debug!(
            "parsed {} nodes, {} variables, {} expressions",
            self.ast.root.len(),
            self.ast.variables.len(),
            self.ast.expressions.len()
        );

        if success && self.ast.force_highp {
            self.ast.promote_precisions();
        }
        if success {
            success &= self.validate_program();
        }
        if success {
            self.collect_reflection();
            self.create_reflection();
            success &= !has_errors(self.diagnostics());
        }
        if success {
            success &= self.check_uniform_budget();
        }
        if success {
            self.detect_unused_variables();
        }
        debug!("analysis finished, success: {}", success);
        success
    }

    pub fn ast(&self) -> &ProgramAst {
        &self.ast
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.error_blocks[self.current_block].errors
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn into_parts(mut self) -> (ProgramAst, Vec<Diagnostic>, ShaderReflection) {
        let diagnostics = std::mem::take(&mut self.error_blocks[self.current_block].errors);
        (self.ast, diagnostics, self.reflection)
    }

    fn declare_builtins(&mut self) {
        self.ast.functions = tables::builtin_functions(self.stage);
        for v in tables::builtin_variables(self.stage) {
            let name = v.orig_name.clone();
            let id = self.ast.push_variable(v);
            self.active_ids.push(id);

            let inbuilts = &mut self.ast.inbuilts;
            let slot = match name.as_str() {
                "gl_Position" => &mut inbuilts.vertex_position,
                "gl_VertexID" => &mut inbuilts.vertex_id,
                "gl_GlobalInvocationID" => &mut inbuilts.global_invocation_id,
                "gl_LocalInvocationIndex" => &mut inbuilts.local_invocation_index,
                "gl_LocalInvocationID" => &mut inbuilts.local_invocation_id,
                "gl_WorkGroupID" => &mut inbuilts.work_group_id,
                "gl_FragCoord" => &mut inbuilts.frag_coord,
                "gl_FrontFacing" => &mut inbuilts.front_facing,
                _ => continue,
            };
            *slot = Some(id);
        }
        trace!(
            "declared {} inbuilt functions and {} inbuilt variables",
            self.ast.functions.len(),
            self.ast.variables.len()
        );
    }

    /// Type named `name`, inbuilt or user defined.
    fn lookup_type(&self, name: &str) -> Option<KslType> {
        if let Some(t) = tables::builtin_type(name) {
            return Some(t);
        }
        self.ast
            .user_types
            .iter()
            .position(|t| t.name == name)
            .map(|i| KslType::new(TypeId::User(i as u32), crate::common::Precision::None))
    }

    // Token cursor

    /// The token under the cursor.
    fn tn(&self) -> &'a Token {
        let tokens = self.tokens;
        tokens
            .get(self.pos)
            .or_else(|| tokens.last())
            .unwrap_or(&END_OF_TOKENS)
    }

    /// The token before the cursor, or the first token at the start.
    fn t(&self) -> &'a Token {
        let tokens = self.tokens;
        tokens
            .get(self.pos.saturating_sub(1))
            .unwrap_or(&END_OF_TOKENS)
    }

    fn eat_kind(&mut self, kind: TokenKind) -> Option<&'a Token> {
        let t = self.tn();
        if t.kind != kind {
            return None;
        }
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        Some(t)
    }

    fn eat_symbol(&mut self, s: Symbol) -> bool {
        self.eat_kind(TokenKind::Symbol(s)).is_some()
    }

    fn eat_keyword(&mut self, k: Keyword) -> bool {
        self.eat_kind(TokenKind::Keyword(k)).is_some()
    }

    fn expect_symbol(&mut self, s: Symbol) -> Option<&'a Token> {
        self.eat_kind(TokenKind::Symbol(s))
    }

    fn expect_keyword(&mut self, k: Keyword) -> Option<&'a Token> {
        self.eat_kind(TokenKind::Keyword(k))
    }

    fn eat_identifier(&mut self) -> Option<&'a Token> {
        self.eat_kind(TokenKind::Identifier)
    }

    /// Consumes the first symbol of `table` found under the cursor.
    fn eat_any<T: Copy>(&mut self, table: &[(Symbol, T)]) -> Option<T> {
        for (s, v) in table {
            if self.eat_symbol(*s) {
                return Some(*v);
            }
        }
        None
    }

    // Transactions

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            variables: self.ast.variables.len(),
            functions: self.ast.functions.len(),
            expressions: self.ast.expressions.len(),
            user_types: self.ast.user_types.len(),
            block: self.current_block,
            block_serial: self.error_blocks[self.current_block].serial,
        }
    }

    fn truncate_tables(&mut self, cp: &Checkpoint) {
        self.ast.variables.truncate(cp.variables);
        self.ast.functions.truncate(cp.functions);
        self.ast.expressions.truncate(cp.expressions);
        self.ast.user_types.truncate(cp.user_types);
    }

    /// Runs `f` as one grammar attempt. When it returns `None` the cursor and the tables are
    /// restored. Either way the block that was current on entry remembers how far `f` read.
    fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        let cp = self.checkpoint();
        let result = f(self);

        if let Some(block) = self.error_blocks.get_mut(cp.block) {
            if block.serial == cp.block_serial {
                block.run = self.pos;
            }
        }
        if result.is_none() {
            self.truncate_tables(&cp);
            self.pos = cp.pos;
        }
        result
    }

    /// Opens a variable scope. Restored with [Analyzer::close_scope].
    fn open_scope(&mut self, postfix_prefix: Option<&str>) -> (usize, usize) {
        let saved = (self.active_ids.len(), self.postfixes.len());
        self.active_ids.push(UNRESOLVED);
        if self.config.mangle_local_names {
            let postfix = match postfix_prefix {
                Some(p) => {
                    self.block_counter += 1;
                    format!("{}{}", p, self.block_counter)
                }
                None => String::new(),
            };
            self.postfixes.push(postfix);
        }
        saved
    }

    fn close_scope(&mut self, saved: (usize, usize)) {
        self.active_ids.truncate(saved.0);
        self.postfixes.truncate(saved.1);
    }

    fn postfix(&self) -> &str {
        self.postfixes.last().map(String::as_str).unwrap_or("")
    }

    // Error blocks

    fn push_diagnostic(&mut self, d: Diagnostic) {
        trace!("diagnostic in block {}: {}", self.current_block, d.message);
        self.error_blocks[self.current_block].errors.push(d);
    }

    /// Starts a group of alternatives whose errors are merged into the current block.
    fn init_error_blocks(&mut self) {
        self.block_markers.push(self.current_block);
    }

    fn new_error_block(&mut self) {
        self.error_blocks.push(ErrorBlock {
            serial: self.next_serial,
            run: 0,
            errors: vec![],
        });
        self.next_serial += 1;
        self.current_block = self.error_blocks.len() - 1;
    }

    fn group_block(&self) -> usize {
        self.block_markers.last().copied().unwrap_or(0)
    }

    fn remove_local_error_blocks(&mut self) {
        let g = self.group_block();
        self.error_blocks.truncate(g + 1);
        self.block_markers.pop();
        self.current_block = g;
    }

    /// The current alternative succeeded, its errors go to the group.
    fn append_errors(&mut self) {
        let g = self.group_block();
        let current = self.current_block;
        if current != g {
            let errors = std::mem::take(&mut self.error_blocks[current].errors);
            self.error_blocks[g].errors.extend(errors);
        }
        self.error_blocks[g].run = self.error_blocks[current].run;
        self.remove_local_error_blocks();
    }

    /// Every alternative failed. Keeps the errors of the one that read the most tokens.
    fn collect_errors(&mut self) {
        let g = self.group_block();
        let last = self.error_blocks.len() - 1;

        let mut max_id = last;
        let mut max_len = 0;
        for i in (g + 1..=last).rev() {
            if max_len < self.error_blocks[i].run {
                max_id = i;
                max_len = self.error_blocks[i].run;
            }
        }

        if max_id != g && !self.error_blocks[max_id].errors.is_empty() {
            let errors = self.error_blocks[max_id].errors.clone();
            self.error_blocks[g].errors.extend(errors);
        } else {
            let t = self.tn();
            self.error_blocks[g].errors.push(diagnostics::parse_error(t));
        }
        self.error_blocks[g].run = self.error_blocks[self.current_block].run;
        self.remove_local_error_blocks();
    }

    /// Runs one alternative of a group in its own error block.
    fn alternative<T>(&mut self, f: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        self.new_error_block();
        let result = f(self);
        if result.is_some() {
            self.append_errors();
        }
        result
    }
}
