//! Prints a [ProgramAst] as shader source.
//!
//! A [Generator] owns the output text and the line/indent bookkeeping, and walks the tree.
//! What gets printed for each node is decided by a [Dialect]: every hook defaults to the KSL
//! spelling (see [ksl]), and a target language overrides only what it spells differently.

use std::collections::BTreeMap;
use std::fmt::Write;

use log::debug;

use crate::ast::{
    BinaryOp, ExprId, ExpressionKind, ForLoop, FunctionDefinition, ImageDefinition,
    InterfaceBlock, Literal, Node, NodeKind, ProgramAst, StorageQualifier, StructDefinition,
    UnaryOp, VarId, VariableDefinitions,
};
use crate::common::{ApiFamily, KslType, TargetApi};
use crate::error::GenerateError;
use crate::translator::{d3d::D3dTarget, metal::MetalTarget, GlobalUsage, Translator};

pub mod glsl;
pub mod hlsl;
pub mod ksl;
pub mod msl;

pub type GenResult = Result<(), GenerateError>;

const INDENT: &str = "   ";

/// Per target printing rules. Hooks receive the generator and print through it.
pub trait Dialect: Sized {
    /// Text printed before the program, helper functions and includes.
    fn header(_g: &mut Generator<'_, Self>) -> GenResult {
        Ok(())
    }

    fn type_name(g: &Generator<'_, Self>, ty: &KslType) -> String {
        g.ast.type_name(ty)
    }

    fn storage_qualifier(_g: &Generator<'_, Self>, storage: StorageQualifier) -> &'static str {
        storage.ksl_str()
    }

    fn global_node(g: &mut Generator<'_, Self>, node: &Node) -> GenResult {
        g.ksl_global_node(node)
    }

    fn variable_definitions(
        g: &mut Generator<'_, Self>,
        line: u32,
        vd: &VariableDefinitions,
    ) -> GenResult {
        g.ksl_variable_definitions(line, vd)
    }

    fn function(g: &mut Generator<'_, Self>, line: u32, f: &FunctionDefinition) -> GenResult {
        g.ksl_function(line, f)
    }

    fn image_definition(g: &mut Generator<'_, Self>, line: u32, img: &ImageDefinition) -> GenResult {
        g.ksl_image_definition(line, img)
    }

    fn num_threads(g: &mut Generator<'_, Self>, line: u32, size: [u32; 3]) -> GenResult {
        g.ksl_num_threads(line, size)
    }

    fn struct_definition(
        g: &mut Generator<'_, Self>,
        line: u32,
        sd: &StructDefinition,
    ) -> GenResult {
        g.ksl_struct_definition(line, &sd.name, &sd.members)
    }

    fn interface_block(_g: &mut Generator<'_, Self>, _line: u32, _b: &InterfaceBlock) -> GenResult {
        Err(GenerateError::UnexpectedNode("interface block"))
    }

    fn entry_output_definition(_g: &mut Generator<'_, Self>) -> GenResult {
        Err(GenerateError::UnexpectedNode("entry output definition"))
    }

    fn return_statement(g: &mut Generator<'_, Self>, line: u32, e: Option<ExprId>) -> GenResult {
        g.ksl_return(line, e)
    }

    fn discard(g: &mut Generator<'_, Self>, line: u32) -> GenResult {
        g.sync_line(line);
        write!(g, "discard;")?;
        Ok(())
    }

    fn for_statement(g: &mut Generator<'_, Self>, line: u32, f: &ForLoop) -> GenResult {
        g.ksl_for(line, f)
    }

    fn literal(g: &mut Generator<'_, Self>, id: ExprId, lit: &Literal) -> GenResult {
        g.ksl_literal(id, lit, false)
    }

    fn variable(g: &mut Generator<'_, Self>, id: VarId) -> GenResult {
        g.ksl_variable(id)
    }

    fn constructor(
        g: &mut Generator<'_, Self>,
        _id: ExprId,
        ty: &KslType,
        args: &[ExprId],
    ) -> GenResult {
        g.ksl_constructor(ty, args)
    }

    fn array_access(g: &mut Generator<'_, Self>, base: ExprId, index: ExprId) -> GenResult {
        g.ksl_array_access(base, index)
    }

    fn binary(g: &mut Generator<'_, Self>, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> GenResult {
        g.ksl_binary(op, lhs, rhs)
    }

    fn function_call(
        g: &mut Generator<'_, Self>,
        _id: ExprId,
        name: &str,
        args: &[ExprId],
    ) -> GenResult {
        g.ksl_function_call(name, args)
    }
}

pub struct Generator<'a, D: Dialect> {
    pub ast: &'a ProgramAst,
    pub dialect: D,
    usage: &'a BTreeMap<String, GlobalUsage>,
    out: String,
    line: u32,
    pub indent: u32,
    pub do_sync_line: bool,
    pub print_expression_parenthesis: bool,
    pub print_literals_from_string: bool,
    /// Set while printing the body of the entry point.
    pub visiting_main: bool,
    /// Set while printing a top level variable definition.
    pub visiting_global_definition: bool,
}

impl<'a, D: Dialect> Write for Generator<'a, D> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.out.push_str(s);
        Ok(())
    }
}

impl<'a, D: Dialect> Generator<'a, D> {
    pub fn new(ast: &'a ProgramAst, dialect: D, usage: &'a BTreeMap<String, GlobalUsage>) -> Self {
        Self {
            ast,
            dialect,
            usage,
            out: String::new(),
            line: 0,
            indent: 0,
            do_sync_line: true,
            print_expression_parenthesis: false,
            print_literals_from_string: true,
            visiting_main: false,
            visiting_global_definition: false,
        }
    }

    /// Prints the whole program and returns the text.
    pub fn generate(mut self) -> Result<String, GenerateError> {
        let ast = self.ast;
        D::header(&mut self)?;
        for node in &ast.root {
            D::global_node(&mut self, node)?;
            self.new_line();
        }
        Ok(self.out)
    }

    pub fn new_line(&mut self) {
        self.line += 1;
        self.out.push('\n');
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
    }

    /// Pads with empty lines until the output reaches source line `line`.
    pub fn sync_line(&mut self, line: u32) {
        if !self.do_sync_line {
            return;
        }
        while self.line + 1 < line {
            self.new_line();
        }
    }

    pub fn type_name(&self, ty: &KslType) -> String {
        D::type_name(self, ty)
    }

    /// Resources `function` touches, empty for functions without any.
    pub fn usage_of(&self, function: &str) -> GlobalUsage {
        self.usage.get(function).cloned().unwrap_or_default()
    }

    pub fn statement(&mut self, node: &Node) -> GenResult {
        match &node.kind {
            NodeKind::VariableDefinitions(vd) => D::variable_definitions(self, node.line, vd),
            NodeKind::Block(nodes) => self.block(node.line, nodes),
            NodeKind::Expression(e) => {
                self.sync_line(node.line);
                self.expression(*e)?;
                write!(self, ";")?;
                Ok(())
            }
            NodeKind::Empty => {
                self.sync_line(node.line);
                write!(self, ";")?;
                Ok(())
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.if_statement(node.line, *condition, then_branch, else_branch.as_deref()),
            NodeKind::For(f) => D::for_statement(self, node.line, f),
            NodeKind::Return(e) => D::return_statement(self, node.line, *e),
            NodeKind::Break => {
                self.sync_line(node.line);
                write!(self, "break;")?;
                Ok(())
            }
            NodeKind::Continue => {
                self.sync_line(node.line);
                write!(self, "continue;")?;
                Ok(())
            }
            NodeKind::Discard => D::discard(self, node.line),
            NodeKind::EntryOutputDefinition => D::entry_output_definition(self),
            other => Err(GenerateError::UnexpectedNode(other.name())),
        }
    }

    pub fn block(&mut self, line: u32, nodes: &[Node]) -> GenResult {
        self.sync_line(line);
        write!(self, "{{")?;
        self.indent += 1;
        for n in nodes {
            self.new_line();
            self.statement(n)?;
        }
        self.indent -= 1;
        self.new_line();
        write!(self, "}}")?;
        self.new_line();
        Ok(())
    }

    fn if_statement(
        &mut self,
        line: u32,
        condition: ExprId,
        then_branch: &Node,
        else_branch: Option<&Node>,
    ) -> GenResult {
        self.sync_line(line);
        write!(self, "if (")?;
        self.expression(condition)?;
        write!(self, ")")?;

        let then_is_block = matches!(then_branch.kind, NodeKind::Block(_));
        if !then_is_block {
            self.indent += 1;
        }
        self.new_line();
        self.statement(then_branch)?;
        if !then_is_block {
            self.indent -= 1;
            self.new_line();
        }

        if let Some(e) = else_branch {
            write!(self, "else")?;
            match e.kind {
                NodeKind::If { .. } => write!(self, " ")?,
                NodeKind::Block(_) => self.new_line(),
                _ => {
                    self.indent += 1;
                    self.new_line();
                }
            }
            self.statement(e)?;
            match e.kind {
                NodeKind::If { .. } | NodeKind::Block(_) => self.new_line(),
                _ => self.indent -= 1,
            }
        }
        Ok(())
    }

    pub fn expression(&mut self, id: ExprId) -> GenResult {
        let ast = self.ast;
        let e = ast.expr(id);
        self.sync_line(e.line);
        match &e.kind {
            ExpressionKind::Literal(lit) => D::literal(self, id, lit),
            ExpressionKind::Variable(v) => D::variable(self, *v),
            ExpressionKind::Constructor { ty, args } => D::constructor(self, id, ty, args),
            ExpressionKind::MemberAccess { base, selector } => {
                self.operand(*base)?;
                write!(self, ".{}", selector)?;
                Ok(())
            }
            ExpressionKind::ArrayAccess { base, index } => D::array_access(self, *base, *index),
            ExpressionKind::Parenthesis(inner) => {
                write!(self, "(")?;
                self.expression(*inner)?;
                write!(self, ")")?;
                Ok(())
            }
            ExpressionKind::Unary { op, operand } => {
                write!(self, "{}", op.prefix_str())?;
                self.operand(*operand)
            }
            ExpressionKind::Suffix { op, operand } => {
                self.operand(*operand)?;
                let text = match op {
                    UnaryOp::Increment => "++ ",
                    UnaryOp::Decrement => "-- ",
                    _ => return Err(GenerateError::UnexpectedNode("suffix expression")),
                };
                write!(self, "{}", text)?;
                Ok(())
            }
            ExpressionKind::Binary { op, lhs, rhs } => D::binary(self, *op, *lhs, *rhs),
            ExpressionKind::FunctionCall { name, args, .. } => {
                D::function_call(self, id, name, args)
            }
            ExpressionKind::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                self.operand(*condition)?;
                write!(self, " ? ")?;
                self.operand(*if_true)?;
                write!(self, " : ")?;
                self.operand(*if_false)
            }
        }
    }

    /// A sub expression, parenthesized in debug mode.
    pub fn operand(&mut self, id: ExprId) -> GenResult {
        if self.print_expression_parenthesis {
            write!(self, "(")?;
        }
        self.expression(id)?;
        if self.print_expression_parenthesis {
            write!(self, ")")?;
        }
        Ok(())
    }

    /// Comma separated expressions.
    pub fn arguments(&mut self, args: &[ExprId], sep: &str) -> GenResult {
        for (i, a) in args.iter().enumerate() {
            if i > 0 {
                write!(self, "{}", sep)?;
            }
            self.expression(*a)?;
        }
        Ok(())
    }
}

/// Prints `ast` back as KSL, for debugging.
pub fn generate_ksl(ast: &ProgramAst) -> Result<String, GenerateError> {
    let usage = BTreeMap::new();
    Generator::new(ast, ksl::KslDialect, &usage).generate()
}

/// Prints a translated `ast` in the language of `translator`'s target.
pub fn generate(ast: &ProgramAst, translator: &mut Translator) -> Result<String, GenerateError> {
    let api = translator.api();
    let use_subpass = translator.use_subpass();
    debug!("generating {:?} stage for {:?}", ast.stage, api);
    match api.family() {
        ApiFamily::Gl => {
            let dialect = glsl::GlslDialect::new(api, use_subpass);
            Generator::new(ast, dialect, translator.global_usage()).generate()
        }
        ApiFamily::D3D => {
            let target = translator
                .strategy_mut::<D3dTarget>()
                .ok_or_else(|| GenerateError::Internal("not a D3D translator".to_string()))?;
            let dialect = hlsl::HlslDialect::new(target);
            Generator::new(ast, dialect, translator.global_usage()).generate()
        }
        ApiFamily::Metal => {
            let target = translator
                .strategy_mut::<MetalTarget>()
                .ok_or_else(|| GenerateError::Internal("not a Metal translator".to_string()))?;
            let framebuffer_fetch = use_subpass && api == TargetApi::MetalIOS;
            let dialect = msl::MslDialect::new(target, framebuffer_fetch);
            Generator::new(ast, dialect, translator.global_usage()).generate()
        }
    }
}
