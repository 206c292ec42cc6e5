//! KSL spelling of every node. These are the defaults behind [Dialect]'s hooks, and
//! [KslDialect] uses them unchanged to print the debug dump of an analyzed program.

use std::fmt::Write;

use crate::ast::{
    Attributes, BinaryOp, ExprId, ForLoop, FunctionDefinition, ImageDefinition, Literal,
    LiteralValue, Node, NodeKind, ParamAccess, VarId, VariableDefinitions, UNRESOLVED,
};
use crate::common::{KslType, Precision, TypeId};
use crate::error::GenerateError;

use super::{Dialect, GenResult, Generator};

#[derive(Debug, Default, Clone, Copy)]
pub struct KslDialect;

impl Dialect for KslDialect {}

impl<'a, D: Dialect> Generator<'a, D> {
    pub fn ksl_global_node(&mut self, node: &Node) -> GenResult {
        match &node.kind {
            NodeKind::VariableDefinitions(vd) => {
                self.visiting_global_definition = true;
                let r = D::variable_definitions(self, node.line, vd);
                self.visiting_global_definition = false;
                r
            }
            NodeKind::Function(f) => D::function(self, node.line, f),
            NodeKind::ImageDefinition(img) => D::image_definition(self, node.line, img),
            NodeKind::NumThreads(size) => D::num_threads(self, node.line, *size),
            NodeKind::StructDefinition(sd) => D::struct_definition(self, node.line, sd),
            NodeKind::InterfaceBlock(b) => D::interface_block(self, node.line, b),
            other => Err(GenerateError::UnexpectedNode(other.name())),
        }
    }

    pub fn ksl_variable_definitions(&mut self, line: u32, vd: &VariableDefinitions) -> GenResult {
        self.sync_line(line);
        let storage = D::storage_qualifier(self, vd.storage);
        let ty = self.type_name(&vd.ty);
        write!(self, "{}{} ", storage, ty)?;
        self.ksl_declarators(vd)?;
        self.ksl_attributes(&vd.attributes)?;
        write!(self, ";")?;
        Ok(())
    }

    /// Names of a definition with their array sizes and initializers.
    pub fn ksl_declarators(&mut self, vd: &VariableDefinitions) -> GenResult {
        let ast = self.ast;
        for (i, dv) in vd.variables.iter().enumerate() {
            let v = ast.var(dv.id);
            write!(self, "{}", v.new_name)?;
            if v.ty.is_array() {
                write!(self, "[")?;
                if let Some(size) = dv.size {
                    self.expression(size)?;
                }
                write!(self, "]")?;
            }
            if !dv.init.is_empty() {
                write!(self, " = ")?;
                if v.ty.is_array() {
                    write!(self, "{{")?;
                    self.arguments(&dv.init, ", ")?;
                    write!(self, "}}")?;
                } else {
                    self.expression(dv.init[0])?;
                }
            }
            if i + 1 < vd.variables.len() {
                write!(self, ", ")?;
            }
        }
        Ok(())
    }

    /// ` { flag, value(n) } `, nothing for an empty set.
    pub fn ksl_attributes(&mut self, attributes: &Attributes) -> GenResult {
        if attributes.is_empty() {
            return Ok(());
        }
        let items: Vec<String> = attributes
            .flags
            .iter()
            .map(|q| q.ksl_name().to_string())
            .chain(
                attributes
                    .values
                    .iter()
                    .map(|(q, v)| format!("{}({})", q.ksl_name(), v)),
            )
            .collect();
        write!(self, " {{ {} }} ", items.join(", "))?;
        Ok(())
    }

    pub fn ksl_literal(&mut self, id: ExprId, lit: &Literal, force_highp: bool) -> GenResult {
        let ast = self.ast;
        let e = ast.expr(id);
        let from_text = self.print_literals_from_string && !lit.text.is_empty();
        match &lit.value {
            LiteralValue::Float(v) => {
                let is_highp = force_highp || e.ty.precision == Precision::High || ast.force_highp;
                if from_text {
                    let text = if is_highp {
                        lit.text.strip_suffix('h').unwrap_or(&lit.text)
                    } else {
                        lit.text.as_str()
                    };
                    write!(self, "{}", text)?;
                } else {
                    write!(self, "{:?}", v)?;
                    if !is_highp {
                        write!(self, "h")?;
                    }
                }
            }
            LiteralValue::Int(v) => {
                if from_text {
                    write!(self, "{}", lit.text)?;
                } else if e.ty.id == TypeId::UInt {
                    write!(self, "{}u", v)?;
                } else {
                    write!(self, "{}", v)?;
                }
            }
            LiteralValue::Bool(b) => write!(self, "{}", b)?,
        }
        Ok(())
    }

    pub fn ksl_variable(&mut self, id: VarId) -> GenResult {
        if id == UNRESOLVED {
            return Err(GenerateError::Internal("unresolved variable".to_string()));
        }
        let ast = self.ast;
        write!(self, "{}", ast.var(id).new_name)?;
        Ok(())
    }

    pub fn ksl_constructor(&mut self, ty: &KslType, args: &[ExprId]) -> GenResult {
        let name = self.type_name(ty);
        write!(self, "{}(", name)?;
        self.arguments(args, ",")?;
        write!(self, ")")?;
        Ok(())
    }

    pub fn ksl_array_access(&mut self, base: ExprId, index: ExprId) -> GenResult {
        self.operand(base)?;
        write!(self, "[")?;
        self.expression(index)?;
        write!(self, "]")?;
        Ok(())
    }

    pub fn ksl_binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> GenResult {
        self.operand(lhs)?;
        write!(self, "{}", op.as_str())?;
        self.operand(rhs)
    }

    pub fn ksl_function_call(&mut self, name: &str, args: &[ExprId]) -> GenResult {
        write!(self, "{}(", name)?;
        self.arguments(args, ",")?;
        write!(self, ")")?;
        Ok(())
    }

    pub fn ksl_return(&mut self, line: u32, e: Option<ExprId>) -> GenResult {
        self.sync_line(line);
        write!(self, "return ")?;
        if let Some(e) = e {
            self.expression(e)?;
        }
        write!(self, ";")?;
        Ok(())
    }

    pub fn ksl_for(&mut self, line: u32, f: &ForLoop) -> GenResult {
        self.sync_line(line);
        write!(self, "for (")?;
        match &f.init {
            Some(init) if matches!(init.kind, NodeKind::VariableDefinitions(_) | NodeKind::Expression(_)) => {
                self.statement(init)?
            }
            _ => write!(self, ";")?,
        }
        write!(self, " ")?;
        if let Some(c) = f.condition {
            self.expression(c)?;
        }
        write!(self, "; ")?;
        if let Some(s) = f.step {
            self.expression(s)?;
        }
        write!(self, ")")?;
        self.new_line();
        self.statement(&f.body)
    }

    /// `T name` pairs of a function's own parameters, with `out`/`inout` prefixes.
    pub fn ksl_parameters(&mut self, f: &FunctionDefinition) -> GenResult {
        let ast = self.ast;
        let function = &ast.functions[f.id as usize];
        for (i, p) in f.params.iter().enumerate() {
            match function.param_access.get(i) {
                Some(ParamAccess::Out) => write!(self, "out ")?,
                Some(ParamAccess::InOut) => write!(self, "inout ")?,
                _ => {}
            }
            let v = ast.var(p.id);
            if v.ty.is_array() {
                let base = self.type_name(v.ty.base_type());
                write!(self, "{} {}[", base, v.new_name)?;
                if let Some(size) = p.size {
                    self.expression(size)?;
                }
                write!(self, "]")?;
            } else {
                let ty = self.type_name(&v.ty);
                write!(self, "{} {}", ty, v.new_name)?;
            }
            if i + 1 < f.params.len() {
                write!(self, ", ")?;
            }
        }
        Ok(())
    }

    pub fn ksl_function(&mut self, line: u32, f: &FunctionDefinition) -> GenResult {
        self.sync_line(line);
        let ast = self.ast;
        let function = &ast.functions[f.id as usize];
        let ret = self.type_name(&function.return_type);
        write!(self, "{} {}(", ret, function.name)?;
        self.ksl_parameters(f)?;
        write!(self, ")")?;
        self.new_line();
        self.block(0, &f.body)
    }

    pub fn ksl_image_definition(&mut self, line: u32, img: &ImageDefinition) -> GenResult {
        self.sync_line(line);
        let ast = self.ast;
        let v = ast.var(img.id);
        let ty = self.type_name(&v.ty);
        write!(self, "{} {}", ty, v.new_name)?;
        self.ksl_attributes(&img.attributes)?;
        write!(self, ";")?;
        Ok(())
    }

    pub fn ksl_num_threads(&mut self, line: u32, [x, y, z]: [u32; 3]) -> GenResult {
        self.sync_line(line);
        write!(self, "numthreads({}, {}, {});", x, y, z)?;
        self.new_line();
        Ok(())
    }

    pub fn ksl_struct_definition(&mut self, line: u32, name: &str, members: &[Node]) -> GenResult {
        self.sync_line(line);
        write!(self, "struct {}", name)?;
        self.new_line();
        write!(self, "{{")?;
        self.indent += 1;
        for m in members {
            self.new_line();
            self.statement(m)?;
        }
        self.indent -= 1;
        self.new_line();
        write!(self, "}};")?;
        self.new_line();
        Ok(())
    }
}
