//! Text of every analyzer diagnostic.

use crate::ast::{AttribQualifier, ExprId, ExpressionKind, Node, Variable, VariableDefinitions};
use crate::common::KslType;
use crate::error::{Diagnostic, Phase, Severity};
use crate::tokenizer::Token;

use super::Analyzer;

pub(super) fn parse_error(t: &Token) -> Diagnostic {
    Diagnostic::error(
        Phase::Analyzer,
        t.line,
        t.column,
        format!("parse error at: {}:{}; maybe compiler error?", t.line, t.column),
    )
}

fn error_at(t: &Token, message: String) -> Diagnostic {
    Diagnostic::error(Phase::Analyzer, t.line, t.column, message)
}

impl<'a> Analyzer<'a> {
    fn error_at_node(&mut self, node: &Node, message: String) {
        self.push_diagnostic(Diagnostic::error(
            Phase::Analyzer,
            node.line,
            node.column,
            message,
        ));
    }

    fn report_at_expression(&mut self, id: ExprId, severity: Severity, message: String) {
        let e = self.ast.expr(id);
        let d = Diagnostic {
            phase: Phase::Analyzer,
            severity,
            line: e.line,
            column: e.column,
            message,
        };
        self.push_diagnostic(d);
    }

    fn expr_type_name(&self, id: ExprId) -> String {
        self.ast.type_name(&self.ast.expr(id).ty)
    }

    /// ` <t0>, <t1> ` as printed in call and constructor diagnostics.
    fn argument_list(&self, args: &[ExprId]) -> String {
        let mut s = String::new();
        for (i, a) in args.iter().enumerate() {
            s.push_str(&format!(" <{}>", self.expr_type_name(*a)));
            s.push_str(if i + 1 < args.len() { "," } else { " " });
        }
        s
    }

    fn position(&self, id: ExprId) -> (u32, u32) {
        let e = self.ast.expr(id);
        (e.line, e.column)
    }

    // Parser

    pub(super) fn report_unexpected_token(&mut self) {
        let t = self.tn();
        self.push_diagnostic(error_at(
            t,
            format!("Unexpected token at: {}:{}", t.line, t.column),
        ));
    }

    pub(super) fn report_unknown_type(&mut self, t: &Token) {
        self.push_diagnostic(error_at(
            t,
            format!("unknown type ({}) at {}:{}", t.str_value, t.line, t.column),
        ));
    }

    pub(super) fn report_const_must_be_initialized(&mut self, t: &Token) {
        self.push_diagnostic(error_at(
            t,
            format!(
                "const variable must be initialized at ({}) at {}:{}",
                t.str_value, t.line, t.column
            ),
        ));
    }

    pub(super) fn report_undeclared_identifier(&mut self, t: &Token) {
        self.push_diagnostic(error_at(
            t,
            format!(
                "undeclared identifier \"{}\" at {}:{}",
                t.str_value, t.line, t.column
            ),
        ));
    }

    pub(super) fn report_image_access_missing(&mut self, t: &Token) {
        self.push_diagnostic(error_at(
            t,
            format!(
                "image access type must be specified at ({}) at {}:{}",
                t.str_value, t.line, t.column
            ),
        ));
    }

    pub(super) fn report_global_variables_not_allowed(&mut self, t: &Token) {
        self.push_diagnostic(error_at(
            t,
            format!("only const global variables allowed! {}:{}", t.line, t.column),
        ));
    }

    pub(super) fn report_only_one_variable_allowed(&mut self, t: &Token) {
        self.push_diagnostic(error_at(
            t,
            format!(
                "only one interface variable allowed per variable definition! {}:{}",
                t.line, t.column
            ),
        ));
    }

    pub(super) fn report_unsized_array_must_be_initialized(&mut self, t: &Token) {
        self.push_diagnostic(error_at(
            t,
            format!(
                "unsized array must be initialized at ({}) at {}:{}",
                t.str_value, t.line, t.column
            ),
        ));
    }

    pub(super) fn report_variable_redefinition(&mut self) {
        let t = self.t();
        self.push_diagnostic(error_at(
            t,
            format!(
                "variable redefinition \"{}\" at {}:{}",
                t.str_value, t.line, t.column
            ),
        ));
    }

    // Definitions

    pub(super) fn report_unable_to_eval_array_size(&mut self, line: u32, column: u32, v: &Variable) {
        let message = format!(
            "unable to eval array size: {} defined at {}:{})",
            v.orig_name, line, column
        );
        self.push_diagnostic(Diagnostic::error(Phase::Analyzer, line, column, message));
    }

    pub(super) fn report_implicitly_sized_ubo(&mut self, node: &Node) {
        let message = format!(
            "implicitly sized array in ubo not allowed {}:{}",
            node.line, node.column
        );
        self.error_at_node(node, message);
    }

    pub(super) fn report_unsupported_uniform_type(&mut self, node: &Node) {
        let message = format!(
            "unsupported uniform type (only 1, 2, 4, 16 component allowed) {}:{}",
            node.line, node.column
        );
        self.error_at_node(node, message);
    }

    pub(super) fn report_unsupported_uniform_array_type(&mut self, node: &Node) {
        let message = format!(
            "unsupported uniform array type (only 4 component allowed) {}:{}",
            node.line, node.column
        );
        self.error_at_node(node, message);
    }

    pub(super) fn report_unsupported_attrib_type(&mut self, node: &Node) {
        let message = format!("unsupported attrib type {}:{}", node.line, node.column);
        self.error_at_node(node, message);
    }

    pub(super) fn report_invalid_attribute_qualifier(&mut self, node: &Node, q: AttribQualifier) {
        let message = format!(
            "Invalid attribute qualifier: \"{}\" at {}:{}",
            q.ksl_name(),
            node.line,
            node.column
        );
        self.error_at_node(node, message);
    }

    pub(super) fn report_readwrite_ssbo_in_fragment(&mut self, node: &Node) {
        let message = format!(
            "Readwrite ssbo in fragment shader not allowed. at {}:{}",
            node.line, node.column
        );
        self.error_at_node(node, message);
    }

    pub(super) fn report_init_type_mismatch(
        &mut self,
        node: &Node,
        vd: &VariableDefinitions,
        init: &KslType,
    ) {
        let message = format!(
            "Init expression type mismatch: \"{}\" expected: \"{}\" at {}:{}",
            self.ast.type_name(init),
            self.ast.type_name(&vd.ty),
            node.line,
            node.column
        );
        self.error_at_node(node, message);
    }

    pub(super) fn report_init_precision_mismatch(
        &mut self,
        node: &Node,
        vd: &VariableDefinitions,
        init: &KslType,
    ) {
        let message = format!(
            "Init expression precision mismatch: \"{}\" expected: \"{}\" at {}:{}",
            self.ast.type_name(init),
            self.ast.type_name(&vd.ty),
            node.line,
            node.column
        );
        self.push_diagnostic(Diagnostic {
            phase: Phase::Analyzer,
            severity: self.config.precision_mismatch_severity,
            line: node.line,
            column: node.column,
            message,
        });
    }

    pub(super) fn report_return_type_mismatch(
        &mut self,
        node: &Node,
        func: &KslType,
        exp: &KslType,
    ) {
        let message = format!(
            "return statement type mismatch: \"{}\" expected: \"{}\" at {}:{}",
            self.ast.type_name(exp),
            self.ast.type_name(func),
            node.line,
            node.column
        );
        self.error_at_node(node, message);
    }

    pub(super) fn report_return_precision_mismatch(
        &mut self,
        node: &Node,
        func: &KslType,
        exp: &KslType,
    ) {
        let message = format!(
            "return statement precision mismatch: \"{}\" expected: \"{}\" at {}:{}",
            self.ast.type_name(exp),
            self.ast.type_name(func),
            node.line,
            node.column
        );
        self.push_diagnostic(Diagnostic {
            phase: Phase::Analyzer,
            severity: self.config.precision_mismatch_severity,
            line: node.line,
            column: node.column,
            message,
        });
    }

    pub(super) fn report_too_many_uniforms(&mut self, bytes: u64) {
        let message = format!(
            "Too many uniforms in stage: {} bytes. ({} bytes allowed).",
            bytes, self.config.uniform_budget_bytes
        );
        self.push_diagnostic(Diagnostic::error(Phase::Analyzer, 0, 0, message));
    }

    pub(super) fn report_unused_variable(
        &mut self,
        line: u32,
        column: u32,
        declared: &KslType,
        v: &Variable,
    ) {
        let message = format!(
            "unused variable: \"{}{} {}\" at {}:{}",
            v.storage.ksl_str(),
            self.ast.type_name(declared),
            v.orig_name,
            line,
            column
        );
        self.push_diagnostic(Diagnostic::warning(Phase::Analyzer, line, column, message));
    }

    // Expressions

    pub(super) fn report_function_not_found(&mut self, id: ExprId) {
        let (name, args) = match &self.ast.expr(id).kind {
            ExpressionKind::FunctionCall { name, args, .. } => (name.clone(), args.clone()),
            _ => return,
        };
        let (line, column) = self.position(id);
        let message = format!(
            "function overload not found: {}({}) at ({}:{})",
            name,
            self.argument_list(&args),
            line,
            column
        );
        self.report_at_expression(id, Severity::Error, message);
    }

    pub(super) fn report_function_precision_mismatch(&mut self, id: ExprId) {
        let (name, args) = match &self.ast.expr(id).kind {
            ExpressionKind::FunctionCall { name, args, .. } => (name.clone(), args.clone()),
            _ => return,
        };
        let (line, column) = self.position(id);
        let message = format!(
            "function overload precision mismatch (result precision undefined): {}({}) at ({}:{})",
            name,
            self.argument_list(&args),
            line,
            column
        );
        let severity = self.config.precision_mismatch_severity;
        self.report_at_expression(id, severity, message);
    }

    fn constructor_signature(&self, id: ExprId) -> String {
        match &self.ast.expr(id).kind {
            ExpressionKind::Constructor { ty, args } => {
                format!("{}({})", self.ast.type_name(ty), self.argument_list(args))
            }
            _ => String::new(),
        }
    }

    pub(super) fn report_invalid_constructor(&mut self, id: ExprId) {
        let (line, column) = self.position(id);
        let message = format!(
            "invalid constructor parameters for: {} at ({}:{})",
            self.constructor_signature(id),
            line,
            column
        );
        self.report_at_expression(id, Severity::Error, message);
    }

    pub(super) fn report_constructor_precision_mismatch(&mut self, id: ExprId) {
        let (line, column) = self.position(id);
        let message = format!(
            "constructor parameters precision mismatch for: {} at ({}:{})",
            self.constructor_signature(id),
            line,
            column
        );
        let severity = self.config.precision_mismatch_severity;
        self.report_at_expression(id, severity, message);
    }

    fn binary_operands(&self, id: ExprId) -> Option<(&'static str, String, String)> {
        match &self.ast.expr(id).kind {
            ExpressionKind::Binary { op, lhs, rhs } => Some((
                op.as_str(),
                self.expr_type_name(*lhs),
                self.expr_type_name(*rhs),
            )),
            _ => None,
        }
    }

    pub(super) fn report_binary_type_mismatch(&mut self, id: ExprId) {
        if let Some((op, a, b)) = self.binary_operands(id) {
            let (line, column) = self.position(id);
            let message = format!(
                "type mismatch for operation: \"{}\" <{}>, <{}> at ({}:{})",
                op, a, b, line, column
            );
            self.report_at_expression(id, Severity::Error, message);
        }
    }

    pub(super) fn report_binary_precision_mismatch(&mut self, id: ExprId) {
        if let Some((op, a, b)) = self.binary_operands(id) {
            let (line, column) = self.position(id);
            let message = format!(
                "type precision mismatch for operation (result precision undefined): \"{}\" <{}>, <{}> at ({}:{})",
                op, a, b, line, column
            );
            let severity = self.config.precision_mismatch_severity;
            self.report_at_expression(id, severity, message);
        }
    }

    pub(super) fn report_integer_division(&mut self, id: ExprId) {
        if let Some((_, a, b)) = self.binary_operands(id) {
            let (line, column) = self.position(id);
            let message = format!(
                "integer divides may be slower on some platform, try using uints if possible <{}>, <{}> at ({}:{})",
                a, b, line, column
            );
            self.report_at_expression(id, Severity::Warning, message);
        }
    }

    pub(super) fn report_not_lvalue(&mut self, id: ExprId) {
        let (line, column) = self.position(id);
        let message = format!(
            "assign operation left operand is not l-value at ({}:{})",
            line, column
        );
        self.report_at_expression(id, Severity::Error, message);
    }

    pub(super) fn report_invalid_selector(&mut self, id: ExprId, base: ExprId, selector: &str) {
        let (line, column) = self.position(id);
        let message = format!(
            "invalid selector: \"{}\" for type <{}> at ({}:{})",
            selector,
            self.expr_type_name(base),
            line,
            column
        );
        self.report_at_expression(id, Severity::Error, message);
    }

    pub(super) fn report_invalid_array_access(&mut self, id: ExprId, index: ExprId) {
        let (line, column) = self.position(id);
        let message = format!(
            "invalid array access: <{}> at ({}:{})",
            self.expr_type_name(index),
            line,
            column
        );
        self.report_at_expression(id, Severity::Error, message);
    }

    pub(super) fn report_dynamic_access(&mut self, id: ExprId, base: ExprId) {
        let (line, column) = self.position(id);
        let message = format!(
            "invalid dynamic access for type: <{}> at ({}:{})",
            self.expr_type_name(base),
            line,
            column
        );
        self.report_at_expression(id, Severity::Error, message);
    }

    fn ternary_types(&self, condition: ExprId, if_true: ExprId, if_false: ExprId) -> String {
        format!(
            "<{}> ? <{}> : <{}>",
            self.expr_type_name(condition),
            self.expr_type_name(if_true),
            self.expr_type_name(if_false)
        )
    }

    pub(super) fn report_ternary_condition_not_bool(
        &mut self,
        id: ExprId,
        operands: (ExprId, ExprId, ExprId),
    ) {
        let (line, column) = self.position(id);
        let message = format!(
            "Ternary operation conditional is not bool: {} at ({}:{})",
            self.ternary_types(operands.0, operands.1, operands.2),
            line,
            column
        );
        self.report_at_expression(id, Severity::Error, message);
    }

    pub(super) fn report_ternary_branch_mismatch(
        &mut self,
        id: ExprId,
        operands: (ExprId, ExprId, ExprId),
    ) {
        let (line, column) = self.position(id);
        let message = format!(
            "Ternary operation branch type mismatch: {} at ({}:{})",
            self.ternary_types(operands.0, operands.1, operands.2),
            line,
            column
        );
        self.report_at_expression(id, Severity::Error, message);
    }
}
