use log::trace;

use crate::ast::{
    Access, AttribQualifier, Attributes, BinaryOp, DefinedVariable, ExprId, Expression,
    ExpressionKind, ForLoop, Function, FunctionDefinition, ImageDefinition, Literal, LiteralValue,
    Node, NodeKind, ParamAccess, Parameter, Precedence, StorageQualifier, StructDefinition,
    UnaryOp, UserType, VarId, Variable, VariableDefinitions, UNRESOLVED,
};
use crate::common::{KslType, Precision, ShaderStage, TypeId};
use crate::tokenizer::{Keyword, Symbol, Token, TokenKind};

use super::tables::BUILTIN_QUALIFIERS;
use super::Analyzer;

/// Binary operators by the precedence level they bind at.
const BINARY_OPERATORS: [(Precedence, Symbol, BinaryOp); 17] = [
    (Precedence::BinaryAdd, Symbol::Minus, BinaryOp::Sub),
    (Precedence::BinaryAdd, Symbol::Plus, BinaryOp::Add),
    (Precedence::BinaryShift, Symbol::LessLess, BinaryOp::ShiftLeft),
    (Precedence::BinaryShift, Symbol::GreatGreat, BinaryOp::ShiftRight),
    (Precedence::BinaryEqual, Symbol::EqualEqual, BinaryOp::Equal),
    (Precedence::BinaryEqual, Symbol::NotEqual, BinaryOp::NotEqual),
    (Precedence::BinaryAnd, Symbol::LazyAnd, BinaryOp::LazyAnd),
    (Precedence::BinaryOr, Symbol::LazyOr, BinaryOp::LazyOr),
    (Precedence::BinaryBitwiseAnd, Symbol::BitwiseAnd, BinaryOp::BitwiseAnd),
    (Precedence::BinaryBitwiseOr, Symbol::BitwiseOr, BinaryOp::BitwiseOr),
    (Precedence::BinaryMul, Symbol::Mul, BinaryOp::Mul),
    (Precedence::BinaryMul, Symbol::Div, BinaryOp::Div),
    (Precedence::BinaryMul, Symbol::Mod, BinaryOp::Mod),
    (Precedence::BinaryComp, Symbol::Less, BinaryOp::Less),
    (Precedence::BinaryComp, Symbol::Greater, BinaryOp::Greater),
    (Precedence::BinaryComp, Symbol::LessEqual, BinaryOp::LessEqual),
    (Precedence::BinaryComp, Symbol::GreaterEqual, BinaryOp::GreaterEqual),
];

const ASSIGN_OPERATORS: [(Symbol, BinaryOp); 7] = [
    (Symbol::Equal, BinaryOp::Assign),
    (Symbol::PlusEqual, BinaryOp::AddAssign),
    (Symbol::MinusEqual, BinaryOp::SubAssign),
    (Symbol::MulEqual, BinaryOp::MulAssign),
    (Symbol::DivEqual, BinaryOp::DivAssign),
    (Symbol::LessLessEqual, BinaryOp::ShiftLeftAssign),
    (Symbol::GreatGreatEqual, BinaryOp::ShiftRightAssign),
];

const UNARY_OPERATORS: [(Symbol, UnaryOp); 5] = [
    (Symbol::Minus, UnaryOp::Minus),
    (Symbol::Plus, UnaryOp::Plus),
    (Symbol::PlusPlus, UnaryOp::Increment),
    (Symbol::MinusMinus, UnaryOp::Decrement),
    (Symbol::ExclamationMark, UnaryOp::LogicalNot),
];

const SUFFIX_OPERATORS: [(Symbol, UnaryOp); 2] = [
    (Symbol::PlusPlus, UnaryOp::Increment),
    (Symbol::MinusMinus, UnaryOp::Decrement),
];

#[derive(Debug, Clone, Copy)]
enum ExpressionRule {
    Assign,
    Ternary,
    Binary,
    Unary,
    Suffix,
    Parenthesis,
    Literal,
    Constructor,
    FunctionCall,
    Variable,
}

/// Expression alternatives in the order they are tried, with the loosest precedence each can
/// produce. A rule is skipped when the caller asks for something tighter.
const EXPRESSION_RULES: [(ExpressionRule, Precedence); 10] = [
    (ExpressionRule::Assign, Precedence::Assign),
    (ExpressionRule::Ternary, Precedence::TernaryConditional),
    (ExpressionRule::Binary, Precedence::BinaryMul),
    (ExpressionRule::Unary, Precedence::Unary),
    (ExpressionRule::Suffix, Precedence::Suffix),
    (ExpressionRule::Parenthesis, Precedence::Parenthesis),
    (ExpressionRule::Literal, Precedence::Parenthesis),
    (ExpressionRule::Constructor, Precedence::Parenthesis),
    (ExpressionRule::FunctionCall, Precedence::Parenthesis),
    (ExpressionRule::Variable, Precedence::Parenthesis),
];

impl<'a> Analyzer<'a> {
    fn push_expression(
        &mut self,
        kind: ExpressionKind,
        precedence: Precedence,
        line: u32,
        column: u32,
    ) -> ExprId {
        self.ast
            .push_expression(Expression::new(kind, precedence, line, column))
    }

    fn expression_position(&self, id: ExprId) -> (u32, u32) {
        let e = self.ast.expr(id);
        (e.line, e.column)
    }

    // Expressions

    pub(super) fn match_expression(&mut self, min: Precedence) -> Option<ExprId> {
        self.transaction(|a| {
            a.init_error_blocks();
            for (rule, loosest) in EXPRESSION_RULES {
                if min > loosest {
                    continue;
                }
                let matched = a.alternative(|a| match rule {
                    ExpressionRule::Assign => a.match_assign(),
                    ExpressionRule::Ternary => a.match_ternary(),
                    ExpressionRule::Binary => a.match_binary(min),
                    ExpressionRule::Unary => a.match_unary(),
                    ExpressionRule::Suffix => a.match_suffix(),
                    ExpressionRule::Parenthesis => a.match_parenthesis(),
                    ExpressionRule::Literal => a.match_literal(),
                    ExpressionRule::Constructor => a.match_constructor(),
                    ExpressionRule::FunctionCall => a.match_function_call(),
                    ExpressionRule::Variable => a.match_variable(),
                });
                if matched.is_some() {
                    return matched;
                }
            }
            a.collect_errors();
            None
        })
    }

    fn match_literal(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let t = a.tn();
            let (value, ty) = match t.kind {
                TokenKind::Float => (
                    LiteralValue::Float(t.float_value),
                    KslType::new(TypeId::Float, Precision::High),
                ),
                TokenKind::Half => (
                    LiteralValue::Float(t.float_value),
                    KslType::new(TypeId::Float, Precision::Medium),
                ),
                TokenKind::SignedInteger => (
                    LiteralValue::Int(t.int_value),
                    KslType::new(TypeId::Int, Precision::High),
                ),
                TokenKind::UnsignedInteger => (
                    LiteralValue::Int(t.int_value),
                    KslType::new(TypeId::UInt, Precision::High),
                ),
                TokenKind::Keyword(Keyword::True) => (
                    LiteralValue::Bool(true),
                    KslType::new(TypeId::Bool, Precision::None),
                ),
                TokenKind::Keyword(Keyword::False) => (
                    LiteralValue::Bool(false),
                    KslType::new(TypeId::Bool, Precision::None),
                ),
                _ => return None,
            };
            a.eat_kind(t.kind);

            let text = match value {
                LiteralValue::Bool(b) => b.to_string(),
                _ => t.str_value.clone(),
            };
            let id = a.push_expression(
                ExpressionKind::Literal(Literal { value, text }),
                Precedence::Parenthesis,
                t.line,
                t.column,
            );
            let e = a.ast.expr_mut(id);
            e.ty = ty;
            e.constant_value = true;
            Some(id)
        })
    }

    fn match_variable(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let t = a.eat_identifier()?;
            let found = a
                .active_ids
                .iter()
                .rev()
                .copied()
                .filter(|id| *id != UNRESOLVED)
                .find(|id| a.ast.var(*id).orig_name == t.str_value);

            match found {
                Some(id) => a.ast.var_mut(id).used = true,
                None => a.report_undeclared_identifier(t),
            }
            Some(a.push_expression(
                ExpressionKind::Variable(found.unwrap_or(UNRESOLVED)),
                Precedence::Parenthesis,
                t.line,
                t.column,
            ))
        })
    }

    fn match_parenthesis(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let open = a.expect_symbol(Symbol::LeftParen)?;
            let inner = a.match_expression(Precedence::Lowest)?;
            a.expect_symbol(Symbol::RightParen)?;
            Some(a.push_expression(
                ExpressionKind::Parenthesis(inner),
                Precedence::Parenthesis,
                open.line,
                open.column,
            ))
        })
    }

    fn match_unary(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let op_token = a.tn();
            let op = a.eat_any(&UNARY_OPERATORS)?;
            let operand = a.match_expression(Precedence::Unary)?;
            Some(a.push_expression(
                ExpressionKind::Unary { op, operand },
                Precedence::Unary,
                op_token.line,
                op_token.column,
            ))
        })
    }

    fn match_binary_operator(&mut self, level: Precedence) -> Option<BinaryOp> {
        for (l, symbol, op) in BINARY_OPERATORS {
            if l == level && self.eat_symbol(symbol) {
                return Some(op);
            }
        }
        None
    }

    /// Left associative chain of binary operators binding at `min` or tighter.
    fn match_binary(&mut self, min: Precedence) -> Option<ExprId> {
        self.transaction(|a| {
            let mut lhs = a.match_expression(Precedence::Unary)?;
            let mut max = a.ast.expr(lhs).precedence;
            loop {
                let mut found = None;
                let mut level = min;
                while level <= max {
                    if let Some(op) = a.match_binary_operator(level) {
                        found = Some((level, op));
                        break;
                    }
                    if level == Precedence::Parenthesis {
                        break;
                    }
                    level = level.next();
                }

                let (level, op) = match found {
                    Some(f) => f,
                    None => return Some(lhs),
                };
                max = level;
                let op_token = a.t();
                let rhs = a.match_expression(level.next())?;
                lhs = a.push_expression(
                    ExpressionKind::Binary { op, lhs, rhs },
                    level,
                    op_token.line,
                    op_token.column,
                );
            }
        })
    }

    fn match_assign(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let lhs = a.match_expression(Precedence::Assign.next())?;
            if a.ast.expr(lhs).precedence < Precedence::Unary {
                return Some(lhs);
            }
            let op = match a.eat_any(&ASSIGN_OPERATORS) {
                Some(op) => op,
                None => return Some(lhs),
            };
            let rhs = a.match_expression(Precedence::Lowest)?;
            let t = a.t();
            Some(a.push_expression(
                ExpressionKind::Binary { op, lhs, rhs },
                Precedence::Assign,
                t.line,
                t.column,
            ))
        })
    }

    fn match_ternary(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let condition = a.match_expression(Precedence::TernaryConditional.next())?;
            if !a.eat_symbol(Symbol::QuestionMark) {
                return Some(condition);
            }
            let if_true = a.match_expression(Precedence::Assign)?;
            a.expect_symbol(Symbol::Colon)?;
            let if_false = a.match_expression(Precedence::Assign)?;

            let (line, column) = a.expression_position(condition);
            Some(a.push_expression(
                ExpressionKind::Ternary {
                    condition,
                    if_true,
                    if_false,
                },
                Precedence::TernaryConditional,
                line,
                column,
            ))
        })
    }

    fn match_suffix(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let mut e = a.match_expression(Precedence::Parenthesis)?;
            loop {
                let (line, column) = a.expression_position(e);
                if a.eat_symbol(Symbol::Point) {
                    let selector = match a.eat_identifier() {
                        Some(t) => t.str_value.clone(),
                        None => break,
                    };
                    e = a.push_expression(
                        ExpressionKind::MemberAccess { base: e, selector },
                        Precedence::Suffix,
                        line,
                        column,
                    );
                } else if a.eat_symbol(Symbol::LeftBracket) {
                    let cp = a.checkpoint();
                    let index = match a.match_expression(Precedence::Lowest) {
                        Some(index) if a.eat_symbol(Symbol::RightBracket) => index,
                        _ => {
                            a.truncate_tables(&cp);
                            break;
                        }
                    };
                    e = a.push_expression(
                        ExpressionKind::ArrayAccess { base: e, index },
                        Precedence::Suffix,
                        line,
                        column,
                    );
                } else if let Some(op) = a.eat_any(&SUFFIX_OPERATORS) {
                    e = a.push_expression(
                        ExpressionKind::Suffix { op, operand: e },
                        Precedence::Unary,
                        line,
                        column,
                    );
                } else {
                    break;
                }
            }
            Some(e)
        })
    }

    /// `expr {, expr}`
    fn match_argument_list(&mut self) -> Option<Vec<ExprId>> {
        let mut args = vec![self.match_expression(Precedence::Lowest)?];
        while self.eat_symbol(Symbol::Comma) {
            args.push(self.match_expression(Precedence::Lowest)?);
        }
        Some(args)
    }

    fn match_constructor(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let type_token = a.eat_identifier()?;
            let ty = match a.lookup_type(&type_token.str_value) {
                Some(ty) => ty,
                None => {
                    a.report_unknown_type(type_token);
                    return None;
                }
            };
            a.expect_symbol(Symbol::LeftParen)?;
            let args = a.match_argument_list()?;
            a.expect_symbol(Symbol::RightParen)?;
            Some(a.push_expression(
                ExpressionKind::Constructor { ty, args },
                Precedence::Parenthesis,
                type_token.line,
                type_token.column,
            ))
        })
    }

    fn match_function_call(&mut self) -> Option<ExprId> {
        self.transaction(|a| {
            let name = a.eat_identifier()?;
            a.expect_symbol(Symbol::LeftParen)?;
            let mut args = vec![];
            if !a.eat_symbol(Symbol::RightParen) {
                args = a.match_argument_list()?;
                if !a.eat_symbol(Symbol::RightParen) {
                    a.report_unexpected_token();
                    return None;
                }
            }
            if !a.ast.functions.iter().any(|f| f.name == name.str_value) {
                a.report_undeclared_identifier(name);
                return None;
            }
            Some(a.push_expression(
                ExpressionKind::FunctionCall {
                    function: UNRESOLVED,
                    name: name.str_value.clone(),
                    args,
                },
                Precedence::Parenthesis,
                name.line,
                name.column,
            ))
        })
    }

    // Types and definitions

    /// A type name, with the `<precision>` argument samplers and subpass inputs take.
    fn match_type(&mut self) -> Option<(KslType, &'a Token)> {
        let type_token = self.eat_identifier()?;
        let mut ty = match self.lookup_type(&type_token.str_value) {
            Some(ty) => ty,
            None => {
                self.report_unknown_type(type_token);
                return None;
            }
        };
        if ty.is_sampler() || ty.is_subpass_input() {
            self.expect_symbol(Symbol::Less)?;
            let base_token = self.eat_identifier()?;
            self.expect_symbol(Symbol::Greater)?;
            let base = match self.lookup_type(&base_token.str_value) {
                Some(b) => b,
                None => {
                    self.report_unknown_type(base_token);
                    return None;
                }
            };
            if base.id != TypeId::Float {
                return None;
            }
            ty.precision = base.precision;
        }
        Some((ty, type_token))
    }

    fn match_attribute_qualifier(&mut self) -> Option<AttribQualifier> {
        if self.eat_keyword(Keyword::Readonly) {
            return Some(AttribQualifier::Readonly);
        }
        if self.eat_keyword(Keyword::Writeonly) {
            return Some(AttribQualifier::Writeonly);
        }
        let t = self.eat_identifier()?;
        BUILTIN_QUALIFIERS.get(t.str_value.as_str()).copied()
    }

    /// Optional `{ qualifier, qualifier(N), ... }` list.
    fn match_attributes(&mut self) -> Option<Attributes> {
        let mut attributes = Attributes::default();
        if !self.eat_symbol(Symbol::LeftBrace) {
            return Some(attributes);
        }
        loop {
            let q = self.match_attribute_qualifier()?;
            if self.eat_symbol(Symbol::LeftParen) {
                let value = self.eat_kind(TokenKind::SignedInteger)?.int_value as u32;
                self.expect_symbol(Symbol::RightParen)?;
                attributes.values.insert(q, value);
            } else {
                attributes.flags.insert(q);
            }
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        if !self.eat_symbol(Symbol::RightBrace) {
            self.report_unexpected_token();
            return None;
        }
        Some(attributes)
    }

    /// Reports a variable already declared in the innermost scope.
    fn check_redefinition(&mut self, name: &str) {
        let redefined = self
            .active_ids
            .iter()
            .rev()
            .take_while(|id| **id != UNRESOLVED)
            .any(|id| self.ast.var(*id).orig_name == name);
        if redefined {
            self.report_variable_redefinition();
        }
    }

    fn match_array_initializer(&mut self) -> Option<Vec<ExprId>> {
        self.expect_symbol(Symbol::LeftBrace)?;
        let init = self.match_argument_list()?;
        self.expect_symbol(Symbol::RightBrace)?;
        Some(init)
    }

    fn match_storage(&mut self, global: bool) -> (StorageQualifier, bool) {
        let compute = self.stage == ShaderStage::Compute;
        if global && self.eat_keyword(Keyword::Uniform) {
            (StorageQualifier::Uniform, true)
        } else if global && !compute && self.eat_keyword(Keyword::In) {
            (StorageQualifier::In, true)
        } else if global && !compute && self.eat_keyword(Keyword::Out) {
            (StorageQualifier::Out, true)
        } else if global && self.eat_keyword(Keyword::Buffer) {
            (StorageQualifier::Buffer, true)
        } else if global && compute && self.eat_keyword(Keyword::Shared) {
            (StorageQualifier::Shared, false)
        } else if self.eat_keyword(Keyword::Const) {
            (StorageQualifier::Const, false)
        } else {
            (StorageQualifier::Default, false)
        }
    }

    pub(super) fn match_variable_definitions(&mut self, global: bool) -> Option<Node> {
        let active = self.active_ids.len();
        let matched = self.transaction(|a| {
            let (storage, check_qualifiers) = a.match_storage(global);
            let (ty, type_token) = a.match_type()?;

            let mut variables = vec![];
            let mut name_token = a.eat_identifier()?;
            loop {
                let mut v = Variable::new(name_token.str_value.clone(), ty.clone());
                v.storage = storage;
                if a.config.mangle_local_names && !storage.is_interface() {
                    v.new_name = format!("{}{}", v.orig_name, a.postfix());
                }
                if storage == StorageQualifier::Const {
                    v.access = Access::ReadOnly;
                }
                a.check_redefinition(&v.orig_name);

                let mut size = None;
                if a.eat_symbol(Symbol::LeftBracket) {
                    v.ty = KslType::array_of(ty.clone());
                    if !a.eat_symbol(Symbol::RightBracket) {
                        size = Some(a.match_expression(Precedence::Lowest)?);
                        a.expect_symbol(Symbol::RightBracket)?;
                    }
                }

                let is_array = v.ty.is_array();
                let read_only = v.access == Access::ReadOnly;
                let id = a.ast.push_variable(v);
                a.active_ids.push(id);

                let mut init = vec![];
                if a.eat_symbol(Symbol::Equal) {
                    if is_array {
                        init = a.match_array_initializer()?;
                    } else {
                        init.push(a.match_expression(Precedence::Lowest)?);
                    }
                } else {
                    if read_only {
                        a.report_const_must_be_initialized(a.t());
                    }
                    if is_array && size.is_none() && storage != StorageQualifier::Buffer {
                        a.report_unsized_array_must_be_initialized(name_token);
                    }
                }
                variables.push(DefinedVariable {
                    id,
                    size,
                    array_size: None,
                    init,
                });

                if !a.eat_symbol(Symbol::Comma) {
                    break;
                }
                name_token = a.eat_identifier()?;
            }

            let attributes = if check_qualifiers {
                a.match_attributes()?
            } else {
                Attributes::default()
            };
            a.expect_symbol(Symbol::Semicolon)?;

            Some((
                VariableDefinitions {
                    storage,
                    ty,
                    variables,
                    attributes,
                },
                type_token,
            ))
        });

        let (vd, type_token) = match matched {
            Some(m) => m,
            None => {
                self.active_ids.truncate(active);
                return None;
            }
        };
        if global && vd.storage == StorageQualifier::Default {
            self.report_global_variables_not_allowed(type_token);
        }
        if global && vd.storage != StorageQualifier::Default && vd.variables.len() > 1 {
            self.report_only_one_variable_allowed(type_token);
        }
        Some(Node::new(
            NodeKind::VariableDefinitions(vd),
            type_token.line,
            type_token.column,
        ))
    }

    // Statements

    pub(super) fn match_statement(&mut self) -> Option<Node> {
        self.init_error_blocks();
        self.transaction(|a| {
            let matched = a
                .alternative(Self::match_block)
                .or_else(|| a.alternative(Self::match_expression_statement))
                .or_else(|| a.alternative(Self::match_if))
                .or_else(|| a.alternative(Self::match_for))
                .or_else(|| a.alternative(Self::match_control))
                .or_else(|| a.alternative(Self::match_return));
            if matched.is_none() {
                a.collect_errors();
            }
            matched
        })
    }

    /// `{ ... }` as the statement list and the position of the opening brace.
    fn match_block_statements(&mut self) -> Option<(Vec<Node>, u32, u32)> {
        let scope = self.open_scope(Some("_b"));
        let matched = self.transaction(|a| {
            let open = a.expect_symbol(Symbol::LeftBrace)?;
            let mut nodes = vec![];
            while !a.eat_symbol(Symbol::RightBrace) {
                a.init_error_blocks();
                let node = a
                    .alternative(|a| a.match_variable_definitions(false))
                    .or_else(|| a.alternative(Self::match_statement));
                match node {
                    Some(n) => nodes.push(n),
                    None => {
                        a.collect_errors();
                        return None;
                    }
                }
            }
            Some((nodes, open.line, open.column))
        });
        self.close_scope(scope);
        matched
    }

    fn match_block(&mut self) -> Option<Node> {
        let (nodes, line, column) = self.match_block_statements()?;
        Some(Node::new(NodeKind::Block(nodes), line, column))
    }

    fn match_expression_statement(&mut self) -> Option<Node> {
        self.transaction(|a| {
            let start = a.tn();
            if a.eat_symbol(Symbol::Semicolon) {
                return Some(Node::new(NodeKind::Empty, start.line, start.column));
            }
            let e = a.match_expression(Precedence::Lowest)?;
            a.expect_symbol(Symbol::Semicolon)?;
            Some(Node::new(NodeKind::Expression(e), start.line, start.column))
        })
    }

    fn match_if(&mut self) -> Option<Node> {
        self.transaction(|a| {
            let t = a.expect_keyword(Keyword::If)?;
            a.expect_symbol(Symbol::LeftParen)?;
            let condition = a.match_expression(Precedence::Lowest)?;
            a.expect_symbol(Symbol::RightParen)?;
            let then_branch = Box::new(a.match_statement()?);
            let else_branch = if a.eat_keyword(Keyword::Else) {
                Some(Box::new(a.match_statement()?))
            } else {
                None
            };
            Some(Node::new(
                NodeKind::If {
                    condition,
                    then_branch,
                    else_branch,
                },
                t.line,
                t.column,
            ))
        })
    }

    fn match_for(&mut self) -> Option<Node> {
        let scope = self.open_scope(Some("_fl"));
        let matched = self.transaction(|a| {
            let mut is_loop = false;
            if a.eat_symbol(Symbol::LeftBracket) {
                let attribute = a.eat_identifier()?;
                if attribute.str_value != "loop" {
                    a.report_unexpected_token();
                    return None;
                }
                is_loop = true;
                a.expect_symbol(Symbol::RightBracket)?;
            }
            let t = a.expect_keyword(Keyword::For)?;
            a.expect_symbol(Symbol::LeftParen)?;

            let mut init = None;
            if !a.eat_symbol(Symbol::Semicolon) {
                a.init_error_blocks();
                let node = a
                    .alternative(|a| a.match_variable_definitions(false))
                    .or_else(|| a.alternative(Self::match_expression_statement));
                match node {
                    Some(n) => init = Some(n),
                    None => {
                        a.collect_errors();
                        return None;
                    }
                }
            }

            let mut condition = None;
            if !a.eat_symbol(Symbol::Semicolon) {
                condition = Some(a.match_expression(Precedence::Lowest)?);
                a.expect_symbol(Symbol::Semicolon)?;
            }
            let mut step = None;
            if !a.eat_symbol(Symbol::RightParen) {
                step = Some(a.match_expression(Precedence::Lowest)?);
                a.expect_symbol(Symbol::RightParen)?;
            }
            let body = a.match_statement()?;

            Some(Node::new(
                NodeKind::For(Box::new(ForLoop {
                    init,
                    condition,
                    step,
                    body,
                    is_loop,
                })),
                t.line,
                t.column,
            ))
        });
        self.close_scope(scope);
        matched
    }

    fn match_control(&mut self) -> Option<Node> {
        self.transaction(|a| {
            let t = a.tn();
            let kind = if a.eat_keyword(Keyword::Break) {
                NodeKind::Break
            } else if a.eat_keyword(Keyword::Continue) {
                NodeKind::Continue
            } else if a.eat_keyword(Keyword::Discard) {
                a.ast.has_discard = true;
                NodeKind::Discard
            } else {
                a.report_unexpected_token();
                return None;
            };
            a.expect_symbol(Symbol::Semicolon)?;
            Some(Node::new(kind, t.line, t.column))
        })
    }

    fn match_return(&mut self) -> Option<Node> {
        self.transaction(|a| {
            let t = a.expect_keyword(Keyword::Return)?;
            let mut value = None;
            if !a.eat_symbol(Symbol::Semicolon) {
                value = Some(a.match_expression(Precedence::Lowest)?);
                a.expect_symbol(Symbol::Semicolon)?;
            }
            Some(Node::new(NodeKind::Return(value), t.line, t.column))
        })
    }

    // Global declarations

    fn match_function(&mut self) -> Option<Node> {
        let scope = self.open_scope(Some("_fa"));
        let matched = self.transaction(|a| {
            let type_token = a.eat_identifier()?;
            let name_token = a.eat_identifier()?;
            a.expect_symbol(Symbol::LeftParen)?;

            let mut params = vec![];
            let mut param_types = vec![];
            let mut param_access = vec![];
            loop {
                let access = if a.eat_keyword(Keyword::In) {
                    ParamAccess::In
                } else if a.eat_keyword(Keyword::Out) {
                    ParamAccess::Out
                } else if a.eat_keyword(Keyword::Inout) {
                    ParamAccess::InOut
                } else {
                    ParamAccess::In
                };
                let (ty, _) = match a.match_type() {
                    Some(t) => t,
                    None => break,
                };
                let name = a.eat_identifier()?;
                a.check_redefinition(&name.str_value);

                let mut v = Variable::new(name.str_value.clone(), ty.clone());
                let mut size = None;
                if a.eat_symbol(Symbol::LeftBracket) {
                    v.ty = KslType::array_of(ty);
                    size = a.match_expression(Precedence::Lowest);
                    a.expect_symbol(Symbol::RightBracket)?;
                }
                if a.config.mangle_local_names {
                    v.new_name = format!("{}{}", v.orig_name, a.postfix());
                }
                param_types.push(v.ty.clone());
                param_access.push(access);
                let id = a.ast.push_variable(v);
                a.active_ids.push(id);
                params.push(Parameter { id, size });

                if !a.eat_symbol(Symbol::Comma) {
                    break;
                }
            }
            a.expect_symbol(Symbol::RightParen)?;
            let (body, _, _) = a.match_block_statements()?;
            Some((type_token, name_token, params, param_types, param_access, body))
        });
        self.close_scope(scope);

        let (type_token, name_token, params, param_types, param_access, body) = matched?;
        let return_type = match self.lookup_type(&type_token.str_value) {
            Some(t) => t,
            None => {
                self.report_unknown_type(type_token);
                KslType::invalid()
            }
        };
        let mut function = Function::new(name_token.str_value.clone(), return_type, param_types);
        function.param_access = param_access;
        self.ast.functions.push(function);
        let id = (self.ast.functions.len() - 1) as u32;
        trace!("function {} defined as #{}", name_token.str_value, id);

        Some(Node::new(
            NodeKind::Function(FunctionDefinition {
                id,
                params,
                body,
                entry: None,
            }),
            type_token.line,
            type_token.column,
        ))
    }

    fn match_image(&mut self) -> Option<Node> {
        self.transaction(|a| {
            let t = a.expect_keyword(Keyword::Image2D)?;
            a.expect_symbol(Symbol::Less)?;
            let (base, _) = a.match_type()?;
            if base.id != TypeId::Float {
                return None;
            }
            a.expect_symbol(Symbol::Greater)?;
            let name = a.eat_identifier()?;
            let attributes = a.match_attributes()?;
            a.expect_symbol(Symbol::Semicolon)?;

            a.check_redefinition(&name.str_value);
            let mut v = Variable::new(
                name.str_value.clone(),
                KslType::new(TypeId::Image2D, base.precision),
            );
            if attributes.has(AttribQualifier::Readonly) {
                v.access = Access::ReadOnly;
            } else if attributes.has(AttribQualifier::Writeonly) {
                v.access = Access::WriteOnly;
            } else {
                a.report_image_access_missing(a.t());
            }
            let id: VarId = a.ast.push_variable(v);
            a.active_ids.push(id);

            Some(Node::new(
                NodeKind::ImageDefinition(ImageDefinition { id, attributes }),
                t.line,
                t.column,
            ))
        })
    }

    fn eat_thread_count(&mut self) -> Option<u32> {
        let t = self.tn();
        match t.kind {
            TokenKind::SignedInteger | TokenKind::UnsignedInteger => {
                self.eat_kind(t.kind);
                Some(t.int_value as u32)
            }
            _ => None,
        }
    }

    fn match_num_threads(&mut self) -> Option<Node> {
        self.transaction(|a| {
            let t = a.expect_keyword(Keyword::NumThreads)?;
            a.expect_symbol(Symbol::LeftParen)?;
            let x = a.eat_thread_count()?;
            a.expect_symbol(Symbol::Comma)?;
            let y = a.eat_thread_count()?;
            a.expect_symbol(Symbol::Comma)?;
            let z = a.eat_thread_count()?;
            a.expect_symbol(Symbol::RightParen)?;
            a.expect_symbol(Symbol::Semicolon)?;
            Some(Node::new(NodeKind::NumThreads([x, y, z]), t.line, t.column))
        })
    }

    fn match_force_highp(&mut self) -> Option<()> {
        self.transaction(|a| {
            a.expect_keyword(Keyword::ForceHighp)?;
            a.expect_symbol(Symbol::Semicolon)?;
            a.ast.force_highp = true;
            Some(())
        })
    }

    fn match_struct(&mut self) -> Option<Node> {
        let scope = self.open_scope(None);
        let matched = self.transaction(|a| {
            let t = a.expect_keyword(Keyword::Struct)?;
            let name = a.eat_identifier()?;
            a.expect_symbol(Symbol::LeftBrace)?;
            let mut members = vec![];
            while let Some(m) = a.match_variable_definitions(false) {
                members.push(m);
            }
            a.expect_symbol(Symbol::RightBrace)?;
            a.expect_symbol(Symbol::Semicolon)?;

            let member_ids = members
                .iter()
                .filter_map(Node::as_variable_definitions)
                .flat_map(|vd| vd.variables.iter().map(|v| v.id))
                .collect();
            a.ast.user_types.push(UserType {
                name: name.str_value.clone(),
                members: member_ids,
            });
            Some(Node::new(
                NodeKind::StructDefinition(StructDefinition {
                    name: name.str_value.clone(),
                    members,
                }),
                t.line,
                t.column,
            ))
        });
        self.close_scope(scope);
        matched
    }

    /// Top level loop. Returns false on the first declaration no rule accepts.
    pub(super) fn match_program(&mut self) -> bool {
        self.active_ids.push(UNRESOLVED);
        self.postfixes.push("_g".to_string());

        while self.eat_kind(TokenKind::EndOfTokens).is_none() {
            self.init_error_blocks();
            let compute = self.stage == ShaderStage::Compute;
            let matched = self
                .alternative(|a| a.match_variable_definitions(true).map(Some))
                .or_else(|| self.alternative(|a| a.match_function().map(Some)))
                .or_else(|| self.alternative(|a| a.match_image().map(Some)))
                .or_else(|| self.alternative(|a| a.match_struct().map(Some)))
                .or_else(|| {
                    if compute {
                        self.alternative(|a| a.match_num_threads().map(Some))
                    } else {
                        None
                    }
                })
                .or_else(|| self.alternative(|a| a.match_force_highp().map(|_| None)));

            match matched {
                Some(Some(node)) => self.ast.root.push(node),
                Some(None) => {}
                None => {
                    self.collect_errors();
                    return false;
                }
            }
        }
        true
    }
}
