//! Type inference and semantic checks over a parsed program.
//!
//! Every expression is validated at most once, the outcome is cached on the expression.

use std::collections::BTreeSet;

use log::trace;

use crate::ast::{
    AttribQualifier, BinaryOp, DWrap, ExprId, ExpressionKind, Node, NodeKind, StorageQualifier,
    VariableDefinitions, UNRESOLVED,
};
use crate::common::{KslType, Precision, ShaderStage, TypeClass, TypeId};

use super::tables::{selector_letters, MULTIPLICATION_TABLE};
use super::Analyzer;

fn equal_numeric(a: &KslType, b: &KslType) -> Option<KslType> {
    if a.is_numeric() && b.is_numeric() && a.id == b.id {
        Some(a.clone())
    } else {
        None
    }
}

/// Vector or matrix combined with a scalar of the same class.
fn scalar_numeric(a: &KslType, b: &KslType) -> Option<KslType> {
    if !(a.is_numeric() && b.is_numeric()) || a.type_class() != b.type_class() {
        return None;
    }
    if b.component_count() == 1 {
        Some(a.clone())
    } else if a.component_count() == 1 {
        Some(b.clone())
    } else {
        None
    }
}

fn right_scalar_numeric(a: &KslType, b: &KslType) -> Option<KslType> {
    if a.is_numeric() && b.is_numeric() && a.type_class() == b.type_class() {
        if b.component_count() == 1 {
            return Some(a.clone());
        }
    }
    None
}

fn is_int_or_uint(t: &KslType) -> bool {
    matches!(t.id, TypeId::Int | TypeId::UInt)
}

/// Result type of `a op b`, or `None` if the operand types don't fit the operator.
fn binary_result(op: BinaryOp, a: &KslType, b: &KslType) -> Option<KslType> {
    use BinaryOp::*;
    let boolean = KslType::new(TypeId::Bool, Precision::None);
    match op {
        Add | Sub | Div => equal_numeric(a, b).or_else(|| scalar_numeric(a, b)),
        Mul => equal_numeric(a, b)
            .or_else(|| scalar_numeric(a, b))
            .or_else(|| {
                MULTIPLICATION_TABLE
                    .get(&(a.id, b.id))
                    .map(|id| KslType::new(*id, Precision::None))
            }),
        Mod => {
            if !(a.is_integer() && b.is_integer()) {
                return None;
            }
            equal_numeric(a, b).or_else(|| scalar_numeric(a, b))
        }
        AddAssign | SubAssign | MulAssign | DivAssign => {
            equal_numeric(a, b).or_else(|| right_scalar_numeric(a, b))
        }
        Equal | NotEqual => (a == b).then(|| boolean),
        Less | LessEqual | Greater | GreaterEqual => {
            let scalars = a.component_count() == 1 && b.component_count() == 1;
            (a.is_numeric() && b.is_numeric() && scalars && a == b).then(|| boolean)
        }
        ShiftLeft | ShiftRight | ShiftLeftAssign | ShiftRightAssign => {
            (is_int_or_uint(a) && is_int_or_uint(b)).then(|| a.clone())
        }
        BitwiseAnd | BitwiseOr => {
            (is_int_or_uint(a) && a.id == b.id && a.precision == b.precision).then(|| a.clone())
        }
        LazyAnd | LazyOr => {
            let scalars = a.component_count() == 1 && b.component_count() == 1;
            (a.is_bool() && b.is_bool() && scalars).then(|| boolean)
        }
        Assign => (a.id == b.id).then(|| a.clone()),
    }
}

impl<'a> Analyzer<'a> {
    pub(super) fn validate_program(&mut self) -> bool {
        let mut valid = true;
        for id in 0..self.ast.expressions.len() {
            valid &= self.validate_expression(id as ExprId);
        }

        let root = std::mem::take(&mut self.ast.root);
        for node in &root {
            valid &= self.validate_node(node);
        }
        self.ast.root = root;
        valid
    }

    fn validate_nodes(&mut self, nodes: &[Node]) -> bool {
        let mut valid = true;
        for n in nodes {
            valid &= self.validate_node(n);
        }
        valid
    }

    fn validate_optional_expression(&mut self, e: Option<ExprId>) -> bool {
        e.map(|e| self.validate_expression(e)).unwrap_or(true)
    }

    fn validate_node(&mut self, node: &Node) -> bool {
        match &node.kind {
            NodeKind::VariableDefinitions(vd) => self.validate_variable_definitions(node, vd),
            NodeKind::Function(f) => {
                self.current_function = Some(f.id);
                let valid = self.validate_nodes(&f.body);
                self.current_function = None;
                valid
            }
            NodeKind::Block(nodes) => self.validate_nodes(nodes),
            NodeKind::Expression(e) => self.validate_expression(*e),
            NodeKind::Return(value) => self.validate_return(node, *value),
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let mut valid = self.validate_expression(*condition);
                valid &= self.validate_node(then_branch);
                if let Some(e) = else_branch {
                    valid &= self.validate_node(e);
                }
                valid
            }
            NodeKind::For(f) => {
                let mut valid = match &f.init {
                    Some(init) => self.validate_node(init),
                    None => true,
                };
                valid &= self.validate_optional_expression(f.condition);
                valid &= self.validate_optional_expression(f.step);
                valid &= self.validate_node(&f.body);
                valid
            }
            NodeKind::Empty
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Discard
            | NodeKind::ImageDefinition(_)
            | NodeKind::NumThreads(_)
            | NodeKind::StructDefinition(_)
            | NodeKind::InterfaceBlock(_)
            | NodeKind::EntryOutputDefinition => true,
        }
    }

    fn validate_qualifiers(&mut self, node: &Node, vd: &VariableDefinitions) -> bool {
        let mut flags = BTreeSet::new();
        let mut values = BTreeSet::new();
        match vd.storage {
            StorageQualifier::Buffer => {
                flags.insert(AttribQualifier::Ssbo);
                flags.insert(AttribQualifier::Readonly);
            }
            StorageQualifier::Out if self.stage == ShaderStage::Fragment => {
                values.insert(AttribQualifier::Color);
            }
            StorageQualifier::Uniform
                if self.stage == ShaderStage::Fragment && vd.ty.is_subpass_input() =>
            {
                values.insert(AttribQualifier::Color);
            }
            _ => {}
        }

        let mut valid = true;
        for q in &vd.attributes.flags {
            if !flags.contains(q) {
                self.report_invalid_attribute_qualifier(node, *q);
                valid = false;
            }
        }
        for q in vd.attributes.values.keys() {
            if !values.contains(q) {
                self.report_invalid_attribute_qualifier(node, *q);
                valid = false;
            }
        }
        valid
    }

    fn validate_variable_definitions(&mut self, node: &Node, vd: &VariableDefinitions) -> bool {
        let mut valid = self.validate_qualifiers(node, vd);
        let first = match vd.variables.first() {
            Some(f) => f,
            None => return valid,
        };
        let ty = self.ast.var(first.id).ty.clone();

        match vd.storage {
            StorageQualifier::Buffer => {
                let ssbo = vd.attributes.has(AttribQualifier::Ssbo);
                if ty.is_array() && first.size.is_none() && !ssbo {
                    self.report_implicitly_sized_ubo(node);
                    valid = false;
                }
                if self.stage == ShaderStage::Fragment
                    && ssbo
                    && !vd.attributes.has(AttribQualifier::Readonly)
                {
                    self.report_readwrite_ssbo_in_fragment(node);
                    valid = false;
                }
            }
            StorageQualifier::Uniform => {
                if ty.is_bool() || ty.is_numeric() {
                    if !matches!(ty.component_count(), 1 | 2 | 4 | 16) {
                        self.report_unsupported_uniform_type(node);
                        valid = false;
                    }
                } else if ty.is_array() && ty.base_type().component_count() != 4 {
                    self.report_unsupported_uniform_array_type(node);
                    valid = false;
                }
            }
            StorageQualifier::In | StorageQualifier::Out => {
                if ty.is_matrix() {
                    self.report_unsupported_attrib_type(node);
                    valid = false;
                }
            }
            _ => {}
        }

        for v in &vd.variables {
            for init in &v.init {
                if !self.validate_expression(*init) {
                    return false;
                }
                let init_type = self.ast.expr(*init).ty.clone();
                if vd.ty != init_type {
                    self.report_init_type_mismatch(node, vd, &init_type);
                    return false;
                }
                if vd.ty.precision != init_type.precision {
                    self.report_init_precision_mismatch(node, vd, &init_type);
                }
            }
        }
        valid
    }

    fn validate_return(&mut self, node: &Node, value: Option<ExprId>) -> bool {
        let func_type = match self.current_function {
            Some(f) => self.ast.functions[f as usize].return_type.clone(),
            None => return true,
        };
        let mut exp_type = KslType::void();
        if let Some(e) = value {
            if !self.validate_expression(e) {
                return false;
            }
            exp_type = self.ast.expr(e).ty.clone();
        }
        if func_type != exp_type {
            self.report_return_type_mismatch(node, &func_type, &exp_type);
            return false;
        }
        if func_type.precision != exp_type.precision {
            self.report_return_precision_mismatch(node, &func_type, &exp_type);
        }
        true
    }

    /// Infers the type of expression `id` and checks it. The first result is cached, later
    /// calls return it without reporting anything again.
    pub fn validate_expression(&mut self, id: ExprId) -> bool {
        let e = match self.ast.expressions.get(id as usize) {
            Some(e) => e,
            None => return false,
        };
        if let Some(v) = e.validated {
            return v;
        }
        if e.ty.is_resolved() {
            return true;
        }

        let kind = e.kind.clone();
        let valid = match kind {
            ExpressionKind::Literal(_) => true,
            ExpressionKind::Variable(v) => self.validate_variable(id, v),
            ExpressionKind::FunctionCall { name, args, .. } => {
                self.validate_function_call(id, &name, &args)
            }
            ExpressionKind::Binary { op, lhs, rhs } => self.validate_binary(id, op, lhs, rhs),
            ExpressionKind::Parenthesis(inner) => {
                let valid = self.validate_expression(inner);
                let (ty, constant, l_value) = {
                    let i = self.ast.expr(inner);
                    (i.ty.clone(), i.constant_value, i.l_value)
                };
                let e = self.ast.expr_mut(id);
                e.ty = ty;
                e.constant_value = constant;
                e.l_value = l_value;
                valid
            }
            ExpressionKind::MemberAccess { base, selector } => {
                self.validate_member_access(id, base, &selector)
            }
            ExpressionKind::ArrayAccess { base, index } => {
                self.validate_array_access(id, base, index)
            }
            ExpressionKind::Ternary {
                condition,
                if_true,
                if_false,
            } => self.validate_ternary(id, condition, if_true, if_false),
            ExpressionKind::Constructor { ty, args } => self.validate_constructor(id, &ty, &args),
            ExpressionKind::Unary { operand, .. } | ExpressionKind::Suffix { operand, .. } => {
                let valid = self.validate_expression(operand);
                let ty = self.ast.expr(operand).ty.clone();
                self.ast.expr_mut(id).ty = ty;
                valid
            }
        };
        if !valid {
            trace!("invalid expression: {}", DWrap(&self.ast, id));
        }
        self.ast.expr_mut(id).validated = Some(valid);
        valid
    }

    fn validate_variable(&mut self, id: ExprId, v: u32) -> bool {
        if v == UNRESOLVED {
            return false;
        }
        let ty = self.ast.var(v).ty.clone();
        if !ty.is_resolved() {
            return false;
        }
        let e = self.ast.expr_mut(id);
        e.l_value = !ty.is_array();
        e.ty = ty;
        true
    }

    fn validate_function_call(&mut self, id: ExprId, name: &str, args: &[ExprId]) -> bool {
        for a in args {
            if !self.validate_expression(*a) {
                return false;
            }
        }
        let arg_types: Vec<KslType> = args.iter().map(|a| self.ast.expr(*a).ty.clone()).collect();

        let mut type_match = None;
        for (i, f) in self.ast.functions.iter().enumerate() {
            if f.name != name || f.param_types.len() != arg_types.len() {
                continue;
            }
            if !f.param_types.iter().zip(&arg_types).all(|(p, a)| p == a) {
                continue;
            }
            type_match = Some(i);
            let precision_match = f
                .param_types
                .iter()
                .zip(&arg_types)
                .all(|(p, a)| p.precision == a.precision);
            if precision_match {
                break;
            }
        }

        let i = match type_match {
            Some(i) => i,
            None => {
                self.report_function_not_found(id);
                return false;
            }
        };
        let f = &self.ast.functions[i];
        let precision_match = f
            .param_types
            .iter()
            .zip(&arg_types)
            .all(|(p, a)| p.precision == a.precision);
        let mut ty = f.return_type.clone();
        if !precision_match {
            self.report_function_precision_mismatch(id);
            ty.precision = Precision::None;
        }

        let e = self.ast.expr_mut(id);
        e.ty = ty;
        if let ExpressionKind::FunctionCall { function, .. } = &mut e.kind {
            *function = i as u32;
        }
        true
    }

    fn validate_binary(&mut self, id: ExprId, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> bool {
        if !self.validate_expression(lhs) || !self.validate_expression(rhs) {
            return false;
        }
        let a = self.ast.expr(lhs).ty.clone();
        let b = self.ast.expr(rhs).ty.clone();

        let result = binary_result(op, &a, &b);
        let mut valid = result.is_some();
        if !valid {
            self.report_binary_type_mismatch(id);
        }
        if let Some(ty) = result {
            self.ast.expr_mut(id).ty = ty;
        }
        if op.is_assign() && !self.ast.expr(lhs).l_value {
            self.ast.expr_mut(id).ty = KslType::invalid();
            self.report_not_lvalue(id);
            valid = false;
        }
        if !valid {
            return false;
        }

        match op {
            BinaryOp::ShiftLeft
            | BinaryOp::ShiftRight
            | BinaryOp::ShiftLeftAssign
            | BinaryOp::ShiftRightAssign => {}
            _ if op.is_comparison() => {
                if a.precision != b.precision {
                    self.report_binary_precision_mismatch(id);
                }
            }
            _ => {
                if a.precision == b.precision {
                    self.ast.expr_mut(id).ty.precision = a.precision;
                } else {
                    self.report_binary_precision_mismatch(id);
                    self.ast.expr_mut(id).ty.precision = Precision::None;
                }
            }
        }

        if op == BinaryOp::Div && a.type_class() == TypeClass::INT && b.type_class() == TypeClass::INT
        {
            self.report_integer_division(id);
        }

        let constant = self.ast.expr(lhs).constant_value && self.ast.expr(rhs).constant_value;
        self.ast.expr_mut(id).constant_value = constant;
        true
    }

    fn validate_member_access(&mut self, id: ExprId, base: ExprId, selector: &str) -> bool {
        if !self.validate_expression(base) {
            return false;
        }
        let base_type = self.ast.expr(base).ty.clone();

        if let TypeId::User(t) = base_type.id {
            let member = self.ast.user_types.get(t as usize).and_then(|ut| {
                ut.members
                    .iter()
                    .copied()
                    .find(|m| self.ast.var(*m).orig_name == selector)
            });
            return match member {
                Some(m) => {
                    let ty = self.ast.var(m).ty.clone();
                    let l_value = self.ast.expr(base).l_value && !ty.is_array();
                    let e = self.ast.expr_mut(id);
                    e.ty = ty;
                    e.l_value = l_value;
                    true
                }
                None => {
                    self.report_invalid_selector(id, base, selector);
                    false
                }
            };
        }

        let letters = if base_type.is_vector() && !base_type.is_bool() {
            selector_letters(base_type.component_count())
        } else {
            ""
        };
        let fits = selector.len() <= 4 && selector.chars().all(|c| letters.contains(c));
        let ty = if fits {
            KslType::create(base_type.type_class(), selector.len() as u32)
        } else {
            None
        };
        match ty {
            Some(ty) => {
                let e = self.ast.expr_mut(id);
                e.ty = ty.with_precision(base_type.precision);
                e.l_value = true;
                true
            }
            None => {
                self.report_invalid_selector(id, base, selector);
                false
            }
        }
    }

    fn validate_array_access(&mut self, id: ExprId, base: ExprId, index: ExprId) -> bool {
        if !self.validate_expression(base) || !self.validate_expression(index) {
            return false;
        }
        let base_type = self.ast.expr(base).ty.clone();
        let base_l_value = self.ast.expr(base).l_value;
        let index_type = self.ast.expr(index).ty.clone();

        let accessible = base_type.is_array() || base_type.is_matrix() || base_type.is_vector();
        let element = if accessible && is_int_or_uint(&index_type) {
            if base_type.is_array() {
                let ty = base_type.base_type().clone();
                let l_value = !ty.is_array();
                Some((ty, l_value))
            } else if base_type.is_matrix() {
                base_type.column_type().map(|t| (t, false))
            } else {
                base_type.element_type().map(|t| (t, base_l_value))
            }
        } else {
            None
        };

        let (ty, l_value) = match element {
            Some(e) => e,
            None => {
                self.report_invalid_array_access(id, index);
                return false;
            }
        };
        let e = self.ast.expr_mut(id);
        e.ty = ty;
        e.l_value = l_value;

        let vector_or_matrix = base_type.is_vector() || base_type.is_matrix();
        if vector_or_matrix && !self.ast.expr(index).constant_value {
            self.report_dynamic_access(id, base);
        }
        true
    }

    fn validate_ternary(
        &mut self,
        id: ExprId,
        condition: ExprId,
        if_true: ExprId,
        if_false: ExprId,
    ) -> bool {
        for e in [condition, if_true, if_false] {
            if !self.validate_expression(e) {
                return false;
            }
        }
        let mut valid = true;
        if self.ast.expr(condition).ty.id != TypeId::Bool {
            self.report_ternary_condition_not_bool(id, (condition, if_true, if_false));
            valid = false;
        }
        if self.ast.expr(if_true).ty != self.ast.expr(if_false).ty {
            self.report_ternary_branch_mismatch(id, (condition, if_true, if_false));
            valid = false;
        }
        let ty = self.ast.expr(if_true).ty.clone();
        self.ast.expr_mut(id).ty = ty;
        valid
    }

    fn validate_constructor(&mut self, id: ExprId, ty: &KslType, args: &[ExprId]) -> bool {
        let component_count = ty.component_count();
        let mut arg_component_count = 0;
        for a in args {
            if !self.validate_expression(*a) {
                return false;
            }
            let at = &self.ast.expr(*a).ty;
            if !(at.is_numeric() || at.is_bool()) {
                self.report_invalid_constructor(id);
                return false;
            }
            arg_component_count += at.component_count();
        }

        if arg_component_count != 1 && arg_component_count != component_count {
            self.report_invalid_constructor(id);
            return false;
        }
        if ty.is_matrix() && arg_component_count != 1 {
            let columns_fit = if args.len() == 1 {
                self.ast.expr(args[0]).ty.id == ty.id
            } else {
                let column = ty.column_type().map(|c| c.id);
                args.iter()
                    .all(|a| Some(self.ast.expr(*a).ty.id) == column)
            };
            if !columns_fit {
                self.report_invalid_constructor(id);
                return false;
            }
        }

        let precision_mismatch =
            args.len() > 1 && args.iter().any(|a| self.ast.expr(*a).ty.precision != ty.precision);
        let mut result = ty.clone();
        if precision_mismatch {
            result.precision = Precision::None;
            self.ast.expr_mut(id).ty = result;
            self.report_constructor_precision_mismatch(id);
            return true;
        }
        self.ast.expr_mut(id).ty = result;
        true
    }

    pub(super) fn check_uniform_budget(&mut self) -> bool {
        let mut bytes: u64 = 0;
        for node in &self.ast.root {
            let vd = match node.as_variable_definitions() {
                Some(vd) if vd.storage == StorageQualifier::Uniform => vd,
                _ => continue,
            };
            let dv = match vd.variables.first() {
                Some(dv) => dv,
                None => continue,
            };
            let ty = &self.ast.var(dv.id).ty;
            let element = ty.base_type();
            if !(element.is_bool() || element.is_numeric()) {
                continue;
            }
            let count = if ty.is_array() {
                dv.array_size.unwrap_or(0) as u64
            } else {
                1
            };
            bytes += count * element.uniform_slot_size() as u64;
        }
        trace!("uniforms use {} bytes", bytes);

        if bytes > self.config.uniform_budget_bytes {
            self.report_too_many_uniforms(bytes);
            return false;
        }
        true
    }

    pub(super) fn detect_unused_variables(&mut self) {
        let mut unused = vec![];
        for node in &self.ast.root {
            crate::ast::walk_nodes(node, &mut |n| {
                if let NodeKind::VariableDefinitions(vd) = &n.kind {
                    for dv in &vd.variables {
                        let v = self.ast.var(dv.id);
                        if matches!(
                            v.storage,
                            StorageQualifier::Default | StorageQualifier::Const
                        ) {
                            continue;
                        }
                        if !v.used {
                            unused.push((n.line, n.column, vd.ty.clone(), v.clone()));
                        }
                    }
                }
            });
        }
        for (line, column, ty, v) in unused {
            self.report_unused_variable(line, column, &ty, &v);
        }
    }
}
