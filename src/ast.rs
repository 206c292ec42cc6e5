//! The program model every phase after the tokenizer works on.
//!
//! Variables, functions and expressions live in flat tables on [ProgramAst] and are referenced
//! by index. Statement and declaration [Node]s form an owned tree below [ProgramAst::root].
//! Keeping the tables contiguous lets the parser undo a failed attempt by truncating them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use crate::common::{KslType, Precision, ShaderStage, TypeClass, TypeId, UniformGroup};

pub type VarId = u32;
pub type FuncId = u32;
pub type ExprId = u32;

/// Placeholder index for a reference the parser could not resolve.
pub const UNRESOLVED: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageQualifier {
    Default,
    In,
    Out,
    Uniform,
    Const,
    Buffer,
    Shared,
}
impl StorageQualifier {
    /// KSL keyword including the trailing space, empty for [StorageQualifier::Default].
    pub fn ksl_str(self) -> &'static str {
        match self {
            StorageQualifier::Default => "",
            StorageQualifier::In => "in ",
            StorageQualifier::Out => "out ",
            StorageQualifier::Uniform => "uniform ",
            StorageQualifier::Const => "const ",
            StorageQualifier::Buffer => "buffer ",
            StorageQualifier::Shared => "shared ",
        }
    }

    /// Storage classes visible outside the shader. Their names are never mangled.
    pub fn is_interface(self) -> bool {
        matches!(
            self,
            StorageQualifier::In
                | StorageQualifier::Out
                | StorageQualifier::Uniform
                | StorageQualifier::Buffer
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamAccess {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Plus,
    Minus,
    Increment,
    Decrement,
    LogicalNot,
}
impl UnaryOp {
    pub fn prefix_str(self) -> &'static str {
        match self {
            UnaryOp::Minus => " -",
            UnaryOp::Plus => " +",
            UnaryOp::Increment => " ++",
            UnaryOp::Decrement => " --",
            UnaryOp::LogicalNot => " !",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ShiftLeft,
    ShiftRight,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    LazyAnd,
    LazyOr,
    BitwiseAnd,
    BitwiseOr,
    ShiftLeftAssign,
    ShiftRightAssign,
}
impl BinaryOp {
    /// Operator text as printed between the operands.
    pub fn as_str(self) -> &'static str {
        use BinaryOp::*;
        match self {
            Assign => " = ",
            Sub => "-",
            Add => "+",
            Mul => "*",
            Div => "/",
            Mod => "%",
            AddAssign => " += ",
            SubAssign => " -= ",
            MulAssign => " *= ",
            DivAssign => " /= ",
            Less => " < ",
            Greater => " > ",
            LessEqual => " <= ",
            GreaterEqual => " >= ",
            LazyAnd => " && ",
            LazyOr => " || ",
            ShiftLeft => " << ",
            ShiftRight => " >> ",
            Equal => " == ",
            NotEqual => " != ",
            BitwiseAnd => " & ",
            BitwiseOr => " | ",
            ShiftLeftAssign => " <<= ",
            ShiftRightAssign => " >>= ",
        }
    }

    pub fn is_assign(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Assign
                | AddAssign
                | SubAssign
                | MulAssign
                | DivAssign
                | ShiftLeftAssign
                | ShiftRightAssign
        )
    }

    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Less | Greater | LessEqual | GreaterEqual | Equal | NotEqual
        )
    }
}

/// Binding strength of an expression. Higher binds tighter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
pub enum Precedence {
    Invalid,
    Lowest,
    Assign,
    TernaryConditional,
    BinaryOr,
    BinaryAnd,
    BinaryBitwiseOr,
    BinaryBitwiseAnd,
    BinaryEqual,
    BinaryComp,
    BinaryShift,
    BinaryAdd,
    BinaryMul,
    Unary,
    Suffix,
    Parenthesis,
}
impl Precedence {
    /// The next tighter level, saturating at [Precedence::Parenthesis].
    pub fn next(self) -> Precedence {
        num_traits::FromPrimitive::from_u32(self as u32 + 1).unwrap_or(Precedence::Parenthesis)
    }
}

/// Qualifiers attached to a definition with `{ ... }`, plus the layout values translators add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttribQualifier {
    Color,
    Depth,
    Ssbo,
    Readonly,
    Writeonly,
    Rgba8,
    Rgba16f,

    Location,
    Binding,
    Std140,
    Std430,
    Set,
    Offset,
    InputAttachmentIndex,
}
impl AttribQualifier {
    pub fn ksl_name(self) -> &'static str {
        use AttribQualifier::*;
        match self {
            Color => "color",
            Depth => "depth",
            Ssbo => "ssbo",
            Readonly => "readonly",
            Writeonly => "writeonly",
            Rgba8 => "rgba8",
            Rgba16f => "rgba16f",
            Location => "location",
            Binding => "binding",
            Std140 => "std140",
            Std430 => "std430",
            Set => "set",
            Offset => "offset",
            InputAttachmentIndex => "input_attachment_index",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub flags: BTreeSet<AttribQualifier>,
    pub values: BTreeMap<AttribQualifier, u32>,
}
impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.flags.len() + self.values.len()
    }

    pub fn has(&self, q: AttribQualifier) -> bool {
        self.flags.contains(&q)
    }

    pub fn value(&self, q: AttribQualifier) -> Option<u32> {
        self.values.get(&q).copied()
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub ty: KslType,
    pub orig_name: String,
    pub new_name: String,
    pub storage: StorageQualifier,
    pub access: Access,
    pub used: bool,
}
impl Variable {
    pub fn new(name: impl Into<String>, ty: KslType) -> Self {
        let name = name.into();
        Self {
            ty,
            new_name: name.clone(),
            orig_name: name,
            storage: StorageQualifier::Default,
            access: Access::ReadWrite,
            used: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub return_type: KslType,
    pub param_types: Vec<KslType>,
    pub param_access: Vec<ParamAccess>,
}
impl Function {
    pub fn new(name: impl Into<String>, return_type: KslType, param_types: Vec<KslType>) -> Self {
        let param_access = vec![ParamAccess::In; param_types.len()];
        Self {
            name: name.into(),
            return_type,
            param_types,
            param_access,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Float(f64),
    Int(u64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub value: LiteralValue,
    /// Source spelling, printed verbatim where possible.
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Literal(Literal),
    Variable(VarId),
    Constructor {
        ty: KslType,
        args: Vec<ExprId>,
    },
    MemberAccess {
        base: ExprId,
        selector: String,
    },
    ArrayAccess {
        base: ExprId,
        index: ExprId,
    },
    Parenthesis(ExprId),
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Suffix {
        op: UnaryOp,
        operand: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    FunctionCall {
        function: FuncId,
        name: String,
        args: Vec<ExprId>,
    },
    Ternary {
        condition: ExprId,
        if_true: ExprId,
        if_false: ExprId,
    },
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub ty: KslType,
    pub precedence: Precedence,
    pub l_value: bool,
    pub constant_value: bool,
    /// Outcome of the first validation, later validations return it unchanged.
    pub validated: Option<bool>,
    pub line: u32,
    pub column: u32,
}
impl Expression {
    pub fn new(kind: ExpressionKind, precedence: Precedence, line: u32, column: u32) -> Self {
        Self {
            kind,
            ty: KslType::invalid(),
            precedence,
            l_value: false,
            constant_value: false,
            validated: None,
            line,
            column,
        }
    }

    /// Direct sub expressions, in source order.
    pub fn children(&self) -> Vec<ExprId> {
        match &self.kind {
            ExpressionKind::Literal(_) | ExpressionKind::Variable(_) => vec![],
            ExpressionKind::Constructor { args, .. } | ExpressionKind::FunctionCall { args, .. } => {
                args.clone()
            }
            ExpressionKind::MemberAccess { base, .. } => vec![*base],
            ExpressionKind::ArrayAccess { base, index } => vec![*base, *index],
            ExpressionKind::Parenthesis(e) => vec![*e],
            ExpressionKind::Unary { operand, .. } | ExpressionKind::Suffix { operand, .. } => {
                vec![*operand]
            }
            ExpressionKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            ExpressionKind::Ternary {
                condition,
                if_true,
                if_false,
            } => vec![*condition, *if_true, *if_false],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DefinedVariable {
    pub id: VarId,
    pub size: Option<ExprId>,
    /// Evaluated `size`, filled in for uniform arrays during reflection.
    pub array_size: Option<u32>,
    pub init: Vec<ExprId>,
}

#[derive(Debug, Clone)]
pub struct VariableDefinitions {
    pub storage: StorageQualifier,
    /// Declared type. For arrays this is the element type.
    pub ty: KslType,
    pub variables: Vec<DefinedVariable>,
    pub attributes: Attributes,
}
impl VariableDefinitions {
    /// The variable of a single-variable (interface) definition.
    pub fn first_id(&self) -> Option<VarId> {
        self.variables.first().map(|v| v.id)
    }

    pub fn has_class(&self, class: TypeClass) -> bool {
        class.intersects(self.ty.type_class())
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub id: VarId,
    pub size: Option<ExprId>,
}

/// Resources a translator moved into the signature of the entry point.
#[derive(Debug, Clone, Default)]
pub struct EntryPoint {
    pub resources: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub id: FuncId,
    pub params: Vec<Parameter>,
    pub body: Vec<Node>,
    /// Set once a translator has turned `main` into the backend entry point.
    pub entry: Option<EntryPoint>,
}

#[derive(Debug, Clone)]
pub struct ForLoop {
    pub init: Option<Node>,
    pub condition: Option<ExprId>,
    pub step: Option<ExprId>,
    pub body: Node,
    pub is_loop: bool,
}

#[derive(Debug, Clone)]
pub struct ImageDefinition {
    pub id: VarId,
    pub attributes: Attributes,
}

#[derive(Debug, Clone)]
pub struct StructDefinition {
    pub name: String,
    pub members: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Input,
    Output,
    Uniforms(UniformGroup),
    PushConstants,
}

/// A struct-like aggregate synthesized by a translator.
#[derive(Debug, Clone)]
pub struct InterfaceBlock {
    pub kind: InterfaceKind,
    pub name: String,
    /// Single-variable definitions.
    pub members: Vec<Node>,
    /// Per member semantic or attribute text, parallel to `members`. Empty when unused.
    pub semantics: Vec<String>,
    pub binding: Option<u32>,
    pub set: Option<u32>,
}
impl InterfaceBlock {
    pub fn new(kind: InterfaceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            members: vec![],
            semantics: vec![],
            binding: None,
            set: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    VariableDefinitions(VariableDefinitions),
    Function(FunctionDefinition),
    Block(Vec<Node>),
    Expression(ExprId),
    Empty,
    If {
        condition: ExprId,
        then_branch: Box<Node>,
        else_branch: Option<Box<Node>>,
    },
    For(Box<ForLoop>),
    Return(Option<ExprId>),
    Break,
    Continue,
    Discard,
    ImageDefinition(ImageDefinition),
    NumThreads([u32; 3]),
    StructDefinition(StructDefinition),
    InterfaceBlock(InterfaceBlock),
    /// Declaration of the entry point's output aggregate.
    EntryOutputDefinition,
}
impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::VariableDefinitions(_) => "variable definitions",
            NodeKind::Function(_) => "function",
            NodeKind::Block(_) => "block",
            NodeKind::Expression(_) => "expression statement",
            NodeKind::Empty => "empty statement",
            NodeKind::If { .. } => "if",
            NodeKind::For(_) => "for",
            NodeKind::Return(_) => "return",
            NodeKind::Break => "break",
            NodeKind::Continue => "continue",
            NodeKind::Discard => "discard",
            NodeKind::ImageDefinition(_) => "image definition",
            NodeKind::NumThreads(_) => "numthreads",
            NodeKind::StructDefinition(_) => "struct definition",
            NodeKind::InterfaceBlock(_) => "interface block",
            NodeKind::EntryOutputDefinition => "entry output definition",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub line: u32,
    pub column: u32,
}
impl Node {
    pub fn new(kind: NodeKind, line: u32, column: u32) -> Self {
        Self { kind, line, column }
    }

    pub fn as_variable_definitions(&self) -> Option<&VariableDefinitions> {
        match &self.kind {
            NodeKind::VariableDefinitions(vd) => Some(vd),
            _ => None,
        }
    }

    pub fn as_variable_definitions_mut(&mut self) -> Option<&mut VariableDefinitions> {
        match &mut self.kind {
            NodeKind::VariableDefinitions(vd) => Some(vd),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionDefinition> {
        match &self.kind {
            NodeKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionDefinition> {
        match &mut self.kind {
            NodeKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// True for a top level definition with the given storage whose declared type is in `class`.
    pub fn is_definition_of(&self, storage: StorageQualifier, class: TypeClass) -> bool {
        self.as_variable_definitions()
            .map(|vd| vd.storage == storage && vd.has_class(class))
            .unwrap_or(false)
    }

    /// Expressions owned directly by this node, not including those of child nodes.
    pub fn expressions(&self) -> Vec<ExprId> {
        match &self.kind {
            NodeKind::VariableDefinitions(vd) => vd
                .variables
                .iter()
                .flat_map(|v| v.size.iter().chain(v.init.iter()).copied())
                .collect(),
            NodeKind::Function(f) => f.params.iter().filter_map(|p| p.size).collect(),
            NodeKind::Expression(e) => vec![*e],
            NodeKind::If { condition, .. } => vec![*condition],
            NodeKind::For(f) => f.condition.iter().chain(f.step.iter()).copied().collect(),
            NodeKind::Return(e) => e.iter().copied().collect(),
            _ => vec![],
        }
    }

    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Function(f) => {
                let mut c: Vec<&Node> = f.body.iter().collect();
                if let Some(entry) = &f.entry {
                    c.extend(entry.resources.iter());
                }
                c
            }
            NodeKind::Block(nodes) => nodes.iter().collect(),
            NodeKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                let mut c = vec![then_branch.as_ref()];
                if let Some(e) = else_branch {
                    c.push(e.as_ref());
                }
                c
            }
            NodeKind::For(f) => {
                let mut c = vec![];
                if let Some(init) = &f.init {
                    c.push(init);
                }
                c.push(&f.body);
                c
            }
            NodeKind::StructDefinition(s) => s.members.iter().collect(),
            NodeKind::InterfaceBlock(b) => b.members.iter().collect(),
            _ => vec![],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        match &mut self.kind {
            NodeKind::Function(f) => {
                let mut c: Vec<&mut Node> = f.body.iter_mut().collect();
                if let Some(entry) = &mut f.entry {
                    c.extend(entry.resources.iter_mut());
                }
                c
            }
            NodeKind::Block(nodes) => nodes.iter_mut().collect(),
            NodeKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                let mut c = vec![then_branch.as_mut()];
                if let Some(e) = else_branch {
                    c.push(e.as_mut());
                }
                c
            }
            NodeKind::For(f) => {
                let f = f.as_mut();
                let mut c = vec![];
                if let Some(init) = &mut f.init {
                    c.push(init);
                }
                c.push(&mut f.body);
                c
            }
            NodeKind::StructDefinition(s) => s.members.iter_mut().collect(),
            NodeKind::InterfaceBlock(b) => b.members.iter_mut().collect(),
            _ => vec![],
        }
    }
}

/// Pre-order walk over `node` and all of its descendants.
pub fn walk_nodes<'a>(node: &'a Node, f: &mut impl FnMut(&'a Node)) {
    f(node);
    for c in node.children() {
        walk_nodes(c, f);
    }
}

pub fn walk_nodes_mut(node: &mut Node, f: &mut impl FnMut(&mut Node)) {
    f(node);
    for c in node.children_mut() {
        walk_nodes_mut(c, f);
    }
}

#[derive(Debug, Clone)]
pub struct UserType {
    pub name: String,
    pub members: Vec<VarId>,
}

/// Indices of the stage's inbuilt variables.
#[derive(Debug, Clone, Default)]
pub struct Inbuilts {
    pub vertex_position: Option<VarId>,
    pub vertex_id: Option<VarId>,
    pub global_invocation_id: Option<VarId>,
    pub local_invocation_index: Option<VarId>,
    pub local_invocation_id: Option<VarId>,
    pub work_group_id: Option<VarId>,
    pub frag_coord: Option<VarId>,
    pub front_facing: Option<VarId>,
}
impl Inbuilts {
    /// Inbuilts that non-entry functions receive as parameters.
    pub fn passed_to_functions(&self, stage: ShaderStage) -> Vec<VarId> {
        let ids = match stage {
            ShaderStage::Vertex => vec![self.vertex_id],
            ShaderStage::Fragment => vec![self.frag_coord, self.front_facing],
            ShaderStage::Compute => vec![
                self.global_invocation_id,
                self.local_invocation_index,
                self.local_invocation_id,
                self.work_group_id,
            ],
            _ => vec![],
        };
        ids.into_iter().flatten().collect()
    }
}

#[derive(Debug, Clone)]
pub struct ProgramAst {
    pub stage: ShaderStage,
    pub root: Vec<Node>,
    pub variables: Vec<Variable>,
    pub functions: Vec<Function>,
    pub expressions: Vec<Expression>,
    pub user_types: Vec<UserType>,

    pub in_attributes: Vec<VarId>,
    pub out_attributes: Vec<VarId>,
    pub uniforms: Vec<VarId>,
    pub buffers: Vec<VarId>,
    pub readonly_buffers: Vec<VarId>,
    pub readonly_images: Vec<VarId>,
    pub num_threads: Option<[u32; 3]>,

    pub inbuilts: Inbuilts,
    pub force_highp: bool,
    pub has_discard: bool,
}

impl ProgramAst {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            root: vec![],
            variables: vec![],
            functions: vec![],
            expressions: vec![],
            user_types: vec![],
            in_attributes: vec![],
            out_attributes: vec![],
            uniforms: vec![],
            buffers: vec![],
            readonly_buffers: vec![],
            readonly_images: vec![],
            num_threads: None,
            inbuilts: Inbuilts::default(),
            force_highp: false,
            has_discard: false,
        }
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.variables[id as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.variables[id as usize]
    }

    pub fn expr(&self, id: ExprId) -> &Expression {
        &self.expressions[id as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expression {
        &mut self.expressions[id as usize]
    }

    pub fn push_expression(&mut self, e: Expression) -> ExprId {
        self.expressions.push(e);
        (self.expressions.len() - 1) as ExprId
    }

    pub fn push_variable(&mut self, v: Variable) -> VarId {
        self.variables.push(v);
        (self.variables.len() - 1) as VarId
    }

    /// Index of `main` in [ProgramAst::root].
    pub fn main_function_index(&self) -> Option<usize> {
        self.root.iter().position(|n| {
            n.as_function()
                .map(|f| self.functions[f.id as usize].name == "main")
                .unwrap_or(false)
        })
    }

    /// Removes the top level nodes matching `pred` and returns them in order.
    pub fn drain_root(&mut self, mut pred: impl FnMut(&Node) -> bool) -> Vec<Node> {
        let mut taken = vec![];
        let mut kept = vec![];
        for n in std::mem::take(&mut self.root) {
            if pred(&n) {
                taken.push(n);
            } else {
                kept.push(n);
            }
        }
        self.root = kept;
        taken
    }

    /// Variables of top level definitions with the given storage and declared type class.
    pub fn definition_ids(&self, storage: StorageQualifier, class: TypeClass) -> Vec<VarId> {
        self.root
            .iter()
            .filter(|n| n.is_definition_of(storage, class))
            .filter_map(|n| n.as_variable_definitions())
            .flat_map(|vd| vd.variables.iter().map(|v| v.id))
            .collect()
    }

    pub fn image_ids(&self) -> Vec<VarId> {
        self.root
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::ImageDefinition(img) => Some(img.id),
                _ => None,
            })
            .collect()
    }

    /// Calls `f` for every expression reachable from `id`, parents before children.
    pub fn walk_expression(&self, id: ExprId, f: &mut impl FnMut(ExprId, &Expression)) {
        let e = self.expr(id);
        f(id, e);
        for c in e.children() {
            self.walk_expression(c, f);
        }
    }

    /// Calls `f` for every expression in `node` and its descendants.
    pub fn walk_node_expressions(&self, node: &Node, f: &mut impl FnMut(ExprId, &Expression)) {
        walk_nodes(node, &mut |n| {
            for e in n.expressions() {
                self.walk_expression(e, f);
            }
        });
    }

    /// KSL spelling of `ty`, with user types printed by name.
    pub fn type_name(&self, ty: &KslType) -> String {
        match ty.id {
            TypeId::User(i) => self
                .user_types
                .get(i as usize)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| ty.to_string()),
            TypeId::Array => match &ty.base {
                Some(b) => format!("{}[]", self.type_name(b)),
                None => ty.to_string(),
            },
            _ => ty.to_string(),
        }
    }

    /// Sets every medium and low precision in the program to high.
    pub fn promote_precisions(&mut self) {
        fn promote(ty: &mut KslType) {
            if matches!(ty.precision, Precision::Medium | Precision::Low) {
                ty.precision = Precision::High;
            }
            if let Some(b) = &mut ty.base {
                promote(b);
            }
        }

        for v in &mut self.variables {
            promote(&mut v.ty);
        }
        for f in &mut self.functions {
            promote(&mut f.return_type);
            f.param_types.iter_mut().for_each(promote);
        }
        for e in &mut self.expressions {
            promote(&mut e.ty);
            if let ExpressionKind::Constructor { ty, .. } = &mut e.kind {
                promote(ty);
            }
        }
        for n in &mut self.root {
            walk_nodes_mut(n, &mut |n| {
                if let NodeKind::VariableDefinitions(vd) = &mut n.kind {
                    promote(&mut vd.ty);
                }
            });
        }
    }
}

/// Wrapper for printing an expression subtree in KSL syntax, for logs and debugging.
pub struct DWrap<'a>(pub &'a ProgramAst, pub ExprId);
impl<'a> Display for DWrap<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ast = self.0;
        let e = ast.expr(self.1);
        match &e.kind {
            ExpressionKind::Literal(l) => write!(f, "{}", l.text),
            ExpressionKind::Variable(v) if *v == UNRESOLVED => write!(f, "<unresolved>"),
            ExpressionKind::Variable(v) => write!(f, "{}", ast.var(*v).new_name),
            ExpressionKind::Constructor { args, .. } | ExpressionKind::FunctionCall { args, .. } => {
                match &e.kind {
                    ExpressionKind::FunctionCall { name, .. } => write!(f, "{}(", name)?,
                    ExpressionKind::Constructor { ty, .. } => write!(f, "{}(", ast.type_name(ty))?,
                    _ => {}
                }
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", DWrap(ast, *a))?;
                }
                write!(f, ")")
            }
            ExpressionKind::MemberAccess { base, selector } => {
                write!(f, "{}.{}", DWrap(ast, *base), selector)
            }
            ExpressionKind::ArrayAccess { base, index } => {
                write!(f, "{}[{}]", DWrap(ast, *base), DWrap(ast, *index))
            }
            ExpressionKind::Parenthesis(inner) => write!(f, "({})", DWrap(ast, *inner)),
            ExpressionKind::Unary { op, operand } => {
                write!(f, "{}{}", op.prefix_str().trim_start(), DWrap(ast, *operand))
            }
            ExpressionKind::Suffix { op, operand } => write!(
                f,
                "{}{}",
                DWrap(ast, *operand),
                op.prefix_str().trim_start()
            ),
            ExpressionKind::Binary { op, lhs, rhs } => write!(
                f,
                "{}{}{}",
                DWrap(ast, *lhs),
                op.as_str(),
                DWrap(ast, *rhs)
            ),
            ExpressionKind::Ternary {
                condition,
                if_true,
                if_false,
            } => write!(
                f,
                "{} ? {} : {}",
                DWrap(ast, *condition),
                DWrap(ast, *if_true),
                DWrap(ast, *if_false)
            ),
        }
    }
}
