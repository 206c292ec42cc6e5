//! Rewrites an analyzed [ProgramAst] into the shape a backend generator prints.
//!
//! The pipeline itself is shared: a [Translator] owns the state every backend needs (stage,
//! target, uniform group metadata, accumulated diagnostics, per function global usage) and
//! hands the tree to a [TargetStrategy], which decides how interface variables are grouped,
//! where resources are bound, and what the entry point looks like.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;

use log::debug;

use crate::ast::{
    DefinedVariable, Node, NodeKind, ProgramAst, StorageQualifier, VariableDefinitions,
};
use crate::common::{ShaderStage, ShaderUniform, TargetApi, TypeClass, UniformGroup};
use crate::error::{has_errors, Diagnostic, Phase};

pub mod d3d;
pub mod gl;
pub mod metal;
pub mod usage;
pub mod vulkan;

pub use usage::{collect_global_usage, GlobalUsage};

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Vulkan: declare subpass inputs as input attachments instead of plain samplers.
    /// Metal: keep fragment color indices as written instead of compacting them.
    pub use_subpass: bool,
    /// Byte budget of the Vulkan push constant block.
    pub push_constant_bytes: u32,
}
impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            use_subpass: true,
            push_constant_bytes: 128,
        }
    }
}

/// Backend independent state a strategy reads and reports into.
#[derive(Debug)]
pub struct TranslateContext {
    pub stage: ShaderStage,
    pub api: TargetApi,
    pub use_subpass: bool,
    uniform_info: Option<Vec<ShaderUniform>>,
    pub global_usage: BTreeMap<String, GlobalUsage>,
    diagnostics: Vec<Diagnostic>,
}

impl TranslateContext {
    pub fn new(api: TargetApi, stage: ShaderStage, use_subpass: bool) -> Self {
        Self {
            stage,
            api,
            use_subpass,
            uniform_info: None,
            global_usage: BTreeMap::new(),
            diagnostics: vec![],
        }
    }

    pub fn uniform_info(&self) -> Option<&[ShaderUniform]> {
        self.uniform_info.as_deref()
    }

    /// Reports an error if the host never supplied uniform group metadata.
    pub fn require_uniform_info(&mut self) -> bool {
        if self.uniform_info.is_none() {
            self.error("Uniform info not set");
            return false;
        }
        true
    }

    /// Group of the uniform named `name`, reporting an error if the host did not describe it.
    pub fn uniform_group(&mut self, name: &str) -> Option<UniformGroup> {
        let group = self
            .uniform_info
            .as_ref()
            .and_then(|info| info.iter().find(|u| u.name == name))
            .map(|u| u.group);
        if group.is_none() {
            self.error(format!("Uniform info not set for: {}", name));
        }
        group
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(Phase::Translator, 0, 0, message));
    }

    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    /// Computes [GlobalUsage] for every non-entry function of `ast`.
    pub fn collect_global_usage(&mut self, ast: &ProgramAst) {
        let info = self.uniform_info.as_deref().unwrap_or(&[]);
        self.global_usage = collect_global_usage(ast, info);
    }
}

/// The backend specific part of translation.
pub trait TargetStrategy: Any + Debug {
    /// Rewrites `ast` in place. Returns false if an error was reported into `cx`.
    fn translate(&mut self, ast: &mut ProgramAst, cx: &mut TranslateContext) -> bool;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug)]
pub struct Translator {
    cx: TranslateContext,
    strategy: Box<dyn TargetStrategy>,
}

impl Translator {
    /// Creates the translator of `api`'s backend family.
    pub fn new(api: TargetApi, stage: ShaderStage, config: TranslatorConfig) -> Self {
        let strategy: Box<dyn TargetStrategy> = match api {
            TargetApi::OpenGL | TargetApi::OpenGLES => Box::new(gl::GlTarget::default()),
            TargetApi::Vulkan => Box::new(vulkan::VulkanTarget::new(config.push_constant_bytes)),
            TargetApi::D3D11 | TargetApi::D3D12 => Box::new(d3d::D3dTarget::default()),
            TargetApi::MetalIOS | TargetApi::MetalMacOS => Box::new(metal::MetalTarget::default()),
        };
        Self::with_strategy(api, stage, config, strategy)
    }

    pub fn with_strategy(
        api: TargetApi,
        stage: ShaderStage,
        config: TranslatorConfig,
        strategy: Box<dyn TargetStrategy>,
    ) -> Self {
        Self {
            cx: TranslateContext::new(api, stage, config.use_subpass),
            strategy,
        }
    }

    pub fn set_uniform_info(&mut self, info: Vec<ShaderUniform>) {
        self.cx.uniform_info = Some(info);
    }

    /// Runs the backend passes over `ast`. Does nothing if errors were already reported.
    pub fn translate(&mut self, ast: &mut ProgramAst) -> bool {
        if self.cx.has_errors() {
            return false;
        }
        debug!("translating {:?} stage for {:?}", self.cx.stage, self.cx.api);
        let ok = self.strategy.translate(ast, &mut self.cx);
        ok && !self.cx.has_errors()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.cx.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.cx.diagnostics)
    }

    pub fn global_usage(&self) -> &BTreeMap<String, GlobalUsage> {
        &self.cx.global_usage
    }

    pub fn stage(&self) -> ShaderStage {
        self.cx.stage
    }

    pub fn api(&self) -> TargetApi {
        self.cx.api
    }

    pub fn use_subpass(&self) -> bool {
        self.cx.use_subpass
    }

    pub fn strategy_mut<T: TargetStrategy>(&mut self) -> Option<&mut T> {
        self.strategy.as_any_mut().downcast_mut::<T>()
    }

    pub(crate) fn split_mut<T: TargetStrategy>(
        &mut self,
    ) -> Option<(&mut T, &mut TranslateContext)> {
        let strategy = self.strategy.as_any_mut().downcast_mut::<T>()?;
        Some((strategy, &mut self.cx))
    }
}

/// Renames the inner array of every buffer so the block itself can keep the original name.
pub fn rename_buffer_inner_data(ast: &mut ProgramAst) {
    for id in ast.definition_ids(StorageQualifier::Buffer, TypeClass::ALL) {
        let v = ast.var_mut(id);
        v.new_name = format!("{}_data__", v.orig_name);
    }
}

/// A definition of the vertex position inbuilt, now an output of the stage.
pub fn position_definition(ast: &mut ProgramAst) -> Option<Node> {
    let id = ast.inbuilts.vertex_position?;
    let v = ast.var_mut(id);
    v.storage = StorageQualifier::Out;
    let vd = VariableDefinitions {
        storage: StorageQualifier::Out,
        ty: v.ty.clone(),
        variables: vec![DefinedVariable {
            id,
            size: None,
            array_size: None,
            init: vec![],
        }],
        attributes: Default::default(),
    };
    Some(Node::new(NodeKind::VariableDefinitions(vd), 0, 0))
}

/// True for a plain data uniform, the kind that ends up in a uniform block.
pub fn is_block_uniform(node: &Node) -> bool {
    node.is_definition_of(
        StorageQualifier::Uniform,
        TypeClass::NUMERIC | TypeClass::BOOL,
    )
}

/// Moves the data uniforms out of the root into `(group, definition)` pairs, reporting
/// uniforms the host did not describe.
pub(crate) fn take_block_uniforms(
    ast: &mut ProgramAst,
    cx: &mut TranslateContext,
) -> Vec<(UniformGroup, Node)> {
    let mut grouped = vec![];
    for mut node in ast.drain_root(is_block_uniform) {
        let Some(id) = node.as_variable_definitions().and_then(|vd| vd.first_id()) else {
            continue;
        };
        let name = ast.var(id).orig_name.clone();
        if let Some(group) = cx.uniform_group(&name) {
            node.line = 0;
            if let Some(vd) = node.as_variable_definitions_mut() {
                vd.storage = StorageQualifier::Default;
            }
            grouped.push((group, node));
        }
    }
    grouped
}
