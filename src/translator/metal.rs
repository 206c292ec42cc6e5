//! Metal: there is no global resource scope, so stage IO becomes `stage_in`/return structs,
//! data uniforms become per group constant structs, and every other resource moves into the
//! entry point signature.

use std::any::Any;
use std::collections::BTreeMap;

use log::trace;

use crate::ast::{
    AttribQualifier, EntryPoint, InterfaceBlock, InterfaceKind, Node, NodeKind, ProgramAst,
    StorageQualifier, VarId,
};
use crate::common::{ShaderStage, TypeClass, UniformGroup};

use super::{position_definition, take_block_uniforms, TargetStrategy, TranslateContext};

pub const INPUT_LAYOUT: &str = "ksl_mtl_input_layout__";
pub const OUTPUT_LAYOUT: &str = "ksl_mtl_output_layout__";
pub const INPUT_NAME: &str = "in";
pub const OUTPUT_NAME: &str = "out";
pub const SAMPLER_SUFFIX: &str = "_sampler__";
/// Appended to resources that non-entry functions receive as parameters.
pub const GLOBAL_SUFFIX: &str = "_global__";
/// First buffer slot after the uniform group structs.
pub const FIRST_BUFFER_BINDING: u32 = 4;

/// Name of the struct type holding a uniform group.
pub fn group_type_name(group: UniformGroup) -> &'static str {
    match group {
        UniformGroup::PerDraw => "ksl_mtl_per_draw_uniforms_type__",
        UniformGroup::PerRendererChange => "ksl_mtl_per_renderer_change_uniforms_type__",
        UniformGroup::Manual => "ksl_mtl_manual_uniforms_type__",
    }
}

/// Name of the parameter through which a uniform group struct is accessed.
pub fn group_variable_name(group: UniformGroup) -> &'static str {
    match group {
        UniformGroup::PerDraw => "_ksl_mtl_per_draw_uniforms_",
        UniformGroup::PerRendererChange => "_ksl_mtl_per_renderer_change_uniforms_",
        UniformGroup::Manual => "_ksl_mtl_manual_uniforms_",
    }
}

pub fn group_buffer_binding(group: UniformGroup) -> u32 {
    match group {
        UniformGroup::PerDraw => 1,
        UniformGroup::PerRendererChange => 2,
        UniformGroup::Manual => 3,
    }
}

#[derive(Debug, Default)]
pub struct MetalTarget {
    has_input_interface: bool,
    has_output_interface: bool,
    has_uniform_block: [bool; 3],
    variable_groups: BTreeMap<VarId, UniformGroup>,
}

fn group_index(group: UniformGroup) -> usize {
    match group {
        UniformGroup::PerDraw => 0,
        UniformGroup::PerRendererChange => 1,
        UniformGroup::Manual => 2,
    }
}

impl MetalTarget {
    pub fn has_input_interface(&self) -> bool {
        self.has_input_interface
    }

    pub fn has_output_interface(&self) -> bool {
        self.has_output_interface
    }

    pub fn has_uniform_block(&self, group: UniformGroup) -> bool {
        self.has_uniform_block[group_index(group)]
    }

    /// Group of a data uniform, if the host described it.
    pub fn group_of(&self, id: VarId) -> Option<UniformGroup> {
        self.variable_groups.get(&id).copied()
    }

    pub fn variable_groups(&self) -> &BTreeMap<VarId, UniformGroup> {
        &self.variable_groups
    }

    /// Without framebuffer fetch the fragment outputs are renumbered to consecutive colors.
    fn shrink_fragment_output(&self, ast: &mut ProgramAst, cx: &TranslateContext) {
        if ast.stage != ShaderStage::Fragment || cx.use_subpass {
            return;
        }
        let mut colors: Vec<u32> = ast
            .root
            .iter()
            .filter(|n| n.is_definition_of(StorageQualifier::Out, TypeClass::ALL))
            .filter_map(|n| n.as_variable_definitions())
            .filter_map(|vd| vd.attributes.value(AttribQualifier::Color))
            .collect();
        colors.sort_unstable();
        colors.dedup();
        for node in ast.root.iter_mut() {
            if !node.is_definition_of(StorageQualifier::Out, TypeClass::ALL) {
                continue;
            }
            if let Some(vd) = node.as_variable_definitions_mut() {
                let Some(color) = vd.attributes.value(AttribQualifier::Color) else {
                    continue;
                };
                if let Ok(rank) = colors.binary_search(&color) {
                    vd.attributes
                        .values
                        .insert(AttribQualifier::Color, rank as u32);
                }
            }
        }
    }

    fn collect_attributes(&mut self, ast: &mut ProgramAst) {
        self.has_input_interface = false;
        self.has_output_interface = false;
        if ast.stage == ShaderStage::Compute {
            return;
        }

        let mut input = InterfaceBlock::new(InterfaceKind::Input, INPUT_LAYOUT);
        let mut output = InterfaceBlock::new(InterfaceKind::Output, OUTPUT_LAYOUT);
        if ast.stage == ShaderStage::Vertex {
            if let Some(position) = position_definition(ast) {
                output.members.push(position);
                output.semantics.push("position".to_string());
            }
        }

        for mut node in ast.drain_root(|n| {
            n.as_variable_definitions()
                .map(|vd| matches!(vd.storage, StorageQualifier::In | StorageQualifier::Out))
                .unwrap_or(false)
        }) {
            node.line = 0;
            let Some(vd) = node.as_variable_definitions() else {
                continue;
            };
            let Some(id) = vd.first_id() else {
                continue;
            };
            let name = &ast.var(id).new_name;
            if vd.storage == StorageQualifier::In {
                let semantic = match ast.stage {
                    ShaderStage::Vertex => {
                        let slot = ast.in_attributes.iter().position(|a| *a == id).unwrap_or(0);
                        format!("attribute({})", slot)
                    }
                    _ => format!("user({})", name),
                };
                input.semantics.push(semantic);
                input.members.push(node);
            } else {
                let semantic = match ast.stage {
                    ShaderStage::Fragment => format!(
                        "color({})",
                        vd.attributes.value(AttribQualifier::Color).unwrap_or(0)
                    ),
                    _ => format!("user({})", name),
                };
                output.semantics.push(semantic);
                output.members.push(node);
            }
        }

        if !output.members.is_empty() {
            self.has_output_interface = true;
            ast.root
                .insert(0, Node::new(NodeKind::InterfaceBlock(output), 0, 0));
        }
        if !input.members.is_empty() {
            self.has_input_interface = true;
            ast.root
                .insert(0, Node::new(NodeKind::InterfaceBlock(input), 0, 0));
        }
    }

    fn collect_uniforms(&mut self, ast: &mut ProgramAst, cx: &mut TranslateContext) {
        self.variable_groups.clear();
        self.has_uniform_block = [false; 3];

        let mut groups = BTreeMap::new();
        for (id, v) in ast.variables.iter().enumerate() {
            if v.storage == StorageQualifier::Uniform && !v.ty.base_type().is_sampler() {
                groups.insert(id as VarId, v.orig_name.clone());
            }
        }
        for (id, name) in groups {
            let known = cx
                .uniform_info()
                .and_then(|info| info.iter().find(|u| u.name == name))
                .map(|u| u.group);
            if let Some(g) = known {
                self.variable_groups.insert(id, g);
            }
        }

        let mut blocks: Vec<InterfaceBlock> = UniformGroup::ALL
            .iter()
            .map(|g| {
                let mut b = InterfaceBlock::new(InterfaceKind::Uniforms(*g), group_type_name(*g));
                b.binding = Some(group_buffer_binding(*g));
                b
            })
            .collect();
        for (group, node) in take_block_uniforms(ast, cx) {
            self.has_uniform_block[group_index(group)] = true;
            blocks[group_index(group)].members.push(node);
        }
        for b in blocks.into_iter().rev().filter(|b| !b.members.is_empty()) {
            trace!("uniform struct {} with {} members", b.name, b.members.len());
            ast.root.insert(0, Node::new(NodeKind::InterfaceBlock(b), 0, 0));
        }
    }

    fn create_main(&self, ast: &mut ProgramAst, cx: &mut TranslateContext) {
        let is_resource = |n: &Node| match &n.kind {
            NodeKind::VariableDefinitions(vd) => match vd.storage {
                StorageQualifier::Uniform => vd.ty.is_sampler() || vd.ty.is_subpass_input(),
                StorageQualifier::Buffer => true,
                _ => false,
            },
            NodeKind::ImageDefinition(_) => true,
            _ => false,
        };
        let resources = ast.drain_root(is_resource);
        let shared = if ast.stage == ShaderStage::Compute {
            ast.drain_root(|n| n.is_definition_of(StorageQualifier::Shared, TypeClass::ALL))
        } else {
            vec![]
        };

        let Some(index) = ast.main_function_index() else {
            cx.error("main function not found");
            return;
        };
        let stage = ast.stage;
        let has_output = self.has_output_interface;
        if let Some(main) = ast.root[index].as_function_mut() {
            main.entry = Some(EntryPoint { resources });
            if stage == ShaderStage::Compute {
                for (i, node) in shared.into_iter().enumerate() {
                    main.body.insert(i, node);
                }
            } else {
                if has_output {
                    main.body
                        .insert(0, Node::new(NodeKind::EntryOutputDefinition, 0, 0));
                }
                main.body.push(Node::new(NodeKind::Return(None), 0, 0));
            }
        }
    }
}

impl TargetStrategy for MetalTarget {
    fn translate(&mut self, ast: &mut ProgramAst, cx: &mut TranslateContext) -> bool {
        self.shrink_fragment_output(ast, cx);
        self.collect_attributes(ast);
        if !cx.require_uniform_info() {
            return false;
        }
        self.collect_uniforms(ast, cx);
        cx.collect_global_usage(ast);
        self.create_main(ast, cx);
        !cx.has_errors()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
