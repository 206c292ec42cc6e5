//! Direct3D 11/12: stage inputs and outputs become structs passed to and returned from the
//! entry point, data uniforms become constant buffers.

use std::any::Any;

use log::trace;

use crate::ast::{
    AttribQualifier, EntryPoint, InterfaceBlock, InterfaceKind, Node, NodeKind, ProgramAst,
    StorageQualifier,
};
use crate::common::{ShaderStage, UniformGroup};

use super::{position_definition, take_block_uniforms, TargetStrategy, TranslateContext};

pub const INPUT_LAYOUT: &str = "ksl_d3d_input_layout__";
pub const OUTPUT_LAYOUT: &str = "ksl_d3d_output_layout__";
pub const INPUT_NAME: &str = "input";
pub const OUTPUT_NAME: &str = "output";
pub const SAMPLER_SUFFIX: &str = "_sampler__";

/// Constant buffer register of a uniform group.
pub fn constant_buffer_binding(group: UniformGroup) -> u32 {
    match group {
        UniformGroup::PerDraw => 0,
        UniformGroup::PerRendererChange => 1,
        UniformGroup::Manual => 2,
    }
}

#[derive(Debug, Default)]
pub struct D3dTarget {
    has_input_interface: bool,
    has_output_interface: bool,
}

impl D3dTarget {
    pub fn has_input_interface(&self) -> bool {
        self.has_input_interface
    }

    pub fn has_output_interface(&self) -> bool {
        self.has_output_interface
    }

    fn collect_attributes(&mut self, ast: &mut ProgramAst) {
        self.has_input_interface = false;
        self.has_output_interface = false;
        if ast.stage == ShaderStage::Compute {
            return;
        }

        let mut inputs = vec![];
        let mut outputs = vec![];
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
            let name = ast.var(id).orig_name.clone();
            if vd.storage == StorageQualifier::In {
                inputs.push((name.clone(), node, name));
            } else {
                let semantic = if ast.stage == ShaderStage::Fragment {
                    format!(
                        "SV_TARGET{}",
                        vd.attributes.value(AttribQualifier::Color).unwrap_or(0)
                    )
                } else {
                    name.clone()
                };
                outputs.push((name, node, semantic));
            }
        }
        inputs.sort_by(|a, b| a.0.cmp(&b.0));
        outputs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut input = InterfaceBlock::new(InterfaceKind::Input, INPUT_LAYOUT);
        let mut output = InterfaceBlock::new(InterfaceKind::Output, OUTPUT_LAYOUT);
        for (_, node, semantic) in inputs {
            input.members.push(node);
            input.semantics.push(semantic);
        }
        for (_, node, semantic) in outputs {
            output.members.push(node);
            output.semantics.push(semantic);
        }
        if ast.stage == ShaderStage::Vertex {
            if let Some(position) = position_definition(ast) {
                output.members.push(position);
                output.semantics.push("SV_POSITION".to_string());
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

    fn create_uniform_blocks(&self, ast: &mut ProgramAst, cx: &mut TranslateContext) {
        let mut blocks: Vec<InterfaceBlock> = UniformGroup::ALL
            .iter()
            .map(|g| {
                let binding = constant_buffer_binding(*g);
                let mut b = InterfaceBlock::new(InterfaceKind::Uniforms(*g), format!("cb{}", binding));
                b.binding = Some(binding);
                b
            })
            .collect();
        for (group, node) in take_block_uniforms(ast, cx) {
            blocks[constant_buffer_binding(group) as usize]
                .members
                .push(node);
        }
        for b in blocks.into_iter().rev().filter(|b| !b.members.is_empty()) {
            trace!("constant buffer {} with {} members", b.name, b.members.len());
            ast.root.insert(0, Node::new(NodeKind::InterfaceBlock(b), 0, 0));
        }
    }

    /// Numbers shader resource views and unordered access views in declaration order.
    fn assign_registers(&self, ast: &mut ProgramAst) {
        let mut srv = 0;
        let mut uav = 0;
        for node in ast.root.iter_mut() {
            match &mut node.kind {
                NodeKind::VariableDefinitions(vd) => {
                    let writable = match vd.storage {
                        StorageQualifier::Buffer => {
                            vd.attributes.has(AttribQualifier::Ssbo)
                                && !vd.attributes.has(AttribQualifier::Readonly)
                        }
                        StorageQualifier::Uniform
                            if vd.ty.is_sampler() || vd.ty.is_subpass_input() =>
                        {
                            false
                        }
                        _ => continue,
                    };
                    let counter = if writable { &mut uav } else { &mut srv };
                    vd.attributes.values.insert(AttribQualifier::Binding, *counter);
                    *counter += 1;
                }
                NodeKind::ImageDefinition(img) => {
                    img.attributes.values.insert(AttribQualifier::Binding, uav);
                    uav += 1;
                }
                _ => {}
            }
        }
    }

    fn create_main(&self, ast: &mut ProgramAst, cx: &mut TranslateContext) {
        let Some(index) = ast.main_function_index() else {
            cx.error("main function not found");
            return;
        };
        let has_output = self.has_output_interface;
        if let Some(main) = ast.root[index].as_function_mut() {
            main.entry = Some(EntryPoint::default());
            if has_output {
                main.body
                    .insert(0, Node::new(NodeKind::EntryOutputDefinition, 0, 0));
                main.body.push(Node::new(NodeKind::Return(None), 0, 0));
            }
        }
    }

    fn collect_num_threads(&self, ast: &mut ProgramAst, cx: &mut TranslateContext) {
        if ast.stage != ShaderStage::Compute {
            return;
        }
        let nodes = ast.drain_root(|n| matches!(n.kind, NodeKind::NumThreads(_)));
        if nodes.is_empty() || ast.num_threads.is_none() {
            cx.error("numthreads not found in compute shader");
        }
    }
}

impl TargetStrategy for D3dTarget {
    fn translate(&mut self, ast: &mut ProgramAst, cx: &mut TranslateContext) -> bool {
        if !cx.require_uniform_info() {
            return false;
        }
        self.collect_attributes(ast);
        cx.collect_global_usage(ast);
        self.create_uniform_blocks(ast, cx);
        self.assign_registers(ast);
        self.create_main(ast, cx);
        self.collect_num_threads(ast, cx);
        !cx.has_errors()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
