//! Vulkan: descriptor sets per uniform group, a push constant block, and bindings that are
//! unique across all stages of a pipeline.
//!
//! Binding assignment needs every stage at once, so a pipeline is first linked with
//! [process_stage_info] and only then translated stage by stage. A stage translated without
//! being linked is linked on its own.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

use arrayvec::ArrayVec;
use log::{debug, trace};

use crate::ast::{
    AttribQualifier, InterfaceBlock, InterfaceKind, Node, NodeKind, ProgramAst, StorageQualifier,
    VarId,
};
use crate::common::{ShaderStage, UniformGroup};

use super::{is_block_uniform, rename_buffer_inner_data, TargetStrategy, TranslateContext, Translator};

/// Descriptor set a resource is placed in. Push constants count as a set of their own while
/// linking even though they never get a set id in the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VkGroup {
    PerDraw = 0,
    RendererChange,
    Manual,
    PushConstant,
}

const GROUP_COUNT: usize = 4;

impl VkGroup {
    /// Set id precedence: the first used group gets set 0.
    pub const ALL: [VkGroup; GROUP_COUNT] = [
        VkGroup::PerDraw,
        VkGroup::RendererChange,
        VkGroup::Manual,
        VkGroup::PushConstant,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    fn block_name(self) -> &'static str {
        match self {
            VkGroup::PerDraw => "ksl_vk_per_draw_uniforms_block__",
            VkGroup::RendererChange => "ksl_vk_per_renderer_change_uniforms_block__",
            VkGroup::Manual => "ksl_vk_manual_uniforms_block__",
            VkGroup::PushConstant => "ksl_vk_push_constants_block__",
        }
    }

    fn interface_kind(self) -> InterfaceKind {
        match self {
            VkGroup::PerDraw => InterfaceKind::Uniforms(UniformGroup::PerDraw),
            VkGroup::RendererChange => InterfaceKind::Uniforms(UniformGroup::PerRendererChange),
            VkGroup::Manual => InterfaceKind::Uniforms(UniformGroup::Manual),
            VkGroup::PushConstant => InterfaceKind::PushConstants,
        }
    }
}

impl From<UniformGroup> for VkGroup {
    fn from(g: UniformGroup) -> Self {
        match g {
            UniformGroup::PerDraw => VkGroup::PerDraw,
            UniformGroup::PerRendererChange => VkGroup::RendererChange,
            UniformGroup::Manual => VkGroup::Manual,
        }
    }
}

/// Resource counts of one group in one stage and the bindings they were given.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupSlots {
    pub has_uniform_block: bool,
    pub samplers: u32,
    pub buffers: u32,
    pub images: u32,
    pub subpasses: u32,

    pub block_binding: u32,
    pub first_sampler: u32,
    pub first_buffer: u32,
    pub first_image: u32,
    pub first_subpass: u32,
}

impl GroupSlots {
    /// Lays the group's bindings out from `base`: uniform block, samplers, buffers, images,
    /// subpass inputs. Returns the next free binding.
    fn layout(&mut self, base: u32) -> u32 {
        if self.has_uniform_block {
            self.block_binding = base;
            self.first_sampler = base + 1;
        } else {
            self.first_sampler = base;
        }
        self.first_buffer = self.first_sampler + self.samplers;
        self.first_image = self.first_buffer + self.buffers;
        self.first_subpass = self.first_image + self.images;
        self.first_subpass + self.subpasses
    }
}

#[derive(Debug, Default)]
pub struct VulkanTarget {
    push_constant_bytes: u32,
    linked: bool,

    variable_groups: BTreeMap<VarId, VkGroup>,
    /// Push constants in block order, with their size.
    push_constants: Vec<(VarId, u32)>,
    push_constant_offsets: BTreeMap<VarId, u32>,
    group_usage: BTreeSet<VkGroup>,
    group_mapping: BTreeMap<VkGroup, u32>,
    slots: [GroupSlots; GROUP_COUNT],
    /// Output attribute names of the previous stage, in location order.
    in_attrib_mapping: Vec<String>,
}

impl VulkanTarget {
    pub fn new(push_constant_bytes: u32) -> Self {
        Self {
            push_constant_bytes,
            ..Default::default()
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn group_of(&self, id: VarId) -> Option<VkGroup> {
        self.variable_groups.get(&id).copied()
    }

    pub fn push_constants(&self) -> impl Iterator<Item = VarId> + '_ {
        self.push_constants.iter().map(|(id, _)| *id)
    }

    pub fn push_constant_offset(&self, id: VarId) -> Option<u32> {
        self.push_constant_offsets.get(&id).copied()
    }

    /// Descriptor set id of `group`, if any stage of the pipeline uses it.
    pub fn set_id(&self, group: VkGroup) -> Option<u32> {
        self.group_mapping.get(&group).copied()
    }

    pub fn slots(&self, group: VkGroup) -> &GroupSlots {
        &self.slots[group.index()]
    }

    /// Assigns every uniform, buffer and image of the stage to the group the host chose.
    fn init_groups(&mut self, ast: &ProgramAst, cx: &mut TranslateContext) -> bool {
        if !cx.require_uniform_info() {
            return false;
        }
        let mut interface: BTreeSet<VarId> = BTreeSet::new();
        for node in &ast.root {
            match &node.kind {
                NodeKind::VariableDefinitions(vd)
                    if matches!(
                        vd.storage,
                        StorageQualifier::Buffer | StorageQualifier::Uniform
                    ) =>
                {
                    interface.extend(vd.first_id());
                }
                NodeKind::ImageDefinition(img) => {
                    interface.insert(img.id);
                }
                _ => {}
            }
        }
        self.variable_groups.clear();
        self.push_constants.clear();
        self.push_constant_offsets.clear();
        for id in interface {
            if let Some(g) = cx.uniform_group(&ast.var(id).orig_name) {
                self.variable_groups.insert(id, g.into());
            }
        }
        true
    }

    /// Greedily moves the stage's non-array data uniforms of `group` into the push constant
    /// block while they fit into `remaining` bytes.
    fn collect_push_constants(&mut self, ast: &ProgramAst, group: VkGroup, remaining: &mut u32) {
        for vd in ast.root.iter().filter_map(|n| n.as_variable_definitions()) {
            if vd.storage != StorageQualifier::Uniform {
                continue;
            }
            let Some(id) = vd.first_id() else {
                continue;
            };
            if ast.var(id).ty.is_array() || !(vd.ty.is_numeric() || vd.ty.is_bool()) {
                continue;
            }
            if self.variable_groups.get(&id) != Some(&group) {
                continue;
            }
            let size = vd.ty.uniform_slot_size();
            if size <= *remaining {
                trace!("push constant {} ({} bytes)", ast.var(id).orig_name, size);
                self.variable_groups.insert(id, VkGroup::PushConstant);
                self.push_constants.push((id, size));
                *remaining -= size;
            }
        }
    }

    fn set_push_constant_offsets(&mut self, offset: &mut u32) {
        for (id, size) in &self.push_constants {
            self.push_constant_offsets.insert(*id, *offset);
            *offset += size;
        }
    }

    fn count_resources(&mut self, ast: &ProgramAst) {
        self.slots = Default::default();
        for node in &ast.root {
            match &node.kind {
                NodeKind::VariableDefinitions(vd) => {
                    let Some(g) = vd.first_id().and_then(|id| self.group_of(id)) else {
                        continue;
                    };
                    let s = &mut self.slots[g.index()];
                    match vd.storage {
                        StorageQualifier::Buffer => s.buffers += 1,
                        StorageQualifier::Uniform if vd.ty.is_sampler() => s.samplers += 1,
                        StorageQualifier::Uniform if vd.ty.is_subpass_input() => s.subpasses += 1,
                        StorageQualifier::Uniform if vd.ty.is_numeric() || vd.ty.is_bool() => {
                            s.has_uniform_block = true
                        }
                        _ => {}
                    }
                }
                NodeKind::ImageDefinition(img) => {
                    if let Some(g) = self.group_of(img.id) {
                        self.slots[g.index()].images += 1;
                    }
                }
                _ => {}
            }
        }
    }

    /// Replaces the data uniforms of the root with one interface block per used group.
    fn create_uniform_blocks(&mut self, ast: &mut ProgramAst) {
        let mut members: [Vec<Node>; GROUP_COUNT] = Default::default();
        let mut push: BTreeMap<VarId, Node> = BTreeMap::new();

        for mut node in ast.drain_root(is_block_uniform) {
            let Some(id) = node.as_variable_definitions().and_then(|vd| vd.first_id()) else {
                continue;
            };
            // missing groups were reported while linking
            let Some(group) = self.group_of(id) else {
                continue;
            };
            node.line = 0;
            if let Some(vd) = node.as_variable_definitions_mut() {
                vd.storage = StorageQualifier::Default;
                if let Some(offset) = self.push_constant_offsets.get(&id) {
                    vd.attributes.values.insert(AttribQualifier::Offset, *offset);
                }
            }
            if group == VkGroup::PushConstant {
                push.insert(id, node);
            } else {
                members[group.index()].push(node);
            }
        }
        for (id, _) in &self.push_constants {
            if let Some(node) = push.remove(id) {
                members[VkGroup::PushConstant.index()].push(node);
            }
        }

        let mut blocks = vec![];
        for g in VkGroup::ALL {
            let slots = &self.slots[g.index()];
            if !slots.has_uniform_block {
                continue;
            }
            let mut block = InterfaceBlock::new(g.interface_kind(), g.block_name());
            block.members = std::mem::take(&mut members[g.index()]);
            block.binding = Some(slots.block_binding);
            block.set = self.set_id(g);
            blocks.push(Node::new(NodeKind::InterfaceBlock(block), 0, 0));
        }
        ast.root.splice(0..0, blocks);
    }

    fn set_resource_attribs(&self, ast: &mut ProgramAst) {
        let mut next_sampler = self.slots.map(|s| s.first_sampler);
        let mut next_buffer = self.slots.map(|s| s.first_buffer);
        let mut next_image = self.slots.map(|s| s.first_image);

        for node in ast.root.iter_mut() {
            match &mut node.kind {
                NodeKind::VariableDefinitions(vd) => {
                    let is_buffer = vd.storage == StorageQualifier::Buffer;
                    if !is_buffer && vd.storage != StorageQualifier::Uniform {
                        continue;
                    }
                    let Some(g) = vd.first_id().and_then(|id| self.group_of(id)) else {
                        continue;
                    };
                    let values = &mut vd.attributes.values;
                    if is_buffer {
                        values.insert(AttribQualifier::Binding, next_buffer[g.index()]);
                        next_buffer[g.index()] += 1;
                    } else if vd.ty.is_sampler() {
                        values.insert(AttribQualifier::Binding, next_sampler[g.index()]);
                        next_sampler[g.index()] += 1;
                    }
                    if let Some(set) = self.set_id(g) {
                        values.insert(AttribQualifier::Set, set);
                    }
                }
                NodeKind::ImageDefinition(img) => {
                    let Some(g) = self.group_of(img.id) else {
                        continue;
                    };
                    if let Some(set) = self.set_id(g) {
                        img.attributes.values.insert(AttribQualifier::Set, set);
                    }
                    img.attributes
                        .values
                        .insert(AttribQualifier::Binding, next_image[g.index()]);
                    next_image[g.index()] += 1;
                }
                _ => {}
            }
        }
    }

    /// Input locations follow the previous stage's output order, outputs their own order.
    fn set_attrib_locations(&self, ast: &mut ProgramAst, cx: &mut TranslateContext) {
        if ast.stage == ShaderStage::Compute {
            return;
        }
        let own_inputs: Vec<String> = ast
            .in_attributes
            .iter()
            .map(|id| ast.var(*id).orig_name.clone())
            .collect();
        let mut in_mapping = if ast.stage == ShaderStage::Vertex {
            own_inputs.clone()
        } else {
            self.in_attrib_mapping.clone()
        };
        if !own_inputs.is_empty() && in_mapping.is_empty() {
            cx.error("input attribute mapping not set!");
            in_mapping = own_inputs;
        }
        let out_mapping: Vec<String> = ast
            .out_attributes
            .iter()
            .map(|id| ast.var(*id).orig_name.clone())
            .collect();

        let stage = ast.stage;
        let mut root = std::mem::take(&mut ast.root);
        for vd in root.iter_mut().filter_map(|n| n.as_variable_definitions_mut()) {
            let Some(id) = vd.first_id() else {
                continue;
            };
            let name = &ast.var(id).orig_name;
            let location = match vd.storage {
                StorageQualifier::In => {
                    let found = in_mapping.iter().position(|n| n == name);
                    if found.is_none() {
                        cx.error(format!(
                            "input attribute has no matching output in the previous stage: {}",
                            name
                        ));
                    }
                    found
                }
                StorageQualifier::Out if stage != ShaderStage::Fragment => {
                    out_mapping.iter().position(|n| n == name)
                }
                _ => None,
            };
            if let Some(location) = location {
                vd.attributes
                    .values
                    .insert(AttribQualifier::Location, location as u32);
            }
        }
        ast.root = root;
    }

    fn translate_subpass_inputs(&self, ast: &mut ProgramAst, use_subpass: bool) {
        let mut next_subpass = self.slots.map(|s| s.first_subpass);
        for vd in ast
            .root
            .iter_mut()
            .filter_map(|n| n.as_variable_definitions_mut())
        {
            if vd.storage != StorageQualifier::Uniform || !vd.ty.is_subpass_input() {
                continue;
            }
            let Some(g) = vd.first_id().and_then(|id| self.group_of(id)) else {
                continue;
            };
            let values = &mut vd.attributes.values;
            let attachment = values
                .remove(&AttribQualifier::Color)
                .or_else(|| values.remove(&AttribQualifier::Depth))
                .unwrap_or(0);
            values.insert(AttribQualifier::Binding, next_subpass[g.index()]);
            if use_subpass {
                values.insert(AttribQualifier::InputAttachmentIndex, attachment);
            }
            next_subpass[g.index()] += 1;
        }
    }
}

impl TargetStrategy for VulkanTarget {
    fn translate(&mut self, ast: &mut ProgramAst, cx: &mut TranslateContext) -> bool {
        if !self.linked {
            debug!("{:?} stage was not linked, linking it alone", ast.stage);
            let mut links = [StageLink {
                ast: &*ast,
                target: &mut *self,
                cx: &mut *cx,
            }];
            if !link(&mut links) {
                return false;
            }
        }

        rename_buffer_inner_data(ast);
        self.create_uniform_blocks(ast);
        self.set_resource_attribs(ast);
        self.set_attrib_locations(ast, cx);
        self.translate_subpass_inputs(ast, cx.use_subpass);

        if ast.stage == ShaderStage::Vertex {
            if let Some(id) = ast.inbuilts.vertex_id {
                ast.var_mut(id).new_name = "gl_VertexIndex".to_string();
            }
        }
        !cx.has_errors()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct StageLink<'a> {
    ast: &'a ProgramAst,
    target: &'a mut VulkanTarget,
    cx: &'a mut TranslateContext,
}

/// Stage order push constants are handed out in.
const PUSH_CONSTANT_STAGE_ORDER: [ShaderStage; 5] = [
    ShaderStage::Fragment,
    ShaderStage::Vertex,
    ShaderStage::TessEval,
    ShaderStage::TessControl,
    ShaderStage::Geometry,
];

/// Pipeline order, bindings accumulate along it.
const RENDER_STAGE_ORDER: [ShaderStage; 5] = [
    ShaderStage::Vertex,
    ShaderStage::TessControl,
    ShaderStage::TessEval,
    ShaderStage::Geometry,
    ShaderStage::Fragment,
];

fn find_stage(links: &[StageLink], stage: ShaderStage) -> Option<usize> {
    links.iter().position(|l| l.ast.stage == stage)
}

fn link(links: &mut [StageLink]) -> bool {
    for l in links.iter_mut() {
        if !l.target.init_groups(l.ast, l.cx) {
            return false;
        }
    }

    let compute = find_stage(links, ShaderStage::Compute);
    let order: Vec<usize> = match compute {
        Some(c) => vec![c],
        None => PUSH_CONSTANT_STAGE_ORDER
            .iter()
            .filter_map(|s| find_stage(links, *s))
            .collect(),
    };

    let mut remaining = links
        .iter()
        .map(|l| l.target.push_constant_bytes)
        .min()
        .unwrap_or(0);
    for group in [VkGroup::PerDraw, VkGroup::RendererChange, VkGroup::Manual] {
        for &i in &order {
            let l = &mut links[i];
            l.target.collect_push_constants(l.ast, group, &mut remaining);
        }
    }
    let mut offset = 0;
    for &i in &order {
        links[i].target.set_push_constant_offsets(&mut offset);
    }
    debug!("push constants use {} bytes", offset);

    let mut global_usage = BTreeSet::new();
    for l in links.iter_mut() {
        l.target.group_usage = l.target.variable_groups.values().copied().collect();
        global_usage.extend(l.target.group_usage.iter().copied());
    }
    let mut mapping = BTreeMap::new();
    for g in VkGroup::ALL {
        if global_usage.contains(&g) {
            let set = mapping.len() as u32;
            mapping.insert(g, set);
        }
    }
    debug!("descriptor set mapping: {:?}", mapping);

    for l in links.iter_mut() {
        l.target.group_mapping = mapping.clone();
        l.target.count_resources(l.ast);
    }

    match compute {
        Some(c) => {
            for s in links[c].target.slots.iter_mut() {
                s.layout(0);
            }
        }
        None => {
            let mut next = [0u32; GROUP_COUNT];
            let mut previous: Option<usize> = None;
            for stage in RENDER_STAGE_ORDER {
                let Some(i) = find_stage(links, stage) else {
                    continue;
                };
                for (g, s) in links[i].target.slots.iter_mut().enumerate() {
                    next[g] = s.layout(next[g]);
                }
                if let Some(p) = previous {
                    let src = links[p].ast;
                    links[i].target.in_attrib_mapping = src
                        .out_attributes
                        .iter()
                        .map(|id| src.var(*id).orig_name.clone())
                        .collect();
                }
                previous = Some(i);
            }
        }
    }

    for l in links.iter_mut() {
        l.target.linked = true;
    }
    true
}

/// Links the stages of one pipeline: decides push constants, descriptor set ids and bindings
/// for all of them together. Every translator must target Vulkan.
pub fn process_stage_info(stages: &mut [(&ProgramAst, &mut Translator)]) -> bool {
    let mut links: ArrayVec<StageLink, 6> = ArrayVec::new();
    for (ast, translator) in stages.iter_mut() {
        let ast: &ProgramAst = *ast;
        let Some((target, cx)) = translator.split_mut::<VulkanTarget>() else {
            debug!("{:?} stage is not a vulkan translator", ast.stage);
            return false;
        };
        if find_stage(&links, ast.stage).is_some() {
            cx.error(format!("{:?} stage linked twice", ast.stage));
            return false;
        }
        if links.try_push(StageLink { ast, target, cx }).is_err() {
            return false;
        }
    }
    link(&mut links)
}
