//! Metal Shading Language for iOS and macOS.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::ast::{
    Access, AttribQualifier, ExprId, FunctionDefinition, InterfaceBlock, InterfaceKind, Node,
    NodeKind, ParamAccess, StorageQualifier, VarId, VariableDefinitions,
};
use crate::common::{KslType, Precision, ShaderStage, TypeId, UniformGroup};
use crate::error::GenerateError;
use crate::translator::metal::{
    group_buffer_binding, group_type_name, group_variable_name, MetalTarget, FIRST_BUFFER_BINDING,
    GLOBAL_SUFFIX, INPUT_LAYOUT, INPUT_NAME, OUTPUT_LAYOUT, OUTPUT_NAME, SAMPLER_SUFFIX,
};

use super::glsl::is_matrix_argument;
use super::{Dialect, GenResult, Generator};

const SHADOW_SAMPLER: &str = "__ksl_shadow_sampler__";
const SAMPLE_2D_ARRAY: &str = "__ksl_sample_2d_array__";
const SAMPLE_2D_DEPTH: &str = "__ksl_sample_2d_depth__";
const SAMPLE_2D_DEPTH_ARRAY: &str = "__ksl_sample_2d_depth_array__";
const SAMPLE_CUBE_DEPTH: &str = "__ksl_sample_cube_depth__";
const SAMPLE_2D_ARRAY_LOD: &str = "__ksl_sample_2d_array_lod__";

const HEADER: &[&str] = &[
    "#include <metal_stdlib>",
    "using namespace metal;",
    "",
    "constexpr sampler __ksl_shadow_sampler__(coord::normalized, filter::linear, address::clamp_to_edge, compare_func::less_equal);",
    "",
    "float4 __ksl_sample_2d_array__(texture2d_array<float> t, sampler s, float3 tc)",
    "{",
    "   return t.sample(s, tc.xy, uint(tc.z));",
    "}",
    "",
    "float __ksl_sample_2d_depth__(depth2d<float> t, float3 tc)",
    "{",
    "   float a = clamp(tc.z,0.0,1.0);",
    "   return t.sample_compare( __ksl_shadow_sampler__, tc.xy, a); ",
    "}",
    "",
    "float __ksl_sample_2d_depth_array__(depth2d_array<float> t, float4 tc)",
    "{",
    "   float a = clamp(tc.w,0.0,1.0);",
    "   return t.sample_compare(__ksl_shadow_sampler__, tc.xy, uint(tc.z), a);",
    "}",
    "",
    "float __ksl_sample_cube_depth__(depthcube<float> t, float4 tc)",
    "{",
    "   float a = clamp(tc.w,0.0,1.0);",
    "   return t.sample_compare(__ksl_shadow_sampler__, tc.xyz, a);",
    "}",
    "",
    "float4 __ksl_sample_2d_array_lod__(texture2d_array<float> t, sampler s, float3 tc, float lod)",
    "{",
    "   return t.sample(s, tc.xy, uint(tc.z), level(lod));",
    "}",
    "",
];

#[derive(Debug, Clone)]
pub struct MslDialect {
    has_input: bool,
    has_output: bool,
    uniform_blocks: Vec<UniformGroup>,
    variable_groups: BTreeMap<VarId, UniformGroup>,
    /// Subpass inputs are read as `[[ color(n) ]]` attachments instead of textures.
    framebuffer_fetch: bool,
}

impl MslDialect {
    pub fn new(target: &MetalTarget, framebuffer_fetch: bool) -> Self {
        Self {
            has_input: target.has_input_interface(),
            has_output: target.has_output_interface(),
            uniform_blocks: UniformGroup::ALL
                .into_iter()
                .filter(|g| target.has_uniform_block(*g))
                .collect(),
            variable_groups: target.variable_groups().clone(),
            framebuffer_fetch,
        }
    }
}

fn float_name(p: Precision) -> &'static str {
    match p {
        Precision::High => "float",
        Precision::Medium | Precision::Low => "half",
        Precision::None | Precision::Invalid => "float_noprec",
    }
}

fn int_name(p: Precision) -> &'static str {
    match p {
        Precision::High => "int",
        Precision::Medium => "short",
        Precision::Low => "char",
        Precision::None | Precision::Invalid => "int_noprec",
    }
}

fn effective_precision(g: &Generator<'_, MslDialect>, ty: &KslType) -> Precision {
    match ty.precision {
        Precision::Medium | Precision::Low if g.ast.force_highp => Precision::High,
        p => p,
    }
}

/// Resources moved into the entry point, grouped the way they are bound.
#[derive(Default)]
struct EntryResources<'n> {
    samplers: Vec<&'n VariableDefinitions>,
    buffers: Vec<&'n VariableDefinitions>,
    images: Vec<VarId>,
    subpass_inputs: Vec<&'n VariableDefinitions>,
}

impl<'n> EntryResources<'n> {
    fn sort(nodes: &'n [Node]) -> Self {
        let mut r = EntryResources::default();
        for n in nodes {
            match &n.kind {
                NodeKind::VariableDefinitions(vd) if vd.storage == StorageQualifier::Buffer => {
                    r.buffers.push(vd)
                }
                NodeKind::VariableDefinitions(vd) if vd.ty.is_subpass_input() => {
                    r.subpass_inputs.push(vd)
                }
                NodeKind::VariableDefinitions(vd) => r.samplers.push(vd),
                NodeKind::ImageDefinition(img) => r.images.push(img.id),
                _ => {}
            }
        }
        r
    }
}

impl Generator<'_, MslDialect> {
    fn msl_image_type(&self, id: VarId) -> String {
        let v = self.ast.var(id);
        let access = match v.access {
            Access::ReadOnly => "access::read",
            Access::WriteOnly => "access::write",
            Access::ReadWrite => "access::read_write",
        };
        format!(
            "texture2d<{}, {}>",
            float_name(effective_precision(self, &v.ty)),
            access
        )
    }

    /// Suffix of resources that non-entry functions receive as parameters.
    fn msl_global_suffix(&self) -> &'static str {
        if self.visiting_main {
            ""
        } else {
            GLOBAL_SUFFIX
        }
    }

    /// `T.method(T_sampler__, rest...)` followed by `extra`.
    fn msl_sample(&mut self, sampler: ExprId, method: &str, rest: &[ExprId]) -> GenResult {
        self.expression(sampler)?;
        write!(self, ".{}(", method)?;
        self.expression(sampler)?;
        write!(self, "{}", SAMPLER_SUFFIX)?;
        for e in rest {
            write!(self, ", ")?;
            self.expression(*e)?;
        }
        write!(self, ")")?;
        Ok(())
    }

    /// A header helper called with the texture, optionally its sampler, then `rest`.
    fn msl_helper(&mut self, helper: &str, sampler: ExprId, with_state: bool, rest: &[ExprId]) -> GenResult {
        write!(self, "{}(", helper)?;
        self.expression(sampler)?;
        if with_state {
            write!(self, ", ")?;
            self.expression(sampler)?;
            write!(self, "{}", SAMPLER_SUFFIX)?;
        }
        for e in rest {
            write!(self, ", ")?;
            self.expression(*e)?;
        }
        write!(self, ")")?;
        Ok(())
    }

    fn msl_texture_access(&mut self, name: &str, args: &[ExprId]) -> Result<bool, GenerateError> {
        if !matches!(
            name,
            "texture"
                | "textureGather"
                | "textureGatherOffset"
                | "textureGatherOffsets"
                | "texelFetch"
                | "texelFetchOffset"
                | "textureLod"
                | "textureLodOffset"
        ) {
            return Ok(false);
        }
        let ast = self.ast;
        let Some((&sampler, rest)) = args.split_first() else {
            return Err(GenerateError::Internal(format!("{} without sampler", name)));
        };

        use TypeId::*;
        match (name, ast.expr(sampler).ty.id, rest) {
            ("texture", Sampler2D | SamplerCube, [_]) => self.msl_sample(sampler, "sample", rest)?,
            ("texture", Sampler2D | SamplerCube, [tc, b]) => {
                self.expression(sampler)?;
                write!(self, ".sample(")?;
                self.expression(sampler)?;
                write!(self, "{}, ", SAMPLER_SUFFIX)?;
                self.expression(*tc)?;
                write!(self, ", bias(")?;
                self.expression(*b)?;
                write!(self, "))")?;
            }
            ("texture", Sampler2DArray, [_]) => self.msl_helper(SAMPLE_2D_ARRAY, sampler, true, rest)?,
            ("texture", Sampler2DShadow, [_]) => self.msl_helper(SAMPLE_2D_DEPTH, sampler, false, rest)?,
            ("texture", Sampler2DArrayShadow, [_]) => {
                self.msl_helper(SAMPLE_2D_DEPTH_ARRAY, sampler, false, rest)?
            }
            ("texture", SamplerCubeShadow, [_]) => self.msl_helper(SAMPLE_CUBE_DEPTH, sampler, false, rest)?,
            ("textureGather", Sampler2D, [_]) => self.msl_sample(sampler, "gather", rest)?,
            ("textureGather", Sampler2DShadow, [tc, reference]) => {
                self.expression(sampler)?;
                write!(self, ".gather_compare({}, ", SHADOW_SAMPLER)?;
                self.expression(*tc)?;
                write!(self, ", ")?;
                self.expression(*reference)?;
                write!(self, ")")?;
            }
            ("textureGatherOffset" | "textureGatherOffsets", Sampler2D, [_, _]) => {
                self.msl_sample(sampler, "gather", rest)?
            }
            ("texelFetch", Sampler2D, [tc, lod]) => {
                self.expression(sampler)?;
                write!(self, ".read(uint2(")?;
                self.expression(*tc)?;
                write!(self, "),")?;
                self.expression(*lod)?;
                write!(self, ")")?;
            }
            ("texelFetchOffset", Sampler2D, [tc, lod, offset]) => {
                self.expression(sampler)?;
                write!(self, ".read(uint2(")?;
                self.expression(*tc)?;
                write!(self, " + int2(")?;
                self.expression(*offset)?;
                write!(self, ")),")?;
                self.expression(*lod)?;
                write!(self, ")")?;
            }
            ("textureLod", Sampler2D | SamplerCube, [tc, lod]) => {
                self.expression(sampler)?;
                write!(self, ".sample(")?;
                self.expression(sampler)?;
                write!(self, "{}, ", SAMPLER_SUFFIX)?;
                self.expression(*tc)?;
                write!(self, ", level(")?;
                self.expression(*lod)?;
                write!(self, "))")?;
            }
            ("textureLod", Sampler2DArray, [_, _]) => {
                self.msl_helper(SAMPLE_2D_ARRAY_LOD, sampler, true, rest)?
            }
            ("textureLodOffset", Sampler2D, [tc, lod, offset]) => {
                self.expression(sampler)?;
                write!(self, ".sample(")?;
                self.expression(sampler)?;
                write!(self, "{}, ", SAMPLER_SUFFIX)?;
                self.expression(*tc)?;
                write!(self, ", level(")?;
                self.expression(*lod)?;
                write!(self, "),")?;
                self.expression(*offset)?;
                write!(self, ")")?;
            }
            _ => {
                return Err(GenerateError::Internal(format!(
                    "{} is not supported on {}",
                    name,
                    ast.type_name(&ast.expr(sampler).ty)
                )))
            }
        }
        Ok(true)
    }

    /// Resources the callee needs, in the order of [Self::msl_function]'s extra parameters.
    fn msl_global_arguments(&self, name: &str) -> Vec<String> {
        let ast = self.ast;
        let usage = self.usage_of(name);
        let suffix = self.msl_global_suffix();
        let mut out = vec![];
        for g in UniformGroup::ALL {
            if usage.uses_uniform_group(g) {
                out.push(group_variable_name(g).to_string());
            }
        }
        if usage.uses_in_attribs {
            out.push(INPUT_NAME.to_string());
        }
        if usage.uses_out_attribs {
            out.push(OUTPUT_NAME.to_string());
        }
        for id in &usage.used_samplers {
            let name = &ast.var(*id).new_name;
            out.push(format!("{0}{1}, {0}{1}{2}", name, suffix, SAMPLER_SUFFIX));
        }
        for id in usage
            .used_buffers
            .iter()
            .chain(&usage.used_shared)
            .chain(&usage.used_images)
        {
            out.push(format!("{}{}", ast.var(*id).new_name, suffix));
        }
        for id in &usage.used_inbuilts {
            out.push(ast.var(*id).new_name.clone());
        }
        out
    }

    fn msl_function(&mut self, line: u32, f: &FunctionDefinition) -> GenResult {
        self.sync_line(line);
        let ast = self.ast;
        let function = &ast.functions[f.id as usize];
        let ret = self.type_name(&function.return_type);
        write!(self, "{} {}(", ret, function.name)?;

        for (i, p) in f.params.iter().enumerate() {
            let v = ast.var(p.id);
            let access = function.param_access.get(i).copied().unwrap_or(ParamAccess::In);
            match access {
                ParamAccess::In if v.ty.is_array() => write!(self, "thread const ")?,
                ParamAccess::In => {}
                ParamAccess::Out | ParamAccess::InOut => write!(self, "thread ")?,
            }
            let ty = self.type_name(v.ty.base_type());
            write!(self, "{} ", ty)?;
            if v.ty.is_array() {
                write!(self, "*")?;
            } else if access != ParamAccess::In {
                write!(self, "&")?;
            }
            write!(self, "{}", v.new_name)?;
            if v.ty.is_sampler() {
                write!(self, ", sampler {}{}", v.new_name, SAMPLER_SUFFIX)?;
            }
            if i + 1 < f.params.len() {
                write!(self, ", ")?;
            }
        }

        let usage = self.usage_of(&function.name);
        let mut need_comma = !f.params.is_empty();
        let mut param = |g: &mut Self, text: String| -> GenResult {
            if need_comma {
                write!(g, ", ")?;
            }
            write!(g, "{}", text)?;
            need_comma = true;
            Ok(())
        };

        if usage.uses_in_attribs || usage.uses_out_attribs {
            self.new_line();
        }
        for g in UniformGroup::ALL {
            if usage.uses_uniform_group(g) {
                param(
                    self,
                    format!("constant {} &{}", group_type_name(g), group_variable_name(g)),
                )?;
            }
        }
        if usage.uses_in_attribs {
            param(self, format!("thread {} &{}", INPUT_LAYOUT, INPUT_NAME))?;
        }
        if usage.uses_out_attribs {
            param(self, format!("thread {} &{}", OUTPUT_LAYOUT, OUTPUT_NAME))?;
        }
        if !usage.used_samplers.is_empty() {
            self.new_line();
        }
        for id in &usage.used_samplers {
            let v = ast.var(*id);
            let ty = self.type_name(&v.ty);
            param(
                self,
                format!(
                    "{} {}{}, sampler {}{}{}",
                    ty, v.new_name, GLOBAL_SUFFIX, v.new_name, GLOBAL_SUFFIX, SAMPLER_SUFFIX
                ),
            )?;
        }
        if !usage.used_buffers.is_empty() {
            self.new_line();
        }
        let address_space = if ast.stage == ShaderStage::Compute {
            "device"
        } else {
            "constant"
        };
        for id in &usage.used_buffers {
            let v = ast.var(*id);
            let ty = self.type_name(v.ty.base_type());
            let reference = if v.ty.is_array() { "*" } else { "&" };
            param(
                self,
                format!("{} {}{} {}{}", address_space, ty, reference, v.new_name, GLOBAL_SUFFIX),
            )?;
        }
        if !usage.used_shared.is_empty() {
            self.new_line();
        }
        for id in &usage.used_shared {
            let v = ast.var(*id);
            let ty = self.type_name(v.ty.base_type());
            let reference = if v.ty.is_array() { " *" } else { " &" };
            param(
                self,
                format!("threadgroup {}{}{}{}", ty, reference, v.new_name, GLOBAL_SUFFIX),
            )?;
        }
        if !usage.used_images.is_empty() {
            self.new_line();
        }
        for id in &usage.used_images {
            let ty = self.msl_image_type(*id);
            let v = ast.var(*id);
            param(self, format!("{} {}{}", ty, v.new_name, GLOBAL_SUFFIX))?;
        }
        if !usage.used_inbuilts.is_empty() {
            self.new_line();
        }
        for id in &usage.used_inbuilts {
            let v = ast.var(*id);
            let ty = self.type_name(&v.ty);
            param(self, format!("thread {} &{}", ty, v.new_name))?;
        }

        write!(self, ")")?;
        self.new_line();
        self.block(0, &f.body)
    }

    fn msl_main(&mut self, f: &FunctionDefinition, resources: &[Node]) -> GenResult {
        let ast = self.ast;
        let (keyword, name) = match ast.stage {
            ShaderStage::Vertex => ("vertex", "vertex_main"),
            ShaderStage::Fragment => ("fragment", "fragment_main"),
            ShaderStage::Compute => ("kernel", "compute_main"),
            _ => return Err(GenerateError::UnexpectedNode("entry point of an unsupported stage")),
        };
        let ret = if self.dialect.has_output { OUTPUT_LAYOUT } else { "void" };
        write!(self, "{} {} {}(", keyword, ret, name)?;

        let mut params: Vec<String> = vec![];
        if self.dialect.has_input {
            params.push(format!("{} {} [[ stage_in ]]", INPUT_LAYOUT, INPUT_NAME));
        }
        for g in self.dialect.uniform_blocks.clone() {
            params.push(format!(
                "constant {} &{} [[ buffer({}) ]]",
                group_type_name(g),
                group_variable_name(g),
                group_buffer_binding(g)
            ));
        }

        let r = EntryResources::sort(resources);
        let mut next_texture = 0;
        let mut next_buffer = FIRST_BUFFER_BINDING;
        for vd in &r.samplers {
            let Some(id) = vd.first_id() else {
                continue;
            };
            let v = ast.var(id);
            let ty = self.type_name(&vd.ty);
            params.push(format!("{} {} [[ texture({}) ]]", ty, v.new_name, next_texture));
            params.push(format!(
                "sampler {}{} [[ sampler({}) ]]",
                v.new_name, SAMPLER_SUFFIX, next_texture
            ));
            next_texture += 1;
        }
        let address_space = if ast.stage == ShaderStage::Compute {
            "device"
        } else {
            "constant"
        };
        for vd in &r.buffers {
            let Some(id) = vd.first_id() else {
                continue;
            };
            let v = ast.var(id);
            let ty = self.type_name(&vd.ty);
            let reference = if v.ty.is_array() { " *" } else { " &" };
            params.push(format!(
                "{} {}{}{} [[ buffer({}) ]]",
                address_space, ty, reference, v.new_name, next_buffer
            ));
            next_buffer += 1;
        }
        for id in &r.images {
            let ty = self.msl_image_type(*id);
            params.push(format!(
                "{} {} [[ texture({}) ]]",
                ty,
                ast.var(*id).new_name,
                next_texture
            ));
            next_texture += 1;
        }
        for vd in &r.subpass_inputs {
            let Some(id) = vd.first_id() else {
                continue;
            };
            let ty = self.type_name(&vd.ty);
            let binding = if self.dialect.framebuffer_fetch {
                let attachment = vd
                    .attributes
                    .value(AttribQualifier::Color)
                    .or_else(|| vd.attributes.value(AttribQualifier::Depth))
                    .unwrap_or(0);
                format!("color({})", attachment)
            } else {
                next_texture += 1;
                format!("texture({})", next_texture - 1)
            };
            params.push(format!("{} {} [[ {} ]]", ty, ast.var(id).new_name, binding));
        }
        match ast.stage {
            ShaderStage::Compute => params.extend(
                [
                    "uint3 gl_WorkGroupID           [[  threadgroup_position_in_grid    ]]",
                    "uint3 gl_LocalInvocationID     [[  thread_position_in_threadgroup  ]]",
                    "uint3 gl_GlobalInvocationID    [[  thread_position_in_grid         ]]",
                    "uint  gl_LocalInvocationIndex  [[  thread_index_in_threadgroup     ]]",
                    "uint3 gl_NumWorkGroups         [[  threadgroups_per_grid           ]]",
                    "uint3 gl_WorkGroupSize         [[  threads_per_threadgroup         ]]",
                ]
                .map(String::from),
            ),
            ShaderStage::Fragment => params.extend(
                [
                    "float4 gl_FragCoord    [[  position      ]]",
                    "bool   gl_FrontFacing  [[  front_facing  ]]",
                ]
                .map(String::from),
            ),
            ShaderStage::Vertex => params.push("uint gl_VertexID [[ vertex_id ]]".to_string()),
            _ => {}
        }

        self.indent += 1;
        for (i, p) in params.iter().enumerate() {
            self.new_line();
            write!(self, "{}", p)?;
            if i + 1 < params.len() {
                write!(self, ",")?;
            }
        }
        self.indent -= 1;
        self.new_line();
        write!(self, ")")?;
        self.new_line();

        self.visiting_main = true;
        let r = self.block(0, &f.body);
        self.visiting_main = false;
        r
    }

    fn msl_stage_struct(&mut self, line: u32, b: &InterfaceBlock) -> GenResult {
        self.sync_line(line);
        write!(self, "struct {}", b.name)?;
        self.new_line();
        write!(self, "{{")?;
        self.indent += 1;
        let ast = self.ast;
        for (i, m) in b.members.iter().enumerate() {
            self.new_line();
            let Some(vd) = m.as_variable_definitions() else {
                return Err(GenerateError::UnexpectedNode(m.kind.name()));
            };
            let Some(dv) = vd.variables.first() else {
                continue;
            };
            let v = ast.var(dv.id);
            let ty = self.type_name(&vd.ty);
            write!(self, "{} {}", ty, v.new_name)?;
            if v.ty.is_array() {
                write!(self, "[")?;
                if let Some(size) = dv.size {
                    self.expression(size)?;
                }
                write!(self, "]")?;
            }
            let semantic = b.semantics.get(i).map(String::as_str).unwrap_or_default();
            write!(self, " [[ {} ]];", semantic)?;
        }
        self.indent -= 1;
        self.new_line();
        write!(self, "}};")?;
        self.new_line();
        Ok(())
    }
}

impl Dialect for MslDialect {
    fn header(g: &mut Generator<'_, Self>) -> GenResult {
        for line in HEADER {
            write!(g, "{}", line)?;
            g.new_line();
        }
        Ok(())
    }

    fn type_name(g: &Generator<'_, Self>, ty: &KslType) -> String {
        use TypeId::*;
        let p = effective_precision(g, ty);
        let (f, i) = (float_name(p), int_name(p));
        match ty.id {
            Float => f.to_string(),
            Vec2 => format!("{f}2"),
            Vec3 => format!("{f}3"),
            Vec4 => format!("{f}4"),
            Mat2 => format!("{f}2x2"),
            Mat3 => format!("{f}3x3"),
            Mat4 => format!("{f}4x4"),
            Int => i.to_string(),
            Int2 => format!("{i}2"),
            Int3 => format!("{i}3"),
            Int4 => format!("{i}4"),
            UInt => format!("u{i}"),
            UInt2 => format!("u{i}2"),
            UInt3 => format!("u{i}3"),
            UInt4 => format!("u{i}4"),
            SubpassInput if g.dialect.framebuffer_fetch => format!("{f}4"),
            Sampler2D | SubpassInput | Image2D => format!("texture2d<{f}>"),
            Sampler2DArray => format!("texture2d_array<{f}>"),
            SamplerCube => format!("texturecube<{f}>"),
            SamplerCubeArray => format!("texturecube_array<{f}>"),
            Sampler2DShadow => format!("depth2d<{f}>"),
            Sampler2DArrayShadow => format!("depth2d_array<{f}>"),
            SamplerCubeShadow => format!("depthcube<{f}>"),
            _ => g.ast.type_name(ty),
        }
    }

    fn storage_qualifier(g: &Generator<'_, Self>, storage: StorageQualifier) -> &'static str {
        match storage {
            StorageQualifier::Shared => "threadgroup ",
            StorageQualifier::Const if g.visiting_global_definition => "constant ",
            StorageQualifier::Const => "const ",
            _ => "",
        }
    }

    fn variable_definitions(g: &mut Generator<'_, Self>, line: u32, vd: &VariableDefinitions) -> GenResult {
        g.sync_line(line);
        let storage = Self::storage_qualifier(g, vd.storage);
        let ty = g.type_name(&vd.ty);
        write!(g, "{}{} ", storage, ty)?;
        g.ksl_declarators(vd)?;
        write!(g, ";")?;
        Ok(())
    }

    fn function(g: &mut Generator<'_, Self>, line: u32, f: &FunctionDefinition) -> GenResult {
        match &f.entry {
            Some(entry) => {
                g.sync_line(line);
                g.msl_main(f, &entry.resources)
            }
            None => g.msl_function(line, f),
        }
    }

    fn num_threads(_g: &mut Generator<'_, Self>, _line: u32, _size: [u32; 3]) -> GenResult {
        Ok(())
    }

    fn interface_block(g: &mut Generator<'_, Self>, line: u32, b: &InterfaceBlock) -> GenResult {
        match b.kind {
            InterfaceKind::Uniforms(_) => {
                let sync = g.do_sync_line;
                g.do_sync_line = false;
                let r = g.ksl_struct_definition(line, &b.name, &b.members);
                g.do_sync_line = sync;
                r
            }
            InterfaceKind::Input | InterfaceKind::Output => g.msl_stage_struct(line, b),
            InterfaceKind::PushConstants => Err(GenerateError::UnexpectedNode("push constants")),
        }
    }

    fn entry_output_definition(g: &mut Generator<'_, Self>) -> GenResult {
        write!(g, "{} {};", OUTPUT_LAYOUT, OUTPUT_NAME)?;
        Ok(())
    }

    fn return_statement(g: &mut Generator<'_, Self>, line: u32, e: Option<ExprId>) -> GenResult {
        if g.visiting_main && g.dialect.has_output {
            g.sync_line(line);
            write!(g, "return {};", OUTPUT_NAME)?;
            return Ok(());
        }
        g.ksl_return(line, e)
    }

    fn discard(g: &mut Generator<'_, Self>, line: u32) -> GenResult {
        g.sync_line(line);
        write!(g, "discard_fragment();")?;
        Ok(())
    }

    fn variable(g: &mut Generator<'_, Self>, id: VarId) -> GenResult {
        let ast = g.ast;
        let v = ast.var(id);
        let mut suffix = "";
        match v.storage {
            StorageQualifier::In => write!(g, "{}.", INPUT_NAME)?,
            StorageQualifier::Out => write!(g, "{}.", OUTPUT_NAME)?,
            StorageQualifier::Uniform => {
                let base = v.ty.base_type();
                if base.is_numeric() || base.is_bool() {
                    if let Some(group) = g.dialect.variable_groups.get(&id).copied() {
                        write!(g, "{}.", group_variable_name(group))?;
                    }
                } else {
                    suffix = g.msl_global_suffix();
                }
            }
            StorageQualifier::Buffer | StorageQualifier::Shared => suffix = g.msl_global_suffix(),
            StorageQualifier::Default if v.ty.is_image() => suffix = g.msl_global_suffix(),
            _ => {}
        }
        g.ksl_variable(id)?;
        write!(g, "{}", suffix)?;
        Ok(())
    }

    fn function_call(g: &mut Generator<'_, Self>, _id: ExprId, name: &str, args: &[ExprId]) -> GenResult {
        if g.msl_texture_access(name, args)? {
            return Ok(());
        }
        match (name, args) {
            ("workgroupMemoryBarrierAll", _) => {
                write!(g, "threadgroup_barrier(mem_flags::mem_device_and_threadgroup)")?;
                return Ok(());
            }
            ("workgroupMemoryBarrierGlobal", _) => {
                write!(g, "threadgroup_barrier(mem_flags::mem_device)")?;
                return Ok(());
            }
            ("workgroupMemoryBarrierShared", _) => {
                write!(g, "threadgroup_barrier(mem_flags::mem_threadgroup)")?;
                return Ok(());
            }
            ("imageStore", [image, coords, value]) => {
                g.expression(*image)?;
                write!(g, ".write(")?;
                g.expression(*value)?;
                write!(g, ", uint2(")?;
                g.expression(*coords)?;
                write!(g, "))")?;
                return Ok(());
            }
            ("subpassLoad", [input]) => {
                g.expression(*input)?;
                if !g.dialect.framebuffer_fetch {
                    write!(g, ".read(uint2(gl_FragCoord.xy))")?;
                }
                return Ok(());
            }
            ("pow", [a, b]) => {
                write!(g, "powr(")?;
                g.expression(*a)?;
                write!(g, ",")?;
                g.expression(*b)?;
                write!(g, ")")?;
                return Ok(());
            }
            _ => {}
        }

        let printed = if name == "normalize" && is_matrix_argument(g, args) {
            "transpose"
        } else {
            name
        };
        write!(g, "{}(", printed)?;
        let ast = g.ast;
        for (i, a) in args.iter().enumerate() {
            g.expression(*a)?;
            let e = ast.expr(*a);
            if matches!(e.kind, crate::ast::ExpressionKind::Variable(_)) && e.ty.is_sampler() {
                write!(g, ", ")?;
                g.expression(*a)?;
                write!(g, "{}", SAMPLER_SUFFIX)?;
            }
            if i + 1 < args.len() {
                write!(g, ",")?;
            }
        }
        let globals = g.msl_global_arguments(name);
        if !globals.is_empty() {
            if !args.is_empty() {
                write!(g, ", ")?;
            }
            write!(g, "{}", globals.join(", "))?;
        }
        write!(g, ")")?;
        Ok(())
    }
}
