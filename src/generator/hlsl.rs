//! HLSL for Direct3D 11 and 12.

use std::fmt::Write;

use crate::ast::{
    AttribQualifier, BinaryOp, ExprId, ForLoop, FunctionDefinition, ImageDefinition,
    InterfaceBlock, InterfaceKind, Literal, LiteralValue, ParamAccess, StorageQualifier, VarId,
    VariableDefinitions,
};
use crate::common::{KslType, Precision, ShaderStage, TypeId};
use crate::error::GenerateError;
use crate::translator::d3d::{
    D3dTarget, INPUT_LAYOUT, INPUT_NAME, OUTPUT_LAYOUT, OUTPUT_NAME, SAMPLER_SUFFIX,
};

use super::glsl::is_matrix_argument;
use super::{Dialect, GenResult, Generator};

const SAMPLE_2D_DEPTH: &str = "__ksl_sample_2d_depth__";
const SAMPLE_2D_ARRAY_DEPTH: &str = "__ksl_sample_2d_array_depth__";
const SAMPLE_CUBE_DEPTH: &str = "__ksl_sample_cube_depth__";

#[derive(Debug, Clone, Copy)]
pub struct HlslDialect {
    has_input: bool,
    has_output: bool,
}

impl HlslDialect {
    pub fn new(target: &D3dTarget) -> Self {
        Self {
            has_input: target.has_input_interface(),
            has_output: target.has_output_interface(),
        }
    }
}

fn sampler_state_type(ty: &KslType) -> &'static str {
    if ty.is_shadow_sampler() {
        "SamplerComparisonState"
    } else {
        "SamplerState"
    }
}

impl Generator<'_, HlslDialect> {
    /// `T.method(T_sampler__, rest...)`.
    fn hlsl_sample(&mut self, sampler: ExprId, method: &str, rest: &[ExprId]) -> GenResult {
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

    /// Comparison sampling through one of the header helpers.
    fn hlsl_sample_depth(&mut self, helper: &str, sampler: ExprId, coords: ExprId) -> GenResult {
        write!(self, "{}(", helper)?;
        self.expression(sampler)?;
        write!(self, ", ")?;
        self.expression(sampler)?;
        write!(self, "{}, ", SAMPLER_SUFFIX)?;
        self.expression(coords)?;
        write!(self, ")")?;
        Ok(())
    }

    fn hlsl_load(&mut self, sampler: ExprId, coords: ExprId, lod: ExprId, offset: Option<ExprId>) -> GenResult {
        self.expression(sampler)?;
        write!(self, ".Load(int3(")?;
        self.expression(coords)?;
        write!(self, ", ")?;
        self.expression(lod)?;
        write!(self, ")")?;
        if let Some(offset) = offset {
            write!(self, ", int2(")?;
            self.expression(offset)?;
            write!(self, ")")?;
        }
        write!(self, ")")?;
        Ok(())
    }

    /// Prints a texture function call, returns false if `name` is not one.
    fn hlsl_texture_access(&mut self, id: ExprId, name: &str, args: &[ExprId]) -> Result<bool, GenerateError> {
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
        let sampler_ty = ast.expr(sampler).ty.id;
        let precision = ast.expr(id).ty.precision;
        let cast = matches!(name, "texture" | "texelFetch" | "textureLod" | "textureLodOffset")
            && precision != Precision::High;
        if cast {
            let ty = self.type_name(&KslType::new(TypeId::Vec4, precision));
            write!(self, "(({})(", ty)?;
        }

        use TypeId::*;
        match (name, sampler_ty, rest) {
            ("texture", Sampler2D | SamplerCube | Sampler2DArray | SamplerCubeArray, [_]) => {
                self.hlsl_sample(sampler, "Sample", rest)?
            }
            ("texture", Sampler2D | SamplerCube | Sampler2DArray | SamplerCubeArray, [_, _]) => {
                self.hlsl_sample(sampler, "SampleBias", rest)?
            }
            ("texture", Sampler2DShadow, [tc]) => self.hlsl_sample_depth(SAMPLE_2D_DEPTH, sampler, *tc)?,
            ("texture", Sampler2DArrayShadow, [tc]) => {
                self.hlsl_sample_depth(SAMPLE_2D_ARRAY_DEPTH, sampler, *tc)?
            }
            ("texture", SamplerCubeShadow, [tc]) => self.hlsl_sample_depth(SAMPLE_CUBE_DEPTH, sampler, *tc)?,
            ("textureGather", Sampler2D, [_]) => self.hlsl_sample(sampler, "Gather", rest)?,
            ("textureGather", Sampler2DShadow, [_, _]) => self.hlsl_sample(sampler, "GatherCmp", rest)?,
            ("textureGatherOffset" | "textureGatherOffsets", Sampler2D, [_, _]) => {
                self.hlsl_sample(sampler, "Gather", rest)?
            }
            ("texelFetch", Sampler2D, [tc, lod]) => self.hlsl_load(sampler, *tc, *lod, None)?,
            ("texelFetchOffset", Sampler2D, [tc, lod, offset]) => {
                self.hlsl_load(sampler, *tc, *lod, Some(*offset))?
            }
            ("textureLod", Sampler2D | SamplerCube, [_, _]) => self.hlsl_sample(sampler, "SampleLevel", rest)?,
            ("textureLodOffset", Sampler2D, [_, _, _]) => self.hlsl_sample(sampler, "SampleLevel", rest)?,
            _ => {
                return Err(GenerateError::Internal(format!(
                    "{} is not supported on {}",
                    name,
                    ast.type_name(&ast.expr(sampler).ty)
                )))
            }
        }

        if cast {
            write!(self, "))")?;
        }
        Ok(true)
    }

    /// Arguments of a call with the sampler states and the global aggregates the callee needs.
    fn hlsl_call_arguments(&mut self, name: &str, args: &[ExprId]) -> GenResult {
        let ast = self.ast;
        for (i, a) in args.iter().enumerate() {
            self.expression(*a)?;
            let e = ast.expr(*a);
            if matches!(e.kind, crate::ast::ExpressionKind::Variable(_)) && e.ty.is_sampler() {
                write!(self, ", ")?;
                self.expression(*a)?;
                write!(self, "{}", SAMPLER_SUFFIX)?;
            }
            if i + 1 < args.len() {
                write!(self, ",")?;
            }
        }

        let usage = self.usage_of(name);
        let mut globals: Vec<String> = vec![];
        if usage.uses_in_attribs {
            globals.push(INPUT_NAME.to_string());
        }
        if usage.uses_out_attribs {
            globals.push(OUTPUT_NAME.to_string());
        }
        globals.extend(usage.used_inbuilts.iter().map(|id| ast.var(*id).new_name.clone()));
        if !globals.is_empty() {
            if !args.is_empty() {
                write!(self, ", ")?;
            }
            write!(self, "{}", globals.join(", "))?;
        }
        Ok(())
    }

    fn hlsl_parameter(&mut self, access: Option<&ParamAccess>, id: VarId, size: Option<ExprId>) -> GenResult {
        match access {
            Some(ParamAccess::Out) => write!(self, "out ")?,
            Some(ParamAccess::InOut) => write!(self, "inout ")?,
            _ => {}
        }
        let ast = self.ast;
        let v = ast.var(id);
        let ty = self.type_name(v.ty.base_type());
        write!(self, "{} {}", ty, v.new_name)?;
        if v.ty.is_array() {
            write!(self, "[")?;
            if let Some(size) = size {
                self.expression(size)?;
            }
            write!(self, "]")?;
        }
        if v.ty.is_sampler() {
            write!(
                self,
                ", {} {}{}",
                sampler_state_type(&v.ty),
                v.new_name,
                SAMPLER_SUFFIX
            )?;
        }
        Ok(())
    }

    fn hlsl_function(&mut self, line: u32, f: &FunctionDefinition) -> GenResult {
        self.sync_line(line);
        let ast = self.ast;
        let function = &ast.functions[f.id as usize];
        let ret = self.type_name(&function.return_type);
        write!(self, "{} {}(", ret, function.name)?;
        for (i, p) in f.params.iter().enumerate() {
            self.hlsl_parameter(function.param_access.get(i), p.id, p.size)?;
            if i + 1 < f.params.len() {
                write!(self, ", ")?;
            }
        }

        let usage = self.usage_of(&function.name);
        let mut need_comma = !f.params.is_empty();
        if usage.uses_in_attribs || usage.uses_out_attribs {
            self.new_line();
        }
        if usage.uses_in_attribs {
            if need_comma {
                write!(self, ", ")?;
            }
            write!(self, "inout {} {}", INPUT_LAYOUT, INPUT_NAME)?;
            need_comma = true;
        }
        if usage.uses_out_attribs {
            if need_comma {
                write!(self, ", ")?;
            }
            write!(self, "inout {} {}", OUTPUT_LAYOUT, OUTPUT_NAME)?;
            need_comma = true;
        }
        if !usage.used_inbuilts.is_empty() {
            self.new_line();
        }
        for id in &usage.used_inbuilts {
            if need_comma {
                write!(self, ", ")?;
            }
            let v = ast.var(*id);
            let ty = self.type_name(&v.ty);
            write!(self, "{} {}", ty, v.new_name)?;
            need_comma = true;
        }
        write!(self, ")")?;
        self.new_line();
        self.block(0, &f.body)
    }

    fn hlsl_main(&mut self, f: &FunctionDefinition) -> GenResult {
        let ast = self.ast;
        if ast.stage == ShaderStage::Compute {
            let Some([x, y, z]) = ast.num_threads else {
                return Err(GenerateError::Internal("numthreads not found".to_string()));
            };
            write!(self, "[numthreads({}, {}, {})]", x, y, z)?;
            self.new_line();
        }
        let ret = if self.dialect.has_output { OUTPUT_LAYOUT } else { "void" };
        let name = match ast.stage {
            ShaderStage::Vertex => "vertex_main",
            ShaderStage::Fragment => "fragment_main",
            ShaderStage::Compute => "compute_main",
            _ => return Err(GenerateError::UnexpectedNode("entry point of an unsupported stage")),
        };
        write!(self, "{} {}(", ret, name)?;

        let mut params: Vec<String> = vec![];
        if self.dialect.has_input {
            params.push(format!("{} {}", INPUT_LAYOUT, INPUT_NAME));
        }
        match ast.stage {
            ShaderStage::Vertex => params.push("uint gl_VertexID : SV_VertexID".to_string()),
            ShaderStage::Fragment => {
                params.push("float4 gl_FragCoord : SV_POSITION".to_string());
                params.push("bool gl_FrontFacing : SV_IsFrontFace".to_string());
            }
            ShaderStage::Compute => {
                params.push("uint3 gl_WorkGroupID : SV_GroupID".to_string());
                params.push("uint3 gl_LocalInvocationID : SV_GroupThreadID".to_string());
                params.push("uint3 gl_GlobalInvocationID : SV_DispatchThreadID".to_string());
                params.push("uint  gl_LocalInvocationIndex : SV_GroupIndex".to_string());
            }
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

    fn hlsl_stage_struct(&mut self, line: u32, b: &InterfaceBlock) -> GenResult {
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
            write!(self, " : {};", semantic)?;
        }
        self.indent -= 1;
        self.new_line();
        write!(self, "}};")?;
        self.new_line();
        Ok(())
    }

    fn hlsl_constant_buffer(&mut self, b: &InterfaceBlock) -> GenResult {
        write!(self, "cbuffer {} : register(b{})", b.name, b.binding.unwrap_or(0))?;
        self.new_line();
        write!(self, "{{")?;
        self.indent += 1;
        self.new_line();
        let sync = self.do_sync_line;
        self.do_sync_line = false;
        for (i, m) in b.members.iter().enumerate() {
            self.statement(m)?;
            if i + 1 != b.members.len() {
                self.new_line();
            }
        }
        self.do_sync_line = sync;
        self.indent -= 1;
        self.new_line();
        write!(self, "}};")?;
        self.new_line();
        Ok(())
    }
}

impl Dialect for HlslDialect {
    fn header(g: &mut Generator<'_, Self>) -> GenResult {
        let helpers = [
            (SAMPLE_2D_DEPTH, "Texture2D", "float3", "tc.xy, tc.z"),
            (SAMPLE_2D_ARRAY_DEPTH, "Texture2DArray", "float4", "tc.xyz, tc.w"),
            (SAMPLE_CUBE_DEPTH, "TextureCube", "float4", "tc.xyz, tc.w"),
        ];
        for (name, texture, coords, split) in helpers {
            write!(g, "float {}({} t, SamplerComparisonState s, {} tc)", name, texture, coords)?;
            g.new_line();
            write!(g, "{{")?;
            g.new_line();
            write!(g, "   return t.SampleCmp(s, {}); ", split)?;
            g.new_line();
            write!(g, "}}")?;
            g.new_line();
            g.new_line();
        }
        Ok(())
    }

    fn type_name(g: &Generator<'_, Self>, ty: &KslType) -> String {
        use TypeId::*;
        let precision = match ty.precision {
            Precision::Medium | Precision::Low if g.ast.force_highp => Precision::High,
            p => p,
        };
        let (f, i, u) = match precision {
            Precision::High => ("float", "int", "uint"),
            Precision::Medium => ("min16float", "min16int", "min16uint"),
            Precision::Low => ("min10float", "min12int", "min16uint"),
            Precision::None | Precision::Invalid => ("float_noprec", "int_noprec", "uint_noprec"),
        };
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
            UInt => u.to_string(),
            UInt2 => format!("{u}2"),
            UInt3 => format!("{u}3"),
            UInt4 => format!("{u}4"),
            Sampler2D | Sampler2DShadow | SubpassInput | Image2D => "Texture2D".to_string(),
            Sampler2DArray | Sampler2DArrayShadow => "Texture2DArray".to_string(),
            SamplerCube | SamplerCubeShadow => "TextureCube".to_string(),
            SamplerCubeArray => "TextureCubeArray".to_string(),
            _ => g.ast.type_name(ty),
        }
    }

    fn storage_qualifier(g: &Generator<'_, Self>, storage: StorageQualifier) -> &'static str {
        match storage {
            StorageQualifier::Shared => "groupshared ",
            StorageQualifier::Const if g.visiting_global_definition => "static const ",
            StorageQualifier::Const => "const ",
            _ => "",
        }
    }

    fn variable_definitions(g: &mut Generator<'_, Self>, line: u32, vd: &VariableDefinitions) -> GenResult {
        g.sync_line(line);
        let ast = g.ast;
        let Some(id) = vd.first_id() else {
            return Ok(());
        };
        let v = ast.var(id);
        let binding = vd.attributes.value(AttribQualifier::Binding).unwrap_or(0);

        if vd.storage == StorageQualifier::Buffer {
            let is_ssbo = vd.attributes.has(AttribQualifier::Ssbo);
            let is_readonly = vd.attributes.has(AttribQualifier::Readonly);
            let rw = is_ssbo && !is_readonly;
            let ty = g.type_name(v.ty.base_type());
            write!(
                g,
                "{}<{}> {} : register({}{});",
                if rw { "RWStructuredBuffer" } else { "StructuredBuffer" },
                ty,
                v.orig_name,
                if rw { 'u' } else { 't' },
                binding
            )?;
            g.new_line();
            return Ok(());
        }

        if vd.storage == StorageQualifier::Uniform && (v.ty.is_sampler() || v.ty.is_subpass_input()) {
            let ty = g.type_name(&v.ty);
            write!(g, "{} {} : register(t{});", ty, v.orig_name, binding)?;
            g.new_line();
            write!(
                g,
                "{} {}{} : register(s{});",
                sampler_state_type(&v.ty),
                v.orig_name,
                SAMPLER_SUFFIX,
                binding
            )?;
            g.new_line();
            return Ok(());
        }

        let storage = Self::storage_qualifier(g, vd.storage);
        let ty = g.type_name(&vd.ty);
        write!(g, "{}{} ", storage, ty)?;
        g.ksl_declarators(vd)?;
        write!(g, ";")?;
        Ok(())
    }

    fn function(g: &mut Generator<'_, Self>, line: u32, f: &FunctionDefinition) -> GenResult {
        if f.entry.is_some() {
            g.sync_line(line);
            g.hlsl_main(f)
        } else {
            g.hlsl_function(line, f)
        }
    }

    fn image_definition(g: &mut Generator<'_, Self>, line: u32, img: &ImageDefinition) -> GenResult {
        g.sync_line(line);
        let ast = g.ast;
        let v = ast.var(img.id);
        let ty = match v.access {
            crate::ast::Access::ReadOnly => "Texture2D",
            _ => "RWTexture2D<unorm float4>",
        };
        let binding = img.attributes.value(AttribQualifier::Binding).unwrap_or(0);
        write!(g, "{} {} : register(u{});", ty, v.new_name, binding)?;
        Ok(())
    }

    fn interface_block(g: &mut Generator<'_, Self>, line: u32, b: &InterfaceBlock) -> GenResult {
        match b.kind {
            InterfaceKind::Uniforms(_) => g.hlsl_constant_buffer(b),
            InterfaceKind::Input | InterfaceKind::Output => g.hlsl_stage_struct(line, b),
            InterfaceKind::PushConstants => Err(GenerateError::UnexpectedNode("push constants")),
        }
    }

    fn entry_output_definition(g: &mut Generator<'_, Self>) -> GenResult {
        write!(g, "{0} {1} = ({0})0;", OUTPUT_LAYOUT, OUTPUT_NAME)?;
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

    fn for_statement(g: &mut Generator<'_, Self>, line: u32, f: &ForLoop) -> GenResult {
        g.sync_line(line);
        if f.is_loop {
            write!(g, "[ loop ]")?;
            g.new_line();
        }
        g.ksl_for(line, f)
    }

    fn literal(g: &mut Generator<'_, Self>, id: ExprId, lit: &Literal) -> GenResult {
        let force_highp = matches!(lit.value, LiteralValue::Float(_));
        g.ksl_literal(id, lit, force_highp)
    }

    fn variable(g: &mut Generator<'_, Self>, id: VarId) -> GenResult {
        let ast = g.ast;
        let v = ast.var(id);
        match v.storage {
            StorageQualifier::In => write!(g, "{}.", INPUT_NAME)?,
            StorageQualifier::Out => write!(g, "{}.", OUTPUT_NAME)?,
            _ => {}
        }
        g.ksl_variable(id)?;
        if v.storage == StorageQualifier::Buffer && !v.ty.is_array() {
            write!(g, "[0]")?;
        }
        Ok(())
    }

    fn constructor(g: &mut Generator<'_, Self>, id: ExprId, ty: &KslType, args: &[ExprId]) -> GenResult {
        if let [arg] = args {
            let name = g.type_name(ty);
            write!(g, "(({})(", name)?;
            g.expression(*arg)?;
            write!(g, "))")?;
            return Ok(());
        }
        if g.ast.expr(id).ty.is_matrix() {
            write!(g, "transpose(")?;
            g.ksl_constructor(ty, args)?;
            write!(g, ")")?;
            return Ok(());
        }
        g.ksl_constructor(ty, args)
    }

    fn array_access(g: &mut Generator<'_, Self>, base: ExprId, index: ExprId) -> GenResult {
        if g.ast.expr(base).ty.is_matrix() {
            write!(g, "transpose(")?;
            g.expression(base)?;
            write!(g, ")[")?;
            g.expression(index)?;
            write!(g, "]")?;
            return Ok(());
        }
        g.ksl_array_access(base, index)
    }

    fn binary(g: &mut Generator<'_, Self>, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> GenResult {
        let (l, r) = (&g.ast.expr(lhs).ty, &g.ast.expr(rhs).ty);
        let product = (l.is_matrix() && r.is_matrix())
            || (l.is_matrix() && r.is_vector())
            || (l.is_vector() && r.is_matrix());
        if op == BinaryOp::Mul && product {
            write!(g, "mul(")?;
            g.expression(lhs)?;
            write!(g, ",")?;
            g.expression(rhs)?;
            write!(g, ")")?;
            return Ok(());
        }
        g.ksl_binary(op, lhs, rhs)
    }

    fn function_call(g: &mut Generator<'_, Self>, id: ExprId, name: &str, args: &[ExprId]) -> GenResult {
        if g.hlsl_texture_access(id, name, args)? {
            return Ok(());
        }
        match (name, args) {
            ("subpassLoad", [input]) => {
                g.expression(*input)?;
                write!(g, ".Load(int3(gl_FragCoord.xy,0))")?;
                return Ok(());
            }
            ("workgroupMemoryBarrierAll", _) => {
                write!(g, "AllMemoryBarrierWithGroupSync()")?;
                return Ok(());
            }
            ("workgroupMemoryBarrierGlobal", _) => {
                write!(g, "DeviceMemoryBarrierWithGroupSync()")?;
                return Ok(());
            }
            ("workgroupMemoryBarrierShared", _) => {
                write!(g, "GroupMemoryBarrierWithGroupSync()")?;
                return Ok(());
            }
            ("imageStore", [image, coords, value]) => {
                g.expression(*image)?;
                write!(g, "[")?;
                g.expression(*coords)?;
                write!(g, "] = ")?;
                g.expression(*value)?;
                return Ok(());
            }
            _ => {}
        }

        let printed = match name {
            "fract" => "frac",
            "mix" => "lerp",
            "normalize" if is_matrix_argument(g, args) => "transpose",
            other => other,
        };
        write!(g, "{}(", printed)?;
        g.hlsl_call_arguments(name, args)?;
        write!(g, ")")?;
        Ok(())
    }
}
