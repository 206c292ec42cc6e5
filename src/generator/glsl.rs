//! GLSL for OpenGL, OpenGL ES and Vulkan.

use std::fmt::Write;

use crate::ast::{
    AttribQualifier, Attributes, ExprId, ImageDefinition, InterfaceBlock, InterfaceKind, Literal,
    LiteralValue, StorageQualifier, VariableDefinitions,
};
use crate::common::{KslType, Precision, TargetApi, TypeId};
use crate::error::GenerateError;

use super::{Dialect, GenResult, Generator};

#[derive(Debug, Clone, Copy)]
pub struct GlslDialect {
    vulkan: bool,
    /// Subpass inputs are read natively, otherwise through a plain sampler.
    subpass_input: bool,
}

impl GlslDialect {
    pub fn new(api: TargetApi, use_subpass: bool) -> Self {
        let vulkan = api == TargetApi::Vulkan;
        Self {
            vulkan,
            subpass_input: vulkan && use_subpass,
        }
    }

    pub fn is_vulkan(&self) -> bool {
        self.vulkan
    }
}

fn precision_prefix(p: Precision) -> &'static str {
    match p {
        Precision::High => "highp ",
        Precision::Medium => "mediump ",
        Precision::Low => "lowp ",
        Precision::None | Precision::Invalid => "",
    }
}

fn effective_precision(g: &Generator<'_, GlslDialect>, ty: &KslType) -> Precision {
    match ty.precision {
        Precision::Medium | Precision::Low if g.ast.force_highp => Precision::High,
        p => p,
    }
}

/// Type spelling without the precision prefix, as required in constructors.
fn bare_type_name(g: &Generator<'_, GlslDialect>, ty: &KslType) -> String {
    use TypeId::*;
    let name = match ty.id {
        Void => "void",
        Float => "float",
        Vec2 => "vec2",
        Vec3 => "vec3",
        Vec4 => "vec4",
        Mat2 => "mat2",
        Mat3 => "mat3",
        Mat4 => "mat4",
        Int => "int",
        Int2 => "ivec2",
        Int3 => "ivec3",
        Int4 => "ivec4",
        UInt => "uint",
        UInt2 => "uvec2",
        UInt3 => "uvec3",
        UInt4 => "uvec4",
        Bool => "bool",
        Bool2 => "bvec2",
        Bool3 => "bvec3",
        Bool4 => "bvec4",
        Sampler2D => "sampler2D",
        Sampler2DArray => "sampler2DArray",
        SamplerCube => "samplerCube",
        SamplerCubeArray => "samplerCubeArray",
        Sampler2DShadow => "sampler2DShadow",
        Sampler2DArrayShadow => "sampler2DArrayShadow",
        SamplerCubeShadow => "samplerCubeShadow",
        Image2D => "image2D",
        SubpassInput if g.dialect.subpass_input => "subpassInput",
        SubpassInput => "sampler2D",
        Array => {
            return match &ty.base {
                Some(b) => format!("{}[]", bare_type_name(g, b)),
                None => g.ast.type_name(ty),
            }
        }
        Invalid | User(_) => return g.ast.type_name(ty),
    };
    name.to_string()
}

fn attribute_name(q: AttribQualifier) -> &'static str {
    match q {
        AttribQualifier::Color => "location",
        other => other.ksl_name(),
    }
}

impl Generator<'_, GlslDialect> {
    /// `layout( flag, key = value ) `, nothing for an empty set.
    fn glsl_layout(&mut self, attributes: &Attributes) -> GenResult {
        if attributes.is_empty() {
            return Ok(());
        }
        let items: Vec<String> = attributes
            .flags
            .iter()
            .map(|q| attribute_name(*q).to_string())
            .chain(
                attributes
                    .values
                    .iter()
                    .map(|(q, v)| format!("{} = {}", attribute_name(*q), v)),
            )
            .collect();
        write!(self, "layout( {} ) ", items.join(", "))?;
        Ok(())
    }

    fn glsl_buffer_definition(&mut self, line: u32, vd: &VariableDefinitions) -> GenResult {
        self.sync_line(line);
        let [dv] = vd.variables.as_slice() else {
            return Err(GenerateError::Internal(
                "buffer definitions hold a single variable".to_string(),
            ));
        };
        if !dv.init.is_empty() {
            return Err(GenerateError::Internal(
                "buffer definitions can't be initialized".to_string(),
            ));
        }
        let ast = self.ast;
        let v = ast.var(dv.id);

        let mut attributes = vd.attributes.clone();
        let is_ubo = !attributes.flags.remove(&AttribQualifier::Ssbo);
        let is_readonly = attributes.flags.remove(&AttribQualifier::Readonly);
        attributes.flags.insert(if is_ubo {
            AttribQualifier::Std140
        } else {
            AttribQualifier::Std430
        });

        self.glsl_layout(&attributes)?;
        if is_readonly {
            write!(self, "readonly ")?;
        }
        write!(self, "{}{}", if is_ubo { "uniform " } else { "buffer " }, v.orig_name)?;
        self.new_line();
        write!(self, "{{")?;
        self.indent += 1;
        self.new_line();

        let ty = self.type_name(&vd.ty);
        write!(self, "{} {}", ty, v.new_name)?;
        if v.ty.is_array() {
            write!(self, "[")?;
            if let Some(size) = dv.size {
                self.expression(size)?;
            }
            write!(self, "]")?;
        }
        write!(self, ";")?;

        self.indent -= 1;
        self.new_line();
        write!(self, "}};")?;
        self.new_line();
        Ok(())
    }

    fn glsl_subpass_load(&mut self, args: &[ExprId]) -> GenResult {
        if self.dialect.subpass_input {
            return self.ksl_function_call("subpassLoad", args);
        }
        write!(self, "texelFetch(")?;
        self.arguments(args, ",")?;
        write!(self, ", ivec2(gl_FragCoord.xy), 0)")?;
        Ok(())
    }
}

impl Dialect for GlslDialect {
    fn type_name(g: &Generator<'_, Self>, ty: &KslType) -> String {
        let p = effective_precision(g, ty);
        format!("{}{}", precision_prefix(p), bare_type_name(g, ty))
    }

    fn variable_definitions(g: &mut Generator<'_, Self>, line: u32, vd: &VariableDefinitions) -> GenResult {
        if vd.storage == StorageQualifier::Buffer {
            return g.glsl_buffer_definition(line, vd);
        }
        g.sync_line(line);
        g.glsl_layout(&vd.attributes)?;

        let ast = g.ast;
        let storage = Self::storage_qualifier(g, vd.storage);
        let ty = g.type_name(&vd.ty);
        write!(g, "{}{} ", storage, ty)?;

        for (i, dv) in vd.variables.iter().enumerate() {
            let v = ast.var(dv.id);
            write!(g, "{}", v.new_name)?;
            if v.ty.is_array() {
                write!(g, "[")?;
                match dv.size {
                    Some(size) => g.expression(size)?,
                    None if !dv.init.is_empty() => write!(g, "{}", dv.init.len())?,
                    None => {
                        return Err(GenerateError::Internal(format!(
                            "array {} has neither size nor initializers",
                            v.new_name
                        )))
                    }
                }
                write!(g, "]")?;
            }
            if !dv.init.is_empty() {
                write!(g, " = ")?;
                if v.ty.is_array() {
                    let element = bare_type_name(g, &vd.ty);
                    write!(g, "{}[{}](", element, dv.init.len())?;
                    g.arguments(&dv.init, ", ")?;
                    write!(g, ")")?;
                } else {
                    g.expression(dv.init[0])?;
                }
            }
            if i + 1 < vd.variables.len() {
                write!(g, ", ")?;
            }
        }
        write!(g, ";")?;
        Ok(())
    }

    fn image_definition(g: &mut Generator<'_, Self>, line: u32, img: &ImageDefinition) -> GenResult {
        g.sync_line(line);
        let ast = g.ast;
        let v = ast.var(img.id);

        let mut attributes = img.attributes.clone();
        attributes.flags.remove(&AttribQualifier::Readonly);
        attributes.flags.remove(&AttribQualifier::Writeonly);
        g.glsl_layout(&attributes)?;
        write!(g, "uniform ")?;
        match v.access {
            crate::ast::Access::ReadOnly => write!(g, "readonly ")?,
            crate::ast::Access::WriteOnly => write!(g, "writeonly ")?,
            crate::ast::Access::ReadWrite => {}
        }
        let p = effective_precision(g, &v.ty);
        write!(g, "{}image2D {};", precision_prefix(p), v.new_name)?;
        Ok(())
    }

    fn num_threads(g: &mut Generator<'_, Self>, line: u32, [x, y, z]: [u32; 3]) -> GenResult {
        g.sync_line(line);
        write!(
            g,
            "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;",
            x, y, z
        )?;
        g.new_line();
        Ok(())
    }

    fn interface_block(g: &mut Generator<'_, Self>, line: u32, b: &InterfaceBlock) -> GenResult {
        g.sync_line(line);
        match b.kind {
            InterfaceKind::PushConstants => write!(g, "layout( push_constant ) uniform {}", b.name)?,
            InterfaceKind::Uniforms(_) => {
                let mut attributes = Attributes::default();
                attributes.flags.insert(AttribQualifier::Std140);
                if let Some(set) = b.set {
                    attributes.values.insert(AttribQualifier::Set, set);
                }
                if let Some(binding) = b.binding {
                    attributes.values.insert(AttribQualifier::Binding, binding);
                }
                g.glsl_layout(&attributes)?;
                write!(g, "uniform {}", b.name)?;
            }
            InterfaceKind::Input | InterfaceKind::Output => {
                return Err(GenerateError::UnexpectedNode("stage interface block"))
            }
        }
        g.new_line();
        write!(g, "{{")?;
        g.indent += 1;
        for m in &b.members {
            g.new_line();
            g.statement(m)?;
        }
        g.indent -= 1;
        g.new_line();
        write!(g, "}};")?;
        g.new_line();
        Ok(())
    }

    fn literal(g: &mut Generator<'_, Self>, id: ExprId, lit: &Literal) -> GenResult {
        let force_highp = matches!(lit.value, LiteralValue::Float(_));
        g.ksl_literal(id, lit, force_highp)
    }

    fn constructor(g: &mut Generator<'_, Self>, _id: ExprId, ty: &KslType, args: &[ExprId]) -> GenResult {
        let name = bare_type_name(g, ty);
        write!(g, "{}(", name)?;
        g.arguments(args, ",")?;
        write!(g, ")")?;
        Ok(())
    }

    fn function_call(g: &mut Generator<'_, Self>, _id: ExprId, name: &str, args: &[ExprId]) -> GenResult {
        match name {
            "workgroupMemoryBarrierAll" | "workgroupMemoryBarrierGlobal" => {
                write!(g, "groupMemoryBarrier();")?;
                g.new_line();
                write!(g, "barrier()")?;
                Ok(())
            }
            "workgroupMemoryBarrierShared" => {
                write!(g, "memoryBarrierShared();")?;
                g.new_line();
                write!(g, "barrier()")?;
                Ok(())
            }
            "subpassLoad" => g.glsl_subpass_load(args),
            "normalize" if is_matrix_argument(g, args) => g.ksl_function_call("transpose", args),
            _ => g.ksl_function_call(name, args),
        }
    }
}

/// KSL spells matrix transpose as `normalize` of a matrix.
pub(crate) fn is_matrix_argument<D: Dialect>(g: &Generator<'_, D>, args: &[ExprId]) -> bool {
    match args {
        [a] => g.ast.expr(*a).ty.is_matrix(),
        _ => false,
    }
}
