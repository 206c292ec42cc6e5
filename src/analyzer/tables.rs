//! Inbuilt types, qualifiers, functions and variables known to every KSL program.

use std::collections::HashMap;

use phf::phf_map;

use crate::ast::{AttribQualifier, Function, Variable};
use crate::common::{KslType, Precision, ShaderStage, TypeId};

/// KSL type names. Samplers, images and subpass inputs take their precision from a `<T>` argument.
pub const BUILTIN_TYPES: phf::Map<&'static str, (TypeId, Precision)> = phf_map! {
    "void" => (TypeId::Void, Precision::None),

    "float" => (TypeId::Float, Precision::High),
    "half" => (TypeId::Float, Precision::Medium),
    "lowp" => (TypeId::Float, Precision::Low),

    "float4" => (TypeId::Vec4, Precision::High),
    "half4" => (TypeId::Vec4, Precision::Medium),
    "lowp4" => (TypeId::Vec4, Precision::Low),
    "float3" => (TypeId::Vec3, Precision::High),
    "half3" => (TypeId::Vec3, Precision::Medium),
    "lowp3" => (TypeId::Vec3, Precision::Low),
    "float2" => (TypeId::Vec2, Precision::High),
    "half2" => (TypeId::Vec2, Precision::Medium),
    "lowp2" => (TypeId::Vec2, Precision::Low),

    "float4x4" => (TypeId::Mat4, Precision::High),
    "half4x4" => (TypeId::Mat4, Precision::Medium),
    "lowp4x4" => (TypeId::Mat4, Precision::Low),
    "float3x3" => (TypeId::Mat3, Precision::High),
    "half3x3" => (TypeId::Mat3, Precision::Medium),
    "lowp3x3" => (TypeId::Mat3, Precision::Low),
    "float2x2" => (TypeId::Mat2, Precision::High),
    "half2x2" => (TypeId::Mat2, Precision::Medium),
    "lowp2x2" => (TypeId::Mat2, Precision::Low),

    "int" => (TypeId::Int, Precision::High),
    "uint" => (TypeId::UInt, Precision::High),
    "short" => (TypeId::Int, Precision::Medium),
    "ushort" => (TypeId::UInt, Precision::Medium),
    "byte" => (TypeId::Int, Precision::Low),
    "ubyte" => (TypeId::UInt, Precision::Low),

    "int4" => (TypeId::Int4, Precision::High),
    "int3" => (TypeId::Int3, Precision::High),
    "int2" => (TypeId::Int2, Precision::High),
    "uint4" => (TypeId::UInt4, Precision::High),
    "uint3" => (TypeId::UInt3, Precision::High),
    "uint2" => (TypeId::UInt2, Precision::High),

    "short4" => (TypeId::Int4, Precision::Medium),
    "short3" => (TypeId::Int3, Precision::Medium),
    "short2" => (TypeId::Int2, Precision::Medium),
    "ushort4" => (TypeId::UInt4, Precision::Medium),
    "ushort3" => (TypeId::UInt3, Precision::Medium),
    "ushort2" => (TypeId::UInt2, Precision::Medium),

    "byte4" => (TypeId::Int4, Precision::Low),
    "byte3" => (TypeId::Int3, Precision::Low),
    "byte2" => (TypeId::Int2, Precision::Low),
    "ubyte4" => (TypeId::UInt4, Precision::Low),
    "ubyte3" => (TypeId::UInt3, Precision::Low),
    "ubyte2" => (TypeId::UInt2, Precision::Low),

    "bool" => (TypeId::Bool, Precision::None),
    "bool2" => (TypeId::Bool2, Precision::None),
    "bool3" => (TypeId::Bool3, Precision::None),
    "bool4" => (TypeId::Bool4, Precision::None),

    "sampler2D" => (TypeId::Sampler2D, Precision::None),
    "sampler2DArray" => (TypeId::Sampler2DArray, Precision::None),
    "samplerCube" => (TypeId::SamplerCube, Precision::None),
    "samplerCubeArray" => (TypeId::SamplerCubeArray, Precision::None),

    "sampler2DShadow" => (TypeId::Sampler2DShadow, Precision::None),
    "sampler2DArrayShadow" => (TypeId::Sampler2DArrayShadow, Precision::None),
    "samplerCubeShadow" => (TypeId::SamplerCubeShadow, Precision::None),

    "subpassInput" => (TypeId::SubpassInput, Precision::None),
};

/// Attribute qualifiers spelled as plain identifiers. `readonly` and `writeonly` are keywords.
pub const BUILTIN_QUALIFIERS: phf::Map<&'static str, AttribQualifier> = phf_map! {
    "color" => AttribQualifier::Color,
    "depth" => AttribQualifier::Depth,
    "ssbo" => AttribQualifier::Ssbo,
    "rgba8" => AttribQualifier::Rgba8,
    "rgba16f" => AttribQualifier::Rgba16f,
};

pub fn builtin_type(name: &str) -> Option<KslType> {
    BUILTIN_TYPES
        .get(name)
        .map(|(id, precision)| KslType::new(*id, *precision))
}

const PRECISIONS: [Precision; 3] = [Precision::High, Precision::Medium, Precision::Low];

/// Pushes `name(args) -> ret` once per precision, every type taking that precision.
fn uniform_precisions(fs: &mut Vec<Function>, name: &str, ret: TypeId, args: &[TypeId]) {
    for p in PRECISIONS {
        fs.push(Function::new(
            name,
            KslType::new(ret, p),
            args.iter().map(|a| KslType::new(*a, p)).collect(),
        ));
    }
}

fn high(id: TypeId) -> KslType {
    KslType::new(id, Precision::High)
}

lazy_static! {
    /// Stage independent math functions, in overload resolution order.
    static ref MATH_FUNCTIONS: Vec<Function> = {
        use TypeId::*;
        let mut fs = vec![];
        let f = &mut fs;

        uniform_precisions(f, "abs", Float, &[Float]);
        uniform_precisions(f, "abs", Vec2, &[Vec2]);
        uniform_precisions(f, "abs", Vec3, &[Vec3]);

        uniform_precisions(f, "ceil", Float, &[Float]);

        uniform_precisions(f, "clamp", Float, &[Float, Float, Float]);
        uniform_precisions(f, "clamp", Vec3, &[Vec3, Float, Float]);
        uniform_precisions(f, "clamp", Vec4, &[Vec4, Float, Float]);
        uniform_precisions(f, "clamp", Vec3, &[Vec3, Vec3, Vec3]);
        uniform_precisions(f, "clamp", Vec4, &[Vec4, Vec4, Vec4]);
        uniform_precisions(f, "clamp", Int, &[Int, Int, Int]);

        uniform_precisions(f, "cos", Float, &[Float]);
        uniform_precisions(f, "cross", Vec3, &[Vec3, Vec3]);

        for name in ["dFdx", "dFdy"] {
            uniform_precisions(f, name, Float, &[Float]);
            uniform_precisions(f, name, Vec2, &[Vec2]);
            uniform_precisions(f, name, Vec3, &[Vec3]);
        }

        uniform_precisions(f, "dot", Float, &[Vec2, Vec2]);
        uniform_precisions(f, "dot", Float, &[Vec3, Vec3]);
        uniform_precisions(f, "dot", Float, &[Vec4, Vec4]);

        uniform_precisions(f, "exp", Float, &[Float]);
        uniform_precisions(f, "exp2", Float, &[Float]);

        uniform_precisions(f, "floor", Float, &[Float]);
        uniform_precisions(f, "floor", Vec2, &[Vec2]);

        for t in [Float, Vec2, Vec3, Vec4] {
            uniform_precisions(f, "fract", t, &[t]);
        }

        f.push(Function::new("isinf", KslType::new(Bool, Precision::None), vec![high(Float)]));
        f.push(Function::new("isnan", KslType::new(Bool, Precision::None), vec![high(Float)]));

        uniform_precisions(f, "length", Float, &[Vec2]);
        uniform_precisions(f, "length", Float, &[Vec3]);
        uniform_precisions(f, "length", Float, &[Vec4]);

        uniform_precisions(f, "log", Float, &[Float]);
        uniform_precisions(f, "log2", Float, &[Float]);

        for name in ["max", "min"] {
            for t in [Float, Vec2, Vec3] {
                uniform_precisions(f, name, t, &[t, t]);
            }
        }

        uniform_precisions(f, "mix", Float, &[Float, Float, Float]);
        uniform_precisions(f, "mix", Vec3, &[Vec3, Vec3, Float]);
        uniform_precisions(f, "mix", Vec4, &[Vec4, Vec4, Float]);

        uniform_precisions(f, "normalize", Vec3, &[Vec3]);
        uniform_precisions(f, "normalize", Vec4, &[Vec4]);

        uniform_precisions(f, "pow", Float, &[Float, Float]);
        uniform_precisions(f, "pow", Vec2, &[Vec2, Vec2]);
        uniform_precisions(f, "pow", Vec3, &[Vec3, Vec3]);
        uniform_precisions(f, "pow", Vec4, &[Vec4, Vec3]);

        uniform_precisions(f, "smoothstep", Float, &[Float, Float, Float]);
        uniform_precisions(f, "smoothstep", Vec4, &[Vec4, Vec4, Vec4]);

        uniform_precisions(f, "sin", Float, &[Float]);
        uniform_precisions(f, "sqrt", Float, &[Float]);
        uniform_precisions(f, "reflect", Vec3, &[Vec3, Vec3]);
        uniform_precisions(f, "round", Float, &[Float]);

        // matrix transpose is spelled normalize in KSL
        uniform_precisions(f, "normalize", Mat3, &[Mat3]);
        uniform_precisions(f, "normalize", Mat4, &[Mat4]);

        for t in [Float, Vec2, Vec3, Vec4] {
            uniform_precisions(f, "trunc", t, &[t]);
        }
        fs
    };

    /// `(lhs, rhs) -> result` for the matrix and vector products that aren't component-wise.
    pub static ref MULTIPLICATION_TABLE: HashMap<(TypeId, TypeId), TypeId> = {
        use TypeId::*;
        let mut m = HashMap::new();
        m.insert((Mat2, Vec2), Vec2);
        m.insert((Vec2, Mat2), Vec2);
        m.insert((Mat3, Vec3), Vec3);
        m.insert((Vec3, Mat3), Vec3);
        m.insert((Mat4, Vec4), Vec4);
        m.insert((Vec4, Mat4), Vec4);
        m
    };
}

/// A sampling function: the sampler carries precision `p`, coordinates are always high precision.
fn sampling(
    fs: &mut Vec<Function>,
    name: &str,
    p: Precision,
    ret: TypeId,
    sampler: TypeId,
    coords: &[TypeId],
) {
    let mut params = vec![KslType::new(sampler, p)];
    params.extend(coords.iter().map(|c| high(*c)));
    fs.push(Function::new(name, KslType::new(ret, p), params));
}

fn texture_functions(stage: ShaderStage, fs: &mut Vec<Function>) {
    use TypeId::*;
    let fragment = stage == ShaderStage::Fragment;

    for p in PRECISIONS {
        sampling(fs, "texelFetch", p, Vec4, Sampler2D, &[Int2, Int]);
        sampling(fs, "texelFetchOffset", p, Vec4, Sampler2D, &[Int2, Int, Vec2]);
        // implicit derivatives only exist in fragment shaders
        if fragment {
            sampling(fs, "texture", p, Vec4, Sampler2D, &[Vec2]);
            sampling(fs, "texture", p, Vec4, Sampler2D, &[Vec2, Float]);
            sampling(fs, "texture", p, Vec4, Sampler2DArray, &[Vec3]);
            sampling(fs, "texture", p, Vec4, Sampler2DArray, &[Vec3, Float]);
            sampling(fs, "texture", p, Vec4, SamplerCube, &[Vec3]);
            sampling(fs, "texture", p, Vec4, SamplerCube, &[Vec3, Float]);
        }
        sampling(fs, "textureGather", p, Vec4, Sampler2D, &[Vec2]);
        sampling(fs, "textureGatherOffset", p, Vec4, Sampler2D, &[Vec2, Int2]);
        sampling(fs, "textureGatherOffsets", p, Vec4, Sampler2D, &[Vec2, Int2]);
        sampling(fs, "textureLod", p, Vec4, Sampler2D, &[Vec2, Float]);
        sampling(fs, "textureLod", p, Vec4, SamplerCube, &[Vec3, Float]);
        sampling(fs, "textureLodOffset", p, Vec4, Sampler2D, &[Vec2, Float, Int2]);
    }

    // no low precision shadow samplers
    for p in [Precision::High, Precision::Medium] {
        if fragment {
            sampling(fs, "texture", p, Float, Sampler2DShadow, &[Vec3]);
            sampling(fs, "texture", p, Float, Sampler2DArrayShadow, &[Vec4]);
            sampling(fs, "texture", p, Float, SamplerCubeShadow, &[Vec4]);
        }
        sampling(fs, "textureGather", p, Vec4, Sampler2DShadow, &[Vec2, Float]);
    }
}

/// Every inbuilt function available in `stage`, in overload resolution order.
pub fn builtin_functions(stage: ShaderStage) -> Vec<Function> {
    use TypeId::*;
    let mut fs = MATH_FUNCTIONS.clone();

    if stage == ShaderStage::Fragment {
        uniform_precisions(&mut fs, "subpassLoad", Vec4, &[SubpassInput]);
    }
    if stage == ShaderStage::Compute {
        for p in PRECISIONS {
            fs.push(Function::new(
                "imageStore",
                KslType::void(),
                vec![KslType::new(Image2D, p), high(Int2), KslType::new(Vec4, p)],
            ));
        }
        for name in [
            "workgroupMemoryBarrierAll",
            "workgroupMemoryBarrierGlobal",
            "workgroupMemoryBarrierShared",
        ] {
            fs.push(Function::new(name, KslType::void(), vec![]));
        }
    }

    texture_functions(stage, &mut fs);
    fs
}

/// Inbuilt variables of `stage`, in registration order.
pub fn builtin_variables(stage: ShaderStage) -> Vec<Variable> {
    use TypeId::*;
    let vars: Vec<(&str, KslType)> = match stage {
        ShaderStage::Vertex => vec![("gl_Position", high(Vec4)), ("gl_VertexID", high(Int))],
        ShaderStage::Compute => vec![
            ("gl_GlobalInvocationID", high(UInt3)),
            ("gl_LocalInvocationIndex", high(UInt)),
            ("gl_LocalInvocationID", high(UInt3)),
            ("gl_WorkGroupID", high(UInt3)),
        ],
        ShaderStage::Fragment => vec![
            ("gl_FragCoord", high(Vec4)),
            ("gl_FrontFacing", KslType::new(Bool, Precision::None)),
        ],
        _ => vec![],
    };
    vars.into_iter()
        .map(|(name, ty)| Variable::new(name, ty))
        .collect()
}

/// Letters a swizzle may use on a vector with `component_count` components.
pub fn selector_letters(component_count: u32) -> &'static str {
    match component_count {
        2 => "xyrgst",
        3 => "xyzrgbstp",
        4 => "xyzwrgbastpq",
        _ => "",
    }
}
