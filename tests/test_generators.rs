use ksl_compiler::common::{ShaderStage, ShaderUniform, TargetApi, UniformGroup};
use ksl_compiler::{process_stage_info, Compiler, CompilerConfig};

const FRAGMENT: &str = "
uniform sampler2D<float> albedo;
uniform float4 tint;
in float2 uv;
out float4 frag_color { color(0) };

float4 shade(float2 coords)
{
    return texture(albedo, coords) * tint;
}

void main()
{
    frag_color = shade(uv);
}
";

const COMPUTE: &str = "
struct Particle
{
    float4 position;
    float4 velocity;
};
buffer Particle particles[] { ssbo };
numthreads(8, 8, 1);
void main()
{
    uint i = gl_GlobalInvocationID.x;
    particles[i].position += particles[i].velocity;
}
";

fn uniform_info() -> Vec<ShaderUniform> {
    vec![
        ShaderUniform::new("albedo", UniformGroup::PerDraw),
        ShaderUniform::new("tint", UniformGroup::PerDraw),
        ShaderUniform::new("particles", UniformGroup::PerDraw),
    ]
}

fn compile(source: &str, stage: ShaderStage, api: TargetApi) -> String {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut compiler = Compiler::new(CompilerConfig::default());
    compiler.set_uniform_info(uniform_info());
    let compiled = compiler.compile(source, stage, api);
    assert!(matches!(compiled, Ok(true)), "{}", compiler.log());
    compiler.result().unwrap().to_string()
}

fn assert_contains(text: &str, expected: &[&str]) {
    for e in expected {
        assert!(text.contains(e), "missing '{}' in:\n{}", e, text);
    }
}

#[test]
fn test_glsl_fragment() {
    let glsl = compile(FRAGMENT, ShaderStage::Fragment, TargetApi::OpenGL);
    assert_contains(
        &glsl,
        &[
            "layout( binding = 0 ) uniform highp sampler2D albedo;",
            "uniform highp vec4 tint;",
            "in highp vec2 uv;",
            "layout( location = 0 ) out highp vec4 frag_color;",
            "highp vec4 shade(",
            "return texture(albedo,",
            "frag_color = shade(uv);",
        ],
    );
    assert!(!glsl.contains("#version"));
}

#[test]
fn test_generated_lines_follow_source_lines() {
    let mut compiler = Compiler::new(CompilerConfig::default());
    assert_eq!(
        compiler.compile(FRAGMENT, ShaderStage::Fragment, TargetApi::OpenGLES).ok(),
        Some(true)
    );
    let glsl = compiler.result().unwrap();
    let source_line = compiler
        .preprocessed_source()
        .lines()
        .position(|l| l.contains("uniform float4 tint;"))
        .unwrap();
    let output_line = glsl
        .lines()
        .position(|l| l.contains("uniform highp vec4 tint;"))
        .unwrap();
    assert_eq!(source_line, output_line);
}

#[test]
fn test_glsl_compute() {
    let glsl = compile(COMPUTE, ShaderStage::Compute, TargetApi::OpenGL);
    assert_contains(
        &glsl,
        &[
            "layout(local_size_x = 8, local_size_y = 8, local_size_z = 1) in;",
            "layout( std430, binding = 0 ) buffer particles",
            "Particle particles_data__[];",
            "particles_data__[",
        ],
    );
}

const VERTEX: &str = "
uniform float4x4 mvp;
in float4 position;
in float2 texcoord;
out float2 uv;
void main()
{
    uv = texcoord;
    gl_Position = mvp * position;
}
";

#[test]
fn test_vulkan_pipeline() {
    let info = vec![
        ShaderUniform::new("mvp", UniformGroup::PerDraw),
        ShaderUniform::new("albedo", UniformGroup::PerDraw),
        ShaderUniform::new("tint", UniformGroup::PerRendererChange),
    ];
    let config = CompilerConfig {
        vulkan_push_constant_bytes: 16,
        ..CompilerConfig::default()
    };
    let mut vs = Compiler::new(config.clone());
    let mut fs = Compiler::new(config);
    vs.set_uniform_info(info.clone());
    fs.set_uniform_info(info);
    assert!(vs.analyze(VERTEX, ShaderStage::Vertex, TargetApi::Vulkan), "{}", vs.log());
    assert!(fs.analyze(FRAGMENT, ShaderStage::Fragment, TargetApi::Vulkan), "{}", fs.log());
    assert_eq!(process_stage_info(&mut [&mut vs, &mut fs]).ok(), Some(true));
    assert_eq!(vs.generate().ok(), Some(true), "{}", vs.log());
    assert_eq!(fs.generate().ok(), Some(true), "{}", fs.log());

    let vertex = vs.result().unwrap();
    assert_contains(
        vertex,
        &[
            "layout( std140, binding = 0, set = 0 ) uniform ksl_vk_per_draw_uniforms_block__",
            "highp mat4 mvp;",
            "layout( location = 0 ) in highp vec4 position;",
            "layout( location = 1 ) in highp vec2 texcoord;",
            "layout( location = 0 ) out highp vec2 uv;",
        ],
    );

    let fragment = fs.result().unwrap();
    assert_contains(
        fragment,
        &[
            "layout( push_constant ) uniform ksl_vk_push_constants_block__",
            "layout( offset = 0 ) highp vec4 tint;",
            "layout( binding = 1, set = 0 ) uniform highp sampler2D albedo;",
            "layout( location = 0 ) in highp vec2 uv;",
        ],
    );
}

#[test]
fn test_hlsl_fragment() {
    let hlsl = compile(FRAGMENT, ShaderStage::Fragment, TargetApi::D3D11);
    assert_contains(
        &hlsl,
        &[
            "cbuffer cb0 : register(b0)",
            "Texture2D albedo : register(t0);",
            "SamplerState albedo_sampler__ : register(s0);",
            "struct ksl_d3d_input_layout__",
            "float2 uv : uv;",
            "struct ksl_d3d_output_layout__",
            "float4 frag_color : SV_TARGET0;",
            "ksl_d3d_output_layout__ fragment_main(",
            "ksl_d3d_input_layout__ input",
            "float4 gl_FragCoord : SV_POSITION",
            "ksl_d3d_output_layout__ output = (ksl_d3d_output_layout__)0;",
            "albedo.Sample(albedo_sampler__, ",
            "output.frag_color = shade(input.uv);",
            "return output;",
        ],
    );
}

#[test]
fn test_hlsl_vertex_uses_mul() {
    let mut compiler = Compiler::new(CompilerConfig::default());
    compiler.set_uniform_info(vec![ShaderUniform::new("mvp", UniformGroup::PerDraw)]);
    assert_eq!(
        compiler.compile(VERTEX, ShaderStage::Vertex, TargetApi::D3D12).ok(),
        Some(true),
        "{}",
        compiler.log()
    );
    let hlsl = compiler.result().unwrap();
    assert_contains(
        hlsl,
        &[
            "ksl_d3d_output_layout__ vertex_main(",
            "uint gl_VertexID : SV_VertexID",
            ": SV_POSITION;",
            "mul(mvp,input.position)",
        ],
    );
}

#[test]
fn test_hlsl_compute() {
    let hlsl = compile(COMPUTE, ShaderStage::Compute, TargetApi::D3D11);
    assert_contains(
        &hlsl,
        &[
            "[numthreads(8, 8, 1)]",
            "void compute_main(",
            "RWStructuredBuffer<Particle> particles : register(u0);",
            "uint3 gl_GlobalInvocationID : SV_DispatchThreadID",
        ],
    );
}

#[test]
fn test_msl_fragment() {
    let msl = compile(FRAGMENT, ShaderStage::Fragment, TargetApi::MetalMacOS);
    assert!(msl.starts_with("#include <metal_stdlib>"));
    assert_contains(
        &msl,
        &[
            "struct ksl_mtl_per_draw_uniforms_type__",
            "struct ksl_mtl_input_layout__",
            "float2 uv [[ user(uv) ]];",
            "float4 frag_color [[ color(0) ]];",
            "fragment ksl_mtl_output_layout__ fragment_main(",
            "ksl_mtl_input_layout__ in [[ stage_in ]]",
            "constant ksl_mtl_per_draw_uniforms_type__ &_ksl_mtl_per_draw_uniforms_ [[ buffer(1) ]]",
            "texture2d<float> albedo [[ texture(0) ]]",
            "sampler albedo_sampler__ [[ sampler(0) ]]",
            "out.frag_color = shade(in.uv",
            "return out;",
        ],
    );
}

#[test]
fn test_msl_compute() {
    let msl = compile(COMPUTE, ShaderStage::Compute, TargetApi::MetalIOS);
    assert_contains(
        &msl,
        &[
            "kernel void compute_main(",
            "device Particle *particles [[ buffer(4) ]]",
            "uint3 gl_GlobalInvocationID    [[  thread_position_in_grid         ]]",
        ],
    );
}

#[test]
fn test_debug_ksl() {
    let config = CompilerConfig {
        generate_debug_ksl: true,
        ..CompilerConfig::default()
    };
    let mut compiler = Compiler::new(config);
    assert!(compiler.analyze(FRAGMENT, ShaderStage::Fragment, TargetApi::OpenGL));
    let ksl = compiler.debug_ksl().unwrap();
    assert_contains(
        ksl,
        &[
            "uniform sampler2D<float> albedo;",
            "uniform float4 tint;",
            "out float4 frag_color { color(0) } ;",
            "void main()",
        ],
    );
}
