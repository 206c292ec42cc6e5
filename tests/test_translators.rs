use ksl_compiler::analyzer::{Analyzer, AnalyzerConfig};
use ksl_compiler::ast::{AttribQualifier, InterfaceKind, NodeKind, ProgramAst, VarId};
use ksl_compiler::common::{ShaderStage, ShaderUniform, TargetApi, UniformGroup};
use ksl_compiler::translator::vulkan::{process_stage_info, VkGroup, VulkanTarget};
use ksl_compiler::translator::{Translator, TranslatorConfig};

fn analyze(source: &str, stage: ShaderStage) -> ProgramAst {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut tokenizer = ksl_compiler::tokenizer::Tokenizer::new();
    assert!(tokenizer.tokenize(source));
    let mut analyzer = Analyzer::new(tokenizer.tokens(), stage, AnalyzerConfig::default());
    let ok = analyzer.analyze();
    let (ast, diagnostics, _) = analyzer.into_parts();
    assert!(ok, "{:?}", diagnostics);
    ast
}

fn translator(api: TargetApi, stage: ShaderStage, config: TranslatorConfig) -> Translator {
    Translator::new(api, stage, config)
}

fn uniforms(names: &[(&str, UniformGroup)]) -> Vec<ShaderUniform> {
    names
        .iter()
        .map(|(n, g)| ShaderUniform::new(*n, *g))
        .collect()
}

fn var_id(ast: &ProgramAst, name: &str) -> VarId {
    ast.variables
        .iter()
        .position(|v| v.orig_name == name)
        .unwrap() as VarId
}

/// Attribute value of the root level definition of `name`, images included.
fn attribute(ast: &ProgramAst, name: &str, q: AttribQualifier) -> Option<u32> {
    let id = var_id(ast, name);
    ast.root.iter().find_map(|n| match &n.kind {
        NodeKind::VariableDefinitions(vd) if vd.first_id() == Some(id) => vd.attributes.value(q),
        NodeKind::ImageDefinition(img) if img.id == id => img.attributes.value(q),
        _ => None,
    })
}

fn messages(t: &Translator) -> Vec<String> {
    t.diagnostics().iter().map(|d| d.message.clone()).collect()
}

#[test]
fn test_gl_bindings() {
    let source = "
uniform sampler2D<float> albedo;
uniform sampler2D<float> normals;
struct Light
{
    float4 color;
};
buffer Light lights[] { ssbo, readonly };
out float4 frag_color { color(0) };
void main()
{
    frag_color = texture(albedo, float2(0.5, 0.5)) + texture(normals, float2(0.5, 0.5)) + lights[0].color;
}
";
    let mut ast = analyze(source, ShaderStage::Fragment);
    let mut t = translator(
        TargetApi::OpenGL,
        ShaderStage::Fragment,
        TranslatorConfig::default(),
    );
    // GL needs no uniform groups
    assert!(t.translate(&mut ast));

    assert_eq!(attribute(&ast, "albedo", AttribQualifier::Binding), Some(0));
    assert_eq!(attribute(&ast, "normals", AttribQualifier::Binding), Some(1));
    assert_eq!(attribute(&ast, "lights", AttribQualifier::Binding), Some(0));
    assert_eq!(ast.var(var_id(&ast, "lights")).new_name, "lights_data__");
}

const VULKAN_VERTEX: &str = "
uniform float4x4 mvp;
uniform float4 light_dir;
in float4 position;
in float3 normal;
out float3 v_normal;
void main()
{
    v_normal = normal;
    gl_Position = mvp * position + light_dir;
}
";

const VULKAN_FRAGMENT: &str = "
uniform float4 tint;
uniform sampler2D<float> albedo;
in float3 v_normal;
out float4 frag_color { color(0) };
void main()
{
    frag_color = tint * texture(albedo, v_normal.xy) + float4(v_normal, 0.0);
}
";

fn vulkan_uniforms() -> Vec<ShaderUniform> {
    uniforms(&[
        ("mvp", UniformGroup::PerDraw),
        ("light_dir", UniformGroup::PerRendererChange),
        ("tint", UniformGroup::PerDraw),
        ("albedo", UniformGroup::PerDraw),
    ])
}

#[test]
fn test_vulkan_pipeline_linking() {
    let mut vs = analyze(VULKAN_VERTEX, ShaderStage::Vertex);
    let mut fs = analyze(VULKAN_FRAGMENT, ShaderStage::Fragment);
    let config = TranslatorConfig {
        use_subpass: true,
        push_constant_bytes: 64,
    };
    let mut vt = translator(TargetApi::Vulkan, ShaderStage::Vertex, config.clone());
    let mut ft = translator(TargetApi::Vulkan, ShaderStage::Fragment, config);
    vt.set_uniform_info(vulkan_uniforms());
    ft.set_uniform_info(vulkan_uniforms());

    {
        let mut stages = [(&vs, &mut vt), (&fs, &mut ft)];
        assert!(process_stage_info(&mut stages));
    }

    // fragment stage first: tint fits, mvp is too large, light_dir fills up
    {
        let target = ft.strategy_mut::<VulkanTarget>().unwrap();
        assert!(target.is_linked());
        assert_eq!(target.group_of(var_id(&fs, "tint")), Some(VkGroup::PushConstant));
        assert_eq!(target.push_constant_offset(var_id(&fs, "tint")), Some(0));
        assert_eq!(target.set_id(VkGroup::PerDraw), Some(0));
        assert_eq!(target.set_id(VkGroup::RendererChange), None);
        assert_eq!(target.set_id(VkGroup::PushConstant), Some(1));
    }
    {
        let target = vt.strategy_mut::<VulkanTarget>().unwrap();
        assert_eq!(target.group_of(var_id(&vs, "mvp")), Some(VkGroup::PerDraw));
        assert_eq!(
            target.group_of(var_id(&vs, "light_dir")),
            Some(VkGroup::PushConstant)
        );
        assert_eq!(target.push_constant_offset(var_id(&vs, "light_dir")), Some(16));
    }

    assert!(vt.translate(&mut vs), "{:?}", messages(&vt));
    assert!(ft.translate(&mut fs), "{:?}", messages(&ft));

    let blocks: Vec<(InterfaceKind, &str, Option<u32>, Option<u32>, usize)> = vs
        .root
        .iter()
        .filter_map(|n| match &n.kind {
            NodeKind::InterfaceBlock(b) => {
                Some((b.kind, b.name.as_str(), b.binding, b.set, b.members.len()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(
        blocks[0],
        (
            InterfaceKind::Uniforms(UniformGroup::PerDraw),
            "ksl_vk_per_draw_uniforms_block__",
            Some(0),
            Some(0),
            1
        )
    );
    assert_eq!(blocks[1].0, InterfaceKind::PushConstants);
    assert_eq!(blocks[1].4, 1);

    // the vertex stage's uniform block comes first in set 0
    assert_eq!(attribute(&fs, "albedo", AttribQualifier::Binding), Some(1));
    assert_eq!(attribute(&fs, "albedo", AttribQualifier::Set), Some(0));

    assert_eq!(attribute(&vs, "position", AttribQualifier::Location), Some(0));
    assert_eq!(attribute(&vs, "normal", AttribQualifier::Location), Some(1));
    assert_eq!(attribute(&vs, "v_normal", AttribQualifier::Location), Some(0));
    assert_eq!(attribute(&fs, "v_normal", AttribQualifier::Location), Some(0));
    assert_eq!(attribute(&fs, "frag_color", AttribQualifier::Location), None);
}

#[test]
fn test_vulkan_stage_linked_twice() {
    let vs_a = analyze(VULKAN_VERTEX, ShaderStage::Vertex);
    let vs_b = analyze(VULKAN_VERTEX, ShaderStage::Vertex);
    let mut a = translator(TargetApi::Vulkan, ShaderStage::Vertex, TranslatorConfig::default());
    let mut b = translator(TargetApi::Vulkan, ShaderStage::Vertex, TranslatorConfig::default());
    a.set_uniform_info(vulkan_uniforms());
    b.set_uniform_info(vulkan_uniforms());

    let mut stages = [(&vs_a, &mut a), (&vs_b, &mut b)];
    assert!(!process_stage_info(&mut stages));
    assert_eq!(messages(&b), vec!["Vertex stage linked twice".to_string()]);
}

#[test]
fn test_vulkan_compute_links_alone() {
    let source = "
struct Particle
{
    float4 position;
};
buffer Particle particles[] { ssbo };
uniform float4 gravity;
numthreads(64, 1, 1);
void main()
{
    particles[gl_GlobalInvocationID.x].position += gravity;
}
";
    let mut ast = analyze(source, ShaderStage::Compute);
    let mut t = translator(TargetApi::Vulkan, ShaderStage::Compute, TranslatorConfig::default());
    t.set_uniform_info(uniforms(&[
        ("particles", UniformGroup::PerDraw),
        ("gravity", UniformGroup::PerDraw),
    ]));
    assert!(t.translate(&mut ast), "{:?}", messages(&t));

    let target = t.strategy_mut::<VulkanTarget>().unwrap();
    assert!(target.is_linked());
    assert_eq!(target.group_of(var_id(&ast, "gravity")), Some(VkGroup::PushConstant));
    // only the buffer is left in the per draw set
    assert_eq!(target.set_id(VkGroup::PerDraw), Some(0));
    assert_eq!(attribute(&ast, "particles", AttribQualifier::Binding), Some(0));
}

#[test]
fn test_missing_uniform_info() {
    let mut ast = analyze(VULKAN_FRAGMENT, ShaderStage::Fragment);
    let mut t = translator(
        TargetApi::Vulkan,
        ShaderStage::Fragment,
        TranslatorConfig::default(),
    );
    assert!(!t.translate(&mut ast));
    assert!(messages(&t).contains(&"Uniform info not set".to_string()));
}

#[test]
fn test_undescribed_uniform() {
    let mut ast = analyze(VULKAN_FRAGMENT, ShaderStage::Fragment);
    let mut t = translator(TargetApi::D3D11, ShaderStage::Fragment, TranslatorConfig::default());
    t.set_uniform_info(uniforms(&[("albedo", UniformGroup::PerDraw)]));
    assert!(!t.translate(&mut ast));
    assert_eq!(
        messages(&t)
            .iter()
            .filter(|m| *m == "Uniform info not set for: tint")
            .count(),
        1
    );
}

#[test]
fn test_d3d_registers_and_numthreads() {
    let source = "
struct Particle
{
    float4 position;
};
uniform sampler2D<float> noise;
buffer Particle sources[] { ssbo, readonly };
buffer Particle particles[] { ssbo };
image2D<float> target { writeonly };
numthreads(8, 8, 1);
void main()
{
    particles[gl_GlobalInvocationID.x].position = sources[gl_GlobalInvocationID.x].position;
    imageStore(target, int2(gl_GlobalInvocationID.xy), textureLod(noise, float2(0.5, 0.5), 0.0));
}
";
    let mut ast = analyze(source, ShaderStage::Compute);
    let mut t = translator(TargetApi::D3D11, ShaderStage::Compute, TranslatorConfig::default());
    t.set_uniform_info(vec![]);
    assert!(t.translate(&mut ast), "{:?}", messages(&t));

    assert_eq!(attribute(&ast, "noise", AttribQualifier::Binding), Some(0));
    assert_eq!(attribute(&ast, "sources", AttribQualifier::Binding), Some(1));
    assert_eq!(attribute(&ast, "particles", AttribQualifier::Binding), Some(0));
    assert_eq!(attribute(&ast, "target", AttribQualifier::Binding), Some(1));
    assert!(!ast
        .root
        .iter()
        .any(|n| matches!(n.kind, NodeKind::NumThreads(_))));
    assert_eq!(ast.num_threads, Some([8, 8, 1]));
}

#[test]
fn test_d3d_compute_requires_numthreads() {
    let mut ast = analyze("void main() {}", ShaderStage::Compute);
    let mut t = translator(TargetApi::D3D12, ShaderStage::Compute, TranslatorConfig::default());
    t.set_uniform_info(vec![]);
    assert!(!t.translate(&mut ast));
    assert_eq!(
        messages(&t),
        vec!["numthreads not found in compute shader".to_string()]
    );
}

#[test]
fn test_global_usage_is_transitive() {
    let source = "
uniform sampler2D<float> albedo;
uniform float4 tint;
buffer float4 data[] { ssbo, readonly };
in float2 uv;
out float4 frag_color { color(0) };
float4 leaf()
{
    return texture(albedo, uv) * tint + data[0];
}
float4 middle()
{
    return leaf();
}
float4 top()
{
    return middle();
}
float4 unrelated(float4 c)
{
    return c;
}
void main()
{
    frag_color = unrelated(top());
}
";
    let mut ast = analyze(source, ShaderStage::Fragment);
    let mut t = translator(
        TargetApi::MetalMacOS,
        ShaderStage::Fragment,
        TranslatorConfig::default(),
    );
    t.set_uniform_info(uniforms(&[
        ("albedo", UniformGroup::PerDraw),
        ("tint", UniformGroup::PerRendererChange),
    ]));
    assert!(t.translate(&mut ast), "{:?}", messages(&t));

    let albedo = var_id(&ast, "albedo");
    let data = var_id(&ast, "data");
    let usage = t.global_usage();
    assert!(!usage.contains_key("main"));
    for name in ["leaf", "middle", "top"] {
        let u = &usage[name];
        assert!(u.used_samplers.contains(&albedo), "{}", name);
        assert!(u.used_buffers.contains(&data), "{}", name);
        assert!(u.uses_in_attribs, "{}", name);
        assert!(!u.uses_out_attribs, "{}", name);
        assert!(u.uses_uniform_group(UniformGroup::PerRendererChange), "{}", name);
    }
    assert!(usage["top"].called_functions.contains("leaf"));
    assert_eq!(usage["unrelated"], Default::default());
}
