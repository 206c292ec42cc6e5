use ksl_compiler::analyzer::{Analyzer, AnalyzerConfig};
use ksl_compiler::ast::{BinaryOp, ExprId, ExpressionKind, ProgramAst};
use ksl_compiler::common::{
    ShaderReflection, ShaderStage, TypeId, UniformFormat, VertexAttribFormat,
};
use ksl_compiler::error::{Diagnostic, Severity};
use ksl_compiler::tokenizer::Tokenizer;

struct Analyzed {
    ok: bool,
    ast: ProgramAst,
    diagnostics: Vec<Diagnostic>,
    reflection: ShaderReflection,
}

fn analyze_with(source: &str, stage: ShaderStage, config: AnalyzerConfig) -> Analyzed {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut tokenizer = Tokenizer::new();
    assert!(tokenizer.tokenize(source));
    let mut analyzer = Analyzer::new(tokenizer.tokens(), stage, config);
    let ok = analyzer.analyze();
    let (ast, diagnostics, reflection) = analyzer.into_parts();
    Analyzed {
        ok,
        ast,
        diagnostics,
        reflection,
    }
}

fn analyze(source: &str, stage: ShaderStage) -> Analyzed {
    analyze_with(source, stage, AnalyzerConfig::default())
}

fn count_starting_with(diagnostics: &[Diagnostic], prefix: &str) -> usize {
    diagnostics
        .iter()
        .filter(|d| d.message.starts_with(prefix))
        .count()
}

fn multiplication_types(ast: &ProgramAst) -> Vec<TypeId> {
    ast.expressions
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                ExpressionKind::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )
        })
        .map(|e| e.ty.id)
        .collect()
}

#[test]
fn test_matrix_vector_multiplication() {
    let source = "
uniform float4x4 mvp;
in float4 position;
void main()
{
    gl_Position = mvp * position;
    float4 scaled = position * position;
}
";
    let a = analyze(source, ShaderStage::Vertex);
    assert!(a.ok, "{:?}", a.diagnostics);
    assert_eq!(multiplication_types(&a.ast), vec![TypeId::Vec4, TypeId::Vec4]);
}

#[test]
fn test_matrix_vector_size_mismatch() {
    let source = "
uniform float4x4 mvp;
in float3 position;
void main()
{
    gl_Position = mvp * position;
}
";
    let a = analyze(source, ShaderStage::Vertex);
    assert!(!a.ok);
    assert_eq!(
        count_starting_with(&a.diagnostics, "type mismatch for operation"),
        1,
        "{:?}",
        a.diagnostics
    );
}

fn swizzle(selector: &str) -> Analyzed {
    let result = match selector.len() {
        1 => "float".to_string(),
        n => format!("float{}", n.min(4)),
    };
    let source = format!(
        "
in float3 normal;
out float4 frag_color {{ color(0) }};
void main()
{{
    {} t = normal.{};
    frag_color = float4(normal, 1.0);
}}
",
        result, selector
    );
    analyze(&source, ShaderStage::Fragment)
}

#[test]
fn test_swizzles() {
    for selector in ["x", "xyz", "rgb", "stp", "zyx", "xt", "zzzz"] {
        let a = swizzle(selector);
        assert!(a.ok, "{}: {:?}", selector, a.diagnostics);
    }
}

#[test]
fn test_invalid_swizzles() {
    for selector in ["xyzw", "w", "q", "xyzzy"] {
        let a = swizzle(selector);
        assert!(!a.ok, "{}", selector);
        let prefix = format!("invalid selector: \"{}\" for type <float3>", selector);
        assert_eq!(
            count_starting_with(&a.diagnostics, &prefix),
            1,
            "{:?}",
            a.diagnostics
        );
    }
}

#[test]
fn test_integer_division_warns() {
    let source = "
void main()
{
    int a = 7;
    int b = 2;
    int c = a / b;
    uint d = 7u / 2u;
}
";
    let a = analyze(source, ShaderStage::Vertex);
    assert!(a.ok, "{:?}", a.diagnostics);
    assert_eq!(count_starting_with(&a.diagnostics, "integer divides"), 1);
    assert!(a
        .diagnostics
        .iter()
        .all(|d| d.severity == Severity::Warning));
}

fn many_uniforms(count: usize) -> String {
    let mut source = String::from("\n");
    for i in 0..count {
        source.push_str(&format!("uniform float4 u{};\n", i));
    }
    source.push_str("void main() {}\n");
    source
}

#[test]
fn test_too_many_uniforms() {
    let a = analyze(&many_uniforms(300), ShaderStage::Fragment);
    assert!(!a.ok);
    let errors: Vec<&Diagnostic> = a.diagnostics.iter().filter(|d| d.is_error()).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].message,
        "Too many uniforms in stage: 4800 bytes. (4096 bytes allowed)."
    );
}

#[test]
fn test_uniform_budget_is_inclusive() {
    let a = analyze(&many_uniforms(256), ShaderStage::Fragment);
    assert!(a.ok, "{:?}", a.diagnostics.iter().find(|d| d.is_error()));
    // every one of them is unused
    assert_eq!(count_starting_with(&a.diagnostics, "unused variable"), 256);
}

#[test]
fn test_unused_interface_variable_warns() {
    let source = "
uniform float4 tint;
uniform float4 unused_tint;
out float4 frag_color { color(0) };
void main()
{
    frag_color = tint;
}
";
    let a = analyze(source, ShaderStage::Fragment);
    assert!(a.ok, "{:?}", a.diagnostics);
    assert_eq!(a.diagnostics.len(), 1, "{:?}", a.diagnostics);
    assert_eq!(a.diagnostics[0].severity, Severity::Warning);
    assert!(a.diagnostics[0].message.starts_with("unused variable"));
    assert!(a.diagnostics[0].message.contains("unused_tint"));
    assert_eq!(a.diagnostics[0].line, 3);
}

#[test]
fn test_readwrite_ssbo_in_fragment() {
    let source = |attributes: &str| {
        format!(
            "
struct Light
{{
    float4 color;
}};
buffer Light lights[] {{ {} }};
out float4 frag_color {{ color(0) }};
void main()
{{
    frag_color = lights[0].color;
}}
",
            attributes
        )
    };

    let a = analyze(&source("ssbo"), ShaderStage::Fragment);
    assert!(!a.ok);
    assert_eq!(
        count_starting_with(&a.diagnostics, "Readwrite ssbo in fragment shader not allowed."),
        1
    );

    let a = analyze(&source("ssbo, readonly"), ShaderStage::Fragment);
    assert!(a.ok, "{:?}", a.diagnostics);
}

#[test]
fn test_invalid_attribute_qualifier() {
    let source = "
uniform float4 tint { color(0) };
void main()
{
    gl_Position = tint;
}
";
    let a = analyze(source, ShaderStage::Vertex);
    assert!(!a.ok);
    assert_eq!(
        count_starting_with(&a.diagnostics, "Invalid attribute qualifier: \"color\""),
        1,
        "{:?}",
        a.diagnostics
    );
}

const MIXED_PRECISION: &str = "
out float4 frag_color { color(0) };
void main()
{
    half4 h = half4(0.5h, 0.5h, 0.5h, 1.0h);
    float4 f = float4(1.0, 1.0, 1.0, 1.0);
    float4 g = f * h;
    frag_color = f * float4(h);
}
";

#[test]
fn test_precision_mismatch_severity() {
    let a = analyze(MIXED_PRECISION, ShaderStage::Fragment);
    assert!(a.ok, "{:?}", a.diagnostics);
    assert_eq!(
        count_starting_with(&a.diagnostics, "type precision mismatch for operation"),
        1,
        "{:?}",
        a.diagnostics
    );

    let config = AnalyzerConfig {
        precision_mismatch_severity: Severity::Error,
        ..AnalyzerConfig::default()
    };
    let a = analyze_with(MIXED_PRECISION, ShaderStage::Fragment, config);
    assert!(!a.ok);
    assert!(a
        .diagnostics
        .iter()
        .any(|d| d.is_error() && d.message.starts_with("type precision mismatch for operation")));
}

#[test]
fn test_revalidation_is_idempotent() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut tokenizer = Tokenizer::new();
    assert!(tokenizer.tokenize(MIXED_PRECISION));
    let mut analyzer = Analyzer::new(
        tokenizer.tokens(),
        ShaderStage::Fragment,
        AnalyzerConfig::default(),
    );
    assert!(analyzer.analyze(), "{:?}", analyzer.diagnostics());

    let types = |analyzer: &Analyzer| -> Vec<String> {
        analyzer
            .ast()
            .expressions
            .iter()
            .map(|e| format!("{:?}", e.ty))
            .collect()
    };
    let before = types(&analyzer);
    let reported = analyzer.diagnostics().len();
    assert!(!before.is_empty());

    for id in 0..before.len() as ExprId {
        assert!(analyzer.validate_expression(id), "expression {}", id);
    }
    assert_eq!(types(&analyzer), before);
    assert_eq!(analyzer.diagnostics().len(), reported, "{:?}", analyzer.diagnostics());
    assert_eq!(
        count_starting_with(analyzer.diagnostics(), "type precision mismatch for operation"),
        1
    );
}

#[test]
fn test_vertex_reflection() {
    let source = "
uniform float4x4 mvp;
uniform float4 offsets[2 * 2];
uniform sampler2D<float> albedo;
in float3 position;
in float2 uv;
out float2 v_uv;
void main()
{
    v_uv = uv;
    gl_Position = mvp * float4(position, 1.0) + offsets[1];
}
";
    let a = analyze(source, ShaderStage::Vertex);
    assert!(a.ok, "{:?}", a.diagnostics);
    let r = &a.reflection;

    let attribs: Vec<(&str, VertexAttribFormat)> = r
        .used_vertex_attribs
        .iter()
        .map(|v| (v.semantic.as_str(), v.format))
        .collect();
    assert_eq!(
        attribs,
        vec![
            ("position", VertexAttribFormat::R32G32B32Float),
            ("uv", VertexAttribFormat::R32G32Float),
        ]
    );

    let uniforms: Vec<(&str, UniformFormat, u32)> = r
        .used_uniforms
        .iter()
        .map(|u| (u.name.as_str(), u.format, u.size))
        .collect();
    assert_eq!(
        uniforms,
        vec![
            ("mvp", UniformFormat::Float16, 1),
            ("offsets", UniformFormat::Float4, 4),
        ]
    );

    assert_eq!(r.used_uniform_textures.len(), 1);
    assert_eq!(r.used_uniform_textures[0].name, "albedo");
    assert_eq!(r.used_uniform_textures[0].format, UniformFormat::Texture);
    assert_eq!(r.work_group_size, [0, 0, 0]);
}

#[test]
fn test_compute_reflection() {
    let source = "
struct Particle
{
    float4 position;
};
buffer Particle particles[] { ssbo };
buffer Particle sources[] { ssbo, readonly };
image2D<float> heights { readonly };
numthreads(64, 1, 1);
void main()
{
    particles[gl_GlobalInvocationID.x].position = sources[gl_GlobalInvocationID.x].position;
}
";
    let a = analyze(source, ShaderStage::Compute);
    assert!(a.ok, "{:?}", a.diagnostics);
    let r = &a.reflection;

    let buffers: Vec<&str> = r
        .used_uniform_buffers
        .iter()
        .map(|b| b.name.as_str())
        .collect();
    assert_eq!(buffers, vec!["particles", "sources"]);
    assert_eq!(r.used_readonly_buffers.len(), 1);
    assert_eq!(r.used_readonly_buffers[0].name, "sources");
    assert_eq!(r.used_readonly_images.len(), 1);
    assert_eq!(r.used_readonly_images[0].name, "heights");
    assert_eq!(r.work_group_size, [64, 1, 1]);
    assert!(r.used_vertex_attribs.is_empty());
}
