use ksl_compiler::analyzer::{Analyzer, AnalyzerConfig};
use ksl_compiler::ast::{NodeKind, ProgramAst, StorageQualifier};
use ksl_compiler::common::{ShaderStage, TypeId};
use ksl_compiler::error::Diagnostic;
use ksl_compiler::tokenizer::Tokenizer;

fn analyze(source: &str, stage: ShaderStage) -> (bool, ProgramAst, Vec<Diagnostic>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut tokenizer = Tokenizer::new();
    assert!(tokenizer.tokenize(source));
    let mut analyzer = Analyzer::new(tokenizer.tokens(), stage, AnalyzerConfig::default());
    let ok = analyzer.analyze();
    let (ast, diagnostics, _) = analyzer.into_parts();
    (ok, ast, diagnostics)
}

const SIMPLE_FRAGMENT: &str = "
uniform float4 tint;
in float2 uv;
out float4 frag_color { color(0) };

float4 scale(float4 c, float s)
{
    return c * s;
}

void main()
{
    frag_color = scale(tint, uv.x);
}
";

#[test]
fn test_global_declarations() {
    let (ok, ast, diagnostics) = analyze(SIMPLE_FRAGMENT, ShaderStage::Fragment);
    assert!(ok, "{:?}", diagnostics);
    assert_eq!(ast.root.len(), 5);

    let storages: Vec<StorageQualifier> = ast
        .root
        .iter()
        .filter_map(|n| n.as_variable_definitions())
        .map(|vd| vd.storage)
        .collect();
    assert_eq!(
        storages,
        vec![
            StorageQualifier::Uniform,
            StorageQualifier::In,
            StorageQualifier::Out
        ]
    );
    assert_eq!(ast.root.iter().filter(|n| n.as_function().is_some()).count(), 2);
    assert!(ast.main_function_index().is_some());
}

#[test]
fn test_abandoned_alternative_leaves_no_variable() {
    // `void main` is first tried as a variable definition
    let (ok, ast, _) = analyze(SIMPLE_FRAGMENT, ShaderStage::Fragment);
    assert!(ok);
    assert!(!ast.variables.iter().any(|v| v.orig_name == "main"));
    assert!(!ast.variables.iter().any(|v| v.orig_name == "scale"));
    assert_eq!(
        ast.variables.iter().filter(|v| v.orig_name == "tint").count(),
        1
    );
}

#[test]
fn test_interface_names_are_kept_and_locals_mangled() {
    let source = "
uniform float4 tint;
out float4 frag_color { color(0) };
void main()
{
    float4 local = tint;
    frag_color = local;
}
";
    let (ok, ast, diagnostics) = analyze(source, ShaderStage::Fragment);
    assert!(ok, "{:?}", diagnostics);
    let tint = ast.variables.iter().find(|v| v.orig_name == "tint").unwrap();
    assert_eq!(tint.new_name, "tint");
    let local = ast.variables.iter().find(|v| v.orig_name == "local").unwrap();
    assert_ne!(local.new_name, "local");
    assert!(local.new_name.starts_with("local"));
}

#[test]
fn test_statements() {
    let source = "
out float4 frag_color { color(0) };
void main()
{
    float4 c = float4(0.0, 0.0, 0.0, 1.0);
    for (int i = 0; i < 4; i++)
    {
        if (i == 2)
            continue;
        else
            c.x += 0.25;
    }
    frag_color = c;
}
";
    let (ok, ast, diagnostics) = analyze(source, ShaderStage::Fragment);
    assert!(ok, "{:?}", diagnostics);
    let main = ast.root.iter().filter_map(|n| n.as_function()).last().unwrap();
    assert_eq!(main.body.len(), 3);
    assert!(matches!(main.body[0].kind, NodeKind::VariableDefinitions(_)));
    assert!(matches!(main.body[1].kind, NodeKind::For(_)));
    assert!(matches!(main.body[2].kind, NodeKind::Expression(_)));
}

#[test]
fn test_struct_and_image_and_numthreads() {
    let source = "
struct Particle
{
    float4 position;
    float4 velocity;
};
buffer Particle particles[] { ssbo };
image2D<float> target { writeonly };
numthreads(8, 8, 1);
void main()
{
    particles[0].position = particles[0].position + particles[0].velocity;
    imageStore(target, int2(gl_GlobalInvocationID.xy), particles[0].position);
}
";
    let (ok, ast, diagnostics) = analyze(source, ShaderStage::Compute);
    assert!(ok, "{:?}", diagnostics);
    assert_eq!(ast.user_types.len(), 1);
    assert_eq!(ast.user_types[0].name, "Particle");
    assert_eq!(ast.user_types[0].members.len(), 2);
    assert_eq!(ast.num_threads, Some([8, 8, 1]));
    assert!(ast
        .root
        .iter()
        .any(|n| matches!(n.kind, NodeKind::ImageDefinition(_))));
    let particles = ast
        .variables
        .iter()
        .find(|v| v.orig_name == "particles")
        .unwrap();
    assert_eq!(particles.ty.id, TypeId::Array);
    assert_eq!(particles.ty.base_type().id, TypeId::User(0));
}

#[test]
fn test_force_highp() {
    let source = "
force_highp;
out half4 frag_color { color(0) };
void main()
{
    half4 c = half4(0.5h, 0.5h, 0.5h, 1.0h);
    frag_color = c;
}
";
    let (ok, ast, diagnostics) = analyze(source, ShaderStage::Fragment);
    assert!(ok, "{:?}", diagnostics);
    assert!(ast.force_highp);
    let c = ast.variables.iter().find(|v| v.orig_name == "c").unwrap();
    assert_eq!(c.ty.precision, ksl_compiler::common::Precision::High);
}

#[test]
fn test_global_variable_must_be_const() {
    let source = "
float4 x;
void main() {}
";
    let (ok, _, diagnostics) = analyze(source, ShaderStage::Vertex);
    assert!(!ok);
    assert!(diagnostics
        .iter()
        .any(|d| d.message == "only const global variables allowed! 2:1"));
}

#[test]
fn test_const_must_be_initialized() {
    let source = "
void main()
{
    const float x;
}
";
    let (ok, _, diagnostics) = analyze(source, ShaderStage::Vertex);
    assert!(!ok);
    assert!(diagnostics
        .iter()
        .any(|d| d.message.starts_with("const variable must be initialized")));
}

#[test]
fn test_undeclared_identifier_reported_once() {
    // `a = b;` is tried as several statement and expression rules, only the accepted one reports
    let source = "
void main()
{
    float4 a = float4(1.0, 2.0, 3.0, 4.0);
    a = b;
}
";
    let (ok, _, diagnostics) = analyze(source, ShaderStage::Vertex);
    assert!(!ok);
    assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
    assert_eq!(diagnostics[0].message, "undeclared identifier \"b\" at 5:9");
}

#[test]
fn test_furthest_statement_alternative_is_reported() {
    // The definition rule reads `a` as a type before giving up, the statement rule backs out
    // to the start of the line, so the definition's diagnostic wins.
    let source = "
void main()
{
    float a = 1.0;
    a = a + (a * ;
}
";
    let (ok, _, diagnostics) = analyze(source, ShaderStage::Vertex);
    assert!(!ok);
    let messages: Vec<&str> = diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(messages, ["unknown type (a) at 5:5"]);
}

#[test]
fn test_furthest_global_alternative_is_reported() {
    // The definition rule stops after `foo4`, the function rule after `bar`, the other rules
    // read nothing.
    let source = "
foo4 main(float a, bar b)
{
}
";
    let (ok, _, diagnostics) = analyze(source, ShaderStage::Vertex);
    assert!(!ok);
    let messages: Vec<&str> = diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(messages, ["unknown type (bar) at 2:20"]);
}
