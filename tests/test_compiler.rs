use ksl_compiler::common::{ShaderStage, ShaderUniform, TargetApi, UniformGroup};
use ksl_compiler::error::{CompileError, Phase};
use ksl_compiler::preprocess::{Preprocessor, SimplePreprocessor};
use ksl_compiler::{process_stage_info, Compiler, CompilerConfig};

const FRAGMENT: &str = "uniform float4 tint;
uniform float4 unused_tint;
out float4 frag_color { color(0) };
void main()
{
    frag_color = tint;
}
";

fn compiler(config: CompilerConfig) -> Compiler {
    let _ = env_logger::builder().is_test(true).try_init();
    Compiler::new(config)
}

fn preprocess(source: &str) -> Result<String, String> {
    SimplePreprocessor::new().preprocess(source)
}

#[test]
fn test_log() {
    let mut c = compiler(CompilerConfig::default());
    assert!(c.analyze(FRAGMENT, ShaderStage::Fragment, TargetApi::OpenGL));
    let log = c.log();
    assert!(log.starts_with("KSL compiler log\n\ncompile status: SUCCESS\n\nSource:\n3: uniform float4 tint;\n"));
    assert!(log.contains("4: uniform float4 unused_tint;\n"));
    assert!(log.contains("[WARN] unused variable"));
    assert!(!log.contains("[ERR ]"));

    let source = "void main()\n{\n    float4 a = b;\n}\n";
    assert!(!c.analyze(source, ShaderStage::Fragment, TargetApi::OpenGL));
    let log = c.log();
    assert!(log.contains("compile status: FAILED"));
    assert!(log.contains("[ERR ] undeclared identifier \"b\""));
}

#[test]
fn test_warnings_as_errors() {
    let mut c = compiler(CompilerConfig::default());
    assert_eq!(
        c.compile(FRAGMENT, ShaderStage::Fragment, TargetApi::OpenGL).ok(),
        Some(true)
    );

    let mut c = compiler(CompilerConfig {
        treat_warnings_as_errors: true,
        ..CompilerConfig::default()
    });
    assert_eq!(
        c.compile(FRAGMENT, ShaderStage::Fragment, TargetApi::OpenGL).ok(),
        Some(false)
    );
    assert!(c.has_errors());
    assert!(c.result().is_none());
}

#[test]
fn test_target_defines() {
    let source = "#if KSL_TARGET_LANGUAGE_METAL
uniform float4 tint;
#else
uniform half4 tint;
#endif
out float4 frag_color { color(0) };
void main()
{
    frag_color = tint;
}
";
    let mut c = compiler(CompilerConfig::default());
    assert!(c.analyze(source, ShaderStage::Fragment, TargetApi::MetalMacOS), "{}", c.log());
    let lines: Vec<&str> = c.preprocessed_source().lines().collect();
    // the two defines stay as empty lines
    assert_eq!(lines[0], "");
    assert_eq!(lines[1], "");
    assert_eq!(lines[3], "uniform float4 tint;");
    assert_eq!(lines[5], "");
    assert_eq!(lines.len(), source.lines().count() + 2);
}

#[test]
fn test_preprocessor_error_is_reported() {
    let mut c = compiler(CompilerConfig::default());
    let source = "#error not for this target\nvoid main() {}\n";
    assert!(!c.analyze(source, ShaderStage::Vertex, TargetApi::OpenGL));
    assert_eq!(c.diagnostics().len(), 1);
    let d = &c.diagnostics()[0];
    assert_eq!(d.phase, Phase::Preprocessor);
    assert!(d.message.starts_with("Preprocessing failed!\n"));
    assert!(d.message.contains("#error not for this target"));
}

#[test]
fn test_generate_before_analyze() {
    let mut c = compiler(CompilerConfig::default());
    assert!(matches!(c.generate(), Err(CompileError::NotAnalyzed)));
}

#[test]
fn test_mixed_apis_are_rejected() {
    let mut gl = compiler(CompilerConfig::default());
    let mut metal = compiler(CompilerConfig::default());
    assert!(gl.analyze(FRAGMENT, ShaderStage::Fragment, TargetApi::OpenGL));
    assert!(metal.analyze(FRAGMENT, ShaderStage::Fragment, TargetApi::MetalMacOS));
    assert!(matches!(
        process_stage_info(&mut [&mut gl, &mut metal]),
        Err(CompileError::UnsupportedApi)
    ));
}

#[test]
fn test_uniform_info_requirement() {
    let mut gl = compiler(CompilerConfig::default());
    assert_eq!(
        gl.compile(FRAGMENT, ShaderStage::Fragment, TargetApi::OpenGL).ok(),
        Some(true)
    );

    let mut d3d = compiler(CompilerConfig::default());
    assert_eq!(
        d3d.compile(FRAGMENT, ShaderStage::Fragment, TargetApi::D3D11).ok(),
        Some(false)
    );
    assert!(d3d
        .diagnostics()
        .iter()
        .any(|d| d.message == "Uniform info not set"));

    d3d.set_uniform_info(vec![
        ShaderUniform::new("tint", UniformGroup::PerDraw),
        ShaderUniform::new("unused_tint", UniformGroup::PerDraw),
    ]);
    assert_eq!(
        d3d.compile(FRAGMENT, ShaderStage::Fragment, TargetApi::D3D11).ok(),
        Some(true),
        "{}",
        d3d.log()
    );
}

#[test]
fn test_ifdef_else() {
    let source = "#define USE_FOG\n#ifdef USE_FOG\nfog\n#else\nno_fog\n#endif\n#ifndef USE_FOG\nnever\n#endif";
    let out = preprocess(source).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[2], "fog");
    assert_eq!(lines[4], "");
    assert_eq!(lines[7], "");
    assert_eq!(out.split('\n').count(), source.split('\n').count());
}

#[test]
fn test_elif_chain() {
    let source = "#if QUALITY > 2\nhigh\n#elif QUALITY == 0x2\nmedium\n#elif defined(QUALITY)\nlow\n#endif";
    let pp = SimplePreprocessor::new().define("QUALITY", "2");
    let out = pp.preprocess(source).unwrap();
    let lines: Vec<&str> = out.split('\n').collect();
    assert_eq!(lines, vec!["", "", "", "medium", "", "", ""]);
}

#[test]
fn test_define_expansion() {
    let out = preprocess("#define COUNT 4\n#define TOTAL COUNT * 2\nfloat a[TOTAL]; // COUNT\nCOUNTER").unwrap();
    let lines: Vec<&str> = out.split('\n').collect();
    assert_eq!(lines[2].trim_end(), "float a[4 * 2];");
    assert_eq!(lines[3], "COUNTER");
}

#[test]
fn test_block_comments_keep_lines() {
    let out = preprocess("a /* one\ntwo */ b\nc").unwrap();
    assert_eq!(out.split('\n').count(), 3);
    assert_eq!(out.split('\n').nth(2), Some("c"));
}

#[test]
fn test_preprocessor_failures() {
    assert_eq!(
        preprocess("#ifdef A\nx\n").unwrap_err(),
        "1: unterminated conditional block"
    );
    assert_eq!(
        preprocess("x\n#define SQUARE(x) x * x").unwrap_err(),
        "2: function-like macro not supported: SQUARE(x)"
    );
    assert_eq!(preprocess("#endif").unwrap_err(), "1: #endif without #if");
}

#[test]
fn test_invalid_if_expression() {
    assert_eq!(
        preprocess("#if (1\nx\n#endif").unwrap_err(),
        "1: invalid #if expression: (1"
    );
    assert_eq!(preprocess("#if (1)\nx\n#endif").unwrap(), "\nx\n");
}
