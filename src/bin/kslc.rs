use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use ksl_compiler::common::{ShaderStage, ShaderUniform, TargetApi, UniformGroup};
use ksl_compiler::error::CompileError;
use ksl_compiler::{Compiler, CompilerConfig};
use log::info;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Stage {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEval,
    Compute,
}
impl From<Stage> for ShaderStage {
    fn from(s: Stage) -> Self {
        match s {
            Stage::Vertex => ShaderStage::Vertex,
            Stage::Fragment => ShaderStage::Fragment,
            Stage::Geometry => ShaderStage::Geometry,
            Stage::TessControl => ShaderStage::TessControl,
            Stage::TessEval => ShaderStage::TessEval,
            Stage::Compute => ShaderStage::Compute,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Api {
    Gl,
    Gles,
    Vulkan,
    D3d11,
    D3d12,
    MetalIos,
    MetalMacos,
}
impl From<Api> for TargetApi {
    fn from(a: Api) -> Self {
        match a {
            Api::Gl => TargetApi::OpenGL,
            Api::Gles => TargetApi::OpenGLES,
            Api::Vulkan => TargetApi::Vulkan,
            Api::D3d11 => TargetApi::D3D11,
            Api::D3d12 => TargetApi::D3D12,
            Api::MetalIos => TargetApi::MetalIOS,
            Api::MetalMacos => TargetApi::MetalMacOS,
        }
    }
}

/// `name=group`, group being `per-draw`, `per-renderer-change` or `manual`
fn parse_uniform(arg: &str) -> Result<ShaderUniform, String> {
    let (name, group) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=group, got '{}'", arg))?;
    let group = match group {
        "per-draw" | "0" => UniformGroup::PerDraw,
        "per-renderer-change" | "1" => UniformGroup::PerRendererChange,
        "manual" | "2" => UniformGroup::Manual,
        _ => return Err(format!("unknown uniform group '{}'", group)),
    };
    Ok(ShaderUniform::new(name, group))
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// KSL source path
    #[clap(value_parser)]
    shader_path: PathBuf,

    #[clap(long, value_enum, default_value = "fragment")]
    stage: Stage,

    #[clap(long, value_enum, default_value = "gl")]
    api: Api,

    /// Uniform group, as name=group. Repeatable.
    #[clap(long = "uniform", value_parser = parse_uniform)]
    uniforms: Vec<ShaderUniform>,

    #[clap(long)]
    warnings_as_errors: bool,

    /// Read subpass inputs as plain textures
    #[clap(long)]
    no_subpass: bool,

    /// Print the analyzed program back as KSL
    #[clap(long)]
    debug_ksl: bool,

    #[clap(long, default_value_t = 128)]
    push_constant_bytes: u32,

    /// Dump the token list
    #[clap(long)]
    tokens: bool,

    /// Print the compiler log
    #[clap(long)]
    log: bool,

    /// Output path, stdout if missing
    #[clap(short, value_parser)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), CompileError> {
    env_logger::init();
    let args = Args::parse();

    let source = std::fs::read_to_string(&args.shader_path)?;
    let config = CompilerConfig {
        treat_warnings_as_errors: args.warnings_as_errors,
        use_subpass: !args.no_subpass,
        generate_debug_ksl: args.debug_ksl,
        vulkan_push_constant_bytes: args.push_constant_bytes,
        ..CompilerConfig::default()
    };

    let mut compiler = Compiler::new(config);
    if !args.uniforms.is_empty() {
        compiler.set_uniform_info(args.uniforms);
    }
    info!("compiling {}", args.shader_path.display());
    let compiled = compiler.compile(&source, args.stage.into(), args.api.into());

    if args.tokens {
        println!("{}", compiler.tokenizer_debug());
    }
    if let Some(ksl) = compiler.debug_ksl() {
        println!("{}", ksl);
    }
    if args.log || !matches!(compiled, Ok(true)) {
        eprintln!("{}", compiler.log());
    }

    if !compiled? {
        let errors = compiler.diagnostics().iter().filter(|d| d.is_error()).count();
        return Err(CompileError::Failed(errors.max(1)));
    }
    let result = compiler.result().unwrap_or_default();
    match args.output {
        Some(path) => std::fs::write(path, result)?,
        None => println!("{}", result),
    }
    Ok(())
}
