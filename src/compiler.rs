//! The compiler facade: runs the phases of one shader stage in order and collects what they
//! report.

use std::fmt::Write;

use log::{debug, info};

use crate::analyzer::{Analyzer, AnalyzerConfig};
use crate::ast::ProgramAst;
use crate::common::{ApiFamily, ShaderReflection, ShaderStage, ShaderUniform, TargetApi};
use crate::error::{CompileError, Diagnostic, Phase, Severity};
use crate::generator;
use crate::preprocess::{Preprocessor, SimplePreprocessor};
use crate::tokenizer::Tokenizer;
use crate::translator::{vulkan, Translator, TranslatorConfig};

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Warnings make the compile fail too.
    pub treat_warnings_as_errors: bool,
    /// Vulkan input attachments and Metal framebuffer fetch for `subpassInput` uniforms.
    pub use_subpass: bool,
    /// Keep a KSL dump of the analyzed program, see [Compiler::debug_ksl].
    pub generate_debug_ksl: bool,
    pub vulkan_push_constant_bytes: u32,
    pub mangle_local_names: bool,
    pub uniform_budget_bytes: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            treat_warnings_as_errors: false,
            use_subpass: true,
            generate_debug_ksl: false,
            vulkan_push_constant_bytes: 128,
            mangle_local_names: true,
            uniform_budget_bytes: 4096,
        }
    }
}

/// Compiles one shader stage for one target API.
///
/// ```no_run
/// use ksl_compiler::common::{ShaderStage, TargetApi};
/// use ksl_compiler::compiler::{Compiler, CompilerConfig};
///
/// let mut compiler = Compiler::new(CompilerConfig::default());
/// if compiler.compile("void main() {}", ShaderStage::Compute, TargetApi::OpenGL).unwrap_or(false) {
///     println!("{}", compiler.result().unwrap_or_default());
/// }
/// ```
pub struct Compiler {
    config: CompilerConfig,
    preprocessor: Box<dyn Preprocessor>,
    uniform_info: Option<Vec<ShaderUniform>>,

    source: String,
    stage: ShaderStage,
    api: TargetApi,
    preprocessed_source: String,
    tokenizer_debug: String,

    ast: Option<ProgramAst>,
    translator: Option<Translator>,
    reflection: ShaderReflection,
    debug_ksl: Option<String>,
    result: Option<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            preprocessor: Box::new(SimplePreprocessor::new()),
            uniform_info: None,
            source: String::new(),
            stage: ShaderStage::Vertex,
            api: TargetApi::OpenGL,
            preprocessed_source: String::new(),
            tokenizer_debug: String::new(),
            ast: None,
            translator: None,
            reflection: ShaderReflection::default(),
            debug_ksl: None,
            result: None,
            diagnostics: vec![],
        }
    }

    /// Replaces the built-in [SimplePreprocessor].
    pub fn with_preprocessor(mut self, preprocessor: impl Preprocessor + 'static) -> Self {
        self.preprocessor = Box::new(preprocessor);
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Uniform group of every uniform the shader may declare. Required by every backend but
    /// plain GL.
    pub fn set_uniform_info(&mut self, info: Vec<ShaderUniform>) {
        if let Some(t) = self.translator.as_mut() {
            t.set_uniform_info(info.clone());
        }
        self.uniform_info = Some(info);
    }

    fn clear(&mut self) {
        self.preprocessed_source.clear();
        self.tokenizer_debug.clear();
        self.ast = None;
        self.translator = None;
        self.reflection = ShaderReflection::default();
        self.debug_ksl = None;
        self.result = None;
        self.diagnostics.clear();
    }

    /// Preprocesses, tokenizes and analyzes `source`, then prepares the translator of `api`.
    /// Returns false if the shader has errors, which are in [Self::diagnostics].
    pub fn analyze(&mut self, source: &str, stage: ShaderStage, api: TargetApi) -> bool {
        self.clear();
        self.source = source.to_string();
        self.stage = stage;
        self.api = api;
        let family = api.family();
        info!("analyzing {:?} stage for {:?}", stage, api);

        let language = match family {
            ApiFamily::Metal => "METAL",
            ApiFamily::Gl => "GLSL",
            ApiFamily::D3D => "D3D",
        };
        let full_source = format!(
            "#define KSL_COMPILER 1\n#define KSL_TARGET_LANGUAGE_{} 1\n{}",
            language, source
        );
        match self.preprocessor.preprocess(&full_source) {
            Ok(text) => self.preprocessed_source = text,
            Err(log) => {
                self.preprocessed_source = full_source;
                self.diagnostics.push(Diagnostic::error(
                    Phase::Preprocessor,
                    0,
                    0,
                    CompileError::Preprocess(log).to_string(),
                ));
                return false;
            }
        }

        let mut tokenizer = Tokenizer::new();
        let tokenized = tokenizer.tokenize(&self.preprocessed_source);
        self.tokenizer_debug = tokenizer.debug_dump();
        self.diagnostics.extend(tokenizer.take_diagnostics());
        if !tokenized {
            return false;
        }

        let analyzer_config = AnalyzerConfig {
            mangle_local_names: self.config.mangle_local_names,
            precision_mismatch_severity: match family {
                ApiFamily::Metal => Severity::Error,
                _ => Severity::Warning,
            },
            uniform_budget_bytes: u64::from(self.config.uniform_budget_bytes),
        };
        let mut analyzer = Analyzer::new(tokenizer.tokens(), stage, analyzer_config);
        let analyzed = analyzer.analyze();
        let (ast, diagnostics, reflection) = analyzer.into_parts();
        self.diagnostics.extend(diagnostics);
        self.reflection = reflection;
        if !analyzed || self.has_errors() {
            return false;
        }

        if self.config.generate_debug_ksl {
            match generator::generate_ksl(&ast) {
                Ok(text) => self.debug_ksl = Some(text),
                Err(e) => {
                    self.diagnostics
                        .push(Diagnostic::error(Phase::Generator, 0, 0, e.to_string()));
                    return false;
                }
            }
        }

        let mut translator = Translator::new(
            api,
            stage,
            TranslatorConfig {
                use_subpass: self.config.use_subpass,
                push_constant_bytes: self.config.vulkan_push_constant_bytes,
            },
        );
        if let Some(info) = &self.uniform_info {
            translator.set_uniform_info(info.clone());
        }
        self.translator = Some(translator);
        self.ast = Some(ast);
        true
    }

    /// Translates the analyzed program and prints it in the target language.
    ///
    /// Problems in the shader make this return `Ok(false)`. An `Err` means [Self::analyze] did
    /// not succeed first, or the generator met a tree it cannot print.
    pub fn generate(&mut self) -> Result<bool, CompileError> {
        let (Some(ast), Some(translator)) = (self.ast.as_mut(), self.translator.as_mut()) else {
            return Err(CompileError::NotAnalyzed);
        };

        let translated = translator.translate(ast);
        self.diagnostics.extend(translator.take_diagnostics());
        if !translated {
            return Ok(false);
        }

        match generator::generate(ast, translator) {
            Ok(text) => self.result = Some(text),
            Err(e) => {
                self.diagnostics
                    .push(Diagnostic::error(Phase::Generator, 0, 0, e.to_string()));
                return Err(e.into());
            }
        }
        debug!("generated {} bytes", self.result.as_ref().map_or(0, String::len));
        Ok(!self.has_errors())
    }

    /// [Self::analyze] followed by [Self::generate].
    pub fn compile(
        &mut self,
        source: &str,
        stage: ShaderStage,
        api: TargetApi,
    ) -> Result<bool, CompileError> {
        if !self.analyze(source, stage, api) {
            return Ok(false);
        }
        self.generate()
    }

    /// With warnings treated as errors any diagnostic counts, otherwise only errors do.
    pub fn has_errors(&self) -> bool {
        if self.config.treat_warnings_as_errors {
            return !self.diagnostics.is_empty();
        }
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Human readable report: status, the numbered source and every diagnostic by line.
    pub fn log(&self) -> String {
        let mut log = String::new();
        let status = if self.has_errors() { "FAILED" } else { "SUCCESS" };
        // Writing into a String can't fail
        let _ = write!(
            log,
            "KSL compiler log\n\ncompile status: {}\n\nSource:\n",
            status
        );
        // The two defines prepended before preprocessing shift the source by two lines
        for (i, line) in self.source.lines().enumerate() {
            let _ = writeln!(log, "{}: {}", i + 3, line);
        }
        log.push('\n');

        let mut sorted: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        sorted.sort_by_key(|d| d.line);
        for d in sorted {
            let _ = writeln!(log, "{}", d);
        }
        log.push('\n');
        log
    }

    /// Generated target source, once [Self::generate] succeeded.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn debug_ksl(&self) -> Option<&str> {
        self.debug_ksl.as_deref()
    }

    pub fn tokenizer_debug(&self) -> &str {
        &self.tokenizer_debug
    }

    pub fn preprocessed_source(&self) -> &str {
        &self.preprocessed_source
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn ast(&self) -> Option<&ProgramAst> {
        self.ast.as_ref()
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn api(&self) -> TargetApi {
        self.api
    }
}

/// Joins the stages of one pipeline after each was analyzed and before any is generated.
///
/// Vulkan stages share descriptor sets and the push constant block, which get decided here for
/// all of them together. The other APIs have nothing to share. Stages that failed analysis are
/// skipped. Mixing target APIs is an error.
pub fn process_stage_info(compilers: &mut [&mut Compiler]) -> Result<bool, CompileError> {
    let mut api = None;
    for c in compilers.iter() {
        if c.translator.is_none() {
            continue;
        }
        match api {
            Some(a) if a != c.api => return Err(CompileError::UnsupportedApi),
            _ => api = Some(c.api),
        }
    }
    if api != Some(TargetApi::Vulkan) {
        return Ok(true);
    }

    let mut stages = vec![];
    for c in compilers.iter_mut() {
        let Compiler { ast, translator, .. } = &mut **c;
        if let (Some(ast), Some(translator)) = (ast.as_ref(), translator.as_mut()) {
            stages.push((ast, translator));
        }
    }
    debug!("linking {} vulkan stages", stages.len());
    Ok(vulkan::process_stage_info(&mut stages))
}
