//! A cross-compiler for KSL, a small C-like shading language, to GLSL (OpenGL, OpenGL ES and
//! Vulkan), HLSL and the Metal Shading Language.
//!
//! A shader stage goes through these phases:
//! - [preprocess]: macros and conditional blocks, through a pluggable [preprocess::Preprocessor]
//! - [tokenizer]: a flat token list
//! - [analyzer]: parsing into the [ast::ProgramAst] arena, type and precision validation, and
//!   reflection of the resources the host has to bind
//! - [translator]: restructuring of the tree for one target API, e.g. interface blocks,
//!   bindings and the resources each function needs passed in
//! - [generator]: printing the tree in the target language
//!
//! [compiler::Compiler] runs them in order and collects every [error::Diagnostic] they report.
//! Stages of one Vulkan pipeline are linked together with [compiler::process_stage_info]
//! before generation.

#[macro_use]
extern crate num_derive;
#[macro_use]
extern crate lazy_static;

pub mod analyzer;
pub mod ast;
pub mod common;
pub mod compiler;
pub mod error;
pub mod generator;
pub mod preprocess;
pub mod tokenizer;
pub mod translator;

pub use compiler::{process_stage_info, Compiler, CompilerConfig};
