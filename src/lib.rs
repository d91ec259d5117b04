//! Multi-backend shader build pipeline.
//!
//! Portable vertex, fragment and compute sources are compiled to SPIR-V,
//! optionally translated to MSL or HLSL, patched, compiled by the backend's
//! native compiler, and described by a JSON shader map that the engine uses
//! to bind resources by name.
//!
//! ```rust,ignore
//! use ngfx_shaders::{Backend, Pipeline, PipelineConfig, locate_sources, StageKind};
//!
//! let sources = locate_sources(&["data/shaders"], &StageKind::ALL)?;
//! let config = PipelineConfig::new(Backend::Vulkan, "target/shaders");
//! let report = Pipeline::new(config)?.run(&sources)?;
//! assert!(report.success());
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod backend;
pub mod compiler;
pub mod config;
pub mod defines;
pub mod errors;
pub mod fingerprint;
pub mod manifest;
pub mod patch;
pub mod pipeline;
pub mod reflect;
pub mod shader_map;
pub mod source;
pub mod tool;
pub mod translator;

pub use backend::{Backend, BackendTarget, Dialect, TransformChain};
pub use compiler::{NativeCompiler, NativeInput, StageCompiler};
pub use config::{InteractiveConfig, PipelineConfig, RunMode, Toolchain, ToolchainConfig};
pub use defines::ShaderDefines;
pub use errors::{PipelineError, Result};
pub use fingerprint::{ArtifactLayout, Fingerprint, cache_path, outputs_exist};
pub use manifest::{Manifest, ManifestEntry};
pub use patch::{PatchSet, PatchOutcome, apply_patches};
pub use pipeline::{
    CompiledArtifact, Pipeline, ProgramArtifacts, RunReport, Step, UnitOutcome, UnitReport, UnitState,
};
pub use shader_map::{ShaderMap, Slot, generate_maps};
pub use source::{ShaderSource, StageKind, locate_sources};
pub use tool::{ExternalTool, ProcessTool, ToolInvocation, ToolKind, ToolOutput, ToolSpec};
pub use translator::{TranslateInput, Translator};
