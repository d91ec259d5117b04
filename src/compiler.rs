//! Stage & Native Compilers
//!
//! [`StageCompiler`] turns a portable source into the intermediate SPIR-V
//! binary. [`NativeCompiler`] runs the backend-specific terminal step on
//! either that intermediate (GLES, Vulkan) or the translated source (Metal,
//! Direct3D12).
//!
//! Both share one failure contract: a non-zero exit, or a missing output, is
//! a [`PipelineError::Compile`] carrying the tool's diagnostics, and no
//! partial output is left behind.

use std::path::{Path, PathBuf};

use crate::backend::{Backend, BackendTarget};
use crate::config::Toolchain;
use crate::defines::ShaderDefines;
use crate::errors::{PipelineError, Result};
use crate::fingerprint::{Fingerprint, cache_path};
use crate::source::StageKind;
use crate::tool::{ToolInvocation, ToolKind, execute};

// ─── StageCompiler ───────────────────────────────────────────────────────────

/// Portable source → intermediate binary.
pub struct StageCompiler<'a> {
    tools: &'a Toolchain,
}

impl<'a> StageCompiler<'a> {
    #[must_use]
    pub fn new(tools: &'a Toolchain) -> Self {
        Self { tools }
    }

    /// Compiles into `output_dir`, naming the intermediate after the
    /// source's content fingerprint.
    pub fn compile(
        &self,
        source_path: &Path,
        stage: StageKind,
        defines: &ShaderDefines,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let key = Fingerprint::of_file(source_path)?;
        let output = cache_path(output_dir, key, &format!("{}.spv", stage.extension()));
        self.compile_to(source_path, stage, defines, &output)?;
        Ok(output)
    }

    pub fn compile_to(
        &self,
        source_path: &Path,
        stage: StageKind,
        defines: &ShaderDefines,
        output: &Path,
    ) -> Result<()> {
        let invocation = ToolInvocation::new(
            ToolKind::StageCompiler,
            &self.tools.config.stage_compiler,
            source_path,
            output,
        )
        .arg(format!("-fshader-stage={}", stage.extension()))
        .args(defines.to_args())
        .path_arg(source_path)
        .arg("-o")
        .path_arg(output);

        execute(self.tools.runner.as_ref(), &invocation)?.map_err(|diagnostics| {
            PipelineError::Compile {
                stage,
                source_path: source_path.to_path_buf(),
                diagnostics,
            }
        })
    }
}

// ─── NativeCompiler ──────────────────────────────────────────────────────────

/// One input of a native compile batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeInput {
    pub path: PathBuf,
    pub stage: StageKind,
    /// Key the final artifact is named after.
    pub key: Fingerprint,
}

/// Backend-native terminal compile step.
pub struct NativeCompiler<'a> {
    tools: &'a Toolchain,
    target: &'a BackendTarget,
}

impl<'a> NativeCompiler<'a> {
    #[must_use]
    pub fn new(tools: &'a Toolchain, target: &'a BackendTarget) -> Self {
        Self { tools, target }
    }

    /// Compiles every input in order, stopping at the first failure.
    pub fn compile_native(&self, inputs: &[NativeInput], output_dir: &Path) -> Result<Vec<PathBuf>> {
        inputs
            .iter()
            .map(|input| {
                let ext = format!("{}.{}", input.stage.extension(), self.target.artifact_extension());
                let output = cache_path(output_dir, input.key, &ext);
                self.compile_to(&input.path, input.stage, &output)?;
                Ok(output)
            })
            .collect()
    }

    pub fn compile_to(&self, input: &Path, stage: StageKind, output: &Path) -> Result<()> {
        let backend = self.target.backend;
        let spec = self.tools.config.native(backend);
        let base = ToolInvocation::new(ToolKind::NativeCompiler, spec, input, output);
        let defines = &self.target.defines;

        let invocation = match backend {
            Backend::Gles => base
                .path_arg(input)
                .args(["--es", "--version", "310", "--output"])
                .path_arg(output),
            Backend::Vulkan => base.path_arg(input).arg("-o").path_arg(output),
            Backend::Metal => base
                .args(defines.to_args())
                .path_arg(input)
                .arg("-o")
                .path_arg(output),
            Backend::Direct3D12 => base
                .args(["-T", hlsl_profile(stage), "-E", "main"])
                .args(defines.to_args())
                .path_arg(input)
                .arg("-Fo")
                .path_arg(output),
        };

        execute(self.tools.runner.as_ref(), &invocation)?.map_err(|diagnostics| {
            PipelineError::Compile {
                stage,
                source_path: input.to_path_buf(),
                diagnostics,
            }
        })
    }
}

fn hlsl_profile(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Vertex => "vs_6_0",
        StageKind::Fragment => "ps_6_0",
        StageKind::Compute => "cs_6_0",
    }
}
