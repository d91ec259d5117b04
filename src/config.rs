//! Pipeline Configuration
//!
//! All configuration is an explicit value handed to
//! [`Pipeline::new`](crate::Pipeline::new) and validated once there. The
//! environment is only consulted at the boundary, by
//! [`InteractiveConfig::from_env`], and never re-read mid-pipeline.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ngfx_shaders::{Backend, PipelineConfig};
//!
//! let config = PipelineConfig::new(Backend::Direct3D12, "target/shaders")
//!     .with_patch_dir("patches")?
//!     .with_jobs(4);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendTarget};
use crate::errors::{PipelineError, Result};
use crate::patch::PatchSet;
use crate::tool::{ExternalTool, ProcessTool, ToolSpec};

// ---------------------------------------------------------------------------
// Toolchain
// ---------------------------------------------------------------------------

/// Programs used for each step of the chain.
///
/// Deserializable from the `[tools]` table of `shaders.toml`; any entry left
/// out keeps its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Portable source → SPIR-V.
    pub stage_compiler: ToolSpec,
    /// SPIR-V → MSL / HLSL.
    pub translator: ToolSpec,
    /// SPIR-V → GLSL ES text.
    pub gles: ToolSpec,
    /// SPIR-V optimizer / validator for Vulkan.
    pub vulkan: ToolSpec,
    /// MSL → metallib.
    pub metal: ToolSpec,
    /// HLSL → DXIL.
    pub d3d12: ToolSpec,
    /// Per-invocation timeout; `None` waits forever.
    pub timeout_secs: Option<u64>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            stage_compiler: ToolSpec::with_args("glslc", &["--target-env=vulkan1.1"]),
            translator: ToolSpec::new("spirv-cross"),
            gles: ToolSpec::new("spirv-cross"),
            vulkan: ToolSpec::with_args("spirv-opt", &["-O"]),
            metal: ToolSpec::with_args("xcrun", &["-sdk", "macosx", "metal"]),
            d3d12: ToolSpec::new("dxc"),
            timeout_secs: Some(120),
        }
    }
}

impl ToolchainConfig {
    /// Native compiler for `backend`.
    #[must_use]
    pub fn native(&self, backend: Backend) -> &ToolSpec {
        match backend {
            Backend::Gles => &self.gles,
            Backend::Vulkan => &self.vulkan,
            Backend::Metal => &self.metal,
            Backend::Direct3D12 => &self.d3d12,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Tool specs plus the runner that executes them.
#[derive(Clone)]
pub struct Toolchain {
    pub config: ToolchainConfig,
    pub runner: Arc<dyn ExternalTool>,
}

impl Toolchain {
    /// Runs tools as child processes, honouring the configured timeout.
    #[must_use]
    pub fn process(config: ToolchainConfig) -> Self {
        let runner = Arc::new(ProcessTool::new(config.timeout()));
        Self { config, runner }
    }

    /// Uses a custom runner, e.g. an in-process fake in tests.
    #[must_use]
    pub fn with_runner(config: ToolchainConfig, runner: Arc<dyn ExternalTool>) -> Self {
        Self { config, runner }
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::process(ToolchainConfig::default())
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").field("config", &self.config).finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Failure policy for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Failed units are reported; independent units keep going.
    #[default]
    Lenient,
    /// The first failure stops new units from starting.
    Strict,
}

/// Everything one pipeline run needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target: BackendTarget,
    /// Output root; artifacts land in `<out_root>/<backend dir>/`.
    pub out_root: PathBuf,
    pub patches: PatchSet,
    pub toolchain: Toolchain,
    /// Worker threads; `0` means one per available core.
    pub jobs: usize,
    pub mode: RunMode,
}

impl PipelineConfig {
    #[must_use]
    pub fn new(backend: Backend, out_root: impl Into<PathBuf>) -> Self {
        Self {
            target: backend.target(),
            out_root: out_root.into(),
            patches: PatchSet::default(),
            toolchain: Toolchain::default(),
            jobs: 0,
            mode: RunMode::Lenient,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: BackendTarget) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn with_patches(mut self, patches: PatchSet) -> Self {
        self.patches = patches;
        self
    }

    /// Loads every `*.patch` file of `dir`; a missing directory yields no patches.
    pub fn with_patch_dir(self, dir: impl AsRef<Path>) -> Result<Self> {
        let patches = PatchSet::load_dir(dir.as_ref())?;
        Ok(self.with_patches(patches))
    }

    #[must_use]
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// `<out_root>/<backend dir>`.
    #[must_use]
    pub fn backend_dir(&self) -> PathBuf {
        self.out_root.join(self.target.dir_name())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.out_root.as_os_str().is_empty() {
            return Err(PipelineError::Config("output directory is empty".to_string()));
        }
        if self.out_root.is_file() {
            return Err(PipelineError::Config(format!(
                "output directory {} is a file",
                self.out_root.display()
            )));
        }
        let tools = &self.toolchain.config;
        for (name, spec) in [
            ("stage compiler", &tools.stage_compiler),
            ("translator", &tools.translator),
            ("native compiler", tools.native(self.target.backend)),
        ] {
            if spec.program.trim().is_empty() {
                return Err(PipelineError::Config(format!("{name} program is empty")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InteractiveConfig
// ---------------------------------------------------------------------------

/// Environment variable selecting the backend of the on-demand path.
pub const BACKEND_ENV: &str = "GRAPHICS_BACKEND";
/// Environment variable naming the scratch directory of the on-demand path.
pub const SCRATCH_ENV: &str = "TEMP";

/// Settings of the interactive single-program path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveConfig {
    pub backend: Backend,
    pub scratch_dir: PathBuf,
}

impl InteractiveConfig {
    /// Reads and validates both variables before any file I/O happens.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// As [`from_env`](Self::from_env), with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match lookup(BACKEND_ENV).as_deref().map(str::trim) {
            Some("vulkan") => Backend::Vulkan,
            Some("metal") => Backend::Metal,
            Some("direct3d12") => Backend::Direct3D12,
            Some(other) => {
                return Err(PipelineError::Config(format!(
                    "{BACKEND_ENV}={other} is not one of vulkan, metal, direct3d12"
                )));
            }
            None => {
                return Err(PipelineError::Config(format!(
                    "{BACKEND_ENV} environment variable not set"
                )));
            }
        };

        let scratch_dir = lookup(SCRATCH_ENV)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                PipelineError::Config(format!("{SCRATCH_ENV} environment variable not set"))
            })?;

        Ok(Self {
            backend,
            scratch_dir,
        })
    }

    /// Pipeline rooted at the scratch directory with default tools.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new(self.backend, &self.scratch_dir)
    }
}
