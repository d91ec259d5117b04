//! Backend Targets
//!
//! A [`BackendTarget`] describes everything that differs between graphics
//! APIs: the preprocessor defines, the shape of the transform chain, and the
//! file-extension conventions of every output. One orchestrator drives all
//! backends from this value.
//!
//! | Backend    | Chain                      | Translated | Artifact   |
//! |------------|----------------------------|------------|------------|
//! | Gles       | intermediate only          | -          | `glsl`     |
//! | Vulkan     | intermediate only          | -          | `vk.spv`   |
//! | Metal      | translate + patch          | `metal`    | `metallib` |
//! | Direct3D12 | translate + patch          | `hlsl`     | `dxil`     |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::defines::ShaderDefines;
use crate::errors::PipelineError;

/// Graphics API a pipeline run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[serde(alias = "opengles")]
    Gles,
    #[serde(alias = "vk")]
    Vulkan,
    #[serde(alias = "mtl")]
    Metal,
    #[serde(alias = "d3d12", alias = "dx12")]
    Direct3D12,
}

impl Backend {
    pub const ALL: [Backend; 4] = [Backend::Gles, Backend::Vulkan, Backend::Metal, Backend::Direct3D12];

    /// Output subdirectory; keeps artifacts of different backends apart.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Gles => "gles",
            Self::Vulkan => "vulkan",
            Self::Metal => "metal",
            Self::Direct3D12 => "d3d12",
        }
    }

    #[must_use]
    pub const fn define(self) -> &'static str {
        match self {
            Self::Gles => "GRAPHICS_BACKEND_GLES",
            Self::Vulkan => "GRAPHICS_BACKEND_VULKAN",
            Self::Metal => "GRAPHICS_BACKEND_METAL",
            Self::Direct3D12 => "GRAPHICS_BACKEND_DIRECT3D12",
        }
    }

    /// Default target for this backend.
    #[must_use]
    pub fn target(self) -> BackendTarget {
        let mut defines = ShaderDefines::new();
        defines.set(self.define(), "1");

        let chain = match self {
            Self::Gles | Self::Vulkan => TransformChain::Direct,
            Self::Metal | Self::Direct3D12 => TransformChain::TranslateAndPatch,
        };

        BackendTarget {
            backend: self,
            defines,
            chain,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Backend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gles" | "opengles" => Ok(Self::Gles),
            "vulkan" | "vk" => Ok(Self::Vulkan),
            "metal" | "mtl" => Ok(Self::Metal),
            "d3d12" | "direct3d12" | "dx12" => Ok(Self::Direct3D12),
            other => Err(PipelineError::Config(format!(
                "unknown graphics backend '{other}' (expected gles, vulkan, metal or d3d12)"
            ))),
        }
    }
}

/// Language or binary format flowing between pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Portable GLSL-like source.
    Glsl,
    /// Intermediate SPIR-V binary.
    Spirv,
    /// Metal Shading Language text.
    Msl,
    /// HLSL text.
    Hlsl,
}

impl Dialect {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Glsl => "glsl",
            Self::Spirv => "spv",
            Self::Msl => "metal",
            Self::Hlsl => "hlsl",
        }
    }
}

/// Shape of the transform chain between intermediate and final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformChain {
    /// The native compiler consumes the intermediate directly.
    Direct,
    /// The intermediate is translated to native source first.
    Translate,
    /// As `Translate`, with hand-maintained patches applied to the
    /// translated source before native compilation.
    TranslateAndPatch,
}

/// Everything the orchestrator needs to know about one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub backend: Backend,
    pub defines: ShaderDefines,
    pub chain: TransformChain,
}

impl BackendTarget {
    /// Replaces the transform chain, keeping translation when the backend
    /// needs it. Direct backends ignore the request.
    #[must_use]
    pub fn with_patching(mut self, enabled: bool) -> Self {
        self.chain = match (self.chain, enabled) {
            (TransformChain::Direct, _) => TransformChain::Direct,
            (_, true) => TransformChain::TranslateAndPatch,
            (_, false) => TransformChain::Translate,
        };
        self
    }

    #[must_use]
    pub fn with_define(mut self, key: &str, value: &str) -> Self {
        self.defines.set(key, value);
        self
    }

    #[inline]
    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        self.backend.dir_name()
    }

    #[must_use]
    pub fn translates(&self) -> bool {
        self.chain != TransformChain::Direct
    }

    #[must_use]
    pub fn patches(&self) -> bool {
        self.chain == TransformChain::TranslateAndPatch
    }

    /// Dialect the translator emits, if this backend translates.
    #[must_use]
    pub fn translated_dialect(&self) -> Option<Dialect> {
        if !self.translates() {
            return None;
        }
        match self.backend {
            Backend::Metal => Some(Dialect::Msl),
            Backend::Direct3D12 => Some(Dialect::Hlsl),
            Backend::Gles | Backend::Vulkan => None,
        }
    }

    #[must_use]
    pub fn translated_extension(&self) -> Option<&'static str> {
        self.translated_dialect().map(Dialect::extension)
    }

    /// Dialect the native compiler consumes.
    #[must_use]
    pub fn native_input(&self) -> Dialect {
        self.translated_dialect().unwrap_or(Dialect::Spirv)
    }

    /// Extension of the final backend-loadable artifact.
    #[must_use]
    pub fn artifact_extension(&self) -> &'static str {
        match self.backend {
            Backend::Gles => "glsl",
            Backend::Vulkan => "vk.spv",
            Backend::Metal => "metallib",
            Backend::Direct3D12 => "dxil",
        }
    }
}
