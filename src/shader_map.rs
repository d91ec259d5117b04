//! Shader Maps
//!
//! A shader map is the JSON sidecar written next to every compiled artifact
//! (`<artifact>.map`). It lists vertex attributes, every bindable resource
//! with its backend-resolved slot, and the offset of every uniform-block
//! member, so the engine can bind resources by name without parsing shader
//! source at runtime.
//!
//! Slot resolution per backend:
//!
//! | Backend        | Slot                                                    |
//! |----------------|---------------------------------------------------------|
//! | Gles, Vulkan   | `(set, binding)` as declared                            |
//! | Direct3D12     | register `b`/`t`/`u`/`s`, index = binding, space = set  |
//! | Metal          | sequential buffer / texture / sampler indices           |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendTarget};
use crate::errors::{PipelineError, Result};
use crate::fingerprint::{map_path_for, write_atomic};
use crate::reflect::{Reflection, ResourceDecl, ResourceKind, reflect};
use crate::source::StageKind;

/// D3D12 register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterClass {
    /// Constant buffer view.
    B,
    /// Shader resource view.
    T,
    /// Unordered access view.
    U,
    /// Sampler.
    S,
}

/// Backend-resolved binding slot of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "api", rename_all = "snake_case")]
pub enum Slot {
    /// GL / Vulkan descriptor binding.
    Binding { set: u32, binding: u32 },
    /// D3D12 register.
    Register { class: RegisterClass, index: u32, space: u32 },
    /// Metal argument index in the buffer, texture or sampler table; the
    /// resource kind names the table.
    Metal { index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeBinding {
    pub name: String,
    pub location: u32,
    /// Vertex format, e.g. `FORMAT_R32G32_SFLOAT`.
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBinding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub kind: ResourceKind,
    pub set: u32,
    pub binding: u32,
    pub slot: Slot,
}

/// Location of one uniform-block member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformInfo {
    /// `<instance or block>.<member>`.
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub offset: u32,
    pub size: u32,
}

/// Resource-binding metadata of one compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderMap {
    pub stage: StageKind,
    pub backend: Backend,
    #[serde(default)]
    pub attributes: Vec<AttributeBinding>,
    #[serde(default)]
    pub resources: Vec<ResourceBinding>,
    #[serde(default)]
    pub uniforms: Vec<UniformInfo>,
}

impl ShaderMap {
    /// Builds the map of `source` for `target`.
    ///
    /// Errors are plain strings; the caller attaches the artifact path.
    pub fn from_source(
        source: &str,
        stage: StageKind,
        target: &BackendTarget,
    ) -> std::result::Result<Self, String> {
        let reflection = reflect(source, stage, &target.defines).map_err(|e| e.to_string())?;
        Ok(Self::from_reflection(&reflection, stage, target.backend))
    }

    #[must_use]
    pub fn from_reflection(reflection: &Reflection, stage: StageKind, backend: Backend) -> Self {
        let attributes = reflection
            .inputs
            .iter()
            .map(|input| AttributeBinding {
                name: input.name.clone(),
                location: input.location,
                format: input.format.to_string(),
            })
            .collect();

        let slots = resolve_slots(&reflection.resources, backend);
        let resources = reflection
            .resources
            .iter()
            .zip(slots)
            .map(|(decl, slot)| ResourceBinding {
                name: decl.name.clone(),
                instance: decl.instance.clone(),
                kind: decl.kind,
                set: decl.set,
                binding: decl.binding,
                slot,
            })
            .collect();

        let uniforms = reflection
            .resources
            .iter()
            .filter(|decl| decl.kind == ResourceKind::UniformBuffer)
            .flat_map(|decl| {
                let prefix = decl.instance.as_deref().unwrap_or(&decl.name);
                decl.members.iter().map(move |member| UniformInfo {
                    name: format!("{prefix}.{}", member.name),
                    set: decl.set,
                    binding: decl.binding,
                    offset: member.offset,
                    size: member.size,
                })
            })
            .collect();

        Self {
            stage,
            backend,
            attributes,
            resources,
            uniforms,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Loads the sidecar of a compiled artifact.
    pub fn load_for_artifact(artifact: &Path) -> Result<Self> {
        Self::load(&map_path_for(artifact))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
    }

    /// Slot of the resource called `name` (block, instance or variable name).
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Slot> {
        self.resources
            .iter()
            .find(|res| res.name == name || res.instance.as_deref() == Some(name))
            .map(|res| res.slot)
    }

    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|info| info.name == name)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeBinding> {
        self.attributes.iter().find(|attr| attr.name == name)
    }
}

/// One slot per resource, in the order given (sorted by `(set, binding)`).
fn resolve_slots(resources: &[ResourceDecl], backend: Backend) -> Vec<Slot> {
    match backend {
        Backend::Gles | Backend::Vulkan => resources
            .iter()
            .map(|res| Slot::Binding {
                set: res.set,
                binding: res.binding,
            })
            .collect(),
        Backend::Direct3D12 => resources
            .iter()
            .map(|res| {
                let class = match res.kind {
                    ResourceKind::UniformBuffer => RegisterClass::B,
                    ResourceKind::SampledTexture => RegisterClass::T,
                    ResourceKind::StorageBuffer | ResourceKind::StorageImage => RegisterClass::U,
                    ResourceKind::Sampler => RegisterClass::S,
                };
                Slot::Register {
                    class,
                    index: res.binding,
                    space: res.set,
                }
            })
            .collect(),
        Backend::Metal => {
            let (mut buffers, mut textures, mut samplers) = (0u32, 0u32, 0u32);
            resources
                .iter()
                .map(|res| {
                    let table = match res.kind {
                        ResourceKind::UniformBuffer | ResourceKind::StorageBuffer => &mut buffers,
                        ResourceKind::SampledTexture | ResourceKind::StorageImage => &mut textures,
                        ResourceKind::Sampler => &mut samplers,
                    };
                    *table += 1;
                    Slot::Metal { index: *table - 1 }
                })
                .collect()
        }
    }
}

// ─── Generation ──────────────────────────────────────────────────────────────

/// One artifact whose map should be generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRequest {
    pub source: PathBuf,
    pub stage: StageKind,
    pub artifact: PathBuf,
}

/// Generates and writes the map of one artifact; returns the map path.
pub fn generate_map(request: &MapRequest, target: &BackendTarget) -> Result<PathBuf> {
    let map_error = |reason: String| PipelineError::Map {
        artifact: request.artifact.clone(),
        reason,
    };

    let source = std::fs::read_to_string(&request.source)
        .map_err(|e| map_error(format!("cannot read {}: {e}", request.source.display())))?;
    let map = ShaderMap::from_source(&source, request.stage, target).map_err(map_error)?;

    let path = map_path_for(&request.artifact);
    map.write(&path)?;
    Ok(path)
}

/// Generates every map independently; one failure does not stop the rest.
pub fn generate_maps(requests: &[MapRequest], target: &BackendTarget) -> Vec<Result<PathBuf>> {
    requests
        .iter()
        .map(|request| {
            let result = generate_map(request, target);
            if let Err(e) = &result {
                log::warn!("{e}");
            }
            result
        })
        .collect()
}
