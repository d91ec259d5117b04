//! Declaration Reflection
//!
//! Parses portable shader source with naga's GLSL frontend, with the
//! backend's defines applied, and recovers what the map generator needs:
//! vertex inputs with their locations, every bound resource with its
//! `(set, binding)`, and the offset and size of every uniform-block member.
//!
//! Textures and samplers are declared separately (`texture2D` + `sampler`,
//! combined in the body with `sampler2D(tex, samp)`), so each occupies its
//! own slot. Anything the frontend rejects is an error rather than a guess,
//! because a wrong slot is worse than a missing map.

use naga::front::glsl::{Frontend, Options};
use naga::proc::Layouter;
use naga::{AddressSpace, ArraySize, Binding, ImageClass, Module, ScalarKind, ShaderStage, TypeInner};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defines::ShaderDefines;
use crate::source::StageKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ReflectError(String);

type Result<T> = std::result::Result<T, ReflectError>;

fn fail<T>(message: impl Into<String>) -> Result<T> {
    Err(ReflectError(message.into()))
}

/// Kind of a bindable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    /// Sampled texture (`texture2D` and friends).
    SampledTexture,
    Sampler,
    StorageImage,
}

impl ResourceKind {
    #[must_use]
    pub fn is_buffer(self) -> bool {
        matches!(self, Self::UniformBuffer | Self::StorageBuffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexInput {
    pub name: String,
    pub location: u32,
    /// Vertex format, e.g. `FORMAT_R32G32_SFLOAT`.
    pub format: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMember {
    pub name: String,
    pub offset: u32,
    /// Zero for a runtime-sized array.
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDecl {
    /// Block name for buffers, variable name otherwise.
    pub name: String,
    /// Instance name of a block (`} ubo;`), if any.
    pub instance: Option<String>,
    pub kind: ResourceKind,
    pub set: u32,
    pub binding: u32,
    pub members: Vec<BlockMember>,
}

/// Everything the map generator needs from one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    pub inputs: Vec<VertexInput>,
    pub resources: Vec<ResourceDecl>,
}

const fn naga_stage(stage: StageKind) -> ShaderStage {
    match stage {
        StageKind::Vertex => ShaderStage::Vertex,
        StageKind::Fragment => ShaderStage::Fragment,
        StageKind::Compute => ShaderStage::Compute,
    }
}

/// Parses `source` as seen by a compiler given `defines`.
pub fn reflect(source: &str, stage: StageKind, defines: &ShaderDefines) -> Result<Reflection> {
    let mut options = Options::from(naga_stage(stage));
    for (key, value) in defines.iter() {
        options.defines.insert(key.to_string(), value.to_string());
    }

    let module = Frontend::default()
        .parse(&options, source)
        .map_err(|e| ReflectError(format!("{stage} shader does not parse: {e}")))?;

    let mut layouter = Layouter::default();
    layouter
        .update(module.to_ctx())
        .map_err(|e| ReflectError(format!("cannot lay out types: {e}")))?;

    let mut reflection = Reflection {
        inputs: if stage == StageKind::Vertex {
            vertex_inputs(&module)?
        } else {
            Vec::new()
        },
        resources: resources(&module, &layouter)?,
    };

    reflection.inputs.sort_by_key(|input| input.location);
    reflection.resources.sort_by_key(|res| (res.set, res.binding));
    if let Some(pair) = reflection
        .resources
        .windows(2)
        .find(|pair| (pair[0].set, pair[0].binding) == (pair[1].set, pair[1].binding))
    {
        return fail(format!(
            "'{}' and '{}' share set {} binding {}",
            pair[0].name, pair[1].name, pair[0].set, pair[0].binding
        ));
    }
    Ok(reflection)
}

fn vertex_inputs(module: &Module) -> Result<Vec<VertexInput>> {
    let Some(entry) = module.entry_points.first() else {
        return Ok(Vec::new());
    };

    let mut inputs = Vec::new();
    for arg in &entry.function.arguments {
        let Some(Binding::Location { location, .. }) = arg.binding else {
            continue;
        };
        let name = arg.name.clone().unwrap_or_else(|| format!("location{location}"));
        let Some(format) = vertex_format(&module.types[arg.ty].inner) else {
            return fail(format!("unsupported attribute type of '{name}'"));
        };
        inputs.push(VertexInput { name, location, format });
    }
    Ok(inputs)
}

fn vertex_format(inner: &TypeInner) -> Option<&'static str> {
    let (scalar, count) = match *inner {
        TypeInner::Scalar(scalar) => (scalar, 1),
        TypeInner::Vector { size, scalar } => (scalar, size as u8),
        _ => return None,
    };
    if scalar.width != 4 {
        return None;
    }
    Some(match (scalar.kind, count) {
        (ScalarKind::Float, 1) => "FORMAT_R32_SFLOAT",
        (ScalarKind::Float, 2) => "FORMAT_R32G32_SFLOAT",
        (ScalarKind::Float, 3) => "FORMAT_R32G32B32_SFLOAT",
        (ScalarKind::Float, 4) => "FORMAT_R32G32B32A32_SFLOAT",
        (ScalarKind::Sint, 1) => "FORMAT_R32_SINT",
        (ScalarKind::Sint, 2) => "FORMAT_R32G32_SINT",
        (ScalarKind::Sint, 3) => "FORMAT_R32G32B32_SINT",
        (ScalarKind::Sint, 4) => "FORMAT_R32G32B32A32_SINT",
        (ScalarKind::Uint, 1) => "FORMAT_R32_UINT",
        (ScalarKind::Uint, 2) => "FORMAT_R32G32_UINT",
        (ScalarKind::Uint, 3) => "FORMAT_R32G32B32_UINT",
        (ScalarKind::Uint, 4) => "FORMAT_R32G32B32A32_UINT",
        _ => return None,
    })
}

fn resources(module: &Module, layouter: &Layouter) -> Result<Vec<ResourceDecl>> {
    let mut resources = Vec::new();

    for (_, global) in module.global_variables.iter() {
        // Push constants and private globals carry no binding.
        let Some(binding) = &global.binding else {
            continue;
        };
        let ty = &module.types[global.ty];

        let kind = match (global.space, &ty.inner) {
            (AddressSpace::Uniform, _) => ResourceKind::UniformBuffer,
            (AddressSpace::Storage { .. }, _) => ResourceKind::StorageBuffer,
            (AddressSpace::Handle, TypeInner::Sampler { .. }) => ResourceKind::Sampler,
            (AddressSpace::Handle, TypeInner::Image { class: ImageClass::Storage { .. }, .. }) => {
                ResourceKind::StorageImage
            }
            (AddressSpace::Handle, TypeInner::Image { .. }) => ResourceKind::SampledTexture,
            _ => continue,
        };

        let (name, instance) = if kind.is_buffer() {
            let Some(block) = ty.name.clone() else {
                return fail(format!("buffer at binding {} has no block name", binding.binding));
            };
            (block, global.name.clone())
        } else {
            let Some(name) = global.name.clone() else {
                return fail(format!("resource at binding {} has no name", binding.binding));
            };
            (name, None)
        };

        let members = match &ty.inner {
            TypeInner::Struct { members, .. } if kind.is_buffer() => {
                members
                    .iter()
                    .map(|member| BlockMember {
                        name: member.name.clone().unwrap_or_default(),
                        offset: member.offset,
                        size: match module.types[member.ty].inner {
                            TypeInner::Array { size: ArraySize::Dynamic, .. } => 0,
                            _ => layouter[member.ty].size,
                        },
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        resources.push(ResourceDecl {
            name,
            instance,
            kind,
            set: binding.group,
            binding: binding.binding,
            members,
        });
    }
    Ok(resources)
}
