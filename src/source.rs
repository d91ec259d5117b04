//! Shader Source Discovery
//!
//! Recursively finds portable shader sources under a list of root
//! directories. Results are deterministic: roots in the order given, then
//! lexical order within each root.

use std::fmt;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::errors::{PipelineError, Result};

/// Pipeline stage a portable source is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Vertex,
    Fragment,
    Compute,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Vertex, StageKind::Fragment, StageKind::Compute];

    /// File extension of portable sources for this stage.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }

    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.extension() == ext)
    }

    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        })
    }
}

/// A discovered portable shader source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub stage: StageKind,
    /// Path relative to its root, `/`-separated (e.g. `blur/gauss.frag`).
    pub name: String,
}

impl ShaderSource {
    /// Builds a source from a single file, naming it after its file name.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stage = StageKind::from_path(&path).ok_or_else(|| {
            PipelineError::Config(format!(
                "{} has no recognised shader stage extension",
                path.display()
            ))
        })?;
        let name = file_name(&path);
        Ok(Self { path, stage, name })
    }

    /// Final path component, used to build patch keys.
    #[must_use]
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Collects every source under `roots` whose extension matches `stages`.
///
/// A missing or unreadable root is an error rather than an empty result, so
/// callers can tell "no shaders" apart from "wrong directory".
pub fn locate_sources<P: AsRef<Path>>(roots: &[P], stages: &[StageKind]) -> Result<Vec<ShaderSource>> {
    let mut seen = FxHashSet::default();
    let mut sources = Vec::new();

    for root in roots {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(PipelineError::Discovery {
                root: root.to_path_buf(),
                reason: "not an existing directory".to_string(),
            });
        }

        let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| PipelineError::Discovery {
                root: root.to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(stage) = StageKind::from_path(entry.path()) else {
                continue;
            };
            if !stages.contains(&stage) {
                continue;
            }

            let path = entry.into_path();
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            if !seen.insert(canonical) {
                continue;
            }

            let name = relative_name(root, &path);
            sources.push(ShaderSource { path, stage, name });
        }
    }

    log::debug!("Located {} shader sources under {} roots", sources.len(), roots.len());
    Ok(sources)
}

fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
