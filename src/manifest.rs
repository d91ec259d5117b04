//! Per-backend manifest.
//!
//! `manifest.json` in each backend directory maps logical shader names
//! (`blur/gauss.frag`) to the content-named artifact and map files, so the
//! engine can resolve a stage by name without knowing fingerprints.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::errors::{PipelineError, Result};
use crate::fingerprint::write_atomic;
use crate::source::StageKind;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub stage: StageKind,
    /// Artifact file name, relative to the backend directory.
    pub artifact: String,
    /// Map file name; absent when map generation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub backend: Backend,
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn path_in(backend_dir: &Path) -> PathBuf {
        backend_dir.join(MANIFEST_FILE)
    }

    /// Loads the manifest of `backend_dir`.
    pub fn load(backend_dir: &Path) -> Result<Self> {
        let path = Self::path_in(backend_dir);
        let bytes = std::fs::read(&path).map_err(|e| PipelineError::io(&path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Loads the existing manifest, or starts an empty one when there is none
    /// or it cannot be read.
    #[must_use]
    pub fn load_or_new(backend_dir: &Path, backend: Backend) -> Self {
        let path = Self::path_in(backend_dir);
        if !path.exists() {
            return Self::new(backend);
        }
        match Self::load(backend_dir) {
            Ok(manifest) if manifest.backend == backend => manifest,
            Ok(_) => {
                log::warn!("{} belongs to another backend, rebuilding it", path.display());
                Self::new(backend)
            }
            Err(e) => {
                log::warn!("Ignoring unreadable manifest: {e}");
                Self::new(backend)
            }
        }
    }

    pub fn write(&self, backend_dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&Self::path_in(backend_dir), &json)
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<ManifestEntry> {
        self.entries.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.get(name)
    }

    /// Absolute artifact and map paths of `name`.
    #[must_use]
    pub fn lookup(&self, backend_dir: &Path, name: &str) -> Option<(PathBuf, Option<PathBuf>)> {
        self.get(name).map(|entry| {
            (
                backend_dir.join(&entry.artifact),
                entry.map.as_ref().map(|map| backend_dir.join(map)),
            )
        })
    }
}
