//! Patch Applier
//!
//! Hand-maintained corrections for translator output. A [`PatchSet`] maps a
//! patch key (`<source file name>.<translated ext>`, e.g.
//! `common.frag.hlsl`) to a unified diff. After translation, every
//! translated file whose key has an entry is patched in place; files without
//! an entry are left byte-identical.
//!
//! Re-applying a patch that is already present is a no-op, the same as
//! `patch -N`, so a rerun that reuses a cached translation stays idempotent.

mod diff;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use diff::{DiffError, UnifiedDiff};

use crate::errors::{PipelineError, Result};
use crate::fingerprint::{Fingerprint, write_atomic};

/// File extension of patch files in a patch directory.
pub const PATCH_EXTENSION: &str = "patch";

/// Key a translated file is looked up under.
#[must_use]
pub fn patch_key(source_file_name: &str, translated_ext: &str) -> String {
    format!("{source_file_name}.{translated_ext}")
}

// ─── Patch ───────────────────────────────────────────────────────────────────

/// One unified diff. Parsing is deferred to application so a malformed patch
/// only fails the unit it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// File the patch was loaded from, if any.
    pub origin: Option<PathBuf>,
    text: String,
    digest: Fingerprint,
}

impl Patch {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let digest = Fingerprint::of(text.as_bytes());
        Self {
            origin: None,
            text,
            digest,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(Self {
            origin: Some(path.to_path_buf()),
            ..Self::new(text)
        })
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Content digest, folded into the key of every unit this patch touches.
    #[inline]
    #[must_use]
    pub fn digest(&self) -> Fingerprint {
        self.digest
    }
}

// ─── PatchSet ────────────────────────────────────────────────────────────────

/// Patch key → patch. Backend-agnostic: the key's extension decides which
/// backend's translated output an entry applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    entries: BTreeMap<String, Patch>,
}

impl PatchSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.patch` file directly under `dir`.
    ///
    /// A directory that does not exist yields an empty set; most checkouts
    /// carry no patches at all.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut set = Self::new();
        if !dir.exists() {
            log::debug!("No patch directory at {}", dir.display());
            return Ok(set);
        }
        if !dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "patch directory {} is not a directory",
                dir.display()
            )));
        }

        let entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PATCH_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let key = key.to_string();
            set.entries.insert(key, Patch::from_file(&path)?);
        }

        log::info!("Loaded {} patch(es) from {}", set.len(), dir.display());
        Ok(set)
    }

    pub fn insert(&mut self, key: impl Into<String>, patch: Patch) -> Option<Patch> {
        self.entries.insert(key.into(), patch)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Patch> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// ─── Application ─────────────────────────────────────────────────────────────

/// What happened to one translated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// No entry for the file's key; content untouched.
    Skipped,
    /// The patch was applied and the file rewritten.
    Applied,
    /// The file already contained the patch; content untouched.
    AlreadyApplied,
}

impl PatchOutcome {
    /// True when the file now carries a patch.
    #[must_use]
    pub fn is_patched(self) -> bool {
        matches!(self, Self::Applied | Self::AlreadyApplied)
    }
}

/// A translated file and the key its patch is looked up under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub file: PathBuf,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEntry {
    pub file: PathBuf,
    pub key: String,
    pub outcome: PatchOutcome,
}

/// Per-file outcome of [`apply_patches`], in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedList {
    pub entries: Vec<AppliedEntry>,
}

impl AppliedList {
    /// Files that carry a patch after the step.
    pub fn patched(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.is_patched())
            .map(|entry| entry.file.as_path())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Patches every target that has an entry in `patches`.
///
/// Stops at the first failure; files after it are not touched.
pub fn apply_patches(patches: &PatchSet, targets: &[PatchTarget]) -> Result<AppliedList> {
    let mut list = AppliedList::default();
    for target in targets {
        let outcome = match patches.get(&target.key) {
            Some(patch) => apply_patch(patch, &target.file)?,
            None => PatchOutcome::Skipped,
        };
        list.entries.push(AppliedEntry {
            file: target.file.clone(),
            key: target.key.clone(),
            outcome,
        });
    }
    Ok(list)
}

/// Applies one patch to `file` in place.
pub fn apply_patch(patch: &Patch, file: &Path) -> Result<PatchOutcome> {
    let patch_error = |reason: String| PipelineError::Patch {
        file: file.to_path_buf(),
        reason,
    };

    let diff = UnifiedDiff::parse(patch.text()).map_err(|e| patch_error(e.to_string()))?;
    let current = fs::read_to_string(file).map_err(|e| PipelineError::io(file, e))?;

    if diff.is_applied_to(&current) {
        log::debug!("Patch already applied to {}", file.display());
        return Ok(PatchOutcome::AlreadyApplied);
    }

    let patched = diff.apply(&current).map_err(|e| patch_error(e.to_string()))?;
    write_atomic(file, patched.as_bytes())?;
    log::debug!("Applied {} hunk(s) to {}", diff.hunk_count(), file.display());
    Ok(PatchOutcome::Applied)
}
