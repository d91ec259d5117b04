//! Content Fingerprints & Artifact Naming
//!
//! Every artifact the pipeline writes is named after an xxh3-128 digest of
//! the content it was derived from. Identical content therefore maps to the
//! same file names regardless of source path or mtime, and a shader that is
//! edited and then reverted is recognised as already compiled without any
//! persisted index.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::xxh3_128;

use crate::backend::BackendTarget;
use crate::errors::{PipelineError, Result};
use crate::source::StageKind;

/// 128-bit content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u128);

impl Fingerprint {
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxh3_128(bytes))
    }

    pub fn of_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(Self::of(&bytes))
    }

    /// Digest of two digests, order-sensitive.
    #[must_use]
    pub fn combine(self, other: Fingerprint) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&self.0.to_le_bytes());
        bytes[16..].copy_from_slice(&other.0.to_le_bytes());
        Self::of(&bytes)
    }

    #[inline]
    #[must_use]
    pub fn as_u128(self) -> u128 {
        self.0
    }

    /// 32 lowercase hex digits.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Canonical file for `digest` with extension `ext` under `dir`.
#[must_use]
pub fn cache_path(dir: &Path, digest: Fingerprint, ext: &str) -> PathBuf {
    dir.join(format!("{digest}.{ext}"))
}

/// Cache-hit gate: true iff every path exists with non-zero size.
pub fn outputs_exist<P: AsRef<Path>>(paths: &[P]) -> bool {
    paths.iter().all(|path| {
        fs::metadata(path.as_ref()).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
    })
}

// ─── ArtifactLayout ──────────────────────────────────────────────────────────

/// File names of every artifact one unit may produce.
///
/// The intermediate is keyed by the source digest combined with everything
/// that shapes the stage compiler's output. Translated, final and map files
/// are keyed by the unit key, which also folds in the later tool specs and
/// the patch digest when the unit is patched, so a patched and an unpatched
/// translation of the same content never share a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub intermediate: PathBuf,
    pub translated: Option<PathBuf>,
    pub artifact: PathBuf,
    pub map: PathBuf,
}

impl ArtifactLayout {
    #[must_use]
    pub fn new(
        target: &BackendTarget,
        dir: &Path,
        stage: StageKind,
        intermediate_key: Fingerprint,
        unit_key: Fingerprint,
    ) -> Self {
        let stage_ext = stage.extension();
        let intermediate = cache_path(dir, intermediate_key, &format!("{stage_ext}.spv"));
        let translated = target
            .translated_extension()
            .map(|ext| cache_path(dir, unit_key, &format!("{stage_ext}.{ext}")));
        let artifact = cache_path(
            dir,
            unit_key,
            &format!("{stage_ext}.{}", target.artifact_extension()),
        );
        let map = map_path_for(&artifact);

        Self {
            intermediate,
            translated,
            artifact,
            map,
        }
    }
}

/// Sidecar map path of a compiled artifact: `<artifact>.map`.
#[must_use]
pub fn map_path_for(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".map");
    PathBuf::from(name)
}

/// Writes `bytes` to `path` through a uniquely named sibling temp file and a
/// rename, so readers never observe a half-written file and two writers of
/// the same content race harmlessly.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    fs::write(&temp, bytes).map_err(|e| PipelineError::io(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        PipelineError::io(path, e)
    })
}
