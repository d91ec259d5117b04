//! Pipeline Orchestrator
//!
//! Drives every (source, backend) unit through the transform chain as an
//! explicit state machine:
//!
//! ```text
//! Discovered → Compiled → [Translated] → [Patched] → NativeCompiled
//!            → MapGenerated → Done
//! ```
//!
//! `Translated`/`Patched` are skipped for backends that compile the
//! intermediate directly. A failing step moves the unit to
//! [`UnitState::Failed`]; a failing map moves it to
//! [`UnitState::Incomplete`], which keeps the artifact.
//!
//! # Caching
//!
//! - **Unit level**: when the final artifact and its map already exist the
//!   unit is `Done` without invoking any tool.
//! - **Step level**: an existing intermediate, translated file or artifact
//!   is reused instead of being regenerated.
//!
//! All file names are content fingerprints, so units never share a path
//! unless they share content. Sources with equal content are run serially
//! in one worker; everything else runs in parallel.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::compiler::{NativeCompiler, StageCompiler};
use crate::config::{InteractiveConfig, PipelineConfig, RunMode};
use crate::errors::{PipelineError, Result};
use crate::fingerprint::{ArtifactLayout, Fingerprint, outputs_exist, write_atomic};
use crate::manifest::{Manifest, ManifestEntry};
use crate::patch::{Patch, PatchOutcome, PatchTarget, apply_patches, patch_key};
use crate::shader_map::{MapRequest, ShaderMap, generate_map};
use crate::source::{ShaderSource, StageKind};
use crate::translator::Translator;

// ============================================================================
// Unit State Machine
// ============================================================================

/// A step of the transform chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Compile,
    Translate,
    Patch,
    NativeCompile,
    MapGenerate,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compile => "compile",
            Self::Translate => "translate",
            Self::Patch => "patch",
            Self::NativeCompile => "native compile",
            Self::MapGenerate => "map generation",
        })
    }
}

/// Progress of one unit through the chain.
#[derive(Debug)]
pub enum UnitState {
    Discovered,
    Compiled { intermediate: PathBuf },
    Translated { translated: PathBuf },
    Patched { translated: PathBuf, outcome: PatchOutcome },
    NativeCompiled { artifact: PathBuf },
    MapGenerated { artifact: PathBuf, map: PathBuf },
    Done { artifact: PathBuf, map: PathBuf },
    /// The artifact is usable but its map could not be generated.
    Incomplete { artifact: PathBuf, error: PipelineError },
    Failed { step: Step, error: PipelineError },
}

impl UnitState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::Incomplete { .. } | Self::Failed { .. }
        )
    }

    /// Runs the next step. Terminal states return themselves.
    #[must_use]
    pub fn advance(self, unit: &Unit<'_>, pipeline: &Pipeline) -> Self {
        let target = &pipeline.config.target;
        match self {
            Self::Discovered => settle(Step::Compile, pipeline.compile_intermediate(unit)),
            Self::Compiled { intermediate } => match &unit.layout.translated {
                Some(translated) if target.translates() => {
                    settle(Step::Translate, pipeline.translate(&intermediate, translated))
                }
                _ => pipeline.native_compile(unit, &intermediate),
            },
            Self::Translated { translated } => {
                if target.patches() {
                    settle(Step::Patch, pipeline.patch(unit, &translated))
                } else {
                    pipeline.native_compile(unit, &translated)
                }
            }
            Self::Patched { translated, .. } => pipeline.native_compile(unit, &translated),
            Self::NativeCompiled { artifact } => {
                let request = MapRequest {
                    source: unit.source.path.clone(),
                    stage: unit.source.stage,
                    artifact: artifact.clone(),
                };
                match generate_map(&request, target) {
                    Ok(map) => Self::MapGenerated { artifact, map },
                    Err(error) if error.is_soft() => Self::Incomplete { artifact, error },
                    Err(error) => Self::Failed {
                        step: Step::MapGenerate,
                        error,
                    },
                }
            }
            Self::MapGenerated { artifact, map } => Self::Done { artifact, map },
            terminal => terminal,
        }
    }
}

fn settle(step: Step, result: Result<UnitState>) -> UnitState {
    result.unwrap_or_else(|error| UnitState::Failed { step, error })
}

/// Everything derived up front for one unit.
#[derive(Debug, Clone)]
pub struct Unit<'a> {
    pub source: &'a ShaderSource,
    /// Digest of the source bytes.
    pub source_key: Fingerprint,
    /// Source digest combined with the defines and stage compiler spec;
    /// names the intermediate.
    pub intermediate_key: Fingerprint,
    /// Intermediate key combined with the translator and native compiler
    /// specs, and with the patch digest when a patch applies; names every
    /// later artifact.
    pub key: Fingerprint,
    /// Digest of the patch folded into `key`.
    pub patch_digest: Option<Fingerprint>,
    /// Key the patch set is consulted with, for patching backends.
    pub patch_key: Option<String>,
    pub layout: ArtifactLayout,
}

impl Unit<'_> {
    fn is_cached(&self) -> bool {
        outputs_exist(&[&self.layout.artifact, &self.layout.map])
    }
}

// ============================================================================
// Reports
// ============================================================================

/// A final artifact with its map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub stage: StageKind,
    pub artifact: PathBuf,
    pub map: PathBuf,
}

impl CompiledArtifact {
    pub fn load_map(&self) -> Result<ShaderMap> {
        ShaderMap::load(&self.map)
    }
}

#[derive(Debug)]
pub enum UnitOutcome {
    Done(CompiledArtifact),
    Incomplete { artifact: PathBuf, error: PipelineError },
    Failed { step: Step, error: PipelineError },
    /// Not started because an earlier unit failed in strict mode.
    Cancelled,
}

#[derive(Debug)]
pub struct UnitReport {
    pub source: ShaderSource,
    pub outcome: UnitOutcome,
    /// Satisfied entirely from the unit-level cache.
    pub cached: bool,
    /// The translated source carries a patch.
    pub patched: bool,
}

impl UnitReport {
    fn new(source: &ShaderSource, outcome: UnitOutcome) -> Self {
        Self {
            source: source.clone(),
            outcome,
            cached: false,
            patched: false,
        }
    }

    #[must_use]
    pub fn artifact(&self) -> Option<&Path> {
        match &self.outcome {
            UnitOutcome::Done(compiled) => Some(&compiled.artifact),
            UnitOutcome::Incomplete { artifact, .. } => Some(artifact),
            UnitOutcome::Failed { .. } | UnitOutcome::Cancelled => None,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Failed { .. } | UnitOutcome::Cancelled)
    }

    /// The compiled artifact, or the error that prevented a complete one.
    pub fn into_result(self) -> Result<CompiledArtifact> {
        match self.outcome {
            UnitOutcome::Done(compiled) => Ok(compiled),
            UnitOutcome::Incomplete { error, .. } | UnitOutcome::Failed { error, .. } => Err(error),
            UnitOutcome::Cancelled => Err(PipelineError::Config(format!(
                "{} was cancelled after an earlier failure",
                self.source.name
            ))),
        }
    }
}

/// Outcome of one batch, in source order.
#[derive(Debug)]
pub struct RunReport {
    pub output_dir: PathBuf,
    pub units: Vec<UnitReport>,
}

impl RunReport {
    /// No unit failed or was cancelled. Incomplete units still count.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.units.iter().any(UnitReport::is_failed)
    }

    /// Every unit is `Done` with its map.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.units
            .iter()
            .all(|unit| matches!(unit.outcome, UnitOutcome::Done(_)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|unit| unit.is_failed())
    }

    pub fn incomplete(&self) -> impl Iterator<Item = &UnitReport> {
        self.units
            .iter()
            .filter(|unit| matches!(unit.outcome, UnitOutcome::Incomplete { .. }))
    }

    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.units.iter().filter(|unit| unit.cached).count()
    }
}

/// Artifacts of an interactive vertex + fragment compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramArtifacts {
    pub vertex: CompiledArtifact,
    pub fragment: CompiledArtifact,
    /// Both stages came from the cache; no tool ran.
    pub cached: bool,
}

// ============================================================================
// Pipeline
// ============================================================================

/// One backend's compile pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    cancelled: AtomicBool,
}

impl Pipeline {
    /// Validates `config`; nothing touches the filesystem before this passes.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancelled: AtomicBool::new(false),
        })
    }

    /// Interactive pipeline configured from `GRAPHICS_BACKEND` and `TEMP`.
    pub fn from_env() -> Result<Self> {
        Self::new(InteractiveConfig::from_env()?.pipeline_config())
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Directory every artifact of this backend lands in.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.config.backend_dir()
    }

    /// Derives keys and file names of `source`.
    pub fn prepare_unit<'a>(&self, source: &'a ShaderSource) -> Result<Unit<'a>> {
        let target = &self.config.target;
        let tools = &self.config.toolchain.config;
        let source_key = Fingerprint::of_file(&source.path)?;

        let intermediate_key = source_key
            .combine(target.defines.fingerprint())
            .combine(tools.stage_compiler.fingerprint());
        let mut chain_key = intermediate_key;
        if target.translates() {
            chain_key = chain_key.combine(tools.translator.fingerprint());
        }
        chain_key = chain_key.combine(tools.native(target.backend).fingerprint());

        let patch_key = target
            .translated_extension()
            .filter(|_| target.patches())
            .map(|ext| patch_key(&source.file_name(), ext));
        let patch_digest = patch_key
            .as_deref()
            .and_then(|k| self.config.patches.get(k))
            .map(Patch::digest);
        let key = match patch_digest {
            Some(digest) => chain_key.combine(digest),
            None => chain_key,
        };

        let layout = ArtifactLayout::new(target, &self.output_dir(), source.stage, intermediate_key, key);
        Ok(Unit {
            source,
            source_key,
            intermediate_key,
            key,
            patch_digest,
            patch_key,
            layout,
        })
    }

    // ─── Batch ───────────────────────────────────────────────────────────

    /// Runs every source through the chain and refreshes the manifest.
    ///
    /// Returns `Err` only when the batch itself cannot run; per-unit
    /// failures are in the report.
    pub fn run(&self, sources: &[ShaderSource]) -> Result<RunReport> {
        let output_dir = self.output_dir();
        fs::create_dir_all(&output_dir).map_err(|e| PipelineError::io(&output_dir, e))?;
        self.cancelled.store(false, Ordering::Release);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs)
            .thread_name(|i| format!("ngfx-shaders-{i}"))
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot start worker pool: {e}")))?;

        let groups = group_by_content(sources);
        let mut indexed: Vec<(usize, UnitReport)> = pool.install(|| {
            groups
                .par_iter()
                .flat_map_iter(|group| group.iter().map(move |&i| (i, self.run_unit(&sources[i]))))
                .collect()
        });
        indexed.sort_by_key(|(i, _)| *i);
        let units: Vec<UnitReport> = indexed.into_iter().map(|(_, report)| report).collect();

        self.update_manifest(&units)?;

        let report = RunReport { output_dir, units };
        log::info!(
            "{}: {} unit(s), {} cached, {} incomplete, {} failed",
            self.config.target.backend,
            report.units.len(),
            report.cached_count(),
            report.incomplete().count(),
            report.failed().count(),
        );
        Ok(report)
    }

    /// Runs one unit to a terminal state.
    pub fn run_unit(&self, source: &ShaderSource) -> UnitReport {
        if self.config.mode == RunMode::Strict && self.cancelled.load(Ordering::Acquire) {
            log::debug!("Skipping {} after an earlier failure", source.name);
            return UnitReport::new(source, UnitOutcome::Cancelled);
        }

        let unit = match self.prepare_unit(source) {
            Ok(unit) => unit,
            Err(error) => return self.failed(source, Step::Compile, error),
        };

        if unit.is_cached() {
            log::debug!("Cache hit: {} → {}", source.name, unit.layout.artifact.display());
            return UnitReport {
                cached: true,
                patched: unit.patch_digest.is_some(),
                ..UnitReport::new(
                    source,
                    UnitOutcome::Done(CompiledArtifact {
                        stage: source.stage,
                        artifact: unit.layout.artifact.clone(),
                        map: unit.layout.map.clone(),
                    }),
                )
            };
        }

        let mut state = UnitState::Discovered;
        let mut patched = false;
        let outcome = loop {
            state = match state {
                UnitState::Done { artifact, map } => {
                    log::info!("Compiled {} → {}", source.name, artifact.display());
                    break UnitOutcome::Done(CompiledArtifact {
                        stage: source.stage,
                        artifact,
                        map,
                    });
                }
                UnitState::Incomplete { artifact, error } => {
                    log::warn!("{error}");
                    break UnitOutcome::Incomplete { artifact, error };
                }
                UnitState::Failed { step, error } => return self.failed(source, step, error),
                pending => {
                    let next = pending.advance(&unit, self);
                    if let UnitState::Patched { outcome, .. } = &next {
                        patched = outcome.is_patched();
                    }
                    next
                }
            };
        };

        UnitReport {
            patched,
            ..UnitReport::new(source, outcome)
        }
    }

    fn failed(&self, source: &ShaderSource, step: Step, error: PipelineError) -> UnitReport {
        log::error!("{} failed during {step}: {error}", source.name);
        if self.config.mode == RunMode::Strict {
            self.cancelled.store(true, Ordering::Release);
        }
        UnitReport::new(source, UnitOutcome::Failed { step, error })
    }

    /// Merges this run's units into the manifest; a failed unit loses its
    /// entry.
    fn update_manifest(&self, units: &[UnitReport]) -> Result<()> {
        let dir = self.output_dir();
        let mut manifest = Manifest::load_or_new(&dir, self.config.target.backend);
        let mut written: FxHashMap<&str, &Path> = FxHashMap::default();
        let mut failed: Vec<&str> = Vec::new();

        for unit in units {
            if matches!(unit.outcome, UnitOutcome::Failed { .. }) {
                failed.push(&unit.source.name);
                continue;
            }
            let Some(artifact) = unit.artifact() else {
                continue;
            };
            if let Some(first) = written.get(unit.source.name.as_str()) {
                log::warn!(
                    "{} is provided by both {} and {}; keeping the first",
                    unit.source.name,
                    first.display(),
                    unit.source.path.display()
                );
                continue;
            }
            written.insert(&unit.source.name, &unit.source.path);

            let map = match &unit.outcome {
                UnitOutcome::Done(compiled) => relative_name(&compiled.map),
                _ => None,
            };
            let Some(artifact) = relative_name(artifact) else {
                continue;
            };
            manifest.insert(
                unit.source.name.clone(),
                ManifestEntry {
                    stage: unit.source.stage,
                    artifact,
                    map,
                },
            );
        }

        // An earlier run's entry would hand out code the current source no
        // longer compiles to.
        for name in failed {
            if !written.contains_key(name) && manifest.remove(name).is_some() {
                log::warn!("Removed manifest entry of failed unit {name}");
            }
        }
        manifest.write(&dir)
    }

    // ─── Steps ───────────────────────────────────────────────────────────

    fn compile_intermediate(&self, unit: &Unit<'_>) -> Result<UnitState> {
        let intermediate = &unit.layout.intermediate;
        if outputs_exist(&[intermediate]) {
            log::debug!("Reusing intermediate {}", intermediate.display());
        } else {
            StageCompiler::new(&self.config.toolchain).compile_to(
                &unit.source.path,
                unit.source.stage,
                &self.config.target.defines,
                intermediate,
            )?;
        }
        Ok(UnitState::Compiled {
            intermediate: intermediate.clone(),
        })
    }

    fn translate(&self, intermediate: &Path, translated: &Path) -> Result<UnitState> {
        let Some(dialect) = self.config.target.translated_dialect() else {
            return Err(PipelineError::Config(format!(
                "{} has no translated dialect",
                self.config.target.backend
            )));
        };
        if outputs_exist(&[translated]) {
            log::debug!("Reusing translation {}", translated.display());
        } else {
            Translator::new(&self.config.toolchain).translate_to(intermediate, translated, dialect)?;
        }
        Ok(UnitState::Translated {
            translated: translated.to_path_buf(),
        })
    }

    fn patch(&self, unit: &Unit<'_>, translated: &Path) -> Result<UnitState> {
        let outcome = match &unit.patch_key {
            Some(key) => {
                let targets = [PatchTarget {
                    file: translated.to_path_buf(),
                    key: key.clone(),
                }];
                let applied = apply_patches(&self.config.patches, &targets)?;
                applied
                    .entries
                    .first()
                    .map_or(PatchOutcome::Skipped, |entry| entry.outcome)
            }
            None => PatchOutcome::Skipped,
        };
        Ok(UnitState::Patched {
            translated: translated.to_path_buf(),
            outcome,
        })
    }

    fn native_compile(&self, unit: &Unit<'_>, input: &Path) -> UnitState {
        let artifact = &unit.layout.artifact;
        if outputs_exist(&[artifact]) {
            log::debug!("Reusing artifact {}", artifact.display());
        } else if let Err(error) = NativeCompiler::new(&self.config.toolchain, &self.config.target)
            .compile_to(input, unit.source.stage, artifact)
        {
            return UnitState::Failed {
                step: Step::NativeCompile,
                error,
            };
        }
        UnitState::NativeCompiled {
            artifact: artifact.clone(),
        }
    }

    // ─── Interactive ─────────────────────────────────────────────────────

    /// Compiles a vertex + fragment pair given as text.
    ///
    /// Sources are written to `tmp_<digest>.vert`/`.frag` under the output
    /// root. When both artifacts and maps already exist no tool runs.
    /// Otherwise both stages run, and any failure, including a missing map,
    /// is an error.
    pub fn compile_program(&self, vertex_src: &str, fragment_src: &str) -> Result<ProgramArtifacts> {
        let vertex = self.scratch_source(vertex_src, StageKind::Vertex)?;
        let fragment = self.scratch_source(fragment_src, StageKind::Fragment)?;

        let units = [self.prepare_unit(&vertex)?, self.prepare_unit(&fragment)?];
        if units.iter().all(Unit::is_cached) {
            log::debug!("Program cache hit: {} + {}", vertex.name, fragment.name);
            let [v, f] = units.map(|unit| CompiledArtifact {
                stage: unit.source.stage,
                artifact: unit.layout.artifact,
                map: unit.layout.map,
            });
            return Ok(ProgramArtifacts {
                vertex: v,
                fragment: f,
                cached: true,
            });
        }

        Ok(ProgramArtifacts {
            vertex: self.run_unit(&vertex).into_result()?,
            fragment: self.run_unit(&fragment).into_result()?,
            cached: false,
        })
    }

    /// Compiles a single compute stage given as text.
    pub fn compile_compute(&self, compute_src: &str) -> Result<CompiledArtifact> {
        let compute = self.scratch_source(compute_src, StageKind::Compute)?;
        self.run_unit(&compute).into_result()
    }

    /// Writes `text` to its content-named scratch file, once.
    fn scratch_source(&self, text: &str, stage: StageKind) -> Result<ShaderSource> {
        let digest = Fingerprint::of(text.as_bytes());
        let path = self
            .config
            .out_root
            .join(format!("tmp_{digest}.{}", stage.extension()));
        if !outputs_exist(&[&path]) {
            write_atomic(&path, text.as_bytes())?;
        }
        ShaderSource::from_file(path)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("backend", &self.config.target.backend)
            .field("out_root", &self.config.out_root)
            .finish_non_exhaustive()
    }
}

/// Groups source indices by (stage, content); unreadable sources get a group
/// of their own and fail inside their unit.
fn group_by_content(sources: &[ShaderSource]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut by_key: FxHashMap<(StageKind, Fingerprint), usize> = FxHashMap::default();

    for (i, source) in sources.iter().enumerate() {
        let Ok(digest) = Fingerprint::of_file(&source.path) else {
            groups.push(vec![i]);
            continue;
        };
        match by_key.get(&(source.stage, digest)) {
            Some(&group) => groups[group].push(i),
            None => {
                by_key.insert((source.stage, digest), groups.len());
                groups.push(vec![i]);
            }
        }
    }
    groups
}

fn relative_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}
