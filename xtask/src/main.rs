//! Workspace build tasks.
//!
//! ```text
//! cargo xtask compile-shaders [--backend <gles|vulkan|metal|d3d12>]...
//!                             [--source-dir <dir>]... [--out-dir <dir>]
//!                             [--patch-dir <dir>] [--no-patches] [--jobs <n>]
//!                             [--strict] [--strict-maps]
//!                             [--config <shaders.toml>] [--report <file.json>]
//! ```
//!
//! Exit status is 0 when every unit of every backend compiled, 1 when any
//! unit failed (or, with `--strict-maps`, lacks its map), 2 on usage or
//! configuration errors.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use ngfx_shaders::{
    Backend, PatchSet, Pipeline, PipelineConfig, RunMode, RunReport, StageKind, Toolchain,
    ToolchainConfig, UnitOutcome, locate_sources,
};

const USAGE: &str = "\
usage: cargo xtask compile-shaders [options]

options:
  --backend <gles|vulkan|metal|d3d12>   target backend (repeatable; default: host backends)
  --source-dir <dir>                    shader root (repeatable; default: data/shaders)
  --out-dir <dir>                       output root (default: target/shaders)
  --patch-dir <dir>                     translated-source patches (default: patches)
  --no-patches                          translate without applying patches
  --jobs <n>                            worker threads (default: one per core)
  --strict                              stop starting units after the first failure
  --strict-maps                         treat a missing shader map as a failure
  --config <shaders.toml>               settings file (default: shaders.toml if present)
  --report <file.json>                  write a JSON run report";

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Task {
    CompileShaders(CompileShadersArgs),
    Help,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CompileShadersArgs {
    backends: Vec<Backend>,
    source_dirs: Vec<PathBuf>,
    out_dir: Option<PathBuf>,
    patch_dir: Option<PathBuf>,
    no_patches: bool,
    jobs: Option<usize>,
    strict: bool,
    strict_maps: bool,
    config: Option<PathBuf>,
    report: Option<PathBuf>,
}

fn parse_cli(args: &[String]) -> Result<Task> {
    let Some((task, rest)) = args.split_first() else {
        return Ok(Task::Help);
    };
    match task.as_str() {
        "compile-shaders" => parse_compile_shaders(rest).map(Task::CompileShaders),
        "help" | "--help" | "-h" => Ok(Task::Help),
        other => Err(anyhow!("unknown task: {other}\n\n{USAGE}")),
    }
}

fn parse_compile_shaders(args: &[String]) -> Result<CompileShadersArgs> {
    let mut cli = CompileShadersArgs::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || {
            args.get(i + 1)
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match flag {
            "--backend" => {
                cli.backends.push(value()?.parse()?);
                i += 2;
            }
            "--source-dir" => {
                cli.source_dirs.push(PathBuf::from(value()?));
                i += 2;
            }
            "--out-dir" => {
                cli.out_dir = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--patch-dir" => {
                cli.patch_dir = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--jobs" | "-j" => {
                let raw = value()?;
                cli.jobs = Some(raw.parse().with_context(|| format!("invalid --jobs value '{raw}'"))?);
                i += 2;
            }
            "--config" => {
                cli.config = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--report" => {
                cli.report = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--no-patches" => {
                cli.no_patches = true;
                i += 1;
            }
            "--strict" => {
                cli.strict = true;
                i += 1;
            }
            "--strict-maps" => {
                cli.strict_maps = true;
                i += 1;
            }
            other => bail!("unknown argument: {other}\n\n{USAGE}"),
        }
    }
    Ok(cli)
}

// ============================================================================
// shaders.toml
// ============================================================================

/// Optional settings file; every path is relative to the file itself.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ShadersToml {
    backends: Vec<Backend>,
    roots: Vec<PathBuf>,
    out_dir: Option<PathBuf>,
    patch_dir: Option<PathBuf>,
    jobs: Option<usize>,
    tools: ToolchainConfig,
}

impl ShadersToml {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut file: Self =
            toml::from_str(&text).with_context(|| format!("invalid settings in {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        file.roots = file.roots.iter().map(|root| base.join(root)).collect();
        file.out_dir = file.out_dir.map(|dir| base.join(dir));
        file.patch_dir = file.patch_dir.map(|dir| base.join(dir));
        Ok(file)
    }
}

/// Fully resolved settings: CLI over `shaders.toml` over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    backends: Vec<Backend>,
    roots: Vec<PathBuf>,
    out_dir: PathBuf,
    patch_dir: Option<PathBuf>,
    jobs: usize,
    mode: RunMode,
    strict_maps: bool,
    tools: ToolchainConfig,
    report: Option<PathBuf>,
}

impl Settings {
    fn resolve(cli: CompileShadersArgs, file: ShadersToml, workspace: &Path) -> Self {
        let pick_vec = |cli: Vec<PathBuf>, file: Vec<PathBuf>, default: PathBuf| {
            if !cli.is_empty() {
                cli
            } else if !file.is_empty() {
                file
            } else {
                vec![default]
            }
        };

        let backends = if !cli.backends.is_empty() {
            cli.backends
        } else if !file.backends.is_empty() {
            file.backends
        } else {
            host_backends()
        };

        let patch_dir = (!cli.no_patches).then(|| {
            cli.patch_dir
                .or(file.patch_dir)
                .unwrap_or_else(|| workspace.join("patches"))
        });

        Self {
            backends,
            roots: pick_vec(cli.source_dirs, file.roots, workspace.join("data").join("shaders")),
            out_dir: cli
                .out_dir
                .or(file.out_dir)
                .unwrap_or_else(|| workspace.join("target").join("shaders")),
            patch_dir,
            jobs: cli.jobs.or(file.jobs).unwrap_or(0),
            mode: if cli.strict { RunMode::Strict } else { RunMode::Lenient },
            strict_maps: cli.strict_maps,
            tools: file.tools,
            report: cli.report,
        }
    }
}

/// Backends whose native compilers exist on this host.
fn host_backends() -> Vec<Backend> {
    let mut backends = vec![Backend::Gles, Backend::Vulkan];
    if cfg!(target_os = "macos") {
        backends.push(Backend::Metal);
    }
    if cfg!(target_os = "windows") {
        backends.push(Backend::Direct3D12);
    }
    backends
}

fn workspace_root() -> Result<PathBuf> {
    let metadata = cargo_metadata::MetadataCommand::new()
        .no_deps()
        .exec()
        .context("failed to query cargo metadata")?;
    Ok(metadata.workspace_root.into_std_path_buf())
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Serialize)]
struct RunSummary {
    backends: Vec<BackendSummary>,
}

#[derive(Debug, Serialize)]
struct BackendSummary {
    backend: Backend,
    output_dir: PathBuf,
    units: Vec<UnitSummary>,
}

#[derive(Debug, Serialize)]
struct UnitSummary {
    name: String,
    stage: StageKind,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
    cached: bool,
    patched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl BackendSummary {
    fn new(backend: Backend, report: &RunReport) -> Self {
        let units = report
            .units
            .iter()
            .map(|unit| {
                let (status, error) = match &unit.outcome {
                    UnitOutcome::Done(_) => ("done", None),
                    UnitOutcome::Incomplete { error, .. } => ("incomplete", Some(error.to_string())),
                    UnitOutcome::Failed { step, error } => ("failed", Some(format!("{step}: {error}"))),
                    UnitOutcome::Cancelled => ("cancelled", None),
                };
                UnitSummary {
                    name: unit.source.name.clone(),
                    stage: unit.source.stage,
                    status,
                    artifact: unit.artifact().map(Path::to_path_buf),
                    cached: unit.cached,
                    patched: unit.patched,
                    error,
                }
            })
            .collect();

        Self {
            backend,
            output_dir: report.output_dir.clone(),
            units,
        }
    }
}

// ============================================================================
// compile-shaders
// ============================================================================

/// Returns whether every backend succeeded.
fn compile_shaders(settings: &Settings) -> Result<bool> {
    let sources = locate_sources(&settings.roots, &StageKind::ALL)?;
    if sources.is_empty() {
        log::warn!("No shader sources found under {:?}", settings.roots);
    }

    let patches = match &settings.patch_dir {
        Some(dir) => PatchSet::load_dir(dir)?,
        None => PatchSet::new(),
    };
    let toolchain = Toolchain::process(settings.tools.clone());

    let mut summaries = Vec::new();
    let mut success = true;
    for &backend in &settings.backends {
        let target = backend.target().with_patching(settings.patch_dir.is_some());
        let config = PipelineConfig::new(backend, &settings.out_dir)
            .with_target(target)
            .with_patches(patches.clone())
            .with_toolchain(toolchain.clone())
            .with_jobs(settings.jobs)
            .with_mode(settings.mode);

        let report = Pipeline::new(config)?
            .run(&sources)
            .with_context(|| format!("{backend} batch could not run"))?;

        for unit in report.incomplete() {
            log::warn!("{}: {} has no shader map", backend, unit.source.name);
        }
        let backend_ok = report.success() && (!settings.strict_maps || report.complete());
        success &= backend_ok;
        summaries.push(BackendSummary::new(backend, &report));

        if !backend_ok && settings.mode == RunMode::Strict {
            log::error!("Stopping after {backend} failures");
            break;
        }
    }

    if let Some(path) = &settings.report {
        let json = serde_json::to_string_pretty(&RunSummary { backends: summaries })?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("Wrote report to {}", path.display());
    }
    Ok(success)
}

fn run(args: &[String]) -> Result<bool> {
    let cli = match parse_cli(args)? {
        Task::Help => {
            println!("{USAGE}");
            return Ok(true);
        }
        Task::CompileShaders(cli) => cli,
    };

    let workspace = workspace_root()?;
    let config_path = cli.config.clone().or_else(|| {
        let default = workspace.join("shaders.toml");
        default.is_file().then_some(default)
    });
    let file = match &config_path {
        Some(path) => ShadersToml::load(path)?,
        None => ShadersToml::default(),
    };

    let settings = Settings::resolve(cli, file, &workspace);
    log::info!(
        "Compiling shaders for {:?} into {}",
        settings.backends,
        settings.out_dir.display()
    );
    compile_shaders(&settings)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}
