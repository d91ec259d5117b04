//! Pipeline Orchestrator Tests
//!
//! Tests for:
//! - End-to-end runs on Vulkan (direct) and Direct3D12 (translate + patch)
//! - Unit-level cache idempotence and determinism across output roots
//! - Cache invalidation when defines or tool specs change
//! - Fail-fast ordering inside a unit and strict-mode cancellation
//! - Patch scoping, stale patches and Metal patching
//! - Soft map failures, manifests and consumer-side lookup

mod common;

use std::fs;
use std::path::Path;

use common::*;
use ngfx_shaders::patch::Patch;
use ngfx_shaders::{
    Backend, Manifest, PatchSet, Pipeline, PipelineConfig, PipelineError, RunMode, ShaderMap, ShaderSource, Slot,
    StageKind, Step, ToolKind, ToolSpec, ToolchainConfig, UnitOutcome, locate_sources,
};

fn sources(root: &Path) -> Vec<ShaderSource> {
    locate_sources(&[root], &StageKind::ALL).unwrap()
}

fn pipeline(backend: Backend, out: &Path, fake: &std::sync::Arc<FakeToolchain>) -> PipelineConfig {
    PipelineConfig::new(backend, out).with_toolchain(fake.toolchain())
}

fn patch_set(key: &str, text: &str) -> PatchSet {
    let mut set = PatchSet::new();
    set.insert(key, Patch::new(text));
    set
}

// ============================================================================
// Scenario A: Vulkan, no translation
// ============================================================================

#[test]
fn vulkan_run_produces_intermediates_artifacts_and_maps() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();

    let report = Pipeline::new(pipeline(Backend::Vulkan, &out, &fake))
        .unwrap()
        .run(&sources(&root))
        .unwrap();

    assert!(report.success());
    assert!(report.complete());
    let dir = out.join("vulkan");
    assert_eq!(intermediates(&dir).len(), 2);
    assert_eq!(files_ending(&dir, ".vk.spv").len(), 2);
    assert_eq!(files_ending(&dir, ".map").len(), 2);
    assert!(files_ending(&dir, ".hlsl").is_empty());
    assert!(files_ending(&dir, ".metal").is_empty());

    assert_eq!(fake.count(ToolKind::StageCompiler), 2);
    assert_eq!(fake.count(ToolKind::Translator), 0);
    assert_eq!(fake.count(ToolKind::NativeCompiler), 2);
    assert!(report.units.iter().all(|unit| !unit.patched && !unit.cached));
}

// ============================================================================
// Scenario B: Direct3D12 with a fragment patch
// ============================================================================

#[test]
fn d3d12_run_patches_only_the_matching_fragment() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let config = pipeline(Backend::Direct3D12, &out, &fake).with_patches(patch_set("fill.frag.hlsl", FIX_PATCH));

    let report = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    assert!(report.complete());
    let dir = out.join("d3d12");
    assert_eq!(intermediates(&dir).len(), 2);
    assert_eq!(files_ending(&dir, ".hlsl").len(), 2);
    assert_eq!(files_ending(&dir, ".dxil").len(), 2);
    assert_eq!(files_ending(&dir, ".map").len(), 2);

    let patched: Vec<_> = report.units.iter().filter(|unit| unit.patched).collect();
    assert_eq!(patched.len(), 1);
    assert_eq!(patched[0].source.name, "fill.frag");

    let frag_hlsl = &files_ending(&dir, ".frag.hlsl")[0];
    let vert_hlsl = &files_ending(&dir, ".vert.hlsl")[0];
    assert!(fs::read_to_string(dir.join(frag_hlsl)).unwrap().contains("float4(0, 1, 0, 1)"));
    assert!(fs::read_to_string(dir.join(vert_hlsl)).unwrap().contains("float4(1, 0, 0, 1)"));
}

#[test]
fn unmatched_translation_is_byte_identical_to_translator_output() {
    let root = source_root(&[("quad.vert", QUAD_VERT)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let config = pipeline(Backend::Direct3D12, &out, &fake).with_patches(patch_set("fill.frag.hlsl", FIX_PATCH));

    Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    let dir = out.join("d3d12");
    let intermediate = fs::read(dir.join(&intermediates(&dir)[0])).unwrap();
    let translated = fs::read_to_string(dir.join(&files_ending(&dir, ".vert.hlsl")[0])).unwrap();
    assert_eq!(translated, translated_text(&intermediate));
}

// ============================================================================
// Scenario C: Cache idempotence
// ============================================================================

#[test]
fn rerun_with_unchanged_sources_invokes_no_tools() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let pipeline = Pipeline::new(pipeline(Backend::Vulkan, &out, &fake)).unwrap();

    pipeline.run(&sources(&root)).unwrap();
    fake.reset();
    let second = pipeline.run(&sources(&root)).unwrap();

    assert_eq!(fake.count(ToolKind::StageCompiler), 0);
    assert_eq!(fake.total(), 0);
    assert_eq!(second.cached_count(), 2);
    assert!(second.complete());
}

#[test]
fn patched_rerun_is_a_cache_hit() {
    let root = source_root(&[("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let config = pipeline(Backend::Direct3D12, &out, &fake).with_patches(patch_set("fill.frag.hlsl", FIX_PATCH));
    let pipeline = Pipeline::new(config).unwrap();

    pipeline.run(&sources(&root)).unwrap();
    fake.reset();
    let second = pipeline.run(&sources(&root)).unwrap();

    assert_eq!(fake.total(), 0);
    assert!(second.units[0].cached);
    assert!(second.units[0].patched);
}

#[test]
fn lost_artifact_reuses_intermediate_and_patched_translation() {
    let root = source_root(&[("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let config = pipeline(Backend::Direct3D12, &out, &fake).with_patches(patch_set("fill.frag.hlsl", FIX_PATCH));
    let pipeline = Pipeline::new(config).unwrap();

    let first = pipeline.run(&sources(&root)).unwrap();
    let artifact = first.units[0].artifact().unwrap().to_path_buf();
    fs::remove_file(&artifact).unwrap();
    fake.reset();

    let second = pipeline.run(&sources(&root)).unwrap();
    assert!(second.complete());
    assert!(second.units[0].patched);
    assert_eq!(fake.count(ToolKind::StageCompiler), 0);
    assert_eq!(fake.count(ToolKind::Translator), 0);
    assert_eq!(fake.count(ToolKind::NativeCompiler), 1);
    assert!(artifact.exists());
}

#[test]
fn renamed_source_with_same_content_shares_artifacts() {
    let root = source_root(&[("a.frag", FILL_FRAG), ("b.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();

    let report = Pipeline::new(pipeline(Backend::Vulkan, &out, &fake))
        .unwrap()
        .run(&sources(&root))
        .unwrap();

    assert_eq!(report.units[0].artifact(), report.units[1].artifact());
    assert!(!report.units[0].cached);
    assert!(report.units[1].cached);
    assert_eq!(fake.count(ToolKind::StageCompiler), 1);
}

// ============================================================================
// Target Invalidation
// ============================================================================

#[test]
fn changed_defines_recompile_every_unit() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();

    let first = Pipeline::new(pipeline(Backend::Vulkan, &out, &fake))
        .unwrap()
        .run(&sources(&root))
        .unwrap();
    fake.reset();

    let target = Backend::Vulkan.target().with_define("USE_FAST_PATH", "1");
    let config = pipeline(Backend::Vulkan, &out, &fake).with_target(target);
    let second = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    assert!(second.complete());
    assert_eq!(second.cached_count(), 0);
    assert_eq!(fake.count(ToolKind::StageCompiler), 2);
    assert!(
        fake.calls()
            .iter()
            .filter(|call| call.kind == ToolKind::StageCompiler)
            .all(|call| call.args.iter().any(|arg| arg == "-DUSE_FAST_PATH=1"))
    );
    assert_ne!(first.units[0].artifact(), second.units[0].artifact());
    assert_eq!(intermediates(&out.join("vulkan")).len(), 4);
}

#[test]
fn changed_native_compiler_args_rebuild_the_artifact() {
    let root = source_root(&[("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let config = pipeline(Backend::Direct3D12, &out, &fake).with_patches(patch_set("fill.frag.hlsl", FIX_PATCH));
    let first = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();
    fake.reset();

    let tools = ToolchainConfig {
        d3d12: ToolSpec::with_args("dxc", &["-Qstrip_debug"]),
        ..ToolchainConfig::default()
    };
    let config = PipelineConfig::new(Backend::Direct3D12, &out)
        .with_toolchain(fake.toolchain_with(tools))
        .with_patches(patch_set("fill.frag.hlsl", FIX_PATCH));
    let second = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    assert!(second.complete());
    assert!(!second.units[0].cached);
    assert!(second.units[0].patched);
    // The intermediate does not depend on the native compiler.
    assert_eq!(fake.count(ToolKind::StageCompiler), 0);
    assert_eq!(fake.count(ToolKind::NativeCompiler), 1);
    assert!(fake.calls().iter().any(|call| call.args.iter().any(|arg| arg == "-Qstrip_debug")));
    assert_ne!(first.units[0].artifact(), second.units[0].artifact());
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn independent_runs_produce_identical_bytes() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let snapshot = |out: &Path| -> Vec<(String, Vec<u8>)> {
        let dir = out.join("d3d12");
        files_ending(&dir, "")
            .into_iter()
            .map(|name| {
                let bytes = fs::read(dir.join(&name)).unwrap();
                (name, bytes)
            })
            .collect()
    };

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let out = scratch("out");
        let fake = FakeToolchain::new();
        let config = pipeline(Backend::Direct3D12, &out, &fake)
            .with_patches(patch_set("fill.frag.hlsl", FIX_PATCH))
            .with_jobs(2);
        Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();
        snapshots.push(snapshot(&out));
    }

    assert!(!snapshots[0].is_empty());
    assert_eq!(snapshots[0], snapshots[1]);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[test]
fn stage_failure_stops_the_unit_before_any_later_step() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    fake.fail_when(ToolKind::StageCompiler, "fill.frag");
    let config = pipeline(Backend::Direct3D12, &out, &fake).with_patches(patch_set("fill.frag.hlsl", FIX_PATCH));

    let report = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    assert!(!report.success());
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    match &failed[0].outcome {
        UnitOutcome::Failed { step, error } => {
            assert_eq!(*step, Step::Compile);
            assert!(matches!(error, PipelineError::Compile { stage: StageKind::Fragment, .. }));
            assert!(error.to_string().contains("rejected by fake stage compiler"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The vertex unit is independent and completes.
    assert_eq!(fake.count(ToolKind::Translator), 1);
    assert_eq!(fake.count(ToolKind::NativeCompiler), 1);
    let dir = out.join("d3d12");
    assert!(files_ending(&dir, ".frag.hlsl").is_empty());
    assert!(files_ending(&dir, ".frag.dxil").is_empty());
    assert!(files_ending(&dir, ".frag.spv").is_empty());
}

#[test]
fn translate_failure_skips_patch_native_and_map() {
    let root = source_root(&[("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    fake.fail_when(ToolKind::Translator, ".frag.spv");

    let report = Pipeline::new(pipeline(Backend::Metal, &out, &fake))
        .unwrap()
        .run(&sources(&root))
        .unwrap();

    assert!(matches!(
        report.units[0].outcome,
        UnitOutcome::Failed { step: Step::Translate, error: PipelineError::Translate { .. } }
    ));
    assert_eq!(fake.count(ToolKind::NativeCompiler), 0);
    assert!(files_ending(&out.join("metal"), ".map").is_empty());
}

#[test]
fn stale_patch_fails_the_unit_without_an_artifact() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let config =
        pipeline(Backend::Direct3D12, &out, &fake).with_patches(patch_set("fill.frag.hlsl", STALE_PATCH));

    let report = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    let frag = report.units.iter().find(|unit| unit.source.name == "fill.frag").unwrap();
    assert!(matches!(
        frag.outcome,
        UnitOutcome::Failed { step: Step::Patch, error: PipelineError::Patch { .. } }
    ));
    let dir = out.join("d3d12");
    assert!(files_ending(&dir, ".frag.dxil").is_empty());
    assert_eq!(files_ending(&dir, ".vert.dxil").len(), 1);
    assert_eq!(fake.count(ToolKind::NativeCompiler), 1);
}

#[test]
fn strict_mode_cancels_units_after_a_failure() {
    let root = source_root(&[("a_broken.frag", FILL_FRAG), ("b.vert", QUAD_VERT), ("c.frag", "// c\n")]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    fake.fail_when(ToolKind::StageCompiler, "a_broken");
    let config = pipeline(Backend::Vulkan, &out, &fake)
        .with_mode(RunMode::Strict)
        .with_jobs(1);

    let report = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    assert!(matches!(report.units[0].outcome, UnitOutcome::Failed { .. }));
    assert!(matches!(report.units[1].outcome, UnitOutcome::Cancelled));
    assert!(matches!(report.units[2].outcome, UnitOutcome::Cancelled));
    assert_eq!(fake.total(), 1);
}

#[test]
fn missing_binding_leaves_an_incomplete_unit() {
    let root = source_root(&[("loose.frag", "#version 450\nuniform texture2D tex;\nvoid main() {}\n")]);
    let out = scratch("out");
    let fake = FakeToolchain::new();

    let report = Pipeline::new(pipeline(Backend::Vulkan, &out, &fake))
        .unwrap()
        .run(&sources(&root))
        .unwrap();

    assert!(report.success());
    assert!(!report.complete());
    let unit = report.incomplete().next().unwrap();
    let UnitOutcome::Incomplete { artifact, error } = &unit.outcome else {
        panic!("expected an incomplete unit");
    };
    assert!(artifact.exists());
    assert!(error.is_soft());

    let manifest = Manifest::load(&out.join("vulkan")).unwrap();
    assert_eq!(manifest.get("loose.frag").unwrap().map, None);
}

#[test]
fn failed_rerun_removes_the_stale_manifest_entry() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let pipeline = Pipeline::new(pipeline(Backend::Vulkan, &out, &fake)).unwrap();
    let dir = out.join("vulkan");

    pipeline.run(&sources(&root)).unwrap();
    assert!(Manifest::load(&dir).unwrap().get("quad.vert").is_some());

    fs::write(root.join("quad.vert"), QUAD_VERT.replace("0.0, 1.0", "0.5, 1.0")).unwrap();
    fake.fail_when(ToolKind::StageCompiler, "quad.vert");
    let report = pipeline.run(&sources(&root)).unwrap();

    assert!(!report.success());
    let manifest = Manifest::load(&dir).unwrap();
    assert_eq!(manifest.get("quad.vert"), None);
    assert!(manifest.lookup(&dir, "fill.frag").unwrap().0.exists());
}

#[test]
fn invalid_config_is_rejected_before_touching_disk() {
    let fake = FakeToolchain::new();
    let err = Pipeline::new(pipeline(Backend::Vulkan, Path::new(""), &fake)).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert_eq!(fake.total(), 0);
}

#[test]
fn missing_root_is_a_discovery_error() {
    let missing = scratch("src").join("does-not-exist");
    let err = locate_sources(&[missing], &StageKind::ALL).unwrap_err();
    assert!(matches!(err, PipelineError::Discovery { .. }));
}

// ============================================================================
// Backends & Patching Policy
// ============================================================================

#[test]
fn metal_translations_are_patched_too() {
    let root = source_root(&[("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let config = pipeline(Backend::Metal, &out, &fake).with_patches(patch_set("fill.frag.metal", FIX_PATCH));

    let report = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    assert!(report.units[0].patched);
    let dir = out.join("metal");
    let metal = &files_ending(&dir, ".frag.metal")[0];
    assert!(fs::read_to_string(dir.join(metal)).unwrap().contains("float4(0, 1, 0, 1)"));
    assert_eq!(files_ending(&dir, ".metallib").len(), 1);
}

#[test]
fn disabled_patching_translates_without_patches() {
    let root = source_root(&[("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();
    let config = pipeline(Backend::Direct3D12, &out, &fake)
        .with_target(Backend::Direct3D12.target().with_patching(false))
        .with_patches(patch_set("fill.frag.hlsl", FIX_PATCH));

    let report = Pipeline::new(config).unwrap().run(&sources(&root)).unwrap();

    assert!(report.complete());
    assert!(!report.units[0].patched);
    assert_eq!(fake.count(ToolKind::Translator), 1);
}

#[test]
fn backends_share_an_output_root_without_collisions() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();

    for backend in Backend::ALL {
        let report = Pipeline::new(pipeline(backend, &out, &fake))
            .unwrap()
            .run(&sources(&root))
            .unwrap();
        assert!(report.complete(), "{backend} did not complete");
    }

    for backend in Backend::ALL {
        let dir = out.join(backend.dir_name());
        assert_eq!(files_ending(&dir, ".map").len(), 2, "{backend}");
    }
}

// ============================================================================
// Consumer Interface
// ============================================================================

#[test]
fn manifest_resolves_names_to_artifacts_and_bindings() {
    let root = source_root(&[("quad.vert", QUAD_VERT), ("post/fill.frag", FILL_FRAG)]);
    let out = scratch("out");
    let fake = FakeToolchain::new();

    Pipeline::new(pipeline(Backend::Direct3D12, &out, &fake))
        .unwrap()
        .run(&sources(&root))
        .unwrap();

    let dir = out.join("d3d12");
    let manifest = Manifest::load(&dir).unwrap();
    let (artifact, map) = manifest.lookup(&dir, "post/fill.frag").unwrap();
    assert!(artifact.exists());
    assert_eq!(map, Some(ngfx_shaders::fingerprint::map_path_for(&artifact)));

    let map = ShaderMap::load_for_artifact(&artifact).unwrap();
    assert!(matches!(map.resolve("tex"), Some(Slot::Register { index: 0, space: 1, .. })));

    let vert = ShaderMap::load_for_artifact(&manifest.lookup(&dir, "quad.vert").unwrap().0).unwrap();
    assert_eq!(vert.attribute("uv").unwrap().format, "FORMAT_R32G32_SFLOAT");
    assert_eq!(vert.uniform("transform.mvp").unwrap().size, 64);
}
