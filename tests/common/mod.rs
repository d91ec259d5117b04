//! Shared fixtures for the pipeline integration tests.
//!
//! `FakeToolchain` stands in for glslc, spirv-cross, spirv-opt, metal and
//! dxc: it records every invocation and writes output derived only from the
//! input's content, so two runs over equal sources produce equal bytes.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use ngfx_shaders::{
    ExternalTool, Fingerprint, Result, Toolchain, ToolchainConfig, ToolInvocation, ToolKind, ToolOutput,
};

pub const QUAD_VERT: &str = "\
#version 450
layout(location = 0) in vec2 position;
layout(location = 1) in vec2 uv;
layout(location = 0) out vec2 v_uv;
layout(std140, set = 0, binding = 0) uniform Transform { mat4 mvp; } transform;
void main() {
    v_uv = uv;
    gl_Position = transform.mvp * vec4(position, 0.0, 1.0);
}
";

pub const FILL_FRAG: &str = "\
#version 450
layout(location = 0) in vec2 v_uv;
layout(set = 1, binding = 0) uniform texture2D tex;
layout(set = 1, binding = 1) uniform sampler samp;
layout(location = 0) out vec4 color;
void main() {
    color = texture(sampler2D(tex, samp), v_uv);
}
";

pub const BLUR_COMP: &str = "\
#version 450
layout(local_size_x = 64) in;
layout(std430, binding = 0) buffer Samples { vec4 values[]; } samples;
layout(binding = 1, rgba8) uniform image2D target;
void main() {}
";

/// Fixes the colour returned by every translated fragment.
pub const FIX_PATCH: &str = "\
--- a/fill.frag.hlsl
+++ b/fill.frag.hlsl
@@ -2,4 +2,4 @@
 float4 main() : SV_Target
 {
-    return float4(1, 0, 0, 1);
+    return float4(0, 1, 0, 1);
 }
";

/// Context that never matches translator output.
pub const STALE_PATCH: &str = "\
@@ -2,3 +2,3 @@
 float4 main() : SV_Target
 {
-    return float4(9, 9, 9, 9);
+    return 0;
";

/// What the fake translator writes for an intermediate with `content`.
pub fn translated_text(content: &[u8]) -> String {
    format!(
        "// {}\nfloat4 main() : SV_Target\n{{\n    return float4(1, 0, 0, 1);\n}}\n",
        Fingerprint::of(content)
    )
}

#[derive(Default)]
pub struct FakeToolchain {
    calls: Mutex<Vec<ToolInvocation>>,
    failures: Mutex<Vec<(ToolKind, String)>>,
}

impl FakeToolchain {
    pub fn new() -> Arc<Self> {
        init_logging();
        Arc::new(Self::default())
    }

    pub fn toolchain(self: &Arc<Self>) -> Toolchain {
        self.toolchain_with(ToolchainConfig::default())
    }

    /// Same fake runner behind non-default tool specs.
    pub fn toolchain_with(self: &Arc<Self>, config: ToolchainConfig) -> Toolchain {
        Toolchain::with_runner(config, self.clone())
    }

    /// Makes every `kind` invocation whose input path contains `needle` fail.
    pub fn fail_when(&self, kind: ToolKind, needle: &str) {
        self.failures.lock().push((kind, needle.to_string()));
    }

    pub fn count(&self, kind: ToolKind) -> usize {
        self.calls.lock().iter().filter(|call| call.kind == kind).count()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

impl ExternalTool for FakeToolchain {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.calls.lock().push(invocation.clone());

        let input = invocation.input.to_string_lossy();
        let failing = self
            .failures
            .lock()
            .iter()
            .any(|(kind, needle)| *kind == invocation.kind && input.contains(needle.as_str()));
        if failing {
            return Ok(ToolOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: format!("{input}:1: error: rejected by fake {}", invocation.kind),
            });
        }

        let content = fs::read(&invocation.input).unwrap_or_default();
        let output = match invocation.kind {
            ToolKind::StageCompiler => format!("SPIRV {}", Fingerprint::of(&content)),
            ToolKind::Translator => translated_text(&content),
            ToolKind::NativeCompiler => format!("NATIVE {}", Fingerprint::of(&content)),
        };
        fs::write(&invocation.output, output).unwrap();
        Ok(ToolOutput {
            status: Some(0),
            ..Default::default()
        })
    }
}

/// Routes pipeline logs through the test harness; `RUST_LOG=debug` shows
/// every tool invocation.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn scratch(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ngfx-{tag}-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes `files` under a fresh source root.
pub fn source_root(files: &[(&str, &str)]) -> PathBuf {
    let root = scratch("src");
    for (name, text) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }
    root
}

/// File names under `dir` ending in `suffix`, sorted.
pub fn files_ending(dir: &Path, suffix: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(suffix))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Intermediates only: `.spv` but not the Vulkan `.vk.spv` artifact.
pub fn intermediates(dir: &Path) -> Vec<String> {
    files_ending(dir, ".spv")
        .into_iter()
        .filter(|name| !name.ends_with(".vk.spv"))
        .collect()
}
