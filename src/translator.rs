//! Cross-Compiler
//!
//! Translates intermediate SPIR-V into backend-native source text (MSL or
//! HLSL). Outputs correspond 1:1, in order, to inputs; the first failing
//! input aborts the batch so a partially translated set never reaches the
//! native compiler.

use std::path::{Path, PathBuf};

use crate::backend::Dialect;
use crate::config::Toolchain;
use crate::errors::{PipelineError, Result};
use crate::fingerprint::{Fingerprint, cache_path};
use crate::source::StageKind;
use crate::tool::{ToolInvocation, ToolKind, execute};

/// One intermediate to translate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateInput {
    pub intermediate: PathBuf,
    pub stage: StageKind,
    /// Key the translated file is named after.
    pub key: Fingerprint,
}

pub struct Translator<'a> {
    tools: &'a Toolchain,
}

impl<'a> Translator<'a> {
    #[must_use]
    pub fn new(tools: &'a Toolchain) -> Self {
        Self { tools }
    }

    /// Translates every input into `output_dir`; `<key>.<stage>.<dialect ext>`.
    pub fn translate(
        &self,
        inputs: &[TranslateInput],
        output_dir: &Path,
        target: Dialect,
    ) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let ext = format!("{}.{}", input.stage.extension(), target.extension());
            let output = cache_path(output_dir, input.key, &ext);
            self.translate_to(&input.intermediate, &output, target)?;
            outputs.push(output);
        }
        Ok(outputs)
    }

    pub fn translate_to(&self, intermediate: &Path, output: &Path, target: Dialect) -> Result<()> {
        let base = ToolInvocation::new(
            ToolKind::Translator,
            &self.tools.config.translator,
            intermediate,
            output,
        )
        .path_arg(intermediate);

        let invocation = match target {
            Dialect::Msl => base.args(["--msl", "--msl-version", "20000"]),
            Dialect::Hlsl => base.args(["--hlsl", "--shader-model", "60"]),
            Dialect::Glsl | Dialect::Spirv => {
                return Err(PipelineError::Config(format!(
                    "cannot translate into {target:?}"
                )));
            }
        }
        .arg("--output")
        .path_arg(output);

        execute(self.tools.runner.as_ref(), &invocation)?.map_err(|diagnostics| {
            PipelineError::Translate {
                input_path: intermediate.to_path_buf(),
                diagnostics,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolchainConfig;
    use crate::tool::{ExternalTool, ToolOutput};
    use parking_lot::Mutex;
    use std::fs;
    use std::sync::Arc;

    /// Fails on inputs whose file name contains "broken".
    #[derive(Default)]
    struct Spirvcross {
        seen: Mutex<Vec<PathBuf>>,
    }

    impl ExternalTool for Spirvcross {
        fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
            self.seen.lock().push(invocation.input.clone());
            if invocation.input.to_string_lossy().contains("broken") {
                return Ok(ToolOutput {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: "Invalid SPIR-V magic number.".to_string(),
                });
            }
            fs::write(&invocation.output, b"// translated").unwrap();
            Ok(ToolOutput {
                status: Some(0),
                ..Default::default()
            })
        }
    }

    fn scratch() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ngfx-translate-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn input(dir: &Path, name: &str, stage: StageKind) -> TranslateInput {
        let intermediate = dir.join(name);
        fs::write(&intermediate, b"\x03\x02\x23\x07").unwrap();
        TranslateInput {
            intermediate,
            stage,
            key: Fingerprint::of(name.as_bytes()),
        }
    }

    #[test]
    fn outputs_follow_input_order() {
        let dir = scratch();
        let inputs = [
            input(&dir, "b.frag.spv", StageKind::Fragment),
            input(&dir, "a.vert.spv", StageKind::Vertex),
        ];
        let tool = Arc::new(Spirvcross::default());
        let tools = Toolchain::with_runner(ToolchainConfig::default(), tool.clone());

        let outputs = Translator::new(&tools).translate(&inputs, &dir, Dialect::Hlsl).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], dir.join(format!("{}.frag.hlsl", inputs[0].key)));
        assert_eq!(outputs[1], dir.join(format!("{}.vert.hlsl", inputs[1].key)));
    }

    #[test]
    fn first_failure_aborts_batch() {
        let dir = scratch();
        let inputs = [
            input(&dir, "broken.vert.spv", StageKind::Vertex),
            input(&dir, "fine.frag.spv", StageKind::Fragment),
        ];
        let tool = Arc::new(Spirvcross::default());
        let tools = Toolchain::with_runner(ToolchainConfig::default(), tool.clone());

        let err = Translator::new(&tools).translate(&inputs, &dir, Dialect::Msl).unwrap_err();
        match err {
            PipelineError::Translate { input_path, diagnostics } => {
                assert_eq!(input_path, inputs[0].intermediate);
                assert!(diagnostics.contains("magic number"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tool.seen.lock().len(), 1);
    }
}
