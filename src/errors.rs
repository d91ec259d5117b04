//! Error Types
//!
//! This module defines the error types used throughout the shader pipeline.
//!
//! # Overview
//!
//! The main error type [`PipelineError`] covers every failure mode of a run:
//! - Source discovery failures (missing or unreadable roots)
//! - External tool failures (stage compiler, translator, native compiler)
//! - Patch application failures
//! - Shader map generation failures (soft, see [`PipelineError::is_soft`])
//! - Configuration errors detected at the boundary
//!
//! Every failure that comes from an external tool carries the tool's captured
//! diagnostic text.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, PipelineError>`.

use std::path::PathBuf;

use thiserror::Error;

use crate::source::StageKind;

/// The main error type for the shader pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    // ========================================================================
    // Discovery & Configuration
    // ========================================================================
    /// A source root is missing, not a directory, or unreadable.
    #[error("Cannot read shader root {root}: {reason}")]
    Discovery {
        /// The offending root directory
        root: PathBuf,
        /// Why the root could not be walked
        reason: String,
    },

    /// Missing or invalid configuration (environment or CLI).
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // External Tool Errors
    // ========================================================================
    /// The stage compiler or a native compiler rejected a shader.
    #[error("Failed to compile {stage} shader {source_path}:\n{diagnostics}")]
    Compile {
        /// Stage of the shader being compiled
        stage: StageKind,
        /// Input handed to the compiler
        source_path: PathBuf,
        /// Captured compiler output
        diagnostics: String,
    },

    /// The cross-compiler rejected an intermediate binary.
    #[error("Failed to translate {input_path}:\n{diagnostics}")]
    Translate {
        /// Intermediate binary handed to the translator
        input_path: PathBuf,
        /// Captured translator output
        diagnostics: String,
    },

    /// A tool could not be spawned, or exceeded its timeout.
    #[error("Failed to run {program}: {reason}")]
    Tool {
        /// Program that was invoked
        program: String,
        /// Spawn error or timeout description
        reason: String,
    },

    // ========================================================================
    // Patch & Map Errors
    // ========================================================================
    /// A patch is malformed or does not match the translated source.
    #[error("Failed to patch {file}: {reason}")]
    Patch {
        /// Translated file the patch targets
        file: PathBuf,
        /// Parse error or hunk mismatch description
        reason: String,
    },

    /// Resource-binding metadata could not be generated.
    #[error("Failed to generate shader map for {artifact}: {reason}")]
    Map {
        /// Artifact whose map is missing
        artifact: PathBuf,
        /// Reflection failure description
        reason: String,
    },

    // ========================================================================
    // I/O & Format Errors
    // ========================================================================
    /// File I/O error with the path involved.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Wraps an I/O error with the path that produced it.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Soft failures leave a usable artifact behind.
    ///
    /// Only map generation failures are soft: the compiled artifact exists,
    /// but runtime binding by name will fail without its map.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Map { .. })
    }
}

/// Alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;
