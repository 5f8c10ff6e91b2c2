//! Error types for breakpoint extraction.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while extracting breakpoints from a build.
#[derive(Error, Debug)]
pub enum SymbolError {
    /// The build metadata file could not be read.
    #[error("failed to read build metadata {path}: {source}")]
    MetadataUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build metadata does not name a toolchain directory.
    #[error("toolchain path not found in {0}")]
    ToolchainNotFound(PathBuf),

    /// The disassembler could not be started or exited with a failure.
    #[error("failed to run {program}: {reason}")]
    DisassembleFailed { program: PathBuf, reason: String },
}

impl SymbolError {
    pub(crate) fn metadata(path: &Path, source: std::io::Error) -> Self {
        Self::MetadataUnreadable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn disassemble(program: &Path, reason: impl Into<String>) -> Self {
        Self::DisassembleFailed {
            program: program.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SymbolError>;
