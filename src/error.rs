//! Error kinds surfaced by the detection pipeline.
//!
//! Functions in this crate return `anyhow::Result`; the conditions callers
//! need to tell apart are raised as an [`EmeraldError`] inside the
//! `anyhow::Error` and can be recovered with `downcast_ref`.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmeraldError {
    /// A required input file does not exist
    #[error("{} file not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The window scorer or a class model misbehaved for one contig
    #[error("contig {contig}: {msg}")]
    Collaborator { contig: String, msg: String },

    #[error("{tool} exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("{tool} did not finish within {secs}s")]
    ToolTimeout { tool: String, secs: u64 },
}

/// Fail with [`EmeraldError::FileNotFound`] unless `path` is an existing file.
pub fn require_file<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(EmeraldError::FileNotFound(path.to_path_buf()).into());
    }
    Ok(())
}
