use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::require_file;

/// Open a text input, transparently decompressing `.gz`/`.bgz` files.
///
/// Fails with `FileNotFound` before anything is read when the path is absent.
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    require_file(path)?;
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    // Check by file extension (faster than reading magic bytes)
    let is_compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "gz" || ext == "bgz")
        .unwrap_or(false);

    if is_compressed {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Per-file line accounting for lenient parsers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineStats {
    pub parsed: usize,
    pub skipped: usize,
}

impl LineStats {
    /// Emit one warning if anything was skipped
    pub fn report(&self, what: &str, path: &Path) {
        if self.skipped > 0 {
            log::warn!(
                "{what}: skipped {} malformed line(s) in {} ({} parsed)",
                self.skipped,
                path.display(),
                self.parsed
            );
        } else {
            log::debug!("{what}: {} record(s) from {}", self.parsed, path.display());
        }
    }
}
