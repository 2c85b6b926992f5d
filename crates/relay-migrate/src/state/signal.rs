//! Run outcome and the signal file that gates downstream processes.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Accumulated success of a run: true only if every target was migrated or
/// already up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    success: bool,
}

impl RunOutcome {
    /// Outcome of a run that has not seen any target yet.
    pub fn new() -> Self {
        Self { success: true }
    }

    /// Outcome of a run that failed before completing.
    pub fn failed() -> Self {
        Self { success: false }
    }

    /// Fold one target's result into the outcome.
    pub fn absorb(&mut self, target_ok: bool) {
        self.success &= target_ok;
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Literal token written to the signal file.
    pub fn as_token(&self) -> &'static str {
        if self.success {
            "true"
        } else {
            "false"
        }
    }
}

impl Default for RunOutcome {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain-text file holding exactly `true` or `false`.
#[derive(Debug, Clone)]
pub struct RunSignal {
    path: PathBuf,
}

impl RunSignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the signal with the outcome's token.
    pub fn write(&self, outcome: RunOutcome) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, outcome.as_token())?;
        Ok(())
    }

    /// Whether downstream work may proceed.
    ///
    /// A missing file, or any content other than `true` (ignoring case and
    /// surrounding whitespace), means no.
    pub fn is_go(&self) -> Result<bool> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().eq_ignore_ascii_case("true")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
