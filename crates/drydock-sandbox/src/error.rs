// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Typed errors surfaced by the execution substrate.
///
/// Command timeouts are deliberately **not** represented here — a timed-out
/// command is a structured [`crate::ExecOutcome`] with partial output, not a
/// transport failure.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The configured executor image does not exist locally.  Not retried.
    #[error("executor image unavailable: {0}")]
    ImageUnavailable(String),

    /// The container could not be created, started, or reached.
    #[error("container unavailable: {0}")]
    ContainerUnavailable(String),

    /// A file operation referenced a path that does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Path or artifact-name validation failed.
    #[error("path violation: {0}")]
    PathViolation(String),

    /// The requested artifact exceeds the configured per-fetch limit.
    #[error("artifact too large: {size} bytes (limit {limit})")]
    ArtifactTooLarge { size: u64, limit: u64 },

    /// Python module load or function lookup failed inside the container.
    #[error("docstring extraction failed: {0}")]
    DocstringExtractionFailed(String),

    /// Empty or otherwise unusable user id.
    #[error("invalid user id")]
    InvalidUserId,

    /// Raw Docker API error.
    #[error("docker api error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Catch-all for failures that are reported but not elaborated.
    #[error("{0}")]
    Internal(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_limit_for_oversize() {
        let e = SandboxError::ArtifactTooLarge { size: 100, limit: 50 };
        let s = e.to_string();
        assert!(s.contains("100"));
        assert!(s.contains("50"));
    }

    #[test]
    fn display_names_missing_file() {
        let e = SandboxError::FileNotFound("/workspace/a.txt".into());
        assert!(e.to_string().contains("/workspace/a.txt"));
    }
}
