// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! File I/O inside user containers.
//!
//! Every path is an absolute path **inside** the container; nothing here is
//! ever resolved against the host filesystem.  Content moves over attached
//! exec streams, so writes are bit-exact and reads are a passthrough of the
//! container's bytes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::SandboxError;
use crate::exec::run_exec;
use crate::manager::ContainerManager;

/// Directory that holds user-published artifacts inside each container.
const ARTIFACTS_DIR: &str = "/artifacts";

/// Deadline for internal file operations; generous because artifact
/// transfers can be tens of megabytes.
const FILE_OP_TIMEOUT: Duration = Duration::from_secs(60);

/// Python snippet that extracts the docstring of a named top-level function
/// without importing (and thus executing) the module.  Exit codes:
/// 0 = docstring printed (possibly empty), 3 = function not found,
/// 4 = file unreadable or unparseable.
const DOCSTRING_SNIPPET: &str = r#"
import ast, sys
path, name = sys.argv[1], sys.argv[2]
try:
    with open(path, encoding="utf-8") as fh:
        tree = ast.parse(fh.read())
except Exception as exc:
    sys.stderr.write(str(exc))
    sys.exit(4)
for node in tree.body:
    if isinstance(node, (ast.FunctionDef, ast.AsyncFunctionDef)) and node.name == name:
        sys.stdout.write(ast.get_docstring(node) or "")
        sys.exit(0)
sys.stderr.write("no top-level function named " + name)
sys.exit(3)
"#;

/// File operations on a user's container.
pub struct ContainerFs {
    manager: Arc<ContainerManager>,
}

impl ContainerFs {
    pub fn new(manager: Arc<ContainerManager>) -> Self {
        Self { manager }
    }

    /// Overwrite `path` with `content`, creating parent directories as
    /// needed.  Returns the number of bytes written.
    pub async fn write_file(
        &self,
        user_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<usize, SandboxError> {
        require_absolute(path)?;
        let container_id = self.manager.acquire(user_id).await?;

        debug!(user = %user_id, path, bytes = content.len(), "writing file");

        // The path travels as an argv element ($1), never spliced into the
        // script, so no quoting of user input is involved.
        let raw = run_exec(
            self.manager.docker(),
            &container_id,
            vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                r#"mkdir -p -- "$(dirname -- "$1")" && cat > "$1""#.to_string(),
                "write".to_string(),
                path.to_string(),
            ],
            Some(content.to_vec()),
            FILE_OP_TIMEOUT,
        )
        .await?;

        if raw.exit_code != 0 {
            return Err(SandboxError::Internal(format!(
                "write to {path} failed: {}",
                String::from_utf8_lossy(&raw.stderr).trim()
            )));
        }
        Ok(content.len())
    }

    /// Read a window of `line_count` lines starting at `offset_lines`
    /// (0-indexed) from the text file at `path`.  `None` means to the end of
    /// the file.  The window is clamped to EOF.
    pub async fn read_file(
        &self,
        user_id: &str,
        path: &str,
        offset_lines: usize,
        line_count: Option<usize>,
    ) -> Result<String, SandboxError> {
        require_absolute(path)?;
        let container_id = self.manager.acquire(user_id).await?;

        let raw = run_exec(
            self.manager.docker(),
            &container_id,
            vec!["cat".to_string(), path.to_string()],
            None,
            FILE_OP_TIMEOUT,
        )
        .await?;

        if raw.exit_code != 0 {
            return Err(SandboxError::FileNotFound(path.to_string()));
        }

        let text = String::from_utf8_lossy(&raw.stdout).into_owned();
        Ok(slice_lines(&text, offset_lines, line_count))
    }

    /// Extract the docstring attached to the top-level function
    /// `function_name` in the Python file at `path`.  Returns `""` when the
    /// function exists but carries no docstring.
    pub async fn read_docstring(
        &self,
        user_id: &str,
        path: &str,
        function_name: &str,
    ) -> Result<String, SandboxError> {
        require_absolute(path)?;
        let container_id = self.manager.acquire(user_id).await?;

        let raw = run_exec(
            self.manager.docker(),
            &container_id,
            vec![
                "python3".to_string(),
                "-c".to_string(),
                DOCSTRING_SNIPPET.to_string(),
                path.to_string(),
                function_name.to_string(),
            ],
            None,
            FILE_OP_TIMEOUT,
        )
        .await?;

        match raw.exit_code {
            0 => Ok(String::from_utf8_lossy(&raw.stdout).into_owned()),
            _ => Err(SandboxError::DocstringExtractionFailed(
                String::from_utf8_lossy(&raw.stderr).trim().to_string(),
            )),
        }
    }

    /// Sorted names of regular files directly under `/artifacts`.
    pub async fn list_artifacts(&self, user_id: &str) -> Result<Vec<String>, SandboxError> {
        let container_id = self.manager.acquire(user_id).await?;

        let raw = run_exec(
            self.manager.docker(),
            &container_id,
            vec![
                "find".to_string(),
                ARTIFACTS_DIR.to_string(),
                "-mindepth".to_string(),
                "1".to_string(),
                "-maxdepth".to_string(),
                "1".to_string(),
                "-type".to_string(),
                "f".to_string(),
            ],
            None,
            FILE_OP_TIMEOUT,
        )
        .await?;

        if raw.exit_code != 0 {
            warn!(
                user = %user_id,
                stderr = %String::from_utf8_lossy(&raw.stderr).trim(),
                "artifact listing failed; treating as empty"
            );
            return Ok(Vec::new());
        }

        let mut names: Vec<String> = String::from_utf8_lossy(&raw.stdout)
            .lines()
            .filter_map(|l| l.strip_prefix(&format!("{ARTIFACTS_DIR}/")).map(str::to_string))
            .filter(|n| !n.is_empty() && !n.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Fetch the raw bytes of the artifact `name`.
    ///
    /// The name must be a bare filename (no `/` or `\`, no leading `.`) and
    /// the file must not exceed the configured size limit; the size is
    /// checked before any content is transferred.
    pub async fn get_artifact(&self, user_id: &str, name: &str) -> Result<Vec<u8>, SandboxError> {
        validate_artifact_name(name)?;
        let container_id = self.manager.acquire(user_id).await?;
        let path = format!("{ARTIFACTS_DIR}/{name}");

        // Size first, bytes second — an over-limit artifact is rejected
        // before a single content byte leaves the container.
        let size_raw = run_exec(
            self.manager.docker(),
            &container_id,
            vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                r#"[ -f "$1" ] || exit 2; wc -c < "$1""#.to_string(),
                "size".to_string(),
                path.clone(),
            ],
            None,
            FILE_OP_TIMEOUT,
        )
        .await?;

        if size_raw.exit_code != 0 {
            return Err(SandboxError::FileNotFound(name.to_string()));
        }
        let size: u64 = String::from_utf8_lossy(&size_raw.stdout)
            .trim()
            .parse()
            .map_err(|_| SandboxError::Internal(format!("unparseable size for {name}")))?;

        let limit = self.manager.artifact_size_limit();
        if size > limit {
            return Err(SandboxError::ArtifactTooLarge { size, limit });
        }

        let raw = run_exec(
            self.manager.docker(),
            &container_id,
            vec!["cat".to_string(), path],
            None,
            FILE_OP_TIMEOUT,
        )
        .await?;

        if raw.exit_code != 0 {
            return Err(SandboxError::FileNotFound(name.to_string()));
        }
        Ok(raw.stdout)
    }
}

// ── Pure helpers ──────────────────────────────────────────────────────────────

fn require_absolute(path: &str) -> Result<(), SandboxError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(SandboxError::PathViolation(format!(
            "path must be absolute inside the container: {path}"
        )))
    }
}

/// Reject artifact names that could escape `/artifacts` or address hidden
/// files.
pub fn validate_artifact_name(name: &str) -> Result<(), SandboxError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.starts_with('.')
    {
        return Err(SandboxError::PathViolation(format!(
            "invalid artifact name: {name:?}"
        )));
    }
    Ok(())
}

/// Return lines `[offset, offset + count)` of `text`, clamped to EOF.
/// Lines keep their trailing `\n`; bytes pass through otherwise untouched.
pub fn slice_lines(text: &str, offset: usize, count: Option<usize>) -> String {
    let iter = text.split_inclusive('\n').skip(offset);
    match count {
        Some(n) => iter.take(n).collect(),
        None => iter.collect(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
