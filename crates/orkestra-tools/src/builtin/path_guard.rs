// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared path containment check used by every file and git tool: every
//! path argument must normalize to a descendant of the working directory.

use std::path::{Path, PathBuf};

/// Resolves `path` (absolute or relative) against `working_dir` and rejects
/// it unless the realpath stays beneath `working_dir`. The candidate need
/// not exist yet (write targets commonly don't); any existing prefix is
/// canonicalized and the remaining components are appended untouched.
pub fn validate_path(working_dir: &Path, path: &str) -> Result<PathBuf, String> {
    let candidate = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        working_dir.join(path)
    };

    let real_working = working_dir
        .canonicalize()
        .map_err(|e| format!("path-error: working directory does not exist: {e}"))?;

    let mut existing = candidate.clone();
    let mut tail = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_owned());
                existing = existing.parent().map(Path::to_path_buf).unwrap_or_default();
            }
            None => break,
        }
    }
    let real_existing = if existing.as_os_str().is_empty() {
        real_working.clone()
    } else {
        existing.canonicalize().map_err(|e| format!("path-error: {e}"))?
    };

    let mut resolved = real_existing;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }

    if !resolved.starts_with(&real_working) {
        return Err(format!(
            "path-error: '{path}' resolves outside the working directory"
        ));
    }
    Ok(resolved)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
