//! Local snapshot source.
//!
//! Walks the sync directory and produces the flat stat listing the
//! reconciler consumes. Qualifying files are observed through the upload
//! transform so their hashes match what the device holds after a clean
//! sync. Scanning is blocking; the session runs it through
//! `spawn_blocking`.

use crate::error::{Result, SyncError};
use crate::snapshot::{md5_hex, normalize_path, StatEntry};
use crate::transfer::transpile::Transpiler;
use glob::Pattern;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Compile exclusion globs, surfacing the offending pattern on failure.
pub fn compile_globs(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|g| {
            Pattern::new(g).map_err(|source| SyncError::Pattern {
                pattern: g.clone(),
                source,
            })
        })
        .collect()
}

/// Whether `rel_path` or any of its ancestor subpaths matches one of the
/// exclusion globs. Matching ancestors too means an excluded directory
/// hides its entire subtree, on both the local and the remote side.
pub fn matches_any_subpath(rel_path: &str, globs: &[Pattern]) -> bool {
    let mut current = rel_path;
    loop {
        if globs.iter().any(|g| g.matches(current)) {
            return true;
        }
        match current.rsplit_once('/') {
            Some((parent, _)) => current = parent,
            None => return false,
        }
    }
}

/// Scan `root` into a flat stat listing. Excluded paths and their subpaths
/// never appear. Every file is read once; qualifying files are hashed
/// through the transform, everything else as-is.
pub fn scan_local(
    root: &Path,
    exclude: &[Pattern],
    transpiler: Option<&dyn Transpiler>,
) -> Result<Vec<StatEntry>> {
    let mut stats = Vec::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| {
            SyncError::Config(format!("cannot walk '{}': {}", root.display(), e))
        })?;

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| SyncError::Config(format!("path outside sync root: {}", e)))?;
        let rel_path = normalize_path(&rel.to_string_lossy());
        if rel_path.is_empty() || matches_any_subpath(&rel_path, exclude) {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            stats.push(StatEntry::Dir {
                relative_path: rel_path,
            });
        } else if file_type.is_file() {
            let mut data = fs::read(entry.path())?;
            if let Some(t) = transpiler {
                if t.qualifies(&rel_path) {
                    data = t.transform(&rel_path, data)?;
                }
            }
            stats.push(StatEntry::File {
                relative_path: rel_path,
                size: data.len() as u64,
                md5: md5_hex(&data),
            });
        } else {
            // Symlinks and special files have no representation on the device.
            debug!(path = %rel_path, "skipping non-regular file");
        }
    }

    Ok(stats)
}
