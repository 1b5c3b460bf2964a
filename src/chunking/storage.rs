//! On-disk layout `<base_dir>/<result_id>/<page>.json` and the file primitives behind it

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::chunking::ChunkError;

pub fn result_dir(base_dir: &Path, result_id: &str) -> PathBuf {
    base_dir.join(result_id)
}

pub fn page_path(result_dir: &Path, page_index: usize) -> PathBuf {
    result_dir.join(format!("{page_index}.json"))
}

/// Writes `bytes` to a `.tmp` sibling and renames it over `dest`.
///
/// Readers see either the previous file or the complete new one. If the rename is
/// rejected the temp file is copied over `dest` instead, which loses atomicity.
pub fn atomic_write(dest: &Path, bytes: &[u8]) -> Result<(), ChunkError> {
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let outcome = fs::write(&tmp, bytes)
        .and_then(|()| replace_with(&tmp, dest))
        .map_err(|source| ChunkError::Storage {
            path: dest.to_path_buf(),
            source,
        });

    if let Err(err) = fs::remove_file(&tmp) {
        if err.kind() != io::ErrorKind::NotFound {
            debug!(path = %tmp.display(), error = %err, "failed to remove temporary chunk file");
        }
    }

    outcome
}

fn replace_with(tmp: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(tmp, dest) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() != io::ErrorKind::NotFound => {
            warn!(
                path = %dest.display(),
                error = %err,
                "atomic rename rejected, falling back to copy"
            );
            fs::copy(tmp, dest).map(|_| ())
        }
        Err(err) => Err(err),
    }
}

/// Removes every file and directory under `dir`, deepest paths first, then `dir` itself.
///
/// Paths that already vanished are skipped; other walk and removal failures are logged
/// and the walk carries on. Returns the number of failures.
pub fn remove_tree(dir: &Path) -> usize {
    let mut failures = 0;

    for entry in WalkDir::new(dir).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if !is_not_found(err.io_error()) {
                    failures += 1;
                    warn!(
                        path = %err.path().unwrap_or(dir).display(),
                        error = %err,
                        "failed to walk chunk directory during cleanup"
                    );
                }
                continue;
            }
        };

        let path = entry.path();
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(err) = removed {
            if !is_not_found(Some(&err)) {
                failures += 1;
                warn!(path = %path.display(), error = %err, "failed to delete path during cleanup");
            }
        }
    }

    failures
}

fn is_not_found(err: Option<&io::Error>) -> bool {
    err.is_some_and(|err| err.kind() == io::ErrorKind::NotFound)
}
