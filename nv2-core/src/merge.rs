//! Merging directories of event archives.
//!
//! Archives are concatenated in lexicographic filename order, so window
//! archives named by zero-padded index merge back in segmentation order. The
//! whole combined stream is materialized in memory before it is written.

use crate::archive::{self, ArchiveError, ARCHIVE_EXT};
use crate::types::EventStream;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while merging archives.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no event archives found in {0:?}")]
    NoArchives(PathBuf),

    #[error("archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },
}

/// Lists the event archives of a directory in lexicographic filename order.
pub fn list_archives(dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ARCHIVE_EXT) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn merge_paths(paths: &[PathBuf], sort: bool) -> Result<EventStream, MergeError> {
    let mut merged = EventStream::new();
    for path in paths {
        let stream = archive::read_archive(path).map_err(|source| MergeError::Archive {
            path: path.clone(),
            source,
        })?;
        merged.concat(&stream);
    }
    if sort {
        merged.sort_by_time();
    }
    Ok(merged)
}

/// Loads and concatenates every archive of a directory into one stream.
///
/// With `sort` set, one stable permutation makes `t` non-decreasing and is
/// applied identically to all four columns; events with equal timestamps
/// keep their concatenation order.
pub fn merge_directory(dir: &Path, sort: bool) -> Result<EventStream, MergeError> {
    let paths = list_archives(dir)?;
    if paths.is_empty() {
        return Err(MergeError::NoArchives(dir.to_path_buf()));
    }
    merge_paths(&paths, sort)
}

/// Merges a directory of archives and writes the result as one archive.
///
/// When `out_path` lies inside the input directory it is excluded from the
/// scan, so re-running a merge never folds a previous output into itself.
/// Returns the number of merged events.
pub fn merge_to_archive(dir: &Path, out_path: &Path, sort: bool) -> Result<usize, MergeError> {
    let mut paths = list_archives(dir)?;
    paths.retain(|path| path != out_path);
    if paths.is_empty() {
        return Err(MergeError::NoArchives(dir.to_path_buf()));
    }

    let merged = merge_paths(&paths, sort)?;
    log::info!(
        "merged {} events from {} archives in {:?}",
        merged.len(),
        paths.len(),
        dir
    );

    archive::write_archive(out_path, &merged).map_err(|source| MergeError::Archive {
        path: out_path.to_path_buf(),
        source,
    })?;
    Ok(merged.len())
}
