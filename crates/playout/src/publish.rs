//! Materializes VOD segments into the output tree.
//!
//! One `publish` capability over a closed strategy set. Creation is
//! idempotent under retry: a destination left behind by an earlier run of
//! the same sequence number is removed and recreated.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::trace;

use crate::config::SegmentStrategy;
use crate::error::PlayoutError;

impl SegmentStrategy {
    /// Publishes `source` at `dest` according to the strategy.
    pub fn publish(&self, source: &Path, dest: &Path) -> Result<(), PlayoutError> {
        trace!(source = %source.display(), dest = %dest.display(), "publishing segment");
        match self {
            SegmentStrategy::AbsoluteSymlink => {
                let target =
                    std::path::absolute(source).map_err(|e| PlayoutError::io(dest, e))?;
                create_link(&target, dest, false)
            }
            SegmentStrategy::RelativeSymlink => {
                let dest_dir = dest.parent().unwrap_or_else(|| Path::new("."));
                let from =
                    std::path::absolute(dest_dir).map_err(|e| PlayoutError::io(dest, e))?;
                let to = std::path::absolute(source).map_err(|e| PlayoutError::io(dest, e))?;
                create_link(&relative_path(&from, &to), dest, false)
            }
            SegmentStrategy::Hardlink => create_link(source, dest, true),
            SegmentStrategy::Copy => std::fs::copy(source, dest)
                .map(|_| ())
                .map_err(|e| PlayoutError::io(dest, e)),
        }
    }
}

/// Creates a link, absorbing exactly one already-exists race by removing
/// the stale destination and recreating.
fn create_link(target: &Path, dest: &Path, hardlink: bool) -> Result<(), PlayoutError> {
    match link(target, dest, hardlink) {
        Err(source) if source.kind() == io::ErrorKind::AlreadyExists => {
            remove_existing(dest)?;
            link(target, dest, hardlink).map_err(|source| PlayoutError::io(dest, source))
        }
        other => other.map_err(|source| PlayoutError::io(dest, source)),
    }
}

fn link(target: &Path, dest: &Path, hardlink: bool) -> io::Result<()> {
    if hardlink {
        std::fs::hard_link(target, dest)
    } else {
        symlink(target, dest)
    }
}

#[cfg(unix)]
fn symlink(target: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(windows)]
fn symlink(target: &Path, dest: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, dest)
}

fn remove_existing(dest: &Path) -> Result<(), PlayoutError> {
    match std::fs::remove_file(dest) {
        Err(source) if source.kind() != io::ErrorKind::NotFound => {
            Err(PlayoutError::io(dest, source))
        }
        _ => Ok(()),
    }
}

/// Path of `to` relative to the directory `from`. Both must be absolute.
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component);
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}
