use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PlayoutError;

/// Deferred deletion of segments evicted from the live windows.
///
/// One FIFO shared across all layers, bounded by
/// `live_max_stale_segments x layer_count`. Evicted files linger on disk
/// until the bound is reached so downstream HTTP caches finishing a fetch
/// of a no-longer-listed segment do not see it vanish mid-transfer.
#[derive(Debug)]
pub struct StaleReaper {
    queue: VecDeque<PathBuf>,
    capacity: usize,
}

impl StaleReaper {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    pub fn enqueue(&mut self, path: PathBuf) {
        self.queue.push_back(path);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Deletes oldest entries until the queue is below capacity again.
    pub fn reap(&mut self) -> Result<(), PlayoutError> {
        while self.queue.len() >= self.capacity {
            let Some(path) = self.queue.pop_front() else {
                break;
            };
            unlink(&path)?;
            debug!(path = %path.display(), "reaped stale segment");
        }
        Ok(())
    }
}

/// Removes a file; an already-absent target is success.
fn unlink(path: &Path) -> Result<(), PlayoutError> {
    match std::fs::remove_file(path) {
        Err(source) if source.kind() != io::ErrorKind::NotFound => {
            Err(PlayoutError::io(path, source))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn queue_stays_below_capacity_after_a_reap_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reaper = StaleReaper::new(4);

        for i in 0..10 {
            let path = tmp.path().join(format!("stale_{i}.ts"));
            fs::write(&path, b"x").unwrap();
            reaper.enqueue(path);
            reaper.reap().unwrap();
            assert!(reaper.len() < 4);
        }
    }

    #[test]
    fn reaps_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reaper = StaleReaper::new(2);

        let oldest = tmp.path().join("stale_0.ts");
        let newer = tmp.path().join("stale_1.ts");
        fs::write(&oldest, b"x").unwrap();
        fs::write(&newer, b"x").unwrap();

        reaper.enqueue(oldest.clone());
        reaper.enqueue(newer.clone());
        reaper.reap().unwrap();

        assert!(!oldest.exists());
        assert!(newer.exists());
    }

    #[test]
    fn deleting_an_absent_path_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reaper = StaleReaper::new(1);
        reaper.enqueue(tmp.path().join("never_created.ts"));
        assert!(reaper.reap().is_ok());
        assert!(reaper.is_empty());
    }

    #[test]
    fn below_capacity_nothing_is_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stale_0.ts");
        fs::write(&path, b"x").unwrap();

        let mut reaper = StaleReaper::new(8);
        reaper.enqueue(path.clone());
        reaper.reap().unwrap();

        assert!(path.exists());
        assert_eq!(reaper.len(), 1);
    }
}
