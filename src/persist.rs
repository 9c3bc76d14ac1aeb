//! Crash-safe file writes.
//!
//! Everything that must survive a restart (run state, deck inventory) goes
//! through [`write_atomic`]: the bytes land in a uniquely named temp file next
//! to the target, are synced, and the temp file is persisted over the target.
//! A crash leaves either the old file or the new one, never a torn mix.
//! Concurrent writers each get their own temp file, so the last rename wins
//! with complete contents.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Writes `contents` to `path` with write-then-rename semantics.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(entries(&dir.path().join("nested")), vec!["state.json"]);
    }

    #[test]
    fn test_concurrent_writers_never_tear_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.state.json");
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 64 * 1024]).collect();

        std::thread::scope(|scope| {
            for payload in &payloads {
                let path = path.clone();
                scope.spawn(move || {
                    for _ in 0..5 {
                        write_atomic(&path, payload).unwrap();
                    }
                });
            }
        });

        let written = fs::read(&path).unwrap();
        assert!(payloads.contains(&written), "file holds a mix of writers");
        assert_eq!(entries(dir.path()), vec!["run.state.json"]);
    }
}
