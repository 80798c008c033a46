//! File-system access scoped to a metarepo working copy.
//!
//! All paths handed to a [`Workspace`] are relative to the metarepo root.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{StoryError, StoryResult};

/// Minimal file capability used by manifests and the lifecycle.
pub trait Workspace: Send + Sync {
    /// Root of the working copy on disk.
    fn root(&self) -> &Path;

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;

    fn remove(&self, path: &Path) -> std::io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
}

/// [`Workspace`] over the real file system.
#[derive(Debug, Clone)]
pub struct OsWorkspace {
    root: PathBuf,
}

impl OsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Workspace for OsWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        fs::read(self.resolve(path))
    }

    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let target = self.resolve(path);
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => self.root.clone(),
        };
        fs::create_dir_all(&dir)?;

        // Write to a temp file in the same directory, then rename over the target.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        fs::create_dir_all(self.resolve(path))
    }
}

/// Read and parse a JSON manifest.
pub(crate) fn read_json<T: DeserializeOwned>(
    ws: &dyn Workspace,
    path: &Path,
) -> StoryResult<T> {
    let bytes = ws.read(path).map_err(|e| StoryError::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| StoryError::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Serialize `value` as two-space indented JSON with a trailing newline.
fn to_json_bytes<T: Serialize>(value: &T) -> StoryResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub(crate) fn write_json<T: Serialize>(
    ws: &dyn Workspace,
    path: &Path,
    value: &T,
) -> StoryResult<()> {
    ws.write(path, &to_json_bytes(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_workspace() -> (tempfile::TempDir, OsWorkspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = OsWorkspace::new(dir.path());
        (dir, ws)
    }

    #[test]
    fn write_creates_parent_directories() {
        let (dir, ws) = make_workspace();
        ws.write(Path::new("api/package.json"), b"{}").unwrap();
        assert!(dir.path().join("api/package.json").exists());
        assert_eq!(ws.read(Path::new("api/package.json")).unwrap(), b"{}");
    }

    #[test]
    fn rename_moves_file() {
        let (_dir, ws) = make_workspace();
        ws.write(Path::new(".meta"), b"registry").unwrap();
        ws.rename(Path::new(".meta"), Path::new(".meta.json")).unwrap();
        assert!(!ws.exists(Path::new(".meta")));
        assert_eq!(ws.read(Path::new(".meta.json")).unwrap(), b"registry");
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let (_dir, ws) = make_workspace();
        let err = ws.read(Path::new("nope")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
