use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// A crash mid-write leaves the previous file intact.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let dir = parent_dir(path).unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create the parent directory of `path` if it has one.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = parent_dir(path) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// A bare file name has an empty parent; treat that as none.
fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tollgate.yaml");
        atomic_write(&path, b"tracer: {}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "tracer: {}");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/tollgate.yaml");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn ensure_parent_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/trust.redb");
        ensure_parent(&path).unwrap();
        ensure_parent(&path).unwrap();
        assert!(dir.path().join("state").is_dir());
        ensure_parent(Path::new("trust.redb")).unwrap();
    }
}
