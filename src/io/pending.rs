use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;

/// Write-then-rename wrapper so outputs appear whole or not at all.
///
/// Dropping a `PendingWrite` without calling [`PendingWrite::finalize`]
/// discards the temporary file and leaves any existing target untouched.
pub struct PendingWrite {
    target: PathBuf,
    tmp: NamedTempFile,
}

impl PendingWrite {
    /// Open a temporary sibling of `target`. Refuses to replace an existing file unless `force`.
    pub fn open(target: &Path, force: bool) -> Result<Self> {
        let parent = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
        if !force && target.exists() {
            bail!("Refusing to overwrite existing file: {} (use --force)", target.display());
        }
        let tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("create temp file next to {}", target.display()))?;

        Ok(Self { target: target.to_path_buf(), tmp })
    }

    #[inline] pub fn target(&self) -> &Path { &self.target }

    /// Flush, fsync and atomically move the temporary file onto the target.
    pub fn finalize(mut self) -> Result<()> {
        self.tmp.flush().with_context(|| format!("flush {}", self.target.display()))?;
        self.tmp.as_file().sync_all().ok(); // best-effort fsync file
        self.tmp.persist(&self.target)
            .with_context(|| format!("rename to {}", self.target.display()))?;
        if let Some(dir) = self.target.parent() {
            let _ = File::open(dir).and_then(|f| f.sync_all());
        }
        Ok(())
    }
}

impl Write for PendingWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.tmp.write(buf) }

    fn flush(&mut self) -> io::Result<()> { self.tmp.flush() }
}

/// Atomically replace `target` with `bytes`.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut sink = PendingWrite::open(target, true)?;
    sink.write_all(bytes).with_context(|| format!("write {}", target.display()))?;
    sink.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_moves_content_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out.csv");
        let mut sink = PendingWrite::open(&target, false).unwrap();
        sink.write_all(b"a,b\n1,2\n").unwrap();
        assert!(!target.exists());
        sink.finalize().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "a,b\n1,2\n");
    }

    #[test]
    fn dropped_write_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old").unwrap();
        {
            let mut sink = PendingWrite::open(&target, true).unwrap();
            sink.write_all(b"partial").unwrap();
        }
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn existing_target_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old").unwrap();
        assert!(PendingWrite::open(&target, false).is_err());
        write_atomic(&target, b"new").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }
}
