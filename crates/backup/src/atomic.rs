//! Atomic create-stream primitive (spec §6): write to a temp file beside the
//! target, fsync, then rename on close. Canceling deletes the temp file
//! instead of publishing it.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use hub_core::HubResult;

pub struct AtomicWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    file: File,
}

impl AtomicWriter {
    pub fn create(final_path: &Path) -> HubResult<Self> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = final_path.with_file_name(format!(".{file_name}.tmp"));
        let file = File::create(&temp_path)?;
        Ok(Self {
            temp_path,
            final_path: final_path.to_path_buf(),
            file,
        })
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> HubResult<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }

    /// fsync the temp file and rename it into place.
    pub fn commit(mut self) -> HubResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        fs::rename(&self.temp_path, &self.final_path)?;
        Ok(())
    }

    /// Discard the temp file without publishing it.
    pub fn cancel(self) -> HubResult<()> {
        let _ = fs::remove_file(&self.temp_path);
        Ok(())
    }
}

impl Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_publishes_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.bak");
        let mut w = AtomicWriter::create(&target).unwrap();
        w.write_all(b"hello").unwrap();
        w.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"hello");
    }

    #[test]
    fn cancel_leaves_no_temp_or_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.bak");
        let mut w = AtomicWriter::create(&target).unwrap();
        w.write_all(b"hello").unwrap();
        let temp = dir.path().join(".x.bak.tmp");
        assert!(temp.exists());
        w.cancel().unwrap();
        assert!(!temp.exists());
        assert!(!target.exists());
    }
}
