use std::fs;
use std::path::{Path, PathBuf};

use hub_core::{DataSample, DataType, HubError, HubResult};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::atomic::AtomicWriter;
use crate::format;

/// Build the on-disk path for an observation given its path segments
/// *under* `/obs/` (i.e. without the leading `obs` component) — spec §4.5
/// "File layout": `<backup-root>/<path-under-/obs/>.bak`.
pub fn path_for(backup_root: &Path, obs_relative_segments: &[String]) -> PathBuf {
    let mut path = backup_root.to_path_buf();
    for segment in obs_relative_segments {
        path.push(segment);
    }
    path.set_extension("bak");
    path
}

/// Write (or overwrite) an observation's backup file atomically.
pub fn write_backup(
    backup_root: &Path,
    obs_relative_segments: &[String],
    data_type: DataType,
    samples: &[DataSample],
) -> HubResult<()> {
    let path = path_for(backup_root, obs_relative_segments);
    let mut writer = AtomicWriter::create(&path)?;
    match format::encode(&mut writer, data_type, samples) {
        Ok(()) => writer.commit(),
        Err(e) => {
            writer.cancel()?;
            Err(e)
        }
    }
}

/// Read and parse an observation's backup file, if it exists.
///
/// `Ok(None)` means no backup file exists. `Err` means a file exists but
/// failed to parse — per spec §4.5 "Restore", the caller discards the
/// buffer and continues empty rather than propagating the error upward.
pub fn read_backup(
    backup_root: &Path,
    obs_relative_segments: &[String],
) -> HubResult<Option<(DataType, Vec<DataSample>)>> {
    let path = path_for(backup_root, obs_relative_segments);
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HubError::Io(e)),
    };
    format::decode(&mut &bytes[..]).map(Some)
}

/// Delete an observation's backup file, if present. Used when
/// `backupPeriod` is set to 0, `maxCount` is set to 0, or the observation
/// itself is deleted.
pub fn delete_backup(backup_root: &Path, obs_relative_segments: &[String]) -> HubResult<()> {
    let path = path_for(backup_root, obs_relative_segments);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HubError::Io(e)),
    }
}

/// Walk `backup_root` depth-first and remove any `.bak` file whose derived
/// observation path is rejected by `is_active` (spec §4.5 "Orphan sweep").
/// `is_active` receives the same path-under-`/obs/` segments that
/// [`path_for`] consumes, and should return `false` for observations that
/// no longer exist or that have `backupPeriod == 0`. Empty directories left
/// behind are removed afterward.
pub fn delete_unused_backup_files(
    backup_root: &Path,
    is_active: impl Fn(&[String]) -> bool,
) -> HubResult<usize> {
    if !backup_root.exists() {
        return Ok(0);
    }

    let mut removed = 0usize;
    for entry in WalkDir::new(backup_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("bak") {
            continue;
        }
        let relative = path
            .strip_prefix(backup_root)
            .unwrap_or(path)
            .with_extension("");
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        if !is_active(&segments) {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove orphaned backup file");
            } else {
                removed += 1;
                info!(path = %path.display(), "removed orphaned backup file");
            }
        }
    }

    remove_empty_dirs(backup_root);
    Ok(removed)
}

fn remove_empty_dirs(root: &Path) {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .collect();
    // Deepest first, so a parent becomes empty only after its children are
    // already removed.
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for dir in dirs {
        if dir == root {
            continue;
        }
        let _ = fs::remove_dir(&dir); // no-op (fails silently) if non-empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_for_nested_observation() {
        let root = Path::new("/backup");
        let path = path_for(root, &["group".to_string(), "hot".to_string()]);
        assert_eq!(path, Path::new("/backup/group/hot.bak"));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![DataSample::string(1.0, "a"), DataSample::string(2.0, "b")];
        write_backup(dir.path(), &["log".to_string()], DataType::String, &samples).unwrap();

        let (data_type, restored) = read_backup(dir.path(), &["log".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(data_type, DataType::String);
        assert_eq!(restored, samples);
    }

    #[test]
    fn read_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_backup(dir.path(), &["nope".to_string()])
            .unwrap()
            .is_none());
    }

    #[test]
    fn orphan_sweep_removes_inactive_and_keeps_active() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![DataSample::numeric(1.0, 1.0)];
        write_backup(dir.path(), &["keep".to_string()], DataType::Numeric, &samples).unwrap();
        write_backup(
            dir.path(),
            &["group".to_string(), "drop".to_string()],
            DataType::Numeric,
            &samples,
        )
        .unwrap();

        let removed =
            delete_unused_backup_files(dir.path(), |segs| segs == ["keep".to_string()]).unwrap();
        assert_eq!(removed, 1);
        assert!(path_for(dir.path(), &["keep".to_string()]).exists());
        assert!(!path_for(dir.path(), &["group".to_string(), "drop".to_string()]).exists());
        // The now-empty `group/` directory should have been swept too.
        assert!(!dir.path().join("group").exists());
    }
}
