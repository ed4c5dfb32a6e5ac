use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load `.env` if present (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Hub-wide configuration (spec §6 "On-disk format", "Naming").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Active profile name (empty = default). `DEVICE` switches the backup
    /// root default to the on-device path.
    pub profile: String,
    /// Root directory backup files are written under (one `.bak` per
    /// observation, mirroring its path under `/obs/`).
    pub backup_root: PathBuf,
    /// Maximum length, in bytes, of a full resource path (spec §6 "Naming").
    pub max_path_len: usize,
    /// Log level passed to `tracing_subscriber::EnvFilter` by the binary.
    pub log_level: String,
}

impl HubConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `HUB_PROFILE`. When set (e.g. `DEVICE`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("HUB_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let default_backup_root = if p == "DEVICE" {
            "/home/root/dataHubBackup/"
        } else {
            "backup/"
        };
        Self {
            profile: p.clone(),
            backup_root: PathBuf::from(profiled_env_or(&p, "BACKUP_ROOT", default_backup_root)),
            max_path_len: profiled_env_usize(&p, "MAX_PATH_LEN", 256),
            log_level: profiled_env_or(&p, "LOG_LEVEL", "info"),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "HubConfig loaded (profile: {}): backup_root={}, max_path_len={}",
            self.profile_label(),
            self.backup_root.display(),
            self.max_path_len
        );
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::for_profile("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_uses_relative_backup_dir() {
        let cfg = HubConfig::for_profile("");
        assert_eq!(cfg.backup_root, PathBuf::from("backup/"));
    }

    #[test]
    fn device_profile_uses_on_device_backup_dir() {
        let cfg = HubConfig::for_profile("device");
        assert_eq!(cfg.backup_root, PathBuf::from("/home/root/dataHubBackup/"));
        assert_eq!(cfg.profile_label(), "DEVICE");
    }
}
