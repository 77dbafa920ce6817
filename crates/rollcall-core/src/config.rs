//! Configuration shared by `rollcalld` and the `rollcall` CLI.
//!
//! Both read the same TOML file and `ROLLCALL_*` variables, so they agree
//! on the database and landmark sidecar locations.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("scan period must be greater than zero")]
    ZeroPeriod,
}

/// Optional TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Replay images from this directory instead of opening the camera.
    pub replay_dir: Option<PathBuf>,
    /// Where captured frames are written for the landmark detector.
    pub capture_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding landmark sidecar files. Unset → next to each image.
    pub sidecar_dir: Option<PathBuf>,
    /// Interval between scan ticks, in milliseconds.
    pub scan_period_ms: u64,
    /// Frames to discard after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// Memoise reference signatures across cycles.
    pub signature_cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            replay_dir: None,
            capture_dir: data_dir.join("captures"),
            db_path: data_dir.join("rollcall.db"),
            sidecar_dir: None,
            scan_period_ms: 2000,
            warmup_frames: 2,
            signature_cache: false,
        }
    }
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (or the default config path if it exists),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("ROLLCALL_REPLAY_DIR") {
            self.replay_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("ROLLCALL_CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_SIDECAR_DIR") {
            self.sidecar_dir = Some(PathBuf::from(v));
        }
        env_parse(&var, "ROLLCALL_SCAN_PERIOD_MS", &mut self.scan_period_ms);
        env_parse(&var, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        if let Some(v) = var("ROLLCALL_SIGNATURE_CACHE") {
            self.signature_cache = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_period_ms == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(())
    }

    pub fn scan_period(&self) -> Duration {
        Duration::from_millis(self.scan_period_ms)
    }
}

fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = var(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable value"),
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("rollcall")
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rollcall/rollcalld.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scan_period(), Duration::from_millis(2000));
        assert_eq!(config.camera_device, "/dev/video0");
        assert!(!config.signature_cache);
        assert!(config.replay_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial() {
        let config = Config::from_toml(
            r#"
            camera_device = "/dev/video4"
            scan_period_ms = 1500
            replay_dir = "/srv/kiosk/frames"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.scan_period_ms, 1500);
        assert_eq!(config.replay_dir, Some(PathBuf::from("/srv/kiosk/frames")));
        assert_eq!(config.warmup_frames, 2);
    }

    #[test]
    fn test_file_paths_apply_without_env() {
        let dir = std::env::temp_dir().join(format!("rollcall-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rollcalld.toml");
        std::fs::write(
            &path,
            "db_path = \"/srv/rollcall/att.db\"\nsidecar_dir = \"/srv/rollcall/landmarks\"\n",
        )
        .unwrap();

        let mut config = Config::from_file(&path).unwrap();
        config.apply_env(env(&[]));
        assert_eq!(config.db_path, PathBuf::from("/srv/rollcall/att.db"));
        assert_eq!(config.sidecar_dir, Some(PathBuf::from("/srv/rollcall/landmarks")));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/rollcall/rollcalld.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("scan_period = 5").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/db.sqlite"),
            ("ROLLCALL_SCAN_PERIOD_MS", "500"),
            ("ROLLCALL_SIGNATURE_CACHE", "1"),
            ("ROLLCALL_SIDECAR_DIR", "/var/lib/rollcall/landmarks"),
        ]));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/rollcall/db.sqlite"));
        assert_eq!(config.scan_period_ms, 500);
        assert!(config.signature_cache);
        assert_eq!(config.sidecar_dir, Some(PathBuf::from("/var/lib/rollcall/landmarks")));
    }

    #[test]
    fn test_env_bad_number_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("ROLLCALL_WARMUP_FRAMES", "lots")]));
        assert_eq!(config.warmup_frames, 2);
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut config = Config::default();
        config.apply_env(env(&[("ROLLCALL_SCAN_PERIOD_MS", "0")]));
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPeriod)));
    }
}
