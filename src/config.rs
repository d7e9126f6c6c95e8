//! Persisted CLI configuration: the database location and the logged-in user.
//!
//! Stored as a flat JSON object at `~/.gatorconfig.json`:
//!
//! ```json
//! { "db_url": "/home/me/.gator.db", "current_user_name": "alice" }
//! ```
//!
//! A missing file yields the default configuration with nobody logged in.
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const CONFIG_FILE_NAME: &str = ".gatorconfig.json";
const DEFAULT_DB_FILE_NAME: &str = ".gator.db";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("HOME environment variable not set")]
    MissingHome,
}

// ============================================================================
// Configuration
// ============================================================================

/// On-disk shape of the config file
#[derive(Serialize, Deserialize)]
struct RawConfig {
    db_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_user_name: Option<String>,
}

/// Loaded configuration.
///
/// The connection string is kept behind [`SecretString`] and masked in
/// `Debug` output, since database URLs can embed credentials.
pub struct Config {
    pub db_url: SecretString,
    pub current_user_name: Option<String>,
}

impl Config {
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: SecretString::from(db_url.into()),
            current_user_name: None,
        }
    }

    fn from_raw(raw: RawConfig) -> Self {
        Self {
            db_url: SecretString::from(raw.db_url),
            current_user_name: raw.current_user_name.filter(|name| !name.is_empty()),
        }
    }

    fn to_raw(&self) -> RawConfig {
        RawConfig {
            db_url: self.db_url.expose_secret().to_string(),
            current_user_name: self.current_user_name.clone(),
        }
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            db_url: SecretString::from(self.db_url.expose_secret().to_string()),
            current_user_name: self.current_user_name.clone(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_url", &"[REDACTED]")
            .field("current_user_name", &self.current_user_name)
            .finish()
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Read/write access to the persisted configuration.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Config, ConfigError>;

    fn save(&self, config: &Config) -> Result<(), ConfigError>;

    /// Record `name` as the logged-in user, keeping every other field.
    fn set_current_user(&self, name: &str) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        config.current_user_name = Some(name.to_string());
        self.save(&config)
    }
}

/// JSON file on disk
#[derive(Debug, Clone)]
pub struct FileConfig {
    path: PathBuf,
    default_db_url: String,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>, default_db_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default_db_url: default_db_url.into(),
        }
    }

    /// `~/.gatorconfig.json`, defaulting the database to `~/.gator.db`.
    pub fn in_home() -> Result<Self, ConfigError> {
        let home = home_dir()?;
        Ok(Self::new(
            home.join(CONFIG_FILE_NAME),
            home.join(DEFAULT_DB_FILE_NAME).to_string_lossy(),
        ))
    }

    /// A config file at `path` whose default database sits next to it.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let default_db = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_DB_FILE_NAME);
        Self::new(path, default_db.to_string_lossy())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfig {
    /// - Missing file → default config, nobody logged in
    /// - Empty file → same as missing
    /// - Invalid JSON or no `db_url` → `Err(ConfigError::Parse)`
    fn load(&self) -> Result<Config, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No config file found, using defaults");
                return Ok(Config::new(self.default_db_url.clone()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %self.path.display(), "Config file is empty, using defaults");
            return Ok(Config::new(self.default_db_url.clone()));
        }

        let raw: RawConfig = serde_json::from_str(&content)?;
        Ok(Config::from_raw(raw))
    }

    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut data = serde_json::to_vec_pretty(&config.to_raw())?;
        data.push(b'\n');
        atomic_write(&self.path, &data)?;
        tracing::debug!(path = %self.path.display(), "Saved configuration");
        Ok(())
    }
}

/// In-process configuration for tests and embedding
#[derive(Debug)]
pub struct MemoryConfig {
    inner: Mutex<Config>,
}

impl MemoryConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }
}

impl ConfigStore for MemoryConfig {
    fn load(&self) -> Result<Config, ConfigError> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = config.clone();
        Ok(())
    }
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => Ok(PathBuf::from(home)),
        _ => Err(ConfigError::MissingHome),
    }
}

/// Write `data` to `dst` via a sibling temp file and a rename, so readers
/// never observe a partial file.
fn atomic_write(dst: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let result = (|| {
        let mut temp_file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true) // Fails if the path exists (no symlink race)
            .open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        drop(temp_file);

        // On Windows, rename fails if destination exists
        #[cfg(windows)]
        if dst.exists() {
            std::fs::remove_file(dst)?;
        }
        std::fs::rename(&temp_path, dst)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gator_config_test_{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = scratch_dir("missing");
        let store = FileConfig::new(dir.join("absent.json"), "/data/gator.db");

        let config = store.load().unwrap();
        assert_eq!(config.db_url.expose_secret(), "/data/gator.db");
        assert!(config.current_user_name.is_none());
        assert_eq!(store.path(), dir.join("absent.json").as_path());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_reads_original_layout() {
        let dir = scratch_dir("layout");
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{"db_url": "sqlite:///tmp/gator.db", "current_user_name": "alice"}"#,
        )
        .unwrap();

        let config = FileConfig::at(&path).load().unwrap();
        assert_eq!(config.db_url.expose_secret(), "sqlite:///tmp/gator.db");
        assert_eq!(config.current_user_name.as_deref(), Some("alice"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_user_name_means_logged_out() {
        let dir = scratch_dir("empty_user");
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"db_url": "x.db", "current_user_name": ""}"#).unwrap();

        let config = FileConfig::at(&path).load().unwrap();
        assert!(config.current_user_name.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_db_url_is_parse_error() {
        let dir = scratch_dir("no_db_url");
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"current_user_name": "alice"}"#).unwrap();

        let err = FileConfig::at(&path).load().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid JSON"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_set_current_user_persists_and_keeps_db_url() {
        let dir = scratch_dir("set_user");
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"db_url": "keep.db"}"#).unwrap();
        let store = FileConfig::at(&path);

        store.set_current_user("bob").unwrap();

        let reread = FileConfig::at(&path).load().unwrap();
        assert_eq!(reread.db_url.expose_secret(), "keep.db");
        assert_eq!(reread.current_user_name.as_deref(), Some("bob"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["current_user_name"], "bob");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_creates_file_when_missing() {
        let dir = scratch_dir("create");
        let path = dir.join("config.json");
        let store = FileConfig::at(&path);

        store.set_current_user("carol").unwrap();
        assert!(path.exists());
        assert_eq!(
            store.load().unwrap().current_user_name.as_deref(),
            Some("carol")
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_memory_config_round_trip() {
        let store = MemoryConfig::new(Config::new(":memory:"));
        assert!(store.load().unwrap().current_user_name.is_none());

        store.set_current_user("dave").unwrap();
        assert_eq!(
            store.load().unwrap().current_user_name.as_deref(),
            Some("dave")
        );
    }

    #[test]
    fn test_debug_masks_db_url() {
        let config = Config::new("postgres://admin:hunter2@db/gator");
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("hunter2"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
