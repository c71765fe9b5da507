use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::session::SessionOptions;

const APP_DIR: &str = "shiken";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; falls back to `<config_dir>/shiken/shiken.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_min_questions")]
    pub min_questions: usize,
    #[serde(default)]
    pub max_questions: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_questions: default_min_questions(),
            max_questions: None,
        }
    }
}

fn default_min_questions() -> usize {
    1
}

impl Config {
    /// Loads `explicit`, else `$SHIKEN_CONFIG`, else the per-user config
    /// file. A missing file yields defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit
            .map(PathBuf::from)
            .or_else(|| std::env::var("SHIKEN_CONFIG").ok().map(PathBuf::from))
        {
            Some(path) => Some(path),
            None => dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml")),
        };

        let mut config = match path {
            Some(path) => Self::load_file(&path)?.unwrap_or_default(),
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("read config {}: {err}", path.display())))?;
        let config = toml::from_str(&raw)
            .map_err(|err| AppError::Config(format!("parse config {}: {err}", path.display())))?;
        debug!(path = %path.display(), "loaded config");
        Ok(Some(config))
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty("SHIKEN_DB") {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(url) = non_empty("SHIKEN_REMOTE_URL") {
            self.remote.base_url = Some(url);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.session.min_questions == 0 {
            return Err(AppError::Config("session.min_questions must be at least 1".to_string()));
        }
        if self.session.max_questions == Some(0) {
            return Err(AppError::Config("session.max_questions must be at least 1".to_string()));
        }
        if self.remote.timeout_secs == 0 {
            return Err(AppError::Config("remote.timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(default_db_path)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            min_questions: self.session.min_questions,
            max_questions: self.session.max_questions,
        }
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("shiken.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    mod load_tests {
        use super::*;

        #[test]
        fn defaults_are_sensible() {
            let config = Config::default();
            assert_eq!(config.remote.timeout_secs, 30);
            assert_eq!(config.session.min_questions, 1);
            assert!(config.session.max_questions.is_none());
            assert!(config.db_path().ends_with("shiken/shiken.db"));
        }

        #[test]
        fn missing_file_yields_defaults() {
            let dir = TempDir::new().unwrap();
            let config = Config::load_file(&dir.path().join("absent.toml")).unwrap();
            assert!(config.is_none());
        }

        #[test]
        fn partial_file_keeps_other_defaults() {
            let dir = TempDir::new().unwrap();
            let path = write_config(
                &dir,
                r#"
                [remote]
                base_url = "https://bank.example.com/api"

                [session]
                max_questions = 20
                "#,
            );

            let config = Config::load_file(&path).unwrap().unwrap();
            assert_eq!(config.remote.base_url.as_deref(), Some("https://bank.example.com/api"));
            assert_eq!(config.remote.timeout_secs, 30);
            assert_eq!(config.session.max_questions, Some(20));
            assert_eq!(config.session.min_questions, 1);
            assert!(config.store.path.is_none());
        }

        #[test]
        fn invalid_toml_is_config_error() {
            let dir = TempDir::new().unwrap();
            let path = write_config(&dir, "[session\nmin_questions = ");
            assert!(matches!(Config::load_file(&path), Err(AppError::Config(_))));
        }

        #[test]
        fn explicit_path_is_used() {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("bank.db");
            let body = format!("[store]\npath = {:?}\n", db.display().to_string());
            let path = write_config(&dir, &body);

            let config = Config::load(Some(path.as_path())).unwrap();
            if std::env::var("SHIKEN_DB").is_err() {
                assert_eq!(config.db_path(), db);
            }
        }

        #[test]
        fn zero_minimum_is_rejected() {
            let dir = TempDir::new().unwrap();
            let path = write_config(&dir, "[session]\nmin_questions = 0\n");
            assert!(matches!(Config::load(Some(path.as_path())), Err(AppError::Config(_))));
        }
    }

    mod override_tests {
        use super::*;

        fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
            let map: HashMap<String, String> = vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            move |key: &str| map.get(key).cloned()
        }

        #[test]
        fn env_overrides_file_values() {
            let mut config = Config::default();
            config.remote.base_url = Some("https://file.example.com".to_string());

            config.apply_env_overrides(lookup(&[
                ("SHIKEN_DB", "/tmp/override.db"),
                ("SHIKEN_REMOTE_URL", "https://env.example.com"),
            ]));

            assert_eq!(config.db_path(), PathBuf::from("/tmp/override.db"));
            assert_eq!(config.remote.base_url.as_deref(), Some("https://env.example.com"));
        }

        #[test]
        fn blank_env_values_are_ignored() {
            let mut config = Config::default();
            config.remote.base_url = Some("https://file.example.com".to_string());
            config.apply_env_overrides(lookup(&[("SHIKEN_REMOTE_URL", "  ")]));
            assert_eq!(config.remote.base_url.as_deref(), Some("https://file.example.com"));
        }

        #[test]
        fn session_options_follow_config() {
            let mut config = Config::default();
            config.session.min_questions = 5;
            config.session.max_questions = Some(10);
            let options = config.session_options();
            assert_eq!(options.min_questions, 5);
            assert_eq!(options.max_questions, Some(10));
        }
    }
}
