use anyhow::{Context, Result};
use cloudkit::RetryConfig;
use declarative::declaration::CONFIG_FILE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory for files stratum keeps next to the declarations
pub const DATA_DIR: &str = ".stratum";

/// Get the user config directory path
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join("stratum"))
}

/// Expand `~` and make relative paths relative to `base`
pub fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Settings from `stratum.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineSettings,
    pub retry: RetrySettings,
    pub state: StateSettings,
    pub sandbox: SandboxSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub jobs: usize,
    pub timeout_secs: Option<u64>,
    pub refresh: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout_secs: None,
            refresh: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateSettings {
    /// State file path (relative to the declaration directory)
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSettings {
    /// Sandbox account file (relative to the declaration directory)
    pub path: Option<String>,
}

impl Settings {
    /// Load settings for a declaration directory
    ///
    /// `<dir>/stratum.toml` wins over `<config_dir>/stratum/config.toml`.
    /// Missing files give the defaults.
    pub fn load(dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        let mut candidates = vec![dir.join(CONFIG_FILE)];
        if let Ok(user) = config_dir() {
            candidates.push(user.join("config.toml"));
        }

        for path in candidates {
            if path.is_file() {
                let settings = Self::load_file(&path)?;
                log::debug!("Loaded settings from {}", path.display());
                return Ok((settings, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// State file for a declaration directory
    pub fn state_path(&self, dir: &Path) -> PathBuf {
        match &self.state.path {
            Some(raw) => resolve_path(raw, dir),
            None => dir.join(declarative::DEFAULT_STATE_FILE),
        }
    }

    /// Sandbox account file for a declaration directory
    pub fn sandbox_path(&self, dir: &Path) -> PathBuf {
        match &self.sandbox.path {
            Some(raw) => resolve_path(raw, dir),
            None => dir.join(DATA_DIR).join("sandbox.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_file(&dir.path().join("missing.toml"));
        assert!(settings.is_err());

        let settings = Settings::default();
        assert_eq!(settings.engine.jobs, 4);
        assert!(settings.engine.refresh);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(
            settings.state_path(dir.path()),
            dir.path().join("stratum.state.json")
        );
        assert_eq!(
            settings.sandbox_path(dir.path()),
            dir.path().join(".stratum").join("sandbox.json")
        );
    }

    #[test]
    fn test_load_from_declaration_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("stratum.toml"),
            r#"
[engine]
jobs = 8
timeout_secs = 600

[retry]
max_attempts = 3
base_delay_ms = 50

[state]
path = "state/ci.json"
"#,
        )
        .unwrap();

        let (settings, source) = Settings::load(dir.path()).unwrap();
        assert_eq!(source, Some(dir.path().join("stratum.toml")));
        assert_eq!(settings.engine.jobs, 8);
        assert_eq!(settings.engine.timeout_secs, Some(600));
        assert!(settings.engine.refresh);

        let retry = settings.retry.to_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(50));
        assert!((retry.backoff_factor - 2.0).abs() < f64::EPSILON);

        assert_eq!(
            settings.state_path(dir.path()),
            dir.path().join("state").join("ci.json")
        );
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stratum.toml");
        fs::write(&path, "[engine]\nworkers = 2\n").unwrap();
        assert!(Settings::load_file(&path).is_err());
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/work/infra");
        assert_eq!(resolve_path("/abs/state.json", base), PathBuf::from("/abs/state.json"));
        assert_eq!(resolve_path("rel.json", base), base.join("rel.json"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_path("~/s.json", base), home.join("s.json"));
        }
    }
}
