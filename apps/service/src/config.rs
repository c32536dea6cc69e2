use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to write config {path}: {source}")]
    Write { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Neither XDG_CONFIG_HOME nor a home directory is available")]
    PathUnavailable,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: Store,
    pub scheduler: Scheduler,
    pub checks: Checks,
    pub sms: Sms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub data_dir: path::PathBuf,
    pub logs_dir: path::PathBuf,
}

impl Default for Store {
    fn default() -> Self {
        Self { data_dir: ".data".into(), logs_dir: ".logs".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    pub interval_seconds: u64,
    pub max_concurrent_probes: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { interval_seconds: 60, max_concurrent_probes: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Checks {
    /// Upper bound for a check's `timeoutSeconds`
    pub max_timeout_seconds: u64,
}

impl Default for Checks {
    fn default() -> Self {
        Self { max_timeout_seconds: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Sms {
    pub api_base: String,
    pub country_code: String,
    pub from_phone: String,
    pub account_sid: String,
    pub auth_token: String,
}

impl Default for Sms {
    fn default() -> Self {
        Self {
            api_base: "https://api.twilio.com".into(),
            country_code: "+256".into(),
            from_phone: String::new(),
            account_sid: String::new(),
            auth_token: String::new(),
        }
    }
}

impl Sms {
    pub fn is_configured(&self) -> bool {
        !self.from_phone.is_empty() && !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/upcheck/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::PathUnavailable);
    };

    Ok(path.join("upcheck/config.toml"))
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "********" }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Store")?;
        write_1(f, "Data Directory", &self.store.data_dir.display())?;
        write_1(f, "Logs Directory", &self.store.logs_dir.display())?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Interval (s)", &self.scheduler.interval_seconds)?;
        write_1(f, "Max Concurrent Probes", &self.scheduler.max_concurrent_probes)?;
        write_title_1(f, "Checks")?;
        write_1(f, "Max Timeout (s)", &self.checks.max_timeout_seconds)?;
        write_title_1(f, "SMS")?;
        write_1(f, "API Base", &self.sms.api_base)?;
        write_1(f, "Country Code", &self.sms.country_code)?;
        write_1(f, "From", &self.sms.from_phone)?;
        write_1(f, "Account SID", &mask(&self.sms.account_sid))?;
        write_1(f, "Auth Token", &mask(&self.sms.auth_token))?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/upcheck/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::Read { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.apply_env(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over the file
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TWILIO_AUTH_TOKEN").filter(|v| !v.is_empty()) {
            self.sms.auth_token = token;
        }
        if let Some(dir) = lookup("UPCHECK_DATA_DIR").filter(|v| !v.is_empty()) {
            self.store.data_dir = dir.into();
        }
        if let Some(dir) = lookup("UPCHECK_LOGS_DIR").filter(|v| !v.is_empty()) {
            self.store.logs_dir = dir.into();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.interval_seconds == 0 {
            return Err(ConfigError::Invalid("scheduler.interval_seconds must be at least 1".into()));
        }
        if self.scheduler.max_concurrent_probes == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent_probes must be at least 1".into(),
            ));
        }
        if self.checks.max_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("checks.max_timeout_seconds must be at least 1".into()));
        }
        Ok(())
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.interval_seconds, 60);
        assert_eq!(config.scheduler.max_concurrent_probes, 32);
        assert_eq!(config.checks.max_timeout_seconds, 5);
        assert!(!config.sms.is_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.scheduler.interval_seconds, 60);
        assert!(dir.path().join("nested/config.toml").exists());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scheduler]\ninterval_seconds = 15\n\n[checks]\nmax_timeout_seconds = 10\n")
            .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.scheduler.interval_seconds, 15);
        assert_eq!(config.scheduler.max_concurrent_probes, 32);
        assert_eq!(config.checks.max_timeout_seconds, 10);
        assert_eq!(config.store.data_dir, path::PathBuf::from(".data"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scheduler]\ninterval_seconds = 0\n").unwrap();
        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::Invalid(_))));

        fs::write(&path, "[scheduler\n").unwrap();
        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            "TWILIO_AUTH_TOKEN" => Some("token".to_string()),
            "UPCHECK_DATA_DIR" => Some("/var/lib/upcheck".to_string()),
            _ => None,
        });

        assert_eq!(config.sms.auth_token, "token");
        assert_eq!(config.store.data_dir, path::PathBuf::from("/var/lib/upcheck"));
        assert_eq!(config.store.logs_dir, path::PathBuf::from(".logs"));
    }

    #[test]
    fn test_display_masks_secrets() {
        let mut config = Config::default();
        config.sms.auth_token = "super-secret".into();

        let rendered = config.to_string();
        assert!(rendered.contains("Auth Token: ********"));
        assert!(!rendered.contains("super-secret"));
    }
}
