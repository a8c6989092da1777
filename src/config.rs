use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionConfig;

pub const API_KEY_ENV: &str = "SMARTSHELL_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub exec: ExecConfig,
    pub safety: SafetyConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub api_url: String,
    pub model: String,
    // Prefer the SMARTSHELL_API_KEY environment variable over storing it here
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-3-haiku-20240307".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            max_retries: 1,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecConfig {
    pub timeout_secs: u64,
    // Shell program override, e.g. "bash" or "zsh"
    pub shell: Option<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            shell: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SafetyConfig {
    // Extra regexes; a translated command matching any of them is refused
    pub extra_patterns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub language: String,
    pub history_limit: usize,
    // "auto", "linux", "macos", "windows"
    pub os_family: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            history_limit: 10,
            os_family: "auto".to_string(),
        }
    }
}

/// Operating system family the generated commands should target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl OsFamily {
    pub fn detect() -> Self {
        Self::from_name(std::env::consts::OS)
    }

    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "linux" => OsFamily::Linux,
            "macos" | "darwin" | "mac" | "osx" => OsFamily::MacOs,
            "windows" | "win" => OsFamily::Windows,
            _ => OsFamily::Other,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OsFamily::Linux => "Linux",
            OsFamily::MacOs => "macOS",
            OsFamily::Windows => "Windows",
            OsFamily::Other => "Unix-like",
        };
        f.write_str(name)
    }
}

/// Opaque backend secret. Never printed, not even in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            fs::create_dir_all(config_dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".smartshell")
            .join("config.toml")
    }

    pub fn get_effective_language(&self) -> String {
        if self.display.language == "auto" {
            // Try to get system language
            std::env::var("LANG")
                .unwrap_or_else(|_| "en_US".to_string())
                .split('.')
                .next()
                .unwrap_or("en")
                .to_string()
        } else {
            self.display.language.clone()
        }
    }

    pub fn os_family(&self) -> OsFamily {
        if self.display.os_family == "auto" {
            OsFamily::detect()
        } else {
            OsFamily::from_name(&self.display.os_family)
        }
    }

    /// The environment variable wins over the config file.
    pub fn credential(&self, env_value: Option<String>) -> Option<Credential> {
        env_value
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.backend.api_key.clone())
            .filter(|v| !v.trim().is_empty())
            .map(Credential::new)
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        let credential = self
            .credential(std::env::var(API_KEY_ENV).ok())
            .ok_or_else(|| {
                anyhow!(
                    "no API key: set {API_KEY_ENV} or backend.api_key in {}",
                    Self::get_config_path().display()
                )
            })?;

        Ok(SessionConfig {
            credential,
            timeout: Duration::from_secs(self.exec.timeout_secs.max(1)),
            os_family: self.os_family(),
            api_url: self.backend.api_url.clone(),
            model: self.backend.model.clone(),
            request_timeout: Duration::from_secs(self.backend.request_timeout_secs.max(1)),
            max_retries: self.backend.max_retries,
            retry_backoff: Duration::from_millis(self.backend.retry_backoff_ms),
            history_limit: self.display.history_limit,
            safety_patterns: self.safety.extra_patterns.clone(),
            shell: self.exec.shell.clone(),
        })
    }
}
