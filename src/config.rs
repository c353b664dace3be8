//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.accessboard.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".accessboard.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// GitHub API settings.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Commit status notifications.
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Send permissive CORS headers.
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Public base URL, used for links in commit statuses.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Largest accepted webhook body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            enable_cors: true,
            public_url: default_public_url(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024 // CI reports with many pages get large
}

fn default_true() -> bool {
    true
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "accessboard.db".to_string()
}

/// GitHub API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Token sent as a bearer credential. Needed only for status updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// User-Agent header (GitHub rejects requests without one).
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "accessboard".to_string()
}

/// Commit status notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Post a commit status after each report. Requires `github.token`.
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments (and their environment fallbacks) take precedence, but
    /// only when they were actually provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref bind) = args.bind {
            self.server.bind = bind.clone();
        }
        if let Some(ref database) = args.database {
            self.database.path = database.clone();
        }
        if let Some(ref token) = args.github_token {
            self.github.token = Some(token.clone());
        }
        if let Some(ref api_url) = args.github_api_url {
            self.github.api_url = api_url.clone();
        }
        if let Some(ref public_url) = args.public_url {
            self.server.public_url = public_url.clone();
        }

        // Flags always override
        if args.notify {
            self.notifier.enabled = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))?;

        if !self.github.api_url.starts_with("http://") && !self.github.api_url.starts_with("https://")
        {
            anyhow::bail!("GitHub API URL must start with 'http://' or 'https://'");
        }

        if self.server.max_body_bytes == 0 {
            anyhow::bail!("server.max_body_bytes must be at least 1");
        }

        if self.notifier.enabled && self.github.token.is_none() {
            anyhow::bail!("Commit status notifications need a GitHub token (--github-token or GITHUB_TOKEN)");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert_eq!(config.database.path, "accessboard.db");
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert!(config.server.enable_cors);
        assert!(!config.notifier.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
verbose = true

[server]
bind = "0.0.0.0:8080"
enable_cors = false

[database]
path = "/var/lib/accessboard/board.db"

[github]
token = "ghp_example"

[notifier]
enabled = true
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert!(config.general.verbose);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert!(!config.server.enable_cors);
        assert_eq!(config.server.public_url, "http://localhost:3000");
        assert_eq!(config.database.path, "/var/lib/accessboard/board.db");
        assert_eq!(config.github.token.as_deref(), Some("ghp_example"));
        assert_eq!(config.github.timeout_seconds, 30);
        assert!(config.notifier.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_notifier_without_token() {
        let mut config = Config::default();
        config.notifier.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bind() {
        let mut config = Config::default();
        config.server.bind = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[database]\npath = \":memory:\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[github]"));
    }
}
