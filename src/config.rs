use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub captcha: CaptchaConfig,

    pub mail: MailConfig,

    pub oauth: OAuthConfig,

    pub scheduler: SchedulerConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Root directory for uploaded post files and avatars.
    pub upload_path: String,

    /// Staging directory for uploads before validation passes.
    pub upload_tmp_path: String,

    /// Number of tokio worker threads (0 = number of CPU cores).
    pub worker_threads: usize,

    pub max_db_connections: u32,

    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/clubboard.db".to_string(),
            log_level: "info".to_string(),
            upload_path: "uploads".to_string(),
            upload_tmp_path: "uploads/.tmp".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    /// External base URL used to build links embedded in emails.
    pub base_url: String,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on session cookies.
    pub secure_cookies: bool,

    /// Session inactivity expiry in minutes.
    pub session_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8350,
            base_url: "http://localhost:8350".to_string(),
            cors_allowed_origins: vec![
                "http://localhost:8350".to_string(),
                "http://127.0.0.1:8350".to_string(),
            ],
            secure_cookies: true,
            session_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Emails granted the Admin role at login (compared lowercased/trimmed).
    pub admin_emails: Vec<String>,

    /// Argon2 memory cost in KiB.
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations).
    pub argon2_time_cost: u32,

    /// Argon2 parallelism.
    pub argon2_parallelism: u32,

    /// Failed login attempts per (email, ip) before the block window starts.
    pub login_max_attempts: u64,

    /// Login block window in seconds.
    pub login_block_seconds: u64,

    /// Failed admin probes per email before the block window starts.
    pub admin_max_attempts: u64,

    /// Admin-check block window in seconds.
    pub admin_block_seconds: u64,

    /// Password-reset requests per (email, ip) before the block window.
    pub reset_max_attempts: u64,

    /// Reset block window in seconds.
    pub reset_block_seconds: u64,

    /// Minimum seconds between two reset emails for the same account,
    /// independent of the attempt counter.
    pub reset_cooldown_seconds: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            admin_emails: Vec::new(),
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            login_max_attempts: 5,
            login_block_seconds: 5 * 60,
            admin_max_attempts: 5,
            admin_block_seconds: 5 * 60,
            reset_max_attempts: 3,
            reset_block_seconds: 15 * 60,
            reset_cooldown_seconds: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    /// When disabled, every captcha check passes (local development only).
    pub enabled: bool,

    pub secret_key: String,

    pub verify_url: String,

    /// Minimum accepted score; a successful verification below this is
    /// still a rejection.
    pub min_score: f64,

    pub request_timeout_seconds: u64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secret_key: String::new(),
            verify_url: "https://www.google.com/recaptcha/api/siteverify".to_string(),
            min_score: 0.5,
            request_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// When disabled, mail is captured in memory (local development only).
    pub enabled: bool,

    /// Transactional mail HTTP API endpoint.
    pub api_url: String,

    pub api_key: String,

    pub from_name: String,

    pub from_address: String,

    /// Destination for the contact form relay.
    pub contact_address: String,

    pub request_timeout_seconds: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.resend.com/emails".to_string(),
            api_key: String::new(),
            from_name: "Clubboard".to_string(),
            from_address: "no-reply@example.com".to_string(),
            contact_address: "contact@example.com".to_string(),
            request_timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthProviderConfig {
    pub enabled: bool,

    pub client_id: String,

    pub client_secret: String,
}

impl Default for OAuthProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub google: OAuthProviderConfig,

    pub github: OAuthProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    /// Cron expression for the newsletter dispatch job.
    pub newsletter_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Every day at 08:00.
            newsletter_cron: "0 0 8 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            captcha: CaptchaConfig::default(),
            mail: MailConfig::default(),
            oauth: OAuthConfig::default(),
            scheduler: SchedulerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                let mut config = Self::load_from_path(path)?;
                config.apply_env_overrides();
                return Ok(config);
            }
        }

        info!("No config file found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Secrets can be provided via environment (or a .env file) instead of
    /// being written into config.toml.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CLUBBOARD_CAPTCHA_SECRET") {
            self.captcha.secret_key = v;
        }
        if let Ok(v) = std::env::var("CLUBBOARD_MAIL_API_KEY") {
            self.mail.api_key = v;
        }
        if let Ok(v) = std::env::var("CLUBBOARD_GOOGLE_CLIENT_SECRET") {
            self.oauth.google.client_secret = v;
        }
        if let Ok(v) = std::env::var("CLUBBOARD_GITHUB_CLIENT_SECRET") {
            self.oauth.github.client_secret = v;
        }
        if let Ok(v) = std::env::var("CLUBBOARD_ADMIN_EMAILS") {
            self.security.admin_emails = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("clubboard").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".clubboard").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.captcha.enabled && self.captcha.secret_key.is_empty() {
            anyhow::bail!("Captcha secret key cannot be empty when captcha is enabled");
        }

        if self.mail.enabled && self.mail.api_key.is_empty() {
            anyhow::bail!("Mail API key cannot be empty when mail is enabled");
        }

        if self.server.base_url.is_empty() {
            anyhow::bail!("Server base_url cannot be empty (used in email links)");
        }

        if self.scheduler.enabled && self.scheduler.newsletter_cron.is_empty() {
            anyhow::bail!("Newsletter cron expression must be set when the scheduler is enabled");
        }

        Ok(())
    }

    /// True when the given (lowercased, trimmed) email is configured as an
    /// administrator.
    #[must_use]
    pub fn is_admin_email(&self, email: &str) -> bool {
        let needle = email.trim().to_lowercase();
        self.security
            .admin_emails
            .iter()
            .any(|e| e.trim().to_lowercase() == needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.security.login_max_attempts, 5);
        assert_eq!(config.security.login_block_seconds, 300);
        assert_eq!(config.security.reset_max_attempts, 3);
        assert_eq!(config.security.reset_block_seconds, 900);
        assert!((config.captcha.min_score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[security]"));
        assert!(toml_str.contains("[mail]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [security]
            admin_emails = ["president@club.fr"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert!(config.is_admin_email("President@Club.fr "));
        assert!(!config.is_admin_email("member@club.fr"));

        assert_eq!(config.server.port, 8350);
    }
}
