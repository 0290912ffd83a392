//! Configuration management for s3pilot

use crate::error::{Error, Result};
use crate::upload::{UploadPolicy, MIB};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration directory name
const CONFIG_DIR: &str = "s3pilot";

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// S3 rejects non-final parts smaller than this
const MIN_PART_SIZE_MB: u64 = 5;

const MAX_CONCURRENCY: usize = 64;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings; anything unset falls through to the AWS SDK defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom S3-compatible endpoint (MinIO, Ceph, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }
}

impl AwsConfig {
    /// Whether explicit keys are configured (as opposed to the SDK chain)
    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

/// Storage defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_bucket: Option<String>,
}

/// Multipart upload tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Files at or above this size (MB) use multipart upload
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_mb: u64,
    #[serde(default = "default_part_size")]
    pub part_size_mb: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrency: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold_mb: default_multipart_threshold(),
            part_size_mb: default_part_size(),
            max_concurrency: default_max_concurrent(),
        }
    }
}

impl UploadConfig {
    pub fn part_size_bytes(&self) -> u64 {
        self.part_size_mb * MIB
    }

    pub fn policy(&self) -> UploadPolicy {
        UploadPolicy {
            multipart_threshold: self.multipart_threshold_mb * MIB,
        }
    }
}

/// Advanced configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Per-attempt operation timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default values
fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_multipart_threshold() -> u64 {
    100 // 100MB
}

fn default_part_size() -> u64 {
    10 // 10MB
}

fn default_max_concurrent() -> usize {
    5
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let home = home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR))
}

/// Get the configuration file path
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Load configuration from `path`
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Err(Error::ConfigNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file: {}", e))
    })?;

    let config: ConfigFile = toml::from_str(&content).map_err(|e| {
        Error::InvalidConfig(format!("Failed to parse config file: {}", e))
    })?;

    Ok(config)
}

/// Load configuration, falling back to defaults when the file does not exist
pub fn load_config_or_default(path: Option<&Path>) -> Result<ConfigFile> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    match load_config_from(&path) {
        Err(Error::ConfigNotFound(_)) => Ok(ConfigFile::default()),
        other => other,
    }
}

/// Save configuration to `path`
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    let content = toml::to_string_pretty(config)?;

    fs::write(path, content).map_err(|e| {
        Error::Config(format!("Failed to write config file: {}", e))
    })?;

    // Config may carry keys: read/write for owner only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &ConfigFile) -> Result<()> {
    if config.aws.region.trim().is_empty() {
        return Err(Error::InvalidInput("Region cannot be empty".to_string()));
    }

    // Keys come as a pair or not at all
    if config.aws.access_key_id.is_some() != config.aws.secret_access_key.is_some() {
        return Err(Error::Config(
            "access_key_id and secret_access_key must be set together".to_string(),
        ));
    }

    if let Some(endpoint) = &config.aws.endpoint {
        let uri: http::Uri = endpoint
            .parse()
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint URL: {}", e)))?;

        match uri.scheme_str() {
            Some("http") | Some("https") if uri.host().is_some() => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Endpoint must be an http(s) URL, got '{}'",
                    endpoint
                )))
            }
        }
    }

    let upload = &config.upload;
    if upload.part_size_mb < MIN_PART_SIZE_MB {
        return Err(Error::InvalidInput(format!(
            "Part size must be at least {} MB (got {})",
            MIN_PART_SIZE_MB, upload.part_size_mb
        )));
    }

    if upload.multipart_threshold_mb < upload.part_size_mb {
        return Err(Error::InvalidInput(format!(
            "Multipart threshold ({} MB) cannot be smaller than the part size ({} MB)",
            upload.multipart_threshold_mb, upload.part_size_mb
        )));
    }

    if upload.max_concurrency == 0 || upload.max_concurrency > MAX_CONCURRENCY {
        return Err(Error::InvalidInput(format!(
            "max_concurrency must be between 1 and {} (got {})",
            MAX_CONCURRENCY, upload.max_concurrency
        )));
    }

    if config.advanced.max_retries == 0 {
        return Err(Error::InvalidInput(
            "max_retries must be at least 1".to_string(),
        ));
    }

    Ok(())
}

/// Public alias for ConfigFile (used by lib.rs)
pub use ConfigFile as Config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConfigFile::default();

        assert_eq!(config.aws.region, "us-west-2");
        assert_eq!(config.upload.multipart_threshold_mb, 100);
        assert_eq!(config.upload.part_size_mb, 10);
        assert_eq!(config.upload.max_concurrency, 5);
        assert_eq!(config.upload.policy().multipart_threshold, 100 * MIB);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: ConfigFile = toml::from_str(
            r#"
            [storage]
            default_bucket = "media"

            [upload]
            part_size_mb = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.default_bucket.as_deref(), Some("media"));
        assert_eq!(config.upload.part_size_mb, 16);
        assert_eq!(config.upload.part_size_bytes(), 16 * MIB);
        assert_eq!(config.upload.max_concurrency, 5);
        assert_eq!(config.aws.region, "us-west-2");
    }

    #[test]
    fn test_validate_config_half_credentials() {
        let mut config = ConfigFile::default();
        config.aws.access_key_id = Some("AKIAEXAMPLE".to_string());
        assert!(validate_config(&config).is_err());

        config.aws.secret_access_key = Some("secret".to_string());
        assert!(validate_config(&config).is_ok());
        assert!(config.aws.has_static_credentials());
    }

    #[test]
    fn test_validate_config_part_size_floor() {
        let mut config = ConfigFile::default();
        config.upload.part_size_mb = 4;
        assert!(validate_config(&config).is_err());

        config.upload.part_size_mb = 5;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_config_threshold_below_part_size() {
        let mut config = ConfigFile::default();
        config.upload.multipart_threshold_mb = 8;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_concurrency_bounds() {
        let mut config = ConfigFile::default();
        config.upload.max_concurrency = 0;
        assert!(validate_config(&config).is_err());

        config.upload.max_concurrency = 65;
        assert!(validate_config(&config).is_err());

        config.upload.max_concurrency = 64;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_config_endpoint() {
        let mut config = ConfigFile::default();
        config.aws.endpoint = Some("http://localhost:9000".to_string());
        assert!(validate_config(&config).is_ok());

        config.aws.endpoint = Some("localhost:9000".to_string());
        assert!(validate_config(&config).is_err());

        config.aws.endpoint = Some("ftp://files.example.com".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ConfigFile::default();
        config.storage.default_bucket = Some("backups".to_string());
        config.upload.max_concurrency = 8;

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.storage.default_bucket.as_deref(), Some("backups"));
        assert_eq!(loaded.upload.max_concurrency, 8);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(load_config_from(&path), Err(Error::ConfigNotFound(_))));

        let config = load_config_or_default(Some(&path)).unwrap();
        assert!(config.storage.default_bucket.is_none());
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[upload\npart_size_mb = ").unwrap();

        assert!(matches!(
            load_config_or_default(Some(&path)),
            Err(Error::InvalidConfig(_))
        ));
    }
}
