//! # Configuration Management
//!
//! This module handles loading the service configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (APP_SERVER__PORT, APP_UPLOAD__MAX_BYTES, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The configuration is loaded once at startup and never mutated afterwards.
//! Handlers receive it through `AppState` as a shared, read-only value.

use crate::features::FeatureProfile;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, upload, analysis)
/// maps each section to one stage of the request: listening, receiving the
/// file, and computing features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub analysis: AnalysisConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind to ("0.0.0.0" accepts connections from anywhere)
/// - `port`: TCP port number to listen on
/// - `workers`: number of HTTP worker threads (actix picks one per core when unset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// How the uploaded file is received and held while it is analyzed.
///
/// ## Fields:
/// - `field_name`: only accept a file part with this multipart field name
///   (`None` accepts the first file part whatever it is called)
/// - `require_filename`: reject a file part whose filename or content is empty
/// - `max_bytes`: largest accepted upload, enforced while streaming
/// - `spool_to_disk`: write the upload to a temporary file before decoding
///   instead of decoding straight from memory
/// - `spool_dir`: directory for spooled files (system temp dir when unset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub field_name: Option<String>,
    pub require_filename: bool,
    pub max_bytes: usize,
    pub spool_to_disk: bool,
    pub spool_dir: Option<PathBuf>,
}

/// Feature extraction settings.
///
/// ## Fields:
/// - `profile`: which fixed feature list to compute (`core` or `extended`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub profile: FeatureProfile,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the service can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),  // Reachable from other containers/hosts
                port: 5000,
                workers: None,
            },
            upload: UploadConfig {
                field_name: None,
                require_filename: true,
                max_bytes: 50 * 1024 * 1024,   // 50MB
                spool_to_disk: false,
                spool_dir: None,
            },
            analysis: AnalysisConfig {
                profile: FeatureProfile::Extended,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=10000`: Override server port
    /// - `APP_UPLOAD__FIELD_NAME=audio`: Only accept the `audio` field
    /// - `APP_UPLOAD__SPOOL_TO_DISK=true`: Decode from a temporary file
    /// - `APP_ANALYSIS__PROFILE=core`: Compute the smaller feature list
    /// - `PORT=3000`: Special case for deployment platforms
    ///
    /// Sections and keys are separated by a double underscore so that keys
    /// containing underscores (`max_bytes`, `field_name`) stay intact.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        // Deployment platforms don't follow the APP_ prefix convention
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 (port 0 is reserved and can't be used)
    /// - Upload limit is greater than 0 (otherwise every upload is rejected)
    /// - A configured field name is not blank
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.workers == Some(0) {
            return Err(anyhow::anyhow!("Worker count must be greater than 0"));
        }

        if self.upload.max_bytes == 0 {
            return Err(anyhow::anyhow!("Upload size limit must be greater than 0"));
        }

        if let Some(name) = &self.upload.field_name {
            if name.trim().is_empty() {
                return Err(anyhow::anyhow!("Upload field name cannot be empty"));
            }
        }

        Ok(())
    }

    /// Address string handed to `HttpServer::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert_eq!(config.analysis.profile, FeatureProfile::Extended);
        assert!(config.upload.field_name.is_none());
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.max_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.field_name = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.workers = Some(0);
        assert!(config.validate().is_err());
    }

    /// Test that a TOML layer overrides only the keys it names.
    #[test]
    fn test_toml_layer_overrides_defaults() {
        let toml = r#"
            [server]
            port = 10000

            [upload]
            field_name = "audio"

            [analysis]
            profile = "core"
        "#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 10000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.upload.field_name.as_deref(), Some("audio"));
        assert!(config.upload.require_filename);
        assert_eq!(config.analysis.profile, FeatureProfile::Core);
    }
}
