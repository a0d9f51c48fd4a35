//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required by mutating admin routes (optional)
    #[serde(default)]
    pub admin_token: Option<String>,
    /// TLS configuration (optional - enables HTTPS when present)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_token: None,
            tls: None,
        }
    }
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM format)
    pub cert: String,
    /// Path to private key file (PEM format)
    pub key: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory behind the `public://` scheme
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    /// URL prefix the public directory is served under
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Directory holding the file and block manifests
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Age after which temporary uploads are deleted
    #[serde(default = "default_temporary_max_age")]
    pub temporary_max_age_secs: u64,
    /// How often temporary uploads are collected (0 to disable)
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
    /// Upload size limit in bytes
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_dir: default_public_dir(),
            public_base_url: default_public_base_url(),
            state_dir: default_state_dir(),
            temporary_max_age_secs: default_temporary_max_age(),
            gc_interval_secs: default_gc_interval(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("./files")
}

fn default_public_base_url() -> String {
    "/files".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

fn default_temporary_max_age() -> u64 {
    6 * 60 * 60 // Six hours
}

fn default_gc_interval() -> u64 {
    60 * 60
}

fn default_max_upload() -> usize {
    64 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Directory with the built viewer bundle
    #[serde(default = "default_web_dir")]
    pub dir: PathBuf,
    /// Page path of the viewer's JS glue, relative to `dir`
    #[serde(default = "default_viewer_script")]
    pub viewer_script: String,
    /// Page path of the versioned mesh decoder bundle
    #[serde(default = "default_decoder_path")]
    pub decoder_path: String,
}

impl WebConfig {
    /// URL of the decoder script inside `decoder_path`
    pub fn decoder_script(&self) -> String {
        format!("{}/{}", self.decoder_path.trim_end_matches('/'), DECODER_SCRIPT)
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            dir: default_web_dir(),
            viewer_script: default_viewer_script(),
            decoder_path: default_decoder_path(),
        }
    }
}

fn default_web_dir() -> PathBuf {
    PathBuf::from("./web")
}

fn default_viewer_script() -> String {
    "/pkg/cadview_viewer.js".to_string()
}

/// Self-contained decoder build, defines `DracoDecoderModule`
const DECODER_SCRIPT: &str = "draco_decoder.js";

fn default_decoder_path() -> String {
    "/draco/1.5.7/".to_string()
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            bind = "127.0.0.1:9000"

            [storage]
            temporary_max_age_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert!(config.server.tls.is_none());
        assert_eq!(config.storage.temporary_max_age_secs, 60);
        assert_eq!(config.storage.public_base_url, "/files");
        assert_eq!(config.web.viewer_script, "/pkg/cadview_viewer.js");
        assert_eq!(config.web.decoder_script(), "/draco/1.5.7/draco_decoder.js");
    }

    #[test]
    fn test_decoder_path_without_slash() {
        let config: Config = toml::from_str(
            r#"
            [web]
            decoder_path = "/static/draco"
            "#,
        )
        .unwrap();
        assert_eq!(config.web.decoder_script(), "/static/draco/draco_decoder.js");
    }

    #[test]
    fn test_default_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadview.toml");
        save_default_config(&path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.server.bind, default_bind());
        assert_eq!(loaded.storage.max_upload_bytes, default_max_upload());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.storage.gc_interval_secs, default_gc_interval());
    }
}
