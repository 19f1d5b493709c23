//! TOML configuration parsing and validation.
//!
//! A configuration names the Synapse server to talk to, how objects are
//! uploaded, which files a directory scan considers, and the ordered list
//! of asset mappings that decide what each file is.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::checksum::ChecksumType;
use crate::mapping::AssetMapping;

/// Built-in configuration written by `init` and on first use.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config/synapse-upload.toml");

/// Environment variable holding a session cookie; wins over the credential file.
pub const COOKIE_ENV: &str = "SYNAPSE_COOKIE";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub asset_mappings: Vec<AssetMappingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub host: String,
    #[serde(default = "default_catalog_id")]
    pub catalog_id: String,
    #[serde(default)]
    pub credential_file: Option<PathBuf>,
}

fn default_protocol() -> String {
    "https".to_string()
}
fn default_catalog_id() -> String {
    "1".to_string()
}

impl ServerConfig {
    /// `protocol://host`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_object_root")]
    pub object_root: String,
    #[serde(default = "default_namespace_column")]
    pub namespace_column: String,
    #[serde(default = "default_true")]
    pub chunked: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub create_parents: bool,
    #[serde(default)]
    pub allow_versioning: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            object_root: default_object_root(),
            namespace_column: default_namespace_column(),
            chunked: true,
            chunk_size: default_chunk_size(),
            create_parents: false,
            allow_versioning: false,
        }
    }
}

fn default_object_root() -> String {
    "/hatrac/Zf".to_string()
}
fn default_namespace_column() -> String {
    "Subject".to_string()
}
fn default_true() -> bool {
    true
}
fn default_chunk_size() -> u64 {
    25 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

/// One `[[asset_mappings]]` entry as written in the file.
#[derive(Debug, Deserialize, Clone)]
pub struct AssetMappingConfig {
    pub file_pattern: String,
    #[serde(default = "default_checksum_types")]
    pub checksum_types: Vec<ChecksumType>,
    pub synapse_file_type: String,
    pub query_url_template: String,
    pub base_record_type: Vec<String>,
    #[serde(default)]
    pub url_tracking_column: Option<String>,
}

fn default_checksum_types() -> Vec<ChecksumType> {
    vec![ChecksumType::Md5]
}

impl Config {
    /// Compile the asset mappings in declared order.
    pub fn rules(&self) -> Result<Vec<AssetMapping>> {
        self.asset_mappings
            .iter()
            .enumerate()
            .map(|(i, m)| {
                AssetMapping::compile(m)
                    .with_context(|| format!("asset_mappings[{}] ({})", i, m.synapse_file_type))
            })
            .collect()
    }

    /// Session cookie for the configured host, if any.
    ///
    /// `SYNAPSE_COOKIE` wins; otherwise the credential file is consulted.
    pub fn credential(&self) -> Result<Option<String>> {
        if let Ok(cookie) = std::env::var(COOKIE_ENV) {
            if !cookie.is_empty() {
                return Ok(Some(cookie));
            }
        }
        let Some(path) = &self.server.credential_file else {
            return Ok(None);
        };
        let path = expand_home(path);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credential file: {}", path.display()))?;
        cookie_from_credentials(&content, &self.server.host)
            .with_context(|| format!("Failed to parse credential file: {}", path.display()))
    }
}

/// Extract `{"<host>": {"cookie": "..."}}` from a deriva-style credential file.
fn cookie_from_credentials(content: &str, host: &str) -> Result<Option<String>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if !value.is_object() {
        bail!("credential file must contain a JSON object keyed by host");
    }
    Ok(value
        .get(host)
        .and_then(|entry| entry.get("cookie"))
        .and_then(|c| c.as_str())
        .map(str::to_string))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Load the config at `path`, first writing the built-in default there if
/// the file does not exist yet.
pub fn load_or_create_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        write_default_config(path, false)?;
        tracing::info!(path = %path.display(), "created default configuration");
    }
    load_config(path)
}

pub fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

pub fn default_config() -> Result<Config> {
    parse_config(DEFAULT_CONFIG_TOML)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    match config.server.protocol.as_str() {
        "http" | "https" => {}
        other => bail!("server.protocol must be http or https, got '{}'", other),
    }
    if config.server.host.trim().is_empty() {
        bail!("server.host must not be empty");
    }

    if config.upload.chunk_size == 0 {
        bail!("upload.chunk_size must be > 0");
    }
    if !config.upload.object_root.starts_with('/') {
        bail!(
            "upload.object_root must be an absolute path, got '{}'",
            config.upload.object_root
        );
    }

    if config.asset_mappings.is_empty() {
        bail!("at least one [[asset_mappings]] entry is required");
    }
    // Compiling checks patterns, templates, record types, and checksums.
    config.rules()?;

    Ok(config)
}

/// `~/.deriva/synapse/synapse-upload/config.toml`
pub fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deriva")
        .join("synapse")
        .join("synapse-upload")
        .join("config.toml")
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().map(|h| h.join(rest)).unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[server]
host = "synapse.example.org"

[[asset_mappings]]
file_pattern = '^(?P<ID>Bhv[^.]+)\.m4v$'
synapse_file_type = "behavior movie"
query_url_template = "/entity/Zebrafish:Behavior/ID={ID}"
base_record_type = ["Zebrafish", "Behavior"]
url_tracking_column = "Raw URL"
"#;

    #[test]
    fn builtin_default_parses_with_five_rules() {
        let cfg = default_config().unwrap();
        let rules = cfg.rules().unwrap();
        assert_eq!(rules.len(), 5);
        assert_eq!(rules[0].synapse_file_type(), "behavior movie");
        assert_eq!(rules[2].url_tracking_column(), None);
        assert!(!cfg.upload.allow_versioning);
        assert!(cfg.upload.create_parents);
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.server.base_url(), "https://synapse.example.org");
        assert_eq!(cfg.server.catalog_id, "1");
        assert_eq!(cfg.upload.chunk_size, 25 * 1024 * 1024);
        assert!(!cfg.upload.create_parents);
        assert!(!cfg.upload.allow_versioning);
        assert_eq!(cfg.asset_mappings[0].checksum_types, vec![ChecksumType::Md5]);
        assert_eq!(cfg.scan.include_globs, vec!["**/*".to_string()]);
    }

    #[test]
    fn rejects_unknown_template_placeholder() {
        let bad = MINIMAL.replace("ID={ID}", "ID={Name}");
        let err = parse_config(&bad).unwrap_err();
        assert!(format!("{:#}", err).contains("Name"), "{:#}", err);
    }

    #[test]
    fn rejects_bad_protocol_and_chunk_size() {
        let bad = MINIMAL.replace("[server]", "[server]\nprotocol = \"ftp\"");
        assert!(parse_config(&bad).is_err());

        let bad = format!("{}\n[upload]\nchunk_size = 0\n", MINIMAL);
        assert!(parse_config(&bad).is_err());
    }

    #[test]
    fn rejects_empty_rule_set() {
        let err = parse_config("[server]\nhost = \"h\"\n").unwrap_err();
        assert!(err.to_string().contains("asset_mappings"));
    }

    #[test]
    fn cookie_is_looked_up_by_host() {
        let creds = r#"{"synapse.example.org": {"cookie": "webauthn=abc"}}"#;
        assert_eq!(
            cookie_from_credentials(creds, "synapse.example.org").unwrap(),
            Some("webauthn=abc".to_string())
        );
        assert_eq!(cookie_from_credentials(creds, "other.org").unwrap(), None);
        assert!(cookie_from_credentials("[]", "h").is_err());
    }

    #[test]
    fn write_default_refuses_to_overwrite() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        write_default_config(&path, false).unwrap();
        assert!(write_default_config(&path, false).is_err());
        write_default_config(&path, true).unwrap();
        assert!(load_config(&path).is_ok());
    }
}
