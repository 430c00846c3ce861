//! Application configuration. API credentials, paths, web port.
//!
//! A single YAML file plus `TG_EXPORT_*` environment overrides; missing keys
//! take defaults. An older flat `key=value` format is migrated on first read
//! and rewritten in YAML form.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    // Telegram API credentials (https://my.telegram.org).
    pub api_id: i32,
    pub api_hash: String,
    pub bot_token: String,

    // Web layer (authentication itself terminates in front of the engine).
    pub admin_password: String,
    pub web_port: u16,
    pub secret_key: String,

    // Paths.
    pub data_dir: String,
    pub export_dir: String,
    pub session_path: Option<String>,

    pub log_level: String,

    // Delegated downloader; empty binary disables the integration.
    pub tdl_binary: String,

    // Transport.
    pub ipv6: bool,
    pub proxy_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            bot_token: String::new(),
            admin_password: String::new(),
            web_port: 9528,
            secret_key: String::new(),
            data_dir: "./data".into(),
            export_dir: "./data/exports".into(),
            session_path: None,
            log_level: "info".into(),
            tdl_binary: String::new(),
            ipv6: false,
            proxy_url: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let path =
            std::env::var("TG_EXPORT_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
        if let Err(e) = migrate_legacy_file(Path::new(&path)) {
            tracing::warn!(path = %path, error = %e, "legacy config migration failed");
        }
        let cfg = config::Config::builder()
            .add_source(config::File::new(&path, config::FileFormat::Yaml).required(false))
            .add_source(config::Environment::with_prefix("TG_EXPORT"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn export_path(&self) -> PathBuf {
        PathBuf::from(&self.export_dir)
    }

    pub fn session_file(&self) -> PathBuf {
        self.session_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_path().join("session.db"))
    }
}

/// True when the file is the pre-YAML flat `KEY=value` form.
fn looks_like_legacy(content: &str) -> bool {
    let mut has_assignments = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.contains(':') && !line.contains('=') {
            return false;
        }
        if line.contains('=') {
            has_assignments = true;
        }
    }
    has_assignments
}

/// Render the flat form as YAML: lowercased keys, bare scalars for numbers
/// and booleans, quoted strings otherwise. Unknown keys are carried over;
/// the deserializer ignores what it does not recognise.
fn legacy_to_yaml(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        let rendered = if value.parse::<i64>().is_ok() || value.parse::<f64>().is_ok() {
            value.to_string()
        } else if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
            value.to_ascii_lowercase()
        } else {
            format!("\"{}\"", value.replace('"', "\\\""))
        };
        out.push_str(&format!("{key}: {rendered}\n"));
    }
    out
}

/// Silently migrate an old flat key/value configuration file into the
/// current YAML form, in place.
fn migrate_legacy_file(path: &Path) -> std::io::Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !looks_like_legacy(&content) {
        return Ok(());
    }
    let yaml = legacy_to_yaml(&content);
    let temp = path.with_extension("yaml.tmp");
    std::fs::write(&temp, &yaml)?;
    std::fs::rename(&temp, path)?;
    tracing::info!(path = %path.display(), "legacy configuration migrated to YAML");
    Ok(())
}
