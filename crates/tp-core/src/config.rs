//! Environment Configuration Loader
//!
//! Loads environment variables from the canonical location: `/etc/tp-client/environment`
//! and builds the [`ClientConfig`] used by transports and tools.
//!
//! ## Usage
//!
//! Call `load_environment()` early in main() before reading any config:
//!
//! ```rust,no_run
//! use tp_core::config::{load_environment, ClientConfig};
//!
//! load_environment();
//! let config = ClientConfig::from_env();
//! println!("using the {} bus", config.bus_type);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::BusType;

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/tp-client/environment";

/// Fallback locations, tried after `TP_ENV_FILE`
pub const ENV_FILE_PATHS: &[&str] = &[DEFAULT_ENV_FILE, "/etc/tp-client.env", ".env"];

/// Default timeout for a single remote call
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 25_000;

/// Load `KEY=VALUE` pairs from the first readable environment file.
///
/// Variables already present in the process environment win over the file.
/// Returns the file that was applied.
pub fn load_environment() -> Option<PathBuf> {
    let loaded = candidate_paths().into_iter().find_map(|path| {
        let content = fs::read_to_string(&path)
            .map_err(|err| {
                if path.exists() {
                    warn!(path = %path.display(), error = %err, "Unreadable environment file");
                }
            })
            .ok()?;
        apply_env_file(&path, &content);
        Some(path)
    });
    if loaded.is_none() {
        debug!("No environment file, keeping the process environment");
    }
    loaded
}

fn candidate_paths() -> Vec<PathBuf> {
    std::env::var_os("TP_ENV_FILE")
        .map(PathBuf::from)
        .into_iter()
        .chain(ENV_FILE_PATHS.iter().map(PathBuf::from))
        .collect()
}

fn apply_env_file(path: &Path, content: &str) {
    let (mut applied, mut kept) = (0usize, 0usize);
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(key).is_some() {
            kept += 1;
            continue;
        }
        std::env::set_var(key, value);
        applied += 1;
    }
    info!(path = %path.display(), applied, kept, "Applied environment file");
}

/// Split `[export ]KEY=VALUE`, dropping one level of matching quotes
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let (key, value) = line.trim_start_matches("export ").split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q));
    Some((key, unquoted.unwrap_or(value)))
}

/// Value of `key`, treating an empty variable as unset
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn get_config_int(key: &str, default: i64) -> i64 {
    get_config_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Settings shared by the transport and the command line tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bus the service lives on
    pub bus_type: BusType,
    /// Well-known or unique name of the remote service
    pub service: Option<String>,
    /// Per-call timeout applied by the transport
    pub call_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bus_type: BusType::Session,
            service: None,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Read `TP_BUS`, `TP_SERVICE` and `TP_CALL_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bus_type = match get_config_opt("TP_BUS") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("Ignoring TP_BUS: {}", e);
                defaults.bus_type
            }),
            None => defaults.bus_type,
        };

        let call_timeout_ms = get_config_int("TP_CALL_TIMEOUT_MS", defaults.call_timeout_ms as i64);

        Self {
            bus_type,
            service: get_config_opt("TP_SERVICE"),
            call_timeout_ms: u64::try_from(call_timeout_ms).unwrap_or(defaults.call_timeout_ms),
        }
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.call_timeout_ms)
    }
}
