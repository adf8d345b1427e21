//! `config.toml` loading with `-c key=value` overrides.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use kala_session::AuthConfig;
use kala_session::ConfigError;
use serde::Deserialize;
use thiserror::Error;
use toml::Table;
use toml::Value;
use url::Url;

pub const CONFIG_FILE: &str = "config.toml";
pub const KALA_HOME_ENV_VAR: &str = "KALA_HOME";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid override `{0}`: expected key=value")]
    Override(String),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KalaConfig {
    /// Scheduler origin; the API lives under `/api/v1/`.
    pub api_origin: Url,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    pub auth: AuthConfig,
}

impl KalaConfig {
    /// Reads `path`, applies `overrides` on top and validates the result.
    pub fn load(path: &Path, overrides: &[(String, Value)]) -> Result<Self, ConfigLoadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let mut table: Table = toml::from_str(&contents).map_err(parse_error)?;
        for (key, value) in overrides {
            apply_override(&mut table, key, value.clone());
        }
        let config: KalaConfig = Value::Table(table).try_into().map_err(parse_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.api_origin.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "`api_origin` must be an http(s) URL (got `{}`)",
                self.api_origin
            )));
        }
        self.auth.validate()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// `api_origin` without the trailing slash `Url` always adds.
    pub fn api_origin(&self) -> &str {
        self.api_origin.as_str().trim_end_matches('/')
    }
}

/// `$KALA_HOME` when set, otherwise `~/.kala`.
pub fn find_kala_home() -> std::io::Result<PathBuf> {
    if let Ok(home) = std::env::var(KALA_HOME_ENV_VAR)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }
    let mut home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not find home directory",
        )
    })?;
    home.push(".kala");
    Ok(home)
}

/// `-c key=value` flags shared by every subcommand.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CliConfigOverrides {
    /// Override a configuration value, e.g. `-c auth.client_id="0oa..."`.
    /// The value is parsed as TOML and taken as a plain string when that
    /// fails. Dotted keys address nested tables.
    #[arg(
        short = 'c',
        long = "config-override",
        value_name = "key=value",
        global = true
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    pub fn parse_overrides(&self) -> Result<Vec<(String, Value)>, ConfigLoadError> {
        self.raw_overrides
            .iter()
            .map(|raw| {
                let (key, value) = raw
                    .split_once('=')
                    .ok_or_else(|| ConfigLoadError::Override(raw.clone()))?;
                let key = key.trim();
                if key.is_empty() {
                    return Err(ConfigLoadError::Override(raw.clone()));
                }
                Ok((key.to_string(), parse_toml_value(value.trim())))
            })
            .collect()
    }
}

fn parse_toml_value(raw: &str) -> Value {
    toml::from_str::<Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

fn apply_override(table: &mut Table, key: &str, value: Value) {
    let mut segments: Vec<&str> = key.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut current = table;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        let Value::Table(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}
