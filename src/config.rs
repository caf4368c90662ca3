//! Service configuration.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::labels::ModelKind;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_BODY_LIMIT_MB: usize = 5;

/// Where a single model's artifacts live.
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub kind: ModelKind,
    /// Frozen graph file, or a SavedModel directory.
    pub model_path: PathBuf,
    /// Keras model config JSON. Optional on disk.
    pub config_path: PathBuf,
    pub class_list_path: Option<PathBuf>,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
    pub fruit: ModelSource,
    pub leaf: ModelSource,
    pub input_op: String,
    pub output_op: String,
    pub include_treatment: bool,
    pub environment: String,
}

impl ServiceConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let body_limit_mb = parse_or(&lookup, "BODY_LIMIT_MB", DEFAULT_BODY_LIMIT_MB)?;
        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;
        let model_dir = lookup("MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./model"));

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            body_limit_bytes: body_limit_mb * 1024 * 1024,
            fruit: model_source(&lookup, &model_dir, ModelKind::Fruit),
            leaf: model_source(&lookup, &model_dir, ModelKind::Leaf),
            input_op: lookup("MODEL_INPUT_OP").unwrap_or_else(|| "x".into()),
            output_op: lookup("MODEL_OUTPUT_OP").unwrap_or_else(|| "Identity".into()),
            include_treatment: parse_bool(&lookup, "INCLUDE_TREATMENT", true)?,
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".into()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn model_source<F>(lookup: &F, model_dir: &Path, kind: ModelKind) -> ModelSource
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = kind.env_prefix();
    let stem = format!("apple_{}_model", kind.name());
    let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));

    ModelSource {
        kind,
        model_path: var("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join(format!("{stem}.pb"))),
        config_path: var("MODEL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join(format!("{stem}.json"))),
        class_list_path: var("CLASS_LIST").map(PathBuf::from),
        download_url: var("MODEL_URL"),
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
        None => Ok(default),
    }
}
