use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::embedding::EmbeddingSettings;
use crate::pipeline::OrchestratorSettings;
use crate::pipeline::sanitize::{CleaningOptions, DEFAULT_MAX_CONTENT_CHARS};
use crate::pipeline::stages::{StageSettings, ValidationPolicy};

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Deterministic offline feature hashing.
    Hashing,
    /// Local Ollama runtime.
    Ollama,
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hashing" => Ok(Self::Hashing),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Runtime configuration of the versepipe binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root of the artifact store.
    pub artifact_dir: PathBuf,
    /// Root of per-run scratch directories.
    pub temp_dir: PathBuf,
    /// Embedding backend.
    pub embedding_provider: EmbeddingProvider,
    /// Model assigned to collections that do not name one.
    pub embedding_model: String,
    /// Vector dimension produced by the hashing provider.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Texts per embedding backend call.
    pub embedding_batch_size: usize,
    /// Embedding backend calls in flight.
    pub embedding_workers: usize,
    /// Upper bound on one embedding backend call.
    pub embedding_timeout: Duration,
    /// Upper bound on reading one source file.
    pub io_timeout: Duration,
    /// Optional upper bound on one stage.
    pub stage_timeout: Option<Duration>,
    /// Smallest share of valid documents that lets a run continue.
    pub min_valid_ratio: f64,
    /// Longest document the cleaner accepts; `None` disables the limit.
    pub max_content_chars: Option<usize>,
    /// Report completed runs with warnings as partial.
    pub partial_on_warnings: bool,
}

impl Config {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            artifact_dir = %config.artifact_dir.display(),
            embedding_provider = ?config.embedding_provider,
            embedding_model = %config.embedding_model,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let embedding_provider = match get("EMBEDDING_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| invalid("EMBEDDING_PROVIDER", &value))?,
            None => EmbeddingProvider::Hashing,
        };

        let min_valid_ratio = parse_or(&get, "VALIDATION_MIN_VALID_RATIO", 0.0_f64)?;
        if !(0.0..=1.0).contains(&min_valid_ratio) {
            return Err(invalid(
                "VALIDATION_MIN_VALID_RATIO",
                &min_valid_ratio.to_string(),
            ));
        }

        let embedding_dimension = parse_or(&get, "EMBEDDING_DIMENSION", 384_usize)?;
        if embedding_dimension == 0 {
            return Err(invalid("EMBEDDING_DIMENSION", "0"));
        }

        let max_content_chars =
            match parse_or(&get, "CLEANING_MAX_CONTENT_CHARS", DEFAULT_MAX_CONTENT_CHARS)? {
                0 => None,
                limit => Some(limit),
            };

        Ok(Self {
            artifact_dir: get("VERSEPIPE_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("artifacts")),
            temp_dir: get("VERSEPIPE_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("versepipe")),
            embedding_provider,
            embedding_model: get("EMBEDDING_MODEL").unwrap_or_else(|| "hashing-v1".to_string()),
            embedding_dimension,
            ollama_url: get("OLLAMA_URL").unwrap_or_else(|| "http://localhost:11434".to_string()),
            embedding_batch_size: parse_or(&get, "EMBEDDING_BATCH_SIZE", 32_usize)?.max(1),
            embedding_workers: parse_or(&get, "EMBEDDING_WORKERS", 4_usize)?.max(1),
            embedding_timeout: Duration::from_secs(parse_or(&get, "EMBEDDING_TIMEOUT_SECS", 30)?),
            io_timeout: Duration::from_secs(parse_or(&get, "IO_TIMEOUT_SECS", 30)?),
            stage_timeout: parse_optional::<u64>(&get, "STAGE_TIMEOUT_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            min_valid_ratio,
            max_content_chars,
            partial_on_warnings: parse_or(&get, "PIPELINE_PARTIAL_ON_WARNINGS", true)?,
        })
    }

    /// Settings for the built-in stages.
    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            io_timeout: self.io_timeout,
            validation: ValidationPolicy {
                min_valid_ratio: self.min_valid_ratio,
            },
            cleaning: CleaningOptions {
                max_content_chars: self.max_content_chars,
            },
        }
    }

    /// Settings for the embedding service.
    pub fn embedding_settings(&self) -> EmbeddingSettings {
        EmbeddingSettings {
            batch_size: self.embedding_batch_size,
            workers: self.embedding_workers,
            timeout: self.embedding_timeout,
        }
    }

    /// Settings for the orchestrator.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            stage_timeout: self.stage_timeout,
            partial_on_warnings: self.partial_on_warnings,
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_optional<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    get(key)
        .map(|value| value.trim().parse().map_err(|_| invalid(key, &value)))
        .transpose()
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_optional(get, key)?.unwrap_or(default))
}
