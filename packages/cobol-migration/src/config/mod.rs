//! Pipeline configuration
//!
//! Defaults cover the common case; a versioned YAML file can override any
//! section, and a handful of environment variables override the settings
//! that are usually tuned per deployment.
//!
//! ```yaml
//! version: 1
//! retry:
//!   max_attempts: 5
//! transformation:
//!   target_package: com.acme.payroll
//! ```

pub mod error;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use validation::Validatable;

use crate::llm::GenerationOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validation::{check_generation, check_range, is_java_package};

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

pub const ENV_MAX_ATTEMPTS: &str = "COBOL_MIGRATION_MAX_ATTEMPTS";
pub const ENV_BASE_DELAY_MS: &str = "COBOL_MIGRATION_BASE_DELAY_MS";
pub const ENV_TARGET_PACKAGE: &str = "COBOL_MIGRATION_TARGET_PACKAGE";

/// Retry policy for every LLM call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Validatable for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        check_range(
            "retry.max_attempts",
            self.max_attempts,
            1,
            10,
            "3 attempts is usually enough for transient upstream failures",
        )?;
        check_range(
            "retry.base_delay_ms",
            self.base_delay_ms,
            0,
            600_000,
            "Backoff doubles per attempt, keep the base small",
        )
    }
}

/// Generation parameters per agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub insight: GenerationOptions,
    pub analysis: GenerationOptions,
    pub transformation: GenerationOptions,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            insight: GenerationOptions {
                max_output_tokens: 2_048,
                temperature: 0.1,
                top_p: 0.5,
            },
            analysis: GenerationOptions {
                max_output_tokens: 4_096,
                temperature: 0.1,
                top_p: 0.5,
            },
            transformation: GenerationOptions {
                max_output_tokens: 16_384,
                temperature: 0.1,
                top_p: 0.5,
            },
        }
    }
}

impl Validatable for GenerationConfig {
    fn validate(&self) -> ConfigResult<()> {
        check_generation("generation.insight", &self.insight)?;
        check_generation("generation.analysis", &self.analysis)?;
        check_generation("generation.transformation", &self.transformation)
    }
}

/// Transformation stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformationConfig {
    /// Java package the generated classes should live in
    pub target_package: String,
    /// Upper bound for referenced module text embedded in one prompt
    pub max_context_chars: usize,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            target_package: "com.example.migrated".to_string(),
            max_context_chars: 60_000,
        }
    }
}

impl Validatable for TransformationConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !is_java_package(&self.target_package) {
            return Err(ConfigError::InvalidPackage(self.target_package.clone()));
        }
        Ok(())
    }
}

/// Which files count as programs and which as modules (copybooks)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub program_extensions: Vec<String>,
    pub module_extensions: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            program_extensions: vec!["cbl".to_string(), "cob".to_string()],
            module_extensions: vec!["cpy".to_string(), "copy".to_string()],
        }
    }
}

impl SourceConfig {
    pub fn is_program(&self, extension: &str) -> bool {
        self.program_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub fn is_module(&self, extension: &str) -> bool {
        self.module_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }
}

impl Validatable for SourceConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.program_extensions.is_empty() {
            return Err(ConfigError::empty("sources.program_extensions"));
        }
        if self.module_extensions.is_empty() {
            return Err(ConfigError::empty("sources.module_extensions"));
        }
        Ok(())
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub generation: GenerationConfig,
    pub transformation: TransformationConfig,
    pub sources: SourceConfig,
}

/// YAML schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    version: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry: Option<RetryConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    generation: Option<GenerationConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    transformation: Option<TransformationConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    sources: Option<SourceConfig>,
}

impl PipelineConfig {
    /// Load and validate a YAML configuration file
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(text)?;

        let version = file.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let config = Self {
            retry: file.retry.unwrap_or_default(),
            generation: file.generation.unwrap_or_default(),
            transformation: file.transformation.unwrap_or_default(),
            sources: file.sources.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            retry: Some(self.retry.clone()),
            generation: Some(self.generation.clone()),
            transformation: Some(self.transformation.clone()),
            sources: Some(self.sources.clone()),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    /// Apply `COBOL_MIGRATION_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment in production)
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = parse_env(ENV_MAX_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_BASE_DELAY_MS) {
            self.retry.base_delay_ms = parse_env(ENV_BASE_DELAY_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_TARGET_PACKAGE) {
            self.transformation.target_package = value.trim().to_string();
        }
        self.validate()
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

impl Validatable for PipelineConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.retry.validate()?;
        self.generation.validate()?;
        self.transformation.validate()?;
        self.sources.validate()
    }
}
