//! Configuration validation
//!
//! Every configuration section implements [`Validatable`]; `PipelineConfig`
//! validates its sections in order and fails on the first violation.

use super::error::{ConfigError, ConfigResult};
use crate::llm::GenerationOptions;

/// Trait for validatable configuration objects
pub trait Validatable {
    /// Returns `Ok(())` if valid, `Err(ConfigError)` with details if invalid.
    fn validate(&self) -> ConfigResult<()>;
}

pub(crate) fn check_range<T>(field: &str, value: T, min: T, max: T, hint: &str) -> ConfigResult<()>
where
    T: PartialOrd + ToString + Copy,
{
    // Written positively so NaN fails
    let in_range = value >= min && value <= max;
    if !in_range {
        return Err(ConfigError::range_with_hint(field, value, min, max, hint));
    }
    Ok(())
}

/// Validate one agent's generation options; `prefix` names the section.
pub(crate) fn check_generation(prefix: &str, options: &GenerationOptions) -> ConfigResult<()> {
    check_range(
        &format!("{prefix}.max_output_tokens"),
        options.max_output_tokens,
        1,
        200_000,
        "Output budget must be positive",
    )?;
    check_range(
        &format!("{prefix}.temperature"),
        options.temperature,
        0.0,
        2.0,
        "Use a low temperature (0.0-0.3) for code conversion",
    )?;
    check_range(
        &format!("{prefix}.top_p"),
        options.top_p,
        0.0,
        1.0,
        "top_p is a probability mass",
    )
}

/// `com.example.app` style package: dot-separated identifiers.
pub(crate) fn is_java_package(package: &str) -> bool {
    !package.is_empty()
        && package.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                _ => false,
            }
        })
}
