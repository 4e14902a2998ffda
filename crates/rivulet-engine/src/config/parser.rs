//! Pipeline JSON parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::config::types::PipelineConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Replace every `${VAR_NAME}` with the variable's value.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            missing.push(caps[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

/// Parse a duration such as `"250ms"`, `"2s"` or `"1m"`.
///
/// A bare integer is read as nanoseconds, matching the integer form of
/// `retry_delay`.
///
/// # Errors
///
/// Returns an error for an empty string, a non-integer amount, or an
/// unknown unit.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (amount, unit) = s.split_at(split);
    if amount.is_empty() {
        bail!("invalid duration '{input}': expected <integer>[ns|ms|s|m]");
    }
    let amount: u64 = amount
        .parse()
        .with_context(|| format!("invalid duration amount in '{input}'"))?;

    let duration = match unit.trim() {
        "" | "ns" => Duration::from_nanos(amount),
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        other => bail!("invalid duration unit '{other}' in '{input}', expected ns, ms, s or m"),
    };
    Ok(duration)
}

/// Parse a pipeline JSON string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the JSON is invalid.
pub fn parse_pipeline_str(json: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(json)?;
    let config: PipelineConfig =
        serde_json::from_str(&substituted).context("Failed to parse pipeline JSON")?;
    Ok(config)
}

/// Parse a pipeline JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
}
