//! Semantic validation for parsed pipeline configuration values.

use anyhow::{bail, Result};

use crate::config::types::PipelineConfig;

/// Validate a parsed pipeline configuration.
///
/// Every problem is collected before failing, so one run reports them all.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.buffer_size == 0 {
        errors.push("buffer_size must be at least 1".to_string());
    }

    if config.concurrency == 0 {
        errors.push("concurrency must be at least 1".to_string());
    }

    if config.source.kind.trim().is_empty() {
        errors.push("Source type must not be empty".to_string());
    }

    if config.sink.kind.trim().is_empty() {
        errors.push("Sink type must not be empty".to_string());
    }

    for (i, stage) in config.stages.iter().enumerate() {
        if stage.kind.trim().is_empty() {
            errors.push(format!("stages[{i}]: type must not be empty"));
        }
        if stage.workers == Some(0) {
            errors.push(format!("stages[{i}]: workers must be at least 1"));
        }
    }

    if !errors.is_empty() {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn base() -> PipelineConfig {
        parse_pipeline_str(
            r#"{
                "name": "words",
                "source": {"type": "stdin"},
                "stages": [{"type": "uppercase", "workers": 2}],
                "sink": {"type": "stdout"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_pipeline(&base()).is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut config = base();
        config.name = "  ".into();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("name must not be empty"));
    }

    #[test]
    fn zero_sizes_rejected() {
        let mut config = base();
        config.buffer_size = 0;
        config.concurrency = 0;
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("buffer_size"));
        assert!(err.contains("concurrency"));
    }

    #[test]
    fn stage_problems_are_indexed() {
        let mut config = base();
        config.stages[0].kind = String::new();
        config.stages[0].workers = Some(0);
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("stages[0]: type must not be empty"));
        assert!(err.contains("stages[0]: workers must be at least 1"));
    }

    #[test]
    fn all_errors_reported_at_once() {
        let mut config = base();
        config.name = String::new();
        config.source.kind = String::new();
        config.sink.kind = String::new();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.starts_with("Pipeline validation failed:"));
        assert_eq!(err.matches("\n  - ").count(), 3);
    }
}
