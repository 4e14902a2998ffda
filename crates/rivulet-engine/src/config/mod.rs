//! Pipeline configuration: JSON document types, parsing and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_duration, parse_pipeline, parse_pipeline_str, substitute_env_vars};
pub use types::{ComponentConfig, PipelineConfig, RuntimeConfig, StageConfig};
pub use validator::validate_pipeline;
