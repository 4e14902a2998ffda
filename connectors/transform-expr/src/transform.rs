//! Compiled rule set and the [`Stage`] implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rhai::{Dynamic, Engine, Scope, AST};
use rivulet_sdk::prelude::*;

use crate::coerce::{coerce, to_dynamic, CoerceError};
use crate::config::{TransformConfig, TransformRule};

/// A rule that was left out of the active set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rule {target}: {message}")]
pub struct RuleCompileError {
    pub target: String,
    pub message: String,
}

struct CompiledRule {
    target: String,
    field_type: FieldType,
    required: bool,
    ast: AST,
}

/// Evaluates every active rule against each input record.
///
/// Rules only see the input fields, never each other's results, so the
/// output depends on the input record alone.
pub struct ExprTransform {
    engine: Engine,
    rules: Vec<CompiledRule>,
}

// The variable hook is flagged as a volatile API upstream.
#[allow(deprecated)]
fn build_engine(max_operations: u64) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(max_operations);
    engine.on_var(|name, _index, context| {
        if context.scope().contains(name) {
            Ok(None)
        } else {
            Ok(Some(Dynamic::UNIT))
        }
    });
    engine
}

impl ExprTransform {
    /// Compile every rule once.
    ///
    /// Rules that fail to compile, have an empty target, or repeat an earlier
    /// target are skipped and reported in the returned list.
    #[must_use]
    pub fn new(config: TransformConfig) -> (Self, Vec<RuleCompileError>) {
        let engine = build_engine(config.max_operations);
        let mut rules = Vec::with_capacity(config.rules.len());
        let mut errors = Vec::new();
        let mut targets = HashSet::new();

        for TransformRule {
            target,
            expr,
            field_type,
            required,
        } in config.rules
        {
            let rejected = if target.is_empty() {
                Some("target must not be empty".to_string())
            } else if targets.contains(&target) {
                Some("duplicate target".to_string())
            } else {
                match engine.compile(&expr) {
                    Ok(ast) => {
                        targets.insert(target.clone());
                        rules.push(CompiledRule {
                            target: target.clone(),
                            field_type,
                            required,
                            ast,
                        });
                        None
                    }
                    Err(e) => Some(e.to_string()),
                }
            };
            if let Some(message) = rejected {
                tracing::warn!(rule = %target, error = %message, "skipping transform rule");
                errors.push(RuleCompileError { target, message });
            }
        }

        (Self { engine, rules }, errors)
    }

    /// Like [`ExprTransform::new`] but rejects the config on the first bad rule.
    ///
    /// # Errors
    ///
    /// Returns a `Config` category error naming the rule.
    pub fn try_new(config: TransformConfig) -> Result<Self, ConnectorError> {
        let (transform, errors) = Self::new(config);
        match errors.into_iter().next() {
            Some(err) => Err(ConnectorError::config("RULE_COMPILE", err.to_string())),
            None => Ok(transform),
        }
    }

    /// Number of rules that compiled.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Build the output record for `input`.
    ///
    /// # Errors
    ///
    /// `RULE_EVAL` when a required rule fails to evaluate, `RULE_COERCE` when
    /// any result cannot be stored as its declared type.
    pub fn apply(&self, input: &Record) -> Result<Record, ConnectorError> {
        let mut scope = Scope::new();
        for (name, value) in &input.data {
            scope.push_constant_dynamic(name.as_str(), to_dynamic(value));
        }
        let base = scope.len();

        let mut fields = Vec::with_capacity(self.rules.len());
        let mut data = HashMap::with_capacity(self.rules.len());

        for rule in &self.rules {
            let result = self.engine.eval_ast_with_scope::<Dynamic>(&mut scope, &rule.ast);
            // Drop anything the script declared.
            scope.rewind(base);

            let raw = match result {
                Ok(raw) => raw,
                Err(e) if rule.required => {
                    return Err(ConnectorError::data(
                        "RULE_EVAL",
                        format!("execute rule {}: {e}", rule.target),
                    ));
                }
                Err(e) => {
                    tracing::debug!(rule = %rule.target, error = %e, "optional rule skipped");
                    continue;
                }
            };

            let value = coerce(raw, rule.field_type).map_err(|e| {
                let detail = match e {
                    CoerceError::Mismatch { expected, actual } => {
                        format!("cannot convert {actual} to {expected}")
                    }
                    CoerceError::Unsupported(ty) => format!("unsupported type {ty}"),
                };
                ConnectorError::data(
                    "RULE_COERCE",
                    format!("convert value for {}: {detail}", rule.target),
                )
            })?;

            fields.push(Field::new(rule.target.as_str(), rule.field_type, rule.required));
            data.insert(rule.target.clone(), value);
        }

        let mut output = Record::new(Arc::new(Schema::new(fields)?)).with_timestamp(input.timestamp);
        output.data = data;
        output.version = input.version;
        Ok(output)
    }
}

#[async_trait]
impl Stage for ExprTransform {
    fn name(&self) -> &str {
        "transform"
    }

    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
        let Some(record) = message.payload.as_record() else {
            return Err(ConnectorError::data(
                "NOT_A_RECORD",
                format!("transform expects a record payload, got {}", message.payload.kind()),
            ));
        };
        let output = self.apply(record)?;
        Ok(Some(message.derive(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(target: &str, expr: &str, ty: FieldType) -> TransformRule {
        TransformRule::new(target, expr, ty)
    }

    fn person() -> Record {
        let schema = Schema::new(vec![
            Field::required("first_name", FieldType::String),
            Field::required("age", FieldType::Int64),
        ])
        .unwrap();
        Record::new(Arc::new(schema))
            .with("first_name", "John")
            .with("age", 30_i64)
    }

    #[test]
    fn compile_errors_are_reported_not_fatal() {
        let (transform, errors) = ExprTransform::new(TransformConfig::new(vec![
            rule("ok", "age + 1", FieldType::Int64),
            rule("bad", "age +", FieldType::Int64),
            rule("", "1", FieldType::Int64),
            rule("ok", "2", FieldType::Int64),
        ]));
        assert_eq!(transform.rule_count(), 1);
        let targets: Vec<_> = errors.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, ["bad", "", "ok"]);
        assert_eq!(errors[2].message, "duplicate target");
    }

    #[test]
    fn try_new_fails_fast() {
        let err = ExprTransform::try_new(TransformConfig::new(vec![rule(
            "bad",
            "(",
            FieldType::Int64,
        )]))
        .err()
        .unwrap();
        assert_eq!(err.code, "RULE_COMPILE");
        assert!(err.message.starts_with("rule bad:"));
    }

    #[test]
    fn undefined_variables_are_unit() {
        let (transform, _) = ExprTransform::new(TransformConfig::new(vec![rule(
            "missing",
            "type_of(nickname)",
            FieldType::String,
        )]));
        let out = transform.apply(&person()).unwrap();
        assert_eq!(out.get("missing"), Some(&Value::String("()".into())));
    }

    #[test]
    fn optional_failure_is_skipped_required_is_fatal() {
        let optional = rule("boom", r#"throw "nope""#, FieldType::String);
        let (transform, _) = ExprTransform::new(TransformConfig::new(vec![
            optional.clone(),
            rule("age_next", "age + 1", FieldType::Int64),
        ]));
        let out = transform.apply(&person()).unwrap();
        assert!(out.get("boom").is_none());
        assert!(out.schema.field("boom").is_none());
        assert_eq!(out.get("age_next"), Some(&Value::Int64(31)));

        let (transform, _) = ExprTransform::new(TransformConfig::new(vec![optional.required()]));
        let err = transform.apply(&person()).unwrap_err();
        assert_eq!(err.code, "RULE_EVAL");
        assert!(err.message.starts_with("execute rule boom:"));
    }

    #[test]
    fn coercion_error_ignores_required() {
        let (transform, _) = ExprTransform::new(TransformConfig::new(vec![rule(
            "flag",
            "age",
            FieldType::Boolean,
        )]));
        let err = transform.apply(&person()).unwrap_err();
        assert_eq!(err.code, "RULE_COERCE");
        assert_eq!(err.message, "convert value for flag: cannot convert i64 to boolean");

        let (transform, _) = ExprTransform::new(TransformConfig::new(vec![rule(
            "blob",
            "age",
            FieldType::Json,
        )]));
        let err = transform.apply(&person()).unwrap_err();
        assert_eq!(err.message, "convert value for blob: unsupported type json");
    }

    #[test]
    fn rules_cannot_see_each_other_or_mutate_input() {
        let (transform, errors) = ExprTransform::new(TransformConfig::new(vec![
            rule("first", "let tmp = 5; tmp", FieldType::Int64),
            rule("second", "type_of(tmp)", FieldType::String),
            rule("third", "type_of(first)", FieldType::String),
            rule("assign", "age = 1; age", FieldType::Int64),
        ]));
        assert!(errors.is_empty());
        let input = person();
        let out = transform.apply(&input).unwrap();
        assert_eq!(out.get("first"), Some(&Value::Int64(5)));
        assert_eq!(out.get("second"), Some(&Value::String("()".into())));
        assert_eq!(out.get("third"), Some(&Value::String("()".into())));
        assert!(out.get("assign").is_none());
        assert_eq!(input.get("age"), Some(&Value::Int64(30)));
    }

    #[test]
    fn runaway_expression_is_bounded() {
        let mut config = TransformConfig::new(vec![
            rule("spin", "loop { }", FieldType::Int64).required()
        ]);
        config.max_operations = 1_000;
        let (transform, _) = ExprTransform::new(config);
        let err = transform.apply(&person()).unwrap_err();
        assert_eq!(err.code, "RULE_EVAL");
    }

    #[tokio::test]
    async fn non_record_payload_rejected() {
        let (transform, _) = ExprTransform::new(TransformConfig::new(Vec::new()));
        let err = transform
            .process(&Message::new(json!("plain")))
            .await
            .unwrap_err();
        assert_eq!(err.code, "NOT_A_RECORD");
    }
}
