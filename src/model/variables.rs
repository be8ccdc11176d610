use std::collections::HashSet;

use indexmap::IndexMap;
use log::warn;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::diff::{flag, scalar_text, Reconcile};
use crate::error::{ConvergeError, Result};

const MAX_KEY_LENGTH: usize = 255;
const MAX_DESCRIPTION_LENGTH: usize = 255;
const RESERVED_PREFIXES: [&str; 2] = ["CI_", "GITLAB_"];
pub const DEFAULT_SCOPE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    EnvVar,
    File,
}

/// A CI/CD variable as declared in the config document.
///
/// Flags left out are materialized as `false` when the variable is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableSpec {
    pub key: Option<String>,
    #[serde(deserialize_with = "scalar_value")]
    pub value: String,
    pub description: Option<String>,
    pub environment_scope: Option<String>,
    pub masked: Option<bool>,
    pub protected: Option<bool>,
    pub raw: Option<bool>,
    pub variable_type: Option<VariableType>,
}

fn scalar_value<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_text(&value).ok_or_else(|| D::Error::custom("variable value must be a scalar"))
}

/// A fully materialized variable, identified by `(key, environment_scope)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
    pub environment_scope: String,
    pub masked: bool,
    pub protected: bool,
    pub raw: bool,
    pub variable_type: VariableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The remote withheld the value, so it cannot be compared.
    #[serde(skip)]
    pub value_hidden: bool,
}

impl Variable {
    /// Builds a validated variable from its declaration. `name` is the map key the
    /// declaration was found under; it becomes the upper-cased key when `key` is absent.
    pub fn from_spec(name: &str, spec: VariableSpec) -> Result<Self> {
        let key = spec.key.unwrap_or_else(|| name.to_uppercase());
        validate_key(&key)?;

        if let Some(description) = &spec.description {
            if description.chars().count() > MAX_DESCRIPTION_LENGTH {
                return Err(ConvergeError::Validation(format!(
                    "variable '{key}': description exceeds {MAX_DESCRIPTION_LENGTH} characters"
                )));
            }
        }

        let environment_scope = spec
            .environment_scope
            .filter(|scope| !scope.is_empty())
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string());

        Ok(Self {
            key,
            value: spec.value,
            environment_scope,
            masked: spec.masked.unwrap_or(false),
            protected: spec.protected.unwrap_or(false),
            raw: spec.raw.unwrap_or(false),
            variable_type: spec.variable_type.unwrap_or_default(),
            description: spec.description,
            value_hidden: false,
        })
    }

    /// Parses a variable record returned by the API, normalizing absent flags
    /// to `false`, a missing scope to `*` and numeric values to text. A `null`
    /// value marks a hidden variable.
    pub fn from_record(record: &Value) -> Result<Self> {
        let key = record
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| ConvergeError::Api(format!("variable record without key: {record}")))?
            .to_string();

        let variable_type = match record.get("variable_type").and_then(Value::as_str) {
            Some("file") => VariableType::File,
            _ => VariableType::EnvVar,
        };

        let environment_scope = record
            .get("environment_scope")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SCOPE)
            .to_string();

        let value = record.get("value").and_then(scalar_text);
        if value.is_none() {
            warn!("Variable {key} ({environment_scope}) has a hidden value; its value is not compared");
        }

        Ok(Self {
            value_hidden: value.is_none(),
            value: value.unwrap_or_default(),
            environment_scope,
            masked: flag(record.get("masked")),
            protected: flag(record.get("protected")),
            raw: flag(record.get("raw")),
            variable_type,
            description: record
                .get("description")
                .and_then(Value::as_str)
                .filter(|d| !d.is_empty())
                .map(ToString::to_string),
            key,
        })
    }

    /// Full request body for create and update calls.
    pub fn payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Reconcile for Variable {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.key.clone(), self.environment_scope.clone())
    }

    /// An undeclared description is not compared. A declared one compares with
    /// a missing remote description as the empty string.
    fn same_as(&self, actual: &Self) -> bool {
        let description_holds = self.description.as_deref().map_or(true, |wanted| {
            actual.description.as_deref().unwrap_or_default() == wanted
        });

        (actual.value_hidden || self.value == actual.value)
            && self.masked == actual.masked
            && self.protected == actual.protected
            && self.raw == actual.raw
            && self.variable_type == actual.variable_type
            && description_holds
    }
}

/// Checks a variable key against the charset, length and reserved prefix rules.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(ConvergeError::Validation(format!(
            "variable key '{key}' must be 1 to {MAX_KEY_LENGTH} characters"
        )));
    }

    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConvergeError::Validation(format!(
            "variable key '{key}' may only contain letters, digits and '_'"
        )));
    }

    if let Some(prefix) = RESERVED_PREFIXES.iter().find(|p| key.starts_with(*p)) {
        return Err(ConvergeError::Validation(format!(
            "variable key '{key}' uses the reserved prefix '{prefix}'"
        )));
    }

    Ok(())
}

/// Validates a `variables` section, rejecting duplicate `(key, environment_scope)` pairs.
pub fn parse_variables(section: IndexMap<String, VariableSpec>) -> Result<Vec<Variable>> {
    let mut seen = HashSet::new();
    let mut variables = Vec::with_capacity(section.len());

    for (name, spec) in section {
        let variable = Variable::from_spec(&name, spec)?;
        if !seen.insert(variable.identity()) {
            return Err(ConvergeError::Validation(format!(
                "variable '{}' is declared more than once for scope '{}'",
                variable.key, variable.environment_scope
            )));
        }
        variables.push(variable);
    }

    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use serde_json::json;

    fn section(yaml: &str) -> IndexMap<String, VariableSpec> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_key_defaults_to_uppercased_name() {
        let vars = parse_variables(section("api_key: { value: v1 }")).unwrap();
        assert_eq!(vars[0].key, "API_KEY");
        assert_eq!(vars[0].environment_scope, "*");
        assert!(!vars[0].masked);
        assert_eq!(vars[0].variable_type, VariableType::EnvVar);
    }

    #[test]
    fn test_numeric_value_is_text() {
        let vars = parse_variables(section("PORT: { value: 8080 }")).unwrap();
        assert_eq!(vars[0].value, "8080");
    }

    #[test]
    fn test_rejects_bad_charset() {
        let err = parse_variables(section("x: { key: BAD-KEY, value: v }")).unwrap_err();
        assert!(err.to_string().contains("BAD-KEY"));
    }

    #[test]
    fn test_rejects_reserved_prefix() {
        assert!(validate_key("CI_JOB_TOKEN").is_err());
        assert!(validate_key("GITLAB_USER").is_err());
        assert!(validate_key("MY_CI_VALUE").is_ok());
    }

    #[test]
    fn test_rejects_overlong_key() {
        assert!(validate_key(&"A".repeat(256)).is_err());
        assert!(validate_key(&"A".repeat(255)).is_ok());
    }

    #[test]
    fn test_rejects_unknown_field() {
        let result: std::result::Result<IndexMap<String, VariableSpec>, _> =
            serde_yaml::from_str("X: { value: v, secret: true }");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_duplicate_identity() {
        let err = parse_variables(section(
            "a: { key: TOKEN, value: one, environment_scope: prod }\n\
             b: { key: TOKEN, value: two, environment_scope: prod }",
        ))
        .unwrap_err();
        assert!(matches!(err, ConvergeError::Validation(_)));
    }

    #[test]
    fn test_same_key_in_two_scopes_is_allowed() {
        let vars = parse_variables(section(
            "a: { key: TOKEN, value: one, environment_scope: prod }\n\
             b: { key: TOKEN, value: two, environment_scope: staging }",
        ))
        .unwrap();
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_record_normalization() {
        let record = json!({"key": "X", "value": 40, "description": null});
        let variable = Variable::from_record(&record).unwrap();
        assert_eq!(variable.value, "40");
        assert_eq!(variable.environment_scope, "*");
        assert!(!variable.masked && !variable.protected && !variable.raw);
        assert!(variable.description.is_none());
    }

    #[test]
    fn test_unset_masked_matches_false() {
        let desired = parse_variables(section("X: { value: v, masked: false }")).unwrap();
        let actual = vec![Variable::from_record(&json!({"key": "X", "value": "v"})).unwrap()];

        let result = diff(&desired, &actual);
        assert!(result.is_converged());
        assert_eq!(result.unchanged.len(), 1);
    }

    #[test]
    fn test_value_change_is_update_with_desired_payload() {
        let desired = parse_variables(section("API_KEY: { value: v1, masked: true }")).unwrap();
        let actual = vec![Variable::from_record(&json!({
            "key": "API_KEY",
            "value": "v0",
            "masked": true,
            "environment_scope": "*"
        }))
        .unwrap()];

        let result = diff(&desired, &actual);

        assert!(result.create.is_empty());
        assert!(result.delete.is_empty());
        assert_eq!(result.update.len(), 1);
        let update = &result.update[0];
        assert_eq!(update.key, "API_KEY");
        assert_eq!(update.value, "v1");
        assert!(update.masked);
        assert_eq!(update.environment_scope, "*");
    }

    #[test]
    fn test_undeclared_description_is_left_alone() {
        let desired = parse_variables(section("TOKEN: { value: v }")).unwrap();
        let actual = vec![Variable::from_record(&json!({
            "key": "TOKEN",
            "value": "v",
            "description": "set by hand"
        }))
        .unwrap()];

        assert!(diff(&desired, &actual).is_converged());
        assert!(diff(&desired, &actual).is_converged());
    }

    #[test]
    fn test_empty_description_clears_then_converges() {
        let desired = parse_variables(section("TOKEN: { value: v, description: '' }")).unwrap();
        let before = vec![Variable::from_record(&json!({
            "key": "TOKEN",
            "value": "v",
            "description": "set by hand"
        }))
        .unwrap()];

        let first = diff(&desired, &before);
        assert_eq!(first.update.len(), 1);
        assert_eq!(first.update[0].payload().unwrap()["description"], "");

        let after = vec![Variable::from_record(&json!({
            "key": "TOKEN",
            "value": "v",
            "description": ""
        }))
        .unwrap()];
        assert!(diff(&desired, &after).is_converged());
    }

    #[test]
    fn test_hidden_value_is_not_compared() {
        let desired = parse_variables(section("SECRET: { value: s3cr3t, masked: true }")).unwrap();
        let actual = vec![Variable::from_record(&json!({
            "key": "SECRET",
            "value": null,
            "masked": true
        }))
        .unwrap()];

        assert!(actual[0].value_hidden);
        assert!(diff(&desired, &actual).is_converged());

        let flipped = vec![Variable::from_record(&json!({
            "key": "SECRET",
            "value": null,
            "masked": false
        }))
        .unwrap()];
        assert_eq!(diff(&desired, &flipped).update.len(), 1);
    }

    #[test]
    fn test_payload_is_fully_materialized() {
        let vars = parse_variables(section("X: { value: v }")).unwrap();
        let payload = vars[0].payload().unwrap();
        assert_eq!(
            payload,
            json!({
                "key": "X",
                "value": "v",
                "environment_scope": "*",
                "masked": false,
                "protected": false,
                "raw": false,
                "variable_type": "env_var"
            })
        );
    }
}
