use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diff::{flag, Reconcile};
use crate::error::{ConvergeError, Result};

/// Ordinal GitLab role used by branch protection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AccessLevel {
    NoAccess = 0,
    MinimalAccess = 5,
    Guest = 10,
    Reporter = 20,
    Developer = 30,
    Maintainer = 40,
    Owner = 50,
}

impl TryFrom<u8> for AccessLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NoAccess),
            5 => Ok(Self::MinimalAccess),
            10 => Ok(Self::Guest),
            20 => Ok(Self::Reporter),
            30 => Ok(Self::Developer),
            40 => Ok(Self::Maintainer),
            50 => Ok(Self::Owner),
            other => Err(format!(
                "access level {other} is not one of 0, 5, 10, 20, 30, 40, 50"
            )),
        }
    }
}

impl From<AccessLevel> for u8 {
    fn from(level: AccessLevel) -> Self {
        level as u8
    }
}

/// Protection attributes as declared for one branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchRule {
    pub merge_access_level: Option<AccessLevel>,
    pub push_access_level: Option<AccessLevel>,
    pub unprotect_access_level: Option<AccessLevel>,
    pub allow_force_push: Option<bool>,
}

/// A protected branch in canonical form, identified by its exact name.
///
/// Access levels left `None` on the desired side are not compared; on the actual
/// side `None` means the remote record carried no recognizable level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedBranch {
    pub name: String,
    pub merge_access_level: Option<AccessLevel>,
    pub push_access_level: Option<AccessLevel>,
    pub unprotect_access_level: Option<AccessLevel>,
    pub allow_force_push: bool,
}

impl ProtectedBranch {
    pub fn from_rule(name: &str, rule: BranchRule) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(ConvergeError::Validation(
                "protected branch name must not be empty".to_string(),
            ));
        }
        if name.contains('*') {
            return Err(ConvergeError::Validation(format!(
                "protected branch '{name}': wildcard patterns are not supported"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            merge_access_level: rule.merge_access_level,
            push_access_level: rule.push_access_level,
            unprotect_access_level: rule.unprotect_access_level,
            allow_force_push: rule.allow_force_push.unwrap_or(false),
        })
    }

    /// Parses a protected branch record. Each `<action>_access_level` may arrive
    /// as a scalar field or as the first entry of `<action>_access_levels`.
    pub fn from_record(record: &Value) -> Result<Self> {
        let name = record
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConvergeError::Api(format!("protected branch record without name: {record}"))
            })?
            .to_string();

        Ok(Self {
            merge_access_level: record_access_level(record, "merge", &name),
            push_access_level: record_access_level(record, "push", &name),
            unprotect_access_level: record_access_level(record, "unprotect", &name),
            allow_force_push: flag(record.get("allow_force_push")),
            name,
        })
    }

    /// Request body for the create call. Unset access levels are omitted so the
    /// remote applies its own defaults.
    pub fn payload(&self) -> Value {
        let mut body = Map::new();
        body.insert("name".to_string(), Value::from(self.name.clone()));
        for (field, level) in [
            ("merge_access_level", self.merge_access_level),
            ("push_access_level", self.push_access_level),
            ("unprotect_access_level", self.unprotect_access_level),
        ] {
            if let Some(level) = level {
                body.insert(field.to_string(), Value::from(u8::from(level)));
            }
        }
        body.insert(
            "allow_force_push".to_string(),
            Value::from(self.allow_force_push),
        );
        Value::Object(body)
    }
}

fn record_access_level(record: &Value, action: &str, branch: &str) -> Option<AccessLevel> {
    let raw = record
        .get(format!("{action}_access_level"))
        .filter(|v| !v.is_null())
        .or_else(|| {
            record
                .get(format!("{action}_access_levels"))
                .and_then(Value::as_array)
                .and_then(|levels| levels.first())
                .and_then(|level| level.get("access_level"))
        })?;

    let ordinal = raw
        .as_u64()
        .or_else(|| raw.as_str().and_then(|s| s.parse().ok()))?;

    match u8::try_from(ordinal)
        .map_err(|e| e.to_string())
        .and_then(AccessLevel::try_from)
    {
        Ok(level) => Some(level),
        Err(e) => {
            warn!("Ignoring {action} access level on branch {branch}: {e}");
            None
        }
    }
}

impl Reconcile for ProtectedBranch {
    type Key = String;

    fn identity(&self) -> Self::Key {
        self.name.clone()
    }

    fn same_as(&self, actual: &Self) -> bool {
        let level_holds = |wanted: Option<AccessLevel>, current: Option<AccessLevel>| {
            wanted.map_or(true, |w| current == Some(w))
        };

        level_holds(self.merge_access_level, actual.merge_access_level)
            && level_holds(self.push_access_level, actual.push_access_level)
            && level_holds(self.unprotect_access_level, actual.unprotect_access_level)
            && self.allow_force_push == actual.allow_force_push
    }
}

/// Validates a `protected_branches` section. A `null` rule protects the branch
/// with remote defaults.
pub fn parse_protected_branches(
    section: IndexMap<String, Option<BranchRule>>,
) -> Result<Vec<ProtectedBranch>> {
    section
        .into_iter()
        .map(|(name, rule)| ProtectedBranch::from_rule(&name, rule.unwrap_or_default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use serde_json::json;

    fn section(yaml: &str) -> IndexMap<String, Option<BranchRule>> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parses_scalar_record() {
        let branch = ProtectedBranch::from_record(&json!({
            "name": "main",
            "merge_access_level": 30,
            "push_access_level": 40,
            "unprotect_access_level": 40,
            "allow_force_push": true
        }))
        .unwrap();

        assert_eq!(branch.merge_access_level, Some(AccessLevel::Developer));
        assert_eq!(branch.push_access_level, Some(AccessLevel::Maintainer));
        assert!(branch.allow_force_push);
    }

    #[test]
    fn test_parses_list_record_like_scalar_record() {
        let nested = ProtectedBranch::from_record(&json!({
            "id": 1,
            "name": "main",
            "merge_access_levels": [{"access_level": 30, "access_level_description": "Developers + Maintainers"}],
            "push_access_levels": [{"access_level": 40}],
            "unprotect_access_levels": [],
        }))
        .unwrap();
        let scalar = ProtectedBranch::from_record(&json!({
            "name": "main",
            "merge_access_level": 30,
            "push_access_level": 40
        }))
        .unwrap();

        assert_eq!(nested, scalar);
        assert_eq!(nested.unprotect_access_level, None);
        assert!(!nested.allow_force_push);
    }

    #[test]
    fn test_unknown_remote_level_is_dropped() {
        let branch =
            ProtectedBranch::from_record(&json!({"name": "main", "push_access_level": 60}))
                .unwrap();
        assert_eq!(branch.push_access_level, None);
    }

    #[test]
    fn test_rejects_out_of_range_level() {
        let result: std::result::Result<IndexMap<String, Option<BranchRule>>, _> =
            serde_yaml::from_str("main: { push_access_level: 45 }");
        assert!(result.is_err());

        let result: std::result::Result<IndexMap<String, Option<BranchRule>>, _> =
            serde_yaml::from_str("main: { push_access_level: -1 }");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_wildcards_and_unknown_fields() {
        assert!(parse_protected_branches(section("'release/*': null")).is_err());

        let result: std::result::Result<IndexMap<String, Option<BranchRule>>, _> =
            serde_yaml::from_str("main: { code_owner_approval_required: true }");
        assert!(result.is_err());
    }

    #[test]
    fn test_null_rule_uses_defaults() {
        let branches = parse_protected_branches(section("main: null")).unwrap();
        assert_eq!(branches[0].name, "main");
        assert_eq!(branches[0].payload(), json!({"name": "main", "allow_force_push": false}));
    }

    #[test]
    fn test_unset_level_is_not_compared() {
        let desired =
            parse_protected_branches(section("main: { push_access_level: 40 }")).unwrap();
        let actual = vec![ProtectedBranch::from_record(&json!({
            "name": "main",
            "merge_access_level": 30,
            "push_access_level": 40
        }))
        .unwrap()];

        assert!(diff(&desired, &actual).is_converged());
    }

    #[test]
    fn test_attribute_mismatch_is_update() {
        let desired = parse_protected_branches(section(
            "main: { push_access_level: 40, allow_force_push: false }",
        ))
        .unwrap();
        let actual = vec![ProtectedBranch::from_record(&json!({
            "name": "main",
            "push_access_level": 30
        }))
        .unwrap()];

        let result = diff(&desired, &actual);
        assert_eq!(result.update.len(), 1);
        assert_eq!(result.update[0].push_access_level, Some(AccessLevel::Maintainer));
    }

    #[test]
    fn test_payload_uses_ordinals() {
        let branches = parse_protected_branches(section(
            "main: { merge_access_level: 30, push_access_level: 0, allow_force_push: true }",
        ))
        .unwrap();
        assert_eq!(
            branches[0].payload(),
            json!({
                "name": "main",
                "merge_access_level": 30,
                "push_access_level": 0,
                "allow_force_push": true
            })
        );
    }
}
