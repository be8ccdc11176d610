use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;
use serde_json::Value;

/// An item of a set-valued sub-resource that can be matched across desired and actual state.
pub trait Reconcile {
    type Key: Eq + Hash + Clone;

    /// Diff identity used to pair a desired item with an actual item.
    fn identity(&self) -> Self::Key;

    /// Whether `self` (desired) already holds on `actual`.
    fn same_as(&self, actual: &Self) -> bool;
}

/// Four disjoint partitions produced by comparing desired against actual state.
///
/// `update` carries the desired item's full payload. `unchanged` and `delete`
/// carry the actual item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffResult<T> {
    pub create: Vec<T>,
    pub update: Vec<T>,
    pub delete: Vec<T>,
    pub unchanged: Vec<T>,
}

impl<T> Default for DiffResult<T> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

impl<T> DiffResult<T> {
    /// True when applying this diff would issue no mutating call.
    pub fn is_converged(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn mutation_count(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}

/// Partitions `desired` and `actual` using an explicit identity and comparison function.
///
/// Pure: no I/O and no shared state. Desired items are expected to be key-unique;
/// duplicates are rejected when the desired state is loaded.
pub fn diff_by<T, K, F, E>(desired: &[T], actual: &[T], identity: F, same: E) -> DiffResult<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
    E: Fn(&T, &T) -> bool,
{
    let desired_lookup: HashMap<K, &T> = desired.iter().map(|item| (identity(item), item)).collect();
    let actual_keys: HashSet<K> = actual.iter().map(&identity).collect();

    let mut result = DiffResult {
        create: desired
            .iter()
            .filter(|item| !actual_keys.contains(&identity(item)))
            .cloned()
            .collect(),
        ..DiffResult::default()
    };

    for current in actual {
        match desired_lookup.get(&identity(current)) {
            Some(wanted) if same(wanted, current) => result.unchanged.push(current.clone()),
            Some(wanted) => result.update.push((*wanted).clone()),
            None => result.delete.push(current.clone()),
        }
    }

    result
}

/// Partitions using the item type's own [`Reconcile`] identity and comparison.
pub fn diff<T>(desired: &[T], actual: &[T]) -> DiffResult<T>
where
    T: Reconcile + Clone,
{
    diff_by(desired, actual, T::identity, T::same_as)
}

/// Boolean reading of a possibly missing value: missing and `null` are `false`.
pub fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Text form of a scalar, so that `40` and `"40"` compare equal.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Compares a desired value with the remote value under the normalization rules:
/// booleans treat missing as `false`, numbers and strings compare by text,
/// arrays element-wise and objects over the desired keys only.
pub fn values_match(desired: &Value, actual: Option<&Value>) -> bool {
    match desired {
        Value::Null => actual.map_or(true, Value::is_null),
        Value::Bool(b) => flag(actual) == *b,
        Value::Number(_) | Value::String(_) => {
            actual.and_then(scalar_text) == scalar_text(desired)
        }
        Value::Array(items) => match actual {
            Some(Value::Array(current)) => {
                items.len() == current.len()
                    && items
                        .iter()
                        .zip(current)
                        .all(|(want, have)| values_match(want, Some(have)))
            }
            _ => false,
        },
        Value::Object(fields) => match actual {
            Some(Value::Object(current)) => fields
                .iter()
                .all(|(name, want)| values_match(want, current.get(name))),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        key: &'static str,
        scope: &'static str,
        value: &'static str,
    }

    impl Reconcile for Item {
        type Key = (&'static str, &'static str);

        fn identity(&self) -> Self::Key {
            (self.key, self.scope)
        }

        fn same_as(&self, actual: &Self) -> bool {
            self.value == actual.value
        }
    }

    fn item(key: &'static str, scope: &'static str, value: &'static str) -> Item {
        Item { key, scope, value }
    }

    #[test]
    fn test_partitions_create_update_delete_unchanged() {
        let desired = vec![item("A", "*", "1"), item("B", "*", "2"), item("C", "*", "3")];
        let actual = vec![item("A", "*", "1"), item("B", "*", "old"), item("D", "*", "4")];

        let result = diff(&desired, &actual);

        assert_eq!(result.create, vec![item("C", "*", "3")]);
        assert_eq!(result.update, vec![item("B", "*", "2")]);
        assert_eq!(result.delete, vec![item("D", "*", "4")]);
        assert_eq!(result.unchanged, vec![item("A", "*", "1")]);
        assert_eq!(result.mutation_count(), 3);
    }

    #[test]
    fn test_partitions_cover_union_without_overlap() {
        let desired = vec![item("A", "*", "1"), item("B", "prod", "2"), item("E", "*", "5")];
        let actual = vec![item("A", "*", "x"), item("B", "prod", "2"), item("D", "*", "4")];

        let result = diff(&desired, &actual);

        let mut seen: Vec<_> = result
            .create
            .iter()
            .chain(&result.update)
            .chain(&result.delete)
            .chain(&result.unchanged)
            .map(Reconcile::identity)
            .collect();
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();

        let mut union: Vec<_> = desired.iter().chain(&actual).map(Reconcile::identity).collect();
        union.sort_unstable();
        union.dedup();

        assert_eq!(total, seen.len(), "partitions overlap");
        assert_eq!(seen, union);
    }

    #[test]
    fn test_same_key_different_scope_is_distinct() {
        let desired = vec![item("X", "prod", "1")];
        let actual = vec![item("X", "staging", "1")];

        let result = diff(&desired, &actual);

        assert_eq!(result.create, vec![item("X", "prod", "1")]);
        assert_eq!(result.delete, vec![item("X", "staging", "1")]);
        assert!(result.update.is_empty());
    }

    #[test]
    fn test_second_pass_over_converged_state_is_empty() {
        let desired = vec![item("A", "*", "1"), item("B", "*", "2")];
        let actual = vec![item("B", "*", "stale"), item("Z", "*", "9")];

        let first = diff(&desired, &actual);
        assert!(!first.is_converged());

        // Remote state after the first pass has been applied.
        let converged: Vec<Item> = first.create.iter().chain(&first.update).cloned().collect();
        let second = diff(&desired, &converged);

        assert!(second.is_converged());
        assert_eq!(second.unchanged.len(), 2);
    }

    #[test]
    fn test_empty_inputs() {
        let result: DiffResult<Item> = diff(&[], &[]);
        assert!(result.is_converged());
        assert!(result.unchanged.is_empty());
    }

    #[test]
    fn test_flag_treats_missing_as_false() {
        assert!(!flag(None));
        assert!(!flag(Some(&Value::Null)));
        assert!(flag(Some(&json!(true))));
        assert!(!flag(Some(&json!("false"))));
    }

    #[test]
    fn test_numbers_match_their_text_form() {
        assert!(values_match(&json!(40), Some(&json!("40"))));
        assert!(values_match(&json!("40"), Some(&json!(40))));
        assert!(!values_match(&json!(40), Some(&json!(41))));
        assert!(!values_match(&json!(40), None));
    }

    #[test]
    fn test_false_matches_missing_boolean() {
        assert!(values_match(&json!(false), None));
        assert!(values_match(&json!(false), Some(&Value::Null)));
        assert!(!values_match(&json!(true), None));
    }

    #[test]
    fn test_structured_values() {
        assert!(values_match(&json!(["a", "b"]), Some(&json!(["a", "b"]))));
        assert!(!values_match(&json!(["a"]), Some(&json!(["a", "b"]))));
        assert!(values_match(
            &json!({"enabled": true, "keep_n": 10}),
            Some(&json!({"enabled": true, "keep_n": "10", "cadence": "1d"}))
        ));
        assert!(!values_match(&json!({"enabled": true}), Some(&json!("x"))));
    }
}
