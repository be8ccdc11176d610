use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ConvergeError, Result};
use crate::model::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Manual,
    Auto,
}

/// Mutations issued for one entity, or planned when the run only validates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityChanges {
    /// Settings fields whose remote value differs from the desired one.
    pub settings_drift: Vec<String>,
    pub variables_created: usize,
    pub variables_updated: usize,
    pub variables_deleted: usize,
    /// Undeclared variables left in place because deletion is disabled.
    pub variables_kept: usize,
    pub branches_created: usize,
    pub branches_replaced: usize,
    pub branches_deleted: usize,
    /// Protected branches were skipped on a group that is not top-level.
    pub branches_skipped: bool,
}

impl EntityChanges {
    /// Number of mutating calls the changes correspond to. A replaced branch
    /// costs a delete and a create.
    pub fn mutation_count(&self) -> usize {
        usize::from(!self.settings_drift.is_empty())
            + self.variables_created
            + self.variables_updated
            + self.variables_deleted
            + self.branches_created
            + 2 * self.branches_replaced
            + self.branches_deleted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityOutcome {
    Converged { changes: EntityChanges },
    Failed { error: String },
    /// Not attempted because an earlier entity failed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub entity: Entity,
    #[serde(flatten)]
    pub outcome: EntityOutcome,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub validate_only: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities: Vec<EntityReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| matches!(e.outcome, EntityOutcome::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| matches!(e.outcome, EntityOutcome::Skipped))
            .count()
    }

    pub fn mutation_count(&self) -> usize {
        self.entities
            .iter()
            .map(|e| match &e.outcome {
                EntityOutcome::Converged { changes } => changes.mutation_count(),
                _ => 0,
            })
            .sum()
    }

    /// Turns entity failures into a run-level error for the process boundary.
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed();
        if failed > 0 {
            return Err(ConvergeError::BatchFailed {
                failed,
                total: self.entities.len(),
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: Vec<EntityOutcome>) -> RunReport {
        RunReport {
            mode: RunMode::Manual,
            validate_only: false,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            entities: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| EntityReport {
                    entity: Entity::project(i as u64),
                    outcome,
                })
                .collect(),
        }
    }

    #[test]
    fn test_mutation_count_counts_replacements_twice() {
        let changes = EntityChanges {
            settings_drift: vec!["visibility".to_string()],
            variables_created: 1,
            branches_replaced: 2,
            variables_kept: 3,
            ..EntityChanges::default()
        };
        assert_eq!(changes.mutation_count(), 6);
    }

    #[test]
    fn test_failures_become_batch_error() {
        let run = report(vec![
            EntityOutcome::Converged {
                changes: EntityChanges::default(),
            },
            EntityOutcome::Failed {
                error: "boom".to_string(),
            },
            EntityOutcome::Skipped,
        ]);
        assert_eq!(run.skipped(), 1);

        let err = run.into_result().unwrap_err();
        assert!(matches!(
            err,
            ConvergeError::BatchFailed {
                failed: 1,
                total: 3
            }
        ));
    }

    #[test]
    fn test_outcome_serialization() {
        let entry = EntityReport {
            entity: Entity::group(3),
            outcome: EntityOutcome::Failed {
                error: "403".to_string(),
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["entity"]["kind"], "group");
        assert_eq!(json["error"], "403");
    }
}
