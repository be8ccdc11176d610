mod apply;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use indexmap::IndexSet;
use log::{error, info};

use crate::auth::Token;
use crate::config::{EntityOrder, RunOptions};
use crate::error::{ConvergeError, Result};
use crate::model::{DesiredState, Entity, EntityKind, EntityRef};
use crate::output::PhaseProgress;
use crate::report::{EntityOutcome, EntityReport, RunMode, RunReport};

use super::client::{record_id, GitLabClient};

/// A single entity named on the command line.
#[derive(Debug, Clone)]
pub struct ManualTarget {
    pub kind: EntityKind,
    pub reference: EntityRef,
    pub recursive: bool,
}

/// Reconciles GitLab groups and projects toward a desired state.
///
/// Discovery always completes before the first entity is applied. Entities are
/// then applied independently by at most `options.workers` concurrent workers;
/// each entity runs its settings, variables and protected-branch phases in order.
pub struct GitLabProvider {
    client: GitLabClient,
    options: RunOptions,
    resolved: Mutex<HashMap<(EntityKind, String), u64>>,
}

impl GitLabProvider {
    /// Creates a provider for the GitLab instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API base URL cannot be constructed.
    pub fn new(base_url: &str, token: Option<Token>, options: RunOptions) -> Result<Self> {
        Ok(Self {
            client: GitLabClient::new(base_url, token)?,
            options,
            resolved: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves a user supplied reference to a numeric ID. Paths are looked up
    /// once per run.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::HierarchyResolution`] when the path does not resolve.
    pub async fn resolve_root(&self, reference: &EntityRef, kind: EntityKind) -> Result<u64> {
        let path = match reference {
            EntityRef::Id(id) => return Ok(*id),
            EntityRef::Path(path) => path,
        };

        let cache_key = (kind, path.clone());
        if let Some(id) = self.cached(&cache_key) {
            return Ok(id);
        }

        let resolution_error = |reason: String| ConvergeError::HierarchyResolution {
            kind: kind.to_string(),
            target: path.clone(),
            reason,
        };

        let record = self
            .client
            .get(kind, path)
            .await
            .map_err(|e| resolution_error(e.to_string()))?;
        let id = record_id(&record).map_err(|e| resolution_error(e.to_string()))?;

        info!("Resolved {kind} '{path}' to ID {id}");
        if let Ok(mut resolved) = self.resolved.lock() {
            resolved.insert(cache_key, id);
        }
        Ok(id)
    }

    fn cached(&self, key: &(EntityKind, String)) -> Option<u64> {
        self.resolved.lock().ok()?.get(key).copied()
    }

    /// Applies the desired state to one group or project and, when requested,
    /// to every group and project below it.
    ///
    /// # Errors
    ///
    /// Returns a policy error for a recursive project target, and a resolution or
    /// remote error if discovery fails. Entity failures are reported in the
    /// returned [`RunReport`].
    pub async fn run_manual(
        &self,
        target: &ManualTarget,
        desired: &DesiredState,
    ) -> Result<RunReport> {
        if target.recursive && target.kind == EntityKind::Project {
            return Err(ConvergeError::Policy(
                "recursive apply is only supported for groups".to_string(),
            ));
        }

        let started_at = Utc::now();
        let progress = PhaseProgress::start_discovery();

        let id = self.resolve_root(&target.reference, target.kind).await?;
        let (groups, projects) = match target.kind {
            EntityKind::Group => {
                let discovery = self.client.discover(id, target.recursive).await?;
                (discovery.groups, discovery.projects)
            }
            EntityKind::Project => (Vec::new(), vec![id]),
        };

        info!("groups: {groups:?}");
        info!("projects: {projects:?}");

        let entities = self.schedule(groups, projects);
        let progress = progress.finish_discovery_start_apply(entities.len(), self.options.validate_only);
        let entities = self.apply_all(entities, desired).await;
        progress.finish_apply();

        Ok(RunReport {
            mode: RunMode::Manual,
            validate_only: self.options.validate_only,
            started_at,
            finished_at: Utc::now(),
            entities,
        })
    }

    /// Applies the desired state to the groups and projects listed in the config
    /// document.
    ///
    /// # Errors
    ///
    /// Returns a resolution or remote error if discovery fails. Entity failures
    /// are reported in the returned [`RunReport`].
    pub async fn run_auto(&self, desired: &DesiredState, recursive: bool) -> Result<RunReport> {
        let started_at = Utc::now();
        let progress = PhaseProgress::start_discovery();

        let mut groups = Vec::new();
        let mut projects = Vec::new();

        for reference in &desired.groups {
            let id = self.resolve_root(reference, EntityKind::Group).await?;
            let discovery = self.client.discover(id, recursive).await?;
            groups.extend(discovery.groups);
            projects.extend(discovery.projects);
        }

        for reference in &desired.projects {
            projects.push(self.resolve_root(reference, EntityKind::Project).await?);
        }

        info!("groups for configuration: {groups:?}");
        info!("projects for configuration: {projects:?}");

        let entities = self.schedule(groups, projects);
        let progress = progress.finish_discovery_start_apply(entities.len(), self.options.validate_only);
        let entities = self.apply_all(entities, desired).await;
        progress.finish_apply();

        Ok(RunReport {
            mode: RunMode::Auto,
            validate_only: self.options.validate_only,
            started_at,
            finished_at: Utc::now(),
            entities,
        })
    }

    /// Orders entities by kind and drops repeats, keeping first occurrence.
    fn schedule(&self, groups: Vec<u64>, projects: Vec<u64>) -> Vec<Entity> {
        let groups = groups.into_iter().map(Entity::group);
        let projects = projects.into_iter().map(Entity::project);

        let ordered: IndexSet<Entity> = match self.options.order {
            EntityOrder::GroupsFirst => groups.chain(projects).collect(),
            EntityOrder::ProjectsFirst => projects.chain(groups).collect(),
        };
        ordered.into_iter().collect()
    }

    /// Applies every entity with a bounded pool of workers.
    ///
    /// Without `ignore_errors` the first failure stops new entities from starting;
    /// entities already in flight run to completion and the rest are reported as
    /// skipped.
    async fn apply_all(&self, entities: Vec<Entity>, desired: &DesiredState) -> Vec<EntityReport> {
        let halted = AtomicBool::new(false);
        let halted = &halted;

        stream::iter(entities)
            .map(|entity| async move {
                if halted.load(Ordering::SeqCst) {
                    return EntityReport {
                        entity,
                        outcome: EntityOutcome::Skipped,
                    };
                }

                info!("processing: {entity}");
                let outcome = match self.apply_entity(entity, desired.config_for(entity.kind)).await {
                    Ok(changes) => EntityOutcome::Converged { changes },
                    Err(e) => {
                        error!("Failed to configure {entity}: {e}");
                        if !self.options.ignore_errors {
                            halted.store(true, Ordering::SeqCst);
                        }
                        EntityOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };

                EntityReport { entity, outcome }
            })
            .buffered(self.options.workers.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfigDocument;
    use mockito::{Matcher, Mock, ServerGuard};

    fn desired(yaml: &str) -> DesiredState {
        let document: ConfigDocument = serde_yaml::from_str(yaml).unwrap();
        DesiredState::parse(document).unwrap()
    }

    fn provider(server: &ServerGuard, options: RunOptions) -> GitLabProvider {
        GitLabProvider::new(&server.url(), None, options).unwrap()
    }

    async fn listing(server: &mut ServerGuard, path: &str, body: &str) -> Mock {
        server
            .mock("GET", path)
            .match_query(Matcher::Any)
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_recursive_project_target_is_policy_error() {
        let server = mockito::Server::new_async().await;
        let target = ManualTarget {
            kind: EntityKind::Project,
            reference: EntityRef::Id(1),
            recursive: true,
        };

        let err = provider(&server, RunOptions::default())
            .run_manual(&target, &DesiredState::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ConvergeError::Policy(_)));
    }

    #[tokio::test]
    async fn test_unresolvable_path_fails_before_any_mutation() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/api/v4/groups/nope%2Fmissing")
            .with_status(404)
            .with_body(r#"{"message":"404 Group Not Found"}"#)
            .create_async()
            .await;
        let writes = server
            .mock("PUT", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let target = ManualTarget {
            kind: EntityKind::Group,
            reference: EntityRef::Path("nope/missing".to_string()),
            recursive: true,
        };
        let err = provider(&server, RunOptions::default())
            .run_manual(&target, &desired("group_config: { settings: { lfs_enabled: true } }"))
            .await
            .unwrap_err();

        assert!(matches!(err, ConvergeError::HierarchyResolution { .. }));
        writes.assert_async().await;
    }

    #[tokio::test]
    async fn test_path_resolution_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let lookup = server
            .mock("GET", "/api/v4/projects/team%2Fapp")
            .with_body(r#"{"id": 12}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = provider(&server, RunOptions::default());
        let reference = EntityRef::Path("team/app".to_string());
        assert_eq!(provider.resolve_root(&reference, EntityKind::Project).await.unwrap(), 12);
        assert_eq!(provider.resolve_root(&reference, EntityKind::Project).await.unwrap(), 12);

        lookup.assert_async().await;
    }

    #[tokio::test]
    async fn test_auto_mode_deduplicates_and_orders_projects_first() {
        let mut server = mockito::Server::new_async().await;
        let _projects = listing(&mut server, "/api/v4/groups/1/projects", r#"[{"id": 5}]"#).await;

        let options = RunOptions {
            order: EntityOrder::ProjectsFirst,
            ..RunOptions::default()
        };
        let report = provider(&server, options)
            .run_auto(&desired("groups: [1]\nprojects: [5]\n"), false)
            .await
            .unwrap();

        let entities: Vec<Entity> = report.entities.iter().map(|e| e.entity).collect();
        assert_eq!(entities, vec![Entity::project(5), Entity::group(1)]);
        assert_eq!(report.mode, RunMode::Auto);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_remaining_entities() {
        let mut server = mockito::Server::new_async().await;
        let _projects =
            listing(&mut server, "/api/v4/groups/1/projects", r#"[{"id": 10}, {"id": 11}]"#)
                .await;
        let _failing = server
            .mock("GET", "/api/v4/projects/10/variables")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        let untouched = server
            .mock("GET", "/api/v4/projects/11/variables")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let target = ManualTarget {
            kind: EntityKind::Group,
            reference: EntityRef::Id(1),
            recursive: false,
        };
        let report = provider(&server, RunOptions::default())
            .run_manual(&target, &desired("project_config: { variables: { A: { value: x } } }"))
            .await
            .unwrap();

        let outcomes: Vec<&EntityOutcome> = report.entities.iter().map(|e| &e.outcome).collect();
        assert!(matches!(outcomes[0], EntityOutcome::Converged { .. }));
        assert!(matches!(outcomes[1], EntityOutcome::Failed { .. }));
        assert!(matches!(outcomes[2], EntityOutcome::Skipped));
        assert!(report.into_result().is_err());
        untouched.assert_async().await;
    }

    #[tokio::test]
    async fn test_ignore_errors_attempts_every_entity() {
        let mut server = mockito::Server::new_async().await;
        let _projects =
            listing(&mut server, "/api/v4/groups/1/projects", r#"[{"id": 10}, {"id": 11}]"#)
                .await;
        let _failing = server
            .mock("GET", "/api/v4/projects/10/variables")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        let attempted = listing(&mut server, "/api/v4/projects/11/variables", r#"[{"key": "A", "value": "x"}]"#).await;

        let options = RunOptions {
            ignore_errors: true,
            ..RunOptions::default()
        };
        let target = ManualTarget {
            kind: EntityKind::Group,
            reference: EntityRef::Id(1),
            recursive: false,
        };
        let report = provider(&server, options)
            .run_manual(&target, &desired("project_config: { variables: { A: { value: x } } }"))
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 0);
        assert!(matches!(
            report.into_result(),
            Err(ConvergeError::BatchFailed { failed: 1, total: 3 })
        ));
        attempted.assert_async().await;
    }
}
