use log::{debug, info};
use serde_json::{Map, Value};

use super::GitLabProvider;
use crate::diff::{diff, values_match};
use crate::error::Result;
use crate::model::{read_name, Entity, EntityConfig, EntityKind, ProtectedBranch, Variable};
use crate::report::EntityChanges;

const VARIABLES: &str = "variables";
const PROTECTED_BRANCHES: &str = "protected_branches";
const SCOPE_FILTER: &str = "filter[environment_scope]";

impl GitLabProvider {
    /// Converges one entity: settings, then variables, then protected branches.
    /// The first failing call aborts the entity.
    pub(super) async fn apply_entity(
        &self,
        entity: Entity,
        config: &EntityConfig,
    ) -> Result<EntityChanges> {
        let mut changes = EntityChanges::default();

        if config.is_empty() {
            debug!("Nothing declared for {entity}");
            return Ok(changes);
        }

        if !config.settings.is_empty() {
            changes.settings_drift = self.apply_settings(entity, &config.settings).await?;
        }

        if let Some(variables) = &config.variables {
            self.apply_variables(entity, variables, &mut changes)
                .await?;
        }

        if let Some(branches) = &config.protected_branches {
            self.apply_protected_branches(entity, branches, &mut changes)
                .await?;
        }

        Ok(changes)
    }

    /// Returns the names of the settings fields that differ from the remote
    /// record. Issues a single PUT of every declared field when any differ.
    async fn apply_settings(
        &self,
        entity: Entity,
        settings: &Map<String, Value>,
    ) -> Result<Vec<String>> {
        let current = self
            .client
            .get(entity.kind, &entity.id.to_string())
            .await?;

        let drift: Vec<String> = settings
            .iter()
            .filter(|(field, wanted)| !values_match(wanted, current.get(read_name(field))))
            .map(|(field, _)| field.clone())
            .collect();

        if drift.is_empty() {
            debug!("Settings of {entity} already converged");
            return Ok(drift);
        }

        if self.options.validate_only {
            info!("Would update settings of {entity}: {}", drift.join(", "));
            return Ok(drift);
        }

        info!("Updating settings of {entity}: {}", drift.join(", "));
        self.client
            .update(
                entity.kind,
                entity.id,
                "",
                &[],
                &Value::Object(settings.clone()),
            )
            .await?;

        Ok(drift)
    }

    async fn apply_variables(
        &self,
        entity: Entity,
        desired: &[Variable],
        changes: &mut EntityChanges,
    ) -> Result<()> {
        let actual = self
            .client
            .list_paged(entity.kind, entity.id, VARIABLES)
            .await?
            .iter()
            .map(Variable::from_record)
            .collect::<Result<Vec<_>>>()?;

        let plan = diff(desired, &actual);
        debug!(
            "Variables of {entity}: {} to create, {} to update, {} undeclared, {} unchanged",
            plan.create.len(),
            plan.update.len(),
            plan.delete.len(),
            plan.unchanged.len()
        );

        changes.variables_created = plan.create.len();
        changes.variables_updated = plan.update.len();
        if self.options.delete_variables {
            changes.variables_deleted = plan.delete.len();
        } else {
            changes.variables_kept = plan.delete.len();
        }

        if self.options.validate_only {
            return Ok(());
        }

        for variable in &plan.create {
            info!(
                "Creating variable {} ({}) on {entity}",
                variable.key, variable.environment_scope
            );
            self.client
                .create(entity.kind, entity.id, VARIABLES, &variable.payload()?)
                .await?;
        }

        for variable in &plan.update {
            info!(
                "Updating variable {} ({}) on {entity}",
                variable.key, variable.environment_scope
            );
            self.client
                .update(
                    entity.kind,
                    entity.id,
                    &variable_path(variable),
                    &scope_filter(variable),
                    &variable.payload()?,
                )
                .await?;
        }

        if !self.options.delete_variables {
            if !plan.delete.is_empty() {
                info!(
                    "Keeping {} undeclared variables on {entity}",
                    plan.delete.len()
                );
            }
            return Ok(());
        }

        for variable in &plan.delete {
            info!(
                "Deleting variable {} ({}) on {entity}",
                variable.key, variable.environment_scope
            );
            self.client
                .delete(
                    entity.kind,
                    entity.id,
                    &variable_path(variable),
                    &scope_filter(variable),
                )
                .await?;
        }

        Ok(())
    }

    /// Protected branches are only managed on projects and top-level groups.
    /// A changed branch is unprotected and protected again since the remote has
    /// no update call for it.
    async fn apply_protected_branches(
        &self,
        entity: Entity,
        desired: &[ProtectedBranch],
        changes: &mut EntityChanges,
    ) -> Result<()> {
        if entity.kind == EntityKind::Group && !self.is_top_level_group(entity.id).await? {
            info!("Skipping protected branches on {entity}: only top-level groups support them");
            changes.branches_skipped = true;
            return Ok(());
        }

        let actual = self
            .client
            .list_paged(entity.kind, entity.id, PROTECTED_BRANCHES)
            .await?
            .iter()
            .map(ProtectedBranch::from_record)
            .collect::<Result<Vec<_>>>()?;

        let plan = diff(desired, &actual);
        changes.branches_created = plan.create.len();
        changes.branches_replaced = plan.update.len();
        changes.branches_deleted = plan.delete.len();

        if self.options.validate_only {
            return Ok(());
        }

        for branch in &plan.create {
            info!("Protecting branch {} on {entity}", branch.name);
            self.protect(entity, branch).await?;
        }

        for branch in &plan.update {
            info!("Replacing protection of branch {} on {entity}", branch.name);
            self.unprotect(entity, &branch.name).await?;
            self.protect(entity, branch).await?;
        }

        for branch in &plan.delete {
            info!("Unprotecting branch {} on {entity}", branch.name);
            self.unprotect(entity, &branch.name).await?;
        }

        Ok(())
    }

    async fn is_top_level_group(&self, group_id: u64) -> Result<bool> {
        let group = self
            .client
            .get(EntityKind::Group, &group_id.to_string())
            .await?;
        Ok(group.get("parent_id").map_or(true, Value::is_null))
    }

    async fn protect(&self, entity: Entity, branch: &ProtectedBranch) -> Result<()> {
        self.client
            .create(entity.kind, entity.id, PROTECTED_BRANCHES, &branch.payload())
            .await?;
        Ok(())
    }

    async fn unprotect(&self, entity: Entity, name: &str) -> Result<()> {
        let path = format!("{PROTECTED_BRANCHES}/{}", urlencoding::encode(name));
        self.client.delete(entity.kind, entity.id, &path, &[]).await
    }
}

fn variable_path(variable: &Variable) -> String {
    format!("{VARIABLES}/{}", urlencoding::encode(&variable.key))
}

fn scope_filter(variable: &Variable) -> [(&'static str, String); 1] {
    [(SCOPE_FILTER, variable.environment_scope.clone())]
}
