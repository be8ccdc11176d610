//! Desired-state model: the validated, strongly typed form of the config document.

mod entity;
mod protected_branches;
mod settings;
mod variables;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Result;

pub use entity::{Entity, EntityKind, EntityRef};
pub use protected_branches::{parse_protected_branches, AccessLevel, BranchRule, ProtectedBranch};
pub use settings::{read_name, Declared, EntitySettings, GroupSettings, ProjectSettings};
pub use variables::{parse_variables, Variable, VariableSpec, VariableType};

/// Raw config document, as deserialized from YAML, TOML or JSON.
///
/// Unknown fields are rejected at every level.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    /// Root groups processed in auto mode.
    #[serde(default)]
    pub groups: Vec<EntityRef>,

    /// Projects processed in auto mode.
    #[serde(default)]
    pub projects: Vec<EntityRef>,

    pub group_config: Option<EntityDocument<GroupSettings>>,

    pub project_config: Option<EntityDocument<ProjectSettings>>,
}

/// Configuration section for one entity kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, bound(deserialize = "S: DeserializeOwned"))]
pub struct EntityDocument<S> {
    pub settings: Option<Declared<S>>,
    pub variables: Option<IndexMap<String, VariableSpec>>,
    pub protected_branches: Option<IndexMap<String, Option<BranchRule>>>,
}

/// Validated desired configuration for one entity kind.
///
/// `None` sub-resources were not declared and are left untouched. A declared but
/// empty collection means the remote collection should be emptied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityConfig {
    pub settings: Map<String, Value>,
    pub variables: Option<Vec<Variable>>,
    pub protected_branches: Option<Vec<ProtectedBranch>>,
}

impl EntityConfig {
    fn parse<S: EntitySettings>(section: Option<EntityDocument<S>>) -> Result<Self> {
        let Some(section) = section else {
            return Ok(Self::default());
        };

        let settings = match section.settings {
            Some(settings) => {
                settings.validate()?;
                settings.payload()?
            }
            None => Map::new(),
        };

        Ok(Self {
            settings,
            variables: section.variables.map(parse_variables).transpose()?,
            protected_branches: section
                .protected_branches
                .map(parse_protected_branches)
                .transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty() && self.variables.is_none() && self.protected_branches.is_none()
    }
}

/// The complete desired state of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    pub groups: Vec<EntityRef>,
    pub projects: Vec<EntityRef>,
    pub group: EntityConfig,
    pub project: EntityConfig,
}

impl DesiredState {
    /// Validates a raw document. Fails before anything touches the network.
    pub fn parse(document: ConfigDocument) -> Result<Self> {
        Ok(Self {
            group: EntityConfig::parse(document.group_config)?,
            project: EntityConfig::parse(document.project_config)?,
            groups: document.groups,
            projects: document.projects,
        })
    }

    pub fn config_for(&self, kind: EntityKind) -> &EntityConfig {
        match kind {
            EntityKind::Group => &self.group,
            EntityKind::Project => &self.project,
        }
    }
}
