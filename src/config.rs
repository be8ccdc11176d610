use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ConvergeError, Result};
use crate::model::{ConfigDocument, DesiredState};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Which entity kind is applied first when a run touches both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EntityOrder {
    GroupsFirst,
    ProjectsFirst,
}

/// Runtime switches shared by manual and auto runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Compute diffs but issue no mutating call.
    pub validate_only: bool,
    /// Delete variables that exist remotely but are not declared.
    pub delete_variables: bool,
    /// Keep going past a failed entity and report failures at the end.
    pub ignore_errors: bool,
    /// Upper bound on entities applied concurrently.
    pub workers: usize,
    pub order: EntityOrder,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            validate_only: false,
            delete_variables: true,
            ignore_errors: false,
            workers: 1,
            order: EntityOrder::GroupsFirst,
        }
    }
}

/// Loads and validates the desired-state document at `path`.
///
/// The format follows the file extension (`.yaml`/`.yml`, `.toml`, `.json`);
/// any other extension is tried as YAML, then TOML, then JSON.
pub fn load_desired_state(path: &Path) -> Result<DesiredState> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ConvergeError::Validation(format!("cannot read config file {}: {e}", path.display()))
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    let document = parse_document(&contents, extension)
        .map_err(|e| ConvergeError::Validation(format!("{}: {e}", path.display())))?;

    debug!(
        "Loaded config document from {}: {} group refs, {} project refs",
        path.display(),
        document.groups.len(),
        document.projects.len()
    );

    DesiredState::parse(document)
}

fn parse_document(contents: &str, extension: &str) -> std::result::Result<ConfigDocument, String> {
    match extension {
        "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
        "toml" => toml::from_str(contents).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(contents).map_err(|e| e.to_string()),
        _ => serde_yaml::from_str(contents)
            .map_err(|e| e.to_string())
            .or_else(|_| toml::from_str(contents).map_err(|e| e.to_string()))
            .or_else(|_| serde_json::from_str(contents).map_err(|e| e.to_string())),
    }
}
