use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of node in the GitLab resource hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Group,
    Project,
}

impl EntityKind {
    /// REST collection the kind lives under.
    pub fn resource(self) -> &'static str {
        match self {
            Self::Group => "groups",
            Self::Project => "projects",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => f.write_str("group"),
            Self::Project => f.write_str("project"),
        }
    }
}

/// A concrete, resolved entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: u64,
}

impl Entity {
    pub fn group(id: u64) -> Self {
        Self {
            kind: EntityKind::Group,
            id,
        }
    }

    pub fn project(id: u64) -> Self {
        Self {
            kind: EntityKind::Project,
            id,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Reference to an entity as written by a user: a numeric ID or a full path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Id(u64),
    Path(String),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Path(path) => f.write_str(path),
        }
    }
}
