use log::debug;
use serde::Serialize;

use super::{record_id, GitLabClient};
use crate::error::Result;
use crate::model::EntityKind;

/// Groups and projects found under a root group.
///
/// `groups` starts with the root and lists descendants in depth-first pre-order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Discovery {
    pub groups: Vec<u64>,
    pub projects: Vec<u64>,
}

impl GitLabClient {
    pub async fn immediate_subgroups(&self, group_id: u64) -> Result<Vec<u64>> {
        self.list_paged(EntityKind::Group, group_id, "subgroups")
            .await?
            .iter()
            .map(record_id)
            .collect()
    }

    pub async fn immediate_projects(&self, group_id: u64) -> Result<Vec<u64>> {
        self.list_paged(EntityKind::Group, group_id, "projects")
            .await?
            .iter()
            .map(record_id)
            .collect()
    }

    /// Walks the hierarchy below `root`.
    ///
    /// Non-recursive discovery returns the root and its immediate projects only.
    /// Recursive discovery visits every descendant group depth-first, collecting
    /// each group's immediate projects as it goes. The hierarchy is assumed to be
    /// a tree, as GitLab guarantees; cycles are not detected.
    ///
    /// Every call builds a fresh result.
    pub async fn discover(&self, root: u64, recursive: bool) -> Result<Discovery> {
        if !recursive {
            return Ok(Discovery {
                groups: vec![root],
                projects: self.immediate_projects(root).await?,
            });
        }

        let mut discovery = Discovery::default();
        let mut pending = vec![root];

        while let Some(group) = pending.pop() {
            debug!("Finding projects and subgroups in group {group}");
            discovery.groups.push(group);
            discovery
                .projects
                .extend(self.immediate_projects(group).await?);

            let subgroups = self.immediate_subgroups(group).await?;
            debug!("Group {group} has subgroups: {subgroups:?}");
            pending.extend(subgroups.into_iter().rev());
        }

        Ok(discovery)
    }
}
