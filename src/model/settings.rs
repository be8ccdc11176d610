use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConvergeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Internal,
    Public,
}

/// Feature visibility toggle used by the `*_access_level` settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureAccess {
    Disabled,
    Private,
    Enabled,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedRunnersSetting {
    Enabled,
    DisabledAndOverridable,
    DisabledAndUnoverridable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Merge,
    RebaseMerge,
    Ff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SquashOption {
    Always,
    Never,
    DefaultOn,
    DefaultOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoDevopsDeployStrategy {
    Continuous,
    Manual,
    TimedIncremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildGitStrategy {
    Fetch,
    Clone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreationLevel {
    Noone,
    Owner,
    Maintainer,
    Developer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerExpirationPolicy {
    pub cadence: Option<String>,
    pub enabled: Option<bool>,
    pub keep_n: Option<u32>,
    pub older_than: Option<String>,
    pub name_regex: Option<String>,
    pub name_regex_keep: Option<String>,
}

/// Attributes accepted by `PUT /groups/:id`.
///
/// Every field is optional; only fields set in the config document are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSettings {
    pub default_branch: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
    pub lfs_enabled: Option<bool>,
    pub max_artifacts_size: Option<u64>,
    pub auto_devops_enabled: Option<bool>,
    pub request_access_enabled: Option<bool>,
    pub web_based_commit_signing_enabled: Option<bool>,
    pub only_allow_merge_if_pipeline_succeeds: Option<bool>,
    pub allow_merge_on_skipped_pipeline: Option<bool>,
    pub only_allow_merge_if_all_discussions_are_resolved: Option<bool>,
    pub wiki_access_level: Option<FeatureAccess>,

    // security
    pub default_branch_protection: Option<u8>,
    pub require_two_factor_authentication: Option<bool>,
    pub two_factor_grace_period: Option<u32>,
    pub ip_restriction_ranges: Option<String>,
    pub allowed_email_domains_list: Option<String>,
    pub duo_availability: Option<String>,
    pub duo_features_enabled: Option<bool>,
    pub lock_duo_features_enabled: Option<bool>,
    pub step_up_auth_required_oauth_provider: Option<String>,
    pub enabled_git_access_protocol: Option<String>,

    // repository
    pub file_template_project_id: Option<u64>,

    // access control
    pub membership_lock: Option<bool>,
    pub prevent_sharing_groups_outside_hierarchy: Option<bool>,
    pub prevent_forking_outside_group: Option<bool>,
    pub share_with_group_lock: Option<bool>,
    pub subgroup_creation_level: Option<CreationLevel>,
    pub project_creation_level: Option<CreationLevel>,

    // compliance
    pub unique_project_download_limit: Option<u32>,
    pub unique_project_download_limit_interval_in_seconds: Option<u32>,
    pub unique_project_download_limit_allowlist: Option<Vec<String>>,
    pub unique_project_download_limit_alertlist: Option<Vec<u64>>,
    pub auto_ban_user_on_excessive_projects_download: Option<bool>,

    pub experiment_features_enabled: Option<bool>,
    pub math_rendering_limits_enabled: Option<bool>,
    pub lock_math_rendering_limits_enabled: Option<bool>,

    // runners
    pub shared_runners_setting: Option<SharedRunnersSetting>,
    pub shared_runners_minutes_limit: Option<u32>,
    pub extra_shared_runners_minutes_limit: Option<u32>,

    pub emails_enabled: Option<bool>,
    pub mentions_disabled: Option<bool>,
}

/// Attributes accepted by `PUT /projects/:id`.
///
/// Every field is optional; only fields set in the config document are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSettings {
    pub default_branch: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
    pub lfs_enabled: Option<bool>,
    pub max_artifacts_size: Option<u64>,
    pub auto_devops_enabled: Option<bool>,
    pub request_access_enabled: Option<bool>,
    pub web_based_commit_signing_enabled: Option<bool>,
    pub only_allow_merge_if_pipeline_succeeds: Option<bool>,
    pub allow_merge_on_skipped_pipeline: Option<bool>,
    pub only_allow_merge_if_all_discussions_are_resolved: Option<bool>,
    pub wiki_access_level: Option<FeatureAccess>,

    // merge requests
    pub allow_pipeline_trigger_approve_deployment: Option<bool>,
    pub only_allow_merge_if_all_status_checks_passed: Option<bool>,
    pub approvals_before_merge: Option<u32>,
    pub remove_source_branch_after_merge: Option<bool>,
    pub mr_default_target_self: Option<bool>,
    pub squash_option: Option<SquashOption>,
    pub merge_method: Option<MergeMethod>,
    pub merge_requests_enabled: Option<bool>,
    pub merge_pipelines_enabled: Option<bool>,
    pub merge_trains_enabled: Option<bool>,
    pub merge_trains_skip_train_allowed: Option<bool>,
    pub resolve_outdated_diff_discussions: Option<bool>,
    pub printing_merge_request_link_enabled: Option<bool>,

    // pipelines
    pub auto_cancel_pending_pipelines: Option<String>,
    pub auto_devops_deploy_strategy: Option<AutoDevopsDeployStrategy>,
    pub ci_config_path: Option<String>,
    pub ci_default_git_depth: Option<u32>,
    pub ci_delete_pipelines_in_seconds: Option<u64>,
    pub ci_forward_deployment_enabled: Option<bool>,
    pub ci_forward_deployment_rollback_allowed: Option<bool>,
    pub ci_allow_fork_pipelines_to_run_in_parent_project: Option<bool>,
    pub ci_id_token_sub_claim_components: Option<Vec<String>>,
    pub ci_separated_caches: Option<bool>,
    pub ci_restrict_pipeline_cancellation_role: Option<String>,
    pub ci_pipeline_variables_minimum_override_role: Option<String>,
    pub ci_push_repository_for_job_token_allowed: Option<bool>,
    pub restrict_user_defined_variables: Option<bool>,

    // builds
    pub build_git_strategy: Option<BuildGitStrategy>,
    pub build_timeout: Option<u32>,
    pub jobs_enabled: Option<bool>,
    pub public_jobs: Option<bool>,
    pub shared_runners_enabled: Option<bool>,
    pub group_runners_enabled: Option<bool>,
    pub keep_latest_artifact: Option<bool>,

    // repository
    pub repository_storage: Option<String>,
    pub suggestion_commit_message: Option<String>,
    pub issue_branch_template: Option<String>,
    pub merge_commit_template: Option<String>,
    pub squash_commit_template: Option<String>,
    pub issues_template: Option<String>,
    pub warn_about_potentially_unwanted_characters: Option<bool>,
    pub autoclose_referenced_issues: Option<bool>,

    // registries
    pub container_registry_enabled: Option<bool>,
    pub container_expiration_policy_attributes: Option<ContainerExpirationPolicy>,
    pub packages_enabled: Option<bool>,

    // mirroring
    pub mirror: Option<bool>,
    pub mirror_overwrites_diverged_branches: Option<bool>,
    pub mirror_trigger_builds: Option<bool>,
    pub mirror_user_id: Option<u64>,
    pub only_mirror_protected_branches: Option<bool>,

    pub external_authorization_classification_label: Option<String>,
    pub enforce_auth_checks_on_uploads: Option<bool>,
    pub prevent_merge_without_jira_issue: Option<bool>,
    pub service_desk_enabled: Option<bool>,
    pub emails_enabled: Option<bool>,
    pub show_default_award_emojis: Option<bool>,
    pub topics: Option<Vec<String>>,

    // feature access levels
    pub analytics_access_level: Option<FeatureAccess>,
    pub builds_access_level: Option<FeatureAccess>,
    pub container_registry_access_level: Option<FeatureAccess>,
    pub environments_access_level: Option<FeatureAccess>,
    pub feature_flags_access_level: Option<FeatureAccess>,
    pub forking_access_level: Option<FeatureAccess>,
    pub infrastructure_access_level: Option<FeatureAccess>,
    pub issues_access_level: Option<FeatureAccess>,
    pub merge_requests_access_level: Option<FeatureAccess>,
    pub model_experiments_access_level: Option<FeatureAccess>,
    pub model_registry_access_level: Option<FeatureAccess>,
    pub monitor_access_level: Option<FeatureAccess>,
    pub package_registry_access_level: Option<FeatureAccess>,
    pub pages_access_level: Option<FeatureAccess>,
    pub releases_access_level: Option<FeatureAccess>,
    pub repository_access_level: Option<FeatureAccess>,
    pub requirements_access_level: Option<FeatureAccess>,
    pub security_and_compliance_access_level: Option<FeatureAccess>,
    pub snippets_access_level: Option<FeatureAccess>,
}

/// Settings whose write name differs from the name the entity record uses.
const READ_NAMES: [(&str, &str); 1] = [(
    "container_expiration_policy_attributes",
    "container_expiration_policy",
)];

/// Name under which a written setting appears when the entity is read back.
pub fn read_name(field: &str) -> &str {
    READ_NAMES
        .iter()
        .find(|(write, _)| *write == field)
        .map_or(field, |(_, read)| read)
}

/// Entity settings that can be validated and turned into a surgical PUT body.
pub trait EntitySettings: Serialize {
    fn default_branch(&self) -> Option<&str>;

    fn validate(&self) -> Result<()> {
        if let Some(branch) = self.default_branch() {
            validate_branch_name(branch)?;
        }
        Ok(())
    }

    /// Fields holding a value. Unset fields are left out so the remote keeps
    /// its current value for them.
    fn payload(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(mut fields) => {
                strip_unset(&mut fields);
                Ok(fields)
            }
            other => Err(ConvergeError::Validation(format!(
                "settings must serialize to a mapping, got {other}"
            ))),
        }
    }
}

/// A settings section as written in the config document.
///
/// The typed settings cannot tell an absent field from one set to `null`, so
/// the fields the document nulled out are kept alongside and sent as `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Declared<S> {
    pub settings: S,
    nulls: Map<String, Value>,
}

impl<S: EntitySettings> Declared<S> {
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()
    }

    /// Set fields plus explicit nulls. Absent fields are left out.
    pub fn payload(&self) -> Result<Map<String, Value>> {
        let mut payload = self.settings.payload()?;
        restore_nulls(&mut payload, &self.nulls);
        Ok(payload)
    }
}

impl<'de, S: DeserializeOwned> Deserialize<'de> for Declared<S> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        let nulls = explicit_nulls(&raw);
        let settings = serde_json::from_value(Value::Object(raw)).map_err(D::Error::custom)?;
        Ok(Self { settings, nulls })
    }
}

fn explicit_nulls(raw: &Map<String, Value>) -> Map<String, Value> {
    raw.iter()
        .filter_map(|(field, value)| match value {
            Value::Null => Some((field.clone(), Value::Null)),
            Value::Object(nested) => {
                let nested = explicit_nulls(nested);
                (!nested.is_empty()).then(|| (field.clone(), Value::Object(nested)))
            }
            _ => None,
        })
        .collect()
}

fn restore_nulls(payload: &mut Map<String, Value>, nulls: &Map<String, Value>) {
    for (field, null) in nulls {
        match null {
            Value::Object(nested) => {
                let target = payload
                    .entry(field.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(target) = target {
                    restore_nulls(target, nested);
                }
            }
            _ => {
                payload.insert(field.clone(), Value::Null);
            }
        }
    }
}

impl EntitySettings for GroupSettings {
    fn default_branch(&self) -> Option<&str> {
        self.default_branch.as_deref()
    }
}

impl EntitySettings for ProjectSettings {
    fn default_branch(&self) -> Option<&str> {
        self.default_branch.as_deref()
    }
}

fn strip_unset(fields: &mut Map<String, Value>) {
    fields.retain(|_, value| {
        if let Value::Object(nested) = value {
            strip_unset(nested);
        }
        !value.is_null()
    });
}

fn validate_branch_name(branch: &str) -> Result<()> {
    let valid = !branch.is_empty()
        && branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'));

    if valid {
        Ok(())
    } else {
        Err(ConvergeError::Validation(format!(
            "default_branch '{branch}' is not a valid branch name"
        )))
    }
}
