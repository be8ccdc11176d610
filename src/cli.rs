use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::info;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::auth::Token;
use crate::config::{load_desired_state, EntityOrder, RunOptions, DEFAULT_CONFIG_FILE};
use crate::error::ConvergeError;
use crate::model::{EntityKind, EntityRef};
use crate::output;
use crate::providers::{GitLabProvider, ManualTarget};
use crate::report::RunReport;

#[derive(Parser)]
#[command(name = "glconverge")]
#[command(author, version, about = "Converge GitLab groups and projects to a declared configuration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Desired-state document (YAML, TOML or JSON)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    #[arg(long, global = true, env = "CI_SERVER_HOST", default_value = "https://gitlab.com")]
    gitlab_host: String,

    #[arg(long, global = true, env = "GITLAB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Compute changes without writing anything
    #[arg(short, long, global = true, default_value_t = false)]
    validate: bool,

    /// Leave undeclared variables in place
    #[arg(long, global = true, default_value_t = false)]
    keep_variables: bool,

    /// Attempt every entity and report failures at the end
    #[arg(long, global = true, default_value_t = false)]
    ignore_errors: bool,

    /// Number of entities applied concurrently
    #[arg(long, global = true, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    workers: u16,

    /// Which entity kind is applied first [default: groups-first for manual, projects-first for auto]
    #[arg(long, global = true, value_enum)]
    order: Option<EntityOrder>,

    /// Write the JSON run report to this file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the configuration to one group or project
    Manual(ManualArgs),
    /// Apply the configuration to the groups and projects listed in the config file
    Auto {
        /// Include every subgroup and their projects
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
    },
}

#[derive(Args)]
struct ManualArgs {
    #[arg(long, conflicts_with = "project")]
    group: bool,

    #[arg(long)]
    project: bool,

    /// Full path, e.g. `platform/backend`
    #[arg(long)]
    path: Option<String>,

    #[arg(long)]
    id: Option<u64>,

    /// Include every subgroup and their projects
    #[arg(short, long, default_value_t = false)]
    recursive: bool,
}

impl ManualArgs {
    fn target(&self) -> Result<ManualTarget, ConvergeError> {
        let kind = match (self.group, self.project) {
            (true, false) => EntityKind::Group,
            (false, true) => EntityKind::Project,
            _ => {
                return Err(ConvergeError::Policy(
                    "exactly one of --group or --project is required".to_string(),
                ))
            }
        };

        let reference = match (&self.path, self.id) {
            (Some(path), None) => EntityRef::Path(path.clone()),
            (None, Some(id)) => EntityRef::Id(id),
            _ => {
                return Err(ConvergeError::Policy(
                    "exactly one of --path or --id is required".to_string(),
                ))
            }
        };

        if self.recursive && kind == EntityKind::Project {
            return Err(ConvergeError::Policy(
                "--recursive is only supported with --group".to_string(),
            ));
        }

        Ok(ManualTarget {
            kind,
            reference,
            recursive: self.recursive,
        })
    }
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        let default_order = match self.command {
            Commands::Manual(_) => EntityOrder::GroupsFirst,
            Commands::Auto { .. } => EntityOrder::ProjectsFirst,
        };

        RunOptions {
            validate_only: self.validate,
            delete_variables: !self.keep_variables,
            ignore_errors: self.ignore_errors,
            workers: usize::from(self.workers),
            order: self.order.unwrap_or(default_order),
        }
    }

    fn write_report(&self, report: &RunReport) -> Result<()> {
        let Some(path) = &self.output else {
            return Ok(());
        };
        let mut writer = BufWriter::new(File::create(path)?);
        output::export_json(report, self.pretty, &mut writer)?;
        info!("Run report written to: {}", path.display());
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let manual_target = match &self.command {
            Commands::Manual(args) => Some(args.target()?),
            Commands::Auto { .. } => None,
        };

        let desired = load_desired_state(&self.config_file)?;
        let options = self.run_options();
        let token = self.token.as_deref().map(Token::from);
        let host = normalize_host(&self.gitlab_host);

        info!("Using GitLab instance at {host}");
        let provider = GitLabProvider::new(&host, token, options)?;

        let report = match manual_target {
            Some(target) => provider.run_manual(&target, &desired).await?,
            None => {
                let recursive = matches!(self.command, Commands::Auto { recursive: true });
                provider.run_auto(&desired, recursive).await?
            }
        };

        output::print_summary(&report);
        self.write_report(&report)?;

        report.into_result()?;
        Ok(())
    }
}

/// `CI_SERVER_HOST` carries a bare host name; accept it as well as a full URL.
fn normalize_host(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}
