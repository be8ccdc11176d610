use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_yellow};

/// Spinner for the two phases of a run: discovery, then apply.
pub struct PhaseProgress {
    pb: ProgressBar,
    validate_only: bool,
}

impl PhaseProgress {
    pub fn start_discovery() -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright("Phases").underlined());
        let pb = create_spinner(bright_yellow("Phase 1/2: Discovering entities").to_string());
        Self {
            pb,
            validate_only: false,
        }
    }

    pub fn finish_discovery_start_apply(self, entities: usize, validate_only: bool) -> Self {
        self.pb.finish_with_message(
            bright_green(format!("Phase 1/2: Discovered {entities} entities ✓")).to_string(),
        );
        let label = if validate_only {
            "Phase 2/2: Computing changes"
        } else {
            "Phase 2/2: Applying configuration"
        };
        let pb = create_spinner(bright_yellow(label).to_string());
        Self { pb, validate_only }
    }

    pub fn finish_apply(self) {
        let label = if self.validate_only {
            "Phase 2/2: Changes computed ✓"
        } else {
            "Phase 2/2: Configuration applied ✓"
        };
        self.pb.finish_with_message(bright_green(label).to_string());
        eprintln!();
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
