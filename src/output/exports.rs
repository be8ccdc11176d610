use std::io::Write;

use crate::error::Result;
use crate::report::RunReport;

/// Writes the run report as a single JSON document.
pub fn export_json(report: &RunReport, pretty: bool, output: &mut dyn Write) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    writeln!(output, "{json}")?;
    Ok(())
}
