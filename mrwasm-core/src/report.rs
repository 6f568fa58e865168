//! Terminal output: doctor status lines and the build summary.
//!
//! Colors come from `yansi`; the binary decides whether they are
//! enabled for the current terminal.

use std::io::{self, Write};

use yansi::Paint;

use crate::config::{ArtifactLayout, BINARY_MODULE, HOST_PAGE, LOADER_SCRIPT};
use crate::doctor::{DoctorMode, ProbeReport};

pub const ALL_CLEAR: &str = "All tools found, ready to build.";

pub fn write_probe_report<W: Write>(
    out: &mut W,
    report: &ProbeReport,
    mode: DoctorMode,
) -> io::Result<()> {
    for tool in report.tools() {
        match &tool.path {
            Some(_) => writeln!(out, "  {} {}", "✓".green(), tool.name)?,
            None => writeln!(out, "  {} {} not found", "✗".red(), tool.name.bold())?,
        }
    }

    if report.has_errors() {
        writeln!(out)?;
        for category in report.missing_categories() {
            writeln!(out, "  {}", category.hint().yellow())?;
        }
    } else if mode == DoctorMode::Standalone {
        writeln!(out)?;
        writeln!(out, "{}", ALL_CLEAR.green().bold())?;
    }
    Ok(())
}

/// Tree of the three artifacts a successful build leaves in the output directory.
pub fn write_build_summary<W: Write>(out: &mut W, layout: &ArtifactLayout) -> io::Result<()> {
    writeln!(out, "{}", "Build succeeded".green().bold())?;
    writeln!(out, "{}/", layout.root().display())?;
    writeln!(out, "├── {BINARY_MODULE}")?;
    writeln!(out, "├── {LOADER_SCRIPT}")?;
    writeln!(out, "└── {HOST_PAGE}")?;
    Ok(())
}
