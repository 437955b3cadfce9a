use std::io::{self, Write};

use serde::Serialize;

use crate::cladetime::CladeTimeSummary;
use crate::pipeline::{AssignResult, ProgressEvent, ProgressSink};
use crate::s3::ObjectVersion;
use crate::tools::ToolInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct CladeListResult {
    pub as_of: Option<String>,
    pub clades: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub bucket: String,
    pub as_of: String,
    pub version: ObjectVersion,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    #[serde(flatten)]
    pub clade_time: CladeTimeSummary,
    pub ncov_metadata: serde_json::Value,
    pub tools: ToolInfo,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_assign(result: &AssignResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clades(result: &CladeListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_resolve(result: &ResolveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Plain-text progress lines on stderr.
pub struct TextProgress;

impl ProgressSink for TextProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_assign(result: &AssignResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "assignment file: {}", result.assignment_file)?;
        writeln!(
            stdout,
            "sequences: {} ({} without a clade assignment)",
            result.num_sequences, result.missing_assignments
        )?;
        writeln!(stdout, "nextclade dataset: {}", result.nextclade_dataset_tag)
    }

    pub fn print_clades(result: &CladeListResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        for clade in &result.clades {
            writeln!(stdout, "{clade}")?;
        }
        Ok(())
    }

    pub fn print_resolve(result: &ResolveResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", result.url)?;
        writeln!(
            stdout,
            "version {} last modified {}",
            result.version.version_id, result.version.last_modified
        )
    }

    pub fn print_info(summary: &str, result: &InfoResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{summary}")?;
        writeln!(stdout, "sequences: {}", result.clade_time.url_sequence)?;
        writeln!(
            stdout,
            "sequence metadata: {}",
            result.clade_time.url_sequence_metadata.as_deref().unwrap_or("-")
        )?;
        writeln!(
            stdout,
            "ncov metadata: {}",
            result.clade_time.url_ncov_metadata.as_deref().unwrap_or("-")
        )?;
        writeln!(
            stdout,
            "nextclade: {}",
            result.tools.nextclade.as_deref().unwrap_or("not found")
        )?;
        writeln!(
            stdout,
            "dataformat: {}",
            result.tools.dataformat.as_deref().unwrap_or("not found")
        )
    }
}
