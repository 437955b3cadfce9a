//! External command-line tools: `nextclade` and NCBI `dataformat`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Serialize;
use tracing::info;

use crate::error::CladeTimeError;

/// Columns requested from `dataformat tsv virus-genome`.
pub const SEQUENCE_METADATA_FIELDS: &[&str] = &[
    "accession",
    "sourcedb",
    "sra-accs",
    "isolate-lineage",
    "geo-region",
    "geo-location",
    "isolate-collection-date",
    "release-date",
    "update-date",
    "virus-pangolin",
    "length",
    "host-name",
    "isolate-lineage-source",
    "biosample-acc",
    "completeness",
    "lab-host",
    "submitter-names",
    "submitter-affiliation",
    "submitter-country",
];

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub nextclade: Option<String>,
    pub dataformat: Option<String>,
}

pub trait CladeAssigner: Send + Sync {
    /// Fetches the reference dataset `name` at `tag` as a zip archive.
    fn get_dataset(&self, name: &str, tag: &str, output_zip: &Path) -> Result<(), CladeTimeError>;
    /// Assigns every sequence in `sequences` to a clade, writing a
    /// `;`-delimited CSV.
    fn assign(&self, sequences: &Path, dataset: &Path, output_csv: &Path) -> Result<(), CladeTimeError>;
}

pub trait MetadataFormatter: Send + Sync {
    /// Renders an NCBI `data_report.jsonl` as a tab-separated table.
    fn format_sequence_metadata(&self, data_report: &Path, destination: &Path) -> Result<(), CladeTimeError>;
}

#[derive(Debug, Clone)]
pub struct SystemTools {
    nextclade: Option<PathBuf>,
    dataformat: Option<PathBuf>,
}

impl Default for SystemTools {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemTools {
    pub fn new() -> Self {
        Self {
            nextclade: find_in_path("nextclade"),
            dataformat: find_in_path("dataformat"),
        }
    }

    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            nextclade: self
                .nextclade
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
            dataformat: self
                .dataformat
                .as_ref()
                .and_then(|path| tool_version(path, &["version"])),
        }
    }

    fn require(tool: &Option<PathBuf>, name: &str) -> Result<PathBuf, CladeTimeError> {
        tool.clone()
            .ok_or_else(|| CladeTimeError::MissingTool(name.to_string()))
    }
}

impl CladeAssigner for SystemTools {
    fn get_dataset(&self, name: &str, tag: &str, output_zip: &Path) -> Result<(), CladeTimeError> {
        let nextclade = Self::require(&self.nextclade, "nextclade")?;
        let args = vec![
            "dataset".to_string(),
            "get".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--tag".to_string(),
            tag.to_string(),
            "--output-zip".to_string(),
            output_zip.to_string_lossy().to_string(),
        ];
        run_cmd("nextclade", &nextclade, &args, None)?;
        info!(version = tag, output_zip = %output_zip.display(), "Nextclade reference dataset retrieved");
        Ok(())
    }

    fn assign(&self, sequences: &Path, dataset: &Path, output_csv: &Path) -> Result<(), CladeTimeError> {
        let nextclade = Self::require(&self.nextclade, "nextclade")?;
        let args = vec![
            "run".to_string(),
            sequences.to_string_lossy().to_string(),
            "--input-dataset".to_string(),
            dataset.to_string_lossy().to_string(),
            "--output-csv".to_string(),
            output_csv.to_string_lossy().to_string(),
        ];
        run_cmd("nextclade", &nextclade, &args, None)?;
        info!(output_file = %output_csv.display(), "assigned sequences to clades via Nextclade CLI");
        Ok(())
    }
}

impl MetadataFormatter for SystemTools {
    fn format_sequence_metadata(&self, data_report: &Path, destination: &Path) -> Result<(), CladeTimeError> {
        let dataformat = Self::require(&self.dataformat, "dataformat")?;
        let args = vec![
            "tsv".to_string(),
            "virus-genome".to_string(),
            "--inputfile".to_string(),
            data_report.to_string_lossy().to_string(),
            "--fields".to_string(),
            SEQUENCE_METADATA_FIELDS.join(","),
        ];
        let stdout = File::create(destination).map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        run_cmd("dataformat", &dataformat, &args, Some(stdout))?;
        info!(metadata_file = %destination.display(), "extracted sequence metadata");
        Ok(())
    }
}

/// Runs `program`, sending stdout to `stdout` when given. A spawn failure or
/// non-zero exit becomes [`CladeTimeError::ToolInvocation`].
fn run_cmd(tool: &str, program: &Path, args: &[String], stdout: Option<File>) -> Result<(), CladeTimeError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(file) = stdout {
        cmd.stdout(Stdio::from(file));
    }
    let output = cmd.output().map_err(|err| CladeTimeError::ToolInvocation {
        tool: tool.to_string(),
        message: err.to_string(),
    })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed ({}): {}", output.status, program.display())
    } else {
        stderr
    };
    Err(CladeTimeError::ToolInvocation {
        tool: tool.to_string(),
        message,
    })
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if fs::metadata(&plain).is_ok_and(|meta| meta.is_file()) {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() { None } else { Some(stdout) }
}
