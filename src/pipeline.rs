//! The clade assignment pipeline: download sequences, assign clades with
//! Nextclade, merge with sequence metadata and write one CSV.

use std::time::{Duration, Instant};

use camino::Utf8Path;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::info;

use crate::assignments::{self, MergeContext, MergeOutcome, Table};
use crate::config::Config;
use crate::error::CladeTimeError;
use crate::fs_util;
use crate::ncbi::NcbiClient;
use crate::store::Store;
use crate::tools::{CladeAssigner, MetadataFormatter};

pub const RUN_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub sequence_released_since: NaiveDate,
    pub reference_tree_date: NaiveDate,
    pub data_dir: Option<String>,
    pub run_time: NaiveDateTime,
}

impl AssignRequest {
    pub fn run_time_label(&self) -> String {
        self.run_time.format(RUN_TIME_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignResult {
    pub assignment_file: String,
    pub num_sequences: usize,
    pub missing_assignments: usize,
    pub sequence_released_since: String,
    pub reference_tree_date: String,
    pub nextclade_dataset_tag: String,
    pub run_time: String,
}

pub struct Pipeline<N: NcbiClient, T: CladeAssigner + MetadataFormatter> {
    config: Config,
    ncbi: N,
    tools: T,
}

impl<N: NcbiClient, T: CladeAssigner + MetadataFormatter> Pipeline<N, T> {
    pub fn new(config: Config, ncbi: N, tools: T) -> Self {
        Self { config, ncbi, tools }
    }

    pub fn assign(&self, request: &AssignRequest, sink: &dyn ProgressSink) -> Result<AssignResult, CladeTimeError> {
        let run_time = request.run_time_label();
        let released = request.sequence_released_since.format("%Y-%m-%d").to_string();
        let store = Store::new(request.data_dir.as_deref(), &run_time)?;
        store.ensure_root()?;
        info!(
            reference_tree_date = %request.reference_tree_date,
            run_time,
            data_dir = %store.root(),
            "starting pipeline"
        );

        let tag = &self.config.nextclade.dataset_tag;
        let dataset = store.nextclade_dataset_path(tag);
        step(sink, "phase=Dataset; retrieving Nextclade reference dataset", || {
            self.tools
                .get_dataset(&self.config.nextclade.dataset_name, tag, dataset.as_std_path())
        })?;

        let package = store.ncbi_package_path(&self.config.ncbi.package_name);
        step(sink, "phase=Sequences; downloading NCBI genome package", || {
            self.ncbi
                .download_virus_package(request.sequence_released_since, package.as_std_path())?;
            fs_util::unzip_sequence_package(package.as_std_path(), store.root().as_std_path())
        })?;
        info!(package_location = %package, "NCBI SARS-CoV-2 genome package downloaded and unzipped");

        let metadata_file = store.sequence_metadata_file(&released);
        step(sink, "phase=Metadata; extracting sequence metadata", || {
            self.tools
                .format_sequence_metadata(store.ncbi_data_report().as_std_path(), metadata_file.as_std_path())
        })?;

        let raw_assignments = store.assignment_no_metadata_file(&released);
        step(sink, "phase=Assign; assigning clades", || {
            self.tools.assign(
                store.ncbi_sequence_file().as_std_path(),
                dataset.as_std_path(),
                raw_assignments.as_std_path(),
            )
        })?;

        let context = MergeContext {
            sequence_released_since: released.clone(),
            reference_tree_date: request.reference_tree_date.format("%Y-%m-%d").to_string(),
            sequence_retrieved_datetime: run_time.clone(),
        };
        let assignment_file = store.assignment_file(&released);
        let outcome = step(sink, "phase=Merge; merging metadata with assignments", || {
            merge_files(
                &metadata_file,
                &raw_assignments,
                &context,
                &self.config.assignment_columns,
            )
        })?;
        Store::write_atomic(&assignment_file, |writer| outcome.table.write_csv(writer))?;

        info!(
            assignment_file = %assignment_file,
            run_time,
            reference_tree_date = %context.reference_tree_date,
            "sequence clade assignments are ready"
        );
        Ok(AssignResult {
            assignment_file: assignment_file.to_string(),
            num_sequences: outcome.table.len(),
            missing_assignments: outcome.missing_assignments,
            sequence_released_since: released,
            reference_tree_date: context.reference_tree_date,
            nextclade_dataset_tag: tag.clone(),
            run_time,
        })
    }
}

/// Reads the tab-separated sequence metadata and the `;`-delimited Nextclade
/// output and merges them. Nothing is written.
pub fn merge_files(
    metadata_file: &Utf8Path,
    assignments_file: &Utf8Path,
    context: &MergeContext,
    columns: &[String],
) -> Result<MergeOutcome, CladeTimeError> {
    let metadata = Table::read(metadata_file.as_std_path(), b'\t')?;
    let raw = Table::read(assignments_file.as_std_path(), b';')?;
    let parsed = assignments::parse_sequence_assignments(raw)?;
    assignments::merge_metadata(&metadata, &parsed, context, columns)
}

fn step<R>(
    sink: &dyn ProgressSink,
    message: &str,
    f: impl FnOnce() -> Result<R, CladeTimeError>,
) -> Result<R, CladeTimeError> {
    sink.event(ProgressEvent {
        message: message.to_string(),
        elapsed: None,
    });
    let start = Instant::now();
    let value = f()?;
    sink.event(ProgressEvent {
        message: format!("{message}: done"),
        elapsed: Some(start.elapsed()),
    });
    Ok(value)
}
