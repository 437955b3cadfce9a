use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::NaiveDate;
use zip::write::SimpleFileOptions;

use cladetime::assignments::MergeContext;
use cladetime::config::Config;
use cladetime::error::CladeTimeError;
use cladetime::ncbi::NcbiClient;
use cladetime::output::JsonOutput;
use cladetime::pipeline::{self, AssignRequest, Pipeline, ProgressEvent, ProgressSink};
use cladetime::tools::{CladeAssigner, MetadataFormatter};

const METADATA_TSV: &str = "\
Accession\tSource database\tRelease date\tUpdate date\tIsolate Collection date\tVirus Pangolin Classification
PP782799.1\tGenBank\t2024-09-02\t2024-09-02\t2024-08-20\tKP.3.1.1
PQ100001.1\tGenBank\t2024-09-03\t2024-09-03\t2024-08-22\tXEC
PQ100002.1\tGenBank\t2024-09-04\t2024-09-04\t2024-08-25\tKP.2
";

const ASSIGNMENTS_CSV: &str = "\
index;seqName;clade;clade_nextstrain;Nextclade_pango;partiallyAliased;clade_who;clade_display
0;PP782799.1 Severe acute respiratory syndrome coronavirus 2 isolate SARS-CoV-2/human/USA/MA-1/2024;24E;24E;KP.3.1.1;B.1.1.529.2.86.1.1.11.1.3.1.1;Omicron;24E (KP.3.1.1)
1;PQ100001.1 Severe acute respiratory syndrome coronavirus 2 isolate SARS-CoV-2/human/USA/UT-2/2024;24F;24F;XEC;XEC;Omicron;24F (XEC)
";

struct MockNcbi;

impl NcbiClient for MockNcbi {
    fn download_virus_package(
        &self,
        released_since: NaiveDate,
        destination: &Path,
    ) -> Result<u64, CladeTimeError> {
        assert_eq!(released_since, NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());
        let file = fs::File::create(destination).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in [
            ("ncbi_dataset/data/data_report.jsonl", "{}\n"),
            ("ncbi_dataset/data/genomic.fna", ">PP782799.1\nACGT\n"),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        Ok(fs::metadata(destination).unwrap().len())
    }
}

struct MockTools {
    metadata: String,
}

impl CladeAssigner for MockTools {
    fn get_dataset(&self, name: &str, tag: &str, output_zip: &Path) -> Result<(), CladeTimeError> {
        assert_eq!(name, "sars-cov-2");
        assert_eq!(tag, "2024-07-17--12-57-03Z");
        fs::write(output_zip, b"dataset").unwrap();
        Ok(())
    }

    fn assign(&self, sequences: &Path, dataset: &Path, output_csv: &Path) -> Result<(), CladeTimeError> {
        assert!(sequences.ends_with("ncbi_dataset/data/genomic.fna"));
        assert!(sequences.exists());
        assert!(dataset.exists());
        fs::write(output_csv, ASSIGNMENTS_CSV).unwrap();
        Ok(())
    }
}

impl MetadataFormatter for MockTools {
    fn format_sequence_metadata(&self, data_report: &Path, destination: &Path) -> Result<(), CladeTimeError> {
        assert!(data_report.exists());
        fs::write(destination, &self.metadata).unwrap();
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

fn request(data_dir: &Path) -> AssignRequest {
    AssignRequest {
        sequence_released_since: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
        reference_tree_date: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
        data_dir: Some(data_dir.to_string_lossy().to_string()),
        run_time: NaiveDate::from_ymd_opt(2024, 9, 10)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap(),
    }
}

fn pipeline(metadata: &str) -> Pipeline<MockNcbi, MockTools> {
    Pipeline::new(
        Config::default(),
        MockNcbi,
        MockTools {
            metadata: metadata.to_string(),
        },
    )
}

#[test]
fn assign_writes_merged_assignments() {
    let temp = tempfile::tempdir().unwrap();
    let sink = RecordingSink::default();
    let result = pipeline(METADATA_TSV).assign(&request(temp.path()), &sink).unwrap();

    assert_eq!(result.num_sequences, 3);
    assert_eq!(result.missing_assignments, 1);
    assert_eq!(result.run_time, "20240910T083000");
    assert!(result.assignment_file.ends_with("2024-09-01_clade_assignments.csv"));

    let mut reader = csv::Reader::from_path(&result.assignment_file).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(headers, Config::default().assignment_columns);
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(&rows[0][0], "PP782799.1");
    assert_eq!(&rows[0][6], "24E");
    assert_eq!(&rows[1][6], "24F");
    assert_eq!(&rows[2][6], "");

    let events = sink.events.lock().unwrap();
    assert!(events.first().unwrap().starts_with("phase=Dataset"));
    assert!(events.iter().any(|event| event.starts_with("phase=Merge")));
}

#[test]
fn duplicate_accessions_abort_before_output() {
    let temp = tempfile::tempdir().unwrap();
    let duplicated =
        format!("{METADATA_TSV}PQ100001.1\tGenBank\t2024-09-03\t2024-09-03\t2024-08-22\tXEC\n");
    let err = pipeline(&duplicated)
        .assign(&request(temp.path()), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, CladeTimeError::DataIntegrity(_));
    assert!(!temp.path().join("2024-09-01_clade_assignments.csv").exists());
}

#[test]
fn merge_adds_context_columns() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let metadata = root.join("metadata.tsv");
    let assignments = root.join("assignments.csv");
    fs::write(&metadata, METADATA_TSV).unwrap();
    fs::write(&assignments, ASSIGNMENTS_CSV).unwrap();
    let context = MergeContext {
        sequence_released_since: "2024-09-01".to_string(),
        reference_tree_date: "2024-08-01".to_string(),
        sequence_retrieved_datetime: "20240910T083000".to_string(),
    };

    let outcome = pipeline::merge_files(&metadata, &assignments, &context, &[]).unwrap();
    let table = outcome.table;
    assert_eq!(table.len(), 3);
    assert_eq!(
        &table.headers[table.headers.len() - 3..],
        ["sequence_released_since", "reference_tree_date", "sequence_retrieved_datetime"]
    );
    assert!(table.column_index("seq").is_none());
    assert_eq!(
        table.column("reference_tree_date").unwrap(),
        vec!["2024-08-01"; 3]
    );
    assert_eq!(
        table.column("seqName").unwrap()[2],
        ""
    );
}
