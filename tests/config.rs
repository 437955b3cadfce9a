use std::fs;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use cladetime::config::{ConfigLoader, default_assignment_columns, defaults};
use cladetime::error::CladeTimeError;

#[test]
fn resolve_reads_explicit_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("cladetime.json");
    fs::write(
        &path,
        r#"{
            "nextstrain": {"ncov_metadata_cutover": "2024-09-01"},
            "nextclade": {"dataset_tag": "2024-10-17--16-48-48Z"},
            "http": {"timeout_secs": 30, "retry": {"max_retries": 2, "retry_statuses": [429, 503]}},
            "assignment_columns": ["Accession", "clade_nextstrain"]
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(
        config.nextstrain.ncov_metadata_cutover,
        NaiveDate::from_ymd_opt(2024, 9, 1).unwrap()
    );
    assert_eq!(config.nextstrain.bucket, defaults::NEXTSTRAIN_BUCKET);
    assert_eq!(config.nextclade.dataset_name, "sars-cov-2");
    assert_eq!(config.nextclade.dataset_tag, "2024-10-17--16-48-48Z");
    assert_eq!(config.http.timeout_secs, 30);
    assert_eq!(config.http.retry.max_retries, 2);
    assert_eq!(config.http.retry.retry_statuses, vec![429, 503]);
    assert_eq!(config.http.retry.allowed_methods, vec!["GET", "POST"]);
    assert_eq!(config.assignment_columns, vec!["Accession", "clade_nextstrain"]);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CladeTimeError::ConfigRead(_))
    );
}

#[test]
fn cutover_before_floor_is_rejected() {
    assert_matches!(
        ConfigLoader::parse(r#"{"nextstrain": {"ncov_metadata_cutover": "2023-01-01"}}"#),
        Err(CladeTimeError::ConfigParse(_))
    );
    assert_matches!(
        ConfigLoader::parse("{not json"),
        Err(CladeTimeError::ConfigParse(_))
    );
}

#[test]
fn metadata_key_can_be_disabled() {
    let config = ConfigLoader::parse(r#"{"nextstrain": {"genome_metadata_key": null}}"#).unwrap();
    assert!(config.nextstrain.genome_metadata_key.is_none());
    assert_eq!(default_assignment_columns().len(), 12);
}
