use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CladeTimeError;
use crate::session::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = "cladetime.json";

/// Built-in values used when no config file overrides them.
pub mod defaults {
    pub const NEXTSTRAIN_BUCKET: &str = "nextstrain-data";
    pub const NEXTSTRAIN_REGION: &str = "us-east-1";
    pub const GENOME_SEQUENCE_KEY: &str = "files/ncov/open/sequences.fasta.zst";
    pub const GENOME_METADATA_KEY: &str = "files/ncov/open/metadata.tsv.zst";
    pub const NCOV_METADATA_KEY: &str = "files/ncov/open/metadata_version.json";

    /// Earliest date for which Nextstrain open sequence history is retained.
    pub const MIN_SEQUENCE_DATE: (i32, u32, u32) = (2023, 5, 1);
    /// Nextstrain began publishing ncov pipeline metadata on this date.
    pub const NCOV_METADATA_CUTOVER: (i32, u32, u32) = (2024, 8, 1);

    pub const NCBI_BASE_URL: &str =
        "https://api.ncbi.nlm.nih.gov/datasets/v2alpha/virus/genome/download";
    pub const NCBI_PACKAGE_NAME: &str = "ncbi.zip";

    pub const NEXTCLADE_DATASET_NAME: &str = "sars-cov-2";
    pub const NEXTCLADE_DATASET_TAG: &str = "2024-07-17--12-57-03Z";

    pub const HTTP_TIMEOUT_SECS: u64 = 300;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub nextstrain: NextstrainConfig,
    pub ncbi: NcbiConfig,
    pub nextclade: NextcladeConfig,
    pub http: HttpConfig,
    pub assignment_columns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nextstrain: NextstrainConfig::default(),
            ncbi: NcbiConfig::default(),
            nextclade: NextcladeConfig::default(),
            http: HttpConfig::default(),
            assignment_columns: default_assignment_columns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NextstrainConfig {
    pub bucket: String,
    pub region: String,
    /// Overrides the S3 endpoint; requests then use path-style addressing.
    pub endpoint_url: Option<String>,
    pub genome_sequence_key: String,
    /// `None` disables the sequence metadata location entirely.
    pub genome_metadata_key: Option<String>,
    pub ncov_metadata_key: String,
    pub min_sequence_date: NaiveDate,
    pub ncov_metadata_cutover: NaiveDate,
}

impl NextstrainConfig {
    pub fn min_sequence_datetime(&self) -> DateTime<Utc> {
        midnight_utc(self.min_sequence_date)
    }

    pub fn ncov_metadata_cutover_datetime(&self) -> DateTime<Utc> {
        midnight_utc(self.ncov_metadata_cutover)
    }
}

impl Default for NextstrainConfig {
    fn default() -> Self {
        Self {
            bucket: defaults::NEXTSTRAIN_BUCKET.to_string(),
            region: defaults::NEXTSTRAIN_REGION.to_string(),
            endpoint_url: None,
            genome_sequence_key: defaults::GENOME_SEQUENCE_KEY.to_string(),
            genome_metadata_key: Some(defaults::GENOME_METADATA_KEY.to_string()),
            ncov_metadata_key: defaults::NCOV_METADATA_KEY.to_string(),
            min_sequence_date: ymd(defaults::MIN_SEQUENCE_DATE),
            ncov_metadata_cutover: ymd(defaults::NCOV_METADATA_CUTOVER),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NcbiConfig {
    pub base_url: String,
    pub package_name: String,
}

impl Default for NcbiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::NCBI_BASE_URL.to_string(),
            package_name: defaults::NCBI_PACKAGE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NextcladeConfig {
    pub dataset_name: String,
    pub dataset_tag: String,
}

impl Default for NextcladeConfig {
    fn default() -> Self {
        Self {
            dataset_name: defaults::NEXTCLADE_DATASET_NAME.to_string(),
            dataset_tag: defaults::NEXTCLADE_DATASET_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::HTTP_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path` when given, otherwise `cladetime.json` in the current
    /// directory if present, otherwise the built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<Config, CladeTimeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE_NAME),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CladeTimeError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, CladeTimeError> {
        let config: Config = serde_json::from_str(content)
            .map_err(|err| CladeTimeError::ConfigParse(err.to_string()))?;
        if config.nextstrain.ncov_metadata_cutover < config.nextstrain.min_sequence_date {
            return Err(CladeTimeError::ConfigParse(
                "ncov_metadata_cutover precedes min_sequence_date".to_string(),
            ));
        }
        Ok(config)
    }
}

pub fn default_assignment_columns() -> Vec<String> {
    [
        "Accession",
        "Source database",
        "Release date",
        "Update date",
        "Isolate Collection date",
        "clade",
        "clade_nextstrain",
        "Nextclade_pango",
        "partiallyAliased",
        "clade_who",
        "clade_display",
        "Virus Pangolin Classification",
    ]
    .iter()
    .map(|value| value.to_string())
    .collect()
}

fn ymd((year, month, day): (i32, u32, u32)) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

pub(crate) fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_date_constants() {
        let config = Config::default();
        assert_eq!(
            config.nextstrain.min_sequence_date,
            NaiveDate::from_ymd_opt(2023, 5, 1).unwrap()
        );
        assert_eq!(
            config.nextstrain.ncov_metadata_cutover,
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap()
        );
        assert_eq!(config.http.retry.max_retries, 5);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config = ConfigLoader::parse(
            r#"{"nextstrain": {"bucket": "versioned-bucket", "min_sequence_date": "2023-01-01"}}"#,
        )
        .unwrap();
        assert_eq!(config.nextstrain.bucket, "versioned-bucket");
        assert_eq!(config.nextstrain.genome_sequence_key, defaults::GENOME_SEQUENCE_KEY);
        assert_eq!(
            config.nextstrain.min_sequence_datetime().to_rfc3339(),
            "2023-01-01T00:00:00+00:00"
        );
        assert_eq!(config.assignment_columns, default_assignment_columns());
    }
}
