//! Nextstrain genome metadata: download, decoding, filtering and counting.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate, NaiveTime, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::info;

use crate::clades::CladeCount;
use crate::error::CladeTimeError;
use crate::s3::{self, VersionLister};
use crate::session::HttpFetch;
use crate::telemetry::timed;

/// The 50 US states plus the District of Columbia as Nextstrain spells it.
pub const US_LOCATIONS: [&str; 51] = [
    "Alabama",
    "Alaska",
    "Arizona",
    "Arkansas",
    "California",
    "Colorado",
    "Connecticut",
    "Delaware",
    "Florida",
    "Georgia",
    "Hawaii",
    "Idaho",
    "Illinois",
    "Indiana",
    "Iowa",
    "Kansas",
    "Kentucky",
    "Louisiana",
    "Maine",
    "Maryland",
    "Massachusetts",
    "Michigan",
    "Minnesota",
    "Mississippi",
    "Missouri",
    "Montana",
    "Nebraska",
    "Nevada",
    "New Hampshire",
    "New Jersey",
    "New Mexico",
    "New York",
    "North Carolina",
    "North Dakota",
    "Ohio",
    "Oklahoma",
    "Oregon",
    "Pennsylvania",
    "Rhode Island",
    "South Carolina",
    "South Dakota",
    "Tennessee",
    "Texas",
    "Utah",
    "Vermont",
    "Virginia",
    "Washington",
    "West Virginia",
    "Wisconsin",
    "Wyoming",
    "Washington DC",
];

/// The subset of Nextstrain metadata columns this crate reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenomeMetadataRecord {
    #[serde(default)]
    pub clade_nextstrain: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub genbank_accession: Option<String>,
    #[serde(default)]
    pub genbank_accession_rev: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

/// A metadata row that passed [`GenomeMetadataRecord::filtered`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredRecord {
    pub clade: String,
    pub country: String,
    pub date: NaiveDate,
    pub location: String,
    pub genbank_accession: Option<String>,
    pub genbank_accession_rev: Option<String>,
    pub host: String,
}

impl GenomeMetadataRecord {
    /// Applies the standard filter: human hosts in a US state or DC with a
    /// complete `YYYY-MM-DD` collection date and an assigned clade.
    /// Renames `clade_nextstrain` to `clade` and `division` to `location`.
    pub fn filtered(&self) -> Option<FilteredRecord> {
        let country = self.country.as_deref()?;
        let division = self.division.as_deref()?;
        let host = self.host.as_deref()?;
        if country != "USA" || host != "Homo sapiens" || !US_LOCATIONS.contains(&division) {
            return None;
        }
        let date = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        let clade = self.clade_nextstrain.as_deref()?;
        Some(FilteredRecord {
            clade: clade.to_string(),
            country: country.to_string(),
            date,
            location: division.to_string(),
            genbank_accession: self.genbank_accession.clone(),
            genbank_accession_rev: self.genbank_accession_rev.clone(),
            host: host.to_string(),
        })
    }
}

pub type GenomeMetadataRows = csv::DeserializeRecordsIntoIter<Box<dyn Read>, GenomeMetadataRecord>;

/// Opens a metadata file for streaming, decoding by extension
/// (`.zst`, `.gz`, anything else is plain TSV).
pub fn open_metadata(path: &Path) -> Result<Box<dyn Read>, CladeTimeError> {
    let file = File::open(path)
        .map_err(|err| CladeTimeError::Filesystem(format!("open {}: {err}", path.display())))?;
    let reader = BufReader::new(file);
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    Ok(match extension.as_str() {
        "zst" => Box::new(
            zstd::Decoder::with_buffer(reader)
                .map_err(|err| CladeTimeError::parse("zstd stream", err))?,
        ),
        "gz" => Box::new(GzDecoder::new(reader)),
        _ => Box::new(reader),
    })
}

pub fn read_genome_metadata(path: &Path) -> Result<GenomeMetadataRows, CladeTimeError> {
    let reader = open_metadata(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(reader)
        .into_deserialize())
}

/// Reads and filters a metadata file in one streaming pass.
pub fn filter_covid_genome_metadata(path: &Path) -> Result<Vec<FilteredRecord>, CladeTimeError> {
    let mut kept = Vec::new();
    let mut total = 0usize;
    for row in read_genome_metadata(path)? {
        let row = row.map_err(|err| CladeTimeError::parse("genome metadata", err))?;
        total += 1;
        if let Some(record) = row.filtered() {
            kept.push(record);
        }
    }
    info!(total, kept = kept.len(), "filtered genome metadata");
    Ok(kept)
}

/// Counts sequences by (location, date, clade).
pub fn get_clade_counts(records: &[FilteredRecord]) -> Vec<CladeCount> {
    let mut counts: BTreeMap<(&str, NaiveDate, &str), u64> = BTreeMap::new();
    for record in records {
        *counts
            .entry((record.location.as_str(), record.date, record.clade.as_str()))
            .or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((location, date, clade), count)| CladeCount {
            location: location.to_string(),
            date,
            clade: clade.to_string(),
            count,
        })
        .collect()
}

/// Downloads `url` into `data_dir`, named after the last path segment of
/// the URL. With `use_existing`, an already present file is reused.
pub fn download_nextstrain_file<H: HttpFetch + ?Sized>(
    http: &H,
    url: &str,
    data_dir: &Path,
    use_existing: bool,
) -> Result<PathBuf, CladeTimeError> {
    let filename = url_file_name(url)?;
    let destination = data_dir.join(filename);
    if use_existing && destination.exists() {
        info!(genome_file = %destination.display(), "using existing genome file");
        return Ok(destination);
    }
    info!(url, "downloading genome file");
    timed("download_nextstrain_file", || http.download(url, &destination))?;
    Ok(destination)
}

/// Downloads the genome metadata object as it existed at the end of
/// `as_of` (UTC), or the latest object when `as_of` is `None`. The file is
/// saved as `{date}-{object name}` in `data_dir`.
///
/// With `as_of` of `None` the version resolver is skipped entirely: the
/// unversioned URL is fetched and `{date}` is today's UTC date.
pub fn download_covid_genome_metadata<H, L>(
    http: &H,
    lister: &L,
    bucket: &str,
    key: &str,
    data_dir: &Path,
    as_of: Option<NaiveDate>,
    use_existing: bool,
) -> Result<PathBuf, CladeTimeError>
where
    H: HttpFetch + ?Sized,
    L: VersionLister + ?Sized,
{
    let object_name = key.rsplit('/').next().unwrap_or(key);
    let (date, url) = match as_of {
        Some(date) => {
            let end_of_day = date
                .checked_add_days(Days::new(1))
                .ok_or_else(|| CladeTimeError::InvalidDate(date.to_string()))?
                .and_time(NaiveTime::MIN)
                .and_utc()
                - chrono::Duration::seconds(1);
            let resolved = s3::resolve_object(lister, bucket, key, &end_of_day)?;
            (date, resolved.url)
        }
        None => (
            Utc::now().date_naive(),
            format!("https://{bucket}.s3.amazonaws.com/{key}"),
        ),
    };

    let destination = data_dir.join(format!("{}-{object_name}", date.format("%Y-%m-%d")));
    if use_existing && destination.exists() {
        info!(genome_metadata_file = %destination.display(), "using existing genome metadata file");
        return Ok(destination);
    }
    std::fs::create_dir_all(data_dir).map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
    info!(url = %url, "downloading genome metadata");
    timed("download_covid_genome_metadata", || http.download(&url, &destination))?;
    Ok(destination)
}

fn url_file_name(url: &str) -> Result<&str, CladeTimeError> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CladeTimeError::InvalidUrl(url.to_string()))
}
