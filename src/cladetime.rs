//! Point-in-time access to Nextstrain SARS-CoV-2 data.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::as_of::{AsOf, AsOfWindow, Clock, SystemClock};
use crate::config::Config;
use crate::error::CladeTimeError;
use crate::metadata::{self, GenomeMetadataRows};
use crate::s3::{self, ResolvedObject, S3Client, VersionLister};
use crate::session::{HttpFetch, HttpSession};

/// Nextstrain sequence data and Nextclade reference tree as they existed at
/// two (possibly different) points in time.
///
/// Every URL is resolved once, at construction. Methods that touch the
/// network say so in their names.
pub struct CladeTime<H: HttpFetch = HttpSession> {
    config: Config,
    http: H,
    window: AsOfWindow,
    sequence: ResolvedObject,
    sequence_metadata: Option<ResolvedObject>,
    ncov_metadata: Option<ResolvedObject>,
}

impl CladeTime<HttpSession> {
    pub fn new(sequence_as_of: Option<AsOf>, tree_as_of: Option<AsOf>) -> Result<Self, CladeTimeError> {
        Self::from_config(Config::default(), sequence_as_of.as_ref(), tree_as_of.as_ref())
    }

    pub fn from_config(
        config: Config,
        sequence_as_of: Option<&AsOf>,
        tree_as_of: Option<&AsOf>,
    ) -> Result<Self, CladeTimeError> {
        let http = HttpSession::new(&config.http)?;
        let lister = S3Client::new(&config.nextstrain)?;
        Self::with_parts(config, http, &lister, &SystemClock, sequence_as_of, tree_as_of)
    }
}

impl<H: HttpFetch> CladeTime<H> {
    pub fn with_parts<L: VersionLister + ?Sized>(
        config: Config,
        http: H,
        lister: &L,
        clock: &dyn Clock,
        sequence_as_of: Option<&AsOf>,
        tree_as_of: Option<&AsOf>,
    ) -> Result<Self, CladeTimeError> {
        let nextstrain = &config.nextstrain;
        let window = AsOfWindow::new(
            sequence_as_of,
            tree_as_of,
            clock.now(),
            nextstrain.min_sequence_datetime(),
        )?;
        let as_of = window.sequence_as_of();

        let sequence = s3::resolve_object(lister, &nextstrain.bucket, &nextstrain.genome_sequence_key, &as_of)?;
        let sequence_metadata = nextstrain
            .genome_metadata_key
            .as_deref()
            .map(|key| s3::resolve_object(lister, &nextstrain.bucket, key, &as_of))
            .transpose()?;
        // Nextstrain only publishes ncov pipeline metadata from the cutover on.
        let ncov_metadata = if as_of >= nextstrain.ncov_metadata_cutover_datetime() {
            Some(s3::resolve_object(
                lister,
                &nextstrain.bucket,
                &nextstrain.ncov_metadata_key,
                &as_of,
            )?)
        } else {
            debug!(sequence_as_of = %as_of, "no ncov metadata before cutover");
            None
        };

        Ok(Self {
            config,
            http,
            window,
            sequence,
            sequence_metadata,
            ncov_metadata,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn window(&self) -> AsOfWindow {
        self.window
    }

    pub fn sequence_as_of(&self) -> DateTime<Utc> {
        self.window.sequence_as_of()
    }

    pub fn tree_as_of(&self) -> DateTime<Utc> {
        self.window.tree_as_of()
    }

    pub fn url_sequence(&self) -> &str {
        &self.sequence.url
    }

    pub fn url_sequence_metadata(&self) -> Option<&str> {
        self.sequence_metadata.as_ref().map(|object| object.url.as_str())
    }

    pub fn url_ncov_metadata(&self) -> Option<&str> {
        self.ncov_metadata.as_ref().map(|object| object.url.as_str())
    }

    pub fn sequence_object(&self) -> &ResolvedObject {
        &self.sequence
    }

    /// Handle on the genome metadata file for `sequence_as_of`.
    pub fn sequence_metadata(&self) -> Result<SequenceMetadata<'_, H>, CladeTimeError> {
        let object = self.sequence_metadata.as_ref().ok_or_else(|| {
            CladeTimeError::InvalidUrl("CladeTime is missing url_sequence_metadata".to_string())
        })?;
        Ok(SequenceMetadata {
            http: &self.http,
            object,
        })
    }

    /// Fetches the ncov pipeline metadata document. Goes to the network on
    /// every call. Returns an empty object when there is no URL for
    /// `sequence_as_of` or the fetch fails.
    pub fn fetch_ncov_metadata(&self) -> serde_json::Value {
        let empty = serde_json::Value::Object(serde_json::Map::new());
        let Some(url) = self.url_ncov_metadata() else {
            return empty;
        };
        let parsed = self
            .http
            .get_text(url)
            .and_then(|body| serde_json::from_str(&body).map_err(|err| CladeTimeError::parse(url, err)));
        match parsed {
            Ok(value) => value,
            Err(err) => {
                warn!(url, error = %err, "failed to retrieve ncov metadata");
                empty
            }
        }
    }

    pub fn summary(&self) -> CladeTimeSummary {
        CladeTimeSummary {
            sequence_as_of: self.sequence_as_of(),
            tree_as_of: self.tree_as_of(),
            url_sequence: self.url_sequence().to_string(),
            url_sequence_metadata: self.url_sequence_metadata().map(str::to_string),
            url_ncov_metadata: self.url_ncov_metadata().map(str::to_string),
        }
    }
}

impl<H: HttpFetch> fmt::Display for CladeTime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Work with Nextstrain SARS-CoV-2 sequences as of {} and Nextclade clade assignments as of {}",
            self.sequence_as_of().to_rfc3339_opts(SecondsFormat::Secs, true),
            self.tree_as_of().to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

impl<H: HttpFetch> fmt::Debug for CladeTime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CladeTime")
            .field("sequence_as_of", &self.sequence_as_of())
            .field("tree_as_of", &self.tree_as_of())
            .finish()
    }
}

/// Serializable snapshot of a [`CladeTime`].
#[derive(Debug, Clone, Serialize)]
pub struct CladeTimeSummary {
    pub sequence_as_of: DateTime<Utc>,
    pub tree_as_of: DateTime<Utc>,
    pub url_sequence: String,
    pub url_sequence_metadata: Option<String>,
    pub url_ncov_metadata: Option<String>,
}

/// The genome metadata object pinned to one version.
#[derive(Debug)]
pub struct SequenceMetadata<'a, H: HttpFetch> {
    http: &'a H,
    object: &'a ResolvedObject,
}

impl<H: HttpFetch> SequenceMetadata<'_, H> {
    pub fn url(&self) -> &str {
        &self.object.url
    }

    pub fn version_id(&self) -> &str {
        self.object.version_id()
    }

    pub fn download_to(&self, data_dir: &Path, use_existing: bool) -> Result<PathBuf, CladeTimeError> {
        std::fs::create_dir_all(data_dir).map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        metadata::download_nextstrain_file(self.http, &self.object.url, data_dir, use_existing)
    }

    /// Downloads (or reuses) the file in `data_dir` and streams its rows.
    pub fn open(&self, data_dir: &Path) -> Result<GenomeMetadataRows, CladeTimeError> {
        let path = self.download_to(data_dir, true)?;
        metadata::read_genome_metadata(&path)
    }
}
