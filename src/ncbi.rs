use std::path::Path;

use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use tracing::info;

use crate::config::{HttpConfig, NcbiConfig};
use crate::error::CladeTimeError;
use crate::session::HttpSession;
use crate::telemetry::timed;

pub trait NcbiClient: Send + Sync {
    /// Downloads the SARS-CoV-2 genome package for sequences released on or
    /// after `released_since` into `destination` (a zip file).
    fn download_virus_package(
        &self,
        released_since: NaiveDate,
        destination: &Path,
    ) -> Result<u64, CladeTimeError>;
}

#[derive(Clone)]
pub struct NcbiHttpClient {
    session: HttpSession,
    base_url: String,
}

impl NcbiHttpClient {
    pub fn new(ncbi: &NcbiConfig, http: &HttpConfig) -> Result<Self, CladeTimeError> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Datasets-Client", HeaderValue::from_static("cladetime"));
        headers.insert(
            "X-Datasets-Client-Version",
            HeaderValue::from_str(env!("CARGO_PKG_VERSION"))
                .map_err(|err| CladeTimeError::Http(err.to_string()))?,
        );
        headers.insert(
            "X-Datasets-Client-OS",
            HeaderValue::from_str(std::env::consts::OS)
                .map_err(|err| CladeTimeError::Http(err.to_string()))?,
        );

        if let Ok(api_key) = std::env::var("NCBI_API_KEY") {
            if !api_key.trim().is_empty() {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(api_key.trim())
                        .map_err(|err| CladeTimeError::Http(err.to_string()))?,
                );
            }
        }

        Ok(Self {
            session: HttpSession::with_headers(http, headers)?,
            base_url: ncbi.base_url.clone(),
        })
    }
}

impl NcbiClient for NcbiHttpClient {
    fn download_virus_package(
        &self,
        released_since: NaiveDate,
        destination: &Path,
    ) -> Result<u64, CladeTimeError> {
        let body = virus_package_request(released_since);
        info!(released_since = %released_since, "NCBI API call starting");
        let bytes = timed("ncbi_virus_package", || {
            self.session
                .post_json_to_file(&self.base_url, &body, "application/zip", destination)
        })?;
        info!(bytes, package = %destination.display(), "NCBI API call completed");
        Ok(bytes)
    }
}

/// The download endpoint wants a full timestamp for `released_since`.
pub fn released_since_timestamp(date: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"))
}

pub fn virus_package_request(released_since: NaiveDate) -> serde_json::Value {
    json!({
        "released_since": released_since_timestamp(released_since),
        "taxon": "SARS-CoV-2",
        "refseq_only": false,
        "annotated_only": false,
        "host": "Homo sapiens",
        "complete_only": false,
        "table_fields": ["unspecified"],
        "include_sequence": ["GENOME"],
        "aux_report": ["DATASET_REPORT"],
        "format": "tsv",
        "use_psg": false,
    })
}
