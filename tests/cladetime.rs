use std::path::Path;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};

use cladetime::as_of::{AsOf, FixedClock};
use cladetime::cladetime::CladeTime;
use cladetime::config::Config;
use cladetime::error::CladeTimeError;
use cladetime::s3::{ObjectVersion, PageMarker, VersionLister, VersionPage};
use cladetime::session::HttpFetch;

fn utc(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, hh, mm, ss).unwrap()
}

fn frozen_clock() -> FixedClock {
    FixedClock(utc(2025, 7, 13, 16, 21, 34))
}

/// Every key has one version per month since the floor; version ids encode
/// the key's file name and the month.
struct MonthlyVersions;

impl VersionLister for MonthlyVersions {
    fn list_versions(
        &self,
        _bucket: &str,
        prefix: &str,
        _marker: Option<&PageMarker>,
    ) -> Result<VersionPage, CladeTimeError> {
        let name = prefix.rsplit('/').next().unwrap_or(prefix);
        let mut versions = Vec::new();
        let mut month = utc(2023, 5, 1, 6, 0, 0);
        while month < utc(2025, 8, 1, 0, 0, 0) {
            versions.push(ObjectVersion {
                key: prefix.to_string(),
                version_id: format!("{name}@{}", month.format("%Y-%m")),
                last_modified: month,
            });
            month = month.checked_add_months(chrono::Months::new(1)).unwrap();
        }
        versions.reverse();
        Ok(VersionPage { versions, next: None })
    }
}

struct NoNetwork;

impl HttpFetch for NoNetwork {
    fn get_text(&self, url: &str) -> Result<String, CladeTimeError> {
        Err(CladeTimeError::TransportFailure {
            url: url.to_string(),
            status: 503,
            message: "unavailable".to_string(),
        })
    }

    fn download(&self, url: &str, _destination: &Path) -> Result<u64, CladeTimeError> {
        Err(CladeTimeError::Http(format!("unexpected download of {url}")))
    }
}

fn build(sequence: Option<&str>, tree: Option<&str>) -> Result<CladeTime<NoNetwork>, CladeTimeError> {
    let sequence = sequence.map(AsOf::date);
    let tree = tree.map(AsOf::date);
    CladeTime::with_parts(
        Config::default(),
        NoNetwork,
        &MonthlyVersions,
        &frozen_clock(),
        sequence.as_ref(),
        tree.as_ref(),
    )
}

#[test]
fn frozen_now_defaults() {
    let ct = build(None, Some("2023-12-21")).unwrap();
    assert_eq!(ct.sequence_as_of(), utc(2025, 7, 13, 16, 21, 34));
    assert_eq!(ct.tree_as_of(), utc(2023, 12, 21, 0, 0, 0));
    assert!(ct.url_sequence().ends_with("sequences.fasta.zst?versionId=sequences.fasta.zst@2025-07"));
    assert!(ct.url_ncov_metadata().is_some());
}

#[test]
fn urls_are_pinned_to_sequence_as_of() {
    let ct = build(Some("2024-09-01"), Some("2024-01-01")).unwrap();
    assert_eq!(
        ct.url_sequence(),
        "https://nextstrain-data.s3.amazonaws.com/files/ncov/open/sequences.fasta.zst?versionId=sequences.fasta.zst@2024-08"
    );
    assert_eq!(
        ct.url_sequence_metadata(),
        Some(
            "https://nextstrain-data.s3.amazonaws.com/files/ncov/open/metadata.tsv.zst?versionId=metadata.tsv.zst@2024-08"
        )
    );
    assert_eq!(
        ct.sequence_metadata().unwrap().version_id(),
        "metadata.tsv.zst@2024-08"
    );
}

#[test]
fn ncov_metadata_url_follows_cutover() {
    let before = build(Some("2024-07-31"), None).unwrap();
    assert!(before.url_ncov_metadata().is_none());
    let after = build(Some("2024-08-01"), None).unwrap();
    assert!(
        after
            .url_ncov_metadata()
            .unwrap()
            .contains("metadata_version.json?versionId=metadata_version.json@2024-07")
    );
}

#[test]
fn ncov_metadata_failure_degrades_to_empty() {
    let ct = build(Some("2024-10-01"), None).unwrap();
    assert_eq!(ct.fetch_ncov_metadata(), serde_json::json!({}));
}

#[test]
fn dates_before_floor_are_rejected() {
    assert_matches!(build(Some("2020-07-13"), None), Err(CladeTimeError::InvalidDate(_)));
    assert_matches!(
        build(Some("2024-01-01"), Some("2020-07-13")),
        Err(CladeTimeError::InvalidDate(_))
    );
}

#[test]
fn future_dates_clamp() {
    let ct = build(Some("2063-01-01"), Some("2064-01-01")).unwrap();
    assert_eq!(ct.sequence_as_of(), utc(2025, 7, 13, 16, 21, 34));
    assert_eq!(ct.tree_as_of(), ct.sequence_as_of());
}

#[test]
fn floor_day_before_first_version_is_not_found() {
    // The first version lands at 06:00 on the floor date.
    assert_matches!(
        build(Some("2023-05-01"), None),
        Err(CladeTimeError::VersionNotFound { .. })
    );
}

/// First page resolves normally; continuing the listing is refused.
struct DeniedAfterFirstPage;

impl VersionLister for DeniedAfterFirstPage {
    fn list_versions(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&PageMarker>,
    ) -> Result<VersionPage, CladeTimeError> {
        if marker.is_some() {
            return Err(CladeTimeError::TransportFailure {
                url: format!("s3://{bucket}/{prefix}"),
                status: 403,
                message: "AccessDenied".to_string(),
            });
        }
        let mut page = MonthlyVersions.list_versions(bucket, prefix, None)?;
        page.next = Some(PageMarker {
            key_marker: prefix.to_string(),
            version_id_marker: "page2".to_string(),
        });
        Ok(page)
    }
}

#[test]
fn listing_failure_fails_construction() {
    let result = CladeTime::with_parts(
        Config::default(),
        NoNetwork,
        &DeniedAfterFirstPage,
        &frozen_clock(),
        Some(&AsOf::date("2024-09-01")),
        None,
    );
    assert_matches!(
        result,
        Err(CladeTimeError::TransportFailure { status: 403, url, .. })
            if url.ends_with("sequences.fasta.zst")
    );
}
