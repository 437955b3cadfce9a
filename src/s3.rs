//! Point-in-time lookups against a versioned, publicly readable S3 bucket.
//!
//! S3 exposes object history through the paginated `ListObjectVersions`
//! call. [`VersionHistory`] walks every page lazily and [`resolve_version`]
//! picks the newest version whose `LastModified` is not after the requested
//! instant. The listing is not assumed to be ordered, so the whole history
//! is always enumerated.

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::{debug, error};

use crate::config::NextstrainConfig;
use crate::error::CladeTimeError;

/// One entry of an object's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub last_modified: DateTime<Utc>,
}

/// A version together with the URL that retrieves exactly that version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedObject {
    pub version: ObjectVersion,
    pub url: String,
}

impl ResolvedObject {
    pub fn version_id(&self) -> &str {
        &self.version.version_id
    }
}

/// Continuation point returned with a truncated listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMarker {
    pub key_marker: String,
    pub version_id_marker: String,
}

#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    pub versions: Vec<ObjectVersion>,
    pub next: Option<PageMarker>,
}

pub trait VersionLister: Send + Sync {
    /// Fetches one page of the version listing for `prefix`, starting after
    /// `marker` when given.
    fn list_versions(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&PageMarker>,
    ) -> Result<VersionPage, CladeTimeError>;
}

/// Lazy, finite sequence of every version under a prefix, one page at a time.
pub struct VersionHistory<'a, L: VersionLister + ?Sized> {
    lister: &'a L,
    bucket: &'a str,
    prefix: &'a str,
    marker: Option<PageMarker>,
    buffer: std::vec::IntoIter<ObjectVersion>,
    exhausted: bool,
    pages: usize,
}

impl<'a, L: VersionLister + ?Sized> VersionHistory<'a, L> {
    pub fn new(lister: &'a L, bucket: &'a str, prefix: &'a str) -> Self {
        Self {
            lister,
            bucket,
            prefix,
            marker: None,
            buffer: Vec::new().into_iter(),
            exhausted: false,
            pages: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    fn fetch_page(&mut self) -> Result<(), CladeTimeError> {
        let page = self
            .lister
            .list_versions(self.bucket, self.prefix, self.marker.as_ref())?;
        self.pages += 1;
        debug!(
            bucket = self.bucket,
            prefix = self.prefix,
            page = self.pages,
            versions = page.versions.len(),
            "listed object versions"
        );
        if page.next.is_some() && page.next == self.marker {
            return Err(CladeTimeError::parse(
                "S3 version listing",
                "pagination marker did not advance",
            ));
        }
        self.buffer = page.versions.into_iter();
        self.exhausted = page.next.is_none();
        self.marker = page.next;
        Ok(())
    }
}

impl<L: VersionLister + ?Sized> Iterator for VersionHistory<'_, L> {
    type Item = Result<ObjectVersion, CladeTimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(version) = self.buffer.next() {
                return Some(Ok(version));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}

/// Returns the version of `key` that was current at `as_of`.
///
/// Only entries whose key matches exactly are considered, since the listing
/// is by prefix. When two versions share a `LastModified` the first one seen
/// wins; S3 does not produce such ties in practice.
pub fn resolve_version<L, Tz>(
    lister: &L,
    bucket: &str,
    key: &str,
    as_of: &DateTime<Tz>,
) -> Result<ObjectVersion, CladeTimeError>
where
    L: VersionLister + ?Sized,
    Tz: TimeZone,
{
    let as_of = as_of.with_timezone(&Utc);
    let mut selected: Option<ObjectVersion> = None;

    for version in VersionHistory::new(lister, bucket, key) {
        let version = version.inspect_err(|err| {
            error!(bucket, key, error = %err, "S3 client error");
        })?;
        if version.key != key || version.last_modified > as_of {
            continue;
        }
        if selected
            .as_ref()
            .is_none_or(|best| version.last_modified > best.last_modified)
        {
            selected = Some(version);
        }
    }

    selected.ok_or_else(|| CladeTimeError::VersionNotFound {
        key: key.to_string(),
        as_of,
    })
}

/// Resolves `key` at `as_of` and builds the version-pinned retrieval URL.
pub fn resolve_object<L, Tz>(
    lister: &L,
    bucket: &str,
    key: &str,
    as_of: &DateTime<Tz>,
) -> Result<ResolvedObject, CladeTimeError>
where
    L: VersionLister + ?Sized,
    Tz: TimeZone,
{
    let version = resolve_version(lister, bucket, key, as_of)?;
    let url = object_url(bucket, key, &version.version_id);
    Ok(ResolvedObject { version, url })
}

pub fn object_url(bucket: &str, key: &str, version_id: &str) -> String {
    format!("https://{bucket}.s3.amazonaws.com/{key}?versionId={version_id}")
}

/// Anonymous `ListObjectVersions` through the AWS SDK.
///
/// The SDK is async; each call is driven to completion on a private
/// current-thread runtime so callers stay blocking.
pub struct S3Client {
    client: Client,
    runtime: Runtime,
}

impl S3Client {
    pub fn new(config: &NextstrainConfig) -> Result<Self, CladeTimeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| CladeTimeError::Http(format!("failed to start S3 runtime: {err}")))?;

        let shared = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .no_credentials()
                .region(Region::new(config.region.clone()))
                .load(),
        );
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            runtime,
        })
    }
}

impl VersionLister for S3Client {
    fn list_versions(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&PageMarker>,
    ) -> Result<VersionPage, CladeTimeError> {
        let mut request = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .prefix(prefix);
        if let Some(marker) = marker {
            request = request
                .key_marker(&marker.key_marker)
                .version_id_marker(&marker.version_id_marker);
        }

        let response = self.runtime.block_on(request.send()).map_err(|err| {
            let url = format!("s3://{bucket}/{prefix}");
            let message = DisplayErrorContext(&err).to_string();
            match err.raw_response().map(|raw| raw.status().as_u16()) {
                Some(status) => CladeTimeError::TransportFailure {
                    url,
                    status,
                    message,
                },
                None => CladeTimeError::Http(format!("{url}: {message}")),
            }
        })?;

        // Delete markers arrive in a separate list and are never candidates.
        let mut versions = Vec::new();
        for version in response.versions.unwrap_or_default() {
            let (Some(key), Some(version_id), Some(modified)) =
                (version.key, version.version_id, version.last_modified)
            else {
                return Err(CladeTimeError::parse(
                    "S3 version listing",
                    "version without Key, VersionId or LastModified",
                ));
            };
            let last_modified = DateTime::from_timestamp(modified.secs(), modified.subsec_nanos())
                .ok_or_else(|| CladeTimeError::parse("S3 LastModified", format!("{modified:?}")))?;
            versions.push(ObjectVersion {
                key,
                version_id,
                last_modified,
            });
        }

        let next = if response.is_truncated.unwrap_or(false) {
            let key_marker = response.next_key_marker.ok_or_else(|| {
                CladeTimeError::parse("S3 version listing", "truncated page without NextKeyMarker")
            })?;
            Some(PageMarker {
                key_marker,
                version_id_marker: response.next_version_id_marker.unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(VersionPage { versions, next })
    }
}
