//! Clade prevalence: weekly proportions and the list of clades to model.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use tracing::info;

use crate::error::CladeTimeError;
use crate::metadata;
use crate::s3::VersionLister;
use crate::session::HttpFetch;
use crate::telemetry::timed;

/// Sequences of one clade collected at one location on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CladeCount {
    pub location: String,
    pub date: NaiveDate,
    pub clade: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyProportion {
    pub clade: String,
    pub week_start: NaiveDate,
    pub count: u64,
    pub total_count: u64,
    pub proportion: f64,
}

/// The Sunday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_sunday()))
}

/// Half-open `[start, end)` covering the `weeks` full weeks before the week
/// containing `latest`.
pub fn lookback_window(
    latest: NaiveDate,
    weeks: u32,
) -> Result<(NaiveDate, NaiveDate), CladeTimeError> {
    let end = week_start(latest);
    let start = end
        .checked_sub_days(Days::new(7 * u64::from(weeks)))
        .ok_or_else(|| {
            CladeTimeError::InvalidParameter(format!(
                "lookback of {weeks} weeks before {end} is out of the supported date range"
            ))
        })?;
    Ok((start, end))
}

/// Per (clade, week) share of all sequences in that week, for rows with a
/// date inside `[start, end)`.
pub fn weekly_proportions(
    counts: &[CladeCount],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<WeeklyProportion> {
    let mut by_clade_week: BTreeMap<(&str, NaiveDate), u64> = BTreeMap::new();
    let mut by_week: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for row in counts.iter().filter(|row| row.date >= start && row.date < end) {
        let week = week_start(row.date);
        *by_clade_week.entry((row.clade.as_str(), week)).or_default() += row.count;
        *by_week.entry(week).or_default() += row.count;
    }

    by_clade_week
        .into_iter()
        .filter_map(|((clade, week), count)| {
            let total_count = by_week.get(&week).copied().unwrap_or_default();
            (total_count > 0).then(|| WeeklyProportion {
                clade: clade.to_string(),
                week_start: week,
                count,
                total_count,
                proportion: count as f64 / total_count as f64,
            })
        })
        .collect()
}

/// Selects clades whose share of sequences exceeded `threshold` in any of
/// the `lookback_weeks` full weeks before the latest date in `counts`.
///
/// When more than `max_clades` qualify, the qualifying clades are ranked by
/// their total count over the window (descending, ties by name ascending)
/// and truncated. Otherwise the qualifying clades are returned in name order.
pub fn select_clades(
    counts: &[CladeCount],
    threshold: f64,
    lookback_weeks: u32,
    max_clades: usize,
) -> Result<Vec<String>, CladeTimeError> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(CladeTimeError::InvalidParameter(format!(
            "threshold must be in (0, 1]: {threshold}"
        )));
    }
    if lookback_weeks == 0 {
        return Err(CladeTimeError::InvalidParameter(
            "lookback_weeks must be at least 1".to_string(),
        ));
    }

    let Some(latest) = counts.iter().map(|row| row.date).max() else {
        return Ok(Vec::new());
    };
    let (start, end) = lookback_window(latest, lookback_weeks)?;
    let proportions = weekly_proportions(counts, start, end);

    let qualifying: BTreeSet<&str> = proportions
        .iter()
        .filter(|row| row.proportion > threshold)
        .map(|row| row.clade.as_str())
        .collect();

    if qualifying.len() <= max_clades {
        return Ok(qualifying.into_iter().map(str::to_string).collect());
    }

    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for row in proportions
        .iter()
        .filter(|row| qualifying.contains(row.clade.as_str()))
    {
        *totals.entry(row.clade.as_str()).or_default() += row.count;
    }
    let mut ranked: Vec<(&str, u64)> = totals.into_iter().collect();
    ranked.sort_by_key(|(clade, total)| (Reverse(*total), *clade));

    Ok(ranked
        .into_iter()
        .take(max_clades)
        .map(|(clade, _)| clade.to_string())
        .collect())
}

#[derive(Debug, Clone)]
pub struct CladeListOptions {
    pub data_dir: PathBuf,
    /// Use the metadata object as it existed on this date; latest when `None`.
    pub as_of: Option<NaiveDate>,
    pub use_existing: bool,
    pub threshold: f64,
    pub threshold_weeks: u32,
    pub max_clades: usize,
}

impl CladeListOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            as_of: None,
            use_existing: false,
            threshold: 0.01,
            threshold_weeks: 3,
            max_clades: 9,
        }
    }
}

/// Downloads genome metadata, filters it, and selects the clades to model.
pub fn get_clade_list<H, L>(
    http: &H,
    lister: &L,
    bucket: &str,
    key: &str,
    options: &CladeListOptions,
) -> Result<Vec<String>, CladeTimeError>
where
    H: HttpFetch + ?Sized,
    L: VersionLister + ?Sized,
{
    let metadata_path = metadata::download_covid_genome_metadata(
        http,
        lister,
        bucket,
        key,
        &options.data_dir,
        options.as_of,
        options.use_existing,
    )?;
    let filtered = timed("filter_covid_genome_metadata", || {
        metadata::filter_covid_genome_metadata(&metadata_path)
    })?;
    let counts = metadata::get_clade_counts(&filtered);
    let clades = timed("get_clades", || {
        select_clades(
            &counts,
            options.threshold,
            options.threshold_weeks,
            options.max_clades,
        )
    })?;
    info!(clades = ?clades, "generated clade list");
    Ok(clades)
}
