use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, TimeZone, Utc};
use tracing::warn;

use crate::error::CladeTimeError;

/// A user-supplied reference instant: a calendar date or a full timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsOf {
    /// `YYYY-MM-DD`, interpreted as midnight UTC. Kept raw so malformed
    /// values surface at validation time with their original spelling.
    Date(String),
    Timestamp(DateTime<FixedOffset>),
}

impl AsOf {
    pub fn date(value: impl Into<String>) -> Self {
        AsOf::Date(value.into())
    }

    /// Converts to a UTC instant truncated to whole seconds. Timestamps with
    /// an offset keep their instant; they are not relabelled.
    pub fn to_utc(&self) -> Result<DateTime<Utc>, CladeTimeError> {
        let instant = match self {
            AsOf::Date(raw) => {
                let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
                    CladeTimeError::InvalidDate(format!(
                        "invalid date string: {raw} (should be in YYYY-MM-DD format)"
                    ))
                })?;
                date.and_time(NaiveTime::MIN).and_utc()
            }
            AsOf::Timestamp(ts) => ts.with_timezone(&Utc),
        };
        Ok(instant.trunc_subsecs(0))
    }
}

impl fmt::Display for AsOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsOf::Date(raw) => write!(f, "{raw}"),
            AsOf::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl FromStr for AsOf {
    type Err = CladeTimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.len() <= 10 && !trimmed.contains(['T', 't', ' ']) {
            return Ok(AsOf::Date(trimmed.to_string()));
        }
        DateTime::parse_from_rfc3339(trimmed)
            .map(AsOf::Timestamp)
            .map_err(|_| {
                CladeTimeError::InvalidDate(format!(
                    "invalid timestamp: {value} (expected YYYY-MM-DD or RFC 3339)"
                ))
            })
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for AsOf {
    fn from(value: DateTime<Tz>) -> Self {
        AsOf::Timestamp(value.fixed_offset())
    }
}

/// Naive timestamps are taken to be UTC.
impl From<NaiveDateTime> for AsOf {
    fn from(value: NaiveDateTime) -> Self {
        AsOf::Timestamp(value.and_utc().fixed_offset())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// The pair of reference instants a [`crate::cladetime::CladeTime`] works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsOfWindow {
    sequence_as_of: DateTime<Utc>,
    tree_as_of: DateTime<Utc>,
}

impl AsOfWindow {
    /// Normalizes and validates both instants against `floor`.
    ///
    /// A missing sequence instant means `now`. A missing tree instant follows
    /// the sequence instant. Future sequence instants clamp to `now` and
    /// future tree instants clamp to the sequence instant, each with a
    /// warning.
    pub fn new(
        sequence: Option<&AsOf>,
        tree: Option<&AsOf>,
        now: DateTime<Utc>,
        floor: DateTime<Utc>,
    ) -> Result<Self, CladeTimeError> {
        let now = now.trunc_subsecs(0);

        let mut sequence_as_of = validate(sequence, now, floor)?;
        if sequence_as_of > now {
            warn!(
                requested = %sequence_as_of,
                clamped_to = %now,
                "specified sequence_as_of is in the future, defaulting to current time"
            );
            sequence_as_of = now;
        }

        let tree_as_of = match tree {
            None => sequence_as_of,
            Some(requested) => {
                let tree_as_of = validate(Some(requested), now, floor)?;
                if tree_as_of > now {
                    warn!(
                        requested = %tree_as_of,
                        clamped_to = %sequence_as_of,
                        "specified tree_as_of is in the future, defaulting to sequence_as_of"
                    );
                    sequence_as_of
                } else {
                    tree_as_of
                }
            }
        };

        Ok(Self {
            sequence_as_of,
            tree_as_of,
        })
    }

    pub fn sequence_as_of(&self) -> DateTime<Utc> {
        self.sequence_as_of
    }

    pub fn tree_as_of(&self) -> DateTime<Utc> {
        self.tree_as_of
    }
}

fn validate(
    requested: Option<&AsOf>,
    now: DateTime<Utc>,
    floor: DateTime<Utc>,
) -> Result<DateTime<Utc>, CladeTimeError> {
    let instant = match requested {
        Some(requested) => requested.to_utc()?,
        None => now,
    };
    if instant < floor {
        return Err(CladeTimeError::InvalidDate(format!(
            "date must be on or after {}: {instant}",
            floor.date_naive()
        )));
    }
    Ok(instant)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn utc(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, hh, mm, ss).unwrap()
    }

    fn floor() -> DateTime<Utc> {
        utc(2023, 5, 1, 0, 0, 0)
    }

    fn frozen_now() -> DateTime<Utc> {
        utc(2025, 7, 13, 16, 21, 34)
    }

    #[test]
    fn absent_sequence_uses_now() {
        let tree = AsOf::date("2023-12-21");
        let window = AsOfWindow::new(None, Some(&tree), frozen_now(), floor()).unwrap();
        assert_eq!(window.sequence_as_of(), frozen_now());
        assert_eq!(window.tree_as_of(), utc(2023, 12, 21, 0, 0, 0));
    }

    #[test]
    fn absent_tree_follows_sequence() {
        let naive = NaiveDate::from_ymd_opt(2024, 9, 30)
            .unwrap()
            .and_hms_micro_opt(18, 24, 59, 655_398)
            .unwrap();
        let sequence = AsOf::from(naive);
        let window = AsOfWindow::new(Some(&sequence), None, frozen_now(), floor()).unwrap();
        assert_eq!(window.sequence_as_of(), utc(2024, 9, 30, 18, 24, 59));
        assert_eq!(window.tree_as_of(), utc(2024, 9, 30, 18, 24, 59));
    }

    #[test]
    fn offsets_convert_to_the_same_instant() {
        let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
        let sequence = AsOf::from(
            eastern
                .with_ymd_and_hms(2024, 2, 22, 22, 22, 22)
                .unwrap(),
        );
        let tree = AsOf::from(eastern.with_ymd_and_hms(2024, 2, 22, 0, 0, 0).unwrap());
        let window = AsOfWindow::new(Some(&sequence), Some(&tree), frozen_now(), floor()).unwrap();
        assert_eq!(window.sequence_as_of(), utc(2024, 2, 23, 3, 22, 22));
        assert_eq!(window.tree_as_of(), utc(2024, 2, 22, 5, 0, 0));
    }

    #[test]
    fn future_dates_are_clamped() {
        let sequence = AsOf::date("2063-04-05");
        let tree = AsOf::date("2063-04-06");
        let window = AsOfWindow::new(Some(&sequence), Some(&tree), frozen_now(), floor()).unwrap();
        assert_eq!(window.sequence_as_of(), frozen_now());
        assert_eq!(window.tree_as_of(), frozen_now());

        let sequence = AsOf::date("2024-09-01");
        let window = AsOfWindow::new(Some(&sequence), Some(&tree), frozen_now(), floor()).unwrap();
        assert_eq!(window.tree_as_of(), utc(2024, 9, 1, 0, 0, 0));
    }

    #[test]
    fn dates_before_floor_are_rejected() {
        let early = AsOf::date("2020-07-13");
        let ok = AsOf::date("2024-01-01");
        assert_matches!(
            AsOfWindow::new(Some(&early), Some(&ok), frozen_now(), floor()),
            Err(CladeTimeError::InvalidDate(_))
        );
        assert_matches!(
            AsOfWindow::new(Some(&ok), Some(&early), frozen_now(), floor()),
            Err(CladeTimeError::InvalidDate(_))
        );
    }

    #[test]
    fn malformed_date_is_rejected() {
        let bad = AsOf::date("2022-12-32");
        let err = AsOfWindow::new(Some(&bad), None, frozen_now(), floor()).unwrap_err();
        assert_matches!(err, CladeTimeError::InvalidDate(ref msg) if msg.contains("YYYY-MM-DD"));
    }

    #[test]
    fn parse_specifiers() {
        assert_eq!("2024-01-01".parse::<AsOf>().unwrap(), AsOf::date("2024-01-01"));
        let ts: AsOf = "2024-01-01T12:30:00-04:00".parse().unwrap();
        assert_eq!(ts.to_utc().unwrap(), utc(2024, 1, 1, 16, 30, 0));
        assert_matches!(
            "2024-01-01T25:00".parse::<AsOf>(),
            Err(CladeTimeError::InvalidDate(_))
        );
    }
}
