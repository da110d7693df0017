use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the time window that shares one archive index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketGranularity {
    Hourly,
    #[default]
    Daily,
    Monthly,
}

impl BucketGranularity {
    fn label_format(&self) -> &'static str {
        match self {
            Self::Hourly => "%Y-%m-%d-%H",
            Self::Daily => "%Y-%m-%d",
            Self::Monthly => "%Y-%m",
        }
    }

    /// Start of the window containing `ts`.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let truncated = match self {
            Self::Hourly => ts.date_naive().and_hms_opt(ts.hour(), 0, 0),
            Self::Daily => ts.date_naive().and_hms_opt(0, 0, 0),
            Self::Monthly => NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)
                .and_then(|date| date.and_hms_opt(0, 0, 0)),
        };
        truncated.map(|naive| naive.and_utc()).unwrap_or(ts)
    }
}

/// Date-derived key naming a destination archive index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub granularity: BucketGranularity,
}

impl Bucket {
    /// Bucket of a record that ended at `end_date`.
    pub fn for_end_date(end_date: DateTime<Utc>, granularity: BucketGranularity) -> Self {
        Self {
            start: granularity.truncate(end_date),
            granularity,
        }
    }

    pub fn label(&self) -> String {
        self.start.format(self.granularity.label_format()).to_string()
    }

    pub fn destination_index(&self, base_index: &str) -> String {
        format!("{}-{}", base_index, self.label())
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 17).unwrap()
    }

    #[test]
    fn daily_bucket_names_the_end_day() {
        let bucket = Bucket::for_end_date(at(2026, 10, 16, 23, 59), BucketGranularity::Daily);
        assert_eq!(bucket.label(), "2026-10-16");
        assert_eq!(bucket.destination_index("list-view"), "list-view-2026-10-16");
    }

    #[test]
    fn hourly_and_monthly_labels() {
        let ts = at(2026, 3, 5, 7, 45);
        assert_eq!(Bucket::for_end_date(ts, BucketGranularity::Hourly).label(), "2026-03-05-07");
        assert_eq!(Bucket::for_end_date(ts, BucketGranularity::Monthly).label(), "2026-03");
    }

    #[test]
    fn records_of_the_same_day_share_a_bucket() {
        let morning = Bucket::for_end_date(at(2026, 10, 16, 0, 1), BucketGranularity::Daily);
        let night = Bucket::for_end_date(at(2026, 10, 16, 23, 58), BucketGranularity::Daily);
        let next = Bucket::for_end_date(at(2026, 10, 17, 0, 0), BucketGranularity::Daily);
        assert_eq!(morning, night);
        assert!(night < next);
    }
}
