//! Calendar periods and the bucket keys votes roll up into
//!
//! All bucketing is done in UTC:
//! - day:   `YYYY-MM-DD`
//! - week:  `YYYY-MM-DD` of the Sunday that starts the week
//! - month: `YYYY-MM`
//! - year:  `YYYY`
//! - all:   the fixed key `all-time`

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ALL_TIME_BUCKET: &str = "all-time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
    All,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::All => "all",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Period::Day),
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            "year" => Some(Period::Year),
            "all" => Some(Period::All),
            _ => None,
        }
    }

    pub fn all() -> [Period; 5] {
        [
            Period::Day,
            Period::Week,
            Period::Month,
            Period::Year,
            Period::All,
        ]
    }

    /// Bucket key for `timestamp` in this period
    pub fn bucket_key(&self, timestamp: DateTime<Utc>) -> String {
        match self {
            Period::Day => timestamp.format("%Y-%m-%d").to_string(),
            Period::Week => {
                let date = timestamp.date_naive();
                let offset = date.weekday().num_days_from_sunday() as i64;
                (date - Duration::days(offset)).format("%Y-%m-%d").to_string()
            }
            Period::Month => timestamp.format("%Y-%m").to_string(),
            Period::Year => timestamp.format("%Y").to_string(),
            Period::All => ALL_TIME_BUCKET.to_string(),
        }
    }

    pub fn bucket_for(&self, timestamp: DateTime<Utc>) -> PeriodBucket {
        PeriodBucket {
            period: *self,
            key: self.bucket_key(timestamp),
        }
    }

    /// Cache lifetime a leaderboard for this period may be served with
    pub fn cache_max_age_secs(&self) -> u64 {
        match self {
            Period::Day => 300,
            Period::Week => 900,
            Period::Month => 1800,
            Period::Year | Period::All => 3600,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A period together with the bucket key a timestamp falls into
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodBucket {
    pub period: Period,
    pub key: String,
}

impl fmt::Display for PeriodBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.period, self.key)
    }
}

/// One bucket per period for `timestamp`, in `Period::all()` order
pub fn buckets_for(timestamp: DateTime<Utc>) -> [PeriodBucket; 5] {
    Period::all().map(|period| period.bucket_for(timestamp))
}
