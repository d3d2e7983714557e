//! Vote aggregation into per-period item and category counters

pub mod bucket;
pub mod processor;

pub use bucket::{buckets_for, Period, PeriodBucket, ALL_TIME_BUCKET};
pub use processor::{AggregateUpdateFailure, AggregationProcessor, AggregationReport};
