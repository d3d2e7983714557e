//! Aggregation Processor - folds each accepted vote into period counters
//!
//! ## Architecture
//!
//! ```text
//! VoteEvent
//!     ↓
//! AggregationProcessor::on_vote()
//!     ↓  (for each of day / week / month / year / all)
//! AggregateStore::increment_item (winner: +vote +win)
//! AggregateStore::increment_item (loser: +vote, when loss tracking is on)
//! AggregateStore::increment_category (+vote)
//!     ↓
//! ItemStore::record_outcome (cumulative item counters)
//!     ↓
//! AggregationReport
//! ```
//!
//! Periods are independent: a failed write in one period is reported and
//! logged, and the remaining periods are still applied. Every failure in
//! the report names its record, so it can be retried on its own.

use super::bucket::{buckets_for, PeriodBucket};
use crate::error::StoreError;
use crate::store::{AggregateRecord, AggregateStore, ItemStore, SubjectType};
use crate::types::VoteEvent;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// One aggregate record that could not be updated
#[derive(Debug, Error)]
#[error("{subject_type} {subject_id} in {bucket} not updated: {source}")]
pub struct AggregateUpdateFailure {
    pub bucket: PeriodBucket,
    pub subject_type: SubjectType,
    pub subject_id: String,
    #[source]
    pub source: StoreError,
}

/// What `on_vote` managed to apply
#[derive(Debug)]
pub struct AggregationReport {
    pub vote_id: String,
    /// Buckets whose records were all updated
    pub applied: Vec<PeriodBucket>,
    pub failures: Vec<AggregateUpdateFailure>,
    /// Set when the cumulative item counters could not be bumped
    pub item_counter_error: Option<StoreError>,
}

impl AggregationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.item_counter_error.is_none()
    }
}

pub struct AggregationProcessor {
    aggregates: Arc<dyn AggregateStore>,

    /// Cumulative counters on the item rows; skipped when None
    items: Option<Arc<dyn ItemStore>>,

    /// Also give the loser an appearance in each period record
    count_losses: bool,

    /// Timestamp function (for testing with mock time)
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AggregationProcessor {
    pub fn new(aggregates: Arc<dyn AggregateStore>) -> Self {
        Self::new_with_timestamp_fn(aggregates, Box::new(Utc::now))
    }

    pub fn new_with_timestamp_fn(
        aggregates: Arc<dyn AggregateStore>,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            aggregates,
            items: None,
            count_losses: true,
            now_fn,
        }
    }

    pub fn with_item_counters(mut self, items: Arc<dyn ItemStore>) -> Self {
        self.items = Some(items);
        self
    }

    /// With loss tracking off, only the winner's record and the category
    /// record are touched per period
    pub fn with_loss_tracking(mut self, enabled: bool) -> Self {
        self.count_losses = enabled;
        self
    }

    /// Apply one accepted vote to every period bucket
    pub async fn on_vote(&self, event: &VoteEvent) -> AggregationReport {
        let mut report = AggregationReport {
            vote_id: event.vote_id.clone(),
            applied: Vec::with_capacity(5),
            failures: Vec::new(),
            item_counter_error: None,
        };

        for bucket in buckets_for(event.timestamp) {
            let failures = self.apply_period(event, &bucket).await;

            if failures.is_empty() {
                report.applied.push(bucket);
            } else {
                for failure in &failures {
                    log::error!("❌ Aggregate update failed for vote {}: {}", event.vote_id, failure);
                }
                report.failures.extend(failures);
            }
        }

        if let Some(items) = &self.items {
            if let Err(e) = items.record_outcome(&event.winner_id, &event.loser_id).await {
                log::error!("❌ Item counters not updated for vote {}: {}", event.vote_id, e);
                report.item_counter_error = Some(e);
            }
        }

        log::debug!(
            "Vote {} aggregated into {}/5 periods",
            event.vote_id,
            report.applied.len()
        );

        report
    }

    /// Update every record one period owns for this vote. Each record is
    /// attempted even if an earlier one failed.
    pub async fn apply_period(
        &self,
        event: &VoteEvent,
        bucket: &PeriodBucket,
    ) -> Vec<AggregateUpdateFailure> {
        let mut targets = vec![
            (SubjectType::Item, event.winner_id.as_str()),
            (SubjectType::Category, event.category.as_str()),
        ];
        if self.count_losses {
            targets.push((SubjectType::Item, event.loser_id.as_str()));
        }

        let mut failures = Vec::new();
        for (subject_type, subject_id) in targets {
            if let Err(source) = self.update_record(event, bucket, subject_type, subject_id).await {
                failures.push(AggregateUpdateFailure {
                    bucket: bucket.clone(),
                    subject_type,
                    subject_id: subject_id.to_string(),
                    source,
                });
            }
        }

        failures
    }

    /// Re-apply exactly the record a previous failure names
    pub async fn retry(
        &self,
        event: &VoteEvent,
        failure: &AggregateUpdateFailure,
    ) -> Result<AggregateRecord, StoreError> {
        self.update_record(event, &failure.bucket, failure.subject_type, &failure.subject_id)
            .await
    }

    async fn update_record(
        &self,
        event: &VoteEvent,
        bucket: &PeriodBucket,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<AggregateRecord, StoreError> {
        let now = (self.now_fn)();

        match subject_type {
            SubjectType::Item => {
                let won = subject_id == event.winner_id;
                self.aggregates
                    .increment_item(bucket.period, &bucket.key, subject_id, won, now)
                    .await
            }
            SubjectType::Category => {
                self.aggregates
                    .increment_category(bucket.period, &bucket.key, subject_id, now)
                    .await
            }
        }
    }
}
