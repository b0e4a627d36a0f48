// Matches schedule specs against wall-clock minutes in the reference
// timezone. A spec fires when the local weekday's bit is set in its mask and
// the local time, truncated to the minute, equals its time_of_day.

use crate::errors::TriggerError;
use crate::models::{day_bit, ScheduleSpec, ALL_DAYS_MASK};
use crate::trigger::watermark::WatermarkStore;
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Minute bucket for an instant: whole minutes since the Unix epoch. The
/// bucket is timezone-independent, so two evaluators in different zones agree
/// on whether a given minute has already fired.
pub fn minute_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(60)
}

pub struct TriggerEvaluator {
    timezone: Tz,
    watermarks: Arc<dyn WatermarkStore>,
}

impl TriggerEvaluator {
    pub fn new(timezone: Tz, watermarks: Arc<dyn WatermarkStore>) -> Self {
        Self {
            timezone,
            watermarks,
        }
    }

    /// Pure day/time match, without consulting the watermark.
    pub fn matches_minute(&self, spec: &ScheduleSpec, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);

        if spec.days_of_week_mask & day_bit(local.weekday()) == 0 {
            return false;
        }

        local.hour() == spec.time_of_day.hour() && local.minute() == spec.time_of_day.minute()
    }

    /// Evaluate all specs against `now`, returning those this caller owns the
    /// fire for. Specs whose minute matches but whose watermark was already
    /// advanced (by an earlier tick or a concurrent evaluator) are skipped.
    #[instrument(skip(self, specs), fields(spec_count = specs.len()))]
    pub async fn evaluate(
        &self,
        now: DateTime<Utc>,
        specs: &[ScheduleSpec],
    ) -> Result<Vec<ScheduleSpec>, TriggerError> {
        let bucket = minute_bucket(now);
        let mut fired = Vec::new();

        for spec in specs {
            if spec.days_of_week_mask & !ALL_DAYS_MASK != 0 {
                warn!(
                    spec_id = %spec.id,
                    mask = spec.days_of_week_mask,
                    "Skipping spec with out-of-range day mask"
                );
                continue;
            }

            if !self.matches_minute(spec, now) {
                continue;
            }

            if self.watermarks.try_advance(spec.id, bucket).await? {
                debug!(spec_id = %spec.id, list_id = %spec.list_id, bucket, "Spec fired");
                fired.push(spec.clone());
            } else {
                debug!(spec_id = %spec.id, bucket, "Minute already fired, skipping");
            }
        }

        Ok(fired)
    }
}
