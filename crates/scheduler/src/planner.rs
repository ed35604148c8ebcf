//! Batch planning — pure computation of a campaign's dispatch schedule.
//!
//! Planning happens lazily at first dispatch, so it must be deterministic:
//! the same contacts, batch size, interval, and start time always produce an
//! identical schedule.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::types::{Batch, BatchSchedule, BatchStatus};

/// Lays contacts out into `ceil(n / batch_size)` batches, batch *i* scheduled
/// at `start_time + i * interval_minutes`. Every contact lands in exactly one
/// batch; the last batch takes the remainder.
pub fn plan_schedule(
    contact_ids: &[Uuid],
    batch_size: u32,
    interval_minutes: u32,
    start_time: DateTime<Utc>,
) -> OutreachResult<BatchSchedule> {
    if batch_size == 0 {
        return Err(OutreachError::InvalidConfiguration(
            "batch_size must be greater than zero".to_string(),
        ));
    }
    if contact_ids.is_empty() {
        return Err(OutreachError::InvalidConfiguration(
            "cannot plan a schedule for a campaign with no contacts".to_string(),
        ));
    }

    let batches: Vec<Batch> = contact_ids
        .chunks(batch_size as usize)
        .enumerate()
        .map(|(i, chunk)| Batch {
            batch_number: i as u32,
            scheduled_time: start_time + Duration::minutes(i as i64 * i64::from(interval_minutes)),
            contact_ids: chunk.to_vec(),
            contact_count: chunk.len() as u32,
            status: BatchStatus::Pending,
            attempts: 0,
        })
        .collect();

    let total_batches = batches.len() as u32;
    let estimated_completion = batches
        .last()
        .map(|b| b.scheduled_time)
        .unwrap_or(start_time);

    Ok(BatchSchedule {
        batches,
        batch_size,
        interval_minutes,
        total_batches,
        estimated_completion,
    })
}
