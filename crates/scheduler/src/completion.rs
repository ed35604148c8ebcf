//! Completion detection — recomputes campaign progress from delivery events.
//!
//! Cached counters on the campaign row drift under out-of-band writes, so
//! every correctness decision here counts event rows instead.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::event_bus::{make_event, EventSink};
use outreach_core::types::{CampaignStatus, EventType};
use outreach_store::{CampaignStore, EventStore};

/// Outcome of one completion evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionVerdict {
    /// Sends still outstanding (or the campaign is not in a completable
    /// status).
    InProgress,
    /// All contacts have a sent event; campaign is (now) Completed.
    Completed,
    /// Every batch is terminal and nothing was sent; campaign is Failed.
    Failed,
}

pub struct CompletionDetector {
    store: Arc<dyn CampaignStore>,
    events: Arc<dyn EventStore>,
    sink: Arc<dyn EventSink>,
}

impl CompletionDetector {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        events: Arc<dyn EventStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            events,
            sink,
        }
    }

    /// Derives the campaign's true progress and applies the status
    /// transition when warranted.
    ///
    /// Only a Sending campaign is ever auto-completed or auto-failed;
    /// re-running on a Completed campaign is a no-op and keeps the original
    /// `completed_at`.
    pub fn evaluate(&self, campaign_id: Uuid, now: DateTime<Utc>) -> OutreachResult<CompletionVerdict> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {campaign_id}")))?;

        if campaign.status == CampaignStatus::Completed {
            return Ok(CompletionVerdict::Completed);
        }
        if campaign.status != CampaignStatus::Sending {
            return Ok(CompletionVerdict::InProgress);
        }

        let sent = self.events.sent_count(campaign_id);

        if campaign.total_contacts > 0 && sent >= campaign.total_contacts {
            self.store.update_campaign(campaign_id, &mut |c| {
                // A concurrent invocation may have completed it already.
                if c.status == CampaignStatus::Sending {
                    c.status = CampaignStatus::Completed;
                    c.completed_at = Some(now);
                }
            })?;
            info!(%campaign_id, sent, total = campaign.total_contacts, "campaign completed");
            self.sink
                .emit(make_event(EventType::CampaignCompleted, Some(campaign_id), None));
            return Ok(CompletionVerdict::Completed);
        }

        let all_terminal = campaign
            .batch_schedule
            .as_ref()
            .map(|s| s.all_terminal())
            .unwrap_or(false);
        if all_terminal && sent == 0 && campaign.total_contacts > 0 {
            self.store.update_campaign(campaign_id, &mut |c| {
                if c.status == CampaignStatus::Sending {
                    c.status = CampaignStatus::Failed;
                }
            })?;
            warn!(%campaign_id, "campaign failed: schedule exhausted with zero sent events");
            self.sink
                .emit(make_event(EventType::CampaignFailed, Some(campaign_id), None));
            return Ok(CompletionVerdict::Failed);
        }

        Ok(CompletionVerdict::InProgress)
    }

    /// Percentage of contacts with a sent event, rounded and clamped to
    /// [0, 100]. Zero-contact campaigns report 0.
    pub fn completion_percentage(&self, campaign_id: Uuid) -> OutreachResult<u8> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {campaign_id}")))?;

        if campaign.total_contacts == 0 {
            return Ok(0);
        }
        let sent = self.events.sent_count(campaign_id);
        let pct = (f64::from(sent) / f64::from(campaign.total_contacts) * 100.0).round();
        Ok(pct.clamp(0.0, 100.0) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_core::event_bus::capture_sink;
    use outreach_core::types::{Batch, BatchSchedule, BatchStatus, Campaign};
    use outreach_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        detector: CompletionDetector,
        sink: Arc<outreach_core::event_bus::CaptureSink>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sink = capture_sink();
        let detector = CompletionDetector::new(store.clone(), store.clone(), sink.clone());
        Fixture {
            store,
            detector,
            sink,
        }
    }

    fn sending_campaign(store: &MemoryStore, total: u32) -> Uuid {
        let mut campaign = Campaign::new(Uuid::new_v4(), "Test", 5, 20);
        campaign.status = CampaignStatus::Sending;
        campaign.total_contacts = total;
        let id = campaign.id;
        store.insert_campaign(campaign);
        id
    }

    #[test]
    fn test_all_sent_completes_sending_campaign() {
        let f = fixture();
        let id = sending_campaign(&f.store, 10);
        let now = Utc::now();
        for _ in 0..10 {
            f.store.record_sent(id, Uuid::new_v4(), 0, now);
        }

        assert_eq!(f.detector.completion_percentage(id).unwrap(), 100);
        assert_eq!(
            f.detector.evaluate(id, now).unwrap(),
            CompletionVerdict::Completed
        );

        let campaign = f.store.get_campaign(id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.completed_at, Some(now));
        assert_eq!(f.sink.count_type(EventType::CampaignCompleted), 1);
    }

    #[test]
    fn test_rerun_on_completed_campaign_is_noop() {
        let f = fixture();
        let id = sending_campaign(&f.store, 1);
        let first = Utc::now();
        f.store.record_sent(id, Uuid::new_v4(), 0, first);

        f.detector.evaluate(id, first).unwrap();
        let completed_at = f.store.get_campaign(id).unwrap().completed_at;

        let later = first + chrono::Duration::hours(1);
        assert_eq!(
            f.detector.evaluate(id, later).unwrap(),
            CompletionVerdict::Completed
        );
        // completed_at untouched, no second event emitted.
        assert_eq!(f.store.get_campaign(id).unwrap().completed_at, completed_at);
        assert_eq!(f.sink.count_type(EventType::CampaignCompleted), 1);
    }

    #[test]
    fn test_never_completes_draft_or_paused() {
        let f = fixture();
        for status in [CampaignStatus::Draft, CampaignStatus::Paused] {
            let mut campaign = Campaign::new(Uuid::new_v4(), "Test", 5, 20);
            campaign.status = status;
            campaign.total_contacts = 1;
            let id = campaign.id;
            f.store.insert_campaign(campaign);
            f.store.record_sent(id, Uuid::new_v4(), 0, Utc::now());

            assert_eq!(
                f.detector.evaluate(id, Utc::now()).unwrap(),
                CompletionVerdict::InProgress
            );
            assert_eq!(f.store.get_campaign(id).unwrap().status, status);
        }
    }

    #[test]
    fn test_zero_contacts_never_completes() {
        let f = fixture();
        let id = sending_campaign(&f.store, 0);
        assert_eq!(f.detector.completion_percentage(id).unwrap(), 0);
        assert_eq!(
            f.detector.evaluate(id, Utc::now()).unwrap(),
            CompletionVerdict::InProgress
        );
    }

    #[test]
    fn test_exhausted_schedule_with_no_sends_fails() {
        let f = fixture();
        let id = sending_campaign(&f.store, 2);
        let now = Utc::now();
        f.store
            .update_campaign(id, &mut |c| {
                c.batch_schedule = Some(BatchSchedule {
                    batches: vec![Batch {
                        batch_number: 0,
                        scheduled_time: now,
                        contact_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
                        contact_count: 2,
                        status: BatchStatus::Failed,
                        attempts: 1,
                    }],
                    batch_size: 2,
                    interval_minutes: 20,
                    total_batches: 1,
                    estimated_completion: now,
                });
            })
            .unwrap();

        assert_eq!(
            f.detector.evaluate(id, now).unwrap(),
            CompletionVerdict::Failed
        );
        assert_eq!(
            f.store.get_campaign(id).unwrap().status,
            CampaignStatus::Failed
        );
    }

    #[test]
    fn test_partial_progress_stays_in_progress() {
        let f = fixture();
        let id = sending_campaign(&f.store, 4);
        f.store.record_sent(id, Uuid::new_v4(), 0, Utc::now());

        assert_eq!(f.detector.completion_percentage(id).unwrap(), 25);
        assert_eq!(
            f.detector.evaluate(id, Utc::now()).unwrap(),
            CompletionVerdict::InProgress
        );
    }
}
