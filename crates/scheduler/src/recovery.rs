//! Recovery janitor — the safety valve for campaigns stranded mid-flight.
//!
//! A crashed first dispatch leaves a campaign in Sending with a schedule
//! that never progressed. The janitor resets such campaigns to a cleanly
//! re-schedulable state; the planner regenerates the schedule on the next
//! dispatch tick.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::event_bus::{make_event, EventSink};
use outreach_core::types::{Campaign, CampaignStatus, EventType};
use outreach_store::CampaignStore;

/// Summary of one janitor sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub examined: usize,
    pub recovered: usize,
    pub errors: Vec<String>,
}

pub struct RecoveryJanitor {
    store: Arc<dyn CampaignStore>,
    sink: Arc<dyn EventSink>,
    /// Minimum age (minutes since last update) before a Sending campaign
    /// with no sent batches counts as stuck.
    stuck_after_minutes: i64,
}

impl RecoveryJanitor {
    pub fn new(store: Arc<dyn CampaignStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            sink,
            stuck_after_minutes: 30,
        }
    }

    pub fn with_stuck_after_minutes(mut self, minutes: i64) -> Self {
        self.stuck_after_minutes = minutes;
        self
    }

    /// Periodic sweep over Sending campaigns. One unrecoverable campaign
    /// never aborts the sweep.
    pub fn run_recovery(&self, now: DateTime<Utc>) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for campaign in self.store.list_by_status(&[CampaignStatus::Sending]) {
            report.examined += 1;
            if !self.is_stuck(&campaign, now) {
                continue;
            }
            match self.reset_campaign(campaign.id) {
                Ok(()) => report.recovered += 1,
                Err(e) => {
                    warn!(campaign_id = %campaign.id, error = %e, "recovery failed");
                    report.errors.push(format!("campaign {}: {}", campaign.id, e));
                }
            }
        }

        report
    }

    /// Stuck means: Sending, no batch ever made it to Sent, and the row has
    /// not moved within the stuck threshold. The age guard keeps the janitor
    /// off campaigns whose first dispatch is still in flight.
    fn is_stuck(&self, campaign: &Campaign, now: DateTime<Utc>) -> bool {
        if campaign.status != CampaignStatus::Sending {
            return false;
        }
        let no_sent_batches = campaign
            .batch_schedule
            .as_ref()
            .map(|s| s.sent_batches() == 0)
            .unwrap_or(true);
        no_sent_batches
            && now.signed_duration_since(campaign.updated_at)
                >= Duration::minutes(self.stuck_after_minutes)
    }

    /// Manual reset with the same contract as the periodic sweep: back to
    /// Scheduled with schedule, pointers, counters, and history cleared.
    pub fn reset_campaign(&self, campaign_id: Uuid) -> OutreachResult<()> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {campaign_id}")))?;
        if campaign.batch_schedule.as_ref().map(|s| s.sent_batches()).unwrap_or(0) > 0 {
            return Err(OutreachError::InvalidConfiguration(format!(
                "campaign {campaign_id} has dispatched batches; refusing reset"
            )));
        }

        self.store.update_campaign(campaign_id, &mut |c| {
            c.status = CampaignStatus::Scheduled;
            c.batch_schedule = None;
            c.next_batch_send_time = None;
            c.first_batch_sent_at = None;
            c.emails_sent = 0;
            c.contacts_processed = 0;
            c.contacts_remaining = c.total_contacts;
            c.contacts_failed = 0;
            c.batch_history.clear();
        })?;

        warn!(%campaign_id, "stuck campaign reset to scheduled");
        self.sink
            .emit(make_event(EventType::CampaignRecovered, Some(campaign_id), None));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_core::event_bus::{capture_sink, noop_sink};
    use outreach_core::types::{Batch, BatchSchedule, BatchStatus};
    use outreach_store::MemoryStore;

    fn stuck_campaign(store: &MemoryStore, age_minutes: i64, sent_batches: usize) -> Uuid {
        let mut campaign = Campaign::new(Uuid::new_v4(), "Stuck", 5, 20);
        campaign.status = CampaignStatus::Sending;
        campaign.total_contacts = 4;
        campaign.contacts_processed = 2;
        let now = Utc::now();
        campaign.updated_at = now - Duration::minutes(age_minutes);
        campaign.batch_schedule = Some(BatchSchedule {
            batches: (0..2)
                .map(|i| Batch {
                    batch_number: i,
                    scheduled_time: now,
                    contact_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
                    contact_count: 2,
                    status: if (i as usize) < sent_batches {
                        BatchStatus::Sent
                    } else {
                        BatchStatus::Pending
                    },
                    attempts: 0,
                })
                .collect(),
            batch_size: 2,
            interval_minutes: 20,
            total_batches: 2,
            estimated_completion: now,
        });
        let id = campaign.id;
        store.insert_campaign(campaign);
        id
    }

    #[test]
    fn test_resets_stuck_sending_campaign() {
        let store = Arc::new(MemoryStore::new());
        let sink = capture_sink();
        let janitor = RecoveryJanitor::new(store.clone(), sink.clone());
        let id = stuck_campaign(&store, 60, 0);

        let report = janitor.run_recovery(Utc::now());
        assert_eq!(report.examined, 1);
        assert_eq!(report.recovered, 1);

        let campaign = store.get_campaign(id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert!(campaign.batch_schedule.is_none());
        assert!(campaign.next_batch_send_time.is_none());
        assert!(campaign.first_batch_sent_at.is_none());
        assert_eq!(campaign.contacts_processed, 0);
        assert_eq!(campaign.contacts_remaining, 4);
        assert!(campaign.batch_history.is_empty());
        assert_eq!(sink.count_type(EventType::CampaignRecovered), 1);
    }

    #[test]
    fn test_leaves_fresh_sending_campaign_alone() {
        let store = Arc::new(MemoryStore::new());
        let janitor = RecoveryJanitor::new(store.clone(), noop_sink());
        let id = stuck_campaign(&store, 5, 0);

        let report = janitor.run_recovery(Utc::now());
        assert_eq!(report.recovered, 0);
        assert_eq!(store.get_campaign(id).unwrap().status, CampaignStatus::Sending);
    }

    #[test]
    fn test_leaves_progressing_campaign_alone() {
        let store = Arc::new(MemoryStore::new());
        let janitor = RecoveryJanitor::new(store.clone(), noop_sink());
        let id = stuck_campaign(&store, 60, 1);

        let report = janitor.run_recovery(Utc::now());
        assert_eq!(report.recovered, 0);
        assert_eq!(store.get_campaign(id).unwrap().status, CampaignStatus::Sending);
    }

    #[test]
    fn test_manual_reset_refuses_progressed_campaign() {
        let store = Arc::new(MemoryStore::new());
        let janitor = RecoveryJanitor::new(store.clone(), noop_sink());
        let id = stuck_campaign(&store, 60, 1);

        let err = janitor.reset_campaign(id);
        assert!(matches!(err, Err(OutreachError::InvalidConfiguration(_))));
    }
}
