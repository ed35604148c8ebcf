//! Batch dispatching — finds campaigns with due batches and hands their
//! contacts to the send pipeline.
//!
//! Dispatch is at-most-once per batch: the batch status flips Pending -> Sent
//! through the store's check-and-set before any contact reaches the sender,
//! and a batch already marked Sent is never dispatched again. When the
//! pipeline itself is unreachable the claim is released, so the batch stays
//! retryable without ever double-sending.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::event_bus::{make_event, noop_sink, EventSink};
use outreach_core::types::{BatchHistoryEntry, BounceType, Campaign, CampaignStatus, EventType};
use outreach_delivery::{BatchSender, DeliveryWindows, SendStatus, SuppressionList};
use outreach_store::{CampaignStore, EventStore};

use crate::completion::CompletionDetector;
use crate::planner::plan_schedule;

/// Summary of one dispatch tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// Campaigns that dispatched at least one batch this tick.
    pub processed: usize,
    /// Emails accepted by the send pipeline.
    pub sent: usize,
    /// Emails that failed or were suppressed before sending.
    pub failed: usize,
    /// Per-campaign errors; one bad campaign never blocks the rest.
    pub errors: Vec<String>,
}

pub struct BatchDispatcher {
    store: Arc<dyn CampaignStore>,
    events: Arc<dyn EventStore>,
    sender: Arc<dyn BatchSender>,
    sink: Arc<dyn EventSink>,
    suppression: Arc<SuppressionList>,
    windows: Arc<DeliveryWindows>,
    max_campaigns_per_tick: usize,
    max_dispatch_attempts: u32,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        events: Arc<dyn EventStore>,
        sender: Arc<dyn BatchSender>,
    ) -> Self {
        Self {
            store,
            events,
            sender,
            sink: noop_sink(),
            suppression: Arc::new(SuppressionList::new()),
            windows: Arc::new(DeliveryWindows::new()),
            max_campaigns_per_tick: 100,
            max_dispatch_attempts: 5,
        }
    }

    /// Attach an event sink for emitting analytics events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_suppression(mut self, suppression: Arc<SuppressionList>) -> Self {
        self.suppression = suppression;
        self
    }

    pub fn with_delivery_windows(mut self, windows: Arc<DeliveryWindows>) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_max_campaigns_per_tick(mut self, max: usize) -> Self {
        self.max_campaigns_per_tick = max;
        self
    }

    pub fn with_max_dispatch_attempts(mut self, max: u32) -> Self {
        self.max_dispatch_attempts = max;
        self
    }

    /// Cron entrypoint. Scans Scheduled/Sending campaigns and dispatches
    /// every due batch, in batch order, per campaign. Safe to invoke on a
    /// fixed interval and tolerant of overlapping invocations.
    pub fn run_due_batches(&self, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();

        let candidates = self
            .store
            .list_by_status(&[CampaignStatus::Scheduled, CampaignStatus::Sending]);
        for campaign in candidates.into_iter().take(self.max_campaigns_per_tick) {
            match self.process_campaign(campaign.id, now, &mut report) {
                Ok(true) => report.processed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(campaign_id = %campaign.id, error = %e, "campaign dispatch failed");
                    report.errors.push(format!("campaign {}: {}", campaign.id, e));
                }
            }
        }

        report
    }

    /// Dispatches all currently-due batches for one campaign. Returns true
    /// when at least one batch went out.
    fn process_campaign(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> OutreachResult<bool> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {campaign_id}")))?;

        if campaign.batch_schedule.is_none() {
            if campaign.status == CampaignStatus::Sending {
                // Sending without a schedule means a crashed dispatch; only
                // the janitor may untangle it.
                return Err(OutreachError::StuckCampaign(campaign_id));
            }
            self.plan_lazily(&campaign, now)?;
        }

        let mut did_work = false;
        loop {
            // Fresh row each iteration: a concurrent invocation (or a pause)
            // may have changed it while the previous batch was in flight.
            let current = self
                .store
                .get_campaign(campaign_id)
                .ok_or_else(|| OutreachError::NotFound(format!("campaign {campaign_id}")))?;

            if current.status == CampaignStatus::Paused {
                debug!(%campaign_id, "campaign paused; no further batches");
                break;
            }
            if !current.is_dispatchable() {
                break;
            }

            let batch = match current.batch_schedule.as_ref().and_then(|s| s.next_pending()) {
                Some(b) => b.clone(),
                None => break,
            };

            if batch.scheduled_time > now {
                self.store.update_campaign(campaign_id, &mut |c| {
                    c.next_batch_send_time = Some(batch.scheduled_time);
                })?;
                break;
            }

            if let Some(resume_at) = self.windows.defer_until(campaign_id, now) {
                debug!(
                    %campaign_id,
                    batch = batch.batch_number,
                    %resume_at,
                    "delivery window closed; batch deferred"
                );
                self.store.update_campaign(campaign_id, &mut |c| {
                    c.next_batch_send_time = Some(resume_at);
                })?;
                let mut event = make_event(EventType::BatchDeferred, Some(campaign_id), None);
                event.batch_number = Some(batch.batch_number);
                self.sink.emit(event);
                break;
            }

            // Check-and-set before anything reaches the sender. Losing the
            // claim means another invocation owns this batch.
            if !self.store.claim_batch(campaign_id, batch.batch_number) {
                debug!(
                    %campaign_id,
                    batch = batch.batch_number,
                    "batch no longer pending; skipping"
                );
                break;
            }

            if current.status == CampaignStatus::Scheduled {
                self.store.update_campaign(campaign_id, &mut |c| {
                    if c.status == CampaignStatus::Scheduled {
                        c.status = CampaignStatus::Sending;
                        c.first_batch_sent_at = Some(now);
                    }
                })?;
                info!(%campaign_id, "campaign started sending");
                self.sink
                    .emit(make_event(EventType::CampaignStarted, Some(campaign_id), None));
            }

            let mut to_send: Vec<Uuid> = Vec::with_capacity(batch.contact_ids.len());
            let mut suppressed: Vec<Uuid> = Vec::new();
            for contact_id in &batch.contact_ids {
                if self.suppression.is_suppressed(*contact_id) {
                    suppressed.push(*contact_id);
                } else {
                    to_send.push(*contact_id);
                }
            }
            for contact_id in &suppressed {
                debug!(%campaign_id, %contact_id, "contact suppressed; not handed to sender");
                self.sink.emit(make_event(
                    EventType::EmailSuppressed,
                    Some(campaign_id),
                    Some(*contact_id),
                ));
            }

            let outcomes = match self.sender.send_batch(campaign_id, &to_send) {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    // Fail closed: the dispatch did not happen. Undo the
                    // claim so the batch is retried next tick, unless it has
                    // exhausted its attempts.
                    let attempts = self.store.release_batch(campaign_id, batch.batch_number);
                    if attempts >= self.max_dispatch_attempts {
                        self.store.fail_batch(campaign_id, batch.batch_number);
                        warn!(
                            %campaign_id,
                            batch = batch.batch_number,
                            attempts,
                            "batch failed after repeated dispatch attempts"
                        );
                        let mut event =
                            make_event(EventType::BatchFailed, Some(campaign_id), None);
                        event.batch_number = Some(batch.batch_number);
                        self.sink.emit(event);
                    }
                    return Err(e);
                }
            };

            let mut sent_n: u32 = 0;
            let mut failed_n: u32 = 0;
            for outcome in &outcomes {
                match outcome.status {
                    SendStatus::Sent => {
                        self.events.record_sent(campaign_id, outcome.contact_id, 0, now);
                        self.sink.emit(make_event(
                            EventType::EmailSent,
                            Some(campaign_id),
                            Some(outcome.contact_id),
                        ));
                        sent_n += 1;
                    }
                    SendStatus::Failed => {
                        self.events
                            .record_bounce(campaign_id, outcome.contact_id, now, BounceType::Hard);
                        self.sink.emit(make_event(
                            EventType::EmailFailed,
                            Some(campaign_id),
                            Some(outcome.contact_id),
                        ));
                        failed_n += 1;
                    }
                }
            }

            let suppressed_n = suppressed.len() as u32;
            self.store.update_campaign(campaign_id, &mut |c| {
                c.emails_sent += sent_n;
                c.contacts_processed += batch.contact_count;
                c.contacts_remaining = c.total_contacts.saturating_sub(c.contacts_processed);
                c.contacts_failed += failed_n + suppressed_n;
                c.batch_history.push(BatchHistoryEntry {
                    batch_number: batch.batch_number,
                    dispatched_at: now,
                    attempted: to_send.len() as u32,
                    failed: failed_n,
                });
                c.next_batch_send_time = c
                    .batch_schedule
                    .as_ref()
                    .and_then(|s| s.next_pending().map(|b| b.scheduled_time));
            })?;

            info!(
                %campaign_id,
                batch = batch.batch_number,
                sent = sent_n,
                failed = failed_n,
                suppressed = suppressed_n,
                "batch dispatched"
            );
            let mut event = make_event(EventType::BatchDispatched, Some(campaign_id), None);
            event.batch_number = Some(batch.batch_number);
            self.sink.emit(event);

            report.sent += sent_n as usize;
            report.failed += (failed_n + suppressed_n) as usize;
            did_work = true;
        }

        // Opportunistic ground-truth check after dispatch.
        let detector =
            CompletionDetector::new(self.store.clone(), self.events.clone(), self.sink.clone());
        if let Err(e) = detector.evaluate(campaign_id, now) {
            warn!(%campaign_id, error = %e, "completion check failed");
        }

        Ok(did_work)
    }

    /// First-dispatch planning. The schedule is written only if the row
    /// still has none, so a concurrent invocation cannot overwrite an
    /// existing plan (and contacts already assigned to batches keep their
    /// assignment forever).
    fn plan_lazily(&self, campaign: &Campaign, now: DateTime<Utc>) -> OutreachResult<()> {
        let contacts = self.store.contacts_for(campaign.id);
        let start = campaign.scheduled_start.unwrap_or(now);
        let schedule = plan_schedule(
            &contacts,
            campaign.effective_batch_size(),
            campaign.batch_interval_minutes,
            start,
        )?;
        let first_batch_at = schedule
            .batches
            .first()
            .map(|b| b.scheduled_time)
            .unwrap_or(start);

        self.store.update_campaign(campaign.id, &mut |c| {
            if c.batch_schedule.is_none() {
                c.batch_schedule = Some(schedule.clone());
                c.next_batch_send_time = Some(first_batch_at);
            }
        })?;

        info!(
            campaign_id = %campaign.id,
            batches = schedule.total_batches,
            batch_size = schedule.batch_size,
            "batch schedule planned"
        );
        self.sink
            .emit(make_event(EventType::CampaignScheduled, Some(campaign.id), None));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use outreach_core::event_bus::capture_sink;
    use outreach_core::types::BatchStatus;
    use outreach_delivery::{SimulatedSender, SuppressionReason};
    use outreach_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        sender: Arc<SimulatedSender>,
        suppression: Arc<SuppressionList>,
        windows: Arc<DeliveryWindows>,
        sink: Arc<outreach_core::event_bus::CaptureSink>,
        dispatcher: BatchDispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(SimulatedSender::new());
        let suppression = Arc::new(SuppressionList::new());
        let windows = Arc::new(DeliveryWindows::new());
        let sink = capture_sink();
        let dispatcher = BatchDispatcher::new(store.clone(), store.clone(), sender.clone())
            .with_event_sink(sink.clone())
            .with_suppression(suppression.clone())
            .with_delivery_windows(windows.clone());
        Fixture {
            store,
            sender,
            suppression,
            windows,
            sink,
            dispatcher,
        }
    }

    /// Scheduled campaign with `n` contacts, batch size 2, 20-minute
    /// interval, whose schedule starts at `start`.
    fn scheduled_campaign(f: &Fixture, n: usize, start: DateTime<Utc>) -> (Uuid, Vec<Uuid>) {
        let mut campaign = Campaign::new(Uuid::new_v4(), "Outbound", 10, 20);
        campaign.status = CampaignStatus::Scheduled;
        campaign.batch_size = 2;
        campaign.scheduled_start = Some(start);
        let id = campaign.id;
        f.store.insert_campaign(campaign);
        let contacts: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        f.store.assign_contacts(id, &contacts).unwrap();
        (id, contacts)
    }

    #[test]
    fn test_full_lifecycle_to_completed() {
        let f = fixture();
        let now = Utc::now();
        // Three batches (2+2+1), all already due.
        let (id, contacts) = scheduled_campaign(&f, 5, now - Duration::minutes(45));

        let report = f.dispatcher.run_due_batches(now);
        assert_eq!(report.processed, 1);
        assert_eq!(report.sent, 5);
        assert_eq!(report.failed, 0);
        assert!(report.errors.is_empty());

        let campaign = f.store.get_campaign(id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert!(campaign.first_batch_sent_at.is_some());
        assert!(campaign.next_batch_send_time.is_none());
        assert_eq!(campaign.batch_history.len(), 3);
        assert_eq!(f.store.sent_count(id), 5);
        for contact in &contacts {
            assert!(f.store.latest_for(id, *contact).unwrap().sent_at.is_some());
        }
        assert_eq!(f.sink.count_type(EventType::CampaignStarted), 1);
        assert_eq!(f.sink.count_type(EventType::BatchDispatched), 3);
        assert_eq!(f.sink.count_type(EventType::CampaignCompleted), 1);
    }

    #[test]
    fn test_lazy_planning_happens_once() {
        let f = fixture();
        let now = Utc::now();
        let (id, _) = scheduled_campaign(&f, 5, now + Duration::minutes(10));

        // First batch is not due yet, but the schedule gets planned.
        let report = f.dispatcher.run_due_batches(now);
        assert_eq!(report.processed, 0);

        let campaign = f.store.get_campaign(id).unwrap();
        let schedule = campaign.batch_schedule.clone().unwrap();
        assert_eq!(schedule.total_batches, 3);
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert_eq!(
            campaign.next_batch_send_time,
            Some(now + Duration::minutes(10))
        );

        // A second tick must not regenerate the schedule.
        f.dispatcher.run_due_batches(now);
        assert_eq!(
            f.store.get_campaign(id).unwrap().batch_schedule.unwrap(),
            schedule
        );
    }

    #[test]
    fn test_future_batches_wait_their_turn() {
        let f = fixture();
        let now = Utc::now();
        let (id, _) = scheduled_campaign(&f, 4, now);

        // Only batch 0 is due at start time.
        let report = f.dispatcher.run_due_batches(now);
        assert_eq!(report.sent, 2);
        let campaign = f.store.get_campaign(id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Sending);
        assert_eq!(
            campaign.next_batch_send_time,
            Some(now + Duration::minutes(20))
        );

        // Batch 1 goes out once its time arrives.
        let later = now + Duration::minutes(21);
        let report = f.dispatcher.run_due_batches(later);
        assert_eq!(report.sent, 2);
        assert_eq!(
            f.store.get_campaign(id).unwrap().status,
            CampaignStatus::Completed
        );
    }

    #[test]
    fn test_pause_stops_further_batches() {
        let f = fixture();
        let now = Utc::now();
        let (id, _) = scheduled_campaign(&f, 4, now);

        f.dispatcher.run_due_batches(now);
        f.store
            .update_campaign(id, &mut |c| c.status = CampaignStatus::Paused)
            .unwrap();

        let report = f.dispatcher.run_due_batches(now + Duration::minutes(30));
        assert_eq!(report.processed, 0);
        let campaign = f.store.get_campaign(id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Paused);
        let pending = campaign
            .batch_schedule
            .unwrap()
            .batches
            .iter()
            .filter(|b| b.status == BatchStatus::Pending)
            .count();
        assert_eq!(pending, 1);
    }

    #[test]
    fn test_transient_sender_failure_keeps_batch_pending() {
        let f = fixture();
        let now = Utc::now();
        let (id, _) = scheduled_campaign(&f, 2, now - Duration::minutes(1));
        f.sender.set_unavailable(true);

        let report = f.dispatcher.run_due_batches(now);
        assert_eq!(report.sent, 0);
        assert_eq!(report.errors.len(), 1);

        let campaign = f.store.get_campaign(id).unwrap();
        let schedule = campaign.batch_schedule.unwrap();
        assert_eq!(schedule.batches[0].status, BatchStatus::Pending);
        assert_eq!(f.store.sent_count(id), 0);

        // Pipeline back up: the batch goes out on the next tick.
        f.sender.set_unavailable(false);
        let report = f.dispatcher.run_due_batches(now + Duration::minutes(1));
        assert_eq!(report.sent, 2);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_exhausted_attempts_fail_batch_then_campaign() {
        let f = fixture();
        let dispatcher = BatchDispatcher::new(f.store.clone(), f.store.clone(), f.sender.clone())
            .with_event_sink(f.sink.clone())
            .with_max_dispatch_attempts(2);
        let now = Utc::now();
        let (id, _) = scheduled_campaign(&f, 2, now - Duration::minutes(1));
        f.sender.set_unavailable(true);

        dispatcher.run_due_batches(now);
        let report = dispatcher.run_due_batches(now);
        assert_eq!(report.errors.len(), 1);

        let campaign = f.store.get_campaign(id).unwrap();
        assert_eq!(
            campaign.batch_schedule.as_ref().unwrap().batches[0].status,
            BatchStatus::Failed
        );
        assert_eq!(f.sink.count_type(EventType::BatchFailed), 1);

        // With the schedule exhausted and zero sent events, the next tick's
        // ground-truth check fails the whole campaign.
        let report = dispatcher.run_due_batches(now);
        assert!(report.errors.is_empty());
        assert_eq!(
            f.store.get_campaign(id).unwrap().status,
            CampaignStatus::Failed
        );
    }

    #[test]
    fn test_partial_send_failure_still_marks_batch_sent() {
        let f = fixture();
        let now = Utc::now();
        let (id, contacts) = scheduled_campaign(&f, 2, now - Duration::minutes(1));
        f.sender.fail_contact(contacts[1]);

        let report = f.dispatcher.run_due_batches(now);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert!(report.errors.is_empty());

        let campaign = f.store.get_campaign(id).unwrap();
        assert_eq!(campaign.contacts_failed, 1);
        assert_eq!(
            campaign.batch_schedule.as_ref().unwrap().batches[0].status,
            BatchStatus::Sent
        );
        assert_eq!(campaign.batch_history[0].failed, 1);

        // The failure is surfaced as a delivery event, not a batch failure.
        let row = f.store.latest_for(id, contacts[1]).unwrap();
        assert!(row.is_bounced());
        assert!(row.sent_at.is_none());
    }

    #[test]
    fn test_suppressed_contacts_never_reach_the_sender() {
        let f = fixture();
        let now = Utc::now();
        let (id, contacts) = scheduled_campaign(&f, 2, now - Duration::minutes(1));
        f.suppression
            .add(contacts[0], SuppressionReason::Unsubscribed, "test", None);

        let report = f.dispatcher.run_due_batches(now);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);

        assert!(f.store.latest_for(id, contacts[0]).is_none());
        assert_eq!(f.sink.count_type(EventType::EmailSuppressed), 1);
    }

    #[test]
    fn test_closed_delivery_window_defers_batch() {
        let f = fixture();
        let now = Utc::now();
        let (id, _) = scheduled_campaign(&f, 2, now - Duration::minutes(1));

        // A window that is closed right now: open for one minute, starting
        // two hours from now.
        let start = (now + Duration::hours(2)).time();
        let end = (now + Duration::hours(2) + Duration::minutes(1)).time();
        f.windows.set(id, outreach_delivery::DeliveryWindow::new(start, end));

        let report = f.dispatcher.run_due_batches(now);
        assert_eq!(report.sent, 0);
        assert_eq!(f.sink.count_type(EventType::BatchDeferred), 1);

        let campaign = f.store.get_campaign(id).unwrap();
        assert_eq!(
            campaign.batch_schedule.unwrap().batches[0].status,
            BatchStatus::Pending
        );
        assert!(campaign.next_batch_send_time.unwrap() > now);
    }

    #[test]
    fn test_zero_contact_campaign_is_invalid_configuration() {
        let f = fixture();
        let mut campaign = Campaign::new(Uuid::new_v4(), "Empty", 10, 20);
        campaign.status = CampaignStatus::Scheduled;
        campaign.scheduled_start = Some(Utc::now());
        f.store.insert_campaign(campaign);

        let report = f.dispatcher.run_due_batches(Utc::now());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Invalid configuration"));
    }

    #[test]
    fn test_sending_without_schedule_is_reported_stuck() {
        let f = fixture();
        let mut campaign = Campaign::new(Uuid::new_v4(), "Crashed", 10, 20);
        campaign.status = CampaignStatus::Sending;
        campaign.total_contacts = 3;
        f.store.insert_campaign(campaign);

        let report = f.dispatcher.run_due_batches(Utc::now());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("stuck"));
    }
}
