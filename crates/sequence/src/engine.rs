//! Sequence orchestration — moves contacts between campaigns along links.
//!
//! Driven by a periodic trigger. Each tick enrolls newly-reached contacts
//! into their sequence, evaluates every active link against the event store,
//! and advances, completes, or exits contacts. All idempotency lives in the
//! (contact, link) transition ledger: the invocation that wins the ledger
//! insert performs the transition, so overlapping ticks never double-enqueue.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::event_bus::{make_event, noop_sink, EventSink};
use outreach_core::types::EventType;
use outreach_delivery::{DeliveryWindows, SuppressionList};
use outreach_store::{CampaignStore, EventStore};

use crate::evaluator::{ConditionEvaluator, CustomPredicate, Eligibility, EngagementSnapshot};
use crate::state_machine::SequenceStateMachine;
use crate::types::{
    ContactSequenceState, ContactSequenceStatus, Sequence, SequenceLink, SequenceStatus,
    TransitionRecord,
};

/// Summary of one sequence tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SequenceTickReport {
    /// Contacts enqueued into a next campaign.
    pub advanced: usize,
    /// Contacts that reached the end of their chain.
    pub completed: usize,
    /// Contacts permanently failed out of every remaining link.
    pub exited: usize,
    /// Per-item errors; one bad link or contact never aborts the tick.
    pub errors: Vec<String>,
}

/// Core orchestration engine — owns sequence definitions, link graphs, and
/// per-contact progression state.
pub struct SequenceEngine {
    store: Arc<dyn CampaignStore>,
    events: Arc<dyn EventStore>,
    sink: Arc<dyn EventSink>,
    suppression: Arc<SuppressionList>,
    windows: Arc<DeliveryWindows>,
    evaluator: ConditionEvaluator,
    machine: SequenceStateMachine,
    sequences: DashMap<Uuid, Sequence>,
    links: DashMap<Uuid, SequenceLink>,
    /// (sequence_id, contact_id) -> progression state.
    states: DashMap<(Uuid, Uuid), ContactSequenceState>,
    /// (contact_id, link_id) -> decision. One entry per pair, ever.
    ledger: DashMap<(Uuid, Uuid), TransitionRecord>,
    max_links_per_tick: usize,
}

impl std::fmt::Debug for SequenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceEngine")
            .field("sequences", &self.sequences.len())
            .field("links", &self.links.len())
            .field("states", &self.states.len())
            .finish()
    }
}

impl SequenceEngine {
    pub fn new(store: Arc<dyn CampaignStore>, events: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            events,
            sink: noop_sink(),
            suppression: Arc::new(SuppressionList::new()),
            windows: Arc::new(DeliveryWindows::new()),
            evaluator: ConditionEvaluator::new(),
            machine: SequenceStateMachine::new(),
            sequences: DashMap::new(),
            links: DashMap::new(),
            states: DashMap::new(),
            ledger: DashMap::new(),
            max_links_per_tick: 200,
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

    pub fn with_custom_predicate(mut self, predicate: Arc<dyn CustomPredicate>) -> Self {
        self.evaluator = self.evaluator.with_custom_predicate(predicate);
        self
    }

    pub fn with_max_links_per_tick(mut self, max: usize) -> Self {
        self.max_links_per_tick = max;
        self
    }

    // ------------------------------------------------------------------
    // Configuration surface
    // ------------------------------------------------------------------

    /// Stores a sequence and returns its id.
    pub fn create_sequence(&self, sequence: Sequence) -> Uuid {
        let id = sequence.id;
        info!(sequence_id = %id, name = %sequence.name, "creating sequence");
        self.sequences.insert(id, sequence);
        id
    }

    pub fn get_sequence(&self, id: Uuid) -> Option<Sequence> {
        self.sequences.get(&id).map(|r| r.clone())
    }

    pub fn list_sequences(&self) -> Vec<Sequence> {
        self.sequences.iter().map(|r| r.value().clone()).collect()
    }

    pub fn update_sequence_status(&self, id: Uuid, status: SequenceStatus) -> OutreachResult<()> {
        let mut entry = self
            .sequences
            .get_mut(&id)
            .ok_or_else(|| OutreachError::NotFound(format!("sequence {id}")))?;
        info!(sequence_id = %id, ?status, "updating sequence status");
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Registers a link. Self-loops are rejected outright; longer cycles are
    /// caught per-contact at transition time, since the graph may legally
    /// share campaigns across branches that no single contact traverses.
    pub fn add_link(&self, link: SequenceLink) -> OutreachResult<Uuid> {
        if link.parent_campaign_id == link.next_campaign_id {
            return Err(OutreachError::CycleDetected {
                sequence_id: link.sequence_id,
                link_id: link.id,
                campaign_id: link.next_campaign_id,
            });
        }
        if !self.sequences.contains_key(&link.sequence_id) {
            return Err(OutreachError::NotFound(format!(
                "sequence {}",
                link.sequence_id
            )));
        }
        let id = link.id;
        debug!(
            link_id = %id,
            parent = %link.parent_campaign_id,
            next = %link.next_campaign_id,
            condition = ?link.condition_type,
            "sequence link added"
        );
        self.links.insert(id, link);
        Ok(id)
    }

    pub fn links_for(&self, sequence_id: Uuid) -> Vec<SequenceLink> {
        self.links
            .iter()
            .filter(|r| r.value().sequence_id == sequence_id)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn contact_state(
        &self,
        sequence_id: Uuid,
        contact_id: Uuid,
    ) -> Option<ContactSequenceState> {
        self.states
            .get(&(sequence_id, contact_id))
            .map(|r| r.clone())
    }

    pub fn transition_record(&self, contact_id: Uuid, link_id: Uuid) -> Option<TransitionRecord> {
        self.ledger.get(&(contact_id, link_id)).map(|r| r.clone())
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Cron entrypoint. Safe on a fixed interval; overlapping invocations
    /// coordinate through the transition ledger.
    pub fn run_sequence_tick(&self, now: DateTime<Utc>) -> SequenceTickReport {
        let mut report = SequenceTickReport::default();

        let active: Vec<Sequence> = self
            .sequences
            .iter()
            .filter(|r| r.value().status == SequenceStatus::Active)
            .map(|r| r.value().clone())
            .collect();

        let mut links_processed = 0usize;
        for sequence in &active {
            self.enroll_entry_contacts(sequence, now);

            for link in self.links_for(sequence.id) {
                if links_processed >= self.max_links_per_tick {
                    debug!(
                        max = self.max_links_per_tick,
                        "link budget exhausted; remaining links wait for the next tick"
                    );
                    break;
                }
                links_processed += 1;
                self.process_link(sequence, &link, now, &mut report);
            }

            self.finalize_contacts(sequence, now, &mut report);
        }

        info!(
            sequences = active.len(),
            advanced = report.advanced,
            completed = report.completed,
            exited = report.exited,
            errors = report.errors.len(),
            "sequence tick finished"
        );
        report
    }

    /// Contacts the entry campaign has reached (sent or bounced) enter the
    /// sequence at the entry campaign.
    fn enroll_entry_contacts(&self, sequence: &Sequence, now: DateTime<Utc>) {
        for contact_id in self.store.contacts_for(sequence.entry_campaign_id) {
            let key = (sequence.id, contact_id);
            if self.states.contains_key(&key) {
                continue;
            }
            let reached = self
                .events
                .latest_for(sequence.entry_campaign_id, contact_id)
                .map(|row| row.sent_at.is_some() || row.bounced_at.is_some())
                .unwrap_or(false);
            if !reached {
                continue;
            }

            self.states.insert(
                key,
                ContactSequenceState {
                    contact_id,
                    sequence_id: sequence.id,
                    status: ContactSequenceStatus::InCampaign,
                    current_campaign_id: Some(sequence.entry_campaign_id),
                    path: vec![sequence.entry_campaign_id],
                    entered_at: now,
                    updated_at: now,
                },
            );
            debug!(sequence_id = %sequence.id, %contact_id, "contact entered sequence");
            self.emit(
                EventType::SequenceEntered,
                sequence.id,
                Some(sequence.entry_campaign_id),
                Some(contact_id),
            );
        }
    }

    /// Evaluates one link for every contact currently sitting in its parent
    /// campaign.
    fn process_link(
        &self,
        sequence: &Sequence,
        link: &SequenceLink,
        now: DateTime<Utc>,
        report: &mut SequenceTickReport,
    ) {
        for contact_id in self.store.contacts_for(link.parent_campaign_id) {
            let state = match self.states.get(&(sequence.id, contact_id)) {
                Some(s) => s.clone(),
                None => continue,
            };
            if state.status.is_terminal()
                || state.current_campaign_id != Some(link.parent_campaign_id)
            {
                continue;
            }
            // Decided once, decided forever.
            if self.ledger.contains_key(&(contact_id, link.id)) {
                continue;
            }

            let snapshot = self.snapshot_for(link.parent_campaign_id, contact_id);
            match self.evaluator.evaluate(link, &snapshot, now) {
                Eligibility::Pending => {}
                Eligibility::Ineligible(reason) => {
                    debug!(
                        %contact_id,
                        link_id = %link.id,
                        ?reason,
                        "contact permanently ineligible for link"
                    );
                    self.ledger.insert(
                        (contact_id, link.id),
                        TransitionRecord {
                            contact_id,
                            link_id: link.id,
                            decided_at: now,
                            eligible: false,
                            enqueued: false,
                        },
                    );
                }
                Eligibility::Eligible => {
                    // First writer wins; a concurrent tick that lost the
                    // insert must not enqueue again.
                    let won = match self.ledger.entry((contact_id, link.id)) {
                        dashmap::mapref::entry::Entry::Occupied(_) => false,
                        dashmap::mapref::entry::Entry::Vacant(slot) => {
                            slot.insert(TransitionRecord {
                                contact_id,
                                link_id: link.id,
                                decided_at: now,
                                eligible: true,
                                enqueued: false,
                            });
                            true
                        }
                    };
                    if !won {
                        continue;
                    }

                    if state.path.contains(&link.next_campaign_id) {
                        let err = OutreachError::CycleDetected {
                            sequence_id: sequence.id,
                            link_id: link.id,
                            campaign_id: link.next_campaign_id,
                        };
                        warn!(
                            %contact_id,
                            link_id = %link.id,
                            "sequence link routes contact back along its path; transition skipped"
                        );
                        self.emit(
                            EventType::SequenceCycleSkipped,
                            sequence.id,
                            Some(link.next_campaign_id),
                            Some(contact_id),
                        );
                        report.errors.push(err.to_string());
                        continue;
                    }

                    match self.advance_contact(sequence, link, contact_id, now) {
                        Ok(()) => report.advanced += 1,
                        Err(e) => {
                            warn!(%contact_id, link_id = %link.id, error = %e, "transition failed");
                            report.errors.push(format!("contact {contact_id}: {e}"));
                        }
                    }
                }
            }
        }
    }

    /// Enqueues an eligible contact into the link's target campaign and
    /// applies the link's overrides.
    fn advance_contact(
        &self,
        sequence: &Sequence,
        link: &SequenceLink,
        contact_id: Uuid,
        now: DateTime<Utc>,
    ) -> OutreachResult<()> {
        self.store
            .assign_contacts(link.next_campaign_id, &[contact_id])?;
        if let Some(persona_id) = link.persona_override_id {
            self.store
                .set_persona_override(link.next_campaign_id, contact_id, persona_id);
        }
        if let Some(window) = link.delivery_window {
            self.windows.set(link.next_campaign_id, window);
        }

        {
            let mut state = self
                .states
                .get_mut(&(sequence.id, contact_id))
                .ok_or_else(|| OutreachError::NotFound(format!("state for {contact_id}")))?;
            self.machine
                .check(state.status, ContactSequenceStatus::PendingTransition)?;
            self.machine.check(
                ContactSequenceStatus::PendingTransition,
                ContactSequenceStatus::InCampaign,
            )?;
            state.status = ContactSequenceStatus::InCampaign;
            state.current_campaign_id = Some(link.next_campaign_id);
            state.path.push(link.next_campaign_id);
            state.updated_at = now;
        }

        if let Some(mut record) = self.ledger.get_mut(&(contact_id, link.id)) {
            record.enqueued = true;
        }

        info!(
            sequence_id = %sequence.id,
            %contact_id,
            from = %link.parent_campaign_id,
            to = %link.next_campaign_id,
            "contact advanced to next campaign"
        );
        self.emit(
            EventType::SequenceAdvanced,
            sequence.id,
            Some(link.next_campaign_id),
            Some(contact_id),
        );
        Ok(())
    }

    /// Terminal pass: contacts at a chain end complete; contacts whose every
    /// outgoing link is permanently failed exit.
    fn finalize_contacts(
        &self,
        sequence: &Sequence,
        now: DateTime<Utc>,
        report: &mut SequenceTickReport,
    ) {
        let seq_links = self.links_for(sequence.id);

        let in_flight: Vec<ContactSequenceState> = self
            .states
            .iter()
            .filter(|r| {
                r.key().0 == sequence.id
                    && r.value().status == ContactSequenceStatus::InCampaign
            })
            .map(|r| r.value().clone())
            .collect();

        for state in in_flight {
            let campaign_id = match state.current_campaign_id {
                Some(id) => id,
                None => continue,
            };
            let outgoing: Vec<&SequenceLink> = seq_links
                .iter()
                .filter(|l| l.parent_campaign_id == campaign_id)
                .collect();

            if outgoing.is_empty() {
                let snapshot = self.snapshot_for(campaign_id, state.contact_id);
                if snapshot.sent_at.or(snapshot.bounced_at).is_some() {
                    self.set_terminal(
                        sequence,
                        state.contact_id,
                        ContactSequenceStatus::SequenceComplete,
                        now,
                    );
                    report.completed += 1;
                }
            } else {
                let all_failed = outgoing.iter().all(|l| {
                    self.ledger
                        .get(&(state.contact_id, l.id))
                        .map(|r| !r.eligible)
                        .unwrap_or(false)
                });
                if all_failed {
                    self.set_terminal(
                        sequence,
                        state.contact_id,
                        ContactSequenceStatus::SequenceExited,
                        now,
                    );
                    report.exited += 1;
                }
            }
        }
    }

    fn set_terminal(
        &self,
        sequence: &Sequence,
        contact_id: Uuid,
        status: ContactSequenceStatus,
        now: DateTime<Utc>,
    ) {
        let mut state = match self.states.get_mut(&(sequence.id, contact_id)) {
            Some(s) => s,
            None => return,
        };
        if self.machine.check(state.status, status).is_err() {
            return;
        }
        state.status = status;
        state.updated_at = now;
        drop(state);

        let event_type = match status {
            ContactSequenceStatus::SequenceComplete => EventType::SequenceCompleted,
            _ => EventType::SequenceExited,
        };
        info!(sequence_id = %sequence.id, %contact_id, ?status, "contact left sequence");
        self.emit(event_type, sequence.id, None, Some(contact_id));
    }

    fn snapshot_for(&self, campaign_id: Uuid, contact_id: Uuid) -> EngagementSnapshot {
        let row = self.events.latest_for(campaign_id, contact_id);
        let unsubscribed = self.suppression.is_unsubscribed(contact_id)
            || row
                .as_ref()
                .map(|r| r.unsubscribed_at.is_some())
                .unwrap_or(false);
        match row {
            Some(r) => EngagementSnapshot {
                sent_at: r.sent_at,
                opened_at: r.opened_at,
                clicked_at: r.clicked_at,
                replied_at: r.replied_at,
                bounced_at: r.bounced_at,
                open_count: r.open_count,
                click_count: r.click_count,
                auto_reply: r.auto_reply,
                unsubscribed,
            },
            None => EngagementSnapshot {
                unsubscribed,
                ..Default::default()
            },
        }
    }

    fn emit(
        &self,
        event_type: EventType,
        sequence_id: Uuid,
        campaign_id: Option<Uuid>,
        contact_id: Option<Uuid>,
    ) {
        let mut event = make_event(event_type, campaign_id, contact_id);
        event.sequence_id = Some(sequence_id);
        self.sink.emit(event);
    }
}
