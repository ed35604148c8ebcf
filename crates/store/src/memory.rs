//! In-memory store backed by DashMap.
//!
//! Production: replace with PostgreSQL (sqlx) or a hosted relational client.
//! This provides the same API surface for development and testing; the
//! per-entry DashMap lock supplies the per-campaign atomicity a SQL
//! implementation would get from a transaction.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::types::{
    BatchStatus, BounceType, Campaign, CampaignEventCounts, CampaignStatus, Contact, DeliveryEvent,
};

use crate::{CampaignStore, EventStore};

/// Thread-safe in-memory store for campaigns, contacts, assignments, and
/// delivery events.
pub struct MemoryStore {
    campaigns: DashMap<Uuid, Campaign>,
    contacts: DashMap<Uuid, Contact>,
    campaign_contacts: DashMap<Uuid, Vec<Uuid>>,
    persona_overrides: DashMap<(Uuid, Uuid), Uuid>,
    /// Event rows keyed by (campaign, contact), ordered by step.
    events: DashMap<(Uuid, Uuid), Vec<DeliveryEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Memory store initialized (development mode)");
        Self {
            campaigns: DashMap::new(),
            contacts: DashMap::new(),
            campaign_contacts: DashMap::new(),
            persona_overrides: DashMap::new(),
            events: DashMap::new(),
        }
    }

    // ─── Contacts ──────────────────────────────────────────────────────────

    pub fn insert_contact(&self, contact: Contact) -> Uuid {
        let id = contact.id;
        self.contacts.insert(id, contact);
        id
    }

    pub fn get_contact(&self, id: Uuid) -> Option<Contact> {
        self.contacts.get(&id).map(|r| r.value().clone())
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    // ─── Event row helpers ─────────────────────────────────────────────────

    /// Applies `apply` to the latest-step row for (campaign, contact),
    /// creating a step-0 row if the contact has no events yet.
    fn merge_latest(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
        apply: impl FnOnce(&mut DeliveryEvent),
    ) {
        let mut rows = self
            .events
            .entry((campaign_id, contact_id))
            .or_insert_with(|| vec![DeliveryEvent::new(campaign_id, contact_id, 0)]);
        let row = rows
            .last_mut()
            .expect("event row vec is never left empty");
        apply(row);
    }

    /// Seeds a handful of contacts and two campaigns for development runs.
    pub fn seed_demo_data(&self) {
        let owner = Uuid::new_v4();
        let people = [
            ("ada@lovelace.dev", "Ada Lovelace"),
            ("grace@hopper.io", "Grace Hopper"),
            ("edsger@dijkstra.nl", "Edsger Dijkstra"),
            ("barbara@liskov.edu", "Barbara Liskov"),
            ("tony@hoare.uk", "Tony Hoare"),
            ("donald@knuth.org", "Donald Knuth"),
            ("margaret@hamilton.dev", "Margaret Hamilton"),
            ("alan@turing.uk", "Alan Turing"),
        ];
        let contact_ids: Vec<Uuid> = people
            .iter()
            .map(|(email, name)| self.insert_contact(Contact::new(*email, *name)))
            .collect();

        let mut intro = Campaign::new(owner, "Q3 Product Intro", 5, 20);
        intro.status = CampaignStatus::Scheduled;
        intro.scheduled_start = Some(Utc::now());
        let intro_id = intro.id;
        self.insert_campaign(intro);
        self.assign_contacts(intro_id, &contact_ids)
            .expect("seed assignment");

        let followup = Campaign::new(owner, "Q3 Follow-up", 5, 20);
        let followup_id = followup.id;
        self.insert_campaign(followup);

        info!(
            %intro_id,
            %followup_id,
            contacts = contact_ids.len(),
            "demo data seeded"
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignStore for MemoryStore {
    fn insert_campaign(&self, campaign: Campaign) {
        debug!(campaign_id = %campaign.id, name = %campaign.name, "campaign inserted");
        self.campaigns.insert(campaign.id, campaign);
    }

    fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|r| r.value().clone())
    }

    fn list_campaigns(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    fn list_by_status(&self, statuses: &[CampaignStatus]) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|r| statuses.contains(&r.value().status))
            .map(|r| r.value().clone())
            .collect();
        campaigns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        campaigns
    }

    fn update_campaign(
        &self,
        id: Uuid,
        mutate: &mut dyn FnMut(&mut Campaign),
    ) -> OutreachResult<()> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {id}")))?;
        let campaign = entry.value_mut();
        mutate(campaign);
        campaign.updated_at = Utc::now();
        Ok(())
    }

    fn assign_contacts(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> OutreachResult<u32> {
        if !self.campaigns.contains_key(&campaign_id) {
            return Err(OutreachError::NotFound(format!("campaign {campaign_id}")));
        }

        let mut assigned = self.campaign_contacts.entry(campaign_id).or_default();
        let mut added: u32 = 0;
        for id in contact_ids {
            if !assigned.contains(id) {
                assigned.push(*id);
                added += 1;
            }
        }
        let total = assigned.len() as u32;
        drop(assigned);

        self.update_campaign(campaign_id, &mut |c| {
            c.total_contacts = total;
            c.contacts_remaining = total.saturating_sub(c.contacts_processed);
        })?;

        debug!(%campaign_id, added, total, "contacts assigned");
        Ok(added)
    }

    fn contacts_for(&self, campaign_id: Uuid) -> Vec<Uuid> {
        self.campaign_contacts
            .get(&campaign_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    fn set_persona_override(&self, campaign_id: Uuid, contact_id: Uuid, persona_id: Uuid) {
        self.persona_overrides
            .insert((campaign_id, contact_id), persona_id);
    }

    fn persona_override(&self, campaign_id: Uuid, contact_id: Uuid) -> Option<Uuid> {
        self.persona_overrides
            .get(&(campaign_id, contact_id))
            .map(|r| *r.value())
    }

    fn claim_batch(&self, campaign_id: Uuid, batch_number: u32) -> bool {
        let mut entry = match self.campaigns.get_mut(&campaign_id) {
            Some(e) => e,
            None => return false,
        };
        let campaign = entry.value_mut();
        let batch = campaign
            .batch_schedule
            .as_mut()
            .and_then(|s| s.batches.iter_mut().find(|b| b.batch_number == batch_number));
        match batch {
            Some(b) if b.status == BatchStatus::Pending => {
                b.status = BatchStatus::Sent;
                campaign.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn release_batch(&self, campaign_id: Uuid, batch_number: u32) -> u32 {
        let mut entry = match self.campaigns.get_mut(&campaign_id) {
            Some(e) => e,
            None => return 0,
        };
        let campaign = entry.value_mut();
        let mut released = false;
        let attempts = match campaign
            .batch_schedule
            .as_mut()
            .and_then(|s| s.batches.iter_mut().find(|b| b.batch_number == batch_number))
        {
            Some(b) => {
                if b.status == BatchStatus::Sent {
                    b.status = BatchStatus::Pending;
                    b.attempts += 1;
                    released = true;
                }
                b.attempts
            }
            None => 0,
        };
        if released {
            campaign.updated_at = Utc::now();
        }
        attempts
    }

    fn fail_batch(&self, campaign_id: Uuid, batch_number: u32) {
        if let Some(mut entry) = self.campaigns.get_mut(&campaign_id) {
            let campaign = entry.value_mut();
            if let Some(b) = campaign
                .batch_schedule
                .as_mut()
                .and_then(|s| s.batches.iter_mut().find(|b| b.batch_number == batch_number))
            {
                b.status = BatchStatus::Failed;
                campaign.updated_at = Utc::now();
            }
        }
    }
}

impl EventStore for MemoryStore {
    fn record_sent(&self, campaign_id: Uuid, contact_id: Uuid, step: u32, at: DateTime<Utc>) {
        let mut rows = self.events.entry((campaign_id, contact_id)).or_default();
        match rows.iter_mut().find(|r| r.step == step) {
            Some(row) => {
                if row.sent_at.is_none() {
                    row.sent_at = Some(at);
                }
            }
            None => {
                let mut row = DeliveryEvent::new(campaign_id, contact_id, step);
                row.sent_at = Some(at);
                rows.push(row);
                rows.sort_by_key(|r| r.step);
            }
        }
    }

    fn record_delivered(&self, campaign_id: Uuid, contact_id: Uuid, at: DateTime<Utc>) {
        self.merge_latest(campaign_id, contact_id, |row| {
            if row.delivered_at.is_none() {
                row.delivered_at = Some(at);
            }
        });
    }

    fn record_open(&self, campaign_id: Uuid, contact_id: Uuid, at: DateTime<Utc>) {
        self.merge_latest(campaign_id, contact_id, |row| {
            if row.opened_at.is_none() {
                row.opened_at = Some(at);
            }
            row.open_count += 1;
        });
    }

    fn record_click(&self, campaign_id: Uuid, contact_id: Uuid, at: DateTime<Utc>) {
        self.merge_latest(campaign_id, contact_id, |row| {
            if row.clicked_at.is_none() {
                row.clicked_at = Some(at);
            }
            row.click_count += 1;
        });
    }

    fn record_reply(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
        at: DateTime<Utc>,
        auto_reply: bool,
    ) {
        self.merge_latest(campaign_id, contact_id, |row| {
            if row.replied_at.is_none() {
                row.replied_at = Some(at);
            }
            row.auto_reply = auto_reply;
        });
    }

    fn record_bounce(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
        at: DateTime<Utc>,
        bounce_type: BounceType,
    ) {
        self.merge_latest(campaign_id, contact_id, |row| {
            if row.bounced_at.is_none() {
                row.bounced_at = Some(at);
            }
            row.bounce_type = Some(bounce_type);
        });
    }

    fn record_unsubscribe(&self, campaign_id: Uuid, contact_id: Uuid, at: DateTime<Utc>) {
        self.merge_latest(campaign_id, contact_id, |row| {
            if row.unsubscribed_at.is_none() {
                row.unsubscribed_at = Some(at);
            }
        });
    }

    fn latest_for(&self, campaign_id: Uuid, contact_id: Uuid) -> Option<DeliveryEvent> {
        self.events
            .get(&(campaign_id, contact_id))
            .and_then(|rows| rows.last().cloned())
    }

    fn events_for_campaign(&self, campaign_id: Uuid) -> Vec<DeliveryEvent> {
        self.events
            .iter()
            .filter(|e| e.key().0 == campaign_id)
            .flat_map(|e| e.value().clone())
            .collect()
    }

    fn sent_count(&self, campaign_id: Uuid) -> u32 {
        self.events
            .iter()
            .filter(|e| e.key().0 == campaign_id)
            .flat_map(|e| e.value().clone())
            .filter(|r| r.sent_at.is_some())
            .count() as u32
    }

    fn counts_for_campaign(&self, campaign_id: Uuid) -> CampaignEventCounts {
        let mut counts = CampaignEventCounts::default();
        for entry in self.events.iter() {
            if entry.key().0 != campaign_id {
                continue;
            }
            for row in entry.value().iter() {
                if row.sent_at.is_some() {
                    counts.sent += 1;
                }
                if row.delivered_at.is_some() {
                    counts.delivered += 1;
                }
                if row.opened_at.is_some() {
                    counts.opened += 1;
                }
                if row.clicked_at.is_some() {
                    counts.clicked += 1;
                }
                if row.replied_at.is_some() {
                    counts.replied += 1;
                }
                if row.bounced_at.is_some() {
                    counts.bounced += 1;
                }
                if row.unsubscribed_at.is_some() {
                    counts.unsubscribed += 1;
                }
            }
        }
        counts
    }
}
