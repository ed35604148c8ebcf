//! Data-store interface for campaigns, contact assignments, and delivery
//! events.
//!
//! The engines only ever talk to these traits. The in-memory implementation
//! in [`memory`] backs development and tests; production swaps in a hosted
//! relational store behind the same seams.

pub mod memory;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use outreach_core::types::{
    BounceType, Campaign, CampaignEventCounts, CampaignStatus, DeliveryEvent,
};
use outreach_core::OutreachResult;

pub use memory::MemoryStore;

/// Persistence seam for campaign rows and contact assignments.
///
/// `claim_batch`/`release_batch`/`fail_batch` are the check-and-set
/// primitives the dispatcher's at-most-once contract rides on; every other
/// mutation goes through `update_campaign`, which must be atomic per row so
/// overlapping trigger invocations cannot lose updates.
pub trait CampaignStore: Send + Sync {
    fn insert_campaign(&self, campaign: Campaign);

    fn get_campaign(&self, id: Uuid) -> Option<Campaign>;

    fn list_campaigns(&self) -> Vec<Campaign>;

    fn list_by_status(&self, statuses: &[CampaignStatus]) -> Vec<Campaign>;

    /// Atomic read-modify-write of a single campaign row.
    fn update_campaign(
        &self,
        id: Uuid,
        mutate: &mut dyn FnMut(&mut Campaign),
    ) -> OutreachResult<()>;

    /// Assign contacts to a campaign, skipping ids already assigned.
    /// Returns the number of newly assigned contacts.
    fn assign_contacts(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> OutreachResult<u32>;

    fn contacts_for(&self, campaign_id: Uuid) -> Vec<Uuid>;

    /// Persona used for this contact within this campaign, when a sequence
    /// transition overrode the campaign default.
    fn set_persona_override(&self, campaign_id: Uuid, contact_id: Uuid, persona_id: Uuid);

    fn persona_override(&self, campaign_id: Uuid, contact_id: Uuid) -> Option<Uuid>;

    /// Check-and-set: flips the batch Pending -> Sent as one logical step.
    /// Returns false when the batch is not Pending (already claimed by a
    /// concurrent invocation, or terminal), in which case the caller must
    /// not dispatch.
    fn claim_batch(&self, campaign_id: Uuid, batch_number: u32) -> bool;

    /// Reverts a claimed batch to Pending and bumps its attempt counter.
    /// Used when the send pipeline was unavailable and the dispatch must not
    /// count as having happened. Returns the attempts so far.
    fn release_batch(&self, campaign_id: Uuid, batch_number: u32) -> u32;

    /// Marks a batch Failed (terminal).
    fn fail_batch(&self, campaign_id: Uuid, batch_number: u32);
}

/// Persistence seam for delivery events, the single source of truth for
/// campaign progress. Writes merge into the (campaign, contact, step) row.
pub trait EventStore: Send + Sync {
    fn record_sent(&self, campaign_id: Uuid, contact_id: Uuid, step: u32, at: DateTime<Utc>);

    fn record_delivered(&self, campaign_id: Uuid, contact_id: Uuid, at: DateTime<Utc>);

    fn record_open(&self, campaign_id: Uuid, contact_id: Uuid, at: DateTime<Utc>);

    fn record_click(&self, campaign_id: Uuid, contact_id: Uuid, at: DateTime<Utc>);

    fn record_reply(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
        at: DateTime<Utc>,
        auto_reply: bool,
    );

    fn record_bounce(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
        at: DateTime<Utc>,
        bounce_type: BounceType,
    );

    fn record_unsubscribe(&self, campaign_id: Uuid, contact_id: Uuid, at: DateTime<Utc>);

    /// Latest-step event row for one contact in one campaign.
    fn latest_for(&self, campaign_id: Uuid, contact_id: Uuid) -> Option<DeliveryEvent>;

    fn events_for_campaign(&self, campaign_id: Uuid) -> Vec<DeliveryEvent>;

    /// Count of rows with `sent_at` set for the campaign.
    fn sent_count(&self, campaign_id: Uuid) -> u32;

    fn counts_for_campaign(&self, campaign_id: Uuid) -> CampaignEventCounts;
}
