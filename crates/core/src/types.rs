//! Core domain types — campaigns, batch schedules, delivery events, contacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Campaign ──────────────────────────────────────────────────────────────

/// An email-outreach campaign owned by a tenant user.
///
/// The batch schedule and its pointer fields are the engine's only durable
/// state; everything else about progress is derived from delivery events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    /// Number of contacts assigned to this campaign.
    pub total_contacts: u32,
    /// Maximum emails dispatched per day.
    pub daily_send_limit: u32,
    /// Explicit batch size; 0 means "use `daily_send_limit`".
    #[serde(default)]
    pub batch_size: u32,
    /// Minutes between consecutive batches.
    pub batch_interval_minutes: u32,
    pub scheduled_start: Option<DateTime<Utc>>,
    /// Generated once (lazily, at first dispatch) and then only mutated in
    /// place. Never regenerated while contacts are assigned.
    pub batch_schedule: Option<BatchSchedule>,
    pub next_batch_send_time: Option<DateTime<Utc>>,
    pub first_batch_sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Advisory counters only. Correctness decisions recompute from
    /// delivery events.
    pub emails_sent: u32,
    pub contacts_processed: u32,
    pub contacts_remaining: u32,
    pub contacts_failed: u32,
    #[serde(default)]
    pub batch_history: Vec<BatchHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Creates a draft campaign with no schedule.
    pub fn new(
        owner_id: Uuid,
        name: impl Into<String>,
        daily_send_limit: u32,
        batch_interval_minutes: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            status: CampaignStatus::Draft,
            total_contacts: 0,
            daily_send_limit,
            batch_size: 0,
            batch_interval_minutes,
            scheduled_start: None,
            batch_schedule: None,
            next_batch_send_time: None,
            first_batch_sent_at: None,
            completed_at: None,
            emails_sent: 0,
            contacts_processed: 0,
            contacts_remaining: 0,
            contacts_failed: 0,
            batch_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Batch size used when the schedule is planned.
    pub fn effective_batch_size(&self) -> u32 {
        if self.batch_size > 0 {
            self.batch_size
        } else {
            self.daily_send_limit
        }
    }

    /// Whether the dispatcher should consider this campaign at all.
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self.status,
            CampaignStatus::Scheduled | CampaignStatus::Sending
        )
    }
}

/// Lifecycle status of a campaign. Completed and Failed are terminal;
/// Paused is resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }
}

// ─── Batch schedule ────────────────────────────────────────────────────────

/// Dispatch state of a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Sent,
    Failed,
}

/// A scheduled subset of a campaign's contacts, dispatched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// 0-indexed position in the schedule.
    pub batch_number: u32,
    pub scheduled_time: DateTime<Utc>,
    pub contact_ids: Vec<Uuid>,
    pub contact_count: u32,
    pub status: BatchStatus,
    /// Dispatch attempts that ended in a released claim (pipeline down).
    #[serde(default)]
    pub attempts: u32,
}

/// The full batch plan for a campaign. Each contact appears in exactly one
/// batch, so a batch flipping to Sent guarantees at-most-once delivery per
/// contact per campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSchedule {
    pub batches: Vec<Batch>,
    pub batch_size: u32,
    pub interval_minutes: u32,
    pub total_batches: u32,
    pub estimated_completion: DateTime<Utc>,
}

impl BatchSchedule {
    /// The lowest-numbered batch still pending, if any.
    pub fn next_pending(&self) -> Option<&Batch> {
        self.batches
            .iter()
            .find(|b| b.status == BatchStatus::Pending)
    }

    /// True once every batch is Sent or Failed.
    pub fn all_terminal(&self) -> bool {
        self.batches
            .iter()
            .all(|b| b.status != BatchStatus::Pending)
    }

    pub fn sent_batches(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Sent)
            .count()
    }
}

/// Audit record appended once per dispatched batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchHistoryEntry {
    pub batch_number: u32,
    pub dispatched_at: DateTime<Utc>,
    /// Contacts handed to the send pipeline.
    pub attempted: u32,
    /// Contacts the pipeline reported as failed.
    pub failed: u32,
}

// ─── Delivery events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceType {
    Hard,
    Soft,
}

/// The authoritative record of what happened to one contact within one
/// campaign step. Rows merge: repeated opens/clicks bump the counters and
/// keep the first timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub step: u32,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub bounce_type: Option<BounceType>,
    #[serde(default)]
    pub open_count: u32,
    #[serde(default)]
    pub click_count: u32,
    /// Reply classified as an automatic responder by the reply pipeline.
    /// Supplied externally; the engine never classifies.
    #[serde(default)]
    pub auto_reply: bool,
}

impl DeliveryEvent {
    pub fn new(campaign_id: Uuid, contact_id: Uuid, step: u32) -> Self {
        Self {
            campaign_id,
            contact_id,
            step,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            replied_at: None,
            bounced_at: None,
            unsubscribed_at: None,
            bounce_type: None,
            open_count: 0,
            click_count: 0,
            auto_reply: false,
        }
    }

    pub fn is_bounced(&self) -> bool {
        self.bounced_at.is_some()
    }

    pub fn has_replied(&self) -> bool {
        self.replied_at.is_some()
    }
}

/// Per-campaign aggregate counts derived from delivery events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignEventCounts {
    pub sent: u32,
    pub delivered: u32,
    pub opened: u32,
    pub clicked: u32,
    pub replied: u32,
    pub bounced: u32,
    pub unsubscribed: u32,
}

// ─── Analytics events ──────────────────────────────────────────────────────

/// Analytics event emitted into the event bus by the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub campaign_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub sequence_id: Option<Uuid>,
    pub batch_number: Option<u32>,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Campaign lifecycle
    CampaignScheduled,
    CampaignStarted,
    CampaignCompleted,
    CampaignFailed,
    CampaignPaused,
    CampaignRecovered,
    // Batch dispatch
    BatchDispatched,
    BatchDeferred,
    BatchFailed,
    // Per-contact delivery
    EmailSent,
    EmailFailed,
    EmailSuppressed,
    // Sequence progression
    SequenceEntered,
    SequenceAdvanced,
    SequenceCompleted,
    SequenceExited,
    SequenceCycleSkipped,
}

// ─── Contacts ──────────────────────────────────────────────────────────────

/// Minimal contact identity. Enrichment, custom fields, and list membership
/// live in the CRM layer, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}
