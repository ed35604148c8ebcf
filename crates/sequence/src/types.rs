//! Sequence domain types — multi-step outreach chains and their links.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use outreach_delivery::DeliveryWindow;

/// A multi-step outreach chain: campaigns connected by conditional links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub status: SequenceStatus,
    /// Campaign contacts enter the sequence through.
    pub entry_campaign_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, entry_campaign_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: SequenceStatus::Draft,
            entry_campaign_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle status of a sequence definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Draft,
    Active,
    Paused,
}

/// Engagement condition gating a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    NoReply,
    OpenedNoReply,
    Always,
    Custom,
}

/// One directed edge in a sequence: "contacts finishing `parent_campaign_id`
/// move to `next_campaign_id` once the delay and conditions hold".
///
/// Links are configuration: immutable once a contact has transitioned across
/// them (the engine's ledger keys on contact + link).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceLink {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub parent_campaign_id: Uuid,
    pub next_campaign_id: Uuid,
    pub delay_days: u32,
    pub delay_hours: u32,
    pub condition_type: ConditionType,
    /// Minimum open count before `OpenedNoReply` fires; 0 disables.
    #[serde(default)]
    pub min_opens: u32,
    /// Minimum click count before `OpenedNoReply` fires; 0 disables.
    #[serde(default)]
    pub min_clicks: u32,
    /// Require some open/click evidence regardless of condition type.
    #[serde(default)]
    pub engagement_required: bool,
    /// Treat auto-replies as "no reply".
    #[serde(default)]
    pub filter_auto_reply: bool,
    /// Bounced contacts never cross this link.
    #[serde(default)]
    pub filter_bounced: bool,
    /// Unsubscribed contacts never cross this link.
    #[serde(default)]
    pub filter_unsubscribed: bool,
    /// Persona the target campaign should use for contacts arriving here.
    #[serde(default)]
    pub persona_override_id: Option<Uuid>,
    /// Delivery window applied to the target campaign for arriving contacts.
    #[serde(default)]
    pub delivery_window: Option<DeliveryWindow>,
    pub created_at: DateTime<Utc>,
}

impl SequenceLink {
    pub fn new(
        sequence_id: Uuid,
        parent_campaign_id: Uuid,
        next_campaign_id: Uuid,
        condition_type: ConditionType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_id,
            parent_campaign_id,
            next_campaign_id,
            delay_days: 0,
            delay_hours: 0,
            condition_type,
            min_opens: 0,
            min_clicks: 0,
            engagement_required: false,
            filter_auto_reply: false,
            filter_bounced: false,
            filter_unsubscribed: false,
            persona_override_id: None,
            delivery_window: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_delay(mut self, days: u32, hours: u32) -> Self {
        self.delay_days = days;
        self.delay_hours = hours;
        self
    }

    pub fn with_thresholds(mut self, min_opens: u32, min_clicks: u32) -> Self {
        self.min_opens = min_opens;
        self.min_clicks = min_clicks;
        self
    }

    pub fn with_filters(mut self, bounced: bool, unsubscribed: bool, auto_reply: bool) -> Self {
        self.filter_bounced = bounced;
        self.filter_unsubscribed = unsubscribed;
        self.filter_auto_reply = auto_reply;
        self
    }

    /// Wait imposed between the parent-campaign send and evaluation.
    pub fn delay(&self) -> Duration {
        Duration::days(i64::from(self.delay_days)) + Duration::hours(i64::from(self.delay_hours))
    }
}

/// Where one contact stands within one sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSequenceState {
    pub contact_id: Uuid,
    pub sequence_id: Uuid,
    pub status: ContactSequenceStatus,
    pub current_campaign_id: Option<Uuid>,
    /// Campaigns visited, in order. The cycle guard refuses any transition
    /// whose target is already on this path.
    pub path: Vec<Uuid>,
    pub entered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-(contact, sequence) machine. Complete and Exited are both normal
/// terminals: Complete means the chain ran out of links, Exited means every
/// remaining link was permanently failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSequenceStatus {
    NotStarted,
    InCampaign,
    PendingTransition,
    SequenceComplete,
    SequenceExited,
}

impl ContactSequenceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContactSequenceStatus::SequenceComplete | ContactSequenceStatus::SequenceExited
        )
    }
}

/// Idempotency ledger entry: one decision per (contact, link), ever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub contact_id: Uuid,
    pub link_id: Uuid,
    pub decided_at: DateTime<Utc>,
    pub eligible: bool,
    /// False for eligible contacts whose transition was skipped (cycle).
    pub enqueued: bool,
}
