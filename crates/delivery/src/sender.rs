//! Send-pipeline boundary.
//!
//! The scheduler hands whole batches to a [`BatchSender`] and records what
//! came back. Retrying individual contacts is the pipeline's job, not the
//! engine's; the engine only ever retries a batch whose dispatch never
//! happened at all.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use outreach_core::error::{OutreachError, OutreachResult};

/// Per-contact result reported by the send pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub contact_id: Uuid,
    pub status: SendStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Failed,
}

/// External send pipeline.
///
/// `Err` means the pipeline itself was unreachable and the batch must remain
/// pending; an `Ok` with failed outcomes is a partial failure and the batch
/// still counts as dispatched.
pub trait BatchSender: Send + Sync {
    fn send_batch(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> OutreachResult<Vec<SendOutcome>>;
}

/// Development/test sender. Logs every batch, fabricates provider message
/// ids, and supports injecting per-contact failures or whole-pipeline
/// unavailability.
///
/// In production: POST to the transactional email API.
#[derive(Default)]
pub struct SimulatedSender {
    failing_contacts: DashSet<Uuid>,
    unavailable: AtomicBool,
}

impl SimulatedSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a contact so every send for it reports Failed.
    pub fn fail_contact(&self, contact_id: Uuid) {
        self.failing_contacts.insert(contact_id);
    }

    /// Toggles whole-pipeline unavailability.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl BatchSender for SimulatedSender {
    fn send_batch(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> OutreachResult<Vec<SendOutcome>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OutreachError::TransientDispatch(
                "send pipeline unavailable".to_string(),
            ));
        }

        info!(
            %campaign_id,
            contacts = contact_ids.len(),
            "dispatching batch to send pipeline"
        );

        let outcomes = contact_ids
            .iter()
            .map(|contact_id| {
                if self.failing_contacts.contains(contact_id) {
                    debug!(%contact_id, "simulated send failure");
                    SendOutcome {
                        contact_id: *contact_id,
                        status: SendStatus::Failed,
                        provider_message_id: None,
                        error: Some("mailbox rejected message".to_string()),
                    }
                } else {
                    SendOutcome {
                        contact_id: *contact_id,
                        status: SendStatus::Sent,
                        provider_message_id: Some(format!("msg-{}", Uuid::new_v4())),
                        error: None,
                    }
                }
            })
            .collect();

        Ok(outcomes)
    }
}
