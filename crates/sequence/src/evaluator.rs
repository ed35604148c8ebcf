//! Condition evaluation — decides whether a contact may advance along a
//! sequence link.
//!
//! Pure: the engine assembles an [`EngagementSnapshot`] from the event store
//! and the suppression ledger, and the evaluator decides from those facts
//! alone. Rules apply in precedence order; the first matching filter wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::types::{ConditionType, SequenceLink};

/// Facts about one contact's engagement with the parent campaign.
#[derive(Debug, Clone, Default)]
pub struct EngagementSnapshot {
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub open_count: u32,
    pub click_count: u32,
    /// Reply classified as an auto-responder (external classification).
    pub auto_reply: bool,
    /// Contact has an active unsubscribe on record.
    pub unsubscribed: bool,
}

/// Verdict for one (contact, link) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// Conditions hold; the contact may advance now.
    Eligible,
    /// Not decidable yet (delay running, engagement may still arrive);
    /// re-evaluate on a later tick.
    Pending,
    /// The contact can never cross this link.
    Ineligible(IneligibleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    Bounced,
    Unsubscribed,
    Replied,
    NoPredicate,
}

/// Externally supplied predicate for `ConditionType::Custom` links. The
/// engine guarantees the delay gate has already passed when this runs.
pub trait CustomPredicate: Send + Sync {
    fn evaluate(&self, link: &SequenceLink, snapshot: &EngagementSnapshot) -> bool;
}

/// Evaluates link conditions against a contact's engagement snapshot.
#[derive(Clone, Default)]
pub struct ConditionEvaluator {
    custom: Option<Arc<dyn CustomPredicate>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self { custom: None }
    }

    pub fn with_custom_predicate(mut self, predicate: Arc<dyn CustomPredicate>) -> Self {
        self.custom = Some(predicate);
        self
    }

    /// Applies the precedence rules:
    ///
    /// 1. `filter_bounced` + bounced -> dead end.
    /// 2. `filter_unsubscribed` + unsubscribed -> dead end.
    /// 3. `filter_auto_reply` + auto-reply -> reply treated as absent below.
    /// 4-7. Condition-specific rules, all gated on the link delay having
    ///    elapsed since the send (or the bounce, for never-sent contacts).
    ///
    /// A custom link with no registered predicate is a dead end; a custom
    /// predicate returning false is re-evaluated later (predicates are
    /// typically engagement-based and may flip).
    pub fn evaluate(
        &self,
        link: &SequenceLink,
        snapshot: &EngagementSnapshot,
        now: DateTime<Utc>,
    ) -> Eligibility {
        if link.filter_bounced && snapshot.bounced_at.is_some() {
            return Eligibility::Ineligible(IneligibleReason::Bounced);
        }
        if link.filter_unsubscribed && snapshot.unsubscribed {
            return Eligibility::Ineligible(IneligibleReason::Unsubscribed);
        }

        let replied = snapshot.replied_at.is_some() && !(link.filter_auto_reply && snapshot.auto_reply);

        // Delay gate. The reference point is the send, falling back to the
        // bounce for contacts that never got a successful send.
        let reference = match snapshot.sent_at.or(snapshot.bounced_at) {
            Some(t) => t,
            None => return Eligibility::Pending,
        };
        if now < reference + link.delay() {
            return Eligibility::Pending;
        }

        if link.engagement_required
            && snapshot.opened_at.is_none()
            && snapshot.clicked_at.is_none()
        {
            return Eligibility::Pending;
        }

        match link.condition_type {
            ConditionType::Always => Eligibility::Eligible,
            ConditionType::NoReply => {
                if replied {
                    Eligibility::Ineligible(IneligibleReason::Replied)
                } else {
                    Eligibility::Eligible
                }
            }
            ConditionType::OpenedNoReply => {
                if replied {
                    return Eligibility::Ineligible(IneligibleReason::Replied);
                }
                if snapshot.opened_at.is_none() {
                    return Eligibility::Pending;
                }
                if link.min_opens > 0 && snapshot.open_count < link.min_opens {
                    return Eligibility::Pending;
                }
                if link.min_clicks > 0 && snapshot.click_count < link.min_clicks {
                    return Eligibility::Pending;
                }
                Eligibility::Eligible
            }
            ConditionType::Custom => match &self.custom {
                Some(predicate) => {
                    if predicate.evaluate(link, snapshot) {
                        Eligibility::Eligible
                    } else {
                        Eligibility::Pending
                    }
                }
                None => {
                    warn!(
                        link_id = %link.id,
                        "custom condition with no registered predicate"
                    );
                    Eligibility::Ineligible(IneligibleReason::NoPredicate)
                }
            },
        }
    }
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionEvaluator")
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn link(condition: ConditionType) -> SequenceLink {
        SequenceLink::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), condition)
    }

    fn sent_days_ago(days: i64) -> EngagementSnapshot {
        EngagementSnapshot {
            sent_at: Some(Utc::now() - Duration::days(days)),
            ..Default::default()
        }
    }

    #[test]
    fn test_bounced_contact_is_never_eligible_with_filter() {
        let now = Utc::now();
        for condition in [
            ConditionType::Always,
            ConditionType::NoReply,
            ConditionType::OpenedNoReply,
            ConditionType::Custom,
        ] {
            let link = link(condition).with_filters(true, false, false);
            let snapshot = EngagementSnapshot {
                sent_at: Some(now - Duration::days(10)),
                opened_at: Some(now - Duration::days(9)),
                open_count: 5,
                bounced_at: Some(now - Duration::days(10)),
                ..Default::default()
            };
            assert_eq!(
                ConditionEvaluator::new().evaluate(&link, &snapshot, now),
                Eligibility::Ineligible(IneligibleReason::Bounced),
            );
        }
    }

    #[test]
    fn test_unsubscribed_contact_filtered() {
        let link = link(ConditionType::Always).with_filters(false, true, false);
        let snapshot = EngagementSnapshot {
            unsubscribed: true,
            ..sent_days_ago(5)
        };
        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &snapshot, Utc::now()),
            Eligibility::Ineligible(IneligibleReason::Unsubscribed),
        );
    }

    #[test]
    fn test_always_waits_for_delay() {
        let link = link(ConditionType::Always).with_delay(3, 0);
        let evaluator = ConditionEvaluator::new();

        assert_eq!(
            evaluator.evaluate(&link, &sent_days_ago(1), Utc::now()),
            Eligibility::Pending
        );
        assert_eq!(
            evaluator.evaluate(&link, &sent_days_ago(4), Utc::now()),
            Eligibility::Eligible
        );
    }

    #[test]
    fn test_no_reply_blocks_on_real_reply() {
        let link = link(ConditionType::NoReply).with_delay(1, 0);
        let mut snapshot = sent_days_ago(2);
        snapshot.replied_at = Some(Utc::now() - Duration::days(1));

        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &snapshot, Utc::now()),
            Eligibility::Ineligible(IneligibleReason::Replied)
        );
    }

    #[test]
    fn test_auto_reply_counts_as_no_reply_when_filtered() {
        let link = link(ConditionType::NoReply)
            .with_delay(1, 0)
            .with_filters(false, false, true);
        let mut snapshot = sent_days_ago(2);
        snapshot.replied_at = Some(Utc::now() - Duration::days(1));
        snapshot.auto_reply = true;

        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &snapshot, Utc::now()),
            Eligibility::Eligible
        );
    }

    #[test]
    fn test_opened_no_reply_below_open_threshold() {
        // min_opens=2, delay 3 days, one open, 4 days elapsed, no
        // reply -> not eligible yet.
        let link = link(ConditionType::OpenedNoReply)
            .with_delay(3, 0)
            .with_thresholds(2, 0);
        let mut snapshot = sent_days_ago(4);
        snapshot.opened_at = Some(Utc::now() - Duration::days(3));
        snapshot.open_count = 1;

        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &snapshot, Utc::now()),
            Eligibility::Pending
        );

        snapshot.open_count = 2;
        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &snapshot, Utc::now()),
            Eligibility::Eligible
        );
    }

    #[test]
    fn test_opened_no_reply_needs_an_open() {
        let link = link(ConditionType::OpenedNoReply).with_delay(0, 1);
        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &sent_days_ago(1), Utc::now()),
            Eligibility::Pending
        );
    }

    #[test]
    fn test_engagement_required_gate() {
        let link = {
            let mut l = link(ConditionType::Always).with_delay(0, 1);
            l.engagement_required = true;
            l
        };
        let evaluator = ConditionEvaluator::new();

        assert_eq!(
            evaluator.evaluate(&link, &sent_days_ago(1), Utc::now()),
            Eligibility::Pending
        );

        let mut engaged = sent_days_ago(1);
        engaged.clicked_at = Some(Utc::now());
        engaged.click_count = 1;
        assert_eq!(
            evaluator.evaluate(&link, &engaged, Utc::now()),
            Eligibility::Eligible
        );
    }

    #[test]
    fn test_custom_without_predicate_is_dead_end() {
        let link = link(ConditionType::Custom);
        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &sent_days_ago(1), Utc::now()),
            Eligibility::Ineligible(IneligibleReason::NoPredicate)
        );
    }

    #[test]
    fn test_custom_predicate_runs_after_delay_gate() {
        struct OpenedTwice;
        impl CustomPredicate for OpenedTwice {
            fn evaluate(&self, _link: &SequenceLink, snapshot: &EngagementSnapshot) -> bool {
                snapshot.open_count >= 2
            }
        }

        let link = link(ConditionType::Custom).with_delay(2, 0);
        let evaluator = ConditionEvaluator::new().with_custom_predicate(Arc::new(OpenedTwice));

        // Delay not elapsed: the predicate never runs.
        let mut early = sent_days_ago(1);
        early.open_count = 5;
        assert_eq!(
            evaluator.evaluate(&link, &early, Utc::now()),
            Eligibility::Pending
        );

        let mut late = sent_days_ago(3);
        late.open_count = 1;
        assert_eq!(
            evaluator.evaluate(&link, &late, Utc::now()),
            Eligibility::Pending
        );
        late.open_count = 2;
        assert_eq!(
            evaluator.evaluate(&link, &late, Utc::now()),
            Eligibility::Eligible
        );
    }

    #[test]
    fn test_delay_reference_falls_back_to_bounce() {
        // Contact never got a successful send; the bounce timestamp anchors
        // the delay for links that choose to include bounced contacts.
        let link = link(ConditionType::Always).with_delay(1, 0);
        let snapshot = EngagementSnapshot {
            bounced_at: Some(Utc::now() - Duration::days(2)),
            ..Default::default()
        };
        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &snapshot, Utc::now()),
            Eligibility::Eligible
        );
    }

    #[test]
    fn test_unsent_contact_is_pending() {
        let link = link(ConditionType::Always);
        assert_eq!(
            ConditionEvaluator::new().evaluate(&link, &EngagementSnapshot::default(), Utc::now()),
            Eligibility::Pending
        );
    }
}
