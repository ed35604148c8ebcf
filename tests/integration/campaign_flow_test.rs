//! Integration test for the full campaign dispatch + sequence progression
//! flow, running entirely against the in-memory store.

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use uuid::Uuid;

    use outreach_core::types::{Campaign, CampaignStatus, Contact};
    use outreach_delivery::{DeliveryWindows, SimulatedSender, SuppressionList};
    use outreach_scheduler::BatchDispatcher;
    use outreach_sequence::{
        ConditionType, Sequence, SequenceEngine, SequenceLink, SequenceStatus,
    };
    use outreach_store::{CampaignStore, EventStore, MemoryStore};

    /// A two-step outreach: the intro campaign is dispatched in batches,
    /// then non-repliers advance into the follow-up campaign.
    #[test]
    fn test_intro_campaign_feeds_followup_sequence() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(SimulatedSender::new());
        let suppression = Arc::new(SuppressionList::new());
        let windows = Arc::new(DeliveryWindows::new());

        let owner = Uuid::new_v4();
        let start = Utc::now() - Duration::days(4);

        let mut intro = Campaign::new(owner, "Intro", 5, 20);
        intro.status = CampaignStatus::Scheduled;
        intro.batch_size = 2;
        intro.scheduled_start = Some(start);
        let intro_id = intro.id;
        store.insert_campaign(intro);

        let followup = Campaign::new(owner, "Follow-up", 5, 20);
        let followup_id = followup.id;
        store.insert_campaign(followup);

        let contacts: Vec<Uuid> = (0..5)
            .map(|i| store.insert_contact(Contact::new(format!("c{i}@example.com"), "Contact")))
            .collect();
        store.assign_contacts(intro_id, &contacts).unwrap();

        let dispatcher = BatchDispatcher::new(store.clone(), store.clone(), sender)
            .with_suppression(suppression.clone())
            .with_delivery_windows(windows.clone());

        // All three batches were due days ago; one tick drains them and the
        // completion detector flips the campaign.
        let dispatch = dispatcher.run_due_batches(start + Duration::minutes(90));
        assert_eq!(dispatch.sent, 5);
        assert_eq!(
            store.get_campaign(intro_id).unwrap().status,
            CampaignStatus::Completed
        );

        // One contact replied; the rest stay quiet past the link delay.
        store.record_reply(intro_id, contacts[0], start + Duration::hours(2), false);

        let engine = SequenceEngine::new(store.clone(), store.clone())
            .with_suppression(suppression)
            .with_delivery_windows(windows);
        let sequence_id = engine.create_sequence(Sequence::new("Intro chain", intro_id));
        engine
            .update_sequence_status(sequence_id, SequenceStatus::Active)
            .unwrap();
        engine
            .add_link(
                SequenceLink::new(sequence_id, intro_id, followup_id, ConditionType::NoReply)
                    .with_delay(3, 0),
            )
            .unwrap();

        let tick = engine.run_sequence_tick(Utc::now());
        assert_eq!(tick.advanced, 4);
        assert_eq!(tick.exited, 1);
        assert!(tick.errors.is_empty());

        let mut advanced = store.contacts_for(followup_id);
        advanced.sort();
        let mut expected: Vec<Uuid> = contacts[1..].to_vec();
        expected.sort();
        assert_eq!(advanced, expected);

        // Re-running the tick never enqueues anyone twice.
        let tick = engine.run_sequence_tick(Utc::now());
        assert_eq!(tick.advanced, 0);
        assert_eq!(store.contacts_for(followup_id).len(), 4);
    }
}
