//! Typed broadcast events.
//!
//! Every state change the dashboards and overlays care about is published on
//! a per-channel `tokio::sync::broadcast` channel. The enum is closed; the
//! wire-level event names in the serde tags are load-bearing and must not
//! change without coordinating with the overlay clients.

use crate::types::*;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ChannelEvent {
    #[serde(rename = "queue:video_added")]
    VideoAdded { entry: QueueEntry },
    #[serde(rename = "queue:item_status")]
    ItemStatus {
        entry_id: EntryId,
        status: EntryStatus,
        moderation_status: ModerationStatus,
        position: Option<u32>,
    },
    #[serde(rename = "queue:top_eight_shuffled")]
    TopEightShuffled {
        /// Candidate ids in pre-shuffle order, for audit and replay
        before: Vec<EntryId>,
        after: Vec<EntryId>,
        seed: u64,
    },
    #[serde(rename = "queue:vip_updated")]
    VipUpdated { vips: Vec<EntryId> },
    #[serde(rename = "queue:cleared")]
    QueueCleared { removed: Vec<EntryId> },
    #[serde(rename = "voting:started")]
    VotingStarted { session: SessionView },
    #[serde(rename = "voting:update")]
    VotingUpdate { session: SessionView },
    #[serde(rename = "voting:ended")]
    VotingEnded {
        queue_item_id: EntryId,
        stage: VotingStage,
        reason: String,
    },
    #[serde(rename = "cup:standings_updated")]
    CupStandingsUpdated {
        cup_id: CupId,
        standings: Vec<CupStanding>,
    },
    #[serde(rename = "series:standings_updated")]
    SeriesStandingsUpdated {
        series_id: SeriesId,
        standings: Vec<SeriesStanding>,
    },
}

/// Public view of a judge slot: the score stays hidden until its reveal, so
/// subscribers cannot spoil the ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSlotView {
    pub judge_id: JudgeId,
    pub name: String,
    pub has_score: bool,
    pub locked: bool,
    pub lock_type: Option<LockType>,
    pub reveal_status: RevealStatus,
    /// Frozen value, present only once revealed
    pub score: Option<f64>,
}

impl From<&JudgeSlot> for JudgeSlotView {
    fn from(slot: &JudgeSlot) -> Self {
        Self {
            judge_id: slot.judge_id.clone(),
            name: slot.name.clone(),
            has_score: slot.score.is_some(),
            locked: slot.locked,
            lock_type: slot.lock_type,
            reveal_status: slot.reveal_status,
            score: slot.revealed_score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub queue_item_id: EntryId,
    pub cup_id: Option<CupId>,
    pub stage: VotingStage,
    pub judges: Vec<JudgeSlotView>,
    pub reveal_index: usize,
    pub computed_average: Option<f64>,
    pub computed_social: Option<f64>,
    pub duplicate: Option<PriorResult>,
}

impl From<&VotingSession> for SessionView {
    fn from(session: &VotingSession) -> Self {
        Self {
            queue_item_id: session.queue_item_id.clone(),
            cup_id: session.cup_id.clone(),
            stage: session.stage,
            judges: session.judges.iter().map(JudgeSlotView::from).collect(),
            reveal_index: session.reveal_index,
            computed_average: session.computed_average,
            computed_social: session.computed_social,
            duplicate: session.duplicate.clone(),
        }
    }
}

/// Fire-and-forget publisher around the broadcast channel. A failed send
/// never rolls back the mutation it announces.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<ChannelEvent>,
}

impl EventSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChannelEvent) {
        // No receivers connected is fine
        if let Err(err) = self.tx.send(event) {
            tracing::debug!("event dropped, no subscribers: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_event_names() {
        let event = ChannelEvent::VipUpdated { vips: vec![] };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["t"], "queue:vip_updated");

        let event = ChannelEvent::VotingEnded {
            queue_item_id: "e1".to_string(),
            stage: VotingStage::Completed,
            reason: "done".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["t"], "voting:ended");
        assert_eq!(value["stage"], "completed");
    }

    #[test]
    fn test_slot_view_hides_unrevealed_score() {
        let mut slot = JudgeSlot::new("j1".to_string(), "Judge".to_string());
        slot.score = Some(4.5);
        slot.locked = true;

        let view = JudgeSlotView::from(&slot);
        assert!(view.has_score);
        assert_eq!(view.score, None);

        slot.reveal_status = RevealStatus::Revealed;
        slot.revealed_score = Some(4.5);
        let view = JudgeSlotView::from(&slot);
        assert_eq!(view.score, Some(4.5));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let sender = EventSender::new(8);
        sender.publish(ChannelEvent::QueueCleared { removed: vec![] });

        let mut rx = sender.subscribe();
        sender.publish(ChannelEvent::QueueCleared {
            removed: vec!["e1".to_string()],
        });
        match rx.recv().await.unwrap() {
            ChannelEvent::QueueCleared { removed } => assert_eq!(removed, vec!["e1".to_string()]),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
