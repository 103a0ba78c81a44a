use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type ChannelId = String;
pub type EntryId = String;
pub type VideoId = String;
pub type SubmitterId = String;
pub type JudgeId = String;
pub type CupId = String;
pub type SeriesId = String;

// ========== Queue ==========

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Approved,
    TopEight,
    Playing,
    Scored,
    Played,
    Skipped,
    Removed,
    Rejected,
    Eliminated,
}

impl EntryStatus {
    /// Entries that participate in position-based ordering.
    pub fn is_orderable(self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::TopEight)
    }

    /// Entries that are done for good and never return to the queue.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Played | Self::Skipped | Self::Removed | Self::Rejected | Self::Eliminated
        )
    }

    /// Entries that still occupy queue capacity (orderable, on stage, or
    /// awaiting finalization).
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationStatus {
    Approved,
    Warning,
}

/// Result of a previous finalized run of the same video, attached to
/// resubmissions and to voting sessions for the duplicate penalty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorResult {
    pub average: f64,
    pub judge_count: u32,
    pub played_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub channel_id: ChannelId,
    pub video_id: VideoId,
    pub title: String,
    pub duration_secs: u32,
    pub submitter_id: SubmitterId,
    /// Auto-generated friendly alias shown on stream instead of the account name
    pub submitter_alias: String,
    pub status: EntryStatus,
    pub moderation_status: ModerationStatus,
    /// Dense 1-based position among orderable non-VIP entries, `None` otherwise
    pub position: Option<u32>,
    pub cup_id: Option<CupId>,
    /// Non-blocking annotation when the video already played to completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<PriorResult>,
    pub created_at: String,
    pub played_at: Option<String>,
}

/// A raw audience submission, before admission control has seen it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmission {
    pub video_id: VideoId,
    pub title: String,
    pub duration_secs: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    Approve,
    Reject,
    Warn,
    TopEight,
    Vip,
    Unvip,
    Remove,
}

// ========== Voting ==========

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VotingStage {
    Collecting,
    Revealing,
    AverageReady,
    Average,
    Social,
    Completed,
    Cancelled,
}

impl VotingStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Manual,
    Forced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevealStatus {
    Hidden,
    Revealed,
    Skipped,
}

impl RevealStatus {
    /// A slot is resolved once the ceremony has passed over it.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Revealed | Self::Skipped)
    }
}

/// One judge's seat in a voting session. Persists across score updates
/// within the session; the durable record is `JudgeScore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSlot {
    pub judge_id: JudgeId,
    pub name: String,
    pub score: Option<f64>,
    pub locked: bool,
    pub lock_type: Option<LockType>,
    pub reveal_status: RevealStatus,
    /// Displayed value frozen at reveal time, immune to later score edits
    pub revealed_score: Option<f64>,
}

impl JudgeSlot {
    pub fn new(judge_id: JudgeId, name: String) -> Self {
        Self {
            judge_id,
            name,
            score: None,
            locked: false,
            lock_type: None,
            reveal_status: RevealStatus::Hidden,
            revealed_score: None,
        }
    }

    /// A score may only be shown once its judge locked it in.
    pub fn is_revealable(&self) -> bool {
        self.locked && self.score.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingSession {
    pub queue_item_id: EntryId,
    pub cup_id: Option<CupId>,
    pub stage: VotingStage,
    pub judges: Vec<JudgeSlot>,
    pub reveal_index: usize,
    pub computed_average: Option<f64>,
    pub computed_social: Option<f64>,
    pub social_baseline: f64,
    /// Prior finalized result for the same video, if any
    pub duplicate: Option<PriorResult>,
    pub started_at: String,
}

impl VotingSession {
    pub fn slot(&self, judge_id: &str) -> Option<&JudgeSlot> {
        self.judges.iter().find(|s| s.judge_id == judge_id)
    }

    pub fn slot_mut(&mut self, judge_id: &str) -> Option<&mut JudgeSlot> {
        self.judges.iter_mut().find(|s| s.judge_id == judge_id)
    }
}

/// Durable per-judge score, the source of truth for standings. Outlives the
/// voting session that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeScore {
    pub cup_id: Option<CupId>,
    pub queue_item_id: EntryId,
    pub judge_id: JudgeId,
    pub score: f64,
    pub is_locked: bool,
    pub lock_type: Option<LockType>,
}

// ========== Cups & standings ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cup {
    pub id: CupId,
    pub channel_id: ChannelId,
    pub series_id: Option<SeriesId>,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CupStanding {
    pub cup_id: CupId,
    pub submitter_id: SubmitterId,
    pub total_score: f64,
    /// Shrunk top-K average, the ranking key
    pub average_score: f64,
    pub rank: u32,
    pub video_count: u32,
    pub judge_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CupPlacement {
    pub cup_id: CupId,
    pub rank: u32,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesStanding {
    pub series_id: SeriesId,
    pub submitter_id: SubmitterId,
    pub total_points: u32,
    pub cups_played: u32,
    /// Lowest (best) rank achieved in any cup of the series
    pub best_finish: u32,
    pub placements: Vec<CupPlacement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orderable_statuses() {
        assert!(EntryStatus::Pending.is_orderable());
        assert!(EntryStatus::Approved.is_orderable());
        assert!(EntryStatus::TopEight.is_orderable());
        assert!(!EntryStatus::Playing.is_orderable());
        assert!(!EntryStatus::Played.is_orderable());
    }

    #[test]
    fn test_terminal_statuses_are_not_active() {
        for status in [
            EntryStatus::Played,
            EntryStatus::Skipped,
            EntryStatus::Removed,
            EntryStatus::Rejected,
            EntryStatus::Eliminated,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
        }
        assert!(EntryStatus::Playing.is_active());
        assert!(EntryStatus::Scored.is_active());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&EntryStatus::TopEight).unwrap();
        assert_eq!(json, "\"TOP_EIGHT\"");
        let json = serde_json::to_string(&VotingStage::AverageReady).unwrap();
        assert_eq!(json, "\"average_ready\"");
    }

    #[test]
    fn test_slot_revealable_requires_lock_and_score() {
        let mut slot = JudgeSlot::new("j1".to_string(), "Judge".to_string());
        assert!(!slot.is_revealable());
        slot.score = Some(4.0);
        assert!(!slot.is_revealable());
        slot.locked = true;
        assert!(slot.is_revealable());
    }
}
