//! Admission control for audience submissions.

use super::Channel;
use crate::error::{Error, Result};
use crate::events::ChannelEvent;
use crate::types::*;

impl Channel {
    /// Run a submission through admission control and, if it passes, append
    /// it to the queue.
    ///
    /// Hard rejects: closed queue, full queue, per-user cap, cooldown,
    /// identical video already active. A video that already played to
    /// completion is admitted with a WARNING annotation carrying its prior
    /// result.
    pub async fn admit_submission(
        &self,
        submitter_id: &str,
        submission: NewSubmission,
    ) -> Result<QueueEntry> {
        if submission.video_id.trim().is_empty() {
            return Err(Error::Validation("submission has no video id".to_string()));
        }
        if submission.title.trim().is_empty() {
            return Err(Error::Validation("submission has no title".to_string()));
        }

        let mut inner = self.lock_inner().await;

        if !inner.queue_open {
            return Err(Error::Conflict("queue is closed".to_string()));
        }

        let entries = self.store().entries_for_channel(self.id()).await?;
        let active: Vec<&QueueEntry> = entries.iter().filter(|e| e.status.is_active()).collect();

        let max = self.settings().max_queue_size;
        if max > 0 && active.len() >= max {
            return Err(Error::Conflict("queue is full".to_string()));
        }

        let own_active = active
            .iter()
            .filter(|e| e.submitter_id == submitter_id)
            .count();
        if own_active >= self.settings().per_user_limit {
            return Err(Error::Conflict(format!(
                "submitter already has {} active entries",
                own_active
            )));
        }

        if let Some(last) = inner.last_accepted.get(submitter_id) {
            let cooldown = self.settings().submission_cooldown;
            if last.elapsed() < cooldown {
                return Err(Error::Conflict(format!(
                    "cooldown active, wait {}s between submissions",
                    cooldown.as_secs()
                )));
            }
        }

        if active.iter().any(|e| e.video_id == submission.video_id) {
            return Err(Error::Conflict(
                "video is already in the queue".to_string(),
            ));
        }

        // Replays are allowed but flagged with what the video scored last time
        let warning = self
            .prior_result_for_video(&submission.video_id, None)
            .await?;
        let moderation_status = if warning.is_some() {
            ModerationStatus::Warning
        } else {
            ModerationStatus::Approved
        };

        let submitter_alias = inner
            .aliases
            .entry(submitter_id.to_string())
            .or_insert_with(|| {
                petname::petname(2, "-").unwrap_or_else(|| "mystery-guest".to_string())
            })
            .clone();

        let next_position = entries.iter().filter_map(|e| e.position).max().unwrap_or(0) + 1;
        let cup_id = self.store().active_cup(self.id()).await?.map(|c| c.id);

        let entry = QueueEntry {
            id: ulid::Ulid::new().to_string(),
            channel_id: self.id().to_string(),
            video_id: submission.video_id,
            title: submission.title,
            duration_secs: submission.duration_secs,
            submitter_id: submitter_id.to_string(),
            submitter_alias,
            status: EntryStatus::Pending,
            moderation_status,
            position: Some(next_position),
            cup_id,
            warning,
            created_at: self.now(),
            played_at: None,
        };

        self.store().insert_entry(entry.clone()).await?;
        inner
            .last_accepted
            .insert(submitter_id.to_string(), std::time::Instant::now());

        tracing::info!(
            channel = %self.id(),
            entry = %entry.id,
            video = %entry.video_id,
            position = next_position,
            "submission admitted"
        );
        self.publish(ChannelEvent::VideoAdded {
            entry: entry.clone(),
        });

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::config::Settings;
    use crate::error::Error;
    use crate::types::*;

    #[tokio::test]
    async fn test_admitted_entries_get_dense_positions_and_cup_tag() {
        let channel = test_channel();
        let cup = channel.open_cup("Friday Cup", None).await.unwrap();

        let first = channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();
        let second = channel
            .admit_submission("bob", submission("clip-2"))
            .await
            .unwrap();

        assert_eq!(first.position, Some(1));
        assert_eq!(second.position, Some(2));
        assert_eq!(first.status, EntryStatus::Pending);
        assert_eq!(first.cup_id.as_deref(), Some(cup.id.as_str()));
        assert_ne!(first.submitter_alias, "");
    }

    #[tokio::test]
    async fn test_alias_is_stable_per_submitter() {
        let channel = test_channel();
        let first = channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();
        let second = channel
            .admit_submission("alice", submission("clip-2"))
            .await
            .unwrap();
        assert_eq!(first.submitter_alias, second.submitter_alias);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let channel = test_channel();
        channel.set_queue_open(false).await;

        let result = channel.admit_submission("alice", submission("clip-1")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let channel = test_channel_with(Settings {
            max_queue_size: 1,
            submission_cooldown: std::time::Duration::ZERO,
            ..Settings::default()
        });
        channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();

        let result = channel.admit_submission("bob", submission("clip-2")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_per_user_cap_rejects() {
        let channel = test_channel();
        channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();
        channel
            .admit_submission("alice", submission("clip-2"))
            .await
            .unwrap();

        let result = channel.admit_submission("alice", submission("clip-3")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        // A different submitter is unaffected
        assert!(channel
            .admit_submission("bob", submission("clip-4"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cooldown_rejects_rapid_resubmission() {
        let channel = test_channel_with(Settings {
            submission_cooldown: std::time::Duration::from_secs(60),
            ..Settings::default()
        });
        channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();

        let result = channel.admit_submission("alice", submission("clip-2")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_duplicate_active_video_is_hard_rejected() {
        let channel = test_channel();
        channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();

        let result = channel.admit_submission("bob", submission("clip-1")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_previously_played_video_is_admitted_with_warning() {
        let channel = test_channel();
        let mut old = channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();

        // Finish the first run with judge history
        old.status = EntryStatus::Played;
        old.position = None;
        old.played_at = Some("2026-01-01T20:00:00+00:00".to_string());
        channel.store().update_entry(old.clone()).await.unwrap();
        for (judge, score) in [("judge-ava", 3.0), ("judge-ben", 5.0)] {
            channel
                .store()
                .upsert_judge_score(JudgeScore {
                    cup_id: None,
                    queue_item_id: old.id.clone(),
                    judge_id: judge.to_string(),
                    score,
                    is_locked: true,
                    lock_type: Some(LockType::Manual),
                })
                .await
                .unwrap();
        }

        let replay = channel
            .admit_submission("bob", submission("clip-1"))
            .await
            .unwrap();
        assert_eq!(replay.moderation_status, ModerationStatus::Warning);
        let warning = replay.warning.expect("replay should carry prior result");
        assert_eq!(warning.average, 4.0);
        assert_eq!(warning.judge_count, 2);
        assert_eq!(
            warning.played_at.as_deref(),
            Some("2026-01-01T20:00:00+00:00")
        );
    }
}
