//! Cup and series standings.
//!
//! Both tables are derived views over durable judge-score history and are
//! recomputed from scratch on every finalize, which makes the rebuild
//! idempotent and safe to run next to live queue activity.

use super::Channel;
use crate::error::{Error, Result};
use crate::events::ChannelEvent;
use crate::types::*;
use std::collections::HashMap;

/// Fallback mean when a cup has no scored history yet.
pub(crate) const GLOBAL_BASELINE: f64 = 3.4;

/// A submitter is ranked on their best K entry averages.
const BEST_OF: usize = 5;

/// Points for cup ranks 1-8; everyone else gets the participation point.
const SERIES_POINTS: [u32; 8] = [15, 12, 10, 8, 6, 5, 4, 2];
const PARTICIPATION_POINTS: u32 = 1;

struct EntryResult {
    submitter_id: SubmitterId,
    average: f64,
    judges: u32,
}

impl Channel {
    /// Retire a SCORED entry from the live queue and fold its judge scores
    /// into the cup (and, transitively, series) standings.
    pub async fn finalize_score(&self, queue_item_id: &str) -> Result<QueueEntry> {
        let mut inner = self.lock_inner().await;
        let inner = &mut *inner;

        let entry = self.load_entry(queue_item_id).await?;
        if entry.status != EntryStatus::Scored {
            return Err(Error::Conflict(format!(
                "entry {} has not finished scoring",
                queue_item_id
            )));
        }

        let finalized = self
            .promote_locked(inner, queue_item_id, EntryStatus::Played, None)
            .await?;

        if let Some(cup_id) = finalized.cup_id.clone() {
            let standings = self.rebuild_cup_standings_inner(&cup_id).await?;
            self.publish(ChannelEvent::CupStandingsUpdated {
                cup_id: cup_id.clone(),
                standings,
            });
            if let Some(series_id) = self
                .store()
                .cup(&cup_id)
                .await?
                .and_then(|cup| cup.series_id)
            {
                let standings = self.rebuild_series_standings_inner(&series_id).await?;
                self.publish(ChannelEvent::SeriesStandingsUpdated {
                    series_id,
                    standings,
                });
            }
        }
        Ok(finalized)
    }

    /// Recompute a cup's standings table on demand.
    pub async fn rebuild_cup_standings(&self, cup_id: &str) -> Result<Vec<CupStanding>> {
        let _guard = self.lock_inner().await;
        let standings = self.rebuild_cup_standings_inner(cup_id).await?;
        self.publish(ChannelEvent::CupStandingsUpdated {
            cup_id: cup_id.to_string(),
            standings: standings.clone(),
        });
        Ok(standings)
    }

    /// Recompute a series' standings table on demand.
    pub async fn rebuild_series_standings(&self, series_id: &str) -> Result<Vec<SeriesStanding>> {
        let _guard = self.lock_inner().await;
        let standings = self.rebuild_series_standings_inner(series_id).await?;
        self.publish(ChannelEvent::SeriesStandingsUpdated {
            series_id: series_id.to_string(),
            standings: standings.clone(),
        });
        Ok(standings)
    }

    pub async fn cup_standings(&self, cup_id: &str) -> Result<Vec<CupStanding>> {
        self.store().cup_standings(cup_id).await
    }

    pub async fn series_standings(&self, series_id: &str) -> Result<Vec<SeriesStanding>> {
        self.store().series_standings(series_id).await
    }

    // ========== Internals (channel lock held) ==========

    async fn rebuild_cup_standings_inner(&self, cup_id: &str) -> Result<Vec<CupStanding>> {
        let cup = self
            .store()
            .cup(cup_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("unknown cup {}", cup_id)))?;
        if cup.channel_id != self.id() {
            return Err(Error::NotFound(format!(
                "cup {} does not belong to channel {}",
                cup_id,
                self.id()
            )));
        }

        // Chronological finalized entries of the cup
        let entries: Vec<QueueEntry> = self
            .store()
            .entries_for_channel(self.id())
            .await?
            .into_iter()
            .filter(|e| {
                e.cup_id.as_deref() == Some(cup_id)
                    && matches!(e.status, EntryStatus::Scored | EntryStatus::Played)
            })
            .collect();

        let mut by_entry: HashMap<String, Vec<f64>> = HashMap::new();
        for score in self.store().scores_for_cup(cup_id).await? {
            if score.is_locked {
                by_entry
                    .entry(score.queue_item_id.clone())
                    .or_default()
                    .push(score.score);
            }
        }

        let mut results: Vec<EntryResult> = Vec::new();
        for entry in &entries {
            let Some(scores) = by_entry.get(&entry.id) else {
                continue;
            };
            let raw = scores.iter().sum::<f64>() / scores.len() as f64;
            // Resubmission farming guard: a rerun only counts when it beats
            // the video's best earlier finalized average
            let prior = self
                .prior_result_for_video(&entry.video_id, Some(&entry.created_at))
                .await?;
            let average = match prior {
                Some(p) if raw <= p.average => 0.0,
                _ => raw,
            };
            results.push(EntryResult {
                submitter_id: entry.submitter_id.clone(),
                average,
                judges: scores.len() as u32,
            });
        }

        let baseline = if results.is_empty() {
            GLOBAL_BASELINE
        } else {
            results.iter().map(|r| r.average).sum::<f64>() / results.len() as f64
        };

        // Group per submitter, keeping chronological first-appearance order
        // as the final tie-breaker
        let mut order: Vec<SubmitterId> = Vec::new();
        let mut grouped: HashMap<SubmitterId, Vec<&EntryResult>> = HashMap::new();
        for result in &results {
            if !grouped.contains_key(&result.submitter_id) {
                order.push(result.submitter_id.clone());
            }
            grouped
                .entry(result.submitter_id.clone())
                .or_default()
                .push(result);
        }

        let mut standings: Vec<CupStanding> = Vec::new();
        for submitter_id in order {
            let results = &grouped[&submitter_id];
            let mut averages: Vec<f64> = results.iter().map(|r| r.average).collect();
            averages.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

            let missing = BEST_OF.saturating_sub(averages.len());
            let padded_sum: f64 =
                averages.iter().take(BEST_OF).sum::<f64>() + baseline * missing as f64;

            standings.push(CupStanding {
                cup_id: cup_id.to_string(),
                submitter_id,
                total_score: averages.iter().sum(),
                average_score: padded_sum / BEST_OF as f64,
                rank: 0,
                video_count: averages.len() as u32,
                judge_count: results.iter().map(|r| r.judges).sum(),
            });
        }

        standings.sort_by(|a, b| {
            b.average_score
                .partial_cmp(&a.average_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.video_count.cmp(&a.video_count))
                .then_with(|| b.judge_count.cmp(&a.judge_count))
        });
        for (i, standing) in standings.iter_mut().enumerate() {
            standing.rank = i as u32 + 1;
        }

        self.store()
            .replace_cup_standings(cup_id, standings.clone())
            .await?;
        tracing::info!(channel = %self.id(), cup = %cup_id, rows = standings.len(), "cup standings rebuilt");
        Ok(standings)
    }

    async fn rebuild_series_standings_inner(
        &self,
        series_id: &str,
    ) -> Result<Vec<SeriesStanding>> {
        let cups = self.store().cups_for_series(series_id).await?;
        let tables = futures::future::try_join_all(
            cups.iter().map(|cup| self.store().cup_standings(&cup.id)),
        )
        .await?;

        let mut order: Vec<SubmitterId> = Vec::new();
        let mut aggregated: HashMap<SubmitterId, SeriesStanding> = HashMap::new();
        for (cup, table) in cups.iter().zip(tables) {
            for standing in table {
                let rank = standing.rank as usize;
                let points = if (1..=SERIES_POINTS.len()).contains(&rank) {
                    SERIES_POINTS[rank - 1]
                } else {
                    PARTICIPATION_POINTS
                };
                let slot = aggregated
                    .entry(standing.submitter_id.clone())
                    .or_insert_with(|| {
                        order.push(standing.submitter_id.clone());
                        SeriesStanding {
                            series_id: series_id.to_string(),
                            submitter_id: standing.submitter_id.clone(),
                            total_points: 0,
                            cups_played: 0,
                            best_finish: u32::MAX,
                            placements: Vec::new(),
                        }
                    });
                slot.total_points += points;
                slot.cups_played += 1;
                slot.best_finish = slot.best_finish.min(standing.rank);
                slot.placements.push(CupPlacement {
                    cup_id: cup.id.clone(),
                    rank: standing.rank,
                    points,
                });
            }
        }

        let mut standings: Vec<SeriesStanding> = order
            .into_iter()
            .filter_map(|submitter_id| aggregated.remove(&submitter_id))
            .collect();
        standings.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| b.cups_played.cmp(&a.cups_played))
                .then_with(|| a.best_finish.cmp(&b.best_finish))
                .then_with(|| a.submitter_id.cmp(&b.submitter_id))
        });

        self.store()
            .replace_series_standings(series_id, standings.clone())
            .await?;
        tracing::info!(series = %series_id, rows = standings.len(), "series standings rebuilt");
        Ok(standings)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Channel;
    use crate::error::Error;
    use crate::types::*;
    use std::sync::Arc;

    /// Insert a finalized entry with one locked score per value in `scores`.
    async fn played_entry(
        channel: &Arc<Channel>,
        cup_id: &str,
        submitter: &str,
        video: &str,
        scores: &[f64],
        created_at: &str,
    ) -> QueueEntry {
        let entry = QueueEntry {
            id: ulid::Ulid::new().to_string(),
            channel_id: channel.id().to_string(),
            video_id: video.to_string(),
            title: format!("video {}", video),
            duration_secs: 90,
            submitter_id: submitter.to_string(),
            submitter_alias: submitter.to_string(),
            status: EntryStatus::Played,
            moderation_status: ModerationStatus::Approved,
            position: None,
            cup_id: Some(cup_id.to_string()),
            warning: None,
            created_at: created_at.to_string(),
            played_at: Some(created_at.to_string()),
        };
        channel.store().insert_entry(entry.clone()).await.unwrap();
        for (i, score) in scores.iter().enumerate() {
            channel
                .store()
                .upsert_judge_score(JudgeScore {
                    cup_id: Some(cup_id.to_string()),
                    queue_item_id: entry.id.clone(),
                    judge_id: format!("judge-{}", i + 1),
                    score: *score,
                    is_locked: true,
                    lock_type: Some(LockType::Manual),
                })
                .await
                .unwrap();
        }
        entry
    }

    fn at(second: u32) -> String {
        format!("2026-08-01T20:00:{:02}+00:00", second)
    }

    #[tokio::test]
    async fn test_cup_standing_uses_best_five_and_unpadded_total() {
        let channel = test_channel();
        let cup = channel.open_cup("Cup", None).await.unwrap();

        for (i, avg) in [5.0, 4.0, 3.0, 2.0, 1.0, 0.0].iter().enumerate() {
            played_entry(
                &channel,
                &cup.id,
                "alice",
                &format!("v{}", i),
                &[*avg],
                &at(i as u32),
            )
            .await;
        }

        let standings = channel.rebuild_cup_standings(&cup.id).await.unwrap();
        assert_eq!(standings.len(), 1);
        let alice = &standings[0];
        assert_eq!(alice.rank, 1);
        assert!((alice.average_score - 3.0).abs() < 1e-9);
        assert!((alice.total_score - 15.0).abs() < 1e-9);
        assert_eq!(alice.video_count, 6);
        assert_eq!(alice.judge_count, 6);
    }

    #[tokio::test]
    async fn test_cup_standing_pads_missing_slots_with_baseline() {
        let channel = test_channel();
        let cup = channel.open_cup("Cup", None).await.unwrap();

        played_entry(&channel, &cup.id, "alice", "v1", &[5.0], &at(0)).await;
        played_entry(&channel, &cup.id, "bob", "v2", &[1.0], &at(1)).await;

        // Baseline = (5 + 1) / 2 = 3.0; four padded slots each
        let standings = channel.rebuild_cup_standings(&cup.id).await.unwrap();
        let alice = standings.iter().find(|s| s.submitter_id == "alice").unwrap();
        let bob = standings.iter().find(|s| s.submitter_id == "bob").unwrap();
        assert!((alice.average_score - 3.4).abs() < 1e-9);
        assert!((bob.average_score - 2.6).abs() < 1e-9);
        assert_eq!(alice.rank, 1);
        assert_eq!(bob.rank, 2);
    }

    #[tokio::test]
    async fn test_cup_rebuild_zeroes_non_improving_resubmission() {
        let channel = test_channel();
        let cup = channel.open_cup("Cup", None).await.unwrap();

        played_entry(&channel, &cup.id, "alice", "v1", &[4.0], &at(0)).await;
        // Same video later, same average: zeroed
        played_entry(&channel, &cup.id, "bob", "v1", &[4.0, 4.0], &at(1)).await;

        let standings = channel.rebuild_cup_standings(&cup.id).await.unwrap();
        let alice = standings.iter().find(|s| s.submitter_id == "alice").unwrap();
        let bob = standings.iter().find(|s| s.submitter_id == "bob").unwrap();
        assert!((alice.total_score - 4.0).abs() < 1e-9);
        assert_eq!(bob.total_score, 0.0);
        assert_eq!(alice.rank, 1);
    }

    #[tokio::test]
    async fn test_cup_rank_ties_break_on_video_count() {
        let channel = test_channel();
        let cup = channel.open_cup("Cup", None).await.unwrap();

        // Everyone averages 4.0, so the standing averages tie at 4.0
        for i in 0..5 {
            played_entry(&channel, &cup.id, "bob", &format!("b{}", i), &[4.0], &at(i)).await;
        }
        for i in 0..6 {
            played_entry(
                &channel,
                &cup.id,
                "alice",
                &format!("a{}", i),
                &[4.0],
                &at(10 + i),
            )
            .await;
        }

        let standings = channel.rebuild_cup_standings(&cup.id).await.unwrap();
        assert_eq!(standings[0].submitter_id, "alice");
        assert_eq!(standings[0].video_count, 6);
        assert_eq!(standings[1].submitter_id, "bob");
    }

    #[tokio::test]
    async fn test_cup_rebuild_is_idempotent() {
        let channel = test_channel();
        let cup = channel.open_cup("Cup", None).await.unwrap();
        played_entry(&channel, &cup.id, "alice", "v1", &[3.0, 5.0], &at(0)).await;

        let first = channel.rebuild_cup_standings(&cup.id).await.unwrap();
        let second = channel.rebuild_cup_standings(&cup.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_series_points_cups_played_and_best_finish() {
        let channel = test_channel();
        for (cup_id, rank) in [("cup-a", 1u32), ("cup-b", 9u32)] {
            channel
                .store()
                .insert_cup(Cup {
                    id: cup_id.to_string(),
                    channel_id: channel.id().to_string(),
                    series_id: Some("series-1".to_string()),
                    name: cup_id.to_string(),
                    is_active: false,
                })
                .await
                .unwrap();
            channel
                .store()
                .replace_cup_standings(
                    cup_id,
                    vec![CupStanding {
                        cup_id: cup_id.to_string(),
                        submitter_id: "alice".to_string(),
                        total_score: 10.0,
                        average_score: 4.0,
                        rank,
                        video_count: 2,
                        judge_count: 6,
                    }],
                )
                .await
                .unwrap();
        }

        let standings = channel.rebuild_series_standings("series-1").await.unwrap();
        assert_eq!(standings.len(), 1);
        let alice = &standings[0];
        // Rank 1 pays 15, rank 9 pays the participation point
        assert_eq!(alice.total_points, 16);
        assert_eq!(alice.cups_played, 2);
        assert_eq!(alice.best_finish, 1);
        assert_eq!(alice.placements.len(), 2);
    }

    #[tokio::test]
    async fn test_series_ties_break_on_cups_then_finish_then_id() {
        let channel = test_channel();
        for (cup_id, submitter) in [("cup-a", "bob"), ("cup-b", "alice")] {
            channel
                .store()
                .insert_cup(Cup {
                    id: cup_id.to_string(),
                    channel_id: channel.id().to_string(),
                    series_id: Some("series-1".to_string()),
                    name: cup_id.to_string(),
                    is_active: false,
                })
                .await
                .unwrap();
            channel
                .store()
                .replace_cup_standings(
                    cup_id,
                    vec![CupStanding {
                        cup_id: cup_id.to_string(),
                        submitter_id: submitter.to_string(),
                        total_score: 10.0,
                        average_score: 4.0,
                        rank: 1,
                        video_count: 2,
                        judge_count: 6,
                    }],
                )
                .await
                .unwrap();
        }

        // 15 points each, one cup each, best finish 1 each: id decides
        let standings = channel.rebuild_series_standings("series-1").await.unwrap();
        assert_eq!(standings[0].submitter_id, "alice");
        assert_eq!(standings[1].submitter_id, "bob");
    }

    #[tokio::test]
    async fn test_finalize_requires_scored_entry() {
        let channel = test_channel();
        let entry = channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();

        assert!(matches!(
            channel.finalize_score(&entry.id).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_finalize_retires_entry_and_rebuilds_cup() {
        let channel = test_channel();
        let cup = channel.open_cup("Cup", None).await.unwrap();
        channel.judge_connected("tok-ava").await.unwrap();

        channel
            .admit_submission("alice", submission("clip-1"))
            .await
            .unwrap();
        let entry = channel.dispatch_next().await.unwrap();
        channel.start_voting(&entry.id).await.unwrap();
        channel.submit_judge_score("judge-ava", 4.5).await.unwrap();
        channel
            .lock_score("judge-ava", LockType::Manual)
            .await
            .unwrap();
        channel.complete_voting("ceremony finished").await.unwrap();

        let finalized = channel.finalize_score(&entry.id).await.unwrap();
        assert_eq!(finalized.status, EntryStatus::Played);
        assert!(finalized.played_at.is_some());

        let standings = channel.cup_standings(&cup.id).await.unwrap();
        assert_eq!(standings.len(), 1);
        assert_eq!(standings[0].submitter_id, "alice");
        assert!((standings[0].total_score - 4.5).abs() < 1e-9);

        // Already finalized: a second call has nothing to retire
        assert!(matches!(
            channel.finalize_score(&entry.id).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_rebuild_unknown_cup_is_not_found() {
        let channel = test_channel();
        assert!(matches!(
            channel.rebuild_cup_standings("missing").await,
            Err(Error::NotFound(_))
        ));
    }
}
