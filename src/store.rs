//! Durable store abstraction.
//!
//! The core never persists anything itself; every read and write of queue
//! entries, VIP ordering, judge scores and standings tables goes through this
//! trait. `MemoryStore` is the bundled implementation used by tests and
//! single-process deployments; database-backed implementations live with the
//! hosting service.

use crate::error::{Error, Result};
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait Store: Send + Sync {
    // Queue entries
    async fn insert_entry(&self, entry: QueueEntry) -> Result<()>;
    async fn update_entry(&self, entry: QueueEntry) -> Result<()>;
    async fn entry(&self, id: &str) -> Result<Option<QueueEntry>>;
    /// All entries of a channel, ordered by creation time.
    async fn entries_for_channel(&self, channel_id: &str) -> Result<Vec<QueueEntry>>;
    /// Apply a batch of position changes. All-or-nothing: if any id is
    /// unknown, no position changes.
    async fn update_positions(
        &self,
        channel_id: &str,
        positions: &[(EntryId, Option<u32>)],
    ) -> Result<()>;

    // VIP fast-track list (FIFO)
    async fn vip_list(&self, channel_id: &str) -> Result<Vec<EntryId>>;
    async fn push_vip(&self, channel_id: &str, entry_id: &str) -> Result<()>;
    async fn remove_vip(&self, channel_id: &str, entry_id: &str) -> Result<()>;

    // Cups
    async fn insert_cup(&self, cup: Cup) -> Result<()>;
    async fn update_cup(&self, cup: Cup) -> Result<()>;
    async fn cup(&self, id: &str) -> Result<Option<Cup>>;
    async fn active_cup(&self, channel_id: &str) -> Result<Option<Cup>>;
    async fn cups_for_series(&self, series_id: &str) -> Result<Vec<Cup>>;

    // Judge scores
    /// Insert or overwrite the score keyed by (queue item, judge).
    async fn upsert_judge_score(&self, score: JudgeScore) -> Result<()>;
    async fn scores_for_entry(&self, queue_item_id: &str) -> Result<Vec<JudgeScore>>;
    async fn scores_for_cup(&self, cup_id: &str) -> Result<Vec<JudgeScore>>;

    // Standings tables, replaced wholesale on every rebuild
    async fn replace_cup_standings(&self, cup_id: &str, standings: Vec<CupStanding>)
        -> Result<()>;
    async fn cup_standings(&self, cup_id: &str) -> Result<Vec<CupStanding>>;
    async fn replace_series_standings(
        &self,
        series_id: &str,
        standings: Vec<SeriesStanding>,
    ) -> Result<()>;
    async fn series_standings(&self, series_id: &str) -> Result<Vec<SeriesStanding>>;
}

/// In-memory store backed by `RwLock`ed maps.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<EntryId, QueueEntry>>,
    vips: RwLock<HashMap<ChannelId, Vec<EntryId>>>,
    cups: RwLock<HashMap<CupId, Cup>>,
    scores: RwLock<Vec<JudgeScore>>,
    cup_standings: RwLock<HashMap<CupId, Vec<CupStanding>>>,
    series_standings: RwLock<HashMap<SeriesId, Vec<SeriesStanding>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_entry(&self, entry: QueueEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn update_entry(&self, entry: QueueEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&entry.id) {
            return Err(Error::Store(format!("unknown entry {}", entry.id)));
        }
        entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn entry(&self, id: &str) -> Result<Option<QueueEntry>> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn entries_for_channel(&self, channel_id: &str) -> Result<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.channel_id == channel_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entries)
    }

    async fn update_positions(
        &self,
        channel_id: &str,
        positions: &[(EntryId, Option<u32>)],
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        for (id, _) in positions {
            match entries.get(id) {
                Some(e) if e.channel_id == channel_id => {}
                _ => return Err(Error::Store(format!("unknown entry {} in batch", id))),
            }
        }
        for (id, position) in positions {
            if let Some(entry) = entries.get_mut(id) {
                entry.position = *position;
            }
        }
        Ok(())
    }

    async fn vip_list(&self, channel_id: &str) -> Result<Vec<EntryId>> {
        Ok(self
            .vips
            .read()
            .await
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn push_vip(&self, channel_id: &str, entry_id: &str) -> Result<()> {
        let mut vips = self.vips.write().await;
        let list = vips.entry(channel_id.to_string()).or_default();
        if !list.iter().any(|id| id == entry_id) {
            list.push(entry_id.to_string());
        }
        Ok(())
    }

    async fn remove_vip(&self, channel_id: &str, entry_id: &str) -> Result<()> {
        if let Some(list) = self.vips.write().await.get_mut(channel_id) {
            list.retain(|id| id != entry_id);
        }
        Ok(())
    }

    async fn insert_cup(&self, cup: Cup) -> Result<()> {
        self.cups.write().await.insert(cup.id.clone(), cup);
        Ok(())
    }

    async fn update_cup(&self, cup: Cup) -> Result<()> {
        let mut cups = self.cups.write().await;
        if !cups.contains_key(&cup.id) {
            return Err(Error::Store(format!("unknown cup {}", cup.id)));
        }
        cups.insert(cup.id.clone(), cup);
        Ok(())
    }

    async fn cup(&self, id: &str) -> Result<Option<Cup>> {
        Ok(self.cups.read().await.get(id).cloned())
    }

    async fn active_cup(&self, channel_id: &str) -> Result<Option<Cup>> {
        Ok(self
            .cups
            .read()
            .await
            .values()
            .find(|c| c.channel_id == channel_id && c.is_active)
            .cloned())
    }

    async fn cups_for_series(&self, series_id: &str) -> Result<Vec<Cup>> {
        let mut cups: Vec<Cup> = self
            .cups
            .read()
            .await
            .values()
            .filter(|c| c.series_id.as_deref() == Some(series_id))
            .cloned()
            .collect();
        cups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(cups)
    }

    async fn upsert_judge_score(&self, score: JudgeScore) -> Result<()> {
        let mut scores = self.scores.write().await;
        if let Some(existing) = scores
            .iter_mut()
            .find(|s| s.queue_item_id == score.queue_item_id && s.judge_id == score.judge_id)
        {
            *existing = score;
        } else {
            scores.push(score);
        }
        Ok(())
    }

    async fn scores_for_entry(&self, queue_item_id: &str) -> Result<Vec<JudgeScore>> {
        Ok(self
            .scores
            .read()
            .await
            .iter()
            .filter(|s| s.queue_item_id == queue_item_id)
            .cloned()
            .collect())
    }

    async fn scores_for_cup(&self, cup_id: &str) -> Result<Vec<JudgeScore>> {
        Ok(self
            .scores
            .read()
            .await
            .iter()
            .filter(|s| s.cup_id.as_deref() == Some(cup_id))
            .cloned()
            .collect())
    }

    async fn replace_cup_standings(
        &self,
        cup_id: &str,
        standings: Vec<CupStanding>,
    ) -> Result<()> {
        self.cup_standings
            .write()
            .await
            .insert(cup_id.to_string(), standings);
        Ok(())
    }

    async fn cup_standings(&self, cup_id: &str) -> Result<Vec<CupStanding>> {
        Ok(self
            .cup_standings
            .read()
            .await
            .get(cup_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_series_standings(
        &self,
        series_id: &str,
        standings: Vec<SeriesStanding>,
    ) -> Result<()> {
        self.series_standings
            .write()
            .await
            .insert(series_id.to_string(), standings);
        Ok(())
    }

    async fn series_standings(&self, series_id: &str) -> Result<Vec<SeriesStanding>> {
        Ok(self
            .series_standings
            .read()
            .await
            .get(series_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, channel: &str, created_at: &str) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            channel_id: channel.to_string(),
            video_id: format!("video-{}", id),
            title: "title".to_string(),
            duration_secs: 60,
            submitter_id: "sub".to_string(),
            submitter_alias: "alias".to_string(),
            status: EntryStatus::Pending,
            moderation_status: ModerationStatus::Approved,
            position: None,
            cup_id: None,
            warning: None,
            created_at: created_at.to_string(),
            played_at: None,
        }
    }

    #[tokio::test]
    async fn test_entries_sorted_by_creation() {
        let store = MemoryStore::new();
        store
            .insert_entry(entry("b", "chan", "2026-01-02T00:00:00Z"))
            .await
            .unwrap();
        store
            .insert_entry(entry("a", "chan", "2026-01-01T00:00:00Z"))
            .await
            .unwrap();

        let entries = store.entries_for_channel("chan").await.unwrap();
        assert_eq!(entries[0].id, "a");
        assert_eq!(entries[1].id, "b");
    }

    #[tokio::test]
    async fn test_update_positions_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .insert_entry(entry("a", "chan", "2026-01-01T00:00:00Z"))
            .await
            .unwrap();

        let result = store
            .update_positions(
                "chan",
                &[
                    ("a".to_string(), Some(1)),
                    ("missing".to_string(), Some(2)),
                ],
            )
            .await;
        assert!(result.is_err());

        let unchanged = store.entry("a").await.unwrap().unwrap();
        assert_eq!(unchanged.position, None);
    }

    #[tokio::test]
    async fn test_vip_list_is_fifo_and_deduplicated() {
        let store = MemoryStore::new();
        store.push_vip("chan", "a").await.unwrap();
        store.push_vip("chan", "b").await.unwrap();
        store.push_vip("chan", "a").await.unwrap();

        assert_eq!(
            store.vip_list("chan").await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );

        store.remove_vip("chan", "a").await.unwrap();
        assert_eq!(store.vip_list("chan").await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_upsert_judge_score_overwrites() {
        let store = MemoryStore::new();
        let score = JudgeScore {
            cup_id: Some("cup".to_string()),
            queue_item_id: "e1".to_string(),
            judge_id: "j1".to_string(),
            score: 3.0,
            is_locked: false,
            lock_type: None,
        };
        store.upsert_judge_score(score.clone()).await.unwrap();
        store
            .upsert_judge_score(JudgeScore {
                score: 4.5,
                is_locked: true,
                lock_type: Some(LockType::Manual),
                ..score
            })
            .await
            .unwrap();

        let scores = store.scores_for_entry("e1").await.unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].score, 4.5);
        assert!(scores[0].is_locked);

        assert_eq!(store.scores_for_cup("cup").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_standings_replacement() {
        let store = MemoryStore::new();
        let standing = CupStanding {
            cup_id: "cup".to_string(),
            submitter_id: "s1".to_string(),
            total_score: 10.0,
            average_score: 4.0,
            rank: 1,
            video_count: 3,
            judge_count: 9,
        };
        store
            .replace_cup_standings("cup", vec![standing.clone()])
            .await
            .unwrap();
        assert_eq!(store.cup_standings("cup").await.unwrap(), vec![standing]);

        store.replace_cup_standings("cup", vec![]).await.unwrap();
        assert!(store.cup_standings("cup").await.unwrap().is_empty());
    }
}
