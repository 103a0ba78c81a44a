mod guard;
mod queue;
mod standings;
mod voting;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::events::{ChannelEvent, EventSender};
use crate::judges::{ActiveJudge, JudgeDirectory};
use crate::store::Store;
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Per-channel orchestration service.
///
/// Every queue, voting and standings mutation for the channel runs under the
/// single `inner` critical section, held across store awaits, so concurrent
/// callers are serialized. Different channels never share state.
pub struct Channel {
    id: ChannelId,
    settings: Settings,
    store: Arc<dyn Store>,
    judges: Arc<dyn JudgeDirectory>,
    events: EventSender,
    inner: Mutex<ChannelInner>,
}

/// Live in-memory state guarded by the channel lock. Everything durable
/// lives behind the `Store` trait instead.
pub(crate) struct ChannelInner {
    pub(crate) queue_open: bool,
    pub(crate) session: Option<VotingSession>,
    pub(crate) archived_sessions: Vec<VotingSession>,
    pub(crate) active_judges: Vec<ActiveJudge>,
    pub(crate) aliases: HashMap<SubmitterId, String>,
    pub(crate) last_accepted: HashMap<SubmitterId, Instant>,
}

impl Channel {
    pub fn new(
        id: impl Into<ChannelId>,
        settings: Settings,
        store: Arc<dyn Store>,
        judges: Arc<dyn JudgeDirectory>,
    ) -> Self {
        let events = EventSender::new(settings.event_capacity);
        let queue_open = settings.queue_open;
        Self {
            id: id.into(),
            settings,
            store,
            judges,
            events,
            inner: Mutex::new(ChannelInner {
                queue_open,
                session: None,
                archived_sessions: Vec::new(),
                active_judges: Vec::new(),
                aliases: HashMap::new(),
                last_accepted: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to this channel's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: ChannelEvent) {
        self.events.publish(event);
    }

    // ========== Judges ==========

    /// Register a judge session. The opaque token is resolved through the
    /// directory; reconnecting with the same identity replaces the old seat.
    pub async fn judge_connected(&self, token: &str) -> Result<ActiveJudge> {
        let judge = self.judges.resolve(token).await?;
        let mut inner = self.inner.lock().await;
        inner.active_judges.retain(|j| j.judge_id != judge.judge_id);
        inner.active_judges.push(judge.clone());
        tracing::info!(channel = %self.id, judge = %judge.judge_id, "judge connected");
        Ok(judge)
    }

    pub async fn judge_disconnected(&self, judge_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.active_judges.retain(|j| j.judge_id != judge_id);
    }

    // ========== Queue toggle ==========

    pub async fn set_queue_open(&self, open: bool) {
        let mut inner = self.inner.lock().await;
        inner.queue_open = open;
        tracing::info!(channel = %self.id, open, "queue toggled");
    }

    pub async fn is_queue_open(&self) -> bool {
        self.inner.lock().await.queue_open
    }

    // ========== Cups ==========

    /// Open a new cup, deactivating any currently active one. Entries
    /// admitted from now on are tagged with the new cup.
    pub async fn open_cup(&self, name: &str, series_id: Option<&str>) -> Result<Cup> {
        let _guard = self.inner.lock().await;
        if let Some(mut prior) = self.store.active_cup(&self.id).await? {
            prior.is_active = false;
            self.store.update_cup(prior).await?;
        }
        let cup = Cup {
            id: ulid::Ulid::new().to_string(),
            channel_id: self.id.clone(),
            series_id: series_id.map(|s| s.to_string()),
            name: name.to_string(),
            is_active: true,
        };
        self.store.insert_cup(cup.clone()).await?;
        tracing::info!(channel = %self.id, cup = %cup.id, "cup opened");
        Ok(cup)
    }

    /// Deactivate the active cup. Returns it, or `None` when no cup was open.
    pub async fn close_cup(&self) -> Result<Option<Cup>> {
        let _guard = self.inner.lock().await;
        match self.store.active_cup(&self.id).await? {
            Some(mut cup) => {
                cup.is_active = false;
                self.store.update_cup(cup.clone()).await?;
                Ok(Some(cup))
            }
            None => Ok(None),
        }
    }

    // ========== Shared helpers ==========

    /// Fetch an entry and verify it belongs to this channel. A wrong-channel
    /// id is a caller bug and is fatal to the operation.
    pub(crate) async fn load_entry(&self, entry_id: &str) -> Result<QueueEntry> {
        let entry = self
            .store
            .entry(entry_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("unknown entry {}", entry_id)))?;
        if entry.channel_id != self.id {
            return Err(Error::NotFound(format!(
                "entry {} does not belong to channel {}",
                entry_id, self.id
            )));
        }
        Ok(entry)
    }

    pub(crate) fn now(&self) -> String {
        chrono::Utc::now().to_rfc3339()
    }

    /// Best finalized prior result for a video, from durable judge-score
    /// history. `before` bounds the search to entries created earlier, so a
    /// resubmission never compares against itself.
    pub(crate) async fn prior_result_for_video(
        &self,
        video_id: &str,
        before: Option<&str>,
    ) -> Result<Option<PriorResult>> {
        let entries = self.store.entries_for_channel(&self.id).await?;
        let mut best: Option<PriorResult> = None;
        for entry in entries {
            if entry.video_id != video_id || entry.status != EntryStatus::Played {
                continue;
            }
            if let Some(cutoff) = before {
                if entry.created_at.as_str() >= cutoff {
                    continue;
                }
            }
            let scores: Vec<f64> = self
                .store
                .scores_for_entry(&entry.id)
                .await?
                .iter()
                .filter(|s| s.is_locked)
                .map(|s| s.score)
                .collect();
            if scores.is_empty() {
                continue;
            }
            let average = scores.iter().sum::<f64>() / scores.len() as f64;
            let beats_best = best.as_ref().map(|b| average >= b.average).unwrap_or(true);
            if beats_best {
                best = Some(PriorResult {
                    average,
                    judge_count: scores.len() as u32,
                    played_at: entry.played_at.clone(),
                });
            }
        }
        Ok(best)
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) async fn lock_inner(&self) -> tokio::sync::MutexGuard<'_, ChannelInner> {
        self.inner.lock().await
    }
}

/// Hands out one `Channel` per channel id; channels are created lazily and
/// run fully independently.
pub struct ChannelRegistry {
    settings: Settings,
    store: Arc<dyn Store>,
    judges: Arc<dyn JudgeDirectory>,
    channels: RwLock<HashMap<ChannelId, Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new(settings: Settings, store: Arc<dyn Store>, judges: Arc<dyn JudgeDirectory>) -> Self {
        Self {
            settings,
            store,
            judges,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the channel service for `id`.
    pub async fn channel(&self, id: &str) -> Arc<Channel> {
        if let Some(channel) = self.channels.read().await.get(id) {
            return channel.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(Channel::new(
                    id,
                    self.settings.clone(),
                    self.store.clone(),
                    self.judges.clone(),
                ))
            })
            .clone()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::judges::StaticJudgeDirectory;
    use crate::store::MemoryStore;

    /// Channel with an in-memory store, three resolvable judges and no
    /// submission cooldown, which most tests want.
    pub(crate) fn test_channel() -> Arc<Channel> {
        test_channel_with(Settings {
            submission_cooldown: std::time::Duration::ZERO,
            ..Settings::default()
        })
    }

    pub(crate) fn test_channel_with(settings: Settings) -> Arc<Channel> {
        let store = Arc::new(MemoryStore::new());
        let judges = Arc::new(
            StaticJudgeDirectory::new()
                .with_judge("tok-ava", "judge-ava", "Ava")
                .with_judge("tok-ben", "judge-ben", "Ben")
                .with_judge("tok-cleo", "judge-cleo", "Cleo"),
        );
        Arc::new(Channel::new("test-channel", settings, store, judges))
    }

    pub(crate) fn submission(video_id: &str) -> NewSubmission {
        NewSubmission {
            video_id: video_id.to_string(),
            title: format!("video {}", video_id),
            duration_secs: 90,
        }
    }
}
