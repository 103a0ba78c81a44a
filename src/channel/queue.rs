//! Canonical queue ordering: dense positions, VIP fast-track, seeded Top 8
//! reshuffle, dispatch.

use super::{Channel, ChannelInner};
use crate::error::{Error, Result};
use crate::events::ChannelEvent;
use crate::shuffle::seeded_shuffle;
use crate::types::*;

/// How many entries the on-air playoff bracket holds.
const TOP_EIGHT_SIZE: usize = 8;

impl Channel {
    /// Transition an entry's status, optionally inserting it at an explicit
    /// position. Moves into or out of the orderable set trigger a full dense
    /// reindex.
    pub async fn promote(
        &self,
        entry_id: &str,
        to: EntryStatus,
        position: Option<u32>,
    ) -> Result<QueueEntry> {
        let mut inner = self.lock_inner().await;
        self.promote_locked(&mut inner, entry_id, to, position).await
    }

    /// Moderation verdict on a queued entry.
    pub async fn review_submission(
        &self,
        entry_id: &str,
        action: ReviewAction,
    ) -> Result<QueueEntry> {
        let mut inner = self.lock_inner().await;
        let inner = &mut *inner;
        match action {
            ReviewAction::Approve => {
                self.promote_locked(inner, entry_id, EntryStatus::Approved, None)
                    .await
            }
            ReviewAction::Reject => {
                self.promote_locked(inner, entry_id, EntryStatus::Rejected, None)
                    .await
            }
            ReviewAction::TopEight => {
                self.promote_locked(inner, entry_id, EntryStatus::TopEight, None)
                    .await
            }
            ReviewAction::Remove => {
                self.cancel_entry_session(inner, entry_id, "entry removed");
                self.promote_locked(inner, entry_id, EntryStatus::Removed, None)
                    .await
            }
            ReviewAction::Warn => {
                let mut entry = self.load_entry(entry_id).await?;
                entry.moderation_status = ModerationStatus::Warning;
                self.store().update_entry(entry.clone()).await?;
                self.publish(ChannelEvent::ItemStatus {
                    entry_id: entry.id.clone(),
                    status: entry.status,
                    moderation_status: entry.moderation_status,
                    position: entry.position,
                });
                Ok(entry)
            }
            ReviewAction::Vip => self.vip_locked(entry_id).await,
            ReviewAction::Unvip => self.unvip_locked(entry_id).await,
        }
    }

    /// Deterministic Top 8 selection. Explicit candidates come first,
    /// backfilled from the current order; the seeded permutation plus both
    /// orderings are broadcast so the pick can be replayed and audited.
    ///
    /// Returns (pre-shuffle ids, post-shuffle ids, seed).
    pub async fn trigger_shuffle(
        &self,
        candidate_ids: Option<&[EntryId]>,
        seed: Option<u64>,
    ) -> Result<(Vec<EntryId>, Vec<EntryId>, u64)> {
        let _guard = self.lock_inner().await;

        let entries = self.store().entries_for_channel(self.id()).await?;
        let vips = self.store().vip_list(self.id()).await?;
        let mut pool: Vec<&QueueEntry> = entries
            .iter()
            .filter(|e| e.status.is_orderable() && !vips.iter().any(|v| v == &e.id))
            .collect();
        pool.sort_by_key(|e| e.position.unwrap_or(u32::MAX));

        let mut candidates: Vec<EntryId> = Vec::new();
        if let Some(ids) = candidate_ids {
            for id in ids {
                if !pool.iter().any(|e| &e.id == id) {
                    return Err(Error::Validation(format!(
                        "entry {} is not eligible for the top eight",
                        id
                    )));
                }
                if !candidates.contains(id) {
                    candidates.push(id.clone());
                }
            }
            candidates.truncate(TOP_EIGHT_SIZE);
        }
        for entry in &pool {
            if candidates.len() >= TOP_EIGHT_SIZE {
                break;
            }
            if !candidates.contains(&entry.id) {
                candidates.push(entry.id.clone());
            }
        }
        if candidates.is_empty() {
            return Err(Error::Validation(
                "no eligible entries to shuffle".to_string(),
            ));
        }

        let before = candidates.clone();
        let seed = seed.unwrap_or_else(rand::random);
        let mut after = candidates;
        seeded_shuffle(&mut after, seed);

        // Statuses first: selection becomes TOP_EIGHT, the old bracket drops
        // back to APPROVED. Both stay inside the orderable set.
        for entry in &pool {
            let selected = after.iter().any(|id| id == &entry.id);
            let new_status = match (selected, entry.status) {
                (true, status) if status != EntryStatus::TopEight => Some(EntryStatus::TopEight),
                (false, EntryStatus::TopEight) => Some(EntryStatus::Approved),
                _ => None,
            };
            if let Some(status) = new_status {
                let mut updated = (*entry).clone();
                updated.status = status;
                self.store().update_entry(updated.clone()).await?;
                self.publish(ChannelEvent::ItemStatus {
                    entry_id: updated.id.clone(),
                    status: updated.status,
                    moderation_status: updated.moderation_status,
                    position: updated.position,
                });
            }
        }

        // New order: the shuffled bracket up front, everyone else behind it
        // in their previous relative order. One atomic batch.
        let mut updates: Vec<(EntryId, Option<u32>)> = Vec::new();
        for (i, id) in after.iter().enumerate() {
            updates.push((id.clone(), Some(i as u32 + 1)));
        }
        let mut next = after.len() as u32 + 1;
        for entry in &pool {
            if !after.iter().any(|id| id == &entry.id) {
                updates.push((entry.id.clone(), Some(next)));
                next += 1;
            }
        }
        self.store().update_positions(self.id(), &updates).await?;

        tracing::info!(
            channel = %self.id(),
            seed,
            picked = after.len(),
            "top eight shuffled"
        );
        self.publish(ChannelEvent::TopEightShuffled {
            before: before.clone(),
            after: after.clone(),
            seed,
        });

        Ok((before, after, seed))
    }

    /// Put the next entry on stage: the VIP FIFO head when one is waiting,
    /// otherwise the lowest-position orderable entry. Whatever was playing is
    /// marked PLAYED and its ceremony, if still open, is cancelled.
    pub async fn dispatch_next(&self) -> Result<QueueEntry> {
        let mut inner = self.lock_inner().await;
        let inner = &mut *inner;

        let entries = self.store().entries_for_channel(self.id()).await?;
        for prior in entries.iter().filter(|e| e.status == EntryStatus::Playing) {
            self.cancel_entry_session(inner, &prior.id, "queue advanced past entry");
            self.promote_locked(inner, &prior.id, EntryStatus::Played, None)
                .await?;
        }

        let vips = self.store().vip_list(self.id()).await?;
        let vip_head = vips
            .iter()
            .filter_map(|id| entries.iter().find(|e| &e.id == id))
            .find(|e| e.status.is_orderable());
        let chosen = match vip_head {
            Some(entry) => entry.clone(),
            None => entries
                .iter()
                .filter(|e| e.status.is_orderable() && !vips.iter().any(|v| v == &e.id))
                .min_by_key(|e| e.position.unwrap_or(u32::MAX))
                .cloned()
                .ok_or_else(|| Error::NotFound("queue is empty".to_string()))?,
        };

        // VIPs leave the list the instant they are dispatched; the promote
        // handles that along with the reindex
        self.promote_locked(inner, &chosen.id, EntryStatus::Playing, None)
            .await
    }

    /// Skip whatever is on stage, cancelling its ceremony.
    pub async fn skip_current(&self) -> Result<QueueEntry> {
        let mut inner = self.lock_inner().await;
        let inner = &mut *inner;

        let entries = self.store().entries_for_channel(self.id()).await?;
        let playing = entries
            .iter()
            .find(|e| e.status == EntryStatus::Playing)
            .ok_or_else(|| Error::NotFound("nothing is playing".to_string()))?;

        self.cancel_entry_session(inner, &playing.id, "entry skipped");
        self.promote_locked(inner, &playing.id, EntryStatus::Skipped, None)
            .await
    }

    /// Drop every active entry and cancel the running ceremony. Terminal
    /// entries keep their history.
    pub async fn clear_queue(&self) -> Result<Vec<EntryId>> {
        let mut inner = self.lock_inner().await;
        let inner = &mut *inner;

        self.cancel_session_locked(inner, "queue cleared");

        let entries = self.store().entries_for_channel(self.id()).await?;
        let mut removed = Vec::new();
        for entry in entries {
            if !entry.status.is_active() {
                continue;
            }
            let mut entry = entry;
            entry.status = EntryStatus::Removed;
            entry.position = None;
            self.store().update_entry(entry.clone()).await?;
            self.store().remove_vip(self.id(), &entry.id).await?;
            removed.push(entry.id);
        }

        tracing::info!(channel = %self.id(), count = removed.len(), "queue cleared");
        self.publish(ChannelEvent::QueueCleared {
            removed: removed.clone(),
        });
        Ok(removed)
    }

    /// Dispatch-ordered view of the live queue: VIP FIFO first, then by
    /// position.
    pub async fn queue(&self) -> Result<Vec<QueueEntry>> {
        let _guard = self.lock_inner().await;

        let entries = self.store().entries_for_channel(self.id()).await?;
        let vips = self.store().vip_list(self.id()).await?;

        let mut out: Vec<QueueEntry> = Vec::new();
        for id in &vips {
            if let Some(entry) = entries.iter().find(|e| &e.id == id) {
                if entry.status.is_orderable() {
                    out.push(entry.clone());
                }
            }
        }
        let mut rest: Vec<QueueEntry> = entries
            .iter()
            .filter(|e| e.status.is_orderable() && !vips.iter().any(|v| v == &e.id))
            .cloned()
            .collect();
        rest.sort_by_key(|e| e.position.unwrap_or(u32::MAX));
        out.extend(rest);
        Ok(out)
    }

    // ========== Internals (channel lock held) ==========

    pub(crate) async fn promote_locked(
        &self,
        inner: &mut ChannelInner,
        entry_id: &str,
        to: EntryStatus,
        position: Option<u32>,
    ) -> Result<QueueEntry> {
        if position == Some(0) {
            return Err(Error::Validation("positions are 1-based".to_string()));
        }

        let mut entry = self.load_entry(entry_id).await?;
        let vips = self.store().vip_list(self.id()).await?;
        let is_vip = vips.iter().any(|v| v == &entry.id);
        let was_member = entry.status.is_orderable() && !is_vip;

        if to.is_terminal() {
            self.cancel_entry_session(inner, entry_id, "entry left the queue");
        }

        entry.status = to;
        if !to.is_orderable() {
            entry.position = None;
        }
        if to == EntryStatus::Played && entry.played_at.is_none() {
            entry.played_at = Some(self.now());
        }
        self.store().update_entry(entry.clone()).await?;

        // Leaving the orderable set (dispatched, scored or terminal) also
        // drops the entry from the VIP fast-track
        if !to.is_orderable() {
            self.store().remove_vip(self.id(), &entry.id).await?;
        }

        let is_member = to.is_orderable() && !is_vip;
        if was_member != is_member || (is_member && position.is_some()) {
            self.reindex_locked(position.map(|p| (entry_id, p))).await?;
        }

        let refreshed = self.load_entry(entry_id).await?;
        self.publish(ChannelEvent::ItemStatus {
            entry_id: refreshed.id.clone(),
            status: refreshed.status,
            moderation_status: refreshed.moderation_status,
            position: refreshed.position,
        });
        Ok(refreshed)
    }

    /// Rebuild dense 1-based positions over the orderable non-VIP entries.
    /// `moved` pins one entry in front of the current occupant of a target
    /// position. All-or-nothing against the store.
    pub(crate) async fn reindex_locked(&self, moved: Option<(&str, u32)>) -> Result<()> {
        let entries = self.store().entries_for_channel(self.id()).await?;
        let vips = self.store().vip_list(self.id()).await?;
        let is_member =
            |e: &QueueEntry| e.status.is_orderable() && !vips.iter().any(|v| v == &e.id);

        let mut members: Vec<&QueueEntry> = entries.iter().filter(|e| is_member(e)).collect();
        members.sort_by_key(|e| match moved {
            Some((id, p)) if e.id == id => (p as u64) * 2 - 1,
            _ => e.position.map(|p| p as u64 * 2).unwrap_or(u64::MAX),
        });

        let mut updates: Vec<(EntryId, Option<u32>)> = Vec::new();
        for (i, entry) in members.iter().enumerate() {
            let want = Some(i as u32 + 1);
            if entry.position != want {
                updates.push((entry.id.clone(), want));
            }
        }
        for entry in entries.iter().filter(|e| !is_member(e)) {
            if entry.position.is_some() {
                updates.push((entry.id.clone(), None));
            }
        }
        if !updates.is_empty() {
            self.store().update_positions(self.id(), &updates).await?;
        }
        Ok(())
    }

    async fn vip_locked(&self, entry_id: &str) -> Result<QueueEntry> {
        let entry = self.load_entry(entry_id).await?;
        if !entry.status.is_orderable() {
            return Err(Error::Conflict(
                "only queued entries can be fast-tracked".to_string(),
            ));
        }
        self.store().push_vip(self.id(), &entry.id).await?;
        self.reindex_locked(None).await?;

        let vips = self.store().vip_list(self.id()).await?;
        self.publish(ChannelEvent::VipUpdated { vips });
        self.load_entry(entry_id).await
    }

    async fn unvip_locked(&self, entry_id: &str) -> Result<QueueEntry> {
        let entry = self.load_entry(entry_id).await?;
        self.store().remove_vip(self.id(), &entry.id).await?;
        // Back into position-based ordering, at the tail
        self.reindex_locked(None).await?;

        let vips = self.store().vip_list(self.id()).await?;
        self.publish(ChannelEvent::VipUpdated { vips });
        self.load_entry(&entry.id).await
    }
}
