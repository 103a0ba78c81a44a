//! The reveal ceremony: a per-channel state machine over one on-stage entry.
//!
//! Stages: collecting -> revealing -> average_ready -> average -> social,
//! with completed/cancelled reachable from any non-terminal stage. Judge
//! score ingestion is concurrent with producer-driven reveal advancement;
//! aggregates are always re-derived from the full slot set, never
//! incremented.

use super::{Channel, ChannelInner};
use crate::error::{Error, Result};
use crate::events::{ChannelEvent, SessionView};
use crate::types::*;

use super::standings::GLOBAL_BASELINE;

/// Shrinkage weight of the social score: results with fewer revealed judges
/// than this are pulled hard toward the baseline.
const SHRINKAGE_MIN_VOTES: f64 = 3.0;

const MAX_SCORE: f64 = 5.0;

impl Channel {
    /// Open the ceremony for the entry currently on stage. One judge slot per
    /// connected judge; durable scores for the entry are hydrated back into
    /// their slots so a restart mid-ceremony loses nothing.
    pub async fn start_voting(&self, queue_item_id: &str) -> Result<SessionView> {
        let mut inner = self.lock_inner().await;

        if let Some(session) = &inner.session {
            if !session.stage.is_terminal() {
                return Err(Error::Conflict(format!(
                    "a voting session is already active for {}",
                    session.queue_item_id
                )));
            }
        }

        let entry = self.load_entry(queue_item_id).await?;
        if entry.status != EntryStatus::Playing {
            return Err(Error::Validation(format!(
                "entry {} is not on stage",
                queue_item_id
            )));
        }
        if inner.active_judges.is_empty() {
            return Err(Error::Validation("no judges connected".to_string()));
        }

        let mut judges: Vec<JudgeSlot> = inner
            .active_judges
            .iter()
            .map(|j| JudgeSlot::new(j.judge_id.clone(), j.name.clone()))
            .collect();

        // Reconnect support: merge scores this entry already has on record
        for stored in self.store().scores_for_entry(queue_item_id).await? {
            if let Some(slot) = judges.iter_mut().find(|s| s.judge_id == stored.judge_id) {
                slot.score = Some(stored.score);
                slot.locked = stored.is_locked;
                slot.lock_type = stored.lock_type;
            }
        }

        // The baseline is fixed once per session: cup mean, or the global
        // constant when the cup has no history yet
        let social_baseline = match &entry.cup_id {
            Some(cup_id) => {
                let scores: Vec<f64> = self
                    .store()
                    .scores_for_cup(cup_id)
                    .await?
                    .iter()
                    .filter(|s| s.is_locked)
                    .map(|s| s.score)
                    .collect();
                if scores.is_empty() {
                    GLOBAL_BASELINE
                } else {
                    scores.iter().sum::<f64>() / scores.len() as f64
                }
            }
            None => GLOBAL_BASELINE,
        };

        let duplicate = self
            .prior_result_for_video(&entry.video_id, Some(&entry.created_at))
            .await?;

        let session = VotingSession {
            queue_item_id: queue_item_id.to_string(),
            cup_id: entry.cup_id.clone(),
            stage: VotingStage::Collecting,
            judges,
            reveal_index: 0,
            computed_average: None,
            computed_social: None,
            social_baseline,
            duplicate,
            started_at: self.now(),
        };
        let view = SessionView::from(&session);
        inner.session = Some(session);

        tracing::info!(channel = %self.id(), entry = %queue_item_id, "voting started");
        self.publish(ChannelEvent::VotingStarted { session: view.clone() });
        Ok(view)
    }

    /// Merge a judge's score into their slot. Allowed in every non-terminal
    /// stage; a revealed slot keeps displaying its frozen value.
    pub async fn submit_judge_score(&self, judge_id: &str, score: f64) -> Result<()> {
        if !(0.0..=MAX_SCORE).contains(&score) {
            return Err(Error::Validation(format!(
                "score {} is outside 0..={}",
                score, MAX_SCORE
            )));
        }

        let mut inner = self.lock_inner().await;
        let session = active_session(&mut inner)?;
        let slot = session
            .slot_mut(judge_id)
            .ok_or_else(|| Error::NotFound(format!("judge {} has no slot", judge_id)))?;
        slot.score = Some(score);

        let record = slot_record(session, judge_id);
        recompute_aggregates(session);
        let view = SessionView::from(&*session);

        self.store().upsert_judge_score(record).await?;
        self.publish(ChannelEvent::VotingUpdate { session: view });
        Ok(())
    }

    /// Lock a judge's slot. Locked scores are the only revealable ones.
    pub async fn lock_score(&self, judge_id: &str, lock_type: LockType) -> Result<()> {
        self.set_lock(judge_id, true, Some(lock_type)).await
    }

    pub async fn unlock_score(&self, judge_id: &str) -> Result<()> {
        self.set_lock(judge_id, false, None).await
    }

    /// Producer override: lock every scored-but-unlocked slot as FORCED.
    /// Returns how many slots were locked.
    pub async fn force_lock_all(&self) -> Result<u32> {
        let mut inner = self.lock_inner().await;
        let session = active_session(&mut inner)?;

        let mut forced = Vec::new();
        for slot in &mut session.judges {
            if slot.score.is_some() && !slot.locked {
                slot.locked = true;
                slot.lock_type = Some(LockType::Forced);
                forced.push(slot.judge_id.clone());
            }
        }
        let records: Vec<JudgeScore> = forced
            .iter()
            .map(|judge_id| slot_record(session, judge_id))
            .collect();
        recompute_aggregates(session);
        let view = SessionView::from(&*session);

        for record in records {
            self.store().upsert_judge_score(record).await?;
        }
        self.publish(ChannelEvent::VotingUpdate { session: view });
        Ok(forced.len() as u32)
    }

    /// Advance the reveal ceremony by one judge. Unrevealable slots in the
    /// way are marked skipped and drop out of the aggregates; the next
    /// locked+scored slot is revealed with its value frozen. Once nothing
    /// revealable remains the stage flips to average-ready and this call
    /// errors.
    pub async fn advance_judge_reveal(&self) -> Result<JudgeSlot> {
        let mut inner = self.lock_inner().await;
        let session = active_session(&mut inner)?;
        match session.stage {
            VotingStage::Collecting | VotingStage::Revealing => {}
            stage => return Err(Error::state(stage, "reveal ceremony is not running")),
        }
        session.stage = VotingStage::Revealing;

        let mut revealed: Option<JudgeSlot> = None;
        while session.reveal_index < session.judges.len() {
            let slot = &mut session.judges[session.reveal_index];
            if slot.reveal_status.is_resolved() {
                session.reveal_index += 1;
            } else if slot.is_revealable() {
                slot.reveal_status = RevealStatus::Revealed;
                slot.revealed_score = slot.score;
                revealed = Some(slot.clone());
                session.reveal_index += 1;
                break;
            } else {
                slot.reveal_status = RevealStatus::Skipped;
                session.reveal_index += 1;
            }
        }

        if session
            .judges
            .iter()
            .all(|s| s.reveal_status.is_resolved())
        {
            session.stage = VotingStage::AverageReady;
        }
        recompute_aggregates(session);
        let stage = session.stage;
        let view = SessionView::from(&*session);
        self.publish(ChannelEvent::VotingUpdate { session: view });

        match revealed {
            Some(slot) => {
                tracing::info!(
                    channel = %self.id(),
                    judge = %slot.judge_id,
                    score = slot.revealed_score,
                    "judge revealed"
                );
                Ok(slot)
            }
            None => Err(Error::state(stage, "no revealable judge scores remain")),
        }
    }

    /// Reveal the raw judge average, with the resubmission penalty applied:
    /// a rerun that does not strictly beat its prior average scores 0.
    pub async fn reveal_average(&self) -> Result<f64> {
        let mut inner = self.lock_inner().await;
        let session = active_session(&mut inner)?;
        if session.stage != VotingStage::AverageReady {
            return Err(Error::state(
                session.stage,
                "all locked scores must be revealed first",
            ));
        }
        let raw = revealed_mean(session).ok_or_else(|| {
            Error::Validation("no judge scores were revealed".to_string())
        })?;
        let result = duplicate_penalty(raw, session.duplicate.as_ref());

        session.computed_average = Some(result);
        session.stage = VotingStage::Average;
        let view = SessionView::from(&*session);
        self.publish(ChannelEvent::VotingUpdate { session: view });
        Ok(result)
    }

    /// Reveal the Bayesian-shrunk social score:
    /// (v/(v+m)) * avg + (m/(v+m)) * baseline. The resubmission zeroing rule
    /// keys off the raw average, same as `reveal_average`.
    pub async fn reveal_social_score(&self) -> Result<f64> {
        let mut inner = self.lock_inner().await;
        let session = active_session(&mut inner)?;
        if session.stage != VotingStage::Average {
            return Err(Error::state(
                session.stage,
                "average must be revealed first",
            ));
        }
        let raw = revealed_mean(session).ok_or_else(|| {
            Error::Validation("no judge scores were revealed".to_string())
        })?;

        let v = session
            .judges
            .iter()
            .filter(|s| s.reveal_status == RevealStatus::Revealed)
            .count() as f64;
        let m = SHRINKAGE_MIN_VOTES;
        let shrunk = (v / (v + m)) * raw + (m / (v + m)) * session.social_baseline;
        let result = if is_penalized(raw, session.duplicate.as_ref()) {
            0.0
        } else {
            shrunk
        };

        session.computed_social = Some(result);
        session.stage = VotingStage::Social;
        let view = SessionView::from(&*session);
        self.publish(ChannelEvent::VotingUpdate { session: view });
        Ok(result)
    }

    /// Finish the ceremony from any non-terminal stage and mark the entry
    /// SCORED.
    pub async fn complete_voting(&self, reason: &str) -> Result<()> {
        let mut inner = self.lock_inner().await;
        let inner = &mut *inner;

        let session = inner
            .session
            .as_mut()
            .ok_or_else(|| Error::NotFound("no active voting session".to_string()))?;
        if session.stage.is_terminal() {
            return Err(Error::state(session.stage, "session already ended"));
        }
        session.stage = VotingStage::Completed;
        let finished = inner.session.take().expect("session checked above");
        let queue_item_id = finished.queue_item_id.clone();
        inner.archived_sessions.push(finished);

        tracing::info!(channel = %self.id(), entry = %queue_item_id, reason, "voting completed");
        self.publish(ChannelEvent::VotingEnded {
            queue_item_id: queue_item_id.clone(),
            stage: VotingStage::Completed,
            reason: reason.to_string(),
        });

        let entry = self.load_entry(&queue_item_id).await?;
        if entry.status == EntryStatus::Playing {
            self.promote_locked(inner, &queue_item_id, EntryStatus::Scored, None)
                .await?;
        }
        Ok(())
    }

    /// Abort the ceremony. Idempotent: cancelling a terminal or absent
    /// session is a no-op.
    pub async fn cancel_voting(&self, reason: &str) -> Result<()> {
        let mut inner = self.lock_inner().await;
        self.cancel_session_locked(&mut inner, reason);
        Ok(())
    }

    /// Current session, if one is active.
    pub async fn voting_session(&self) -> Option<SessionView> {
        self.inner_session_view().await
    }

    async fn inner_session_view(&self) -> Option<SessionView> {
        let inner = self.lock_inner().await;
        inner.session.as_ref().map(SessionView::from)
    }

    async fn set_lock(
        &self,
        judge_id: &str,
        locked: bool,
        lock_type: Option<LockType>,
    ) -> Result<()> {
        let mut inner = self.lock_inner().await;
        let session = active_session(&mut inner)?;
        let slot = session
            .slot_mut(judge_id)
            .ok_or_else(|| Error::NotFound(format!("judge {} has no slot", judge_id)))?;
        slot.locked = locked;
        slot.lock_type = if locked { lock_type } else { None };

        let has_score = slot.score.is_some();
        let record = if has_score {
            Some(slot_record(session, judge_id))
        } else {
            None
        };
        recompute_aggregates(session);
        let view = SessionView::from(&*session);

        if let Some(record) = record {
            self.store().upsert_judge_score(record).await?;
        }
        self.publish(ChannelEvent::VotingUpdate { session: view });
        Ok(())
    }

    // ========== Internals (channel lock held) ==========

    /// Cancel the active session if it belongs to `entry_id`.
    pub(crate) fn cancel_entry_session(
        &self,
        inner: &mut ChannelInner,
        entry_id: &str,
        reason: &str,
    ) {
        let matches = inner
            .session
            .as_ref()
            .map(|s| s.queue_item_id == entry_id)
            .unwrap_or(false);
        if matches {
            self.cancel_session_locked(inner, reason);
        }
    }

    pub(crate) fn cancel_session_locked(&self, inner: &mut ChannelInner, reason: &str) {
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        if session.stage.is_terminal() {
            return;
        }
        session.stage = VotingStage::Cancelled;
        let finished = inner.session.take().expect("session checked above");
        let queue_item_id = finished.queue_item_id.clone();
        inner.archived_sessions.push(finished);

        tracing::info!(channel = %self.id(), entry = %queue_item_id, reason, "voting cancelled");
        self.publish(ChannelEvent::VotingEnded {
            queue_item_id,
            stage: VotingStage::Cancelled,
            reason: reason.to_string(),
        });
    }
}

fn active_session(inner: &mut ChannelInner) -> Result<&mut VotingSession> {
    let session = inner
        .session
        .as_mut()
        .ok_or_else(|| Error::NotFound("no active voting session".to_string()))?;
    if session.stage.is_terminal() {
        return Err(Error::state(session.stage, "session already ended"));
    }
    Ok(session)
}

/// Durable record for one slot's current state.
fn slot_record(session: &VotingSession, judge_id: &str) -> JudgeScore {
    let slot = session.slot(judge_id).expect("slot exists");
    JudgeScore {
        cup_id: session.cup_id.clone(),
        queue_item_id: session.queue_item_id.clone(),
        judge_id: slot.judge_id.clone(),
        score: slot.score.expect("record only written for scored slots"),
        is_locked: slot.locked,
        lock_type: slot.lock_type,
    }
}

/// Mean of the frozen revealed values. Skipped slots contribute nothing even
/// when they hold a score.
fn revealed_mean(session: &VotingSession) -> Option<f64> {
    let revealed: Vec<f64> = session
        .judges
        .iter()
        .filter(|s| s.reveal_status == RevealStatus::Revealed)
        .filter_map(|s| s.revealed_score)
        .collect();
    if revealed.is_empty() {
        None
    } else {
        Some(revealed.iter().sum::<f64>() / revealed.len() as f64)
    }
}

fn is_penalized(raw: f64, prior: Option<&PriorResult>) -> bool {
    prior.map(|p| raw <= p.average).unwrap_or(false)
}

fn duplicate_penalty(raw: f64, prior: Option<&PriorResult>) -> f64 {
    if is_penalized(raw, prior) {
        0.0
    } else {
        raw
    }
}

/// Re-derive the live average preview from the full slot set. Frozen once
/// `reveal_average` has run.
fn recompute_aggregates(session: &mut VotingSession) {
    if matches!(
        session.stage,
        VotingStage::Collecting | VotingStage::Revealing | VotingStage::AverageReady
    ) {
        session.computed_average = revealed_mean(session);
    }
}
