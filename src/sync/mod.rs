mod derive;
mod error;
mod value;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{sync::watch, task::AbortHandle};

use crate::{
    cache::{RoomCache, RoomSnapshot},
    db::{normalize_name, Participant, Room, RoomId},
    feed::{ChangeFeed, EntityKind, Signal, Subscription},
    history::RoomHistory,
    identity::ParticipantToken,
    store::{GatewayError, RoomChanges, RoomGateway},
};

pub use derive::{average, build_view, is_unanimous, reveal_sort, roster_votes, ParticipantView, RoomView};
pub use error::{SyncError, SyncResult};
pub use value::{Estimate, VoteValue, NEEDS_BREAK, POKER_VALUES, UNSURE};

const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(250);

/// What the core needs from the outside world, built once per process and
/// handed to every session.
pub struct SyncContext<G> {
    gateway: Arc<G>,
    feed: ChangeFeed,
}

impl<G> Clone for SyncContext<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            feed: self.feed.clone(),
        }
    }
}

impl<G: RoomGateway> SyncContext<G> {
    pub fn new(gateway: Arc<G>, feed: ChangeFeed) -> Self {
        Self { gateway, feed }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Unjoined,
    Joining,
    Joined,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Joining,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealOutcome {
    pub revealed: bool,
    /// Fire the one-shot celebration.
    pub celebrate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRemoval {
    pub participant_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    Cancelled,
    /// `votes_cleared` is false when the vote cleanup failed and was skipped.
    Removed { votes_cleared: bool },
}

/// One browser's live connection to one room.
///
/// The session owns the room cache and the feed follower that keeps it
/// fresh. Mutations go to the gateway and come back through the cache;
/// votes and the reveal flag are shown optimistically and rolled back if
/// the write fails.
pub struct RoomSession<G: RoomGateway> {
    room_id: RoomId,
    token: Option<ParticipantToken>,
    gateway: Arc<G>,
    cache: RoomCache<G>,
    history: Option<RoomHistory>,
    phase: Mutex<Phase>,
    celebrated: AtomicBool,
    pending_removal: Mutex<Option<String>>,
    feed_task: AbortHandle,
}

impl<G: RoomGateway> RoomSession<G> {
    /// Subscribes to the room's changes and loads it. A missing room is
    /// terminal for the session.
    pub async fn open(
        ctx: &SyncContext<G>,
        room_id: RoomId,
        token: Option<ParticipantToken>,
        history: Option<RoomHistory>,
    ) -> SyncResult<Self> {
        let cache = RoomCache::new(room_id, ctx.gateway.clone());
        // subscribe before the first fetch so no change slips in between
        let subscription = ctx.feed.subscribe(room_id);
        let feed_task = tokio::spawn(follow_feed(ctx.feed.clone(), subscription, cache.clone())).abort_handle();

        let session = Self {
            room_id,
            token,
            gateway: ctx.gateway.clone(),
            cache,
            history,
            phase: Mutex::new(Phase::Idle),
            celebrated: AtomicBool::new(false),
            pending_removal: Mutex::new(None),
            feed_task,
        };
        tokio::try_join!(
            session.cache.refresh(EntityKind::Room),
            session.cache.refresh(EntityKind::Participant),
            session.cache.refresh(EntityKind::Vote),
        )?;

        let snapshot = session.cache.get();
        if snapshot.room_missing {
            return Err(SyncError::RoomNotFound);
        }
        if let (Some(token), Some(room)) = (session.token.as_deref(), snapshot.room.as_deref()) {
            if let Some(participant) = snapshot.participant(token) {
                session.record_visit(room, &participant.name).await;
            }
        }
        tracing::debug!(%room_id, "room session opened");
        Ok(session)
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.cache.get()
    }

    /// Fires whenever the cached room changes.
    pub fn watch(&self) -> watch::Receiver<RoomSnapshot> {
        self.cache.watch()
    }

    pub fn view(&self) -> Option<RoomView> {
        build_view(&self.cache.get(), self.token.as_deref(), self.status())
    }

    pub fn status(&self) -> SessionStatus {
        match &*self.lock_phase() {
            Phase::Joining => SessionStatus::Joining,
            Phase::Failed(message) => SessionStatus::Error { message: message.clone() },
            Phase::Idle => {
                let joined = self
                    .token
                    .as_deref()
                    .is_some_and(|token| self.cache.get().participant(token).is_some());
                if joined { SessionStatus::Joined } else { SessionStatus::Unjoined }
            }
        }
    }

    pub fn is_admin(&self) -> bool {
        let snapshot = self.cache.get();
        matches!(
            (self.token.as_deref(), snapshot.room.as_deref()),
            (Some(token), Some(room)) if room.admin_id == token
        )
    }

    /// Takes a seat under this browser's token. Joining again with the same
    /// token updates the name instead of adding a row.
    pub async fn join(&self, name: &str) -> SyncResult<Participant> {
        let checked = self
            .require_token()
            .and_then(|token| Ok((token, normalize_name(name)?)));
        let (token, name) = match checked {
            Ok(checked) => checked,
            Err(err) => return self.settle(Err(err)),
        };
        {
            let mut phase = self.lock_phase();
            if *phase == Phase::Joining {
                return Err(SyncError::NameConflict);
            }
            *phase = Phase::Joining;
        }
        let joined = self.seat(token, name).await;
        self.settle(joined)
    }

    async fn seat(&self, token: &str, name: &str) -> SyncResult<Participant> {
        let participant = self.gateway.upsert_participant(self.room_id, token, name).await?;
        self.refresh_quietly(EntityKind::Participant).await;
        tracing::info!(room_id = %self.room_id, participant_id = %token, "participant joined");

        if let Some(room) = self.cache.get().room.as_deref() {
            self.record_visit(room, &participant.name).await;
        }
        Ok(participant)
    }

    /// Applies `value` locally, then writes it. A failed write rolls the
    /// local value back.
    pub async fn cast_vote(&self, value: VoteValue) -> SyncResult<()> {
        let cast = self.write_vote(value).await;
        self.settle(cast)
    }

    /// Casts a card given by its face, as sent over the wire.
    pub async fn cast_card(&self, card: &str) -> SyncResult<()> {
        let cast = match VoteValue::from_card(card) {
            Some(value) => self.write_vote(value).await,
            None => Err(SyncError::InvalidVote(card.to_owned())),
        };
        self.settle(cast)
    }

    async fn write_vote(&self, value: VoteValue) -> SyncResult<()> {
        let token = self.require_token()?;
        if !value.is_cast() {
            return Err(SyncError::InvalidVote(String::new()));
        }
        if self.cache.get().participant(token).is_none() {
            return Err(SyncError::NotJoined);
        }

        let previous = self.cache.set_local_vote(token, value.clone());
        if let Err(err) = self.gateway.upsert_vote(self.room_id, token, &value).await {
            self.cache.rollback_vote(token, &value, previous);
            self.cache.invalidate(EntityKind::Vote);
            return Err(err.into());
        }
        self.refresh_quietly(EntityKind::Vote).await;
        Ok(())
    }

    /// Flips `votes_revealed`. Revealing a unanimous table asks for a
    /// celebration once until the next reset.
    pub async fn toggle_reveal(&self) -> SyncResult<RevealOutcome> {
        let toggled = self.toggle_reveal_inner().await;
        self.settle(toggled)
    }

    async fn toggle_reveal_inner(&self) -> SyncResult<RevealOutcome> {
        let room = self.require_admin()?;
        let revealed = !room.votes_revealed;

        self.cache.set_local_revealed(revealed);
        let updated = match self.gateway.set_room_fields(self.room_id, RoomChanges::revealed(revealed)).await {
            Ok(updated) => updated,
            Err(err) => {
                self.cache.rollback_revealed(revealed);
                self.cache.invalidate(EntityKind::Room);
                return Err(err.into());
            }
        };
        self.cache.apply_room(updated);

        let mut celebrate = false;
        if revealed {
            self.refresh_quietly(EntityKind::Vote).await;
            let unanimous = is_unanimous(roster_votes(&self.cache.get()));
            celebrate = unanimous && !self.celebrated.swap(true, Ordering::AcqRel);
        }
        tracing::info!(room_id = %self.room_id, revealed, celebrate, "votes reveal toggled");
        Ok(RevealOutcome { revealed, celebrate })
    }

    /// Clears every vote and hides the table. Both writes are always
    /// attempted; if one fails the room may be left half reset and another
    /// reset repairs it.
    pub async fn reset_votes(&self) -> SyncResult<()> {
        let reset = self.reset_votes_inner().await;
        self.settle(reset)
    }

    async fn reset_votes_inner(&self) -> SyncResult<()> {
        self.require_admin()?;

        let cleared = self.gateway.delete_all_votes(self.room_id).await;
        let hidden = self.gateway.set_room_fields(self.room_id, RoomChanges::revealed(false)).await;
        self.celebrated.store(false, Ordering::Release);

        let hidden_ok = match hidden {
            Ok(room) => {
                self.cache.apply_room(room);
                true
            }
            Err(err) => {
                tracing::warn!(room_id = %self.room_id, error = %err, "reset could not hide votes");
                self.cache.invalidate(EntityKind::Room);
                false
            }
        };
        if let Err(err) = &cleared {
            tracing::warn!(room_id = %self.room_id, error = %err, "reset could not clear votes");
        }
        self.refresh_quietly(EntityKind::Vote).await;

        if cleared.is_ok() && hidden_ok {
            tracing::info!(room_id = %self.room_id, "votes reset");
            return Ok(());
        }
        Err(SyncError::ResetIncomplete {
            votes_cleared: cleared.is_ok(),
            hidden: hidden_ok,
        })
    }

    /// First half of a removal: checks the request and parks it until the
    /// acting user confirms.
    pub fn request_removal(&self, target: &str) -> SyncResult<PendingRemoval> {
        let token = self.require_token()?;
        if target == token {
            return Err(SyncError::CannotRemoveSelf);
        }
        self.require_admin()?;
        let snapshot = self.cache.get();
        let participant = snapshot.participant(target).ok_or(SyncError::UnknownParticipant)?;

        *self.pending_removal.lock().unwrap_or_else(PoisonError::into_inner) = Some(target.to_owned());
        Ok(PendingRemoval {
            participant_id: participant.participant_id.clone(),
            name: participant.name.clone(),
        })
    }

    /// Second half of a removal. Declining drops the request.
    pub async fn confirm_removal(&self, target: &str, confirmed: bool) -> SyncResult<RemovalOutcome> {
        {
            let mut pending = self.pending_removal.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.as_deref() != Some(target) {
                return Err(SyncError::NoPendingRemoval);
            }
            pending.take();
        }
        if !confirmed {
            return Ok(RemovalOutcome::Cancelled);
        }
        let removed = self.remove(target).await;
        self.settle(removed)
    }

    async fn remove(&self, target: &str) -> SyncResult<RemovalOutcome> {
        if target == self.require_token()? {
            return Err(SyncError::CannotRemoveSelf);
        }
        self.require_admin()?;

        let votes_cleared = match self.gateway.delete_votes_for_participant(self.room_id, target).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    room_id = %self.room_id, participant_id = %target, error = %err,
                    "could not clear votes of removed participant, removing anyway"
                );
                false
            }
        };
        self.gateway
            .delete_participant(self.room_id, target)
            .await
            .map_err(SyncError::RemoveFailed)?;

        self.refresh_quietly(EntityKind::Participant).await;
        self.refresh_quietly(EntityKind::Vote).await;
        tracing::info!(room_id = %self.room_id, participant_id = %target, "participant removed");
        Ok(RemovalOutcome::Removed { votes_cleared })
    }

    /// Returns false when there was nothing to change.
    pub async fn rename_room(&self, name: &str) -> SyncResult<bool> {
        let renamed = self.rename_room_inner(name).await;
        self.settle(renamed)
    }

    async fn rename_room_inner(&self, name: &str) -> SyncResult<bool> {
        let room = self.require_admin()?;
        let name = name.trim();
        if name.is_empty() || room.room_name.as_deref() == Some(name) {
            return Ok(false);
        }

        let updated = self.gateway.set_room_fields(self.room_id, RoomChanges::renamed(name)).await?;
        self.cache.apply_room(updated);

        if let Some(history) = self.history.clone() {
            let (room_id, name) = (self.room_id, name.to_owned());
            tokio::spawn(async move {
                if let Err(err) = history.update_room_name(room_id, &name).await {
                    tracing::warn!(%room_id, error = %err, "could not update room name in history");
                }
            });
        }
        Ok(true)
    }

    /// Participants may rename themselves, the admin may rename anyone.
    pub async fn rename_participant(&self, target: &str, name: &str) -> SyncResult<Participant> {
        let renamed = self.rename_participant_inner(target, name).await;
        self.settle(renamed)
    }

    async fn rename_participant_inner(&self, target: &str, name: &str) -> SyncResult<Participant> {
        let token = self.require_token()?;
        let name = normalize_name(name)?;
        let snapshot = self.cache.get();
        let room = snapshot.room.as_deref().ok_or(SyncError::RoomNotFound)?;
        if target != token && room.admin_id != token {
            return Err(SyncError::NotAdmin);
        }
        if snapshot.participant(target).is_none() {
            return Err(SyncError::UnknownParticipant);
        }

        let participant = self
            .gateway
            .rename_participant(self.room_id, target, name)
            .await
            .map_err(|err| match err {
                GatewayError::NotFound => SyncError::UnknownParticipant,
                err => err.into(),
            })?;
        self.refresh_quietly(EntityKind::Participant).await;
        Ok(participant)
    }

    /// Stops following the room. Nothing touches the cache afterwards.
    pub fn leave(&self) {
        self.feed_task.abort();
        self.cache.close();
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        *self.lock_phase() = match &result {
            Ok(_) => Phase::Idle,
            Err(err) => Phase::Failed(err.to_string()),
        };
        result
    }

    fn require_token(&self) -> SyncResult<&str> {
        self.token.as_deref().ok_or(SyncError::NoIdentity)
    }

    fn require_admin(&self) -> SyncResult<Arc<Room>> {
        let token = self.require_token()?;
        let room = self.cache.get().room.ok_or(SyncError::RoomNotFound)?;
        if room.admin_id != token {
            return Err(SyncError::NotAdmin);
        }
        Ok(room)
    }

    /// A write already succeeded; a failed read-back only leaves the cache
    /// to the next feed signal.
    async fn refresh_quietly(&self, kind: EntityKind) {
        if let Err(err) = self.cache.refresh(kind).await {
            tracing::warn!(room_id = %self.room_id, ?kind, error = %err, "refresh after write failed");
            self.cache.invalidate(kind);
        }
    }

    async fn record_visit(&self, room: &Room, name: &str) {
        let (Some(history), Some(token)) = (&self.history, self.token.as_deref()) else {
            return;
        };
        let is_admin = room.admin_id == token;
        if let Err(err) = history
            .record_visit(self.room_id, is_admin, Some(name), room.room_name.as_deref())
            .await
        {
            tracing::warn!(room_id = %self.room_id, error = %err, "could not record room visit");
        }
    }
}

impl<G: RoomGateway> Drop for RoomSession<G> {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Turns feed signals into cache invalidations, resubscribing whenever the
/// feed drops.
async fn follow_feed<G: RoomGateway>(feed: ChangeFeed, mut subscription: Subscription, cache: RoomCache<G>) {
    loop {
        match subscription.recv().await {
            Some(Signal::Changed(kind)) => cache.invalidate(kind),
            Some(Signal::Resync) => cache.invalidate_all(),
            None => {
                let room_id = subscription.room_id();
                tracing::warn!(%room_id, "change feed dropped, resubscribing");
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                subscription = feed.subscribe(room_id);
                cache.invalidate_all();
            }
        }
    }
}
