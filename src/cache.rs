use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use time::OffsetDateTime;
use tokio::{sync::watch, task::AbortHandle};
use uuid::Uuid;

use crate::{
    db::{Participant, Room, RoomId, Vote},
    feed::EntityKind,
    store::{GatewayError, GatewayResult, RoomGateway},
    sync::VoteValue,
};

/// One consistent view of a room. Each entity list is swapped as a whole,
/// so a reader holds either the old list or the new one.
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    pub room: Option<Arc<Room>>,
    pub participants: Arc<Vec<Participant>>,
    pub votes: Arc<Vec<Vote>>,
    /// The store answered that the room does not exist.
    pub room_missing: bool,
}

impl RoomSnapshot {
    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.participant_id == participant_id)
    }

    pub fn vote_of(&self, participant_id: &str) -> &VoteValue {
        self.votes
            .iter()
            .find(|v| v.participant_id == participant_id)
            .map_or(&VoteValue::Unset, |v| &v.value)
    }
}

enum Fetched {
    Room(Option<Room>),
    Participants(Vec<Participant>),
    Votes(Vec<Vote>),
}

#[derive(Default)]
struct Slot {
    issued: u64,
    applied: u64,
    in_flight: Option<AbortHandle>,
    dirty: bool,
}

impl Slot {
    fn next_seq(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }
}

fn slot_index(kind: EntityKind) -> usize {
    match kind {
        EntityKind::Room => 0,
        EntityKind::Participant => 1,
        EntityKind::Vote => 2,
    }
}

struct Shared<G> {
    room_id: RoomId,
    gateway: Arc<G>,
    snapshot: watch::Sender<RoomSnapshot>,
    slots: Mutex<[Slot; 3]>,
    closed: AtomicBool,
}

/// Client-side copy of one room, refreshed through the gateway.
///
/// Every fetch carries a per-kind sequence number and only a response newer
/// than the last applied one may replace the snapshot. Background
/// invalidations coalesce: while a refetch of a kind is in flight, further
/// invalidations of that kind only schedule one follow-up fetch.
pub struct RoomCache<G> {
    shared: Arc<Shared<G>>,
}

impl<G> Clone for RoomCache<G> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<G: RoomGateway> Shared<G> {
    fn lock_slots(&self) -> MutexGuard<'_, [Slot; 3]> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn fetch(&self, kind: EntityKind) -> GatewayResult<Fetched> {
        match kind {
            EntityKind::Room => match self.gateway.fetch_room(self.room_id).await {
                Ok(room) => Ok(Fetched::Room(Some(room))),
                Err(GatewayError::NotFound) => Ok(Fetched::Room(None)),
                Err(err) => Err(err),
            },
            EntityKind::Participant => self.gateway.fetch_participants(self.room_id).await.map(Fetched::Participants),
            EntityKind::Vote => self.gateway.fetch_votes(self.room_id).await.map(Fetched::Votes),
        }
    }

    fn apply(&self, slot: &mut Slot, seq: u64, fetched: Fetched) {
        if seq <= slot.applied {
            tracing::debug!(room_id = %self.room_id, seq, applied = slot.applied, "discarding stale response");
            return;
        }
        slot.applied = seq;
        self.snapshot.send_modify(move |snap| match fetched {
            Fetched::Room(room) => {
                snap.room_missing = room.is_none();
                snap.room = room.map(Arc::new);
            }
            Fetched::Participants(participants) => snap.participants = Arc::new(participants),
            Fetched::Votes(votes) => snap.votes = Arc::new(votes),
        });
    }

    async fn run_refetch(self: Arc<Self>, kind: EntityKind, mut seq: u64) {
        loop {
            tracing::debug!(room_id = %self.room_id, ?kind, seq, "refetching");
            let fetched = self.fetch(kind).await;

            let mut slots = self.lock_slots();
            if self.is_closed() {
                return;
            }
            let slot = &mut slots[slot_index(kind)];
            match fetched {
                Ok(fetched) => self.apply(slot, seq, fetched),
                Err(err) => tracing::warn!(
                    room_id = %self.room_id, ?kind, error = %err,
                    "refetch failed, keeping the previous snapshot"
                ),
            }
            if !slot.dirty {
                slot.in_flight = None;
                return;
            }
            slot.dirty = false;
            seq = slot.next_seq();
        }
    }
}

impl<G: RoomGateway> RoomCache<G> {
    pub fn new(room_id: RoomId, gateway: Arc<G>) -> Self {
        let (snapshot, _) = watch::channel(RoomSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                room_id,
                gateway,
                snapshot,
                slots: Mutex::new(Default::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Latest snapshot, possibly stale.
    pub fn get(&self) -> RoomSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<RoomSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Schedules a background refetch of `kind`.
    pub fn invalidate(&self, kind: EntityKind) {
        let shared = &self.shared;
        if shared.is_closed() {
            return;
        }
        let mut slots = shared.lock_slots();
        let slot = &mut slots[slot_index(kind)];
        if slot.in_flight.is_some() {
            slot.dirty = true;
            return;
        }
        let seq = slot.next_seq();
        let task = tokio::spawn(shared.clone().run_refetch(kind, seq));
        slot.in_flight = Some(task.abort_handle());
    }

    pub fn invalidate_all(&self) {
        for kind in EntityKind::ALL {
            self.invalidate(kind);
        }
    }

    /// Fetches `kind` now and applies it unless a newer response got there first.
    pub async fn refresh(&self, kind: EntityKind) -> GatewayResult<()> {
        let seq = self.shared.lock_slots()[slot_index(kind)].next_seq();
        let fetched = self.shared.fetch(kind).await?;

        let mut slots = self.shared.lock_slots();
        if !self.shared.is_closed() {
            self.shared.apply(&mut slots[slot_index(kind)], seq, fetched);
        }
        Ok(())
    }

    /// Applies a room row returned by a write.
    pub fn apply_room(&self, room: Room) {
        let mut slots = self.shared.lock_slots();
        if self.shared.is_closed() {
            return;
        }
        let slot = &mut slots[slot_index(EntityKind::Room)];
        let seq = slot.next_seq();
        self.shared.apply(slot, seq, Fetched::Room(Some(room)));
    }

    /// Takes a sequence number for a local edit, so fetches issued before
    /// it can no longer replace the snapshot.
    fn claim(&self, slots: &mut [Slot; 3], kind: EntityKind) {
        let slot = &mut slots[slot_index(kind)];
        slot.applied = slot.next_seq();
    }

    /// Shows `value` as the participant's vote ahead of the write. Returns
    /// what was shown before.
    pub fn set_local_vote(&self, participant_id: &str, value: VoteValue) -> VoteValue {
        let mut previous = VoteValue::Unset;
        let mut slots = self.shared.lock_slots();
        if self.shared.is_closed() {
            return previous;
        }
        self.claim(&mut slots, EntityKind::Vote);
        let room_id = self.shared.room_id;
        self.shared.snapshot.send_modify(|snap| {
            let votes = Arc::make_mut(&mut snap.votes);
            match votes.iter_mut().find(|v| v.participant_id == participant_id) {
                Some(vote) => previous = std::mem::replace(&mut vote.value, value),
                None => votes.push(Vote {
                    id: Uuid::nil(),
                    room_id,
                    participant_id: participant_id.to_owned(),
                    value,
                    voted_at: OffsetDateTime::now_utc(),
                }),
            }
        });
        previous
    }

    /// Undoes [`Self::set_local_vote`] if the optimistic value is still the
    /// one shown. A newer fetch wins over the rollback.
    pub fn rollback_vote(&self, participant_id: &str, optimistic: &VoteValue, previous: VoteValue) {
        self.shared.snapshot.send_if_modified(|snap| {
            let Some(idx) = snap
                .votes
                .iter()
                .position(|v| v.participant_id == participant_id && v.value == *optimistic)
            else {
                return false;
            };
            let votes = Arc::make_mut(&mut snap.votes);
            if previous.is_cast() {
                votes[idx].value = previous;
            } else {
                votes.remove(idx);
            }
            true
        });
    }

    pub fn set_local_revealed(&self, revealed: bool) {
        let mut slots = self.shared.lock_slots();
        if self.shared.is_closed() {
            return;
        }
        self.claim(&mut slots, EntityKind::Room);
        self.shared.snapshot.send_if_modified(|snap| match snap.room.as_mut() {
            Some(room) if room.votes_revealed != revealed => {
                Arc::make_mut(room).votes_revealed = revealed;
                true
            }
            _ => false,
        });
    }

    pub fn rollback_revealed(&self, optimistic: bool) {
        self.shared.snapshot.send_if_modified(|snap| match snap.room.as_mut() {
            Some(room) if room.votes_revealed == optimistic => {
                Arc::make_mut(room).votes_revealed = !optimistic;
                true
            }
            _ => false,
        });
    }

    /// Stops all refetches. Nothing reaches the snapshot afterwards.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        for slot in self.shared.lock_slots().iter_mut() {
            if let Some(task) = slot.in_flight.take() {
                task.abort();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_refetching(&self, kind: EntityKind) -> bool {
        self.shared.lock_slots()[slot_index(kind)].in_flight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::testing::{self, eventually, Op, TestGateway};

    use super::*;

    fn card(value: &str) -> VoteValue {
        VoteValue::from_card(value).unwrap()
    }

    async fn seeded() -> (Arc<TestGateway>, RoomId) {
        let gateway = Arc::new(TestGateway::new(testing::gateway().await));
        let room = gateway.inner().create_room("t1", None).await.unwrap();
        gateway.inner().upsert_participant(room.id, "t1", "Ann").await.unwrap();
        (gateway, room.id)
    }

    #[tokio::test]
    async fn refresh_fills_the_snapshot() {
        let (gateway, room_id) = seeded().await;
        let cache = RoomCache::new(room_id, gateway.clone());

        for kind in EntityKind::ALL {
            cache.refresh(kind).await.unwrap();
        }

        let snap = cache.get();
        assert_eq!(snap.room.as_ref().unwrap().admin_id, "t1");
        assert_eq!(snap.participants.len(), 1);
        assert!(snap.votes.is_empty());
        assert!(!snap.room_missing);
    }

    #[tokio::test]
    async fn missing_room_is_flagged() {
        let (gateway, _) = seeded().await;
        let cache = RoomCache::new(Uuid::now_v7(), gateway);

        cache.refresh(EntityKind::Room).await.unwrap();

        assert!(cache.get().room_missing);
        assert!(cache.get().room.is_none());
    }

    #[tokio::test]
    async fn late_response_does_not_overwrite_a_newer_one() {
        let (gateway, room_id) = seeded().await;
        let cache = RoomCache::new(room_id, gateway.clone());
        cache.refresh(EntityKind::Vote).await.unwrap();

        let gate = gateway.hold_next_vote_fetch();
        cache.invalidate(EntityKind::Vote);
        gate.reached.notified().await;

        gateway.inner().upsert_vote(room_id, "t1", &card("5")).await.unwrap();
        cache.refresh(EntityKind::Vote).await.unwrap();
        assert_eq!(cache.get().vote_of("t1"), &card("5"));

        gate.release.notify_one();
        eventually("background refetch to finish", || !cache.is_refetching(EntityKind::Vote)).await;
        assert_eq!(cache.get().vote_of("t1"), &card("5"));
    }

    #[tokio::test]
    async fn invalidations_coalesce_into_one_follow_up_fetch() {
        let (gateway, room_id) = seeded().await;
        let cache = RoomCache::new(room_id, gateway.clone());

        let gate = gateway.hold_next_vote_fetch();
        cache.invalidate(EntityKind::Vote);
        gate.reached.notified().await;
        for _ in 0..5 {
            cache.invalidate(EntityKind::Vote);
        }
        gateway.inner().upsert_vote(room_id, "t1", &card("3")).await.unwrap();
        gate.release.notify_one();

        eventually("refetches to drain", || !cache.is_refetching(EntityKind::Vote)).await;
        assert_eq!(gateway.vote_fetches.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get().vote_of("t1"), &card("3"));
    }

    #[tokio::test]
    async fn failed_refetch_keeps_the_previous_snapshot() {
        let (gateway, room_id) = seeded().await;
        gateway.inner().upsert_vote(room_id, "t1", &card("8")).await.unwrap();
        let cache = RoomCache::new(room_id, gateway.clone());
        cache.refresh(EntityKind::Vote).await.unwrap();

        gateway.fail(Op::FetchVotes);
        assert!(cache.refresh(EntityKind::Vote).await.is_err());
        cache.invalidate(EntityKind::Vote);
        eventually("refetch to give up", || !cache.is_refetching(EntityKind::Vote)).await;

        assert_eq!(cache.get().vote_of("t1"), &card("8"));
    }

    #[tokio::test]
    async fn optimistic_vote_rolls_back_only_while_still_shown() {
        let (gateway, room_id) = seeded().await;
        let cache = RoomCache::new(room_id, gateway.clone());

        let previous = cache.set_local_vote("t1", card("5"));
        assert_eq!(previous, VoteValue::Unset);
        assert_eq!(cache.get().vote_of("t1"), &card("5"));
        cache.rollback_vote("t1", &card("5"), previous);
        assert_eq!(cache.get().vote_of("t1"), &VoteValue::Unset);

        cache.set_local_vote("t1", card("5"));
        gateway.inner().upsert_vote(room_id, "t1", &card("13")).await.unwrap();
        cache.refresh(EntityKind::Vote).await.unwrap();
        cache.rollback_vote("t1", &card("5"), VoteValue::Unset);
        assert_eq!(cache.get().vote_of("t1"), &card("13"));
    }

    #[tokio::test]
    async fn earlier_refetch_does_not_hide_a_pending_vote() {
        let (gateway, room_id) = seeded().await;
        let cache = RoomCache::new(room_id, gateway.clone());
        cache.refresh(EntityKind::Vote).await.unwrap();

        let gate = gateway.hold_next_vote_fetch();
        cache.invalidate(EntityKind::Vote);
        gate.reached.notified().await;
        cache.set_local_vote("t1", card("5"));

        gate.release.notify_one();
        eventually("background refetch to finish", || !cache.is_refetching(EntityKind::Vote)).await;
        assert_eq!(cache.get().vote_of("t1"), &card("5"));
    }

    #[tokio::test]
    async fn earlier_refetch_does_not_hide_a_pending_reveal() {
        let (gateway, room_id) = seeded().await;
        let cache = RoomCache::new(room_id, gateway.clone());
        cache.refresh(EntityKind::Room).await.unwrap();

        let stale = gateway.inner().fetch_room(room_id).await.unwrap();
        let seq = cache.shared.lock_slots()[slot_index(EntityKind::Room)].next_seq();
        cache.set_local_revealed(true);
        cache.shared.apply(
            &mut cache.shared.lock_slots()[slot_index(EntityKind::Room)],
            seq,
            Fetched::Room(Some(stale)),
        );

        assert!(cache.get().room.unwrap().votes_revealed);
    }

    #[tokio::test]
    async fn closed_cache_ignores_everything() {
        let (gateway, room_id) = seeded().await;
        let cache = RoomCache::new(room_id, gateway.clone());
        cache.refresh(EntityKind::Participant).await.unwrap();

        let gate = gateway.hold_next_vote_fetch();
        gateway.inner().upsert_vote(room_id, "t1", &card("2")).await.unwrap();
        cache.invalidate(EntityKind::Vote);
        gate.reached.notified().await;
        cache.close();
        gate.release.notify_one();

        cache.refresh(EntityKind::Vote).await.unwrap();
        cache.invalidate(EntityKind::Vote);
        cache.set_local_vote("t1", card("8"));
        tokio::task::yield_now().await;

        assert!(cache.get().votes.is_empty());
        assert_eq!(cache.get().participants.len(), 1);
    }
}
