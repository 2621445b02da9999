use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::sync::Notify;

use crate::{
    db::{self, Participant, Room, RoomId, Vote},
    feed::ChangeFeed,
    store::{GatewayError, GatewayResult, RoomChanges, RoomGateway, SqliteGateway},
    sync::VoteValue,
};

pub(crate) async fn memory_pool() -> SqlitePool {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&db_pool).await.unwrap();
    db_pool
}

pub(crate) async fn gateway() -> SqliteGateway {
    SqliteGateway::new(memory_pool().await, ChangeFeed::new(64))
}

/// Polls `check` until it holds or two seconds pass.
pub(crate) async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    UpsertParticipant,
    RenameParticipant,
    UpsertVote,
    SetRoomFields,
    DeleteParticipant,
    DeleteVotesForParticipant,
    DeleteAllVotes,
    FetchVotes,
}

/// Lets a test wait until a vote fetch has read the store, then decide when
/// its response is delivered.
#[derive(Default)]
pub(crate) struct Gate {
    pub(crate) reached: Notify,
    pub(crate) release: Notify,
}

/// Wraps the sqlite gateway with failure injection and call counting.
pub(crate) struct TestGateway {
    inner: SqliteGateway,
    failing: Mutex<HashSet<Op>>,
    gate: Mutex<Option<Arc<Gate>>>,
    pub(crate) writes: AtomicUsize,
    pub(crate) vote_fetches: AtomicUsize,
}

impl TestGateway {
    pub(crate) fn new(inner: SqliteGateway) -> Self {
        Self {
            inner,
            failing: Mutex::default(),
            gate: Mutex::default(),
            writes: AtomicUsize::new(0),
            vote_fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn inner(&self) -> &SqliteGateway {
        &self.inner
    }

    pub(crate) fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub(crate) fn heal(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    pub(crate) fn hold_next_vote_fetch(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn check(&self, op: Op) -> GatewayResult<()> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(GatewayError::Rejected(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn write(&self, op: Op) -> GatewayResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(op)
    }
}

impl RoomGateway for TestGateway {
    async fn create_room(&self, admin_id: &str, room_name: Option<&str>) -> GatewayResult<Room> {
        self.inner.create_room(admin_id, room_name).await
    }

    async fn fetch_room(&self, room_id: RoomId) -> GatewayResult<Room> {
        self.inner.fetch_room(room_id).await
    }

    async fn fetch_participants(&self, room_id: RoomId) -> GatewayResult<Vec<Participant>> {
        self.inner.fetch_participants(room_id).await
    }

    async fn fetch_votes(&self, room_id: RoomId) -> GatewayResult<Vec<Vote>> {
        self.vote_fetches.fetch_add(1, Ordering::SeqCst);
        self.check(Op::FetchVotes)?;
        let votes = self.inner.fetch_votes(room_id).await?;
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        Ok(votes)
    }

    async fn upsert_participant(&self, room_id: RoomId, participant_id: &str, name: &str) -> GatewayResult<Participant> {
        self.write(Op::UpsertParticipant)?;
        self.inner.upsert_participant(room_id, participant_id, name).await
    }

    async fn rename_participant(&self, room_id: RoomId, participant_id: &str, name: &str) -> GatewayResult<Participant> {
        self.write(Op::RenameParticipant)?;
        self.inner.rename_participant(room_id, participant_id, name).await
    }

    async fn upsert_vote(&self, room_id: RoomId, participant_id: &str, value: &VoteValue) -> GatewayResult<Vote> {
        self.write(Op::UpsertVote)?;
        self.inner.upsert_vote(room_id, participant_id, value).await
    }

    async fn set_room_fields(&self, room_id: RoomId, changes: RoomChanges) -> GatewayResult<Room> {
        self.write(Op::SetRoomFields)?;
        self.inner.set_room_fields(room_id, changes).await
    }

    async fn delete_participant(&self, room_id: RoomId, participant_id: &str) -> GatewayResult<()> {
        self.write(Op::DeleteParticipant)?;
        self.inner.delete_participant(room_id, participant_id).await
    }

    async fn delete_votes_for_participant(&self, room_id: RoomId, participant_id: &str) -> GatewayResult<()> {
        self.write(Op::DeleteVotesForParticipant)?;
        self.inner.delete_votes_for_participant(room_id, participant_id).await
    }

    async fn delete_all_votes(&self, room_id: RoomId) -> GatewayResult<()> {
        self.write(Op::DeleteAllVotes)?;
        self.inner.delete_all_votes(room_id).await
    }
}
