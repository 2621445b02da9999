use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::db::RoomId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Room,
    Participant,
    Vote,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Room, EntityKind::Participant, EntityKind::Vote];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A row-change notification. Only the kind matters to subscribers; they
/// refetch rather than trust a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub room_id: RoomId,
    pub entity: EntityKind,
    pub op: ChangeOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Changed(EntityKind),
    /// Notices were missed, every kind must be refetched.
    Resync,
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: Arc<RwLock<broadcast::Sender<ChangeNotice>>>,
    capacity: usize,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tx: Arc::new(RwLock::new(broadcast::channel(capacity).0)),
            capacity,
        }
    }

    pub fn publish(&self, notice: ChangeNotice) {
        let tx = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        // nobody listening is fine
        let _ = tx.send(notice);
    }

    pub fn subscribe(&self, room_id: RoomId) -> Subscription {
        let rx = self.tx.read().unwrap_or_else(PoisonError::into_inner).subscribe();
        Subscription { room_id, rx }
    }

    /// Replaces the underlying channel. Every live subscription ends and its
    /// owner has to subscribe again.
    pub fn reconnect(&self) {
        let mut tx = self.tx.write().unwrap_or_else(PoisonError::into_inner);
        *tx = broadcast::channel(self.capacity).0;
        tracing::info!("change feed reconnected");
    }
}

/// Room-scoped view of the feed. Dropping it unsubscribes.
pub struct Subscription {
    room_id: RoomId,
    rx: broadcast::Receiver<ChangeNotice>,
}

impl Subscription {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Waits for the next signal for this room. `None` means the feed dropped.
    pub async fn recv(&mut self) -> Option<Signal> {
        loop {
            match self.rx.recv().await {
                Ok(notice) if notice.room_id == self.room_id => {
                    return Some(Signal::Changed(notice.entity));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room_id = %self.room_id, skipped, "change feed lagged");
                    return Some(Signal::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn notice(room_id: RoomId, entity: EntityKind) -> ChangeNotice {
        ChangeNotice { room_id, entity, op: ChangeOp::Update }
    }

    #[tokio::test]
    async fn only_notices_for_the_subscribed_room_arrive() {
        let feed = ChangeFeed::new(16);
        let room = Uuid::now_v7();
        let mut sub = feed.subscribe(room);

        feed.publish(notice(Uuid::now_v7(), EntityKind::Vote));
        feed.publish(notice(room, EntityKind::Participant));

        assert_eq!(sub.recv().await, Some(Signal::Changed(EntityKind::Participant)));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_to_resync() {
        let feed = ChangeFeed::new(2);
        let room = Uuid::now_v7();
        let mut sub = feed.subscribe(room);

        for _ in 0..5 {
            feed.publish(notice(room, EntityKind::Vote));
        }

        assert_eq!(sub.recv().await, Some(Signal::Resync));
        assert_eq!(sub.recv().await, Some(Signal::Changed(EntityKind::Vote)));
    }

    #[tokio::test]
    async fn reconnect_ends_existing_subscriptions() {
        let feed = ChangeFeed::new(16);
        let room = Uuid::now_v7();
        let mut old = feed.subscribe(room);

        feed.reconnect();
        assert_eq!(old.recv().await, None);

        let mut fresh = feed.subscribe(room);
        feed.publish(notice(room, EntityKind::Room));
        assert_eq!(fresh.recv().await, Some(Signal::Changed(EntityKind::Room)));
    }
}
