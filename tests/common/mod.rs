use std::{sync::Arc, time::Duration};

use planning_poker::{
    db, feed::ChangeFeed, history::RoomHistory, session::MemoryClientStore, store::SqliteGateway, sync::SyncContext,
};
use sqlx::sqlite::SqlitePoolOptions;

/// A sync context over a fresh in-memory database.
pub async fn context() -> SyncContext<SqliteGateway> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&db_pool).await.unwrap();
    let feed = ChangeFeed::new(64);
    SyncContext::new(Arc::new(SqliteGateway::new(db_pool, feed.clone())), feed)
}

pub fn history(token: &str) -> RoomHistory {
    RoomHistory::new(Arc::new(MemoryClientStore::default()), token)
}

pub async fn until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
