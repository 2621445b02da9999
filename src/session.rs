use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tower_sessions::Session;

pub const PARTICIPANT_ID: &str = "participant_id";
pub const RECENT_ROOMS: &str = "recent_rooms";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Session(#[from] tower_sessions::session::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Durable per-browser key/value state: the participant token and the
/// recent-rooms list.
pub trait ClientStore: Send + Sync {
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

    fn save<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Keeps client state in the browser's tower-sessions session.
///
/// Every write is saved to the session store right away. A websocket keeps
/// writing long after its upgrade response went back through the session
/// layer, which is the only place the layer saves.
#[derive(Clone)]
pub struct SessionClientStore(pub Session);

impl ClientStore for SessionClientStore {
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        Box::pin(async move { Ok(self.0.get::<Value>(key).await?) })
    }

    fn save<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.0.insert(key, value).await?;
            self.0.save().await?;
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct MemoryClientStore {
    values: Mutex<HashMap<String, Value>>,
}

impl ClientStore for MemoryClientStore {
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        let value = self.values.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn save<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value);
        Box::pin(async { Ok(()) })
    }
}
