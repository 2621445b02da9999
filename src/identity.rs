use serde_json::Value;
use uuid::Uuid;

use crate::session::{ClientStore, StoreError, PARTICIPANT_ID};

pub type ParticipantToken = String;

/// Returns this browser's participant token, creating it on first use.
///
/// An existing token is never replaced. `bootstrap` (the admin token handed
/// out when a room was created elsewhere) is adopted only when the browser
/// has no token yet.
pub async fn ensure_participant_token(
    store: &dyn ClientStore,
    bootstrap: Option<&str>,
) -> Result<ParticipantToken, StoreError> {
    if let Some(Value::String(token)) = store.load(PARTICIPANT_ID).await? {
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let token = bootstrap
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map_or_else(|| Uuid::now_v7().to_string(), str::to_owned);
    store.save(PARTICIPANT_ID, Value::String(token.clone())).await?;
    tracing::info!(participant_id = %token, "issued participant token");
    Ok(token)
}

#[cfg(test)]
mod tests {
    use crate::session::MemoryClientStore;

    use super::*;

    #[tokio::test]
    async fn token_is_created_once() {
        let store = MemoryClientStore::default();

        let first = ensure_participant_token(&store, None).await.unwrap();
        let second = ensure_participant_token(&store, None).await.unwrap();

        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn bootstrap_is_adopted_only_without_a_token() {
        let fresh = MemoryClientStore::default();
        assert_eq!(ensure_participant_token(&fresh, Some("admin-1")).await.unwrap(), "admin-1");

        let seated = MemoryClientStore::default();
        let own = ensure_participant_token(&seated, None).await.unwrap();
        assert_eq!(ensure_participant_token(&seated, Some("admin-1")).await.unwrap(), own);
    }

    #[tokio::test]
    async fn blank_bootstrap_is_ignored() {
        let store = MemoryClientStore::default();
        let token = ensure_participant_token(&store, Some("   ")).await.unwrap();
        assert!(Uuid::parse_str(&token).is_ok());
    }
}
