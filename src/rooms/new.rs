use std::{sync::Arc, time::Duration};

use anyhow::{ensure, Context};
use axum::{debug_handler, extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use rand::Rng;
use serde::Serialize;
use tower_sessions::Session;

use crate::{
    db::RoomId,
    store::{RoomGateway, SqliteGateway},
    sync::SyncContext,
    AppResult, Client,
};

const WORD_API_TIMEOUT: Duration = Duration::from_secs(2);
const WORD_COUNT: usize = 3;

const ADJECTIVES: [&str; 24] = [
    "brave", "calm", "clever", "cosmic", "crisp", "dusty", "eager", "fancy", "gentle", "golden", "happy", "humble",
    "jolly", "lucky", "mellow", "nimble", "quiet", "rapid", "rusty", "shiny", "silent", "sunny", "witty", "zesty",
];

const NOUNS: [&str; 24] = [
    "badger", "comet", "falcon", "fjord", "gecko", "harbor", "heron", "island", "koala", "lantern", "maple", "meadow",
    "narwhal", "otter", "panda", "pebble", "quokka", "raven", "river", "rocket", "tiger", "tulip", "walrus", "willow",
];

/// Generates room names: three words from the remote word API when one is
/// configured, otherwise from the built-in lists.
#[derive(Clone)]
pub struct RoomNamer {
    client: reqwest::Client,
    word_api_url: Option<Arc<str>>,
}

impl RoomNamer {
    pub fn new(word_api_url: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WORD_API_TIMEOUT)
            .build()
            .context("building word api client")?;
        Ok(Self {
            client,
            word_api_url: word_api_url.map(Arc::from),
        })
    }

    pub async fn room_name(&self) -> String {
        if let Some(url) = &self.word_api_url {
            match self.fetch_words(url).await {
                Ok(words) => return words.join("-"),
                Err(err) => tracing::warn!(error = %err, "word api failed, using local words"),
            }
        }
        local_room_name(&mut rand::rng())
    }

    async fn fetch_words(&self, url: &str) -> anyhow::Result<Vec<String>> {
        let words: Vec<String> = self
            .client
            .get(url)
            .query(&[("number", WORD_COUNT)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let words: Vec<String> = words
            .into_iter()
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        ensure!(words.len() == WORD_COUNT, "expected {WORD_COUNT} words, got {}", words.len());
        Ok(words)
    }
}

pub fn local_room_name(rng: &mut impl Rng) -> String {
    let mut pick = |words: &[&'static str]| words[rng.random_range(0..words.len())];
    let first = pick(&ADJECTIVES);
    let second = pick(&ADJECTIVES);
    let noun = pick(&NOUNS);
    format!("{first}-{second}-{noun}")
}

#[derive(Debug, Serialize)]
struct NewRoom {
    room_id: RoomId,
    admin_id: String,
    room_name: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(sync): State<SyncContext<SqliteGateway>>,
    State(namer): State<RoomNamer>,
    session: Session,
) -> AppResult<Response> {
    let client = Client::load(session, None).await?;
    let room_name = namer.room_name().await;
    let room = sync.gateway().create_room(&client.token, Some(&room_name)).await?;

    if let Err(err) = client.history.record_visit(room.id, true, None, room.room_name.as_deref()).await {
        tracing::warn!(room_id = %room.id, error = %err, "could not record new room in history");
    }
    tracing::info!(room_id = %room.id, %room_name, "room created");

    Ok((
        StatusCode::CREATED,
        Json(NewRoom {
            room_id: room.id,
            admin_id: room.admin_id,
            room_name: room.room_name,
        }),
    )
        .into_response())
}
