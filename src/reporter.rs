//! HTTP reporter.
//!
//! Grounded on `web_client.py`'s `HTTPClientDakara`: one `authenticate()`
//! call up front trades login/password for a bearer token, then every other
//! operation is a thin wrapper around `post`/`put` that logs and swallows
//! transport errors so a dropped connection to the server never takes the
//! player down mid-song.

use std::sync::RwLock;

use reqwest::{Client, StatusCode};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("authentication with the server failed")]
    Authentication,

    #[error("couldn't reach the server")]
    Network(#[source] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusEvent {
    Finished,
    StartedTransition,
    StartedSong,
    CouldNotPlay,
    Paused,
    Resumed,
    UpdatedTiming,
}

impl StatusEvent {
    fn as_str(self) -> &'static str {
        match self {
            StatusEvent::Finished => "finished",
            StatusEvent::StartedTransition => "started_transition",
            StatusEvent::StartedSong => "started_song",
            StatusEvent::CouldNotPlay => "could_not_play",
            StatusEvent::Paused => "paused",
            StatusEvent::Resumed => "resumed",
            StatusEvent::UpdatedTiming => "updated_timing",
        }
    }
}

#[derive(Serialize)]
struct StatusPayload {
    event: &'static str,
    playlist_entry_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    timing: Option<i64>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    playlist_entry_id: i64,
    error_message: &'a str,
}

#[derive(Serialize)]
struct TokenAuthPayload<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(serde::Deserialize)]
struct TokenAuthResponse {
    token: String,
}

/// Talks to the Dakara server's HTTP API. Holds the bearer token once
/// `authenticate` has succeeded; every other method asserts it is present,
/// since the manager never calls them beforehand.
pub struct Reporter {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl Reporter {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token: RwLock::new(None),
        }
    }

    fn token(&self) -> String {
        self.token
            .read()
            .unwrap()
            .clone()
            .expect("authenticate() must be called before any other reporter operation")
    }

    /// Exchanges login/password for a bearer token. Unlike every other
    /// operation, failures here are fatal: without a token nothing else can
    /// succeed, so this is the one call the supervisor lets bubble up.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<(), ReportError> {
        let response = self
            .client
            .post(format!("{}token-auth/", self.base_url))
            .json(&TokenAuthPayload {
                username: login,
                password,
            })
            .send()
            .await
            .map_err(ReportError::Network)?;

        if response.status() == StatusCode::BAD_REQUEST {
            return Err(ReportError::Authentication);
        }

        let response = response.error_for_status().map_err(ReportError::Network)?;
        let body: TokenAuthResponse = response.json().await.map_err(ReportError::Network)?;
        *self.token.write().unwrap() = Some(body.token);

        Ok(())
    }

    pub async fn post_player_error(&self, playlist_entry_id: i64, error_message: &str) {
        let truncated: String = error_message.chars().take(255).collect();
        log::debug!(
            "telling the server that playlist entry {playlist_entry_id} cannot be played"
        );
        self.post(
            "playlist/player/errors/",
            &ErrorPayload {
                playlist_entry_id,
                error_message: &truncated,
            },
            "unable to send player error to server",
        )
        .await;
    }

    pub async fn put_status_finished(&self, playlist_entry_id: i64) {
        log::debug!("telling the server that playlist entry {playlist_entry_id} is finished");
        self.put_status(StatusEvent::Finished, playlist_entry_id, None).await;
    }

    pub async fn put_status_started_transition(&self, playlist_entry_id: i64) {
        log::debug!(
            "telling the server that the transition of playlist entry {playlist_entry_id} has started"
        );
        self.put_status(StatusEvent::StartedTransition, playlist_entry_id, None)
            .await;
    }

    pub async fn put_status_started_song(&self, playlist_entry_id: i64) {
        log::debug!(
            "telling the server that the song of playlist entry {playlist_entry_id} has started"
        );
        self.put_status(StatusEvent::StartedSong, playlist_entry_id, None)
            .await;
    }

    pub async fn put_status_could_not_play(&self, playlist_entry_id: i64) {
        log::debug!(
            "telling the server that the playlist entry {playlist_entry_id} could not play"
        );
        self.put_status(StatusEvent::CouldNotPlay, playlist_entry_id, None)
            .await;
    }

    pub async fn put_status_paused(&self, playlist_entry_id: i64, timing: i64) {
        log::debug!("telling the server that playlist entry {playlist_entry_id} is paused");
        self.put_status(StatusEvent::Paused, playlist_entry_id, Some(timing))
            .await;
    }

    pub async fn put_status_resumed(&self, playlist_entry_id: i64, timing: i64) {
        log::debug!("telling the server that playlist entry {playlist_entry_id} has resumed");
        self.put_status(StatusEvent::Resumed, playlist_entry_id, Some(timing))
            .await;
    }

    pub async fn put_status_updated_timing(&self, playlist_entry_id: i64, timing: i64) {
        self.put_status(StatusEvent::UpdatedTiming, playlist_entry_id, Some(timing))
            .await;
    }

    async fn put_status(&self, event: StatusEvent, playlist_entry_id: i64, timing: Option<i64>) {
        self.put(
            "playlist/player/status/",
            &StatusPayload {
                event: event.as_str(),
                playlist_entry_id,
                timing,
            },
            "unable to report player status to server",
        )
        .await;
    }

    async fn post<T: Serialize + ?Sized>(&self, endpoint: &str, data: &T, message_on_error: &str) {
        let result = self
            .client
            .post(format!("{}{endpoint}", self.base_url))
            .header("Authorization", format!("Token {}", self.token()))
            .json(data)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        if let Err(error) = result {
            log::warn!("{message_on_error}: {error}");
        }
    }

    async fn put<T: Serialize + ?Sized>(&self, endpoint: &str, data: &T, message_on_error: &str) {
        let result = self
            .client
            .put(format!("{}{endpoint}", self.base_url))
            .header("Authorization", format!("Token {}", self.token()))
            .json(data)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        if let Err(error) = result {
            log::warn!("{message_on_error}: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_names_match_server_vocabulary() {
        assert_eq!(StatusEvent::Finished.as_str(), "finished");
        assert_eq!(StatusEvent::StartedTransition.as_str(), "started_transition");
        assert_eq!(StatusEvent::StartedSong.as_str(), "started_song");
        assert_eq!(StatusEvent::CouldNotPlay.as_str(), "could_not_play");
        assert_eq!(StatusEvent::Paused.as_str(), "paused");
        assert_eq!(StatusEvent::Resumed.as_str(), "resumed");
        assert_eq!(StatusEvent::UpdatedTiming.as_str(), "updated_timing");
    }

    #[test]
    fn error_message_is_truncated_to_255_chars() {
        let long: String = "x".repeat(300);
        let truncated: String = long.chars().take(255).collect();
        assert_eq!(truncated.len(), 255);
    }

    #[test]
    #[should_panic(expected = "authenticate")]
    fn operations_before_authenticate_panic() {
        let reporter = Reporter::new("http://example.com/api/".to_string());
        reporter.token();
    }

    #[tokio::test]
    async fn status_payload_omits_timing_when_absent() {
        let payload = StatusPayload {
            event: "finished",
            playlist_entry_id: 42,
            timing: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("timing").is_none());
        assert_eq!(value["event"], "finished");
        assert_eq!(value["playlist_entry_id"], 42);
    }

    #[tokio::test]
    async fn status_payload_includes_timing_when_present() {
        let payload = StatusPayload {
            event: "paused",
            playlist_entry_id: 42,
            timing: Some(17),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["timing"], 17);
    }
}
