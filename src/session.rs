//! WebSocket session with the Dakara server.
//!
//! State machine: `Disconnected -> Connecting -> Connected -> (Disconnected
//! with retry flag) -> Connecting -> ...`. Grounded on the reconnect
//! primitives in `bus`: a clean or abnormal close sets the retry flag and
//! the next attempt is scheduled through the stop signal's own
//! `select!`/`sleep` race, so a shutdown mid-backoff never leaves a dangling
//! reconnect.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

use crate::bus::Bus;
use crate::playlist::PlaylistEntry;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("authentication with the server's websocket endpoint was rejected")]
    Authentication,

    #[error("couldn't reach the server's websocket endpoint")]
    Network(#[source] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CommandData {
    command: String,
}

type IdleCallback = Arc<dyn Fn() + Send + Sync>;
type PlaylistEntryCallback = Arc<dyn Fn(PlaylistEntry) + Send + Sync>;
type CommandCallback = Arc<dyn Fn(String) + Send + Sync>;
type ConnectionLostCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    idle: Option<IdleCallback>,
    playlist_entry: Option<PlaylistEntryCallback>,
    command: Option<CommandCallback>,
    connection_lost: Option<ConnectionLostCallback>,
}

/// Owns the socket and its reconnect policy. `run` never returns on a
/// retryable failure; it only returns once the stop signal is observed
/// (`Ok`) or a fatal classification is hit (`Err`, which the caller
/// publishes to the bus and which stops the whole daemon).
pub struct Session {
    url: String,
    reconnect_interval: Duration,
    callbacks: RwLock<Callbacks>,
}

impl Session {
    pub fn new(url: String, reconnect_interval: Duration) -> Self {
        Self {
            url,
            reconnect_interval,
            callbacks: RwLock::new(Callbacks::default()),
        }
    }

    pub fn on_idle(&self, f: impl Fn() + Send + Sync + 'static) {
        self.callbacks.write().unwrap().idle = Some(Arc::new(f));
    }

    pub fn on_playlist_entry(&self, f: impl Fn(PlaylistEntry) + Send + Sync + 'static) {
        self.callbacks.write().unwrap().playlist_entry = Some(Arc::new(f));
    }

    pub fn on_command(&self, f: impl Fn(String) + Send + Sync + 'static) {
        self.callbacks.write().unwrap().command = Some(Arc::new(f));
    }

    pub fn on_connection_lost(&self, f: impl Fn() + Send + Sync + 'static) {
        self.callbacks.write().unwrap().connection_lost = Some(Arc::new(f));
    }

    pub async fn run(self: &Arc<Self>, bus: Bus) -> Result<(), SessionError> {
        let mut connected_once = false;

        loop {
            if bus.stop.is_set() {
                return Ok(());
            }

            match tokio_tungstenite::connect_async(&self.url).await {
                Ok((stream, _response)) => {
                    connected_once = true;
                    debug!("websocket connected to {}", self.url);

                    if !self.handle_connection(stream, &bus).await {
                        return Ok(());
                    }
                }
                Err(error) => {
                    if is_auth_rejection(&error) {
                        return Err(SessionError::Authentication);
                    }

                    if !connected_once {
                        return Err(SessionError::Network(error));
                    }

                    warn!("websocket connection attempt failed: {error}");
                    self.emit_connection_lost();
                }
            }

            tokio::select! {
                biased;
                () = bus.stop.wait() => return Ok(()),
                () = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }
    }

    /// Drives one connected session. Returns `true` if the caller should
    /// reconnect (clean or abnormal close), `false` if the stop signal was
    /// observed and the caller should give up for good.
    async fn handle_connection(
        &self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        bus: &Bus,
    ) -> bool {
        let (mut write, mut read) = stream.split();

        if let Err(error) = write.send(Message::Text(r#"{"type":"ready"}"#.to_string())).await {
            warn!("couldn't send ready message: {error}");
            self.emit_connection_lost();
            return true;
        }

        loop {
            tokio::select! {
                biased;
                () = bus.stop.wait() => return false,
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("websocket closed cleanly");
                        return true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!("websocket closed abnormally: {error}");
                        self.emit_connection_lost();
                        return true;
                    }
                },
            }
        }
    }

    /// Exposed for the manager's wiring tests, which need to drive dispatch
    /// without opening a real socket.
    #[cfg(any(test, feature = "test-support"))]
    pub fn dispatch_for_test(&self, text: &str) {
        self.dispatch(text);
    }

    fn dispatch(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!("ignoring malformed websocket message: {error}");
                return;
            }
        };

        match envelope.kind.as_str() {
            "idle" => {
                if let Some(callback) = self.callbacks.read().unwrap().idle.clone() {
                    callback();
                }
            }
            "playlist_entry" => match serde_json::from_value::<PlaylistEntry>(envelope.data) {
                Ok(entry) => {
                    if let Some(callback) = self.callbacks.read().unwrap().playlist_entry.clone() {
                        callback(entry);
                    }
                }
                Err(error) => warn!("ignoring malformed playlist_entry message: {error}"),
            },
            "command" => match serde_json::from_value::<CommandData>(envelope.data) {
                Ok(command) => {
                    if let Some(callback) = self.callbacks.read().unwrap().command.clone() {
                        callback(command.command);
                    }
                }
                Err(error) => warn!("ignoring malformed command message: {error}"),
            },
            other => warn!("ignoring unrecognized websocket message type '{other}'"),
        }
    }

    fn emit_connection_lost(&self) {
        if let Some(callback) = self.callbacks.read().unwrap().connection_lost.clone() {
            callback();
        }
    }
}

fn is_auth_rejection(error: &tokio_tungstenite::tungstenite::Error) -> bool {
    use tokio_tungstenite::tungstenite::Error;
    matches!(
        error,
        Error::Http(response)
            if matches!(
                response.status().as_u16(),
                401 | 403
            )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn dispatch_routes_idle_messages() {
        let session = Session::new("ws://example.com".to_string(), Duration::from_secs(1));
        let fired = Arc::new(Mutex::new(false));
        let fired_clone = Arc::clone(&fired);
        session.on_idle(move || *fired_clone.lock().unwrap() = true);

        session.dispatch(r#"{"type": "idle"}"#);

        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn dispatch_routes_command_messages_with_raw_command_string() {
        let session = Session::new("ws://example.com".to_string(), Duration::from_secs(1));
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        session.on_command(move |command| *seen_clone.lock().unwrap() = Some(command));

        session.dispatch(r#"{"type": "command", "data": {"command": "skip"}}"#);

        assert_eq!(seen.lock().unwrap().as_deref(), Some("skip"));
    }

    #[test]
    fn dispatch_ignores_unknown_types() {
        let session = Session::new("ws://example.com".to_string(), Duration::from_secs(1));
        // Should not panic, and no callback is registered.
        session.dispatch(r#"{"type": "something_else", "data": {}}"#);
    }

    #[test]
    fn dispatch_ignores_malformed_json() {
        let session = Session::new("ws://example.com".to_string(), Duration::from_secs(1));
        session.dispatch("not json");
    }

    #[test]
    fn dispatch_routes_playlist_entry_messages() {
        let session = Session::new("ws://example.com".to_string(), Duration::from_secs(1));
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        session.on_playlist_entry(move |entry| *seen_clone.lock().unwrap() = Some(entry.id));

        session.dispatch(
            r#"{"type": "playlist_entry", "data": {"id": 42, "song": {"title": "t", "file_path": "a.mp4"}}}"#,
        );

        assert_eq!(*seen.lock().unwrap(), Some(42));
    }
}
