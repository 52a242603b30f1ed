//! Media Player Controller — the heart of the core.
//!
//! Drives the engine, owns the per-entry state machine, surfaces lifecycle
//! callbacks.

pub mod engine;
#[cfg(feature = "mpv")]
pub mod mpv;
#[cfg(feature = "vlc")]
pub mod vlc;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};

use crate::background::{BackgroundError, BackgroundProvider};
use crate::bus::Bus;
use crate::config::PlayerConfig;
use crate::media::MediaKind;
use crate::playlist::PlaylistEntry;
use crate::text_generator::{TextGenerator, TextGeneratorError};

pub use engine::{Engine, EngineError, EngineEvent, MediaHandle, MediaSpec};

const PLAYER_CLOSING_GRACE: Duration = Duration::from_secs(3);
const INSTRUMENTAL_EXTENSIONS: &[&str] = &["mp3", "ogg", "m4a", "flac", "wav"];
const SUBTITLE_EXTENSIONS: &[&str] = &["ass", "ssa"];

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("kara folder {0} does not exist")]
    KaraFolderNotFound(PathBuf),

    #[error("operation {op} is invalid in state {state:?}")]
    InvalidState {
        op: &'static str,
        state: PlaybackState,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    TextGenerator(#[from] TextGeneratorError),

    #[error(transparent)]
    Background(#[from] BackgroundError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The observable state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Empty,
    Idle,
    TransitionPending,
    TransitionPlaying,
    SongPending,
    SongPlaying,
}

/// Per-entry scratchpad, created in `set_playlist_entry`, cleared in
/// `clear_playlist_entry`. Never outlives its `PlaylistEntry`.
struct PlaylistEntryData {
    transition_media_handle: Option<MediaHandle>,
    song_media_handle: Option<MediaHandle>,
    audio_track_selector: Option<usize>,
    subtitle_path: Option<PathBuf>,
}

struct CurrentEntry {
    entry: PlaylistEntry,
    data: PlaylistEntryData,
    finished_reported: bool,
}

struct HandleInfo {
    kind: MediaKind,
    entry_id: i64,
}

type IdCallback = Arc<dyn Fn(i64) + Send + Sync>;
type TimingCallback = Arc<dyn Fn(i64, i64) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(i64, String) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    started_transition: Option<IdCallback>,
    started_song: Option<IdCallback>,
    could_not_play: Option<IdCallback>,
    finished: Option<IdCallback>,
    paused: Option<TimingCallback>,
    resumed: Option<TimingCallback>,
    updated_timing: Option<TimingCallback>,
    error: Option<ErrorCallback>,
}

struct Inner<E: Engine> {
    engine: E,
    state: PlaybackState,
    paused: bool,
    current: Option<CurrentEntry>,
    handles: HashMap<u64, HandleInfo>,
    idle_handle: Option<MediaHandle>,
}

/// Drives the engine and owns the per-entry state machine.
///
/// Callbacks are registered via `on_*` setters rather than a reference back
/// to the manager, breaking the Controller/Manager reference cycle: the
/// controller holds opaque function values, not a reference to the
/// manager's concrete type.
pub struct Controller<E: Engine> {
    inner: Mutex<Inner<E>>,
    callbacks: RwLock<Callbacks>,
    kara_folder: PathBuf,
    tempdir: PathBuf,
    config: PlayerConfig,
    text_generator: TextGenerator,
    backgrounds: BackgroundProvider,
    bus: Bus,
}

impl<E: Engine + 'static> Controller<E> {
    pub fn new(
        engine: E,
        bus: Bus,
        config: PlayerConfig,
        tempdir: PathBuf,
        text_generator: TextGenerator,
        backgrounds: BackgroundProvider,
    ) -> Self {
        let kara_folder = config.kara_folder.clone();
        Self {
            inner: Mutex::new(Inner {
                engine,
                state: PlaybackState::Empty,
                paused: false,
                current: None,
                handles: HashMap::new(),
                idle_handle: None,
            }),
            callbacks: RwLock::new(Callbacks::default()),
            kara_folder,
            tempdir,
            config,
            text_generator,
            backgrounds,
            bus,
        }
    }

    pub fn on_started_transition(&self, f: impl Fn(i64) + Send + Sync + 'static) {
        self.set_callback(|c| &mut c.started_transition, f);
    }

    pub fn on_started_song(&self, f: impl Fn(i64) + Send + Sync + 'static) {
        self.set_callback(|c| &mut c.started_song, f);
    }

    pub fn on_could_not_play(&self, f: impl Fn(i64) + Send + Sync + 'static) {
        self.set_callback(|c| &mut c.could_not_play, f);
    }

    pub fn on_finished(&self, f: impl Fn(i64) + Send + Sync + 'static) {
        self.set_callback(|c| &mut c.finished, f);
    }

    pub fn on_paused(&self, f: impl Fn(i64, i64) + Send + Sync + 'static) {
        self.set_timing_callback(|c| &mut c.paused, f);
    }

    pub fn on_resumed(&self, f: impl Fn(i64, i64) + Send + Sync + 'static) {
        self.set_timing_callback(|c| &mut c.resumed, f);
    }

    pub fn on_updated_timing(&self, f: impl Fn(i64, i64) + Send + Sync + 'static) {
        self.set_timing_callback(|c| &mut c.updated_timing, f);
    }

    pub fn on_error(&self, f: impl Fn(i64, String) + Send + Sync + 'static) {
        self.callbacks.write().unwrap().error = Some(Arc::new(f));
    }

    fn set_callback(
        &self,
        select: impl Fn(&mut Callbacks) -> &mut Option<IdCallback>,
        f: impl Fn(i64) + Send + Sync + 'static,
    ) {
        let mut guard = self.callbacks.write().unwrap();
        *select(&mut guard) = Some(Arc::new(f));
    }

    fn set_timing_callback(
        &self,
        select: impl Fn(&mut Callbacks) -> &mut Option<TimingCallback>,
        f: impl Fn(i64, i64) + Send + Sync + 'static,
    ) {
        let mut guard = self.callbacks.write().unwrap();
        *select(&mut guard) = Some(Arc::new(f));
    }

    /// Checks engine version, attaches callbacks, loads backgrounds and
    /// templates are already loaded by construction time; this wires the
    /// engine's event stream into the controller's own processing loop.
    pub async fn load(self: &Arc<Self>) -> Result<(), ControllerError> {
        if tokio::fs::metadata(&self.kara_folder).await.is_err() {
            return Err(ControllerError::KaraFolderNotFound(self.kara_folder.clone()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().await;
            inner.engine.load(tx)?;
        }

        let this = Arc::clone(self);
        self.bus.spawn_supervised::<_, std::convert::Infallible>(
            crate::bus::ErrorKind::MediaPlayer,
            async move {
                loop {
                    tokio::select! {
                        biased;
                        () = this.bus.stop.wait() => break,
                        event = rx.recv() => {
                            match event {
                                Some(event) => this.handle_engine_event(event).await,
                                None => break,
                            }
                        }
                    }
                }
                Ok(())
            },
        );

        Ok(())
    }

    /// Shows the idle background and subtitle "until further notice". A
    /// no-op if already idle, matching the engines' "if already playing
    /// idle, do nothing" behavior.
    pub async fn play_idle(&self) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.state, PlaybackState::Empty | PlaybackState::Idle) {
            warn!("play_idle: invalid in state {:?}", inner.state);
            return Ok(());
        }
        if inner.state == PlaybackState::Idle {
            return Ok(());
        }

        let idle_bg = self.backgrounds.resolve(MediaKind::Idle).await?;
        let idle_subtitle_path = self.tempdir.join("idle.ass");
        let engine_version = inner
            .engine
            .version()
            .unwrap_or_else(|_| "unknown".to_string());
        let mut context = tera::Context::new();
        context.insert(
            "notes",
            &vec![
                engine_version,
                format!("dakara-player {}", env!("CARGO_PKG_VERSION")),
            ],
        );
        self.text_generator
            .write(MediaKind::Idle, &context, &idle_subtitle_path)
            .await?;

        let idle_handle = inner.engine.prepare(MediaSpec {
            kind: MediaKind::Idle,
            path: &idle_bg,
            subtitle_path: Some(&idle_subtitle_path),
            disable_subtitle_autodetection: true,
        })?;
        inner.handles.insert(
            idle_handle.0,
            HandleInfo {
                kind: MediaKind::Idle,
                entry_id: 0,
            },
        );
        inner.idle_handle = Some(idle_handle);
        inner.state = PlaybackState::Idle;
        inner.engine.play(idle_handle)?;
        Ok(())
    }

    pub async fn set_playlist_entry(
        self: &Arc<Self>,
        entry: PlaylistEntry,
        autoplay: bool,
    ) -> Result<(), ControllerError> {
        // Held for the whole operation (including the file/template I/O
        // below) so that `set_playlist_entry` is fully serialized against
        // every other controller operation.
        let mut inner = self.inner.lock().await;

        if !matches!(inner.state, PlaybackState::Empty | PlaybackState::Idle) {
            warn!(
                "set_playlist_entry({}): invalid in state {:?}",
                entry.id, inner.state
            );
            return Ok(());
        }

        let song_path = self.kara_folder.join(&entry.song.file_path);
        if tokio::fs::metadata(&song_path).await.is_err() {
            info!("could not play entry {}: file not found", entry.id);
            drop(inner);
            self.emit_could_not_play(entry.id);
            self.emit_error(entry.id, "file not found".to_string());
            return Ok(());
        }

        let song_dir = song_path.parent().unwrap_or(Path::new("."));

        let instrumental_sidecar = if entry.use_instrumental {
            find_instrumental_sidecar(song_dir, &song_path).await
        } else {
            None
        };

        let subtitle_path = find_subtitle(song_dir, &song_path).await;

        let transition_bg = self.backgrounds.resolve(MediaKind::Transition).await?;
        let transition_subtitle_path = self.tempdir.join(format!("transition-{}.ass", entry.id));
        let mut context = tera::Context::new();
        context.insert("playlist_entry", &serde_json::json!({
            "id": entry.id,
            "song": { "title": &entry.song.title, "artists": &entry.song.artists },
            "owner": &entry.owner,
        }));
        context.insert("fade_in", &true);
        self.text_generator
            .write(MediaKind::Transition, &context, &transition_subtitle_path)
            .await?;

        if inner.state == PlaybackState::Idle {
            if let Some(idle_handle) = inner.idle_handle.take() {
                inner.handles.remove(&idle_handle.0);
            }
            inner.state = PlaybackState::Empty;
        }

        let transition_handle = inner.engine.prepare(MediaSpec {
            kind: MediaKind::Transition,
            path: &transition_bg,
            subtitle_path: Some(&transition_subtitle_path),
            disable_subtitle_autodetection: true,
        })?;
        inner.handles.insert(
            transition_handle.0,
            HandleInfo {
                kind: MediaKind::Transition,
                entry_id: entry.id,
            },
        );

        let song_handle = inner.engine.prepare(MediaSpec {
            kind: MediaKind::Song,
            path: &song_path,
            subtitle_path: subtitle_path.as_deref(),
            disable_subtitle_autodetection: subtitle_path.is_some(),
        })?;
        inner.handles.insert(
            song_handle.0,
            HandleInfo {
                kind: MediaKind::Song,
                entry_id: entry.id,
            },
        );

        let mut audio_track_selector = None;
        if let Some(sidecar) = &instrumental_sidecar {
            inner.engine.add_audio_slave(song_handle, sidecar)?;
        } else if entry.use_instrumental {
            if inner.engine.audio_track_count(song_handle) >= 2 {
                audio_track_selector = Some(1);
            } else {
                warn!(
                    "entry {}: use_instrumental requested but no sidecar or second track found; playing default track",
                    entry.id
                );
            }
        }

        let id = entry.id;
        inner.current = Some(CurrentEntry {
            entry,
            data: PlaylistEntryData {
                transition_media_handle: Some(transition_handle),
                song_media_handle: Some(song_handle),
                audio_track_selector,
                subtitle_path,
            },
            finished_reported: false,
        });
        inner.state = PlaybackState::TransitionPending;
        inner.paused = false;

        if autoplay {
            inner.engine.play(transition_handle)?;
        }

        debug!("prepared playlist entry {id}");
        Ok(())
    }

    pub async fn pause(&self, paused: bool) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().await;
        if !matches!(
            inner.state,
            PlaybackState::TransitionPlaying | PlaybackState::SongPlaying
        ) {
            warn!("pause({paused}): invalid in state {:?}", inner.state);
            return Ok(());
        }
        if inner.paused == paused {
            return Ok(());
        }

        let Some(current) = &inner.current else {
            return Ok(());
        };
        let handle = match inner.state {
            PlaybackState::TransitionPlaying => current.data.transition_media_handle,
            PlaybackState::SongPlaying => current.data.song_media_handle,
            _ => None,
        };
        let Some(handle) = handle else { return Ok(()) };

        inner.engine.set_paused(handle, paused)?;
        inner.paused = paused;
        let timing = inner.engine.get_timing(handle).max(0);
        let id = inner.current.as_ref().unwrap().entry.id;
        drop(inner);

        if paused {
            self.emit_paused(id, timing);
        } else {
            self.emit_resumed(id, timing);
        }
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().await;
        if inner.state != PlaybackState::SongPlaying {
            warn!("restart: invalid in state {:?}", inner.state);
            return Ok(());
        }
        let Some(handle) = inner.current.as_ref().and_then(|c| c.data.song_media_handle) else {
            return Ok(());
        };
        inner.engine.seek(handle, 0)?;
        let id = inner.current.as_ref().unwrap().entry.id;
        drop(inner);
        self.emit_updated_timing(id, 0);
        Ok(())
    }

    pub async fn rewind(&self) -> Result<(), ControllerError> {
        self.seek_relative(-(self.config.durations.rewind_fast_forward_duration as i64))
            .await
    }

    pub async fn fast_forward(&self) -> Result<(), ControllerError> {
        self.seek_relative(self.config.durations.rewind_fast_forward_duration as i64)
            .await
    }

    async fn seek_relative(&self, delta_seconds: i64) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().await;
        if inner.state != PlaybackState::SongPlaying {
            warn!("seek: invalid in state {:?}", inner.state);
            return Ok(());
        }
        let Some(handle) = inner.current.as_ref().and_then(|c| c.data.song_media_handle) else {
            return Ok(());
        };
        let current_timing = inner.engine.get_timing(handle).max(0);
        let mut new_timing = current_timing + delta_seconds;
        if new_timing < 0 {
            new_timing = 0;
        }
        if let Some(duration) = inner.engine.duration(handle) {
            new_timing = new_timing.min(duration.max(0));
        }
        inner.engine.seek(handle, new_timing)?;
        let id = inner.current.as_ref().unwrap().entry.id;
        drop(inner);
        self.emit_updated_timing(id, new_timing);
        Ok(())
    }

    pub async fn skip(&self) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().await;
        if !matches!(
            inner.state,
            PlaybackState::TransitionPlaying | PlaybackState::SongPlaying
        ) {
            warn!("skip: invalid in state {:?}", inner.state);
            return Ok(());
        }

        let Some(current) = inner.current.as_mut() else {
            return Ok(());
        };
        let id = current.entry.id;
        let already_finished = current.finished_reported;
        current.finished_reported = true;

        inner.handles.retain(|_, info| info.entry_id != id);
        inner.current = None;
        inner.state = PlaybackState::Empty;
        inner.paused = false;
        drop(inner);

        if !already_finished {
            self.emit_finished(id);
        }
        Ok(())
    }

    pub async fn get_timing(&self) -> i64 {
        let inner = self.inner.lock().await;
        match inner.state {
            PlaybackState::SongPlaying => {
                if let Some(handle) = inner.current.as_ref().and_then(|c| c.data.song_media_handle) {
                    inner.engine.get_timing(handle).max(0)
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Shuts the engine down. Real backends are expected to honor
    /// `PLAYER_CLOSING_GRACE` internally (blocking in `Engine::stop` for at
    /// most that long before giving up); this wrapper just logs if the call
    /// itself errors, since the grace period is the engine's responsibility
    /// per the opaque-capability boundary.
    pub async fn stop_player(&self) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().await;
        let deadline = tokio::time::Instant::now() + PLAYER_CLOSING_GRACE;
        if let Err(error) = inner.engine.stop() {
            warn!("engine reported an error while stopping: {error}");
        }
        if tokio::time::Instant::now() > deadline {
            warn!("engine did not acknowledge shutdown within the grace period");
        }
        inner.state = PlaybackState::Empty;
        inner.current = None;
        inner.idle_handle = None;
        Ok(())
    }

    async fn handle_engine_event(self: &Arc<Self>, event: EngineEvent) {
        match event {
            EngineEvent::Playing(handle) => self.on_engine_playing(handle).await,
            EngineEvent::EndReached(handle) => self.on_engine_end_reached(handle).await,
            EngineEvent::Error(handle, message) => self.on_engine_error(handle, message).await,
            EngineEvent::PausedChanged(handle, paused) => {
                self.on_engine_paused_changed(handle, paused).await
            }
        }
    }

    async fn on_engine_playing(self: &Arc<Self>, handle: MediaHandle) {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.handles.get(&handle.0) else { return };
        let kind = info.kind;
        let id = info.entry_id;

        match (inner.state, kind) {
            (PlaybackState::TransitionPending, MediaKind::Transition) => {
                inner.state = PlaybackState::TransitionPlaying;
                drop(inner);
                self.emit_started_transition(id);
            }
            (PlaybackState::SongPending, MediaKind::Song) => {
                let selector = inner
                    .current
                    .as_ref()
                    .and_then(|c| c.data.audio_track_selector);
                if let Some(track) = selector {
                    if let Err(error) = inner.engine.select_audio_track(handle, track) {
                        warn!("couldn't select instrumental track for entry {id}: {error}");
                    }
                }
                inner.state = PlaybackState::SongPlaying;
                drop(inner);
                self.emit_started_song(id);
            }
            (PlaybackState::Idle, MediaKind::Idle) => {
                debug!("playing idle screen");
            }
            _ => debug!("ignoring stale playing event for entry {id} ({kind})"),
        }
    }

    async fn on_engine_end_reached(self: &Arc<Self>, handle: MediaHandle) {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.handles.get(&handle.0) else { return };
        let kind = info.kind;
        let id = info.entry_id;

        match (inner.state, kind) {
            (PlaybackState::TransitionPlaying, MediaKind::Transition) => {
                let song_handle = inner.current.as_ref().and_then(|c| c.data.song_media_handle);
                inner.state = PlaybackState::SongPending;
                if let Some(song_handle) = song_handle {
                    if let Err(error) = inner.engine.play(song_handle) {
                        warn!("couldn't start song for entry {id}: {error}");
                    }
                }
            }
            (PlaybackState::SongPlaying, MediaKind::Song) => {
                let already_finished = inner
                    .current
                    .as_ref()
                    .map(|c| c.finished_reported)
                    .unwrap_or(true);
                if let Some(current) = inner.current.as_mut() {
                    current.finished_reported = true;
                }
                inner.handles.retain(|_, info| info.entry_id != id);
                inner.current = None;
                inner.state = PlaybackState::Empty;
                inner.paused = false;
                drop(inner);
                if !already_finished {
                    self.emit_finished(id);
                }
            }
            (PlaybackState::Idle, MediaKind::Idle) => {
                // Idle plays with an effectively infinite duration, but loop
                // it defensively in case the engine still reports an end.
                if let Err(error) = inner.engine.play(handle) {
                    warn!("couldn't restart idle screen: {error}");
                }
            }
            _ => debug!("ignoring stale end-reached event for entry {id} ({kind})"),
        }
    }

    async fn on_engine_error(self: &Arc<Self>, handle: MediaHandle, message: String) {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.handles.get(&handle.0) else { return };
        let id = info.entry_id;

        let still_current = inner.current.as_ref().map(|c| c.entry.id) == Some(id);
        if !still_current {
            return;
        }

        let already_finished = inner
            .current
            .as_ref()
            .map(|c| c.finished_reported)
            .unwrap_or(true);
        if let Some(current) = inner.current.as_mut() {
            current.finished_reported = true;
        }
        inner.handles.retain(|_, info| info.entry_id != id);
        inner.current = None;
        inner.state = PlaybackState::Empty;
        inner.paused = false;
        drop(inner);

        self.emit_error(id, message);
        if !already_finished {
            self.emit_finished(id);
        }
    }

    async fn on_engine_paused_changed(&self, handle: MediaHandle, paused: bool) {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.handles.get(&handle.0) else { return };
        let id = info.entry_id;

        if !matches!(
            inner.state,
            PlaybackState::TransitionPlaying | PlaybackState::SongPlaying
        ) {
            return;
        }
        if inner.paused == paused {
            return;
        }
        inner.paused = paused;
        let timing = inner.engine.get_timing(handle).max(0);
        drop(inner);

        if paused {
            self.emit_paused(id, timing);
        } else {
            self.emit_resumed(id, timing);
        }
    }

    fn emit_started_transition(&self, id: i64) {
        if let Some(f) = &self.callbacks.read().unwrap().started_transition {
            f(id);
        }
    }

    fn emit_started_song(&self, id: i64) {
        if let Some(f) = &self.callbacks.read().unwrap().started_song {
            f(id);
        }
    }

    fn emit_could_not_play(&self, id: i64) {
        if let Some(f) = &self.callbacks.read().unwrap().could_not_play {
            f(id);
        }
    }

    fn emit_finished(&self, id: i64) {
        if let Some(f) = &self.callbacks.read().unwrap().finished {
            f(id);
        }
    }

    fn emit_paused(&self, id: i64, timing: i64) {
        if let Some(f) = &self.callbacks.read().unwrap().paused {
            f(id, timing);
        }
    }

    fn emit_resumed(&self, id: i64, timing: i64) {
        if let Some(f) = &self.callbacks.read().unwrap().resumed {
            f(id, timing);
        }
    }

    fn emit_updated_timing(&self, id: i64, timing: i64) {
        if let Some(f) = &self.callbacks.read().unwrap().updated_timing {
            f(id, timing);
        }
    }

    fn emit_error(&self, id: i64, message: String) {
        if let Some(f) = &self.callbacks.read().unwrap().error {
            f(id, message);
        }
    }
}

async fn find_instrumental_sidecar(song_dir: &Path, song_path: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(song_dir).await.ok()?;
    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path == song_path {
            continue;
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if INSTRUMENTAL_EXTENSIONS.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)) {
                candidates.push(path);
            }
        }
    }
    if candidates.len() == 1 {
        candidates.pop()
    } else {
        None
    }
}

async fn find_subtitle(song_dir: &Path, song_path: &Path) -> Option<PathBuf> {
    let stem = song_path.file_stem()?.to_str()?;
    for ext in SUBTITLE_EXTENSIONS {
        let candidate = song_dir.join(format!("{stem}.{ext}"));
        if tokio::fs::metadata(&candidate).await.is_ok() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::Backgrounds;
    use crate::config::Templates;
    use crate::controller::engine::mock::MockEngine;
    use crate::playlist::{PlaylistEntry, Song};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        started_transition: Vec<i64>,
        started_song: Vec<i64>,
        could_not_play: Vec<i64>,
        finished: Vec<i64>,
        paused: Vec<(i64, i64)>,
        resumed: Vec<(i64, i64)>,
        updated_timing: Vec<(i64, i64)>,
        errors: Vec<(i64, String)>,
    }

    struct Fixture {
        controller: Arc<Controller<MockEngine>>,
        recorder: Arc<StdMutex<Recorder>>,
        _kara: tempfile::TempDir,
        _backgrounds: tempfile::TempDir,
        _tempdir: tempfile::TempDir,
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn build() -> Fixture {
        let kara = tempfile::tempdir().unwrap();
        tokio::fs::write(kara.path().join("s.mkv"), b"fake").await.unwrap();

        let templates_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(templates_dir.path().join("idle.ass"), "idle").await.unwrap();
        tokio::fs::write(
            templates_dir.path().join("transition.ass"),
            "transition {{ playlist_entry.id }}",
        )
        .await
        .unwrap();

        let backgrounds_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(backgrounds_dir.path().join("idle.png"), b"").await.unwrap();
        tokio::fs::write(backgrounds_dir.path().join("transition.png"), b"")
            .await
            .unwrap();

        let tempdir = tempfile::tempdir().unwrap();

        let text_generator = TextGenerator::load(&Templates::default(), templates_dir.path())
            .await
            .unwrap();
        let backgrounds = BackgroundProvider::new(
            Backgrounds::default(),
            backgrounds_dir.path().to_path_buf(),
        );

        let config = PlayerConfig {
            kara_folder: kara.path().to_path_buf(),
            ..Default::default()
        };

        let (bus, _drain) = Bus::new();
        let controller = Arc::new(Controller::new(
            MockEngine::default(),
            bus,
            config,
            tempdir.path().to_path_buf(),
            text_generator,
            backgrounds,
        ));

        let recorder = Arc::new(StdMutex::new(Recorder::default()));

        {
            let r = recorder.clone();
            controller.on_started_transition(move |id| r.lock().unwrap().started_transition.push(id));
        }
        {
            let r = recorder.clone();
            controller.on_started_song(move |id| r.lock().unwrap().started_song.push(id));
        }
        {
            let r = recorder.clone();
            controller.on_could_not_play(move |id| r.lock().unwrap().could_not_play.push(id));
        }
        {
            let r = recorder.clone();
            controller.on_finished(move |id| r.lock().unwrap().finished.push(id));
        }
        {
            let r = recorder.clone();
            controller.on_paused(move |id, t| r.lock().unwrap().paused.push((id, t)));
        }
        {
            let r = recorder.clone();
            controller.on_resumed(move |id, t| r.lock().unwrap().resumed.push((id, t)));
        }
        {
            let r = recorder.clone();
            controller.on_updated_timing(move |id, t| r.lock().unwrap().updated_timing.push((id, t)));
        }
        {
            let r = recorder.clone();
            controller.on_error(move |id, msg| r.lock().unwrap().errors.push((id, msg)));
        }

        controller.load().await.unwrap();

        Fixture {
            controller,
            recorder,
            _kara: kara,
            _backgrounds: backgrounds_dir,
            _tempdir: tempdir,
        }
    }

    fn entry(id: i64, file_path: &str, use_instrumental: bool) -> PlaylistEntry {
        PlaylistEntry {
            id,
            song: Song {
                title: "S".into(),
                file_path: file_path.into(),
                artists: vec![],
                works: vec![],
                extra: Default::default(),
            },
            owner: "tester".into(),
            use_instrumental,
        }
    }

    async fn transition_handle(controller: &Controller<MockEngine>) -> MediaHandle {
        controller
            .inner
            .lock()
            .await
            .current
            .as_ref()
            .unwrap()
            .data
            .transition_media_handle
            .unwrap()
    }

    async fn song_handle(controller: &Controller<MockEngine>) -> MediaHandle {
        controller
            .inner
            .lock()
            .await
            .current
            .as_ref()
            .unwrap()
            .data
            .song_media_handle
            .unwrap()
    }

    async fn fire_playing(controller: &Controller<MockEngine>, handle: MediaHandle) {
        controller.inner.lock().await.engine.fire_playing(handle);
        settle().await;
    }

    async fn fire_end_reached(controller: &Controller<MockEngine>, handle: MediaHandle) {
        controller.inner.lock().await.engine.fire_end_reached(handle);
        settle().await;
    }

    #[tokio::test]
    async fn happy_path_emits_transition_then_song_then_finished() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller
            .set_playlist_entry(entry(42, "s.mkv", false), true)
            .await
            .unwrap();

        let transition = transition_handle(controller).await;
        fire_playing(controller, transition).await;
        assert_eq!(fixture.recorder.lock().unwrap().started_transition, vec![42]);

        fire_end_reached(controller, transition).await;

        let song = song_handle(controller).await;
        fire_playing(controller, song).await;
        assert_eq!(fixture.recorder.lock().unwrap().started_song, vec![42]);

        fire_end_reached(controller, song).await;
        assert_eq!(fixture.recorder.lock().unwrap().finished, vec![42]);
    }

    #[tokio::test]
    async fn missing_file_reports_could_not_play_and_error_only() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller
            .set_playlist_entry(entry(42, "missing.mkv", false), true)
            .await
            .unwrap();

        let recorder = fixture.recorder.lock().unwrap();
        assert_eq!(recorder.could_not_play, vec![42]);
        assert_eq!(recorder.errors, vec![(42, "file not found".to_string())]);
        assert!(recorder.started_transition.is_empty());
        assert!(recorder.started_song.is_empty());
        assert!(recorder.finished.is_empty());
    }

    #[tokio::test]
    async fn pause_is_idempotent() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller
            .set_playlist_entry(entry(42, "s.mkv", false), true)
            .await
            .unwrap();
        let transition = transition_handle(controller).await;
        fire_playing(controller, transition).await;
        fire_end_reached(controller, transition).await;
        let song = song_handle(controller).await;
        fire_playing(controller, song).await;

        {
            let mut inner = controller.inner.lock().await;
            inner.engine.set_timing(song, 5);
        }

        controller.pause(true).await.unwrap();
        controller.pause(true).await.unwrap();
        controller.pause(false).await.unwrap();

        let recorder = fixture.recorder.lock().unwrap();
        assert_eq!(recorder.paused, vec![(42, 5)]);
        assert_eq!(recorder.resumed, vec![(42, 5)]);
    }

    #[tokio::test]
    async fn fast_forward_clamps_to_duration() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller
            .set_playlist_entry(entry(44, "s.mkv", false), true)
            .await
            .unwrap();
        let transition = transition_handle(controller).await;
        fire_playing(controller, transition).await;
        fire_end_reached(controller, transition).await;
        let song = song_handle(controller).await;
        fire_playing(controller, song).await;

        {
            let mut inner = controller.inner.lock().await;
            inner.engine.set_timing(song, 95);
            inner.engine.set_duration(song, 100);
        }

        controller.fast_forward().await.unwrap();

        let inner = controller.inner.lock().await;
        assert_eq!(inner.engine.seeks.last(), Some(&(song, 100)));
    }

    #[tokio::test]
    async fn rewind_clamps_to_zero() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller
            .set_playlist_entry(entry(45, "s.mkv", false), true)
            .await
            .unwrap();
        let transition = transition_handle(controller).await;
        fire_playing(controller, transition).await;
        fire_end_reached(controller, transition).await;
        let song = song_handle(controller).await;
        fire_playing(controller, song).await;

        {
            let mut inner = controller.inner.lock().await;
            inner.engine.set_timing(song, 5);
        }

        controller.rewind().await.unwrap();

        let inner = controller.inner.lock().await;
        assert_eq!(inner.engine.seeks.last(), Some(&(song, 0)));
    }

    #[tokio::test]
    async fn skip_during_transition_finishes_without_starting_song() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller
            .set_playlist_entry(entry(43, "s.mkv", false), true)
            .await
            .unwrap();
        let transition = transition_handle(controller).await;
        fire_playing(controller, transition).await;

        controller.skip().await.unwrap();

        let recorder = fixture.recorder.lock().unwrap();
        assert_eq!(recorder.finished, vec![43]);
        assert!(recorder.started_song.is_empty());
    }

    #[tokio::test]
    async fn instrumental_via_second_track_selects_track_after_started_song() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller
            .set_playlist_entry(entry(7, "s.mkv", true), true)
            .await
            .unwrap();
        let transition = transition_handle(controller).await;
        let song = song_handle(controller).await;

        {
            let mut inner = controller.inner.lock().await;
            inner.engine.set_track_count(song, 2);
        }

        fire_playing(controller, transition).await;
        fire_end_reached(controller, transition).await;
        fire_playing(controller, song).await;

        assert_eq!(fixture.recorder.lock().unwrap().started_song, vec![7]);
        let inner = controller.inner.lock().await;
        assert_eq!(inner.engine.selected_tracks, vec![(song, 1)]);
    }

    #[tokio::test]
    async fn play_idle_prepares_and_plays_idle_media_once() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller.play_idle().await.unwrap();
        controller.play_idle().await.unwrap();

        let inner = controller.inner.lock().await;
        assert_eq!(inner.state, PlaybackState::Idle);
        assert_eq!(inner.engine.prepared.len(), 1);
        assert_eq!(inner.engine.played.len(), 1);
    }

    #[tokio::test]
    async fn idle_end_reached_loops_the_idle_screen() {
        let fixture = build().await;
        let controller = &fixture.controller;

        controller.play_idle().await.unwrap();
        let idle = controller.inner.lock().await.idle_handle.unwrap();

        controller.inner.lock().await.engine.fire_end_reached(idle);
        settle().await;

        let inner = controller.inner.lock().await;
        assert_eq!(inner.state, PlaybackState::Idle);
        assert_eq!(inner.engine.played, vec![idle, idle]);
    }
}
