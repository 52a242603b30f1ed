//! VLC-backed [`Engine`].
//!
//! One shared `Instance`/`MediaPlayer`, media objects created per prepared
//! handle, VLC's own event manager forwarded into [`EngineEvent`]s. VLC
//! events don't carry a reference to the media they fired for, so identity
//! is recovered from the playing media's metadata: a handle id is written
//! into the first free of a handful of candidate meta slots at `prepare`
//! time (some containers pre-populate one slot), then read back from
//! whichever media is current when an event fires.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{error, warn};
use tokio::sync::mpsc;
use vlc::{Instance, Media, MediaPlayer, MediaPlayerAudioEx, Meta, TrackType};

use super::engine::{Engine, EngineError, EngineEvent, MediaHandle, MediaSpec};

const MINIMUM_VERSION: &str = "3.0.0";

/// Candidate meta slots to probe for a free one to stash our handle id in,
/// in order.
const META_SLOTS: [Meta; 10] = [
    Meta::Setting,
    Meta::TrackID,
    Meta::TrackTotal,
    Meta::DiscNumber,
    Meta::DiscTotal,
    Meta::Season,
    Meta::Episode,
    Meta::Rating,
    Meta::EncodedBy,
    Meta::Publisher,
];

pub struct VlcEngine {
    media_parameters: Vec<String>,
    instance: Option<Instance>,
    player: Option<MediaPlayer>,
    prepared: Mutex<HashMap<u64, Media>>,
    next_handle: AtomicU64,
}

impl VlcEngine {
    pub fn new(
        media_parameters: Vec<String>,
        mut instance_parameters: Vec<String>,
        fullscreen: bool,
    ) -> Self {
        if fullscreen {
            instance_parameters.push("--fullscreen".to_string());
        }
        Self {
            media_parameters,
            instance: Instance::with_args(Some(instance_parameters)),
            player: None,
            prepared: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn instance(&self) -> Result<&Instance, EngineError> {
        self.instance.as_ref().ok_or(EngineError::NotAvailable)
    }

    fn player(&self) -> Result<&MediaPlayer, EngineError> {
        self.player.as_ref().ok_or(EngineError::NotAvailable)
    }

    fn media_for(&self, handle: MediaHandle) -> Option<Media> {
        self.prepared.lock().unwrap().get(&handle.0).cloned()
    }

    fn tag_handle(media: &Media, handle: MediaHandle) {
        let value = handle.0.to_string();
        for slot in META_SLOTS {
            if media.get_meta(slot).map(|v| v.is_empty()).unwrap_or(true) {
                media.set_meta(slot, &value);
                return;
            }
        }
        warn!("no free metadata slot to tag media with handle {}", handle.0);
    }

    fn handle_of(media: &Media) -> Option<MediaHandle> {
        for slot in META_SLOTS {
            if let Some(value) = media.get_meta(slot) {
                if let Ok(id) = value.parse::<u64>() {
                    return Some(MediaHandle(id));
                }
            }
        }
        None
    }
}

impl Engine for VlcEngine {
    fn load(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<(), EngineError> {
        let version = self.version()?;
        if parse_major(&version) < parse_major(MINIMUM_VERSION) {
            return Err(EngineError::TooOld {
                found: version,
                minimum: MINIMUM_VERSION.to_string(),
            });
        }

        let instance = self.instance()?;
        let player = MediaPlayer::new(instance).ok_or(EngineError::NotAvailable)?;
        let event_manager = player.event_manager();

        let tx = events.clone();
        let player_for_playing = player.clone();
        event_manager
            .attach(vlc::EventType::MediaPlayerPlaying, move |_event, _| {
                if let Some(media) = player_for_playing.get_media() {
                    if let Some(handle) = VlcEngine::handle_of(&media) {
                        let _ = tx.send(EngineEvent::Playing(handle));
                    }
                }
            })
            .map_err(|()| EngineError::Other("couldn't attach MediaPlayerPlaying".into()))?;

        let tx = events.clone();
        let player_for_end = player.clone();
        event_manager
            .attach(vlc::EventType::MediaPlayerEndReached, move |_event, _| {
                if let Some(media) = player_for_end.get_media() {
                    if let Some(handle) = VlcEngine::handle_of(&media) {
                        let _ = tx.send(EngineEvent::EndReached(handle));
                    }
                }
            })
            .map_err(|()| EngineError::Other("couldn't attach MediaPlayerEndReached".into()))?;

        let tx = events.clone();
        let player_for_error = player.clone();
        event_manager
            .attach(
                vlc::EventType::MediaPlayerEncounteredError,
                move |_event, _| {
                    if let Some(media) = player_for_error.get_media() {
                        if let Some(handle) = VlcEngine::handle_of(&media) {
                            let _ = tx.send(EngineEvent::Error(
                                handle,
                                "unable to play current media".to_string(),
                            ));
                        }
                    }
                },
            )
            .map_err(|()| EngineError::Other("couldn't attach MediaPlayerEncounteredError".into()))?;

        let tx = events.clone();
        let player_for_paused = player.clone();
        event_manager
            .attach(vlc::EventType::MediaPlayerPaused, move |_event, _| {
                if let Some(media) = player_for_paused.get_media() {
                    if let Some(handle) = VlcEngine::handle_of(&media) {
                        let _ = tx.send(EngineEvent::PausedChanged(handle, true));
                    }
                }
            })
            .map_err(|()| EngineError::Other("couldn't attach MediaPlayerPaused".into()))?;

        let tx = events;
        let player_for_resumed = player.clone();
        event_manager
            .attach(vlc::EventType::MediaPlayerPlaying, move |_event, _| {
                if let Some(media) = player_for_resumed.get_media() {
                    if let Some(handle) = VlcEngine::handle_of(&media) {
                        let _ = tx.send(EngineEvent::PausedChanged(handle, false));
                    }
                }
            })
            .map_err(|()| EngineError::Other("couldn't attach resume tracking".into()))?;

        self.player = Some(player);
        Ok(())
    }

    fn version(&self) -> Result<String, EngineError> {
        Ok(vlc::version())
    }

    fn prepare(&mut self, spec: MediaSpec<'_>) -> Result<MediaHandle, EngineError> {
        let instance = self.instance()?;
        let media = Media::new_path(instance, spec.path).ok_or_else(|| {
            EngineError::Other(format!("couldn't open media {}", spec.path.display()))
        })?;

        for option in &self.media_parameters {
            media.add_option(option);
        }

        if let Some(subtitle_path) = spec.subtitle_path {
            media.add_option(&format!("sub-file={}", subtitle_path.display()));
        }
        if spec.disable_subtitle_autodetection {
            media.add_option("no-sub-autodetect-file");
        }

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = MediaHandle(id);
        Self::tag_handle(&media, handle);

        self.prepared.lock().unwrap().insert(id, media);

        Ok(handle)
    }

    fn play(&mut self, handle: MediaHandle) -> Result<(), EngineError> {
        let media = self
            .media_for(handle)
            .ok_or(EngineError::Other("unknown media handle".into()))?;
        let player = self.player()?;
        player.set_media(&media);
        player.play().map_err(|()| EngineError::Other("VLC refused to play".into()))
    }

    fn set_paused(&mut self, _handle: MediaHandle, paused: bool) -> Result<(), EngineError> {
        let player = self.player()?;
        if paused {
            player.pause();
        } else {
            player.play().map_err(|()| EngineError::Other("VLC refused to resume".into()))?;
        }
        Ok(())
    }

    fn seek(&mut self, _handle: MediaHandle, seconds: i64) -> Result<(), EngineError> {
        self.player()?.set_time(seconds.max(0) * 1000);
        Ok(())
    }

    fn get_timing(&self, _handle: MediaHandle) -> i64 {
        let Ok(player) = self.player() else { return 0 };
        match player.get_time() {
            Some(ms) if ms >= 0 => ms / 1000,
            _ => 0,
        }
    }

    fn duration(&self, _handle: MediaHandle) -> Option<i64> {
        let player = self.player().ok()?;
        match player.get_length() {
            Some(ms) if ms >= 0 => Some(ms / 1000),
            _ => None,
        }
    }

    fn audio_track_count(&self, handle: MediaHandle) -> usize {
        let Some(media) = self.media_for(handle) else { return 1 };
        media.parse();
        media
            .tracks()
            .map(|tracks| {
                tracks
                    .iter()
                    .filter(|t| t.track_type() == TrackType::Audio)
                    .count()
            })
            .unwrap_or(1)
    }

    fn select_audio_track(
        &mut self,
        _handle: MediaHandle,
        track_index: usize,
    ) -> Result<(), EngineError> {
        let player = self.player()?;
        let track_id = player
            .audio_track_description()
            .and_then(|tracks| tracks.get(track_index).map(|t| t.0))
            .unwrap_or(track_index as i32);
        player
            .set_audio_track(track_id)
            .map_err(|()| EngineError::Other("VLC refused to select audio track".into()))
    }

    fn add_audio_slave(&mut self, handle: MediaHandle, path: &Path) -> Result<(), EngineError> {
        let media = self
            .media_for(handle)
            .ok_or(EngineError::Other("unknown media handle".into()))?;
        let uri = format!("file://{}", path.display());
        if !media.add_slave(vlc::MediaSlaveType::Audio, 4, &uri) {
            error!("this build of VLC does not support media slaves");
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        if let Some(player) = &self.player {
            player.stop();
        }
        Ok(())
    }
}

fn parse_major(version: &str) -> u32 {
    version
        .split(['.', ' '])
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
