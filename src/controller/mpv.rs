//! mpv-backed [`Engine`].
//!
//! mpv has no object representing "the media that is playing", only the
//! path of the current file and a playlist that sheds entries as they
//! finish, so identity is recovered by comparing mpv's `path` property
//! against the paths handed to `prepare`.
//!
//! mpv delivers events through a poll loop (`mpv_wait_event`), not
//! callbacks, so `load` leaks the `Mpv` handle to get a `'static`
//! reference and spawns a dedicated OS thread that owns the event
//! context for the life of the process.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::sync::mpsc;

use libmpv2::events::{Event as MpvEvent, EndFileReason, PropertyData};
use libmpv2::{Format, Mpv};

use super::engine::{Engine, EngineError, EngineEvent, MediaHandle, MediaSpec};
use crate::media::MediaKind;

struct PreparedMpv {
    path: PathBuf,
    kind: MediaKind,
    subtitle_path: Option<PathBuf>,
    audio_path: Option<PathBuf>,
}

pub struct MpvEngine {
    options: BTreeMap<String, String>,
    fullscreen: bool,
    mpv: Option<&'static Mpv>,
    prepared: Mutex<HashMap<u64, PreparedMpv>>,
    path_index: Arc<Mutex<HashMap<PathBuf, (MediaHandle, MediaKind)>>>,
    next_handle: AtomicU64,
    running: Arc<AtomicBool>,
}

impl MpvEngine {
    pub fn new(options: BTreeMap<String, String>, fullscreen: bool) -> Self {
        Self {
            options,
            fullscreen,
            mpv: None,
            prepared: Mutex::new(HashMap::new()),
            path_index: Arc::new(Mutex::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn mpv(&self) -> Result<&'static Mpv, EngineError> {
        self.mpv.ok_or(EngineError::NotAvailable)
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Engine for MpvEngine {
    fn load(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<(), EngineError> {
        let mpv = Mpv::new().map_err(|error| EngineError::Other(error.to_string()))?;

        for (key, value) in &self.options {
            if let Err(error) = mpv.set_property(key.as_str(), value.as_str()) {
                warn!("unable to set mpv option '{key}' to '{value}': {error}");
            }
        }

        let _ = mpv.set_property("force-window", "immediate");
        let _ = mpv.set_property("input-default-bindings", "no");
        let _ = mpv.set_property("osc", "no");
        let _ = mpv.set_property("osd-level", 0i64);
        let _ = mpv.set_property("title", "Dakara player mpv");
        if self.fullscreen {
            let _ = mpv.set_property("fullscreen", "yes");
        }

        let mpv: &'static Mpv = Box::leak(Box::new(mpv));
        self.mpv = Some(mpv);

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let path_index = Arc::clone(&self.path_index);

        std::thread::spawn(move || {
            let mut ctx = mpv.create_event_context();
            let _ = ctx.observe_property("pause", Format::Flag, 0);

            while running.load(Ordering::SeqCst) {
                let Some(event) = ctx.wait_event(0.25) else { continue };
                let Ok(event) = event else { continue };

                match event {
                    MpvEvent::EndFile(reason) => {
                        if reason != EndFileReason::Eof {
                            continue;
                        }
                        if let Some(handle) = current_handle(mpv, &path_index) {
                            let _ = events.send(EngineEvent::EndReached(handle));
                        }
                    }
                    MpvEvent::FileLoaded => {
                        if let Some(handle) = current_handle(mpv, &path_index) {
                            let _ = events.send(EngineEvent::Playing(handle));
                        }
                    }
                    MpvEvent::PropertyChange {
                        name: "pause",
                        change: PropertyData::Flag(paused),
                        ..
                    } => {
                        if let Some(handle) = current_handle(mpv, &path_index) {
                            let _ = events.send(EngineEvent::PausedChanged(handle, paused));
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(())
    }

    fn version(&self) -> Result<String, EngineError> {
        Ok(format!("mpv {}", Mpv::version()))
    }

    fn prepare(&mut self, spec: MediaSpec<'_>) -> Result<MediaHandle, EngineError> {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = MediaHandle(id);
        let path = spec.path.to_path_buf();

        self.path_index
            .lock()
            .unwrap()
            .insert(path.clone(), (handle, spec.kind));

        self.prepared.lock().unwrap().insert(
            id,
            PreparedMpv {
                path,
                kind: spec.kind,
                subtitle_path: spec.subtitle_path.map(Path::to_path_buf),
                audio_path: None,
            },
        );

        Ok(handle)
    }

    fn play(&mut self, handle: MediaHandle) -> Result<(), EngineError> {
        let mpv = self.mpv()?;
        let (path, subtitle_path, audio_path) = {
            let prepared = self.prepared.lock().unwrap();
            let media = prepared
                .get(&handle.0)
                .ok_or(EngineError::Other("unknown media handle".into()))?;
            (
                media.path.clone(),
                media.subtitle_path.clone(),
                media.audio_path.clone(),
            )
        };

        mpv.command("loadfile", &[&path.to_string_lossy(), "replace"])
            .map_err(|error| EngineError::Other(error.to_string()))?;

        if let Some(subtitle_path) = subtitle_path {
            let _ = mpv.command("sub-add", &[&subtitle_path.to_string_lossy(), "select"]);
        }
        if let Some(audio_path) = audio_path {
            let _ = mpv.command("audio-add", &[&audio_path.to_string_lossy(), "select"]);
        }

        let _ = mpv.set_property("pause", false);
        Ok(())
    }

    fn set_paused(&mut self, _handle: MediaHandle, paused: bool) -> Result<(), EngineError> {
        self.mpv()?
            .set_property("pause", paused)
            .map_err(|error| EngineError::Other(error.to_string()))
    }

    fn seek(&mut self, _handle: MediaHandle, seconds: i64) -> Result<(), EngineError> {
        self.mpv()?
            .set_property("time-pos", seconds.max(0) as f64)
            .map_err(|error| EngineError::Other(error.to_string()))
    }

    fn get_timing(&self, _handle: MediaHandle) -> i64 {
        let Ok(mpv) = self.mpv() else { return 0 };
        mpv.get_property::<f64>("time-pos").unwrap_or(0.0).max(0.0) as i64
    }

    fn duration(&self, _handle: MediaHandle) -> Option<i64> {
        let mpv = self.mpv().ok()?;
        mpv.get_property::<f64>("duration")
            .ok()
            .filter(|seconds| *seconds >= 0.0)
            .map(|seconds| seconds as i64)
    }

    /// mpv cannot inspect a file's tracks before loading it, unlike VLC's
    /// `Media::parse`. `prepare` is called well before the song starts
    /// playing, so the honest answer here is "unknown, might have a second
    /// track" rather than a real count: mirroring `mpv.py`'s
    /// `manage_instrumental`, which requests track 2 unconditionally and
    /// lets mpv silently ignore the request if it doesn't exist.
    fn audio_track_count(&self, handle: MediaHandle) -> usize {
        let Ok(mpv) = self.mpv() else { return 1 };
        let loaded_path = mpv.get_property::<String>("path").ok().map(PathBuf::from);
        let prepared = self.prepared.lock().unwrap();
        let Some(media) = prepared.get(&handle.0) else {
            return 1;
        };

        if loaded_path.as_deref() != Some(media.path.as_path()) {
            return if media.kind == MediaKind::Song { 2 } else { 1 };
        }

        let count = mpv.get_property::<i64>("track-list/count").unwrap_or(0);
        let mut audio_tracks = 0;
        for i in 0..count {
            let kind = mpv
                .get_property::<String>(&format!("track-list/{i}/type"))
                .unwrap_or_default();
            if kind == "audio" {
                audio_tracks += 1;
            }
        }
        audio_tracks.max(1)
    }

    fn select_audio_track(
        &mut self,
        _handle: MediaHandle,
        track_index: usize,
    ) -> Result<(), EngineError> {
        self.mpv()?
            .set_property("aid", (track_index + 1) as i64)
            .map_err(|error| EngineError::Other(error.to_string()))
    }

    fn add_audio_slave(&mut self, handle: MediaHandle, path: &Path) -> Result<(), EngineError> {
        let mut prepared = self.prepared.lock().unwrap();
        let media = prepared
            .get_mut(&handle.0)
            .ok_or(EngineError::Other("unknown media handle".into()))?;
        media.audio_path = Some(path.to_path_buf());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        if let Some(mpv) = self.mpv {
            let _ = mpv.command("quit", &[]);
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn current_handle(
    mpv: &Mpv,
    path_index: &Mutex<HashMap<PathBuf, (MediaHandle, MediaKind)>>,
) -> Option<MediaHandle> {
    let path = mpv.get_property::<String>("path").ok()?;
    path_index
        .lock()
        .unwrap()
        .get(&PathBuf::from(path))
        .map(|(handle, _)| *handle)
}
