//! The `Engine` trait: the opaque capability the controller drives.
//!
//! The real VLC/mpv C API / IPC is out of scope for this spec; this trait
//! names only the surface the controller needs, so the state machine in
//! `controller::mod` can be built and tested (via [`MockEngine`]) without
//! ever touching a real media library.
//!
//! Engine callbacks fire on engine-internal threads in the real backends;
//! to keep the controller callback-safe, an engine never calls back into
//! the controller directly. Instead it reports [`EngineEvent`]s onto a
//! channel the controller owns and drains on its own task.

use std::path::Path;

use tokio::sync::mpsc;

use crate::media::MediaKind;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("media player engine is not available")]
    NotAvailable,

    #[error("media player engine version {found} is older than the minimum supported {minimum}")]
    TooOld { found: String, minimum: String },

    #[error("media player engine error: {0}")]
    Other(String),
}

/// Opaque, copyable identifier minted by the engine for a prepared media
/// object. The controller never interprets its bits, only uses it as a map
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaHandle(pub u64);

/// Events the engine reports towards the controller.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Playing(MediaHandle),
    EndReached(MediaHandle),
    Error(MediaHandle, String),
    PausedChanged(MediaHandle, bool),
}

/// What to prepare: a media file plus the overlay/track choices the
/// controller has already resolved.
pub struct MediaSpec<'a> {
    pub kind: MediaKind,
    pub path: &'a Path,
    pub subtitle_path: Option<&'a Path>,
    pub disable_subtitle_autodetection: bool,
}

/// The capability the controller drives. Implementations must not block the
/// calling task for long; anything slow happens on the engine's own
/// threads, reported back via [`EngineEvent`].
pub trait Engine: Send {
    /// Checks the engine is installed and meets the minimum supported
    /// version, attaches event callbacks that forward into `events`.
    fn load(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<(), EngineError>;

    fn version(&self) -> Result<String, EngineError>;

    /// Prepares (but does not necessarily start) a media object.
    fn prepare(&mut self, spec: MediaSpec<'_>) -> Result<MediaHandle, EngineError>;

    fn play(&mut self, handle: MediaHandle) -> Result<(), EngineError>;

    fn set_paused(&mut self, handle: MediaHandle, paused: bool) -> Result<(), EngineError>;

    /// Seeks to an absolute position, in seconds, clamped by the caller.
    fn seek(&mut self, handle: MediaHandle, seconds: i64) -> Result<(), EngineError>;

    /// Current position in seconds. Negative engine timings (some engines
    /// return -1 before the first frame) are the caller's responsibility to
    /// clamp to 0.
    fn get_timing(&self, handle: MediaHandle) -> i64;

    /// Total length in seconds, if the engine knows it yet. `None` before
    /// the engine has determined the media's length (e.g. right after
    /// `prepare`, before playback starts).
    fn duration(&self, handle: MediaHandle) -> Option<i64>;

    fn audio_track_count(&self, handle: MediaHandle) -> usize;

    fn select_audio_track(&mut self, handle: MediaHandle, track_index: usize) -> Result<(), EngineError>;

    /// Adds a sidecar audio file as an extra track on an already-prepared
    /// media object (VLC: "slave"; mpv: `audio-add`).
    fn add_audio_slave(&mut self, handle: MediaHandle, path: &Path) -> Result<(), EngineError>;

    /// Best-effort shutdown; callers apply their own grace-period timeout.
    fn stop(&mut self) -> Result<(), EngineError>;
}

/// Forwards to the boxed implementation, so the supervisor can pick between
/// `VlcEngine`/`MpvEngine` at runtime (from `player.engine`) and hand the
/// controller a single concrete type regardless of which feature built it.
impl Engine for Box<dyn Engine> {
    fn load(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<(), EngineError> {
        (**self).load(events)
    }

    fn version(&self) -> Result<String, EngineError> {
        (**self).version()
    }

    fn prepare(&mut self, spec: MediaSpec<'_>) -> Result<MediaHandle, EngineError> {
        (**self).prepare(spec)
    }

    fn play(&mut self, handle: MediaHandle) -> Result<(), EngineError> {
        (**self).play(handle)
    }

    fn set_paused(&mut self, handle: MediaHandle, paused: bool) -> Result<(), EngineError> {
        (**self).set_paused(handle, paused)
    }

    fn seek(&mut self, handle: MediaHandle, seconds: i64) -> Result<(), EngineError> {
        (**self).seek(handle, seconds)
    }

    fn get_timing(&self, handle: MediaHandle) -> i64 {
        (**self).get_timing(handle)
    }

    fn duration(&self, handle: MediaHandle) -> Option<i64> {
        (**self).duration(handle)
    }

    fn audio_track_count(&self, handle: MediaHandle) -> usize {
        (**self).audio_track_count(handle)
    }

    fn select_audio_track(&mut self, handle: MediaHandle, track_index: usize) -> Result<(), EngineError> {
        (**self).select_audio_track(handle, track_index)
    }

    fn add_audio_slave(&mut self, handle: MediaHandle, path: &Path) -> Result<(), EngineError> {
        (**self).add_audio_slave(handle, path)
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        (**self).stop()
    }
}

/// A deterministic test double. Tests fire events on demand via
/// `fire_playing`/`fire_end_reached`/etc. and inspect calls via the public
/// `Vec`s.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    pub struct MockEngine {
        events: Option<mpsc::UnboundedSender<EngineEvent>>,
        next_handle: AtomicU64,
        pub prepared: Vec<(MediaHandle, MediaKind)>,
        pub played: Vec<MediaHandle>,
        pub paused: Vec<(MediaHandle, bool)>,
        pub seeks: Vec<(MediaHandle, i64)>,
        pub selected_tracks: Vec<(MediaHandle, usize)>,
        pub audio_slaves: Vec<(MediaHandle, std::path::PathBuf)>,
        pub stopped: bool,
        pub track_counts: std::collections::HashMap<u64, usize>,
        pub timings: std::collections::HashMap<u64, i64>,
        pub durations: std::collections::HashMap<u64, i64>,
        pub fail_prepare: bool,
    }

    impl Default for MockEngine {
        fn default() -> Self {
            Self {
                events: None,
                next_handle: AtomicU64::new(1),
                prepared: Vec::new(),
                played: Vec::new(),
                paused: Vec::new(),
                seeks: Vec::new(),
                selected_tracks: Vec::new(),
                audio_slaves: Vec::new(),
                stopped: false,
                track_counts: std::collections::HashMap::new(),
                timings: std::collections::HashMap::new(),
                durations: std::collections::HashMap::new(),
                fail_prepare: false,
            }
        }
    }

    impl MockEngine {
        pub fn fire_playing(&self, handle: MediaHandle) {
            self.emit(EngineEvent::Playing(handle));
        }

        pub fn fire_end_reached(&self, handle: MediaHandle) {
            self.emit(EngineEvent::EndReached(handle));
        }

        pub fn fire_error(&self, handle: MediaHandle, message: impl Into<String>) {
            self.emit(EngineEvent::Error(handle, message.into()));
        }

        pub fn fire_paused_changed(&self, handle: MediaHandle, paused: bool) {
            self.emit(EngineEvent::PausedChanged(handle, paused));
        }

        fn emit(&self, event: EngineEvent) {
            if let Some(tx) = &self.events {
                let _ = tx.send(event);
            }
        }

        pub fn set_track_count(&mut self, handle: MediaHandle, count: usize) {
            self.track_counts.insert(handle.0, count);
        }

        pub fn set_timing(&mut self, handle: MediaHandle, seconds: i64) {
            self.timings.insert(handle.0, seconds);
        }

        pub fn set_duration(&mut self, handle: MediaHandle, seconds: i64) {
            self.durations.insert(handle.0, seconds);
        }
    }

    impl Engine for MockEngine {
        fn load(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<(), EngineError> {
            self.events = Some(events);
            Ok(())
        }

        fn version(&self) -> Result<String, EngineError> {
            Ok("mock-1.0".to_string())
        }

        fn prepare(&mut self, spec: MediaSpec<'_>) -> Result<MediaHandle, EngineError> {
            if self.fail_prepare {
                return Err(EngineError::Other("prepare failed".into()));
            }
            let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
            let handle = MediaHandle(id);
            self.prepared.push((handle, spec.kind));
            Ok(handle)
        }

        fn play(&mut self, handle: MediaHandle) -> Result<(), EngineError> {
            self.played.push(handle);
            Ok(())
        }

        fn set_paused(&mut self, handle: MediaHandle, paused: bool) -> Result<(), EngineError> {
            self.paused.push((handle, paused));
            Ok(())
        }

        fn seek(&mut self, handle: MediaHandle, seconds: i64) -> Result<(), EngineError> {
            self.seeks.push((handle, seconds));
            Ok(())
        }

        fn get_timing(&self, handle: MediaHandle) -> i64 {
            *self.timings.get(&handle.0).unwrap_or(&0)
        }

        fn duration(&self, handle: MediaHandle) -> Option<i64> {
            self.durations.get(&handle.0).copied()
        }

        fn audio_track_count(&self, handle: MediaHandle) -> usize {
            *self.track_counts.get(&handle.0).unwrap_or(&1)
        }

        fn select_audio_track(
            &mut self,
            handle: MediaHandle,
            track_index: usize,
        ) -> Result<(), EngineError> {
            self.selected_tracks.push((handle, track_index));
            Ok(())
        }

        fn add_audio_slave(&mut self, handle: MediaHandle, path: &Path) -> Result<(), EngineError> {
            self.audio_slaves.push((handle, path.to_path_buf()));
            Ok(())
        }

        fn stop(&mut self) -> Result<(), EngineError> {
            self.stopped = true;
            Ok(())
        }
    }
}
