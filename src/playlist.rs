//! Playlist entry data model, as received from the server.
//!
//! The daemon does not own this schema; the server may send extra fields it
//! doesn't know about, so deserialization is permissive throughout.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A reference to a work a song belongs to (an opening, an insert song, …).
/// Kept opaque: the controller never inspects it beyond passing it through
/// to the transition template context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkRef {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Song {
    pub title: String,
    pub file_path: PathBuf,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub works: Vec<WorkRef>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The canonical identity of a server order: `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: i64,
    pub song: Song,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub use_instrumental: bool,
}
