//! The tagged kinds of media the controller ever shows.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Idle,
    Transition,
    Song,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Idle => "idle",
            MediaKind::Transition => "transition",
            MediaKind::Song => "song",
        };
        write!(f, "{name}")
    }
}
