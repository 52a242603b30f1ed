//! Crate-wide error aggregation.
//!
//! Every subsystem defines its own error enum (see `config`, `fonts`,
//! `controller`, `reporter`, `session`); this module aggregates them behind
//! a single [`Error`] so `main` has one place to match on for the exit code.

use crate::{
    background, bus, config, controller, fonts, reporter, session, supervisor, text_generator,
};

/// Result alias using the crate-wide [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error taxonomy, per the error handling design.
///
/// `Fatal` variants stop the daemon; everything else is handled locally by
/// the component that raised it (logged, and/or reported to the server).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error")]
    Config(#[from] config::ConfigError),

    #[error("text generator error")]
    TextGenerator(#[from] text_generator::TextGeneratorError),

    #[error("background provider error")]
    Background(#[from] background::BackgroundError),

    #[error("font installer error")]
    Font(#[from] fonts::FontError),

    #[error("media player controller error")]
    Controller(#[from] controller::ControllerError),

    #[error("server reporting error")]
    Report(#[from] reporter::ReportError),

    #[error("websocket session error")]
    Session(#[from] session::SessionError),

    #[error("couldn't send internal message")]
    Bus(#[from] bus::BusError),

    #[error(transparent)]
    Supervisor(#[from] supervisor::SupervisorError),

    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("a supervised task panicked or was cancelled unexpectedly")]
    JoinError(#[from] tokio::task::JoinError),
}
