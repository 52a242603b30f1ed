//! Supervisor: composes every component, runs until the stop signal fires,
//! tears down in reverse, and re-raises the first bus error. Grounded on
//! `tasks.rs`'s init-then-unwind shape, generalized from "player + UI" to
//! "controller + reporter + session + manager".

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::background::BackgroundProvider;
use crate::bus::{Bus, ErrorKind, ErrorReport};
use crate::config::{Config, EngineChoice};
use crate::controller::engine::Engine;
use crate::controller::Controller;
use crate::fonts::FontInstaller;
use crate::manager;
use crate::reporter::Reporter;
use crate::resources;
use crate::session::{Session, SessionError};
use crate::text_generator::TextGenerator;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Font(#[from] crate::fonts::FontError),

    #[error(transparent)]
    TextGenerator(#[from] crate::text_generator::TextGeneratorError),

    #[error(transparent)]
    Controller(#[from] crate::controller::ControllerError),

    #[error(transparent)]
    Report(#[from] crate::reporter::ReportError),

    #[error(transparent)]
    Session(#[from] crate::session::SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A fatal error raised by a supervised background worker (published to
    /// the bus) rather than returned directly from an awaited call here.
    #[error("{0}")]
    Fatal(ErrorReport),
}

fn build_engine(config: &Config) -> Box<dyn Engine> {
    match config.player.engine {
        #[cfg(feature = "vlc")]
        EngineChoice::Vlc => Box::new(crate::controller::vlc::VlcEngine::new(
            Vec::new(),
            config.player.vlc.instance_parameters.clone(),
            config.player.fullscreen,
        )),
        #[cfg(not(feature = "vlc"))]
        EngineChoice::Vlc => {
            panic!("player.engine is 'vlc' but this build was compiled without the vlc feature")
        }

        #[cfg(feature = "mpv")]
        EngineChoice::Mpv => Box::new(crate::controller::mpv::MpvEngine::new(
            config.player.mpv.options.clone(),
            config.player.fullscreen,
        )),
        #[cfg(not(feature = "mpv"))]
        EngineChoice::Mpv => {
            panic!("player.engine is 'mpv' but this build was compiled without the mpv feature")
        }
    }
}

/// Runs the daemon to completion. Returns `Ok(())` on a clean shutdown
/// (stop signal set by Ctrl-C or a clean server-initiated close with no
/// retry), `Err` with the first fatal error otherwise.
pub async fn run(config: Config) -> Result<(), SupervisorError> {
    let (bus, mut error_drain) = Bus::new();

    {
        let bus = bus.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C, shutting down");
                bus.stop.set();
            }
        });
    }

    let tempdir = tempfile::tempdir()?;
    let resources_dir = tempdir.path().join("resources");
    let fonts_dir = tempdir.path().join("fonts");
    resources::extract_defaults(&resources_dir).await?;
    resources::extract_fonts(&fonts_dir).await?;

    let mut fonts = FontInstaller::new(fonts_dir);
    if let Err(error) = fonts.load().await {
        // Font installation is a host-OS nicety the core doesn't own: a
        // failure here degrades subtitle rendering, it doesn't stop the
        // player.
        log::warn!("couldn't install packaged fonts: {error}");
    }

    let result = run_inner(config, &bus, tempdir.path(), &resources_dir).await;

    fonts.unload().await;

    match result {
        Ok(()) => match error_drain.drain().await {
            Some(report) => Err(SupervisorError::Fatal(report)),
            None => Ok(()),
        },
        Err(error) => Err(error),
    }
}

async fn run_inner(
    config: Config,
    bus: &Bus,
    tempdir: &std::path::Path,
    resources_dir: &std::path::Path,
) -> Result<(), SupervisorError> {
    let engine = build_engine(&config);

    let text_generator = TextGenerator::load(&config.player.templates, resources_dir).await?;
    let backgrounds = BackgroundProvider::new(
        config.player.backgrounds.clone(),
        resources_dir.to_path_buf(),
    );

    let controller = Arc::new(Controller::new(
        engine,
        bus.clone(),
        config.player.clone(),
        tempdir.to_path_buf(),
        text_generator,
        backgrounds,
    ));
    controller.load().await?;

    let reporter = Arc::new(Reporter::new(config.http_base_url()));
    reporter
        .authenticate(&config.server.login, &config.server.password)
        .await?;

    let session = Arc::new(Session::new(
        config.ws_url(),
        Duration::from_secs(config.server.reconnect_interval),
    ));

    manager::wire(&controller, &session, &reporter);

    let session_task = spawn_session(Arc::clone(&session), bus.clone());

    info!("dakara-player running");
    bus.stop.wait().await;

    // Teardown, reverse of composition order: socket first (no retry), then
    // the controller (best-effort grace period). Fonts are unloaded and the
    // tempdir removed by `run`, the caller of this function.
    session_task.abort();
    if let Err(error) = controller.stop_player().await {
        error!("error while stopping the controller: {error}");
    }

    Ok(())
}

/// `Session::run` can fail with two distinct fatal classifications
/// (authentication vs. network-on-first-attempt); `Bus::spawn_supervised`
/// only carries a single static `ErrorKind` for the whole future, so the
/// classification is done by hand here instead.
fn spawn_session(session: Arc<Session>, bus: Bus) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(error) = session.run(bus.clone()).await {
            let kind = match &error {
                SessionError::Authentication => ErrorKind::Authentication,
                SessionError::Network(_) => ErrorKind::Network,
            };
            bus.errors.publish(ErrorReport::new(kind, error.to_string()));
            bus.stop.set();
        }
    })
}
