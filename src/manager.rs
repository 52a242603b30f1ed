//! Manager: wires the websocket session and the HTTP reporter onto the
//! controller's callback surface. No logic of its own beyond the dispatch
//! table; every decision lives in the `Session` that classifies messages or
//! the `Controller` that runs the state machine.

use std::sync::Arc;

use log::warn;

use crate::controller::{Controller, Engine};
use crate::reporter::Reporter;
use crate::session::Session;

/// Connects the three components' callback surfaces together. Returns once
/// wired; the caller owns running `session.run(...)` and the HTTP calls
/// happen inline from controller callbacks (fire-and-forget, per the
/// reporter's own swallow-errors contract).
pub fn wire<E: Engine + 'static>(
    controller: &Arc<Controller<E>>,
    session: &Arc<Session>,
    reporter: &Arc<Reporter>,
) {
    {
        let controller = Arc::clone(controller);
        session.on_playlist_entry(move |entry| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                if let Err(error) = controller.set_playlist_entry(entry, true).await {
                    warn!("couldn't set playlist entry: {error}");
                }
            });
        });
    }

    {
        let controller = Arc::clone(controller);
        session.on_idle(move || {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                if let Err(error) = controller.play_idle().await {
                    warn!("couldn't show idle screen: {error}");
                }
            });
        });
    }

    {
        let controller = Arc::clone(controller);
        session.on_command(move |command| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                let result = match command.as_str() {
                    "play" => controller.pause(false).await,
                    "pause" => controller.pause(true).await,
                    "skip" => controller.skip().await,
                    "restart" => controller.restart().await,
                    "rewind" => controller.rewind().await,
                    "fast_forward" => controller.fast_forward().await,
                    other => {
                        warn!("ignoring unknown command '{other}'");
                        return;
                    }
                };

                if let Err(error) = result {
                    warn!("command '{command}' failed: {error}");
                }
            });
        });
    }

    {
        // Defensive: the server can't acknowledge status updates for an
        // entry it no longer thinks is playing once the socket drops, so
        // fall back to idle rather than keep reporting into the void.
        let controller = Arc::clone(controller);
        session.on_connection_lost(move || {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                if let Err(error) = controller.play_idle().await {
                    warn!("couldn't show idle screen after connection loss: {error}");
                }
            });
        });
    }

    {
        let reporter = Arc::clone(reporter);
        controller.on_started_transition(move |id| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move { reporter.put_status_started_transition(id).await });
        });
    }

    {
        let reporter = Arc::clone(reporter);
        controller.on_started_song(move |id| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move { reporter.put_status_started_song(id).await });
        });
    }

    {
        let reporter = Arc::clone(reporter);
        controller.on_finished(move |id| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move { reporter.put_status_finished(id).await });
        });
    }

    {
        let reporter = Arc::clone(reporter);
        controller.on_could_not_play(move |id| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move { reporter.put_status_could_not_play(id).await });
        });
    }

    {
        let reporter = Arc::clone(reporter);
        controller.on_paused(move |id, timing| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move { reporter.put_status_paused(id, timing).await });
        });
    }

    {
        let reporter = Arc::clone(reporter);
        controller.on_resumed(move |id, timing| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move { reporter.put_status_resumed(id, timing).await });
        });
    }

    {
        let reporter = Arc::clone(reporter);
        controller.on_updated_timing(move |id, timing| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move { reporter.put_status_updated_timing(id, timing).await });
        });
    }

    {
        let reporter = Arc::clone(reporter);
        controller.on_error(move |id, message| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move { reporter.post_player_error(id, &message).await });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{Backgrounds, BackgroundProvider};
    use crate::bus::Bus;
    use crate::config::{PlayerConfig, Templates};
    use crate::controller::engine::mock::MockEngine;
    use crate::controller::Controller;
    use crate::text_generator::TextGenerator;
    use std::time::Duration;

    async fn build_controller() -> Arc<Controller<MockEngine>> {
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

        std::mem::forget(kara);
        std::mem::forget(templates_dir);
        std::mem::forget(backgrounds_dir);
        std::mem::forget(tempdir);

        controller
    }

    #[tokio::test]
    async fn unknown_command_is_ignored_without_touching_controller() {
        let controller = build_controller().await;
        controller.load().await.unwrap();
        let session = Arc::new(Session::new(
            "ws://example.com".to_string(),
            Duration::from_secs(1),
        ));
        let reporter = Arc::new(Reporter::new("http://example.com/api/".to_string()));

        wire(&controller, &session, &reporter);
        session.dispatch_for_test(r#"{"type": "command", "data": {"command": "nonsense"}}"#);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.get_timing().await, 0);
    }
}
