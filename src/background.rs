//! Background Provider.
//!
//! Resolves which image file to show for the idle / transition screens.

use std::path::{Path, PathBuf};

pub use crate::config::Backgrounds;
use crate::media::MediaKind;

#[derive(Debug, thiserror::Error)]
pub enum BackgroundError {
    #[error("no background found for {kind} (checked user directory and packaged default)")]
    NotFound { kind: MediaKind },
}

pub struct BackgroundProvider {
    config: Backgrounds,
    default_dir: PathBuf,
}

impl BackgroundProvider {
    pub fn new(config: Backgrounds, default_dir: PathBuf) -> Self {
        Self { config, default_dir }
    }

    /// Search order: user directory + configured filename; user directory +
    /// default filename; packaged default. Fails only if even the packaged
    /// default is missing.
    pub async fn resolve(&self, kind: MediaKind) -> Result<PathBuf, BackgroundError> {
        let (configured_name, default_name) = match kind {
            MediaKind::Idle => (
                &self.config.idle_background_name,
                "idle.png",
            ),
            MediaKind::Transition | MediaKind::Song => (
                &self.config.transition_background_name,
                "transition.png",
            ),
        };

        if let Some(user_dir) = &self.config.directory {
            let configured = user_dir.join(configured_name);
            if path_exists(&configured).await {
                return Ok(configured);
            }

            let default_named = user_dir.join(default_name);
            if path_exists(&default_named).await {
                return Ok(default_named);
            }
        }

        let packaged = self.default_dir.join(default_name);
        if path_exists(&packaged).await {
            return Ok(packaged);
        }

        Err(BackgroundError::NotFound { kind })
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefers_user_configured_name_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let default_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("custom.png"), b"").await.unwrap();
        tokio::fs::write(dir.path().join("idle.png"), b"").await.unwrap();

        let config = Backgrounds {
            directory: Some(dir.path().to_path_buf()),
            idle_background_name: "custom.png".into(),
            transition_background_name: "transition.png".into(),
        };
        let provider = BackgroundProvider::new(config, default_dir.path().to_path_buf());

        let resolved = provider.resolve(MediaKind::Idle).await.unwrap();
        assert_eq!(resolved, dir.path().join("custom.png"));
    }

    #[tokio::test]
    async fn falls_back_to_default_name_in_user_dir() {
        let dir = tempfile::tempdir().unwrap();
        let default_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("idle.png"), b"").await.unwrap();

        let config = Backgrounds {
            directory: Some(dir.path().to_path_buf()),
            idle_background_name: "missing.png".into(),
            transition_background_name: "transition.png".into(),
        };
        let provider = BackgroundProvider::new(config, default_dir.path().to_path_buf());

        let resolved = provider.resolve(MediaKind::Idle).await.unwrap();
        assert_eq!(resolved, dir.path().join("idle.png"));
    }

    #[tokio::test]
    async fn falls_back_to_packaged_default() {
        let default_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(default_dir.path().join("idle.png"), b"").await.unwrap();

        let config = Backgrounds::default();
        let provider = BackgroundProvider::new(config, default_dir.path().to_path_buf());

        let resolved = provider.resolve(MediaKind::Idle).await.unwrap();
        assert_eq!(resolved, default_dir.path().join("idle.png"));
    }

    #[tokio::test]
    async fn fails_when_even_packaged_default_missing() {
        let default_dir = tempfile::tempdir().unwrap();
        let config = Backgrounds::default();
        let provider = BackgroundProvider::new(config, default_dir.path().to_path_buf());

        let result = provider.resolve(MediaKind::Idle).await;
        assert!(matches!(
            result,
            Err(BackgroundError::NotFound { kind: MediaKind::Idle })
        ));
    }
}
