//! Packaged default assets (background images, subtitle templates, the icon
//! map, bundled fonts), embedded into the binary with `include_bytes!`/
//! `include_str!` so the daemon never depends on finding a data directory
//! relative to wherever it was installed. Extracted once at startup into a
//! scratch directory that the background provider, text generator, and font
//! installer then read from like any other packaged-default directory.

use std::path::Path;

const IDLE_PNG: &[u8] = include_bytes!("../resources/idle.png");
const TRANSITION_PNG: &[u8] = include_bytes!("../resources/transition.png");
const IDLE_ASS: &str = include_str!("../resources/idle.ass");
const TRANSITION_ASS: &str = include_str!("../resources/transition.ass");
const ICONS_INI: &str = include_str!("../resources/icons.ini");

/// Writes the packaged defaults into `dir`, which becomes both the
/// background provider's and the text generator's `default_dir`.
pub async fn extract_defaults(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join("idle.png"), IDLE_PNG).await?;
    tokio::fs::write(dir.join("transition.png"), TRANSITION_PNG).await?;
    tokio::fs::write(dir.join("idle.ass"), IDLE_ASS).await?;
    tokio::fs::write(dir.join("transition.ass"), TRANSITION_ASS).await?;
    tokio::fs::write(dir.join("icons.ini"), ICONS_INI).await?;
    Ok(())
}

/// Writes the packaged fonts into `dir`, the font installer's
/// `packaged_dir`. No fonts ship by default; a vendored build can add
/// `include_bytes!` entries here without touching the installer itself.
pub async fn extract_fonts(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extract_defaults_writes_every_packaged_file() {
        let dir = tempfile::tempdir().unwrap();
        extract_defaults(dir.path()).await.unwrap();

        for name in ["idle.png", "transition.png", "idle.ass", "transition.ass", "icons.ini"] {
            assert!(dir.path().join(name).exists(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn extract_fonts_creates_an_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fonts_dir = dir.path().join("fonts");
        extract_fonts(&fonts_dir).await.unwrap();
        assert!(fonts_dir.is_dir());
    }
}
