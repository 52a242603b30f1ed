//! Text Generator.
//!
//! Renders idle and transition subtitle overlays from templates plus a
//! playlist-entry context. The original uses Jinja2
//! (`jinja2.Environment(loader=FileSystemLoader(...))` with a custom `icon`
//! filter); Tera is its direct Rust counterpart, same template/filter model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::{Tera, Value};

use crate::config::Templates;
use crate::media::MediaKind;

#[derive(Debug, thiserror::Error)]
pub enum TextGeneratorError {
    #[error("couldn't read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("neither a user nor a default template exists for {kind}")]
    TemplateMissing { kind: MediaKind },

    #[error("template for {kind} has invalid syntax")]
    TemplateSyntax {
        kind: MediaKind,
        #[source]
        source: tera::Error,
    },

    #[error("couldn't render template for {kind}")]
    Render {
        kind: MediaKind,
        #[source]
        source: tera::Error,
    },

    #[error("couldn't write generated text to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// icon name -> unicode codepoint, parsed from a bundled INI-like file
/// (`name = hex_codepoint` per line, `#`-comments and blank lines ignored).
/// Mirrors `text_generator.py`'s `load_icon_map` (`ConfigParser` over
/// `font-awesome.ini`).
fn parse_icon_map(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some((name, codepoint)) = line.split_once('=') {
            map.insert(
                name.trim().to_string(),
                codepoint.trim().to_string(),
            );
        }
    }
    map
}

fn icon_to_char(codepoint: &str) -> char {
    u32::from_str_radix(codepoint, 16)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(' ')
}

pub struct TextGenerator {
    tera: Tera,
}

impl TextGenerator {
    /// Loads the icon map and compiles the `idle`/`transition` templates.
    ///
    /// Consults, in order: `config.directory` (if set) then `default_dir`.
    /// A missing user template falls back silently to the default one; a
    /// malformed template (in either location) is fatal.
    pub async fn load(
        config: &Templates,
        default_dir: &Path,
    ) -> Result<Self, TextGeneratorError> {
        let icon_map_path = default_dir.join("icons.ini");
        let icon_map = match tokio::fs::read_to_string(&icon_map_path).await {
            Ok(contents) => parse_icon_map(&contents),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(TextGeneratorError::Read {
                    path: icon_map_path,
                    source,
                })
            }
        };

        let mut tera = Tera::default();

        Self::add_template(
            &mut tera,
            "idle",
            MediaKind::Idle,
            config.directory.as_deref(),
            &config.idle_template_name,
            default_dir,
        )
        .await?;

        Self::add_template(
            &mut tera,
            "transition",
            MediaKind::Transition,
            config.directory.as_deref(),
            &config.transition_template_name,
            default_dir,
        )
        .await?;

        tera.register_filter(
            "icon",
            move |value: &Value, _: &HashMap<String, Value>| {
                let name = value.as_str().unwrap_or_default();
                let glyph = icon_map
                    .get(name)
                    .map(|codepoint| icon_to_char(codepoint))
                    .unwrap_or(' ');
                Ok(Value::String(glyph.to_string()))
            },
        );

        Ok(Self { tera })
    }

    async fn add_template(
        tera: &mut Tera,
        name: &str,
        kind: MediaKind,
        user_dir: Option<&Path>,
        filename: &str,
        default_dir: &Path,
    ) -> Result<(), TextGeneratorError> {
        let candidate = user_dir.map(|dir| dir.join(filename));

        let source = if let Some(candidate) = &candidate {
            match tokio::fs::read_to_string(candidate).await {
                Ok(contents) => Some(contents),
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => None,
                Err(source) => {
                    return Err(TextGeneratorError::Read {
                        path: candidate.clone(),
                        source,
                    })
                }
            }
        } else {
            None
        };

        let source = match source {
            Some(source) => source,
            None => {
                let default_path = default_dir.join(filename);
                tokio::fs::read_to_string(&default_path).await.map_err(|_| {
                    TextGeneratorError::TemplateMissing { kind }
                })?
            }
        };

        tera.add_raw_template(name, &source)
            .map_err(|source| TextGeneratorError::TemplateSyntax { kind, source })
    }

    /// Pure function: same `(kind, context)` always renders the same bytes.
    pub fn render(
        &self,
        kind: MediaKind,
        context: &tera::Context,
    ) -> Result<String, TextGeneratorError> {
        let name = match kind {
            MediaKind::Idle => "idle",
            MediaKind::Transition => "transition",
            MediaKind::Song => {
                return Err(TextGeneratorError::TemplateMissing { kind });
            }
        };
        self.tera
            .render(name, context)
            .map_err(|source| TextGeneratorError::Render { kind, source })
    }

    pub async fn write(
        &self,
        kind: MediaKind,
        context: &tera::Context,
        path: &Path,
    ) -> Result<PathBuf, TextGeneratorError> {
        let rendered = self.render(kind, context)?;
        tokio::fs::write(path, rendered.as_bytes())
            .await
            .map_err(|source| TextGeneratorError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_map_parses_ignoring_comments_and_blanks() {
        let contents = "# a comment\n\nplay = f04b\npause=f04c\n";
        let map = parse_icon_map(contents);
        assert_eq!(map.get("play").unwrap(), "f04b");
        assert_eq!(map.get("pause").unwrap(), "f04c");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unknown_codepoint_falls_back_to_space() {
        assert_eq!(icon_to_char("zzzz"), ' ');
    }

    #[test]
    fn known_codepoint_resolves_to_glyph() {
        assert_eq!(icon_to_char("41"), 'A');
    }

    #[tokio::test]
    async fn renders_pure_function_of_context() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("idle.ass"), "notes: {{ notes | length }}")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("transition.ass"), "")
            .await
            .unwrap();

        let config = Templates::default();
        let generator = TextGenerator::load(&config, dir.path()).await.unwrap();

        let mut context = tera::Context::new();
        context.insert("notes", &vec!["a", "b"]);

        let first = generator.render(MediaKind::Idle, &context).unwrap();
        let second = generator.render(MediaKind::Idle, &context).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "notes: 2");
    }

    #[tokio::test]
    async fn missing_template_in_both_locations_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("transition.ass"), "")
            .await
            .unwrap();
        let config = Templates::default();
        let result = TextGenerator::load(&config, dir.path()).await;
        assert!(matches!(
            result,
            Err(TextGeneratorError::TemplateMissing {
                kind: MediaKind::Idle
            })
        ));
    }
}
