//! Settings infrastructure for the emulated host.
//!
//! This module provides support for loading and parsing settings.toml files
//! that configure document defaults (end-of-line handling, language id,
//! word pattern). Settings are an explicit structure with a fixed set of
//! recognized keys, parsed strictly so typos surface at load time instead
//! of silently configuring nothing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::document::EndOfLine;

/// Default word pattern for `word_range_at_position`.
pub const DEFAULT_WORD_PATTERN: &str = r"\w+";

/// Language id assigned to documents opened without one.
pub const DEFAULT_LANGUAGE_ID: &str = "plaintext";

/// Root settings structure loaded from settings.toml.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Document defaults.
    pub document: Option<DocumentSettings>,
}

/// Document configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentSettings {
    /// End-of-line handling: "auto" (detect from content), "lf", or "crlf".
    pub eol: Option<String>,

    /// Language id for documents opened without an explicit one.
    pub default_language: Option<String>,

    /// Regex used to find word boundaries; validated at load.
    pub word_pattern: Option<String>,
}

/// How a document's end-of-line attribute is determined at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EolMode {
    /// Detect from the initial content (CRLF wins if present).
    Auto,
    /// Fixed regardless of content.
    Forced(EndOfLine),
}

impl EolMode {
    pub fn resolve(self, content: &str) -> EndOfLine {
        match self {
            EolMode::Auto => EndOfLine::detect(content),
            EolMode::Forced(eol) => eol,
        }
    }
}

/// Parse an eol mode string.
///
/// Accepts "auto", "lf", and "crlf" (case-insensitive).
pub fn parse_eol_string(s: &str) -> Result<EolMode, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(EolMode::Auto),
        "lf" => Ok(EolMode::Forced(EndOfLine::Lf)),
        "crlf" => Ok(EolMode::Forced(EndOfLine::Crlf)),
        "" => Err("empty eol string".to_string()),
        other => Err(format!(
            "unknown eol '{}': expected 'auto', 'lf' or 'crlf'",
            other
        )),
    }
}

/// Settings resolved into ready-to-use values.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub eol: EolMode,
    pub default_language: String,
    pub word_pattern: Arc<Regex>,
}

impl Default for ResolvedSettings {
    fn default() -> Self {
        Self {
            eol: EolMode::Auto,
            default_language: DEFAULT_LANGUAGE_ID.to_string(),
            // the default pattern is known-good
            word_pattern: Arc::new(Regex::new(DEFAULT_WORD_PATTERN).unwrap()),
        }
    }
}

impl Settings {
    /// Validate and resolve into usable values, filling defaults for keys
    /// that are not set.
    pub fn resolve(&self) -> Result<ResolvedSettings, String> {
        let mut resolved = ResolvedSettings::default();

        let Some(document) = &self.document else {
            return Ok(resolved);
        };

        if let Some(eol) = &document.eol {
            resolved.eol = parse_eol_string(eol)?;
        }
        if let Some(language) = &document.default_language {
            if language.is_empty() {
                return Err("document.default_language must not be empty".to_string());
            }
            resolved.default_language = language.clone();
        }
        if let Some(pattern) = &document.word_pattern {
            let compiled = Regex::new(pattern)
                .map_err(|e| format!("invalid document.word_pattern: {}", e))?;
            resolved.word_pattern = Arc::new(compiled);
        }

        Ok(resolved)
    }
}

/// Load settings from a settings.toml file.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse settings.toml");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    }
}

/// Discover settings.toml by searching up the directory tree.
///
/// Walks up from `start_dir` to the filesystem root. Returns
/// `(settings, settings_dir)` where `settings_dir` is the directory
/// containing the found settings.toml. If not found, returns
/// `(Settings::default(), start_dir)`.
pub fn discover_settings(start_dir: &Path) -> (Settings, PathBuf) {
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        let candidate = dir.join("settings.toml");
        if candidate.is_file() {
            return (load_settings(&candidate), dir.to_path_buf());
        }
        current = dir.parent();
    }

    (Settings::default(), start_dir.to_path_buf())
}
