//! User configuration, read from `config.toml` in the platform config
//! directory. Every field has a default, so a partial file is fine.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::annotation::{DEFAULT_HISTORY_LIMIT, DEFAULT_STROKE_WIDTH};
use crate::geometry::Color;
use crate::layout::DEFAULT_HIT_TOLERANCE;
use crate::link::{LinkPolicy, DEFAULT_ALLOWED_SCHEMES};
use crate::search::SearchQuery;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {config_path}: {source}")]
    Read {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file at {config_path}: {source}")]
    Parse {
        config_path: PathBuf,
        source: toml::de::Error,
    },
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "inkshade", "inkshade")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Hit-test tolerance in points at 100% zoom.
    pub hit_tolerance: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            hit_tolerance: DEFAULT_HIT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub history_limit: usize,
    #[serde(with = "hex_color")]
    pub highlight_color: Color,
    #[serde(with = "hex_color")]
    pub underline_color: Color,
    #[serde(with = "hex_color")]
    pub drawing_color: Color,
    pub stroke_width: f32,
    pub autosave: bool,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            highlight_color: Color::YELLOW,
            underline_color: Color::BLUE,
            drawing_color: Color::RED,
            stroke_width: DEFAULT_STROKE_WIDTH,
            autosave: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub case_sensitive: bool,
    pub whole_word: bool,
}

impl SearchConfig {
    pub fn query(&self, text: impl Into<String>) -> SearchQuery {
        SearchQuery::new(text)
            .case_sensitive(self.case_sensitive)
            .whole_word(self.whole_word)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub allowed_schemes: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: DEFAULT_ALLOWED_SCHEMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LinkConfig {
    pub fn policy(&self) -> LinkPolicy {
        LinkPolicy::new(&self.allowed_schemes)
    }
}

/// Overlay colors for presentation code. The engine never reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    #[serde(with = "hex_color")]
    pub selection: Color,
    pub selection_alpha: f32,
    #[serde(with = "hex_color")]
    pub search_match: Color,
    #[serde(with = "hex_color")]
    pub active_match: Color,
    pub search_alpha: f32,
    pub annotation_alpha: f32,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            selection: Color::rgb(51, 153, 255),
            selection_alpha: 0.35,
            search_match: Color::rgb(255, 214, 0),
            active_match: Color::rgb(255, 128, 0),
            search_alpha: 0.4,
            annotation_alpha: 0.45,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub layout: LayoutConfig,
    pub annotations: AnnotationConfig,
    pub search: SearchConfig,
    pub links: LinkConfig,
    pub theme: ThemeConfig,
}

impl CoreConfig {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            config_path: config_path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            config_path: config_path.to_path_buf(),
            source,
        })?;
        Ok(Some(config))
    }

    /// Loads the user config, falling back to defaults when there is none.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) => Ok(Self::load_from_path(path)?.unwrap_or_default()),
            None => Ok(Self::default()),
        }
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, config_path: P) -> anyhow::Result<()> {
        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}

mod hex_color {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::geometry::Color;

    pub fn serialize<S: Serializer>(color: &Color, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&color.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Color, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Color::from_hex(&raw)
            .ok_or_else(|| de::Error::custom(format!("`{raw}` is not a #rrggbb color")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert!(CoreConfig::load_from_path(dir.path().join("absent.toml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[annotations]\nhighlight_color = \"#00ff00\"\n\n[links]\nallowed_schemes = [\"https\"]\n",
        )
        .unwrap();

        let config = CoreConfig::load_from_path(&path).unwrap().unwrap();
        assert_eq!(config.annotations.highlight_color, Color::rgb(0, 255, 0));
        assert_eq!(config.annotations.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(config.layout.hit_tolerance, DEFAULT_HIT_TOLERANCE);
        assert!(config.links.policy().allows("https"));
        assert!(!config.links.policy().allows("http"));
    }

    #[test]
    fn bad_colors_are_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[theme]\nselection = \"blue\"\n").unwrap();
        assert!(matches!(
            CoreConfig::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = CoreConfig::default();
        config.search.whole_word = true;
        config.theme.selection = Color::rgb(1, 2, 3);
        config.save_to_path(&path).unwrap();
        assert_eq!(CoreConfig::load_from_path(&path).unwrap(), Some(config));
    }
}
