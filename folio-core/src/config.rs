use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::highlights::Argb;
use crate::merge::MergeTuning;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub merge: MergeTuning,
    pub highlight: HighlightConfig,
    pub save: SaveConfig,
    pub bookmarks: BookmarkConfig,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub default_color: Argb,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            default_color: Argb::YELLOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub temp_suffix: String,
    pub backup_suffix: String,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            temp_suffix: ".tmp".to_owned(),
            backup_suffix: ".backup".to_owned(),
        }
    }
}

impl SaveConfig {
    /// Both suffixes must name distinct siblings of the source file.
    pub fn validate(&self) -> EngineResult<()> {
        for (key, suffix) in [
            ("temp_suffix", &self.temp_suffix),
            ("backup_suffix", &self.backup_suffix),
        ] {
            if suffix.is_empty() {
                return Err(EngineError::InvalidConfig(format!(
                    "[save] {key} must not be empty"
                )));
            }
            if suffix.contains(['/', '\\']) {
                return Err(EngineError::InvalidConfig(format!(
                    "[save] {key} {suffix:?} must not contain a path separator"
                )));
            }
        }
        if self.temp_suffix == self.backup_suffix {
            return Err(EngineError::InvalidConfig(format!(
                "[save] temp_suffix and backup_suffix are both {:?}",
                self.temp_suffix
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkConfig {
    /// Custom document-info key holding the serialized bookmark list.
    pub metadata_key: String,
}

impl Default for BookmarkConfig {
    fn default() -> Self {
        Self {
            metadata_key: "FolioBookmarks".to_owned(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml(source: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.save.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let source = fs::read_to_string(path).map_err(|err| EngineError::io(path, err))?;
        Self::from_toml(&source)
    }

    /// Like [`EngineConfig::load`], but a missing file means defaults.
    pub fn load_or_default(path: &Path) -> EngineResult<Self> {
        match fs::read_to_string(path) {
            Ok(source) => Self::from_toml(&source),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(EngineError::io(path, err)),
        }
    }
}
