use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("page index {index} is out of range for {len} pages")]
    PageOutOfRange { index: usize, len: usize },

    #[error("invalid page order: {0}")]
    InvalidPageOrder(String),

    #[error("a highlight needs at least one rectangle")]
    EmptyHighlight,

    #[error("a save is already in progress")]
    SaveInProgress,

    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("i/o error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The export finished but moving it over the original failed.
    /// `restored` reports whether the original file was put back.
    #[error("failed to replace {path:?} (original restored: {restored})")]
    ReplaceFailed {
        path: PathBuf,
        restored: bool,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration")]
    Config(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    Background(String),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Validation failures leave state untouched and can be shown and dismissed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::PageOutOfRange { .. }
                | Self::InvalidPageOrder(_)
                | Self::EmptyHighlight
                | Self::SaveInProgress
        )
    }
}
