//! Error types shared across AnimMUF crates.
//!
//! Every failure family carries a plain `kind()` so pipeline status values
//! can be compared without holding on to I/O errors or captured output.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Failure to retrieve a listing or a single frame from the provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Network hiccup, timeout, or server-side error. Worth retrying.
    #[error("Transient fetch failure for {source_id}: {message}")]
    Transient { source_id: String, message: String },

    /// The resource is permanently missing. Never retried.
    #[error("Frame {source_id} is gone (status {status})")]
    Gone { source_id: String, status: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Transient,
    Gone,
}

impl FetchError {
    pub fn transient(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    pub fn gone(source_id: impl Into<String>, status: u16) -> Self {
        Self::Gone {
            source_id: source_id.into(),
            status,
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Transient { .. } => FetchErrorKind::Transient,
            Self::Gone { .. } => FetchErrorKind::Gone,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FetchErrorKind::Transient
    }
}

/// Frame store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Different bytes were offered for a timestamp that is already cached.
    #[error("Frame at {timestamp} already stored with hash {stored}, refusing {offered}")]
    Conflict {
        timestamp: DateTime<Utc>,
        stored: String,
        offered: String,
    },

    /// A cached blob no longer matches its recorded hash or metadata.
    #[error("Corrupt cache entry {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Frame store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Unrecoverable assembly failures.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("No renderable frames")]
    NoFrames,

    #[error("Cannot write {path}: {source}")]
    Unwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Animation encoding failed: {message}")]
    Encode { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    NoFrames,
    Unwritable,
    Encode,
}

impl RenderError {
    pub fn unwritable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unwritable {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> RenderErrorKind {
        match self {
            Self::NoFrames => RenderErrorKind::NoFrames,
            Self::Unwritable { .. } => RenderErrorKind::Unwritable,
            Self::Encode { .. } => RenderErrorKind::Encode,
        }
    }
}

/// External converter failures.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Converter exited with {exit_code:?}: {captured_output}")]
    NonZeroExit {
        exit_code: Option<i32>,
        captured_output: String,
    },

    #[error("Converter reported success but {path} is missing or empty")]
    EmptyOutput { path: PathBuf },

    #[error("Converter exceeded {timeout_secs}s and was terminated")]
    Timeout { timeout_secs: u64 },

    #[error("Failed to start converter {program}: {message}")]
    Spawn { program: PathBuf, message: String },

    #[error("Cannot move previous video at {path} aside: {source}")]
    Finalize {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionErrorKind {
    NonZeroExit,
    EmptyOutput,
    Timeout,
    Spawn,
    Finalize,
}

impl ConversionError {
    pub fn kind(&self) -> ConversionErrorKind {
        match self {
            Self::NonZeroExit { .. } => ConversionErrorKind::NonZeroExit,
            Self::EmptyOutput { .. } => ConversionErrorKind::EmptyOutput,
            Self::Timeout { .. } => ConversionErrorKind::Timeout,
            Self::Spawn { .. } => ConversionErrorKind::Spawn,
            Self::Finalize { .. } => ConversionErrorKind::Finalize,
        }
    }
}

/// Startup configuration failures. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No configuration file found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("Missing required configuration key: {key}")]
    Missing { key: &'static str },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid {
            message: msg.into(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Top-level error type for AnimMUF operations.
#[derive(Debug, thiserror::Error)]
pub enum MufError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MufError.
pub type MufResult<T> = Result<T, MufError>;
