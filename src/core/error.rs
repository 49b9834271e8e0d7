use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the engine backend.
/// Every module returns `Result<T, EngineError>`.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Not enough free disk space at {path:?}: available={available} required={required}")]
    InsufficientDiskSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Too many redirects (limit {limit}) while downloading {url}")]
    TooManyRedirects { url: String, limit: usize },

    #[error("Redirect from {url} (HTTP {status}) has no usable Location header")]
    MissingRedirectLocation { url: String, status: u16 },

    #[error("Download of {url} stalled for more than {secs}s")]
    Timeout { url: String, secs: u64 },

    // ── Extraction ──────────────────────────────────────
    #[error("{tool} was not found. {guidance}")]
    ExtractorMissing { tool: String, guidance: String },

    #[error("Extraction failed with code {code:?}: {output}")]
    ExtractionFailed { code: Option<i32>, output: String },

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Variants ────────────────────────────────────────
    #[error("Unknown engine type: {0}")]
    UnknownVariant(String),

    // ── Engine process ──────────────────────────────────
    #[error("VOICEVOX Engine not found in: {0:?}")]
    EngineNotFound(PathBuf),

    #[error("VOICEVOX Engine executable not found in: {0:?}")]
    ExecutableNotFound(PathBuf),

    #[error("No engine installed")]
    NoEngineInstalled,

    #[error("Failed to spawn engine {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Config / JSON ───────────────────────────────────
    #[error("Invalid configuration in {path:?}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse failure classes reported across the IPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Extraction,
    FileSystem,
    UnknownVariant,
    EngineNotFound,
    ExecutableNotFound,
    Process,
    Config,
    Other,
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Http(_)
            | EngineError::DownloadFailed { .. }
            | EngineError::TooManyRedirects { .. }
            | EngineError::MissingRedirectLocation { .. }
            | EngineError::Timeout { .. } => ErrorKind::Network,
            EngineError::ExtractorMissing { .. }
            | EngineError::ExtractionFailed { .. }
            | EngineError::Zip(_) => ErrorKind::Extraction,
            EngineError::Io { .. } | EngineError::InsufficientDiskSpace { .. } => {
                ErrorKind::FileSystem
            }
            EngineError::UnknownVariant(_) => ErrorKind::UnknownVariant,
            EngineError::EngineNotFound(_) | EngineError::NoEngineInstalled => {
                ErrorKind::EngineNotFound
            }
            EngineError::ExecutableNotFound(_) => ErrorKind::ExecutableNotFound,
            EngineError::Spawn { .. } => ErrorKind::Process,
            EngineError::Config { .. } | EngineError::Json(_) => ErrorKind::Config,
            EngineError::Other(_) => ErrorKind::Other,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        EngineError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for Tauri IPC ─────────────────────────
// Tauri commands require the error type to implement `Serialize`.
impl serde::Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
