use std::path::PathBuf;
use std::process::ExitStatus;

use strum_macros::Display;

/// Which of the configured directories a path error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PathRole {
    Original,
    Replacement,
    Output,
}

/// Failures of a single file's tool invocation. These never abort a batch.
#[derive(thiserror::Error, Debug)]
pub enum FileError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while talking to the tool: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tool exited with {0}")]
    Failed(ExitStatus),
    #[error("No structured block found in tool output")]
    NoStructuredBlock,
    #[error("Malformed tool output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Field `{0}` missing from tool output")]
    MissingField(&'static str),
    #[error("No audio stream found")]
    NoAudioStream,
    #[error("Invalid sample rate: {0:?}")]
    InvalidSampleRate(String),
    #[error("File doesn't exist: {0:?}")]
    Missing(PathBuf),
    #[error("Entry is incomplete: {0}")]
    Incomplete(&'static str),
    #[error("Operation panicked: {0}")]
    Panicked(String),
    #[error("Cancelled")]
    Cancelled,
}

/// Fatal errors: the whole run stops and the caller presents the message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Path of the {0} folder can't be empty")]
    EmptyPath(PathRole),
    #[error("Path of the {role} folder doesn't exist: {path:?}")]
    MissingDirectory { role: PathRole, path: PathBuf },
    #[error("Files don't match: {0} doesn't exist in the replacement folder")]
    MissingReplacement(String),
    #[error("Output folder {0:?} contains or equals an input folder")]
    OutputOverlapsInput(PathBuf),
    #[error("Operation declined")]
    Declined,
    #[error("Failed to scan {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Cancellation is not a failure and should not be shown as one.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
