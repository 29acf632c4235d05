/// Console sink and confirmation prompt seams
pub mod console;
/// Module for error handling
pub mod error;
/// Extraction of the JSON block embedded in ffmpeg diagnostics
pub mod extract;
/// Structured tool output
pub mod models;
/// The loudness matching workflow
pub mod pipeline;
/// Subprocess launching and line streaming
pub mod process;
/// Loudness difference reporting
pub mod report;
/// Bounded-parallelism per-file runner
pub mod runner;
/// Discovery of audio files
pub mod scan;
/// Per-run tracking table
pub mod state;

use std::path::{Path, PathBuf};

use strum_macros::Display;

pub use crate::console::{AlwaysAnswer, Console, LogConsole, MemoryConsole, Prompter};
pub use crate::error::{Error, FileError, PathRole};
pub use crate::pipeline::{EncodeJob, LoudnessMatcher, MatchReport};
pub use crate::process::ExternalTool;
pub use crate::report::LoudnessDifference;
pub use crate::runner::{RunSummary, default_parallelism};
pub use crate::scan::{ExtensionFilter, ScanReport};
pub use crate::state::{LoudnessTable, TrackedFile};
pub use tokio_util::sync::CancellationToken;

/// Represents recognised audio file formats. Displays as its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AudioFormats {
    Wav,
    Mp3,
    Ogg,
}

impl AudioFormats {
    pub const ALL: [AudioFormats; 3] = [Self::Wav, Self::Mp3, Self::Ogg];
}

/// Configuration for a loudness matching run
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Directory holding the originals whose loudness is the reference
    pub original_dir: PathBuf,
    /// Directory holding same-named replacement files
    pub replacement_dir: PathBuf,
    /// Directory receiving the re-encoded replacements. Emptied by a full run.
    pub output_dir: PathBuf,
    /// Tool answering `-print_format json -show_streams` probes
    pub ffprobe: ExternalTool,
    /// Tool running the `loudnorm` filter, for analysis and encoding
    pub ffmpeg: ExternalTool,
    /// Which files in the original directory are considered
    pub extensions: ExtensionFilter,
    /// Maximum concurrent tool invocations, default to [`default_parallelism`]
    pub max_parallelism: Option<usize>,
    /// Draw per-phase progress bars
    pub show_progress: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions {
            original_dir: PathBuf::new(),
            replacement_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            ffprobe: ExternalTool::new("ffprobe"),
            ffmpeg: ExternalTool::new("ffmpeg"),
            extensions: ExtensionFilter::default(),
            max_parallelism: None,
            show_progress: true,
        }
    }
}

impl MatchOptions {
    pub fn dir(&self, role: PathRole) -> &Path {
        match role {
            PathRole::Original => &self.original_dir,
            PathRole::Replacement => &self.replacement_dir,
            PathRole::Output => &self.output_dir,
        }
    }

    /// Parallelism for one run. Resolved once at the start of each operation.
    pub fn parallelism(&self) -> usize {
        self.max_parallelism
            .filter(|n| *n > 0)
            .unwrap_or_else(default_parallelism)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_parallelism_wins() {
        let mut options = MatchOptions {
            max_parallelism: Some(7),
            ..MatchOptions::default()
        };
        assert_eq!(options.parallelism(), 7);
        options.max_parallelism = Some(0);
        assert_eq!(options.parallelism(), default_parallelism());
    }

    #[test]
    fn default_filter_uses_supported_extensions() {
        let filter = MatchOptions::default().extensions;
        assert!(filter.matches("a.wav") && filter.matches("b.MP3") && filter.matches("c.ogg"));
        assert!(!filter.matches("d.flac"));
    }
}
