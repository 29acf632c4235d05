use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::AudioFormats;
use crate::error::Error;
use crate::state::LoudnessTable;

/// Which file names count as audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    /// Extensions without the leading dot.
    pub extensions: Vec<String>,
    pub ignore_case: bool,
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self {
            extensions: AudioFormats::ALL.iter().map(ToString::to_string).collect(),
            ignore_case: true,
        }
    }
}

impl ExtensionFilter {
    pub fn matches(&self, path: impl AsRef<Path>) -> bool {
        let Some(ext) = path.as_ref().extension().and_then(|os| os.to_str()) else {
            return false;
        };
        self.extensions.iter().any(|allowed| {
            if self.ignore_case {
                allowed.eq_ignore_ascii_case(ext)
            } else {
                allowed == ext
            }
        })
    }
}

/// What a directory scan found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Number of files added to the table.
    pub tracked: usize,
    /// Audio files left out because their names are not valid UTF-8.
    pub unreadable_names: Vec<PathBuf>,
}

/// Adds an empty entry to `table` for every audio file directly inside `dir`.
///
/// Subdirectories are not entered. Symbolic links to files count as files.
pub fn scan_directory(
    dir: impl AsRef<Path>,
    filter: &ExtensionFilter,
    table: &mut LoudnessTable,
) -> Result<ScanReport, Error> {
    let dir = dir.as_ref();
    let mut report = ScanReport::default();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::Scan {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let is_file = entry.file_type().is_file()
            || (entry.path_is_symlink() && entry.path().is_file());
        if !is_file || !filter.matches(entry.path()) {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) => {
                debug!("Tracking {name}");
                table.track(name);
                report.tracked += 1;
            }
            None => {
                warn!("Skipping non UTF-8 file name: {:?}", entry.file_name());
                report.unreadable_names.push(entry.into_path());
            }
        }
    }
    Ok(report)
}
