use std::collections::BTreeMap;
use std::collections::btree_map;

/// What has been learned about one original-side file during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedFile {
    /// Set by the probe phase.
    pub sample_rate: Option<u32>,
    /// Integrated loudness of the original, as reported by the tool.
    pub original_loudness: Option<String>,
    /// Integrated loudness of the replacement, as reported by the tool.
    pub replacement_loudness: Option<String>,
}

/// Per-run table of tracked files, keyed by file name.
///
/// Keys are only added by the scanner. Phases update existing entries in
/// place and never change the set of keys, so concurrent work within a phase
/// always targets disjoint entries.
#[derive(Debug, Clone, Default)]
pub struct LoudnessTable {
    files: BTreeMap<String, TrackedFile>,
}

impl LoudnessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Starts tracking `filename` with an empty entry, resetting any previous
    /// state for it.
    pub fn track(&mut self, filename: impl Into<String>) {
        self.files.insert(filename.into(), TrackedFile::default());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    pub fn get(&self, filename: &str) -> Option<&TrackedFile> {
        self.files.get(filename)
    }

    pub(crate) fn get_mut(&mut self, filename: &str) -> Option<&mut TrackedFile> {
        self.files.get_mut(filename)
    }

    pub fn filenames(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, TrackedFile> {
        self.files.iter()
    }
}

impl<'a> IntoIterator for &'a LoudnessTable {
    type Item = (&'a String, &'a TrackedFile);
    type IntoIter = btree_map::Iter<'a, String, TrackedFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_again_resets_the_entry() {
        let mut table = LoudnessTable::new();
        table.track("a.wav");
        table.get_mut("a.wav").unwrap().sample_rate = Some(48000);

        table.track("a.wav");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a.wav"), Some(&TrackedFile::default()));
    }

    #[test]
    fn filenames_are_sorted() {
        let mut table = LoudnessTable::new();
        for name in ["c.ogg", "a.wav", "b.mp3"] {
            table.track(name);
        }
        assert_eq!(table.filenames(), ["a.wav", "b.mp3", "c.ogg"]);
        table.clear();
        assert!(table.is_empty());
    }
}
