use std::fmt;

use crate::state::LoudnessTable;

/// Parses a loudness value printed with either `.` or `,` as the decimal
/// separator.
pub fn parse_lufs(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse::<f64>().ok()
}

/// Loudness gap between an original and its replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct LoudnessDifference {
    pub filename: String,
    pub original: f64,
    pub replacement: f64,
}

impl LoudnessDifference {
    /// Absolute difference of the magnitudes, unrounded.
    pub fn difference(&self) -> f64 {
        (self.original.abs() - self.replacement.abs()).abs()
    }
}

impl fmt::Display for LoudnessDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "diff: {} LUFS\tO: {}\tR: {}\t{}",
            two_digits(self.difference()),
            two_digits(self.original),
            two_digits(self.replacement),
            self.filename
        )
    }
}

/// Every entry with both loudness values present and finite. Silent input is
/// measured as `-inf` and has no meaningful difference.
pub fn differences(table: &LoudnessTable) -> Vec<LoudnessDifference> {
    table
        .iter()
        .filter_map(|(name, file)| {
            let original = finite_lufs(file.original_loudness.as_deref()?)?;
            let replacement = finite_lufs(file.replacement_loudness.as_deref()?)?;
            Some(LoudnessDifference {
                filename: name.clone(),
                original,
                replacement,
            })
        })
        .collect()
}

fn finite_lufs(raw: &str) -> Option<f64> {
    parse_lufs(raw).filter(|v| v.is_finite())
}

/// Report lines for `table`, one per comparable file.
pub fn report_lines(table: &LoudnessTable) -> Vec<String> {
    differences(table).iter().map(ToString::to_string).collect()
}

// At least two integer digits and exactly two decimals: 0.45 -> "00.45".
fn two_digits(value: f64) -> String {
    let magnitude = format!("{:05.2}", value.abs());
    if value < 0.0 {
        format!("-{magnitude}")
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(entries: &[(&str, Option<&str>, Option<&str>)]) -> LoudnessTable {
        let mut table = LoudnessTable::new();
        for (name, original, replacement) in entries {
            table.track(*name);
            let file = table.get_mut(name).unwrap();
            file.original_loudness = original.map(str::to_string);
            file.replacement_loudness = replacement.map(str::to_string);
        }
        table
    }

    #[test]
    fn separators_are_locale_tolerant() {
        assert_eq!(parse_lufs("-14,25"), Some(-14.25));
        assert_eq!(parse_lufs(" -13.80 "), Some(-13.8));
        assert_eq!(parse_lufs("-inf"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_lufs("loud"), None);
    }

    #[test]
    fn mixed_separators_give_unrounded_difference() {
        let table = table_with(&[("a.wav", Some("-14,25"), Some("-13.80"))]);
        let diffs = differences(&table);
        assert_eq!(diffs.len(), 1);
        assert!((diffs[0].difference() - 0.45).abs() < 1e-9);
        assert_eq!(
            report_lines(&table),
            ["diff: 00.45 LUFS\tO: -14.25\tR: -13.80\ta.wav"]
        );
    }

    #[test]
    fn incomplete_entries_are_skipped() {
        let table = table_with(&[
            ("a.wav", Some("-20.0"), Some("-9.5")),
            ("b.mp3", Some("-20.0"), None),
            ("c.ogg", None, Some("-20.0")),
            ("d.wav", Some("n/a"), Some("-20.0")),
        ]);
        let lines = report_lines(&table);
        assert_eq!(lines, ["diff: 10.50 LUFS\tO: -20.00\tR: -09.50\ta.wav"]);
    }

    #[test]
    fn silent_files_are_left_out() {
        let table = table_with(&[
            ("loud.wav", Some("-20.00"), Some("-18.00")),
            ("s.wav", Some("-inf"), Some("-20.00")),
            ("t.wav", Some("-inf"), Some("-inf")),
            ("u.wav", Some("-20.00"), Some("NaN")),
        ]);
        assert_eq!(
            report_lines(&table),
            ["diff: 02.00 LUFS\tO: -20.00\tR: -18.00\tloud.wav"]
        );
    }

    #[test]
    fn reporting_is_repeatable() {
        let table = table_with(&[("a.wav", Some("-23"), Some("-23"))]);
        assert_eq!(report_lines(&table), report_lines(&table));
        assert_eq!(table.get("a.wav").unwrap().original_loudness.as_deref(), Some("-23"));
    }
}
