use std::ffi::OsString;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::MatchOptions;
use crate::console::{Console, LogConsole, Prompter};
use crate::error::{Error, FileError, PathRole};
use crate::extract::extract_block;
use crate::models::{LoudnormOutput, ProbeOutput};
use crate::process;
use crate::report::{self, LoudnessDifference, parse_lufs};
use crate::runner::{RunSummary, run_bounded, until_cancelled};
use crate::scan::scan_directory;
use crate::state::{LoudnessTable, TrackedFile};

const RESET_TITLE: &str = "Warning!";
const RESET_MESSAGE: &str = "Following operation will delete all the existing files in the output folder! Do you want to proceed?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Original,
    Replacement,
}

impl Side {
    fn role(self) -> PathRole {
        match self {
            Side::Original => PathRole::Original,
            Side::Replacement => PathRole::Replacement,
        }
    }
}

/// Result of a full matching run.
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub probed: RunSummary,
    pub originals: RunSummary,
    pub replacements: RunSummary,
    pub encoded: RunSummary,
    pub differences: Vec<LoudnessDifference>,
}

/// Parameters for re-encoding one replacement file.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    pub filename: String,
    pub sample_rate: u32,
    pub target_lufs: f64,
}

impl EncodeJob {
    /// Builds the job for a tracked entry. Entries without a probed sample
    /// rate or a usable original loudness are refused rather than guessed.
    pub fn for_entry(filename: &str, file: &TrackedFile) -> Result<Self, FileError> {
        let sample_rate = file
            .sample_rate
            .ok_or(FileError::Incomplete("no sample rate recorded"))?;
        let target_lufs = file
            .original_loudness
            .as_deref()
            .and_then(parse_lufs)
            .filter(|v| v.is_finite())
            .ok_or(FileError::Incomplete("no usable original loudness"))?;
        Ok(Self {
            filename: filename.to_string(),
            sample_rate,
            target_lufs,
        })
    }
}

/// Drives the probe, analysis, report and re-encode phases over a
/// [`LoudnessTable`].
///
/// The table is owned by the caller and borrowed mutably for the length of a
/// run. Within a phase, per-file results are written back one at a time as
/// they arrive, each into the entry named by its own file.
pub struct LoudnessMatcher<C = LogConsole> {
    options: MatchOptions,
    console: C,
}

impl LoudnessMatcher<LogConsole> {
    pub fn new(options: MatchOptions) -> Self {
        Self::with_console(options, LogConsole)
    }
}

impl<C: Console> LoudnessMatcher<C> {
    pub fn with_console(options: MatchOptions, console: C) -> Self {
        Self { options, console }
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    /// Full run: validate, confirm, wipe the output folder, analyse both sets
    /// and re-encode every replacement to its original's loudness.
    pub async fn match_loudness(
        &self,
        table: &mut LoudnessTable,
        prompter: &impl Prompter,
        cancel: &CancellationToken,
    ) -> Result<MatchReport, Error> {
        self.check_directories(&[PathRole::Original, PathRole::Replacement, PathRole::Output])?;

        if !prompter.confirm(RESET_TITLE, RESET_MESSAGE) {
            return Err(Error::Declined);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let limit = self.options.parallelism();
        info!("Running up to {limit} tool invocations at once");

        table.clear();
        self.reset_output().await?;
        self.scan(table)?;
        self.validate_correspondence(table)?;

        let probed = self.probe_sample_rates(table, limit, cancel).await?;
        let originals = self.analyze_originals(table, limit, cancel).await?;
        let replacements = self.analyze_replacements(table, limit, cancel).await?;
        let differences = self.report_differences(table);
        let encoded = self.encode_outputs(table, limit, cancel).await?;

        self.console.line("All done!");
        Ok(MatchReport {
            probed,
            originals,
            replacements,
            encoded,
            differences,
        })
    }

    /// Probes and measures the original set only.
    pub async fn analyze_original(
        &self,
        table: &mut LoudnessTable,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.check_directories(&[PathRole::Original])?;
        let limit = self.options.parallelism();

        table.clear();
        self.scan(table)?;
        self.probe_sample_rates(table, limit, cancel).await?;
        self.analyze_originals(table, limit, cancel).await?;
        Ok(())
    }

    /// Measures the replacement counterpart of every original. Missing
    /// replacements are reported per file instead of aborting.
    pub async fn analyze_replacement(
        &self,
        table: &mut LoudnessTable,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.check_directories(&[PathRole::Original, PathRole::Replacement])?;
        let limit = self.options.parallelism();

        table.clear();
        self.scan(table)?;
        self.analyze_replacements(table, limit, cancel).await?;
        Ok(())
    }

    /// Measures both sets and reports their differences, without touching
    /// the output folder.
    pub async fn print_differences(
        &self,
        table: &mut LoudnessTable,
        cancel: &CancellationToken,
    ) -> Result<Vec<LoudnessDifference>, Error> {
        self.check_directories(&[PathRole::Original, PathRole::Replacement])?;
        let limit = self.options.parallelism();

        table.clear();
        self.scan(table)?;
        self.probe_sample_rates(table, limit, cancel).await?;
        self.analyze_originals(table, limit, cancel).await?;
        self.analyze_replacements(table, limit, cancel).await?;
        Ok(self.report_differences(table))
    }

    /// Every listed directory must be set and exist. Emptiness is checked for
    /// all of them before existence.
    pub fn check_directories(&self, roles: &[PathRole]) -> Result<(), Error> {
        for &role in roles {
            if self.options.dir(role).to_string_lossy().trim().is_empty() {
                return Err(Error::EmptyPath(role));
            }
        }
        for &role in roles {
            let path = self.options.dir(role);
            if !path.is_dir() {
                return Err(Error::MissingDirectory {
                    role,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    /// Deletes the output folder with everything in it and recreates it empty.
    /// Callers must have obtained the user's confirmation.
    pub async fn reset_output(&self) -> Result<(), Error> {
        let output = &self.options.output_dir;
        self.ensure_output_is_separate()?;

        match tokio::fs::remove_dir_all(output).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Io {
                    path: output.clone(),
                    source: e,
                });
            }
        }
        tokio::fs::create_dir_all(output)
            .await
            .map_err(|e| Error::Io {
                path: output.clone(),
                source: e,
            })?;
        info!("Cleared output directory {:?}", output);
        Ok(())
    }

    /// Adds an entry for every audio file in the original folder.
    pub fn scan(&self, table: &mut LoudnessTable) -> Result<usize, Error> {
        let report = scan_directory(&self.options.original_dir, &self.options.extensions, table)?;
        for path in &report.unreadable_names {
            self.console
                .line(&format!("Skipping {path:?}: file name is not valid UTF-8"));
        }
        info!(
            "Found {} audio files in {:?}",
            report.tracked, self.options.original_dir
        );
        Ok(report.tracked)
    }

    /// Every tracked file must have a same-named replacement. The first
    /// missing one aborts the run.
    pub fn validate_correspondence(&self, table: &LoudnessTable) -> Result<(), Error> {
        for (name, _) in table {
            if !self.options.replacement_dir.join(name).is_file() {
                return Err(Error::MissingReplacement(name.clone()));
            }
        }
        Ok(())
    }

    /// Records the sample rate of each original's first audio stream.
    pub async fn probe_sample_rates(
        &self,
        table: &mut LoudnessTable,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Error> {
        self.console.line(&format!(
            "Getting sample rate from {} original files",
            table.len()
        ));
        let dir = &self.options.original_dir;
        let bar = self.progress_bar(table.len(), "Probing");

        let result = run_bounded(
            table.filenames(),
            limit,
            cancel,
            |name, cancel| self.probe_file(dir.join(&name), cancel),
            |name, result| {
                bar.inc(1);
                match result {
                    Ok(rate) => {
                        if let Some(entry) = table.get_mut(&name) {
                            entry.sample_rate = Some(rate);
                        }
                        self.emit(&bar, &format!("{name}: {rate} Hz"));
                    }
                    Err(e) => self.report_failure(&bar, &name, &e),
                }
            },
        )
        .await;
        bar.finish_and_clear();

        let summary = result?;
        self.console.line("Done!");
        Ok(summary)
    }

    /// Records the integrated loudness of every original.
    pub async fn analyze_originals(
        &self,
        table: &mut LoudnessTable,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Error> {
        self.analyze(Side::Original, table, limit, cancel).await
    }

    /// Records the integrated loudness of every original's replacement. A
    /// replacement missing on disk is reported and skipped.
    pub async fn analyze_replacements(
        &self,
        table: &mut LoudnessTable,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Error> {
        self.analyze(Side::Replacement, table, limit, cancel).await
    }

    async fn analyze(
        &self,
        side: Side,
        table: &mut LoudnessTable,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Error> {
        self.console
            .line(&format!("Analyzing {} {} files", table.len(), side.role()));
        let dir = self.options.dir(side.role());
        let bar = self.progress_bar(table.len(), "Analyzing");

        let result = run_bounded(
            table.filenames(),
            limit,
            cancel,
            |name, cancel| {
                let path = dir.join(&name);
                async move {
                    if !path.is_file() {
                        return Err(FileError::Missing(path));
                    }
                    self.measure_file(path, cancel).await
                }
            },
            |name, result| {
                bar.inc(1);
                match result {
                    Ok(lufs) => {
                        self.emit(&bar, &format!("{name}: {lufs} LUFS (Integrated)"));
                        if let Some(entry) = table.get_mut(&name) {
                            match side {
                                Side::Original => entry.original_loudness = Some(lufs),
                                Side::Replacement => entry.replacement_loudness = Some(lufs),
                            }
                        }
                    }
                    Err(FileError::Missing(_)) => self.emit(&bar, &format!("MISSING: {name}!")),
                    Err(e) => self.report_failure(&bar, &name, &e),
                }
            },
        )
        .await;
        bar.finish_and_clear();

        let summary = result?;
        self.console.line("Done!");
        Ok(summary)
    }

    /// Emits one line per comparable pair and returns the differences.
    pub fn report_differences(&self, table: &LoudnessTable) -> Vec<LoudnessDifference> {
        self.console.line("");
        self.console.line("Printing differences");
        let differences = report::differences(table);
        for diff in &differences {
            self.console.line(&diff.to_string());
        }
        differences
    }

    /// Re-encodes every replacement into the output folder at its original's
    /// sample rate and integrated loudness.
    pub async fn encode_outputs(
        &self,
        table: &LoudnessTable,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Error> {
        self.console.line("Matching the loudness ...");

        let mut jobs = Vec::with_capacity(table.len());
        let mut skipped = 0;
        for (name, file) in table {
            match EncodeJob::for_entry(name, file) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!("Not encoding {name}: {e}");
                    self.console.line(&format!("Skipping {name}: {e}"));
                    skipped += 1;
                }
            }
        }

        let bar = self.progress_bar(jobs.len(), "Encoding");
        let result = run_bounded(
            jobs,
            limit,
            cancel,
            |job, cancel| self.encode_file(job, cancel),
            |job, result| {
                bar.inc(1);
                match result {
                    Ok(()) => self.emit(&bar, &format!("{} Done!", job.filename)),
                    Err(e) => self.report_failure(&bar, &job.filename, &e),
                }
            },
        )
        .await;
        bar.finish_and_clear();

        let mut summary = result?;
        summary.skipped = skipped;
        Ok(summary)
    }

    async fn probe_file(&self, path: PathBuf, cancel: CancellationToken) -> Result<u32, FileError> {
        until_cancelled(&cancel, async {
            let mut run = self.options.ffprobe.spawn(probe_args(&path))?;
            let (stdout, stderr) = tokio::join!(
                process::collect_lines(&mut run.stdout),
                process::drain(&mut run.stderr)
            );
            let stdout = stdout?;
            stderr?;
            let status = run.finish().await?;
            if !status.success() {
                return Err(FileError::Failed(status));
            }
            ProbeOutput::parse(&stdout.join("\n"))?.audio_sample_rate()
        })
        .await
    }

    async fn measure_file(
        &self,
        path: PathBuf,
        cancel: CancellationToken,
    ) -> Result<String, FileError> {
        until_cancelled(&cancel, async {
            let mut run = self.options.ffmpeg.spawn(analysis_args(&path))?;
            let (block, stdout) = tokio::join!(
                extract_block(&mut run.stderr),
                process::drain(&mut run.stdout)
            );
            let block = block?;
            stdout?;
            let status = run.finish().await?;
            if !status.success() {
                return Err(FileError::Failed(status));
            }
            let output = LoudnormOutput::from_block(&block)?;
            debug!("{:?}: {:?}", path, output);
            Ok(output.integrated_input()?.to_string())
        })
        .await
    }

    async fn encode_file(&self, job: EncodeJob, cancel: CancellationToken) -> Result<(), FileError> {
        let input = self.options.replacement_dir.join(&job.filename);
        let output = self.options.output_dir.join(&job.filename);
        until_cancelled(&cancel, async {
            let run = self
                .options
                .ffmpeg
                .spawn(encode_args(&input, &output, job.sample_rate, job.target_lufs))?;
            let status = run.finish().await?;
            if !status.success() {
                return Err(FileError::Failed(status));
            }
            Ok(())
        })
        .await
    }

    fn ensure_output_is_separate(&self) -> Result<(), Error> {
        let output = match self.options.output_dir.canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::Io {
                    path: self.options.output_dir.clone(),
                    source: e,
                });
            }
        };
        for role in [PathRole::Original, PathRole::Replacement] {
            if let Ok(input) = self.options.dir(role).canonicalize() {
                if input.starts_with(&output) {
                    return Err(Error::OutputOverlapsInput(self.options.output_dir.clone()));
                }
            }
        }
        Ok(())
    }

    fn report_failure(&self, bar: &ProgressBar, name: &str, error: &FileError) {
        // Cancelled items are accounted for by the caller, not reported.
        if matches!(error, FileError::Cancelled) {
            return;
        }
        warn!("{name}: {error}");
        self.emit(bar, &format!("Error: {name}: {error}"));
    }

    fn emit(&self, bar: &ProgressBar, line: &str) {
        bar.suspend(|| self.console.line(line));
    }

    fn progress_bar(&self, len: usize, message: &'static str) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(message);
        bar
    }
}

fn args_with<const N: usize>(fixed: [&str; N]) -> Vec<OsString> {
    fixed.into_iter().map(OsString::from).collect()
}

fn probe_args(input: &Path) -> Vec<OsString> {
    let mut args = args_with([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]);
    args.push(input.into());
    args
}

fn analysis_args(input: &Path) -> Vec<OsString> {
    let mut args = args_with(["-hide_banner", "-nostats", "-i"]);
    args.push(input.into());
    args.extend(args_with([
        "-af",
        "loudnorm=print_format=json",
        "-f",
        "null",
        "-",
    ]));
    args
}

fn encode_args(input: &Path, output: &Path, sample_rate: u32, target_lufs: f64) -> Vec<OsString> {
    let mut args = args_with(["-hide_banner", "-nostats", "-y", "-i"]);
    args.push(input.into());
    args.push("-ar".into());
    args.push(sample_rate.to_string().into());
    args.push("-af".into());
    args.push(format!("loudnorm=I={target_lufs}").into());
    args.push(output.into());
    args
}
