use std::io::{BufRead as _, Write as _};
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use loudness_match::{
    AlwaysAnswer, CancellationToken, Error, ExtensionFilter, ExternalTool, LoudnessMatcher,
    LoudnessTable, MatchOptions, Prompter,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// ffmpeg executable used for analysis and encoding
    #[arg(long, global = true, env = "FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe executable used to read sample rates
    #[arg(long, global = true, env = "FFPROBE", default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// maximum number of concurrent tool invocations, default depends on CPU core count
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// match file extensions case-sensitively
    #[arg(long, global = true)]
    case_sensitive: bool,

    /// do not draw progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Re-encode every replacement to the loudness of its original
    Match {
        #[command(flatten)]
        dirs: Dirs,

        /// output directory, all of its current contents are deleted
        #[arg(short, long)]
        output: PathBuf,

        /// do not ask before clearing the output directory
        #[arg(short, long)]
        yes: bool,
    },
    /// Measure sample rate and loudness of the originals
    AnalyzeOriginal {
        /// directory with the original files
        original: PathBuf,
    },
    /// Measure loudness of the replacements
    AnalyzeReplacement {
        #[command(flatten)]
        dirs: Dirs,
    },
    /// Measure both sets and print their loudness differences
    Diff {
        #[command(flatten)]
        dirs: Dirs,
    },
}

#[derive(Args)]
struct Dirs {
    /// directory with the original files
    original: PathBuf,

    /// directory with same-named replacement files
    replacement: PathBuf,
}

struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, title: &str, message: &str) -> bool {
        eprint!("{title} {message} [y/N] ");
        _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes" | "Yes")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();

    let mut options = MatchOptions {
        ffmpeg: ExternalTool::new(cli.ffmpeg),
        ffprobe: ExternalTool::new(cli.ffprobe),
        extensions: ExtensionFilter {
            ignore_case: !cli.case_sensitive,
            ..ExtensionFilter::default()
        },
        max_parallelism: cli.jobs,
        show_progress: !cli.no_progress,
        ..MatchOptions::default()
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling, waiting for running tools to stop...");
            on_ctrl_c.cancel();
        }
    });

    let mut table = LoudnessTable::new();

    let outcome = match cli.command {
        Command::Match { dirs, output, yes } => {
            options.original_dir = dirs.original;
            options.replacement_dir = dirs.replacement;
            options.output_dir = output;
            log_options(&options);
            let matcher = LoudnessMatcher::new(options);
            let result = if yes {
                matcher
                    .match_loudness(&mut table, &AlwaysAnswer(true), &cancel)
                    .await
            } else {
                matcher
                    .match_loudness(&mut table, &StdinPrompter, &cancel)
                    .await
            };
            result.map(|report| {
                let failed = report.encoded.failed + report.encoded.skipped;
                info!(
                    "Encoding complete. {} files succeeded, {} files failed.",
                    report.encoded.succeeded, failed
                );
                failed
            })
        }
        Command::AnalyzeOriginal { original } => {
            options.original_dir = original;
            log_options(&options);
            LoudnessMatcher::new(options)
                .analyze_original(&mut table, &cancel)
                .await
                .map(|_| 0)
        }
        Command::AnalyzeReplacement { dirs } => {
            options.original_dir = dirs.original;
            options.replacement_dir = dirs.replacement;
            log_options(&options);
            LoudnessMatcher::new(options)
                .analyze_replacement(&mut table, &cancel)
                .await
                .map(|_| 0)
        }
        Command::Diff { dirs } => {
            options.original_dir = dirs.original;
            options.replacement_dir = dirs.replacement;
            log_options(&options);
            LoudnessMatcher::new(options)
                .print_differences(&mut table, &cancel)
                .await
                .map(|_| 0)
        }
    };

    match outcome {
        Ok(0) => {
            info!("Finished successfully!");
            Ok(())
        }
        Ok(failed) => bail!("{failed} files could not be matched"),
        Err(Error::Declined) => {
            info!("Nothing was changed.");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            warn!("Cancelled. {} files were tracked when stopping.", table.len());
            std::process::exit(130);
        }
        Err(e) => {
            error!("Failed: {}", e);
            Err(e)?
        }
    }
}

fn log_options(options: &MatchOptions) {
    info!("Starting with options:");
    info!("  Original Directory: {:?}", options.original_dir);
    if !options.replacement_dir.as_os_str().is_empty() {
        info!("  Replacement Directory: {:?}", options.replacement_dir);
    }
    if !options.output_dir.as_os_str().is_empty() {
        info!("  Output Directory: {:?}", options.output_dir);
    }
    info!("  ffmpeg: {}", options.ffmpeg);
    info!("  ffprobe: {}", options.ffprobe);
    info!("  Parallel Jobs: {}", options.parallelism());
    info!("---");
}
