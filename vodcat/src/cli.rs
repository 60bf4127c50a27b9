use std::path::PathBuf;

use clap::Parser;
use hls_fix::ConcatMethod;

const AFTER_HELP: &str = "\
environment variables:
  VODCAT_USER_CONFIG_DIR  overrides the directory holding vodcat.conf
  VODCAT_USER_DATA_DIR    overrides the directory holding the cache database
  VODCAT_NO_USER_CONFIG   when non-empty, ignore the user config file
  VODCAT_NO_CACHE         when non-empty, do not remember working directories";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "vodcat",
    about = "Download an HLS VOD stream and merge it into a single file",
    version,
    author,
    args_override_self = true,
    after_help = AFTER_HELP
)]
pub struct CliArgs {
    /// The VOD URL, or the manifest file in batch mode
    pub url: String,

    /// Path to the final output file (defaults to <URL basename>.mp4 in the
    /// current directory)
    pub output: Option<PathBuf>,

    /// Run in batch mode: read `URL<TAB>filename` lines from the manifest
    #[arg(short, long)]
    pub batch: bool,

    /// Skip existing targets (batch mode only)
    #[arg(short, long)]
    pub exist_ok: bool,

    /// Overwrite the output file if it already exists (a backup is kept
    /// until the new file is complete)
    #[arg(short, long)]
    pub force: bool,

    /// Maximum number of concurrent downloads (default: twice the number of
    /// CPU cores)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Keep intermediate files after a successful merge
    #[arg(short, long)]
    pub keep: bool,

    /// Method for concatenating intermediate files
    /// (concat_demuxer, concat_protocol, 0 or 1)
    #[arg(short = 'm', long, default_value = "concat_demuxer")]
    pub concat_method: ConcatMethod,

    /// Times to retry after a possibly recoverable error; 0 disables retries
    #[arg(short, long, default_value_t = 2)]
    pub retries: u32,

    /// Remove the manifest if every entry succeeds (batch mode only)
    #[arg(long)]
    pub remove_manifest_on_success: bool,

    /// Directory for downloaded segments and other intermediate files
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Root directory under which the working directory and the merge
    /// destination are mapped; the result is moved to the output afterwards
    #[arg(long)]
    pub workroot: Option<PathBuf>,

    /// Wipe previously downloaded files and start over
    #[arg(long)]
    pub wipe: bool,

    /// Increase logging verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease logging verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Show the download progress bar regardless of verbosity
    #[arg(long, overrides_with = "no_progress")]
    pub progress: bool,

    /// Hide the download progress bar regardless of verbosity
    #[arg(long, overrides_with = "progress")]
    pub no_progress: bool,

    /// Output debugging information (implies the highest verbosity)
    #[arg(long)]
    pub debug: bool,

    /// Path or name of the ffmpeg executable
    #[arg(long, env = "VODCAT_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl CliArgs {
    /// Progress bar preference from the command line; `None` defers to the
    /// verbosity level.
    pub fn progress_override(&self) -> Option<bool> {
        if self.progress {
            Some(true)
        } else if self.no_progress {
            Some(false)
        } else {
            None
        }
    }
}
