use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for intermediate and final files (overrides the config)
    #[arg(short, long)]
    pub uploads_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a time range of a video and write it as a single clip
    Clip {
        /// Source video URL
        #[arg(long)]
        url: String,

        /// Start of the range, in any syntax yt-dlp accepts (e.g. 00:00:10)
        #[arg(short, long)]
        start: String,

        /// End of the range, in any syntax yt-dlp accepts (e.g. 00:00:20)
        #[arg(short, long)]
        end: String,
    },

    /// Process a file of JSON requests, one per line, concurrently
    Batch {
        /// Input file with one {"url", "startTime", "endTime"} object per line
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Check that yt-dlp and ffmpeg can be launched
    Check,

    /// Write the default configuration to a file
    InitConfig {
        /// Destination of the configuration file
        #[arg(default_value = "segclip.toml")]
        path: PathBuf,
    },
}
