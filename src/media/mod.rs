// Media stages of the clip pipeline
//
// - Commands: argument builder shared by both external tools
// - Resolve: locating the downloader's output file
// - Fetcher: time-segment download (yt-dlp)
// - Remux: stream-copy trim into the final container (ffmpeg)

pub mod commands;
pub mod fetcher;
pub mod remux;
pub mod resolve;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use commands::*;
pub use fetcher::YtDlpFetcher;
pub use remux::FfmpegRemuxer;

use crate::config::{DownloaderConfig, RemuxerConfig};
use crate::error::{ClipError, Result};

/// Downloads one time segment of a source URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    /// Download the `start_time`-`end_time` segment of `source_url` to a file
    /// named after `output_base`, returning the path actually written.
    async fn fetch(
        &self,
        source_url: &str,
        output_base: &Path,
        start_time: &str,
        end_time: &str,
    ) -> Result<PathBuf>;

    /// Version string of the underlying tool
    async fn version(&self) -> Result<String>;
}

/// Copies the streams of a downloaded segment into the final file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Remuxer: Send + Sync {
    /// Stream-copy `input` into `output`, overwriting it. Succeeds only if
    /// `output` exists and is non-empty afterwards.
    async fn remux(&self, input: &Path, output: &Path) -> Result<()>;

    /// Version string of the underlying tool
    async fn version(&self) -> Result<String>;
}

/// Factory for the default stage implementations
pub struct MediaFactory;

impl MediaFactory {
    pub fn create_fetcher(config: DownloaderConfig) -> Arc<dyn SegmentFetcher> {
        Arc::new(YtDlpFetcher::new(config))
    }

    pub fn create_remuxer(config: RemuxerConfig) -> Arc<dyn Remuxer> {
        Arc::new(FfmpegRemuxer::new(config))
    }
}

/// Run a version command and return the first line it prints
pub(crate) async fn query_version(command: MediaCommand) -> Result<String> {
    let program = command.program_name();
    let outcome = command.run(None, |_| {}).await?;

    if !outcome.success() {
        return Err(ClipError::ProcessFailed {
            program,
            status: outcome.status_text(),
            stderr: outcome.stderr_tail(),
        });
    }

    Ok(outcome
        .stdout
        .first()
        .cloned()
        .unwrap_or_else(|| "Unknown version".to_string()))
}
