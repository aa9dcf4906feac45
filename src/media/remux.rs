use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

use super::{query_version, MediaCommand, Remuxer};
use crate::config::RemuxerConfig;
use crate::error::{ClipError, Result};

/// Remuxer backed by ffmpeg stream copy
pub struct FfmpegRemuxer {
    config: RemuxerConfig,
}

impl FfmpegRemuxer {
    pub fn new(config: RemuxerConfig) -> Self {
        Self { config }
    }

    /// Build the stream-copy command
    pub fn remux_command(&self, input: &Path, output: &Path) -> MediaCommand {
        MediaCommand::new(&self.config.binary_path, "Stream copy")
            .arg("-hide_banner")
            .overwrite()
            .input(input)
            .copy_video()
            .copy_audio()
            .args(self.config.extra_args.iter().cloned())
            .path(output)
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()> {
        info!("Copying streams from {} to {}", input.display(), output.display());

        let command = self.remux_command(input, output);
        let program = command.program_name();
        let outcome = command.run(self.config.timeout(), |_| {}).await?;

        if !outcome.success() {
            return Err(ClipError::ProcessFailed {
                program,
                status: outcome.status_text(),
                stderr: outcome.stderr_tail(),
            });
        }

        // Exit code 0 is not enough, ffmpeg can bail out early without writing anything
        let size = match tokio::fs::metadata(output).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            warn!("{} exited successfully but {} is missing or empty", program, output.display());
            return Err(ClipError::EmptyOutput {
                path: output.display().to_string(),
            });
        }

        info!("Clip written to {} ({} bytes)", output.display(), size);
        Ok(())
    }

    async fn version(&self) -> Result<String> {
        query_version(MediaCommand::new(&self.config.binary_path, "Version check").arg("-version")).await
    }
}
