use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::resolve::DestinationResolver;
use super::{query_version, MediaCommand, SegmentFetcher};
use crate::config::DownloaderConfig;
use crate::error::{ClipError, Result};

/// Placeholder yt-dlp replaces with the extension it picked
const EXT_PLACEHOLDER: &str = ".%(ext)s";

/// Segment fetcher backed by yt-dlp
pub struct YtDlpFetcher {
    config: DownloaderConfig,
}

impl YtDlpFetcher {
    pub fn new(config: DownloaderConfig) -> Self {
        Self { config }
    }

    /// Section selector for a single contiguous range
    pub fn section_selector(start_time: &str, end_time: &str) -> String {
        format!("*{}-{}", start_time, end_time)
    }

    /// Build the download command for one segment
    pub fn download_command(
        &self,
        source_url: &str,
        output_base: &Path,
        start_time: &str,
        end_time: &str,
    ) -> MediaCommand {
        let mut template = output_base.as_os_str().to_os_string();
        template.push(EXT_PLACEHOLDER);
        let referer = self.config.referer.as_deref().unwrap_or(source_url);

        let mut cmd = MediaCommand::new(&self.config.binary_path, "Segment download")
            .opt("-f", &self.config.format)
            .opt("--download-sections", Self::section_selector(start_time, end_time))
            .opt("-o", template.to_string_lossy());

        if !self.config.check_certificates {
            cmd = cmd.arg("--no-check-certificates");
        }

        cmd = cmd
            .arg("--no-warnings")
            .opt("--add-header", format!("Referer:{}", referer))
            .opt("--add-header", format!("User-Agent:{}", self.config.user_agent))
            .opt("--merge-output-format", &self.config.merge_output_format);

        if self.config.verbose {
            cmd = cmd.arg("--verbose");
        }

        cmd.args(self.config.extra_args.iter().cloned())
            .arg("--")
            .arg(source_url)
    }
}

#[async_trait]
impl SegmentFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        output_base: &Path,
        start_time: &str,
        end_time: &str,
    ) -> Result<PathBuf> {
        info!(
            "Downloading {} ({} - {}) to {}.*",
            source_url,
            start_time,
            end_time,
            output_base.display()
        );

        let command = self.download_command(source_url, output_base, start_time, end_time);
        let program = command.program_name();

        let mut resolver = DestinationResolver::new(output_base);
        let outcome = command
            .run(self.config.timeout(), |line| resolver.observe(line))
            .await?;

        if !outcome.success() {
            return Err(ClipError::ProcessFailed {
                program,
                status: outcome.status_text(),
                stderr: outcome.stderr_tail(),
            });
        }

        debug!("Download finished, resolving output file");
        match resolver.resolve()? {
            Some(path) => {
                info!("Segment downloaded to {}", path.display());
                Ok(path)
            }
            None => Err(ClipError::MissingArtifact {
                program,
                detail: format!("no file matching {} was found", output_base.display()),
                stderr: outcome.stderr_tail(),
            }),
        }
    }

    async fn version(&self) -> Result<String> {
        query_version(MediaCommand::new(&self.config.binary_path, "Version check").arg("--version")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_selector() {
        assert_eq!(
            YtDlpFetcher::section_selector("00:00:10", "00:00:20"),
            "*00:00:10-00:00:20"
        );
    }

    #[test]
    fn test_download_command_arguments() {
        let fetcher = YtDlpFetcher::new(DownloaderConfig::default());
        let cmd = fetcher.download_command(
            "https://video.example/watch?id=42",
            Path::new("uploads/temp-muxed-1"),
            "00:00:10",
            "00:00:20",
        );

        let args = cmd.args.join(" ");
        assert_eq!(cmd.binary_path, "yt-dlp");
        assert!(args.starts_with("-f bv*+ba/b --download-sections *00:00:10-00:00:20"));
        assert!(args.contains("-o uploads/temp-muxed-1.%(ext)s"));
        assert!(args.contains("--no-check-certificates"));
        assert!(args.contains("--no-warnings"));
        assert!(args.contains("--add-header Referer:https://video.example/watch?id=42"));
        assert!(args.contains("--merge-output-format mp4"));
        assert!(args.contains("--verbose"));
        assert_eq!(
            &cmd.args[cmd.args.len() - 2..],
            ["--", "https://video.example/watch?id=42"]
        );
    }

    #[test]
    fn test_download_command_honours_config() {
        let config = DownloaderConfig {
            referer: Some("https://video.example/".to_string()),
            check_certificates: true,
            verbose: false,
            extra_args: vec!["--force-keyframes-at-cuts".to_string()],
            ..DownloaderConfig::default()
        };
        let cmd = YtDlpFetcher::new(config).download_command(
            "https://video.example/watch?id=42",
            Path::new("temp-muxed-2"),
            "1:00",
            "1:30",
        );

        let args = cmd.args.join(" ");
        assert!(args.contains("Referer:https://video.example/ "));
        assert!(!args.contains("--no-check-certificates"));
        assert!(!args.contains("--verbose"));
        assert!(args.contains("--force-keyframes-at-cuts -- https://video.example/watch?id=42"));
    }
}
