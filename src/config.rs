use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{ClipError, Result};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding intermediate downloads and finished clips
    pub uploads_dir: PathBuf,
    pub downloader: DownloaderConfig,
    pub remuxer: RemuxerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Path to downloader binary (e.g., yt-dlp)
    pub binary_path: String,
    /// Format selector: best video+audio, falling back to best single stream
    pub format: String,
    /// Container the downloader merges separate streams into
    pub merge_output_format: String,
    /// User-Agent header sent to the source host
    pub user_agent: String,
    /// Referer header sent to the source host; the request URL when unset
    pub referer: Option<String>,
    /// Verify TLS certificates of the source host
    pub check_certificates: bool,
    /// Pass `--verbose` to the downloader
    pub verbose: bool,
    /// Additional arguments inserted before the source URL
    pub extra_args: Vec<String>,
    /// Kill the downloader after this many seconds (0 disables)
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxerConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Extension of the final clip
    pub output_extension: String,
    /// Additional arguments inserted before the output path
    pub extra_args: Vec<String>,
    /// Kill ffmpeg after this many seconds (0 disables)
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the rolling log file
    pub directory: PathBuf,
    /// Base name of the rolling log file
    pub file_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            downloader: DownloaderConfig::default(),
            remuxer: RemuxerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            format: "bv*+ba/b".to_string(),
            merge_output_format: "mp4".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: None,
            check_certificates: false,
            verbose: true,
            extra_args: Vec::new(),
            timeout_secs: 1800,
        }
    }
}

impl Default for RemuxerConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            output_extension: "mp4".to_string(),
            extra_args: Vec::new(),
            timeout_secs: 600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".segclip").join("log"),
            file_name: "segclip.log".to_string(),
        }
    }
}

impl DownloaderConfig {
    pub fn timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.timeout_secs)
    }
}

impl RemuxerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.timeout_secs)
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClipError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClipError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ClipError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.uploads_dir.as_os_str().is_empty() {
            return Err(ClipError::Config("uploads_dir must not be empty".to_string()));
        }
        if self.downloader.binary_path.trim().is_empty() {
            return Err(ClipError::Config("downloader.binary_path must not be empty".to_string()));
        }
        if self.remuxer.binary_path.trim().is_empty() {
            return Err(ClipError::Config("remuxer.binary_path must not be empty".to_string()));
        }
        if self.remuxer.output_extension.trim().is_empty() {
            return Err(ClipError::Config("remuxer.output_extension must not be empty".to_string()));
        }
        Ok(())
    }
}
