use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({status})")]
    ProcessFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The tool exited with status 0 but the expected file never appeared.
    #[error("{program} reported success but {detail}")]
    MissingArtifact {
        program: String,
        detail: String,
        stderr: String,
    },

    #[error("Output file is missing or empty: {path}")]
    EmptyOutput { path: String },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl ClipError {
    /// Short message for the `error` field of a response
    pub fn summary(&self) -> String {
        match self {
            ClipError::InvalidInput(msg) => msg.clone(),
            ClipError::Spawn { program, .. } => format!("Failed to launch {}", program),
            ClipError::ProcessFailed { program, .. } => format!("{} failed", program),
            ClipError::MissingArtifact { program, .. } => {
                format!("{} did not produce an output file", program)
            }
            ClipError::EmptyOutput { .. } => "Output file is missing or empty".to_string(),
            ClipError::Timeout { program, .. } => format!("{} timed out", program),
            ClipError::Config(_) | ClipError::Toml(_) => "Configuration error".to_string(),
            ClipError::Io(_) | ClipError::Internal(_) => "Failed to process clip".to_string(),
        }
    }

    /// Diagnostic text for the optional `details` field of a response
    pub fn details(&self) -> Option<String> {
        match self {
            ClipError::InvalidInput(_) => None,
            ClipError::Spawn { source, .. } => Some(source.to_string()),
            ClipError::ProcessFailed { status, stderr, .. } => {
                Some(with_stderr(status.clone(), stderr))
            }
            ClipError::MissingArtifact { detail, stderr, .. } => {
                Some(with_stderr(detail.clone(), stderr))
            }
            ClipError::EmptyOutput { path } => Some(path.clone()),
            ClipError::Timeout { secs, .. } => Some(format!("killed after {}s", secs)),
            ClipError::Config(msg) | ClipError::Internal(msg) => Some(msg.clone()),
            ClipError::Io(e) => Some(e.to_string()),
            ClipError::Toml(e) => Some(e.to_string()),
        }
    }

    /// Whether the error was caused by the caller rather than the pipeline
    pub fn is_input_error(&self) -> bool {
        matches!(self, ClipError::InvalidInput(_))
    }
}

fn with_stderr(head: String, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        head
    } else {
        format!("{}: {}", head, stderr.trim_end())
    }
}

pub type Result<T> = std::result::Result<T, ClipError>;
