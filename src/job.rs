//! Request-scoped data: the inbound request, the job token, the paths derived
//! from it and the response shape handed back across the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ClipError, Result};

/// Prefix of files written by the downloader
pub const INTERMEDIATE_PREFIX: &str = "temp-muxed-";
/// Prefix of finished clips
pub const FINAL_PREFIX: &str = "clip-";
/// Suffix of a partially written output
pub const PARTIAL_SUFFIX: &str = ".part";

/// Inbound clip request. Times are passed through to the downloader untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClipRequest {
    pub url: String,
    pub start_time: String,
    pub end_time: String,
}

impl ClipRequest {
    pub fn new<S1, S2, S3>(url: S1, start_time: S2, end_time: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            url: url.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }

    /// Check that all fields are present. No syntax check is made on the times.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("url", &self.url),
            ("startTime", &self.start_time),
            ("endTime", &self.end_time),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ClipError::InvalidInput(format!(
                "URL, startTime, and endTime are required (missing: {})",
                missing.join(", ")
            )))
        }
    }
}

/// Per-request token used to name every file the job writes.
///
/// Millisecond timestamp for ordering, plus a random suffix so that two
/// requests arriving within the same millisecond never share file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", millis, &random[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Paths used by one job
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub job_id: JobId,
    /// Extension-less template handed to the downloader
    pub intermediate_base: PathBuf,
    /// Deliverable location
    pub final_path: PathBuf,
}

impl JobPaths {
    pub fn new<P: AsRef<Path>>(uploads_dir: P, job_id: JobId, extension: &str) -> Self {
        let uploads_dir = uploads_dir.as_ref();
        let intermediate_base = uploads_dir.join(format!("{}{}", INTERMEDIATE_PREFIX, job_id));
        let final_path = uploads_dir.join(format!("{}{}.{}", FINAL_PREFIX, job_id, extension));

        Self {
            job_id,
            intermediate_base,
            final_path,
        }
    }

    /// Marker an interrupted write may leave next to the final file
    pub fn partial_output(&self) -> PathBuf {
        let mut name = self.final_path.clone().into_os_string();
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }

    pub fn uploads_dir(&self) -> &Path {
        match self.intermediate_base.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

/// Outcome handed back across the inbound boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClipResponse {
    #[serde(rename_all = "camelCase")]
    Success {
        success: bool,
        file_path: String,
        message: String,
    },
    Failure {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl ClipResponse {
    pub fn success<P: AsRef<Path>>(final_path: P) -> Self {
        ClipResponse::Success {
            success: true,
            file_path: final_path.as_ref().to_string_lossy().to_string(),
            message: "Clip processed successfully".to_string(),
        }
    }

    pub fn failure<S: Into<String>>(error: S, details: Option<String>) -> Self {
        ClipResponse::Failure {
            error: error.into(),
            details,
        }
    }

    pub fn from_error(err: &ClipError) -> Self {
        Self::failure(err.summary(), err.details())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ClipResponse::Success { .. })
    }
}
