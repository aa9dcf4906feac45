use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::job::JobPaths;
use crate::media::resolve::find_artifacts;

/// Result of one cleanup pass
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the removal of a job's intermediate files.
///
/// Created before the first process is spawned. [`CleanupGuard::run`] is the
/// normal exit path; if the guard is dropped without it (panic, cancelled
/// future) the same files are removed synchronously in `Drop`.
#[derive(Debug)]
pub struct CleanupGuard {
    paths: JobPaths,
    resolved: Option<PathBuf>,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(paths: &JobPaths) -> Self {
        Self {
            paths: paths.clone(),
            resolved: None,
            armed: true,
        }
    }

    /// Record the intermediate file the downloader produced
    pub fn set_resolved<P: AsRef<Path>>(&mut self, path: P) {
        self.resolved = Some(path.as_ref().to_path_buf());
    }

    /// Files to remove: the resolved intermediate, any other
    /// `temp-muxed-<id>.*` leftover, the `.part` marker and, unless the job
    /// succeeded, the final file.
    pub fn targets(&self, keep_final: bool) -> Vec<PathBuf> {
        let mut targets: Vec<PathBuf> = self.resolved.iter().cloned().collect();

        match find_artifacts(&self.paths.intermediate_base) {
            Ok(leftovers) => {
                for path in leftovers {
                    if !targets.contains(&path) {
                        targets.push(path);
                    }
                }
            }
            Err(e) => warn!("Could not scan {} for leftovers: {}", self.paths.uploads_dir().display(), e),
        }

        targets.push(self.paths.partial_output());
        if !keep_final {
            targets.push(self.paths.final_path.clone());
        }
        targets
    }

    /// Remove every target concurrently. Never fails: problems are logged and
    /// reported so they cannot mask the job's own result.
    pub async fn run(&mut self, succeeded: bool) -> CleanupReport {
        self.armed = false;

        let mut tasks = JoinSet::new();
        for path in self.targets(succeeded) {
            tasks.spawn(async move {
                let result = remove_artifact(&path).await;
                (path, result)
            });
        }

        let mut report = CleanupReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, Ok(true))) => {
                    debug!("Removed {}", path.display());
                    report.removed.push(path);
                }
                Ok((_, Ok(false))) => {}
                Ok((path, Err(e))) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
                Err(e) => warn!("Cleanup task failed: {}", e),
            }
        }
        report
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!("Job {} ended without cleanup, removing its files", self.paths.job_id);
        for path in self.targets(false) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Remove one file. `Ok(false)` when it was already gone.
async fn remove_artifact(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;

    fn job_in(dir: &Path) -> JobPaths {
        JobPaths::new(dir, JobId::from("1700000000000-abcd1234"), "mp4")
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"data").unwrap();
    }

    #[tokio::test]
    async fn test_success_keeps_only_the_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = job_in(dir.path());
        let intermediate = dir.path().join("temp-muxed-1700000000000-abcd1234.mp4");
        let fragment = dir.path().join("temp-muxed-1700000000000-abcd1234.f140.m4a.part");
        touch(&intermediate);
        touch(&fragment);
        touch(&paths.final_path);
        touch(&paths.partial_output());

        let mut guard = CleanupGuard::new(&paths);
        guard.set_resolved(&intermediate);
        let report = guard.run(true).await;

        assert!(report.is_clean());
        assert_eq!(report.removed.len(), 3);
        assert!(paths.final_path.exists());
        assert!(!intermediate.exists());
        assert!(!fragment.exists());
        assert!(!paths.partial_output().exists());
    }

    #[tokio::test]
    async fn test_failure_removes_the_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = job_in(dir.path());
        touch(&paths.final_path);

        let report = CleanupGuard::new(&paths).run(false).await;

        assert_eq!(report.removed, vec![paths.final_path.clone()]);
        assert!(!paths.final_path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = job_in(dir.path());
        let intermediate = dir.path().join("temp-muxed-1700000000000-abcd1234.webm");
        touch(&intermediate);

        let mut guard = CleanupGuard::new(&paths);
        guard.set_resolved(&intermediate);

        let first = guard.run(false).await;
        let second = guard.run(false).await;

        assert_eq!(first.removed, vec![intermediate]);
        assert!(second.is_clean());
        assert!(second.removed.is_empty());
    }

    #[tokio::test]
    async fn test_other_jobs_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let paths = job_in(dir.path());
        let other = dir.path().join("temp-muxed-1700000000000-ffff0000.mp4");
        touch(&other);

        CleanupGuard::new(&paths).run(false).await;

        assert!(other.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let paths = job_in(dir.path());
        // A directory in place of the .part marker cannot be removed with remove_file
        std::fs::create_dir(paths.partial_output()).unwrap();
        let intermediate = dir.path().join("temp-muxed-1700000000000-abcd1234.mp4");
        touch(&intermediate);

        let mut guard = CleanupGuard::new(&paths);
        guard.set_resolved(&intermediate);
        let report = guard.run(false).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, paths.partial_output());
        assert!(!intermediate.exists());
    }

    #[test]
    fn test_drop_without_run_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = job_in(dir.path());
        let intermediate = dir.path().join("temp-muxed-1700000000000-abcd1234.mp4");
        touch(&intermediate);
        touch(&paths.final_path);

        {
            let mut guard = CleanupGuard::new(&paths);
            guard.set_resolved(&intermediate);
        }

        assert!(!intermediate.exists());
        assert!(!paths.final_path.exists());
    }
}
