use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::cleanup::CleanupGuard;
use crate::config::Config;
use crate::error::{ClipError, Result};
use crate::job::{ClipRequest, ClipResponse, JobId, JobPaths};
use crate::media::{MediaFactory, Remuxer, SegmentFetcher};

/// Versions reported by the external tools
#[derive(Debug, Clone)]
pub struct ToolVersions {
    pub downloader: String,
    pub remuxer: String,
}

/// Runs clip jobs: segment download, stream copy, cleanup
pub struct ClipWorkflow {
    config: Config,
    fetcher: Arc<dyn SegmentFetcher>,
    remuxer: Arc<dyn Remuxer>,
}

impl ClipWorkflow {
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = MediaFactory::create_fetcher(config.downloader.clone());
        let remuxer = MediaFactory::create_remuxer(config.remuxer.clone());
        Self::with_stages(config, fetcher, remuxer)
    }

    /// Build a workflow around custom stage implementations
    pub fn with_stages(
        config: Config,
        fetcher: Arc<dyn SegmentFetcher>,
        remuxer: Arc<dyn Remuxer>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.uploads_dir)?;

        Ok(Self {
            config,
            fetcher,
            remuxer,
        })
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.config.uploads_dir
    }

    /// Check that both external tools can be launched
    pub async fn check_tools(&self) -> Result<ToolVersions> {
        let downloader = self.fetcher.version().await?;
        info!("Downloader available: {}", downloader);
        let remuxer = self.remuxer.version().await?;
        info!("Remuxer available: {}", remuxer);
        Ok(ToolVersions {
            downloader,
            remuxer,
        })
    }

    /// Produce the clip described by `request` and return its path.
    ///
    /// Intermediate files are removed before this returns, whatever the outcome.
    pub async fn process_clip(&self, request: &ClipRequest) -> Result<PathBuf> {
        request.validate()?;

        let paths = JobPaths::new(
            &self.config.uploads_dir,
            JobId::new(),
            &self.config.remuxer.output_extension,
        );
        let span = info_span!("job", id = %paths.job_id);

        async {
            info!("Processing clip of {} from {} to {}", request.url, request.start_time, request.end_time);

            let mut guard = CleanupGuard::new(&paths);
            let result = self.run_stages(request, &paths, &mut guard).await;

            let report = guard.run(result.is_ok()).await;
            if !report.is_clean() {
                warn!("{} file(s) could not be removed", report.failed.len());
            }

            match &result {
                Ok(path) => info!("Clip ready at {}", path.display()),
                Err(e) => error!("Clip failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        request: &ClipRequest,
        paths: &JobPaths,
        guard: &mut CleanupGuard,
    ) -> Result<PathBuf> {
        let intermediate = self
            .fetcher
            .fetch(&request.url, &paths.intermediate_base, &request.start_time, &request.end_time)
            .await?;
        guard.set_resolved(&intermediate);

        self.remuxer.remux(&intermediate, &paths.final_path).await?;
        Ok(paths.final_path.clone())
    }

    /// Process one request and convert the outcome to the response shape.
    ///
    /// The job runs on its own task so that a panic inside it becomes an
    /// error response instead of taking the caller down.
    pub async fn handle(self: &Arc<Self>, request: ClipRequest) -> ClipResponse {
        let workflow = Arc::clone(self);
        let job = tokio::spawn(async move { workflow.process_clip(&request).await });

        match job.await {
            Ok(Ok(path)) => ClipResponse::success(path),
            Ok(Err(e)) => ClipResponse::from_error(&e),
            Err(e) => {
                error!("Clip job aborted: {}", e);
                ClipResponse::from_error(&ClipError::Internal(panic_message(e)))
            }
        }
    }

    /// Process independent requests concurrently. Responses keep the order of
    /// `requests`; an `Err` entry is answered with an input error.
    pub async fn handle_batch(
        self: &Arc<Self>,
        requests: Vec<std::result::Result<ClipRequest, String>>,
    ) -> Vec<ClipResponse> {
        let total = requests.len();
        let mut responses: Vec<Option<ClipResponse>> = vec![None; total];
        let mut tasks = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            match request {
                Ok(request) => {
                    let workflow = Arc::clone(self);
                    tasks.spawn(async move { (index, workflow.handle(request).await) });
                }
                Err(reason) => {
                    responses[index] = Some(ClipResponse::from_error(&ClipError::InvalidInput(reason)));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, response)) => responses[index] = Some(response),
                Err(e) => error!("Batch task failed: {}", e),
            }
        }

        info!("Batch of {} request(s) finished", total);
        responses
            .into_iter()
            .map(|response| {
                response.unwrap_or_else(|| {
                    ClipResponse::from_error(&ClipError::Internal("request was not processed".to_string()))
                })
            })
            .collect()
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "job panicked".to_string()
    }
}
