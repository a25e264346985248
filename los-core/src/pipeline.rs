//! End-to-end orchestration of one pipeline run.
//!
//! One invocation performs exactly one linear pass: compute the reporting
//! window, probe the broker, discover the latest tagged request, download
//! its aggregated results, run the external computation, package the
//! output, optionally reconcile completion state, publish with full-replace
//! semantics, and clean up. Every step failure aborts forward progress but
//! still triggers best-effort cleanup of local working data.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, Utc};
use tracing::{info, warn};

use crate::broker::BrokerApi;
use crate::compute::ResultComputation;
use crate::error::Result;
use crate::package;
use crate::remote::{self, RemoteFileStore};
use crate::status::StatusStore;
use crate::window::ReportingWindow;

/// How a run ended short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The report was published under this remote file name.
    Published(String),
    /// No broker request carries the configured tag; the run stopped
    /// cleanly without touching the remote folder.
    NoRequests,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub tag: String,
    pub working_dir: PathBuf,
    pub zip_result: bool,
}

/// Local paths created so far, tracked for cleanup on failure.
#[derive(Debug, Default)]
struct RunState {
    working_dir_created: bool,
    result_path: Option<PathBuf>,
}

pub struct Pipeline {
    broker: Arc<dyn BrokerApi>,
    computation: Arc<dyn ResultComputation>,
    store: Arc<dyn RemoteFileStore>,
    status: Option<StatusStore>,
    settings: PipelineSettings,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("status_tracking", &self.status.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        computation: Arc<dyn ResultComputation>,
        store: Arc<dyn RemoteFileStore>,
        status: Option<StatusStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            broker,
            computation,
            store,
            status,
            settings,
        }
    }

    /// Execute one full run.
    pub async fn run(&mut self) -> Result<Outcome> {
        // Fixed for the whole run so a week boundary crossing between steps
        // cannot split it across two windows.
        let window = ReportingWindow::for_date(Local::now().date_naive());
        info!(
            current = format!("{}-W{:02}", window.current_year, window.current_week),
            start = format!("{}-W{:02}", window.start_year, window.start_week),
            "reporting window computed"
        );

        let mut state = RunState::default();
        let result = self.run_stages(&window, &mut state).await;
        if result.is_err() {
            self.cleanup_after_failure(&state).await;
        }
        result
    }

    async fn run_stages(
        &mut self,
        window: &ReportingWindow,
        state: &mut RunState,
    ) -> Result<Outcome> {
        self.broker.check_availability().await?;

        let Some(request_id) = self.broker.latest_request_id(&self.settings.tag).await? else {
            warn!(tag = %self.settings.tag, "no requests carry the configured tag");
            return Ok(Outcome::NoRequests);
        };

        tokio::fs::create_dir_all(&self.settings.working_dir).await?;
        state.working_dir_created = true;
        let archive = self
            .broker
            .export_and_download(request_id, &self.settings.working_dir)
            .await?;

        let result_path = self.computation.run(&archive, window).await?;
        state.result_path = Some(result_path.clone());

        let mut artifact =
            package::standardize_filename(&result_path, window, Local::now().naive_local())?;
        state.result_path = Some(artifact.clone());
        if self.settings.zip_result {
            artifact = package::zip_result_file(&artifact)?;
            state.result_path = Some(artifact.clone());
        }

        if let Some(status) = self.status.as_mut() {
            let ratios = self.broker.completion_ratios(&self.settings.tag).await?;
            let outcome = status.classify(&ratios);
            status.apply(&ratios, &outcome, Utc::now());
            status.save()?;
        }

        remote::publish(self.store.as_ref(), &artifact).await?;
        let published = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.display().to_string());

        package::purge_working_dir(&artifact)?;
        if self.settings.working_dir.is_dir() {
            tokio::fs::remove_dir_all(&self.settings.working_dir).await?;
        }

        info!(file = published, "report published");
        Ok(Outcome::Published(published))
    }

    /// Best-effort removal of everything the failed run left on disk. A
    /// cleanup failure is logged, never raised, so it cannot mask the
    /// original error.
    async fn cleanup_after_failure(&self, state: &RunState) {
        if let Some(result_path) = &state.result_path
            && let Some(dir) = result_path.parent()
            && dir.is_dir()
            && let Err(err) = tokio::fs::remove_dir_all(dir).await
        {
            warn!(dir = %dir.display(), error = %err, "could not remove result directory");
        }
        if state.working_dir_created
            && self.settings.working_dir.is_dir()
            && let Err(err) = tokio::fs::remove_dir_all(&self.settings.working_dir).await
        {
            warn!(
                dir = %self.settings.working_dir.display(),
                error = %err,
                "could not remove working directory"
            );
        }
    }
}
