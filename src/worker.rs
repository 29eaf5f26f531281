//! Worker module - Runs a pipeline off the caller's thread
//!
//! One run is one blocking task. The control surface stays responsive by
//! draining the progress channel while the task works. Two runs would
//! share the same flux and scratch files, so only one may be in flight per
//! process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::{Pipeline, PipelineSettings};
use crate::report::RunReport;
use crate::tool::{CancelToken, FluxTool};

/// Set while a run holds the slot
static RUN_IN_FLIGHT: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("a disk read is already running")]
    Busy,
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Exclusive right to run; released on drop
#[derive(Debug)]
pub struct RunSlot {
    _private: (),
}

impl RunSlot {
    pub fn acquire() -> Result<Self, WorkerError> {
        RUN_IN_FLIGHT
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| WorkerError::Busy)?;
        debug!("Run slot acquired");
        Ok(Self { _private: () })
    }

    pub fn is_taken() -> bool {
        RUN_IN_FLIGHT.load(Ordering::SeqCst)
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        RUN_IN_FLIGHT.store(false, Ordering::SeqCst);
        debug!("Run slot released");
    }
}

/// Everything a background run needs
pub struct RunRequest {
    pub tool: Arc<dyn FluxTool>,
    pub settings: PipelineSettings,
    pub output_name: String,
    pub cancel: CancelToken,
}

/// Start a job on the blocking pool while holding the run slot
pub fn spawn_job<F, T>(job: F) -> Result<JoinHandle<T>, WorkerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let slot = RunSlot::acquire()?;
    Ok(tokio::task::spawn_blocking(move || {
        let _slot = slot;
        job()
    }))
}

/// Start a full pipeline run, sending progress lines to `progress`
pub fn spawn_run(
    request: RunRequest,
    progress: Sender<String>,
) -> Result<JoinHandle<RunReport>, WorkerError> {
    spawn_job(move || {
        let RunRequest {
            tool,
            settings,
            output_name,
            cancel,
        } = request;

        info!("Starting read into {}", output_name);
        Pipeline::new(tool.as_ref(), &settings)
            .with_cancel(cancel)
            .run(&output_name, &progress)
    })
}

/// Run a pipeline to completion from async code
pub async fn run_async(
    request: RunRequest,
    progress: Sender<String>,
) -> Result<RunReport, WorkerError> {
    Ok(spawn_run(request, progress)?.await?)
}
