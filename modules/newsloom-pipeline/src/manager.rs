//! Pipeline manager: owns the run lock, the cancellation flag and the last
//! run's outcome. `start` rejects with PipelineBusy while a run is in
//! flight; `stop` requests cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use newsloom_common::{NewsloomError, PipelineStatus, RunSummary};
use serde::Serialize;
use tracing::info;

use crate::broker::{LogRecord, ProgressBroker};
use crate::lock::RunLock;
use crate::run::{execute, PipelineDeps, RunParams};

#[derive(Debug, Clone, Serialize, Default)]
pub struct StatusView {
    pub status: PipelineStatus,
    pub last_result: Option<RunSummary>,
}

struct ManagerState {
    status: PipelineStatus,
    last_result: Option<RunSummary>,
}

pub struct PipelineManager {
    deps: Arc<PipelineDeps>,
    lock: RunLock,
    broker: Arc<ProgressBroker>,
    cancelled: Arc<AtomicBool>,
    state: Mutex<ManagerState>,
}

impl PipelineManager {
    pub fn new(deps: Arc<PipelineDeps>, lock: RunLock, broker: Arc<ProgressBroker>) -> Self {
        Self {
            deps,
            lock,
            broker,
            cancelled: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(ManagerState {
                status: PipelineStatus::Idle,
                last_result: None,
            }),
        }
    }

    pub fn broker(&self) -> Arc<ProgressBroker> {
        self.broker.clone()
    }

    /// Acquire the lock and run the pipeline to completion. Used directly by
    /// tests and wrapped by `start` for the admin surface.
    pub async fn run_once(&self, params: RunParams) -> Result<RunSummary, NewsloomError> {
        self.lock.acquire().await?;
        self.cancelled.store(false, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap();
            state.status = PipelineStatus::Running;
        }
        info!(mode = %params.mode, "Pipeline run starting");

        let summary = execute(&self.deps, params, self.cancelled.clone()).await;

        // The lock is released on every terminal state.
        self.lock.release().await;
        {
            let mut state = self.state.lock().unwrap();
            state.status = summary.status;
            state.last_result = Some(summary.clone());
        }
        Ok(summary)
    }

    /// Fire-and-forget start for the admin surface. Fails fast with
    /// PipelineBusy when a run is already in flight, before spawning.
    pub async fn start(self: &Arc<Self>, params: RunParams) -> Result<(), NewsloomError> {
        self.lock.acquire().await?;
        self.cancelled.store(false, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap();
            state.status = PipelineStatus::Running;
        }
        info!(mode = %params.mode, "Pipeline run starting (detached)");

        let manager = self.clone();
        tokio::spawn(async move {
            let summary = execute(&manager.deps, params, manager.cancelled.clone()).await;
            manager.lock.release().await;
            let mut state = manager.state.lock().unwrap();
            state.status = summary.status;
            state.last_result = Some(summary);
        });
        Ok(())
    }

    /// Request cooperative cancellation. In-flight fetches are abandoned at
    /// their next deadline; a synthesis write already started is allowed to
    /// finish.
    pub fn stop(&self) -> PipelineStatus {
        let status = self.state.lock().unwrap().status;
        if status == PipelineStatus::Running {
            info!("Stop requested, raising cancellation flag");
            self.cancelled.store(true, Ordering::SeqCst);
        }
        status
    }

    pub fn status(&self) -> StatusView {
        let state = self.state.lock().unwrap();
        StatusView {
            status: state.status,
            last_result: state.last_result.clone(),
        }
    }

    pub fn logs(&self, limit: usize, offset: usize) -> Vec<LogRecord> {
        self.broker.logs(limit, offset)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().status == PipelineStatus::Running
    }
}
