use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::core::{
    domain::{ExecutionRequest, ExecutionResult},
    traits::runner::{ProcessRunner, RunError},
};

/// Returns a canned result after a fixed delay and records how many runs
/// overlapped.
#[derive(Debug, Clone)]
pub struct RunnerStub {
    result: Result<ExecutionResult, RunError>,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl RunnerStub {
    pub fn new(result: Result<ExecutionResult, RunError>, delay: Duration) -> Self {
        Self {
            result,
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProcessRunner for RunnerStub {
    #[tracing::instrument(skip(self))]
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, RunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        tracing::debug!("Start execution: id={}", request.id);
        tokio::time::sleep(self.delay).await;
        tracing::debug!("Execution result: {:?}", self.result);

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.result.clone()
    }
}
