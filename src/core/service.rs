use std::{sync::Arc, time::Duration};

use crate::{
    constants::{NO_INPUT_MSG, NUL_BYTE_MSG, OVERLOADED_MSG},
    core::{
        classifier::ResultClassifier,
        domain::{ClassifiedOutcome, ErrorKind, ExecutionLimits, ExecutionRequest},
        limiter::ConcurrencyLimiter,
        traits::runner::ProcessRunner,
    },
};

/// Settled once at startup and never changed afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub limits: ExecutionLimits,
    pub max_concurrent_executions: usize,
    pub max_queued_executions: usize,
    pub queue_timeout: Duration,
}

#[derive(Debug)]
pub struct ExecutionService {
    runner: Arc<dyn ProcessRunner>,
    classifier: ResultClassifier,
    limiter: ConcurrencyLimiter,
    limits: ExecutionLimits,
}

impl ExecutionService {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        classifier: ResultClassifier,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            runner,
            classifier,
            limiter: ConcurrencyLimiter::new(
                config.max_concurrent_executions,
                config.max_queued_executions,
                config.queue_timeout,
            ),
            limits: config.limits,
        }
    }

    /// Runs `source` in a fresh interpreter process and classifies the result.
    /// Every call yields exactly one outcome, failures included.
    #[tracing::instrument(skip_all, fields(source_len = source.len()))]
    pub async fn execute(&self, source: &str) -> ClassifiedOutcome {
        if source.trim().is_empty() {
            tracing::info!("rejecting empty source");
            return ClassifiedOutcome::failure(ErrorKind::NoInput, NO_INPUT_MSG);
        }
        // cannot be passed as an argument; the interpreter rejects it as well
        if source.contains('\0') {
            tracing::info!("rejecting source with a NUL byte");
            return ClassifiedOutcome::failure(ErrorKind::SyntaxError, NUL_BYTE_MSG);
        }

        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(error = %e, "execution rejected");
                return ClassifiedOutcome::failure(ErrorKind::Overloaded, OVERLOADED_MSG);
            }
        };

        let request = ExecutionRequest::new(source, &self.limits);
        let id = request.id;
        tracing::debug!(execution_id = %id, "execution admitted");

        // The task owns the permit, so the slot stays taken until the child is
        // reaped even if the caller goes away.
        let runner = self.runner.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            runner.run(request).await
        });

        let outcome = match handle.await {
            Ok(Ok(result)) => self.classifier.classify(result),
            Ok(Err(e)) => {
                tracing::error!(execution_id = %id, error = %e, "runner failed");
                ClassifiedOutcome::failure(ErrorKind::InternalError, e.to_string())
            }
            Err(e) => {
                tracing::error!(execution_id = %id, error = %e, "execution task failed");
                ClassifiedOutcome::failure(
                    ErrorKind::InternalError,
                    "execution task terminated unexpectedly",
                )
            }
        };

        tracing::info!(
            execution_id = %id,
            error_kind = outcome.error_kind().map(|k| k.as_str()),
            execution_time_ms = outcome.execution_time_ms,
            "execution finished"
        );
        outcome
    }

    pub fn free_slots(&self) -> usize {
        self.limiter.available()
    }

    pub fn queued_executions(&self) -> usize {
        self.limiter.waiting()
    }
}
