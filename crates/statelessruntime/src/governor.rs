use crate::executor::{PassOutput, PassResult};
use statelesscore::FlowError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum GovernedPass {
    Finished(PassOutput),
    TimedOut,
}

/// Bounds the wall-clock time of one invocation.
///
/// The pass is driven on a blocking-pool thread, so a node that blocks its
/// thread cannot hold up the deadline timer. When the deadline passes first,
/// the shared token is cancelled and the caller gets
/// [`GovernedPass::TimedOut`] straight away; the abandoned pass winds down
/// on its own once its current node observes the cancellation. A pass that
/// finishes after the deadline is still reported as timed out.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineGovernor {
    timeout: Option<Duration>,
}

impl DeadlineGovernor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn govern<F>(&self, pass: F, cancellation: CancellationToken) -> Result<GovernedPass, FlowError>
    where
        F: Future<Output = PassResult> + Send + 'static,
    {
        let start = Instant::now();
        let runtime = Handle::current();
        let mut handle = tokio::task::spawn_blocking(move || runtime.block_on(pass));

        let joined = match self.timeout {
            None => handle.await,
            Some(limit) => {
                tokio::select! {
                    biased;
                    joined = &mut handle => joined,
                    _ = tokio::time::sleep(limit) => {
                        return Ok(Self::expire(limit, &cancellation));
                    }
                }
            }
        };

        let result = joined.map_err(|e| FlowError::Execution(format!("pass task failed: {}", e)))?;
        if let Some(limit) = self.timeout {
            if start.elapsed() > limit {
                return Ok(Self::expire(limit, &cancellation));
            }
        }

        match result {
            PassResult::Completed(output) => Ok(GovernedPass::Finished(output)),
            PassResult::Cancelled => Ok(GovernedPass::TimedOut),
        }
    }

    fn expire(limit: Duration, cancellation: &CancellationToken) -> GovernedPass {
        cancellation.cancel();
        tracing::warn!("Invocation exceeded its {}ms deadline", limit.as_millis());
        GovernedPass::TimedOut
    }
}
