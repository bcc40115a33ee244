use tokio::task::JoinHandle;

use crate::error::{ErrorKind, ReelResult};
use crate::reel_error;

/// Handle for waiting on a spawned worker task.
///
/// [`WorkerHandle`] maps a panic or a cancellation of the task to a [`crate::error::ReelError`]
/// so that callers only deal with one error type.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    handle: Option<JoinHandle<ReelResult<()>>>,
}

impl WorkerHandle {
    pub(crate) fn new(name: String, handle: JoinHandle<ReelResult<()>>) -> Self {
        Self {
            name,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the worker to complete execution.
    pub async fn wait(mut self) -> ReelResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            if err.is_cancelled() {
                reel_error!(
                    ErrorKind::WorkerCancelled,
                    "Worker was cancelled",
                    format!("{}: {err}", self.name)
                )
            } else {
                reel_error!(
                    ErrorKind::WorkerPanic,
                    "Worker panicked",
                    format!("{}: {err}", self.name)
                )
            }
        })??;

        Ok(())
    }
}
