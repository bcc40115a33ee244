use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// How long a test waits for a stage to publish before giving up.
const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// A [`Notify`] wait bounded by [`WAIT_LIMIT`], so a stage that never publishes fails the test
/// instead of hanging it.
#[derive(Debug, Clone)]
pub struct TimedNotify(Arc<Notify>);

impl TimedNotify {
    pub fn new(notify: Arc<Notify>) -> Self {
        Self(notify)
    }

    /// # Panics
    ///
    /// Panics when no notification arrives within [`WAIT_LIMIT`].
    pub async fn notified(&self) {
        if tokio::time::timeout(WAIT_LIMIT, self.0.notified()).await.is_err() {
            panic!("expected publishes did not arrive within {WAIT_LIMIT:?}");
        }
    }
}
