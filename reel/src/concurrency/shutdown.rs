use tokio::sync::watch;

/// Sending side of the shutdown broadcast.
///
/// Cloning is cheap and every clone signals the same set of receivers.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Notifies every subscribed worker that it must stop.
    ///
    /// Fails only when no receiver is alive, which means no worker is running.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Returns a new receiver. Signals sent before subscribing are not observed.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiving side of the shutdown broadcast. Workers await [`watch::Receiver::changed`].
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
