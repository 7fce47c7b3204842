//! Wake-up signal between request ingestion and the scale-up processor.

use std::sync::Arc;

use tokio::sync::Notify;

/// Single-slot wake signal.
///
/// [`signal`](Self::signal) stores at most one permit; repeated signals
/// before the processor waits collapse into one wake-up. Clones share
/// the same slot.
#[derive(Debug, Clone, Default)]
pub struct WakeSignal {
    notify: Arc<Notify>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiting processor, or arm the next wait if none is pending.
    pub fn signal(&self) {
        self.notify.notify_one();
    }

    /// Wait for the next signal, consuming a stored permit immediately.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}
