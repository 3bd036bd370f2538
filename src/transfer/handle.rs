use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Caller-side view of one logical operation
///
/// Stays valid across redirect hops: the id, abort switch and completion
/// signal belong to the logical request, not to a single round-trip.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    id: Uuid,
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

impl TransferHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Abort the in-flight transfer; a no-op once it has finished
    pub fn abort(&self) {
        if !self.is_finished() {
            tracing::debug!(operation = %self.id, "Abort requested");
            self.cancel.cancel();
        }
    }

    /// The terminal callback has run
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until the terminal callback has run
    pub async fn wait(&mut self) {
        // Err means the operation was dropped without finishing (a callback panicked)
        let _ = self.finished.wait_for(|done| *done).await;
    }
}

/// Engine-side completion signal, consumed when the terminal callback runs
#[derive(Debug)]
pub(crate) struct Completion(watch::Sender<bool>);

impl Completion {
    pub(crate) fn finish(self) {
        let _ = self.0.send(true);
    }
}

pub(crate) fn handle_pair(id: Uuid, cancel: CancellationToken) -> (TransferHandle, Completion) {
    let (tx, rx) = watch::channel(false);
    let handle = TransferHandle {
        id,
        cancel,
        finished: rx,
    };
    (handle, Completion(tx))
}
