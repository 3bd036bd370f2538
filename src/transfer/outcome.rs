use anyhow::anyhow;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

use crate::error::{ConnectionError, Result};

/// One-shot result shared by the success and error paths of a transfer
///
/// Whichever callback delivers first wins; later deliveries are dropped.
pub struct OutcomeSlot<T>(Arc<Mutex<Option<oneshot::Sender<Result<T>>>>>);

impl<T> Clone for OutcomeSlot<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> OutcomeSlot<T> {
    pub fn new() -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    pub fn deliver(&self, outcome: Result<T>) {
        let tx = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }

    /// Await the delivered outcome
    pub async fn wait(outcome: oneshot::Receiver<Result<T>>) -> Result<T> {
        outcome
            .await
            .map_err(|_| ConnectionError::Internal(anyhow!("Transfer ended without an outcome")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_slot_delivers_once() {
        let (slot, mut rx) = OutcomeSlot::<()>::new();
        slot.clone().deliver(Err(ConnectionError::Cancelled));
        slot.deliver(Err(ConnectionError::NetworkUnreachable));
        assert!(matches!(rx.try_recv(), Ok(Err(ConnectionError::Cancelled))));
    }

    #[tokio::test]
    async fn test_wait_reports_dropped_slot() {
        let (slot, rx) = OutcomeSlot::<u8>::new();
        drop(slot);
        let result = OutcomeSlot::wait(rx).await;
        assert!(matches!(result, Err(ConnectionError::Internal(_))));
    }
}
