use bytes::Bytes;
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;

/// Reports (bytes transferred, total bytes if known)
pub type ProgressCallback = Box<dyn FnMut(u64, Option<u64>) + Send + Sync>;

/// Receives response body chunks as they arrive
pub type ReadyReadCallback = Box<dyn FnMut(&Bytes) + Send + Sync>;

/// Terminal error hook
pub type ErrorCallback = Box<dyn FnOnce(ConnectionError) + Send>;

/// Transfer plumbing consumed by the engine
///
/// None of this is ever handed to the success callback; the caller's own
/// data travels separately as the operation payload.
#[derive(Default)]
pub struct TransferOptions {
    pub(crate) redirect_count: u32,
    pub(crate) download_progress: Option<ProgressCallback>,
    pub(crate) upload_progress: Option<ProgressCallback>,
    pub(crate) ready_read: Option<ReadyReadCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) abort: Option<CancellationToken>,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_download_progress(
        mut self,
        callback: impl FnMut(u64, Option<u64>) + Send + Sync + 'static,
    ) -> Self {
        self.download_progress = Some(Box::new(callback));
        self
    }

    pub fn on_upload_progress(
        mut self,
        callback: impl FnMut(u64, Option<u64>) + Send + Sync + 'static,
    ) -> Self {
        self.upload_progress = Some(Box::new(callback));
        self
    }

    /// Stream the body to `callback` instead of buffering it in the reply
    pub fn on_ready_read(mut self, callback: impl FnMut(&Bytes) + Send + Sync + 'static) -> Self {
        self.ready_read = Some(Box::new(callback));
        self
    }

    /// Called once if the operation ends in an error, cancellation included
    pub fn on_error(mut self, callback: impl FnOnce(ConnectionError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Abort the operation when `token` is cancelled
    pub fn abort_on(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("redirect_count", &self.redirect_count)
            .field("download_progress", &self.download_progress.is_some())
            .field("upload_progress", &self.upload_progress.is_some())
            .field("ready_read", &self.ready_read.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("abort", &self.abort.is_some())
            .finish()
    }
}
