// File transfer helpers
// Streams downloads into a scratch file next to the destination and uploads
// from a source that is closed as soon as the transfer ends

use anyhow::anyhow;
use bytes::Bytes;
use futures::future::{self, FutureExt};
use reqwest::Method;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::engine::{Finisher, TransferEngine};
use super::handle::TransferHandle;
use super::options::{ErrorCallback, TransferOptions};
use super::reply::Reply;
use crate::error::{ConnectionError, Result};
use crate::notify::Notifier;
use crate::request::{ByteSource, IntoTarget, RequestBody};

const DOWNLOAD_ERROR: &str = "Error downloading file";
const UPLOAD_ERROR: &str = "Error uploading file";

/// Where upload bytes come from
pub enum UploadSource {
    /// Local file, validated and opened by the coordinator
    Path(PathBuf),
    /// Caller-provided stream
    Reader(ByteSource),
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for UploadSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for UploadSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<ByteSource> for UploadSource {
    fn from(source: ByteSource) -> Self {
        Self::Reader(source)
    }
}

/// Download-to-disk and upload-from-disk on top of [`TransferEngine`]
#[derive(Clone)]
pub struct TransferCoordinator {
    engine: TransferEngine,
    notifier: Arc<dyn Notifier>,
}

impl TransferCoordinator {
    pub fn new(engine: TransferEngine) -> Self {
        let notifier = engine.notifier().clone();
        Self { engine, notifier }
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    /// GET `url` into the file at `dest`
    ///
    /// The body is written to a scratch file in the destination directory and
    /// moved into place once the transfer succeeds, replacing any existing
    /// file. Any ready-read hook in `options` is replaced by the scratch
    /// writer; progress, abort and error hooks are kept. A failed write
    /// aborts the transfer.
    pub fn download_file<P: Send + 'static>(
        &self,
        url: impl IntoTarget,
        dest: impl AsRef<Path>,
        options: TransferOptions,
        payload: P,
        on_finished: impl FnOnce(Reply, P) + Send + 'static,
    ) -> Result<TransferHandle> {
        let dest = dest.as_ref().to_path_buf();
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        if !dir.is_dir() {
            return Err(self.report(ConnectionError::LocalIo {
                title: DOWNLOAD_ERROR,
                message: format!("{} is not a valid destination", dir.display()),
                source: io::Error::new(io::ErrorKind::NotFound, "destination directory missing"),
            }));
        }

        let file = tempfile::Builder::new()
            .prefix(".osf-download-")
            .tempfile_in(&dir)
            .map_err(|source| {
                self.report(ConnectionError::LocalIo {
                    title: DOWNLOAD_ERROR,
                    message: format!("Could not create a scratch file in {}", dir.display()),
                    source,
                })
            })?;
        tracing::debug!(scratch = %file.path().display(), dest = %dest.display(), "Downloading");

        self.start_download(url, dest, Scratch::new(file), options, payload, on_finished)
    }

    fn start_download<P: Send + 'static>(
        &self,
        url: impl IntoTarget,
        dest: PathBuf,
        scratch: Scratch,
        mut options: TransferOptions,
        payload: P,
        on_finished: impl FnOnce(Reply, P) + Send + 'static,
    ) -> Result<TransferHandle> {
        let abort = options
            .abort
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        options.abort = Some(abort.clone());
        let on_error = options.on_error.take();

        // Disk writes happen on a blocking thread fed through this channel
        let (chunks, received) = mpsc::unbounded_channel::<Bytes>();
        options.ready_read = Some(Box::new(move |chunk: &Bytes| {
            let _ = chunks.send(chunk.clone());
        }));
        let (drained, writer) = oneshot::channel::<Scratch>();

        let notifier = self.notifier.clone();
        let finish: Finisher<P> = Box::new(move |outcome: Result<Reply>, payload: P| {
            async move {
                let scratch = match writer.await {
                    Ok(scratch) => scratch,
                    Err(_) => {
                        let err = ConnectionError::Internal(anyhow!("Download writer stopped"));
                        notifier
                            .error(&err.notification_title(), &err.notification_description());
                        call(on_error, err);
                        return;
                    }
                };

                match outcome {
                    Ok(reply) => {
                        let target = dest.clone();
                        let persisted =
                            tokio::task::spawn_blocking(move || scratch.persist_to(&target))
                                .await
                                .unwrap_or_else(|e| {
                                    Err(ConnectionError::Internal(anyhow!(
                                        "Persist task failed: {}",
                                        e
                                    )))
                                });
                        match persisted {
                            Ok(written) => {
                                tracing::info!(
                                    dest = %dest.display(),
                                    bytes = written,
                                    "Download finished"
                                );
                                on_finished(reply, payload);
                            }
                            Err(err) => {
                                notifier.error(
                                    &err.notification_title(),
                                    &err.notification_description(),
                                );
                                call(on_error, err);
                            }
                        }
                    }
                    Err(err) => {
                        // Dropping the scratch file removes it from disk
                        let failure = tokio::task::spawn_blocking(move || scratch.discard())
                            .await
                            .unwrap_or(None);
                        let (err, unreported) = failed_download(err, failure);
                        if unreported {
                            notifier.error(
                                &err.notification_title(),
                                &err.notification_description(),
                            );
                        }
                        call(on_error, err);
                    }
                }
            }
            .boxed()
        });

        let handle = self
            .engine
            .start_with(Method::GET, url, RequestBody::Empty, options, payload, finish)?;
        tokio::task::spawn_blocking(move || {
            let _ = drained.send(scratch.drain(received, &abort));
        });
        Ok(handle)
    }

    /// PUT the contents of `source` to `url`
    ///
    /// The source is closed before either terminal callback runs.
    pub fn upload_file<P: Send + 'static>(
        &self,
        url: impl IntoTarget,
        source: impl Into<UploadSource>,
        mut options: TransferOptions,
        payload: P,
        on_finished: impl FnOnce(Reply, P) + Send + 'static,
    ) -> Result<TransferHandle> {
        let source = match source.into() {
            UploadSource::Path(path) => self.open_source(&path)?,
            UploadSource::Reader(source) => source,
        };

        let (reader, len) = source.into_parts();
        let reader = ClosableReader::new(reader);
        let body = ByteSource::new(reader.clone(), len);

        let on_error = options.on_error.take();
        let finish: Finisher<P> = Box::new(move |outcome: Result<Reply>, payload: P| {
            reader.close();
            match outcome {
                Ok(reply) => {
                    tracing::info!(status = %reply.status, "Upload finished");
                    on_finished(reply, payload);
                }
                Err(err) => call(on_error, err),
            }
            future::ready(()).boxed()
        });

        self.engine
            .start_with(Method::PUT, url, RequestBody::Stream(body), options, payload, finish)
    }

    fn open_source(&self, path: &Path) -> Result<ByteSource> {
        if !path.is_file() {
            return Err(self.report(ConnectionError::LocalIo {
                title: UPLOAD_ERROR,
                message: format!("{} is not a valid source file", path.display()),
                source: io::Error::new(io::ErrorKind::NotFound, "source file missing"),
            }));
        }

        let opened = std::fs::File::open(path).and_then(|file| {
            let len = file.metadata()?.len();
            Ok((file, len))
        });
        let (file, len) = opened.map_err(|source| {
            self.report(ConnectionError::LocalIo {
                title: UPLOAD_ERROR,
                message: format!("Could not open {}", path.display()),
                source,
            })
        })?;

        Ok(ByteSource::new(tokio::fs::File::from_std(file), Some(len)))
    }

    fn report(&self, err: ConnectionError) -> ConnectionError {
        tracing::warn!(error = %err, "Transfer not started");
        self.notifier
            .error(&err.notification_title(), &err.notification_description());
        err
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn call(hook: Option<ErrorCallback>, err: ConnectionError) {
    if let Some(hook) = hook {
        hook(err);
    }
}

fn write_error(source: io::Error) -> ConnectionError {
    ConnectionError::LocalIo {
        title: DOWNLOAD_ERROR,
        message: format!("Could not write downloaded data: {}", source),
        source,
    }
}

/// Error handed to the caller for a failed download, and whether it still
/// has to be reported
///
/// The engine reports every failure except cancellation, and a write failure
/// surfaces as the cancellation it triggered.
fn failed_download(
    err: ConnectionError,
    write_failure: Option<io::Error>,
) -> (ConnectionError, bool) {
    match write_failure {
        Some(source) if err.is_cancelled() => (write_error(source), true),
        Some(source) => {
            tracing::warn!(error = %source, "Scratch write failed after the transfer failed");
            (err, false)
        }
        None => (err, false),
    }
}

/// Scratch file receiving a download
struct Scratch {
    file: NamedTempFile,
    written: u64,
    failure: Option<io::Error>,
}

impl Scratch {
    fn new(file: NamedTempFile) -> Self {
        Self {
            file,
            written: 0,
            failure: None,
        }
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Write chunks until the sender goes away, cancelling `abort` on the
    /// first failure
    ///
    /// Blocks; run it off the async workers.
    fn drain(
        mut self,
        mut chunks: mpsc::UnboundedReceiver<Bytes>,
        abort: &CancellationToken,
    ) -> Self {
        while let Some(chunk) = chunks.blocking_recv() {
            if let Err(e) = self.write(&chunk) {
                tracing::warn!(error = %e, written = self.written, "Failed to write download chunk");
                self.failure = Some(e);
                abort.cancel();
                break;
            }
        }
        self
    }

    /// Remove the scratch file, returning any write failure
    fn discard(self) -> Option<io::Error> {
        self.failure
    }

    /// Move the scratch file over `dest`
    fn persist_to(self, dest: &Path) -> Result<u64> {
        let Scratch {
            mut file,
            written,
            failure,
        } = self;
        if let Some(source) = failure {
            return Err(write_error(source));
        }
        file.flush().map_err(write_error)?;

        match std::fs::remove_file(dest) {
            Ok(()) => tracing::debug!(dest = %dest.display(), "Replaced existing file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ConnectionError::LocalIo {
                    title: DOWNLOAD_ERROR,
                    message: format!("Could not replace {}", dest.display()),
                    source,
                })
            }
        }

        file.persist(dest).map_err(|e| ConnectionError::LocalIo {
            title: DOWNLOAD_ERROR,
            message: format!("Could not save file to {}", dest.display()),
            source: e.error,
        })?;
        Ok(written)
    }
}

/// Reader whose underlying handle can be released while the request body
/// still holds a reference to it
#[derive(Clone)]
struct ClosableReader {
    inner: Arc<Mutex<Option<Box<dyn AsyncRead + Send + Sync + Unpin>>>>,
}

impl ClosableReader {
    fn new(reader: Box<dyn AsyncRead + Send + Sync + Unpin>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(reader))),
        }
    }

    fn close(&self) {
        if lock(&self.inner).take().is_some() {
            tracing::debug!("Upload source closed");
        }
    }
}

impl AsyncRead for ClosableReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match lock(&self.inner).as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "upload source closed",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::testing::{test_engine, RecordingNotifier};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn coordinator(notifier: Arc<RecordingNotifier>) -> TransferCoordinator {
        TransferCoordinator::new(test_engine(notifier, true))
    }

    #[tokio::test]
    async fn test_download_rejects_missing_directory() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing").join("file.bin");

        let result = coordinator(notifier.clone()).download_file(
            "https://files.osf.io/v1/resources/abc",
            &dest,
            TransferOptions::new(),
            (),
            |_, ()| {},
        );

        assert!(matches!(result, Err(ConnectionError::LocalIo { .. })));
        assert_eq!(notifier.errors(), vec![DOWNLOAD_ERROR.to_string()]);
    }

    #[tokio::test]
    async fn test_upload_rejects_missing_source() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dir = TempDir::new().unwrap();

        let result = coordinator(notifier.clone()).upload_file(
            "https://files.osf.io/v1/resources/abc",
            dir.path().join("nope.txt"),
            TransferOptions::new(),
            (),
            |_, ()| {},
        );

        assert!(matches!(result, Err(ConnectionError::LocalIo { .. })));
        assert_eq!(notifier.errors(), vec![UPLOAD_ERROR.to_string()]);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_no_scratch_file() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dir = TempDir::new().unwrap();
        let coordinator = TransferCoordinator::new(test_engine(notifier, false));

        let result = coordinator.download_file(
            "https://files.osf.io/v1/resources/abc",
            dir.path().join("file.bin"),
            TransferOptions::new(),
            (),
            |_, ()| {},
        );

        assert!(matches!(result, Err(ConnectionError::NetworkUnreachable)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Scratch backed by a read-only handle, so every write fails
    fn read_only_scratch(dir: &Path) -> Scratch {
        let path = NamedTempFile::new_in(dir).unwrap().into_temp_path();
        let file = std::fs::File::open(&path).unwrap();
        Scratch::new(NamedTempFile::from_parts(file, path))
    }

    #[test]
    fn test_scratch_persist_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.txt");
        std::fs::write(&dest, b"old contents").unwrap();

        let mut scratch = Scratch::new(NamedTempFile::new_in(dir.path()).unwrap());
        scratch.write(b"new ").unwrap();
        scratch.write(b"data").unwrap();

        assert_eq!(scratch.persist_to(&dest).unwrap(), 8);
        assert_eq!(std::fs::read(&dest).unwrap(), b"new data");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_scratch_discard_removes_file() {
        let dir = TempDir::new().unwrap();
        let mut scratch = Scratch::new(NamedTempFile::new_in(dir.path()).unwrap());
        scratch.write(b"partial").unwrap();

        assert!(scratch.discard().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drain_stops_and_aborts_on_write_failure() {
        let dir = TempDir::new().unwrap();
        let abort = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Bytes::from_static(b"first")).unwrap();
        tx.send(Bytes::from_static(b"second")).unwrap();
        drop(tx);

        let scratch = read_only_scratch(dir.path()).drain(rx, &abort);

        assert!(abort.is_cancelled());
        assert_eq!(scratch.written, 0);
        assert!(scratch.failure.is_some());
        let result = scratch.persist_to(&dir.path().join("out.bin"));
        assert!(matches!(result, Err(ConnectionError::LocalIo { .. })));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_download_reports_write_failure_once() {
        let write_failure = || Some(io::Error::new(io::ErrorKind::Other, "disk full"));

        // The abort the writer triggered is surfaced as the write failure
        let (err, unreported) = failed_download(ConnectionError::Cancelled, write_failure());
        assert!(matches!(err, ConnectionError::LocalIo { title: DOWNLOAD_ERROR, .. }));
        assert!(unreported);

        // Already reported by the engine
        let transport = ConnectionError::Transport {
            kind: "connection_error",
            message: "reset".to_string(),
        };
        let (err, unreported) = failed_download(transport, write_failure());
        assert!(matches!(err, ConnectionError::Transport { .. }));
        assert!(!unreported);

        let (err, unreported) = failed_download(ConnectionError::Cancelled, None);
        assert!(err.is_cancelled());
        assert!(!unreported);
    }

    #[tokio::test]
    async fn test_write_failure_aborts_download_and_notifies_once() {
        let mut server = mockito::Server::new_async().await;
        let _file = server
            .mock("GET", "/file")
            .with_status(200)
            .with_body(vec![7u8; 256 * 1024])
            .create_async()
            .await;

        let notifier = Arc::new(RecordingNotifier::default());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let mut handle = coordinator(notifier.clone())
            .start_download(
                format!("{}/file", server.url()),
                dest.clone(),
                read_only_scratch(dir.path()),
                TransferOptions::new().on_error(move |err| sink.lock().unwrap().push(err)),
                (),
                move |_, ()| flag.store(true, Ordering::SeqCst),
            )
            .unwrap();
        handle.wait().await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ConnectionError::LocalIo { title: DOWNLOAD_ERROR, .. }));
        assert_eq!(notifier.errors(), vec![DOWNLOAD_ERROR.to_string()]);
        assert!(!finished.load(Ordering::SeqCst));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_persists_on_current_thread_runtime() {
        let mut server = mockito::Server::new_async().await;
        let _file = server
            .mock("GET", "/file")
            .with_status(200)
            .with_body("contents")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.txt");
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let mut handle = coordinator(Arc::new(RecordingNotifier::default()))
            .download_file(
                format!("{}/file", server.url()),
                &dest,
                TransferOptions::new(),
                (),
                move |_, ()| flag.store(true, Ordering::SeqCst),
            )
            .unwrap();
        handle.wait().await;

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(std::fs::read(&dest).unwrap(), b"contents");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_closable_reader() {
        let mut reader = ClosableReader::new(Box::new(&b"abc"[..]));
        let mut buf = Vec::new();
        reader.clone().read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"abc");

        reader.close();
        let mut byte = [0u8; 1];
        assert!(reader.read(&mut byte).await.is_err());
    }
}
