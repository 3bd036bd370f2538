use bytes::BytesMut;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use reqwest::header::LOCATION;
use reqwest::{Client, Method, StatusCode, Url};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handle::{handle_pair, Completion, TransferHandle};
use super::options::{ErrorCallback, TransferOptions};
use super::outcome::OutcomeSlot;
use super::reply::Reply;
use crate::auth::{AuthSession, LoginLauncher, Token};
use crate::error::{ConnectionError, Result};
use crate::notify::Notifier;
use crate::reachability::Reachability;
use crate::request::{ByteSource, IntoTarget, Replay, RequestBody, RequestBuilder};

/// Maximum number of redirects followed for one logical request
pub const MAX_REDIRECTS: u32 = 5;

/// Success callback: the reply plus the caller's untouched payload
pub type SuccessCallback<P> = Box<dyn FnOnce(Reply, P) + Send>;

/// Terminal step of an operation, awaited before its handle reports finished
pub(crate) type Finisher<P> = Box<dyn FnOnce(Result<Reply>, P) -> BoxFuture<'static, ()> + Send>;

/// One logical request, alive until its terminal callback has run
struct PendingOperation<P> {
    id: Uuid,
    method: Method,
    url: Url,
    replay: Replay,
    options: TransferOptions,
    payload: P,
    finish: Finisher<P>,
    cancel: CancellationToken,
    completion: Completion,
}

/// Outcome of a single HTTP round-trip
enum Exchange {
    Complete(Reply),
    Redirect { status: StatusCode, location: Url },
}

/// Asynchronous GET/POST/PUT/DELETE with redirect chasing and a single
/// completion funnel
///
/// Every operation returns a [`TransferHandle`] immediately; the outcome is
/// delivered later to exactly one of the success callback or the error hook.
/// Must be called from within a tokio runtime.
#[derive(Clone)]
pub struct TransferEngine {
    client: Client,
    builder: RequestBuilder,
    session: Arc<AuthSession>,
    notifier: Arc<dyn Notifier>,
    reachability: Arc<dyn Reachability>,
    login: LoginLauncher,
}

impl TransferEngine {
    pub fn new(
        client: Client,
        session: Arc<AuthSession>,
        notifier: Arc<dyn Notifier>,
        reachability: Arc<dyn Reachability>,
        login: LoginLauncher,
    ) -> Self {
        let builder = RequestBuilder::new(client.clone(), session.clone());
        Self {
            client,
            builder,
            session,
            notifier,
            reachability,
            login,
        }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn get<P: Send + 'static>(
        &self,
        url: impl IntoTarget,
        options: TransferOptions,
        payload: P,
        on_success: impl FnOnce(Reply, P) + Send + 'static,
    ) -> Result<TransferHandle> {
        self.start(
            Method::GET,
            url,
            RequestBody::Empty,
            options,
            payload,
            Box::new(on_success),
        )
    }

    /// POST URL-encoded form fields
    pub fn post<P, K, V>(
        &self,
        url: impl IntoTarget,
        form: impl IntoIterator<Item = (K, V)>,
        options: TransferOptions,
        payload: P,
        on_success: impl FnOnce(Reply, P) + Send + 'static,
    ) -> Result<TransferHandle>
    where
        P: Send + 'static,
        K: Into<String>,
        V: Into<String>,
    {
        let body = RequestBody::form(form)?;
        self.start(Method::POST, url, body, options, payload, Box::new(on_success))
    }

    /// PUT a streamed body
    pub fn put<P: Send + 'static>(
        &self,
        url: impl IntoTarget,
        source: ByteSource,
        options: TransferOptions,
        payload: P,
        on_success: impl FnOnce(Reply, P) + Send + 'static,
    ) -> Result<TransferHandle> {
        self.start(
            Method::PUT,
            url,
            RequestBody::Stream(source),
            options,
            payload,
            Box::new(on_success),
        )
    }

    pub fn delete<P: Send + 'static>(
        &self,
        url: impl IntoTarget,
        options: TransferOptions,
        payload: P,
        on_success: impl FnOnce(Reply, P) + Send + 'static,
    ) -> Result<TransferHandle> {
        self.start(
            Method::DELETE,
            url,
            RequestBody::Empty,
            options,
            payload,
            Box::new(on_success),
        )
    }

    /// GET and wait for the outcome
    pub async fn fetch(&self, url: impl IntoTarget) -> Result<Reply> {
        let (slot, outcome) = OutcomeSlot::new();
        let on_error = slot.clone();
        self.get(
            url,
            TransferOptions::new().on_error(move |err| on_error.deliver(Err(err))),
            (),
            move |reply, ()| slot.deliver(Ok(reply)),
        )?;
        OutcomeSlot::wait(outcome).await
    }

    /// POST a form and wait for the outcome
    pub async fn submit_form<K, V>(
        &self,
        url: impl IntoTarget,
        form: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Reply>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (slot, outcome) = OutcomeSlot::new();
        let on_error = slot.clone();
        self.post(
            url,
            form,
            TransferOptions::new().on_error(move |err| on_error.deliver(Err(err))),
            (),
            move |reply, ()| slot.deliver(Ok(reply)),
        )?;
        OutcomeSlot::wait(outcome).await
    }

    /// Single authenticated GET with a candidate token
    ///
    /// Bypasses the completion funnel: no notifications, no logout, no
    /// redirect chasing. Used only to check whether the server accepts `token`.
    pub async fn verify_token(&self, url: impl IntoTarget, token: &Token) -> Result<Reply> {
        self.ensure_reachable()?;
        let request = self
            .builder
            .build_with_token(url.into_target()?, &token.access_token)?;
        let mut options = TransferOptions::new();

        match self
            .exchange(request, &mut options, &CancellationToken::new())
            .await?
        {
            Exchange::Complete(reply) => Ok(reply),
            Exchange::Redirect { status, location } => Err(ConnectionError::Http {
                status: status.as_u16(),
                message: format!("Unexpected redirect to {}", location),
            }),
        }
    }

    /// Report and refuse when the network is down
    fn ensure_reachable(&self) -> Result<()> {
        if self.reachability.is_accessible() {
            return Ok(());
        }
        let err = ConnectionError::NetworkUnreachable;
        self.notifier
            .error(&err.notification_title(), &err.notification_description());
        Err(err)
    }

    fn start<P: Send + 'static>(
        &self,
        method: Method,
        url: impl IntoTarget,
        body: RequestBody,
        mut options: TransferOptions,
        payload: P,
        on_success: SuccessCallback<P>,
    ) -> Result<TransferHandle> {
        let finish = terminal(options.on_error.take(), on_success);
        self.start_with(method, url, body, options, payload, finish)
    }

    /// Start an operation whose terminal step is `finish`
    ///
    /// Any error hook left in `options` is ignored; `finish` receives the
    /// error instead, after the notifier and the logout handling have run.
    pub(crate) fn start_with<P: Send + 'static>(
        &self,
        method: Method,
        url: impl IntoTarget,
        body: RequestBody,
        mut options: TransferOptions,
        payload: P,
        finish: Finisher<P>,
    ) -> Result<TransferHandle> {
        self.ensure_reachable()?;
        let url = url.into_target()?;

        options.on_error = None;
        let upload_progress = options.upload_progress.take();
        let (request, replay) =
            self.builder
                .build(method.clone(), url.clone(), body, upload_progress)?;

        let cancel = options
            .abort
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let id = Uuid::new_v4();
        let (handle, completion) = handle_pair(id, cancel.clone());

        tracing::debug!(operation = %id, method = %method, url = %url, "Dispatching request");

        let op = PendingOperation {
            id,
            method,
            url,
            replay,
            options,
            payload,
            finish,
            cancel,
            completion,
        };
        self.dispatch(op, request);
        Ok(handle)
    }

    fn dispatch<P: Send + 'static>(&self, op: PendingOperation<P>, request: reqwest::Request) {
        tokio::spawn(self.clone().run(op, request));
    }

    fn run<P: Send + 'static>(
        self,
        mut op: PendingOperation<P>,
        request: reqwest::Request,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let outcome = self.exchange(request, &mut op.options, &op.cancel).await;
            self.complete(op, outcome).await;
        })
    }

    /// One HTTP round-trip: send, classify, read the body
    async fn exchange(
        &self,
        request: reqwest::Request,
        options: &mut TransferOptions,
        cancel: &CancellationToken,
    ) -> Result<Exchange> {
        let url = request.url().clone();
        let method = request.method().clone();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            result = self.client.execute(request) => {
                result.map_err(|e| {
                    let err = ConnectionError::from_transport(e);
                    tracing::warn!(method = %method, url = %url, error = %err, "HTTP request error");
                    err
                })?
            }
        };

        let status = response.status();
        tracing::debug!(status = %status, url = %url, "Received HTTP response");

        if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
            let location = redirect_target(&url, &response)?;
            return Ok(Exchange::Redirect { status, location });
        }

        if status.is_client_error() || status.is_server_error() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                text = response.text() => text.unwrap_or_default(),
            };
            tracing::warn!(
                status = status.as_u16(),
                url = %url,
                response_body = %body,
                "HTTP request failed with error response"
            );
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("Request failed").to_string()
            } else {
                body
            };
            return Err(ConnectionError::from_status(status.as_u16(), message));
        }

        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let total = response.content_length();
        let mut response = response;
        let mut body = BytesMut::new();
        let mut received = 0u64;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                chunk = response.chunk() => chunk.map_err(ConnectionError::from_transport)?,
            };
            let Some(chunk) = chunk else { break };

            received += chunk.len() as u64;
            if let Some(report) = options.download_progress.as_mut() {
                report(received, total);
            }
            match options.ready_read.as_mut() {
                Some(read) => read(&chunk),
                None => body.extend_from_slice(&chunk),
            }
        }

        // A hook may have aborted while handling the last chunk
        if cancel.is_cancelled() {
            return Err(ConnectionError::Cancelled);
        }

        Ok(Exchange::Complete(Reply {
            status,
            url: final_url,
            headers,
            body: body.freeze(),
        }))
    }

    /// The completion funnel shared by every operation
    async fn complete<P: Send + 'static>(
        &self,
        op: PendingOperation<P>,
        outcome: Result<Exchange>,
    ) {
        match outcome {
            Err(err) => self.fail(op, err).await,
            Ok(Exchange::Redirect { location, .. }) => self.follow_redirect(op, location).await,
            Ok(Exchange::Complete(reply)) => {
                tracing::debug!(operation = %op.id, status = %reply.status, "Request finished");
                Self::finish(op, Ok(reply)).await;
            }
        }
    }

    /// Run the terminal step, then mark the handle finished
    async fn finish<P: Send + 'static>(op: PendingOperation<P>, outcome: Result<Reply>) {
        let PendingOperation {
            options,
            payload,
            finish,
            completion,
            ..
        } = op;
        // Internal hooks end here; only the payload reaches the caller
        drop(options);
        finish(outcome, payload).await;
        completion.finish();
    }

    async fn follow_redirect<P: Send + 'static>(&self, mut op: PendingOperation<P>, location: Url) {
        if op.options.redirect_count >= MAX_REDIRECTS {
            let err = ConnectionError::TooManyRedirects {
                limit: MAX_REDIRECTS,
            };
            return self.fail(op, err).await;
        }
        op.options.redirect_count += 1;
        tracing::info!(
            operation = %op.id,
            redirect_count = op.options.redirect_count,
            "Redirected to {}",
            location
        );

        let Some(body) = op.replay.to_body() else {
            let err = ConnectionError::RedirectNotReplayable {
                method: op.method.to_string(),
                location: location.to_string(),
            };
            return self.fail(op, err).await;
        };

        if !self.reachability.is_accessible() {
            return self.fail(op, ConnectionError::NetworkUnreachable).await;
        }

        match self.builder.build(op.method.clone(), location.clone(), body, None) {
            Ok((request, replay)) => {
                op.url = location;
                op.replay = replay;
                self.dispatch(op, request);
            }
            Err(err) => self.fail(op, err).await,
        }
    }

    async fn fail<P: Send + 'static>(&self, op: PendingOperation<P>, err: ConnectionError) {
        if err.is_cancelled() {
            // The caller asked for this; only the error hook hears about it
            tracing::info!(operation = %op.id, url = %op.url, "Request cancelled");
        } else {
            tracing::warn!(operation = %op.id, url = %op.url, error = %err, "Request failed");
            self.notifier
                .error(&err.notification_title(), &err.notification_description());
        }

        if err.is_authentication_failure() {
            self.session.logout();
            self.login.show_login_window();
        }

        Self::finish(op, Err(err)).await;
    }
}

/// Terminal step for the plain callback API
fn terminal<P: Send + 'static>(
    on_error: Option<ErrorCallback>,
    on_success: SuccessCallback<P>,
) -> Finisher<P> {
    Box::new(move |outcome: Result<Reply>, payload: P| {
        match outcome {
            Ok(reply) => on_success(reply, payload),
            Err(err) => {
                if let Some(on_error) = on_error {
                    on_error(err);
                }
            }
        }
        future::ready(()).boxed()
    })
}

fn redirect_target(base: &Url, response: &reqwest::Response) -> Result<Url> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ConnectionError::Transport {
            kind: "redirect_error",
            message: format!("Redirect from {} without a usable Location header", base),
        })?;
    base.join(location).map_err(|e| ConnectionError::Transport {
        kind: "redirect_error",
        message: format!("Invalid redirect target '{}': {}", location, e),
    })
}
