// Outbound request construction
// Normalizes targets, encodes bodies and attaches the session's bearer header

use futures::TryStreamExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::auth::{bearer_header, AuthSession};
use crate::error::{ConnectionError, Result};
use crate::transfer::ProgressCallback;

/// Anything that can name the target of a request
pub trait IntoTarget {
    fn into_target(self) -> Result<Url>;
}

impl IntoTarget for Url {
    fn into_target(self) -> Result<Url> {
        check_scheme(self)
    }
}

impl IntoTarget for &Url {
    fn into_target(self) -> Result<Url> {
        check_scheme(self.clone())
    }
}

impl IntoTarget for &str {
    fn into_target(self) -> Result<Url> {
        let trimmed = self.trim();
        if trimmed.is_empty() {
            return Err(ConnectionError::Validation("url must not be empty".to_string()));
        }
        let url = Url::parse(trimmed).map_err(|e| {
            ConnectionError::Validation(format!("url should be an absolute URL ({}): {}", e, self))
        })?;
        check_scheme(url)
    }
}

impl IntoTarget for String {
    fn into_target(self) -> Result<Url> {
        self.as_str().into_target()
    }
}

impl IntoTarget for &String {
    fn into_target(self) -> Result<Url> {
        self.as_str().into_target()
    }
}

fn check_scheme(url: Url) -> Result<Url> {
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConnectionError::Validation(format!(
            "unsupported url scheme '{}': {}",
            other, url
        ))),
    }
}

/// Readable byte stream sent as the body of a PUT
pub struct ByteSource {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    len: Option<u64>,
}

impl ByteSource {
    pub fn new(reader: impl AsyncRead + Send + Sync + Unpin + 'static, len: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            len,
        }
    }

    /// Total size, when known
    pub fn total_len(&self) -> Option<u64> {
        self.len
    }

    pub(crate) fn into_parts(self) -> (Box<dyn AsyncRead + Send + Sync + Unpin>, Option<u64>) {
        (self.reader, self.len)
    }

    fn into_body(self, progress: Option<ProgressCallback>) -> reqwest::Body {
        let total = self.len;
        let mut sent = 0u64;
        let mut progress = progress;
        let stream = ReaderStream::new(self.reader).inspect_ok(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(report) = progress.as_mut() {
                report(sent, total);
            }
        });
        reqwest::Body::wrap_stream(stream)
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource").field("len", &self.len).finish()
    }
}

/// Body of a logical request
#[derive(Debug)]
pub enum RequestBody {
    Empty,
    /// URL-encoded form fields
    Form(Vec<(String, String)>),
    /// Streamed upload
    Stream(ByteSource),
}

impl RequestBody {
    pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields: Vec<(String, String)> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if fields.iter().any(|(k, _)| k.is_empty()) {
            return Err(ConnectionError::Validation(
                "form field names must not be empty".to_string(),
            ));
        }
        Ok(Self::Form(fields))
    }
}

/// What is needed to send the same body again after a redirect
#[derive(Debug, Clone)]
pub(crate) enum Replay {
    Empty,
    Form(Vec<(String, String)>),
    /// The stream was consumed by the first attempt
    Consumed,
}

impl Replay {
    pub(crate) fn to_body(&self) -> Option<RequestBody> {
        match self {
            Replay::Empty => Some(RequestBody::Empty),
            Replay::Form(fields) => Some(RequestBody::Form(fields.clone())),
            Replay::Consumed => None,
        }
    }
}

/// Builds concrete reqwest requests for the transfer engine
#[derive(Clone)]
pub struct RequestBuilder {
    client: Client,
    session: Arc<AuthSession>,
}

impl RequestBuilder {
    pub fn new(client: Client, session: Arc<AuthSession>) -> Self {
        Self { client, session }
    }

    /// Build a request carrying the session token captured right now
    pub(crate) fn build(
        &self,
        method: Method,
        url: Url,
        body: RequestBody,
        upload_progress: Option<ProgressCallback>,
    ) -> Result<(reqwest::Request, Replay)> {
        let mut builder = self.client.request(method, url);

        let replay = match body {
            RequestBody::Empty => Replay::Empty,
            RequestBody::Form(fields) => {
                builder = builder
                    .header(
                        CONTENT_TYPE,
                        HeaderValue::from_static("application/x-www-form-urlencoded"),
                    )
                    .form(&fields);
                Replay::Form(fields)
            }
            RequestBody::Stream(source) => {
                if let Some(len) = source.total_len() {
                    builder = builder.header(CONTENT_LENGTH, len);
                }
                builder = builder.body(source.into_body(upload_progress));
                Replay::Consumed
            }
        };

        let mut request = builder
            .build()
            .map_err(|e| ConnectionError::Validation(format!("Invalid request: {}", e)))?;

        if !self.session.attach_auth_header(&mut request) {
            tracing::warn!(url = %request.url(), "Token could not be added to the request");
        }

        Ok((request, replay))
    }

    /// Build a GET that carries an explicit token instead of the session's
    pub(crate) fn build_with_token(&self, url: Url, access_token: &str) -> Result<reqwest::Request> {
        let header = bearer_header(access_token).ok_or_else(|| {
            ConnectionError::Validation("access token is not a valid header value".to_string())
        })?;
        let mut request = self
            .client
            .get(url)
            .build()
            .map_err(|e| ConnectionError::Validation(format!("Invalid request: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, header);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;

    fn builder(session: Arc<AuthSession>) -> RequestBuilder {
        RequestBuilder::new(Client::new(), session)
    }

    #[test]
    fn test_into_target_accepts_strings_and_urls() {
        assert!("https://api.osf.io/v2/".into_target().is_ok());
        assert!(String::from("http://localhost:1234/x").into_target().is_ok());
        assert!(Url::parse("https://osf.io").unwrap().into_target().is_ok());
    }

    #[test]
    fn test_into_target_rejects_bad_targets() {
        assert!(matches!(
            "".into_target(),
            Err(ConnectionError::Validation(_))
        ));
        assert!(matches!(
            "users/me".into_target(),
            Err(ConnectionError::Validation(_))
        ));
        assert!(matches!(
            "ftp://files.osf.io/a".into_target(),
            Err(ConnectionError::Validation(_))
        ));
    }

    #[test]
    fn test_form_rejects_empty_key() {
        assert!(RequestBody::form([("", "x")]).is_err());
        assert!(RequestBody::form([("token", "abc")]).is_ok());
    }

    #[test]
    fn test_build_form_request() {
        let session = Arc::new(AuthSession::new());
        session.login(Token::new("abc", 600));
        let body = RequestBody::form([("token", "abc"), ("note", "a b")]).unwrap();

        let (request, replay) = builder(session)
            .build(
                Method::POST,
                Url::parse("https://accounts.osf.io/oauth2/revoke").unwrap(),
                body,
                None,
            )
            .unwrap();

        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer abc");
        let sent = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(sent, b"token=abc&note=a+b");
        assert!(matches!(replay, Replay::Form(ref f) if f.len() == 2));
    }

    #[test]
    fn test_build_without_session_token() {
        let (request, replay) = builder(Arc::new(AuthSession::new()))
            .build(
                Method::GET,
                Url::parse("https://api.osf.io/v2/").unwrap(),
                RequestBody::Empty,
                None,
            )
            .unwrap();

        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert!(replay.to_body().is_some());
    }

    #[test]
    fn test_stream_body_is_not_replayable() {
        let source = ByteSource::new(&b"hello"[..], Some(5));
        let (request, replay) = builder(Arc::new(AuthSession::new()))
            .build(
                Method::PUT,
                Url::parse("https://files.osf.io/v1/upload").unwrap(),
                RequestBody::Stream(source),
                None,
            )
            .unwrap();

        assert_eq!(request.headers()[CONTENT_LENGTH], "5");
        assert!(replay.to_body().is_none());
    }

    #[test]
    fn test_build_with_token() {
        let request = builder(Arc::new(AuthSession::new()))
            .build_with_token(Url::parse("https://api.osf.io/v2/users/me/").unwrap(), "xyz")
            .unwrap();
        assert_eq!(*request.method(), Method::GET);
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer xyz");
    }
}
