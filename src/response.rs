//! Outgoing HTTP response handle.
//!
//! A [`Response`] is shared by every layer a request passes through. Any of
//! them may set the status, add headers, buffer body bytes and finally
//! [`end`](Response::end) it. Ending sends the assembled `http::Response`
//! to whoever holds the [`Pending`] half (the server, or a test).

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::Error;
use crate::sync::lock;

/// The finished response as handed to hyper.
pub type HttpResponse = http::Response<Full<Bytes>>;

/// Receiving half of [`Response::channel`]. Resolves once the response is
/// ended, or fails if every handle was dropped without ending it.
pub type Pending = oneshot::Receiver<HttpResponse>;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`Response::bytes`].
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use junction::Response;
/// use http::StatusCode;
///
/// let (res, _pending) = Response::channel();
/// res.set_status(StatusCode::CREATED);
/// res.set_header("location", "/users/42").unwrap();
/// res.json(br#"{"id":42}"#.to_vec());
/// assert!(res.is_finished());
/// ```
#[derive(Clone)]
pub struct Response {
    inner: Arc<Mutex<State>>,
}

struct State {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    sender: Option<oneshot::Sender<HttpResponse>>,
}

impl Response {
    /// A fresh `200 OK` response and the receiver its final form is sent to.
    pub fn channel() -> (Self, Pending) {
        let (tx, rx) = oneshot::channel();
        let state = State {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            sender: Some(tx),
        };
        (Self { inner: Arc::new(Mutex::new(state)) }, rx)
    }

    pub fn status(&self) -> StatusCode {
        lock(&self.inner).status
    }

    pub fn set_status(&self, status: StatusCode) {
        lock(&self.inner).status = status;
    }

    /// Sets (replaces) a header.
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), Error> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        lock(&self.inner).headers.insert(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<String> {
        lock(&self.inner)
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Appends bytes to the buffered body.
    pub fn write(&self, chunk: impl AsRef<[u8]>) {
        lock(&self.inner).body.extend_from_slice(chunk.as_ref());
    }

    /// Whether [`end`](Response::end) already ran. A finished response can no
    /// longer be changed.
    pub fn is_finished(&self) -> bool {
        lock(&self.inner).sender.is_none()
    }

    /// Finishes the response with whatever status, headers and body were set.
    ///
    /// Returns `false` (and changes nothing) if it was already finished.
    pub fn end(&self) -> bool {
        let mut state = lock(&self.inner);
        let Some(tx) = state.sender.take() else {
            warn!("response already finished");
            return false;
        };

        let mut res = http::Response::new(Full::new(std::mem::take(&mut state.body).freeze()));
        *res.status_mut() = state.status;
        *res.headers_mut() = std::mem::take(&mut state.headers);

        // The receiver is gone when nobody waits for the result (client
        // disconnected, or a test that only inspects side effects).
        let _ = tx.send(res);
        true
    }

    /// `application/json` body, then [`end`](Response::end).
    pub fn json(&self, body: Vec<u8>) -> bool {
        self.bytes(ContentType::Json, body)
    }

    /// `text/plain; charset=utf-8` body, then [`end`](Response::end).
    pub fn text(&self, body: impl Into<String>) -> bool {
        self.bytes(ContentType::Text, body.into().into_bytes())
    }

    /// Typed body, then [`end`](Response::end). Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(&self, content_type: ContentType, body: impl AsRef<[u8]>) -> bool {
        {
            let mut state = lock(&self.inner);
            if state.sender.is_some() {
                state
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
                state.body.extend_from_slice(body.as_ref());
            }
        }
        self.end()
    }

    /// Status only, no body, then [`end`](Response::end).
    pub fn send_status(&self, status: StatusCode) -> bool {
        self.set_status(status);
        self.end()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner);
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("finished", &state.sender.is_none())
            .finish_non_exhaustive()
    }
}
