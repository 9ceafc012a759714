//! Incoming HTTP request handle.

use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::sync::lock;

/// An incoming HTTP request.
///
/// `Request` is a handle: cloning it is one atomic increment and every clone
/// sees the same request. Method, headers and body are fixed once the
/// request is built. The URL is not: while a layer mounted at `/admin` runs,
/// [`url`](Request::url) has the `/admin` prefix stripped, and it is put
/// back before the next layer is considered. [`original_url`](Request::original_url)
/// always returns the URL as first seen by the outermost [`App`](crate::App).
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

struct Inner {
    method: Method,
    headers: HeaderMap,
    body: Bytes,
    url: Mutex<String>,
    original_url: OnceLock<String>,
}

impl Request {
    /// A request with no headers and an empty body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self::from_parts(method, url, HeaderMap::new(), Bytes::new())
    }

    pub fn from_parts(
        method: Method,
        url: impl Into<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                method,
                headers,
                body,
                url: Mutex::new(url.into()),
                original_url: OnceLock::new(),
            }),
        }
    }

    pub fn method(&self) -> &Method { &self.inner.method }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }
    pub fn body(&self) -> &Bytes { &self.inner.body }

    /// Case-insensitive header lookup. Non-UTF-8 values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The URL as seen by the currently running layer.
    pub fn url(&self) -> String {
        lock(&self.inner.url).clone()
    }

    /// Rewrites the URL. Later layers match against the new value.
    pub fn set_url(&self, url: impl Into<String>) {
        *lock(&self.inner.url) = url.into();
    }

    /// The URL before any mount prefix was stripped.
    pub fn original_url(&self) -> String {
        match self.inner.original_url.get() {
            Some(url) => url.clone(),
            None => self.url(),
        }
    }

    /// Path component of the current URL: no query string, no fragment, no
    /// scheme or host. Percent-encoding is left as is.
    pub fn path(&self) -> String {
        pathname(&lock(&self.inner.url))
    }

    /// Records the original URL unless an outer dispatch already did.
    pub(crate) fn remember_original_url(&self) {
        self.inner.original_url.get_or_init(|| self.url());
    }

    pub(crate) fn with_url_mut<R>(&self, f: impl FnOnce(&mut String) -> R) -> R {
        f(&mut lock(&self.inner.url))
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", self.method())
            .field("url", &self.url())
            .field("original_url", &self.inner.original_url.get())
            .finish_non_exhaustive()
    }
}

/// Extracts the path of a request target. Origin-form and absolute-form
/// targets go through [`Uri`]; anything it rejects is cut at the first `?`
/// or `#` instead.
pub(crate) fn pathname(url: &str) -> String {
    if let Ok(uri) = url.parse::<Uri>() {
        if !uri.path().is_empty() {
            return uri.path().to_owned();
        }
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    match &url[..end] {
        "" => "/".to_owned(),
        path => path.to_owned(),
    }
}
