//! Unified error type.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The error carried through the middleware stack.
///
/// A handler that returns `Err(e)`, panics, or calls
/// [`Next::fail`](crate::Next::fail) puts an `Error` in flight. From then on
/// only error-handling middleware runs, until one of them continues without
/// an error or the stack is exhausted and the terminal responder turns it
/// into a response.
///
/// Every `Error` carries the HTTP status the terminal responder should use
/// (500 unless set otherwise). Any `std::error::Error + Send + Sync` converts
/// into it, so `?` works inside handlers. Like `anyhow::Error`, this type
/// does not implement `std::error::Error` itself; the blanket `From` would
/// otherwise overlap with the reflexive one.
pub struct Error {
    status: StatusCode,
    inner: BoxError,
}

impl Error {
    /// Wraps any error with status `500 Internal Server Error`.
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, inner: err.into() }
    }

    /// An error from a plain message.
    pub fn msg(msg: impl fmt::Display) -> Self {
        Self::new(msg.to_string())
    }

    /// An error whose message is the canonical reason phrase of `status`.
    ///
    /// ```rust
    /// use junction::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::from_status(StatusCode::FORBIDDEN);
    /// assert_eq!(err.status(), StatusCode::FORBIDDEN);
    /// assert_eq!(err.to_string(), "Forbidden");
    /// ```
    pub fn from_status(status: StatusCode) -> Self {
        Self::msg(status.canonical_reason().unwrap_or("Unknown Status")).with_status(status)
    }

    /// Replaces the status the terminal responder will answer with.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the wrapped error if it is of type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    pub fn into_inner(self) -> BoxError {
        self.inner
    }

    /// Converts a caught panic payload into an error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_owned()
        };
        Self::new(Panicked(msg))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("status", &self.status.as_u16())
            .field("inner", &self.inner)
            .finish()
    }
}

impl<E> From<E> for Error
where
    E: StdError + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Self::new(e)
    }
}

/// Payload of a handler that panicked instead of returning.
#[derive(Debug)]
pub struct Panicked(String);

impl Panicked {
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler panicked: {}", self.0)
    }
}

impl StdError for Panicked {}
