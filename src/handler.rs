//! Middleware kinds and type erasure.
//!
//! # How middleware is stored
//!
//! An [`App`] keeps every layer in one `Vec`, so handlers of different
//! concrete types are hidden behind `Arc<dyn Fn …>` trait objects. Each one
//! is tagged once, at registration, with the kind of traffic it accepts:
//!
//! ```text
//! middleware(|req, res, next| async move { … })          ← runs while no error is pending
//!        ↓
//! Middleware::Normal(Arc<dyn Fn(Request, Response, Next) -> BoxFuture>)
//!
//! error_middleware(|err, req, res, next| async move { … })  ← runs only while an error is pending
//!        ↓
//! Middleware::ErrorHandling(Arc<dyn Fn(Error, Request, Response, Next) -> BoxFuture>)
//! ```
//!
//! Nested [`App`]s and raw [`Listener`]s convert into `Middleware::Normal`
//! through `From`, so all four can be passed straight to
//! [`App::mount`](crate::App::mount).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::app::App;
use crate::dispatch::Next;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` so tokio can move it across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What every middleware future resolves to. `Err` is treated exactly like
/// calling [`Next::fail`] with that error.
pub type HandlerResult = Result<(), Error>;

type NormalFn = Arc<dyn Fn(Request, Response, Next) -> BoxFuture<HandlerResult> + Send + Sync>;
type ErrorFn =
    Arc<dyn Fn(Error, Request, Response, Next) -> BoxFuture<HandlerResult> + Send + Sync>;

// ── Middleware ────────────────────────────────────────────────────────────────

/// A registered handler, tagged with the traffic it accepts.
#[derive(Clone)]
pub enum Middleware {
    /// `(req, res, next)`: skipped while an error is pending.
    Normal(NormalFn),
    /// `(err, req, res, next)`: runs only while an error is pending.
    ErrorHandling(ErrorFn),
}

impl Middleware {
    /// `"normal"` or `"error"`, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Normal(_) => "normal",
            Self::ErrorHandling(_) => "error",
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Middleware::{}", self.kind())
    }
}

/// Wraps a `(req, res, next)` function as normal middleware.
///
/// ```rust
/// use junction::{App, middleware};
///
/// let app = App::new();
/// app.layer(middleware(|req, _res, next| async move {
///     tracing::info!(url = %req.url(), "request");
///     next.run().await;
///     Ok(())
/// }));
/// ```
pub fn middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Middleware::Normal(Arc::new(
        move |req: Request, res: Response, next: Next| -> BoxFuture<HandlerResult> {
            Box::pin(f(req, res, next))
        },
    ))
}

/// Wraps an `(err, req, res, next)` function as error-handling middleware.
///
/// Call `next.run()` to recover (later normal middleware runs again), or
/// `next.fail(err)` to keep propagating.
pub fn error_middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(Error, Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Middleware::ErrorHandling(Arc::new(
        move |err: Error, req: Request, res: Response, next: Next| -> BoxFuture<HandlerResult> {
            Box::pin(f(err, req, res, next))
        },
    ))
}

/// A nested engine runs its own stack, then hands exhaustion (and any error
/// still pending) back to the parent's `next`.
impl From<App> for Middleware {
    fn from(app: App) -> Self {
        middleware(move |req, res, next| {
            let app = app.clone();
            async move {
                app.handle_with(req, res, Done::from(next)).await;
                Ok(())
            }
        })
    }
}

impl From<&App> for Middleware {
    fn from(app: &App) -> Self {
        Self::from(app.clone())
    }
}

/// A raw listener takes no `next`: once mounted, it is the end of the line
/// for every request it matches.
impl From<Listener> for Middleware {
    fn from(listener: Listener) -> Self {
        middleware(move |req, res, _next| {
            let fut = listener.call(req, res);
            async move {
                fut.await;
                Ok(())
            }
        })
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// The bare `(req, res)` request callback a [`Server`](crate::Server) drives.
///
/// An [`App`] converts into one that runs [`App::handle`].
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(Request, Response) -> BoxFuture<()> + Send + Sync>);

impl Listener {
    /// Wraps an async `(req, res)` function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Arc::new(move |req: Request, res: Response| -> BoxFuture<()> {
            Box::pin(f(req, res))
        }))
    }

    /// Runs the listener for one request.
    pub fn call(&self, req: Request, res: Response) -> BoxFuture<()> {
        (self.0)(req, res)
    }
}

impl From<App> for Listener {
    fn from(app: App) -> Self {
        Listener::new(move |req, res| {
            let app = app.clone();
            async move { app.handle(req, res).await }
        })
    }
}

impl From<&App> for Listener {
    fn from(app: &App) -> Self {
        Self::from(app.clone())
    }
}

// ── Done ──────────────────────────────────────────────────────────────────────

/// The terminal step of a traversal.
///
/// Invoked at most once per request, with whatever error is pending when
/// the stack runs out. [`App::handle`] uses the built-in
/// [`final_handler`](crate::final_handler); [`App::handle_with`] takes any
/// other, such as a parent engine's [`Next`].
pub struct Done(Box<dyn FnOnce(Option<Error>) -> BoxFuture<()> + Send>);

impl Done {
    /// Wraps an async function taking the pending error, if any.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Option<Error>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Box::new(move |err: Option<Error>| -> BoxFuture<()> { Box::pin(f(err)) }))
    }

    pub(crate) fn call(self, err: Option<Error>) -> BoxFuture<()> {
        (self.0)(err)
    }
}

impl From<Next> for Done {
    fn from(next: Next) -> Self {
        Done::new(move |err| next.resume(err))
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Done")
    }
}
