//! Per-request traversal of the layer stack.
//!
//! A [`Traversal`] is created by [`App::handle_with`](crate::App::handle_with)
//! and lives exactly as long as something can still advance it: the
//! [`Next`] handed to the running layer, or the pending terminal call.
//! Every advance goes through [`Traversal::step`], which
//!
//! 1. puts back whatever the previous layer had stripped from the URL,
//! 2. takes the layer at the cursor (reading the live list, so layers added
//!    mid-request are seen),
//! 3. skips it if its route does not match,
//! 4. strips the route from the URL and invokes it.
//!
//! Skips loop inside one step instead of recursing. When the list runs out,
//! the terminal [`Done`] is spawned onto the runtime rather than awaited, so
//! a long synchronous chain of `next` calls never stacks the terminal
//! responder on top of it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tracing::{debug, trace, warn};

use crate::app::App;
use crate::error::Error;
use crate::handler::{BoxFuture, Done, HandlerResult, Middleware};
use crate::layer::Layer;
use crate::request::Request;
use crate::response::Response;
use crate::sync::lock;

pub(crate) struct Traversal {
    app: App,
    req: Request,
    res: Response,
    /// `scheme://host` of an absolute-form URL, empty otherwise.
    protohost: String,
    absolute: bool,
    cursor: Mutex<Cursor>,
    done: Mutex<Option<Done>>,
}

#[derive(Default)]
struct Cursor {
    index: usize,
    /// URL text stripped on entering the current layer.
    removed: String,
    /// A `/` was prepended after stripping.
    slash_added: bool,
}

enum Outcome {
    /// The layer took over: it continued the traversal itself, finished the
    /// response, or chose to leave the request open.
    Handled,
    /// Move on to the next layer with this pending error.
    Continue(Option<Error>),
}

impl Traversal {
    pub(crate) fn new(app: App, req: Request, res: Response, done: Done) -> Arc<Self> {
        let url = req.url();
        let (absolute, protohost) = split_protohost(&url);
        req.remember_original_url();

        Arc::new(Self {
            app,
            req,
            res,
            protohost: protohost.to_owned(),
            absolute,
            cursor: Mutex::new(Cursor::default()),
            done: Mutex::new(Some(done)),
        })
    }

    /// Advances to the next matching layer carrying `err`, or to the
    /// terminal step once the stack is exhausted.
    pub(crate) fn step(self: Arc<Self>, err: Option<Error>) -> BoxFuture<()> {
        Box::pin(async move {
            let mut err = err;
            loop {
                let Some(layer) = self.advance() else {
                    self.finish(err);
                    return;
                };

                let path = self.req.path();
                if !layer.matches(&path) {
                    trace!(route = layer.route(), %path, "skip layer");
                    continue;
                }

                if layer.strips() {
                    self.strip(layer.route());
                }

                match self.invoke(&layer, err).await {
                    Outcome::Handled => return,
                    Outcome::Continue(pending) => err = pending,
                }
            }
        })
    }

    /// Restores the URL and moves the cursor one layer forward.
    fn advance(&self) -> Option<Arc<Layer>> {
        let mut guard = lock(&self.cursor);
        let cursor = &mut *guard;

        if cursor.slash_added || !cursor.removed.is_empty() {
            self.req.with_url_mut(|url| {
                if std::mem::take(&mut cursor.slash_added) && url.starts_with('/') {
                    url.remove(0);
                }
                if !cursor.removed.is_empty() {
                    let at = self.protohost.len();
                    if url.is_char_boundary(at) {
                        url.insert_str(at, &cursor.removed);
                    } else {
                        url.insert_str(0, &cursor.removed);
                    }
                    cursor.removed.clear();
                }
            });
        }

        let layer = self.app.layer_at(cursor.index);
        cursor.index += 1;
        layer
    }

    /// Removes `route` from the URL right after the protocol/host prefix.
    fn strip(&self, route: &str) {
        let mut guard = lock(&self.cursor);
        let cursor = &mut *guard;
        let start = self.protohost.len();
        let end = start + route.len();

        self.req.with_url_mut(|url| {
            let Some(removed) = url.get(start..end) else {
                debug!(route, %url, "mount prefix not found in url, left as is");
                return;
            };
            cursor.removed = removed.to_owned();
            url.replace_range(start..end, "");

            if !self.absolute && !url.starts_with('/') {
                url.insert(0, '/');
                cursor.slash_added = true;
            }
        });
    }

    /// Runs `layer` if its kind fits the pending error.
    async fn invoke(self: &Arc<Self>, layer: &Layer, err: Option<Error>) -> Outcome {
        let spent = Arc::new(AtomicBool::new(false));
        let next = Next { traversal: Arc::clone(self), spent: Arc::clone(&spent) };
        let req = self.req.clone();
        let res = self.res.clone();

        let call = match (layer.middleware(), err) {
            (Middleware::ErrorHandling(f), Some(err)) => {
                debug!(route = layer.route(), url = %req.original_url(), error = %err, "call error layer");
                panic::catch_unwind(AssertUnwindSafe(|| f(err, req, res, next)))
            }
            (Middleware::Normal(f), None) => {
                debug!(route = layer.route(), url = %req.original_url(), "call layer");
                panic::catch_unwind(AssertUnwindSafe(|| f(req, res, next)))
            }
            (_, err) => return Outcome::Continue(err),
        };

        let result: HandlerResult = match call {
            Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Error::from_panic(payload)),
            },
            Err(payload) => Err(Error::from_panic(payload)),
        };

        match result {
            Ok(()) => Outcome::Handled,
            // The handler already passed control on; a second continuation
            // would run the rest of the stack twice.
            Err(e) if spent.swap(true, Ordering::AcqRel) => {
                warn!(route = layer.route(), error = %e, "handler failed after calling next, error dropped");
                Outcome::Handled
            }
            Err(e) => Outcome::Continue(Some(e)),
        }
    }

    /// Posts the terminal step to the runtime. Runs at most once.
    fn finish(&self, err: Option<Error>) {
        let Some(done) = lock(&self.done).take() else {
            return;
        };
        match &err {
            Some(e) => debug!(url = %self.req.original_url(), error = %e, "stack exhausted with error"),
            None => debug!(url = %self.req.original_url(), "stack exhausted"),
        }
        tokio::spawn(done.call(err));
    }
}

/// Splits an absolute-form URL (`http://host/path`) into whether it is
/// absolute and its `scheme://host` prefix. The prefix is empty when the URL
/// has no path after the host.
fn split_protohost(url: &str) -> (bool, &str) {
    if url.starts_with('/') {
        return (false, "");
    }
    let path_len = url.find('?').unwrap_or(url.len());
    let Some(scheme_end) = url[..path_len].find("://") else {
        return (false, "");
    };
    let host_start = scheme_end + 3;
    let protohost = match url[host_start..].find('/') {
        Some(i) => &url[..host_start + i],
        None => "",
    };
    (true, protohost)
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The continuation handed to every layer.
///
/// Consuming `self` means a layer can continue its request at most once.
/// Dropping it without calling anything ends the traversal at this layer;
/// the layer is then responsible for finishing the response.
pub struct Next {
    traversal: Arc<Traversal>,
    spent: Arc<AtomicBool>,
}

impl Next {
    /// Passes control to the next matching layer.
    ///
    /// Resolves once that layer (and everything it awaits) is done. Code after
    /// `.await` sees the URL as later layers left it.
    pub fn run(self) -> BoxFuture<()> {
        self.resume(None)
    }

    /// Passes control on with `err` pending: from here only error-handling
    /// layers run.
    pub fn fail(self, err: impl Into<Error>) -> BoxFuture<()> {
        self.resume(Some(err.into()))
    }

    /// [`run`](Next::run) or [`fail`](Next::fail), depending on `err`.
    pub fn resume(self, err: Option<Error>) -> BoxFuture<()> {
        if self.spent.swap(true, Ordering::AcqRel) {
            warn!(url = %self.traversal.req.original_url(), "next called after the layer already failed, ignored");
            return Box::pin(async {});
        }
        Traversal::step(self.traversal, err)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("spent", &self.spent.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
