//! The dispatch engine: an ordered stack of prefix-mounted layers.
//!
//! Registration order is dispatch order. Every request walks the stack from
//! the top; each layer whose route prefixes the request path gets a turn,
//! sees the URL with its route stripped, and decides whether to answer,
//! pass on, or fail.

use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::config::Config;
use crate::dispatch::Traversal;
use crate::error::Error;
use crate::final_handler;
use crate::handler::{Done, Middleware};
use crate::layer::Layer;
use crate::request::Request;
use crate::response::Response;
use crate::server::Server;
use crate::sync::{read, write};

/// A middleware stack.
///
/// `App` is a handle: clones share one stack. That is what lets a running
/// handler register more layers, and lets the same `App` be mounted inside
/// another one.
///
/// ```rust
/// use junction::{App, middleware};
///
/// let admin = App::new();
/// admin.layer(middleware(|req, res, _next| async move {
///     res.text(format!("admin sees {}", req.url()));
///     Ok(())
/// }));
///
/// let app = App::new();
/// app.layer(middleware(|_req, _res, next| async move {
///     next.run().await;
///     Ok(())
/// }))
/// .mount("/admin", &admin);
/// ```
#[derive(Clone)]
pub struct App {
    inner: Arc<Inner>,
}

struct Inner {
    layers: RwLock<Vec<Arc<Layer>>>,
    config: Config,
}

impl App {
    /// An empty stack configured from the environment (see [`Config::from_env`]).
    pub fn new() -> Self {
        let config = Config::from_env().unwrap_or_else(|e| {
            warn!("ignoring invalid configuration: {e}");
            Config::default()
        });
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(Inner { layers: RwLock::new(Vec::new()), config }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Mounts middleware under `route`. Returns `self` for chaining.
    ///
    /// The route is a literal path prefix, matched case-insensitively on a
    /// segment border; one trailing `/` is ignored. `""` and `/` mount at
    /// the root. Accepts [`middleware`](crate::middleware),
    /// [`error_middleware`](crate::error_middleware), another [`App`], or a
    /// [`Listener`](crate::Listener).
    pub fn mount(&self, route: &str, middleware: impl Into<Middleware>) -> &Self {
        let layer = Layer::new(route, middleware.into());
        debug!(route = layer.route(), kind = layer.middleware().kind(), "use");
        write(&self.inner.layers).push(Arc::new(layer));
        self
    }

    /// Mounts middleware at the root, where it sees every request.
    pub fn layer(&self, middleware: impl Into<Middleware>) -> &Self {
        self.mount("/", middleware)
    }

    pub fn len(&self) -> usize {
        read(&self.inner.layers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn layer_at(&self, index: usize) -> Option<Arc<Layer>> {
        read(&self.inner.layers).get(index).cloned()
    }

    /// Runs `req` through the stack. If nothing finishes the response, the
    /// built-in [`final_handler`] answers with `404`, or with the error
    /// still pending.
    ///
    /// Resolves when the layers stop passing control on; the terminal
    /// responder runs afterwards on its own task.
    pub async fn handle(&self, req: Request, res: Response) {
        let done = final_handler::done(self.inner.config.env, req.clone(), res.clone());
        self.handle_with(req, res, done).await
    }

    /// Like [`handle`](App::handle), but calls `done` when the stack runs
    /// out instead of the built-in responder.
    pub async fn handle_with(&self, req: Request, res: Response, done: Done) {
        let traversal = Traversal::new(self.clone(), req, res, done);
        traversal.step(None).await
    }

    /// Serves this app on `addr` until SIGTERM or Ctrl-C.
    pub async fn listen(&self, addr: &str) -> Result<(), Error> {
        let mut server = Server::bind(addr);
        if let Some(timeout) = self.inner.config.request_timeout {
            server = server.request_timeout(timeout);
        }
        server.serve(self).await
    }
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layers = read(&self.inner.layers);
        f.debug_struct("App")
            .field("routes", &layers.iter().map(|l| l.route()).collect::<Vec<_>>())
            .field("config", &self.inner.config)
            .finish()
    }
}
