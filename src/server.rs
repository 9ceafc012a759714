//! HTTP server and graceful shutdown.
//!
//! The server is the outermost collaborator: it accepts connections, turns
//! each hyper request into a [`Request`]/[`Response`] pair, hands them to a
//! [`Listener`] (usually an [`App`](crate::App)) and waits for the response
//! to be finished.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. Immediately stops `listener.accept()`; no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::{StatusCode, Uri, Version};
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::handler::Listener;
use crate::request::Request;
use crate::response::{HttpResponse, Response};

/// The HTTP server.
pub struct Server {
    addr: String,
    request_timeout: Option<Duration>,
}

impl Server {
    /// Configures the server to bind to `addr` (`host:port`) when
    /// [`serve`](Server::serve) is called.
    ///
    /// ```rust,no_run
    /// use junction::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), request_timeout: None }
    }

    /// Answers `503 Service Unavailable` when no layer finishes a response
    /// within `timeout`. Without it a request nobody answers stays open.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Starts accepting connections and dispatching them to `listener`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, listener: impl Into<Listener>) -> Result<(), Error> {
        let tcp = TcpListener::bind(self.addr.as_str()).await?;
        run(tcp, listener.into(), self.request_timeout, shutdown_signal()).await
    }
}

/// Accept loop over an already bound socket. Returns once `shutdown`
/// resolves and every in-flight connection has completed.
async fn run(
    tcp: TcpListener,
    listener: Listener,
    request_timeout: Option<Duration>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let local_addr = tcp.local_addr()?;

    info!(addr = %local_addr, "junction listening");

    // JoinSet tracks every spawned connection task so we can wait for
    // them all to finish during graceful shutdown.
    let mut tasks = tokio::task::JoinSet::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Check shutdown first so a SIGTERM immediately stops
            // accepting new connections, even if more are queued.
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = tcp.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let listener = listener.clone();
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    // Called once per request on the connection.
                    let svc = service_fn(move |req| {
                        let listener = listener.clone();
                        async move { dispatch(listener, req, remote_addr, request_timeout).await }
                    });

                    // HTTP/1.1 or HTTP/2, whatever the client negotiates.
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the JoinSet does not grow
            // without bound on long-running servers.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("junction stopped");
    Ok(())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through `listener` and waits for its response.
///
/// The listener runs on its own task: layers may keep working after they
/// finished the response, and the connection should not wait for that.
async fn dispatch(
    listener: Listener,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    request_timeout: Option<Duration>,
) -> Result<HttpResponse, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(empty(StatusCode::BAD_REQUEST));
        }
    };

    let url = request_target(&parts.uri, parts.version);
    let request = Request::from_parts(parts.method, url, parts.headers, body);
    let (response, pending) = Response::channel();

    tokio::spawn(listener.call(request.clone(), response));

    let finished = match request_timeout {
        Some(limit) => match tokio::time::timeout(limit, pending).await {
            Ok(finished) => finished,
            Err(_) => {
                warn!(url = %request.original_url(), ?limit, "no response within timeout");
                return Ok(empty(StatusCode::SERVICE_UNAVAILABLE));
            }
        },
        None => pending.await,
    };

    match finished {
        Ok(res) => Ok(res),
        Err(_) => {
            warn!(url = %request.original_url(), "response dropped without being finished");
            Ok(empty(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// The URL a request exposes to the stack: path and query for origin-form
/// targets, the full URI for absolute-form (proxy) targets.
///
/// HTTP/2 always carries `:scheme` and `:authority`, so only HTTP/1 requests
/// can be absolute-form.
fn request_target(uri: &Uri, version: Version) -> String {
    if version < Version::HTTP_2 && uri.scheme().is_some() {
        return uri.to_string();
    }
    uri.path_and_query()
        .map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned())
}

fn empty(status: StatusCode) -> HttpResponse {
    let mut res = http::Response::new(Full::new(Bytes::new()));
    *res.status_mut() = status;
    res
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available. A signal that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
