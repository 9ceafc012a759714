//! # junction
//!
//! A middleware dispatch engine for Rust HTTP services. One stack, mounted
//! prefixes, a `next` continuation. Nothing more.
//!
//! ## The model
//!
//! An [`App`] is an ordered stack of layers. Each layer is a piece of
//! middleware mounted at a literal path prefix. A request walks the stack in
//! registration order; every layer whose prefix matches gets a turn and
//! either answers, passes control on with [`Next::run`], or fails with
//! [`Next::fail`] (or by returning `Err`, or by panicking).
//!
//! - A layer mounted at `/admin` sees `/admin/users` as `/users`. The prefix
//!   is put back before the next layer is considered, and
//!   [`Request::original_url`] always has the untouched URL.
//! - Once an error is pending, only [`error_middleware`] runs, until one of
//!   them recovers with `next.run()`.
//! - When the stack runs out, the [`final_handler`] answers `404` or reports
//!   the pending error. It runs on its own task, never inside the last
//!   layer's call.
//! - An `App` mounted inside another `App` is just another layer; when its
//!   own stack runs out, control returns to the parent.
//!
//! What junction does not do, on purpose: path parameters, regex routes,
//! per-method routing, body parsing, templating.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use junction::{App, error_middleware, middleware};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = App::new();
//!
//!     app.layer(middleware(|req, _res, next| async move {
//!         tracing::info!(method = %req.method(), url = %req.url(), "request");
//!         next.run().await;
//!         Ok(())
//!     }))
//!     .mount("/admin", middleware(|req, res, next| async move {
//!         if req.header("authorization").is_none() {
//!             next.fail(junction::Error::from_status(StatusCode::UNAUTHORIZED)).await;
//!             return Ok(());
//!         }
//!         res.text(format!("admin area: {}", req.url()));
//!         Ok(())
//!     }))
//!     .layer(error_middleware(|err, _req, res, _next| async move {
//!         res.set_status(err.status());
//!         res.text(err.to_string());
//!         Ok(())
//!     }));
//!
//!     app.listen("0.0.0.0:3000").await.unwrap();
//! }
//! ```

mod app;
mod config;
mod dispatch;
mod error;
mod handler;
mod layer;
mod request;
mod response;
mod server;
mod sync;

pub mod final_handler;

pub use app::App;
pub use config::{Config, Env};
pub use dispatch::Next;
pub use error::{Error, Panicked};
pub use handler::{
    BoxFuture, Done, HandlerResult, Listener, Middleware, error_middleware, middleware,
};
pub use request::Request;
pub use response::{ContentType, HttpResponse, Pending, Response};
pub use server::Server;
