//! Minimal junction example: logging, a mounted area, a nested app, a layer
//! registered mid-request, and an error handler.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/x/yz/extra
//!   curl http://localhost:3000/api/users/42
//!   curl http://localhost:3000/boom
//!   curl http://localhost:3000/nowhere

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::StatusCode;
use junction::{App, Error, error_middleware, middleware};
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = App::new();

    // Every request passes through here first. The first request also adds
    // a layer at the bottom of the stack, which that same request reaches.
    let registered = Arc::new(AtomicBool::new(false));
    let handle = app.clone();
    app.layer(middleware(move |req, _res, next| {
        let app = handle.clone();
        let registered = Arc::clone(&registered);
        async move {
            info!(url = %req.url(), "first layer");
            if !registered.swap(true, Ordering::SeqCst) {
                app.layer(middleware(|req, _res, next| async move {
                    info!(url = %req.url(), "layer added at runtime");
                    next.run().await;
                    Ok(())
                }));
            }
            next.run().await;
            Ok(())
        }
    }));

    // GET /x/yz/extra: this layer sees `/extra`.
    app.mount("/x/yz", middleware(|req, _res, next| async move {
        info!(url = %req.url(), original = %req.original_url(), "mounted at /x/yz");
        next.run().await;
        Ok(())
    }));

    app.mount("/api", &api());

    app.mount("/boom", middleware(|_req, _res, _next| async {
        Err(Error::msg("something broke").with_status(StatusCode::BAD_GATEWAY))
    }));

    app.layer(error_middleware(|err, req, res, _next| async move {
        info!(url = %req.original_url(), error = %err, "error handler");
        res.set_status(err.status());
        res.json(format!(r#"{{"error":"{err}"}}"#).into_bytes());
        Ok(())
    }));

    if let Err(e) = app.listen("0.0.0.0:3000").await {
        eprintln!("server error: {e}");
    }
}

// A separate app, mounted at /api. It only knows about `/users`.
fn api() -> App {
    let api = App::new();
    api.mount("/users", middleware(|req, res, _next| async move {
        let id = req.url().trim_start_matches('/').to_owned();
        res.json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes());
        Ok(())
    }));
    api
}
