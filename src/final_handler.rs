//! The built-in terminal responder.
//!
//! Runs when a request falls off the end of the stack:
//!
//! | Pending error | Response |
//! |---|---|
//! | none | `404`, `Cannot GET /original/url` |
//! | some | the error's status (4xx/5xx, else 500); the reason phrase in production, the error chain otherwise |
//!
//! If a layer already finished the response there is nothing left to say,
//! and the responder only logs.

use std::error::Error as StdError;
use std::fmt::Write as _;

use http::header::{CONTENT_SECURITY_POLICY, X_CONTENT_TYPE_OPTIONS};
use http::StatusCode;
use tracing::{debug, error};

use crate::config::Env;
use crate::error::Error;
use crate::handler::Done;
use crate::request::Request;
use crate::response::Response;

/// The terminal [`Done`] used by [`App::handle`](crate::App::handle).
pub fn done(env: Env, req: Request, res: Response) -> Done {
    Done::new(move |err| async move { respond(env, err, &req, &res) })
}

/// Writes the final response for `req`.
pub fn respond(env: Env, err: Option<Error>, req: &Request, res: &Response) {
    let (status, body) = match err {
        Some(err) => {
            if env != Env::Test {
                error!(url = %req.original_url(), status = err.status().as_u16(), "unhandled error: {}", chain(&err));
            }
            let status = error_status(&err);
            let body = if env.is_diagnostic() {
                chain(&err)
            } else {
                reason(status).to_owned()
            };
            (status, body)
        }
        None => (
            StatusCode::NOT_FOUND,
            format!("Cannot {} {}", req.method(), req.original_url()),
        ),
    };

    if res.is_finished() {
        debug!(url = %req.original_url(), %status, "response already finished, nothing to send");
        return;
    }

    res.set_status(status);
    // Static, known-valid values.
    let _ = res.set_header(CONTENT_SECURITY_POLICY.as_str(), "default-src 'none'");
    let _ = res.set_header(X_CONTENT_TYPE_OPTIONS.as_str(), "nosniff");
    res.text(body);
}

/// 4xx and 5xx statuses are used as is; anything else becomes 500.
fn error_status(err: &Error) -> StatusCode {
    let status = err.status();
    if status.is_client_error() || status.is_server_error() {
        status
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Error")
}

/// `outer: cause: root cause`
fn chain(err: &Error) -> String {
    let mut out = err.to_string();
    let mut source: Option<&(dyn StdError + 'static)> = err.get_ref().source();
    while let Some(cause) = source {
        let _ = write!(out, ": {cause}");
        source = cause.source();
    }
    out
}
