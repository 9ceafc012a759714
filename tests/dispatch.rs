use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use http::{Method, StatusCode};
use http_body_util::BodyExt;
use junction::{
    App, Config, Done, Env, Error, HandlerResult, Listener, Middleware, Panicked, Pending,
    Request, Response, error_middleware, middleware,
};
use tokio::sync::oneshot;

type Log = Arc<Mutex<Vec<String>>>;

fn app() -> App {
    App::with_config(Config::default().env(Env::Test))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn push(log: &Log, entry: String) {
    log.lock().unwrap().push(entry);
}

/// Normal middleware that records `"{name} {url}"` and continues.
fn record(name: &'static str, log: &Log) -> Middleware {
    let log = log.clone();
    middleware(move |req, _res, next| {
        let log = log.clone();
        async move {
            push(&log, format!("{name} {}", req.url()));
            next.run().await;
            Ok(())
        }
    })
}

/// Error middleware that records `"{name} {err} {url}"` and keeps failing.
fn record_error(name: &'static str, log: &Log) -> Middleware {
    let log = log.clone();
    error_middleware(move |err, req, _res, next| {
        let log = log.clone();
        async move {
            push(&log, format!("{name} {err} {}", req.url()));
            next.fail(err).await;
            Ok(())
        }
    })
}

/// Runs `url` through `app` and waits for the terminal step.
async fn run(app: &App, url: &str) -> (Request, Option<Error>) {
    let req = Request::new(Method::GET, url);
    let (res, _pending) = Response::channel();
    let (tx, rx) = oneshot::channel();
    let done = Done::new(move |err| async move {
        let _ = tx.send(err);
    });
    app.handle_with(req.clone(), res, done).await;
    let err = rx.await.expect("terminal step never ran");
    (req, err)
}

async fn body_of(pending: Pending) -> (StatusCode, String) {
    let res = pending.await.expect("response never finished");
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

// ── Matching ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn route_matches_only_on_segment_border() {
    let log = Log::default();
    let app = app();
    app.mount("/ab", record("ab", &log)).layer(record("after", &log));

    for url in ["/ab", "/ab/", "/ab.json", "/abc", "/AB/x", "/a"] {
        let (req, _) = run(&app, url).await;
        assert_eq!(req.url(), url);
    }

    assert_eq!(
        entries(&log),
        [
            "ab /",
            "after /ab",
            "ab /",
            "after /ab/",
            "ab /.json",
            "after /ab.json",
            "after /abc",
            "ab /x",
            "after /AB/x",
            "after /a",
        ]
    );
}

#[tokio::test]
async fn root_layer_matches_every_path() {
    let log = Log::default();
    let app = app();
    app.layer(record("root", &log)).mount("", record("empty", &log));

    for url in ["/", "/deep/path?q=1"] {
        run(&app, url).await;
    }

    assert_eq!(
        entries(&log),
        ["root /", "empty /", "root /deep/path?q=1", "empty /deep/path?q=1"]
    );
}

#[tokio::test]
async fn trailing_slash_in_route_is_ignored() {
    let log = Log::default();
    let app = app();
    app.mount("/admin/", record("admin", &log));

    let (req, _) = run(&app, "/ADMIN").await;

    assert_eq!(entries(&log), ["admin /"]);
    assert_eq!(req.url(), "/ADMIN");
}

// ── URL rewriting ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn mounted_layer_sees_stripped_url_and_later_layers_see_it_restored() {
    let log = Log::default();
    let app = app();
    app.mount("/x/yz", record("h", &log)).layer(record("after", &log));

    let (req, err) = run(&app, "/x/yz/extra").await;

    assert!(err.is_none());
    assert_eq!(entries(&log), ["h /extra", "after /x/yz/extra"]);
    assert_eq!(req.url(), "/x/yz/extra");
    assert_eq!(req.original_url(), "/x/yz/extra");
}

#[tokio::test]
async fn root_runs_before_mounted_layer() {
    let log = Log::default();
    let app = app();
    app.mount("/", record("A", &log)).mount("/admin", record("B", &log));

    run(&app, "/admin/x").await;

    assert_eq!(entries(&log), ["A /admin/x", "B /x"]);
}

#[tokio::test]
async fn query_string_survives_stripping() {
    let log = Log::default();
    let app = app();
    app.mount("/search", record("search", &log));

    let (req, _) = run(&app, "/search?q=rust").await;

    assert_eq!(entries(&log), ["search /?q=rust"]);
    assert_eq!(req.url(), "/search?q=rust");
}

#[tokio::test]
async fn absolute_form_url_keeps_scheme_and_host() {
    let log = Log::default();
    let app = app();
    app.mount("/admin", record("admin", &log));

    let (req, _) = run(&app, "http://example.com/admin/x").await;

    assert_eq!(entries(&log), ["admin http://example.com/x"]);
    assert_eq!(req.url(), "http://example.com/admin/x");
}

#[tokio::test]
async fn original_url_is_visible_inside_mounted_layers() {
    let seen = Log::default();
    let app = app();
    let sink = seen.clone();
    app.mount("/api", middleware(move |req, _res, next| {
        let sink = sink.clone();
        async move {
            push(&sink, req.original_url());
            next.run().await;
            Ok(())
        }
    }));

    run(&app, "/api/v1").await;

    assert_eq!(entries(&seen), ["/api/v1"]);
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn returned_error_is_the_same_as_calling_next_with_it() {
    let returning: Middleware = middleware(|_req, _res, _next| async { Err(Error::msg("boom")) });
    let failing: Middleware = middleware(|_req, _res, next| async move {
        next.fail(Error::msg("boom")).await;
        Ok(())
    });

    let mut logs = Vec::new();
    for first in [returning, failing] {
        let log = Log::default();
        let app = app();
        app.layer(first)
            .layer(record("skipped", &log))
            .layer(record_error("caught", &log));

        let (_, err) = run(&app, "/").await;
        assert_eq!(err.map(|e| e.to_string()).as_deref(), Some("boom"));
        logs.push(entries(&log));
    }

    assert_eq!(logs[0], ["caught boom /"]);
    assert_eq!(logs[0], logs[1]);
}

#[tokio::test]
async fn panicking_handler_becomes_pending_error() {
    let log = Log::default();
    let app = app();
    app.layer(middleware(|_req, _res, _next| async { panic!("kaboom") }))
        .layer(record_error("caught", &log));

    let (_, err) = run(&app, "/").await;

    let err = err.expect("panic should surface as an error");
    assert_eq!(err.downcast_ref::<Panicked>().map(Panicked::message), Some("kaboom"));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(entries(&log), ["caught handler panicked: kaboom /"]);
}

#[tokio::test]
async fn panic_before_the_future_is_built_is_caught_too() {
    let app = app();
    app.layer(middleware(
        |_req, _res, _next| -> std::future::Ready<HandlerResult> { panic!("sync") },
    ));

    let (_, err) = run(&app, "/").await;

    assert!(err.unwrap().downcast_ref::<Panicked>().is_some());
}

#[tokio::test]
async fn error_handlers_do_not_run_without_an_error() {
    let log = Log::default();
    let app = app();
    app.layer(record_error("error", &log)).layer(record("normal", &log));

    let (_, err) = run(&app, "/").await;

    assert!(err.is_none());
    assert_eq!(entries(&log), ["normal /"]);
}

#[tokio::test]
async fn error_handler_can_recover() {
    let log = Log::default();
    let app = app();
    app.layer(middleware(|_req, _res, _next| async { Err(Error::msg("boom")) }))
        .layer(record("skipped", &log))
        .layer(error_middleware(|_err, _req, _res, next| async move {
            next.run().await;
            Ok(())
        }))
        .layer(record("resumed", &log));

    let (_, err) = run(&app, "/").await;

    assert!(err.is_none());
    assert_eq!(entries(&log), ["resumed /"]);
}

#[tokio::test]
async fn skipped_layers_still_restore_the_url() {
    let log = Log::default();
    let app = app();
    app.mount("/a", middleware(|_req, _res, _next| async { Err(Error::msg("boom")) }))
        .mount("/a", record("skipped", &log))
        .layer(record_error("caught", &log));

    run(&app, "/a/b").await;

    assert_eq!(entries(&log), ["caught boom /a/b"]);
}

#[tokio::test]
async fn error_after_calling_next_is_dropped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = app();
    app.layer(middleware(|_req, _res, next| async move {
        next.run().await;
        Err(Error::msg("too late"))
    }));

    let counter = calls.clone();
    let (tx, rx) = oneshot::channel();
    let done = Done::new(move |err| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(err);
    });
    let (res, _pending) = Response::channel();
    app.handle_with(Request::new(Method::GET, "/"), res, done).await;

    assert!(rx.await.unwrap().is_none());
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Terminal step ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn exhaustion_calls_terminal_step_once_on_a_later_turn() {
    let log = Log::default();
    let app = app();
    app.layer(record("a", &log));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (tx, rx) = oneshot::channel();
    let done = Done::new(move |err: Option<Error>| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(err.is_none());
    });
    let (res, _pending) = Response::channel();
    app.handle_with(Request::new(Method::GET, "/"), res, done).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0, "terminal step ran inside the dispatch call");
    assert!(rx.await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&log), ["a /"]);
}

#[tokio::test]
async fn handler_that_answers_ends_the_traversal() {
    let log = Log::default();
    let app = app();
    app.layer(middleware(|_req, res, _next| async move {
        res.text("hi");
        Ok(())
    }))
    .layer(record("never", &log));

    let (res, pending) = Response::channel();
    app.handle(Request::new(Method::GET, "/"), res).await;

    assert_eq!(body_of(pending).await, (StatusCode::OK, "hi".to_owned()));
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn default_terminal_answers_not_found() {
    let log = Log::default();
    let app = app();
    app.mount("/x", record("x", &log));

    let (res, pending) = Response::channel();
    app.handle(Request::new(Method::GET, "/x/missing"), res).await;

    assert_eq!(
        body_of(pending).await,
        (StatusCode::NOT_FOUND, "Cannot GET /x/missing".to_owned())
    );
}

#[tokio::test]
async fn default_terminal_reports_pending_error() {
    let app = app();
    app.layer(middleware(|_req, _res, _next| async {
        Err(Error::from_status(StatusCode::FORBIDDEN))
    }));

    let (res, pending) = Response::channel();
    app.handle(Request::new(Method::GET, "/"), res).await;

    assert_eq!(body_of(pending).await, (StatusCode::FORBIDDEN, "Forbidden".to_owned()));
}

// ── Registration ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn layer_added_mid_request_is_reachable() {
    let log = Log::default();
    let app = app();
    let handle = app.clone();
    let sink = log.clone();
    app.layer(middleware(move |req, _res, next| {
        let app = handle.clone();
        let log = sink.clone();
        async move {
            push(&log, format!("first {}", req.url()));
            app.layer(record("added", &log));
            next.run().await;
            Ok(())
        }
    }));
    app.mount("/x/yz", record("xyz", &log));

    run(&app, "/x/yz").await;
    assert_eq!(entries(&log), ["first /x/yz", "xyz /", "added /x/yz"]);

    log.lock().unwrap().clear();
    run(&app, "/x/yz").await;
    assert_eq!(
        entries(&log),
        ["first /x/yz", "xyz /", "added /x/yz", "added /x/yz"]
    );
    assert_eq!(app.len(), 4);
}

#[tokio::test]
async fn nested_app_sees_its_own_prefix_and_returns_to_parent() {
    let log = Log::default();
    let sub = app();
    sub.mount("/users", record("users", &log));

    let parent = app();
    parent.mount("/api", &sub).layer(record("after", &log));

    let (req, err) = run(&parent, "/api/users/7").await;

    assert!(err.is_none());
    assert_eq!(entries(&log), ["users /7", "after /api/users/7"]);
    assert_eq!(req.original_url(), "/api/users/7");
}

#[tokio::test]
async fn nested_app_hands_its_error_to_the_parent() {
    let log = Log::default();
    let sub = app();
    sub.layer(middleware(|_req, _res, _next| async { Err(Error::msg("inner")) }));

    let parent = app();
    parent
        .mount("/api", sub)
        .layer(record("skipped", &log))
        .layer(record_error("outer", &log));

    let (_, err) = run(&parent, "/api/x").await;

    assert_eq!(err.map(|e| e.to_string()).as_deref(), Some("inner"));
    assert_eq!(entries(&log), ["outer inner /api/x"]);
}

#[tokio::test]
async fn mounted_listener_answers_without_next() {
    let log = Log::default();
    let app = app();
    app.mount(
        "/raw",
        Listener::new(|req, res| async move {
            res.text(format!("raw {}", req.url()));
        }),
    )
    .layer(record("never", &log));

    let (res, pending) = Response::channel();
    app.handle(Request::new(Method::GET, "/raw/file"), res).await;

    assert_eq!(body_of(pending).await, (StatusCode::OK, "raw /file".to_owned()));
    assert!(entries(&log).is_empty());
}

// ── Concurrency ───────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_their_own_state() {
    let app = app();
    app.mount("/p", middleware(|req, _res, next| async move {
        tokio::task::yield_now().await;
        let expected = format!("/{}", &req.original_url()[3..]);
        if req.url() != expected {
            return Err(Error::msg(format!("saw {} instead of {expected}", req.url())));
        }
        next.run().await;
        Ok(())
    }));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64 {
        let app = app.clone();
        tasks.spawn(async move {
            let (req, err) = run(&app, &format!("/p/{i}")).await;
            assert!(err.is_none(), "{err:?}");
            assert_eq!(req.url(), format!("/p/{i}"));
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
}
