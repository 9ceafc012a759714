//! One registered `(route, middleware)` pair.
//!
//! Matching is a literal, ASCII case-insensitive prefix test on the request
//! path. The match must end on a segment border: `/admin` matches `/admin`,
//! `/admin/users` and `/admin.json`, never `/administrator`. The root routes
//! `""` and `/` match everything.

use crate::handler::Middleware;

#[derive(Debug)]
pub(crate) struct Layer {
    route: String,
    middleware: Middleware,
}

impl Layer {
    pub(crate) fn new(route: &str, middleware: Middleware) -> Self {
        Self { route: normalize(route), middleware }
    }

    pub(crate) fn route(&self) -> &str {
        &self.route
    }

    pub(crate) fn middleware(&self) -> &Middleware {
        &self.middleware
    }

    /// Whether this layer handles `path`.
    pub(crate) fn matches(&self, path: &str) -> bool {
        if self.is_root() {
            return true;
        }
        let Some(prefix) = path.get(..self.route.len()) else {
            return false;
        };
        if !prefix.eq_ignore_ascii_case(&self.route) {
            return false;
        }
        matches!(path.as_bytes().get(self.route.len()), None | Some(b'/' | b'.'))
    }

    /// Whether entering this layer strips its route from the URL.
    pub(crate) fn strips(&self) -> bool {
        !self.is_root()
    }

    fn is_root(&self) -> bool {
        self.route.is_empty() || self.route == "/"
    }
}

/// Drops one trailing `/`, unless it is the whole route.
fn normalize(route: &str) -> String {
    match route.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped.to_owned(),
        _ => route.to_owned(),
    }
}
