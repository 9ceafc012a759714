//! Environment-driven configuration.
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `JUNCTION_ENV` | `production`, `test`, anything else means development | development |
//! | `JUNCTION_REQUEST_TIMEOUT_MS` | milliseconds before the server answers `503` | none (wait forever) |
//!
//! Only the terminal responder looks at [`Env`]: in development and test it
//! exposes error details in the response body, in production it sends the
//! bare reason phrase. Test mode additionally silences error logging.

use std::time::Duration;

use crate::error::Error;

pub const ENV_VAR: &str = "JUNCTION_ENV";
pub const TIMEOUT_VAR: &str = "JUNCTION_REQUEST_TIMEOUT_MS";

/// Deployment mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Env {
    #[default]
    Development,
    Production,
    Test,
}

impl Env {
    /// Parses a mode name. Anything that is not `production` or `test` is
    /// development, so a typo never hides diagnostics.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "production" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    /// Whether error details may be shown to the client.
    pub fn is_diagnostic(self) -> bool {
        self != Self::Production
    }
}

/// Engine and server settings.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub env: Env,
    /// How long the server waits for a response to be finished. `None`
    /// keeps the request open until a handler finishes it.
    pub request_timeout: Option<Duration>,
}

impl Config {
    /// Reads [`ENV_VAR`] and [`TIMEOUT_VAR`] from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Config::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let env = lookup(ENV_VAR).map(|v| Env::parse(&v)).unwrap_or_default();

        let request_timeout = match lookup(TIMEOUT_VAR) {
            Some(raw) => {
                let ms: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|e| Error::msg(format!("invalid {TIMEOUT_VAR} `{raw}`: {e}")))?;
                Some(Duration::from_millis(ms))
            }
            None => None,
        };

        Ok(Self { env, request_timeout })
    }

    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}
