//! Thin blocking HTTP client used for `https:` modules and package
//! archive fetches.

use std::{io::Read, time::Duration, time::Instant};

use crate::error::{EvalError, EvalResult};

/// Upper bound on response bodies (64 MiB); a runaway server must not
/// exhaust evaluator memory.
const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(30))
                .build(),
        }
    }

    /// Performs a GET request and returns the body as a string.
    pub fn get_string(&self, url: &str, deadline: Option<Instant>) -> EvalResult<String> {
        let bytes = self.get_bytes(url, deadline)?;
        String::from_utf8(bytes).map_err(|e| EvalError::io(format!("Response from `{url}` is not UTF-8: {e}")))
    }

    /// Performs a GET request and returns the raw body.
    pub fn get_bytes(&self, url: &str, deadline: Option<Instant>) -> EvalResult<Vec<u8>> {
        let mut request = self.agent.get(url);
        if let Some(deadline) = deadline {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(EvalError::timed_out)?;
            request = request.timeout(remaining);
        }
        let response = request.call().map_err(|e| match e {
            ureq::Error::Status(404, _) => EvalError::io(format!("Cannot find `{url}` (HTTP 404).")),
            ureq::Error::Status(code, _) => EvalError::io(format!("Request to `{url}` failed with HTTP {code}.")),
            ureq::Error::Transport(t) => EvalError::io(format!("Request to `{url}` failed: {t}.")),
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| EvalError::io(format!("Failed to read response from `{url}`: {e}.")))?;
        Ok(bytes)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
