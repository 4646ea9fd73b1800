//! Server-wide tunables. Populated once at construction and treated as
//! read-only for the lifetime of the `Server` (§5: "Router configuration:
//! populated before `run()`; treated as immutable thereafter" applies equally
//! here).

use std::time::Duration;

/// Default idle-timeout, body limit and queue depth resolve the Open
/// Questions recorded in the design notes: 60s / 1 MiB / depth 8.
#[derive(Debug, Clone)]
pub struct Settings {
    /// How long a session may go without completing a request before the
    /// connection is closed.
    pub idle_timeout: Duration,
    /// Maximum accepted request body size, in bytes.
    pub request_body_limit: usize,
    /// Maximum number of pipelined-but-unanswered requests per HTTP session.
    pub request_queue_limit: usize,
    /// Overall deadline for the TLS-sniff phase of a freshly accepted connection.
    pub detect_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            idle_timeout: Duration::from_secs(60),
            request_body_limit: 1024 * 1024,
            request_queue_limit: 8,
            detect_timeout: Duration::from_secs(60),
        }
    }
}

impl Settings {
    pub fn set_timeout(&mut self, duration: Duration) -> &mut Self {
        self.idle_timeout = duration;
        self
    }

    pub fn set_request_body_limit(&mut self, bytes: usize) -> &mut Self {
        self.request_body_limit = bytes;
        self
    }

    pub fn set_request_queue_limit(&mut self, depth: usize) -> &mut Self {
        self.request_queue_limit = depth;
        self
    }
}
