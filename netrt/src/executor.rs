//! Executor strategies (§4.7): inline-on-reactor, thread-pool offload, or a
//! bounded cooperative task channel. A handler is just
//! `Fn(RouteRequest) -> Result<Response, HandlerError> + Send + Sync`
//! regardless of which strategy runs it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::HandlerError;
use crate::request::RouteRequest;
use crate::response::Response;

pub type HandlerResult = Result<Response, HandlerError>;
pub type HandlerFn = Arc<dyn Fn(RouteRequest) -> HandlerResult + Send + Sync>;

fn run_handler(handler: &HandlerFn, req: RouteRequest) -> Response {
    match handler(req) {
        Ok(resp) => resp,
        Err(HandlerError::MissingParameter(name)) => {
            Response::bad_request(&format!("missing parameter: {name}"))
        }
        Err(HandlerError::Other(message)) => Response::server_error(&message),
    }
}

struct Job {
    handler: HandlerFn,
    request: RouteRequest,
    respond: oneshot::Sender<Response>,
}

/// A bounded `tokio::sync::mpsc` channel drained by a fixed pool of
/// cooperative worker tasks (plain tokio tasks, not `spawn_blocking` —
/// handlers run under this strategy must still not block the runtime).
#[derive(Clone)]
pub struct BoundedChannelExecutor {
    tx: mpsc::Sender<Job>,
}

impl BoundedChannelExecutor {
    pub fn new(capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => {
                            let response = run_handler(&job.handler, job.request);
                            let _ = job.respond.send(response);
                        }
                        None => break,
                    }
                }
            });
        }
        BoundedChannelExecutor { tx }
    }

    async fn submit(&self, handler: HandlerFn, request: RouteRequest) -> Response {
        let (respond, await_response) = oneshot::channel();
        let job = Job {
            handler,
            request,
            respond,
        };
        match self.tx.try_send(job) {
            Ok(()) => await_response
                .await
                .unwrap_or_else(|_| Response::server_error("worker dropped without responding")),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Response::json_error(429, "too many requests in flight")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Response::server_error("executor channel is closed")
            }
        }
    }
}

/// Picked at `Server` construction and invisible to handlers thereafter.
#[derive(Clone)]
pub enum Executor {
    /// Calls the handler directly on the reactor. Handler MUST NOT block.
    Inline,
    /// Offloads to `tokio::task::spawn_blocking`; a panicking handler is
    /// translated into a 500 response rather than crashing the connection.
    Pool,
    /// Cooperative bounded channel; full queue maps to 429.
    BoundedChannel(BoundedChannelExecutor),
}

impl Executor {
    pub async fn exec(&self, handler: HandlerFn, request: RouteRequest) -> Response {
        match self {
            Executor::Inline => run_handler(&handler, request),
            Executor::Pool => match tokio::task::spawn_blocking(move || run_handler(&handler, request)).await
            {
                Ok(response) => response,
                Err(join_error) => Response::server_error(&format!("handler panicked: {join_error}")),
            },
            Executor::BoundedChannel(executor) => executor.submit(handler, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_request() -> RouteRequest {
        RouteRequest {
            request: crate::request::Request::new(
                "GET".to_string(),
                "/".to_string(),
                (1, 1),
            ),
            path: "/".to_string(),
            query: HashMap::new(),
            username: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn inline_runs_synchronously() {
        let handler: HandlerFn = Arc::new(|_req| Ok(Response::text(200, "text/plain", "ok")));
        let resp = Executor::Inline.exec(handler, sample_request()).await;
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn pool_catches_panics_as_500() {
        let handler: HandlerFn = Arc::new(|_req| panic!("boom"));
        let resp = Executor::Pool.exec(handler, sample_request()).await;
        assert_eq!(resp.status, 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_channel_returns_429_when_full() {
        let executor = BoundedChannelExecutor::new(1, 1);
        let handler: HandlerFn = Arc::new(|_req| {
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok(Response::empty(200))
        });
        // Fill the single worker with a slow job, then immediately overflow
        // the depth-1 queue with two more submissions.
        let e1 = executor.clone();
        let h1 = handler.clone();
        let first = tokio::spawn(async move { e1.submit(h1, sample_request()).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let e2 = executor.clone();
        let h2 = handler.clone();
        let second = tokio::spawn(async move { e2.submit(h2, sample_request()).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let third = executor.submit(handler.clone(), sample_request()).await;

        let _ = first.await;
        let _ = second.await;
        assert_eq!(third.status, 429);
    }
}
