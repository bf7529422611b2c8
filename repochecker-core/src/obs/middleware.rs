//! Request logging for the build service HTTP client.

use std::time::Instant;

use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use tracing::{debug, warn};

/// Logs method, path, status and latency of every build service call.
///
/// Query strings are left out of the log line; they can carry search
/// expressions that are long and noisy.
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let method = req.method().to_string();
        let path = req.url().path().to_string();
        let started = Instant::now();

        let response = next.run(req, extensions).await;

        let elapsed_ms = started.elapsed().as_millis();
        match &response {
            Ok(resp) if resp.status().is_success() => {
                debug!("{} {} -> {} ({} ms)", method, path, resp.status(), elapsed_ms);
            }
            Ok(resp) => {
                warn!("{} {} -> {} ({} ms)", method, path, resp.status(), elapsed_ms);
            }
            Err(err) => {
                warn!("{} {} failed after {} ms: {}", method, path, elapsed_ms, err);
            }
        }

        response
    }
}
