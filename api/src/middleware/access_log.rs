use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service, ServiceExt};

/// Tower Layer for gateway access logging.
///
/// Logs method, path, tool, status and time-to-headers for invocation and
/// operator routes. For kept-alive invocations the status is the committed
/// `200`; the terminal outcome is logged by the orchestrator.
#[derive(Clone, Default)]
pub struct AccessLogLayer;

impl AccessLogLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
}

impl<S> Service<Request> for AccessLogService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);

        Box::pin(async move {
            let path = req.uri().path().to_owned();

            // Only log gateway endpoints
            if !is_gateway_path(&path) {
                return Ok(ready.oneshot(req).await.into_response());
            }

            let start = Instant::now();
            let method = req.method().to_string();
            let response = ready.oneshot(req).await.into_response();

            tracing::info!(
                method = %method,
                path = %path,
                tool = parse_tool_path(&path).unwrap_or("-"),
                status = response.status().as_u16(),
                response_time_ms = start.elapsed().as_millis() as u64,
                "access"
            );

            Ok(response)
        })
    }
}

fn is_gateway_path(path: &str) -> bool {
    path.starts_with("/tools") || path.starts_with("/mcp/") || path.starts_with("/invocations")
}

/// Tool name from `/tools/{tool}` or `/mcp/tools/{tool}`.
fn parse_tool_path(path: &str) -> Option<&str> {
    let rest = path
        .strip_prefix("/tools/")
        .or_else(|| path.strip_prefix("/mcp/tools/"))?;
    let tool = rest.split('/').next()?;
    (!tool.is_empty()).then_some(tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tool_from_invocation_paths() {
        assert_eq!(parse_tool_path("/tools/execute_powershell_assessment"), Some("execute_powershell_assessment"));
        assert_eq!(parse_tool_path("/mcp/tools/assess"), Some("assess"));
        assert_eq!(parse_tool_path("/tools/assess/extra"), Some("assess"));
    }

    #[test]
    fn parse_non_tool_paths() {
        assert_eq!(parse_tool_path("/tools"), None);
        assert_eq!(parse_tool_path("/tools/"), None);
        assert_eq!(parse_tool_path("/invocations"), None);
        assert_eq!(parse_tool_path("/healthz"), None);
    }

    #[test]
    fn only_gateway_routes_are_logged() {
        assert!(is_gateway_path("/tools/assess"));
        assert!(is_gateway_path("/mcp/tools/assess"));
        assert!(is_gateway_path("/invocations/abc/stop"));
        assert!(!is_gateway_path("/healthz"));
        assert!(!is_gateway_path("/swagger-ui"));
    }
}
