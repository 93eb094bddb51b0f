//! HTTP metrics middleware: counts requests per matched route and status, and
//! scopes the request id and route for everything the handler runs.
//!
//! Installed with `route_layer`, so it only sees requests that matched a route and
//! the route label is always a route template.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use axum::extract::MatchedPath;
use axum::http::Request;
use tower::{Layer, Service};
use tunedrop_telemetry::{Metrics, with_request_context};

use crate::http::constants::HEADER_REQUEST_ID;

#[derive(Clone)]
pub(crate) struct HttpMetricsLayer {
    telemetry: Metrics,
}

impl HttpMetricsLayer {
    pub(crate) const fn new(telemetry: Metrics) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct HttpMetricsService<S> {
    inner: S,
    telemetry: Metrics,
}

impl<S, B> Service<Request<B>> for HttpMetricsService<S>
where
    S: Service<Request<B>, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let matched = req
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string());
        let route = matched
            .clone()
            .unwrap_or_else(|| req.uri().path().to_string());
        let request_id = req
            .headers()
            .get(HEADER_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let telemetry = self.telemetry.clone();
        let fut = self.inner.call(req);

        Box::pin(with_request_context(request_id, route.clone(), async move {
            let response = fut.await?;
            if let Some(route) = matched {
                telemetry.inc_http_request(&route, response.status().as_u16());
            }
            Ok(response)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::Response;
    use std::convert::Infallible;
    use tower::ServiceExt;
    use tunedrop_telemetry::current_route;

    #[tokio::test]
    async fn requests_without_a_matched_route_are_not_counted() -> anyhow::Result<()> {
        let telemetry = Metrics::new()?;
        let service = HttpMetricsLayer::new(telemetry.clone()).layer(tower::service_fn(
            |_request: Request<Body>| async {
                let mut response = Response::new(Body::from(current_route().unwrap_or_default()));
                *response.status_mut() = StatusCode::NOT_FOUND;
                Ok::<_, Infallible>(response)
            },
        ));

        let request = Request::builder().uri("/nope").body(Body::empty())?;
        let response = service.oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"/nope");

        let rendered = telemetry.render()?;
        assert!(!rendered.contains("http_requests_total{"));
        Ok(())
    }
}
