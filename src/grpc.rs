//! gRPC request logging.
//!
//! `GrpcLoggingLayer` wraps a tonic server's routes at the HTTP level, so it
//! sees unary and streaming calls alike. Each call is logged with its method
//! path, gRPC status and duration once the response head is produced.
//!
//! ```ignore
//! Server::builder()
//!     .layer(GrpcLoggingLayer::new())
//!     .add_service(svc)
//!     .serve(addr)
//!     .await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tonic::Code;
use tower::{Layer, Service};
use tracing::{info, warn};

/// Method paths that are never logged.
pub const IGNORED_METHODS: &[&str] = &[
    "/grpc.health.v1.Health/Check",
    "/grpc.health.v1.Health/Watch",
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
];

fn is_ignored(path: &str) -> bool {
    IGNORED_METHODS.iter().any(|m| path.contains(m))
}

/// Status carried in the response headers.
///
/// Trailers-only responses (errors before any message) put `grpc-status`
/// in the headers. Otherwise it arrives in trailers and is `None` here.
fn header_status(headers: &http::HeaderMap) -> Option<Code> {
    headers
        .get("grpc-status")
        .map(|v| Code::from_bytes(v.as_bytes()))
}

/// Layer producing [`GrpcLogging`] services.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcLoggingLayer;

impl GrpcLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for GrpcLoggingLayer {
    type Service = GrpcLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcLogging { inner }
    }
}

/// Service that logs each gRPC call made through it.
#[derive(Debug, Clone)]
pub struct GrpcLogging<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for GrpcLogging<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let method = request.uri().path().to_string();
        let future = self.inner.call(request);

        if is_ignored(&method) {
            return Box::pin(future);
        }

        let start = Instant::now();
        Box::pin(async move {
            let result = future.await;
            let duration_ms = crate::utils::duration_ms(start.elapsed());

            match &result {
                Ok(response) => match header_status(response.headers()) {
                    Some(Code::Ok) | None => {
                        info!(method = %method, status = "OK", duration_ms, "gRPC call");
                    }
                    Some(code) => {
                        let message = response
                            .headers()
                            .get("grpc-message")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("");
                        warn!(
                            method = %method,
                            status = ?code,
                            message = %message,
                            duration_ms,
                            "gRPC call failed"
                        );
                    }
                },
                Err(e) => {
                    warn!(method = %method, error = %e, duration_ms, "gRPC transport error");
                }
            }

            result
        })
    }
}
