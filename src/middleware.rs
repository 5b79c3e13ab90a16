//! Handler trait and the wrappers composed around the router
//!
//! The chain is `Logging(Headers(Router))`: logging is outermost so its timing
//! covers everything downstream, including streaming of proxied bodies.

use futures::future::{BoxFuture, FutureExt};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN};
use hyper::{Method, Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

use crate::GatewayBody;

/// Header name for request ID
pub const X_REQUEST_ID: &str = "x-request-id";

/// Anything that turns a request into a response
pub trait Handler: Send + Sync {
    fn call(&self, req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>>;
}

impl<H: Handler + ?Sized> Handler for std::sync::Arc<H> {
    fn call(&self, req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>> {
        (**self).call(req)
    }
}

/// Wrap a handler in the standard middleware chain
pub fn chain<H: Handler>(handler: H) -> Logging<Headers<H>> {
    Logging::new(Headers::new(handler))
}

/// Logs method, URI, status and latency of every request
pub struct Logging<H> {
    inner: H,
}

impl<H> Logging<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for Logging<H> {
    fn call(&self, mut req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>> {
        async move {
            let start = Instant::now();

            let request_id = match req
                .headers()
                .get(X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
            {
                Some(id) => id.to_string(),
                None => {
                    let id = Uuid::new_v4().to_string();
                    if let Ok(value) = HeaderValue::from_str(&id) {
                        req.headers_mut().insert(X_REQUEST_ID, value);
                    }
                    id
                }
            };

            let method = req.method().clone();
            let uri = req.uri().clone();

            let response = self.inner.call(req).await;
            let (mut parts, body) = response.into_parts();

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                parts.headers.insert(X_REQUEST_ID, value);
            }

            let record = RequestRecord {
                method,
                uri,
                status: parts.status,
                request_id,
                start,
            };
            let body = LoggedBody {
                inner: body,
                record: Some(record),
            };

            Response::from_parts(parts, body.boxed())
        }
        .boxed()
    }
}

struct RequestRecord {
    method: Method,
    uri: Uri,
    status: StatusCode,
    request_id: String,
    start: Instant,
}

impl RequestRecord {
    fn emit(self) {
        let elapsed: Duration = self.start.elapsed();
        info!(
            method = %self.method,
            uri = %self.uri,
            status = self.status.as_u16(),
            request_id = %self.request_id,
            elapsed = ?elapsed,
            "[ {} ] -> {}",
            self.method,
            self.uri
        );
    }
}

/// Response body that emits the request log line once it is finished or dropped
struct LoggedBody {
    inner: GatewayBody,
    record: Option<RequestRecord>,
}

impl Body for LoggedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let poll = Pin::new(&mut self.inner).poll_frame(cx);
        if let Poll::Ready(None) = poll {
            if let Some(record) = self.record.take() {
                record.emit();
            }
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for LoggedBody {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            record.emit();
        }
    }
}

/// Sets `Access-Control-Allow-Origin: *` on every response
pub struct Headers<H> {
    inner: H,
}

impl<H> Headers<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for Headers<H> {
    fn call(&self, req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>> {
        async move {
            let mut response = self.inner.call(req).await;
            response
                .headers_mut()
                .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            response
        }
        .boxed()
    }
}
