//! Real downstream transport and a client that records through the interceptor.

use crate::capture::{CallMetadata, MonitorInterceptor, RequestBody, ResponseBody};
use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use http::{Request, Response};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use std::sync::Arc;

/// Sends requests with a shared `reqwest::Client`.
///
/// The response body is streamed; it is not decompressed, so callers see
/// exactly what the server sent.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn send(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, reqwest::Error> {
        let (parts, body) = request.into_parts();
        let mut builder = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers);
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Full(bytes) => builder.body(bytes),
            RequestBody::OneShot(stream) | RequestBody::Duplex(stream) => {
                builder.body(reqwest::Body::wrap_stream(stream.into_data_stream()))
            }
        };
        let outgoing = builder.build()?;
        let sent_headers = outgoing.headers().clone();

        let sent_request_at_ms = Utc::now().timestamp_millis();
        let upstream = self.client.execute(outgoing).await?;
        let received_response_at_ms = Utc::now().timestamp_millis();

        let status = upstream.status();
        let version = upstream.version();
        let headers = upstream.headers().clone();
        let body = ResponseBody::streaming(StreamBody::new(
            upstream.bytes_stream().map_ok(Frame::data),
        ));

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        response.extensions_mut().insert(CallMetadata {
            sent_request_at_ms,
            received_response_at_ms,
            request_headers: Some(sent_headers),
            reason: None,
            handshake: None,
        });
        Ok(response)
    }
}

/// HTTP client whose every call goes through a [`MonitorInterceptor`].
#[derive(Clone)]
pub struct MonitoredClient {
    transport: Arc<ReqwestTransport>,
    interceptor: MonitorInterceptor,
}

impl MonitoredClient {
    pub fn new(interceptor: MonitorInterceptor, transport: ReqwestTransport) -> Self {
        Self {
            transport: Arc::new(transport),
            interceptor,
        }
    }

    pub fn interceptor(&self) -> &MonitorInterceptor {
        &self.interceptor
    }

    pub async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, reqwest::Error> {
        let transport = Arc::clone(&self.transport);
        self.interceptor
            .intercept(request, move |request| async move {
                transport.send(request).await
            })
            .await
    }
}
