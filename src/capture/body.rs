//! Body and call-metadata types exchanged between the interceptor and the transport.

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use http_body_util::combinators::{BoxBody, UnsyncBoxBody};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, SizeHint};
use std::fmt;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outgoing request body.
///
/// Streaming variants can only be written once, so the capture pipeline never
/// reads them; it records a placeholder instead.
pub enum RequestBody {
    /// No body at all
    Empty,
    /// Fully buffered, re-readable bytes
    Full(Bytes),
    /// Streaming body that can be consumed exactly once
    OneShot(BoxBody<Bytes, BoxError>),
    /// Bidirectional streaming body that is never fully available
    Duplex(BoxBody<Bytes, BoxError>),
}

impl RequestBody {
    pub fn empty() -> Self {
        RequestBody::Empty
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        RequestBody::Full(bytes.into())
    }

    pub fn one_shot<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        RequestBody::OneShot(body.map_err(Into::into).boxed())
    }

    pub fn duplex<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        RequestBody::Duplex(body.map_err(Into::into).boxed())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, RequestBody::OneShot(_))
    }

    pub fn is_duplex(&self) -> bool {
        matches!(self, RequestBody::Duplex(_))
    }

    /// Buffered bytes, when the body can be read without consuming it
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            RequestBody::Full(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::Empty
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("RequestBody::Empty"),
            RequestBody::Full(bytes) => write!(f, "RequestBody::Full({} bytes)", bytes.len()),
            RequestBody::OneShot(_) => f.write_str("RequestBody::OneShot"),
            RequestBody::Duplex(_) => f.write_str("RequestBody::Duplex"),
        }
    }
}

/// Incoming response body handed back to the caller.
///
/// Inspection may turn a streaming body into a buffered one; the caller reads
/// the same frames either way.
pub struct ResponseBody {
    inner: ResponseBodyInner,
}

enum ResponseBodyInner {
    Empty,
    Buffered {
        data: Bytes,
        trailers: Option<HeaderMap>,
    },
    Streaming(UnsyncBoxBody<Bytes, BoxError>),
    /// Upstream read failed while buffering. Replays the bytes received before
    /// the failure, then the upstream error itself.
    Broken {
        data: Bytes,
        error: Option<BoxError>,
        message: String,
    },
}

impl ResponseBodyInner {
    /// Left in place while a stream is being read, so an unwinding or
    /// cancelled read still ends the caller's body with an error.
    fn interrupted() -> Self {
        ResponseBodyInner::Broken {
            data: Bytes::new(),
            error: Some(BoxError::from(INTERRUPTED_READ)),
            message: INTERRUPTED_READ.to_string(),
        }
    }
}

const INTERRUPTED_READ: &str = "response body read was interrupted";

impl ResponseBody {
    pub fn empty() -> Self {
        Self {
            inner: ResponseBodyInner::Empty,
        }
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: ResponseBodyInner::Buffered {
                data: bytes.into(),
                trailers: None,
            },
        }
    }

    pub fn streaming<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            inner: ResponseBodyInner::Streaming(body.map_err(Into::into).boxed_unsync()),
        }
    }

    /// Whether the response carries no body object at all
    pub fn is_absent(&self) -> bool {
        matches!(self.inner, ResponseBodyInner::Empty)
    }

    /// Read the whole body into memory, leaving an identical buffered copy in place.
    ///
    /// A failing stream keeps the frames read so far and the upstream error for
    /// the caller; only the error text is returned here.
    pub(crate) async fn buffer(&mut self) -> Result<Bytes, BoxError> {
        match &self.inner {
            ResponseBodyInner::Empty => return Ok(Bytes::new()),
            ResponseBodyInner::Buffered { data, .. } => return Ok(data.clone()),
            ResponseBodyInner::Broken { message, .. } => return Err(message.clone().into()),
            ResponseBodyInner::Streaming(_) => {}
        }

        let ResponseBodyInner::Streaming(mut body) =
            mem::replace(&mut self.inner, ResponseBodyInner::interrupted())
        else {
            return Ok(Bytes::new());
        };

        let mut data = BytesMut::new();
        let mut trailers: Option<HeaderMap> = None;
        while let Some(frame) = body.frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(error) => {
                    let message = error.to_string();
                    self.inner = ResponseBodyInner::Broken {
                        data: data.freeze(),
                        error: Some(error),
                        message: message.clone(),
                    };
                    return Err(message.into());
                }
            };
            match frame.into_data() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(frame) => {
                    if let Ok(map) = frame.into_trailers() {
                        trailers.get_or_insert_with(HeaderMap::new).extend(map);
                    }
                }
            }
        }

        let data = data.freeze();
        self.inner = ResponseBodyInner::Buffered {
            data: data.clone(),
            trailers,
        };
        Ok(data)
    }

    /// Consume the body and return all of its bytes
    pub async fn bytes(self) -> Result<Bytes, BoxError> {
        Ok(self.collect().await?.to_bytes())
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ResponseBodyInner::Empty => f.write_str("ResponseBody::Empty"),
            ResponseBodyInner::Buffered { data, .. } => {
                write!(f, "ResponseBody::Buffered({} bytes)", data.len())
            }
            ResponseBodyInner::Streaming(_) => f.write_str("ResponseBody::Streaming"),
            ResponseBodyInner::Broken { data, message, .. } => {
                write!(f, "ResponseBody::Broken({} bytes, {})", data.len(), message)
            }
        }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            ResponseBodyInner::Empty => Poll::Ready(None),
            ResponseBodyInner::Buffered { data, trailers } => {
                if !data.is_empty() {
                    return Poll::Ready(Some(Ok(Frame::data(mem::take(data)))));
                }
                Poll::Ready(trailers.take().map(|t| Ok(Frame::trailers(t))))
            }
            ResponseBodyInner::Streaming(body) => Pin::new(body).poll_frame(cx),
            ResponseBodyInner::Broken { data, error, .. } => {
                if !data.is_empty() {
                    return Poll::Ready(Some(Ok(Frame::data(mem::take(data)))));
                }
                Poll::Ready(error.take().map(Err))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            ResponseBodyInner::Empty => true,
            ResponseBodyInner::Buffered { data, trailers } => {
                data.is_empty() && trailers.is_none()
            }
            ResponseBodyInner::Streaming(body) => body.is_end_stream(),
            ResponseBodyInner::Broken { data, error, .. } => data.is_empty() && error.is_none(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            ResponseBodyInner::Empty => SizeHint::with_exact(0),
            ResponseBodyInner::Buffered { data, .. } => SizeHint::with_exact(data.len() as u64),
            ResponseBodyInner::Streaming(body) => body.size_hint(),
            ResponseBodyInner::Broken { .. } => SizeHint::default(),
        }
    }
}

/// TLS handshake details reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// e.g. "TLSv1.3"
    pub tls_version: String,
    /// e.g. "TLS_AES_128_GCM_SHA256"
    pub cipher_suite: String,
}

/// Transport-side facts about a completed call.
///
/// Transports attach this to the response extensions; the snapshot builder
/// prefers it over anything measured by the interceptor itself.
#[derive(Debug, Clone, Default)]
pub struct CallMetadata {
    /// When the (final) request was written, milliseconds since epoch
    pub sent_request_at_ms: i64,
    /// When the response head arrived, milliseconds since epoch
    pub received_response_at_ms: i64,
    /// Request headers as actually sent, including headers added by the client
    pub request_headers: Option<HeaderMap>,
    /// Status reason phrase as received
    pub reason: Option<String>,
    pub handshake: Option<Handshake>,
}
