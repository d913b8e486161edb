//! Server-Sent Events (SSE) implementation for real-time data streaming.
//!
//! This module provides the `Sse` struct for implementing Server-Sent Events according to
//! the W3C EventSource specification. SSE enables servers to push data to web clients
//! over a single HTTP connection, making it ideal for real-time updates, live feeds,
//! and push notifications. `SseEvent` carries the optional `id:`/`event:` lines used
//! by the registry's route and TCP-route change feeds alongside the mandatory `data:`.

use std::convert::Infallible;

use bytes::{Bytes, BytesMut};
use http::{StatusCode, header};
use http_body_util::StreamBody;
use tokio_stream::{Stream, StreamExt};

use crate::{body::TakoBody, bytes::TakoBytes, responder::Responder, types::Response};

/// SSE data line prefix according to the EventSource specification.
///
/// Every SSE data line must start with "data: " followed by the actual content.
/// This constant ensures consistent formatting across all SSE messages.
const DATA_PREFIX: &[u8] = b"data: ";

/// SSE event terminator sequence.
///
/// Each SSE event must end with two newline characters ("\n\n") to signal
/// the end of the event to the client's EventSource parser.
const SUFFIX: &[u8] = b"\n\n";

/// One SSE frame: an optional `id:` line, an optional `event:` line, and the
/// mandatory `data:` line. Plain `TakoBytes` streams (no id/event) still work
/// via the `From<TakoBytes>` conversion below.
pub struct SseEvent {
    /// Value of the `id:` field, when present.
    pub id: Option<String>,
    /// Value of the `event:` field, when present.
    pub event: Option<String>,
    /// Payload of the `data:` field.
    pub data: TakoBytes,
}

impl From<TakoBytes> for SseEvent {
    fn from(data: TakoBytes) -> Self {
        Self {
            id: None,
            event: None,
            data,
        }
    }
}

impl SseEvent {
    /// Builds a frame with both `id:` and `event:` set.
    pub fn new(id: impl Into<String>, event: impl Into<String>, data: TakoBytes) -> Self {
        Self {
            id: Some(id.into()),
            event: Some(event.into()),
            data,
        }
    }

    fn encode(self) -> Bytes {
        let msg = self.data.0;
        let mut cap = DATA_PREFIX.len() + msg.len() + SUFFIX.len();
        if let Some(id) = &self.id {
            cap += 4 + id.len();
        }
        if let Some(event) = &self.event {
            cap += 8 + event.len();
        }

        let mut buf = BytesMut::with_capacity(cap);
        if let Some(id) = &self.id {
            buf.extend_from_slice(b"id: ");
            buf.extend_from_slice(id.as_bytes());
            buf.extend_from_slice(b"\n");
        }
        if let Some(event) = &self.event {
            buf.extend_from_slice(b"event: ");
            buf.extend_from_slice(event.as_bytes());
            buf.extend_from_slice(b"\n");
        }
        buf.extend_from_slice(DATA_PREFIX);
        buf.extend_from_slice(&msg);
        buf.extend_from_slice(SUFFIX);
        buf.freeze()
    }
}

/// Server-Sent Events stream wrapper for real-time data broadcasting.
///
/// `Sse` wraps a stream of `TakoBytes` and formats them according to the SSE
/// specification when converted to an HTTP response. It automatically handles
/// the required headers and event formatting, making it easy to implement
/// real-time features like live updates, notifications, or data feeds.
///
/// # Type Parameters
///
/// * `S` - Stream type that yields `TakoBytes` items for SSE events
///
/// # Examples
///
/// ```rust
/// use tako::sse::Sse;
/// use tako::bytes::TakoBytes;
/// use tokio_stream::{StreamExt, iter};
///
/// // Create an SSE stream from a vector of messages
/// let messages = vec![
///     TakoBytes::from("First event".to_string()),
///     TakoBytes::from("Second event".to_string()),
///     TakoBytes::from("Third event".to_string()),
/// ];
///
/// let stream = iter(messages);
/// let sse = Sse::new(stream);
/// ```
pub struct Sse<S>
where
    S: Stream<Item = SseEvent> + Send + 'static,
{
    /// The underlying stream of data to be sent as SSE events.
    pub stream: S,
}

impl<S> Sse<S>
where
    S: Stream<Item = SseEvent> + Send + 'static,
{
    /// Creates a new SSE wrapper around the provided stream.
    ///
    /// The stream should yield `TakoBytes` items that will be formatted as SSE
    /// events. Each item becomes a separate SSE event sent to connected clients.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tako::sse::Sse;
    /// use tako::bytes::TakoBytes;
    /// use tokio_stream::{StreamExt, wrappers::IntervalStream};
    /// use std::time::Duration;
    /// use tokio::time::interval;
    ///
    /// // Create a periodic update stream
    /// let updates = IntervalStream::new(interval(Duration::from_millis(500)))
    ///     .enumerate()
    ///     .map(|(i, _)| TakoBytes::from(format!("Update #{}", i)));
    ///
    /// let sse = Sse::new(updates);
    /// ```
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> Responder for Sse<S>
where
    S: Stream<Item = SseEvent> + Send + 'static,
{
    /// Converts the SSE stream into an HTTP response with proper headers.
    ///
    /// This method configures the response with the required SSE headers including
    /// Content-Type, Cache-Control, and Connection headers. It also formats each
    /// stream item with the proper SSE data prefix and event terminator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tako::sse::Sse;
    /// use tako::responder::Responder;
    /// use tako::bytes::TakoBytes;
    /// use tokio_stream::iter;
    /// use http::StatusCode;
    ///
    /// let messages = vec![TakoBytes::from("Hello, SSE!".to_string())];
    /// let sse = Sse::new(iter(messages));
    /// let response = sse.into_response();
    ///
    /// assert_eq!(response.status(), StatusCode::OK);
    /// assert_eq!(
    ///     response.headers().get("content-type").unwrap(),
    ///     "text/event-stream"
    /// );
    /// assert_eq!(
    ///     response.headers().get("cache-control").unwrap(),
    ///     "no-cache"
    /// );
    /// ```
    fn into_response(self) -> Response {
        let stream = self
            .stream
            .map(|event| Ok::<_, Infallible>(hyper::body::Frame::data(event.encode())));

        hyper::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(TakoBody::new(StreamBody::new(stream)))
            .unwrap()
    }
}
