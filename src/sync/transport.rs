//! HTTP transport for the sync client (C7): authenticated snapshot fetches
//! and an SSE event stream, with single-retry-on-401 token refresh per
//! spec.md §4.7's token-refresh contract. Grounded in the same
//! `reqwest`-based streaming approach as [`crate::kv::etcd`]'s adapter, and
//! in the refresh-once idiom from the corpus's jwks-cache/oauth2-broker
//! reference files (fetch, on 401 force-refresh once, retry, give up).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

use crate::model::{Route, TcpRouteMapping};

/// Supplies (and refreshes) the bearer token used on every outbound call.
/// Signature/claim issuance itself is out of scope (spec.md §1); this trait
/// is the seam a consuming router plugs its own credential source into.
#[async_trait]
pub trait TokenFetcher: Send + Sync + 'static {
    async fn fetch_token(&self, force_refresh: bool) -> anyhow::Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("authentication was rejected twice for the same request")]
    Unauthorized,
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("event stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed SSE frame: {0}")]
    InvalidFrame(String),
    #[error("token fetch failed: {0}")]
    Token(#[source] anyhow::Error),
}

/// Which side of the coarsened wire vocabulary an event belongs to (see
/// spec.md §4.6: `Upsert` covers store `Create`/`Update`, `Delete` covers
/// store `Delete`/`Expire`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Upsert,
    Delete,
}

#[derive(Debug, Clone)]
pub struct SyncEvent<T> {
    pub index: u64,
    pub kind: EventKind,
    pub payload: T,
}

pub struct Transport<F: TokenFetcher> {
    client: reqwest::Client,
    base_url: String,
    token_fetcher: Arc<F>,
}

impl<F: TokenFetcher> Transport<F> {
    pub fn new(base_url: impl Into<String>, token_fetcher: Arc<F>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token_fetcher,
        }
    }

    async fn get_with_retry(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);

        let token = self
            .token_fetcher
            .fetch_token(false)
            .await
            .map_err(TransportError::Token)?;
        let res = self.client.get(&url).bearer_auth(&token).send().await?;
        if res.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(res);
        }

        let token = self
            .token_fetcher
            .fetch_token(true)
            .await
            .map_err(TransportError::Token)?;
        let res = self.client.get(&url).bearer_auth(&token).send().await?;
        if res.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        Ok(res)
    }

    pub async fn fetch_routes(&self) -> Result<Vec<Route>, TransportError> {
        let res = self.get_with_retry("/routing/v1/routes").await?;
        Ok(res.json().await?)
    }

    pub async fn fetch_tcp_routes(&self) -> Result<Vec<TcpRouteMapping>, TransportError> {
        let res = self.get_with_retry("/routing/v1/tcp_routes").await?;
        Ok(res.json().await?)
    }

    /// Opens a long-lived SSE subscription at `path`, decoding each frame's
    /// `data` field as `T`.
    pub async fn subscribe_events<T>(
        &self,
        path: &str,
    ) -> Result<impl Stream<Item = Result<SyncEvent<T>, TransportError>>, TransportError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let res = self.get_with_retry(path).await?;
        let byte_stream = res
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err)));
        let reader = StreamReader::new(byte_stream);
        let frames = FramedRead::new(reader, SseFrameDecoder);
        Ok(frames.map(|frame| {
            let frame = frame?;
            parse_event(frame)
        }))
    }
}

struct SseFrame {
    id: Option<u64>,
    event: Option<String>,
    data: String,
}

struct SseFrameDecoder;

impl Decoder for SseFrameDecoder {
    type Item = SseFrame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = find_subslice(buf, b"\n\n") else {
            return Ok(None);
        };
        let frame_bytes = buf.split_to(pos);
        buf.advance(2);
        Ok(Some(parse_sse_frame(&String::from_utf8_lossy(
            &frame_bytes,
        ))))
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_sse_frame(text: &str) -> SseFrame {
    let mut id = None;
    let mut event = None;
    let mut data = String::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("id: ") {
            id = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("event: ") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data: ") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest);
        }
    }
    SseFrame { id, event, data }
}

fn parse_event<T: DeserializeOwned>(frame: SseFrame) -> Result<SyncEvent<T>, TransportError> {
    let kind = match frame.event.as_deref() {
        Some("Upsert") => EventKind::Upsert,
        Some("Delete") => EventKind::Delete,
        other => {
            return Err(TransportError::InvalidFrame(format!(
                "unrecognized event name {other:?}"
            )));
        }
    };
    let index = frame
        .id
        .ok_or_else(|| TransportError::InvalidFrame("frame is missing an id".to_string()))?;
    let payload = serde_json::from_str(&frame.data)?;
    Ok(SyncEvent {
        index,
        kind,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_complete_frame_and_leaves_the_remainder_buffered() {
        let mut decoder = SseFrameDecoder;
        let mut buf = BytesMut::from(
            "id: 7\nevent: Upsert\ndata: {\"a\":1}\n\nid: 8\nevent: Delete\ndata: {\"a\":2}\n\n",
        );

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.id, Some(7));
        assert_eq!(first.event.as_deref(), Some("Upsert"));
        assert_eq!(first.data, "{\"a\":1}");

        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.id, Some(8));
        assert_eq!(second.event.as_deref(), Some("Delete"));

        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_an_unrecognized_event_name() {
        let frame = SseFrame {
            id: Some(1),
            event: Some("Weird".to_string()),
            data: "{}".to_string(),
        };
        let result = parse_event::<serde_json::Value>(frame);
        assert!(matches!(result, Err(TransportError::InvalidFrame(_))));
    }
}
