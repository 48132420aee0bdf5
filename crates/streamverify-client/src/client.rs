use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use streamverify_core::CompletionRequest;
use tracing::{debug, info, trace};

use crate::error::TransportError;
use crate::frame::{FrameDecoder, StreamFrame};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:1234/v1/chat/completions";

/// `max_tokens` value asking the server for an unbounded completion.
const UNBOUNDED_TOKENS: i64 = -1;

/// A snapshot of the accumulated text.
///
/// A successful stream yields zero or more `Partial` snapshots, each
/// extending the previous one, then exactly one `Final`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Partial(String),
    Final(String),
}

impl Progress {
    pub fn text(&self) -> &str {
        match self {
            Self::Partial(text) | Self::Final(text) => text,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

/// Lazily evaluated progress of one request. Nothing is sent until first polled.
pub type ProgressStream = Pin<Box<dyn Stream<Item = Result<Progress, TransportError>> + Send>>;

/// Anything that can answer a [`CompletionRequest`] with a [`ProgressStream`].
pub trait CompletionSource: Send + Sync {
    fn submit(&self, request: CompletionRequest) -> ProgressStream;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    /// Whole-request deadline. `None` leaves the transport defaults in place.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: None,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    messages: [ChatMessage<'a>; 2],
    model: &'a str,
    temperature: f32,
    max_tokens: i64,
    stream: bool,
}

impl<'a> From<&'a CompletionRequest> for ChatBody<'a> {
    fn from(req: &'a CompletionRequest) -> Self {
        Self {
            messages: [
                ChatMessage {
                    role: "system",
                    content: &req.system_message,
                },
                ChatMessage {
                    role: "user",
                    content: &req.user_message,
                },
            ],
            model: &req.model,
            temperature: req.temperature,
            max_tokens: UNBOUNDED_TOKENS,
            stream: req.streaming,
        }
    }
}

/// HTTP client for an OpenAI-compatible `/v1/chat/completions` endpoint.
///
/// Cloning is cheap; clones share the connection pool but every
/// [`submit`](Self::submit) owns its own buffer and accumulation.
#[derive(Clone)]
pub struct StreamingCompletionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl StreamingCompletionClient {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stream the completion for `request`.
    pub fn submit(&self, request: CompletionRequest) -> ProgressStream {
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(stream! {
            let response = match send(&http, &endpoint, &request).await {
                Ok(response) => response,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            let mut progress = Box::pin(accumulate(response.bytes_stream()));
            while let Some(item) = progress.next().await {
                yield item;
            }
        })
    }

    /// Submit `request` and wait for the final text.
    pub async fn complete(&self, request: CompletionRequest) -> Result<String, TransportError> {
        final_text(self.submit(request)).await
    }
}

impl CompletionSource for StreamingCompletionClient {
    fn submit(&self, request: CompletionRequest) -> ProgressStream {
        StreamingCompletionClient::submit(self, request)
    }
}

async fn send(
    http: &reqwest::Client,
    endpoint: &str,
    request: &CompletionRequest,
) -> Result<reqwest::Response, TransportError> {
    info!(
        url = %endpoint,
        model = %request.model,
        user_chars = request.user_message.len(),
        "sending completion request"
    );
    let resp = http
        .post(endpoint)
        .json(&ChatBody::from(request))
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// Turn a stream of body chunks into progress snapshots.
///
/// Reading stops at the first stop frame; bytes after it are never polled.
/// If the body ends without one, whatever accumulated is still the final
/// value. A chunk error ends the stream with that error.
pub fn accumulate<S, E>(chunks: S) -> impl Stream<Item = Result<Progress, TransportError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    stream! {
        let mut chunks = Box::pin(chunks);
        let mut decoder = FrameDecoder::new();
        let mut text = String::new();
        let mut stopped = false;

        'read: while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let err: TransportError = e.into();
                    yield Err(err);
                    return;
                }
            };
            for frame in decoder.push(&chunk) {
                match frame {
                    StreamFrame::Delta(fragment) => {
                        trace!(fragment = %fragment, "stream delta");
                        text.push_str(&fragment);
                        yield Ok(Progress::Partial(text.clone()));
                    }
                    StreamFrame::Stop => {
                        stopped = true;
                        break 'read;
                    }
                    StreamFrame::Malformed(payload) => {
                        debug!(payload = %payload, "skipping malformed frame");
                    }
                }
            }
        }

        if !stopped {
            debug!(
                pending = decoder.pending(),
                "stream ended without a stop frame"
            );
        }
        info!(chars = text.len(), "completion finished");
        yield Ok(Progress::Final(text));
    }
}

/// Drain a progress stream, keeping only the final text.
pub async fn final_text(mut progress: ProgressStream) -> Result<String, TransportError> {
    let mut last = String::new();
    while let Some(item) = progress.next().await {
        match item? {
            Progress::Final(text) => return Ok(text),
            Progress::Partial(text) => last = text,
        }
    }
    Ok(last)
}
