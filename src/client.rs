use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{InvocationConfig, MalformedChunkPolicy};
use crate::error::{DecodeError, InvocationError, StreamFailure};
use crate::model::{Message, StreamChunk, SynchronousResponse, build_message_request};
use crate::sink::TextSink;
use crate::transport::{Transport, TransportRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedText {
    pub text: String,
    pub fragments: usize,
    pub time_to_first_fragment: Option<Duration>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelClient<T> {
    transport: T,
    config: InvocationConfig,
}

impl<T> ModelClient<T> {
    pub fn new(transport: T, config: InvocationConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &InvocationConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn prepare(&self, message: Message, model_id: Option<&str>) -> TransportRequest {
        TransportRequest {
            model_id: model_id.unwrap_or(self.config.model_id.as_str()).to_string(),
            payload: build_message_request(message, &self.config),
        }
    }
}

impl<T: Transport> ModelClient<T> {
    pub async fn invoke(
        &self,
        prompt: &str,
        model_id: Option<&str>,
    ) -> Result<String, InvocationError> {
        self.invoke_cancellable(prompt, model_id, &CancellationToken::new())
            .await
    }

    pub async fn invoke_cancellable(
        &self,
        prompt: &str,
        model_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, InvocationError> {
        self.invoke_message_cancellable(Message::user(prompt), model_id, cancel)
            .await
    }

    pub async fn invoke_message_cancellable(
        &self,
        message: Message,
        model_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, InvocationError> {
        let prompt_len = message.text().map_or(0, str::len);
        let request = self.prepare(message, model_id);
        let model = request.model_id.clone();
        debug!(model = %model, prompt_len, "invoking model");

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(model = %model, "invocation cancelled before response");
                return Err(InvocationError::Cancelled);
            }
            result = self.transport.send(request) => result?,
        };

        let text = decode_response(&body)?;
        info!(
            model = %model,
            response_len = text.len(),
            "received model response"
        );
        Ok(text)
    }

    pub async fn invoke_streaming<S: TextSink>(
        &self,
        prompt: &str,
        model_id: Option<&str>,
        sink: &mut S,
    ) -> Result<String, StreamFailure> {
        self.invoke_streaming_cancellable(prompt, model_id, sink, &CancellationToken::new())
            .await
    }

    pub async fn invoke_streaming_cancellable<S: TextSink>(
        &self,
        prompt: &str,
        model_id: Option<&str>,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<String, StreamFailure> {
        self.invoke_streaming_with_stats(prompt, model_id, sink, cancel)
            .await
            .map(|streamed| streamed.text)
    }

    pub async fn invoke_streaming_with_stats<S: TextSink>(
        &self,
        prompt: &str,
        model_id: Option<&str>,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<StreamedText, StreamFailure> {
        self.invoke_message_streaming(Message::user(prompt), model_id, sink, cancel)
            .await
    }

    pub async fn invoke_message_streaming<S: TextSink>(
        &self,
        message: Message,
        model_id: Option<&str>,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<StreamedText, StreamFailure> {
        let started = Instant::now();
        let prompt_len = message.text().map_or(0, str::len);
        let request = self.prepare(message, model_id);
        let model = request.model_id.clone();
        debug!(model = %model, prompt_len, "invoking model with response stream");

        let mut chunks = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(StreamFailure::new(InvocationError::Cancelled, String::new()));
            }
            result = self.transport.send_streaming(request) => {
                result.map_err(|err| StreamFailure::new(err, String::new()))?
            }
        };

        let mut text = String::new();
        let mut fragments = 0usize;
        let mut time_to_first_fragment: Option<Duration> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(model = %model, fragments, "stream cancelled");
                    return Err(StreamFailure::new(InvocationError::Cancelled, text));
                }
                next = chunks.next() => next,
            };

            let raw = match next {
                Some(Ok(raw)) => raw,
                Some(Err(err)) => {
                    warn!(model = %model, fragments, error = %err, "model stream failed");
                    return Err(StreamFailure::new(err, text));
                }
                None => break,
            };

            let chunk = match serde_json::from_slice::<StreamChunk>(&raw) {
                Ok(chunk) => chunk,
                Err(err) => match self.config.malformed_chunk_policy {
                    MalformedChunkPolicy::Abort => {
                        warn!(model = %model, chunk_len = raw.len(), error = %err, "malformed stream chunk");
                        return Err(StreamFailure::new(DecodeError::from(err), text));
                    }
                    MalformedChunkPolicy::Skip => {
                        warn!(model = %model, chunk_len = raw.len(), error = %err, "skipping malformed stream chunk");
                        continue;
                    }
                },
            };

            if let Some(fragment) = chunk.text_fragment() {
                time_to_first_fragment.get_or_insert_with(|| started.elapsed());
                text.push_str(fragment);
                sink.emit(fragment);
                fragments += 1;
            }
        }

        let elapsed = started.elapsed();
        info!(
            model = %model,
            fragments,
            response_len = text.len(),
            time_to_first_fragment_ms = time_to_first_fragment.map(|d| d.as_millis() as u64),
            elapsed_ms = elapsed.as_millis() as u64,
            "model stream complete"
        );

        Ok(StreamedText {
            text,
            fragments,
            time_to_first_fragment,
            elapsed,
        })
    }
}

pub fn decode_response(body: &[u8]) -> Result<String, DecodeError> {
    let parsed: SynchronousResponse = serde_json::from_slice(body)?;
    if let Some(stop_reason) = &parsed.stop_reason {
        debug!(stop_reason = %stop_reason, blocks = parsed.content.len(), "decoded model response");
    }
    let first = parsed
        .content
        .into_iter()
        .next()
        .ok_or(DecodeError::EmptyContent)?;
    first
        .text
        .ok_or(DecodeError::MissingText { kind: first.kind })
}
