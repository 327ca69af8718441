use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::eventstream::{Frame, FrameDecoder};
use super::http_errors::{body_error, request_error, status_error};
use super::{ChunkStream, Transport, TransportFuture, TransportRequest};
use crate::config::Config;
use crate::error::TransportError;
use crate::model::InvocationRequest;

const JSON_CONTENT_TYPE: &str = "application/json";
const EVENTSTREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    bytes: String,
}

#[derive(Debug, Deserialize)]
struct ExceptionBody {
    #[serde(alias = "Message")]
    message: String,
}

// Bounds connecting and each body read, never the whole stream.
pub fn http_client(timeout_secs: u64) -> reqwest::Result<Client> {
    let timeout = Duration::from_secs(timeout_secs);
    Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
}

#[derive(Debug, Clone)]
pub struct BedrockHttpTransport {
    client: Client,
    endpoint: Url,
    bearer_token: Option<String>,
    timeout_secs: u64,
}

impl BedrockHttpTransport {
    pub fn new(client: Client, cfg: &Config) -> Result<Self, TransportError> {
        let endpoint = Url::parse(&cfg.endpoint_url).map_err(|err| {
            TransportError::Other(format!(
                "Invalid BEDROCK_ENDPOINT_URL '{}': {}",
                cfg.endpoint_url, err
            ))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(TransportError::Other(format!(
                "Invalid BEDROCK_ENDPOINT_URL '{}': not a base URL",
                cfg.endpoint_url
            )));
        }

        Ok(Self {
            client,
            endpoint,
            bearer_token: cfg.bearer_token.clone(),
            timeout_secs: cfg.model_timeout_secs,
        })
    }

    fn model_url(&self, model_id: &str, action: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["model", model_id, action]);
        }
        url
    }

    async fn post(
        &self,
        url: Url,
        payload: &InvocationRequest,
        accept: &str,
    ) -> Result<Response, TransportError> {
        let url_text = url.to_string();
        debug!(
            api_url = %url_text,
            max_tokens = payload.max_tokens,
            message_count = payload.messages.len(),
            "sending bedrock invoke request"
        );

        let mut builder = self.client.post(url).header(ACCEPT, accept).json(payload);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|err| {
            warn!(api_url = %url_text, error = %err, "bedrock request failed");
            request_error(err, &url_text, self.timeout_secs)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let response_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response body>".to_string());
            warn!(
                api_url = %url_text,
                status = %status,
                response_body_len = response_body.len(),
                "bedrock returned non-success status"
            );
            return Err(status_error(status, &response_body));
        }

        Ok(response)
    }
}

impl Transport for BedrockHttpTransport {
    fn send<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let url = self.model_url(&request.model_id, "invoke");
            let url_text = url.to_string();
            let response = self.post(url, &request.payload, JSON_CONTENT_TYPE).await?;
            let bytes = response
                .bytes()
                .await
                .map_err(|err| body_error(err, &url_text, self.timeout_secs))?;
            debug!(
                model = %request.model_id,
                response_len = bytes.len(),
                "received bedrock invoke response"
            );
            Ok(bytes.to_vec())
        })
    }

    fn send_streaming<'a>(
        &'a self,
        request: TransportRequest,
    ) -> TransportFuture<'a, ChunkStream<'a>> {
        Box::pin(async move {
            let url = self.model_url(&request.model_id, "invoke-with-response-stream");
            let url_text = url.to_string();
            let timeout_secs = self.timeout_secs;
            let response = self
                .post(url, &request.payload, EVENTSTREAM_CONTENT_TYPE)
                .await?;

            let stream = async_stream::stream! {
                let mut decoder = FrameDecoder::new();
                let mut body = Box::pin(response.bytes_stream());

                while let Some(piece) = body.next().await {
                    let piece = match piece {
                        Ok(piece) => piece,
                        Err(err) => {
                            warn!(api_url = %url_text, error = %err, "bedrock stream read failed");
                            yield Err(body_error(err, &url_text, timeout_secs));
                            return;
                        }
                    };
                    decoder.push(&piece);

                    loop {
                        match decoder.next_frame() {
                            Ok(Some(frame)) => match chunk_from_frame(&frame) {
                                Ok(Some(chunk)) => {
                                    yield Ok(chunk);
                                }
                                Ok(None) => {}
                                Err(err) => {
                                    yield Err(err);
                                    return;
                                }
                            },
                            Ok(None) => break,
                            Err(err) => {
                                yield Err(TransportError::from(err));
                                return;
                            }
                        }
                    }
                }

                if let Err(err) = decoder.finish() {
                    yield Err(TransportError::from(err));
                }
            };

            Ok(Box::pin(stream) as ChunkStream<'a>)
        })
    }
}

// Ok(None) for events that carry no chunk.
fn chunk_from_frame(frame: &Frame) -> Result<Option<Vec<u8>>, TransportError> {
    match frame.header_str(":message-type") {
        Some("exception") | Some("error") => {
            let kind = frame
                .header_str(":exception-type")
                .or_else(|| frame.header_str(":error-code"))
                .unwrap_or("unknownException")
                .to_string();
            let message = match frame.header_str(":error-message") {
                Some(message) => message.to_string(),
                None => serde_json::from_slice::<ExceptionBody>(&frame.payload)
                    .map(|body| body.message)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&frame.payload).into_owned()),
            };
            warn!(kind = %kind, message = %message, "bedrock stream reported an exception");
            Err(TransportError::Remote { kind, message })
        }
        Some("event") if frame.header_str(":event-type") == Some("chunk") => {
            let envelope: ChunkEnvelope = serde_json::from_slice(&frame.payload)
                .map_err(|err| TransportError::Envelope(format!("chunk payload: {err}")))?;
            let bytes = BASE64
                .decode(envelope.bytes.as_bytes())
                .map_err(|err| TransportError::Envelope(format!("chunk bytes: {err}")))?;
            Ok(Some(bytes))
        }
        other => {
            debug!(
                message_type = other.unwrap_or("<none>"),
                event_type = frame.header_str(":event-type").unwrap_or("<none>"),
                "skipping non-chunk stream event"
            );
            Ok(None)
        }
    }
}
