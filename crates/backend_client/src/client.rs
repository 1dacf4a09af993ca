use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use chat_core::{ConversationSummary, Message, SessionConfig, TokenProvider};
use futures_util::StreamExt;
use log::debug;
use reqwest::header::ACCEPT;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::client_trait::{AttachmentUpload, ChatBackend, EventStream, OpenStream};
use crate::dto::{MessageDto, ModelDto, SummaryDto};
use crate::error::{TransportError, TransportResult};
use crate::protocol::{self, StreamEvent};
use crate::stream::StreamHandle;

/// Reqwest-backed [`ChatBackend`].
///
/// One client serves both traffic kinds: paginated JSON fetches carry a
/// per-request timeout, streaming requests stay open until the stream ends
/// or its handle is cancelled.
pub struct HttpBackend {
    client: Client,
    server_base: String,
    request_timeout: Duration,
    token_provider: Arc<dyn TokenProvider>,
}

impl HttpBackend {
    pub fn new(
        config: &SessionConfig,
        token_provider: Arc<dyn TokenProvider>,
    ) -> TransportResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            server_base: config.server_base.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            token_provider,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token_provider.token() {
            Some(token) if !token.trim().is_empty() => builder.bearer_auth(token),
            _ => builder,
        }
    }

    fn check_status(response: Response) -> TransportResult<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(TransportError::RateLimited),
            status => Err(TransportError::Status(status)),
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: String) -> TransportResult<T> {
        let response = self
            .authorize(self.client.get(&url))
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::check_status(response)?;
        // Decode from the full body text so a schema mismatch surfaces as
        // `Decode`, distinct from connection-level failures.
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn open_stream(&self, request: RequestBuilder) -> TransportResult<OpenStream> {
        let response = request.header(ACCEPT, "text/event-stream").send().await?;
        let response = Self::check_status(response)?;
        let handle = StreamHandle::new();
        debug!("stream {} opened: {}", handle.id(), response.url());
        let events = decode_line_stream(response, handle.token());
        Ok(OpenStream { handle, events })
    }
}

/// Decode a response body into [`StreamEvent`]s.
///
/// Lines are reassembled from the raw byte chunks before UTF-8 conversion so
/// a multi-byte character split across chunk boundaries survives intact. The
/// stream ends at the first terminal event, at body exhaustion, or as soon
/// as the cancellation token fires.
fn decode_line_stream(response: Response, token: CancellationToken) -> EventStream {
    Box::pin(stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        'read: loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => break 'read,
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(data)) => {
                    buffer.extend_from_slice(&data);
                    while let Some(newline) = buffer.iter().position(|&byte| byte == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=newline).collect();
                        match protocol::parse_line(&String::from_utf8_lossy(&line)) {
                            Some(event) if event.is_terminal() => {
                                yield Ok(event);
                                break 'read;
                            }
                            Some(event) => yield Ok(event),
                            None => {}
                        }
                    }
                }
                Some(Err(err)) => {
                    yield Err(TransportError::Stream(err.to_string()));
                    break 'read;
                }
                None => {
                    // Trailing line without a final newline.
                    if let Some(event) = protocol::parse_line(&String::from_utf8_lossy(&buffer)) {
                        yield Ok(event);
                    }
                    break 'read;
                }
            }
        }
    })
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn open_text_stream(
        &self,
        conversation_id: i64,
        prompt: &str,
        model: &str,
    ) -> TransportResult<OpenStream> {
        let url = format!("{}/stream/{}", self.server_base, conversation_id);
        let request = self
            .authorize(self.client.get(&url))
            .query(&[("prompt", prompt), ("model", model)]);
        self.open_stream(request).await
    }

    async fn open_attachment_stream(
        &self,
        conversation_id: i64,
        model: &str,
        upload: AttachmentUpload,
    ) -> TransportResult<OpenStream> {
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.media_type)?;
        let form = multipart::Form::new()
            .text("prompt", "")
            .text("model", model.to_string())
            .part("image", part);
        let url = format!("{}/multimodal/{}", self.server_base, conversation_id);
        let request = self.authorize(self.client.post(&url)).multipart(form);
        self.open_stream(request).await
    }

    async fn fetch_messages(
        &self,
        conversation_id: i64,
        page: u32,
        size: u32,
    ) -> TransportResult<Vec<Message>> {
        let url = format!(
            "{}/messages/{}?page={}&size={}",
            self.server_base, conversation_id, page, size
        );
        let dtos: Vec<MessageDto> = self.fetch_json(url).await?;
        Ok(dtos.into_iter().map(Message::from).collect())
    }

    async fn fetch_conversations(
        &self,
        page: u32,
        size: u32,
    ) -> TransportResult<Vec<ConversationSummary>> {
        let url = format!(
            "{}/conversations?page={}&size={}",
            self.server_base, page, size
        );
        let dtos: Vec<SummaryDto> = self.fetch_json(url).await?;
        Ok(dtos.into_iter().map(ConversationSummary::from).collect())
    }

    async fn fetch_models(&self) -> TransportResult<Vec<String>> {
        let url = format!("{}/models", self.server_base);
        let dtos: Vec<ModelDto> = self.fetch_json(url).await?;
        Ok(dtos.into_iter().map(|dto| dto.name).collect())
    }
}
