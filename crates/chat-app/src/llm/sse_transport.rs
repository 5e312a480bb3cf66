use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use snafu::ResultExt;

use crate::chat::CHAT_EVENT;

use super::endpoint::stream_url;
use super::provider::{
    BoxFuture, ChatTransport, HttpRequestSnafu, HttpStatusSnafu, ProviderError, ProviderResult,
    RawEvent, RawEventStream, StreamRequest,
};

/// SSE's implicit event name for events without an `event:` line.
const DEFAULT_SSE_EVENT: &str = "message";

/// Opens the chat stream as an HTTP GET and reads it as server-sent events.
pub struct SseTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(endpoint: impl Into<String>) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context(HttpRequestSnafu {
                stage: "build-http-client",
            })?;

        Ok(Self::with_client(endpoint, client))
    }

    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn event_name(raw: &str) -> String {
        if raw.is_empty() || raw == DEFAULT_SSE_EVENT {
            CHAT_EVENT.to_string()
        } else {
            raw.to_string()
        }
    }
}

impl ChatTransport for SseTransport {
    fn open_events<'a>(
        &'a self,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, ProviderResult<RawEventStream>> {
        Box::pin(async move {
            let url = stream_url(&self.endpoint, request)?;
            tracing::debug!(stream = ?request.target, url = %url, "opening chat stream");

            let response = self
                .client
                .get(url)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
                .context(HttpRequestSnafu {
                    stage: "send-stream-request",
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return HttpStatusSnafu {
                    stage: "stream-http-status",
                    status: status.as_u16(),
                    body,
                }
                .fail();
            }

            let events = response
                .bytes_stream()
                .eventsource()
                .map(|item| match item {
                    Ok(event) => Ok(RawEvent::new(Self::event_name(&event.event), event.data)),
                    Err(error) => Err(ProviderError::EventStream {
                        stage: "read-event-stream",
                        message: error.to_string(),
                    }),
                })
                .boxed();

            Ok(events)
        })
    }
}
