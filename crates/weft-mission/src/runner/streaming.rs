use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::types::Mission;

use crate::protocol::{ExecutionEvent, FrameDecoder};
use crate::reducer::MissionDelta;
use crate::runner::Runner;

/// Raw body chunks of an execution stream.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Opens the server-pushed event channel for a mission.
pub trait EventSource: Send + Sync + 'static {
    fn open(&self, mission: &Mission) -> BoxFuture<'_, Result<ByteStream>>;
}

/// `EventSource` over HTTP: POST `{base}/workflows/{wf}/missions/{id}/execute`.
pub struct HttpEventSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEventSource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn execute_url(&self, mission: &Mission) -> String {
        format!(
            "{}/workflows/{}/missions/{}/execute",
            self.base_url, mission.workflow_id, mission.id
        )
    }
}

impl EventSource for HttpEventSource {
    fn open(&self, mission: &Mission) -> BoxFuture<'_, Result<ByteStream>> {
        let url = self.execute_url(mission);
        let body = serde_json::json!({
            "description": mission.description,
            "total": mission.sub_tasks.len(),
        });
        Box::pin(async move {
            let mut request = self
                .http
                .post(&url)
                .header("accept", "text/event-stream")
                .json(&body);
            if let Some(ref key) = self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request
                .send()
                .await
                .map_err(|e| WeftError::Stream(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(WeftError::Stream(format!("HTTP {}: {}", status, body)));
            }

            debug!(url = %url, "Execution stream opened");
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| WeftError::Stream(e.to_string())));
            Ok(Box::pin(stream) as ByteStream)
        })
    }
}

/// Runner fed by the execution stream.
///
/// Any failure before a `complete` event, including a clean end of stream,
/// surfaces as `WeftError::Stream` so the caller can fall back.
pub struct StreamingRunner {
    source: Arc<dyn EventSource>,
    stream: Option<ByteStream>,
    decoder: FrameDecoder,
    pending: VecDeque<ExecutionEvent>,
    finished: bool,
}

impl StreamingRunner {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            stream: None,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    async fn next_delta(&mut self, mission: &Mission) -> Result<Option<MissionDelta>> {
        if self.finished {
            return Ok(None);
        }
        if self.stream.is_none() {
            let stream = self.source.open(mission).await?;
            info!(mission_id = %mission.id, "Streaming execution started");
            self.stream = Some(stream);
        }

        loop {
            while let Some(event) = self.pending.pop_front() {
                if let Some(delta) = self.to_delta(mission, event) {
                    return Ok(Some(delta));
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(WeftError::Stream("stream closed".into()));
            };
            match stream.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.feed(&chunk)),
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(e);
                }
                None => {
                    self.stream = None;
                    if let Some(event) = self.decoder.finish() {
                        self.pending.push_back(event);
                        continue;
                    }
                    return Err(WeftError::Stream(
                        "stream ended before the mission completed".into(),
                    ));
                }
            }
        }
    }

    fn to_delta(&mut self, mission: &Mission, event: ExecutionEvent) -> Option<MissionDelta> {
        if matches!(event, ExecutionEvent::Complete { .. }) {
            self.finished = true;
            self.pending.clear();
        }
        let delta = event.into_delta();
        if delta.is_none() {
            warn!(mission_id = %mission.id, "Ignoring unknown execution event");
        }
        delta
    }
}

impl Runner for StreamingRunner {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn advance<'a>(&'a mut self, mission: &'a Mission) -> BoxFuture<'a, Result<Option<MissionDelta>>> {
        Box::pin(self.next_delta(mission))
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use futures::stream;

    /// Serves a fixed list of chunks; `fail_open` makes `open` error.
    pub(crate) struct ScriptedSource {
        pub(crate) chunks: Vec<Result<Bytes>>,
        pub(crate) fail_open: bool,
    }

    impl ScriptedSource {
        pub(crate) fn frames(events: &[ExecutionEvent]) -> Self {
            let body: String = events.iter().map(|e| e.to_frame().unwrap()).collect();
            Self {
                chunks: vec![Ok(Bytes::from(body))],
                fail_open: false,
            }
        }

        pub(crate) fn unreachable() -> Self {
            Self {
                chunks: Vec::new(),
                fail_open: true,
            }
        }
    }

    impl EventSource for ScriptedSource {
        fn open(&self, _mission: &Mission) -> BoxFuture<'_, Result<ByteStream>> {
            Box::pin(async move {
                if self.fail_open {
                    return Err(WeftError::Stream("connection refused".into()));
                }
                let chunks: Vec<Result<Bytes>> = self
                    .chunks
                    .iter()
                    .map(|c| match c {
                        Ok(b) => Ok(b.clone()),
                        Err(e) => Err(WeftError::Stream(e.to_string())),
                    })
                    .collect();
                Ok(Box::pin(stream::iter(chunks)) as ByteStream)
            })
        }
    }
}
