//! Wire format of the execution stream.
//!
//! The body is UTF-8 text; each event is one line `data: {json}`. Blank
//! lines and lines without the `data:` prefix are ignored. A line may be
//! split across any number of network chunks, including inside a multi-byte
//! character.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use weft_core::error::Result;

use crate::reducer::MissionDelta;

/// One event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Start {
        total: usize,
    },
    StepStart {
        step: usize,
    },
    StepComplete {
        step: usize,
        #[serde(default)]
        output: String,
        #[serde(default)]
        duration_ms: u64,
    },
    StepError {
        step: usize,
        #[serde(default)]
        error: String,
    },
    Complete {
        #[serde(default)]
        result: String,
    },
    /// Any event type this build does not know.
    #[serde(other)]
    Unknown,
}

impl ExecutionEvent {
    /// The reducer delta for this event, stamped now. `None` for `Unknown`.
    pub fn into_delta(self) -> Option<MissionDelta> {
        let at = Utc::now();
        let delta = match self {
            Self::Start { total } => MissionDelta::Started { total },
            Self::StepStart { step } => MissionDelta::StepStarted { step, at },
            Self::StepComplete {
                step,
                output,
                duration_ms,
            } => MissionDelta::StepCompleted {
                step,
                output,
                duration_ms,
                at,
            },
            Self::StepError { step, error } => MissionDelta::StepFailed { step, error, at },
            Self::Complete { result } => MissionDelta::Completed { result },
            Self::Unknown => return None,
        };
        Some(delta)
    }

    /// Encode as a single `data:` line followed by a blank line.
    pub fn to_frame(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Incremental line decoder for the execution stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ExecutionEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<ExecutionEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }

    /// Bytes held waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<ExecutionEvent> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Dropping non-UTF-8 stream line");
            return None;
        }
    };
    let line = line.trim_end_matches(['\n', '\r']);
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<ExecutionEvent>(data) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, line = %data, "Ignoring malformed stream event");
            None
        }
    }
}
