pub mod simulated;
pub mod streaming;

use std::sync::Arc;

use futures::future::BoxFuture;

use weft_core::config::ExecutionConfig;
use weft_core::error::Result;
use weft_core::event::EventBus;
use weft_core::traits::PersistenceAdapter;
use weft_core::types::Mission;

use crate::reducer::MissionDelta;

pub use simulated::SimulatedRunner;
pub use streaming::{EventSource, HttpEventSource, StreamingRunner};

/// Drives one mission forward, one delta at a time.
///
/// `advance` resolves to the next delta for `mission`, or `None` once the
/// runner has nothing more to contribute. A `WeftError::Stream` error asks
/// the caller to fall back to another runner.
pub trait Runner: Send {
    fn name(&self) -> &'static str;

    fn advance<'a>(&'a mut self, mission: &'a Mission) -> BoxFuture<'a, Result<Option<MissionDelta>>>;
}

/// Everything a runner may need.
#[derive(Clone)]
pub struct RunnerDeps {
    pub config: ExecutionConfig,
    pub store: Arc<dyn PersistenceAdapter>,
    pub bus: Arc<EventBus>,
    pub source: Option<Arc<dyn EventSource>>,
}

impl RunnerDeps {
    /// Streaming first when enabled and an endpoint is known.
    pub fn primary(&self) -> Box<dyn Runner> {
        match (&self.source, self.config.streaming) {
            (Some(source), true) => Box::new(StreamingRunner::new(source.clone())),
            _ => self.fallback(),
        }
    }

    pub fn fallback(&self) -> Box<dyn Runner> {
        Box::new(SimulatedRunner::new(
            &self.config,
            self.store.clone(),
            self.bus.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_test_utils::MemoryStore;

    fn deps(streaming: bool, with_source: bool) -> RunnerDeps {
        let mut config = ExecutionConfig::default();
        config.streaming = streaming;
        let source: Option<Arc<dyn EventSource>> = if with_source {
            Some(Arc::new(HttpEventSource::new("http://127.0.0.1:9", None)))
        } else {
            None
        };
        RunnerDeps {
            config,
            store: Arc::new(MemoryStore::new()),
            bus: Arc::new(EventBus::default()),
            source,
        }
    }

    #[test]
    fn test_factory_prefers_streaming() {
        assert_eq!(deps(true, true).primary().name(), "streaming");
        assert_eq!(deps(false, true).primary().name(), "simulated");
        assert_eq!(deps(true, false).primary().name(), "simulated");
        assert_eq!(deps(true, true).fallback().name(), "simulated");
    }
}
