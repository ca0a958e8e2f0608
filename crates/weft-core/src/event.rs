use tokio::sync::broadcast::{self, error::RecvError};

use crate::types::{MissionEvent, MissionId};

/// Fan-out of mission lifecycle events to the CLI printer, gateway streams
/// and tests.
///
/// Events are fire-and-forget: a run never waits on its observers, and a
/// subscriber that falls more than `capacity` events behind loses the oldest.
pub struct EventBus {
    tx: broadcast::Sender<MissionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishing with nobody listening is not an error.
    pub fn publish(&self, event: MissionEvent) {
        let _ = self.tx.send(event);
    }

    /// Every event, for every mission.
    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.tx.subscribe()
    }

    /// Only the events of `mission_id`.
    pub fn subscribe_mission(&self, mission_id: &MissionId) -> MissionSubscription {
        MissionSubscription {
            mission_id: mission_id.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiver filtered to a single mission.
pub struct MissionSubscription {
    mission_id: MissionId,
    rx: broadcast::Receiver<MissionEvent>,
}

impl MissionSubscription {
    /// Next event of this mission. Skips past lag; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<MissionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.mission_id() == &self.mission_id => return Some(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
