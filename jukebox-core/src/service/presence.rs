use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::ServerEvent;
use crate::metrics;
use crate::models::{Participant, ParticipantId};

/// Handle for one client connection; a participant may hold several.
pub type ConnectionId = String;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone)]
struct Subscriber {
    participant: Participant,
    sender: EventSender,
}

/// What `unsubscribe` removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub participant: Participant,
    /// True when this was the participant's last connection.
    pub left: bool,
}

/// Connected participants and their event channels.
#[derive(Default)]
pub struct ParticipantHub {
    connections: DashMap<ConnectionId, Subscriber>,
}

impl ParticipantHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns the event receiver and whether the
    /// participant was not connected before.
    pub fn subscribe(
        &self,
        participant: Participant,
        connection_id: ConnectionId,
    ) -> (mpsc::UnboundedReceiver<ServerEvent>, bool) {
        let (tx, rx) = mpsc::unbounded_channel();
        let is_new = !self.is_present(&participant.id);

        info!(
            participant_id = %participant.id,
            connection_id = %connection_id,
            is_new,
            "Participant connected"
        );
        self.connections.insert(
            connection_id,
            Subscriber {
                participant,
                sender: tx,
            },
        );
        self.update_gauge();

        (rx, is_new)
    }

    pub fn unsubscribe(&self, connection_id: &str) -> Option<Departure> {
        let Some((_, subscriber)) = self.connections.remove(connection_id) else {
            debug!(connection_id = %connection_id, "Unsubscribe for unknown connection");
            return None;
        };

        let left = !self.is_present(&subscriber.participant.id);
        info!(
            participant_id = %subscriber.participant.id,
            connection_id = %connection_id,
            left,
            "Participant disconnected"
        );
        self.update_gauge();

        Some(Departure {
            participant: subscriber.participant,
            left,
        })
    }

    /// Drop every subscriber; their receivers see the channel close.
    pub fn disconnect_all(&self) -> usize {
        let count = self.connections.len();
        self.connections.clear();
        self.update_gauge();
        count
    }

    /// Send to every connection, pruning closed ones. Returns deliveries.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        self.deliver(event, |_| true)
    }

    /// Send to every connection of one participant.
    pub fn send_to(&self, participant: &ParticipantId, event: &ServerEvent) -> usize {
        self.deliver(event, |sub| &sub.participant.id == participant)
    }

    pub fn send_to_connection(&self, connection_id: &str, event: &ServerEvent) -> bool {
        let delivered = self
            .connections
            .get(connection_id)
            .is_some_and(|sub| sub.sender.send(event.clone()).is_ok());
        if !delivered {
            self.prune(connection_id);
        }
        delivered
    }

    fn deliver(&self, event: &ServerEvent, filter: impl Fn(&Subscriber) -> bool) -> usize {
        let mut sent = 0;
        let mut failed = Vec::new();

        for entry in self.connections.iter() {
            if !filter(entry.value()) {
                continue;
            }
            if entry.sender.send(event.clone()).is_ok() {
                sent += 1;
            } else {
                failed.push(entry.key().clone());
            }
        }

        // removal after iteration; DashMap shards are still read-locked above
        for connection_id in failed {
            self.prune(&connection_id);
        }

        debug!(event_type = event.event_type(), sent, "Event delivered");
        sent
    }

    fn prune(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_some() {
            warn!(connection_id = %connection_id, "Pruned closed connection");
            self.update_gauge();
        }
    }

    #[must_use]
    pub fn is_present(&self, participant: &ParticipantId) -> bool {
        self.connections
            .iter()
            .any(|entry| &entry.participant.id == participant)
    }

    /// Distinct participants, however many tabs each has open.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.participant.id.clone())
            .collect::<HashSet<_>>()
            .len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Distinct participants sorted case-insensitively by display name.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        let mut seen = HashSet::new();
        let mut participants: Vec<Participant> = self
            .connections
            .iter()
            .filter(|entry| seen.insert(entry.participant.id.clone()))
            .map(|entry| entry.participant.clone())
            .collect();

        participants.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        participants
    }

    fn update_gauge(&self) {
        metrics::PARTICIPANTS.set(i64::try_from(self.participant_count()).unwrap_or(i64::MAX));
    }
}
