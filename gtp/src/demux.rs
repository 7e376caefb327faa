//! Stateful router from the relay's raw stream to the protocol engine.
//!
//! One owner of the raw socket, one typed inbox: handlers never touch the
//! socket directly (see the design note on isolating the per-request
//! handler pattern into a single demultiplexer).

use std::collections::VecDeque;
use std::time::Instant;

use crate::error::GtpError;
use crate::field::FieldConfig;
use crate::relay::RelayTransport;
use crate::wire::{self, Frame, MessageKind, MpcMessage};

/// Router from a `RelayTransport`'s raw stream to typed, queryable inbox
/// entries for the protocol engine.
pub struct Demultiplexer<R: RelayTransport> {
    relay: R,
    field: FieldConfig,
    queue: VecDeque<MpcMessage>,
}

impl<R: RelayTransport> Demultiplexer<R> {
    pub fn new(relay: R, field: FieldConfig) -> Self {
        Self {
            relay,
            field,
            queue: VecDeque::new(),
        }
    }

    pub fn relay_mut(&mut self) -> &mut R {
        &mut self.relay
    }

    /// Parse and enqueue a raw line without looking for a match. Used to
    /// fold frames salvaged during a `list_peers` query back into the inbox.
    pub fn absorb_raw(&mut self, raw: &str) {
        match wire::classify(raw, &self.field) {
            Ok(Frame::Message(msg)) => self.queue.push_back(msg),
            Ok(Frame::Chatter) => log::debug!("dropping relay chatter: {raw}"),
            Err(err) => log::warn!("dropping malformed frame: {err} ({raw})"),
        }
    }

    /// Pull any frames the relay salvaged during its last `list_peers`
    /// call into the resident queue.
    pub fn absorb_salvaged(&mut self) {
        for raw in self.relay.drain_salvaged() {
            self.absorb_raw(&raw);
        }
    }

    /// Await the first resident or newly-arrived message of `kind`
    /// satisfying `predicate`, or `timeout` past `deadline`.
    ///
    /// Scans the resident queue head-to-tail first (preserving arrival
    /// order within a `(kind, predicate)` partition), then reads fresh
    /// frames from the relay, classifying each: matches are returned,
    /// MPC frames that don't match are appended to the queue tail, relay
    /// chatter is logged and dropped, and malformed frames are logged and
    /// dropped without counting toward any expected contributor.
    pub async fn await_message(
        &mut self,
        kind: MessageKind,
        predicate: impl Fn(&MpcMessage) -> bool,
        deadline: Instant,
    ) -> Result<MpcMessage, GtpError> {
        if let Some(pos) = self
            .queue
            .iter()
            .position(|m| m.kind() == kind && predicate(m))
        {
            return Ok(self.queue.remove(pos).expect("position just found"));
        }

        loop {
            match self.relay.receive(deadline).await? {
                None => return Err(GtpError::Timeout(format!("{kind:?}"))),
                Some(raw) => match wire::classify(&raw, &self.field) {
                    Ok(Frame::Message(msg)) => {
                        if msg.kind() == kind && predicate(&msg) {
                            return Ok(msg);
                        }
                        self.queue.push_back(msg);
                    }
                    Ok(Frame::Chatter) => log::debug!("dropping relay chatter: {raw}"),
                    Err(err) => log::warn!("dropping malformed frame: {err} ({raw})"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNetwork;
    use std::time::Duration;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[tokio::test]
    async fn resident_queue_preserves_arrival_order_within_a_partition() {
        let network = MockNetwork::new();
        let relay = network.join("a");
        let field = FieldConfig::new(101);
        let mut demux = Demultiplexer::new(relay, field);

        // S3: barrier, share, barrier arrive before the barrier() call.
        network.send_to(
            &["a".to_string()],
            wire::encode(&MpcMessage::Barrier {
                from: "b".into(),
                name: "game_start".into(),
            })
            .unwrap(),
        );
        network.send_to(
            &["a".to_string()],
            wire::encode(&MpcMessage::Share {
                from: "b".into(),
                sx: 1,
                sy: 2,
            })
            .unwrap(),
        );
        network.send_to(
            &["a".to_string()],
            wire::encode(&MpcMessage::Barrier {
                from: "c".into(),
                name: "game_start".into(),
            })
            .unwrap(),
        );

        let first = demux
            .await_message(
                MessageKind::Barrier,
                |m| matches!(m, MpcMessage::Barrier { name, .. } if name == "game_start"),
                deadline(),
            )
            .await
            .unwrap();
        assert!(matches!(first, MpcMessage::Barrier { from, .. } if from == "b"));

        let second = demux
            .await_message(
                MessageKind::Barrier,
                |m| matches!(m, MpcMessage::Barrier { name, .. } if name == "game_start"),
                deadline(),
            )
            .await
            .unwrap();
        assert!(matches!(second, MpcMessage::Barrier { from, .. } if from == "c"));

        // The share frame must still be resident for a later await(share).
        let share = demux
            .await_message(MessageKind::Share, |_| true, deadline())
            .await
            .unwrap();
        assert!(matches!(share, MpcMessage::Share { from, .. } if from == "b"));
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_blocking_later_valid_ones() {
        let network = MockNetwork::new();
        let relay = network.join("a");
        let field = FieldConfig::new(101);
        let mut demux = Demultiplexer::new(relay, field);

        network.send_to(&["a".to_string()], r#"{"from":"b","sx":1,"sy":2}"#.to_string());
        network.send_to(
            &["a".to_string()],
            wire::encode(&MpcMessage::Share {
                from: "b".into(),
                sx: 3,
                sy: 4,
            })
            .unwrap(),
        );

        let msg = demux
            .await_message(MessageKind::Share, |_| true, deadline())
            .await
            .unwrap();
        assert!(matches!(msg, MpcMessage::Share { sx: 3, sy: 4, .. }));
    }
}
