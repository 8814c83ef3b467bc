//! Skirmish Wire Protocol Types
//!
//! This crate defines the Protobuf messages exchanged with the relay and the
//! domain-level event enums the client core consumes and produces.
//!
//! # Message Categories
//!
//! - **Outbound** (`ClientEnvelope`): create/join requests, rate-limited state publication
//! - **Inbound** (`RelayEnvelope`): session lifecycle events, peer snapshots, relay errors
//! - **Replay** (`ReplayArtifact`): recorded local intent streams
//!
//! Snapshot fields are proto3 `optional` so that a receiver can tell an
//! absent field from a zero one. Rosters are ordered maps so iteration over
//! participants is deterministic.

#![deny(unsafe_code)]

use std::collections::BTreeMap;

use prost::Message;
use skirmish_sim::{Direction, LocalSnapshot, LocalState};

// ============================================================================
// Type Aliases
// ============================================================================

/// Client identity as assigned by the client itself (`player_xxxxxxxxx`).
pub type PlayerId = String;

/// Session identity as assigned or accepted by the relay.
pub type SessionId = String;

// ============================================================================
// Errors
// ============================================================================

/// Failure to turn bytes or protos into domain events.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to decode frame: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("envelope carries no event")]
    MissingEvent,

    #[error("required field `{0}` is absent")]
    MissingField(&'static str),

    #[error("intent bitmask {0:#x} has unknown bits")]
    InvalidIntentBits(u32),
}

// ============================================================================
// Shared Records
// ============================================================================

/// One participant's state as carried in rosters and peer updates.
#[derive(Clone, PartialEq, Message)]
pub struct PlayerStateProto {
    #[prost(double, optional, tag = "1")]
    pub x: Option<f64>,

    #[prost(double, optional, tag = "2")]
    pub y: Option<f64>,

    /// -1 or +1; anything else is treated as "no direction".
    #[prost(sint32, optional, tag = "3")]
    pub direction: Option<i32>,

    #[prost(string, optional, tag = "4")]
    pub color: Option<String>,

    /// Display name (roster entries only).
    #[prost(string, optional, tag = "5")]
    pub name: Option<String>,
}

// ============================================================================
// Outbound Messages
// ============================================================================

#[derive(Clone, PartialEq, Message)]
pub struct CreateSessionProto {
    #[prost(string, tag = "1")]
    pub local_id: String,

    #[prost(string, tag = "2")]
    pub display_name: String,

    /// Custom session id; absent lets the relay pick one.
    #[prost(string, optional, tag = "3")]
    pub requested_session_id: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct JoinSessionProto {
    #[prost(string, tag = "1")]
    pub local_id: String,

    #[prost(string, tag = "2")]
    pub display_name: String,

    #[prost(string, tag = "3")]
    pub session_id: String,
}

/// Full (non-delta) local state; sent at most once per update interval.
#[derive(Clone, PartialEq, Message)]
pub struct PublishStateProto {
    #[prost(string, tag = "1")]
    pub session_id: String,

    #[prost(string, tag = "2")]
    pub local_id: String,

    #[prost(message, optional, tag = "3")]
    pub state: Option<PlayerStateProto>,
}

/// Everything a client sends to the relay.
#[derive(Clone, PartialEq, Message)]
pub struct ClientEnvelope {
    #[prost(oneof = "client_envelope::Event", tags = "1, 2, 3")]
    pub event: Option<client_envelope::Event>,
}

pub mod client_envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        CreateSession(super::CreateSessionProto),
        #[prost(message, tag = "2")]
        JoinSession(super::JoinSessionProto),
        #[prost(message, tag = "3")]
        PublishState(super::PublishStateProto),
    }
}

// ============================================================================
// Inbound Messages
// ============================================================================

#[derive(Clone, PartialEq, Message)]
pub struct SessionCreatedProto {
    #[prost(string, tag = "1")]
    pub session_id: String,

    #[prost(btree_map = "string, message", tag = "2")]
    pub roster: BTreeMap<String, PlayerStateProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PeerJoinedProto {
    #[prost(string, tag = "1")]
    pub display_name: String,

    #[prost(string, tag = "2")]
    pub peer_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SessionStartedProto {
    #[prost(btree_map = "string, message", tag = "1")]
    pub roster: BTreeMap<String, PlayerStateProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PeerStateProto {
    #[prost(string, tag = "1")]
    pub peer_id: String,

    #[prost(message, optional, tag = "2")]
    pub state: Option<PlayerStateProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PeerDisconnectedProto {
    #[prost(string, tag = "1")]
    pub peer_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RelayErrorProto {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// Everything the relay broadcasts to a client.
#[derive(Clone, PartialEq, Message)]
pub struct RelayEnvelope {
    #[prost(oneof = "relay_envelope::Event", tags = "1, 2, 3, 4, 5, 6")]
    pub event: Option<relay_envelope::Event>,
}

pub mod relay_envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        SessionCreated(super::SessionCreatedProto),
        #[prost(message, tag = "2")]
        PeerJoined(super::PeerJoinedProto),
        #[prost(message, tag = "3")]
        SessionStarted(super::SessionStartedProto),
        #[prost(message, tag = "4")]
        PeerState(super::PeerStateProto),
        #[prost(message, tag = "5")]
        PeerDisconnected(super::PeerDisconnectedProto),
        #[prost(message, tag = "6")]
        RelayError(super::RelayErrorProto),
    }
}

// ============================================================================
// Replay Artifact Types
// ============================================================================

/// Full physical state of the Local entity at recording start.
#[derive(Clone, PartialEq, Message)]
pub struct LocalStateRecord {
    #[prost(double, tag = "1")]
    pub x: f64,

    #[prost(double, tag = "2")]
    pub y: f64,

    #[prost(double, tag = "3")]
    pub speed_x: f64,

    #[prost(double, tag = "4")]
    pub speed_y: f64,

    #[prost(sint32, tag = "5")]
    pub direction: i32,

    #[prost(bool, tag = "6")]
    pub is_grounded: bool,

    #[prost(string, tag = "7")]
    pub color: String,
}

/// Tuning parameter key-value pair.
#[derive(Clone, PartialEq, Message)]
pub struct TuningParameter {
    #[prost(string, tag = "1")]
    pub key: String,

    #[prost(double, tag = "2")]
    pub value: f64,
}

/// Recorded local intent stream.
#[derive(Clone, PartialEq, Message)]
pub struct ReplayArtifact {
    /// Schema version (starts at 1).
    #[prost(uint32, tag = "1")]
    pub replay_format_version: u32,

    #[prost(message, optional, tag = "2")]
    pub initial_state: Option<LocalStateRecord>,

    /// StateDigest of `initial_state`.
    #[prost(uint64, tag = "3")]
    pub initial_digest: u64,

    #[prost(double, tag = "4")]
    pub surface_width: f64,

    #[prost(double, tag = "5")]
    pub floor_y: f64,

    #[prost(string, tag = "6")]
    pub state_digest_algo_id: String,

    /// Tuning parameters (sorted by key).
    #[prost(message, repeated, tag = "7")]
    pub tuning_parameters: Vec<TuningParameter>,

    /// One intent bitmask per simulated tick.
    #[prost(uint32, repeated, tag = "8")]
    pub intents: Vec<u32>,

    /// Lowercase hex SHA-256 over the intent bytes.
    #[prost(string, tag = "9")]
    pub intent_stream_sha256: String,

    #[prost(uint64, tag = "10")]
    pub final_digest: u64,

    /// Number of ticks simulated.
    #[prost(uint64, tag = "11")]
    pub checkpoint_tick: u64,

    #[prost(string, tag = "12")]
    pub end_reason: String,

    #[prost(string, tag = "13")]
    pub session_id: String,
}

// ============================================================================
// Domain Events
// ============================================================================

/// A remote participant's state with every field optional.
///
/// `direction` is kept as the raw wire integer so merge policies can see
/// exactly what arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerSnapshot {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub direction: Option<i32>,
    pub color: Option<String>,
    pub display_name: Option<String>,
}

impl PeerSnapshot {
    /// Parsed direction, if the raw value carries one.
    pub fn direction(&self) -> Option<Direction> {
        self.direction.and_then(Direction::from_sign)
    }
}

/// Roster keyed by participant id, in id order.
pub type Roster = BTreeMap<PlayerId, PeerSnapshot>;

/// Events the client core emits.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    CreateSession {
        local_id: PlayerId,
        display_name: String,
        requested_session_id: Option<SessionId>,
    },
    JoinSession {
        local_id: PlayerId,
        display_name: String,
        session_id: SessionId,
    },
    PublishState {
        session_id: SessionId,
        local_id: PlayerId,
        state: LocalState,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::JoinSession { .. } => "join_session",
            Self::PublishState { .. } => "publish_state",
        }
    }
}

/// Events the relay delivers to the client core.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SessionCreated {
        session_id: SessionId,
        roster: Roster,
    },
    PeerJoined {
        peer_id: PlayerId,
        display_name: String,
    },
    SessionStarted {
        roster: Roster,
    },
    PeerState {
        peer_id: PlayerId,
        state: PeerSnapshot,
    },
    PeerDisconnected {
        peer_id: PlayerId,
    },
    RelayError {
        message: String,
    },
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::PeerJoined { .. } => "peer_joined",
            Self::SessionStarted { .. } => "session_started",
            Self::PeerState { .. } => "peer_state",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::RelayError { .. } => "relay_error",
        }
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<LocalState> for PlayerStateProto {
    fn from(s: LocalState) -> Self {
        Self {
            x: Some(s.x),
            y: Some(s.y),
            direction: Some(s.direction.sign()),
            color: None,
            name: None,
        }
    }
}

impl TryFrom<PlayerStateProto> for LocalState {
    type Error = WireError;

    fn try_from(p: PlayerStateProto) -> Result<Self, Self::Error> {
        Ok(Self {
            x: p.x.ok_or(WireError::MissingField("x"))?,
            y: p.y.ok_or(WireError::MissingField("y"))?,
            direction: p
                .direction
                .and_then(Direction::from_sign)
                .ok_or(WireError::MissingField("direction"))?,
        })
    }
}

impl From<PlayerStateProto> for PeerSnapshot {
    fn from(p: PlayerStateProto) -> Self {
        Self {
            x: p.x,
            y: p.y,
            direction: p.direction,
            color: p.color,
            display_name: p.name,
        }
    }
}

impl From<PeerSnapshot> for PlayerStateProto {
    fn from(s: PeerSnapshot) -> Self {
        Self {
            x: s.x,
            y: s.y,
            direction: s.direction,
            color: s.color,
            name: s.display_name,
        }
    }
}

fn roster_from_proto(roster: BTreeMap<String, PlayerStateProto>) -> Roster {
    roster.into_iter().map(|(id, p)| (id, p.into())).collect()
}

fn roster_to_proto(roster: Roster) -> BTreeMap<String, PlayerStateProto> {
    roster.into_iter().map(|(id, s)| (id, s.into())).collect()
}

impl From<OutboundEvent> for ClientEnvelope {
    fn from(event: OutboundEvent) -> Self {
        use client_envelope::Event;

        let event = match event {
            OutboundEvent::CreateSession {
                local_id,
                display_name,
                requested_session_id,
            } => Event::CreateSession(CreateSessionProto {
                local_id,
                display_name,
                requested_session_id,
            }),
            OutboundEvent::JoinSession {
                local_id,
                display_name,
                session_id,
            } => Event::JoinSession(JoinSessionProto {
                local_id,
                display_name,
                session_id,
            }),
            OutboundEvent::PublishState {
                session_id,
                local_id,
                state,
            } => Event::PublishState(PublishStateProto {
                session_id,
                local_id,
                state: Some(state.into()),
            }),
        };
        Self { event: Some(event) }
    }
}

impl TryFrom<ClientEnvelope> for OutboundEvent {
    type Error = WireError;

    fn try_from(envelope: ClientEnvelope) -> Result<Self, Self::Error> {
        use client_envelope::Event;

        Ok(match envelope.event.ok_or(WireError::MissingEvent)? {
            Event::CreateSession(p) => Self::CreateSession {
                local_id: p.local_id,
                display_name: p.display_name,
                requested_session_id: p.requested_session_id,
            },
            Event::JoinSession(p) => Self::JoinSession {
                local_id: p.local_id,
                display_name: p.display_name,
                session_id: p.session_id,
            },
            Event::PublishState(p) => Self::PublishState {
                session_id: p.session_id,
                local_id: p.local_id,
                state: p.state.ok_or(WireError::MissingField("state"))?.try_into()?,
            },
        })
    }
}

impl From<InboundEvent> for RelayEnvelope {
    fn from(event: InboundEvent) -> Self {
        use relay_envelope::Event;

        let event = match event {
            InboundEvent::SessionCreated { session_id, roster } => {
                Event::SessionCreated(SessionCreatedProto {
                    session_id,
                    roster: roster_to_proto(roster),
                })
            }
            InboundEvent::PeerJoined {
                peer_id,
                display_name,
            } => Event::PeerJoined(PeerJoinedProto {
                display_name,
                peer_id,
            }),
            InboundEvent::SessionStarted { roster } => Event::SessionStarted(SessionStartedProto {
                roster: roster_to_proto(roster),
            }),
            InboundEvent::PeerState { peer_id, state } => Event::PeerState(PeerStateProto {
                peer_id,
                state: Some(state.into()),
            }),
            InboundEvent::PeerDisconnected { peer_id } => {
                Event::PeerDisconnected(PeerDisconnectedProto { peer_id })
            }
            InboundEvent::RelayError { message } => Event::RelayError(RelayErrorProto { message }),
        };
        Self { event: Some(event) }
    }
}

impl TryFrom<RelayEnvelope> for InboundEvent {
    type Error = WireError;

    fn try_from(envelope: RelayEnvelope) -> Result<Self, Self::Error> {
        use relay_envelope::Event;

        Ok(match envelope.event.ok_or(WireError::MissingEvent)? {
            Event::SessionCreated(p) => Self::SessionCreated {
                session_id: p.session_id,
                roster: roster_from_proto(p.roster),
            },
            Event::PeerJoined(p) => Self::PeerJoined {
                peer_id: p.peer_id,
                display_name: p.display_name,
            },
            Event::SessionStarted(p) => Self::SessionStarted {
                roster: roster_from_proto(p.roster),
            },
            Event::PeerState(p) => Self::PeerState {
                peer_id: p.peer_id,
                state: p.state.ok_or(WireError::MissingField("state"))?.into(),
            },
            Event::PeerDisconnected(p) => Self::PeerDisconnected { peer_id: p.peer_id },
            Event::RelayError(p) => Self::RelayError { message: p.message },
        })
    }
}

impl From<LocalSnapshot> for LocalStateRecord {
    fn from(s: LocalSnapshot) -> Self {
        Self {
            x: s.x,
            y: s.y,
            speed_x: s.speed_x,
            speed_y: s.speed_y,
            direction: s.direction.sign(),
            is_grounded: s.is_grounded,
            color: s.color,
        }
    }
}

impl TryFrom<LocalStateRecord> for LocalSnapshot {
    type Error = WireError;

    fn try_from(r: LocalStateRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            x: r.x,
            y: r.y,
            speed_x: r.speed_x,
            speed_y: r.speed_y,
            direction: Direction::from_sign(r.direction)
                .ok_or(WireError::MissingField("direction"))?,
            is_grounded: r.is_grounded,
            color: r.color,
        })
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Encode an outbound event as a `ClientEnvelope` frame.
pub fn encode_outbound(event: OutboundEvent) -> Vec<u8> {
    ClientEnvelope::from(event).encode_to_vec()
}

/// Decode a `ClientEnvelope` frame (relay side, tests).
pub fn decode_outbound(bytes: &[u8]) -> Result<OutboundEvent, WireError> {
    ClientEnvelope::decode(bytes)?.try_into()
}

/// Encode an inbound event as a `RelayEnvelope` frame (relay side, tests).
pub fn encode_inbound(event: InboundEvent) -> Vec<u8> {
    RelayEnvelope::from(event).encode_to_vec()
}

/// Decode a `RelayEnvelope` frame.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundEvent, WireError> {
    RelayEnvelope::decode(bytes)?.try_into()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(x: f64, y: f64, direction: i32) -> PeerSnapshot {
        PeerSnapshot {
            x: Some(x),
            y: Some(y),
            direction: Some(direction),
            ..PeerSnapshot::default()
        }
    }

    #[test]
    fn test_publish_state_frame() {
        let event = OutboundEvent::PublishState {
            session_id: "arena".to_string(),
            local_id: "player_abc".to_string(),
            state: LocalState {
                x: 0.0,
                y: 340.0,
                direction: Direction::Left,
            },
        };

        let bytes = encode_outbound(event.clone());
        let decoded = decode_outbound(&bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_zero_coordinates_survive_as_present() {
        // proto3 `optional` keeps explicit zeroes distinguishable from absence.
        let event = InboundEvent::PeerState {
            peer_id: "player_b".to_string(),
            state: snapshot(0.0, 0.0, 1),
        };

        let decoded = decode_inbound(&encode_inbound(event)).unwrap();
        let InboundEvent::PeerState { state, .. } = decoded else {
            panic!("expected peer state, got {decoded:?}");
        };
        assert_eq!(state.x, Some(0.0));
        assert_eq!(state.y, Some(0.0));
        assert_eq!(state.color, None);
    }

    #[test]
    fn test_session_started_roster_is_ordered() {
        let mut roster = Roster::new();
        roster.insert("player_z".to_string(), snapshot(600.0, 300.0, -1));
        roster.insert("player_a".to_string(), snapshot(100.0, 300.0, 1));

        let decoded =
            decode_inbound(&encode_inbound(InboundEvent::SessionStarted { roster })).unwrap();
        let InboundEvent::SessionStarted { roster } = decoded else {
            panic!("expected session started, got {decoded:?}");
        };
        let ids: Vec<_> = roster.keys().cloned().collect();
        assert_eq!(ids, vec!["player_a".to_string(), "player_z".to_string()]);
    }

    #[test]
    fn test_empty_envelope_is_rejected() {
        let bytes = RelayEnvelope { event: None }.encode_to_vec();
        assert!(matches!(decode_inbound(&bytes), Err(WireError::MissingEvent)));
    }

    #[test]
    fn test_garbage_frame_is_decode_error() {
        let result = decode_inbound(&[0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(WireError::Decode(_))));
    }

    #[test]
    fn test_peer_state_without_state_is_rejected() {
        let envelope = RelayEnvelope {
            event: Some(relay_envelope::Event::PeerState(PeerStateProto {
                peer_id: "player_b".to_string(),
                state: None,
            })),
        };
        let result = InboundEvent::try_from(envelope);
        assert!(matches!(result, Err(WireError::MissingField("state"))));
    }

    #[test]
    fn test_publish_without_direction_is_rejected() {
        let proto = PlayerStateProto {
            x: Some(1.0),
            y: Some(2.0),
            direction: Some(0),
            color: None,
            name: None,
        };
        let result = LocalState::try_from(proto);
        assert!(matches!(result, Err(WireError::MissingField("direction"))));
    }

    #[test]
    fn test_peer_snapshot_direction_parsing() {
        assert_eq!(snapshot(1.0, 1.0, -1).direction(), Some(Direction::Left));
        assert_eq!(snapshot(1.0, 1.0, 0).direction(), None);
    }

    #[test]
    fn test_create_session_without_custom_id() {
        let event = OutboundEvent::CreateSession {
            local_id: "player_abc".to_string(),
            display_name: "Player".to_string(),
            requested_session_id: None,
        };
        assert_eq!(decode_outbound(&encode_outbound(event.clone())).unwrap(), event);
        assert_eq!(event.name(), "create_session");
    }
}
