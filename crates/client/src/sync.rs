//! Network synchronization: throttled outbound publishing and inbound merge.
//!
//! The Remote entity is only ever mutated here, from relay events. Outbound
//! publishing is gated on the session being Active and on a minimum interval
//! since the last emitted publish.

use std::collections::VecDeque;
use std::time::Duration;

use skirmish_sim::{
    Direction, ENTITY_HEIGHT, ENTITY_WIDTH, EntityView, LocalState, REMOTE_COLOR, REMOTE_SPAWN,
};
use skirmish_wire::{InboundEvent, OutboundEvent, PeerSnapshot, Roster};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, MergePolicy};
use crate::error::{ClientError, TransportError};
use crate::session::{Phase, Role, Session};

// ============================================================================
// Relay Channel
// ============================================================================

/// Outbound half of the relay connection.
pub trait RelayChannel {
    fn emit(&mut self, event: OutboundEvent) -> Result<(), TransportError>;
}

/// Bounded in-memory outbound queue.
///
/// When full, the oldest event is dropped to make room. A host pumps it
/// onto the real transport with [`QueuedRelay::drain`].
#[derive(Debug)]
pub struct QueuedRelay {
    queue: VecDeque<OutboundEvent>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl QueuedRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            dropped: 0,
            closed: false,
        }
    }

    /// Queue sized by `outbound_queue_capacity`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.outbound_queue_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundEvent> {
        self.queue.iter()
    }

    /// Take every queued event in emit order.
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        self.queue.drain(..).collect()
    }

    /// Refuse further events.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl RelayChannel for QueuedRelay {
    fn emit(&mut self, event: OutboundEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.queue.len() >= self.capacity {
            if let Some(oldest) = self.queue.pop_front() {
                self.dropped += 1;
                debug!(event = oldest.name(), "outbound queue full, dropped oldest");
            }
        }
        self.queue.push_back(event);
        Ok(())
    }
}

// ============================================================================
// Outbound Throttle
// ============================================================================

/// Enforces a minimum spacing between emitted publishes.
#[derive(Debug, Clone)]
pub struct OutboundThrottle {
    interval: Duration,
    last_publish: Option<Duration>,
}

impl OutboundThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_publish: None,
        }
    }

    /// Whether a publish at `now` would respect the interval.
    ///
    /// A timestamp earlier than the last publish never counts as elapsed.
    pub fn ready(&self, now: Duration) -> bool {
        match self.last_publish {
            None => true,
            Some(last) => now
                .checked_sub(last)
                .is_some_and(|elapsed| elapsed >= self.interval),
        }
    }

    pub fn mark(&mut self, now: Duration) {
        self.last_publish = Some(now);
    }

    pub fn last_publish(&self) -> Option<Duration> {
        self.last_publish
    }

    pub fn reset(&mut self) {
        self.last_publish = None;
    }
}

// ============================================================================
// Remote Entity
// ============================================================================

/// Mirror of the opponent's entity. Never simulated locally.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    color: String,
    direction: Direction,
    connected: bool,
}

impl Default for RemoteEntity {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteEntity {
    pub fn new() -> Self {
        Self {
            x: REMOTE_SPAWN[0],
            y: REMOTE_SPAWN[1],
            width: ENTITY_WIDTH,
            height: ENTITY_HEIGHT,
            color: REMOTE_COLOR.to_string(),
            direction: Direction::Left,
            connected: true,
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// `false` once the relay reported the opponent gone.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn view(&self) -> EntityView {
        EntityView {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            color: self.color.clone(),
            direction: self.direction,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Merge present fields of `snapshot`. Applying the same snapshot twice is a no-op.
    fn apply(&mut self, snapshot: &PeerSnapshot, policy: MergePolicy) {
        let accept = |value: f64| match policy {
            MergePolicy::Truthy => value != 0.0,
            MergePolicy::Presence => true,
        };

        let coordinates = [("x", snapshot.x, &mut self.x), ("y", snapshot.y, &mut self.y)];
        for (field, value, slot) in coordinates {
            let Some(value) = value else { continue };
            if !value.is_finite() {
                warn!(field, value, "ignoring non-finite coordinate");
            } else if accept(value) {
                *slot = value;
            }
        }

        if let Some(color) = &snapshot.color {
            if policy == MergePolicy::Presence || !color.is_empty() {
                self.color.clone_from(color);
            }
        }

        if let Some(direction) = snapshot.direction() {
            self.direction = direction;
        }
    }
}

// ============================================================================
// Synchronizer
// ============================================================================

/// Follow-up work a relay event asks of the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncEffects {
    /// Redraw now, outside the tick cadence.
    pub render: bool,
    /// The session just became Active.
    pub start_scheduler: bool,
    /// Authoritative placement for the Local entity.
    pub place_local: Option<PeerSnapshot>,
}

#[derive(Debug)]
pub struct Synchronizer {
    throttle: OutboundThrottle,
    merge_policy: MergePolicy,
    published: u64,
}

impl Synchronizer {
    pub fn new(update_interval: Duration, merge_policy: MergePolicy) -> Self {
        Self {
            throttle: OutboundThrottle::new(update_interval),
            merge_policy,
            published: 0,
        }
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Publishes successfully handed to the relay.
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn throttle(&self) -> &OutboundThrottle {
        &self.throttle
    }

    /// Publish the Local state if the session is Active and the interval elapsed.
    ///
    /// A failed emit still consumes the slot; the next attempt waits a full
    /// interval.
    pub fn maybe_publish<R: RelayChannel + ?Sized>(
        &mut self,
        session: &Session,
        state: LocalState,
        now: Duration,
        relay: &mut R,
    ) -> bool {
        if session.phase() != Phase::Active {
            return false;
        }
        let Some(session_id) = session.session_id() else {
            return false;
        };
        if !self.throttle.ready(now) {
            return false;
        }
        self.throttle.mark(now);

        let event = OutboundEvent::PublishState {
            session_id: session_id.to_string(),
            local_id: session.local_id().to_string(),
            state,
        };
        match relay.emit(event) {
            Ok(()) => {
                self.published += 1;
                true
            }
            Err(err) => {
                warn!(%err, "state publish failed");
                false
            }
        }
    }

    /// Forget publish history and return the Remote entity to its defaults.
    pub fn reset(&mut self, remote: &mut RemoteEntity) {
        self.throttle.reset();
        remote.reset();
    }

    /// Merge a snapshot if it belongs to the resolved opponent.
    pub fn apply_remote_snapshot(
        &self,
        session: &Session,
        peer_id: &str,
        snapshot: &PeerSnapshot,
        remote: &mut RemoteEntity,
    ) -> Result<(), ClientError> {
        if session.remote_id() != Some(peer_id) || peer_id == session.local_id() {
            return Err(ClientError::StaleSnapshot {
                peer_id: peer_id.to_string(),
            });
        }
        remote.apply(snapshot, self.merge_policy);
        Ok(())
    }

    /// Apply one relay event to the session and Remote entity.
    ///
    /// Errors leave both untouched.
    pub fn handle_event(
        &mut self,
        event: InboundEvent,
        session: &mut Session,
        remote: &mut RemoteEntity,
    ) -> Result<SyncEffects, ClientError> {
        match event {
            InboundEvent::SessionCreated { session_id, roster } => {
                session.confirm_created(session_id)?;
                Ok(SyncEffects {
                    place_local: roster.get(session.local_id()).cloned(),
                    ..Default::default()
                })
            }
            InboundEvent::PeerJoined {
                peer_id,
                display_name,
            } => {
                info!(peer_id = %peer_id, display_name = %display_name, "peer joined");
                session.record_peer(peer_id, display_name)?;
                Ok(SyncEffects::default())
            }
            InboundEvent::SessionStarted { roster } => self.start_session(&roster, session, remote),
            InboundEvent::PeerState { peer_id, state } => {
                match session.phase() {
                    Phase::Waiting | Phase::Active => {}
                    phase => {
                        debug!(peer_id = %peer_id, %phase, "peer state outside a session");
                        return Ok(SyncEffects::default());
                    }
                }
                self.apply_remote_snapshot(session, &peer_id, &state, remote)?;
                Ok(SyncEffects {
                    render: true,
                    ..Default::default()
                })
            }
            InboundEvent::PeerDisconnected { peer_id } => {
                if session.remote_id() != Some(peer_id.as_str()) {
                    debug!(peer_id = %peer_id, "disconnect for unknown participant");
                    return Ok(SyncEffects::default());
                }
                info!(peer_id = %peer_id, "opponent disconnected");
                remote.connected = false;
                Ok(SyncEffects {
                    render: true,
                    ..Default::default()
                })
            }
            InboundEvent::RelayError { message } => {
                warn!(%message, "relay reported an error");
                Err(ClientError::Relay { message })
            }
        }
    }

    fn start_session(
        &mut self,
        roster: &Roster,
        session: &mut Session,
        remote: &mut RemoteEntity,
    ) -> Result<SyncEffects, ClientError> {
        let local_id = session.local_id();
        let known = session
            .remote_id()
            .filter(|id| *id != local_id)
            .and_then(|id| roster.get_key_value(id));
        let Some((candidate, entry)) =
            known.or_else(|| roster.iter().find(|(id, _)| id.as_str() != local_id))
        else {
            return Err(ClientError::MalformedRoster {
                reason: format!("no participant other than `{local_id}`"),
            });
        };
        session.activate(candidate.clone(), entry.display_name.clone())?;

        remote.reset();
        if let Some(remote_entry) = session.remote_id().and_then(|id| roster.get(id)) {
            remote.apply(remote_entry, self.merge_policy);
        }
        self.throttle.reset();

        let place_local = match session.role() {
            Some(Role::Joiner) => roster.get(session.local_id()).cloned(),
            _ => None,
        };
        Ok(SyncEffects {
            render: true,
            start_scheduler: true,
            place_local,
        })
    }
}
