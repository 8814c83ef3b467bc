//! Session lifecycle: Lobby -> Waiting -> Active -> Ended.
//!
//! The session owns the identities of this client and its opponent. Phase
//! changes go through a single setter that notifies observers, so the UI
//! layer sees every transition exactly once and in order.

use std::fmt;

use rand::Rng;
use skirmish_wire::{PlayerId, SessionId};
use tracing::{info, warn};

const LOCAL_ID_PREFIX: &str = "player_";
const LOCAL_ID_SUFFIX_LEN: usize = 9;
const LOCAL_ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a fresh local participant id: `player_` plus nine base-36 characters.
pub fn generate_local_id<R: Rng + ?Sized>(rng: &mut R) -> PlayerId {
    let suffix: String = (0..LOCAL_ID_SUFFIX_LEN)
        .map(|_| char::from(LOCAL_ID_ALPHABET[rng.gen_range(0..LOCAL_ID_ALPHABET.len())]))
        .collect();
    format!("{LOCAL_ID_PREFIX}{suffix}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Lobby,
    Waiting,
    Active,
    Ended,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How this client entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Joiner,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("`{event}` is not valid in the {phase} phase")]
    InvalidTransition { phase: Phase, event: &'static str },
}

/// Callback invoked with `(from, to)` on every phase change.
pub type PhaseObserver = Box<dyn FnMut(Phase, Phase)>;

pub struct Session {
    local_id: PlayerId,
    session_id: Option<SessionId>,
    remote_id: Option<PlayerId>,
    remote_name: Option<String>,
    role: Option<Role>,
    phase: Phase,
    observers: Vec<PhaseObserver>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("local_id", &self.local_id)
            .field("session_id", &self.session_id)
            .field("remote_id", &self.remote_id)
            .field("remote_name", &self.remote_name)
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Session {
    pub fn new(local_id: impl Into<PlayerId>) -> Self {
        Self {
            local_id: local_id.into(),
            session_id: None,
            remote_id: None,
            remote_name: None,
            role: None,
            phase: Phase::Lobby,
            observers: Vec::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn on_phase_change(&mut self, observer: impl FnMut(Phase, Phase) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Fail unless the session is in `expected`.
    pub fn require(&self, expected: Phase, event: &'static str) -> Result<(), SessionError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                phase: self.phase,
                event,
            })
        }
    }

    /// Lobby -> Waiting as the initiator. The id arrives with `sessionCreated`.
    pub fn begin_create(&mut self) -> Result<(), SessionError> {
        self.require(Phase::Lobby, "create_session")?;
        self.role = Some(Role::Initiator);
        self.set_phase(Phase::Waiting);
        Ok(())
    }

    /// Lobby -> Waiting as a joiner. The requested id is adopted immediately.
    pub fn begin_join(&mut self, session_id: impl Into<SessionId>) -> Result<(), SessionError> {
        self.require(Phase::Lobby, "join_session")?;
        self.role = Some(Role::Joiner);
        self.session_id = Some(session_id.into());
        self.set_phase(Phase::Waiting);
        Ok(())
    }

    /// Relay confirmed a session this client initiated.
    ///
    /// The id is set once per session; a repeated confirmation is rejected.
    pub fn confirm_created(
        &mut self,
        session_id: impl Into<SessionId>,
    ) -> Result<(), SessionError> {
        const EVENT: &str = "session_created";
        self.require(Phase::Waiting, EVENT)?;
        if self.role != Some(Role::Initiator) || self.session_id.is_some() {
            return Err(SessionError::InvalidTransition {
                phase: self.phase,
                event: EVENT,
            });
        }
        let session_id = session_id.into();
        info!(session_id = %session_id, "session created");
        self.session_id = Some(session_id);
        Ok(())
    }

    /// An opponent joined while waiting.
    pub fn record_peer(
        &mut self,
        peer_id: impl Into<PlayerId>,
        display_name: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.require(Phase::Waiting, "peer_joined")?;
        let peer_id = peer_id.into();
        if peer_id == self.local_id {
            return Ok(());
        }
        if self.resolve_remote(peer_id) {
            self.remote_name = Some(display_name.into());
        }
        Ok(())
    }

    /// Waiting -> Active with the opponent named by the roster.
    ///
    /// The roster is authoritative: an opponent learned earlier from
    /// `peer_joined` is replaced when `remote_id` differs from it.
    pub fn activate(
        &mut self,
        remote_id: impl Into<PlayerId>,
        remote_name: Option<String>,
    ) -> Result<(), SessionError> {
        const EVENT: &str = "session_started";
        self.require(Phase::Waiting, EVENT)?;
        if self.session_id.is_none() {
            return Err(SessionError::InvalidTransition {
                phase: self.phase,
                event: EVENT,
            });
        }
        let remote_id = remote_id.into();
        match self.remote_id.as_deref() {
            Some(existing) if existing == remote_id => {
                if remote_name.is_some() {
                    self.remote_name = remote_name;
                }
            }
            previous => {
                if let Some(previous) = previous {
                    warn!(
                        previous,
                        remote_id = %remote_id,
                        "roster names a different opponent, replacing"
                    );
                }
                self.remote_id = Some(remote_id);
                self.remote_name = remote_name;
            }
        }
        self.set_phase(Phase::Active);
        Ok(())
    }

    /// Active -> Ended.
    pub fn end(&mut self) -> Result<(), SessionError> {
        self.require(Phase::Active, "end_session")?;
        self.set_phase(Phase::Ended);
        Ok(())
    }

    /// Any phase -> Lobby, clearing every per-session field.
    pub fn return_to_lobby(&mut self) {
        self.session_id = None;
        self.remote_id = None;
        self.remote_name = None;
        self.role = None;
        self.set_phase(Phase::Lobby);
    }

    /// First-wins opponent resolution. Returns `true` if `peer_id` is the opponent.
    fn resolve_remote(&mut self, peer_id: PlayerId) -> bool {
        match &self.remote_id {
            None => {
                self.remote_id = Some(peer_id);
                true
            }
            Some(existing) if *existing == peer_id => true,
            Some(existing) => {
                warn!(
                    remote_id = %existing,
                    ignored = %peer_id,
                    "opponent already resolved, keeping first"
                );
                false
            }
        }
    }

    fn set_phase(&mut self, next: Phase) {
        let previous = self.phase;
        if previous == next {
            return;
        }
        self.phase = next;
        info!(from = %previous, to = %next, "session phase changed");
        for observer in &mut self.observers {
            observer(previous, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn waiting_joiner() -> Session {
        let mut session = Session::new("player_local");
        session.begin_join("ABCD").unwrap();
        session
    }

    #[test]
    fn test_generate_local_id_format() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = generate_local_id(&mut rng);

        assert!(id.starts_with("player_"));
        let suffix = &id["player_".len()..];
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(id, generate_local_id(&mut rng));
    }

    #[test]
    fn test_create_flow() {
        let mut session = Session::new("player_a");
        session.begin_create().unwrap();
        assert_eq!(session.phase(), Phase::Waiting);
        assert_eq!(session.role(), Some(Role::Initiator));
        assert_eq!(session.session_id(), None);

        session.confirm_created("XYZ").unwrap();
        assert_eq!(session.session_id(), Some("XYZ"));

        session.record_peer("player_b", "Bea").unwrap();
        session.activate("player_b", None).unwrap();
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.remote_id(), Some("player_b"));
        assert_eq!(session.remote_name(), Some("Bea"));
    }

    #[test]
    fn test_join_sets_session_id_immediately() {
        let session = waiting_joiner();
        assert_eq!(session.session_id(), Some("ABCD"));
        assert_eq!(session.role(), Some(Role::Joiner));
    }

    #[test]
    fn test_created_rejected_for_joiner() {
        let mut session = waiting_joiner();
        let err = session.confirm_created("OTHER").unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                phase: Phase::Waiting,
                event: "session_created"
            }
        );
        assert_eq!(session.session_id(), Some("ABCD"));
    }

    #[test]
    fn test_activate_requires_session_id() {
        let mut session = Session::new("player_a");
        session.begin_create().unwrap();
        assert!(session.activate("player_b", None).is_err());
        assert_eq!(session.phase(), Phase::Waiting);
    }

    #[test]
    fn test_peer_joined_is_first_wins() {
        let mut session = waiting_joiner();
        session.record_peer("player_b", "Bea").unwrap();
        session.record_peer("player_c", "Cal").unwrap();

        assert_eq!(session.remote_id(), Some("player_b"));
        assert_eq!(session.remote_name(), Some("Bea"));
    }

    #[test]
    fn test_activate_keeps_matching_peer_name() {
        let mut session = waiting_joiner();
        session.record_peer("player_b", "Bea").unwrap();
        session.activate("player_b", None).unwrap();

        assert_eq!(session.remote_id(), Some("player_b"));
        assert_eq!(session.remote_name(), Some("Bea"));
    }

    #[test]
    fn test_activate_replaces_opponent_missing_from_roster() {
        let mut session = waiting_joiner();
        session.record_peer("player_b", "Bea").unwrap();
        session.activate("player_c", Some("Cal".to_string())).unwrap();

        assert_eq!(session.remote_id(), Some("player_c"));
        assert_eq!(session.remote_name(), Some("Cal"));
    }

    #[test]
    fn test_duplicate_session_created_rejected() {
        let mut session = Session::new("player_a");
        session.begin_create().unwrap();
        session.confirm_created("FIRST").unwrap();

        let err = session.confirm_created("SECOND").unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                phase: Phase::Waiting,
                event: "session_created"
            }
        );
        assert_eq!(session.session_id(), Some("FIRST"));
    }

    #[test]
    fn test_roster_name_used_when_no_peer_joined() {
        let mut session = waiting_joiner();
        session.activate("player_b", Some("Bea".to_string())).unwrap();
        assert_eq!(session.remote_name(), Some("Bea"));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = Session::new("player_a");
        assert!(session.end().is_err());
        assert!(session.record_peer("player_b", "Bea").is_err());

        session.begin_create().unwrap();
        assert!(session.begin_join("ABCD").is_err());
        assert!(session.begin_create().is_err());
        assert_eq!(session.phase(), Phase::Waiting);
    }

    #[test]
    fn test_end_then_return_to_lobby_clears_fields() {
        let mut session = waiting_joiner();
        session.activate("player_b", None).unwrap();
        session.end().unwrap();
        assert_eq!(session.phase(), Phase::Ended);

        session.return_to_lobby();
        assert_eq!(session.phase(), Phase::Lobby);
        assert_eq!(session.session_id(), None);
        assert_eq!(session.remote_id(), None);
        assert_eq!(session.remote_name(), None);
        assert_eq!(session.role(), None);
        assert_eq!(session.local_id(), "player_local");
    }

    #[test]
    fn test_observers_see_each_transition_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut session = Session::new("player_a");
        let sink = Rc::clone(&seen);
        session.on_phase_change(move |from, to| sink.borrow_mut().push((from, to)));

        session.begin_join("ABCD").unwrap();
        session.activate("player_b", None).unwrap();
        session.return_to_lobby();
        session.return_to_lobby();

        assert_eq!(
            *seen.borrow(),
            vec![
                (Phase::Lobby, Phase::Waiting),
                (Phase::Waiting, Phase::Active),
                (Phase::Active, Phase::Lobby),
            ]
        );
    }
}
