//! Skirmish Client Core
//!
//! Client-side synchronization core of a two-player session. It owns:
//! - The dual-mode tick scheduler (frame-driven / timer-driven)
//! - The Local entity and its per-tick simulation
//! - The Remote entity and inbound snapshot merge
//! - Throttled outbound state publishing
//! - The session lifecycle (Lobby -> Waiting -> Active -> Ended)
//! - Optional replay recording of the local intent stream
//!
//! # Architecture
//!
//! The host platform delivers callbacks (frames, intervals, visibility and
//! focus changes, relay events) into [`GameClient`]. Everything runs on that
//! single logical thread; no locking is involved. The platform, relay,
//! renderer and input are injected through the [`Platform`],
//! [`RelayChannel`], [`Renderer`] and [`InputSource`] seams.
//!
//! Per-tick failures are logged and never stop the scheduler.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod input;
pub mod platform;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod sync;

use std::time::Duration;

use skirmish_replay::ReplayRecorder;
use skirmish_sim::{Bounds, LocalEntity};
use skirmish_wire::{InboundEvent, OutboundEvent, PlayerId, ReplayArtifact, SessionId};
use tracing::{debug, info, trace, warn};

pub use config::{ClientConfig, ConfigError, MergePolicy};
pub use error::{ClientError, RenderError, TransportError};
pub use input::{InputSource, KeyboardIntent};
pub use platform::{CallbackHandle, HeadlessPlatform, Platform, Visibility};
pub use render::{FrameView, NullRenderer, Renderer};
pub use scheduler::{Scheduler, SchedulerMode, TickHandler};
pub use session::{Phase, Role, Session, SessionError, generate_local_id};
pub use sync::{QueuedRelay, RelayChannel, RemoteEntity, SyncEffects, Synchronizer};

// ============================================================================
// Session Parameters
// ============================================================================

/// How to enter a session from the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionParams {
    Create {
        display_name: String,
        requested_session_id: Option<SessionId>,
    },
    Join {
        display_name: String,
        session_id: SessionId,
    },
}

/// Why a recorded replay was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Complete,
    ReturnedToLobby,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::ReturnedToLobby => "returned_to_lobby",
        }
    }
}

fn normalize_display_name(display_name: &str) -> String {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        config::DEFAULT_DISPLAY_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

// ============================================================================
// Client Core
// ============================================================================

/// Per-tick state, split from the scheduler so the scheduler can drive it.
struct ClientCore<R, D, I> {
    config: ClientConfig,
    bounds: Bounds,
    local: LocalEntity,
    remote: RemoteEntity,
    session: Session,
    sync: Synchronizer,
    relay: R,
    renderer: D,
    input: I,
    headless: bool,
    recorder: Option<ReplayRecorder>,
    last_replay: Option<ReplayArtifact>,
}

impl<R: RelayChannel, D: Renderer, I: InputSource> ClientCore<R, D, I> {
    fn view(&self) -> FrameView {
        FrameView {
            local: self.local.view(),
            remote: self.remote.view(),
            remote_connected: self.remote.is_connected(),
            phase: self.session.phase(),
            surface_width: self.config.surface_width,
            surface_height: self.config.surface_height,
            floor_y: self.config.floor_y,
        }
    }

    fn render_now(&mut self) {
        if self.headless {
            return;
        }
        let frame = self.view();
        match self.renderer.draw(&frame) {
            Ok(()) => {}
            Err(RenderError::MissingSurface) => {
                warn!("drawing surface unavailable, continuing headless");
                self.headless = true;
            }
            Err(err) => warn!(%err, "render failed"),
        }
    }

    fn begin_recording(&mut self) {
        if !self.config.record_replay {
            return;
        }
        let Some(session_id) = self.session.session_id() else {
            return;
        };
        debug!(session_id, "replay recording started");
        self.recorder = Some(ReplayRecorder::new(session_id, &self.local, self.bounds));
    }

    fn finish_recording(&mut self, reason: EndReason) {
        if let Some(recorder) = self.recorder.take() {
            let artifact = recorder.finalize(self.local.state_digest(), reason.as_str());
            info!(
                ticks = artifact.checkpoint_tick,
                end_reason = reason.as_str(),
                "session replay closed"
            );
            self.last_replay = Some(artifact);
        }
    }
}

impl<R: RelayChannel, D: Renderer, I: InputSource> TickHandler for ClientCore<R, D, I> {
    fn simulate(&mut self, dt: Duration) {
        let intent = self.input.intent();
        self.local.step(intent, &self.bounds);
        if let Some(recorder) = &mut self.recorder {
            recorder.record_intent(intent);
        }
        trace!(?dt, ?intent, x = self.local.x(), y = self.local.y(), "simulated");
    }

    fn maybe_publish(&mut self, now: Duration) {
        self.sync
            .maybe_publish(&self.session, self.local.state(), now, &mut self.relay);
    }

    fn render(&mut self) {
        self.render_now();
    }
}

// ============================================================================
// Game Client
// ============================================================================

/// The client-side context: one per running client.
pub struct GameClient<P, R, D, I> {
    platform: P,
    scheduler: Scheduler,
    visibility: Visibility,
    core: ClientCore<R, D, I>,
}

impl<P, R, D, I> GameClient<P, R, D, I>
where
    P: Platform,
    R: RelayChannel,
    D: Renderer,
    I: InputSource,
{
    /// Create a client with a freshly generated local id.
    pub fn new(
        config: ClientConfig,
        platform: P,
        relay: R,
        renderer: D,
        input: I,
    ) -> Result<Self, ClientError> {
        let local_id = generate_local_id(&mut rand::thread_rng());
        Self::with_local_id(config, local_id, platform, relay, renderer, input)
    }

    pub fn with_local_id(
        config: ClientConfig,
        local_id: impl Into<PlayerId>,
        platform: P,
        relay: R,
        renderer: D,
        input: I,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let session = Session::new(local_id);
        info!(local_id = session.local_id(), "client created");

        Ok(Self {
            platform,
            scheduler: Scheduler::new(config.timer_period, config.nominal_dt),
            visibility: Visibility::foreground(),
            core: ClientCore {
                bounds: config.bounds(),
                local: LocalEntity::new(),
                remote: RemoteEntity::new(),
                session,
                sync: Synchronizer::new(config.update_interval, config.merge_policy),
                relay,
                renderer,
                input,
                headless: false,
                recorder: None,
                last_replay: None,
                config,
            },
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    pub fn session(&self) -> &Session {
        &self.core.session
    }

    pub fn phase(&self) -> Phase {
        self.core.session.phase()
    }

    pub fn local(&self) -> &LocalEntity {
        &self.core.local
    }

    pub fn remote(&self) -> &RemoteEntity {
        &self.core.remote
    }

    pub fn scheduler_mode(&self) -> SchedulerMode {
        self.scheduler.mode()
    }

    /// Ticks executed since construction.
    pub fn ticks(&self) -> u64 {
        self.scheduler.ticks()
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// `true` once the renderer reported a missing surface.
    pub fn is_headless(&self) -> bool {
        self.core.headless
    }

    pub fn published_count(&self) -> u64 {
        self.core.sync.published()
    }

    /// Snapshot of everything needed to draw the current frame.
    pub fn view(&self) -> FrameView {
        self.core.view()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn relay(&self) -> &R {
        &self.core.relay
    }

    pub fn relay_mut(&mut self) -> &mut R {
        &mut self.core.relay
    }

    pub fn renderer(&self) -> &D {
        &self.core.renderer
    }

    pub fn input_mut(&mut self) -> &mut I {
        &mut self.core.input
    }

    /// Take the most recently finalized replay, if any.
    pub fn take_replay(&mut self) -> Option<ReplayArtifact> {
        self.core.last_replay.take()
    }

    pub fn on_phase_change(&mut self, observer: impl FnMut(Phase, Phase) + 'static) {
        self.core.session.on_phase_change(observer);
    }

    // ------------------------------------------------------------------------
    // Session control
    // ------------------------------------------------------------------------

    pub fn start(&mut self, params: SessionParams) -> Result<(), ClientError> {
        match params {
            SessionParams::Create {
                display_name,
                requested_session_id,
            } => self.create_session(&display_name, requested_session_id.as_deref()),
            SessionParams::Join {
                display_name,
                session_id,
            } => self.join_session(&display_name, &session_id),
        }
    }

    /// Ask the relay for a new session. A blank requested id lets the relay pick.
    pub fn create_session(
        &mut self,
        display_name: &str,
        requested_session_id: Option<&str>,
    ) -> Result<(), ClientError> {
        self.core.session.require(Phase::Lobby, "create_session")?;
        let requested_session_id = requested_session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        self.core.relay.emit(OutboundEvent::CreateSession {
            local_id: self.core.session.local_id().to_string(),
            display_name: normalize_display_name(display_name),
            requested_session_id,
        })?;
        self.core.session.begin_create()?;
        Ok(())
    }

    /// Ask the relay to join an existing session.
    pub fn join_session(
        &mut self,
        display_name: &str,
        session_id: &str,
    ) -> Result<(), ClientError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ClientError::InvalidSessionId);
        }
        self.core.session.require(Phase::Lobby, "join_session")?;

        self.core.relay.emit(OutboundEvent::JoinSession {
            local_id: self.core.session.local_id().to_string(),
            display_name: normalize_display_name(display_name),
            session_id: session_id.to_string(),
        })?;
        self.core.session.begin_join(session_id)?;
        Ok(())
    }

    /// Stop ticking. Session state is left as is.
    pub fn stop(&mut self) {
        self.scheduler.stop(&mut self.platform);
    }

    /// Active -> Ended: stop ticking and draw the final frame.
    pub fn end_session(&mut self) -> Result<(), ClientError> {
        self.core.session.end()?;
        self.scheduler.stop(&mut self.platform);
        self.core.finish_recording(EndReason::Complete);
        self.core.render_now();
        Ok(())
    }

    /// Back to the lobby from any phase, resetting both entities.
    pub fn return_to_lobby(&mut self) {
        self.scheduler.stop(&mut self.platform);
        self.core.finish_recording(EndReason::ReturnedToLobby);
        self.core.session.return_to_lobby();
        self.core.local.reset();
        self.core.sync.reset(&mut self.core.remote);
    }

    // ------------------------------------------------------------------------
    // Host callbacks
    // ------------------------------------------------------------------------

    pub fn on_animation_frame(&mut self, handle: CallbackHandle, timestamp: Duration) -> bool {
        self.scheduler
            .on_frame(&mut self.platform, handle, timestamp, &mut self.core)
    }

    pub fn on_interval(&mut self, handle: CallbackHandle, now: Duration) -> bool {
        self.scheduler
            .on_interval(&mut self.platform, handle, now, &mut self.core)
    }

    pub fn on_visibility_changed(&mut self, visible: bool) {
        self.visibility.visible = visible;
        self.apply_visibility();
    }

    pub fn on_focus_changed(&mut self, focused: bool) {
        self.visibility.focused = focused;
        self.apply_visibility();
    }

    fn apply_visibility(&mut self) {
        let active = self.core.session.phase() == Phase::Active;
        self.scheduler
            .on_visibility(&mut self.platform, self.visibility, active);
    }

    /// Apply one relay event.
    ///
    /// Snapshots for anyone but the resolved opponent are dropped silently.
    pub fn handle_relay_event(&mut self, event: InboundEvent) -> Result<(), ClientError> {
        let name = event.name();
        let core = &mut self.core;
        let effects = match core.sync.handle_event(event, &mut core.session, &mut core.remote) {
            Ok(effects) => effects,
            Err(ClientError::StaleSnapshot { peer_id }) => {
                debug!(event = name, peer_id = %peer_id, "dropping stale snapshot");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if let Some(entry) = &effects.place_local {
            core.local
                .place(entry.x, entry.y, entry.color.as_deref(), entry.direction());
        }
        if effects.start_scheduler {
            core.begin_recording();
            self.scheduler.start(&mut self.platform, self.visibility);
        }
        if effects.render {
            self.core.render_now();
        }
        Ok(())
    }

    /// Decode a relay frame and apply it.
    pub fn handle_relay_bytes(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let event = skirmish_wire::decode_inbound(bytes)?;
        self.handle_relay_event(event)
    }
}

impl<R, D, I> GameClient<HeadlessPlatform, R, D, I>
where
    R: RelayChannel,
    D: Renderer,
    I: InputSource,
{
    /// Fire the pending frame callback, if any.
    pub fn fire_frame(&mut self, timestamp: Duration) -> bool {
        match self.platform.fire_frame() {
            Some(handle) => self.on_animation_frame(handle, timestamp),
            None => false,
        }
    }

    /// Fire the armed interval callback, if any.
    pub fn fire_interval(&mut self, now: Duration) -> bool {
        match self.platform.interval() {
            Some((handle, _)) => self.on_interval(handle, now),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish_sim::Intent;
    use skirmish_wire::{PeerSnapshot, Roster};

    type TestClient<D = NullRenderer> = GameClient<HeadlessPlatform, QueuedRelay, D, Intent>;

    struct SurfacelessRenderer {
        attempts: u32,
    }

    impl Renderer for SurfacelessRenderer {
        fn draw(&mut self, _frame: &FrameView) -> Result<(), RenderError> {
            self.attempts += 1;
            Err(RenderError::MissingSurface)
        }
    }

    fn client_with<D: Renderer>(config: ClientConfig, renderer: D) -> TestClient<D> {
        GameClient::with_local_id(
            config,
            "player_a",
            HeadlessPlatform::new(),
            QueuedRelay::new(64),
            renderer,
            Intent::default(),
        )
        .unwrap()
    }

    fn client() -> TestClient {
        client_with(ClientConfig::default(), NullRenderer)
    }

    fn roster(ids: &[&str]) -> Roster {
        ids.iter()
            .map(|id| (id.to_string(), PeerSnapshot::default()))
            .collect()
    }

    fn activate<D: Renderer>(client: &mut TestClient<D>) {
        client.join_session("Ann", "ROOM").unwrap();
        client
            .handle_relay_event(InboundEvent::SessionStarted {
                roster: roster(&["player_a", "player_b"]),
            })
            .unwrap();
    }

    #[test]
    fn test_new_generates_local_id() {
        let client = GameClient::new(
            ClientConfig::default(),
            HeadlessPlatform::new(),
            QueuedRelay::new(8),
            NullRenderer,
            Intent::default(),
        )
        .unwrap();
        assert!(client.session().local_id().starts_with("player_"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig {
            nominal_dt: Duration::ZERO,
            ..Default::default()
        };
        let result = GameClient::with_local_id(
            config,
            "player_a",
            HeadlessPlatform::new(),
            QueuedRelay::new(8),
            NullRenderer,
            Intent::default(),
        );
        assert!(matches!(result, Err(ClientError::Config(ConfigError::ZeroNominalDt))));
    }

    #[test]
    fn test_create_emits_and_waits() {
        let mut client = client();
        client
            .start(SessionParams::Create {
                display_name: "  ".to_string(),
                requested_session_id: Some(" ".to_string()),
            })
            .unwrap();

        assert_eq!(client.phase(), Phase::Waiting);
        assert_eq!(
            client.relay_mut().drain(),
            vec![OutboundEvent::CreateSession {
                local_id: "player_a".to_string(),
                display_name: "Player".to_string(),
                requested_session_id: None,
            }]
        );
        assert_eq!(client.scheduler_mode(), SchedulerMode::Stopped);
    }

    #[test]
    fn test_create_twice_rejected() {
        let mut client = client();
        client.create_session("Ann", None).unwrap();
        let err = client.create_session("Ann", None).unwrap_err();
        assert!(matches!(err, ClientError::Session(_)));
        assert_eq!(client.relay().len(), 1);
    }

    #[test]
    fn test_join_trims_session_id() {
        let mut client = client();
        client.join_session("Ann", "  ROOM ").unwrap();
        assert_eq!(client.session().session_id(), Some("ROOM"));
    }

    #[test]
    fn test_emit_failure_leaves_lobby() {
        let mut client = client();
        client.relay_mut().close();
        let err = client.join_session("Ann", "ROOM").unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::Closed)));
        assert_eq!(client.phase(), Phase::Lobby);
    }

    #[test]
    fn test_session_started_starts_scheduler() {
        let mut client = client();
        activate(&mut client);

        assert_eq!(client.phase(), Phase::Active);
        assert!(matches!(client.scheduler_mode(), SchedulerMode::FrameDriven(_)));
        assert_eq!(client.platform().armed_chains(), 1);
    }

    #[test]
    fn test_hidden_at_start_runs_timer() {
        let mut client = client();
        client.on_visibility_changed(false);
        activate(&mut client);

        assert!(matches!(client.scheduler_mode(), SchedulerMode::TimerDriven(_)));
        assert!(client.fire_interval(Duration::from_millis(16)));
        assert_eq!(client.ticks(), 1);
    }

    #[test]
    fn test_missing_surface_goes_headless() {
        let mut client = client_with(ClientConfig::default(), SurfacelessRenderer { attempts: 0 });
        activate(&mut client);
        *client.input_mut() = Intent::right();

        for i in 1..=5 {
            client.fire_frame(Duration::from_millis(16 * i));
        }

        assert!(client.is_headless());
        assert_eq!(client.renderer().attempts, 1);
        assert_eq!(client.local().x(), 125.0);
        assert!(client.published_count() >= 1);
    }

    #[test]
    fn test_malformed_bytes_change_nothing() {
        let mut client = client();
        client.join_session("Ann", "ROOM").unwrap();

        let err = client.handle_relay_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ClientError::Wire(_)));
        assert_eq!(client.phase(), Phase::Waiting);
    }

    #[test]
    fn test_relay_bytes_are_decoded() {
        let mut client = client();
        client.join_session("Ann", "ROOM").unwrap();
        let bytes = skirmish_wire::encode_inbound(InboundEvent::SessionStarted {
            roster: roster(&["player_a", "player_b"]),
        });

        client.handle_relay_bytes(&bytes).unwrap();
        assert_eq!(client.phase(), Phase::Active);
    }

    #[test]
    fn test_end_session_stops_scheduler() {
        let mut client = client();
        activate(&mut client);

        client.end_session().unwrap();
        assert_eq!(client.phase(), Phase::Ended);
        assert_eq!(client.scheduler_mode(), SchedulerMode::Stopped);
        assert_eq!(client.platform().armed_chains(), 0);
        assert!(client.end_session().is_err());
    }

    #[test]
    fn test_return_to_lobby_resets_everything() {
        let mut client = client();
        activate(&mut client);
        *client.input_mut() = Intent::right();
        client.fire_frame(Duration::from_millis(16));
        client
            .handle_relay_event(InboundEvent::PeerState {
                peer_id: "player_b".to_string(),
                state: PeerSnapshot {
                    x: Some(300.0),
                    ..Default::default()
                },
            })
            .unwrap();

        client.return_to_lobby();

        assert_eq!(client.phase(), Phase::Lobby);
        assert_eq!(client.scheduler_mode(), SchedulerMode::Stopped);
        assert_eq!(client.platform().armed_chains(), 0);
        assert_eq!(client.local(), &LocalEntity::new());
        assert_eq!(client.remote(), &RemoteEntity::new());
        assert_eq!(client.session().session_id(), None);
    }

    #[test]
    fn test_replay_recorded_and_verifies() {
        let config = ClientConfig {
            record_replay: true,
            ..Default::default()
        };
        let mut client = client_with(config, NullRenderer);
        activate(&mut client);

        *client.input_mut() = Intent::right();
        for i in 1..=10 {
            client.fire_frame(Duration::from_millis(16 * i));
        }
        *client.input_mut() = Intent::up();
        for i in 11..=20 {
            client.fire_frame(Duration::from_millis(16 * i));
        }
        client.end_session().unwrap();

        let artifact = client.take_replay().unwrap();
        assert_eq!(artifact.checkpoint_tick, 20);
        assert_eq!(artifact.session_id, "ROOM");
        assert_eq!(artifact.end_reason, "complete");
        assert_eq!(artifact.final_digest, client.local().state_digest());
        skirmish_replay::verify_replay(&artifact).unwrap();
    }
}
