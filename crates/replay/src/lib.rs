//! Skirmish Replay System
//!
//! Records the intent stream fed to the Local Simulator during a session and
//! verifies that re-simulating it reproduces the recorded outcome.
//!
//! # Architecture
//!
//! - `ReplayRecorder`: anchors the initial Local state and collects one intent per tick
//! - `verify_replay`: rebuilds the entity and re-simulates every recorded intent
//! - `write_replay` / `read_replay`: artifact persistence

#![deny(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use prost::Message;
use sha2::{Digest, Sha256};
use skirmish_sim::{
    Bounds, GRAVITY, Intent, JUMP_IMPULSE, LocalEntity, LocalSnapshot, MOVE_SPEED,
    STATE_DIGEST_ALGO_ID,
};
use skirmish_wire::{ReplayArtifact, TuningParameter, WireError};
use tracing::debug;

/// Current artifact schema version.
pub const REPLAY_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Replay Recorder
// ============================================================================

/// Collects a session's local intent stream.
pub struct ReplayRecorder {
    session_id: String,
    bounds: Bounds,
    initial_state: LocalSnapshot,
    initial_digest: u64,
    intents: Vec<u8>,
}

impl ReplayRecorder {
    /// Start recording from the entity's current state.
    pub fn new(session_id: impl Into<String>, entity: &LocalEntity, bounds: Bounds) -> Self {
        Self {
            session_id: session_id.into(),
            bounds,
            initial_state: entity.snapshot(),
            initial_digest: entity.state_digest(),
            intents: Vec::new(),
        }
    }

    /// Record the intent applied on one tick.
    pub fn record_intent(&mut self, intent: Intent) {
        self.intents.push(intent.to_bits());
    }

    /// Number of ticks recorded so far.
    pub fn tick_count(&self) -> u64 {
        self.intents.len() as u64
    }

    /// Finalize the replay artifact.
    pub fn finalize(self, final_digest: u64, end_reason: &str) -> ReplayArtifact {
        let intent_stream_sha256 = intent_stream_sha256(&self.intents);
        let checkpoint_tick = self.tick_count();

        debug!(
            session_id = %self.session_id,
            ticks = checkpoint_tick,
            end_reason,
            "replay finalized"
        );

        ReplayArtifact {
            replay_format_version: REPLAY_FORMAT_VERSION,
            initial_state: Some(self.initial_state.into()),
            initial_digest: self.initial_digest,
            surface_width: self.bounds.surface_width,
            floor_y: self.bounds.floor_y,
            state_digest_algo_id: STATE_DIGEST_ALGO_ID.to_string(),
            tuning_parameters: tuning_parameters(),
            intents: self.intents.into_iter().map(u32::from).collect(),
            intent_stream_sha256,
            final_digest,
            checkpoint_tick,
            end_reason: end_reason.to_string(),
            session_id: self.session_id,
        }
    }
}

/// Tuning parameters, sorted by key.
fn tuning_parameters() -> Vec<TuningParameter> {
    [
        ("gravity", GRAVITY),
        ("jump_impulse", JUMP_IMPULSE),
        ("move_speed", MOVE_SPEED),
    ]
    .into_iter()
    .map(|(key, value)| TuningParameter {
        key: key.to_string(),
        value,
    })
    .collect()
}

fn intent_stream_sha256(intents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(intents);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Replay Verification
// ============================================================================

/// Replay verification error.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("unsupported replay format version {0}")]
    UnsupportedVersion(u32),

    #[error("missing initial state in replay artifact")]
    MissingInitialState,

    #[error("state digest algorithm mismatch: expected {expected}, got {actual}")]
    DigestAlgorithmMismatch { expected: String, actual: String },

    #[error("tuning parameter `{key}` mismatch: recorded {recorded}, current {current}")]
    TuningMismatch {
        key: String,
        recorded: f64,
        current: f64,
    },

    #[error("intent stream hash mismatch: expected {expected}, got {actual}")]
    IntentStreamMismatch { expected: String, actual: String },

    #[error("initialization anchor mismatch: expected {expected:#x}, got {actual:#x}")]
    InitializationAnchorMismatch { expected: u64, actual: u64 },

    #[error("checkpoint tick mismatch: expected {expected}, got {actual}")]
    CheckpointTickMismatch { expected: u64, actual: u64 },

    #[error("final digest mismatch: expected {expected:#x}, got {actual:#x}")]
    FinalDigestMismatch { expected: u64, actual: u64 },

    #[error("invalid replay format: {0}")]
    InvalidFormat(#[from] WireError),
}

/// Verify a replay artifact reproduces the recorded outcome.
///
/// # Verification Steps
/// 1. Check format version, digest algorithm and tuning parameters
/// 2. Decode intents and check the stream hash
/// 3. Rebuild the Local entity and check the initial digest anchor
/// 4. Re-simulate every intent
/// 5. Compare tick count and final digest
pub fn verify_replay(artifact: &ReplayArtifact) -> Result<(), VerifyError> {
    // Step 1: compatibility
    if artifact.replay_format_version != REPLAY_FORMAT_VERSION {
        return Err(VerifyError::UnsupportedVersion(
            artifact.replay_format_version,
        ));
    }
    if artifact.state_digest_algo_id != STATE_DIGEST_ALGO_ID {
        return Err(VerifyError::DigestAlgorithmMismatch {
            expected: STATE_DIGEST_ALGO_ID.to_string(),
            actual: artifact.state_digest_algo_id.clone(),
        });
    }
    for current in tuning_parameters() {
        if let Some(recorded) = artifact
            .tuning_parameters
            .iter()
            .find(|p| p.key == current.key)
        {
            if recorded.value != current.value {
                return Err(VerifyError::TuningMismatch {
                    key: current.key,
                    recorded: recorded.value,
                    current: current.value,
                });
            }
        }
    }

    // Step 2: intent stream integrity
    let intents = artifact
        .intents
        .iter()
        .map(|&bits| {
            u8::try_from(bits)
                .ok()
                .and_then(Intent::from_bits)
                .ok_or(WireError::InvalidIntentBits(bits))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let raw: Vec<u8> = intents.iter().map(|i| i.to_bits()).collect();
    let actual_hash = intent_stream_sha256(&raw);
    if actual_hash != artifact.intent_stream_sha256 {
        return Err(VerifyError::IntentStreamMismatch {
            expected: artifact.intent_stream_sha256.clone(),
            actual: actual_hash,
        });
    }

    // Step 3: initialization anchor
    let initial = artifact
        .initial_state
        .clone()
        .ok_or(VerifyError::MissingInitialState)?;
    let mut entity = LocalEntity::restore(initial.try_into()?);
    let anchor = entity.state_digest();
    if anchor != artifact.initial_digest {
        return Err(VerifyError::InitializationAnchorMismatch {
            expected: artifact.initial_digest,
            actual: anchor,
        });
    }

    // Step 4: re-simulate
    let bounds = Bounds {
        surface_width: artifact.surface_width,
        floor_y: artifact.floor_y,
    };
    for intent in &intents {
        entity.step(*intent, &bounds);
    }

    // Step 5: outcome
    let ticks = intents.len() as u64;
    if ticks != artifact.checkpoint_tick {
        return Err(VerifyError::CheckpointTickMismatch {
            expected: artifact.checkpoint_tick,
            actual: ticks,
        });
    }

    let actual_digest = entity.state_digest();
    if actual_digest != artifact.final_digest {
        return Err(VerifyError::FinalDigestMismatch {
            expected: artifact.final_digest,
            actual: actual_digest,
        });
    }

    Ok(())
}

// ============================================================================
// Replay I/O
// ============================================================================

/// Write a replay artifact to a file. Refuses to overwrite.
pub fn write_replay(artifact: &ReplayArtifact, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("Replay artifact already exists at {}", path.display()),
        ));
    }

    let encoded = artifact.encode_to_vec();
    let mut file = fs::File::create(path)?;
    file.write_all(&encoded)?;

    Ok(())
}

/// Read a replay artifact from a file.
pub fn read_replay(path: &Path) -> io::Result<ReplayArtifact> {
    let data = fs::read(path)?;
    ReplayArtifact::decode(data.as_slice()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to decode replay: {e}"),
        )
    })
}

// ============================================================================
// Tests
// ============================================================================
