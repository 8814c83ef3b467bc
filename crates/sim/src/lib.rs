//! Skirmish Simulation Core
//!
//! This crate advances the single locally-controlled entity from a boolean
//! intent vector. It is the only code allowed to mutate the Local entity's
//! position.
//!
//! # Constraints
//!
//! The simulator MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Scale physics by elapsed time
//!
//! Physics is *triggered* by the scheduler's ticks but never *scaled* by them:
//! every step applies the same fixed per-tick constants, so identical intent
//! sequences reproduce identical states bit-for-bit regardless of frame rate.

#![deny(unsafe_code)]

// ============================================================================
// Movement Model Constants (per tick)
// ============================================================================

/// Downward acceleration added to `speed_y` every tick.
pub const GRAVITY: f64 = 0.5;

/// Default floor line; an entity rests with `y + height == FLOOR_Y`.
pub const FLOOR_Y: f64 = 400.0;

/// Vertical speed applied when a grounded entity jumps.
pub const JUMP_IMPULSE: f64 = -12.0;

/// Horizontal speed while left or right is held.
pub const MOVE_SPEED: f64 = 5.0;

/// Fixed entity width.
pub const ENTITY_WIDTH: f64 = 40.0;

/// Fixed entity height.
pub const ENTITY_HEIGHT: f64 = 60.0;

/// Default drawing surface width (right clamp bound).
pub const SURFACE_WIDTH: f64 = 800.0;

/// Default drawing surface height.
pub const SURFACE_HEIGHT: f64 = 600.0;

/// Local entity spawn defaults.
pub const LOCAL_SPAWN: [f64; 2] = [100.0, 300.0];
pub const LOCAL_COLOR: &str = "#FF5733";

/// Remote entity spawn defaults.
pub const REMOTE_SPAWN: [f64; 2] = [600.0, 300.0];
pub const REMOTE_COLOR: &str = "#33A1FF";

// ============================================================================
// Intent
// ============================================================================

/// Live boolean intent vector produced by the input source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Intent {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl Intent {
    const LEFT: u8 = 0b0001;
    const RIGHT: u8 = 0b0010;
    const UP: u8 = 0b0100;
    const DOWN: u8 = 0b1000;

    /// Intent holding only right.
    pub const fn right() -> Self {
        Self {
            left: false,
            right: true,
            up: false,
            down: false,
        }
    }

    /// Intent holding only left.
    pub const fn left() -> Self {
        Self {
            left: true,
            right: false,
            up: false,
            down: false,
        }
    }

    /// Intent holding only up (jump).
    pub const fn up() -> Self {
        Self {
            left: false,
            right: false,
            up: true,
            down: false,
        }
    }

    /// Pack into a 4-bit mask (left, right, up, down from the low bit).
    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.left {
            bits |= Self::LEFT;
        }
        if self.right {
            bits |= Self::RIGHT;
        }
        if self.up {
            bits |= Self::UP;
        }
        if self.down {
            bits |= Self::DOWN;
        }
        bits
    }

    /// Unpack a mask produced by [`Intent::to_bits`].
    ///
    /// Returns `None` if any bit above the low four is set.
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !0b1111 != 0 {
            return None;
        }
        Some(Self {
            left: bits & Self::LEFT != 0,
            right: bits & Self::RIGHT != 0,
            up: bits & Self::UP != 0,
            down: bits & Self::DOWN != 0,
        })
    }
}

// ============================================================================
// Direction
// ============================================================================

/// Facing direction. The only two legal values are -1 and +1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// Signed unit value (-1 or +1).
    pub fn sign(self) -> i32 {
        match self {
            Self::Left => -1,
            Self::Right => 1,
        }
    }

    /// Interpret a wire value. Zero carries no direction and yields `None`.
    pub fn from_sign(value: i32) -> Option<Self> {
        match value.signum() {
            -1 => Some(Self::Left),
            1 => Some(Self::Right),
            _ => None,
        }
    }
}

// ============================================================================
// Bounds
// ============================================================================

/// Playfield bounds the simulator clamps against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub surface_width: f64,
    pub floor_y: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            surface_width: SURFACE_WIDTH,
            floor_y: FLOOR_Y,
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// The part of the Local entity that is published to the relay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalState {
    pub x: f64,
    pub y: f64,
    pub direction: Direction,
}

/// Full physical state of the Local entity, used to anchor replays.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSnapshot {
    pub x: f64,
    pub y: f64,
    pub speed_x: f64,
    pub speed_y: f64,
    pub direction: Direction,
    pub is_grounded: bool,
    pub color: String,
}

/// Read-only drawing record for either entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub color: String,
    pub direction: Direction,
}

// ============================================================================
// StateDigest
// ============================================================================

/// StateDigest algorithm identifier.
pub const STATE_DIGEST_ALGO_ID: &str = "statedigest-v0-fnv1a64-le-f64canon-xy-speed-dir-grounded";

/// FNV-1a 64-bit offset basis.
const FNV1A_OFFSET_BASIS: u64 = 0xcbf29ce484222325;

/// FNV-1a 64-bit prime.
const FNV1A_PRIME: u64 = 0x100000001b3;

#[derive(Debug, Clone)]
struct Fnv1a64 {
    state: u64,
}

impl Fnv1a64 {
    fn new() -> Self {
        Self {
            state: FNV1A_OFFSET_BASIS,
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV1A_PRIME);
        }
    }

    fn update_f64(&mut self, value: f64) {
        self.update(&canonicalize_f64(value).to_le_bytes());
    }

    fn finish(self) -> u64 {
        self.state
    }
}

/// Canonicalize an f64 for hashing: `-0.0` → `+0.0`, any NaN → quiet NaN.
fn canonicalize_f64(value: f64) -> u64 {
    const QUIET_NAN_BITS: u64 = 0x7ff8000000000000;

    if value.is_nan() {
        QUIET_NAN_BITS
    } else if value == 0.0 {
        0u64
    } else {
        value.to_bits()
    }
}

// ============================================================================
// Local Entity
// ============================================================================

/// The locally-controlled entity.
///
/// Width and height are fixed at construction. Position is only changed by
/// [`LocalEntity::step`], [`LocalEntity::place`] and [`LocalEntity::reset`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntity {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    color: String,
    speed_x: f64,
    speed_y: f64,
    direction: Direction,
    is_grounded: bool,
}

impl Default for LocalEntity {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEntity {
    /// Create the Local entity at its spawn defaults.
    pub fn new() -> Self {
        Self {
            x: LOCAL_SPAWN[0],
            y: LOCAL_SPAWN[1],
            width: ENTITY_WIDTH,
            height: ENTITY_HEIGHT,
            color: LOCAL_COLOR.to_string(),
            speed_x: 0.0,
            speed_y: 0.0,
            direction: Direction::Right,
            is_grounded: true,
        }
    }

    /// Rebuild an entity from a recorded snapshot.
    pub fn restore(snapshot: LocalSnapshot) -> Self {
        Self {
            x: snapshot.x,
            y: snapshot.y,
            width: ENTITY_WIDTH,
            height: ENTITY_HEIGHT,
            color: snapshot.color,
            speed_x: snapshot.speed_x,
            speed_y: snapshot.speed_y,
            direction: snapshot.direction,
            is_grounded: snapshot.is_grounded,
        }
    }

    /// Return to spawn defaults.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn speed_x(&self) -> f64 {
        self.speed_x
    }

    pub fn speed_y(&self) -> f64 {
        self.speed_y
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_grounded(&self) -> bool {
        self.is_grounded
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    /// Advance the entity by exactly one tick.
    ///
    /// Order matters and is fixed:
    /// 1. horizontal speed from intent (right evaluated last, so it wins)
    /// 2. jump impulse, only when grounded
    /// 3. gravity, unconditionally
    /// 4. integrate position
    /// 5. clamp x into `[0, surface_width - width]`
    /// 6. floor collision
    pub fn step(&mut self, intent: Intent, bounds: &Bounds) {
        self.speed_x = 0.0;
        if intent.left {
            self.speed_x = -MOVE_SPEED;
            self.direction = Direction::Left;
        }
        if intent.right {
            self.speed_x = MOVE_SPEED;
            self.direction = Direction::Right;
        }

        if intent.up && self.is_grounded {
            self.speed_y = JUMP_IMPULSE;
            self.is_grounded = false;
        }

        // Accumulates while grounded too; the floor clamp zeroes it again.
        self.speed_y += GRAVITY;

        self.x += self.speed_x;
        self.y += self.speed_y;

        let max_x = bounds.surface_width - self.width;
        if self.x < 0.0 {
            self.x = 0.0;
        }
        if self.x > max_x {
            self.x = max_x;
        }

        if self.y + self.height > bounds.floor_y {
            self.y = bounds.floor_y - self.height;
            self.speed_y = 0.0;
            self.is_grounded = true;
        }
    }

    /// Place the entity from an authoritative roster entry.
    ///
    /// Only present fields are applied; speeds and grounded state are kept.
    pub fn place(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        color: Option<&str>,
        direction: Option<Direction>,
    ) {
        if let Some(x) = x.filter(|v| v.is_finite()) {
            self.x = x;
        }
        if let Some(y) = y.filter(|v| v.is_finite()) {
            self.y = y;
        }
        if let Some(color) = color {
            self.color = color.to_string();
        }
        if let Some(direction) = direction {
            self.direction = direction;
        }
    }

    /// Published subset of the state.
    pub fn state(&self) -> LocalState {
        LocalState {
            x: self.x,
            y: self.y,
            direction: self.direction,
        }
    }

    /// Full physical state.
    pub fn snapshot(&self) -> LocalSnapshot {
        LocalSnapshot {
            x: self.x,
            y: self.y,
            speed_x: self.speed_x,
            speed_y: self.speed_y,
            direction: self.direction,
            is_grounded: self.is_grounded,
            color: self.color.clone(),
        }
    }

    /// Drawing record.
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

    /// Compute the StateDigest of the physical state.
    ///
    /// Hash order: x, y, speed_x, speed_y (canonicalized f64, little-endian),
    /// direction sign (i32, little-endian), grounded (one byte).
    pub fn state_digest(&self) -> u64 {
        let mut hasher = Fnv1a64::new();
        hasher.update_f64(self.x);
        hasher.update_f64(self.y);
        hasher.update_f64(self.speed_x);
        hasher.update_f64(self.speed_y);
        hasher.update(&self.direction.sign().to_le_bytes());
        hasher.update(&[u8::from(self.is_grounded)]);
        hasher.finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
