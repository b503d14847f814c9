//! Session state and core simulation types
//!
//! Everything that determines a session's outcome lives here. Mutation goes
//! through `pub(crate)` methods so the clock and scheduler are the only writers.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::rng::Seed;
use crate::consts::{REFERENCE_HEIGHT, REFERENCE_WIDTH};

/// Version of the spawn draw order. Bump whenever the scheduler's branching
/// or draw count changes, since that changes every replay.
pub const SPAWN_STREAM_VERSION: u32 = 1;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Seed available, waiting for the player to begin
    Pending,
    /// Spawning and physics running
    Active,
    /// Terminal; no further mutation
    Ended,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndCause {
    BombSliced,
    LivesExhausted,
    /// Explicit termination from the driver (view teardown, replay tick limit)
    Terminated,
}

/// Collectible variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FruitVariant {
    Apple,
    Banana,
    Coconut,
    Orange,
    Watermelon,
    Pineapple,
}

impl FruitVariant {
    pub const ALL: [FruitVariant; 6] = [
        FruitVariant::Apple,
        FruitVariant::Banana,
        FruitVariant::Coconut,
        FruitVariant::Orange,
        FruitVariant::Watermelon,
        FruitVariant::Pineapple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FruitVariant::Apple => "apple",
            FruitVariant::Banana => "banana",
            FruitVariant::Coconut => "coconut",
            FruitVariant::Orange => "orange",
            FruitVariant::Watermelon => "watermelon",
            FruitVariant::Pineapple => "pineapple",
        }
    }
}

/// What a spawned object is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Bomb,
    Fruit(FruitVariant),
}

impl ObjectKind {
    pub fn is_bomb(&self) -> bool {
        matches!(self, ObjectKind::Bomb)
    }
}

/// Play area in pixels. Gameplay constants are tuned for 800x600 and scaled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayArea {
    pub width: f32,
    pub height: f32,
}

impl Default for PlayArea {
    fn default() -> Self {
        Self {
            width: REFERENCE_WIDTH,
            height: REFERENCE_HEIGHT,
        }
    }
}

impl PlayArea {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Horizontal scale relative to the reference area
    #[inline]
    pub fn sx(&self) -> f32 {
        self.width / REFERENCE_WIDTH
    }

    /// Vertical scale relative to the reference area
    #[inline]
    pub fn sy(&self) -> f32 {
        self.height / REFERENCE_HEIGHT
    }

    /// Map a point in reference units into this area
    #[inline]
    pub fn scale(&self, reference: Vec2) -> Vec2 {
        Vec2::new(reference.x * self.sx(), reference.y * self.sy())
    }
}

/// A live bomb or fruit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnedObject {
    pub id: u32,
    pub kind: ObjectKind,
    pub pos: Vec2,
    pub vel: Vec2,
    /// Rotation in degrees (cosmetic, but integrated deterministically)
    pub rotation: f32,
    /// Degrees per second
    pub angular_vel: f32,
    /// Interactive bounds radius
    pub radius: f32,
    /// Tick on which the object entered play
    pub spawned_at: u64,
}

impl SpawnedObject {
    /// Semi-implicit Euler step under downward gravity
    pub fn integrate(&mut self, gravity: f32, dt: f32) {
        self.vel.y += gravity * dt;
        self.pos += self.vel * dt;
        self.rotation += self.angular_vel * dt;
    }
}

/// Half of a sliced fruit. Visual only: never sliceable, never scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remnant {
    pub id: u32,
    pub variant: FruitVariant,
    /// 1 = left half, 2 = right half
    pub half: u8,
    pub pos: Vec2,
    pub vel: Vec2,
}

/// Terminal result handed to the UI layer exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub score: u64,
    pub seed: Seed,
    pub multiplier: f64,
    pub difficulty: u8,
    pub cause: EndCause,
    pub stream_version: u32,
}

impl SessionResult {
    /// `floor(score * multiplier)`, computed exactly on tenths
    pub fn final_score(&self) -> u64 {
        final_score(self.score, multiplier_tenths(self.multiplier))
    }
}

/// Exact `floor(score * tenths / 10)`
#[inline]
pub fn final_score(score: u64, multiplier_tenths: u32) -> u64 {
    let product = u128::from(score) * u128::from(multiplier_tenths) / 10;
    u64::try_from(product).unwrap_or(u64::MAX)
}

/// Recover tenths from a reported multiplier (always a whole number of tenths)
#[inline]
pub fn multiplier_tenths(multiplier: f64) -> u32 {
    (multiplier * 10.0).round() as u32
}

/// Things that happened during one tick, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    Spawned { id: u32, kind: ObjectKind },
    Sliced { id: u32, variant: FruitVariant, points: u64 },
    /// Particle burst at a slice point (visual side effect)
    Burst { pos: Vec2 },
    BombHit { id: u32 },
    Missed { id: u32, lives: u8 },
    Ramp { difficulty: u8, multiplier: f64, difficulty_raised: bool },
    Ended(SessionResult),
}

/// Aggregate mutable state for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    seed: Seed,
    score: u64,
    /// Multiplier in tenths (10 = 1.0x) so scoring is exact
    multiplier_tenths: u32,
    difficulty: u8,
    lives: u8,
    initial_lives: u8,
    /// Live objects (sorted by id for determinism)
    objects: Vec<SpawnedObject>,
    /// Slice remnants (sorted by id)
    remnants: Vec<Remnant>,
    phase: SessionPhase,
    end_cause: Option<EndCause>,
    /// Simulation tick counter (only advances while active)
    time_ticks: u64,
    /// Time scale reached by the difficulty ramp (1.0 = normal, lower = faster)
    ramp_time_scale: f32,
    /// Recent pointer positions while dragging (oldest first)
    trail: Vec<Vec2>,
    next_id: u32,
}

impl SessionState {
    pub fn new(seed: Seed, initial_lives: u8) -> Self {
        Self {
            seed,
            score: 0,
            multiplier_tenths: 10,
            difficulty: 0,
            lives: initial_lives,
            initial_lives,
            objects: Vec::new(),
            remnants: Vec::new(),
            phase: SessionPhase::Pending,
            end_cause: None,
            time_ticks: 0,
            ramp_time_scale: 1.0,
            trail: Vec::new(),
            next_id: 1,
        }
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn multiplier(&self) -> f64 {
        f64::from(self.multiplier_tenths) / 10.0
    }

    pub fn multiplier_tenths(&self) -> u32 {
        self.multiplier_tenths
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn lives(&self) -> u8 {
        self.lives
    }

    pub fn initial_lives(&self) -> u8 {
        self.initial_lives
    }

    pub fn objects(&self) -> &[SpawnedObject] {
        &self.objects
    }

    pub fn remnants(&self) -> &[Remnant] {
        &self.remnants
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn end_cause(&self) -> Option<EndCause> {
        self.end_cause
    }

    pub fn time_ticks(&self) -> u64 {
        self.time_ticks
    }

    pub fn ramp_time_scale(&self) -> f32 {
        self.ramp_time_scale
    }

    pub fn trail(&self) -> &[Vec2] {
        &self.trail
    }

    /// Final score if the session ended right now
    pub fn final_score(&self) -> u64 {
        final_score(self.score, self.multiplier_tenths)
    }

    /// Snapshot the terminal result
    pub fn result(&self) -> SessionResult {
        SessionResult {
            score: self.score,
            seed: self.seed.clone(),
            multiplier: self.multiplier(),
            difficulty: self.difficulty,
            cause: self.end_cause.unwrap_or(EndCause::Terminated),
            stream_version: SPAWN_STREAM_VERSION,
        }
    }

    /// Allocate a new entity ID
    pub(crate) fn next_entity_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn activate(&mut self) -> bool {
        if self.phase != SessionPhase::Pending {
            return false;
        }
        self.phase = SessionPhase::Active;
        true
    }

    pub(crate) fn advance_tick(&mut self) -> u64 {
        self.time_ticks += 1;
        self.time_ticks
    }

    pub(crate) fn push_object(&mut self, object: SpawnedObject) {
        self.objects.push(object);
    }

    pub(crate) fn objects_mut(&mut self) -> &mut Vec<SpawnedObject> {
        &mut self.objects
    }

    pub(crate) fn remnants_mut(&mut self) -> &mut Vec<Remnant> {
        &mut self.remnants
    }

    pub(crate) fn trail_mut(&mut self) -> &mut Vec<Vec2> {
        &mut self.trail
    }

    pub(crate) fn add_points(&mut self, points: u64) {
        self.score = self.score.saturating_add(points);
    }

    pub(crate) fn lose_life(&mut self) -> u8 {
        self.lives = self.lives.saturating_sub(1);
        self.lives
    }

    /// Apply one difficulty-ramp step. Returns true if difficulty moved.
    pub(crate) fn ramp(
        &mut self,
        difficulty_step: u8,
        difficulty_cap: u8,
        multiplier_step_tenths: u32,
        time_scale_step: f32,
        time_scale_floor: f32,
    ) -> bool {
        self.multiplier_tenths = self.multiplier_tenths.saturating_add(multiplier_step_tenths);
        if self.difficulty >= difficulty_cap {
            return false;
        }
        self.difficulty = self.difficulty.saturating_add(difficulty_step).min(difficulty_cap);
        self.ramp_time_scale = (self.ramp_time_scale - time_scale_step).max(time_scale_floor);
        true
    }

    /// Transition to `Ended` (once). Clears every live entity.
    pub(crate) fn end(&mut self, cause: EndCause) -> Option<SessionResult> {
        if self.phase == SessionPhase::Ended {
            return None;
        }
        self.phase = SessionPhase::Ended;
        self.end_cause = Some(cause);
        self.objects.clear();
        self.remnants.clear();
        self.trail.clear();
        Some(self.result())
    }

    /// Ensure entities are sorted by ID for deterministic iteration
    pub(crate) fn normalize_order(&mut self) {
        self.objects.sort_by_key(|o| o.id);
        self.remnants.sort_by_key(|r| r.id);
    }
}
