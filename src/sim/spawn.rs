//! Spawn scheduler
//!
//! Decides, on a fixed cadence, what enters play next and how it moves. Every
//! decision takes exactly [`DRAWS_PER_SPAWN`] draws from the stream in the
//! order kind, variant, x, vx, vy, spin. The variant is drawn even for bombs
//! so both branches consume the same amount of the stream.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::rng::PseudoRandomStream;
use super::state::{FruitVariant, ObjectKind, PlayArea, SpawnedObject};
use crate::config::SimConfig;
use crate::ms_to_ticks;

/// Stream draws consumed by one spawn decision
pub const DRAWS_PER_SPAWN: u64 = 6;

/// Horizontal spawn band, inset from both edges (reference units)
pub const SPAWN_MIN_X: i32 = 100;
pub const SPAWN_MAX_X: i32 = 700;
/// Objects enter just below the visible bottom edge
pub const SPAWN_Y: f32 = 650.0;
/// Objects below this line leave play
pub const BOTTOM_BOUND_Y: f32 = 700.0;

/// Horizontal drift ranges
pub const FRUIT_DRIFT: i32 = 100;
pub const BOMB_DRIFT: i32 = 50;
/// Upward launch speed range
pub const LAUNCH_MIN: i32 = 600;
pub const LAUNCH_MAX: i32 = 800;
/// Spin range in degrees per second
pub const SPIN: i32 = 200;

/// One spawn decision in reference units (800x600 play area)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnPlan {
    pub kind: ObjectKind,
    pub x: i32,
    pub vx: i32,
    /// Negative is upward
    pub vy: i32,
    pub spin: i32,
}

impl SpawnPlan {
    /// Place the plan into a concrete play area
    pub fn materialize(&self, id: u32, tick: u64, area: &PlayArea, radius: f32) -> SpawnedObject {
        SpawnedObject {
            id,
            kind: self.kind,
            pos: area.scale(Vec2::new(self.x as f32, SPAWN_Y)),
            vel: area.scale(Vec2::new(self.vx as f32, self.vy as f32)),
            rotation: 0.0,
            angular_vel: self.spin as f32,
            radius: radius * area.sx().min(area.sy()),
            spawned_at: tick,
        }
    }
}

/// Fixed-cadence spawn decision process
#[derive(Debug, Clone)]
pub struct SpawnScheduler {
    bomb_probability: f64,
    variants: Vec<FruitVariant>,
    interval_ticks: u64,
    elapsed_ticks: u64,
    spawned: u64,
}

impl SpawnScheduler {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            bomb_probability: config.bomb_probability,
            variants: config.fruit_variants.clone(),
            interval_ticks: ms_to_ticks(config.spawn_interval_ms),
            elapsed_ticks: 0,
            spawned: 0,
        }
    }

    /// Advance the cadence by one active tick. Returns a plan when a spawn is due.
    pub fn on_tick(&mut self, stream: &mut PseudoRandomStream) -> Option<SpawnPlan> {
        self.elapsed_ticks += 1;
        if self.elapsed_ticks < self.interval_ticks {
            return None;
        }
        self.elapsed_ticks = 0;
        Some(self.plan(stream))
    }

    /// Make one spawn decision
    pub fn plan(&mut self, stream: &mut PseudoRandomStream) -> SpawnPlan {
        let is_bomb = stream.next_float() < self.bomb_probability;
        let variant = stream.pick(&self.variants).copied();
        let x = stream.next_int(SPAWN_MIN_X, SPAWN_MAX_X);
        let drift = if is_bomb { BOMB_DRIFT } else { FRUIT_DRIFT };
        let vx = stream.next_int(-drift, drift);
        let vy = -stream.next_int(LAUNCH_MIN, LAUNCH_MAX);
        let spin = stream.next_int(-SPIN, SPIN);

        let kind = match (is_bomb, variant) {
            (false, Some(variant)) => ObjectKind::Fruit(variant),
            _ => ObjectKind::Bomb,
        };
        self.spawned += 1;
        log::trace!("spawn #{} {:?} x={} v=({}, {})", self.spawned, kind, x, vx, vy);

        SpawnPlan { kind, x, vx, vy, spin }
    }

    /// Decisions made so far
    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn interval_ticks(&self) -> u64 {
        self.interval_ticks
    }
}
