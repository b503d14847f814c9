//! Fixed timestep simulation clock
//!
//! `Session` is the explicit handle for one play-through. Each call to
//! [`Session::tick`] advances exactly one fixed step: ramp, spawn, physics,
//! slicing, bounds. Nothing here reads wall-clock time, so a seed plus an input
//! tape always replays to the same result.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::collision::slice_circle;
use super::rng::{PseudoRandomStream, Seed};
use super::spawn::{BOTTOM_BOUND_Y, SpawnScheduler};
use super::state::{
    EndCause, ObjectKind, Remnant, SessionPhase, SessionResult, SessionState, SimEvent,
};
use crate::config::SimConfig;
use crate::consts::SIM_DT;
use crate::ms_to_ticks;

/// Remnant launch velocity in reference units (mirrored for the left half)
const REMNANT_VELOCITY: Vec2 = Vec2::new(200.0, -200.0);
/// Remnant offset from the slice point in reference units
const REMNANT_OFFSET: f32 = 10.0;

/// One-slot channel carrying the terminal result
pub type ResultReceiver = oneshot::Receiver<SessionResult>;

/// Input for a single tick (deterministic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TickInput {
    /// Pointer position in play-area pixels
    pub pointer: Vec2,
    /// Pointer held (dragging)
    pub pointer_down: bool,
    /// Let the built-in player steer the pointer
    #[serde(default)]
    pub autopilot: bool,
}

impl TickInput {
    pub fn drag(pointer: Vec2) -> Self {
        Self {
            pointer,
            pointer_down: true,
            autopilot: false,
        }
    }

    pub fn autopilot() -> Self {
        Self {
            autopilot: true,
            ..Default::default()
        }
    }
}

/// Explicit handle for one session
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    stream: PseudoRandomStream,
    scheduler: SpawnScheduler,
    config: SimConfig,
    ramp_ticks: u64,
    intro_ticks: u64,
    result_tx: Option<oneshot::Sender<SessionResult>>,
}

impl Session {
    /// Create a pending session. A seed is required, so a session without one
    /// cannot exist.
    pub fn new(seed: Seed, config: SimConfig) -> (Self, ResultReceiver) {
        let (result_tx, result_rx) = oneshot::channel();
        let session = Self {
            stream: PseudoRandomStream::new(&seed),
            scheduler: SpawnScheduler::new(&config),
            state: SessionState::new(seed, config.initial_lives),
            ramp_ticks: ms_to_ticks(config.ramp_interval_ms),
            intro_ticks: if config.intro_duration_ms == 0 {
                0
            } else {
                ms_to_ticks(config.intro_duration_ms)
            },
            config,
            result_tx: Some(result_tx),
        };
        (session, result_rx)
    }

    /// `Pending -> Active`. Returns false if the session already started.
    pub fn start(&mut self) -> bool {
        let started = self.state.activate();
        if started {
            log::info!("Session started (seed {})", self.state.seed());
        }
        started
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Stream draws consumed so far (auditing aid)
    pub fn stream_draws(&self) -> u64 {
        self.stream.draws()
    }

    /// Physics time scale in effect at the current tick (lower = faster)
    pub fn time_scale(&self) -> f32 {
        self.scale_at(self.state.time_ticks())
    }

    fn scale_at(&self, tick: u64) -> f32 {
        if tick <= self.intro_ticks && self.intro_ticks > 0 {
            self.config.intro_time_scale
        } else {
            self.state.ramp_time_scale()
        }
    }

    /// Explicit termination. Returns the result if this call ended the session.
    pub fn terminate(&mut self) -> Option<SessionResult> {
        self.finish(EndCause::Terminated)
    }

    fn finish(&mut self, cause: EndCause) -> Option<SessionResult> {
        let result = self.state.end(cause)?;
        if let Some(tx) = self.result_tx.take() {
            // Receiver may be gone (view torn down); the result is still in state
            let _ = tx.send(result.clone());
        }
        log::info!(
            "Session ended ({:?}): score={} multiplier={:.1} difficulty={}",
            cause,
            result.score,
            result.multiplier,
            result.difficulty
        );
        Some(result)
    }

    /// Advance the session by one fixed timestep
    pub fn tick(&mut self, input: &TickInput) -> Vec<SimEvent> {
        let mut events = Vec::new();

        // Spawning and physics are bound to the active phase
        if self.state.phase() != SessionPhase::Active {
            return events;
        }

        let input = if input.autopilot {
            autopilot(&self.state, &self.config)
        } else {
            *input
        };

        let now = self.state.advance_tick();

        // Difficulty ramp
        if now % self.ramp_ticks == 0 {
            let raised = self.state.ramp(
                self.config.difficulty_step,
                self.config.difficulty_cap,
                self.config.multiplier_step_tenths,
                self.config.time_scale_step,
                self.config.time_scale_floor,
            );
            if raised {
                log::info!("Difficulty increased to {}%", self.state.difficulty());
            }
            events.push(SimEvent::Ramp {
                difficulty: self.state.difficulty(),
                multiplier: self.state.multiplier(),
                difficulty_raised: raised,
            });
        }

        // Spawning
        if let Some(plan) = self.scheduler.on_tick(&mut self.stream) {
            let id = self.state.next_entity_id();
            let object = plan.materialize(id, now, &self.config.area, self.config.object_radius);
            events.push(SimEvent::Spawned { id, kind: object.kind });
            self.state.push_object(object);
        }

        // Kinematics
        let dt = SIM_DT / self.scale_at(now);
        let gravity = self.config.gravity * self.config.area.sy();
        for object in self.state.objects_mut() {
            object.integrate(gravity, dt);
        }
        for remnant in self.state.remnants_mut() {
            remnant.vel.y += gravity * dt;
            remnant.pos += remnant.vel * dt;
        }

        // Slicing
        self.slice(&input, &mut events);
        if self.state.phase() != SessionPhase::Active {
            return events;
        }

        // Bottom bound
        self.cull(&mut events);

        // Ensure deterministic ordering
        self.state.normalize_order();
        events
    }

    fn slice(&mut self, input: &TickInput, events: &mut Vec<SimEvent>) {
        if !input.pointer_down {
            self.state.trail_mut().clear();
            return;
        }

        let previous = self.state.trail().last().copied();
        let trail_length = self.config.trail_length.max(1);
        let trail = self.state.trail_mut();
        trail.push(input.pointer);
        if trail.len() > trail_length {
            trail.remove(0);
        }

        // A bomb anywhere on the path ends the session before any fruit counts
        if let Some(&(id, _, _)) = touched(&self.state, previous, input.pointer, true).first() {
            let lives = self.state.lose_life();
            log::debug!("Bomb {} sliced, lives={}", id, lives);
            events.push(SimEvent::BombHit { id });
            if let Some(result) = self.finish(EndCause::BombSliced) {
                events.push(SimEvent::Ended(result));
            }
            return;
        }

        let area = self.config.area;
        for (id, kind, pos) in touched(&self.state, previous, input.pointer, false) {
            let ObjectKind::Fruit(variant) = kind else {
                continue;
            };
            // floor(10 * multiplier) with the multiplier held in tenths
            let points = u64::from(self.state.multiplier_tenths());
            self.state.add_points(points);
            self.state.objects_mut().retain(|o| o.id != id);

            let offset = Vec2::new(REMNANT_OFFSET * area.sx(), 0.0);
            let left = self.state.next_entity_id();
            let right = self.state.next_entity_id();
            let remnants = self.state.remnants_mut();
            remnants.push(Remnant {
                id: left,
                variant,
                half: 1,
                pos: pos - offset,
                vel: area.scale(Vec2::new(-REMNANT_VELOCITY.x, REMNANT_VELOCITY.y)),
            });
            remnants.push(Remnant {
                id: right,
                variant,
                half: 2,
                pos: pos + offset,
                vel: area.scale(REMNANT_VELOCITY),
            });

            events.push(SimEvent::Sliced { id, variant, points });
            events.push(SimEvent::Burst { pos });
        }
    }

    fn cull(&mut self, events: &mut Vec<SimEvent>) {
        let bottom = BOTTOM_BOUND_Y * self.config.area.sy();

        let mut missed = Vec::new();
        self.state.objects_mut().retain(|o| {
            if o.pos.y <= bottom {
                return true;
            }
            if !o.kind.is_bomb() {
                missed.push(o.id);
            }
            false
        });
        self.state.remnants_mut().retain(|r| r.pos.y <= bottom);

        for id in missed {
            let lives = self.state.lose_life();
            log::debug!("Fruit {} missed, lives={}", id, lives);
            events.push(SimEvent::Missed { id, lives });
            if lives == 0 {
                if let Some(result) = self.finish(EndCause::LivesExhausted) {
                    events.push(SimEvent::Ended(result));
                }
                break;
            }
        }
    }
}

/// Objects of one class cut by the path `previous -> pointer`, in id order
fn touched(
    state: &SessionState,
    previous: Option<Vec2>,
    pointer: Vec2,
    bombs: bool,
) -> Vec<(u32, ObjectKind, Vec2)> {
    state
        .objects()
        .iter()
        .filter(|o| o.kind.is_bomb() == bombs)
        .filter(|o| slice_circle(previous, pointer, o.pos, o.radius).is_some())
        .map(|o| (o.id, o.kind, o.pos))
        .collect()
}

/// Built-in player: drags through the lowest visible falling fruit, lifting
/// the blade whenever the stroke would cross a bomb. Pure function of state.
pub fn autopilot(state: &SessionState, config: &SimConfig) -> TickInput {
    let visible_floor = config.area.height;
    let bombs: Vec<_> = state.objects().iter().filter(|o| o.kind.is_bomb()).collect();

    let mut candidates: Vec<_> = state
        .objects()
        .iter()
        .filter(|o| !o.kind.is_bomb() && o.vel.y > 0.0 && o.pos.y < visible_floor)
        .collect();
    candidates.sort_by(|a, b| b.pos.y.total_cmp(&a.pos.y).then(a.id.cmp(&b.id)));

    // Skip fruit sitting on top of a bomb
    let target = candidates.into_iter().find(|fruit| {
        !bombs
            .iter()
            .any(|bomb| slice_circle(None, fruit.pos, bomb.pos, bomb.radius).is_some())
    });
    let Some(target) = target else {
        return TickInput::default();
    };

    let from = state.trail().last().copied();
    let stroke_hits_bomb = bombs
        .iter()
        .any(|bomb| slice_circle(from, target.pos, bomb.pos, bomb.radius).is_some());

    TickInput {
        pointer: target.pos,
        pointer_down: !stroke_hits_bomb,
        autopilot: false,
    }
}

/// Replay a seed against an input tape. After the tape runs out `fallback` is
/// used; the session is terminated if it is still running after `max_ticks`.
pub fn replay(
    seed: Seed,
    config: SimConfig,
    tape: &[TickInput],
    fallback: TickInput,
    max_ticks: u64,
) -> SessionResult {
    let (mut session, _result_rx) = Session::new(seed, config);
    session.start();
    let mut inputs = tape.iter().copied().chain(std::iter::repeat(fallback));
    for _ in 0..max_ticks {
        if session.state().phase() == SessionPhase::Ended {
            break;
        }
        let input = inputs.next().unwrap_or(fallback);
        session.tick(&input);
    }
    session.terminate();
    session.state().result()
}
