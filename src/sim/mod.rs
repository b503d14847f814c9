//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Fixed timestep only
//! - Seeded stream only (one draw order per stream version)
//! - Stable iteration order (by entity ID)
//! - No rendering, wall-clock or network dependencies

pub mod collision;
pub mod rng;
pub mod spawn;
pub mod state;
pub mod tick;

pub use collision::{SliceHit, closest_point_on_segment, slice_circle};
pub use rng::{PseudoRandomStream, Seed};
pub use spawn::{DRAWS_PER_SPAWN, SpawnPlan, SpawnScheduler};
pub use state::{
    EndCause, FruitVariant, ObjectKind, PlayArea, Remnant, SPAWN_STREAM_VERSION, SessionPhase,
    SessionResult, SessionState, SimEvent, SpawnedObject, final_score,
};
pub use tick::{ResultReceiver, Session, TickInput, autopilot, replay};
