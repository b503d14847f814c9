//! Seed Slicer - an oracle-seeded fruit slicing arcade game
//!
//! Core modules:
//! - `sim`: Deterministic simulation (stream, spawning, physics, scoring)
//! - `protocol`: Seed acquisition from an external randomness oracle
//! - `telemetry`: Ordered session/protocol event log for observers
//! - `scene`: Instructions/play scenes and the game view that drives them
//! - `config`: Data-driven game balance and protocol tuning
//! - `leaderboard`: Final score boundary and local ranking

pub mod config;
pub mod leaderboard;
pub mod protocol;
pub mod scene;
pub mod sim;
pub mod telemetry;

pub use config::{Config, ProtocolConfig, SimConfig};
pub use leaderboard::{Leaderboard, LeaderboardEntry};
pub use sim::{Seed, Session, SessionResult};
pub use telemetry::TelemetryBus;

/// Game configuration constants
pub mod consts {
    /// Simulation rate (ticks per second)
    pub const SIM_HZ: u32 = 60;
    /// Fixed simulation timestep
    pub const SIM_DT: f32 = 1.0 / 60.0;
    /// Maximum substeps per frame to prevent spiral of death
    pub const MAX_SUBSTEPS: u32 = 8;
    /// Longest frame delta the view will accept (seconds)
    pub const MAX_FRAME_DT: f32 = 0.1;

    /// Reference play area. Spawn ranges and physics constants are tuned
    /// for this size and scaled to the actual area.
    pub const REFERENCE_WIDTH: f32 = 800.0;
    pub const REFERENCE_HEIGHT: f32 = 600.0;

    /// Display window for telemetry observers
    pub const TELEMETRY_WINDOW: usize = 10;
}

/// Convert a millisecond cadence into whole simulation ticks (at least 1)
#[inline]
pub fn ms_to_ticks(ms: u64) -> u64 {
    (ms.saturating_mul(u64::from(consts::SIM_HZ)) / 1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_to_ticks() {
        assert_eq!(ms_to_ticks(1000), 60);
        assert_eq!(ms_to_ticks(15_000), 900);
        assert_eq!(ms_to_ticks(0), 1);
        assert_eq!(ms_to_ticks(5), 1);
        // Huge cadences from a config file saturate instead of overflowing
        assert_eq!(ms_to_ticks(u64::MAX), u64::MAX / 1000);
    }
}
