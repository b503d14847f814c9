//! Scenes and the game view
//!
//! Each scene implements the same small capability set (`init`, `tick`,
//! `teardown`). The [`GameView`] owns the active scene, selected by an
//! explicit [`SceneMode`], and is the only owner of the session handle while
//! a session is playing. A bound seed acquisition is cancelled whenever play
//! starts or the view goes away.

use thiserror::Error;

use crate::config::SimConfig;
use crate::consts::{MAX_FRAME_DT, MAX_SUBSTEPS, SIM_DT, TELEMETRY_WINDOW};
use crate::protocol::{CancelHandle, LedgerClient, SeedAcquisition};
use crate::sim::{
    ResultReceiver, Seed, Session, SessionPhase, SessionResult, SimEvent, TickInput,
};
use crate::telemetry::{EventKind, EventSource, TelemetryBus, TelemetryEvent, TelemetryView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneMode {
    Instructions,
    Play,
}

/// Shared resources handed to a scene on init
#[derive(Debug, Clone)]
pub struct SceneContext {
    pub config: SimConfig,
    pub telemetry: TelemetryBus,
}

/// What the active scene asks the view to do next
#[derive(Debug, Clone, PartialEq)]
pub enum SceneTransition {
    /// Player asked to play
    Play,
    /// Session finished; show results
    Finished(SessionResult),
}

pub trait Scene {
    fn mode(&self) -> SceneMode;
    fn init(&mut self, ctx: &SceneContext);
    /// Advance by `dt` seconds of frame time
    fn tick(&mut self, dt: f32, input: &TickInput) -> Option<SceneTransition>;
    fn teardown(&mut self);
}

/// How-to-play screen. Starts play on a press once a seed is available.
#[derive(Debug, Default)]
pub struct InstructionsScene {
    seed_ready: bool,
    was_down: bool,
}

impl InstructionsScene {
    pub fn new(seed_ready: bool) -> Self {
        Self {
            seed_ready,
            was_down: false,
        }
    }
}

impl Scene for InstructionsScene {
    fn mode(&self) -> SceneMode {
        SceneMode::Instructions
    }

    fn init(&mut self, _ctx: &SceneContext) {
        log::debug!("Instructions (seed ready: {})", self.seed_ready);
    }

    fn tick(&mut self, _dt: f32, input: &TickInput) -> Option<SceneTransition> {
        // Start on press, not on a drag carried over from the last session
        let pressed = input.pointer_down && !self.was_down;
        self.was_down = input.pointer_down;
        (pressed && self.seed_ready).then_some(SceneTransition::Play)
    }

    fn teardown(&mut self) {}
}

struct PlayRun {
    session: Session,
    result_rx: ResultReceiver,
    telemetry: TelemetryBus,
    accumulator: f32,
}

/// Live session scene; converts frame time into fixed simulation steps
pub struct PlayScene {
    seed: Seed,
    run: Option<PlayRun>,
}

impl std::fmt::Debug for PlayScene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayScene")
            .field("seed", &self.seed)
            .field("session", &self.run.as_ref().map(|run| &run.session))
            .finish()
    }
}

impl PlayScene {
    pub fn new(seed: Seed) -> Self {
        Self { seed, run: None }
    }

    pub fn session(&self) -> Option<&Session> {
        self.run.as_ref().map(|run| &run.session)
    }
}

impl Scene for PlayScene {
    fn mode(&self) -> SceneMode {
        SceneMode::Play
    }

    fn init(&mut self, ctx: &SceneContext) {
        let (mut session, result_rx) = Session::new(self.seed.clone(), ctx.config.clone());
        session.start();
        ctx.telemetry.publish(
            EventSource::Simulation,
            EventKind::Event,
            format!("Game started (seed {})", self.seed),
        );
        self.run = Some(PlayRun {
            session,
            result_rx,
            telemetry: ctx.telemetry.clone(),
            accumulator: 0.0,
        });
    }

    fn tick(&mut self, dt: f32, input: &TickInput) -> Option<SceneTransition> {
        let run = self.run.as_mut()?;

        let dt = dt.clamp(0.0, MAX_FRAME_DT);
        run.accumulator += dt;

        let mut substeps = 0;
        while run.accumulator >= SIM_DT && substeps < MAX_SUBSTEPS {
            let events = run.session.tick(input);
            publish_events(&run.telemetry, &events);
            run.accumulator -= SIM_DT;
            substeps += 1;
            if run.session.state().phase() == SessionPhase::Ended {
                break;
            }
        }

        // Terminal result arrives through the one-slot channel, exactly once
        run.result_rx.try_recv().ok().map(SceneTransition::Finished)
    }

    fn teardown(&mut self) {
        if let Some(mut run) = self.run.take() {
            if let Some(result) = run.session.terminate() {
                run.telemetry.publish(
                    EventSource::Simulation,
                    EventKind::Warn,
                    format!("Game terminated: score {}", result.score),
                );
            }
        }
    }
}

fn publish_events(telemetry: &TelemetryBus, events: &[SimEvent]) {
    for event in events {
        let (kind, message) = match event {
            SimEvent::Ramp {
                difficulty,
                multiplier,
                difficulty_raised: true,
            } => (
                EventKind::Event,
                format!("Difficulty {}%, multiplier {:.1}x", difficulty, multiplier),
            ),
            SimEvent::Ramp { multiplier, .. } => {
                (EventKind::Event, format!("Multiplier {:.1}x", multiplier))
            }
            SimEvent::BombHit { .. } => (EventKind::Warn, "Bomb sliced".to_string()),
            SimEvent::Missed { lives, .. } => {
                (EventKind::Warn, format!("Fruit missed, {} lives left", lives))
            }
            SimEvent::Ended(result) => (
                EventKind::Event,
                format!(
                    "Game ended: score {}, final score {}",
                    result.score,
                    result.final_score()
                ),
            ),
            SimEvent::Spawned { .. } | SimEvent::Sliced { .. } | SimEvent::Burst { .. } => continue,
        };
        telemetry.publish(EventSource::Simulation, kind, message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("a session is already active")]
    SessionActive,
    #[error("no seed available")]
    NoSeed,
}

/// Drives the active scene and owns the session for its duration
pub struct GameView {
    ctx: SceneContext,
    scene: Box<dyn Scene>,
    seed: Option<Seed>,
    last_result: Option<SessionResult>,
    panel: Option<TelemetryView>,
    acquisition: Option<CancelHandle>,
}

impl std::fmt::Debug for GameView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameView")
            .field("mode", &self.scene.mode())
            .field("seed", &self.seed)
            .field("last_result", &self.last_result)
            .finish()
    }
}

impl GameView {
    pub fn new(config: SimConfig, telemetry: TelemetryBus) -> Self {
        let panel = TelemetryView::mount(&telemetry, "fairness-panel", TELEMETRY_WINDOW);
        let ctx = SceneContext { config, telemetry };
        let mut scene: Box<dyn Scene> = Box::new(InstructionsScene::new(false));
        scene.init(&ctx);
        Self {
            ctx,
            scene,
            seed: None,
            last_result: None,
            panel: Some(panel),
            acquisition: None,
        }
    }

    pub fn mode(&self) -> SceneMode {
        self.scene.mode()
    }

    /// Tie a seed acquisition to this view. Its poll loop stops when play
    /// starts or the view is torn down.
    pub fn bind_acquisition(&mut self, handle: CancelHandle) {
        self.acquisition = Some(handle);
    }

    /// Provide the seed for the next session
    pub fn offer_seed(&mut self, seed: Seed) -> Result<(), ViewError> {
        if self.mode() == SceneMode::Play {
            return Err(ViewError::SessionActive);
        }
        log::info!("Seed ready: {}", seed);
        self.seed = Some(seed);
        self.switch(Box::new(InstructionsScene::new(true)));
        Ok(())
    }

    /// Take the fulfilled seed from an acquisition (cancelling its poll loop)
    /// and start playing
    pub fn start_from<L: LedgerClient + 'static>(
        &mut self,
        acquisition: &mut SeedAcquisition<L>,
    ) -> Result<(), ViewError> {
        if self.mode() == SceneMode::Play {
            return Err(ViewError::SessionActive);
        }
        self.bind_acquisition(acquisition.cancel_handle());
        let seed = acquisition.take_seed().ok_or(ViewError::NoSeed)?;
        self.seed = Some(seed);
        self.start()
    }

    /// Start a session with the offered seed. The seed is consumed.
    pub fn start(&mut self) -> Result<(), ViewError> {
        if self.mode() == SceneMode::Play {
            return Err(ViewError::SessionActive);
        }
        let seed = self.seed.take().ok_or(ViewError::NoSeed)?;
        self.cancel_acquisition();
        self.last_result = None;
        self.switch(Box::new(PlayScene::new(seed)));
        Ok(())
    }

    /// Advance one rendered frame
    pub fn frame(&mut self, dt: f32, input: &TickInput) {
        match self.scene.tick(dt, input) {
            Some(SceneTransition::Play) => {
                if let Err(err) = self.start() {
                    log::warn!("Cannot start: {}", err);
                }
            }
            Some(SceneTransition::Finished(result)) => {
                log::info!("Final score {}", result.final_score());
                self.last_result = Some(result);
                self.switch(Box::new(InstructionsScene::new(false)));
            }
            None => {}
        }
    }

    pub fn last_result(&self) -> Option<&SessionResult> {
        self.last_result.as_ref()
    }

    /// Telemetry shown to the player, most recent first
    pub fn panel(&self) -> Vec<TelemetryEvent> {
        self.panel.as_ref().map(TelemetryView::entries).unwrap_or_default()
    }

    /// Tear down the active scene, stop any seed request and detach from
    /// telemetry
    pub fn teardown(&mut self) {
        self.scene.teardown();
        self.cancel_acquisition();
        self.panel = None;
    }

    fn cancel_acquisition(&self) {
        if let Some(handle) = &self.acquisition {
            handle.cancel();
        }
    }

    fn switch(&mut self, mut next: Box<dyn Scene>) {
        self.scene.teardown();
        next.init(&self.ctx);
        log::debug!("Scene {:?} -> {:?}", self.scene.mode(), next.mode());
        self.scene = next;
    }
}

impl Drop for GameView {
    fn drop(&mut self) {
        self.scene.teardown();
        self.cancel_acquisition();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::ProtocolConfig;
    use crate::protocol::testing::ScriptedLedger;
    use crate::protocol::{Account, SeedRequest};
    use crate::sim::EndCause;

    fn view(config: SimConfig) -> (GameView, TelemetryBus) {
        let bus = TelemetryBus::new();
        (GameView::new(config, bus.clone()), bus)
    }

    #[test]
    fn test_cannot_start_without_seed() {
        let (mut view, _bus) = view(SimConfig::default());
        assert_eq!(view.start(), Err(ViewError::NoSeed));
        view.frame(SIM_DT, &TickInput::drag(glam::Vec2::ZERO));
        assert_eq!(view.mode(), SceneMode::Instructions);
    }

    #[test]
    fn test_press_starts_and_second_session_is_rejected() {
        let (mut view, bus) = view(SimConfig::default());
        view.offer_seed(Seed::from("abc")).expect("idle view accepts a seed");
        view.frame(SIM_DT, &TickInput::drag(glam::Vec2::new(400.0, 300.0)));
        assert_eq!(view.mode(), SceneMode::Play);
        assert_eq!(view.offer_seed(Seed::from("other")), Err(ViewError::SessionActive));
        assert_eq!(view.start(), Err(ViewError::SessionActive));
        assert!(
            bus.history()
                .iter()
                .any(|e| e.message == "Game started (seed abc)")
        );
    }

    #[test]
    fn test_fixed_steps_from_frame_time() {
        let (mut view, _bus) = view(SimConfig::default());
        view.offer_seed(Seed::from("steps")).expect("seed");
        view.start().expect("start");

        let mut scene = PlayScene::new(Seed::from("steps"));
        scene.init(&view.ctx);
        for _ in 0..60 {
            scene.tick(SIM_DT, &TickInput::default());
        }
        let ticks = scene.session().map(|s| s.state().time_ticks());
        assert_eq!(ticks, Some(60));

        // A long stall is clamped and substeps are capped
        scene.tick(5.0, &TickInput::default());
        let ticks = scene.session().map(|s| s.state().time_ticks()).unwrap_or(0);
        assert!((65..=60 + u64::from(MAX_SUBSTEPS)).contains(&ticks));
    }

    #[test]
    fn test_session_end_returns_to_instructions_with_result() {
        let config = SimConfig {
            bomb_probability: 0.0,
            ..SimConfig::default()
        };
        let (mut view, bus) = view(config);
        view.offer_seed(Seed::from("42")).expect("seed");
        view.start().expect("start");
        for _ in 0..60 * 120 {
            view.frame(SIM_DT, &TickInput::default());
            if view.mode() == SceneMode::Instructions {
                break;
            }
        }
        assert_eq!(view.mode(), SceneMode::Instructions);
        let result = view.last_result().expect("result delivered");
        assert_eq!(result.cause, EndCause::LivesExhausted);

        let panel = view.panel();
        assert!(panel.len() <= TELEMETRY_WINDOW);
        assert!(panel[0].message.starts_with("Game ended"));
        assert_eq!(
            bus.history()
                .iter()
                .filter(|e| e.message.starts_with("Game ended"))
                .count(),
            1
        );
        // No seed left over, the next session needs a new one
        assert_eq!(view.start(), Err(ViewError::NoSeed));
    }

    #[test]
    fn test_teardown_terminates_and_detaches() {
        let (mut view, bus) = view(SimConfig::default());
        view.offer_seed(Seed::from("gone")).expect("seed");
        view.start().expect("start");
        view.frame(SIM_DT, &TickInput::default());
        assert_eq!(bus.observer_count(), 1);

        view.teardown();
        assert_eq!(bus.observer_count(), 0);
        assert!(view.panel().is_empty());
        assert!(
            bus.history()
                .iter()
                .any(|e| e.kind == EventKind::Warn && e.message.starts_with("Game terminated"))
        );
    }

    async fn polling_acquisition(
        bus: &TelemetryBus,
    ) -> (Arc<ScriptedLedger>, SeedAcquisition<ScriptedLedger>) {
        let ledger = Arc::new(ScriptedLedger::new());
        let mut acquisition = SeedAcquisition::new(
            Arc::clone(&ledger),
            Account("player".into()),
            ProtocolConfig::default(),
            bus.clone(),
        );
        acquisition.submit().await.expect("submitted");
        (ledger, acquisition)
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_poll_in_flight() {
        let bus = TelemetryBus::new();
        let (ledger, acquisition) = polling_acquisition(&bus).await;
        let mut view = GameView::new(SimConfig::default(), bus.clone());
        view.bind_acquisition(acquisition.cancel_handle());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(ledger.scan_count(), 1);

        view.teardown();
        assert!(!acquisition.is_polling());
        assert_eq!(acquisition.request(), SeedRequest::Idle);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ledger.scan_count(), 1);
        assert!(bus.history().iter().any(|e| e.message == "Seed request cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_starting_play_cancels_poll_in_flight() {
        let bus = TelemetryBus::new();
        let (ledger, acquisition) = polling_acquisition(&bus).await;
        let mut view = GameView::new(SimConfig::default(), bus.clone());
        view.bind_acquisition(acquisition.cancel_handle());

        view.offer_seed(Seed::from("manual")).expect("seed");
        view.frame(SIM_DT, &TickInput::drag(glam::Vec2::new(400.0, 300.0)));
        assert_eq!(view.mode(), SceneMode::Play);
        assert!(!acquisition.is_polling());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ledger.scan_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_view_cancels_poll_in_flight() {
        let bus = TelemetryBus::new();
        let (ledger, acquisition) = polling_acquisition(&bus).await;
        let mut view = GameView::new(SimConfig::default(), bus.clone());
        view.bind_acquisition(acquisition.cancel_handle());
        drop(view);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ledger.scan_count(), 0);
        assert_eq!(acquisition.request(), SeedRequest::Idle);
    }
}
