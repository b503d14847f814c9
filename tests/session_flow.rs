use std::sync::Arc;

use seed_slicer::consts::SIM_DT;
use seed_slicer::protocol::testing::ScriptedLedger;
use seed_slicer::protocol::{Account, SeedAcquisition, SeedRequest};
use seed_slicer::scene::{GameView, SceneMode};
use seed_slicer::sim::{
    EndCause, FruitVariant, ObjectKind, Session, SimEvent, TickInput, replay,
};
use seed_slicer::telemetry::{EventKind, EventSource};
use seed_slicer::{ProtocolConfig, Seed, SimConfig, TelemetryBus};

/// Autopilot for the first 20 seconds, then hands off the pointer
fn scripted_input(tick: usize) -> TickInput {
    if tick < 60 * 20 {
        TickInput::autopilot()
    } else {
        TickInput::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_acquired_seed_drives_a_replayable_session() {
    let ledger = Arc::new(ScriptedLedger::new());
    ledger.correlate_next(7);
    ledger.emit_result(5, "1", 101);
    ledger.emit_result(7, "999", 102);

    let bus = TelemetryBus::new();
    let mut acquisition = SeedAcquisition::new(
        Arc::clone(&ledger),
        Account("player".into()),
        ProtocolConfig::default(),
        bus.clone(),
    );
    let seed = acquisition.acquire().await.expect("oracle fulfils the request");
    assert_eq!(seed, Seed::from("999"));

    let mut view = GameView::new(SimConfig::default(), bus.clone());
    view.start_from(&mut acquisition).expect("seed hands off to the view");
    assert_eq!(view.mode(), SceneMode::Play);
    assert!(!acquisition.is_polling());
    assert_eq!(acquisition.request(), SeedRequest::Idle);

    // One fixed step per frame; record the inputs as a tape
    let mut tape = Vec::new();
    while view.mode() == SceneMode::Play && tape.len() < 60 * 60 * 10 {
        let input = scripted_input(tape.len());
        view.frame(SIM_DT, &input);
        tape.push(input);
    }
    let live = view.last_result().cloned().expect("session ended");
    assert_ne!(live.cause, EndCause::Terminated);

    let replayed = replay(seed, SimConfig::default(), &tape, TickInput::default(), 1_000_000);
    assert_eq!(replayed, live);

    // Protocol evidence precedes the session in the log
    let history = bus.history();
    let started = history
        .iter()
        .position(|e| e.message.starts_with("Game started"))
        .expect("game start logged");
    assert!(history[..started].iter().all(|e| e.source == EventSource::Protocol));
    assert!(history[..started].iter().any(|e| e.kind == EventKind::Proof));
    assert!(history[started..].iter().all(|e| e.source == EventSource::Simulation));
}

#[test]
fn test_tape_survives_json() {
    let tape: Vec<TickInput> = (0..600).map(scripted_input).collect();
    let json = serde_json::to_string(&tape).expect("serialize tape");
    let loaded: Vec<TickInput> = serde_json::from_str(&json).expect("parse tape");

    let config = SimConfig::default();
    let a = replay(Seed::from("tape"), config.clone(), &tape, TickInput::autopilot(), 3000);
    let b = replay(Seed::from("tape"), config, &loaded, TickInput::autopilot(), 3000);
    assert_eq!(a, b);
}

#[test]
fn test_seed_42_opening_spawns() {
    let (mut session, _result) = Session::new(Seed::from("42"), SimConfig::default());
    session.start();

    let mut spawned = Vec::new();
    for _ in 0..180 {
        for event in session.tick(&TickInput::default()) {
            if let SimEvent::Spawned { kind, .. } = event {
                spawned.push((session.state().time_ticks(), kind));
            }
        }
    }
    assert_eq!(
        spawned,
        vec![
            (60, ObjectKind::Bomb),
            (120, ObjectKind::Fruit(FruitVariant::Banana)),
            (180, ObjectKind::Fruit(FruitVariant::Apple)),
        ]
    );
}

#[test]
fn test_different_seeds_diverge() {
    let run = |seed: &str| {
        let (mut session, _result) = Session::new(Seed::from(seed), SimConfig::default());
        session.start();
        (0..600)
            .flat_map(|_| session.tick(&TickInput::default()))
            .filter(|e| matches!(e, SimEvent::Spawned { .. }))
            .collect::<Vec<_>>()
    };
    assert_eq!(run("alpha"), run("alpha"));
    assert_ne!(run("alpha"), run("beta"));
}
