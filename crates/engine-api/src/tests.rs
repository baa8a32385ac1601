use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use contracts::{
    ActionSubmission, Intent, NamespaceId, Outcome, Phase, RecalledMemory, RegisterActorRequest,
    ScoringSubmission, SimError, WorldConfig,
};

use crate::{MemoryService, NullMemoryService, SimEngine, SimStore};

fn temp_data_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    std::env::temp_dir().join(format!("monument_{name}_{nanos}"))
}

fn small_config() -> WorldConfig {
    WorldConfig {
        width: 8,
        height: 8,
        epoch: 50,
        ..WorldConfig::default()
    }
}

fn create_engine(dir: &PathBuf, ns: &str, config: WorldConfig) -> SimEngine {
    let namespace = NamespaceId::parse(ns).expect("valid namespace");
    SimEngine::create(dir, &namespace, config).expect("create namespace")
}

fn register(engine: &mut SimEngine, id: &str, x: u32, y: u32) -> String {
    let (response, _) = engine
        .register_actor(RegisterActorRequest {
            actor_id: id.to_string(),
            x: Some(x),
            y: Some(y),
            facing: None,
            scopes: None,
            secret: Some(format!("secret-{id}")),
            custom_instructions: String::new(),
        })
        .expect("register actor");
    response.secret
}

fn submission_for(engine: &SimEngine, action: &str) -> ActionSubmission {
    ActionSubmission {
        namespace: engine.world().namespace.as_str().to_string(),
        supertick_id: engine.world().supertick_id,
        context_hash: engine.context_hash().to_string(),
        action: action.to_string(),
        llm_input: None,
        llm_output: None,
    }
}

fn submit(engine: &mut SimEngine, actor_id: &str, action: &str) {
    let submission = submission_for(engine, action);
    engine
        .submit_action(actor_id, &format!("secret-{actor_id}"), &submission)
        .unwrap_or_else(|err| panic!("{actor_id} failed to submit '{action}': {err}"));
}

#[test]
fn create_rejects_duplicates_and_bad_config() {
    let dir = temp_data_dir("create");
    let _engine = create_engine(&dir, "demo", small_config());

    let namespace = NamespaceId::parse("demo").expect("valid namespace");
    let duplicate = SimEngine::create(&dir, &namespace, small_config());
    assert!(matches!(duplicate, Err(SimError::NamespaceExists(_))));

    let bad = NamespaceId::parse("tiny").expect("valid namespace");
    let result = SimEngine::create(
        &dir,
        &bad,
        WorldConfig {
            width: 2,
            ..small_config()
        },
    );
    assert!(matches!(result, Err(SimError::InvalidConfig(_))));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn open_refuses_uninitialized_namespace() {
    let dir = temp_data_dir("uninit");
    let namespace = NamespaceId::parse("ghost").expect("valid namespace");
    let result = SimEngine::open(&dir, &namespace);
    assert!(matches!(result, Err(SimError::UnknownNamespace(_))));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn schema_mismatch_refuses_namespace() {
    let dir = temp_data_dir("schema");
    let namespace = NamespaceId::parse("drifted").expect("valid namespace");
    drop(create_engine(&dir, "drifted", small_config()));

    let conn = rusqlite::Connection::open(SimStore::db_path(&dir, &namespace))
        .expect("open raw connection");
    conn.pragma_update(None, "user_version", 3)
        .expect("set user_version");
    drop(conn);

    let result = SimEngine::open(&dir, &namespace);
    match result {
        Err(SimError::SchemaMismatch { expected, found }) => {
            assert_eq!(expected, contracts::EXPECTED_SCHEMA_VERSION);
            assert_eq!(found, 3);
        }
        other => panic!("expected SchemaMismatch, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn full_loop_auto_advances_when_all_submit() {
    let dir = temp_data_dir("loop");
    let mut engine = create_engine(&dir, "loop", small_config());
    register(&mut engine, "alice", 1, 1);
    register(&mut engine, "bob", 3, 3);

    let context = engine
        .context("alice", "secret-alice", None, None, &NullMemoryService)
        .expect("context");
    assert_eq!(context.supertick_id, 0);
    assert_eq!(context.phase, Phase::Collect);
    assert!(context.hud.contains("MONUMENT - AGENT CONTEXT"));
    assert!(context.hud.contains("AVAILABLE ACTIONS:"));

    let first = submission_for(&engine, "PAINT #FF0000");
    let (response, events) = engine
        .submit_action("alice", "secret-alice", &first)
        .expect("first submission");
    assert!(response.message.contains("Waiting for agents: 1/2"));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "submission_received");

    let second = submission_for(&engine, "MOVE N");
    let (response, events) = engine
        .submit_action("bob", "secret-bob", &second)
        .expect("second submission");
    assert!(response.message.contains("tick advanced"));
    let names: Vec<&str> = events.iter().map(|event| event.event.as_str()).collect();
    assert_eq!(names, ["submission_received", "tick_resolved", "tick_started"]);

    assert_eq!(engine.world().supertick_id, 1);
    assert_eq!(engine.world().tile_color(1, 1).as_str(), "#FF0000");
    let bob = &engine.world().actors["bob"];
    assert_eq!((bob.x, bob.y), (3, 2));

    let audit = engine.store().audit_range(0, 0).expect("audit rows");
    assert_eq!(audit.len(), 2);
    assert!(audit
        .iter()
        .all(|record| record.result.outcome == Outcome::Success));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn stale_submission_is_rejected_without_journal_row() {
    let dir = temp_data_dir("stale");
    let mut engine = create_engine(&dir, "stale", small_config());
    register(&mut engine, "alice", 1, 1);
    register(&mut engine, "bob", 3, 3);

    // Capture tick-0 coordinates, then advance past them.
    let stale = submission_for(&engine, "WAIT");
    submit(&mut engine, "alice", "WAIT");
    submit(&mut engine, "bob", "WAIT");
    assert_eq!(engine.world().supertick_id, 1);

    let err = engine
        .submit_action("alice", "secret-alice", &stale)
        .expect_err("stale supertick");
    assert!(matches!(err, SimError::SupertickMismatch { .. }));
    assert!(err.to_string().contains("Supertick mismatch"));

    // Same supertick but a stale hash is caught by the hash gate.
    let mut stale_hash = submission_for(&engine, "WAIT");
    stale_hash.context_hash = "sha256:0000000000000000".to_string();
    let err = engine
        .submit_action("alice", "secret-alice", &stale_hash)
        .expect_err("stale hash");
    assert!(err.to_string().contains("Context hash mismatch"));

    assert_eq!(engine.store().journal_count(1).expect("count"), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn duplicate_submission_is_idempotent_conflict() {
    let dir = temp_data_dir("dup");
    let mut engine = create_engine(&dir, "dup", small_config());
    register(&mut engine, "alice", 1, 1);
    register(&mut engine, "bob", 3, 3);

    submit(&mut engine, "alice", "SPEAK first");
    let again = submission_for(&engine, "SPEAK second");
    let err = engine
        .submit_action("alice", "secret-alice", &again)
        .expect_err("duplicate");
    assert!(matches!(err, SimError::AlreadySubmitted { .. }));
    assert!(err.to_string().contains("already submitted"));
    assert_eq!(engine.store().journal_count(0).expect("count"), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn scope_denied_leaves_no_journal_row() {
    let dir = temp_data_dir("scope");
    let mut engine = create_engine(&dir, "scope", small_config());
    let (response, _) = engine
        .register_actor(RegisterActorRequest {
            actor_id: "sup".to_string(),
            x: Some(0),
            y: Some(0),
            facing: None,
            scopes: Some(vec![Intent::Speak, Intent::Wait, Intent::Skip]),
            secret: Some("secret-sup".to_string()),
            custom_instructions: String::new(),
        })
        .expect("register supervisor");
    assert_eq!(response.actor_id, "sup");
    register(&mut engine, "worker", 3, 3);

    let denied = submission_for(&engine, "PAINT #000000 0 0");
    let err = engine
        .submit_action("sup", "secret-sup", &denied)
        .expect_err("scope denied");
    assert!(matches!(
        err,
        SimError::ScopeDenied {
            intent: Intent::Paint,
            ..
        }
    ));
    assert_eq!(engine.store().journal_count(0).expect("count"), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn forced_advance_fills_timeouts() {
    let dir = temp_data_dir("timeout");
    let mut engine = create_engine(&dir, "timeout", small_config());
    register(&mut engine, "a", 0, 0);
    register(&mut engine, "b", 2, 2);

    submit(&mut engine, "a", "WAIT");
    engine.force_advance().expect("force advance");
    assert_eq!(engine.world().supertick_id, 1);

    let audit = engine.store().audit_range(0, 0).expect("audit rows");
    assert_eq!(audit.len(), 2);
    let by_actor = |id: &str| {
        audit
            .iter()
            .find(|record| record.actor_id == id)
            .unwrap_or_else(|| panic!("no audit row for {id}"))
    };
    assert_eq!(by_actor("a").result.outcome, Outcome::Success);
    assert_eq!(by_actor("a").action_type, Intent::Wait);
    assert_eq!(by_actor("b").result.outcome, Outcome::Timeout);
    assert_eq!(by_actor("b").action_type, Intent::Wait);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn scoring_pause_accepts_one_round_and_resumes() {
    let dir = temp_data_dir("scoring");
    let mut engine = create_engine(
        &dir,
        "scoring",
        WorldConfig {
            scoring_interval: 2,
            ..small_config()
        },
    );
    register(&mut engine, "solo", 1, 1);

    submit(&mut engine, "solo", "PAINT #AA0000");
    assert_eq!(engine.world().phase, Phase::Collect);
    submit(&mut engine, "solo", "WAIT");
    assert_eq!(engine.world().supertick_id, 2);
    assert_eq!(engine.world().phase, Phase::PausedForScoring);

    let blocked = submission_for(&engine, "WAIT");
    let err = engine
        .submit_action("solo", "secret-solo", &blocked)
        .expect_err("paused for scoring");
    assert!(matches!(
        err,
        SimError::PhaseMismatch {
            phase: Phase::PausedForScoring
        }
    ));

    let wrong_tick = ScoringSubmission {
        supertick_id: 1,
        selected_tiles: Vec::new(),
        contributions_by_actor: Default::default(),
        rationale: String::new(),
        feedback: String::new(),
    };
    let err = engine.submit_scoring(wrong_tick).expect_err("wrong tick");
    assert!(matches!(err, SimError::SupertickMismatch { .. }));

    let events = engine
        .submit_scoring(ScoringSubmission {
            supertick_id: 2,
            selected_tiles: vec![contracts::GridPos::new(1, 1)],
            contributions_by_actor: [("solo".to_string(), 5)].into_iter().collect(),
            rationale: "strong start".to_string(),
            feedback: "extend the line east".to_string(),
        })
        .expect("scoring round");
    let names: Vec<&str> = events.iter().map(|event| event.event.as_str()).collect();
    assert_eq!(names, ["scoring_committed", "tick_started"]);

    assert_eq!(engine.world().phase, Phase::Collect);
    assert_eq!(engine.world().actors["solo"].points, 5);
    assert!(engine.world().last_adjudication.is_some());

    let context = engine
        .context("solo", "secret-solo", None, None, &NullMemoryService)
        .expect("context after scoring");
    assert!(context.hud.contains("LAST_ADJUDICATION:"));
    assert!(context.hud.contains("Your contribution: +5"));
    assert!(context.hud.contains("extend the line east"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn epoch_gate_pauses_until_advanced() {
    let dir = temp_data_dir("epoch");
    let mut engine = create_engine(
        &dir,
        "epoch",
        WorldConfig {
            epoch: 1,
            ..small_config()
        },
    );
    register(&mut engine, "solo", 1, 1);

    submit(&mut engine, "solo", "WAIT");
    assert_eq!(engine.world().phase, Phase::Paused);

    let blocked = submission_for(&engine, "WAIT");
    let err = engine
        .submit_action("solo", "secret-solo", &blocked)
        .expect_err("paused");
    assert!(matches!(
        err,
        SimError::PhaseMismatch {
            phase: Phase::Paused
        }
    ));

    let events = engine.set_epoch(3).expect("advance epoch");
    assert_eq!(engine.world().phase, Phase::Collect);
    assert_eq!(
        engine.store().raw_meta("epoch").expect("meta read"),
        Some("3".to_string())
    );
    assert!(events.iter().any(|event| event.event == "tick_started"));
    submit(&mut engine, "solo", "WAIT");
    assert_eq!(engine.world().supertick_id, 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn registration_is_rejected_once_collect_begins() {
    let dir = temp_data_dir("reg");
    let mut engine = create_engine(&dir, "reg", small_config());
    register(&mut engine, "a", 0, 0);
    register(&mut engine, "b", 2, 2);

    // First agent touch ends SETUP.
    engine
        .context("a", "secret-a", None, None, &NullMemoryService)
        .expect("context");
    assert_eq!(engine.world().phase, Phase::Collect);

    let late = engine.register_actor(RegisterActorRequest {
        actor_id: "late".to_string(),
        x: None,
        y: None,
        facing: None,
        scopes: None,
        secret: None,
        custom_instructions: String::new(),
    });
    assert!(matches!(
        late,
        Err(SimError::PhaseMismatch {
            phase: Phase::Collect
        })
    ));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn replay_reproduces_tile_state() {
    let dir = temp_data_dir("replay");
    let mut engine = create_engine(&dir, "replay", small_config());
    register(&mut engine, "a", 0, 0);
    register(&mut engine, "b", 4, 4);

    submit(&mut engine, "a", "PAINT #FF0000 1 1");
    submit(&mut engine, "b", "PAINT #00FF00 2 2");
    assert_eq!(engine.world().supertick_id, 1);
    submit(&mut engine, "a", "PAINT #0000FF 1 1");
    submit(&mut engine, "b", "MOVE E");
    assert_eq!(engine.world().supertick_id, 2);

    let replayed = engine
        .store()
        .tiles_at_tick(engine.world().supertick_id)
        .expect("replayed tiles");
    assert_eq!(replayed, engine.world().tiles);

    let replay = engine.replay(0, 2).expect("replay export");
    assert_eq!(replay.ticks.len(), 2);
    let tick0 = &replay.ticks[0];
    assert_eq!(tick0.supertick_id, 0);
    assert_eq!(tick0.actions.len(), 2);
    assert_eq!(tick0.tile_updates.len(), 2);
    let tick1 = &replay.ticks[1];
    assert_eq!(tick1.actions.len(), 2);
    assert_eq!(tick1.tile_updates.len(), 1);
    assert_eq!(tick1.actor_positions.len(), 1);

    assert!(matches!(
        engine.replay(3, 1),
        Err(SimError::InvalidConfig(_))
    ));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reopening_restores_identical_world() {
    let dir = temp_data_dir("reopen");
    let namespace = NamespaceId::parse("reopen").expect("valid namespace");
    let (tick, hash, tiles) = {
        let mut engine = create_engine(&dir, "reopen", small_config());
        register(&mut engine, "a", 0, 0);
        register(&mut engine, "b", 4, 4);
        submit(&mut engine, "a", "PAINT #ABCDEF 3 3");
        submit(&mut engine, "b", "MOVE S");
        (
            engine.world().supertick_id,
            engine.context_hash().to_string(),
            engine.world().tiles.clone(),
        )
    };

    let reopened = SimEngine::open(&dir, &namespace).expect("reopen");
    assert_eq!(reopened.world().supertick_id, tick);
    assert_eq!(reopened.context_hash(), hash);
    assert_eq!(reopened.world().tiles, tiles);
    let b = &reopened.world().actors["b"];
    assert_eq!((b.x, b.y), (4, 5));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn memory_service_output_lands_in_hud() {
    struct StubMemory;

    impl MemoryService for StubMemory {
        fn recall(&self, _actor_id: &str, _query: &str, _limit: usize) -> Vec<RecalledMemory> {
            vec![RecalledMemory {
                tick: 2,
                text: "the east wall was blue".to_string(),
                score: 0.9,
            }]
        }

        fn store(&self, _actor_id: &str, _tick: u64, _text: &str, _salience_base: f64) {}
    }

    let dir = temp_data_dir("memory");
    let mut engine = create_engine(&dir, "memory", small_config());
    register(&mut engine, "a", 0, 0);

    let context = engine
        .context("a", "secret-a", None, None, &StubMemory)
        .expect("context");
    assert!(context.hud.contains("RECALLED MEMORIES:"));
    assert!(context.hud.contains("the east wall was blue"));

    let _ = std::fs::remove_dir_all(&dir);
}
