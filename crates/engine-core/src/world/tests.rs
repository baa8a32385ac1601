use contracts::{
    Action, ActionSubmission, ActorRecord, Direction, Intent, JournalEntry, JournalStatus,
    NamespaceId, Outcome, Phase, ScoringRound, SimError, Visibility, WorldConfig,
};

use super::context::{render_hud, HudContext};
use super::intake::validate_submission;
use super::merge::resolve_tick;
use super::World;

fn test_config() -> WorldConfig {
    WorldConfig {
        width: 8,
        height: 8,
        epoch: 100,
        ..WorldConfig::default()
    }
}

fn test_world(actors: &[(&str, u32, u32)]) -> World {
    let namespace = NamespaceId::parse("test-ns").expect("valid namespace");
    let mut world = World::new(namespace, test_config());
    for (id, x, y) in actors {
        world.actors.insert(
            (*id).to_string(),
            ActorRecord {
                id: (*id).to_string(),
                secret: format!("secret-{id}"),
                x: *x,
                y: *y,
                facing: Direction::N,
                scopes: ActorRecord::default_scopes(),
                custom_instructions: String::new(),
                points: 0,
                eliminated_at: None,
            },
        );
    }
    world.begin_collect_if_ready();
    world
}

fn pending_entry(tick: u64, actor_id: &str, action: &str) -> JournalEntry {
    let parsed = Action::parse(action).expect("valid action");
    JournalEntry {
        supertick_id: tick,
        actor_id: actor_id.to_string(),
        intent: parsed.intent(),
        params: parsed.params_value(),
        status: JournalStatus::Pending,
        result: None,
        llm_input: None,
        llm_output: None,
        submitted_at: 1_000,
    }
}

fn submission(world: &World, action: &str) -> ActionSubmission {
    ActionSubmission {
        namespace: world.namespace.as_str().to_string(),
        supertick_id: world.supertick_id,
        context_hash: world.snapshot().context_hash(),
        action: action.to_string(),
        llm_input: None,
        llm_output: None,
    }
}

fn outcome_of(resolution: &super::merge::TickResolution, actor_id: &str) -> Outcome {
    resolution
        .resolved
        .iter()
        .find(|resolved| resolved.actor_id == actor_id)
        .map(|resolved| resolved.result.outcome)
        .expect("actor resolved")
}

#[test]
fn context_hash_is_stable_until_state_changes() {
    let world = test_world(&[("alice", 1, 1)]);
    let first = world.snapshot().context_hash();
    let second = world.snapshot().context_hash();
    assert_eq!(first, second);

    let mut painted = world.clone();
    painted.tiles.insert(
        (2, 2),
        contracts::Color::parse("#FF0000").expect("color"),
    );
    assert_ne!(first, painted.snapshot().context_hash());
}

#[test]
fn context_hash_tracks_tick_and_goal() {
    let mut world = test_world(&[("alice", 1, 1)]);
    let base = world.snapshot().context_hash();

    world.supertick_id += 1;
    let advanced = world.snapshot().context_hash();
    assert_ne!(base, advanced);

    world.goal = "paint a monument".to_string();
    assert_ne!(advanced, world.snapshot().context_hash());
}

#[test]
fn paint_conflict_resolves_by_actor_id() {
    let mut world = test_world(&[("a", 0, 0), ("b", 2, 0), ("c", 4, 0)]);
    world.supertick_id = 5;

    let entries = vec![
        pending_entry(5, "c", "PAINT #FF0000 1 1"),
        pending_entry(5, "a", "PAINT #FF0000 1 1"),
        pending_entry(5, "b", "PAINT #FF0000 1 1"),
    ];
    let resolution = resolve_tick(&world, &entries, 2_000);

    assert_eq!(outcome_of(&resolution, "a"), Outcome::Success);
    assert_eq!(outcome_of(&resolution, "b"), Outcome::ConflictLost);
    assert_eq!(outcome_of(&resolution, "c"), Outcome::ConflictLost);
    assert_eq!(resolution.resolved.len(), 3);

    assert_eq!(resolution.tile_changes.len(), 1);
    let change = &resolution.tile_changes[0];
    assert_eq!((change.x, change.y), (1, 1));
    assert_eq!(change.actor_id, "a");
    assert_eq!(change.new_color.as_str(), "#FF0000");

    world.apply_resolution(&resolution);
    assert_eq!(world.tile_color(1, 1).as_str(), "#FF0000");
    assert_eq!(world.supertick_id, 6);

    let snapshot = world.snapshot();
    assert_eq!(snapshot.tile_color(1, 1), "#FF0000");
    assert_eq!(snapshot.tile_color(0, 1), contracts::BACKGROUND_COLOR);
}

#[test]
fn move_collision_goes_to_lexicographically_smaller_actor() {
    let world = test_world(&[("alice", 2, 2), ("bob", 4, 2)]);
    let entries = vec![
        pending_entry(0, "alice", "MOVE E"),
        pending_entry(0, "bob", "MOVE W"),
    ];
    let resolution = resolve_tick(&world, &entries, 2_000);

    assert_eq!(outcome_of(&resolution, "alice"), Outcome::Success);
    assert_eq!(outcome_of(&resolution, "bob"), Outcome::ConflictLost);
    assert_eq!(resolution.moves.len(), 1);
    assert_eq!(resolution.moves[0].actor_id, "alice");
    assert_eq!((resolution.moves[0].x, resolution.moves[0].y), (3, 2));

    let mut applied = world.clone();
    applied.apply_resolution(&resolution);
    assert_eq!(
        (applied.actors["alice"].x, applied.actors["alice"].y),
        (3, 2)
    );
    assert_eq!((applied.actors["bob"].x, applied.actors["bob"].y), (4, 2));
    assert_eq!(applied.actors["alice"].facing, Direction::E);

    let snapshot = applied.snapshot();
    assert_eq!(
        snapshot.occupant(3, 2).map(|actor| actor.id.as_str()),
        Some("alice")
    );
    assert_eq!(snapshot.actor("bob").map(|actor| (actor.x, actor.y)), Some((4, 2)));
}

#[test]
fn moving_into_vacated_cell_is_not_permitted() {
    // b vacates (3, 2) this tick; a still may not enter it.
    let world = test_world(&[("a", 2, 2), ("b", 3, 2)]);
    let entries = vec![
        pending_entry(0, "a", "MOVE E"),
        pending_entry(0, "b", "MOVE E"),
    ];
    let resolution = resolve_tick(&world, &entries, 2_000);

    assert_eq!(outcome_of(&resolution, "a"), Outcome::ConflictLost);
    assert_eq!(outcome_of(&resolution, "b"), Outcome::Success);
}

#[test]
fn out_of_bounds_move_is_invalid() {
    let world = test_world(&[("edge", 0, 0)]);
    let entries = vec![pending_entry(0, "edge", "MOVE N")];
    let resolution = resolve_tick(&world, &entries, 2_000);

    assert_eq!(outcome_of(&resolution, "edge"), Outcome::Invalid);
    assert!(resolution.moves.is_empty());
}

#[test]
fn repainting_same_color_is_a_no_op() {
    let mut world = test_world(&[("a", 1, 1)]);
    world
        .tiles
        .insert((1, 1), contracts::Color::parse("#123456").expect("color"));

    let entries = vec![pending_entry(0, "a", "PAINT #123456")];
    let resolution = resolve_tick(&world, &entries, 2_000);

    assert_eq!(outcome_of(&resolution, "a"), Outcome::NoOp);
    assert!(resolution.tile_changes.is_empty());
}

#[test]
fn silent_actor_receives_synthesized_timeout() {
    let world = test_world(&[("a", 0, 0), ("b", 2, 2)]);
    let entries = vec![pending_entry(0, "a", "WAIT")];
    let resolution = resolve_tick(&world, &entries, 2_000);

    assert_eq!(outcome_of(&resolution, "a"), Outcome::Success);
    assert_eq!(outcome_of(&resolution, "b"), Outcome::Timeout);
    let timeout = resolution
        .resolved
        .iter()
        .find(|resolved| resolved.actor_id == "b")
        .expect("timeout row");
    assert!(timeout.synthesized);
    assert_eq!(timeout.intent, Intent::Wait);
}

#[test]
fn speak_appends_chat_and_never_conflicts() {
    let world = test_world(&[("a", 0, 0), ("b", 1, 1)]);
    let entries = vec![
        pending_entry(0, "a", "SPEAK north side is mine"),
        pending_entry(0, "b", "SPEAK agreed"),
    ];
    let resolution = resolve_tick(&world, &entries, 2_000);

    assert_eq!(outcome_of(&resolution, "a"), Outcome::Success);
    assert_eq!(outcome_of(&resolution, "b"), Outcome::Success);
    assert_eq!(resolution.chat.len(), 2);
}

#[test]
fn epoch_gate_pauses_and_wins_over_scoring() {
    let mut world = test_world(&[("a", 0, 0)]);
    world.epoch = 1;
    world.config.scoring_interval = 1;

    let entries = vec![pending_entry(0, "a", "WAIT")];
    let resolution = resolve_tick(&world, &entries, 2_000);
    assert_eq!(resolution.next_phase, Phase::Paused);

    world.apply_resolution(&resolution);
    assert!(!world.resume_if_epoch_allows());
    world.epoch = 10;
    assert!(world.resume_if_epoch_allows());
    assert_eq!(world.phase, Phase::Collect);
}

#[test]
fn scoring_interval_pauses_on_boundary() {
    let mut world = test_world(&[("a", 0, 0)]);
    world.supertick_id = 3;
    world.config.scoring_interval = 4;

    let entries = vec![pending_entry(3, "a", "WAIT")];
    let resolution = resolve_tick(&world, &entries, 2_000);
    assert_eq!(resolution.next_supertick_id, 4);
    assert_eq!(resolution.next_phase, Phase::PausedForScoring);
}

#[test]
fn scoring_round_applies_deltas_and_resumes() {
    let mut world = test_world(&[("a", 0, 0), ("b", 1, 1)]);
    world.supertick_id = 4;
    world.phase = Phase::PausedForScoring;

    let round = ScoringRound {
        supertick_id: 4,
        selected_tiles: vec![contracts::GridPos::new(1, 1)],
        contributions_by_actor: [("a".to_string(), 3), ("b".to_string(), -1)]
            .into_iter()
            .collect(),
        rationale: "red square emerging".to_string(),
        feedback: "keep the border clean".to_string(),
        created_at: 3_000,
    };
    world.apply_scoring_round(round.clone());

    assert_eq!(world.phase, Phase::Collect);
    assert_eq!(world.actors["a"].points, 3);
    assert_eq!(world.actors["b"].points, -1);
    assert_eq!(world.last_adjudication, Some(round));
}

#[test]
fn intake_rejects_in_documented_order() {
    let world = test_world(&[("sup", 1, 1)]);
    let hash = world.snapshot().context_hash();

    // Bad secret wins over a stale supertick.
    let mut stale = submission(&world, "WAIT");
    stale.supertick_id = 99;
    let err = validate_submission(&world, &hash, "sup", "wrong", &stale, false)
        .expect_err("auth should fail first");
    assert!(matches!(err, SimError::AuthFailed(_)));

    // Stale supertick wins over a stale hash.
    let mut stale = submission(&world, "WAIT");
    stale.supertick_id = 99;
    stale.context_hash = "sha256:deadbeef".to_string();
    let err = validate_submission(&world, &hash, "sup", "secret-sup", &stale, false)
        .expect_err("supertick should fail before hash");
    assert!(matches!(err, SimError::SupertickMismatch { .. }));

    let mut bad_hash = submission(&world, "WAIT");
    bad_hash.context_hash = "sha256:deadbeef".to_string();
    let err = validate_submission(&world, &hash, "sup", "secret-sup", &bad_hash, false)
        .expect_err("hash mismatch");
    assert!(matches!(err, SimError::ContextHashMismatch { .. }));

    let err = validate_submission(&world, &hash, "sup", "secret-sup", &submission(&world, "WAIT"), true)
        .expect_err("duplicate submission");
    assert!(matches!(err, SimError::AlreadySubmitted { .. }));

    let err = validate_submission(&world, &hash, "ghost", "secret-sup", &submission(&world, "WAIT"), false)
        .expect_err("unknown actor");
    assert!(matches!(err, SimError::UnknownActor(_)));
}

#[test]
fn intake_denies_out_of_scope_intent() {
    let mut world = test_world(&[("sup", 0, 0)]);
    let scopes = [Intent::Speak, Intent::Wait, Intent::Skip]
        .into_iter()
        .collect();
    world.actors.get_mut("sup").expect("actor").scopes = scopes;
    let hash = world.snapshot().context_hash();

    let err = validate_submission(
        &world,
        &hash,
        "sup",
        "secret-sup",
        &submission(&world, "PAINT #000000 0 0"),
        false,
    )
    .expect_err("scope denied");
    assert!(matches!(
        err,
        SimError::ScopeDenied {
            intent: Intent::Paint,
            ..
        }
    ));

    // Parameter validation sits after the scope gate: a malformed PAINT from
    // an actor without the scope still reads as ScopeDenied.
    let err = validate_submission(
        &world,
        &hash,
        "sup",
        "secret-sup",
        &submission(&world, "PAINT notacolor"),
        false,
    )
    .expect_err("scope denied before params");
    assert!(matches!(err, SimError::ScopeDenied { .. }));
}

#[test]
fn intake_accepts_valid_submission_and_rejects_outside_collect() {
    let mut world = test_world(&[("alice", 1, 1)]);
    let hash = world.snapshot().context_hash();

    let action = validate_submission(
        &world,
        &hash,
        "alice",
        "secret-alice",
        &submission(&world, "MOVE S"),
        false,
    )
    .expect("valid submission");
    assert_eq!(action.intent(), Intent::Move);

    world.phase = Phase::Paused;
    let err = validate_submission(
        &world,
        &hash,
        "alice",
        "secret-alice",
        &submission(&world, "MOVE S"),
        false,
    )
    .expect_err("paused namespace");
    assert!(matches!(
        err,
        SimError::PhaseMismatch {
            phase: Phase::Paused
        }
    ));
}

#[test]
fn intake_rejects_out_of_bounds_paint_target() {
    let world = test_world(&[("alice", 1, 1)]);
    let hash = world.snapshot().context_hash();

    let err = validate_submission(
        &world,
        &hash,
        "alice",
        "secret-alice",
        &submission(&world, "PAINT #FF0000 99 1"),
        false,
    )
    .expect_err("target outside the grid");
    assert!(matches!(err, SimError::MalformedAction(_)));
}

#[test]
fn hud_renders_sections_in_order() {
    let mut world = test_world(&[("alice", 1, 1), ("bob", 3, 3)]);
    world.goal = "paint a red monument".to_string();
    world
        .tiles
        .insert((2, 2), contracts::Color::parse("#FF0000").expect("color"));
    world.supertick_id = 2;

    let snapshot = world.snapshot();
    let actor = world.actors.get("alice").expect("actor");
    let history = vec![contracts::AuditRecord {
        supertick_id: 1,
        actor_id: "alice".to_string(),
        action_type: Intent::Paint,
        params: serde_json::json!({"color": "#FF0000"}),
        result: contracts::ActionResult::success("Painted (1, 1) #FF0000"),
        context_hash: "sha256:0".to_string(),
        llm_input: None,
        llm_output: None,
        submitted_at: 10,
    }];
    let chat = vec![contracts::ChatMessage {
        supertick_id: 1,
        from_id: "bob".to_string(),
        message: "hold the line".to_string(),
        created_at: 11,
    }];

    let hud = render_hud(&HudContext {
        snapshot: &snapshot,
        phase: world.phase,
        actor,
        history: &history,
        chat: &chat,
        memories: &[],
        visibility: world.config.visibility,
    });

    let sections = [
        "NAMESPACE: test-ns",
        "WORLD GOAL: paint a red monument",
        "LAST_TICK_RESULT:",
        "WORLD TILES:",
        "ACTORS:",
        "CHAT (recent):",
        "AVAILABLE ACTIONS:",
    ];
    let mut cursor = 0;
    for section in sections {
        let at = hud[cursor..]
            .find(section)
            .unwrap_or_else(|| panic!("missing or out-of-order section '{section}'"));
        cursor += at;
    }
    assert!(hud.contains("PAINT -> SUCCESS"));
    assert!(hud.contains("alice (YOU) at (1, 1)"));
    assert!(hud.contains("[tick 1] bob: hold the line"));
}

#[test]
fn radius_visibility_hides_distant_state() {
    let mut world = test_world(&[("alice", 1, 1), ("bob", 7, 7)]);
    world.config.visibility = Visibility::Radius(2);
    world
        .tiles
        .insert((7, 6), contracts::Color::parse("#00FF00").expect("color"));

    let snapshot = world.snapshot();
    let actor = world.actors.get("alice").expect("actor");
    let hud = render_hud(&HudContext {
        snapshot: &snapshot,
        phase: world.phase,
        actor,
        history: &[],
        chat: &[],
        memories: &[],
        visibility: world.config.visibility,
    });

    assert!(!hud.contains("bob at"));
    assert!(!hud.contains("#00FF00"));
    assert!(hud.contains("alice (YOU)"));
}
