use std::collections::BTreeMap;

use contracts::{
    Action, ActionResult, ChatMessage, Color, Direction, GridPos, Intent, JournalEntry,
    JournalStatus, Outcome, Phase, TileChange,
};
use serde_json::{json, Value};

use super::World;

/// Final disposition of one journal row (or one synthesized TIMEOUT).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub actor_id: String,
    pub intent: Intent,
    pub params: Value,
    pub result: ActionResult,
    /// True for engine-synthesized TIMEOUT rows that had no submission.
    pub synthesized: bool,
    pub llm_input: Option<String>,
    pub llm_output: Option<String>,
    pub submitted_at: i64,
}

impl ResolvedAction {
    fn from_entry(entry: &JournalEntry, result: ActionResult) -> Self {
        Self {
            actor_id: entry.actor_id.clone(),
            intent: entry.intent,
            params: entry.params.clone(),
            result,
            synthesized: false,
            llm_input: entry.llm_input.clone(),
            llm_output: entry.llm_output.clone(),
            submitted_at: entry.submitted_at,
        }
    }

    fn synthesized_timeout(actor_id: &str, now: i64) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            intent: Intent::Wait,
            params: json!({}),
            result: ActionResult::timeout(),
            synthesized: true,
            llm_input: None,
            llm_output: None,
            submitted_at: now,
        }
    }

    pub fn journal_status(&self) -> JournalStatus {
        match self.result.outcome {
            Outcome::Success | Outcome::NoOp => JournalStatus::Committed,
            Outcome::Invalid | Outcome::ConflictLost | Outcome::Timeout => JournalStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorMove {
    pub actor_id: String,
    pub x: u32,
    pub y: u32,
    pub facing: Direction,
}

/// Everything one MERGE commits, computed against S(n) without mutating it.
/// The API layer applies this inside a single store transaction and then
/// replays it onto the in-memory world.
#[derive(Debug, Clone, PartialEq)]
pub struct TickResolution {
    pub supertick_id: u64,
    /// One entry per registered actor, sorted by actor id.
    pub resolved: Vec<ResolvedAction>,
    pub tile_changes: Vec<TileChange>,
    pub moves: Vec<ActorMove>,
    pub chat: Vec<ChatMessage>,
    pub next_supertick_id: u64,
    pub next_phase: Phase,
}

/// Conflict priority key; the smallest key wins. The supertick is constant
/// within one merge, so the rule reduces to actor-id order, but keeping it
/// in the tuple leaves the ordering stable if resolution ever spans ticks.
fn priority_key(supertick_id: u64, actor_id: &str) -> (u64, &str) {
    (supertick_id, actor_id)
}

/// Deterministic single-pass resolution of tick `world.supertick_id`.
///
/// Eligibility is evaluated against S(n) only: destinations occupied in the
/// snapshot lose even when the occupant vacates this tick.
pub fn resolve_tick(world: &World, entries: &[JournalEntry], now: i64) -> TickResolution {
    let tick = world.supertick_id;

    let mut by_actor: BTreeMap<&str, &JournalEntry> = BTreeMap::new();
    for entry in entries {
        if entry.supertick_id == tick && entry.status == JournalStatus::Pending {
            by_actor.insert(entry.actor_id.as_str(), entry);
        }
    }

    let mut resolved: BTreeMap<String, ResolvedAction> = BTreeMap::new();
    for actor in world.registered_actors() {
        if !by_actor.contains_key(actor.id.as_str()) {
            resolved.insert(
                actor.id.clone(),
                ResolvedAction::synthesized_timeout(&actor.id, now),
            );
        }
    }

    let mut move_groups: BTreeMap<(u32, u32), Vec<(String, Direction)>> = BTreeMap::new();
    let mut paint_groups: BTreeMap<(u32, u32), Vec<(String, Color)>> = BTreeMap::new();
    let mut chat = Vec::new();

    for (&actor_id, entry) in &by_actor {
        let action = match Action::from_journal(entry.intent, &entry.params) {
            Ok(action) => action,
            Err(detail) => {
                resolved.insert(
                    actor_id.to_string(),
                    ResolvedAction::from_entry(entry, ActionResult::invalid(detail)),
                );
                continue;
            }
        };

        let Some(actor) = world
            .actors
            .get(actor_id)
            .filter(|actor| !actor.is_eliminated())
        else {
            resolved.insert(
                actor_id.to_string(),
                ResolvedAction::from_entry(
                    entry,
                    ActionResult::invalid("Actor no longer registered"),
                ),
            );
            continue;
        };

        match action {
            Action::Move { direction } => {
                let (dx, dy) = direction.offset();
                let dest_x = i64::from(actor.x) + dx;
                let dest_y = i64::from(actor.y) + dy;
                if !world.in_bounds(dest_x, dest_y) {
                    resolved.insert(
                        actor_id.to_string(),
                        ResolvedAction::from_entry(
                            entry,
                            ActionResult::invalid(format!(
                                "Destination ({dest_x}, {dest_y}) is out of bounds"
                            )),
                        ),
                    );
                    continue;
                }
                let (dest_x, dest_y) = (dest_x as u32, dest_y as u32);
                if let Some(occupant) = world.occupant(dest_x, dest_y) {
                    // Single-pass rule: cells being vacated this tick still
                    // count as occupied.
                    resolved.insert(
                        actor_id.to_string(),
                        ResolvedAction::from_entry(
                            entry,
                            ActionResult::conflict_lost(format!(
                                "Destination ({dest_x}, {dest_y}) occupied by {}",
                                occupant.id
                            )),
                        ),
                    );
                    continue;
                }
                move_groups
                    .entry((dest_x, dest_y))
                    .or_default()
                    .push((actor_id.to_string(), direction));
            }
            Action::Paint { color, target } => {
                let pos = target.unwrap_or(GridPos::new(actor.x, actor.y));
                if !world.in_bounds(i64::from(pos.x), i64::from(pos.y)) {
                    resolved.insert(
                        actor_id.to_string(),
                        ResolvedAction::from_entry(
                            entry,
                            ActionResult::invalid(format!(
                                "Tile ({}, {}) is out of bounds",
                                pos.x, pos.y
                            )),
                        ),
                    );
                    continue;
                }
                paint_groups
                    .entry((pos.x, pos.y))
                    .or_default()
                    .push((actor_id.to_string(), color));
            }
            Action::Speak { message } => {
                chat.push(ChatMessage {
                    supertick_id: tick,
                    from_id: actor_id.to_string(),
                    message,
                    created_at: now,
                });
                resolved.insert(
                    actor_id.to_string(),
                    ResolvedAction::from_entry(entry, ActionResult::success("Message sent")),
                );
            }
            Action::Wait => {
                resolved.insert(
                    actor_id.to_string(),
                    ResolvedAction::from_entry(entry, ActionResult::success("Waited")),
                );
            }
            Action::Skip => {
                resolved.insert(
                    actor_id.to_string(),
                    ResolvedAction::from_entry(entry, ActionResult::success("Skipped")),
                );
            }
        }
    }

    // Destination collisions.
    let mut moves = Vec::new();
    for ((dest_x, dest_y), group) in &move_groups {
        let Some((winner_id, facing)) = group
            .iter()
            .min_by_key(|candidate| priority_key(tick, candidate.0.as_str()))
            .map(|candidate| (candidate.0.clone(), candidate.1))
        else {
            continue;
        };
        let entry = by_actor[winner_id.as_str()];
        let reason = if group.len() == 1 {
            format!("Moved to ({dest_x}, {dest_y})")
        } else {
            format!("Won conflict, moved to ({dest_x}, {dest_y})")
        };
        resolved.insert(
            winner_id.clone(),
            ResolvedAction::from_entry(entry, ActionResult::success(reason)),
        );
        moves.push(ActorMove {
            actor_id: winner_id.clone(),
            x: *dest_x,
            y: *dest_y,
            facing,
        });

        for (loser_id, _) in group.iter().filter(|candidate| candidate.0 != winner_id) {
            let entry = by_actor[loser_id.as_str()];
            resolved.insert(
                loser_id.clone(),
                ResolvedAction::from_entry(
                    entry,
                    ActionResult::conflict_lost(format!("Lost move conflict to {winner_id}")),
                ),
            );
        }
    }

    // Paint collisions, same priority rule. Identical-color paints commit as
    // NO_OP with no history row.
    let mut tile_changes = Vec::new();
    for ((x, y), group) in &paint_groups {
        let current = world.tile_color(*x, *y);
        let Some((winner_id, color)) = group
            .iter()
            .min_by_key(|candidate| priority_key(tick, candidate.0.as_str()))
            .map(|candidate| (candidate.0.clone(), candidate.1.clone()))
        else {
            continue;
        };
        let entry = by_actor[winner_id.as_str()];
        if color == current {
            resolved.insert(
                winner_id.clone(),
                ResolvedAction::from_entry(
                    entry,
                    ActionResult::no_op(format!("Tile already {color}")),
                ),
            );
        } else {
            let reason = if group.len() == 1 {
                format!("Painted ({x}, {y}) {color}")
            } else {
                format!("Won conflict, painted ({x}, {y}) {color}")
            };
            resolved.insert(
                winner_id.clone(),
                ResolvedAction::from_entry(entry, ActionResult::success(reason)),
            );
            tile_changes.push(TileChange {
                x: *x,
                y: *y,
                supertick_id: tick,
                actor_id: winner_id.clone(),
                old_color: current,
                new_color: color,
                action_type: Intent::Paint,
                created_at: now,
            });
        }

        for (loser_id, _) in group.iter().filter(|candidate| candidate.0 != winner_id) {
            let entry = by_actor[loser_id.as_str()];
            resolved.insert(
                loser_id.clone(),
                ResolvedAction::from_entry(
                    entry,
                    ActionResult::conflict_lost(format!("Lost paint conflict to {winner_id}")),
                ),
            );
        }
    }

    let next_supertick_id = tick + 1;
    let next_phase = if next_supertick_id >= world.epoch {
        Phase::Paused
    } else if world.config.scoring_interval > 0
        && next_supertick_id % world.config.scoring_interval == 0
    {
        Phase::PausedForScoring
    } else {
        Phase::Collect
    };

    TickResolution {
        supertick_id: tick,
        resolved: resolved.into_values().collect(),
        tile_changes,
        moves,
        chat,
        next_supertick_id,
        next_phase,
    }
}

impl World {
    /// Apply a resolution to the in-memory projection. The store commits the
    /// same effects transactionally first; this must stay in lockstep with
    /// `SimStore::commit_tick`.
    pub fn apply_resolution(&mut self, resolution: &TickResolution) {
        for change in &resolution.tile_changes {
            self.tiles
                .insert((change.x, change.y), change.new_color.clone());
        }
        for movement in &resolution.moves {
            if let Some(actor) = self.actors.get_mut(&movement.actor_id) {
                actor.x = movement.x;
                actor.y = movement.y;
                actor.facing = movement.facing;
            }
        }
        self.supertick_id = resolution.next_supertick_id;
        self.phase = resolution.next_phase;
    }
}
