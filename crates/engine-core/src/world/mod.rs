use std::collections::BTreeMap;

use contracts::{
    ActorRecord, Color, NamespaceId, Phase, ScoringRound, WorldConfig, BACKGROUND_COLOR,
};

pub mod context;
pub mod intake;
pub mod merge;
pub mod snapshot;

use snapshot::Snapshot;

/// Authoritative in-memory state for one namespace at the current tick.
///
/// Reconstructible from the store; the API layer treats it as a
/// write-through projection: merge effects commit to the store inside one
/// transaction before the same resolution is applied here.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub namespace: NamespaceId,
    pub supertick_id: u64,
    pub phase: Phase,
    pub goal: String,
    /// Tick index at which the namespace auto-pauses.
    pub epoch: u64,
    pub config: WorldConfig,
    /// Painted cells only; unset cells are the background color.
    pub tiles: BTreeMap<(u32, u32), Color>,
    pub actors: BTreeMap<String, ActorRecord>,
    pub last_adjudication: Option<ScoringRound>,
}

impl World {
    pub fn new(namespace: NamespaceId, config: WorldConfig) -> Self {
        Self {
            namespace,
            supertick_id: 0,
            phase: Phase::Setup,
            goal: config.goal.clone(),
            epoch: config.epoch,
            config,
            tiles: BTreeMap::new(),
            actors: BTreeMap::new(),
            last_adjudication: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.config.width) && y < i64::from(self.config.height)
    }

    pub fn tile_color(&self, x: u32, y: u32) -> Color {
        self.tiles
            .get(&(x, y))
            .cloned()
            .unwrap_or_else(Color::background)
    }

    /// Registered, non-eliminated actor occupying `(x, y)` in the current
    /// state, if any.
    pub fn occupant(&self, x: u32, y: u32) -> Option<&ActorRecord> {
        self.actors
            .values()
            .find(|actor| !actor.is_eliminated() && actor.x == x && actor.y == y)
    }

    /// Actors eligible to act this tick; the TIMEOUT fill applies to exactly
    /// this set.
    pub fn registered_actors(&self) -> impl Iterator<Item = &ActorRecord> {
        self.actors.values().filter(|actor| !actor.is_eliminated())
    }

    pub fn registered_actor_count(&self) -> usize {
        self.registered_actors().count()
    }

    /// Freeze the agent-visible view of the current tick. Tiles carrying the
    /// background color are omitted, matching the sparse store encoding.
    pub fn snapshot(&self) -> Snapshot {
        let tiles = self
            .tiles
            .iter()
            .filter(|(_, color)| color.as_str() != BACKGROUND_COLOR)
            .map(|(&(x, y), color)| snapshot::TileState {
                x,
                y,
                color: color.clone(),
            })
            .collect();
        let actors = self
            .registered_actors()
            .map(ActorRecord::public)
            .collect();

        Snapshot {
            namespace: self.namespace.as_str().to_string(),
            supertick_id: self.supertick_id,
            width: self.config.width,
            height: self.config.height,
            tiles,
            actors,
            goal: self.goal.clone(),
            last_adjudication: self.last_adjudication.clone(),
        }
    }

    /// Leave SETUP once the first actor is registered. Returns true if the
    /// phase changed.
    pub fn begin_collect_if_ready(&mut self) -> bool {
        if self.phase == Phase::Setup && self.registered_actor_count() > 0 {
            self.phase = Phase::Collect;
            return true;
        }
        false
    }

    /// Resume a paused namespace after the epoch was advanced past the
    /// current tick. Returns true if the phase changed.
    pub fn resume_if_epoch_allows(&mut self) -> bool {
        if self.phase == Phase::Paused && self.supertick_id < self.epoch {
            self.phase = Phase::Collect;
            return true;
        }
        false
    }

    /// Commit a scoring round: record it, apply contribution deltas when the
    /// balance system is enabled, and resume collection (or pause if the
    /// epoch gate fires).
    pub fn apply_scoring_round(&mut self, round: ScoringRound) {
        if self.config.points_enabled {
            for (actor_id, delta) in &round.contributions_by_actor {
                if let Some(actor) = self.actors.get_mut(actor_id) {
                    actor.points += delta;
                }
            }
        }
        self.last_adjudication = Some(round);
        self.phase = if self.supertick_id >= self.epoch {
            Phase::Paused
        } else {
            Phase::Collect
        };
    }
}

#[cfg(test)]
mod tests;
