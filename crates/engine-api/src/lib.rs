//! Namespace engine facade: couples the deterministic core to the SQLite
//! store with atomic tick commits, and exposes the HTTP/WebSocket surface.

mod memory;
mod registry;
mod server;
mod store;

use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use contracts::{
    ActionResponse, ActionSubmission, ActorRecord, Direction, JournalEntry, JournalStatus,
    NamespaceId, Outcome, Phase, RegisterActorRequest, RegisterActorResponse, ReplayResponse,
    ReplayTick, ScoringRound, ScoringSubmission, SimError, StatusResponse, WorldConfig,
};
use engine_core::{render_hud, resolve_tick, validate_submission, HudContext, World};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

pub use memory::{MemoryService, NullMemoryService};
pub use registry::Registry;
pub use server::{serve, ServerError};
pub use store::{SimStore, StoreError};

const COMMIT_BUSY_RETRIES: u32 = 3;
const COMMIT_BUSY_BACKOFF_MS: u64 = 50;

pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Discrete event fanned out over `WS /sim/{ns}/ws/live`. Fire-and-forget.
#[derive(Debug, Clone, Serialize)]
pub struct LiveEvent {
    pub namespace: String,
    pub event: String,
    pub supertick_id: u64,
    pub payload: Value,
}

impl LiveEvent {
    fn new(namespace: &NamespaceId, event: &str, supertick_id: u64, payload: Value) -> Self {
        Self {
            namespace: namespace.as_str().to_string(),
            event: event.to_string(),
            supertick_id,
            payload,
        }
    }
}

/// One namespace's engine: the in-memory world plus its store handle. All
/// mutating paths run behind the registry's per-namespace mutex; reads may
/// share it but never observe a mid-commit state.
#[derive(Debug)]
pub struct SimEngine {
    world: World,
    store: SimStore,
    context_hash: String,
    collect_started: Option<Instant>,
    /// Set after a failed tick commit; the namespace refuses further
    /// requests until the process restarts.
    fatal: Option<String>,
}

impl SimEngine {
    /// Open an existing namespace. The store file is created on first touch,
    /// but the world must have been initialized (`create`) before the
    /// namespace serves requests.
    pub fn open(data_dir: &Path, namespace: &NamespaceId) -> Result<Self, SimError> {
        let store = SimStore::open(data_dir, namespace)?;
        let Some(world) = store.load_world(namespace)? else {
            return Err(SimError::UnknownNamespace(namespace.to_string()));
        };
        let mut engine = Self {
            context_hash: String::new(),
            collect_started: None,
            fatal: None,
            world,
            store,
        };
        engine.refresh_after_state_change();
        Ok(engine)
    }

    /// Initialize a fresh namespace with the given configuration.
    pub fn create(
        data_dir: &Path,
        namespace: &NamespaceId,
        config: WorldConfig,
    ) -> Result<Self, SimError> {
        config.validate().map_err(SimError::InvalidConfig)?;
        let mut store = SimStore::open(data_dir, namespace)?;
        if store.is_initialized()? {
            return Err(SimError::NamespaceExists(namespace.to_string()));
        }
        store.init_world(&config)?;
        info!(namespace = %namespace, width = config.width, height = config.height, "namespace created");
        drop(store);
        Self::open(data_dir, namespace)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn context_hash(&self) -> &str {
        &self.context_hash
    }

    fn check_fatal(&self) -> Result<(), SimError> {
        match &self.fatal {
            Some(detail) => Err(SimError::Internal(format!(
                "namespace is paused after an internal error: {detail}"
            ))),
            None => Ok(()),
        }
    }

    /// Recompute the cached context hash and restart the collect deadline.
    /// Called after every committed state change, so the hash stays constant
    /// for the whole of one COLLECT phase.
    fn refresh_after_state_change(&mut self) {
        self.context_hash = self.world.snapshot().context_hash();
        self.collect_started = if self.world.phase == Phase::Collect
            && self.world.config.collect_timeout_ms > 0
        {
            Some(Instant::now())
        } else {
            None
        };
    }

    // -- agent surface ------------------------------------------------------

    /// SETUP ends at the first agent touch: registration stays open until an
    /// agent fetches context or submits, then COLLECT begins for tick 0.
    fn ensure_started(&mut self) -> Result<(), SimError> {
        if self.world.begin_collect_if_ready() {
            self.store.set_phase(self.world.phase)?;
            self.refresh_after_state_change();
            info!(
                namespace = %self.world.namespace,
                actors = self.world.registered_actor_count(),
                "collect phase started"
            );
        }
        Ok(())
    }

    pub fn context(
        &mut self,
        actor_id: &str,
        secret: &str,
        history_length: Option<usize>,
        chat_length: Option<usize>,
        memory: &dyn MemoryService,
    ) -> Result<contracts::ContextResponse, SimError> {
        self.check_fatal()?;
        self.ensure_started()?;

        let actor = self
            .world
            .actors
            .get(actor_id)
            .filter(|actor| !actor.is_eliminated())
            .ok_or_else(|| SimError::UnknownActor(actor_id.to_string()))?;
        if actor.secret != secret {
            return Err(SimError::AuthFailed(actor_id.to_string()));
        }

        let snapshot = self.world.snapshot();
        let history_ticks = history_length
            .unwrap_or(self.world.config.history_limit)
            .max(1) as u64;
        let history = if snapshot.supertick_id == 0 {
            Vec::new()
        } else {
            let from = snapshot.supertick_id.saturating_sub(history_ticks);
            self.store.audit_range(from, snapshot.supertick_id - 1)?
        };
        let chat = self
            .store
            .recent_chat(chat_length.unwrap_or(self.world.config.chat_limit))?;
        let memories = memory.recall(actor_id, &self.world.goal, 4);

        let hud = render_hud(&HudContext {
            snapshot: &snapshot,
            phase: self.world.phase,
            actor,
            history: &history,
            chat: &chat,
            memories: &memories,
            visibility: self.world.config.visibility,
        });

        Ok(contracts::ContextResponse {
            namespace: self.world.namespace.as_str().to_string(),
            supertick_id: snapshot.supertick_id,
            context_hash: self.context_hash.clone(),
            phase: self.world.phase,
            hud,
        })
    }

    /// Stage one action for the current tick. When the final registered
    /// actor submits, the merge runs inline and the response reports the
    /// advance.
    pub fn submit_action(
        &mut self,
        actor_id: &str,
        secret: &str,
        submission: &ActionSubmission,
    ) -> Result<(ActionResponse, Vec<LiveEvent>), SimError> {
        self.check_fatal()?;
        self.ensure_started()?;

        let tick = self.world.supertick_id;
        let already = self.store.journal_exists(tick, actor_id)?;
        let action = validate_submission(
            &self.world,
            &self.context_hash,
            actor_id,
            secret,
            submission,
            already,
        )?;

        let entry = JournalEntry {
            supertick_id: tick,
            actor_id: actor_id.to_string(),
            intent: action.intent(),
            params: action.params_value(),
            status: JournalStatus::Pending,
            result: None,
            llm_input: submission.llm_input.clone(),
            llm_output: submission.llm_output.clone(),
            submitted_at: now_ts(),
        };
        if let Err(err) = self.store.insert_journal(&entry) {
            return Err(match err {
                StoreError::DuplicateJournalRow => SimError::AlreadySubmitted {
                    actor_id: actor_id.to_string(),
                    supertick_id: tick,
                },
                other => other.into(),
            });
        }

        let mut events = vec![LiveEvent::new(
            &self.world.namespace,
            "submission_received",
            tick,
            json!({ "actor_id": actor_id, "intent": action.intent().as_str() }),
        )];

        let submitted = self.store.journal_count(tick)?;
        let total = self.world.registered_actor_count();
        let message = if submitted >= total {
            events.extend(self.merge_and_advance()?);
            format!(
                "Action '{}' submitted. All {total} agents submitted; tick advanced: {tick} -> {}",
                action.intent(),
                self.world.supertick_id
            )
        } else {
            format!(
                "Action '{}' submitted for agent {actor_id} at supertick {tick}. \
                 Waiting for agents: {submitted}/{total} submitted",
                action.intent()
            )
        };

        Ok((
            ActionResponse {
                status: "ok".to_string(),
                message,
            },
            events,
        ))
    }

    // -- tick machinery -----------------------------------------------------

    /// MERGE: resolve the staged journal against S(n) and commit every
    /// effect atomically, then step the in-memory world and re-stamp the
    /// context hash for the next COLLECT.
    fn merge_and_advance(&mut self) -> Result<Vec<LiveEvent>, SimError> {
        let tick = self.world.supertick_id;
        let now = now_ts();
        let entries = self.store.pending_journal(tick)?;
        let resolution = resolve_tick(&self.world, &entries, now);

        let mut attempt = 0;
        loop {
            match self.store.commit_tick(&resolution, &self.context_hash, now) {
                Ok(()) => break,
                Err(err) => {
                    let sim_err: SimError = err.into();
                    if sim_err == SimError::StoreBusy && attempt < COMMIT_BUSY_RETRIES {
                        attempt += 1;
                        warn!(
                            namespace = %self.world.namespace,
                            tick,
                            attempt,
                            "tick commit hit busy store; retrying"
                        );
                        std::thread::sleep(Duration::from_millis(COMMIT_BUSY_BACKOFF_MS));
                        continue;
                    }
                    let detail = sim_err.to_string();
                    error!(
                        namespace = %self.world.namespace,
                        tick,
                        %detail,
                        "tick commit failed; pausing namespace"
                    );
                    self.fatal = Some(detail.clone());
                    return Err(SimError::Internal(detail));
                }
            }
        }

        let summary = json!({
            "resolved": resolution.resolved.len(),
            "success": count_outcome(&resolution, Outcome::Success),
            "conflict_lost": count_outcome(&resolution, Outcome::ConflictLost),
            "invalid": count_outcome(&resolution, Outcome::Invalid),
            "no_op": count_outcome(&resolution, Outcome::NoOp),
            "timeout": count_outcome(&resolution, Outcome::Timeout),
        });

        self.world.apply_resolution(&resolution);
        self.refresh_after_state_change();
        info!(
            namespace = %self.world.namespace,
            tick,
            next_tick = self.world.supertick_id,
            phase = %self.world.phase,
            "tick resolved"
        );

        let mut events = vec![LiveEvent::new(
            &self.world.namespace,
            "tick_resolved",
            tick,
            summary,
        )];
        match self.world.phase {
            Phase::Collect => events.push(self.tick_started_event()),
            Phase::PausedForScoring => events.push(LiveEvent::new(
                &self.world.namespace,
                "paused_for_scoring",
                self.world.supertick_id,
                json!({ "scoring_interval": self.world.config.scoring_interval }),
            )),
            _ => {}
        }
        Ok(events)
    }

    fn tick_started_event(&self) -> LiveEvent {
        LiveEvent::new(
            &self.world.namespace,
            "tick_started",
            self.world.supertick_id,
            json!({ "context_hash": self.context_hash, "phase": self.world.phase.as_str() }),
        )
    }

    /// Fire the COLLECT deadline when configured and elapsed: silent actors
    /// become TIMEOUT rows and the tick merges.
    pub fn check_collect_deadline(&mut self) -> Result<Vec<LiveEvent>, SimError> {
        if self.fatal.is_some()
            || self.world.phase != Phase::Collect
            || self.world.config.collect_timeout_ms == 0
        {
            return Ok(Vec::new());
        }
        let Some(started) = self.collect_started else {
            self.collect_started = Some(Instant::now());
            return Ok(Vec::new());
        };
        if started.elapsed() < Duration::from_millis(self.world.config.collect_timeout_ms) {
            return Ok(Vec::new());
        }
        warn!(
            namespace = %self.world.namespace,
            tick = self.world.supertick_id,
            "collect deadline elapsed; filling TIMEOUT entries"
        );
        self.merge_and_advance()
    }

    /// Admin: merge immediately, synthesizing TIMEOUTs for silent actors.
    pub fn force_advance(&mut self) -> Result<Vec<LiveEvent>, SimError> {
        self.check_fatal()?;
        if self.world.phase != Phase::Collect {
            return Err(SimError::PhaseMismatch {
                phase: self.world.phase,
            });
        }
        self.merge_and_advance()
    }

    // -- adjudication -------------------------------------------------------

    pub fn submit_scoring(
        &mut self,
        submission: ScoringSubmission,
    ) -> Result<Vec<LiveEvent>, SimError> {
        self.check_fatal()?;
        if self.world.phase != Phase::PausedForScoring {
            return Err(SimError::PhaseMismatch {
                phase: self.world.phase,
            });
        }
        if submission.supertick_id != self.world.supertick_id {
            return Err(SimError::SupertickMismatch {
                expected: self.world.supertick_id,
                got: submission.supertick_id,
            });
        }

        let round = ScoringRound {
            supertick_id: submission.supertick_id,
            selected_tiles: submission.selected_tiles,
            contributions_by_actor: submission.contributions_by_actor,
            rationale: submission.rationale,
            feedback: submission.feedback,
            created_at: now_ts(),
        };
        let next_phase = if self.world.supertick_id >= self.world.epoch {
            Phase::Paused
        } else {
            Phase::Collect
        };
        self.store
            .commit_scoring(&round, self.world.config.points_enabled, next_phase)?;
        self.world.apply_scoring_round(round.clone());
        self.refresh_after_state_change();
        info!(
            namespace = %self.world.namespace,
            tick = round.supertick_id,
            tiles = round.selected_tiles.len(),
            "scoring round committed"
        );

        let mut events = vec![LiveEvent::new(
            &self.world.namespace,
            "scoring_committed",
            round.supertick_id,
            json!({
                "selected_tiles": round.selected_tiles.len(),
                "contributions": round.contributions_by_actor,
            }),
        )];
        if self.world.phase == Phase::Collect {
            events.push(self.tick_started_event());
        }
        Ok(events)
    }

    // -- admin surface ------------------------------------------------------

    pub fn register_actor(
        &mut self,
        request: RegisterActorRequest,
    ) -> Result<(RegisterActorResponse, Vec<LiveEvent>), SimError> {
        self.check_fatal()?;
        match self.world.phase {
            Phase::Setup | Phase::Paused => {}
            phase => return Err(SimError::PhaseMismatch { phase }),
        }

        let (x, y) = match (request.x, request.y) {
            (Some(x), Some(y)) => {
                if !self.world.in_bounds(i64::from(x), i64::from(y)) {
                    return Err(SimError::InvalidConfig(format!(
                        "spawn position ({x}, {y}) is out of bounds"
                    )));
                }
                (x, y)
            }
            _ => self.first_free_cell().ok_or_else(|| {
                SimError::InvalidConfig("no free cells left for a new actor".to_string())
            })?,
        };

        let actor = ActorRecord {
            id: request.actor_id.clone(),
            secret: request
                .secret
                .filter(|secret| !secret.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
            x,
            y,
            facing: request.facing.unwrap_or(Direction::N),
            scopes: request
                .scopes
                .map(|scopes| scopes.into_iter().collect())
                .unwrap_or_else(ActorRecord::default_scopes),
            custom_instructions: request.custom_instructions,
            points: 0,
            eliminated_at: None,
        };

        self.store
            .insert_actor(&actor, self.world.supertick_id, now_ts())?;
        self.world.actors.insert(actor.id.clone(), actor.clone());
        self.refresh_after_state_change();
        info!(
            namespace = %self.world.namespace,
            actor_id = %actor.id,
            x,
            y,
            "actor registered"
        );

        Ok((
            RegisterActorResponse {
                actor_id: actor.id,
                secret: actor.secret,
            },
            Vec::new(),
        ))
    }

    fn first_free_cell(&self) -> Option<(u32, u32)> {
        for y in 0..self.world.height() {
            for x in 0..self.world.width() {
                if self.world.occupant(x, y).is_none() {
                    return Some((x, y));
                }
            }
        }
        None
    }

    /// Raise the epoch; a namespace paused at the old epoch resumes
    /// collecting.
    pub fn set_epoch(&mut self, epoch: u64) -> Result<Vec<LiveEvent>, SimError> {
        self.check_fatal()?;
        if epoch == 0 {
            return Err(SimError::InvalidConfig(
                "epoch must be a positive tick index".to_string(),
            ));
        }
        self.store.set_meta("epoch", &epoch.to_string())?;
        self.world.epoch = epoch;
        self.world.config.epoch = epoch;

        let mut events = Vec::new();
        if self.world.resume_if_epoch_allows() {
            self.store.set_phase(self.world.phase)?;
            self.refresh_after_state_change();
            events.push(self.tick_started_event());
        }
        Ok(events)
    }

    pub fn status(&self) -> Result<StatusResponse, SimError> {
        Ok(StatusResponse {
            namespace: self.world.namespace.as_str().to_string(),
            supertick_id: self.world.supertick_id,
            phase: self.world.phase,
            context_hash: self.context_hash.clone(),
            epoch: self.world.epoch,
            actor_count: self.world.registered_actor_count(),
            submitted_count: self.store.journal_count(self.world.supertick_id)?,
        })
    }

    // -- replay -------------------------------------------------------------

    /// Tick-range export of the append-only record: audit rows, tile
    /// updates, actor positions, chat, and scoring rounds.
    pub fn replay(&self, from_tick: u64, to_tick: u64) -> Result<ReplayResponse, SimError> {
        if to_tick < from_tick {
            return Err(SimError::InvalidConfig(format!(
                "to_tick must be >= from_tick (from={from_tick} to={to_tick})"
            )));
        }

        let actions = self.store.audit_range(from_tick, to_tick)?;
        let tile_updates = self.store.tile_history_range(from_tick, to_tick)?;
        let actor_positions = self.store.actor_history_range(from_tick, to_tick)?;
        let chat = self.store.chat_range(from_tick, to_tick)?;
        let scoring = self.store.scoring_range(from_tick, to_tick)?;

        let mut ticks = Vec::new();
        for tick in from_tick..=to_tick {
            let bucket = ReplayTick {
                supertick_id: tick,
                actions: actions
                    .iter()
                    .filter(|record| record.supertick_id == tick)
                    .cloned()
                    .collect(),
                tile_updates: tile_updates
                    .iter()
                    .filter(|change| change.supertick_id == tick)
                    .cloned()
                    .collect(),
                actor_positions: actor_positions
                    .iter()
                    .filter(|record| record.supertick_id == tick)
                    .cloned()
                    .collect(),
                chat: chat
                    .iter()
                    .filter(|message| message.supertick_id == tick)
                    .cloned()
                    .collect(),
                scoring: scoring
                    .iter()
                    .filter(|round| round.supertick_id == tick)
                    .cloned()
                    .collect(),
            };
            let empty = bucket.actions.is_empty()
                && bucket.tile_updates.is_empty()
                && bucket.actor_positions.is_empty()
                && bucket.chat.is_empty()
                && bucket.scoring.is_empty();
            if !empty {
                ticks.push(bucket);
            }
        }

        Ok(ReplayResponse {
            namespace: self.world.namespace.as_str().to_string(),
            from_tick,
            to_tick,
            ticks,
        })
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &SimStore {
        &self.store
    }
}

fn count_outcome(resolution: &engine_core::TickResolution, outcome: Outcome) -> usize {
    resolution
        .resolved
        .iter()
        .filter(|resolved| resolved.result.outcome == outcome)
        .count()
}

#[cfg(test)]
mod tests;
