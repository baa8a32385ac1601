use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use contracts::{
    ActionResult, ActorPositionRecord, ActorRecord, AuditRecord, ChatMessage, Color, Direction,
    GridPos, Intent, JournalEntry, JournalStatus, NamespaceId, Phase, ScoringRound, SimError,
    TileChange, Visibility, WorldConfig, EXPECTED_SCHEMA_VERSION,
};
use engine_core::{TickResolution, World};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tiles (
        x INTEGER NOT NULL,
        y INTEGER NOT NULL,
        color TEXT NOT NULL,
        PRIMARY KEY (x, y)
    );

    CREATE TABLE IF NOT EXISTS actors (
        id TEXT PRIMARY KEY,
        secret TEXT NOT NULL,
        x INTEGER NOT NULL,
        y INTEGER NOT NULL,
        facing TEXT NOT NULL,
        scopes TEXT NOT NULL,
        custom_instructions TEXT NOT NULL DEFAULT '',
        points INTEGER NOT NULL DEFAULT 0,
        eliminated_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS journal (
        supertick_id INTEGER NOT NULL,
        actor_id TEXT NOT NULL,
        intent TEXT NOT NULL,
        params_json TEXT NOT NULL,
        status TEXT NOT NULL,
        result_json TEXT,
        llm_input TEXT,
        llm_output TEXT,
        submitted_at INTEGER NOT NULL,
        PRIMARY KEY (supertick_id, actor_id)
    );

    CREATE TABLE IF NOT EXISTS audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        supertick_id INTEGER NOT NULL,
        actor_id TEXT NOT NULL,
        action_type TEXT NOT NULL,
        params_json TEXT NOT NULL,
        result_json TEXT NOT NULL,
        context_hash TEXT NOT NULL,
        llm_input TEXT,
        llm_output TEXT,
        submitted_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tile_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        x INTEGER NOT NULL,
        y INTEGER NOT NULL,
        supertick_id INTEGER NOT NULL,
        actor_id TEXT NOT NULL,
        old_color TEXT NOT NULL,
        new_color TEXT NOT NULL,
        action_type TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS actor_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        actor_id TEXT NOT NULL,
        supertick_id INTEGER NOT NULL,
        x INTEGER NOT NULL,
        y INTEGER NOT NULL,
        facing TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS chat (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        supertick_id INTEGER NOT NULL,
        from_id TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS scoring_rounds (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        supertick_id INTEGER NOT NULL,
        selected_tiles_json TEXT NOT NULL,
        contributions_json TEXT NOT NULL,
        rationale TEXT NOT NULL,
        feedback TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
";

const INDEXES_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_journal_tick ON journal(supertick_id);
    CREATE INDEX IF NOT EXISTS idx_audit_tick ON audit(supertick_id, actor_id);
    CREATE INDEX IF NOT EXISTS idx_tile_history_tick ON tile_history(supertick_id);
    CREATE INDEX IF NOT EXISTS idx_actor_history_actor_tick ON actor_history(actor_id, supertick_id);
    CREATE INDEX IF NOT EXISTS idx_chat_tick ON chat(supertick_id);
    CREATE INDEX IF NOT EXISTS idx_scoring_tick ON scoring_rounds(supertick_id);
";

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    SchemaMismatch { expected: i32, found: i32 },
    DuplicateJournalRow,
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::SchemaMismatch { expected, found } => {
                write!(f, "schema version mismatch: expected {expected}, got {found}")
            }
            Self::DuplicateJournalRow => f.write_str("journal row already exists"),
            Self::Corrupt(detail) => write!(f, "corrupt store state: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<StoreError> for SimError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Sqlite(err) if is_busy(&err) => Self::StoreBusy,
            StoreError::Sqlite(err) => Self::Internal(format!("sqlite error: {err}")),
            StoreError::Serde(err) => Self::Internal(format!("serde error: {err}")),
            StoreError::SchemaMismatch { expected, found } => {
                Self::SchemaMismatch { expected, found }
            }
            StoreError::DuplicateJournalRow => {
                Self::Internal("journal row already exists".to_string())
            }
            StoreError::Corrupt(detail) => Self::Internal(detail),
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// One SQLite file per namespace. Writers use WAL; busy contention waits for
/// `busy_timeout` and then surfaces as `StoreBusy`. The schema is applied on
/// first open and `PRAGMA user_version` is verified on every open.
#[derive(Debug)]
pub struct SimStore {
    conn: Connection,
}

impl SimStore {
    pub fn db_path(data_dir: &Path, namespace: &NamespaceId) -> PathBuf {
        data_dir.join(format!("{namespace}.db"))
    }

    pub fn open(data_dir: &Path, namespace: &NamespaceId) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|err| StoreError::Corrupt(format!("cannot create data dir: {err}")))?;
        let conn = Connection::open(Self::db_path(data_dir, namespace))?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "busy_timeout", 5_000)?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version == 0 {
            self.conn.execute_batch(SCHEMA_SQL)?;
            self.conn.execute_batch(INDEXES_SQL)?;
            self.conn
                .pragma_update(None, "user_version", EXPECTED_SCHEMA_VERSION)?;
            return Ok(());
        }

        if version != EXPECTED_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                expected: EXPECTED_SCHEMA_VERSION,
                found: version,
            });
        }
        Ok(())
    }

    // -- world bootstrap and load ------------------------------------------

    /// True once `init_world` has run for this file.
    pub fn is_initialized(&self) -> Result<bool, StoreError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'supertick_id'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn init_world(&mut self, config: &WorldConfig) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let meta = [
            ("supertick_id", "0".to_string()),
            ("phase", Phase::Setup.as_str().to_string()),
            ("goal", config.goal.clone()),
            ("width", config.width.to_string()),
            ("height", config.height.to_string()),
            ("epoch", config.epoch.to_string()),
            ("scoring_interval", config.scoring_interval.to_string()),
            ("collect_timeout_ms", config.collect_timeout_ms.to_string()),
            ("visibility", config.visibility.to_meta_value()),
            (
                "points_enabled",
                if config.points_enabled { "1" } else { "0" }.to_string(),
            ),
            ("chat_limit", config.chat_limit.to_string()),
            ("history_limit", config.history_limit.to_string()),
            ("last_adjudication_json", "null".to_string()),
            ("schema_version", EXPECTED_SCHEMA_VERSION.to_string()),
        ];
        for (key, value) in meta {
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_world(&self, namespace: &NamespaceId) -> Result<Option<World>, StoreError> {
        let mut meta = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT key, value FROM meta")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (key, value) = row?;
                meta.insert(key, value);
            }
        }
        if !meta.contains_key("supertick_id") {
            return Ok(None);
        }

        let get_u64 = |key: &str, fallback: u64| -> u64 {
            meta.get(key)
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(fallback)
        };
        let config = WorldConfig {
            width: get_u64("width", 64) as u32,
            height: get_u64("height", 64) as u32,
            epoch: get_u64("epoch", 10),
            goal: meta.get("goal").cloned().unwrap_or_default(),
            scoring_interval: get_u64("scoring_interval", 0),
            collect_timeout_ms: get_u64("collect_timeout_ms", 0),
            visibility: meta
                .get("visibility")
                .and_then(|raw| Visibility::from_meta_value(raw))
                .unwrap_or(Visibility::Full),
            points_enabled: meta.get("points_enabled").map(String::as_str) != Some("0"),
            chat_limit: get_u64("chat_limit", 50) as usize,
            history_limit: get_u64("history_limit", 1) as usize,
        };

        let mut world = World::new(namespace.clone(), config);
        world.supertick_id = get_u64("supertick_id", 0);
        world.epoch = get_u64("epoch", 10);
        world.goal = meta.get("goal").cloned().unwrap_or_default();
        world.phase = meta
            .get("phase")
            .and_then(|raw| Phase::from_str(raw))
            .unwrap_or(Phase::Setup);
        world.last_adjudication = meta
            .get("last_adjudication_json")
            .filter(|raw| raw.as_str() != "null")
            .map(|raw| serde_json::from_str::<ScoringRound>(raw))
            .transpose()?;

        let mut stmt = self.conn.prepare("SELECT x, y, color FROM tiles")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (x, y, color) = row?;
            let color = Color::parse(&color)
                .map_err(|detail| StoreError::Corrupt(format!("bad tile color: {detail}")))?;
            world.tiles.insert((x as u32, y as u32), color);
        }

        for actor in self.load_actors()? {
            world.actors.insert(actor.id.clone(), actor);
        }

        Ok(Some(world))
    }

    fn load_actors(&self) -> Result<Vec<ActorRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, secret, x, y, facing, scopes, custom_instructions, points, eliminated_at
             FROM actors ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, Option<i64>>(8)?,
            ))
        })?;

        let mut actors = Vec::new();
        for row in rows {
            let (id, secret, x, y, facing, scopes, custom_instructions, points, eliminated_at) =
                row?;
            actors.push(ActorRecord {
                id,
                secret,
                x: x as u32,
                y: y as u32,
                facing: Direction::from_str(&facing).unwrap_or(Direction::N),
                scopes: serde_json::from_str(&scopes)?,
                custom_instructions,
                points,
                eliminated_at,
            });
        }
        Ok(actors)
    }

    pub fn insert_actor(
        &mut self,
        actor: &ActorRecord,
        supertick_id: u64,
        now: i64,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO actors
                 (id, secret, x, y, facing, scopes, custom_instructions, points, eliminated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                actor.id,
                actor.secret,
                i64::from(actor.x),
                i64::from(actor.y),
                actor.facing.as_str(),
                serde_json::to_string(&actor.scopes)?,
                actor.custom_instructions,
                actor.points,
                actor.eliminated_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO actor_history (actor_id, supertick_id, x, y, facing, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                actor.id,
                supertick_id as i64,
                i64::from(actor.x),
                i64::from(actor.y),
                actor.facing.as_str(),
                now,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn set_phase(&self, phase: Phase) -> Result<(), StoreError> {
        self.set_meta("phase", phase.as_str())
    }

    // -- journal ------------------------------------------------------------

    pub fn journal_exists(&self, supertick_id: u64, actor_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM journal WHERE supertick_id = ?1 AND actor_id = ?2",
                params![supertick_id as i64, actor_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn journal_count(&self, supertick_id: u64) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT actor_id) FROM journal WHERE supertick_id = ?1",
            params![supertick_id as i64],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Insert a `pending` journal row; the primary key makes duplicates
    /// impossible even across racing submissions.
    pub fn insert_journal(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "INSERT INTO journal
                 (supertick_id, actor_id, intent, params_json, status, result_json,
                  llm_input, llm_output, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8)",
            params![
                entry.supertick_id as i64,
                entry.actor_id,
                entry.intent.as_str(),
                serde_json::to_string(&entry.params)?,
                entry.status.as_str(),
                entry.llm_input,
                entry.llm_output,
                entry.submitted_at,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_constraint(&err) => Err(StoreError::DuplicateJournalRow),
            Err(err) => Err(err.into()),
        }
    }

    pub fn pending_journal(&self, supertick_id: u64) -> Result<Vec<JournalEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT supertick_id, actor_id, intent, params_json, status, result_json,
                    llm_input, llm_output, submitted_at
             FROM journal
             WHERE supertick_id = ?1 AND status = 'pending'
             ORDER BY actor_id ASC",
        )?;
        let rows = stmt.query_map(params![supertick_id as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (tick, actor_id, intent, params, status, result, llm_input, llm_output, at) = row?;
            entries.push(JournalEntry {
                supertick_id: tick as u64,
                actor_id,
                intent: Intent::from_keyword(&intent)
                    .ok_or_else(|| StoreError::Corrupt(format!("bad journal intent: {intent}")))?,
                params: serde_json::from_str(&params)?,
                status: JournalStatus::from_str(&status)
                    .ok_or_else(|| StoreError::Corrupt(format!("bad journal status: {status}")))?,
                result: result
                    .map(|raw| serde_json::from_str::<ActionResult>(&raw))
                    .transpose()?,
                llm_input,
                llm_output,
                submitted_at: at,
            });
        }
        Ok(entries)
    }

    // -- tick commit --------------------------------------------------------

    /// Apply every effect of one merge in a single transaction: journal
    /// finalization (including synthesized TIMEOUT rows), audit append, tile
    /// and tile-history writes, actor moves with position history, chat
    /// appends, and the meta supertick/phase advance.
    pub fn commit_tick(
        &mut self,
        resolution: &TickResolution,
        context_hash: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let tick = resolution.supertick_id as i64;

        for resolved in &resolution.resolved {
            let result_json = serde_json::to_string(&resolved.result)?;
            let params_json = serde_json::to_string(&resolved.params)?;
            let status = resolved.journal_status().as_str();

            if resolved.synthesized {
                tx.execute(
                    "INSERT OR IGNORE INTO journal
                         (supertick_id, actor_id, intent, params_json, status, result_json,
                          llm_input, llm_output, submitted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, ?7)",
                    params![
                        tick,
                        resolved.actor_id,
                        resolved.intent.as_str(),
                        params_json,
                        status,
                        result_json,
                        resolved.submitted_at,
                    ],
                )?;
            } else {
                tx.execute(
                    "UPDATE journal SET status = ?1, result_json = ?2
                     WHERE supertick_id = ?3 AND actor_id = ?4",
                    params![status, result_json, tick, resolved.actor_id],
                )?;
            }

            tx.execute(
                "INSERT INTO audit
                     (supertick_id, actor_id, action_type, params_json, result_json,
                      context_hash, llm_input, llm_output, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    tick,
                    resolved.actor_id,
                    resolved.intent.as_str(),
                    params_json,
                    result_json,
                    context_hash,
                    resolved.llm_input,
                    resolved.llm_output,
                    resolved.submitted_at,
                ],
            )?;
        }

        for change in &resolution.tile_changes {
            tx.execute(
                "INSERT OR REPLACE INTO tiles (x, y, color) VALUES (?1, ?2, ?3)",
                params![
                    i64::from(change.x),
                    i64::from(change.y),
                    change.new_color.as_str()
                ],
            )?;
            tx.execute(
                "INSERT INTO tile_history
                     (x, y, supertick_id, actor_id, old_color, new_color, action_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    i64::from(change.x),
                    i64::from(change.y),
                    tick,
                    change.actor_id,
                    change.old_color.as_str(),
                    change.new_color.as_str(),
                    change.action_type.as_str(),
                    change.created_at,
                ],
            )?;
        }

        for movement in &resolution.moves {
            tx.execute(
                "UPDATE actors SET x = ?1, y = ?2, facing = ?3 WHERE id = ?4",
                params![
                    i64::from(movement.x),
                    i64::from(movement.y),
                    movement.facing.as_str(),
                    movement.actor_id,
                ],
            )?;
            tx.execute(
                "INSERT INTO actor_history (actor_id, supertick_id, x, y, facing, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    movement.actor_id,
                    tick,
                    i64::from(movement.x),
                    i64::from(movement.y),
                    movement.facing.as_str(),
                    now,
                ],
            )?;
        }

        for message in &resolution.chat {
            tx.execute(
                "INSERT INTO chat (supertick_id, from_id, message, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    tick,
                    message.from_id,
                    message.message,
                    message.created_at
                ],
            )?;
        }

        tx.execute(
            "UPDATE meta SET value = ?1 WHERE key = 'supertick_id'",
            params![resolution.next_supertick_id.to_string()],
        )?;
        tx.execute(
            "UPDATE meta SET value = ?1 WHERE key = 'phase'",
            params![resolution.next_phase.as_str()],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Commit one adjudication round: the append-only row, point deltas when
    /// enabled, the `last_adjudication` record, and the resume phase.
    pub fn commit_scoring(
        &mut self,
        round: &ScoringRound,
        points_enabled: bool,
        next_phase: Phase,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO scoring_rounds
                 (supertick_id, selected_tiles_json, contributions_json, rationale, feedback, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                round.supertick_id as i64,
                serde_json::to_string(&round.selected_tiles)?,
                serde_json::to_string(&round.contributions_by_actor)?,
                round.rationale,
                round.feedback,
                round.created_at,
            ],
        )?;
        if points_enabled {
            for (actor_id, delta) in &round.contributions_by_actor {
                tx.execute(
                    "UPDATE actors SET points = points + ?1 WHERE id = ?2",
                    params![delta, actor_id],
                )?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('last_adjudication_json', ?1)",
            params![serde_json::to_string(round)?],
        )?;
        tx.execute(
            "UPDATE meta SET value = ?1 WHERE key = 'phase'",
            params![next_phase.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -- read queries -------------------------------------------------------

    pub fn audit_range(&self, from_tick: u64, to_tick: u64) -> Result<Vec<AuditRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT supertick_id, actor_id, action_type, params_json, result_json,
                    context_hash, llm_input, llm_output, submitted_at
             FROM audit
             WHERE supertick_id >= ?1 AND supertick_id <= ?2
             ORDER BY supertick_id ASC, actor_id ASC",
        )?;
        let rows = stmt.query_map(params![from_tick as i64, to_tick as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (tick, actor_id, action, params, result, hash, llm_input, llm_output, at) = row?;
            records.push(AuditRecord {
                supertick_id: tick as u64,
                actor_id,
                action_type: Intent::from_keyword(&action)
                    .ok_or_else(|| StoreError::Corrupt(format!("bad audit action: {action}")))?,
                params: serde_json::from_str(&params)?,
                result: serde_json::from_str(&result)?,
                context_hash: hash,
                llm_input,
                llm_output,
                submitted_at: at,
            });
        }
        Ok(records)
    }

    pub fn recent_chat(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT supertick_id, from_id, message, created_at
             FROM chat ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ChatMessage {
                supertick_id: row.get::<_, i64>(0)? as u64,
                from_id: row.get(1)?,
                message: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub fn chat_range(&self, from_tick: u64, to_tick: u64) -> Result<Vec<ChatMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT supertick_id, from_id, message, created_at
             FROM chat
             WHERE supertick_id >= ?1 AND supertick_id <= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![from_tick as i64, to_tick as i64], |row| {
            Ok(ChatMessage {
                supertick_id: row.get::<_, i64>(0)? as u64,
                from_id: row.get(1)?,
                message: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn tile_history_range(
        &self,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<TileChange>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT x, y, supertick_id, actor_id, old_color, new_color, action_type, created_at
             FROM tile_history
             WHERE supertick_id >= ?1 AND supertick_id <= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![from_tick as i64, to_tick as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;

        let mut changes = Vec::new();
        for row in rows {
            let (x, y, tick, actor_id, old_color, new_color, action, created_at) = row?;
            changes.push(TileChange {
                x: x as u32,
                y: y as u32,
                supertick_id: tick as u64,
                actor_id,
                old_color: Color::parse(&old_color)
                    .map_err(|detail| StoreError::Corrupt(format!("bad old color: {detail}")))?,
                new_color: Color::parse(&new_color)
                    .map_err(|detail| StoreError::Corrupt(format!("bad new color: {detail}")))?,
                action_type: Intent::from_keyword(&action)
                    .ok_or_else(|| StoreError::Corrupt(format!("bad history action: {action}")))?,
                created_at,
            });
        }
        Ok(changes)
    }

    pub fn actor_history_range(
        &self,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<ActorPositionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT actor_id, supertick_id, x, y, facing, created_at
             FROM actor_history
             WHERE supertick_id >= ?1 AND supertick_id <= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![from_tick as i64, to_tick as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (actor_id, tick, x, y, facing, created_at) = row?;
            records.push(ActorPositionRecord {
                actor_id,
                supertick_id: tick as u64,
                x: x as u32,
                y: y as u32,
                facing: Direction::from_str(&facing).unwrap_or(Direction::N),
                created_at,
            });
        }
        Ok(records)
    }

    pub fn scoring_range(
        &self,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<ScoringRound>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT supertick_id, selected_tiles_json, contributions_json, rationale, feedback, created_at
             FROM scoring_rounds
             WHERE supertick_id >= ?1 AND supertick_id <= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![from_tick as i64, to_tick as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut rounds = Vec::new();
        for row in rows {
            let (tick, tiles, contributions, rationale, feedback, created_at) = row?;
            rounds.push(ScoringRound {
                supertick_id: tick as u64,
                selected_tiles: serde_json::from_str::<Vec<GridPos>>(&tiles)?,
                contributions_by_actor: serde_json::from_str(&contributions)?,
                rationale,
                feedback,
                created_at,
            });
        }
        Ok(rounds)
    }

    /// Reconstruct tile state at a tick by replaying `tile_history` forward
    /// over the implicit background. Used by replay export and consistency
    /// tests.
    pub fn tiles_at_tick(
        &self,
        supertick_id: u64,
    ) -> Result<BTreeMap<(u32, u32), Color>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT x, y, new_color FROM tile_history
             WHERE supertick_id <= ?1
             ORDER BY supertick_id ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![supertick_id as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut tiles = BTreeMap::new();
        for row in rows {
            let (x, y, color) = row?;
            let color = Color::parse(&color)
                .map_err(|detail| StoreError::Corrupt(format!("bad history color: {detail}")))?;
            tiles.insert((x as u32, y as u32), color);
        }
        Ok(tiles)
    }

    pub fn raw_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}
