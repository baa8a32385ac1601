//! Cross-boundary contracts for the Monument BSP engine, store, and API.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod action;

pub use action::{Action, MAX_SPEAK_LEN};

/// Must match `PRAGMA user_version` written by the store schema script.
pub const EXPECTED_SCHEMA_VERSION: i32 = 7;

/// Color of a tile nothing has painted yet.
pub const BACKGROUND_COLOR: &str = "#FFFFFF";

pub const MAX_NAMESPACE_LEN: usize = 64;

/// Namespace identifier: `^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$`.
///
/// The identifier is never used as a path directly; the store appends a
/// fixed `.db` suffix under the data directory after this gate passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(String);

impl NamespaceId {
    pub fn parse(raw: &str) -> Result<Self, SimError> {
        let mut chars = raw.chars();
        let valid_head = chars
            .next()
            .map(|head| head.is_ascii_alphanumeric())
            .unwrap_or(false);
        let valid_tail =
            chars.all(|tail| tail.is_ascii_alphanumeric() || tail == '_' || tail == '-');

        if !valid_head || !valid_tail || raw.len() > MAX_NAMESPACE_LEN {
            return Err(SimError::InvalidNamespace(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Setup,
    Collect,
    Merge,
    Broadcast,
    PausedForScoring,
    Paused,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Collect => "COLLECT",
            Self::Merge => "MERGE",
            Self::Broadcast => "BROADCAST",
            Self::PausedForScoring => "PAUSED_FOR_SCORING",
            Self::Paused => "PAUSED",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "SETUP" => Some(Self::Setup),
            "COLLECT" => Some(Self::Collect),
            "MERGE" => Some(Self::Merge),
            "BROADCAST" => Some(Self::Broadcast),
            "PAUSED_FOR_SCORING" => Some(Self::PausedForScoring),
            "PAUSED" => Some(Self::Paused),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    N,
    S,
    E,
    W,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::N => "N",
            Self::S => "S",
            Self::E => "E",
            Self::W => "W",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "N" => Some(Self::N),
            "S" => Some(Self::S),
            "E" => Some(Self::E),
            "W" => Some(Self::W),
            _ => None,
        }
    }

    /// Grid delta with y growing southward.
    pub fn offset(self) -> (i64, i64) {
        match self {
            Self::N => (0, -1),
            Self::S => (0, 1),
            Self::E => (1, 0),
            Self::W => (-1, 0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `#RRGGBB`, canonicalized to uppercase hex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix('#')
            .ok_or_else(|| format!("color must start with '#': '{trimmed}'"))?;
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("color must be #RRGGBB: '{trimmed}'"));
        }
        Ok(Self(format!("#{}", hex.to_ascii_uppercase())))
    }

    pub fn background() -> Self {
        Self(BACKGROUND_COLOR.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Move,
    Paint,
    Speak,
    Wait,
    Skip,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Move => "MOVE",
            Self::Paint => "PAINT",
            Self::Speak => "SPEAK",
            Self::Wait => "WAIT",
            Self::Skip => "SKIP",
        }
    }

    pub fn from_keyword(raw: &str) -> Option<Self> {
        match raw {
            "MOVE" => Some(Self::Move),
            "PAINT" => Some(Self::Paint),
            "SPEAK" => Some(Self::Speak),
            "WAIT" => Some(Self::Wait),
            "SKIP" => Some(Self::Skip),
            _ => None,
        }
    }

    pub fn all() -> [Intent; 5] {
        [Self::Move, Self::Paint, Self::Speak, Self::Wait, Self::Skip]
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine resolved, per journal row. `TIMEOUT` rows are
/// engine-synthesized; `NO_OP` is a valid action with no observable change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Invalid,
    ConflictLost,
    Timeout,
    NoOp,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Invalid => "INVALID",
            Self::ConflictLost => "CONFLICT_LOST",
            Self::Timeout => "TIMEOUT",
            Self::NoOp => "NO_OP",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    Pending,
    Committed,
    Rejected,
}

impl JournalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "committed" => Some(Self::Committed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridPos {
    pub x: u32,
    pub y: u32,
}

impl GridPos {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResult {
    pub outcome: Outcome,
    pub reason: String,
    #[serde(default)]
    pub points_delta: i64,
}

impl ActionResult {
    pub fn new(outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
            points_delta: 0,
        }
    }

    pub fn success(reason: impl Into<String>) -> Self {
        Self::new(Outcome::Success, reason)
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::new(Outcome::Invalid, reason)
    }

    pub fn conflict_lost(reason: impl Into<String>) -> Self {
        Self::new(Outcome::ConflictLost, reason)
    }

    pub fn timeout() -> Self {
        Self::new(Outcome::Timeout, "No action submitted before deadline")
    }

    pub fn no_op(reason: impl Into<String>) -> Self {
        Self::new(Outcome::NoOp, reason)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorRecord {
    pub id: String,
    pub secret: String,
    pub x: u32,
    pub y: u32,
    pub facing: Direction,
    pub scopes: BTreeSet<Intent>,
    #[serde(default)]
    pub custom_instructions: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub eliminated_at: Option<i64>,
}

impl ActorRecord {
    pub fn is_eliminated(&self) -> bool {
        self.eliminated_at.is_some()
    }

    pub fn public(&self) -> ActorPublic {
        ActorPublic {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            facing: self.facing,
            points: self.points,
        }
    }

    pub fn default_scopes() -> BTreeSet<Intent> {
        Intent::all().into_iter().collect()
    }
}

/// The actor fields agents can see; exactly these participate in the
/// context hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorPublic {
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub facing: Direction,
    pub points: i64,
}

/// Staging row, keyed by `(supertick_id, actor_id)`. Created during
/// COLLECT, finalized during MERGE, never mutated thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub supertick_id: u64,
    pub actor_id: String,
    pub intent: Intent,
    pub params: Value,
    pub status: JournalStatus,
    pub result: Option<ActionResult>,
    #[serde(default)]
    pub llm_input: Option<String>,
    #[serde(default)]
    pub llm_output: Option<String>,
    pub submitted_at: i64,
}

/// Append-only; exactly one per actor per resolved tick, including
/// engine-synthesized TIMEOUTs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub supertick_id: u64,
    pub actor_id: String,
    pub action_type: Intent,
    pub params: Value,
    pub result: ActionResult,
    pub context_hash: String,
    #[serde(default)]
    pub llm_input: Option<String>,
    #[serde(default)]
    pub llm_output: Option<String>,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TileChange {
    pub x: u32,
    pub y: u32,
    pub supertick_id: u64,
    pub actor_id: String,
    pub old_color: Color,
    pub new_color: Color,
    pub action_type: Intent,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub supertick_id: u64,
    pub from_id: String,
    pub message: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorPositionRecord {
    pub actor_id: String,
    pub supertick_id: u64,
    pub x: u32,
    pub y: u32,
    pub facing: Direction,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringRound {
    pub supertick_id: u64,
    pub selected_tiles: Vec<GridPos>,
    pub contributions_by_actor: BTreeMap<String, i64>,
    pub rationale: String,
    pub feedback: String,
    pub created_at: i64,
}

/// Opaque memory recalled by the memory-service collaborator and rendered
/// verbatim into the HUD.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecalledMemory {
    pub tick: u64,
    pub text: String,
    pub score: f64,
}

/// Tile/actor visibility policy; fixed for the lifetime of a namespace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "mode", content = "radius")]
pub enum Visibility {
    Full,
    Radius(u32),
}

impl Visibility {
    /// Meta-table encoding: `FULL` or `RADIUS:<n>`.
    pub fn to_meta_value(self) -> String {
        match self {
            Self::Full => "FULL".to_string(),
            Self::Radius(radius) => format!("RADIUS:{radius}"),
        }
    }

    pub fn from_meta_value(raw: &str) -> Option<Self> {
        if raw == "FULL" {
            return Some(Self::Full);
        }
        raw.strip_prefix("RADIUS:")
            .and_then(|tail| tail.parse::<u32>().ok())
            .map(Self::Radius)
    }

    /// Chebyshev visibility test: a square window around the observer.
    pub fn can_see(self, observer_x: u32, observer_y: u32, x: u32, y: u32) -> bool {
        match self {
            Self::Full => true,
            Self::Radius(radius) => {
                let dx = (i64::from(observer_x) - i64::from(x)).unsigned_abs();
                let dy = (i64::from(observer_y) - i64::from(y)).unsigned_abs();
                dx.max(dy) <= u64::from(radius)
            }
        }
    }
}

pub const MIN_GRID_DIM: u32 = 8;
pub const MAX_GRID_DIM: u32 = 256;

/// Per-namespace configuration, fixed at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldConfig {
    #[serde(default = "default_grid_dim")]
    pub width: u32,
    #[serde(default = "default_grid_dim")]
    pub height: u32,
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    #[serde(default)]
    pub goal: String,
    /// Ticks between scoring pauses; 0 disables scoring.
    #[serde(default)]
    pub scoring_interval: u64,
    /// COLLECT deadline in milliseconds; 0 disables the deadline.
    #[serde(default)]
    pub collect_timeout_ms: u64,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default = "default_points_enabled")]
    pub points_enabled: bool,
    #[serde(default = "default_chat_limit")]
    pub chat_limit: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl WorldConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.width < MIN_GRID_DIM || self.width > MAX_GRID_DIM {
            return Err(format!(
                "width must be between {MIN_GRID_DIM} and {MAX_GRID_DIM}, got {}",
                self.width
            ));
        }
        if self.height < MIN_GRID_DIM || self.height > MAX_GRID_DIM {
            return Err(format!(
                "height must be between {MIN_GRID_DIM} and {MAX_GRID_DIM}, got {}",
                self.height
            ));
        }
        if self.epoch == 0 {
            return Err("epoch must be a positive tick index".to_string());
        }
        Ok(())
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: default_grid_dim(),
            height: default_grid_dim(),
            epoch: default_epoch(),
            goal: String::new(),
            scoring_interval: 0,
            collect_timeout_ms: 0,
            visibility: default_visibility(),
            points_enabled: default_points_enabled(),
            chat_limit: default_chat_limit(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_grid_dim() -> u32 {
    64
}

fn default_epoch() -> u64 {
    10
}

fn default_visibility() -> Visibility {
    Visibility::Full
}

fn default_points_enabled() -> bool {
    true
}

fn default_chat_limit() -> usize {
    50
}

fn default_history_limit() -> usize {
    1
}

// ---------------------------------------------------------------------------
// HTTP DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextResponse {
    pub namespace: String,
    pub supertick_id: u64,
    pub context_hash: String,
    pub phase: Phase,
    pub hud: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSubmission {
    pub namespace: String,
    pub supertick_id: u64,
    pub context_hash: String,
    /// Single action string parsed by the grammar, e.g. `PAINT #FF0000 3 4`.
    pub action: String,
    #[serde(default)]
    pub llm_input: Option<String>,
    #[serde(default)]
    pub llm_output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringSubmission {
    pub supertick_id: u64,
    pub selected_tiles: Vec<GridPos>,
    pub contributions_by_actor: BTreeMap<String, i64>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterActorRequest {
    pub actor_id: String,
    pub x: Option<u32>,
    pub y: Option<u32>,
    pub facing: Option<Direction>,
    pub scopes: Option<Vec<Intent>>,
    pub secret: Option<String>,
    #[serde(default)]
    pub custom_instructions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterActorResponse {
    pub actor_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub namespace: String,
    pub supertick_id: u64,
    pub phase: Phase,
    pub context_hash: String,
    pub epoch: u64,
    pub actor_count: usize,
    pub submitted_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochRequest {
    pub epoch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayTick {
    pub supertick_id: u64,
    pub actions: Vec<AuditRecord>,
    pub tile_updates: Vec<TileChange>,
    pub actor_positions: Vec<ActorPositionRecord>,
    pub chat: Vec<ChatMessage>,
    pub scoring: Vec<ScoringRound>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayResponse {
    pub namespace: String,
    pub from_tick: u64,
    pub to_tick: u64,
    pub ticks: Vec<ReplayTick>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidNamespace,
    InvalidConfig,
    NamespaceExists,
    UnknownNamespace,
    UnknownActor,
    AuthFailed,
    ScopeDenied,
    PhaseMismatch,
    SupertickMismatch,
    ContextHashMismatch,
    AlreadySubmitted,
    MalformedAction,
    SchemaMismatch,
    StoreBusy,
    IoError,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details,
        }
    }
}

/// Engine-wide error taxonomy. Display strings for the three most-automated
/// rejections keep their recognizable substrings (`already submitted`,
/// `Context hash mismatch`, `Supertick mismatch`) so agent clients can
/// classify without parsing structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    InvalidNamespace(String),
    InvalidConfig(String),
    NamespaceExists(String),
    UnknownNamespace(String),
    UnknownActor(String),
    AuthFailed(String),
    ScopeDenied { actor_id: String, intent: Intent },
    PhaseMismatch { phase: Phase },
    SupertickMismatch { expected: u64, got: u64 },
    ContextHashMismatch { expected: String, got: String },
    AlreadySubmitted { actor_id: String, supertick_id: u64 },
    MalformedAction(String),
    SchemaMismatch { expected: i32, found: i32 },
    StoreBusy,
    Io(String),
    Internal(String),
}

impl SimError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidNamespace(_) => ErrorCode::InvalidNamespace,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::NamespaceExists(_) => ErrorCode::NamespaceExists,
            Self::UnknownNamespace(_) => ErrorCode::UnknownNamespace,
            Self::UnknownActor(_) => ErrorCode::UnknownActor,
            Self::AuthFailed(_) => ErrorCode::AuthFailed,
            Self::ScopeDenied { .. } => ErrorCode::ScopeDenied,
            Self::PhaseMismatch { .. } => ErrorCode::PhaseMismatch,
            Self::SupertickMismatch { .. } => ErrorCode::SupertickMismatch,
            Self::ContextHashMismatch { .. } => ErrorCode::ContextHashMismatch,
            Self::AlreadySubmitted { .. } => ErrorCode::AlreadySubmitted,
            Self::MalformedAction(_) => ErrorCode::MalformedAction,
            Self::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
            Self::StoreBusy => ErrorCode::StoreBusy,
            Self::Io(_) => ErrorCode::IoError,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(self.error_code(), self.to_string(), None)
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNamespace(raw) => write!(
                f,
                "Invalid namespace '{raw}'. Must match pattern: ^[A-Za-z0-9][A-Za-z0-9_-]{{0,63}}$"
            ),
            Self::InvalidConfig(detail) => write!(f, "Invalid configuration: {detail}"),
            Self::NamespaceExists(namespace) => {
                write!(f, "Namespace '{namespace}' already exists")
            }
            Self::UnknownNamespace(namespace) => write!(f, "Namespace '{namespace}' not found"),
            Self::UnknownActor(actor_id) => {
                write!(f, "Actor '{actor_id}' not found or eliminated")
            }
            Self::AuthFailed(actor_id) => {
                write!(f, "Authentication failed for agent {actor_id}")
            }
            Self::ScopeDenied { actor_id, intent } => {
                write!(f, "Action '{intent}' not allowed for agent {actor_id}")
            }
            Self::PhaseMismatch { phase } => {
                write!(f, "Cannot submit actions in phase {phase}")
            }
            Self::SupertickMismatch { expected, got } => {
                write!(f, "Supertick mismatch. Expected {expected}, got {got}")
            }
            Self::ContextHashMismatch { expected, got } => {
                write!(f, "Context hash mismatch. Expected {expected}, got {got}")
            }
            Self::AlreadySubmitted {
                actor_id,
                supertick_id,
            } => write!(
                f,
                "Agent {actor_id} already submitted an action for supertick {supertick_id}"
            ),
            Self::MalformedAction(detail) => write!(f, "Malformed action: {detail}"),
            Self::SchemaMismatch { expected, found } => write!(
                f,
                "Schema version mismatch. Expected {expected}, got {found}. \
                 Cannot serve this namespace without manual intervention."
            ),
            Self::StoreBusy => f.write_str("Store is busy; retry later"),
            Self::Io(detail) => write!(f, "io error: {detail}"),
            Self::Internal(detail) => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for SimError {}
