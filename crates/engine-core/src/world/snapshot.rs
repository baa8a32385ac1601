use contracts::{ActorPublic, Color, ScoringRound, BACKGROUND_COLOR};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TileState {
    pub x: u32,
    pub y: u32,
    pub color: Color,
}

/// Frozen, read-only view S(n) exposed to agents during COLLECT for tick n.
///
/// `tiles` is sorted by `(x, y)` and `actors` by id (both inherited from the
/// world's BTreeMaps), so the canonical serialization is deterministic.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snapshot {
    pub namespace: String,
    pub supertick_id: u64,
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<TileState>,
    pub actors: Vec<ActorPublic>,
    pub goal: String,
    pub last_adjudication: Option<ScoringRound>,
}

/// The hashed payload. Anything rendered into the snapshot sections of the
/// HUD must flow through here and vice versa, or staleness detection lies.
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    supertick_id: u64,
    width: u32,
    height: u32,
    tiles: &'a [TileState],
    actors: &'a [ActorPublic],
    goal: &'a str,
    last_adjudication: &'a Option<ScoringRound>,
}

impl Snapshot {
    /// The staleness token agents submit back: `sha256:` + the first 16 hex
    /// chars of a SHA-256 over the canonical payload. Constant for the
    /// duration of COLLECT at this tick.
    pub fn context_hash(&self) -> String {
        let payload = CanonicalPayload {
            supertick_id: self.supertick_id,
            width: self.width,
            height: self.height,
            tiles: &self.tiles,
            actors: &self.actors,
            goal: &self.goal,
            last_adjudication: &self.last_adjudication,
        };
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        let mut hex = String::with_capacity(16);
        for byte in &digest[..8] {
            hex.push_str(&format!("{byte:02x}"));
        }
        format!("sha256:{hex}")
    }

    pub fn tile_color(&self, x: u32, y: u32) -> &str {
        self.tiles
            .iter()
            .find(|tile| tile.x == x && tile.y == y)
            .map(|tile| tile.color.as_str())
            .unwrap_or(BACKGROUND_COLOR)
    }

    pub fn occupant(&self, x: u32, y: u32) -> Option<&ActorPublic> {
        self.actors
            .iter()
            .find(|actor| actor.x == x && actor.y == y)
    }

    pub fn actor(&self, actor_id: &str) -> Option<&ActorPublic> {
        self.actors.iter().find(|actor| actor.id == actor_id)
    }
}
