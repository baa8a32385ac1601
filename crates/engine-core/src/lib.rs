//! Deterministic BSP engine core: in-memory world state, snapshot freezing
//! and context-hash stamping, staleness-safe intake validation, and the
//! single-pass merge resolver. No I/O lives here; the API crate couples this
//! engine to the per-namespace store.

pub mod world;

pub use world::context::{render_hud, HudContext};
pub use world::intake::validate_submission;
pub use world::merge::{resolve_tick, ActorMove, ResolvedAction, TickResolution};
pub use world::snapshot::{Snapshot, TileState};
pub use world::World;
