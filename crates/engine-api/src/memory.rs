use contracts::RecalledMemory;

/// Consumed contract of the external memory service. The context builder
/// passes whatever comes back opaquely into the HUD; ranking
/// (`cosine * salience_base * exp(-age / half_life_ticks)`) is the
/// collaborator's concern, not the engine's.
pub trait MemoryService: Send + Sync {
    fn recall(&self, actor_id: &str, query: &str, limit: usize) -> Vec<RecalledMemory>;

    fn store(&self, actor_id: &str, tick: u64, text: &str, salience_base: f64);
}

/// Default wiring when no memory service is deployed: recall nothing, store
/// nothing, and the HUD simply omits the memories section.
#[derive(Debug, Default)]
pub struct NullMemoryService;

impl MemoryService for NullMemoryService {
    fn recall(&self, _actor_id: &str, _query: &str, _limit: usize) -> Vec<RecalledMemory> {
        Vec::new()
    }

    fn store(&self, _actor_id: &str, _tick: u64, _text: &str, _salience_base: f64) {}
}
