/// Conditions callers are expected to match on. Everything else travels as
/// plain `anyhow::Error` with context.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no effect found for {0:?}")]
    EffectNotFound(String),
    #[error("nothing is playing")]
    NotPlaying,
    #[error("pacer already has a source attached")]
    AlreadyAttached,
    #[error("channel closed")]
    Closed,
}

impl BusError {
    /// Looks through an `anyhow` chain for a `BusError`.
    pub fn find(err: &anyhow::Error) -> Option<&BusError> {
        err.chain().find_map(|e| e.downcast_ref::<BusError>())
    }
}
