/// Per-title score and audit file readers.
pub mod game_adapter;
/// Persisted machine identity.
pub mod identity;
