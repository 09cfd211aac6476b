//! Episodic memory access for context assembly.
//!
//! # Modules
//!
//! - [`store`] — MemoryStore trait, search hits, in-memory implementation
//! - [`recency`] — exponential recency decay and similarity blending

pub mod recency;
pub mod store;

pub use recency::{blend, RecencyDecay, DEFAULT_DECAY_TAU_DAYS};
pub use store::{
    cosine_similarity, InMemoryStore, MemoryHit, MemoryStore, SharedMemoryStore, StoreError,
};
