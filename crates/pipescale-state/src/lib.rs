//! pipescale-state — durable per-pool scaling state.
//!
//! Backed by [redb](https://docs.rs/redb). Only the latest `ScalingState`
//! per pool is kept (current count, cooldown stamp, last decision), so a
//! restarted controller honours cooldowns that were running before it
//! stopped. No history is retained.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
