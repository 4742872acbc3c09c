//! Eviction module: hard-deletes soft-deleted conversation groups and
//! superseded memory epochs after the retention window, enqueueing
//! vector-store cleanup tasks along the way.

mod worker;

pub use worker::{EvictionRunResult, run_eviction, start_eviction_worker};
