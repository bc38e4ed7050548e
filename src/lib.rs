//! Lab workstation booking core: operating calendar, recurrence expansion,
//! conflict detection, reservation lifecycle and edit proposals, backed by an
//! in-memory per-lab store with a write-ahead log.

pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod wal;
