//! Reversible, level-based SQL patching for Patchy
//!
//! A patch directory holds paired `{level}-forward.sql` / `{level}-reverse.sql`
//! files. This crate loads them into a [`PatchSet`], reads the level the
//! database is currently at, plans the steps to a target level and applies
//! each step in its own transaction, recording the new level alongside the
//! patch SQL.

pub mod applier;
pub mod backends;
pub mod connection;
pub mod error;
pub mod level_store;
pub mod loader;
pub mod migrator;
pub mod patch;
pub mod planner;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export core types for convenience
pub use applier::{resolve_steps, Applier, ResolvedStep};
pub use backends::connect;
pub use connection::{Backend, Connection, Transaction};
pub use error::{PatchError, PatchResult, StorageError, StorageResult};
pub use level_store::TrackedLevel;
pub use loader::load_patch_set;
pub use migrator::{
    migrate, MigrateOptions, MigrationFailure, MigrationReport, Migrator, PatchSummary, RunState,
    Status,
};
pub use patch::{Direction, PatchSet, PatchText, PatchUnit};
pub use planner::{plan, MigrationPlan, Step};
