//! Migration runs: load, plan and apply
//!
//! A [`Migrator`] owns one connection for its lifetime and tracks the state of
//! the run it is executing. Every run rebuilds the patch set from disk.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::applier::{self, Applier};
use crate::connection::Connection;
use crate::error::{PatchError, PatchResult};
use crate::level_store::{self, TrackedLevel};
use crate::loader::load_patch_set;
use crate::patch::{Direction, PatchSet};
use crate::planner::{self, MigrationPlan};

/// Where a run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Loading,
    Planning,
    Applying { step: usize, total: usize },
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, Loading) => true,
            (Loading, Planning) | (Loading, Failed) => true,
            (Planning, Done) | (Planning, Failed) => true,
            (Planning, Applying { step: 1, .. }) => true,
            (Applying { step, total }, Applying { step: next, total: next_total }) => {
                *next == step + 1 && next_total == total && next <= total
            }
            (Applying { .. }, Done) | (Applying { .. }, Failed) => true,
            _ => false,
        }
    }

    fn advance(&mut self, next: RunState) {
        if !self.can_transition_to(&next) {
            warn!(from = ?self, to = ?next, "Illegal run state transition");
            debug_assert!(false, "illegal run state transition {:?} -> {:?}", self, next);
        }
        debug!(from = ?self, to = ?next, "Run state");
        *self = next;
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: u32,
    pub target: u32,
    pub reached: u32,
    pub direction: Option<Direction>,
    pub steps_applied: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A failed run and the level it got to.
///
/// `reached` is `None` only when the run failed before the tracked level was
/// read, in which case the database was not touched.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct MigrationFailure {
    pub reached: Option<u32>,
    #[source]
    pub error: PatchError,
}

impl MigrationFailure {
    pub fn at(reached: u32, error: PatchError) -> Self {
        Self {
            reached: Some(reached),
            error,
        }
    }

    pub fn before_start(error: PatchError) -> Self {
        Self {
            reached: None,
            error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.error.is_fatal()
    }
}

/// Where patches come from and where the level is tracked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateOptions {
    pub dir: PathBuf,
    pub tracked: TrackedLevel,
}

impl MigrateOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tracked: TrackedLevel::default(),
        }
    }

    pub fn with_tracked(mut self, tracked: TrackedLevel) -> Self {
        self.tracked = tracked;
        self
    }
}

/// Which directions a level provides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchSummary {
    pub level: u32,
    pub forward: bool,
    pub reverse: bool,
}

/// Tracked level alongside the patches on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub level: u32,
    pub tracking_table_exists: bool,
    pub highest_available: Option<u32>,
    pub patches: Vec<PatchSummary>,
}

impl Status {
    fn new(level: u32, tracking_table_exists: bool, patches: &PatchSet) -> Self {
        Self {
            level,
            tracking_table_exists,
            highest_available: patches.highest_level(),
            patches: patches
                .units()
                .map(|unit| PatchSummary {
                    level: unit.level,
                    forward: unit.has(Direction::Forward),
                    reverse: unit.has(Direction::Reverse),
                })
                .collect(),
        }
    }
}

/// Runs migrations over a single connection
pub struct Migrator<'c> {
    connection: &'c mut dyn Connection,
    options: MigrateOptions,
    state: RunState,
}

impl<'c> Migrator<'c> {
    pub fn new(connection: &'c mut dyn Connection, options: MigrateOptions) -> Self {
        Self {
            connection,
            options,
            state: RunState::Idle,
        }
    }

    pub fn options(&self) -> &MigrateOptions {
        &self.options
    }

    /// State of the current or most recent run
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move the tracked level to `target`
    pub async fn migrate(&mut self, target: u32) -> Result<MigrationReport, MigrationFailure> {
        let started_at = Utc::now();
        self.state = RunState::Idle;
        self.state.advance(RunState::Loading);
        info!(target, dir = %self.options.dir.display(), "Starting migration");

        let patches = self
            .load()
            .map_err(|error| self.fail(MigrationFailure::before_start(error)))?;

        self.state.advance(RunState::Planning);
        let current = level_store::current_level(&mut *self.connection, &self.options.tracked)
            .await
            .map_err(|error| self.fail(MigrationFailure::before_start(error)))?;

        if let Err(error) = applier::check_available(current, target, &patches) {
            return Err(self.fail(MigrationFailure::at(current, error)));
        }

        let plan = planner::plan(current, target);
        if plan.is_empty() {
            info!(level = current, "Already at target level");
            self.state.advance(RunState::Done);
            return Ok(report(&plan, current, started_at));
        }

        info!(
            from = current,
            target,
            direction = ?plan.direction,
            steps = plan.len(),
            "Migration planned"
        );

        let total = plan.len();
        let state = &mut self.state;
        let result = Applier::new(&mut *self.connection, &self.options.tracked)
            .apply_with_progress(&plan, &patches, |step, _| {
                state.advance(RunState::Applying { step, total })
            })
            .await;

        match result {
            Ok(reached) => {
                self.state.advance(RunState::Done);
                info!(level = reached, "Migration complete");
                Ok(report(&plan, reached, started_at))
            }
            Err(failure) => Err(self.fail(failure)),
        }
    }

    /// Work out what `migrate(target)` would do without changing anything.
    ///
    /// The tracking table is neither created nor healed; a missing table reads
    /// as level 0.
    pub async fn plan(&mut self, target: u32) -> PatchResult<MigrationPlan> {
        let patches = self.load()?;
        let current = level_store::peek(&mut *self.connection, &self.options.tracked).await?;
        applier::check_available(current, target, &patches)?;
        Ok(planner::plan(current, target))
    }

    /// Report the tracked level and the available patches, read-only
    pub async fn status(&mut self) -> PatchResult<Status> {
        let patches = self.load()?;
        let tracked = &self.options.tracked;
        let exists = level_store::exists(&mut *self.connection, tracked).await?;
        let level = level_store::peek(&mut *self.connection, tracked).await?;
        Ok(Status::new(level, exists, &patches))
    }

    fn load(&self) -> PatchResult<PatchSet> {
        load_patch_set(&self.options.dir)
    }

    fn fail(&mut self, failure: MigrationFailure) -> MigrationFailure {
        self.state.advance(RunState::Failed);
        error!(
            code = failure.error.error_code(),
            reached = ?failure.reached,
            error = %failure.error,
            "Migration failed"
        );
        failure
    }
}

fn report(plan: &MigrationPlan, reached: u32, started_at: DateTime<Utc>) -> MigrationReport {
    let completed_at = Utc::now();
    MigrationReport {
        from: plan.current,
        target: plan.target,
        reached,
        direction: plan.direction,
        steps_applied: plan.len(),
        started_at,
        completed_at,
        duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
    }
}

/// Migrate the database behind `connection` to `target` in one call
pub async fn migrate(
    connection: &mut dyn Connection,
    dir: impl AsRef<Path>,
    tracked: &TrackedLevel,
    target: u32,
) -> Result<MigrationReport, MigrationFailure> {
    let options = MigrateOptions::new(dir.as_ref()).with_tracked(tracked.clone());
    Migrator::new(connection, options).migrate(target).await
}
