//! Transactional application of a migration plan
//!
//! Each step runs in its own transaction: the patch SQL and the tracked level
//! update commit together or not at all. Steps never overlap, the next one
//! begins only after the previous transaction has committed.

use tracing::{error, info, warn};

use crate::connection::{Connection, Transaction};
use crate::error::{PatchError, PatchResult};
use crate::level_store::{self, TrackedLevel};
use crate::migrator::MigrationFailure;
use crate::patch::PatchSet;
use crate::planner::{self, MigrationPlan, Step};

/// A plan step paired with the SQL it executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedStep<'p> {
    pub step: Step,
    pub sql: &'p str,
}

fn resolve(step: Step, patches: &PatchSet) -> PatchResult<ResolvedStep<'_>> {
    let level = step.patch_level();
    let direction = step.direction();
    patches
        .sql_for(level, direction)
        .map(|sql| ResolvedStep { step, sql })
        .ok_or(PatchError::MissingPatch { level, direction })
}

/// Look up the SQL for every step before anything touches the database.
///
/// Fails with `MissingPatch` naming the first step whose unit or direction
/// is absent or blank.
pub fn resolve_steps<'p>(
    plan: &MigrationPlan,
    patches: &'p PatchSet,
) -> PatchResult<Vec<ResolvedStep<'p>>> {
    plan.steps.iter().map(|step| resolve(*step, patches)).collect()
}

/// Check that every step from `current` to `target` has its SQL without
/// building the plan.
///
/// Walks the steps lazily and stops at the first missing one, so at most
/// one step past the available patches is ever looked at.
pub fn check_available(current: u32, target: u32, patches: &PatchSet) -> PatchResult<()> {
    planner::steps(current, target).try_for_each(|step| resolve(step, patches).map(|_| ()))
}

/// Drives plan steps over a single connection
pub struct Applier<'c> {
    connection: &'c mut dyn Connection,
    tracked: &'c TrackedLevel,
}

impl<'c> Applier<'c> {
    pub fn new(connection: &'c mut dyn Connection, tracked: &'c TrackedLevel) -> Self {
        Self {
            connection,
            tracked,
        }
    }

    /// Apply `plan`, returning the level reached
    pub async fn apply(
        &mut self,
        plan: &MigrationPlan,
        patches: &PatchSet,
    ) -> Result<u32, MigrationFailure> {
        self.apply_with_progress(plan, patches, |_, _| {}).await
    }

    /// Apply `plan`, calling `on_step` with the 1-based index of each step
    /// before it starts
    pub async fn apply_with_progress<F>(
        &mut self,
        plan: &MigrationPlan,
        patches: &PatchSet,
        mut on_step: F,
    ) -> Result<u32, MigrationFailure>
    where
        F: FnMut(usize, Step),
    {
        let mut reached = plan.current;

        let resolved = resolve_steps(plan, patches).map_err(|error| {
            error!(error = %error, "Plan cannot be applied, nothing was changed");
            MigrationFailure::at(reached, error)
        })?;

        for (index, resolved) in resolved.iter().enumerate() {
            on_step(index + 1, resolved.step);
            self.apply_step(resolved)
                .await
                .map_err(|error| MigrationFailure::at(reached, error))?;
            reached = resolved.step.to;
        }

        Ok(reached)
    }

    async fn apply_step(&mut self, resolved: &ResolvedStep<'_>) -> PatchResult<()> {
        let step = resolved.step;
        let level = step.patch_level();
        let direction = step.direction();
        info!(from = step.from, to = step.to, %direction, "Applying patch");

        let mut tx = self.connection.begin_transaction().await?;

        if let Err(source) = tx.execute_script(resolved.sql).await {
            let cause = PatchError::Execution {
                level,
                direction,
                source,
            };
            return Err(abort(&mut *tx, step, cause).await);
        }

        if let Err(error) = level_store::write(&mut *tx, self.tracked, step.to).await {
            let cause = match error {
                PatchError::Storage(source) => PatchError::LevelWrite {
                    level: step.to,
                    source,
                },
                other => other,
            };
            return Err(abort(&mut *tx, step, cause).await);
        }

        if let Err(source) = tx.commit().await {
            let cause = PatchError::Commit {
                level: step.to,
                source,
            };
            return Err(abort(&mut *tx, step, cause).await);
        }

        info!(level = step.to, "Patch committed");
        Ok(())
    }
}

/// Roll back a failed step, escalating to `Unrecoverable` if that fails too
async fn abort(tx: &mut dyn Transaction, step: Step, cause: PatchError) -> PatchError {
    match tx.rollback().await {
        Ok(()) => {
            warn!(
                from = step.from,
                to = step.to,
                error = %cause,
                "Step rolled back"
            );
            cause
        }
        Err(source) => {
            error!(
                from = step.from,
                to = step.to,
                error = %cause,
                rollback_error = %source,
                "Rollback failed, database state is unknown"
            );
            PatchError::Unrecoverable {
                level: step.to,
                cause: cause.to_string(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteBackend;
    use crate::patch::{Direction, PatchText};
    use crate::planner::plan;
    use crate::testing::FaultyConnection;

    fn patches(units: &[(u32, &str, &str)]) -> PatchSet {
        let mut set = PatchSet::new();
        for (level, forward, reverse) in units {
            for (direction, sql) in [(Direction::Forward, forward), (Direction::Reverse, reverse)] {
                let text = PatchText {
                    file_name: format!("{}{}", level, direction.file_suffix()),
                    sql: sql.to_string(),
                };
                set.insert(*level, direction, text).unwrap();
            }
        }
        set
    }

    async fn seeded() -> (SqliteBackend, TrackedLevel) {
        let mut db = SqliteBackend::in_memory().await.unwrap();
        let tracked = TrackedLevel::default();
        level_store::create(&mut db, &tracked).await.unwrap();
        (db, tracked)
    }

    #[test]
    fn test_resolve_reports_first_missing_step() {
        let set = patches(&[(1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a")]);

        let err = resolve_steps(&plan(0, 3), &set).unwrap_err();
        assert!(matches!(
            err,
            PatchError::MissingPatch {
                level: 2,
                direction: Direction::Forward
            }
        ));

        let resolved = resolve_steps(&plan(1, 0), &set).unwrap();
        assert_eq!(resolved[0].sql, "DROP TABLE a");
    }

    #[test]
    fn test_blank_reverse_counts_as_missing() {
        let set = patches(&[(1, "CREATE TABLE a (id INTEGER)", "  \n")]);
        let err = resolve_steps(&plan(1, 0), &set).unwrap_err();
        assert!(matches!(
            err,
            PatchError::MissingPatch {
                level: 1,
                direction: Direction::Reverse
            }
        ));
    }

    #[test]
    fn test_check_available_stops_past_highest_level() {
        let set = patches(&[
            (1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a"),
            (2, "CREATE TABLE b (id INTEGER)", "DROP TABLE b"),
        ]);

        assert!(check_available(0, 2, &set).is_ok());
        assert!(check_available(2, 0, &set).is_ok());
        assert!(check_available(1, 1, &set).is_ok());

        let err = check_available(0, u32::MAX, &set).unwrap_err();
        assert!(matches!(
            err,
            PatchError::MissingPatch {
                level: 3,
                direction: Direction::Forward
            }
        ));

        let err = check_available(u32::MAX, 0, &set).unwrap_err();
        assert!(matches!(
            err,
            PatchError::MissingPatch {
                level: u32::MAX,
                direction: Direction::Reverse
            }
        ));
    }

    #[tokio::test]
    async fn test_apply_forward_and_back() {
        let (mut db, tracked) = seeded().await;
        let set = patches(&[
            (1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a"),
            (2, "CREATE TABLE b (id INTEGER)", "DROP TABLE b"),
        ]);

        let reached = Applier::new(&mut db, &tracked)
            .apply(&plan(0, 2), &set)
            .await
            .unwrap();
        assert_eq!(reached, 2);
        assert!(db.table_exists("b").await.unwrap());
        assert_eq!(level_store::read(&mut db, &tracked).await.unwrap(), 2);

        let reached = Applier::new(&mut db, &tracked)
            .apply(&plan(2, 0), &set)
            .await
            .unwrap();
        assert_eq!(reached, 0);
        assert!(!db.table_exists("a").await.unwrap());
        assert_eq!(level_store::read(&mut db, &tracked).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_execution_failure_stops_at_previous_level() {
        let (mut db, tracked) = seeded().await;
        let set = patches(&[
            (1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a"),
            (2, "CREATE TABLE b (id INTEGER); SELECT * FROM nowhere;", "DROP TABLE b"),
            (3, "CREATE TABLE c (id INTEGER)", "DROP TABLE c"),
        ]);

        let failure = Applier::new(&mut db, &tracked)
            .apply(&plan(0, 3), &set)
            .await
            .unwrap_err();
        assert_eq!(failure.reached, Some(1));
        assert!(matches!(
            failure.error,
            PatchError::Execution {
                level: 2,
                direction: Direction::Forward,
                ..
            }
        ));

        assert!(db.table_exists("a").await.unwrap());
        assert!(!db.table_exists("b").await.unwrap());
        assert!(!db.table_exists("c").await.unwrap());
        assert_eq!(level_store::read(&mut db, &tracked).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_is_rolled_back() {
        let (db, tracked) = seeded().await;
        let mut faulty = FaultyConnection::new(db);
        faulty.faults().fail_commit_at(2);
        let set = patches(&[
            (1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a"),
            (2, "CREATE TABLE b (id INTEGER)", "DROP TABLE b"),
        ]);

        let failure = Applier::new(&mut faulty, &tracked)
            .apply(&plan(0, 2), &set)
            .await
            .unwrap_err();
        assert_eq!(failure.reached, Some(1));
        assert!(matches!(failure.error, PatchError::Commit { level: 2, .. }));
        assert!(!failure.error.is_fatal());

        assert!(!faulty.table_exists("b").await.unwrap());
        assert_eq!(level_store::read(&mut faulty, &tracked).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_unrecoverable() {
        let (db, tracked) = seeded().await;
        let mut faulty = FaultyConnection::new(db);
        faulty.faults().fail_commit_at(1);
        faulty.faults().fail_rollback();
        let set = patches(&[(1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a")]);

        let failure = Applier::new(&mut faulty, &tracked)
            .apply(&plan(0, 1), &set)
            .await
            .unwrap_err();
        assert_eq!(failure.reached, Some(0));
        assert!(failure.error.is_fatal());
        match failure.error {
            PatchError::Unrecoverable { level, cause, .. } => {
                assert_eq!(level, 1);
                assert!(cause.contains("Commit of level 1 failed"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_patch_opens_no_transaction() {
        let (db, tracked) = seeded().await;
        let mut faulty = FaultyConnection::new(db);
        let set = patches(&[(1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a")]);

        let failure = Applier::new(&mut faulty, &tracked)
            .apply(&plan(0, 2), &set)
            .await
            .unwrap_err();
        assert_eq!(failure.reached, Some(0));
        assert_eq!(faulty.faults().transactions_begun(), 0);
        assert!(!faulty.table_exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_progress_is_reported_per_step() {
        let (mut db, tracked) = seeded().await;
        let set = patches(&[
            (1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a"),
            (2, "CREATE TABLE b (id INTEGER)", "DROP TABLE b"),
        ]);

        let mut seen = Vec::new();
        Applier::new(&mut db, &tracked)
            .apply_with_progress(&plan(0, 2), &set, |index, step| seen.push((index, step.to)))
            .await
            .unwrap();
        assert_eq!(seen, vec![(1, 1), (2, 2)]);
    }
}
