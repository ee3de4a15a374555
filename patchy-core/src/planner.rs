//! Migration planning

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use crate::patch::Direction;

/// One transition between adjacent levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Step {
    pub from: u32,
    pub to: u32,
}

impl Step {
    pub fn direction(&self) -> Direction {
        if self.to > self.from {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// Level of the unit supplying this step's SQL
    pub fn patch_level(&self) -> u32 {
        match self.direction() {
            Direction::Forward => self.to,
            Direction::Reverse => self.from,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.direction())
    }
}

/// Ordered steps taking the database from `current` to `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub current: u32,
    pub target: u32,
    /// `None` when already at the target
    pub direction: Option<Direction>,
    pub steps: Vec<Step>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Steps from `current` to `target`, produced lazily
pub fn steps(current: u32, target: u32) -> impl Iterator<Item = Step> {
    let forward = (current..target).map(|from| Step { from, to: from + 1 });
    let reverse = (target..current).rev().map(|to| Step { from: to + 1, to });
    forward.chain(reverse)
}

/// Compute the plan from `current` to `target`.
///
/// Patch availability is not checked here; callers reject unreachable
/// targets with `applier::check_available` before collecting the steps.
pub fn plan(current: u32, target: u32) -> MigrationPlan {
    let direction = match current.cmp(&target) {
        Ordering::Less => Some(Direction::Forward),
        Ordering::Greater => Some(Direction::Reverse),
        Ordering::Equal => None,
    };

    MigrationPlan {
        current,
        target,
        direction,
        steps: steps(current, target).collect(),
    }
}
