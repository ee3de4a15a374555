//! Patch units and the patch set built from a patch directory

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Direction a patch moves the schema in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From `level - 1` to `level`
    Forward,
    /// From `level` to `level - 1`
    Reverse,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Forward, Direction::Reverse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    /// Filename suffix that marks a patch file of this direction
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Direction::Forward => "-forward.sql",
            Direction::Reverse => "-reverse.sql",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL text of one patch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchText {
    pub file_name: String,
    pub sql: String,
}

impl PatchText {
    /// Blank files count as absent when a step needs them
    pub fn is_blank(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// Paired forward/reverse SQL for one level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchUnit {
    pub level: u32,
    pub forward: Option<PatchText>,
    pub reverse: Option<PatchText>,
}

impl PatchUnit {
    pub fn new(level: u32) -> Self {
        Self {
            level,
            forward: None,
            reverse: None,
        }
    }

    pub fn text(&self, direction: Direction) -> Option<&PatchText> {
        match direction {
            Direction::Forward => self.forward.as_ref(),
            Direction::Reverse => self.reverse.as_ref(),
        }
    }

    fn slot(&mut self, direction: Direction) -> &mut Option<PatchText> {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Reverse => &mut self.reverse,
        }
    }

    /// Executable SQL for a direction; `None` when missing or blank
    pub fn sql(&self, direction: Direction) -> Option<&str> {
        self.text(direction)
            .filter(|text| !text.is_blank())
            .map(|text| text.sql.as_str())
    }

    pub fn has(&self, direction: Direction) -> bool {
        self.sql(direction).is_some()
    }
}

/// All patch units found in a directory, keyed by level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    units: BTreeMap<u32, PatchUnit>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the text for `level`/`direction`.
    ///
    /// Returns the previously stored text when the slot was already taken;
    /// in that case the set is left unchanged.
    pub fn insert(
        &mut self,
        level: u32,
        direction: Direction,
        text: PatchText,
    ) -> Result<(), PatchText> {
        let slot = self
            .units
            .entry(level)
            .or_insert_with(|| PatchUnit::new(level))
            .slot(direction);

        if let Some(existing) = slot.as_ref() {
            return Err(existing.clone());
        }
        *slot = Some(text);
        Ok(())
    }

    pub fn get(&self, level: u32) -> Option<&PatchUnit> {
        self.units.get(&level)
    }

    /// Executable SQL for `level` in `direction`
    pub fn sql_for(&self, level: u32, direction: Direction) -> Option<&str> {
        self.get(level).and_then(|unit| unit.sql(direction))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Levels in ascending order
    pub fn levels(&self) -> impl Iterator<Item = u32> + '_ {
        self.units.keys().copied()
    }

    pub fn units(&self) -> impl Iterator<Item = &PatchUnit> {
        self.units.values()
    }

    pub fn highest_level(&self) -> Option<u32> {
        self.units.keys().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(file_name: &str, sql: &str) -> PatchText {
        PatchText {
            file_name: file_name.to_string(),
            sql: sql.to_string(),
        }
    }

    #[test]
    fn test_units_merge_by_level() {
        let mut set = PatchSet::new();
        set.insert(1, Direction::Forward, text("1-forward.sql", "CREATE TABLE t(id int)"))
            .unwrap();
        set.insert(1, Direction::Reverse, text("1-reverse.sql", "DROP TABLE t"))
            .unwrap();

        assert_eq!(set.len(), 1);
        let unit = set.get(1).unwrap();
        assert_eq!(unit.sql(Direction::Forward), Some("CREATE TABLE t(id int)"));
        assert_eq!(unit.sql(Direction::Reverse), Some("DROP TABLE t"));
    }

    #[test]
    fn test_second_file_for_same_slot_is_rejected() {
        let mut set = PatchSet::new();
        set.insert(2, Direction::Forward, text("02-forward.sql", "SELECT 1"))
            .unwrap();

        let existing = set
            .insert(2, Direction::Forward, text("2-forward.sql", "SELECT 2"))
            .unwrap_err();
        assert_eq!(existing.file_name, "02-forward.sql");
        assert_eq!(set.sql_for(2, Direction::Forward), Some("SELECT 1"));
    }

    #[test]
    fn test_blank_text_counts_as_missing() {
        let mut set = PatchSet::new();
        set.insert(1, Direction::Reverse, text("1-reverse.sql", "  \n\t"))
            .unwrap();

        let unit = set.get(1).unwrap();
        assert!(unit.text(Direction::Reverse).is_some());
        assert!(!unit.has(Direction::Reverse));
        assert_eq!(set.sql_for(1, Direction::Reverse), None);
        assert_eq!(set.sql_for(1, Direction::Forward), None);
    }

    #[test]
    fn test_levels_are_ordered() {
        let mut set = PatchSet::new();
        for level in [3, 1, 2] {
            set.insert(level, Direction::Forward, text("f", "SELECT 1"))
                .unwrap();
        }

        assert_eq!(set.levels().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(set.highest_level(), Some(3));
    }
}
