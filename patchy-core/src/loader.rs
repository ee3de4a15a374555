//! Patch directory scanning
//!
//! Patch files are named `{level}-forward.sql` and `{level}-reverse.sql`, where
//! `{level}` is a base-10 non-negative integer made only of ASCII digits.
//! Other files are ignored, except those that look like an attempt at a
//! different naming scheme (`1_forward.sql`, `2.up.sql`, `3-Reverse.SQL`, ...),
//! which are rejected so that a typo never silently drops a patch.

use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{PatchError, PatchResult};
use crate::patch::{Direction, PatchSet, PatchText};

/// Words that mark a file as an intended patch under some naming scheme
const DIRECTION_WORDS: [&str; 6] = ["forward", "reverse", "up", "down", "apply", "revert"];

/// How a directory entry is treated by the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Patch { level: u32, direction: Direction },
    Ignored,
}

/// Classify a file name according to the patch naming convention
pub fn classify(file_name: &str) -> PatchResult<Classification> {
    for direction in Direction::ALL {
        if let Some(token) = file_name.strip_suffix(direction.file_suffix()) {
            let level = parse_level(file_name, token)?;
            return Ok(Classification::Patch { level, direction });
        }
    }

    if resembles_patch(file_name) {
        return Err(PatchError::malformed(
            file_name,
            "expected '{level}-forward.sql' or '{level}-reverse.sql'",
        ));
    }

    Ok(Classification::Ignored)
}

fn parse_level(file_name: &str, token: &str) -> PatchResult<u32> {
    if token.is_empty() {
        return Err(PatchError::malformed(file_name, "missing patch level"));
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PatchError::malformed(
            file_name,
            format!("patch level '{}' is not a base-10 non-negative integer", token),
        ));
    }
    token.parse::<u32>().map_err(|e| {
        PatchError::malformed(file_name, format!("patch level '{}' is out of range: {}", token, e))
    })
}

/// A `.sql` file whose stem ends in a direction word after a separator
fn resembles_patch(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    let Some(stem) = lower.strip_suffix(".sql") else {
        return false;
    };

    DIRECTION_WORDS.iter().any(|word| {
        stem.strip_suffix(word)
            .and_then(|rest| rest.chars().last())
            .is_some_and(|sep| matches!(sep, '-' | '_' | '.' | ' '))
    })
}

/// Build a [`PatchSet`] from every patch file in `dir`.
///
/// Any error aborts the whole load; no partial set is returned.
pub fn load_patch_set(dir: impl AsRef<Path>) -> PatchResult<PatchSet> {
    let dir = dir.as_ref();
    debug!(dir = %dir.display(), "Scanning patch directory");

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| PatchError::io(dir, e))? {
        let entry = entry.map_err(|e| PatchError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| PatchError::io(entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }
        entries.push(entry);
    }
    // Deterministic order so the same directory always fails the same way
    entries.sort_by_key(|entry| entry.file_name());

    let mut patch_set = PatchSet::new();
    for entry in entries {
        let file_name = entry.file_name().to_string_lossy().into_owned();

        let (level, direction) = match classify(&file_name)? {
            Classification::Patch { level, direction } => (level, direction),
            Classification::Ignored => {
                debug!(file = %file_name, "Ignoring non-patch file");
                continue;
            }
        };

        let path = entry.path();
        let sql = fs::read_to_string(&path).map_err(|e| PatchError::io(&path, e))?;
        debug!(file = %file_name, level, %direction, bytes = sql.len(), "Loaded patch file");

        let text = PatchText {
            file_name: file_name.clone(),
            sql,
        };
        if let Err(existing) = patch_set.insert(level, direction, text) {
            return Err(PatchError::DuplicatePatch {
                level,
                direction,
                first: existing.file_name,
                second: file_name,
            });
        }
    }

    info!(
        dir = %dir.display(),
        units = patch_set.len(),
        highest = ?patch_set.highest_level(),
        "Loaded patch set"
    );
    Ok(patch_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PatchDir;

    #[test]
    fn test_classify_patch_names() {
        assert_eq!(
            classify("1-forward.sql").unwrap(),
            Classification::Patch {
                level: 1,
                direction: Direction::Forward
            }
        );
        assert_eq!(
            classify("12-reverse.sql").unwrap(),
            Classification::Patch {
                level: 12,
                direction: Direction::Reverse
            }
        );
        assert_eq!(
            classify("007-forward.sql").unwrap(),
            Classification::Patch {
                level: 7,
                direction: Direction::Forward
            }
        );
        assert_eq!(
            classify("0-reverse.sql").unwrap(),
            Classification::Patch {
                level: 0,
                direction: Direction::Reverse
            }
        );
    }

    #[test]
    fn test_unrelated_files_are_ignored() {
        for name in ["README.md", "seed.sql", "notes.txt", "backup.sql", "forward.txt"] {
            assert_eq!(classify(name).unwrap(), Classification::Ignored, "{}", name);
        }
    }

    #[test]
    fn test_bad_level_tokens_are_malformed() {
        for name in [
            "-forward.sql",
            "abc-forward.sql",
            "+1-forward.sql",
            " 1-reverse.sql",
            "1a-reverse.sql",
            "99999999999-forward.sql",
        ] {
            let err = classify(name).unwrap_err();
            assert!(
                matches!(err, PatchError::MalformedPatchName { .. }),
                "{} gave {:?}",
                name,
                err
            );
        }
    }

    #[test]
    fn test_alternate_schemes_are_rejected() {
        for name in [
            "1_forward.sql",
            "1.reverse.sql",
            "2-up.sql",
            "2-down.sql",
            "3-Forward.SQL",
            "3-REVERSE.sql",
        ] {
            let err = classify(name).unwrap_err();
            assert!(
                matches!(err, PatchError::MalformedPatchName { .. }),
                "{} gave {:?}",
                name,
                err
            );
        }
    }

    #[test]
    fn test_load_merges_directions() {
        let dir = PatchDir::new()
            .unwrap()
            .forward(1, "CREATE TABLE t(id int)")
            .reverse(1, "DROP TABLE t")
            .forward(2, "ALTER TABLE t ADD COLUMN name text")
            .file("README.md", "# patches");

        let set = load_patch_set(dir.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.sql_for(1, Direction::Reverse), Some("DROP TABLE t"));
        assert!(set.get(2).unwrap().reverse.is_none());
    }

    #[test]
    fn test_load_rejects_duplicates() {
        let dir = PatchDir::new()
            .unwrap()
            .file("01-forward.sql", "SELECT 1")
            .file("1-forward.sql", "SELECT 2");

        match load_patch_set(dir.path()).unwrap_err() {
            PatchError::DuplicatePatch {
                level,
                direction,
                first,
                second,
            } => {
                assert_eq!(level, 1);
                assert_eq!(direction, Direction::Forward);
                assert_eq!(first, "01-forward.sql");
                assert_eq!(second, "1-forward.sql");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_load_aborts_on_malformed_name() {
        let dir = PatchDir::new()
            .unwrap()
            .forward(1, "SELECT 1")
            .file("x-reverse.sql", "SELECT 1");

        assert!(matches!(
            load_patch_set(dir.path()),
            Err(PatchError::MalformedPatchName { .. })
        ));
    }

    #[test]
    fn test_load_missing_directory_is_io_error() {
        let dir = PatchDir::new().unwrap();
        let missing = dir.path().join("nope");

        match load_patch_set(&missing).unwrap_err() {
            PatchError::Io { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_directories_are_skipped() {
        let dir = PatchDir::new().unwrap().forward(1, "SELECT 1");
        std::fs::create_dir(dir.path().join("2-forward.sql")).unwrap();

        let set = load_patch_set(dir.path()).unwrap();
        assert_eq!(set.levels().collect::<Vec<_>>(), vec![1]);
    }
}
