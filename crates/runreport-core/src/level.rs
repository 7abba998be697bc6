//! Entry levels and per-level counters.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a report entry.
///
/// The set is closed and ordered; the order is the one used when counts are
/// listed or rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Summary,
    Info,
    Notice,
    Success,
    Warning,
    Error,
}

impl Level {
    /// All levels, in counting order.
    pub const ALL: [Level; 6] = [
        Level::Summary,
        Level::Info,
        Level::Notice,
        Level::Success,
        Level::Warning,
        Level::Error,
    ];

    /// Lowercase wire name ("summary", "info", ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Summary => "summary",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }

    /// Capitalized label used in summaries ("Warning entries: 2").
    pub fn label(&self) -> &'static str {
        match self {
            Level::Summary => "Summary",
            Level::Info => "Info",
            Level::Notice => "Notice",
            Level::Success => "Success",
            Level::Warning => "Warning",
            Level::Error => "Error",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError(pub String);

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entry level '{}'", self.0)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| ParseLevelError(s.to_string()))
    }
}

/// Number of entries recorded at each level.
///
/// Serialized as a map with exactly one key per level. Deserializing a map
/// that misses a level fails rather than defaulting it to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "BTreeMap<Level, u64>", try_from = "BTreeMap<Level, u64>")]
pub struct LevelCounts([u64; 6]);

impl LevelCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count for one level.
    pub fn get(&self, level: Level) -> u64 {
        self.0[level.index()]
    }

    /// Bump the count for `level` by one.
    pub fn increment(&mut self, level: Level) {
        self.0[level.index()] += 1;
    }

    /// Sum over all levels.
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// `(level, count)` pairs in level order.
    pub fn iter(&self) -> impl Iterator<Item = (Level, u64)> + '_ {
        Level::ALL.into_iter().map(|level| (level, self.get(level)))
    }

    /// Tally the levels of a sequence of entries.
    pub fn tally<'a>(levels: impl IntoIterator<Item = &'a Level>) -> Self {
        let mut counts = Self::default();
        for level in levels {
            counts.increment(*level);
        }
        counts
    }
}

impl From<LevelCounts> for BTreeMap<Level, u64> {
    fn from(counts: LevelCounts) -> Self {
        counts.iter().collect()
    }
}

impl TryFrom<BTreeMap<Level, u64>> for LevelCounts {
    type Error = String;

    fn try_from(map: BTreeMap<Level, u64>) -> Result<Self, Self::Error> {
        let mut counts = [0u64; 6];
        for level in Level::ALL {
            counts[level.index()] = *map
                .get(&level)
                .ok_or_else(|| format!("missing count for level '{}'", level))?;
        }
        Ok(Self(counts))
    }
}
