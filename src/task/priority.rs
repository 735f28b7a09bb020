use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Score at or above which a task counts as HIGH priority.
pub const HIGH_THRESHOLD: u8 = 33;
/// Score at or above which a task counts as MEDIUM priority.
pub const MEDIUM_THRESHOLD: u8 = 24;

pub const MIN_SCORE: u8 = 15;
pub const MAX_SCORE: u8 = 45;

/// Ordinal rating used both for the five factors and for the derived level.
/// LOW = 1, MEDIUM = 2, HIGH = 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Level {
    #[default]
    Low,
    Medium,
    High,
}

impl Level {
    pub fn value(self) -> u8 {
        match self {
            Level::Low => 1,
            Level::Medium => 2,
            Level::High => 3,
        }
    }

    /// Map a weighted total onto a level: >= 33 HIGH, >= 24 MEDIUM, else LOW.
    pub fn from_score(total_score: u8) -> Level {
        if total_score >= HIGH_THRESHOLD {
            Level::High
        } else if total_score >= MEDIUM_THRESHOLD {
            Level::Medium
        } else {
            Level::Low
        }
    }

    /// Lenient conversion for callers that would rather clamp than reject.
    pub fn clamp_from(value: i64) -> Level {
        match value {
            i64::MIN..=1 => Level::Low,
            2 => Level::Medium,
            _ => Level::High,
        }
    }
}

impl TryFrom<u8> for Level {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Level::Low),
            2 => Ok(Level::Medium),
            3 => Ok(Level::High),
            other => Err(Error::Validation(format!(
                "priority factor must be 1, 2 or 3 (got {other})"
            ))),
        }
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> u8 {
        level.value()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Low => "LOW",
            Level::Medium => "MEDIUM",
            Level::High => "HIGH",
        };
        f.pad(name)
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" | "L" => Ok(Level::Low),
            "MEDIUM" | "MED" | "M" => Ok(Level::Medium),
            "HIGH" | "H" => Ok(Level::High),
            other => other
                .parse::<u8>()
                .map_err(|_| Error::Validation(format!("Invalid priority level: {s}")))
                .and_then(Level::try_from),
        }
    }
}

/// The five weighted factors of a task's priority.
///
/// `totalScore` is derived, never stored on the struct. It is written out when
/// serializing (for interoperability with existing records) and discarded when
/// reading, so a stale stored score can never leak back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "PriorityRecord", into = "PriorityRecord")]
pub struct Priority {
    pub importance: Level,
    pub urgency: Level,
    pub easiness: Level,
    pub interest: Level,
    pub dependency: Level,
}

impl Priority {
    pub const WEIGHTS: [u8; 5] = [5, 4, 3, 2, 1];

    pub fn new(
        importance: Level,
        urgency: Level,
        easiness: Level,
        interest: Level,
        dependency: Level,
    ) -> Self {
        Self {
            importance,
            urgency,
            easiness,
            interest,
            dependency,
        }
    }

    /// Every factor set to the same level.
    pub fn uniform(level: Level) -> Self {
        Self::new(level, level, level, level, level)
    }

    pub fn factors(&self) -> [Level; 5] {
        [
            self.importance,
            self.urgency,
            self.easiness,
            self.interest,
            self.dependency,
        ]
    }

    /// Weighted sum 5*importance + 4*urgency + 3*easiness + 2*interest + dependency.
    pub fn total_score(&self) -> u8 {
        self.factors()
            .iter()
            .zip(Self::WEIGHTS)
            .map(|(level, weight)| level.value() * weight)
            .sum()
    }

    pub fn level(&self) -> Level {
        Level::from_score(self.total_score())
    }

    /// Compact factor summary, e.g. `I:HIGH U:LOW E:MEDIUM In:LOW D:LOW`.
    pub fn summary(&self) -> String {
        format!(
            "I:{} U:{} E:{} In:{} D:{}",
            self.importance, self.urgency, self.easiness, self.interest, self.dependency
        )
    }
}

/// Wire shape of a priority, including the cached score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriorityRecord {
    #[serde(default)]
    importance: Level,
    #[serde(default)]
    urgency: Level,
    #[serde(default)]
    easiness: Level,
    #[serde(default)]
    interest: Level,
    #[serde(default)]
    dependency: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_score: Option<u8>,
}

impl From<PriorityRecord> for Priority {
    fn from(record: PriorityRecord) -> Self {
        Priority::new(
            record.importance,
            record.urgency,
            record.easiness,
            record.interest,
            record.dependency,
        )
    }
}

impl From<Priority> for PriorityRecord {
    fn from(priority: Priority) -> Self {
        Self {
            importance: priority.importance,
            urgency: priority.urgency,
            easiness: priority.easiness,
            interest: priority.interest,
            dependency: priority.dependency,
            total_score: Some(priority.total_score()),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.level(), self.total_score(), MAX_SCORE)
    }
}
