//! Calendar-date addressing for entries.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypeError;

/// A calendar date string in `YYYY-MM-DD` form.
///
/// The grammar is fixed: ten characters, digits in the date positions,
/// dashes at positions 4 and 7. Date validity is deliberately not
/// enforced; `2099-13-45` is accepted, `26-01-01` is not. Entries are
/// addressed by day id, and the lexicographic order of the grammar is
/// chronological order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayId(String);

impl DayId {
    /// Parse a day id, validating the grammar only.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let bytes = s.as_bytes();
        if bytes.len() != 10 {
            return Err(TypeError::InvalidDayId(s.to_string()));
        }
        for (i, b) in bytes.iter().enumerate() {
            let ok = match i {
                4 | 7 => *b == b'-',
                _ => b.is_ascii_digit(),
            };
            if !ok {
                return Err(TypeError::InvalidDayId(s.to_string()));
            }
        }
        Ok(Self(s.to_string()))
    }

    /// The epoch day, used as the default `since` bound on fetches.
    pub fn epoch() -> Self {
        Self("1970-01-01".to_string())
    }

    /// The printable form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DayId({})", self.0)
    }
}
