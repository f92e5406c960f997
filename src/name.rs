//! Checkpoint name validation.

use std::fmt;

use crate::error::{GuardError, GuardResult};

/// A validated checkpoint name.
///
/// Names consist only of ASCII letters, ASCII digits, `_`, `.` and `-`, so
/// they can be appended to a file prefix without any escaping. A name made
/// only of dots is rejected so it can never resolve to `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointName(String);

impl CheckpointName {
    /// Validate `name` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidName`] if the name is empty, consists
    /// only of dots, or contains any character outside the allowed set.
    pub fn parse(name: &str) -> GuardResult<Self> {
        if name.is_empty() {
            return Err(GuardError::InvalidName {
                name: name.to_string(),
                reason: "name must not be empty".to_string(),
            });
        }

        if let Some(c) = name.chars().find(|c| !is_allowed(*c)) {
            return Err(GuardError::InvalidName {
                name: name.to_string(),
                reason: format!(
                    "character {:?} is not allowed (use letters, digits, '_', '.', '-')",
                    c
                ),
            });
        }

        if name.chars().all(|c| c == '.') {
            return Err(GuardError::InvalidName {
                name: name.to_string(),
                reason: "name must contain a character other than '.'".to_string(),
            });
        }

        Ok(Self(name.to_string()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

impl AsRef<str> for CheckpointName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
