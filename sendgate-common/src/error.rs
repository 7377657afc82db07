//! Validation errors for configuration updates.

use std::fmt;

use thiserror::Error;

/// A single field outside its permitted range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub value: u64,
    pub min: u64,
    pub max: u64,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} (expected {}..={})",
            self.field, self.value, self.min, self.max
        )
    }
}

/// Raised when a configuration violates one or more numeric bounds.
///
/// Every offending field is reported, not just the first one found, so a caller
/// can fix its input in one round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {}", join(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Names of the fields that failed validation, in check order
    #[must_use]
    pub fn fields(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.field).collect()
    }
}

fn join(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Accumulates range violations while a config is checked
#[derive(Debug, Default)]
pub(crate) struct Validator {
    violations: Vec<FieldViolation>,
}

impl Validator {
    pub(crate) fn check(&mut self, field: &'static str, value: u64, min: u64, max: u64) {
        if !(min..=max).contains(&value) {
            self.violations.push(FieldViolation {
                field,
                value,
                min,
                max,
            });
        }
    }

    pub(crate) fn finish(self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: self.violations,
            })
        }
    }
}
