//! Optimistic concurrency expectations for revisioned records.

use crate::error::{DomainError, DomainResult};

/// Revision expectation passed to a compare-and-swap save.
///
/// Stores increment the revision on every successful save; a record that does
/// not exist yet has no revision.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedRevision {
    /// Skip revision checking.
    Any,
    /// Require that no record exists yet.
    New,
    /// Require the record to be at an exact revision.
    Exact(u64),
}

impl ExpectedRevision {
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedRevision::Any, _) => true,
            (ExpectedRevision::New, None) => true,
            (ExpectedRevision::Exact(expected), Some(actual)) => expected == actual,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}
