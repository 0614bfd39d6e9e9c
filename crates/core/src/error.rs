//! Error aggregation for transaction participants
//!
//! Participants report their own failures independently of each other.
//! [`ErrorList`] accumulates those reports in arrival order and reduces
//! them to a single value with [`ErrorList::into_result`]:
//!
//! - nothing pushed: `Ok(())`
//! - one error: [`Combined::Single`] carrying it verbatim
//! - more than one: [`Combined::Multiple`] carrying all of them

use std::fmt;
use thiserror::Error;

/// Accumulates zero or more errors in push order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorList<E> {
    errors: Vec<E>,
}

impl<E> ErrorList<E> {
    /// Create an empty list
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Create an empty list with room for `capacity` errors
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            errors: Vec::with_capacity(capacity),
        }
    }

    /// Append an error
    pub fn push(&mut self, error: E) {
        self.errors.push(error);
    }

    /// Number of errors accumulated so far
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True if no error has been pushed
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over the accumulated errors in push order
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.errors.iter()
    }

    /// Reduce the list to a single result.
    ///
    /// Returns `Ok(())` for an empty list, the lone error unwrapped for a
    /// list of one, and every error for anything larger.
    pub fn into_result(self) -> Result<(), Combined<E>> {
        let mut errors = self.errors;
        if errors.len() > 1 {
            return Err(Combined::Multiple(errors));
        }
        match errors.pop() {
            Some(only) => Err(Combined::Single(only)),
            None => Ok(()),
        }
    }
}

impl<E> Default for ErrorList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Extend<E> for ErrorList<E> {
    fn extend<I: IntoIterator<Item = E>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl<E> FromIterator<E> for ErrorList<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl<E> IntoIterator for ErrorList<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// The combined form of one or more reported errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Combined<E> {
    /// Exactly one error was reported
    #[error("{0}")]
    Single(E),
    /// Two or more errors were reported, in push order
    #[error("{} errors occurred: {}", .0.len(), join(.0))]
    Multiple(Vec<E>),
}

fn join<E: fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl<E> Combined<E> {
    /// All contained errors in push order
    pub fn errors(&self) -> &[E] {
        match self {
            Combined::Single(error) => std::slice::from_ref(error),
            Combined::Multiple(errors) => errors,
        }
    }

    /// Number of contained errors (always at least one)
    pub fn len(&self) -> usize {
        self.errors().len()
    }

    /// Always false; a `Combined` holds at least one error
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Consume into the contained errors
    pub fn into_errors(self) -> Vec<E> {
        match self {
            Combined::Single(error) => vec![error],
            Combined::Multiple(errors) => errors,
        }
    }
}
