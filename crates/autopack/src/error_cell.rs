//! Settable-once error slot shared by a stream and its background worker

use crate::Error;
use std::sync::OnceLock;
use tracing::debug;

/// Holds the first error reported by either side of a stream
///
/// Later stores are discarded, and reads never observe a partially written
/// value.
#[derive(Debug, Default)]
pub struct ErrorCell {
    slot: OnceLock<Error>,
}

impl ErrorCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless an error is already stored
    ///
    /// Returns `true` when this call set the cell.
    pub fn store(&self, err: Error) -> bool {
        match self.slot.set(err) {
            Ok(()) => true,
            Err(discarded) => {
                debug!(error = %discarded, "Discarding error; cell already holds one");
                false
            }
        }
    }

    /// The stored error, if any
    pub fn get(&self) -> Option<&Error> {
        self.slot.get()
    }

    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }

    /// `Err` with a clone of the stored error, or `Ok(())`
    pub fn check(&self) -> crate::Result<()> {
        match self.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
