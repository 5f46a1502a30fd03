//! Time-ordered identifier generation.

use std::sync::Mutex;

use domain::RepositoryError;
use uuid::Uuid;

/// Issues UUIDv7 identifiers that strictly increase within the process.
///
/// When the clock yields a value that does not sort after the last issued
/// one, the last value plus one is issued instead.
#[derive(Debug)]
pub struct IdGenerator {
    last: Mutex<Uuid>,
}

impl IdGenerator {
    /// Creates a new generator.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Uuid::nil()),
        }
    }

    /// Returns the next identifier.
    pub fn next_id(&self) -> Result<Uuid, RepositoryError> {
        let mut last = self
            .last
            .lock()
            .map_err(|_| RepositoryError::Generation("id generator lock poisoned".to_string()))?;

        let candidate = Uuid::now_v7();
        let next = if candidate > *last {
            candidate
        } else {
            let bumped = last.as_u128().checked_add(1).ok_or_else(|| {
                RepositoryError::Generation("identifier space exhausted".to_string())
            })?;
            Uuid::from_u128(bumped)
        };

        *last = next;
        Ok(next)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
