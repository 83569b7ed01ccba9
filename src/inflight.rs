use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::SpeciesError;

/// Per-scope mutual exclusion for cache-miss ingests. Scopes are category
/// codes (plus one for the full enumeration), so the map stays small.
#[derive(Debug, Default)]
pub struct InflightGuard {
    scopes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InflightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `scope`; blocks while another
    /// caller holds it.
    pub fn run<T>(&self, scope: &str, f: impl FnOnce() -> T) -> Result<T, SpeciesError> {
        let lock = {
            let mut scopes = self
                .scopes
                .lock()
                .map_err(|_| SpeciesError::Store("inflight map poisoned".to_string()))?;
            Arc::clone(
                scopes
                    .entry(scope.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _held = lock
            .lock()
            .map_err(|_| SpeciesError::Store(format!("inflight lock for {scope} poisoned")))?;
        Ok(f())
    }
}
