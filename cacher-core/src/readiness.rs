use std::sync::RwLock;

/// Whether the initial bulk ingest has completed. Kept separate from
/// `Store` so the store stays testable without standing up an ingest
/// pipeline, and so a lookup that arrives before ingest finishes can be
/// told "not ready" rather than misreported as "not found".
pub struct Readiness(RwLock<bool>);

impl Readiness {
    pub fn new() -> Self {
        Readiness(RwLock::new(false))
    }

    pub fn set_ready(&self) {
        *self.0.write().expect("readiness lock poisoned") = true;
    }

    pub fn is_ready(&self) -> bool {
        *self.0.read().expect("readiness lock poisoned")
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}
