//! Existence check against the incident subsystem, consulted before a trip closes
use std::collections::HashSet;
use std::sync::Mutex;

pub trait IncidentGate: Send + Sync {
    /// Whether `booking_id` has an unresolved incident severe enough to block closure.
    fn has_blocking_incident(&self, booking_id: &str) -> anyhow::Result<bool>;
}

/// Gate for deployments without an incident subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIncidents;

impl IncidentGate for NoIncidents {
    fn has_blocking_incident(&self, _booking_id: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// In-process record of open blocking incidents, keyed by booking id.
#[derive(Debug, Default)]
pub struct IncidentLog {
    open: Mutex<HashSet<String>>,
}

impl IncidentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, booking_id: &str) {
        self.lock().insert(booking_id.to_string());
    }

    pub fn resolve(&self, booking_id: &str) -> bool {
        self.lock().remove(booking_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl IncidentGate for IncidentLog {
    fn has_blocking_incident(&self, booking_id: &str) -> anyhow::Result<bool> {
        Ok(self.lock().contains(booking_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_incident_blocks_until_resolved() {
        let log = IncidentLog::new();
        log.report("booking_a");

        assert!(log.has_blocking_incident("booking_a").unwrap());
        assert!(!log.has_blocking_incident("booking_b").unwrap());

        assert!(log.resolve("booking_a"));
        assert!(!log.has_blocking_incident("booking_a").unwrap());
    }
}
