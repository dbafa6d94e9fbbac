//! Process-wide component health registry and readiness evaluation.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use serde::Serialize;

use crate::types::{ComponentHealth, HealthStatus};

fn registry() -> &'static Mutex<HashMap<String, ComponentHealth>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, ComponentHealth>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Mark a component healthy. Creates the entry if it did not exist.
pub fn mark_component_ok(name: &str) {
    let now = Utc::now();
    let mut guard = registry().lock().expect("health registry lock poisoned");
    let entry = guard
        .entry(name.to_owned())
        .or_insert_with(|| ComponentHealth::starting(now));
    entry.status = HealthStatus::Ok;
    entry.updated_at = now;
    entry.last_ok = Some(now);
}

/// Mark a component errored, recording the message.
pub fn mark_component_error(name: &str, message: impl Into<String>) {
    let now = Utc::now();
    let mut guard = registry().lock().expect("health registry lock poisoned");
    let entry = guard
        .entry(name.to_owned())
        .or_insert_with(|| ComponentHealth::starting(now));
    entry.status = HealthStatus::Error;
    entry.updated_at = now;
    entry.last_error = Some(message.into());
}

/// Increment the restart counter for a component without changing its status.
pub fn bump_component_restart(name: &str) {
    let now = Utc::now();
    let mut guard = registry().lock().expect("health registry lock poisoned");
    let entry = guard
        .entry(name.to_owned())
        .or_insert_with(|| ComponentHealth::starting(now));
    entry.restart_count = entry.restart_count.saturating_add(1);
    entry.updated_at = now;
}

/// Read a stable snapshot of a single component, if registered.
pub fn get_component_health(name: &str) -> Option<ComponentHealth> {
    registry()
        .lock()
        .expect("health registry lock poisoned")
        .get(name)
        .cloned()
}

/// Read a stable snapshot of the whole registry.
pub fn snapshot() -> HashMap<String, ComponentHealth> {
    registry().lock().expect("health registry lock poisoned").clone()
}

/// Clear the registry. Intended for test isolation only.
pub fn reset() {
    registry().lock().expect("health registry lock poisoned").clear();
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessCheck {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub checks: Vec<ReadinessCheck>,
}

/// Evaluate readiness: ready iff every registered component is healthy, or
/// the registry is empty.
pub fn readiness() -> Readiness {
    let snapshot = snapshot();
    let checks: Vec<ReadinessCheck> = snapshot
        .into_iter()
        .map(|(name, health)| ReadinessCheck {
            name,
            healthy: health.is_healthy(),
            message: health.last_error.clone(),
        })
        .collect();

    let status = if checks.iter().all(|check| check.healthy) {
        "ready"
    } else {
        "not_ready"
    };

    Readiness { status, checks }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_is_ready() {
        reset();
        let report = readiness();
        assert_eq!(report.status, "ready");
        assert!(report.checks.is_empty());
    }

    #[test]
    fn error_marks_not_ready() {
        reset();
        mark_component_ok("vector_plane");
        mark_component_error("outbox", "sqlite locked");
        let report = readiness();
        assert_eq!(report.status, "not_ready");
        assert_eq!(report.checks.len(), 2);
    }

    #[test]
    fn ok_after_error_restores_readiness() {
        reset();
        mark_component_error("backend", "boom");
        assert_eq!(readiness().status, "not_ready");
        mark_component_ok("backend");
        assert_eq!(readiness().status, "ready");
    }

    #[test]
    fn restart_bump_does_not_change_status() {
        reset();
        mark_component_ok("backend");
        bump_component_restart("backend");
        let health = get_component_health("backend").expect("registered");
        assert_eq!(health.restart_count, 1);
        assert!(health.is_healthy());
    }
}
