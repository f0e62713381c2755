//! Prometheus metrics for the token family service.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Families created (one per login).
pub static FAMILIES_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_family_families_created_total",
        "Total number of token families created",
        &["status"]
    )
    .expect("Failed to register families_created metric")
});

/// Rotation attempts by outcome.
pub static ROTATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_family_rotations_total",
        "Total number of refresh token rotations",
        &["status"]
    )
    .expect("Failed to register rotations metric")
});

/// Validations by outcome.
pub static VALIDATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_family_validations_total",
        "Total number of refresh token validations",
        &["outcome"]
    )
    .expect("Failed to register validations metric")
});

/// Families revoked by reason.
pub static FAMILIES_REVOKED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_family_families_revoked_total",
        "Total number of token families revoked",
        &["reason"]
    )
    .expect("Failed to register families_revoked metric")
});

/// Store operations by operation and status.
pub static STORE_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_family_store_operations_total",
        "Total number of token store operations",
        &["operation", "status"]
    )
    .expect("Failed to register store_operations metric")
});

/// Security events by type.
pub static SECURITY_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_family_security_events_total",
        "Total number of security events",
        &["event_type"]
    )
    .expect("Failed to register security_events metric")
});

/// Record a family creation.
pub fn record_family_created(status: &str) {
    FAMILIES_CREATED.with_label_values(&[status]).inc();
}

/// Record a rotation attempt.
pub fn record_rotation(status: &str) {
    ROTATIONS.with_label_values(&[status]).inc();
}

/// Record a validation outcome.
pub fn record_validation(outcome: &str) {
    VALIDATIONS.with_label_values(&[outcome]).inc();
}

/// Record a family revocation.
pub fn record_family_revoked(reason: &str) {
    FAMILIES_REVOKED.with_label_values(&[reason]).inc();
}

/// Record a store operation.
pub fn record_store_operation(operation: &str, status: &str) {
    STORE_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a security event.
pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}
