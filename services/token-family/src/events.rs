//! Security events raised by the token family service.
//!
//! Events are handed to a [`SecurityEventSink`]. Emission is best-effort:
//! a sink never fails the operation that raised the event.

use crate::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    /// A token from a revoked family was presented
    TokenRevoked,
    /// An already-redeemed token was presented again
    SessionHijackAttempt,
    /// A family was revoked
    FamilyRevoked,
    /// A detection check ran without its backing store
    TokenStoreDegraded,
}

impl SecurityEventType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::SessionHijackAttempt => "SESSION_HIJACK_ATTEMPT",
            Self::FamilyRevoked => "FAMILY_REVOKED",
            Self::TokenStoreDegraded => "TOKEN_STORE_DEGRADED",
        }
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Needs attention
    Warning,
    /// Security incident, alert on it
    Critical,
}

/// A security-relevant occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    /// What happened
    pub event_type: SecurityEventType,
    /// How bad it is
    pub severity: Severity,
    /// Affected user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Affected family
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    /// Event-specific context
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    /// When it happened
    pub occurred_at: DateTime<Utc>,
}

impl SecurityEvent {
    /// New event with no subject attached.
    pub fn new(event_type: SecurityEventType, severity: Severity) -> Self {
        Self {
            event_type,
            severity,
            user_id: None,
            family_id: None,
            details: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    /// Attach the user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the family.
    #[must_use]
    pub fn with_family(mut self, family_id: impl Into<String>) -> Self {
        self.family_id = Some(family_id.into());
        self
    }

    /// Attach free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for security events.
#[async_trait]
pub trait SecurityEventSink: Send + Sync {
    /// Deliver one event.
    async fn emit(&self, event: SecurityEvent);
}

/// Writes events as structured `tracing` records under the `security` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl SecurityEventSink for TracingEventSink {
    async fn emit(&self, event: SecurityEvent) {
        let user_id = event.user_id.as_deref().unwrap_or("-");
        let family_id = event.family_id.as_deref().unwrap_or("-");
        let event_type = event.event_type.as_str();
        match event.severity {
            Severity::Info => info!(
                target: "security",
                event_type,
                user_id,
                family_id,
                details = %event.details,
                "Security event"
            ),
            Severity::Warning => warn!(
                target: "security",
                event_type,
                user_id,
                family_id,
                details = %event.details,
                "Security event"
            ),
            Severity::Critical => error!(
                target: "security",
                event_type,
                user_id,
                family_id,
                details = %event.details,
                critical = true,
                "Security event"
            ),
        }
    }
}

/// Keeps events in memory, for inspection.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryEventSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far.
    pub async fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().await.clone()
    }

    /// Events of one type.
    pub async fn of_type(&self, event_type: SecurityEventType) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SecurityEventSink for MemoryEventSink {
    async fn emit(&self, event: SecurityEvent) {
        self.events.lock().await.push(event);
    }
}

/// Forwards every event to each inner sink, in order.
#[derive(Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn SecurityEventSink>>,
}

impl FanoutEventSink {
    /// Empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl SecurityEventSink for FanoutEventSink {
    async fn emit(&self, event: SecurityEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

/// Count and deliver an event.
pub(crate) async fn publish(sink: &dyn SecurityEventSink, event: SecurityEvent) {
    metrics::record_security_event(event.event_type.as_str());
    sink.emit(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let event = SecurityEvent::new(SecurityEventType::SessionHijackAttempt, Severity::Critical)
            .with_user("user-1")
            .with_family("family-1");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["eventType"], "SESSION_HIJACK_ATTEMPT");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["familyId"], "family-1");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_as_str_matches_serde() {
        for ty in [
            SecurityEventType::TokenRevoked,
            SecurityEventType::SessionHijackAttempt,
            SecurityEventType::FamilyRevoked,
            SecurityEventType::TokenStoreDegraded,
        ] {
            assert_eq!(serde_json::to_value(ty).unwrap(), ty.as_str());
        }
    }

    #[tokio::test]
    async fn test_memory_sink_filters() {
        let sink = MemoryEventSink::new();
        sink.emit(SecurityEvent::new(SecurityEventType::FamilyRevoked, Severity::Warning))
            .await;
        sink.emit(SecurityEvent::new(SecurityEventType::TokenRevoked, Severity::Warning))
            .await;

        assert_eq!(sink.events().await.len(), 2);
        assert_eq!(sink.of_type(SecurityEventType::TokenRevoked).await.len(), 1);
    }

    #[tokio::test]
    async fn test_fanout_reaches_all_sinks() {
        let a = Arc::new(MemoryEventSink::new());
        let b = Arc::new(MemoryEventSink::new());
        let fanout = FanoutEventSink::new()
            .with_sink(a.clone())
            .with_sink(b.clone())
            .with_sink(Arc::new(TracingEventSink));

        publish(
            &fanout,
            SecurityEvent::new(SecurityEventType::TokenStoreDegraded, Severity::Warning),
        )
        .await;

        assert_eq!(a.events().await.len(), 1);
        assert_eq!(b.events().await.len(), 1);
    }
}
