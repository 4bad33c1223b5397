//! Security event audit trail.
//!
//! The authority emits fire-and-forget events for session creation, session
//! revocation and refresh token reuse. Delivery runs on a spawned task with a
//! timeout; a failing or slow sink is logged and never affects the operation
//! that produced the event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.revoked")]
    SessionRevoked,
    #[serde(rename = "refresh.reused")]
    RefreshReused,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session.created",
            Self::SessionRevoked => "session.revoked",
            Self::RefreshReused => "refresh.reused",
        }
    }
}

/// A security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    pub session_id: Uuid,
    pub subject_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(
        event_type: AuditEventType,
        session_id: Uuid,
        subject_id: impl Into<String>,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            event_type,
            session_id,
            subject_id: subject_id.into(),
            timestamp,
            reason: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl ToString) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// Audit delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit delivery failed: {0}")]
    Delivery(String),
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persists or forwards one event.
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Writes audit events to the `warden::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            target: "warden::audit",
            event_type = event.event_type.as_str(),
            session_id = %event.session_id,
            subject_id = %event.subject_id,
            timestamp = %event.timestamp,
            reason = event.reason.as_deref().unwrap_or(""),
            "audit event"
        );
        Ok(())
    }
}

/// Keeps events in memory. Useful for tests and local tooling.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Returns the recorded events of one type.
    #[must_use]
    pub fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Delivery("audit buffer poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Fire-and-forget delivery of audit events.
#[derive(Clone)]
pub struct AuditDispatcher {
    sink: Option<Arc<dyn AuditSink>>,
    timeout: Duration,
}

impl AuditDispatcher {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        Self {
            sink: Some(sink),
            timeout,
        }
    }

    /// A dispatcher that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sink: None,
            timeout: Duration::ZERO,
        }
    }

    /// Hands the event to the sink on a background task and returns at once.
    pub fn emit(&self, event: AuditEvent) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                event_type = event.event_type.as_str(),
                "No async runtime; audit event dropped"
            );
            return;
        };

        let timeout = self.timeout;
        runtime.spawn(async move {
            match tokio::time::timeout(timeout, sink.record(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    event_type = event.event_type.as_str(),
                    session_id = %event.session_id,
                    error = %e,
                    "Audit sink rejected event"
                ),
                Err(_) => tracing::warn!(
                    event_type = event.event_type.as_str(),
                    session_id = %event.session_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Audit sink timed out"
                ),
            }
        });
    }
}

impl Default for AuditDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink), Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::Delivery("down".to_string()))
        }
    }

    struct HangingSink;

    #[async_trait]
    impl AuditSink for HangingSink {
        async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn event() -> AuditEvent {
        AuditEvent::new(
            AuditEventType::SessionCreated,
            Uuid::new_v4(),
            "u1",
            OffsetDateTime::now_utc(),
        )
    }

    #[test]
    fn test_event_wire_form() {
        let json = serde_json::to_value(event().with_reason("logout")).unwrap();
        assert_eq!(json["type"], "session.created");
        assert_eq!(json["subject_id"], "u1");
        assert_eq!(json["reason"], "logout");
    }

    #[tokio::test]
    async fn test_dispatch_to_memory_sink() {
        let sink = Arc::new(MemoryAuditSink::new());
        let dispatcher = AuditDispatcher::new(sink.clone(), Duration::from_secs(1));

        dispatcher.emit(event());
        for _ in 0..50 {
            if !sink.events().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.events_of(AuditEventType::SessionCreated).len(), 1);
    }

    #[tokio::test]
    async fn test_failing_and_hanging_sinks_do_not_block() {
        let failing = AuditDispatcher::new(Arc::new(FailingSink), Duration::from_millis(50));
        let hanging = AuditDispatcher::new(Arc::new(HangingSink), Duration::from_millis(50));

        let started = std::time::Instant::now();
        failing.emit(event());
        hanging.emit(event());
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_emit_without_runtime_is_dropped() {
        let sink = Arc::new(MemoryAuditSink::new());
        AuditDispatcher::new(sink.clone(), Duration::from_secs(1)).emit(event());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_dispatcher() {
        AuditDispatcher::disabled().emit(event());
    }
}
