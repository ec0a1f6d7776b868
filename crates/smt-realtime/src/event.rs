//! The canonical notification event.
//!
//! A [`NotificationEvent`] can only be built by the composer; every transport
//! serializes the same `Arc` instance, so the pull and push transports always
//! describe the same fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire type of a work-order status notification.
pub const WORK_ORDER_UPDATE: &str = "work_order_update";

/// The work order a notification is about, with display fields for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderSubject {
    /// Primary key in the data store.
    pub work_order_id: String,
    /// Human-facing number, e.g. `WO-1`.
    pub work_order_number: String,
    /// Customer display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    /// Assembly number and revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_number: Option<String>,
    /// Production line the order is scheduled on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_name: Option<String>,
}

impl WorkOrderSubject {
    /// Subject with only its identifiers.
    pub fn new(work_order_id: impl Into<String>, work_order_number: impl Into<String>) -> Self {
        Self {
            work_order_id: work_order_id.into(),
            work_order_number: work_order_number.into(),
            customer_name: None,
            assembly_number: None,
            line_name: None,
        }
    }
}

/// Old and new status of a transition, who made it and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    /// Status before the change.
    pub old: String,
    /// Status after the change.
    pub new: String,
    /// Username of whoever made the change.
    pub actor: String,
    /// When the change was reported.
    pub timestamp: DateTime<Utc>,
}

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A work order changed status.
    WorkOrderUpdate,
}

/// An immutable state-change notification.
#[derive(Debug, Serialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    subject: WorkOrderSubject,
    status_change: StatusChange,
    timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub(crate) fn work_order_update(
        subject: WorkOrderSubject,
        old_status: String,
        new_status: String,
        actor: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventKind::WorkOrderUpdate,
            subject,
            status_change: StatusChange {
                old: old_status,
                new: new_status,
                actor,
                timestamp: now,
            },
            timestamp: now,
        }
    }

    /// Event kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Wire type string (`work_order_update`).
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::WorkOrderUpdate => WORK_ORDER_UPDATE,
        }
    }

    /// The work order concerned.
    pub fn subject(&self) -> &WorkOrderSubject {
        &self.subject
    }

    /// The transition.
    pub fn status_change(&self) -> &StatusChange {
        &self.status_change
    }

    /// When the event was composed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serialize to the JSON frame sent on both transports.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NotificationEvent {
        let mut subject = WorkOrderSubject::new("42", "WO-1");
        subject.customer_name = Some("Acme".into());
        NotificationEvent::work_order_update(
            subject,
            "Ready".into(),
            "In Progress".into(),
            "alice".into(),
            Utc::now(),
        )
    }

    #[test]
    fn json_shape() {
        let v: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(v["type"], WORK_ORDER_UPDATE);
        assert_eq!(v["subject"]["work_order_number"], "WO-1");
        assert_eq!(v["subject"]["customer_name"], "Acme");
        assert!(v["subject"].get("line_name").is_none());
        assert_eq!(v["status_change"]["old"], "Ready");
        assert_eq!(v["status_change"]["new"], "In Progress");
        assert_eq!(v["status_change"]["actor"], "alice");
        assert!(v["timestamp"].is_string());
        assert_eq!(v["timestamp"], v["status_change"]["timestamp"]);
    }

    #[test]
    fn subject_deserializes_without_display_fields() {
        let s: WorkOrderSubject =
            serde_json::from_str(r#"{"work_order_id":"7","work_order_number":"WO-7"}"#).unwrap();
        assert_eq!(s, WorkOrderSubject::new("7", "WO-7"));
    }

    #[test]
    fn accessors() {
        let e = sample();
        assert_eq!(e.event_type(), "work_order_update");
        assert_eq!(e.kind(), EventKind::WorkOrderUpdate);
        assert_eq!(e.subject().work_order_id, "42");
        assert_eq!(e.status_change().new, "In Progress");
    }
}
