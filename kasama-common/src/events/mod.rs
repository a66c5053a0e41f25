//! Event types for the Kasama event system
//!
//! Provides shared event definitions and EventBus for Kasama services.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Notification kinds delivered to account owners
///
/// Stored in the `notifications` table and broadcast over the event bus.
/// Consumers must tolerate duplicates; the idempotency key is
/// (submission identifier, decision outcome).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Individual KYC submission approved
    KycApproved,
    /// Individual KYC submission rejected
    KycRejected,
    /// Agency KYC submission approved
    AgencyKycApproved,
    /// Agency KYC submission rejected
    AgencyKycRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::KycApproved => "KYC_APPROVED",
            NotificationKind::KycRejected => "KYC_REJECTED",
            NotificationKind::AgencyKycApproved => "AGENCY_KYC_APPROVED",
            NotificationKind::AgencyKycRejected => "AGENCY_KYC_REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "KYC_APPROVED" => Some(NotificationKind::KycApproved),
            "KYC_REJECTED" => Some(NotificationKind::KycRejected),
            "AGENCY_KYC_APPROVED" => Some(NotificationKind::AgencyKycApproved),
            "AGENCY_KYC_REJECTED" => Some(NotificationKind::AgencyKycRejected),
            _ => None,
        }
    }
}

/// Kasama event types
///
/// Events are broadcast via EventBus and can be serialized for SSE
/// transmission. All events use this central enum for type safety and
/// exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KasamaEvent {
    /// A KYC submission was received and queued for analysis
    ///
    /// Triggers:
    /// - SSE: show "verification in progress" in the owner's UI
    SubmissionReceived {
        /// Submission UUID
        submission_id: Uuid,
        /// Owner account UUID
        owner_id: Uuid,
        /// Number of documents in the submission
        document_count: usize,
        /// When the submission was accepted
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A single document finished analysis
    ///
    /// Triggers:
    /// - SSE: per-document progress display
    DocumentAnalyzed {
        /// Submission UUID
        submission_id: Uuid,
        /// Document UUID
        document_id: Uuid,
        /// Document role (e.g., "ID_FRONT")
        role: String,
        /// Verdict string ("PASSED", "WARNING", "FAILED", "SKIPPED")
        status: String,
        /// Overall analyzer confidence for this document (0.0-1.0)
        confidence: f64,
        /// When analysis completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The decision engine reached a terminal or review outcome
    ///
    /// Triggers:
    /// - SSE: final status in the owner's UI
    /// - Reviewer tooling: queue refresh on PENDING_HUMAN_REVIEW
    DecisionReached {
        /// Submission UUID
        submission_id: Uuid,
        /// Outcome string ("AUTO_APPROVED", "AUTO_REJECTED", "PENDING_HUMAN_REVIEW")
        outcome: String,
        /// Aggregated confidence across documents (0.0-1.0)
        overall_confidence: f64,
        /// When the decision was committed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A notification row was written for an account owner
    Notification {
        /// Submission UUID the notification refers to
        submission_id: Uuid,
        /// Owner account UUID
        owner_id: Uuid,
        /// Notification kind
        kind: NotificationKind,
        /// User-facing message
        message: String,
        /// Earliest time the owner may re-submit (rejections only)
        retry_eligible_at: Option<chrono::DateTime<chrono::Utc>>,
    },
}

/// Event bus for broadcasting events to subscribers
///
/// Wraps a tokio broadcast channel. Slow subscribers lose old events rather
/// than blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KasamaEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<KasamaEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the number of subscribers the event reached. Zero subscribers
    /// is not an error: services emit unconditionally and SSE clients attach
    /// when they care.
    pub fn emit(&self, event: KasamaEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(_) => 0,
        }
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
