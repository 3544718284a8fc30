//! Notification dispatch for ownership changes
//!
//! Dispatch is fire-and-forget relative to the store transaction: notices go
//! out after the state transition commits, and a failed notice never rolls
//! the transition back.

use async_trait::async_trait;
use std::sync::Mutex;

/// Everything the ownership-request notice carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipRequestNotice {
    pub from: String,
    pub to: String,
    pub package_id: String,
    pub package_url: String,
    pub confirm_url: String,
    pub reject_url: String,
    pub custom_message: String,
    pub policy_message: String,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Invite a candidate to become an owner, with confirm/reject URLs
    async fn send_ownership_request(&self, notice: &OwnershipRequestNotice);

    /// Tell a pending candidate their invitation was cancelled
    async fn send_cancellation_notice(&self, actor: &str, candidate: &str, package_id: &str);

    /// Tell a removed owner they were removed
    async fn send_removal_notice(&self, actor: &str, target: &str, package_id: &str);

    /// Tell the requesting owner the candidate declined
    async fn send_rejection_notice(&self, requesting_owner: &str, candidate: &str, package_id: &str);
}

/// Dispatcher that logs each notice. Stands in for a mail gateway.
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn send_ownership_request(&self, notice: &OwnershipRequestNotice) {
        tracing::info!(
            from = %notice.from,
            to = %notice.to,
            package = %notice.package_id,
            confirm_url = %notice.confirm_url,
            "ownership request sent"
        );
    }

    async fn send_cancellation_notice(&self, actor: &str, candidate: &str, package_id: &str) {
        tracing::info!(%actor, %candidate, package = %package_id, "ownership request cancelled");
    }

    async fn send_removal_notice(&self, actor: &str, target: &str, package_id: &str) {
        tracing::info!(%actor, %target, package = %package_id, "owner removed");
    }

    async fn send_rejection_notice(&self, requesting_owner: &str, candidate: &str, package_id: &str) {
        tracing::info!(
            %requesting_owner,
            %candidate,
            package = %package_id,
            "ownership request rejected"
        );
    }
}

/// A notice captured by [`RecordingDispatcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    OwnershipRequest(OwnershipRequestNotice),
    Cancellation {
        actor: String,
        candidate: String,
        package_id: String,
    },
    Removal {
        actor: String,
        target: String,
        package_id: String,
    },
    Rejection {
        requesting_owner: String,
        candidate: String,
        package_id: String,
    },
}

/// In-memory dispatcher for tests
#[derive(Default)]
pub struct RecordingDispatcher {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices lock poisoned").clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send_ownership_request(&self, notice: &OwnershipRequestNotice) {
        self.notices
            .lock()
            .expect("notices lock poisoned")
            .push(Notice::OwnershipRequest(notice.clone()));
    }

    async fn send_cancellation_notice(&self, actor: &str, candidate: &str, package_id: &str) {
        self.notices
            .lock()
            .expect("notices lock poisoned")
            .push(Notice::Cancellation {
                actor: actor.to_string(),
                candidate: candidate.to_string(),
                package_id: package_id.to_string(),
            });
    }

    async fn send_removal_notice(&self, actor: &str, target: &str, package_id: &str) {
        self.notices
            .lock()
            .expect("notices lock poisoned")
            .push(Notice::Removal {
                actor: actor.to_string(),
                target: target.to_string(),
                package_id: package_id.to_string(),
            });
    }

    async fn send_rejection_notice(&self, requesting_owner: &str, candidate: &str, package_id: &str) {
        self.notices
            .lock()
            .expect("notices lock poisoned")
            .push(Notice::Rejection {
                requesting_owner: requesting_owner.to_string(),
                candidate: candidate.to_string(),
                package_id: package_id.to_string(),
            });
    }
}
