//! Audit-record serialization and persistence
//!
//! An audit record describes one change to a resource. At save time it is
//! wrapped with the actor into an audit entry, rendered as JSON, and handed
//! to a backing store. The store is a narrow seam: production backends live
//! elsewhere, and [`AuditService::none`] drops everything.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::error::{AppError, Result};

/// Actions recorded against a package registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AddOwnershipRequest,
    DeleteOwnershipRequest,
    AddOwner,
    RemoveOwner,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AddOwnershipRequest => "add_ownership_request",
            AuditAction::DeleteOwnershipRequest => "delete_ownership_request",
            AuditAction::AddOwner => "add_owner",
            AuditAction::RemoveOwner => "remove_owner",
        }
    }
}

/// Audit record for an ownership change on a package registration
#[derive(Debug, Clone, Serialize)]
pub struct PackageOwnershipAuditRecord {
    pub package_id: String,
    pub action: AuditAction,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requesting_owner: Option<String>,
}

impl PackageOwnershipAuditRecord {
    pub fn new(
        package_id: impl Into<String>,
        action: AuditAction,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            package_id: package_id.into(),
            action,
            owner: owner.into(),
            requesting_owner: None,
        }
    }

    pub fn with_requesting_owner(mut self, requesting_owner: impl Into<String>) -> Self {
        self.requesting_owner = Some(requesting_owner.into());
        self
    }

    pub fn resource_type(&self) -> &'static str {
        "package_registration"
    }

    /// Path identifying the audited resource, used by file-backed stores
    pub fn path(&self) -> String {
        self.package_id.to_lowercase()
    }
}

/// Who performed the audited action, resolved at save time
#[derive(Debug, Clone, Serialize)]
pub struct AuditActor {
    pub machine_name: String,
    pub timestamp_utc: DateTime<Utc>,
}

impl AuditActor {
    pub fn machine() -> Self {
        Self {
            machine_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            timestamp_utc: Utc::now(),
        }
    }
}

/// A record paired with its actor, the unit of persistence
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry<'a> {
    pub record: &'a PackageOwnershipAuditRecord,
    pub actor: AuditActor,
}

/// Backing store for rendered audit entries
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn save(
        &self,
        audit_data: &str,
        resource_type: &str,
        path: &str,
        action: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

/// Store with no backing storage
pub struct NullAuditStore;

#[async_trait]
impl AuditStore for NullAuditStore {
    async fn save(&self, _: &str, _: &str, _: &str, _: &str, _: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

/// An entry captured by [`InMemoryAuditStore`]
#[derive(Debug, Clone)]
pub struct SavedAudit {
    pub audit_data: String,
    pub resource_type: String,
    pub path: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// Store that keeps entries in memory, for tests
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: Mutex<Vec<SavedAudit>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<SavedAudit> {
        self.entries.lock().expect("entries lock poisoned").clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn save(
        &self,
        audit_data: &str,
        resource_type: &str,
        path: &str,
        action: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.entries
            .lock()
            .expect("entries lock poisoned")
            .push(SavedAudit {
                audit_data: audit_data.to_string(),
                resource_type: resource_type.to_string(),
                path: path.to_string(),
                action: action.to_string(),
                timestamp,
            });
        Ok(())
    }
}

/// Renders audit entries and hands them to the configured store
#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn AuditStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// An auditing service with no backing store
    pub fn none() -> Self {
        Self::new(Arc::new(NullAuditStore))
    }

    /// Render an entry as indented JSON
    pub fn render_entry(&self, entry: &AuditEntry<'_>) -> Result<String> {
        serde_json::to_string_pretty(entry)
            .map_err(|e| AppError::Internal(format!("Failed to render audit entry: {}", e)))
    }

    pub async fn save_record(&self, record: &PackageOwnershipAuditRecord) -> Result<()> {
        let actor = AuditActor::machine();
        let timestamp = actor.timestamp_utc;
        let entry = AuditEntry { record, actor };
        let rendered = self.render_entry(&entry)?;

        self.store
            .save(
                &rendered,
                record.resource_type(),
                &record.path(),
                record.action.as_str(),
                timestamp,
            )
            .await
    }
}
