//! Gallery server - package ownership management and support requests

pub mod api;
pub mod audit;
pub mod error;
pub mod models;
pub mod notify;
pub mod ownership;
pub mod policy;
pub mod store;
pub mod support;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::audit::AuditService;
use crate::notify::{NotificationDispatcher, TracingDispatcher};
use crate::ownership::OwnershipService;
use crate::store::Store;
use crate::support::SupportRequestService;

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub ownership: OwnershipService,
    pub support: SupportRequestService,
}

impl AppState {
    pub fn new(pool: SqlitePool, site_root: &str) -> Arc<Self> {
        Self::with_services(
            pool,
            site_root,
            Arc::new(TracingDispatcher),
            AuditService::none(),
        )
    }

    /// Build state with explicit notification and audit backends
    pub fn with_services(
        pool: SqlitePool,
        site_root: &str,
        notifier: Arc<dyn NotificationDispatcher>,
        audit: AuditService,
    ) -> Arc<Self> {
        let store = Store::new(pool.clone());
        let ownership = OwnershipService::new(store.clone(), notifier, audit, site_root);
        let support = SupportRequestService::new(pool);
        Arc::new(Self {
            store,
            ownership,
            support,
        })
    }
}
