//! Support request tracking
//!
//! Issues carry an append-only status history. Deleting a user's support
//! requests erases everything except an outstanding account-delete request,
//! which is kept but anonymized so the deletion itself stays traceable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::{AppError, Result};

/// Title marking the issue that must survive a support-request purge
pub const ACCOUNT_DELETE_REQUEST_TITLE: &str = "Request to delete account";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    New,
    Working,
    WaitingForCustomer,
    Resolved,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::New => "new",
            IssueStatus::Working => "working",
            IssueStatus::WaitingForCustomer => "waiting_for_customer",
            IssueStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for IssueStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(IssueStatus::New),
            "working" => Ok(IssueStatus::Working),
            "waiting_for_customer" => Ok(IssueStatus::WaitingForCustomer),
            "resolved" => Ok(IssueStatus::Resolved),
            _ => Err(AppError::Validation(format!("Invalid issue status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Issue {
    pub key: i64,
    pub created_by: Option<String>,
    pub owner_email: String,
    pub title: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub key: i64,
    pub issue_key: i64,
    pub edited_by: Option<String>,
    pub status: String,
    pub entry_date: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SupportRequestService {
    pool: SqlitePool,
}

impl SupportRequestService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// File a new issue. The initial history entry records who opened it.
    pub async fn create_issue(
        &self,
        created_by: Option<&str>,
        owner_email: &str,
        title: &str,
    ) -> Result<Issue> {
        if owner_email.trim().is_empty() || title.trim().is_empty() {
            return Err(AppError::Validation(
                "Owner email and title are required.".to_string(),
            ));
        }

        let result = sqlx::query(
            "INSERT INTO issues (created_by, owner_email, title, status) VALUES (?, ?, ?, ?)",
        )
        .bind(created_by)
        .bind(owner_email)
        .bind(title)
        .bind(IssueStatus::New.as_str())
        .execute(&self.pool)
        .await?;
        let key = result.last_insert_rowid();

        sqlx::query("INSERT INTO issue_history (issue_key, edited_by, status) VALUES (?, ?, ?)")
            .bind(key)
            .bind(created_by)
            .bind(IssueStatus::New.as_str())
            .execute(&self.pool)
            .await?;

        self.get_issue(key).await
    }

    pub async fn get_issue(&self, key: i64) -> Result<Issue> {
        sqlx::query_as::<_, Issue>(
            "SELECT key, created_by, owner_email, title, status, created_at
             FROM issues WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Support request not found.".to_string()))
    }

    pub async fn get_issues(&self) -> Result<Vec<Issue>> {
        let issues = sqlx::query_as::<_, Issue>(
            "SELECT key, created_by, owner_email, title, status, created_at
             FROM issues ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(issues)
    }

    pub async fn get_issues_by_creator(&self, username: &str) -> Result<Vec<Issue>> {
        let issues = sqlx::query_as::<_, Issue>(
            "SELECT key, created_by, owner_email, title, status, created_at
             FROM issues WHERE created_by = ? ORDER BY key",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        Ok(issues)
    }

    /// Move an issue to a new status, appending a history entry
    pub async fn update_issue_status(
        &self,
        key: i64,
        status: IssueStatus,
        edited_by: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE issues SET status = ? WHERE key = ?")
            .bind(status.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Support request not found.".to_string()));
        }

        sqlx::query("INSERT INTO issue_history (issue_key, edited_by, status) VALUES (?, ?, ?)")
            .bind(key)
            .bind(edited_by)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_history(&self, issue_key: i64) -> Result<Vec<HistoryEntry>> {
        let entries = sqlx::query_as::<_, HistoryEntry>(
            "SELECT key, issue_key, edited_by, status, entry_date
             FROM issue_history WHERE issue_key = ? ORDER BY key",
        )
        .bind(issue_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Delete every issue the user filed, except an account-delete request,
    /// which is kept with its creator and editors blanked out.
    pub async fn delete_support_requests(&self, created_by: &str) -> Result<()> {
        if created_by.trim().is_empty() {
            return Err(AppError::Validation("Username is required.".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM issue_history WHERE issue_key IN
                 (SELECT key FROM issues WHERE created_by = ?1 AND title <> ?2)",
        )
        .bind(created_by)
        .bind(ACCOUNT_DELETE_REQUEST_TITLE)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM issues WHERE created_by = ?1 AND title <> ?2")
            .bind(created_by)
            .bind(ACCOUNT_DELETE_REQUEST_TITLE)
            .execute(&mut *tx)
            .await?;

        // Anonymize the retained account-delete request before unlinking it
        sqlx::query(
            "UPDATE issue_history SET edited_by = NULL WHERE issue_key IN
                 (SELECT key FROM issues WHERE created_by = ?1 AND title = ?2)",
        )
        .bind(created_by)
        .bind(ACCOUNT_DELETE_REQUEST_TITLE)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE issues SET created_by = NULL WHERE created_by = ?")
            .bind(created_by)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    #[tokio::test]
    async fn test_create_issue_records_initial_history() {
        let service = SupportRequestService::new(setup_test_db().await);

        let issue = service
            .create_issue(Some("testUser"), "test@example.com", "Help with package")
            .await
            .unwrap();
        assert_eq!(issue.created_by.as_deref(), Some("testUser"));
        assert_eq!(issue.status, "new");

        let history = service.get_history(issue.key).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].edited_by.as_deref(), Some("testUser"));
        assert_eq!(history[0].status, "new");
    }

    #[tokio::test]
    async fn test_create_issue_requires_email_and_title() {
        let service = SupportRequestService::new(setup_test_db().await);

        let err = service
            .create_issue(None, "", "Help")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = service
            .create_issue(None, "test@example.com", "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_status_appends_history() {
        let service = SupportRequestService::new(setup_test_db().await);
        let issue = service
            .create_issue(Some("testUser"), "test@example.com", "Help")
            .await
            .unwrap();

        service
            .update_issue_status(issue.key, IssueStatus::Working, Some("admin"))
            .await
            .unwrap();

        let issue = service.get_issue(issue.key).await.unwrap();
        assert_eq!(issue.status, "working");

        let history = service.get_history(issue.key).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, "working");
        assert_eq!(history[1].edited_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_update_status_missing_issue() {
        let service = SupportRequestService::new(setup_test_db().await);
        let err = service
            .update_issue_status(42, IssueStatus::Resolved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_requires_username() {
        let service = SupportRequestService::new(setup_test_db().await);
        let err = service.delete_support_requests("  ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_creator_issues_and_history() {
        let service = SupportRequestService::new(setup_test_db().await);
        let doomed = service
            .create_issue(Some("testUser"), "test@example.com", "Broken upload")
            .await
            .unwrap();
        let other = service
            .create_issue(Some("otherUser"), "other@example.com", "Broken download")
            .await
            .unwrap();

        service.delete_support_requests("testUser").await.unwrap();

        let issues = service.get_issues().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].key, other.key);
        assert!(service.get_history(doomed.key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_keeps_account_delete_request_anonymized() {
        let service = SupportRequestService::new(setup_test_db().await);
        service
            .create_issue(Some("testUser"), "test@example.com", "Broken upload")
            .await
            .unwrap();
        let kept = service
            .create_issue(
                Some("testUser"),
                "test@example.com",
                ACCOUNT_DELETE_REQUEST_TITLE,
            )
            .await
            .unwrap();

        service.delete_support_requests("testUser").await.unwrap();

        let issues = service.get_issues().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].key, kept.key);
        assert_eq!(issues[0].title, ACCOUNT_DELETE_REQUEST_TITLE);
        assert!(issues[0].created_by.is_none());

        let history = service.get_history(kept.key).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].edited_by.is_none());
    }

    #[tokio::test]
    async fn test_issue_status_round_trip() {
        for status in [
            IssueStatus::New,
            IssueStatus::Working,
            IssueStatus::WaitingForCustomer,
            IssueStatus::Resolved,
        ] {
            assert_eq!(status.as_str().parse::<IssueStatus>().unwrap(), status);
        }
        assert!("closed".parse::<IssueStatus>().is_err());
    }
}
