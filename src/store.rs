//! Database store for users, packages, owners, and ownership requests
//!
//! The store is the sole serialization point for the ownership workflow: all
//! compound writes run inside a single transaction, and uniqueness
//! constraints guarantee that two concurrent add-owner calls for the same
//! (package, candidate) pair cannot both succeed.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{MembershipRole, OwnershipRequest, PackageRegistration, SecurityPolicy, User};
use crate::ownership::messages;

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // User operations

    pub async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (username, email, unconfirmed_email, is_organization)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.unconfirmed_email)
        .bind(user.is_organization)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT username, email, unconfirmed_email, is_organization
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn add_membership(
        &self,
        organization: &str,
        member: &str,
        role: MembershipRole,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (organization, member, role)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(organization)
        .bind(member)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Security policy operations

    pub async fn add_security_policy(&self, username: &str, policy: &SecurityPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO security_policies (username, name, subscription)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(&policy.name)
        .bind(&policy.subscription)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn policies_for(&self, username: &str) -> Result<Vec<SecurityPolicy>> {
        let policies = sqlx::query_as::<_, SecurityPolicy>(
            r#"
            SELECT name, subscription
            FROM security_policies
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        Ok(policies)
    }

    /// Whether the user holds any policy belonging to the given subscription
    pub async fn is_subscribed(&self, username: &str, subscription: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM security_policies
            WHERE username = ? AND subscription = ?
            LIMIT 1
            "#,
        )
        .bind(username)
        .bind(subscription)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    // Package operations

    pub async fn create_package(&self, id: &str) -> Result<PackageRegistration> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO packages (id, created_at)
            VALUES (?, ?)
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(PackageRegistration {
            id: id.to_string(),
            created_at: now,
        })
    }

    /// Package identifiers compare case-insensitively
    pub async fn find_package(&self, id: &str) -> Result<Option<PackageRegistration>> {
        let package = sqlx::query_as::<_, PackageRegistration>(
            r#"
            SELECT id, created_at
            FROM packages
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(package)
    }

    // Ownership operations

    pub async fn get_owners(&self, package_id: &str) -> Result<Vec<User>> {
        let owners = sqlx::query_as::<_, User>(
            r#"
            SELECT u.username, u.email, u.unconfirmed_email, u.is_organization
            FROM package_owners po
            JOIN users u ON u.username = po.owner
            WHERE po.package_id = ?
            ORDER BY u.username
            "#,
        )
        .bind(package_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(owners)
    }

    pub async fn is_owner(&self, package_id: &str, username: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM package_owners
            WHERE package_id = ? AND owner = ?
            "#,
        )
        .bind(package_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    pub async fn count_owners(&self, package_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM package_owners WHERE package_id = ?
            "#,
        )
        .bind(package_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Management rights over a package's owner list: the user is a direct
    /// owner, or an admin member of an organization that owns the package.
    pub async fn can_manage_owners(&self, username: &str, package_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM package_owners
            WHERE package_id = ? AND owner = ?
            UNION
            SELECT 1 FROM package_owners po
            JOIN memberships m ON m.organization = po.owner
            WHERE po.package_id = ? AND m.member = ? AND m.role = 'admin'
            "#,
        )
        .bind(package_id)
        .bind(username)
        .bind(package_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    pub async fn add_owner(&self, package_id: &str, username: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO package_owners (package_id, owner)
            VALUES (?, ?)
            "#,
        )
        .bind(package_id)
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(messages::already_owner(username))
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    pub async fn remove_owner(&self, package_id: &str, username: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM package_owners
            WHERE package_id = ? AND owner = ?
            "#,
        )
        .bind(package_id)
        .bind(username)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // Ownership request operations

    pub async fn get_pending_requests(
        &self,
        package_id: &str,
        requesting_owner: Option<&str>,
        new_owner: Option<&str>,
    ) -> Result<Vec<OwnershipRequest>> {
        let requests = sqlx::query_as::<_, OwnershipRequest>(
            r#"
            SELECT package_id, requesting_owner, new_owner, confirmation_code, created_at
            FROM ownership_requests
            WHERE package_id = ?1
              AND (?2 IS NULL OR requesting_owner = ?2)
              AND (?3 IS NULL OR new_owner = ?3)
            ORDER BY created_at ASC
            "#,
        )
        .bind(package_id)
        .bind(requesting_owner)
        .bind(new_owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    /// Create a pending ownership request with a freshly generated single-use
    /// confirmation code. The (package, candidate) uniqueness constraint
    /// rejects a concurrent duplicate.
    pub async fn create_ownership_request(
        &self,
        package_id: &str,
        requesting_owner: &str,
        new_owner: &str,
    ) -> Result<OwnershipRequest> {
        let confirmation_code = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO ownership_requests
                (package_id, requesting_owner, new_owner, confirmation_code, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(package_id)
        .bind(requesting_owner)
        .bind(new_owner)
        .bind(&confirmation_code)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(messages::already_owner(new_owner))
            } else {
                e.into()
            }
        })?;

        Ok(OwnershipRequest {
            package_id: package_id.to_string(),
            requesting_owner: requesting_owner.to_string(),
            new_owner: new_owner.to_string(),
            confirmation_code,
            created_at: now,
        })
    }

    pub async fn delete_ownership_request(
        &self,
        package_id: &str,
        new_owner: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM ownership_requests
            WHERE package_id = ? AND new_owner = ?
            "#,
        )
        .bind(package_id)
        .bind(new_owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Promote a pending request to ownership. The confirmation code is
    /// consumed in the same transaction that inserts the ownership row, so a
    /// redeemed code cannot be replayed.
    pub async fn promote_to_owner(
        &self,
        package_id: &str,
        new_owner: &str,
        confirmation_code: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM ownership_requests
            WHERE package_id = ? AND new_owner = ? AND confirmation_code = ?
            "#,
        )
        .bind(package_id)
        .bind(new_owner)
        .bind(confirmation_code)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if deleted == 0 {
            return Err(AppError::NotFound(messages::REQUEST_NOT_VALID.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO package_owners (package_id, owner)
            VALUES (?, ?)
            "#,
        )
        .bind(package_id)
        .bind(new_owner)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(messages::already_owner(new_owner))
            } else {
                e.into()
            }
        })?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete a pending request by its confirmation code, returning the
    /// request that was destroyed
    pub async fn reject_ownership_request(
        &self,
        package_id: &str,
        new_owner: &str,
        confirmation_code: &str,
    ) -> Result<Option<OwnershipRequest>> {
        let mut tx = self.pool.begin().await?;

        let request = sqlx::query_as::<_, OwnershipRequest>(
            r#"
            SELECT package_id, requesting_owner, new_owner, confirmation_code, created_at
            FROM ownership_requests
            WHERE package_id = ? AND new_owner = ? AND confirmation_code = ?
            "#,
        )
        .bind(package_id)
        .bind(new_owner)
        .bind(confirmation_code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(request) = request else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            DELETE FROM ownership_requests
            WHERE package_id = ? AND new_owner = ? AND confirmation_code = ?
            "#,
        )
        .bind(package_id)
        .bind(new_owner)
        .bind(confirmation_code)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Store {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        Store::new(pool)
    }

    async fn seed_package(store: &Store) {
        store
            .create_user(&User::new("maintainer", "maintainer@example.com"))
            .await
            .unwrap();
        store.create_package("FakePackage").await.unwrap();
        store.add_owner("FakePackage", "maintainer").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = setup_test_db().await;
        store
            .create_user(&User::new("alice", "alice@example.com"))
            .await
            .unwrap();

        let user = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.is_confirmed());
    }

    #[tokio::test]
    async fn test_find_user_not_found() {
        let store = setup_test_db().await;
        let user = store.find_user_by_username("ghost").await.unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn test_find_package_case_insensitive() {
        let store = setup_test_db().await;
        store.create_package("FakePackage").await.unwrap();

        let package = store.find_package("fakepackage").await.unwrap().unwrap();
        assert_eq!(package.id, "FakePackage");
    }

    #[tokio::test]
    async fn test_add_owner_twice_is_conflict() {
        let store = setup_test_db().await;
        seed_package(&store).await;

        let result = store.add_owner("FakePackage", "maintainer").await;
        assert!(matches!(result.unwrap_err(), AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_remove_owner() {
        let store = setup_test_db().await;
        seed_package(&store).await;

        assert!(store.remove_owner("FakePackage", "maintainer").await.unwrap());
        assert!(!store.is_owner("FakePackage", "maintainer").await.unwrap());
        assert!(!store.remove_owner("FakePackage", "maintainer").await.unwrap());
    }

    #[tokio::test]
    async fn test_can_manage_owners_direct_owner() {
        let store = setup_test_db().await;
        seed_package(&store).await;

        assert!(store
            .can_manage_owners("maintainer", "FakePackage")
            .await
            .unwrap());
        assert!(!store.can_manage_owners("ghost", "FakePackage").await.unwrap());
    }

    #[tokio::test]
    async fn test_can_manage_owners_organization_admin() {
        let store = setup_test_db().await;
        store
            .create_user(&User::organization("acme", "ops@acme.example"))
            .await
            .unwrap();
        store
            .create_user(&User::new("admin", "admin@acme.example"))
            .await
            .unwrap();
        store
            .create_user(&User::new("collab", "collab@acme.example"))
            .await
            .unwrap();
        store
            .add_membership("acme", "admin", MembershipRole::Admin)
            .await
            .unwrap();
        store
            .add_membership("acme", "collab", MembershipRole::Collaborator)
            .await
            .unwrap();
        store.create_package("OrgPackage").await.unwrap();
        store.add_owner("OrgPackage", "acme").await.unwrap();

        assert!(store.can_manage_owners("acme", "OrgPackage").await.unwrap());
        assert!(store.can_manage_owners("admin", "OrgPackage").await.unwrap());
        assert!(!store.can_manage_owners("collab", "OrgPackage").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_ownership_request() {
        let store = setup_test_db().await;
        seed_package(&store).await;
        store
            .create_user(&User::new("newbie", "newbie@example.com"))
            .await
            .unwrap();

        let request = store
            .create_ownership_request("FakePackage", "maintainer", "newbie")
            .await
            .unwrap();
        assert!(!request.confirmation_code.is_empty());

        let pending = store
            .get_pending_requests("FakePackage", None, Some("newbie"))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requesting_owner, "maintainer");
    }

    #[tokio::test]
    async fn test_duplicate_ownership_request_is_conflict() {
        let store = setup_test_db().await;
        seed_package(&store).await;
        store
            .create_user(&User::new("newbie", "newbie@example.com"))
            .await
            .unwrap();

        store
            .create_ownership_request("FakePackage", "maintainer", "newbie")
            .await
            .unwrap();
        let result = store
            .create_ownership_request("FakePackage", "maintainer", "newbie")
            .await;
        assert!(matches!(result.unwrap_err(), AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_get_pending_requests_filters() {
        let store = setup_test_db().await;
        seed_package(&store).await;
        store
            .create_user(&User::new("a", "a@example.com"))
            .await
            .unwrap();
        store
            .create_user(&User::new("b", "b@example.com"))
            .await
            .unwrap();
        store
            .create_ownership_request("FakePackage", "maintainer", "a")
            .await
            .unwrap();
        store
            .create_ownership_request("FakePackage", "maintainer", "b")
            .await
            .unwrap();

        let all = store
            .get_pending_requests("FakePackage", None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let only_a = store
            .get_pending_requests("FakePackage", None, Some("a"))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].new_owner, "a");

        let by_requester = store
            .get_pending_requests("FakePackage", Some("maintainer"), None)
            .await
            .unwrap();
        assert_eq!(by_requester.len(), 2);

        let none = store
            .get_pending_requests("FakePackage", Some("ghost"), None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_promote_to_owner_consumes_code() {
        let store = setup_test_db().await;
        seed_package(&store).await;
        store
            .create_user(&User::new("newbie", "newbie@example.com"))
            .await
            .unwrap();

        let request = store
            .create_ownership_request("FakePackage", "maintainer", "newbie")
            .await
            .unwrap();

        store
            .promote_to_owner("FakePackage", "newbie", &request.confirmation_code)
            .await
            .unwrap();
        assert!(store.is_owner("FakePackage", "newbie").await.unwrap());

        // The code is single-use
        let replay = store
            .promote_to_owner("FakePackage", "newbie", &request.confirmation_code)
            .await;
        assert!(matches!(replay.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_promote_with_wrong_code_fails() {
        let store = setup_test_db().await;
        seed_package(&store).await;
        store
            .create_user(&User::new("newbie", "newbie@example.com"))
            .await
            .unwrap();
        store
            .create_ownership_request("FakePackage", "maintainer", "newbie")
            .await
            .unwrap();

        let result = store
            .promote_to_owner("FakePackage", "newbie", "wrong-code")
            .await;
        assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
        assert!(!store.is_owner("FakePackage", "newbie").await.unwrap());
    }

    #[tokio::test]
    async fn test_reject_ownership_request() {
        let store = setup_test_db().await;
        seed_package(&store).await;
        store
            .create_user(&User::new("newbie", "newbie@example.com"))
            .await
            .unwrap();

        let request = store
            .create_ownership_request("FakePackage", "maintainer", "newbie")
            .await
            .unwrap();

        let rejected = store
            .reject_ownership_request("FakePackage", "newbie", &request.confirmation_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.requesting_owner, "maintainer");

        let pending = store
            .get_pending_requests("FakePackage", None, Some("newbie"))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_reject_with_wrong_code_is_none() {
        let store = setup_test_db().await;
        seed_package(&store).await;
        store
            .create_user(&User::new("newbie", "newbie@example.com"))
            .await
            .unwrap();
        store
            .create_ownership_request("FakePackage", "maintainer", "newbie")
            .await
            .unwrap();

        let rejected = store
            .reject_ownership_request("FakePackage", "newbie", "wrong-code")
            .await
            .unwrap();
        assert!(rejected.is_none());
    }

    #[tokio::test]
    async fn test_is_subscribed() {
        let store = setup_test_db().await;
        store
            .create_user(&User::new("alice", "alice@example.com"))
            .await
            .unwrap();
        store
            .add_security_policy(
                "alice",
                &SecurityPolicy {
                    name: "RequirePackageVerifyScope".to_string(),
                    subscription: "SecurePush".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(store.is_subscribed("alice", "SecurePush").await.unwrap());
        assert!(!store.is_subscribed("alice", "Other").await.unwrap());
        assert!(!store.is_subscribed("bob", "SecurePush").await.unwrap());
    }

    #[tokio::test]
    async fn test_policies_for() {
        let store = setup_test_db().await;
        store
            .create_user(&User::new("alice", "alice@example.com"))
            .await
            .unwrap();
        store
            .add_security_policy(
                "alice",
                &SecurityPolicy {
                    name: "RequireSecurePushForCoOwners".to_string(),
                    subscription: "SecurePushForCoOwners".to_string(),
                },
            )
            .await
            .unwrap();

        let policies = store.policies_for("alice").await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name, "RequireSecurePushForCoOwners");

        assert!(store.policies_for("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_owners() {
        let store = setup_test_db().await;
        seed_package(&store).await;
        store
            .create_user(&User::new("alice", "alice@example.com"))
            .await
            .unwrap();
        store.add_owner("FakePackage", "alice").await.unwrap();

        let owners = store.get_owners("FakePackage").await.unwrap();
        assert_eq!(owners.len(), 2);
        assert_eq!(store.count_owners("FakePackage").await.unwrap(), 2);
    }
}
