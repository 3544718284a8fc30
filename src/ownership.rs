//! Package ownership transfer workflow
//!
//! Orchestrates the add/remove/confirm owner operations: enforces
//! authorization and precondition rules, drives the pending-request state
//! machine, and composes the policy-propagation disclosures. State per
//! (package, candidate) pair moves `NoRelation -> Pending -> Owner`, with
//! `Pending -> NoRelation` on rejection or cancellation and
//! `Owner -> NoRelation` on removal. An already-satisfied transition is a
//! conflict, never a silent no-op.

use std::sync::Arc;

use crate::audit::{AuditAction, AuditService, PackageOwnershipAuditRecord};
use crate::error::{AppError, Result};
use crate::models::{OwnerDisplay, PackageRegistration, User};
use crate::notify::{NotificationDispatcher, OwnershipRequestNotice};
use crate::policy::{self, MessageContext, PropagationInputs};
use crate::store::Store;

/// Fixed user-facing strings surfaced by the workflow
pub mod messages {
    pub const PACKAGE_NOT_FOUND: &str = "Package not found.";
    pub const NOT_PACKAGE_OWNER: &str = "You are not the package owner.";
    pub const CURRENT_USER_NOT_FOUND: &str = "Current user not found.";
    pub const OWNER_NOT_FOUND: &str = "Owner not found.";
    pub const INPUT_REQUIRED: &str = "Package id and username are required.";
    pub const SOLE_OWNER: &str = "You can't remove the only owner of this package.";
    pub const REQUEST_NOT_VALID: &str = "The ownership request is not valid or has expired.";

    pub fn unverified_email(username: &str) -> String {
        format!(
            "Sorry, '{}' hasn't verified their email account yet and we cannot proceed with the request.",
            username
        )
    }

    pub fn already_owner(username: &str) -> String {
        format!("'{}' is already an owner of this package.", username)
    }

    pub fn not_owner(username: &str) -> String {
        format!("'{}' is not an owner of this package.", username)
    }

    pub fn confirm_prompt(username: &str) -> String {
        format!(
            "Please confirm if you would like to proceed adding '{}' as a co-owner of this package.",
            username
        )
    }
}

/// Outcome of a successful remove-owner call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOwnerOutcome {
    /// The target had a pending request; it was cancelled
    CancelledPending,
    /// The target was a current owner and was removed
    RemovedOwner,
}

/// Read-only preview returned before an add is submitted
#[derive(Debug, Clone)]
pub struct ConfirmPreview {
    pub confirmation: String,
    pub policy_message: Option<String>,
}

/// The ownership workflow engine. Acting users are explicit parameters on
/// every call; there is no ambient request context.
#[derive(Clone)]
pub struct OwnershipService {
    store: Store,
    notifier: Arc<dyn NotificationDispatcher>,
    audit: AuditService,
    site_root: String,
}

impl OwnershipService {
    pub fn new(
        store: Store,
        notifier: Arc<dyn NotificationDispatcher>,
        audit: AuditService,
        site_root: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
            site_root: site_root.into().trim_end_matches('/').to_string(),
        }
    }

    /// Request that `candidate` be added as an owner of `package_id`.
    ///
    /// On success a pending ownership request with a fresh single-use
    /// confirmation code exists, the candidate has been sent the request
    /// notice, and the returned display model is marked pending.
    pub async fn request_add_owner(
        &self,
        package_id: &str,
        acting: &str,
        candidate: &str,
        custom_message: &str,
    ) -> Result<OwnerDisplay> {
        validate_input(package_id, candidate)?;
        let (package, acting_user) = self.resolve(package_id, acting).await?;
        let candidate_user = self.resolve_candidate(candidate).await?;

        if !candidate_user.is_confirmed() {
            return Err(AppError::Precondition(messages::unverified_email(
                &candidate_user.username,
            )));
        }

        if self.store.is_owner(&package.id, &candidate_user.username).await?
            || !self
                .store
                .get_pending_requests(&package.id, None, Some(&candidate_user.username))
                .await?
                .is_empty()
        {
            return Err(AppError::Conflict(messages::already_owner(
                &candidate_user.username,
            )));
        }

        // The store's uniqueness constraint is the serialization point for
        // concurrent adds of the same pair.
        let request = self
            .store
            .create_ownership_request(&package.id, &acting_user.username, &candidate_user.username)
            .await?;

        let policy_message = self
            .policy_message(&package, &candidate_user, MessageContext::Email)
            .await?
            .unwrap_or_default();

        let notice = OwnershipRequestNotice {
            from: acting_user.username.clone(),
            to: candidate_user.username.clone(),
            package_id: package.id.clone(),
            package_url: format!("{}/packages/{}/", self.site_root, package.id),
            confirm_url: format!(
                "{}/packages/{}/owners/{}/confirm/{}",
                self.site_root, package.id, candidate_user.username, request.confirmation_code
            ),
            reject_url: format!(
                "{}/packages/{}/owners/{}/reject/{}",
                self.site_root, package.id, candidate_user.username, request.confirmation_code
            ),
            custom_message: custom_message.to_string(),
            policy_message,
        };
        self.notifier.send_ownership_request(&notice).await;

        self.save_audit(
            PackageOwnershipAuditRecord::new(
                &package.id,
                AuditAction::AddOwnershipRequest,
                &candidate_user.username,
            )
            .with_requesting_owner(&acting_user.username),
        )
        .await;

        Ok(OwnerDisplay {
            name: candidate_user.username,
            pending: true,
        })
    }

    /// Read-only preview of an add-owner action: same checks, no mutation,
    /// no confirmation code created or consumed.
    pub async fn confirm_add_owner(
        &self,
        package_id: &str,
        acting: &str,
        candidate: &str,
    ) -> Result<ConfirmPreview> {
        validate_input(package_id, candidate)?;
        let (package, _acting_user) = self.resolve(package_id, acting).await?;
        let candidate_user = self.resolve_candidate(candidate).await?;

        if !candidate_user.is_confirmed() {
            return Err(AppError::Precondition(messages::unverified_email(
                &candidate_user.username,
            )));
        }

        if self.store.is_owner(&package.id, &candidate_user.username).await?
            || !self
                .store
                .get_pending_requests(&package.id, None, Some(&candidate_user.username))
                .await?
                .is_empty()
        {
            return Err(AppError::Conflict(messages::already_owner(
                &candidate_user.username,
            )));
        }

        let policy_message = self
            .policy_message(&package, &candidate_user, MessageContext::Preview)
            .await?;

        Ok(ConfirmPreview {
            confirmation: messages::confirm_prompt(&candidate_user.username),
            policy_message,
        })
    }

    /// Remove a current owner, or cancel a pending request for a candidate
    /// that has not confirmed yet.
    pub async fn remove_owner(
        &self,
        package_id: &str,
        acting: &str,
        target: &str,
    ) -> Result<RemoveOwnerOutcome> {
        validate_input(package_id, target)?;
        let (package, acting_user) = self.resolve(package_id, acting).await?;
        let target_user = self.resolve_candidate(target).await?;

        let pending = self
            .store
            .get_pending_requests(&package.id, None, Some(&target_user.username))
            .await?;

        if !pending.is_empty() {
            self.store
                .delete_ownership_request(&package.id, &target_user.username)
                .await?;
            self.notifier
                .send_cancellation_notice(&acting_user.username, &target_user.username, &package.id)
                .await;
            self.save_audit(
                PackageOwnershipAuditRecord::new(
                    &package.id,
                    AuditAction::DeleteOwnershipRequest,
                    &target_user.username,
                )
                .with_requesting_owner(&acting_user.username),
            )
            .await;
            return Ok(RemoveOwnerOutcome::CancelledPending);
        }

        if self.store.is_owner(&package.id, &target_user.username).await? {
            if self.store.count_owners(&package.id).await? == 1 {
                return Err(AppError::Conflict(messages::SOLE_OWNER.to_string()));
            }
            self.store
                .remove_owner(&package.id, &target_user.username)
                .await?;
            self.notifier
                .send_removal_notice(&acting_user.username, &target_user.username, &package.id)
                .await;
            self.save_audit(PackageOwnershipAuditRecord::new(
                &package.id,
                AuditAction::RemoveOwner,
                &target_user.username,
            ))
            .await;
            return Ok(RemoveOwnerOutcome::RemovedOwner);
        }

        Err(AppError::Conflict(messages::not_owner(&target_user.username)))
    }

    /// Redeem a confirmation code, promoting the pending request to
    /// ownership. The code is consumed in the same transaction; a second
    /// redemption fails.
    pub async fn confirm_ownership(
        &self,
        package_id: &str,
        candidate: &str,
        code: &str,
    ) -> Result<OwnerDisplay> {
        validate_input(package_id, candidate)?;
        let package = self
            .store
            .find_package(package_id)
            .await?
            .ok_or_else(|| AppError::NotFound(messages::PACKAGE_NOT_FOUND.to_string()))?;
        let candidate_user = self
            .store
            .find_user_by_username(candidate)
            .await?
            .ok_or_else(|| AppError::NotFound(messages::CURRENT_USER_NOT_FOUND.to_string()))?;

        if self.store.is_owner(&package.id, &candidate_user.username).await? {
            return Err(AppError::Conflict(messages::already_owner(
                &candidate_user.username,
            )));
        }

        self.store
            .promote_to_owner(&package.id, &candidate_user.username, code)
            .await?;

        self.save_audit(PackageOwnershipAuditRecord::new(
            &package.id,
            AuditAction::AddOwner,
            &candidate_user.username,
        ))
        .await;

        Ok(OwnerDisplay {
            name: candidate_user.username,
            pending: false,
        })
    }

    /// Decline a pending ownership request by its confirmation code
    pub async fn reject_ownership(
        &self,
        package_id: &str,
        candidate: &str,
        code: &str,
    ) -> Result<()> {
        validate_input(package_id, candidate)?;
        let package = self
            .store
            .find_package(package_id)
            .await?
            .ok_or_else(|| AppError::NotFound(messages::PACKAGE_NOT_FOUND.to_string()))?;

        let request = self
            .store
            .reject_ownership_request(&package.id, candidate, code)
            .await?
            .ok_or_else(|| AppError::NotFound(messages::REQUEST_NOT_VALID.to_string()))?;

        self.notifier
            .send_rejection_notice(&request.requesting_owner, candidate, &package.id)
            .await;
        self.save_audit(
            PackageOwnershipAuditRecord::new(
                &package.id,
                AuditAction::DeleteOwnershipRequest,
                candidate,
            )
            .with_requesting_owner(&request.requesting_owner),
        )
        .await;

        Ok(())
    }

    /// Package lookup, management-rights check, and acting-user
    /// re-resolution, in that order
    async fn resolve(&self, package_id: &str, acting: &str) -> Result<(PackageRegistration, User)> {
        let package = self
            .store
            .find_package(package_id)
            .await?
            .ok_or_else(|| AppError::NotFound(messages::PACKAGE_NOT_FOUND.to_string()))?;

        if !self.store.can_manage_owners(acting, &package.id).await? {
            return Err(AppError::Authorization(
                messages::NOT_PACKAGE_OWNER.to_string(),
            ));
        }

        let acting_user = self
            .store
            .find_user_by_username(acting)
            .await?
            .ok_or_else(|| AppError::NotFound(messages::CURRENT_USER_NOT_FOUND.to_string()))?;

        Ok((package, acting_user))
    }

    async fn resolve_candidate(&self, username: &str) -> Result<User> {
        self.store
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::Validation(messages::OWNER_NOT_FOUND.to_string()))
    }

    /// Gather current owners, pending owners (excluding the candidate), and
    /// the candidate's own policies, then compose the tiered disclosure.
    async fn policy_message(
        &self,
        package: &PackageRegistration,
        candidate: &User,
        context: MessageContext,
    ) -> Result<Option<String>> {
        let mut owners = Vec::new();
        for owner in self.store.get_owners(&package.id).await? {
            let policies = self.store.policies_for(&owner.username).await?;
            owners.push((owner.username, policies));
        }

        let mut pending_owners = Vec::new();
        for request in self.store.get_pending_requests(&package.id, None, None).await? {
            if request.new_owner == candidate.username {
                continue;
            }
            let policies = self.store.policies_for(&request.new_owner).await?;
            pending_owners.push((request.new_owner, policies));
        }

        let inputs = PropagationInputs {
            candidate: candidate.username.clone(),
            candidate_policies: self.store.policies_for(&candidate.username).await?,
            candidate_subscribed: self
                .store
                .is_subscribed(&candidate.username, policy::SECURE_PUSH_SUBSCRIPTION)
                .await?,
            owners,
            pending_owners,
        };

        Ok(policy::compose_policy_message(&inputs, context))
    }

    /// Audit failures are logged, never surfaced: the state transition has
    /// already committed.
    async fn save_audit(&self, record: PackageOwnershipAuditRecord) {
        if let Err(e) = self.audit.save_record(&record).await {
            tracing::warn!("Failed to save audit record: {}", e);
        }
    }
}

fn validate_input(package_id: &str, username: &str) -> Result<()> {
    if package_id.trim().is_empty() || username.trim().is_empty() {
        return Err(AppError::Validation(messages::INPUT_REQUIRED.to_string()));
    }
    Ok(())
}
