//! Data models for users, packages, and ownership requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account on the gallery: either a person or an organization
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub username: String,
    /// Confirmed email address; only a confirmed address permits ownership
    pub email: Option<String>,
    pub unconfirmed_email: Option<String>,
    pub is_organization: bool,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: Some(email.into()),
            unconfirmed_email: None,
            is_organization: false,
        }
    }

    /// An account whose email address has not been verified yet
    pub fn unconfirmed(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
            unconfirmed_email: Some(email.into()),
            is_organization: false,
        }
    }

    pub fn organization(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: Some(email.into()),
            unconfirmed_email: None,
            is_organization: true,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.email.is_some()
    }
}

/// Role of a member within an organization account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Admin,
    Collaborator,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Admin => "admin",
            MembershipRole::Collaborator => "collaborator",
        }
    }
}

impl std::str::FromStr for MembershipRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(MembershipRole::Admin),
            "collaborator" => Ok(MembershipRole::Collaborator),
            _ => Err(format!("Invalid membership role: {}", s)),
        }
    }
}

/// A package registration, identified case-insensitively
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PackageRegistration {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// A named security policy attached to a user.
///
/// A policy instance belongs to exactly one subscription definition for the
/// policy's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SecurityPolicy {
    pub name: String,
    pub subscription: String,
}

/// A pending, single-use invitation to become an owner
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OwnershipRequest {
    pub package_id: String,
    pub requesting_owner: String,
    pub new_owner: String,
    pub confirmation_code: String,
    pub created_at: DateTime<Utc>,
}

/// Display model for an owner row returned by the JSON API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerDisplay {
    pub name: String,
    pub pending: bool,
}
