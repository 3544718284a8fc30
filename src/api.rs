//! JSON API for ownership management and support requests
//!
//! Workflow failures come back as `{"success": false, "message": ...}` with
//! a 200 status; only unexpected faults surface as HTTP errors. The acting
//! user is passed explicitly on every mutating call.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::Result;
use crate::support::IssueStatus;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/packages/:id/owners",
            get(get_owners).post(add_owner),
        )
        .route(
            "/api/packages/:id/owners/confirmation",
            get(add_owner_confirmation),
        )
        .route("/api/packages/:id/owners/:username", delete(remove_owner))
        .route(
            "/packages/:id/owners/:username/confirm/:code",
            post(confirm_ownership),
        )
        .route(
            "/packages/:id/owners/:username/reject/:code",
            post(reject_ownership),
        )
        .route("/api/support", get(get_issues).post(create_issue))
        .route("/api/support/:key/status", post(update_issue_status))
        .route(
            "/api/support/user/:username",
            delete(delete_support_requests),
        )
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActingUser {
    current_user: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddOwnerBody {
    current_user: String,
    username: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmationQuery {
    current_user: String,
    username: String,
}

/// Current and pending owners of a package
async fn get_owners(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let owners = state.store.get_owners(&id).await?;
    let pending = state.store.get_pending_requests(&id, None, None).await?;

    let mut model: Vec<Value> = owners
        .into_iter()
        .map(|o| json!({ "name": o.username, "pending": false }))
        .collect();
    model.extend(
        pending
            .into_iter()
            .map(|r| json!({ "name": r.new_owner, "pending": true })),
    );

    Ok(Json(json!({ "success": true, "owners": model })))
}

async fn add_owner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AddOwnerBody>,
) -> Result<Json<Value>> {
    let model = state
        .ownership
        .request_add_owner(&id, &body.current_user, &body.username, &body.message)
        .await?;
    Ok(Json(json!({
        "success": true,
        "name": model.name,
        "pending": model.pending,
    })))
}

/// Read-only preview shown before an add is submitted
async fn add_owner_confirmation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ConfirmationQuery>,
) -> Result<Json<Value>> {
    let preview = state
        .ownership
        .confirm_add_owner(&id, &query.current_user, &query.username)
        .await?;
    Ok(Json(json!({
        "success": true,
        "confirmation": preview.confirmation,
        "policyMessage": preview.policy_message.unwrap_or_default(),
    })))
}

async fn remove_owner(
    State(state): State<Arc<AppState>>,
    Path((id, username)): Path<(String, String)>,
    Query(acting): Query<ActingUser>,
) -> Result<Json<Value>> {
    state
        .ownership
        .remove_owner(&id, &acting.current_user, &username)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// Confirmation link target from the ownership-request email
async fn confirm_ownership(
    State(state): State<Arc<AppState>>,
    Path((id, username, code)): Path<(String, String, String)>,
) -> Result<Json<Value>> {
    let model = state.ownership.confirm_ownership(&id, &username, &code).await?;
    Ok(Json(json!({
        "success": true,
        "name": model.name,
        "pending": model.pending,
    })))
}

async fn reject_ownership(
    State(state): State<Arc<AppState>>,
    Path((id, username, code)): Path<(String, String, String)>,
) -> Result<Json<Value>> {
    state.ownership.reject_ownership(&id, &username, &code).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIssueBody {
    created_by: Option<String>,
    owner_email: String,
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusBody {
    status: IssueStatus,
    edited_by: Option<String>,
}

async fn get_issues(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let issues = state.support.get_issues().await?;
    Ok(Json(json!({ "success": true, "issues": issues })))
}

async fn create_issue(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateIssueBody>,
) -> Result<Json<Value>> {
    let issue = state
        .support
        .create_issue(body.created_by.as_deref(), &body.owner_email, &body.title)
        .await?;
    Ok(Json(json!({ "success": true, "issue": issue })))
}

async fn update_issue_status(
    State(state): State<Arc<AppState>>,
    Path(key): Path<i64>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<Value>> {
    state
        .support
        .update_issue_status(key, body.status, body.edited_by.as_deref())
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn delete_support_requests(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    state.support.delete_support_requests(&username).await?;
    Ok(Json(json!({ "success": true })))
}
