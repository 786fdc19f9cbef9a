//! Route handlers: translation from JSON requests to dispatcher calls.
//!
//! Handlers validate parameters, build the wire command, and return the
//! backend's reply line verbatim in `reply`; interpretation of reply
//! content is entirely the browser client's business. Request fields use
//! `#[serde(default)]` so absent and empty values fail validation the same
//! way (400) instead of a deserialization rejection.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use chatgw_core::Command;

use super::error::ApiError;
use super::AppState;

fn require<'a>(value: &'a str, name: &'static str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ApiError::MissingParam(name))
    } else {
        Ok(trimmed)
    }
}

#[derive(Serialize)]
pub(super) struct HealthResponse {
    ok: bool,
    message: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        message: "chat gateway running",
    })
}

#[derive(Deserialize)]
pub(super) struct LoginRequest {
    #[serde(default)]
    username: String,
}

#[derive(Serialize)]
pub(super) struct LoginResponse {
    ok: bool,
    username: String,
}

pub(super) async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = require(&req.username, "username")?;
    state.dispatcher.login(username).await?;
    info!(username, "login established");
    Ok(Json(LoginResponse {
        ok: true,
        username: username.to_string(),
    }))
}

/// Standard body for routes that forward one backend reply.
#[derive(Serialize)]
pub(super) struct CommandResponse {
    ok: bool,
    reply: String,
}

#[derive(Deserialize)]
pub(super) struct SendMessageRequest {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    content: String,
}

pub(super) async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let from = require(&req.from, "from")?;
    let to = require(&req.to, "to")?;
    if req.content.is_empty() {
        return Err(ApiError::MissingParam("content"));
    }

    let cmd = Command::PrivateMessage {
        from: from.to_string(),
        to: to.to_string(),
        content: req.content.clone(),
    };
    let reply = state.dispatcher.send(from, &cmd.encode()).await?;
    info!(from, to, "private message forwarded");
    Ok(Json(CommandResponse { ok: true, reply }))
}

#[derive(Deserialize)]
pub(super) struct SendGroupMessageRequest {
    #[serde(default)]
    from: String,
    #[serde(default)]
    group_name: String,
    #[serde(default)]
    content: String,
}

pub(super) async fn send_group_message(
    State(state): State<AppState>,
    Json(req): Json<SendGroupMessageRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let from = require(&req.from, "from")?;
    let group = require(&req.group_name, "group_name")?;
    if req.content.is_empty() {
        return Err(ApiError::MissingParam("content"));
    }

    let cmd = Command::GroupMessage {
        from: from.to_string(),
        group: group.to_string(),
        content: req.content.clone(),
    };
    let reply = state.dispatcher.send(from, &cmd.encode()).await?;
    info!(from, group, "group message forwarded");
    Ok(Json(CommandResponse { ok: true, reply }))
}

#[derive(Deserialize)]
pub(super) struct CreateGroupRequest {
    #[serde(default)]
    group_name: String,
    #[serde(default)]
    creator: String,
}

pub(super) async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let group_name = require(&req.group_name, "group_name")?;
    let creator = require(&req.creator, "creator")?;

    let cmd = Command::CreateGroup {
        group_name: group_name.to_string(),
        creator: creator.to_string(),
    };
    let reply = state.dispatcher.send(creator, &cmd.encode()).await?;
    info!(group_name, creator, "group created");
    Ok(Json(CommandResponse { ok: true, reply }))
}

pub(super) async fn groups(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let username = require(&username, "username")?;
    let cmd = Command::GetGroups {
        username: username.to_string(),
    };
    let reply = state.dispatcher.send(username, &cmd.encode()).await?;
    Ok(Json(CommandResponse { ok: true, reply }))
}

#[derive(Deserialize)]
pub(super) struct HistoryQuery {
    #[serde(default)]
    username: String,
    #[serde(default, rename = "isGroup")]
    is_group: Option<String>,
}

pub(super) async fn history(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<CommandResponse>, ApiError> {
    let target = require(&target, "target")?;
    let username = require(&query.username, "username")?;

    let cmd = Command::GetHistory {
        target: target.to_string(),
        username: username.to_string(),
        is_group: query.is_group.as_deref() == Some("true"),
    };
    let reply = state.dispatcher.send(username, &cmd.encode()).await?;
    Ok(Json(CommandResponse { ok: true, reply }))
}

#[derive(Deserialize)]
pub(super) struct JoinGroupRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    group_name: String,
}

#[derive(Serialize)]
pub(super) struct JoinGroupResponse {
    ok: bool,
    reply: String,
    members: String,
}

pub(super) async fn join_group(
    State(state): State<AppState>,
    Json(req): Json<JoinGroupRequest>,
) -> Result<Json<JoinGroupResponse>, ApiError> {
    let username = require(&req.username, "username")?;
    let group = require(&req.group_name, "group_name")?;

    let join = Command::JoinGroup {
        username: username.to_string(),
        group: group.to_string(),
    };
    let reply = state.dispatcher.send(username, &join.encode()).await?;

    // Follow up with the refreshed member list for the joined group.
    let members_cmd = Command::GetGroupMembers {
        group: group.to_string(),
    };
    let members = state.dispatcher.send(username, &members_cmd.encode()).await?;

    info!(username, group, "joined group");
    Ok(Json(JoinGroupResponse {
        ok: true,
        reply,
        members,
    }))
}

pub(super) async fn online_users(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let username = require(&username, "username")?;
    let cmd = Command::GetOnlineUsers {
        username: username.to_string(),
    };
    let reply = state.dispatcher.send(username, &cmd.encode()).await?;
    Ok(Json(CommandResponse { ok: true, reply }))
}

#[derive(Serialize)]
pub(super) struct NotificationsResponse {
    ok: bool,
    notifications: Vec<String>,
}

pub(super) async fn notifications(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let username = require(&username, "username")?;
    let notifications = state.dispatcher.drain(username).await?;
    Ok(Json(NotificationsResponse {
        ok: true,
        notifications,
    }))
}
