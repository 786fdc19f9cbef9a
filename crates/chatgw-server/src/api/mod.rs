//! HTTP/JSON boundary.
//!
//! Thin plumbing over the dispatcher: route table, request validation, and
//! JSON error mapping. Everything stateful lives behind [`AppState`].

mod error;
mod handlers;

pub use error::ApiError;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::session::dispatch::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the gateway's HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/test", get(handlers::health))
        .route("/api/login", post(handlers::login))
        .route("/api/sendMessage", post(handlers::send_message))
        .route("/api/sendGroupMessage", post(handlers::send_group_message))
        .route("/api/createGroup", post(handlers::create_group))
        .route("/api/groups/:username", get(handlers::groups))
        .route("/api/history/:target", get(handlers::history))
        .route("/api/joinGroup", post(handlers::join_group))
        .route("/api/onlineUsers/:username", get(handlers::online_users))
        .route("/api/notifications/:username", get(handlers::notifications))
        .with_state(state)
}
