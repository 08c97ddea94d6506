// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the gateway.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use presence_wire::OnlineCounts;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorCode};
use crate::state::GatewayState;

// -- Response types -----------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
}

/// Presence snapshot as embedded in dashboard/statistics responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub authenticated: u64,
    pub anonymous: u64,
    pub total: u64,
}

impl From<OnlineCounts> for PresenceResponse {
    fn from(c: OnlineCounts) -> Self {
        Self { authenticated: c.authenticated, anonymous: c.anonymous, total: c.total() }
    }
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned(), connections: s.registry.len() })
}

/// `GET /api/v1/presence`
pub async fn presence(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(PresenceResponse::from(s.registry.counts()))
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "no such route")
}
