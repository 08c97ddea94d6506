// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway error types: the JSON error returned by the HTTP surface and the
//! reasons a connection credential can be turned down.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

/// HTTP failure rendered as `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        (status, Json(serde_json::json!({ "error": self }))).into_response()
    }
}

/// Why a connection credential was rejected.
///
/// Never surfaced to the connecting client: any variant downgrades the
/// connection to anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// No verifier is configured on this gateway.
    Disabled,
    Expired,
    InvalidSignature,
    Malformed(String),
    /// Signature checked out but no usable user id claim was present.
    MissingSubject,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("token verification disabled"),
            Self::Expired => f.write_str("token expired"),
            Self::InvalidSignature => f.write_str("invalid token signature"),
            Self::Malformed(detail) => write!(f, "malformed token: {detail}"),
            Self::MissingSubject => f.write_str("token carries no user id"),
        }
    }
}

impl std::error::Error for VerifyError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
