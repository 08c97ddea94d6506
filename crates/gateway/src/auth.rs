// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Opportunistic connection authentication.
//!
//! A credential only ever upgrades a connection: missing, malformed, expired
//! or forged tokens all fall back to [`Identity::Anonymous`] instead of
//! refusing the socket.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::VerifyError;
use crate::registry::Identity;

/// Turns a credential into a user id.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<String, VerifyError>;
}

/// Verifier used when no signing secret is configured.
pub struct DisabledVerifier;

impl TokenVerifier for DisabledVerifier {
    fn verify(&self, _token: &str) -> Result<String, VerifyError> {
        Err(VerifyError::Disabled)
    }
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Tokens minted by the API layer are not required to carry `exp`;
        // when present it is still enforced.
        validation.required_spec_claims.clear();
        Self { key: DecodingKey::from_secret(secret), validation }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<String, VerifyError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                ErrorKind::InvalidSignature => VerifyError::InvalidSignature,
                _ => VerifyError::Malformed(e.to_string()),
            }
        })?;
        data.claims.user_id().ok_or(VerifyError::MissingSubject)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<ClaimId>,
    #[serde(default)]
    id: Option<ClaimId>,
    #[serde(default, rename = "userId")]
    user_id: Option<ClaimId>,
}

/// User ids arrive as strings or as numeric primary keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClaimId {
    Text(String),
    Number(i64),
}

impl Claims {
    fn user_id(self) -> Option<String> {
        [self.sub, self.id, self.user_id]
            .into_iter()
            .flatten()
            .map(|id| match id {
                ClaimId::Text(s) => s,
                ClaimId::Number(n) => n.to_string(),
            })
            .find(|id| !id.is_empty())
    }
}

/// Classify an incoming connection from its optional credential.
pub fn classify(verifier: &dyn TokenVerifier, token: Option<&str>) -> Identity {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Identity::Anonymous;
    };
    match verifier.verify(token) {
        Ok(user_id) => Identity::Authenticated(user_id),
        Err(e) => {
            tracing::debug!(err = %e, "token rejected, treating connection as anonymous");
            Identity::Anonymous
        }
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
