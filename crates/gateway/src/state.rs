// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{DisabledVerifier, JwtVerifier, TokenVerifier};
use crate::config::GatewayConfig;
use crate::registry::Registry;

/// Shared gateway state.
pub struct GatewayState {
    pub registry: Arc<Registry>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub config: GatewayConfig,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    /// Build state with the verifier implied by `config.jwt_secret`.
    pub fn new(config: GatewayConfig, shutdown: CancellationToken) -> Self {
        let verifier: Arc<dyn TokenVerifier> = match config.jwt_secret.as_deref() {
            Some(secret) => Arc::new(JwtVerifier::new(secret.as_bytes())),
            None => Arc::new(DisabledVerifier),
        };
        Self::with_verifier(config, verifier, shutdown)
    }

    pub fn with_verifier(
        config: GatewayConfig,
        verifier: Arc<dyn TokenVerifier>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { registry: Arc::new(Registry::new()), verifier, config, shutdown }
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
