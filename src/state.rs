// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::secrets::SecretBackendMode;
use crate::session::SessionKeyManager;
use crate::storage::IdentityDatabase;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<IdentityDatabase>,
    pub session_keys: SessionKeyManager,
    pub secret_mode: SecretBackendMode,
}

impl AppState {
    pub fn new(
        db: Arc<IdentityDatabase>,
        session_keys: SessionKeyManager,
        secret_mode: SecretBackendMode,
    ) -> Self {
        Self {
            db,
            session_keys,
            secret_mode,
        }
    }
}
