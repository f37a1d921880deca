// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::secrets::SecretBackendMode;
use crate::state::AppState;

/// Readiness response with individual component status.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub service: String,
    /// Identity database answers read transactions.
    pub database: String,
    /// An active session signing key exists.
    pub session_key: String,
    /// Which backend serves the master key. Informational only.
    pub secret_backend: SecretBackendMode,
}

/// Simple response for liveness probes.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

fn check_database(state: &AppState) -> String {
    match state.db.ping() {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: database check failed");
            "unavailable".to_string()
        }
    }
}

fn check_session_key(state: &AppState) -> String {
    match state.session_keys.active_key_id() {
        Ok(Some(_)) => "ok".to_string(),
        Ok(None) => "missing".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: session key check failed");
            "unavailable".to_string()
        }
    }
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
/// Does not check dependencies - use readiness for that.
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
///
/// Returns 200 only if the database answers and a signing key is active.
/// Environment-fallback mode is reported but does not fail readiness.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let database = check_database(&state);
    let session_key = check_session_key(&state);
    let all_ok = database == "ok" && session_key == "ok";

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            database,
            session_key,
            secret_backend: state.secret_mode,
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
