//! Layered error types for the crash engine.
//!
//! This module provides a hierarchical error system:
//!
//! - [`DomainError`] - Business logic errors (invalid state, not found, etc.)
//! - [`InfraError`] - Infrastructure errors (database, RPC, event fan-out)
//! - [`AppError`] - Application-level errors combining domain and infra
//! - [`ApiError`] - HTTP API errors with status codes
//!
//! # Error Philosophy
//!
//! - Domain errors are recoverable and user-facing
//! - Infrastructure errors are logged but details hidden from users
//! - The `Result` type alias uses `AppError` for application code

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain-level errors representing business logic violations.
///
/// These errors are recoverable and should be shown to users.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomainError {
    /// Round not found.
    #[error("round not found: {0}")]
    RoundNotFound(String),

    /// Round already resolved.
    #[error("round already resolved: {0}")]
    RoundAlreadyResolved(String),

    /// A bet was submitted outside `betting_phase`.
    #[error("not in betting phase")]
    NotInBettingPhase,

    /// A cashout was submitted outside `running_phase`.
    #[error("not in running phase")]
    NotInRunningPhase,

    /// `place_bet` retried with a `client_id` already bound to a different
    /// bet this round.
    #[error("duplicate bet for client_id: {0}")]
    DuplicateBet(String),

    /// Cashout arrived after the round had already crashed.
    #[error("cashout too late: round {round_id} already crashed")]
    CashoutTooLate {
        /// The round the cashout targeted.
        round_id: u64,
    },

    /// No active bet exists for this user in the current round.
    #[error("no active bet for user: {0}")]
    NoActiveBet(String),

    /// A request field failed validation.
    #[error("invalid input: {field}: {reason}")]
    InvalidInput {
        /// The offending field name.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Account does not have enough `available` balance for the request.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Amount requested, as a decimal wei string.
        requested: String,
        /// Amount actually available, as a decimal wei string.
        available: String,
    },

    /// The solvency gate rejected a withdrawal or payout.
    #[error("solvency gate rejected payout of {amount}")]
    SolvencyRejected {
        /// Amount that was rejected, as a decimal wei string.
        amount: String,
    },

    /// A withdrawal was requested before the per-account cooldown elapsed.
    #[error("cooldown active: {remaining_secs}s remaining")]
    CooldownActive {
        /// Seconds until the cooldown expires.
        remaining_secs: u64,
    },

    /// Optimistic-concurrency retry budget exhausted on a contended account.
    #[error("contention: too many concurrent mutations on account {0}")]
    Contention(String),

    /// Invalid address format.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount (negative or malformed).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from external systems.
///
/// These errors are typically logged but their details are hidden from users.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// RPC error (Ethereum node communication).
    #[error("RPC error: {0}")]
    Rpc(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The chain RPC endpoint is unreachable or returned no healthy
    /// response within the configured retry budget.
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    /// Event fan-out error (broadcast channel lagged or closed).
    #[error("event fan-out error: {0}")]
    Fanout(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event decoding error.
    #[error("event decoding error: {0}")]
    EventDecoding(String),

    /// Resource not found in storage.
    #[error("resource not found")]
    NotFound,

    /// Connection pool exhausted.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Timeout waiting for operation.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// On-chain payout transaction failed to confirm.
    #[error("payout failed: {0}")]
    PayoutFailed(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Application-level errors combining domain and infrastructure errors.
///
/// This is the primary error type used throughout the application.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// Chain reorganization detected.
    #[error("chain reorg detected at block {0}")]
    ReorgDetected(u64),

    /// A ledger or solvency invariant was found violated by a background
    /// health check. Surfaced to operators, never to end users.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Initialization error.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Graceful shutdown requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for application Results.
pub type Result<T> = std::result::Result<T, AppError>;

// ═══════════════════════════════════════════════════════════════════════════════
// API ERRORS (HTTP-specific)
// ═══════════════════════════════════════════════════════════════════════════════

/// API-level errors with HTTP status codes.
///
/// These errors are converted to HTTP responses via [`IntoResponse`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Wrapped application error.
    #[error(transparent)]
    App(#[from] AppError),

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds until rate limit resets.
        retry_after_secs: u64,
    },

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Authentication required or failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Internal server error (with source for logging).
    #[error("internal error")]
    Internal(#[source] eyre::Report),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Domain errors map to client errors (4xx)
            Self::App(AppError::Domain(
                DomainError::RoundNotFound(_) | DomainError::NoActiveBet(_),
            )) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            Self::App(AppError::Domain(
                DomainError::InvalidInput { .. }
                | DomainError::InvalidAddress(_)
                | DomainError::InvalidAmount(_)
                | DomainError::NotInBettingPhase
                | DomainError::NotInRunningPhase
                | DomainError::CashoutTooLate { .. },
            ))
            | Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string()),

            Self::App(AppError::Domain(
                DomainError::RoundAlreadyResolved(_) | DomainError::DuplicateBet(_),
            )) => (StatusCode::CONFLICT, "CONFLICT", self.to_string()),

            Self::App(AppError::Domain(
                DomainError::InsufficientFunds { .. } | DomainError::SolvencyRejected { .. },
            )) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE",
                self.to_string(),
            ),

            Self::App(AppError::Domain(DomainError::CooldownActive { .. })) => (
                StatusCode::TOO_MANY_REQUESTS,
                "COOLDOWN_ACTIVE",
                self.to_string(),
            ),

            Self::App(AppError::Domain(DomainError::Contention(_))) => (
                StatusCode::CONFLICT,
                "CONTENTION",
                self.to_string(),
            ),

            Self::RateLimited { retry_after_secs } => {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("Retry-After", retry_after_secs.to_string())],
                    Json(json!({
                        "error": {
                            "code": "RATE_LIMITED",
                            "message": self.to_string(),
                            "retry_after_secs": retry_after_secs
                        }
                    })),
                )
                    .into_response();
            }

            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            // Infrastructure and internal errors: log but don't expose details
            Self::App(
                AppError::Infra(_)
                | AppError::ReorgDetected(_)
                | AppError::InvariantViolation(_)
                | AppError::Config(_)
                | AppError::Initialization(_)
                | AppError::ShutdownRequested,
            )
            | Self::Internal(_) => {
                tracing::error!(error = ?self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVENIENCE CONVERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

impl From<crate::types::primitives::InvalidAddress> for DomainError {
    fn from(err: crate::types::primitives::InvalidAddress) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

impl From<crate::types::primitives::InvalidAmount> for DomainError {
    fn from(err: crate::types::primitives::InvalidAmount) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

impl From<crate::types::primitives::InvalidClientId> for DomainError {
    fn from(err: crate::types::primitives::InvalidClientId) -> Self {
        Self::InvalidInput {
            field: "client_id".to_string(),
            reason: err.to_string(),
        }
    }
}

// Allow converting domain errors into application errors
impl From<crate::types::primitives::InvalidAddress> for AppError {
    fn from(err: crate::types::primitives::InvalidAddress) -> Self {
        Self::Domain(err.into())
    }
}

impl From<crate::types::primitives::InvalidAmount> for AppError {
    fn from(err: crate::types::primitives::InvalidAmount) -> Self {
        Self::Domain(err.into())
    }
}

impl From<crate::types::primitives::InvalidClientId> for AppError {
    fn from(err: crate::types::primitives::InvalidClientId) -> Self {
        Self::Domain(err.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_display() {
        let err = DomainError::RoundNotFound("42".into());
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn app_error_from_domain() {
        let domain = DomainError::NotInBettingPhase;
        let app: AppError = domain.into();
        assert!(matches!(
            app,
            AppError::Domain(DomainError::NotInBettingPhase)
        ));
    }

    #[test]
    fn app_error_from_infra() {
        let infra = InfraError::NotFound;
        let app: AppError = infra.into();
        assert!(matches!(app, AppError::Infra(InfraError::NotFound)));
    }

    #[test]
    fn cooldown_maps_to_app_error() {
        let domain = DomainError::CooldownActive { remaining_secs: 5 };
        let app: AppError = domain.into();
        assert!(matches!(
            app,
            AppError::Domain(DomainError::CooldownActive { remaining_secs: 5 })
        ));
    }
}
