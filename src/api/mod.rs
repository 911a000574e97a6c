//! # HTTP API
//!
//! Thin axum boundary over [`LedgerService`]. Request bodies are validated
//! here (wallet id, amount format, operation type) so the ledger only ever
//! sees well-formed input.
//!
//! | Method | Path                    | Description                      |
//! |--------|-------------------------|----------------------------------|
//! | GET    | `/health`               | Liveness probe                   |
//! | POST   | `/api/v1/wallet`        | Deposit to or withdraw from      |
//! | GET    | `/api/v1/wallets/:id`   | Current balance of a wallet      |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router, ServiceExt,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{
        HeaderName, Method, StatusCode,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LINK},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower::Layer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::application::{LedgerError, LedgerService, OpContext};
use crate::domain::{WalletId, format_cents, parse_cents, parse_wallet_id};
use crate::storage::WalletStore;

/// Slack added on top of the ledger's operation timeout to get the request
/// timeout. A stuck ledger call must fail with its own error before the
/// transport gives up on the request.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

const AMOUNT_FORMAT_HINT: &str = "amount must be in format 0.00 (e.g., 100.00)";

/// Shared state available to all request handlers.
pub struct AppState<S> {
    pub ledger: Arc<LedgerService<S>>,
}

impl<S> AppState<S> {
    pub fn new(ledger: LedgerService<S>) -> Self {
        Self {
            ledger: Arc::new(ledger),
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/wallet`. Fields stay textual so each one can be
/// rejected with its own message.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWalletRequest {
    pub wallet_id: String,
    pub operation_type: String,
    pub amount: String,
}

/// Response payload for `GET /api/v1/wallets/:id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub id: WalletId,
    /// Decimal string with two fractional digits, e.g. `"25.00"`.
    pub balance: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Generic error body returned on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Deposit,
    Withdraw,
}

impl Operation {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(Operation::Deposit),
            "withdraw" => Some(Operation::Withdraw),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An error response: status plus a short client-facing message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        if err.is_client_error() {
            tracing::debug!(error = %err, "ledger operation rejected");
        } else {
            tracing::error!(error = %err, "ledger operation failed");
        }

        let (status, message) = match &err {
            LedgerError::WalletNotFound(_) => (StatusCode::NOT_FOUND, "wallet not found".into()),
            LedgerError::AlreadyExists(_) => (StatusCode::CONFLICT, "wallet already exists".into()),
            LedgerError::InsufficientFunds { .. } => {
                (StatusCode::BAD_REQUEST, "not enough funds".into())
            }
            LedgerError::InvalidAmount(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            LedgerError::InvalidIdentifier(id) => {
                (StatusCode::BAD_REQUEST, format!("wrong uuid: {}", id))
            }
            LedgerError::StorageUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the axum [`Router`] with all API routes, CORS, timeouts and tracing.
///
/// The request timeout is derived from the ledger's operation timeout, so a
/// request waiting on a wallet lock ends as a ledger error (500) rather than
/// a transport timeout.
pub fn create_router<S: WalletStore + 'static>(state: AppState<S>) -> Router {
    let timeout = request_timeout(&state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers([LINK])
        .max_age(Duration::from_secs(300));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/wallet", post(update_wallet_handler::<S>))
        .route("/api/v1/wallets/:id", get(wallet_handler::<S>))
        .layer(cors)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn request_timeout<S: WalletStore>(state: &AppState<S>) -> Duration {
    state.ledger.config().op_timeout + REQUEST_TIMEOUT_MARGIN
}

/// The router wrapped so that `/path/` and `/path` route identically.
pub fn app<S: WalletStore + 'static>(state: AppState<S>) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(create_router(state))
}

/// Serve the API on `0.0.0.0:port` until Ctrl-C.
pub async fn serve<S: WalletStore + 'static>(state: AppState<S>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(%addr, "server started");

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app(state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /api/v1/wallet` — deposit (creating the wallet on first deposit)
/// or withdraw.
async fn update_wallet_handler<S: WalletStore + 'static>(
    State(state): State<AppState<S>>,
    payload: Result<Json<UpdateWalletRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::bad_request("bad request"))?;

    let wallet_id = parse_wallet_id(&req.wallet_id)
        .ok_or_else(|| LedgerError::InvalidIdentifier(req.wallet_id.clone()))?;
    let amount = parse_cents(&req.amount).map_err(|_| ApiError::bad_request(AMOUNT_FORMAT_HINT))?;
    let operation = Operation::parse(&req.operation_type)
        .ok_or_else(|| ApiError::bad_request("wrong operation type"))?;

    let ctx = OpContext::background();
    match operation {
        Operation::Deposit => {
            state
                .ledger
                .deposit_or_create(&ctx, wallet_id, amount)
                .await?;
        }
        Operation::Withdraw => {
            state.ledger.withdraw(&ctx, wallet_id, amount).await?;
        }
    }

    Ok(Json(MessageResponse {
        message: "balance updated".to_string(),
    }))
}

/// `GET /api/v1/wallets/:id`
async fn wallet_handler<S: WalletStore + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet_id = parse_wallet_id(&id).ok_or(LedgerError::InvalidIdentifier(id))?;

    let wallet = state
        .ledger
        .get_wallet(&OpContext::background(), wallet_id)
        .await?;

    Ok(Json(WalletResponse {
        id: wallet.id,
        balance: format_cents(wallet.balance),
    }))
}
