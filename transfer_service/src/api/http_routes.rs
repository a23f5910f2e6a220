use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::auth::AuthenticatedUser;
use crate::api::error::ApiError;
use crate::domain::entities::{Currency, Wallet};
use crate::domain::types::{UserId, WalletId};
use crate::use_cases::add_funds::AddFundsUseCase;
use crate::use_cases::create_wallet::CreateWalletUseCase;
use crate::use_cases::execute_transfer::{ExecuteTransferUseCase, TransferCommand, TransferReceipt};
use crate::use_cases::find_by_idempotency_key::FindByIdempotencyKeyUseCase;
use crate::use_cases::get_balance::GetBalanceUseCase;
use crate::use_cases::transfer_limits::{LimitSummary, TransferLimitService};

// Estado compartido de la aplicación
pub struct AppState {
    pub create_wallet_use_case: CreateWalletUseCase,
    pub add_funds_use_case: AddFundsUseCase,
    pub get_balance_use_case: GetBalanceUseCase,
    pub execute_transfer_use_case: ExecuteTransferUseCase,
    pub find_by_idempotency_key_use_case: FindByIdempotencyKeyUseCase,
    pub limit_service: Arc<TransferLimitService>,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/wallets", post(create_wallet))
        .route("/wallets/{wallet_id}/transfer", post(initiate_transfer))
        .route("/wallets/{wallet_id}/add-funds", post(add_funds))
        .route("/wallets/{wallet_id}/balance", get(get_balance))
        .route("/wallets/{wallet_id}/transfer-limits", get(get_transfer_limits))
        .route(
            "/wallets/{wallet_id}/transactions/by-idempotency/{key}",
            get(find_by_idempotency_key),
        )
        .with_state(state)
}

// DTO de entrada para crear una billetera
#[derive(Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    pub label: Option<String>,
    #[schema(value_type = String)]
    pub currency: Currency,
}

// DTO de entrada para la transferencia (contrato externo, camelCase)
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    #[schema(value_type = Uuid)]
    pub destination_wallet_id: WalletId,
    pub amount: Decimal,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub external_reference_id: Option<String>,
}

// DTO de entrada para add-funds
#[derive(Deserialize, ToSchema)]
pub struct AddFundsRequest {
    pub amount: Decimal,
    pub description: Option<String>,
}

// Vista externa de una billetera
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    #[schema(value_type = Uuid)]
    pub id: WalletId,
    #[schema(value_type = Uuid)]
    pub user_id: UserId,
    pub label: String,
    pub balance: Decimal,
    #[schema(value_type = String)]
    pub currency: Currency,
    pub active: bool,
}

impl From<&Wallet> for WalletResponse {
    fn from(w: &Wallet) -> Self {
        Self {
            id: w.id(),
            user_id: w.user_id(),
            label: w.label().to_string(),
            balance: w.balance(),
            currency: w.currency(),
            active: w.is_active(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyLookupResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransferReceipt>,
}

// Handler: Crear una billetera para el usuario autenticado
// POST /wallets
#[utoipa::path(
    post,
    path = "/wallets",
    request_body = CreateWalletRequest,
    responses(
        (status = 200, description = "Wallet created", body = WalletResponse),
        (status = 400, description = "Invalid wallet data"),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(payload): Json<CreateWalletRequest>,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state
        .create_wallet_use_case
        .execute(
            user_id,
            payload.label.unwrap_or_else(|| "Main".to_string()),
            payload.currency,
        )
        .await?;

    Ok(Json(WalletResponse::from(&wallet)))
}

// Handler: Transferencia entre billeteras
// POST /wallets/{wallet_id}/transfer
// El header Idempotency-Key aplica solo cuando el body no trae key.
#[utoipa::path(
    post,
    path = "/wallets/{wallet_id}/transfer",
    params(("wallet_id" = Uuid, Path, description = "Source wallet")),
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Transfer accepted", body = TransferReceipt),
        (status = 400, description = "Invalid amount, same wallet, currency mismatch, insufficient balance or limit exceeded"),
        (status = 404, description = "Wallet not found"),
        (status = 409, description = "Duplicate request in flight"),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn initiate_transfer(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(wallet_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<TransferRequest>,
) -> Result<Json<TransferReceipt>, ApiError> {
    let idempotency_key = payload.idempotency_key.or_else(|| {
        headers
            .get("Idempotency-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let command = TransferCommand {
        source_wallet_id: WalletId(wallet_id),
        destination_wallet_id: payload.destination_wallet_id,
        amount: payload.amount,
        description: payload.description,
        idempotency_key,
        external_reference_id: payload.external_reference_id,
    };

    let receipt = state
        .execute_transfer_use_case
        .execute(user_id, command)
        .await?;

    Ok(Json(receipt))
}

// Handler: Acreditar fondos
// POST /wallets/{wallet_id}/add-funds
#[utoipa::path(
    post,
    path = "/wallets/{wallet_id}/add-funds",
    params(("wallet_id" = Uuid, Path, description = "Destination wallet")),
    request_body = AddFundsRequest,
    responses(
        (status = 200, description = "Funds credited", body = WalletResponse),
        (status = 400, description = "Invalid amount"),
        (status = 404, description = "Wallet not found"),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn add_funds(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(wallet_id): Path<Uuid>,
    Json(payload): Json<AddFundsRequest>,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state
        .add_funds_use_case
        .execute(
            WalletId(wallet_id),
            user_id,
            payload.amount,
            payload.description,
        )
        .await?;

    Ok(Json(WalletResponse::from(&wallet)))
}

// Handler: Consultar balance
// GET /wallets/{wallet_id}/balance
#[utoipa::path(
    get,
    path = "/wallets/{wallet_id}/balance",
    params(("wallet_id" = Uuid, Path, description = "Wallet")),
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
        (status = 404, description = "Wallet not found"),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .get_balance_use_case
        .execute(WalletId(wallet_id), user_id)
        .await?;

    Ok(Json(BalanceResponse { balance }))
}

// Handler: Consultar límites de transferencia
// GET /wallets/{wallet_id}/transfer-limits
#[utoipa::path(
    get,
    path = "/wallets/{wallet_id}/transfer-limits",
    params(("wallet_id" = Uuid, Path, description = "Wallet")),
    responses(
        (status = 200, description = "Limit usage summary", body = LimitSummary),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn get_transfer_limits(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(_wallet_id): Path<Uuid>,
) -> Result<Json<LimitSummary>, ApiError> {
    let summary = state.limit_service.summary(user_id, Utc::now()).await?;

    Ok(Json(summary))
}

// Handler: Buscar transacción por idempotency key
// GET /wallets/{wallet_id}/transactions/by-idempotency/{key}
#[utoipa::path(
    get,
    path = "/wallets/{wallet_id}/transactions/by-idempotency/{key}",
    params(
        ("wallet_id" = Uuid, Path, description = "Wallet"),
        ("key" = String, Path, description = "Idempotency key")
    ),
    responses(
        (status = 200, description = "Lookup result", body = IdempotencyLookupResponse),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn find_by_idempotency_key(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path((_wallet_id, key)): Path<(Uuid, String)>,
) -> Result<Json<IdempotencyLookupResponse>, ApiError> {
    let transaction = state
        .find_by_idempotency_key_use_case
        .execute(user_id, &key)
        .await?;

    Ok(Json(IdempotencyLookupResponse {
        exists: transaction.is_some(),
        transaction: transaction.as_ref().map(TransferReceipt::from_transaction),
    }))
}
