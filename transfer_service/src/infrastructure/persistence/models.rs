use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use crate::domain::entities::{
    Currency, Transaction, TransactionStatus, TransactionType, TransferLimit, TransferState, Wallet,
};
use crate::domain::types::{TransactionId, UserId, WalletId};

// Modelo de Base de Datos para Wallet (especifico de SQLx)
// Representa la tabla 'wallets' en PostgreSQL.
#[derive(Debug, FromRow)]
pub struct WalletModel {
    pub id: WalletId,
    pub user_id: UserId,
    pub label: String,
    pub balance: Decimal,
    pub currency: Currency,
    pub active: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Conversión Dominio -> Modelo (Move Semantics)
impl From<Wallet> for WalletModel {
    fn from(w: Wallet) -> Self {
        let now = Utc::now();
        Self {
            id: w.id(),
            user_id: w.user_id(),
            label: w.label().to_string(),
            balance: w.balance(),
            currency: w.currency(),
            active: w.is_active(),
            version: w.version(),
            created_at: now,
            updated_at: now,
        }
    }
}

// Conversión Modelo -> Dominio
// Pasa por `reconstitute` para que datos inválidos en BD salgan como error de
// validación en lugar de circular por la capa de aplicación.
impl TryFrom<WalletModel> for Wallet {
    type Error = crate::domain::error::TransferError;

    fn try_from(m: WalletModel) -> Result<Self, Self::Error> {
        Wallet::reconstitute(m.id, m.user_id, m.label, m.balance, m.currency, m.active, m.version)
    }
}

// Modelo de Base de Datos para Transaction (especifico de SQLx)
// Los campos JSON (metadata, error_detail, saga_state) viajan como JSONB.
#[derive(Debug, FromRow)]
pub struct TransactionModel {
    pub id: TransactionId,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub transfer_state: Option<TransferState>,
    pub source_wallet_id: Option<WalletId>,
    pub destination_wallet_id: Option<WalletId>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub external_reference_id: Option<String>,
    pub parent_transaction_id: Option<TransactionId>,
    pub retry_count: i32,
    pub error_detail: Option<serde_json::Value>,
    pub saga_state: Option<serde_json::Value>,
    pub reserved_amount: Option<Decimal>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub source_balance_before: Option<Decimal>,
    pub source_balance_after: Option<Decimal>,
    pub destination_balance_before: Option<Decimal>,
    pub destination_balance_after: Option<Decimal>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionModel {
    fn from(t: &Transaction) -> Self {
        Self {
            id: t.id,
            amount: t.amount,
            transaction_type: t.transaction_type,
            status: t.status,
            transfer_state: t.transfer_state,
            source_wallet_id: t.source_wallet_id,
            destination_wallet_id: t.destination_wallet_id,
            description: t.description.clone(),
            metadata: t.metadata.clone(),
            idempotency_key: t.idempotency_key.clone(),
            external_reference_id: t.external_reference_id.clone(),
            parent_transaction_id: t.parent_transaction_id,
            retry_count: t.retry_count,
            error_detail: t
                .error_detail
                .as_ref()
                .and_then(|e| serde_json::to_value(e).ok()),
            saga_state: t
                .saga_state
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok()),
            reserved_amount: t.reserved_amount,
            reservation_expires_at: t.reservation_expires_at,
            source_balance_before: t.source_balance_before,
            source_balance_after: t.source_balance_after,
            destination_balance_before: t.destination_balance_before,
            destination_balance_after: t.destination_balance_after,
            processed_at: t.processed_at,
            completed_at: t.completed_at,
            failed_at: t.failed_at,
            created_at: t.created_at,
        }
    }
}

// Un saga_state que no deserializa NO puede colapsar a None: la recuperación
// compensaría cero pasos y dejaría un débito sin su crédito. El parse falla
// hacia arriba como error de store.
impl TryFrom<TransactionModel> for Transaction {
    type Error = crate::domain::error::TransferError;

    fn try_from(m: TransactionModel) -> Result<Self, Self::Error> {
        let error_detail = m
            .error_detail
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                crate::domain::error::TransferError::Store(format!(
                    "Corrupt error_detail on transaction {}: {}",
                    m.id, e
                ))
            })?;
        let saga_state = m
            .saga_state
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                crate::domain::error::TransferError::Store(format!(
                    "Corrupt saga_state on transaction {}: {}",
                    m.id, e
                ))
            })?;

        Ok(Self {
            id: m.id,
            amount: m.amount,
            transaction_type: m.transaction_type,
            status: m.status,
            transfer_state: m.transfer_state,
            source_wallet_id: m.source_wallet_id,
            destination_wallet_id: m.destination_wallet_id,
            description: m.description,
            metadata: m.metadata,
            idempotency_key: m.idempotency_key,
            external_reference_id: m.external_reference_id,
            parent_transaction_id: m.parent_transaction_id,
            retry_count: m.retry_count,
            error_detail,
            saga_state,
            reserved_amount: m.reserved_amount,
            reservation_expires_at: m.reservation_expires_at,
            source_balance_before: m.source_balance_before,
            source_balance_after: m.source_balance_after,
            destination_balance_before: m.destination_balance_before,
            destination_balance_after: m.destination_balance_after,
            processed_at: m.processed_at,
            completed_at: m.completed_at,
            failed_at: m.failed_at,
            created_at: m.created_at,
        })
    }
}

// Modelo de Base de Datos para TransferLimit
// Representa la tabla 'transfer_limits' (una fila por usuario).
#[derive(Debug, FromRow)]
pub struct TransferLimitModel {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub daily_used: Decimal,
    pub monthly_used: Decimal,
    pub last_daily_reset: NaiveDate,
    pub last_monthly_reset: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransferLimitModel> for TransferLimit {
    fn from(m: TransferLimitModel) -> Self {
        Self {
            user_id: m.user_id,
            daily_limit: m.daily_limit,
            monthly_limit: m.monthly_limit,
            daily_used: m.daily_used,
            monthly_used: m.monthly_used,
            last_daily_reset: m.last_daily_reset,
            last_monthly_reset: m.last_monthly_reset,
        }
    }
}
