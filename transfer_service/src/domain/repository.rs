use crate::domain::entities::{Transaction, TransferLimit, Wallet};
use crate::domain::error::TransferError;
use crate::domain::types::{TransactionId, UserId, WalletId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Resultado de una mutación atómica de balance: snapshots antes/después y la
/// versión resultante de la fila.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceChange {
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub version: i32,
}

// Interface (Port) for Wallet persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find_by_id(&self, id: WalletId) -> Result<Option<Wallet>, TransferError>;

    async fn create(&self, wallet: Wallet) -> Result<Wallet, TransferError>;

    /// Aplica `delta` (positivo o negativo) sobre el balance en un único
    /// UPDATE por expresión, incrementando la versión de la fila. Retorna los
    /// snapshots antes/después. Falla con `InsufficientBalance` si el delta
    /// dejaría el balance negativo y `NotFound` si la billetera no existe.
    async fn apply_delta(&self, id: WalletId, delta: Decimal) -> Result<BalanceChange, TransferError>;

    /// Acredita fondos e inserta el recibo (transacción DEPOSIT COMPLETED) en
    /// una única transacción de store. Retorna la billetera actualizada.
    async fn deposit(
        &self,
        id: WalletId,
        amount: Decimal,
        receipt: Transaction,
    ) -> Result<Wallet, TransferError>;
}

// Interface (Port) for Transaction persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// INSERT de una transacción nueva. Una violación del índice único de
    /// `idempotency_key` se reporta como `Conflict` (duplicado concurrente).
    async fn save(&self, transaction: Transaction) -> Result<Transaction, TransferError>;

    /// UPDATE de los campos mutables (estado, sub-estado, snapshot de saga,
    /// reservas, balances, timestamps, error).
    async fn update(&self, transaction: Transaction) -> Result<Transaction, TransferError>;

    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, TransferError>;

    async fn find_by_idempotency_key(&self, key: &str)
        -> Result<Option<Transaction>, TransferError>;

    /// Transacciones PROCESSING más viejas que `cutoff`, candidatas a
    /// recuperación de saga.
    async fn find_processing_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, TransferError>;
}

// Interface (Port) for TransferLimit persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferLimitRepository: Send + Sync {
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<TransferLimit>, TransferError>;

    /// Inserta o actualiza el ledger del usuario (único por `user_id`).
    async fn upsert(&self, limit: TransferLimit) -> Result<TransferLimit, TransferError>;
}
