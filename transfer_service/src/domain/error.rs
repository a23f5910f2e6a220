use crate::domain::types::WalletId;
use thiserror::Error;

/// Ventana de límite que fue excedida.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitWindow {
    Daily,
    Monthly,
}

impl std::fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitWindow::Daily => write!(f, "daily"),
            LimitWindow::Monthly => write!(f, "monthly"),
        }
    }
}

/// Error unificado del núcleo de transferencias.
///
/// Cada operación pública del core retorna esta suma de errores; la capa HTTP
/// mapea cada variante a un status code.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Wallet not found with ID: {0}")]
    NotFound(WalletId),

    #[error("Currency mismatch between source and destination wallets")]
    CurrencyMismatch,

    #[error("Insufficient balance in wallet: {0}")]
    InsufficientBalance(WalletId),

    #[error("{0} transfer limit exceeded")]
    LimitExceeded(LimitWindow),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out acquiring lock for wallet: {0}")]
    LockTimeout(WalletId),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Compensation failure: {0}")]
    CompensationFailure(String),
}

impl TransferError {
    /// Código estable del error, persistido en `error_detail` de la transacción
    /// y usado por el gate de idempotencia para clasificar reintentos.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "invalid_request",
            TransferError::NotFound(_) => "invalid_wallet",
            TransferError::CurrencyMismatch => "currency_mismatch",
            TransferError::InsufficientBalance(_) => "insufficient_balance",
            TransferError::LimitExceeded(_) => "limit_exceeded",
            TransferError::Conflict(_) => "conflict",
            TransferError::LockTimeout(_) => "lock_timeout",
            TransferError::Cache(_) => "cache_error",
            TransferError::Store(_) => "store_error",
            TransferError::CompensationFailure(_) => "compensation_failure",
        }
    }

    /// Un error de negocio es un veredicto terminal; los errores de
    /// infraestructura (lock, cache, store) pueden reintentarse.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::LockTimeout(_) | TransferError::Cache(_) | TransferError::Store(_)
        )
    }
}
