use crate::domain::error::TransferError;
use crate::domain::types::{UserId, WalletId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Namespaces de claves en el cache. Centralizados para que la capa de
/// infraestructura y los casos de uso compartan el mismo layout.
pub mod keys {
    use crate::domain::types::{UserId, WalletId};

    pub fn wallet_balance(wallet_id: WalletId) -> String {
        format!("wallet_balance_v2:{}", wallet_id)
    }

    pub fn wallet_lock(wallet_id: WalletId) -> String {
        format!("wallet_lock:{}", wallet_id)
    }

    pub fn daily_limit(user_id: UserId) -> String {
        format!("transfer_limit:{}:daily", user_id)
    }

    pub fn monthly_limit(user_id: UserId) -> String {
        format!("transfer_limit:{}:monthly", user_id)
    }

    pub fn idempotency_result(key: &str) -> String {
        format!("idempotency:{}", key)
    }

    pub fn idempotency_request(key: &str) -> String {
        format!("idempotency_request:{}", key)
    }

    pub fn idempotency_error(key: &str) -> String {
        format!("idempotency_error:{}", key)
    }

    pub fn request_hash(hash: &str) -> String {
        format!("request_hash:{}", hash)
    }
}

/// Entrada versionada de balance en cache. La versión espeja la versión de la
/// fila en el store y es estrictamente creciente por billetera.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionedBalance {
    pub balance: Decimal,
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

// Interface (Port) for the Cache & Lock service
//
// Contrato de fallos: un error de cache nunca corrompe estado durable. Los
// call sites tratan `Cache(_)` como degradación (log + fallback al store),
// no como fallo de la operación de negocio.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheGateway: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TransferError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), TransferError>;

    async fn delete(&self, key: &str) -> Result<(), TransferError>;

    /// Adquiere el lease exclusivo de una billetera. Hace polling con
    /// set-if-absent hasta que `timeout` expira; el TTL del lease es el mismo
    /// `timeout`, de modo que un holder muerto libera solo. Retorna el token
    /// del lease, o `None` si no se pudo adquirir dentro del timeout.
    async fn acquire_wallet_lock(
        &self,
        wallet_id: WalletId,
        timeout: Duration,
    ) -> Result<Option<String>, TransferError>;

    /// Libera el lease solo si `token` sigue siendo el holder actual
    /// (compare-and-delete atómico en el servidor). Retorna si borró.
    async fn release_wallet_lock(
        &self,
        wallet_id: WalletId,
        token: &str,
    ) -> Result<bool, TransferError>;

    async fn get_versioned_balance(
        &self,
        wallet_id: WalletId,
    ) -> Result<Option<VersionedBalance>, TransferError>;

    /// Escribe la entrada versionada sin condición (prime inicial o repair).
    async fn put_versioned_balance(
        &self,
        wallet_id: WalletId,
        entry: &VersionedBalance,
    ) -> Result<(), TransferError>;

    /// Compare-and-swap: escribe `entry` solo si la versión almacenada es
    /// `expected_version`. `expected_version = None` exige que no exista
    /// entrada. Retorna si el swap aplicó.
    async fn cas_versioned_balance(
        &self,
        wallet_id: WalletId,
        expected_version: Option<i64>,
        entry: &VersionedBalance,
    ) -> Result<bool, TransferError>;

    /// Invalida los contadores de límite cacheados del usuario.
    async fn invalidate_limit_counters(&self, user_id: UserId) -> Result<(), TransferError>;
}
