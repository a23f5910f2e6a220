use crate::domain::entities::{validate_amount, Transaction, Wallet};
use crate::domain::error::TransferError;
use crate::domain::gateways::CacheGateway;
use crate::domain::repository::WalletRepository;
use crate::domain::types::{UserId, WalletId};
use crate::use_cases::cache_sync::refresh_versioned_balance;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Caso de uso para acreditar fondos (depósito) en una billetera propia.
///
/// Toda mutación de balance sostiene el lease de la billetera durante la
/// ventana completa de lectura-cómputo-commit; el depósito y su recibo se
/// escriben en una sola transacción de store.
pub struct AddFundsUseCase {
    wallet_repo: Arc<dyn WalletRepository>,
    cache: Arc<dyn CacheGateway>,
    write_lock_timeout: Duration,
}

impl AddFundsUseCase {
    pub fn new(
        wallet_repo: Arc<dyn WalletRepository>,
        cache: Arc<dyn CacheGateway>,
        write_lock_timeout: Duration,
    ) -> Self {
        Self {
            wallet_repo,
            cache,
            write_lock_timeout,
        }
    }

    /// Ejecuta el depósito. Falla con `NotFound` si la billetera no existe,
    /// está inactiva o no pertenece al usuario, y con `LockTimeout` si el
    /// lease no se adquiere dentro del timeout de escritura.
    #[tracing::instrument(name = "AddFundsUseCase::execute", skip(self))]
    pub async fn execute(
        &self,
        wallet_id: WalletId,
        user_id: UserId,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Wallet, TransferError> {
        validate_amount(amount)?;

        let wallet = self
            .wallet_repo
            .find_by_id(wallet_id)
            .await?
            .filter(|w| w.is_operable_by(user_id))
            .ok_or(TransferError::NotFound(wallet_id))?;

        let token = self
            .cache
            .acquire_wallet_lock(wallet.id(), self.write_lock_timeout)
            .await?
            .ok_or(TransferError::LockTimeout(wallet.id()))?;

        let result = self.deposit_locked(wallet.id(), amount, description).await;

        if let Err(e) = self.cache.release_wallet_lock(wallet.id(), &token).await {
            warn!("Failed to release wallet lock for {}: {}", wallet.id(), e);
        }

        result
    }

    async fn deposit_locked(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Wallet, TransferError> {
        let receipt = Transaction::deposit(wallet_id, amount, description)?;
        let wallet = self.wallet_repo.deposit(wallet_id, amount, receipt).await?;

        refresh_versioned_balance(
            &self.cache,
            wallet.id(),
            wallet.balance(),
            wallet.version() as i64,
        )
        .await;

        Ok(wallet)
    }
}
