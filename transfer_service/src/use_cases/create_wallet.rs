use crate::domain::entities::{Currency, Wallet};
use crate::domain::error::TransferError;
use crate::domain::gateways::{CacheGateway, VersionedBalance};
use crate::domain::repository::WalletRepository;
use crate::domain::types::UserId;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Caso de uso que gestiona la creación de una Wallet para el usuario
/// autenticado. La billetera nace con balance 0 y su entrada versionada en
/// cache arranca en la versión 1.
pub struct CreateWalletUseCase {
    wallet_repo: Arc<dyn WalletRepository>,
    cache: Arc<dyn CacheGateway>,
}

impl CreateWalletUseCase {
    pub fn new(wallet_repo: Arc<dyn WalletRepository>, cache: Arc<dyn CacheGateway>) -> Self {
        Self { wallet_repo, cache }
    }

    /// Ejecuta el caso de uso. El Builder de `Wallet` valida el estado base.
    #[tracing::instrument(name = "CreateWalletUseCase::execute", skip(self))]
    pub async fn execute(
        &self,
        user_id: UserId,
        label: String,
        currency: Currency,
    ) -> Result<Wallet, TransferError> {
        let wallet = Wallet::builder()
            .user_id(user_id)
            .label(label)
            .currency(currency)
            .build()?;

        let wallet = self.wallet_repo.create(wallet).await?;

        // Prime del cache en versión 1. Best-effort: si falla, la primera
        // lectura puebla la entrada desde el store.
        let entry = VersionedBalance {
            balance: wallet.balance(),
            version: wallet.version() as i64,
            last_updated: Utc::now(),
        };
        if let Err(e) = self.cache.put_versioned_balance(wallet.id(), &entry).await {
            warn!("Failed to prime balance cache for {}: {}", wallet.id(), e);
        }

        Ok(wallet)
    }
}
