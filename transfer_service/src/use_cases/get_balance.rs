use crate::domain::error::TransferError;
use crate::domain::gateways::{CacheGateway, VersionedBalance};
use crate::domain::repository::WalletRepository;
use crate::domain::types::{UserId, WalletId};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Caso de uso de consulta de balance, cache-first.
///
/// Una entrada con `last_updated` dentro de la ventana de frescura se sirve
/// sin tocar el store. Si está vencida, el refresco toma el lease de lectura
/// (timeout corto), re-chequea el cache y recién entonces lee el store y
/// escribe through con la versión de la fila.
pub struct GetBalanceUseCase {
    wallet_repo: Arc<dyn WalletRepository>,
    cache: Arc<dyn CacheGateway>,
    read_lock_timeout: Duration,
    freshness: Duration,
}

impl GetBalanceUseCase {
    pub fn new(
        wallet_repo: Arc<dyn WalletRepository>,
        cache: Arc<dyn CacheGateway>,
        read_lock_timeout: Duration,
        freshness: Duration,
    ) -> Self {
        Self {
            wallet_repo,
            cache,
            read_lock_timeout,
            freshness,
        }
    }

    #[tracing::instrument(name = "GetBalanceUseCase::execute", skip(self))]
    pub async fn execute(
        &self,
        wallet_id: WalletId,
        user_id: UserId,
    ) -> Result<Decimal, TransferError> {
        // El chequeo de acceso siempre es contra el store; solo el balance se
        // sirve desde cache.
        let wallet = self
            .wallet_repo
            .find_by_id(wallet_id)
            .await?
            .filter(|w| w.is_operable_by(user_id))
            .ok_or(TransferError::NotFound(wallet_id))?;

        if let Some(entry) = self.fresh_cache_entry(wallet_id).await {
            return Ok(entry.balance);
        }

        // Entrada vencida o ausente: refrescamos bajo el lease de lectura.
        let token = match self
            .cache
            .acquire_wallet_lock(wallet_id, self.read_lock_timeout)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!("Lease acquisition failed reading {}: {}", wallet_id, e);
                None
            }
        };

        let Some(token) = token else {
            // Sin lease no se escribe el cache; el balance autoritativo ya
            // está en mano.
            return Ok(wallet.balance());
        };

        // Otro lector pudo habernos ganado el refresco mientras esperábamos.
        let balance = if let Some(entry) = self.fresh_cache_entry(wallet_id).await {
            entry.balance
        } else {
            match self.wallet_repo.find_by_id(wallet_id).await? {
                Some(current) => {
                    let entry = VersionedBalance {
                        balance: current.balance(),
                        version: current.version() as i64,
                        last_updated: Utc::now(),
                    };
                    if let Err(e) = self.cache.put_versioned_balance(wallet_id, &entry).await {
                        warn!("Write-through failed for {}: {}", wallet_id, e);
                    }
                    current.balance()
                }
                None => return Err(TransferError::NotFound(wallet_id)),
            }
        };

        if let Err(e) = self.cache.release_wallet_lock(wallet_id, &token).await {
            warn!("Failed to release read lease for {}: {}", wallet_id, e);
        }

        Ok(balance)
    }

    async fn fresh_cache_entry(&self, wallet_id: WalletId) -> Option<VersionedBalance> {
        match self.cache.get_versioned_balance(wallet_id).await {
            Ok(Some(entry)) => {
                let age = Utc::now().signed_duration_since(entry.last_updated);
                if age.num_seconds() >= 0 && (age.num_seconds() as u64) < self.freshness.as_secs() {
                    Some(entry)
                } else {
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                // El cache degrada a lectura autoritativa, nunca falla la consulta.
                warn!("Balance cache read failed for {}: {}", wallet_id, e);
                None
            }
        }
    }
}
