use crate::domain::gateways::{CacheGateway, VersionedBalance};
use crate::domain::types::WalletId;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

/// Sincroniza la entrada versionada de balance tras un commit en el store.
///
/// El escritor sostiene el lease de la billetera, así que el CAS debería
/// aplicar. Un mismatch significa que un escritor más nuevo ya pasó (este
/// escritor llegó tarde, p. ej. sobrevivió a su TTL): en ese caso se descarta
/// la entrada para que la próxima lectura repare desde el store. Ningún fallo
/// de cache se propaga; el store es autoritativo.
pub async fn refresh_versioned_balance(
    cache: &Arc<dyn CacheGateway>,
    wallet_id: WalletId,
    balance: Decimal,
    version: i64,
) {
    let entry = VersionedBalance {
        balance,
        version,
        last_updated: Utc::now(),
    };

    let expected = match cache.get_versioned_balance(wallet_id).await {
        Ok(current) => current.map(|c| c.version),
        Err(e) => {
            warn!("Skipping balance cache refresh for {}: {}", wallet_id, e);
            return;
        }
    };

    // Si el cache ya va adelante de este escritor, no hay nada que escribir.
    if let Some(current_version) = expected {
        if current_version >= version {
            return;
        }
    }

    match cache.cas_versioned_balance(wallet_id, expected, &entry).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                "Version mismatch refreshing balance cache for {} (expected {:?}); dropping entry",
                wallet_id, expected
            );
            if let Err(e) = cache.delete(&crate::domain::gateways::keys::wallet_balance(wallet_id)).await {
                warn!("Failed to drop stale balance entry for {}: {}", wallet_id, e);
            }
        }
        Err(e) => {
            warn!("Failed to refresh balance cache for {}: {}", wallet_id, e);
        }
    }
}
