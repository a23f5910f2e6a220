use crate::domain::repository::{TransactionRepository, WalletRepository};
use crate::use_cases::transfer_saga::SagaCoordinator;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Edad mínima de una transacción PROCESSING para considerarla atascada.
const STUCK_AFTER_MINUTES: i64 = 5;

/// Job en segundo plano que recupera sagas atascadas en PROCESSING.
///
/// Esto ocurre si el proceso murió a mitad de una transferencia: el snapshot
/// de saga persistido en la fila permite compensar exactamente los pasos que
/// alcanzaron a completarse y cerrar la transacción como FAILED/COMPENSATED.
pub struct SagaRecoveryJob {
    transaction_repo: Arc<dyn TransactionRepository>,
    wallet_repo: Arc<dyn WalletRepository>,
    coordinator: Arc<SagaCoordinator>,
}

impl SagaRecoveryJob {
    pub fn new(
        transaction_repo: Arc<dyn TransactionRepository>,
        wallet_repo: Arc<dyn WalletRepository>,
        coordinator: Arc<SagaCoordinator>,
    ) -> Self {
        Self {
            transaction_repo,
            wallet_repo,
            coordinator,
        }
    }

    /// Ejecuta una pasada de recuperación.
    pub async fn run(&self) {
        let cutoff = Utc::now() - Duration::minutes(STUCK_AFTER_MINUTES);

        let stuck = match self.transaction_repo.find_processing_older_than(cutoff).await {
            Ok(stuck) => stuck,
            Err(e) => {
                error!("Failed to fetch stuck transactions: {}", e);
                return;
            }
        };

        if stuck.is_empty() {
            return;
        }

        info!("Found {} stuck transfers. Compensating...", stuck.len());

        for tx in stuck {
            let tx_id = tx.id;

            // El dueño se deriva de la billetera origen; lo necesita la
            // compensación del consumo de límites.
            let Some(source_id) = tx.source_wallet_id else {
                warn!("Stuck transaction {} has no source wallet, skipping", tx_id);
                continue;
            };
            let owner = match self.wallet_repo.find_by_id(source_id).await {
                Ok(Some(wallet)) => wallet.user_id(),
                Ok(None) => {
                    warn!("Source wallet {} of stuck transaction {} is gone", source_id, tx_id);
                    continue;
                }
                Err(e) => {
                    error!("Failed to load source wallet for {}: {}", tx_id, e);
                    continue;
                }
            };

            match self.coordinator.recover(tx, owner).await {
                Ok(()) => info!("Stuck transfer {} compensated and closed", tx_id),
                Err(e) => error!("Failed to recover stuck transfer {}: {}", tx_id, e),
            }
        }
    }
}
