use crate::domain::entities::Transaction;
use crate::domain::error::TransferError;
use crate::domain::repository::{TransactionRepository, WalletRepository};
use crate::domain::types::UserId;
use std::sync::Arc;

/// Caso de uso de consulta: busca la transacción asociada a un idempotency
/// key. Solo responde si el caller es dueño de la billetera origen o destino.
pub struct FindByIdempotencyKeyUseCase {
    transaction_repo: Arc<dyn TransactionRepository>,
    wallet_repo: Arc<dyn WalletRepository>,
}

impl FindByIdempotencyKeyUseCase {
    pub fn new(
        transaction_repo: Arc<dyn TransactionRepository>,
        wallet_repo: Arc<dyn WalletRepository>,
    ) -> Self {
        Self {
            transaction_repo,
            wallet_repo,
        }
    }

    /// Retorna `None` tanto si la key no existe como si la transacción no
    /// involucra billeteras del caller, para no filtrar existencia.
    #[tracing::instrument(name = "FindByIdempotencyKeyUseCase::execute", skip(self))]
    pub async fn execute(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Transaction>, TransferError> {
        let Some(transaction) = self.transaction_repo.find_by_idempotency_key(key).await? else {
            return Ok(None);
        };

        for wallet_id in [transaction.source_wallet_id, transaction.destination_wallet_id]
            .into_iter()
            .flatten()
        {
            if let Some(wallet) = self.wallet_repo.find_by_id(wallet_id).await? {
                if wallet.user_id() == user_id {
                    return Ok(Some(transaction));
                }
            }
        }

        Ok(None)
    }
}
