use crate::domain::entities::{Transaction, TransactionStatus, TransferState};
use crate::domain::error::{LimitWindow, TransferError};
use crate::domain::repository::TransactionRepository;
use crate::domain::types::{TransactionId, UserId, WalletId};
use crate::use_cases::idempotency::{GateDecision, GateRequest, IdempotencyGate};
use crate::use_cases::transfer_limits::TransferLimitService;
use crate::use_cases::transfer_saga::{SagaCoordinator, TransferContext};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;

/// Comando de transferencia ya autenticado, tal como lo entrega la capa HTTP.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub source_wallet_id: WalletId,
    pub destination_wallet_id: WalletId,
    pub amount: Decimal,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub external_reference_id: Option<String>,
}

/// Metadata de la respuesta de transferencia (contrato externo).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceiptMetadata {
    #[schema(value_type = Option<String>)]
    pub transfer_state: Option<TransferState>,
    pub idempotency_key: Option<String>,
    pub external_reference_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Respuesta de una transferencia aceptada. Es exactamente lo que se cachea
/// para replay idempotente: un retry con la misma key recibe este mismo
/// cuerpo byte a byte.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    #[schema(value_type = uuid::Uuid)]
    pub id: TransactionId,
    pub amount: Decimal,
    #[schema(value_type = Option<uuid::Uuid>)]
    pub source_wallet_id: Option<WalletId>,
    #[schema(value_type = Option<uuid::Uuid>)]
    pub destination_wallet_id: Option<WalletId>,
    pub description: Option<String>,
    #[schema(value_type = String)]
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub metadata: TransferReceiptMetadata,
}

impl TransferReceipt {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            amount: tx.amount,
            source_wallet_id: tx.source_wallet_id,
            destination_wallet_id: tx.destination_wallet_id,
            description: tx.description.clone(),
            status: tx.status,
            created_at: tx.created_at,
            metadata: TransferReceiptMetadata {
                transfer_state: tx.transfer_state,
                idempotency_key: tx.idempotency_key.clone(),
                external_reference_id: tx.external_reference_id.clone(),
                completed_at: tx.completed_at,
            },
        }
    }
}

/// Caso de uso central: ejecuta una transferencia de punta a punta.
///
/// El flujo es gate de idempotencia -> pre-chequeo de límites -> registro
/// durable de la intención -> saga. Un rechazo por límite nunca registra
/// fila; cualquier fallo del camino de escritura deja registro de error de
/// idempotencia para que el retry con la misma key reciba el veredicto.
pub struct ExecuteTransferUseCase {
    transaction_repo: Arc<dyn TransactionRepository>,
    limit_service: Arc<TransferLimitService>,
    gate: Arc<IdempotencyGate>,
    coordinator: Arc<SagaCoordinator>,
}

impl ExecuteTransferUseCase {
    pub fn new(
        transaction_repo: Arc<dyn TransactionRepository>,
        limit_service: Arc<TransferLimitService>,
        gate: Arc<IdempotencyGate>,
        coordinator: Arc<SagaCoordinator>,
    ) -> Self {
        Self {
            transaction_repo,
            limit_service,
            gate,
            coordinator,
        }
    }

    #[tracing::instrument(name = "ExecuteTransferUseCase::execute", skip(self, command))]
    pub async fn execute(
        &self,
        user_id: UserId,
        command: TransferCommand,
    ) -> Result<TransferReceipt, TransferError> {
        let gate_request = GateRequest {
            user_id,
            endpoint: format!("/wallets/{}/transfer", command.source_wallet_id),
            destination_wallet_id: command.destination_wallet_id,
            amount: command.amount,
            description: command.description.clone(),
            supplied_key: command.idempotency_key.clone(),
        };

        let key = match self.gate.check(&gate_request).await? {
            GateDecision::CachedResponse(body) => {
                let receipt = serde_json::from_str(&body)
                    .map_err(|e| TransferError::Cache(format!("Corrupt cached response: {}", e)))?;
                return Ok(receipt);
            }
            GateDecision::CompletedTransaction(tx) => {
                let receipt = TransferReceipt::from_transaction(&tx);
                self.warm_result_cache(&tx, &receipt).await;
                return Ok(receipt);
            }
            GateDecision::FailedTransaction(tx) => {
                return Err(replay_failure(&tx));
            }
            GateDecision::Proceed { key } => key,
        };

        match self.execute_new(user_id, command, key.clone()).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                // Un Conflict es el veredicto de OTRO request en vuelo; no
                // pisa el registro de idempotencia de esa key.
                if !matches!(e, TransferError::Conflict(_)) {
                    self.gate.record_failure(&key, &e).await;
                }
                Err(e)
            }
        }
    }

    async fn execute_new(
        &self,
        user_id: UserId,
        command: TransferCommand,
        key: String,
    ) -> Result<TransferReceipt, TransferError> {
        // Pre-chequeo de límites: un rechazo aquí no registra transacción.
        self.limit_service
            .check_and_project(user_id, command.amount, Utc::now())
            .await?;

        let transaction = Transaction::transfer(
            command.source_wallet_id,
            command.destination_wallet_id,
            command.amount,
            command.description,
            key.clone(),
            command.external_reference_id,
        )?;

        // El INSERT con key única es el árbitro de duplicados concurrentes.
        let transaction = self.transaction_repo.save(transaction).await?;

        let ctx = TransferContext::new(transaction, user_id)?;
        let (ctx, outcome) = self.coordinator.run(ctx).await;

        match outcome {
            Ok(()) => {
                let receipt = TransferReceipt::from_transaction(&ctx.transaction);
                match serde_json::to_string(&receipt) {
                    Ok(body) => self.gate.record_success(&key, &body).await,
                    Err(e) => warn!("Failed to serialize receipt for {}: {}", key, e),
                }
                Ok(receipt)
            }
            Err(e) => Err(e),
        }
    }

    async fn warm_result_cache(&self, tx: &Transaction, receipt: &TransferReceipt) {
        if let Some(key) = &tx.idempotency_key {
            if let Ok(body) = serde_json::to_string(receipt) {
                self.gate.record_success(key, &body).await;
            }
        }
    }
}

/// Reconstruye el veredicto de un fallo terminal previo desde la fila.
fn replay_failure(tx: &Transaction) -> TransferError {
    let wallet = tx
        .source_wallet_id
        .or(tx.destination_wallet_id)
        .unwrap_or_default();

    match &tx.error_detail {
        Some(detail) => match detail.code.as_str() {
            "insufficient_balance" => TransferError::InsufficientBalance(wallet),
            "currency_mismatch" => TransferError::CurrencyMismatch,
            "limit_exceeded" => {
                if detail.message.contains("monthly") {
                    TransferError::LimitExceeded(LimitWindow::Monthly)
                } else {
                    TransferError::LimitExceeded(LimitWindow::Daily)
                }
            }
            "invalid_wallet" => TransferError::NotFound(wallet),
            "invalid_request" => TransferError::InvalidRequest(detail.message.clone()),
            "lock_timeout" => TransferError::LockTimeout(wallet),
            "conflict" => TransferError::Conflict(detail.message.clone()),
            _ => TransferError::Store(detail.message.clone()),
        },
        None => TransferError::Store(format!(
            "Transaction {} previously failed without error detail",
            tx.id
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ErrorDetail;
    use crate::domain::gateways::MockCacheGateway;
    use crate::domain::repository::{MockTransactionRepository, MockTransferLimitRepository};
    use crate::use_cases::transfer_saga::SagaStep;
    use rust_decimal_macros::dec;

    fn command(key: Option<&str>) -> TransferCommand {
        TransferCommand {
            source_wallet_id: WalletId::new(),
            destination_wallet_id: WalletId::new(),
            amount: dec!(150.00),
            description: Some("dinner".to_string()),
            idempotency_key: key.map(String::from),
            external_reference_id: None,
        }
    }

    /// Arma el caso de uso con una saga sin pasos (éxito inmediato) y los
    /// mocks provistos.
    fn use_case(
        gate_repo: MockTransactionRepository,
        saga_repo: MockTransactionRepository,
        save_repo: MockTransactionRepository,
        limit_repo: MockTransferLimitRepository,
        cache: MockCacheGateway,
    ) -> ExecuteTransferUseCase {
        let cache = Arc::new(cache);
        let limit_service = Arc::new(TransferLimitService::new(
            Arc::new(limit_repo),
            cache.clone(),
            dec!(10000),
            dec!(100000),
        ));
        let gate = Arc::new(IdempotencyGate::new(Arc::new(gate_repo), cache));
        let steps: Vec<Arc<dyn SagaStep>> = Vec::new();
        let coordinator = Arc::new(SagaCoordinator::new(steps, Arc::new(saga_repo)));
        ExecuteTransferUseCase::new(Arc::new(save_repo), limit_service, gate, coordinator)
    }

    #[tokio::test]
    async fn test_new_transfer_runs_saga_and_caches_result() {
        let mut gate_repo = MockTransactionRepository::new();
        gate_repo
            .expect_find_by_idempotency_key()
            .returning(|_| Ok(None));

        let mut saga_repo = MockTransactionRepository::new();
        saga_repo.expect_update().returning(Ok);

        let mut save_repo = MockTransactionRepository::new();
        save_repo
            .expect_save()
            .withf(|tx| tx.status == TransactionStatus::PENDING)
            .times(1)
            .returning(Ok);

        let mut limit_repo = MockTransferLimitRepository::new();
        limit_repo.expect_find_by_user_id().returning(|_| Ok(None));
        limit_repo.expect_upsert().returning(Ok);

        let mut cache = MockCacheGateway::new();
        cache.expect_get().returning(|_| Ok(None));
        // Hash mappings + resultado cacheado.
        cache.expect_set_with_ttl().returning(|_, _, _| Ok(()));

        let result = use_case(gate_repo, saga_repo, save_repo, limit_repo, cache)
            .execute(UserId::new(), command(Some("abc")))
            .await;

        let receipt = result.unwrap();
        assert_eq!(receipt.status, TransactionStatus::COMPLETED);
        assert_eq!(receipt.metadata.idempotency_key.as_deref(), Some("abc"));
        assert!(receipt.metadata.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_limit_exceeded_never_saves_a_row() {
        let mut gate_repo = MockTransactionRepository::new();
        gate_repo
            .expect_find_by_idempotency_key()
            .returning(|_| Ok(None));

        let mut save_repo = MockTransactionRepository::new();
        save_repo.expect_save().times(0);

        let mut limit_repo = MockTransferLimitRepository::new();
        let user_id = UserId::new();
        limit_repo.expect_find_by_user_id().returning(move |_| {
            let mut ledger = crate::domain::entities::TransferLimit::new(
                user_id,
                dec!(100),
                dec!(1000),
                Utc::now().date_naive(),
            );
            ledger.record_usage(dec!(80));
            Ok(Some(ledger))
        });

        let mut cache = MockCacheGateway::new();
        cache.expect_get().returning(|_| Ok(None));
        cache.expect_set_with_ttl().returning(|_, _, _| Ok(()));

        let result = use_case(
            gate_repo,
            MockTransactionRepository::new(),
            save_repo,
            limit_repo,
            cache,
        )
        .execute(user_id, command(Some("abc")))
        .await;

        assert!(matches!(
            result,
            Err(TransferError::LimitExceeded(LimitWindow::Daily))
        ));
    }

    #[tokio::test]
    async fn test_completed_prior_transaction_replays_without_saga() {
        let cmd = command(Some("abc"));
        let mut prior = Transaction::transfer(
            cmd.source_wallet_id,
            cmd.destination_wallet_id,
            cmd.amount,
            cmd.description.clone(),
            "abc".to_string(),
            None,
        )
        .unwrap();
        prior.status = TransactionStatus::COMPLETED;
        prior.completed_at = Some(Utc::now());
        let prior_id = prior.id;

        let mut gate_repo = MockTransactionRepository::new();
        gate_repo
            .expect_find_by_idempotency_key()
            .returning(move |_| Ok(Some(prior.clone())));

        let mut cache = MockCacheGateway::new();
        cache.expect_get().returning(|_| Ok(None));
        // Se calienta el result cache al reconstruir.
        cache
            .expect_set_with_ttl()
            .withf(|key, _, _| key == "idempotency:abc")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let result = use_case(
            gate_repo,
            MockTransactionRepository::new(),
            MockTransactionRepository::new(),
            MockTransferLimitRepository::new(),
            cache,
        )
        .execute(UserId::new(), cmd)
        .await;

        let receipt = result.unwrap();
        assert_eq!(receipt.id, prior_id);
        assert_eq!(receipt.status, TransactionStatus::COMPLETED);
    }

    #[tokio::test]
    async fn test_terminal_failure_replays_original_error() {
        let mut prior = Transaction::transfer(
            WalletId::new(),
            WalletId::new(),
            dec!(150.00),
            None,
            "abc".to_string(),
            None,
        )
        .unwrap();
        prior.status = TransactionStatus::FAILED;
        prior.error_detail = Some(ErrorDetail {
            code: "insufficient_balance".to_string(),
            message: "Insufficient balance".to_string(),
        });

        let mut gate_repo = MockTransactionRepository::new();
        gate_repo
            .expect_find_by_idempotency_key()
            .returning(move |_| Ok(Some(prior.clone())));

        let mut cache = MockCacheGateway::new();
        cache.expect_get().returning(|_| Ok(None));

        let result = use_case(
            gate_repo,
            MockTransactionRepository::new(),
            MockTransactionRepository::new(),
            MockTransferLimitRepository::new(),
            cache,
        )
        .execute(UserId::new(), command(Some("abc")))
        .await;

        assert!(matches!(result, Err(TransferError::InsufficientBalance(_))));
    }

    #[tokio::test]
    async fn test_duplicate_insert_surfaces_conflict() {
        let mut gate_repo = MockTransactionRepository::new();
        gate_repo
            .expect_find_by_idempotency_key()
            .returning(|_| Ok(None));

        let mut save_repo = MockTransactionRepository::new();
        // El perdedor de la carrera del índice único.
        save_repo.expect_save().returning(|_| {
            Err(TransferError::Conflict(
                "A transaction with this idempotency key already exists".to_string(),
            ))
        });

        let mut limit_repo = MockTransferLimitRepository::new();
        limit_repo.expect_find_by_user_id().returning(|_| Ok(None));
        limit_repo.expect_upsert().returning(Ok);

        let mut cache = MockCacheGateway::new();
        cache.expect_get().returning(|_| Ok(None));
        cache.expect_set_with_ttl().returning(|_, _, _| Ok(()));

        let result = use_case(
            gate_repo,
            MockTransactionRepository::new(),
            save_repo,
            limit_repo,
            cache,
        )
        .execute(UserId::new(), command(Some("k9")))
        .await;

        assert!(matches!(result, Err(TransferError::Conflict(_))));
    }
}
