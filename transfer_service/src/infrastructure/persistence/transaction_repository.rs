use crate::domain::entities::Transaction;
use crate::domain::error::TransferError;
use crate::domain::repository::TransactionRepository;
use crate::domain::types::TransactionId;
use crate::infrastructure::persistence::models::TransactionModel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Repositorio de transacciones implementado para PostgreSQL.
///
/// Utiliza consultas SQL parametrizadas directas con `sqlx` (Runtime-checked),
/// mapeando los resultados a `TransactionModel` con `sqlx::query_as`.
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    /// Guarda una NUEVA transacción (INSERT).
    ///
    /// Se ejecuta al inicio de la saga para registrar la intención antes de
    /// mover fondos. El índice único de `idempotency_key` convierte el insert
    /// en el árbitro de duplicados concurrentes: el perdedor recibe `Conflict`.
    async fn save(&self, transaction: Transaction) -> Result<Transaction, TransferError> {
        let model = TransactionModel::from(&transaction);

        let saved_model = sqlx::query_as::<_, TransactionModel>(
            r#"
            INSERT INTO transactions (
                id, amount, transaction_type, status, transfer_state,
                source_wallet_id, destination_wallet_id, description, metadata,
                idempotency_key, external_reference_id, parent_transaction_id,
                retry_count, error_detail, saga_state,
                reserved_amount, reservation_expires_at,
                source_balance_before, source_balance_after,
                destination_balance_before, destination_balance_after,
                processed_at, completed_at, failed_at, created_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
            )
            RETURNING *
            "#,
        )
        .bind(model.id)
        .bind(model.amount)
        .bind(model.transaction_type)
        .bind(model.status)
        .bind(model.transfer_state)
        .bind(model.source_wallet_id)
        .bind(model.destination_wallet_id)
        .bind(model.description)
        .bind(model.metadata)
        .bind(model.idempotency_key)
        .bind(model.external_reference_id)
        .bind(model.parent_transaction_id)
        .bind(model.retry_count)
        .bind(model.error_detail)
        .bind(model.saga_state)
        .bind(model.reserved_amount)
        .bind(model.reservation_expires_at)
        .bind(model.source_balance_before)
        .bind(model.source_balance_after)
        .bind(model.destination_balance_before)
        .bind(model.destination_balance_after)
        .bind(model.processed_at)
        .bind(model.completed_at)
        .bind(model.failed_at)
        .bind(model.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("uq_transactions_idempotency_key") {
                return TransferError::Conflict(
                    "A transaction with this idempotency key already exists".to_string(),
                );
            }
            TransferError::Store(e.to_string())
        })?;

        Transaction::try_from(saved_model)
    }

    /// Actualiza los campos mutables de una transacción existente.
    ///
    /// Los detalles financieros (monto, wallets, tipo) son inmutables; solo
    /// avanza el ciclo de vida, los snapshots y el estado de la saga.
    async fn update(&self, transaction: Transaction) -> Result<Transaction, TransferError> {
        let model = TransactionModel::from(&transaction);

        let updated_model = sqlx::query_as::<_, TransactionModel>(
            r#"
            UPDATE transactions
            SET status = $1,
                transfer_state = $2,
                retry_count = $3,
                error_detail = $4,
                saga_state = $5,
                reserved_amount = $6,
                reservation_expires_at = $7,
                source_balance_before = $8,
                source_balance_after = $9,
                destination_balance_before = $10,
                destination_balance_after = $11,
                processed_at = $12,
                completed_at = $13,
                failed_at = $14
            WHERE id = $15
            RETURNING *
            "#,
        )
        .bind(model.status)
        .bind(model.transfer_state)
        .bind(model.retry_count)
        .bind(model.error_detail)
        .bind(model.saga_state)
        .bind(model.reserved_amount)
        .bind(model.reservation_expires_at)
        .bind(model.source_balance_before)
        .bind(model.source_balance_after)
        .bind(model.destination_balance_before)
        .bind(model.destination_balance_after)
        .bind(model.processed_at)
        .bind(model.completed_at)
        .bind(model.failed_at)
        .bind(model.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TransferError::Store(e.to_string()))?;

        match updated_model {
            Some(m) => Transaction::try_from(m),
            None => Err(TransferError::Store(format!(
                "Transaction not found for update: {}",
                transaction.id
            ))),
        }
    }

    /// Busca una transacción por su ID único.
    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, TransferError> {
        let model_opt =
            sqlx::query_as::<_, TransactionModel>(r#"SELECT * FROM transactions WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| TransferError::Store(e.to_string()))?;

        model_opt.map(Transaction::try_from).transpose()
    }

    /// Busca la transacción asociada a un idempotency key.
    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, TransferError> {
        let model_opt = sqlx::query_as::<_, TransactionModel>(
            r#"
            SELECT * FROM transactions
            WHERE idempotency_key = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TransferError::Store(e.to_string()))?;

        model_opt.map(Transaction::try_from).transpose()
    }

    /// Transacciones atascadas en PROCESSING, candidatas a recuperación.
    async fn find_processing_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, TransferError> {
        let models = sqlx::query_as::<_, TransactionModel>(
            r#"
            SELECT * FROM transactions
            WHERE status = 'PROCESSING' AND created_at < $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TransferError::Store(e.to_string()))?;

        models.into_iter().map(Transaction::try_from).collect()
    }
}
