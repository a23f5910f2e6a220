use crate::domain::entities::{Transaction, Wallet};
use crate::domain::error::TransferError;
use crate::domain::repository::{BalanceChange, WalletRepository};
use crate::domain::types::WalletId;
use crate::infrastructure::persistence::models::{TransactionModel, WalletModel};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

/// Repositorio de Billeteras basado en PostgreSQL.
pub struct PostgresWalletRepository {
    pool: PgPool,
}

impl PostgresWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// La constraint `positive_balance` rechaza débitos que dejarían el balance
/// negativo; la traducimos al error de negocio.
fn map_balance_error(e: sqlx::Error, id: WalletId) -> TransferError {
    if e.to_string().contains("positive_balance") {
        return TransferError::InsufficientBalance(id);
    }
    TransferError::Store(e.to_string())
}

#[async_trait]
impl WalletRepository for PostgresWalletRepository {
    /// Busca una billetera por su ID.
    async fn find_by_id(&self, id: WalletId) -> Result<Option<Wallet>, TransferError> {
        let model_opt = sqlx::query_as::<_, WalletModel>(
            r#"
            SELECT * FROM wallets
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TransferError::Store(e.to_string()))?;

        model_opt.map(Wallet::try_from).transpose()
    }

    /// Crea una nueva billetera.
    async fn create(&self, wallet: Wallet) -> Result<Wallet, TransferError> {
        let model = WalletModel::from(wallet);

        let saved_model = sqlx::query_as::<_, WalletModel>(
            r#"
            INSERT INTO wallets (
                id, user_id, label, balance, currency, active, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(model.id)
        .bind(model.user_id)
        .bind(model.label)
        .bind(model.balance)
        .bind(model.currency)
        .bind(model.active)
        .bind(model.version)
        .bind(model.created_at)
        .bind(model.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| TransferError::Store(e.to_string()))?;

        Wallet::try_from(saved_model)
    }

    /// Aplica el delta por expresión en un único UPDATE atómico.
    ///
    /// Incrementamos la versión en la misma sentencia, de modo que la fila y
    /// el cache versionado avanzan juntos bajo el lease del escritor.
    async fn apply_delta(&self, id: WalletId, delta: Decimal) -> Result<BalanceChange, TransferError> {
        let row = sqlx::query_as::<_, (Decimal, i32)>(
            r#"
            UPDATE wallets
            SET balance = balance + $1,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $2 AND active = TRUE
            RETURNING balance, version
            "#,
        )
        .bind(delta)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_balance_error(e, id))?;

        match row {
            Some((balance_after, version)) => Ok(BalanceChange {
                balance_before: balance_after - delta,
                balance_after,
                version,
            }),
            None => Err(TransferError::NotFound(id)),
        }
    }

    /// Acredita fondos e inserta el recibo DEPOSIT en una sola transacción de
    /// store, de modo que balance y registro quedan consistentes o nada aplica.
    async fn deposit(
        &self,
        id: WalletId,
        amount: Decimal,
        receipt: Transaction,
    ) -> Result<Wallet, TransferError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TransferError::Store(e.to_string()))?;

        let model_opt = sqlx::query_as::<_, WalletModel>(
            r#"
            UPDATE wallets
            SET balance = balance + $1,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $2 AND active = TRUE
            RETURNING *
            "#,
        )
        .bind(amount)
        .bind(id)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(|e| map_balance_error(e, id))?;

        let Some(wallet_model) = model_opt else {
            return Err(TransferError::NotFound(id));
        };

        let receipt_model = TransactionModel::from(&receipt);
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, amount, transaction_type, status, destination_wallet_id,
                description, metadata, retry_count, processed_at, completed_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(receipt_model.id)
        .bind(receipt_model.amount)
        .bind(receipt_model.transaction_type)
        .bind(receipt_model.status)
        .bind(receipt_model.destination_wallet_id)
        .bind(receipt_model.description)
        .bind(receipt_model.metadata)
        .bind(receipt_model.retry_count)
        .bind(receipt_model.processed_at)
        .bind(receipt_model.completed_at)
        .bind(receipt_model.created_at)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| TransferError::Store(e.to_string()))?;

        db_tx
            .commit()
            .await
            .map_err(|e| TransferError::Store(e.to_string()))?;

        Wallet::try_from(wallet_model)
    }
}
