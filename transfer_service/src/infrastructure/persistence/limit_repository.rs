use crate::domain::entities::TransferLimit;
use crate::domain::error::TransferError;
use crate::domain::repository::TransferLimitRepository;
use crate::domain::types::UserId;
use crate::infrastructure::persistence::models::TransferLimitModel;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Repositorio del ledger de límites basado en PostgreSQL.
pub struct PostgresTransferLimitRepository {
    pool: PgPool,
}

impl PostgresTransferLimitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferLimitRepository for PostgresTransferLimitRepository {
    /// Busca el ledger del usuario (único por `user_id`).
    async fn find_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<Option<TransferLimit>, TransferError> {
        let model_opt = sqlx::query_as::<_, TransferLimitModel>(
            r#"
            SELECT * FROM transfer_limits
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TransferError::Store(e.to_string()))?;

        Ok(model_opt.map(|m| m.into()))
    }

    /// Inserta o actualiza el ledger del usuario.
    ///
    /// El UPSERT sobre la constraint de `user_id` hace que dos escritores
    /// concurrentes converjan en una sola fila.
    async fn upsert(&self, limit: TransferLimit) -> Result<TransferLimit, TransferError> {
        let saved = sqlx::query_as::<_, TransferLimitModel>(
            r#"
            INSERT INTO transfer_limits (
                id, user_id, daily_limit, monthly_limit, daily_used, monthly_used,
                last_daily_reset, last_monthly_reset, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET daily_limit = EXCLUDED.daily_limit,
                monthly_limit = EXCLUDED.monthly_limit,
                daily_used = EXCLUDED.daily_used,
                monthly_used = EXCLUDED.monthly_used,
                last_daily_reset = EXCLUDED.last_daily_reset,
                last_monthly_reset = EXCLUDED.last_monthly_reset,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(limit.user_id)
        .bind(limit.daily_limit)
        .bind(limit.monthly_limit)
        .bind(limit.daily_used)
        .bind(limit.monthly_used)
        .bind(limit.last_daily_reset)
        .bind(limit.last_monthly_reset)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| TransferError::Store(e.to_string()))?;

        Ok(saved.into())
    }
}
