use crate::domain::entities::TransferLimit;
use crate::domain::error::TransferError;
use crate::domain::gateways::{keys, CacheGateway};
use crate::domain::repository::TransferLimitRepository;
use crate::domain::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const DAILY_COUNTER_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MONTHLY_COUNTER_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Resumen de límites del usuario para la superficie de consulta.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LimitSummary {
    pub daily_limit: Decimal,
    pub daily_used: Decimal,
    pub daily_remaining: Decimal,
    pub monthly_limit: Decimal,
    pub monthly_used: Decimal,
    pub monthly_remaining: Decimal,
    pub last_daily_reset: NaiveDate,
    pub last_monthly_reset: NaiveDate,
}

/// Ledger de límites de transferencia: valida la proyección de uso antes de
/// la saga y registra el consumo como paso final de la misma.
///
/// La validación y el commit están separados a propósito: la transferencia
/// puede fallar después de validar, y el consumo solo se registra cuando la
/// saga llega a COMPLETED, de modo que los límites nunca se gastan en
/// transferencias revertidas.
///
/// Los métodos reciben `now` explícito para que los tests inyecten el reloj.
pub struct TransferLimitService {
    limit_repo: Arc<dyn TransferLimitRepository>,
    cache: Arc<dyn CacheGateway>,
    default_daily_limit: Decimal,
    default_monthly_limit: Decimal,
}

impl TransferLimitService {
    pub fn new(
        limit_repo: Arc<dyn TransferLimitRepository>,
        cache: Arc<dyn CacheGateway>,
        default_daily_limit: Decimal,
        default_monthly_limit: Decimal,
    ) -> Self {
        Self {
            limit_repo,
            cache,
            default_daily_limit,
            default_monthly_limit,
        }
    }

    /// Carga el ledger del usuario, creándolo con los límites por defecto en
    /// el primer uso, y persiste cualquier reinicio de ventana observado.
    ///
    /// El reinicio persiste aunque la transferencia después falle: una ventana
    /// vencida quedó vencida sin importar el destino del request.
    async fn load_current(
        &self,
        user_id: UserId,
        today: NaiveDate,
    ) -> Result<TransferLimit, TransferError> {
        match self.limit_repo.find_by_user_id(user_id).await? {
            Some(mut limit) => {
                if limit.apply_window_resets(today) {
                    limit = self.limit_repo.upsert(limit).await?;
                }
                Ok(limit)
            }
            None => {
                let fresh = TransferLimit::new(
                    user_id,
                    self.default_daily_limit,
                    self.default_monthly_limit,
                    today,
                );
                self.limit_repo.upsert(fresh).await
            }
        }
    }

    /// Proyecta `amount` sobre ambas ventanas y falla con `LimitExceeded` si
    /// alguna quedaría por encima de su tope. No registra consumo.
    pub async fn check_and_project(
        &self,
        user_id: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        let limit = self.load_current(user_id, now.date_naive()).await?;

        if let Some(window) = limit.exceeded_window(amount) {
            return Err(TransferError::LimitExceeded(window));
        }

        Ok(())
    }

    /// Registra el consumo de una transferencia completada en ambas ventanas
    /// e invalida los contadores cacheados.
    pub async fn commit_usage(
        &self,
        user_id: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        let mut limit = self.load_current(user_id, now.date_naive()).await?;
        limit.record_usage(amount);
        self.limit_repo.upsert(limit).await?;

        if let Err(e) = self.cache.invalidate_limit_counters(user_id).await {
            warn!("Failed to invalidate limit counters for {}: {}", user_id, e);
        }

        Ok(())
    }

    /// Revierte un consumo registrado (compensación de saga).
    pub async fn revert_usage(
        &self,
        user_id: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        let mut limit = self.load_current(user_id, now.date_naive()).await?;
        limit.revert_usage(amount);
        self.limit_repo.upsert(limit).await?;

        if let Err(e) = self.cache.invalidate_limit_counters(user_id).await {
            warn!("Failed to invalidate limit counters for {}: {}", user_id, e);
        }

        Ok(())
    }

    /// Resumen de límites para la superficie de consulta. Refresca los
    /// contadores cacheados como efecto secundario (best-effort).
    pub async fn summary(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<LimitSummary, TransferError> {
        let limit = self.load_current(user_id, now.date_naive()).await?;

        let daily = self
            .cache
            .set_with_ttl(
                &keys::daily_limit(user_id),
                &limit.daily_used.to_string(),
                DAILY_COUNTER_TTL,
            )
            .await;
        let monthly = self
            .cache
            .set_with_ttl(
                &keys::monthly_limit(user_id),
                &limit.monthly_used.to_string(),
                MONTHLY_COUNTER_TTL,
            )
            .await;
        if let Err(e) = daily.and(monthly) {
            warn!("Failed to refresh limit counters for {}: {}", user_id, e);
        }

        Ok(LimitSummary {
            daily_limit: limit.daily_limit,
            daily_used: limit.daily_used,
            daily_remaining: limit.daily_remaining(),
            monthly_limit: limit.monthly_limit,
            monthly_used: limit.monthly_used,
            monthly_remaining: limit.monthly_remaining(),
            last_daily_reset: limit.last_daily_reset,
            last_monthly_reset: limit.last_monthly_reset,
        })
    }
}
