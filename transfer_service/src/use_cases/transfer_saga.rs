use crate::domain::entities::{ErrorDetail, Transaction, TransactionStatus, TransferState};
use crate::domain::error::TransferError;
use crate::domain::gateways::CacheGateway;
use crate::domain::repository::{TransactionRepository, WalletRepository};
use crate::domain::saga::SagaState;
use crate::domain::types::{UserId, WalletId};
use crate::use_cases::cache_sync::refresh_versioned_balance;
use crate::use_cases::transfer_limits::TransferLimitService;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Vigencia de la reserva advisory de fondos.
const RESERVATION_TTL_MINUTES: i64 = 30;

pub const STEP_VALIDATE: &str = "validate_transfer";
pub const STEP_RESERVE: &str = "reserve_funds";
pub const STEP_DEBIT: &str = "debit_source";
pub const STEP_CREDIT: &str = "credit_destination";
pub const STEP_FINALIZE: &str = "finalize_transfer";
pub const STEP_COMMIT_USAGE: &str = "commit_limit_usage";

/// Estado mutable que viaja por los pasos de la saga.
#[derive(Debug)]
pub struct TransferContext {
    pub transaction: Transaction,
    pub user_id: UserId,
    pub source_wallet_id: WalletId,
    pub destination_wallet_id: WalletId,
    pub amount: Decimal,
    pub saga: SagaState,
}

impl TransferContext {
    /// Arma el contexto desde la fila de la transacción. Retoma el snapshot
    /// de saga persistido si existe (camino de recuperación).
    pub fn new(transaction: Transaction, user_id: UserId) -> Result<Self, TransferError> {
        let source_wallet_id = transaction.source_wallet_id.ok_or_else(|| {
            TransferError::InvalidRequest("Transfer transaction without source wallet".into())
        })?;
        let destination_wallet_id = transaction.destination_wallet_id.ok_or_else(|| {
            TransferError::InvalidRequest("Transfer transaction without destination wallet".into())
        })?;
        let amount = transaction.amount;
        let saga = transaction.saga_state.clone().unwrap_or_default();

        Ok(Self {
            transaction,
            user_id,
            source_wallet_id,
            destination_wallet_id,
            amount,
            saga,
        })
    }
}

/// Un paso de la saga: acción forward con su inversa.
///
/// Cada paso es la única unidad atómica durable; el coordinador persiste el
/// snapshot de la saga después de cada transición.
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reintentos máximos ante errores de infraestructura. Cero = no
    /// reintentable.
    fn max_retries(&self) -> u32;

    /// Sub-estado de la transferencia al completar este paso.
    fn completed_state(&self) -> TransferState;

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError>;

    async fn compensate(&self, ctx: &mut TransferContext) -> Result<(), TransferError>;
}

/// Coordinador de la saga: ejecuta los pasos en orden con reintentos por paso
/// y compensación en orden inverso ante fallos.
pub struct SagaCoordinator {
    steps: Vec<Arc<dyn SagaStep>>,
    transaction_repo: Arc<dyn TransactionRepository>,
}

impl SagaCoordinator {
    pub fn new(steps: Vec<Arc<dyn SagaStep>>, transaction_repo: Arc<dyn TransactionRepository>) -> Self {
        Self {
            steps,
            transaction_repo,
        }
    }

    /// Corre la secuencia forward completa. En fallo terminal compensa lo
    /// completado en orden inverso y deja la transacción en FAILED.
    pub async fn run(&self, mut ctx: TransferContext) -> (TransferContext, Result<(), TransferError>) {
        ctx.transaction.status = TransactionStatus::PROCESSING;
        ctx.transaction.processed_at = Some(Utc::now());
        self.persist(&mut ctx).await;

        for step in &self.steps {
            let mut attempts: u32 = 0;
            loop {
                match step.execute(&mut ctx).await {
                    Ok(()) => {
                        ctx.saga.record_completed(step.name());
                        ctx.transaction.transfer_state = Some(step.completed_state());
                        self.persist(&mut ctx).await;
                        break;
                    }
                    Err(e) => {
                        ctx.saga.record_error(step.name(), e.to_string(), Utc::now());

                        if e.is_retryable() && attempts < step.max_retries() {
                            attempts += 1;
                            ctx.saga.retry_count += 1;
                            ctx.transaction.retry_count += 1;
                            self.persist(&mut ctx).await;
                            warn!(
                                "Step {} failed (attempt {}/{}), retrying: {}",
                                step.name(),
                                attempts,
                                step.max_retries(),
                                e
                            );
                            continue;
                        }

                        let compensated = self.compensate_completed(&mut ctx).await;
                        self.finalize_failure(&mut ctx, &e, compensated).await;
                        return (ctx, Err(e));
                    }
                }
            }
        }

        ctx.transaction.status = TransactionStatus::COMPLETED;
        ctx.transaction.transfer_state = Some(TransferState::Completed);
        ctx.transaction.completed_at = Some(Utc::now());
        self.persist(&mut ctx).await;

        info!(
            "Transfer {} completed: {} from {} to {}",
            ctx.transaction.id, ctx.amount, ctx.source_wallet_id, ctx.destination_wallet_id
        );

        (ctx, Ok(()))
    }

    /// Compensa una transacción atascada reconstruida desde el store (camino
    /// de recuperación tras un crash). Deja la fila en FAILED/COMPENSATED.
    pub async fn recover(&self, transaction: Transaction, user_id: UserId) -> Result<(), TransferError> {
        let mut ctx = TransferContext::new(transaction, user_id)?;

        let stale_error = TransferError::Store("Saga interrupted before completion".to_string());
        let compensated = self.compensate_completed(&mut ctx).await;
        self.finalize_failure(&mut ctx, &stale_error, compensated).await;

        Ok(())
    }

    /// Compensación best-effort en orden inverso. Un fallo individual se
    /// registra y NO detiene el resto de las compensaciones. Retorna si
    /// alguna compensación corrió.
    async fn compensate_completed(&self, ctx: &mut TransferContext) -> bool {
        let pending = ctx.saga.pending_compensations();
        if pending.is_empty() {
            return false;
        }

        ctx.transaction.transfer_state = Some(TransferState::CompensationPending);
        self.persist(ctx).await;

        let mut any_ran = false;
        for name in pending {
            let Some(step) = self.steps.iter().find(|s| s.name() == name) else {
                warn!("No step registered for compensation of {}", name);
                continue;
            };

            match step.compensate(ctx).await {
                Ok(()) => {
                    ctx.saga.record_compensated(&name);
                    any_ran = true;
                    self.persist(ctx).await;
                }
                Err(e) => {
                    // Alerta operacional: la transacción queda marcada para
                    // conciliación fuera de banda.
                    let failure = TransferError::CompensationFailure(format!(
                        "step {} of transaction {}: {}",
                        name, ctx.transaction.id, e
                    ));
                    error!("{}", failure);
                    ctx.saga
                        .record_error(&name, failure.to_string(), Utc::now());
                    self.persist(ctx).await;
                }
            }
        }

        any_ran
    }

    async fn finalize_failure(
        &self,
        ctx: &mut TransferContext,
        cause: &TransferError,
        compensated: bool,
    ) {
        ctx.transaction.status = TransactionStatus::FAILED;
        ctx.transaction.transfer_state = Some(if compensated {
            TransferState::Compensated
        } else {
            TransferState::Failed
        });
        ctx.transaction.failed_at = Some(Utc::now());
        ctx.transaction.error_detail = Some(ErrorDetail::from(cause));
        self.persist(ctx).await;
    }

    /// Persiste el snapshot de la saga en la fila. Un fallo de persistencia
    /// se loguea: el estado en memoria sigue siendo la verdad del proceso y
    /// el job de recuperación cierra la brecha si el proceso muere.
    async fn persist(&self, ctx: &mut TransferContext) {
        ctx.transaction.saga_state = Some(ctx.saga.clone());
        if let Err(e) = self.transaction_repo.update(ctx.transaction.clone()).await {
            warn!(
                "Failed to persist saga snapshot for {}: {}",
                ctx.transaction.id, e
            );
        }
    }
}

/// Paso 0: confirma que ambas billeteras existen, están activas, la origen
/// pertenece al caller y las divisas coinciden.
pub struct ValidateTransferStep {
    wallet_repo: Arc<dyn WalletRepository>,
}

impl ValidateTransferStep {
    pub fn new(wallet_repo: Arc<dyn WalletRepository>) -> Self {
        Self { wallet_repo }
    }
}

#[async_trait]
impl SagaStep for ValidateTransferStep {
    fn name(&self) -> &'static str {
        STEP_VALIDATE
    }

    fn max_retries(&self) -> u32 {
        3
    }

    fn completed_state(&self) -> TransferState {
        TransferState::ValidationComplete
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        if ctx.source_wallet_id == ctx.destination_wallet_id {
            return Err(TransferError::InvalidRequest(
                "La billetera origen y destino no pueden ser la misma".into(),
            ));
        }

        let source = self
            .wallet_repo
            .find_by_id(ctx.source_wallet_id)
            .await?
            .filter(|w| w.is_operable_by(ctx.user_id))
            .ok_or(TransferError::NotFound(ctx.source_wallet_id))?;

        let destination = self
            .wallet_repo
            .find_by_id(ctx.destination_wallet_id)
            .await?
            .filter(|w| w.is_active())
            .ok_or(TransferError::NotFound(ctx.destination_wallet_id))?;

        if source.currency() != destination.currency() {
            return Err(TransferError::CurrencyMismatch);
        }

        Ok(())
    }

    async fn compensate(&self, _ctx: &mut TransferContext) -> Result<(), TransferError> {
        Ok(())
    }
}

/// Paso 1: marca la reserva advisory de fondos sobre la fila. No es un hold
/// exclusivo; el guardián autoritativo es el débito bajo lock del paso 2.
pub struct ReserveFundsStep;

#[async_trait]
impl SagaStep for ReserveFundsStep {
    fn name(&self) -> &'static str {
        STEP_RESERVE
    }

    fn max_retries(&self) -> u32 {
        2
    }

    fn completed_state(&self) -> TransferState {
        TransferState::FundsReserved
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        ctx.transaction.reserved_amount = Some(ctx.amount);
        ctx.transaction.reservation_expires_at =
            Some(Utc::now() + ChronoDuration::minutes(RESERVATION_TTL_MINUTES));
        Ok(())
    }

    async fn compensate(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        ctx.transaction.reserved_amount = None;
        ctx.transaction.reservation_expires_at = None;
        Ok(())
    }
}

/// Paso 2: débito de la billetera origen bajo su lease, con snapshot de
/// balances y bump del cache versionado.
pub struct DebitSourceStep {
    wallet_repo: Arc<dyn WalletRepository>,
    cache: Arc<dyn CacheGateway>,
    lock_timeout: Duration,
}

impl DebitSourceStep {
    pub fn new(
        wallet_repo: Arc<dyn WalletRepository>,
        cache: Arc<dyn CacheGateway>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            wallet_repo,
            cache,
            lock_timeout,
        }
    }
}

#[async_trait]
impl SagaStep for DebitSourceStep {
    fn name(&self) -> &'static str {
        STEP_DEBIT
    }

    fn max_retries(&self) -> u32 {
        2
    }

    fn completed_state(&self) -> TransferState {
        TransferState::DebitComplete
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        let wallet_id = ctx.source_wallet_id;
        let token = self
            .cache
            .acquire_wallet_lock(wallet_id, self.lock_timeout)
            .await?
            .ok_or(TransferError::LockTimeout(wallet_id))?;

        let result = self.wallet_repo.apply_delta(wallet_id, -ctx.amount).await;

        if let Ok(change) = &result {
            ctx.transaction.source_balance_before = Some(change.balance_before);
            ctx.transaction.source_balance_after = Some(change.balance_after);
            refresh_versioned_balance(
                &self.cache,
                wallet_id,
                change.balance_after,
                change.version as i64,
            )
            .await;
        }

        if let Err(e) = self.cache.release_wallet_lock(wallet_id, &token).await {
            warn!("Failed to release source lease for {}: {}", wallet_id, e);
        }

        result.map(|_| ())
    }

    /// Devuelve los fondos al origen. La compensación procede aunque el lease
    /// no se consiga: el UPDATE por expresión es atómico y el CAS protege el
    /// cache de escritores tardíos.
    async fn compensate(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        let wallet_id = ctx.source_wallet_id;
        let token = match self.cache.acquire_wallet_lock(wallet_id, self.lock_timeout).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Compensating debit without lease for {}: {}", wallet_id, e);
                None
            }
        };

        let result = self.wallet_repo.apply_delta(wallet_id, ctx.amount).await;

        if let Ok(change) = &result {
            refresh_versioned_balance(
                &self.cache,
                wallet_id,
                change.balance_after,
                change.version as i64,
            )
            .await;
        }

        if let Some(token) = token {
            if let Err(e) = self.cache.release_wallet_lock(wallet_id, &token).await {
                warn!("Failed to release source lease for {}: {}", wallet_id, e);
            }
        }

        result.map(|_| ())
    }
}

/// Paso 3: crédito a la billetera destino bajo su lease.
pub struct CreditDestinationStep {
    wallet_repo: Arc<dyn WalletRepository>,
    cache: Arc<dyn CacheGateway>,
    lock_timeout: Duration,
}

impl CreditDestinationStep {
    pub fn new(
        wallet_repo: Arc<dyn WalletRepository>,
        cache: Arc<dyn CacheGateway>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            wallet_repo,
            cache,
            lock_timeout,
        }
    }
}

#[async_trait]
impl SagaStep for CreditDestinationStep {
    fn name(&self) -> &'static str {
        STEP_CREDIT
    }

    fn max_retries(&self) -> u32 {
        2
    }

    fn completed_state(&self) -> TransferState {
        TransferState::CreditComplete
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        let wallet_id = ctx.destination_wallet_id;
        let token = self
            .cache
            .acquire_wallet_lock(wallet_id, self.lock_timeout)
            .await?
            .ok_or(TransferError::LockTimeout(wallet_id))?;

        let result = self.wallet_repo.apply_delta(wallet_id, ctx.amount).await;

        if let Ok(change) = &result {
            ctx.transaction.destination_balance_before = Some(change.balance_before);
            ctx.transaction.destination_balance_after = Some(change.balance_after);
            refresh_versioned_balance(
                &self.cache,
                wallet_id,
                change.balance_after,
                change.version as i64,
            )
            .await;
        }

        if let Err(e) = self.cache.release_wallet_lock(wallet_id, &token).await {
            warn!("Failed to release destination lease for {}: {}", wallet_id, e);
        }

        result.map(|_| ())
    }

    /// Retira el crédito del destino. Puede fallar con InsufficientBalance si
    /// el destinatario ya gastó los fondos; ese fallo queda como alerta de
    /// conciliación en el snapshot de la saga.
    async fn compensate(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        let wallet_id = ctx.destination_wallet_id;
        let token = match self.cache.acquire_wallet_lock(wallet_id, self.lock_timeout).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Compensating credit without lease for {}: {}", wallet_id, e);
                None
            }
        };

        let result = self.wallet_repo.apply_delta(wallet_id, -ctx.amount).await;

        if let Ok(change) = &result {
            refresh_versioned_balance(
                &self.cache,
                wallet_id,
                change.balance_after,
                change.version as i64,
            )
            .await;
        }

        if let Some(token) = token {
            if let Err(e) = self.cache.release_wallet_lock(wallet_id, &token).await {
                warn!("Failed to release destination lease for {}: {}", wallet_id, e);
            }
        }

        result.map(|_| ())
    }
}

/// Paso 4: concilia los snapshots de ambos lados antes de cerrar. No es
/// reintentable: si los snapshots no cuadran hay un bug serio río arriba.
pub struct FinalizeTransferStep;

#[async_trait]
impl SagaStep for FinalizeTransferStep {
    fn name(&self) -> &'static str {
        STEP_FINALIZE
    }

    fn max_retries(&self) -> u32 {
        0
    }

    fn completed_state(&self) -> TransferState {
        TransferState::Completed
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        let tx = &ctx.transaction;
        let (Some(source_before), Some(source_after), Some(dest_before), Some(dest_after)) = (
            tx.source_balance_before,
            tx.source_balance_after,
            tx.destination_balance_before,
            tx.destination_balance_after,
        ) else {
            return Err(TransferError::Store(
                "Balance snapshots missing at finalization".into(),
            ));
        };

        if source_after != source_before - ctx.amount || dest_after != dest_before + ctx.amount {
            return Err(TransferError::Store(format!(
                "Balance snapshots do not reconcile for transaction {}",
                tx.id
            )));
        }

        Ok(())
    }

    async fn compensate(&self, _ctx: &mut TransferContext) -> Result<(), TransferError> {
        Ok(())
    }
}

/// Paso 5: registra el consumo de límites dentro de la saga, con su inversa.
/// Así un crash nunca deja una transferencia completada sin contar.
pub struct CommitLimitUsageStep {
    limits: Arc<TransferLimitService>,
}

impl CommitLimitUsageStep {
    pub fn new(limits: Arc<TransferLimitService>) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl SagaStep for CommitLimitUsageStep {
    fn name(&self) -> &'static str {
        STEP_COMMIT_USAGE
    }

    fn max_retries(&self) -> u32 {
        2
    }

    fn completed_state(&self) -> TransferState {
        TransferState::Completed
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        self.limits
            .commit_usage(ctx.user_id, ctx.amount, Utc::now())
            .await
    }

    async fn compensate(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        self.limits
            .revert_usage(ctx.user_id, ctx.amount, Utc::now())
            .await
    }
}

/// Secuencia forward completa de una transferencia.
pub fn transfer_steps(
    wallet_repo: Arc<dyn WalletRepository>,
    cache: Arc<dyn CacheGateway>,
    limits: Arc<TransferLimitService>,
    write_lock_timeout: Duration,
) -> Vec<Arc<dyn SagaStep>> {
    vec![
        Arc::new(ValidateTransferStep::new(wallet_repo.clone())),
        Arc::new(ReserveFundsStep),
        Arc::new(DebitSourceStep::new(
            wallet_repo.clone(),
            cache.clone(),
            write_lock_timeout,
        )),
        Arc::new(CreditDestinationStep::new(
            wallet_repo,
            cache.clone(),
            write_lock_timeout,
        )),
        Arc::new(FinalizeTransferStep),
        Arc::new(CommitLimitUsageStep::new(limits)),
    ]
}
