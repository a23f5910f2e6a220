use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::error::{LimitWindow, TransferError};
use crate::domain::types::{TransactionId, UserId, WalletId};

/// Divisas soportadas por el servicio. Las transferencias exigen que ambas
/// billeteras compartan divisa; no hay conversión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "currency", rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    EUR,
    GBP,
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Currency::USD => write!(f, "USD"),
            Currency::EUR => write!(f, "EUR"),
            Currency::GBP => write!(f, "GBP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    PENDING,
    PROCESSING,
    COMPLETED,
    FAILED,
    CANCELLED,
    COMPENSATED,
}

impl TransactionStatus {
    /// Los estados terminales nunca transicionan a otro estado.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::COMPLETED
                | TransactionStatus::FAILED
                | TransactionStatus::CANCELLED
                | TransactionStatus::COMPENSATED
        )
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, TransactionStatus::PENDING | TransactionStatus::PROCESSING)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    DEPOSIT,
    WITHDRAWAL,
    TRANSFER,
    REFUND,
    COMPENSATION,
}

/// Sub-estado de una transferencia dentro de la saga. Avanza de forma
/// monótona por la secuencia forward hasta COMPLETED, o entra al camino de
/// compensación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "transfer_state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    Initiated,
    ValidationComplete,
    FundsReserved,
    DebitComplete,
    CreditComplete,
    Completed,
    CompensationPending,
    Compensated,
    Failed,
}

/// Detalle de error persistido en la transacción (JSON).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<&TransferError> for ErrorDetail {
    fn from(err: &TransferError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Modelo de Entidad: Wallet.
/// Representa una billetera con saldo en una divisa específica. El balance
/// solo se muta a través del repositorio bajo el lease de la billetera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    id: WalletId,
    user_id: UserId, // FK -> owner
    label: String,
    balance: Decimal, // Precisión fija, nunca negativo
    currency: Currency,
    active: bool,
    version: i32, // Versionado del balance (espejo en cache)
}

impl Wallet {
    /// Inicia la construcción de una instancia `Wallet` con el patrón Builder.
    pub fn builder() -> WalletBuilder {
        WalletBuilder::default()
    }

    /// Reconstruye una billetera cargada desde la persistencia.
    pub fn reconstitute(
        id: WalletId,
        user_id: UserId,
        label: String,
        balance: Decimal,
        currency: Currency,
        active: bool,
        version: i32,
    ) -> Result<Self, TransferError> {
        if label.trim().is_empty() {
            return Err(TransferError::InvalidRequest(
                "La etiqueta de la wallet no puede estar en blanco".into(),
            ));
        }

        Ok(Self {
            id,
            user_id,
            label,
            balance,
            currency,
            active,
            version,
        })
    }

    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Una billetera es operable para `user_id` si existe, está activa y le
    /// pertenece. El acceso de terceros se reporta como NotFound para no
    /// filtrar existencia.
    pub fn is_operable_by(&self, user_id: UserId) -> bool {
        self.active && self.user_id == user_id
    }
}

/// Builder para asegurar que toda instancia de `Wallet` nace válida.
#[derive(Default)]
pub struct WalletBuilder {
    user_id: Option<UserId>,
    label: Option<String>,
    currency: Option<Currency>,
}

impl WalletBuilder {
    pub fn user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn label(mut self, label: String) -> Self {
        self.label = Some(label);
        self
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Construye y valida la entidad. Una billetera nueva nace con balance 0,
    /// activa y versión 1.
    pub fn build(self) -> Result<Wallet, TransferError> {
        let user_id = self
            .user_id
            .ok_or_else(|| TransferError::InvalidRequest("El campo user_id es obligatorio".into()))?;
        let label = self
            .label
            .ok_or_else(|| TransferError::InvalidRequest("El campo label es obligatorio".into()))?;
        let currency = self
            .currency
            .ok_or_else(|| TransferError::InvalidRequest("El campo currency es obligatorio".into()))?;

        if label.trim().is_empty() {
            return Err(TransferError::InvalidRequest(
                "La etiqueta de la wallet no puede estar en blanco".into(),
            ));
        }

        Ok(Wallet {
            id: WalletId::new(),
            user_id,
            label,
            balance: Decimal::ZERO,
            currency,
            active: true,
            version: 1,
        })
    }
}

/// Valida que un monto sea estrictamente positivo y con máximo 2 decimales.
pub fn validate_amount(amount: Decimal) -> Result<(), TransferError> {
    if amount <= Decimal::ZERO {
        return Err(TransferError::InvalidRequest(
            "El monto debe ser mayor que cero".into(),
        ));
    }
    if amount.normalize().scale() > 2 {
        return Err(TransferError::InvalidRequest(
            "El monto admite máximo 2 decimales".into(),
        ));
    }
    Ok(())
}

/// Modelo de Entidad: Transaction.
/// Registro durable de un movimiento de fondos, incluyendo el snapshot de la
/// saga y los balances antes/después de cada lado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub transfer_state: Option<TransferState>,
    pub source_wallet_id: Option<WalletId>, // Nullable para depósitos
    pub destination_wallet_id: Option<WalletId>,
    pub description: Option<String>,
    pub metadata: serde_json::Value, // Opaco, nunca se interpreta
    pub idempotency_key: Option<String>,
    pub external_reference_id: Option<String>,
    pub parent_transaction_id: Option<TransactionId>,
    pub retry_count: i32,
    pub error_detail: Option<ErrorDetail>,
    pub saga_state: Option<crate::domain::saga::SagaState>,
    pub reserved_amount: Option<Decimal>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub source_balance_before: Option<Decimal>,
    pub source_balance_after: Option<Decimal>,
    pub destination_balance_before: Option<Decimal>,
    pub destination_balance_after: Option<Decimal>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Crea una transferencia PENDING lista para entrar a la saga.
    ///
    /// La validación de forma (monto positivo, máximo 2 decimales, wallets
    /// distintas) vive aquí para que nunca circule una transferencia inválida.
    pub fn transfer(
        source_wallet_id: WalletId,
        destination_wallet_id: WalletId,
        amount: Decimal,
        description: Option<String>,
        idempotency_key: String,
        external_reference_id: Option<String>,
    ) -> Result<Self, TransferError> {
        validate_amount(amount)?;
        if source_wallet_id == destination_wallet_id {
            return Err(TransferError::InvalidRequest(
                "La billetera origen y destino no pueden ser la misma".into(),
            ));
        }

        Ok(Self {
            id: TransactionId::new(),
            amount,
            transaction_type: TransactionType::TRANSFER,
            status: TransactionStatus::PENDING,
            transfer_state: Some(TransferState::Initiated),
            source_wallet_id: Some(source_wallet_id),
            destination_wallet_id: Some(destination_wallet_id),
            description,
            metadata: serde_json::json!({}),
            idempotency_key: Some(idempotency_key),
            external_reference_id,
            parent_transaction_id: None,
            retry_count: 0,
            error_detail: None,
            saga_state: None,
            reserved_amount: None,
            reservation_expires_at: None,
            source_balance_before: None,
            source_balance_after: None,
            destination_balance_before: None,
            destination_balance_after: None,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            created_at: Utc::now(),
        })
    }

    /// Crea un depósito COMPLETED (add-funds), que no pasa por la saga.
    pub fn deposit(
        destination_wallet_id: WalletId,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Self, TransferError> {
        validate_amount(amount)?;

        let now = Utc::now();
        Ok(Self {
            id: TransactionId::new(),
            amount,
            transaction_type: TransactionType::DEPOSIT,
            status: TransactionStatus::COMPLETED,
            transfer_state: None,
            source_wallet_id: None,
            destination_wallet_id: Some(destination_wallet_id),
            description,
            metadata: serde_json::json!({}),
            idempotency_key: None,
            external_reference_id: None,
            parent_transaction_id: None,
            retry_count: 0,
            error_detail: None,
            saga_state: None,
            reserved_amount: None,
            reservation_expires_at: None,
            source_balance_before: None,
            source_balance_after: None,
            destination_balance_before: None,
            destination_balance_after: None,
            processed_at: Some(now),
            completed_at: Some(now),
            failed_at: None,
            created_at: now,
        })
    }
}

/// Modelo de Entidad: TransferLimit.
/// Ledger de uso por usuario con ventanas diaria y mensual. Una lectura que
/// observa `last_daily_reset < hoy` debe poner `daily_used` en cero antes de
/// responder; igual para el mes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLimit {
    pub user_id: UserId,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub daily_used: Decimal,
    pub monthly_used: Decimal,
    pub last_daily_reset: NaiveDate,
    pub last_monthly_reset: NaiveDate,
}

impl TransferLimit {
    /// Ledger nuevo con los límites por defecto y ventanas arrancando hoy.
    pub fn new(user_id: UserId, daily_limit: Decimal, monthly_limit: Decimal, today: NaiveDate) -> Self {
        Self {
            user_id,
            daily_limit,
            monthly_limit,
            daily_used: Decimal::ZERO,
            monthly_used: Decimal::ZERO,
            last_daily_reset: today,
            last_monthly_reset: today,
        }
    }

    /// Aplica el reinicio de ventanas vencidas. Retorna `true` si algo cambió
    /// (y por tanto el reinicio debe persistirse).
    pub fn apply_window_resets(&mut self, today: NaiveDate) -> bool {
        let mut changed = false;

        if self.last_daily_reset < today {
            self.daily_used = Decimal::ZERO;
            self.last_daily_reset = today;
            changed = true;
        }

        // La ventana mensual reinicia al cambiar de mes calendario.
        let month_changed = (today.year(), today.month())
            != (self.last_monthly_reset.year(), self.last_monthly_reset.month());
        if month_changed && self.last_monthly_reset < today {
            self.monthly_used = Decimal::ZERO;
            self.last_monthly_reset = today;
            changed = true;
        }

        changed
    }

    /// Proyecta el uso con `amount` y reporta la primera ventana que quedaría
    /// excedida, si alguna.
    pub fn exceeded_window(&self, amount: Decimal) -> Option<LimitWindow> {
        if self.daily_used + amount > self.daily_limit {
            return Some(LimitWindow::Daily);
        }
        if self.monthly_used + amount > self.monthly_limit {
            return Some(LimitWindow::Monthly);
        }
        None
    }

    /// Registra el consumo de `amount` en ambas ventanas.
    pub fn record_usage(&mut self, amount: Decimal) {
        self.daily_used += amount;
        self.monthly_used += amount;
    }

    /// Revierte un consumo previamente registrado (compensación de saga).
    pub fn revert_usage(&mut self, amount: Decimal) {
        self.daily_used = (self.daily_used - amount).max(Decimal::ZERO);
        self.monthly_used = (self.monthly_used - amount).max(Decimal::ZERO);
    }

    pub fn daily_remaining(&self) -> Decimal {
        (self.daily_limit - self.daily_used).max(Decimal::ZERO)
    }

    pub fn monthly_remaining(&self) -> Decimal {
        (self.monthly_limit - self.monthly_used).max(Decimal::ZERO)
    }
}
