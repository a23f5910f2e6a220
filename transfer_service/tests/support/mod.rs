//! Dobles en memoria de los puertos de persistencia y cache, para ejercitar
//! el flujo de transferencia completo sin Postgres ni Redis.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use transfer_service::domain::entities::{Transaction, TransferLimit, Wallet};
use transfer_service::domain::error::TransferError;
use transfer_service::domain::gateways::{CacheGateway, VersionedBalance};
use transfer_service::domain::repository::{
    BalanceChange, TransactionRepository, TransferLimitRepository, WalletRepository,
};
use transfer_service::domain::types::{TransactionId, UserId, WalletId};

#[derive(Default)]
pub struct InMemoryWalletRepository {
    wallets: Mutex<HashMap<WalletId, Wallet>>,
    receipts: Mutex<Vec<Transaction>>,
    /// Inyección de fallo: todo crédito (delta > 0) sobre esta billetera
    /// falla con un error de store.
    fail_credit_on: Mutex<Option<WalletId>>,
}

impl InMemoryWalletRepository {
    pub fn seed(&self, wallet: Wallet) {
        self.wallets.lock().unwrap().insert(wallet.id(), wallet);
    }

    pub fn balance_of(&self, id: WalletId) -> Decimal {
        self.wallets.lock().unwrap()[&id].balance()
    }

    pub fn version_of(&self, id: WalletId) -> i32 {
        self.wallets.lock().unwrap()[&id].version()
    }

    pub fn fail_credits_on(&self, id: WalletId) {
        *self.fail_credit_on.lock().unwrap() = Some(id);
    }

    fn mutate(&self, id: WalletId, delta: Decimal) -> Result<BalanceChange, TransferError> {
        if delta > Decimal::ZERO && *self.fail_credit_on.lock().unwrap() == Some(id) {
            return Err(TransferError::Store("injected credit failure".into()));
        }

        let mut wallets = self.wallets.lock().unwrap();
        let wallet = wallets.get(&id).ok_or(TransferError::NotFound(id))?;

        let balance_before = wallet.balance();
        let balance_after = balance_before + delta;
        if balance_after < Decimal::ZERO {
            return Err(TransferError::InsufficientBalance(id));
        }

        let version = wallet.version() + 1;
        let updated = Wallet::reconstitute(
            wallet.id(),
            wallet.user_id(),
            wallet.label().to_string(),
            balance_after,
            wallet.currency(),
            wallet.is_active(),
            version,
        )?;
        wallets.insert(id, updated);

        Ok(BalanceChange {
            balance_before,
            balance_after,
            version,
        })
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn find_by_id(&self, id: WalletId) -> Result<Option<Wallet>, TransferError> {
        Ok(self.wallets.lock().unwrap().get(&id).cloned())
    }

    async fn create(&self, wallet: Wallet) -> Result<Wallet, TransferError> {
        self.seed(wallet.clone());
        Ok(wallet)
    }

    async fn apply_delta(
        &self,
        id: WalletId,
        delta: Decimal,
    ) -> Result<BalanceChange, TransferError> {
        self.mutate(id, delta)
    }

    async fn deposit(
        &self,
        id: WalletId,
        amount: Decimal,
        receipt: Transaction,
    ) -> Result<Wallet, TransferError> {
        self.mutate(id, amount)?;
        self.receipts.lock().unwrap().push(receipt);
        Ok(self.wallets.lock().unwrap()[&id].clone())
    }
}

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    transactions: Mutex<HashMap<TransactionId, Transaction>>,
}

impl InMemoryTransactionRepository {
    pub fn all(&self) -> Vec<Transaction> {
        self.transactions.lock().unwrap().values().cloned().collect()
    }

    pub fn by_key(&self, key: &str) -> Option<Transaction> {
        self.transactions
            .lock()
            .unwrap()
            .values()
            .find(|t| t.idempotency_key.as_deref() == Some(key))
            .cloned()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn save(&self, transaction: Transaction) -> Result<Transaction, TransferError> {
        let mut transactions = self.transactions.lock().unwrap();

        if let Some(key) = &transaction.idempotency_key {
            let duplicate = transactions
                .values()
                .any(|t| t.idempotency_key.as_deref() == Some(key.as_str()));
            if duplicate {
                return Err(TransferError::Conflict(
                    "A transaction with this idempotency key already exists".to_string(),
                ));
            }
        }

        transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn update(&self, transaction: Transaction) -> Result<Transaction, TransferError> {
        self.transactions
            .lock()
            .unwrap()
            .insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, TransferError> {
        Ok(self.transactions.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, TransferError> {
        Ok(self.by_key(key))
    }

    async fn find_processing_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, TransferError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|t| {
                t.status == transfer_service::domain::entities::TransactionStatus::PROCESSING
                    && t.created_at < cutoff
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryTransferLimitRepository {
    limits: Mutex<HashMap<UserId, TransferLimit>>,
}

impl InMemoryTransferLimitRepository {
    pub fn seed(&self, limit: TransferLimit) {
        self.limits.lock().unwrap().insert(limit.user_id, limit);
    }

    pub fn get(&self, user_id: UserId) -> Option<TransferLimit> {
        self.limits.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl TransferLimitRepository for InMemoryTransferLimitRepository {
    async fn find_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<Option<TransferLimit>, TransferError> {
        Ok(self.get(user_id))
    }

    async fn upsert(&self, limit: TransferLimit) -> Result<TransferLimit, TransferError> {
        self.seed(limit.clone());
        Ok(limit)
    }
}

/// Cache en memoria con la misma semántica observable que el gateway Redis:
/// KV plano, leases con token y entrada versionada con CAS. Los TTL no se
/// simulan; los tests no dependen de expiración.
#[derive(Default)]
pub struct InMemoryCacheGateway {
    kv: Mutex<HashMap<String, String>>,
    locks: Mutex<HashMap<String, String>>,
    balances: Mutex<HashMap<WalletId, VersionedBalance>>,
    token_counter: Mutex<u64>,
}

impl InMemoryCacheGateway {
    pub fn versioned_balance(&self, id: WalletId) -> Option<VersionedBalance> {
        self.balances.lock().unwrap().get(&id).cloned()
    }

    pub fn raw_entry(&self, key: &str) -> Option<String> {
        self.kv.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl CacheGateway for InMemoryCacheGateway {
    async fn get(&self, key: &str) -> Result<Option<String>, TransferError> {
        Ok(self.kv.lock().unwrap().get(key).cloned())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        _ttl: Duration,
    ) -> Result<(), TransferError> {
        self.kv
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TransferError> {
        self.kv.lock().unwrap().remove(key);
        Ok(())
    }

    async fn acquire_wallet_lock(
        &self,
        wallet_id: WalletId,
        _timeout: Duration,
    ) -> Result<Option<String>, TransferError> {
        let key = format!("wallet_lock:{}", wallet_id);
        let mut locks = self.locks.lock().unwrap();
        if locks.contains_key(&key) {
            return Ok(None);
        }
        let mut counter = self.token_counter.lock().unwrap();
        *counter += 1;
        let token = format!("token-{}", counter);
        locks.insert(key, token.clone());
        Ok(Some(token))
    }

    async fn release_wallet_lock(
        &self,
        wallet_id: WalletId,
        token: &str,
    ) -> Result<bool, TransferError> {
        let key = format!("wallet_lock:{}", wallet_id);
        let mut locks = self.locks.lock().unwrap();
        if locks.get(&key).map(String::as_str) == Some(token) {
            locks.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn get_versioned_balance(
        &self,
        wallet_id: WalletId,
    ) -> Result<Option<VersionedBalance>, TransferError> {
        Ok(self.balances.lock().unwrap().get(&wallet_id).cloned())
    }

    async fn put_versioned_balance(
        &self,
        wallet_id: WalletId,
        entry: &VersionedBalance,
    ) -> Result<(), TransferError> {
        self.balances.lock().unwrap().insert(wallet_id, entry.clone());
        Ok(())
    }

    async fn cas_versioned_balance(
        &self,
        wallet_id: WalletId,
        expected_version: Option<i64>,
        entry: &VersionedBalance,
    ) -> Result<bool, TransferError> {
        let mut balances = self.balances.lock().unwrap();
        let current_version = balances.get(&wallet_id).map(|e| e.version);
        if current_version == expected_version {
            balances.insert(wallet_id, entry.clone());
            return Ok(true);
        }
        Ok(false)
    }

    async fn invalidate_limit_counters(&self, user_id: UserId) -> Result<(), TransferError> {
        let mut kv = self.kv.lock().unwrap();
        kv.remove(&format!("transfer_limit:{}:daily", user_id));
        kv.remove(&format!("transfer_limit:{}:monthly", user_id));
        Ok(())
    }
}

/// Arnés completo del core de transferencias sobre los dobles en memoria.
pub struct TransferHarness {
    pub wallet_repo: Arc<InMemoryWalletRepository>,
    pub transaction_repo: Arc<InMemoryTransactionRepository>,
    pub limit_repo: Arc<InMemoryTransferLimitRepository>,
    pub cache: Arc<InMemoryCacheGateway>,
    pub use_case: transfer_service::use_cases::execute_transfer::ExecuteTransferUseCase,
}

impl TransferHarness {
    pub fn new() -> Self {
        use transfer_service::use_cases::execute_transfer::ExecuteTransferUseCase;
        use transfer_service::use_cases::idempotency::IdempotencyGate;
        use transfer_service::use_cases::transfer_limits::TransferLimitService;
        use transfer_service::use_cases::transfer_saga::{transfer_steps, SagaCoordinator};

        let wallet_repo = Arc::new(InMemoryWalletRepository::default());
        let transaction_repo = Arc::new(InMemoryTransactionRepository::default());
        let limit_repo = Arc::new(InMemoryTransferLimitRepository::default());
        let cache = Arc::new(InMemoryCacheGateway::default());

        let limit_service = Arc::new(TransferLimitService::new(
            limit_repo.clone(),
            cache.clone(),
            Decimal::from(10_000),
            Decimal::from(100_000),
        ));
        let gate = Arc::new(IdempotencyGate::new(
            transaction_repo.clone(),
            cache.clone(),
        ));
        let coordinator = Arc::new(SagaCoordinator::new(
            transfer_steps(
                wallet_repo.clone(),
                cache.clone(),
                limit_service.clone(),
                Duration::from_secs(30),
            ),
            transaction_repo.clone(),
        ));

        let use_case = ExecuteTransferUseCase::new(
            transaction_repo.clone(),
            limit_service,
            gate,
            coordinator,
        );

        Self {
            wallet_repo,
            transaction_repo,
            limit_repo,
            cache,
            use_case,
        }
    }
}
