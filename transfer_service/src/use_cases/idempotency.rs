use crate::domain::entities::{Transaction, TransactionStatus};
use crate::domain::error::TransferError;
use crate::domain::gateways::{keys, CacheGateway};
use crate::domain::repository::TransactionRepository;
use crate::domain::types::{UserId, WalletId};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const RESULT_TTL: Duration = Duration::from_secs(60 * 60);
const REQUEST_HASH_TTL: Duration = Duration::from_secs(30 * 60);
const ERROR_TTL: Duration = Duration::from_secs(5 * 60);

/// Ventana dentro de la cual un mismo hash de contenido bajo otra key se
/// considera un duplicado sospechoso.
const HASH_COLLISION_WINDOW_SECS: i64 = 5 * 60;

/// Códigos de error de negocio que hacen terminal a una transacción fallida:
/// reintentar con la misma key devuelve el veredicto, no re-ejecuta.
const TERMINAL_ERROR_CODES: [&str; 4] = [
    "insufficient_balance",
    "invalid_wallet",
    "limit_exceeded",
    "currency_mismatch",
];

/// Máximo de reintentos admitidos para una misma key antes de congelar el fallo.
const MAX_KEY_RETRIES: i32 = 3;

/// Datos del request que participan del hash de contenido. Excluye a
/// propósito el idempotency key y la referencia externa: la misma operación
/// de negocio debe hashear idéntico venga con la key que venga.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub user_id: UserId,
    pub endpoint: String,
    pub destination_wallet_id: WalletId,
    pub amount: Decimal,
    pub description: Option<String>,
    pub supplied_key: Option<String>,
}

/// Decisión del gate para un request entrante.
#[derive(Debug)]
pub enum GateDecision {
    /// Respuesta previa cacheada, replay byte-igual.
    CachedResponse(String),
    /// Transacción COMPLETED previa; el caller reconstruye la respuesta y
    /// calienta el result cache.
    CompletedTransaction(Box<Transaction>),
    /// Fallo terminal previo; el caller replica el veredicto.
    FailedTransaction(Box<Transaction>),
    /// Request nuevo (o reintento admisible): continuar con la key resuelta.
    Proceed { key: String },
}

/// Entrada del cache `request_hash:{hash}`.
#[derive(Debug, Serialize, Deserialize)]
struct RequestHashEntry {
    key: String,
    timestamp: DateTime<Utc>,
    endpoint: String,
}

/// Gate de idempotencia: deduplica requests repetidos por key estable y por
/// hash del contenido de negocio.
pub struct IdempotencyGate {
    transaction_repo: Arc<dyn TransactionRepository>,
    cache: Arc<dyn CacheGateway>,
}

impl IdempotencyGate {
    pub fn new(
        transaction_repo: Arc<dyn TransactionRepository>,
        cache: Arc<dyn CacheGateway>,
    ) -> Self {
        Self {
            transaction_repo,
            cache,
        }
    }

    /// Evalúa un request entrante contra el estado previo (cache + store).
    pub async fn check(&self, request: &GateRequest) -> Result<GateDecision, TransferError> {
        let key = match &request.supplied_key {
            Some(key) => key.clone(),
            None => Self::synthesize_key(request),
        };

        // 1. Result cache: hit -> replay directo.
        match self.cache.get(&keys::idempotency_result(&key)).await {
            Ok(Some(cached)) => return Ok(GateDecision::CachedResponse(cached)),
            Ok(None) => {}
            Err(e) => warn!("Result cache lookup failed for key {}: {}", key, e),
        }

        // 2. Registro durable bajo la key.
        if let Some(tx) = self.transaction_repo.find_by_idempotency_key(&key).await? {
            match tx.status {
                TransactionStatus::COMPLETED => {
                    return Ok(GateDecision::CompletedTransaction(Box::new(tx)));
                }
                TransactionStatus::PENDING | TransactionStatus::PROCESSING => {
                    return Err(TransferError::Conflict(format!(
                        "A transfer with idempotency key {} is already in flight",
                        key
                    )));
                }
                TransactionStatus::FAILED
                | TransactionStatus::CANCELLED
                | TransactionStatus::COMPENSATED => {
                    if !Self::is_retryable_failure(&tx) {
                        return Ok(GateDecision::FailedTransaction(Box::new(tx)));
                    }
                    // Reintento admisible: sigue como request nuevo.
                }
            }
        }

        // 3. Cross-check por hash de contenido, solo para keys del caller.
        //    Las keys auto_ no se comparten entre reintentos, así que el
        //    chequeo no les aplica.
        if request.supplied_key.is_some() {
            self.check_request_hash(request, &key).await?;
        }

        Ok(GateDecision::Proceed { key })
    }

    /// Publica la respuesta exitosa para replay (TTL 1 h).
    pub async fn record_success(&self, key: &str, response_json: &str) {
        if let Err(e) = self
            .cache
            .set_with_ttl(&keys::idempotency_result(key), response_json, RESULT_TTL)
            .await
        {
            warn!("Failed to cache idempotent result for key {}: {}", key, e);
        }
    }

    /// Registra el veredicto de fallo (TTL 5 min). La fila FAILED en el store
    /// queda como registro durable.
    pub async fn record_failure(&self, key: &str, error: &TransferError) {
        let detail = serde_json::json!({
            "code": error.error_code(),
            "message": error.to_string(),
        });
        if let Err(e) = self
            .cache
            .set_with_ttl(&keys::idempotency_error(key), &detail.to_string(), ERROR_TTL)
            .await
        {
            warn!("Failed to cache idempotent error for key {}: {}", key, e);
        }
    }

    async fn check_request_hash(
        &self,
        request: &GateRequest,
        key: &str,
    ) -> Result<(), TransferError> {
        let hash = Self::content_hash(request);

        // Misma key con otro contenido de negocio: uso incorrecto de la key.
        match self.cache.get(&keys::idempotency_request(key)).await {
            Ok(Some(stored_hash)) if stored_hash != hash => {
                return Err(TransferError::Conflict(format!(
                    "Idempotency key {} was already used with a different request payload",
                    key
                )));
            }
            Ok(_) => {}
            Err(e) => warn!("Request hash lookup failed for key {}: {}", key, e),
        }

        // Mismo contenido bajo otra key reciente, con la original en vuelo.
        match self.cache.get(&keys::request_hash(&hash)).await {
            Ok(Some(raw)) => {
                if let Ok(entry) = serde_json::from_str::<RequestHashEntry>(&raw) {
                    let age = Utc::now().signed_duration_since(entry.timestamp);
                    if entry.key != key && age.num_seconds() < HASH_COLLISION_WINDOW_SECS {
                        let original = self
                            .transaction_repo
                            .find_by_idempotency_key(&entry.key)
                            .await?;
                        if original.is_some_and(|tx| tx.status.is_in_flight()) {
                            return Err(TransferError::Conflict(format!(
                                "An identical transfer is already in flight under key {}",
                                entry.key
                            )));
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Content hash lookup failed: {}", e),
        }

        // Publica los mapeos hash->key y key->hash (best-effort).
        let entry = RequestHashEntry {
            key: key.to_string(),
            timestamp: Utc::now(),
            endpoint: request.endpoint.clone(),
        };
        if let Ok(raw) = serde_json::to_string(&entry) {
            if let Err(e) = self
                .cache
                .set_with_ttl(&keys::request_hash(&hash), &raw, REQUEST_HASH_TTL)
                .await
            {
                warn!("Failed to store content hash mapping: {}", e);
            }
        }
        if let Err(e) = self
            .cache
            .set_with_ttl(&keys::idempotency_request(key), &hash, REQUEST_HASH_TTL)
            .await
        {
            warn!("Failed to store key hash mapping for {}: {}", key, e);
        }

        Ok(())
    }

    /// Hash estable del contenido de negocio del request.
    fn content_hash(request: &GateRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"POST");
        hasher.update(request.endpoint.as_bytes());
        hasher.update(request.user_id.to_string().as_bytes());
        hasher.update(request.destination_wallet_id.to_string().as_bytes());
        hasher.update(request.amount.to_string().as_bytes());
        hasher.update(request.description.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Key sintética para requests sin key del caller. No es estable entre
    /// reintentos: solo deduplica duplicados accidentales del mismo envío.
    fn synthesize_key(request: &GateRequest) -> String {
        let nonce: u64 = rand::thread_rng().gen();
        let mut hasher = Sha256::new();
        hasher.update(Self::content_hash(request).as_bytes());
        hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(nonce.to_le_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("auto_{}", &digest[..32])
    }

    fn is_retryable_failure(tx: &Transaction) -> bool {
        if tx.retry_count >= MAX_KEY_RETRIES {
            return false;
        }
        match &tx.error_detail {
            Some(detail) => !TERMINAL_ERROR_CODES.contains(&detail.code.as_str()),
            None => true,
        }
    }
}
